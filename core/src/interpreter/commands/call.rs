//! call, if / ifEmpty / ifArray, switch, return, void

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error};

use super::{parse_config, CALL, RETURN, SWITCH};
use crate::interpreter::context::ExecContext;
use crate::interpreter::errors::CommandError;
use crate::interpreter::frames::{self, split_names, ReturnSpec};
use crate::interpreter::registry::{Command, Invocation};
use crate::interpreter::values::is_empty;

/* ===================== call ===================== */

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallConfig {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params: Map<String, JsonValue>,
    #[serde(default)]
    pub result: String,
}

pub struct CallCommand;

impl Command for CallCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let config: CallConfig = parse_config(CALL, payload)?;
        if config.action.is_empty() {
            return Err(CommandError::MissingField {
                command: CALL.to_string(),
                field: "action",
            });
        }
        Ok(Box::new(config))
    }
}

impl Invocation for CallConfig {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        exec_call(ctx, self)
    }
}

/// Push a frame for `config.action`.
///
/// The pseudo-action `return` instead binds the params into the current
/// scope and returns them under their own names.
pub fn exec_call(ctx: &mut ExecContext, config: &CallConfig) -> bool {
    if config.action.is_empty() {
        return true;
    }

    if config.action == RETURN {
        let params = match frames::resolve_params(ctx, &config.params) {
            Ok(params) => params,
            Err(e) => {
                error!(error = %e, "Cannot resolve return parameters");
                return false;
            }
        };
        let scope = ctx.current_scope();
        let names: Vec<String> = params.keys().cloned().collect();
        {
            let mut scopes = ctx.request().scopes();
            for (key, value) in params {
                scopes.set(scope, key, value);
            }
        }
        return frames::return_early(ctx, Some(&names));
    }

    match frames::call(ctx, &config.action, &config.params, ReturnSpec::parse(&config.result)) {
        Ok(_) => true,
        Err(e) => {
            error!(action = %config.action, error = %e, "Cannot resolve call parameters");
            false
        }
    }
}

/* ===================== if / ifEmpty / ifArray ===================== */

/// How an `if`-family command reads its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Boolean expression
    Boolean,
    /// Expression value is null, "", [] or {}
    Empty,
    /// Expression value is an array
    Array,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IfConfig {
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub then: Option<CallConfig>,
    #[serde(default, rename = "else")]
    pub otherwise: Option<CallConfig>,
}

pub struct IfCommand {
    name: &'static str,
    predicate: Predicate,
}

impl IfCommand {
    pub fn new(name: &'static str, predicate: Predicate) -> Self {
        Self { name, predicate }
    }
}

impl Command for IfCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let config: IfConfig = parse_config(self.name, payload)?;
        if config.condition.trim().is_empty() {
            return Err(CommandError::MissingField {
                command: self.name.to_string(),
                field: "condition",
            });
        }
        Ok(Box::new(IfInvocation {
            predicate: self.predicate,
            config,
        }))
    }
}

struct IfInvocation {
    predicate: Predicate,
    config: IfConfig,
}

impl Invocation for IfInvocation {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        let condition = &self.config.condition;
        let outcome = match self.predicate {
            Predicate::Boolean => ctx.eval_boolean(condition),
            Predicate::Empty => ctx.eval_any(condition).map(|v| is_empty(&v)),
            Predicate::Array => ctx.eval_any(condition).map(|v| v.is_array()),
        };
        let chosen = match outcome {
            Ok(true) => &self.config.then,
            Ok(false) => &self.config.otherwise,
            Err(e) => {
                error!(condition = %condition, error = %e, "Cannot evaluate condition");
                return false;
            }
        };
        match chosen {
            Some(branch) => exec_call(ctx, branch),
            None => true,
        }
    }
}

/* ===================== switch ===================== */

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchConfig {
    /// Condition expression -> action name, tried in document order
    #[serde(default)]
    pub cases: Map<String, JsonValue>,
    #[serde(default, rename = "defaultAction")]
    pub default_action: String,
    #[serde(default)]
    pub params: Map<String, JsonValue>,
    #[serde(default)]
    pub result: String,
}

pub struct SwitchCommand;

impl Command for SwitchCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let config: SwitchConfig = parse_config(SWITCH, payload)?;
        if let Some((case, _)) = config.cases.iter().find(|(_, action)| !action.is_string()) {
            return Err(CommandError::Invalid(format!(
                "switch case '{}' must name an action",
                case
            )));
        }
        Ok(Box::new(config))
    }
}

impl Invocation for SwitchConfig {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        let root = ctx.request().root();
        let mut action = self.default_action.clone();
        for (condition, target) in &self.cases {
            match ctx.eval_boolean_in(root, condition) {
                Ok(true) => {
                    action = target.as_str().unwrap_or_default().to_string();
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(condition = %condition, error = %e, "Cannot evaluate switch case");
                    return false;
                }
            }
        }
        debug!(action = %action, "Switch selected branch");
        exec_call(
            ctx,
            &CallConfig {
                action,
                params: self.params.clone(),
                result: self.result.clone(),
            },
        )
    }
}

/* ===================== return / void ===================== */

#[derive(Debug, Default, Deserialize)]
struct ReturnConfig {
    #[serde(default)]
    result: String,
}

pub struct ReturnCommand;

impl Command for ReturnCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let trimmed = payload.trim();
        let names = if trimmed.starts_with('{') || trimmed.starts_with('@') {
            let config: ReturnConfig = parse_config(RETURN, trimmed)?;
            split_names(&config.result)
        } else {
            split_names(trimmed)
        };
        Ok(Box::new(ReturnInvocation { names }))
    }
}

struct ReturnInvocation {
    names: Vec<String>,
}

impl Invocation for ReturnInvocation {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        if self.names.is_empty() {
            frames::return_early(ctx, None)
        } else {
            frames::return_early(ctx, Some(&self.names))
        }
    }
}

pub struct VoidCommand;

struct Nothing;

impl Invocation for Nothing {
    fn run(&mut self, _ctx: &mut ExecContext) -> bool {
        true
    }
}

impl Command for VoidCommand {
    fn init(&self, _payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        Ok(Box::new(Nothing))
    }
}
