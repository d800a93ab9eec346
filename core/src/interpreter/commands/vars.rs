//! var: assign and remove variables through the addressing scheme

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::error;

use super::{parse_config, VAR};
use crate::interpreter::context::ExecContext;
use crate::interpreter::errors::CommandError;
use crate::interpreter::registry::{Command, Invocation};
use crate::interpreter::storage;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VarConfig {
    /// Target address -> expression
    #[serde(default)]
    pub assign: Map<String, JsonValue>,
    /// Addresses to delete, after the assignments
    #[serde(default)]
    pub remove: Vec<String>,
}

pub struct VarCommand;

impl Command for VarCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let config: VarConfig = parse_config(VAR, payload)?;
        if config.assign.is_empty() && config.remove.is_empty() {
            return Err(CommandError::Invalid(
                "var needs at least one of assign or remove".to_string(),
            ));
        }
        Ok(Box::new(config))
    }
}

impl Invocation for VarConfig {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        if !assign_all(ctx, &self.assign) {
            return false;
        }
        for target in &self.remove {
            if let Err(e) = storage::delete(ctx, target) {
                error!(target = %target, error = %e, "Cannot remove variable");
                return false;
            }
        }
        true
    }
}

/// Evaluate `target: expression` pairs in the active scope and store them.
/// Non-string values are stored as they are.
pub(crate) fn assign_all(ctx: &ExecContext, assignments: &Map<String, JsonValue>) -> bool {
    for (target, expr) in assignments {
        let value = match expr {
            JsonValue::String(s) if s.trim().is_empty() => JsonValue::String(String::new()),
            JsonValue::String(s) => match ctx.eval_any(s) {
                Ok(value) => value,
                Err(e) => {
                    error!(target = %target, expr = %s, error = %e, "Cannot evaluate assignment");
                    return false;
                }
            },
            other => other.clone(),
        };
        if let Err(e) = storage::save(ctx, target, value) {
            error!(target = %target, error = %e, "Cannot store assignment");
            return false;
        }
    }
    true
}

