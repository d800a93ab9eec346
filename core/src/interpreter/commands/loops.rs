//! for, range, break
//!
//! A loop pushes its body frame once and marks it `looping`. Each pass runs
//! one interpreter cycle at that frame's level; the body ends the pass by
//! draining (implicit return). Between passes the frame is pushed again with
//! its instruction pointer rewound, keeping the same scope, so loop variables
//! survive from one pass to the next. The driver holds the loop scope for the
//! whole loop, and the `result` names reach the caller only when the loop
//! ends.

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::ops::ControlFlow;
use tracing::{debug, error};

use super::vars::assign_all;
use super::{parse_config, parse_optional_config, BREAK, FOR, RANGE};
use crate::interpreter::context::ExecContext;
use crate::interpreter::errors::CommandError;
use crate::interpreter::exec_loop::run_cycle;
use crate::interpreter::frames::{self, Frame, ReturnSpec};
use crate::interpreter::registry::{Command, Invocation};
use crate::interpreter::storage;
use crate::interpreter::values::iterate;

pub const FOR_KEY: &str = "FOR_KEY";
pub const FOR_VALUE: &str = "FOR_VALUE";
pub const FOR_INDEX: &str = "FOR_INDEX";

/* ===================== Loop driver ===================== */

/// Verdict of the per-pass hook.
enum Pass {
    Run,
    Done,
    Fail,
}

fn enter_loop(ctx: &mut ExecContext, body: &str, result: &str, initial: &Map<String, JsonValue>) -> Option<usize> {
    let params = match frames::resolve_params(ctx, initial) {
        Ok(params) => params,
        Err(e) => {
            error!(body, error = %e, "Cannot resolve loop parameters");
            return None;
        }
    };
    let level = frames::push_frame(ctx, body, ReturnSpec::parse(result), params);
    ctx.frames[level].looping = true;
    Some(level)
}

/// Run passes of the loop frame at `level`.
///
/// `before` runs with the loop frame active and decides whether another
/// pass happens; `after` runs once the frame is re-entered for the next one.
fn drive<B, A>(ctx: &mut ExecContext, level: usize, before: B, after: A) -> bool
where
    B: FnMut(&mut ExecContext, usize) -> Pass,
    A: FnMut(&mut ExecContext) -> bool,
{
    // pass frames borrow the scope; the driver's reference is dropped below
    ctx.frames[level].owns_scope = false;
    let scope = ctx.frames[level].scope;
    let ok = run_passes(ctx, level, before, after);
    ctx.request().scopes().release(scope);
    ok
}

fn run_passes<B, A>(ctx: &mut ExecContext, level: usize, mut before: B, mut after: A) -> bool
where
    B: FnMut(&mut ExecContext, usize) -> Pass,
    A: FnMut(&mut ExecContext) -> bool,
{
    let snapshot: Frame = ctx.frames[level].clone();
    let mut pass = 0;
    loop {
        match before(ctx, pass) {
            Pass::Run => {}
            Pass::Done => {
                ctx.frames[level].looping = false;
                return frames::return_frame(ctx, None);
            }
            Pass::Fail => {
                frames::unwind(ctx, level);
                return false;
            }
        }

        let ok = run_cycle(ctx, level);
        frames::unwind(ctx, level);
        if !ok {
            return false;
        }
        if ctx.take_break(level) {
            debug!(level, passes = pass + 1, "Loop ended early");
            return true;
        }

        ctx.frames.push(Frame {
            ip: 0,
            ..snapshot.clone()
        });
        if !after(ctx) {
            frames::unwind(ctx, level);
            return false;
        }
        pass += 1;
    }
}

/* ===================== for ===================== */

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForConfig {
    #[serde(default)]
    pub initial: Map<String, JsonValue>,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub next: Map<String, JsonValue>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub result: String,
}

pub struct ForCommand;

impl Command for ForCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let config: ForConfig = parse_config(FOR, payload)?;
        if config.body.is_empty() {
            return Err(CommandError::MissingField {
                command: FOR.to_string(),
                field: "body",
            });
        }
        Ok(Box::new(config))
    }
}

impl Invocation for ForConfig {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        let Some(level) = enter_loop(ctx, &self.body, &self.result, &self.initial) else {
            return false;
        };
        let condition = self.condition.trim();
        let next = &self.next;

        drive(
            ctx,
            level,
            |ctx, _| {
                if condition.is_empty() {
                    return Pass::Run;
                }
                match ctx.eval_boolean(condition) {
                    Ok(true) => Pass::Run,
                    Ok(false) => Pass::Done,
                    Err(e) => {
                        error!(condition, error = %e, "Cannot evaluate loop condition");
                        Pass::Fail
                    }
                }
            },
            |ctx| assign_all(ctx, next),
        )
    }
}

/* ===================== range ===================== */

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeConfig {
    /// Address of the collection to iterate
    #[serde(default)]
    pub range: String,
    #[serde(default)]
    pub params: Map<String, JsonValue>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

pub struct RangeCommand;

impl Command for RangeCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let config: RangeConfig = parse_config(RANGE, payload)?;
        for (field, value) in [("range", &config.range), ("body", &config.body)] {
            if value.trim().is_empty() {
                return Err(CommandError::MissingField {
                    command: RANGE.to_string(),
                    field,
                });
            }
        }
        Ok(Box::new(config))
    }
}

impl Invocation for RangeConfig {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        let Some(level) = enter_loop(ctx, &self.body, &self.result, &self.params) else {
            return false;
        };

        let collection = match storage::read(ctx, &self.range) {
            Ok(value) => value.unwrap_or(JsonValue::Null),
            Err(e) => {
                error!(range = %self.range, error = %e, "Cannot resolve range collection");
                frames::unwind(ctx, level);
                return false;
            }
        };
        let mut items: Vec<(String, JsonValue)> = Vec::new();
        iterate(&collection, |key, value, _| {
            items.push((key.to_string(), value.clone()));
            ControlFlow::Continue(())
        });

        let key_name = self.key.as_deref().unwrap_or(FOR_KEY);
        let value_name = self.value.as_deref().unwrap_or(FOR_VALUE);

        drive(
            ctx,
            level,
            |ctx, pass| {
                let Some((key, value)) = items.get(pass) else {
                    return Pass::Done;
                };
                let scope = ctx.current_scope();
                let mut scopes = ctx.request().scopes();
                scopes.set(scope, key_name, JsonValue::String(key.clone()));
                scopes.set(scope, value_name, value.clone());
                scopes.set(scope, FOR_INDEX, JsonValue::from(pass));
                Pass::Run
            },
            |_| true,
        )
    }
}

/* ===================== break ===================== */

pub struct BreakCommand;

struct BreakInvocation;

impl Command for BreakCommand {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let _: Map<String, JsonValue> = parse_optional_config(BREAK, payload)?;
        Ok(Box::new(BreakInvocation))
    }
}

impl Invocation for BreakInvocation {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        let Some(index) = ctx.frames.iter().rposition(|f| f.looping) else {
            error!("break outside of a loop");
            return false;
        };
        for frame in &mut ctx.frames[index..] {
            frame.ip = -1;
        }
        // the loop frame's coming return is its last one
        ctx.frames[index].looping = false;
        ctx.request_break(index);
        true
    }
}
