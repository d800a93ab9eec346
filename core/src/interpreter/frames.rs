//! Call and return primitives
//!
//! A call pushes a [`Frame`] whose scope is a fresh child of the caller's
//! scope. A return pops it and copies the selected values into the caller's
//! scope under the names of the frame's [`ReturnSpec`]. Nothing else leaks
//! upward. Popping a frame that owns its scope releases it.

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use super::context::ExecContext;
use super::errors::StorageError;
use super::scope::ScopeId;
use super::storage;

/// Name that discards a return slot.
pub const DISCARD: &str = "_";

/// One activation record.
#[derive(Debug, Clone)]
pub struct Frame {
    pub action: String,
    /// Last executed instruction index; `-1` marks the frame exhausted.
    pub ip: i64,
    pub return_spec: ReturnSpec,
    pub scope: ScopeId,
    /// Set on frames driven by `for`/`range`; the target of `break`.
    /// A looping frame's implicit return ends a pass and publishes nothing.
    pub looping: bool,
    /// Whether popping this frame drops a reference on `scope`.
    pub owns_scope: bool,
}

impl Frame {
    pub fn is_exhausted(&self) -> bool {
        self.ip < 0
    }

    /// Property key of the next instruction, advancing the pointer.
    pub fn advance(&mut self) -> String {
        self.ip += 1;
        format!("{}_{}", self.action, self.ip)
    }
}

/// Caller-side variable names receiving a frame's results, in order.
///
/// An empty spec ignores whatever the callee returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnSpec(Vec<String>);

impl ReturnSpec {
    pub fn parse(text: &str) -> Self {
        ReturnSpec(split_names(text))
    }

    pub fn ignore() -> Self {
        ReturnSpec(Vec::new())
    }

    pub fn is_ignore(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

/// Split a comma separated name list, dropping blanks.
pub fn split_names(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Push a frame for `action` one level above the current one.
///
/// Returns the new frame's level.
pub fn push_frame(
    ctx: &mut ExecContext,
    action: &str,
    return_spec: ReturnSpec,
    params: Map<String, JsonValue>,
) -> usize {
    let parent = ctx.current_scope();
    let scope = ctx.request().scopes().alloc(Some(parent), params);
    ctx.frames.push(Frame {
        action: action.to_string(),
        ip: 0,
        return_spec,
        scope,
        looping: false,
        owns_scope: true,
    });
    let level = ctx.frames.len() - 1;
    debug!(level, action, "Entering action");
    level
}

/// Resolve `@address` parameter values and push a frame.
pub fn call(
    ctx: &mut ExecContext,
    action: &str,
    params: &Map<String, JsonValue>,
    return_spec: ReturnSpec,
) -> Result<usize, StorageError> {
    let resolved = resolve_params(ctx, params)?;
    Ok(push_frame(ctx, action, return_spec, resolved))
}

/// Copy `params`, replacing string values of the form `@address` by what
/// the address reads (or `null` when absent).
pub fn resolve_params(
    ctx: &ExecContext,
    params: &Map<String, JsonValue>,
) -> Result<Map<String, JsonValue>, StorageError> {
    let mut resolved = Map::with_capacity(params.len());
    for (key, value) in params {
        let value = match value.as_str().and_then(|s| s.strip_prefix('@')) {
            Some(address) => storage::read(ctx, address)?.unwrap_or(JsonValue::Null),
            None => value.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// Pop the active frame.
///
/// With `explicit` names the values are read from the callee and missing
/// ones become `""`. Without, the frame's own return-spec names are read and
/// missing ones are skipped. Either way they are written into the caller's
/// scope under the return-spec names; [`DISCARD`] on either side drops the
/// slot. The implicit return that ends a loop pass publishes nothing.
pub fn return_frame(ctx: &mut ExecContext, explicit: Option<&[String]>) -> bool {
    let Some(frame) = ctx.frames.last() else {
        warn!("Return with no active frame");
        return false;
    };
    let spec = if frame.looping && explicit.is_none() {
        ReturnSpec::ignore()
    } else {
        frame.return_spec.clone()
    };
    let action = frame.action.clone();

    let values: Vec<Option<JsonValue>> = if spec.is_ignore() {
        Vec::new()
    } else {
        let names = explicit.unwrap_or(spec.names());
        names
            .iter()
            .map(|name| {
                if name == DISCARD {
                    return None;
                }
                match storage::read(ctx, name) {
                    Ok(Some(value)) => Some(value),
                    Ok(None) | Err(_) if explicit.is_none() => None,
                    Ok(None) => {
                        warn!(action = %action, name = %name, "Returned variable is not defined");
                        Some(JsonValue::String(String::new()))
                    }
                    Err(e) => {
                        warn!(action = %action, name = %name, error = %e, "Cannot read returned variable");
                        Some(JsonValue::String(String::new()))
                    }
                }
            })
            .collect()
    };

    let popped = ctx.frames.pop();
    debug!(level = ctx.level(), action = %action, "Returned from action");

    for (target, value) in spec.names().iter().zip(values) {
        let Some(value) = value else { continue };
        if target == DISCARD {
            continue;
        }
        if let Err(e) = storage::save(ctx, target, value) {
            warn!(action = %action, target = %target, error = %e, "Cannot store returned value");
        }
    }
    if let Some(frame) = popped.filter(|f| f.owns_scope) {
        ctx.request().scopes().release(frame.scope);
    }
    true
}

/// Drop every frame above `level` without returning values.
pub fn unwind(ctx: &mut ExecContext, level: usize) {
    ctx.release_frames(level);
}

/// Return requested by the action itself (`return`, `call` to `return`).
///
/// Returning out of a `for`/`range` body also ends that loop, so the loop
/// frame publishes its results like a final return.
pub fn return_early(ctx: &mut ExecContext, explicit: Option<&[String]>) -> bool {
    if let Some(index) = ctx.frames.len().checked_sub(1) {
        if ctx.frames[index].looping {
            ctx.frames[index].looping = false;
            ctx.request_break(index);
        }
    }
    return_frame(ctx, explicit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_spec_parsing() {
        let spec = ReturnSpec::parse(" a, _ ,b,, ");
        assert_eq!(spec.names(), ["a", "_", "b"]);
        assert!(!spec.is_ignore());
        assert!(ReturnSpec::parse("  ").is_ignore());
    }

    #[test]
    fn test_frame_advance() {
        let mut frame = Frame {
            action: "GREET".into(),
            ip: 0,
            return_spec: ReturnSpec::ignore(),
            scope: crate::interpreter::scope::ScopeArena::new().alloc(None, Map::new()),
            looping: false,
            owns_scope: true,
        };
        assert_eq!(frame.advance(), "GREET_1");
        assert_eq!(frame.advance(), "GREET_2");
        frame.ip = -1;
        assert!(frame.is_exhausted());
    }
}
