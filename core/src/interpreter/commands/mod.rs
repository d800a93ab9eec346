//! Built-in control-flow commands
//!
//! Each command parses its JSON payload in `init` into a config struct, and
//! that struct is the [`Invocation`](super::registry::Invocation) the loop
//! runs.

mod call;
mod loops;
mod vars;

pub use call::{CallConfig, CallCommand, IfCommand, Predicate, ReturnCommand, SwitchCommand, VoidCommand};
pub use loops::{BreakCommand, ForCommand, RangeCommand, FOR_INDEX, FOR_KEY, FOR_VALUE};
pub use vars::VarCommand;

use serde::de::DeserializeOwned;

use super::errors::CommandError;
use super::registry::Registry;

pub const CALL: &str = "call";
pub const IF: &str = "if";
pub const IF_EMPTY: &str = "ifEmpty";
pub const IF_ARRAY: &str = "ifArray";
pub const SWITCH: &str = "switch";
pub const FOR: &str = "for";
pub const RANGE: &str = "range";
pub const RETURN: &str = "return";
pub const VOID: &str = "void";
pub const BREAK: &str = "break";
pub const VAR: &str = "var";

pub fn register_builtins(registry: &mut Registry) {
    registry
        .register(CALL, CallCommand)
        .register(IF, IfCommand::new(IF, Predicate::Boolean))
        .register(IF_EMPTY, IfCommand::new(IF_EMPTY, Predicate::Empty))
        .register(IF_ARRAY, IfCommand::new(IF_ARRAY, Predicate::Array))
        .register(SWITCH, SwitchCommand)
        .register(FOR, ForCommand)
        .register(RANGE, RangeCommand)
        .register(RETURN, ReturnCommand)
        .register(VOID, VoidCommand)
        .register(BREAK, BreakCommand)
        .register(VAR, VarCommand);
}

/// Decode a command payload: an inline JSON object, or `@path` naming a
/// file that holds one.
pub fn parse_config<T: DeserializeOwned>(command: &str, payload: &str) -> Result<T, CommandError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(CommandError::EmptyPayload(command.to_string()));
    }

    let owned;
    let source = if payload.starts_with('{') && payload.ends_with('}') {
        payload
    } else if let Some(path) = payload.strip_prefix('@').filter(|p| !p.is_empty()) {
        owned = std::fs::read_to_string(path).map_err(|e| CommandError::ParameterFile {
            path: path.to_string(),
            source: e,
        })?;
        let trimmed = owned.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            return Err(CommandError::NotAnObject {
                command: command.to_string(),
            });
        }
        trimmed
    } else {
        return Err(CommandError::NotAnObject {
            command: command.to_string(),
        });
    };

    serde_json::from_str(source).map_err(|e| CommandError::InvalidJson {
        command: command.to_string(),
        source: e,
    })
}

/// Like [`parse_config`], but an empty payload yields the default config.
pub fn parse_optional_config<T: DeserializeOwned + Default>(
    command: &str,
    payload: &str,
) -> Result<T, CommandError> {
    if payload.trim().is_empty() {
        Ok(T::default())
    } else {
        parse_config(command, payload)
    }
}
