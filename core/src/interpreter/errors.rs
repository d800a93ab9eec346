//! Error types for the action interpreter
//!
//! None of these cross the interpreter boundary: the sequence loop turns them
//! into a boolean outcome plus a log line. They exist so the layers below the
//! loop can report *why* something failed.

use thiserror::Error;

/// Failure while preparing a command (the Init half of a registration).
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty parameters in {0}")]
    EmptyPayload(String),

    #[error("parameters of {command} must be a JSON object")]
    NotAnObject { command: String },

    #[error("cannot read parameter file {path}: {source}")]
    ParameterFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid parameters for {command}: {source}")]
    InvalidJson {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be specified in {command}")]
    MissingField { command: String, field: &'static str },

    #[error("{0}")]
    Invalid(String),
}

/// Failure while parsing a decorated variable name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty variable name")]
    Empty,

    #[error("unknown level '{0}'")]
    UnknownLevel(String),

    #[error("ancestor level '{0}' is out of range")]
    BadAncestor(String),
}

/// Failure reported by a storage provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("no session available for {0}")]
    NoSession(String),

    #[error("provider {provider} does not support {operation}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },

    #[error("{0}")]
    Backend(String),
}

/// Failure of a save/read/delete through the addressing layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("{provider}: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("cannot evaluate {expr}: {source}")]
    Eval {
        expr: String,
        #[source]
        source: EvalError,
    },

    #[error("cannot parse literal {text}: {source}")]
    Literal {
        text: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot write to read-only address {0}")]
    ReadOnly(String),

    #[error("cannot update path {path}: {reason}")]
    Path { path: String, reason: String },

    #[error("no scope {0} levels up")]
    NoAncestor(usize),
}

/// Failure of the expression/template evaluator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error in expression: {0}")]
    Syntax(String),

    #[error("unterminated placeholder in {0}")]
    UnterminatedPlaceholder(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    Type(String),
}

/// Failure while decoding the decorations of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
    #[error("empty instruction")]
    Empty,

    #[error("the {position} timing value must be an integer number of seconds followed by a comma")]
    BadTiming { position: &'static str },

    #[error("instruction must have the form command:payload (':' is mandatory)")]
    MissingCommand,
}

/// Failure while loading the instruction source.
#[derive(Debug, Error)]
pub enum PropertiesError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
