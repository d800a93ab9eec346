//! # Action Sequence Interpreter
//!
//! Request handling logic is written as string-keyed "actions" in the
//! properties store (`GREET_1`, `GREET_2`, ...) and interpreted at runtime.
//!
//! ## Layers
//!
//! - `registry`: keyword -> command (Init / Run / Async)
//! - `instruction`: `?` / `!` control characters, timing triple, command key
//! - `address`, `storage`, `providers`: decorated variable names and where they point
//! - `scope`: per-request arena of parent-linked environments
//! - `frames`: call / return primitives
//! - `exec_loop`: the fetch / expand / decode / dispatch cycle
//! - `commands`: `call`, `if`, `switch`, `for`, `range`, `return`, ...
//! - `engine`: assembly and host entry points

pub mod address;
pub mod commands;
pub mod context;
pub mod engine;
pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod frames;
pub mod instruction;
pub mod properties;
pub mod providers;
pub mod registry;
pub mod scope;
pub mod storage;
pub mod values;

#[cfg(test)]
mod tests;

pub use address::{Address, Level};
pub use context::{ExecContext, JoinBarrier, RequestContext, Session};
pub use engine::{ActionReport, CheckIssue, Engine, EngineBuilder, Outcome, ACTION_RESULT};
pub use errors::{CommandError, StorageError};
pub use expressions::{Evaluator, ExprEvaluator, VarLookup};
pub use instruction::{Instruction, Timing};
pub use properties::Properties;
pub use providers::{ProviderContext, Providers, StorageProvider};
pub use registry::{Command, Invocation, Registry};
