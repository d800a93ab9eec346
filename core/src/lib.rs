pub mod cli;
pub mod config;
pub mod init;
pub mod interpreter;

// Re-export the engine API
pub use interpreter::{ActionReport, Engine, EngineBuilder, Outcome, RequestContext, Session};

// Re-export init API for convenience
pub use init::{initialize, Application, InitBuilder, InitOptions};
