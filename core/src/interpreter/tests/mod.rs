//! Scenario tests for the interpreter
//!
//! Organized by feature area

mod call_tests;
mod helpers;
mod parallel_tests;
