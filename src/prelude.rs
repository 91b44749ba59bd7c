//! Prelude module for convenient imports.

pub use crate::error::{Result, RunnerError};
pub use crate::runner::{
    classify::{ErrorKind, GuestError},
    config::RunnerConfig,
    instance::{global_runner, RuntimeInstance, RuntimeState},
    session::{ExecutionFailure, ExecutionResult},
    syntax::{SyntaxCheckResult, SyntaxDiagnostic},
};
