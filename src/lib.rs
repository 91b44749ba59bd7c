//! # Ruby WASM Runner
//!
//! Run short Ruby snippets in an embedded interpreter, with captured output,
//! simulated interactive input and fast syntax feedback.
//!
//! The interpreter is the WASI build of CRuby (`ruby+stdlib.wasm`), hosted
//! by Wasmtime. The crate takes care of:
//!
//! - **Binary caching**: the interpreter is downloaded once and kept in a named on-disk cache
//! - **Lazy initialization**: one fetch and compile, shared by every concurrent caller
//! - **I/O virtualization**: output is captured and `gets` reads from the supplied input
//! - **Timeouts**: every run races a wall-clock timer and never hangs its caller
//! - **Error classification**: guest exceptions come back as data, never as host errors
//!
//! ## Example
//!
//! ```rust,ignore
//! use ruby_wasm_runner::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let runner = RuntimeInstance::new(RunnerConfig::default());
//!     runner.initialize().await?;
//!
//!     let result = runner
//!         .execute_code("name = gets.chomp\nputs \"Hi #{name}\"", Some("Ahmad"), None)
//!         .await?;
//!     assert_eq!(result.output.trim(), "Hi Ahmad");
//!     assert!(result.is_success());
//!
//!     let check = runner.check_syntax("x =");
//!     assert!(!check.valid);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Timeouts
//!
//! A timed-out run returns to its caller as soon as the timer fires. By
//! default the abandoned guest is also trapped at its next epoch check; with
//! [`RunnerConfig::interrupt_on_timeout`] disabled it keeps running on a
//! blocking thread until it finishes and its result is discarded.

pub mod error;
pub mod prelude;
pub mod runner;

// Re-export main types at crate root for convenience
pub use error::{Result, RunnerError};
pub use runner::cache::{BinarySource, CacheStore, DiskCache, MemoryCache, RuntimeBinaryCache};
pub use runner::classify::{classify, ErrorKind, GuestError};
pub use runner::config::{RunnerConfig, RunnerConfigBuilder, DEFAULT_BINARY_URL, DEFAULT_TIMEOUT};
pub use runner::fetch::{BinaryFetcher, HttpFetcher};
pub use runner::instance::{global_runner, preload_runtime, RuntimeInstance, RuntimeState};
pub use runner::loader::{RuntimeHandle, RuntimeLoader};
pub use runner::session::{ExecutionFailure, ExecutionRequest, ExecutionResult, ExecutionSession};
pub use runner::syntax::{SyntaxCheckResult, SyntaxDiagnostic};
