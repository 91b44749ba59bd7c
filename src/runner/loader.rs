//! Turning interpreter bytes into an evaluable runtime handle.

use std::time::Instant;

use anyhow::Context;
use bytes::Bytes;
use tracing::info;
use wasmtime::{ExternType, InstancePre, Linker, Module};
use wasmtime_wasi::preview1;
use wasmtime_wasi::I32Exit;

use crate::error::{Result, RunnerError};
use crate::runner::config::RunnerConfig;
use crate::runner::engine::SharedEngine;
use crate::runner::io::IoBridge;
use crate::runner::store::{new_store, CancelFlag, Interrupted, SessionState};

/// How a guest evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestExit {
    /// The interpreter returned or called `proc_exit` with this status.
    Exited(i32),
    /// The evaluation was trapped after being cancelled.
    Interrupted,
}

/// The compiled interpreter, ready to be instantiated per evaluation.
///
/// Compilation and linking happen once; every evaluation gets its own store
/// and WASI context, so guest state never carries over between calls.
pub struct RuntimeHandle {
    engine: SharedEngine,
    pre: InstancePre<SessionState>,
    interpreter_args: Vec<String>,
    max_output_bytes: usize,
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("engine", &self.engine)
            .field("interpreter_args", &self.interpreter_args)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}

impl RuntimeHandle {
    /// The engine evaluations run on.
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// argv prefix placed before the prelude.
    pub fn interpreter_args(&self) -> &[String] {
        &self.interpreter_args
    }

    /// Capacity of each captured stream.
    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Run the interpreter once with `args`, wired to `io`.
    ///
    /// Blocks the calling thread. `Err` means the host could not run the
    /// guest at all or the guest trapped; guest-level failures are left in
    /// `io` for the caller to decode.
    pub fn evaluate(
        &self,
        args: &[String],
        io: &IoBridge,
        cancel: &CancelFlag,
    ) -> anyhow::Result<GuestExit> {
        let state = SessionState::new(io.wasi_ctx(args), cancel.clone());
        let mut store = new_store(self.engine.engine(), state);
        if cancel.is_cancelled() {
            return Ok(GuestExit::Interrupted);
        }

        let instance = self
            .pre
            .instantiate(&mut store)
            .context("failed to instantiate runtime")?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .context("failed to get _start function")?;

        match start.call(&mut store, ()) {
            Ok(()) => Ok(GuestExit::Exited(0)),
            Err(e) => {
                if let Some(exit) = e.downcast_ref::<I32Exit>() {
                    return Ok(GuestExit::Exited(exit.0));
                }
                if e.downcast_ref::<Interrupted>().is_some()
                    || store.data().cancel_flag().is_cancelled()
                {
                    return Ok(GuestExit::Interrupted);
                }
                Err(e.context("runtime trapped"))
            }
        }
    }
}

/// Compiles interpreter binaries into runtime handles.
#[derive(Debug, Clone)]
pub struct RuntimeLoader {
    interpreter_args: Vec<String>,
    max_output_bytes: usize,
}

impl RuntimeLoader {
    /// Create a loader whose handles use the guest options from `config`.
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            interpreter_args: config.interpreter_args.clone(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Compile `bytes` and prepare a handle.
    ///
    /// Each load gets a fresh engine. Compilation runs on the blocking pool
    /// because wasmtime compiles from a complete buffer, not a stream.
    pub async fn load(&self, bytes: Bytes) -> Result<RuntimeHandle> {
        let engine = SharedEngine::new()?;
        let compile_engine = engine.clone();
        let started = Instant::now();
        let len = bytes.len();

        let module = tokio::task::spawn_blocking(move || Module::new(compile_engine.engine(), &bytes))
            .await
            .map_err(|e| RunnerError::Compile(format!("compile task failed: {}", e)))?
            .map_err(|e| RunnerError::Compile(format!("{:#}", e)))?;

        match module.get_export("_start") {
            Some(ExternType::Func(_)) => {}
            _ => {
                return Err(RunnerError::Compile(
                    "module is not a WASI command: missing _start export".to_string(),
                ))
            }
        }

        let mut linker = Linker::new(engine.engine());
        preview1::add_to_linker_sync(&mut linker, |state: &mut SessionState| &mut state.wasi)
            .map_err(|e| RunnerError::RuntimeInit(format!("failed to link WASI: {}", e)))?;
        let pre = linker
            .instantiate_pre(&module)
            .map_err(|e| RunnerError::RuntimeInit(format!("failed to prepare instance: {:#}", e)))?;

        info!(len, elapsed = ?started.elapsed(), "runtime compiled");

        Ok(RuntimeHandle {
            engine,
            pre,
            interpreter_args: self.interpreter_args.clone(),
            max_output_bytes: self.max_output_bytes,
        })
    }
}
