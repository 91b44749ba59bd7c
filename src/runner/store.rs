//! Per-evaluation store state and interruption.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wasmtime::{Engine, Store, UpdateDeadline};
use wasmtime_wasi::preview1::WasiP1Ctx;

/// Cancellation flag shared between a session and its evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a flag that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the evaluation stop at its next epoch check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Trap raised inside the guest once its evaluation has been cancelled.
#[derive(Debug, thiserror::Error)]
#[error("guest evaluation interrupted")]
pub struct Interrupted;

/// Store data for one evaluation.
pub struct SessionState {
    /// WASI Preview 1 context wired to the evaluation's I/O bridge.
    pub wasi: WasiP1Ctx,
    cancel: CancelFlag,
}

impl SessionState {
    /// Create store data from a WASI context and a cancel flag.
    pub fn new(wasi: WasiP1Ctx, cancel: CancelFlag) -> Self {
        Self { wasi, cancel }
    }

    /// The evaluation's cancel flag.
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }
}

/// Create a store whose guest traps at the first epoch tick after cancellation.
///
/// Epochs are shared by every store on the engine, so a tick caused by
/// another evaluation's cancellation just extends this store's deadline.
pub fn new_store(engine: &Engine, state: SessionState) -> Store<SessionState> {
    let mut store = Store::new(engine, state);
    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(|ctx| {
        if ctx.data().cancel.is_cancelled() {
            Err(Interrupted.into())
        } else {
            Ok(UpdateDeadline::Continue(1))
        }
    });
    store
}
