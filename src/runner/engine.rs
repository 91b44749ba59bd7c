//! Wasmtime engine shared by a runtime handle and its evaluations.

use std::sync::Arc;

use wasmtime::Engine;

use crate::error::{Result, RunnerError};

/// A shared engine that can be reused across evaluations.
///
/// Wraps an `Arc<Engine>` for thread-safe sharing. Epoch interruption is
/// always enabled so a timed-out evaluation can be trapped.
#[derive(Clone)]
pub struct SharedEngine {
    engine: Arc<Engine>,
}

impl std::fmt::Debug for SharedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine")
            .field("engine", &"<wasmtime::Engine>")
            .finish()
    }
}

impl SharedEngine {
    /// Create a new shared engine with the default configuration.
    pub fn new() -> Result<Self> {
        let engine = Engine::new(&Self::default_config())
            .map_err(|e| RunnerError::RuntimeInit(format!("failed to create engine: {}", e)))?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Get a reference to the underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get the Arc<Engine> for sharing.
    pub fn arc(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    fn default_config() -> wasmtime::Config {
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        config
    }
}

impl std::ops::Deref for SharedEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}
