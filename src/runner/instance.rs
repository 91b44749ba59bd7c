//! The runtime lifecycle: lazy, once-only initialization and reset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use crate::runner::cache::{BinarySource, CacheStore, DiskCache, RuntimeBinaryCache};
use crate::runner::config::RunnerConfig;
use crate::runner::fetch::HttpFetcher;
use crate::runner::io::InputLines;
use crate::runner::loader::{RuntimeHandle, RuntimeLoader};
use crate::runner::session::{ExecutionRequest, ExecutionResult, ExecutionSession};
use crate::runner::syntax::{self, SyntaxCheckResult};

/// Observable lifecycle state of a [`RuntimeInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// No handle and nothing in flight.
    Uninitialized,
    /// A fetch and compile is in flight.
    Initializing,
    /// A handle is available.
    Ready,
}

type InitFuture = Shared<BoxFuture<'static, Result<Arc<RuntimeHandle>>>>;

enum Slot {
    Uninitialized,
    Initializing { generation: u64, future: InitFuture },
    Ready(Arc<RuntimeHandle>),
}

struct Inner {
    config: RunnerConfig,
    binaries: RuntimeBinaryCache,
    loader: RuntimeLoader,
    slot: Mutex<Slot>,
    generation: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch and compile the runtime.
    ///
    /// A cached binary that fails to load is evicted and downloaded once
    /// more, so a corrupt cache entry cannot fail every later attempt.
    async fn bootstrap(&self) -> Result<Arc<RuntimeHandle>> {
        let url = &self.config.binary_url;
        let (bytes, source) = self.binaries.fetch_with_source(url).await?;
        let handle = match self.loader.load(bytes).await {
            Ok(handle) => handle,
            Err(e) if source == BinarySource::Cache => {
                warn!(url = %url, error = %e, "cached runtime binary is unusable, downloading again");
                let bytes = self.binaries.refetch(url).await?;
                self.loader.load(bytes).await?
            }
            Err(e) => return Err(e),
        };
        Ok(Arc::new(handle))
    }
}

/// Owner of the single runtime handle.
///
/// Cloning is cheap and every clone shares the same handle and state.
#[derive(Clone)]
pub struct RuntimeInstance {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("state", &self.state())
            .field("binary_url", &self.inner.config.binary_url)
            .finish()
    }
}

impl RuntimeInstance {
    /// Create an instance that downloads over HTTP and caches on disk.
    ///
    /// If the disk cache cannot be opened the instance silently fetches
    /// without one.
    pub fn new(config: RunnerConfig) -> Self {
        let fetcher = Arc::new(HttpFetcher::new());
        let binaries = match DiskCache::from_config(&config) {
            Ok(Some(cache)) => {
                let store: Arc<dyn CacheStore> = Arc::new(cache);
                RuntimeBinaryCache::new(fetcher, store)
            }
            Ok(None) => RuntimeBinaryCache::uncached(fetcher),
            Err(e) => {
                warn!(error = %e, "binary cache unavailable, fetching without it");
                RuntimeBinaryCache::uncached(fetcher)
            }
        };
        let loader = RuntimeLoader::new(&config);
        Self::with_components(config, binaries, loader)
    }

    /// Create an instance from explicit components.
    pub fn with_components(
        config: RunnerConfig,
        binaries: RuntimeBinaryCache,
        loader: RuntimeLoader,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                binaries,
                loader,
                slot: Mutex::new(Slot::Uninitialized),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration this instance was built with.
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        match &*self.inner.slot() {
            Slot::Uninitialized => RuntimeState::Uninitialized,
            Slot::Initializing { .. } => RuntimeState::Initializing,
            Slot::Ready(_) => RuntimeState::Ready,
        }
    }

    /// Check if a runtime handle is available.
    pub fn ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    /// The runtime handle, if ready.
    pub fn handle(&self) -> Option<Arc<RuntimeHandle>> {
        match &*self.inner.slot() {
            Slot::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Fetch and compile the runtime unless that already happened.
    ///
    /// Concurrent callers share one in-flight initialization and all
    /// receive its outcome. On failure the instance returns to
    /// uninitialized so a later call retries.
    pub async fn initialize(&self) -> Result<()> {
        self.acquire().await.map(|_| ())
    }

    async fn acquire(&self) -> Result<Arc<RuntimeHandle>> {
        let future = {
            let mut slot = self.inner.slot();
            match &*slot {
                Slot::Ready(handle) => return Ok(Arc::clone(handle)),
                Slot::Initializing { future, .. } => future.clone(),
                Slot::Uninitialized => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.start(generation);
                    debug!(generation, "runtime initializing");
                    *slot = Slot::Initializing {
                        generation,
                        future: future.clone(),
                    };
                    future
                }
            }
        };
        future.await
    }

    /// Build the shared initialization future.
    ///
    /// The future records its own outcome, so the transition out of
    /// `Initializing` happens once no matter how many callers await it. A
    /// generation mismatch means a reset happened meanwhile and the outcome
    /// is not recorded.
    fn start(&self, generation: u64) -> InitFuture {
        let inner = Arc::clone(&self.inner);
        async move {
            let outcome = inner.bootstrap().await;
            {
                let mut slot = inner.slot();
                let current = matches!(
                    &*slot,
                    Slot::Initializing { generation: g, .. } if *g == generation
                );
                if current {
                    *slot = match &outcome {
                        Ok(handle) => Slot::Ready(Arc::clone(handle)),
                        Err(_) => Slot::Uninitialized,
                    };
                }
            }
            match &outcome {
                Ok(_) => debug!(generation, "runtime ready"),
                Err(e) => warn!(generation, error = %e, "runtime initialization failed"),
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Run `source` with optional newline-delimited `input`.
    ///
    /// Initializes the runtime first if needed; only that initialization can
    /// fail. Guest errors, timeouts and evaluation failures are reported in
    /// the returned [`ExecutionResult`]. `timeout` defaults to the configured
    /// default and must not be zero.
    pub async fn execute_code(
        &self,
        source: &str,
        input: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let timeout = timeout.unwrap_or(self.inner.config.default_timeout);
        if timeout.is_zero() {
            return Err(RunnerError::Config(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let handle = self.acquire().await?;
        let request = ExecutionRequest::new(source)
            .input(input.map(InputLines::from_text).unwrap_or_default())
            .timeout(timeout);

        let session = ExecutionSession::new(handle)
            .interrupt_on_timeout(self.inner.config.interrupt_on_timeout);
        Ok(session.run(request).await)
    }

    /// Check `source` for syntax errors.
    ///
    /// Never initializes the runtime: before it is ready every source is
    /// reported valid.
    pub fn check_syntax(&self, source: &str) -> SyntaxCheckResult {
        let handle = self.handle();
        syntax::check_syntax(handle.as_deref(), source)
    }

    /// Drop the current handle and initialize a fresh one.
    pub async fn reset(&self) -> Result<()> {
        {
            let mut slot = self.inner.slot();
            *slot = Slot::Uninitialized;
        }
        debug!("runtime reset");
        self.initialize().await
    }

    /// Start initializing in the background.
    ///
    /// Errors are swallowed; the next real call retries and reports them.
    /// Does nothing outside a tokio runtime or once initialization started.
    pub fn preload(&self) {
        if self.state() != RuntimeState::Uninitialized {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime, skipping preload");
            return;
        };
        let this = self.clone();
        runtime.spawn(async move {
            if let Err(e) = this.initialize().await {
                debug!(error = %e, "preload failed, will retry on first use");
            }
        });
    }
}

static GLOBAL_RUNNER: LazyLock<RuntimeInstance> =
    LazyLock::new(|| RuntimeInstance::new(RunnerConfig::from_env()));

/// The process-wide runner, configured from the environment on first use.
pub fn global_runner() -> &'static RuntimeInstance {
    &GLOBAL_RUNNER
}

/// Warm up the process-wide runner without waiting for it.
pub fn preload_runtime() {
    global_runner().preload();
}
