//! Runner configuration with builder pattern.

use std::path::PathBuf;
use std::time::Duration;

/// Download location of the interpreter, pinned to a ruby.wasm release.
pub const DEFAULT_BINARY_URL: &str =
    "https://cdn.jsdelivr.net/npm/@ruby/3.4-wasm-wasi@2.7.1/dist/ruby+stdlib.wasm";

/// Name of the durable cache holding the interpreter binary.
pub const DEFAULT_CACHE_NAME: &str = "ruby-wasm-runner-cache-v1";

/// Timeout applied when a call does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const ENV_BINARY_URL: &str = "RUBY_WASM_RUNNER_BINARY_URL";
const ENV_CACHE_DIR: &str = "RUBY_WASM_RUNNER_CACHE_DIR";
const ENV_NO_CACHE: &str = "RUBY_WASM_RUNNER_NO_CACHE";
const ENV_TIMEOUT_MS: &str = "RUBY_WASM_RUNNER_TIMEOUT_MS";

/// Configuration for the Ruby runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// URL of the interpreter's compiled module.
    pub binary_url: String,
    /// Name of the cache the binary is persisted in.
    pub cache_name: String,
    /// Root directory for named caches. `None` uses the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Whether the binary is persisted at all.
    pub cache_enabled: bool,
    /// Timeout used when a call does not specify one.
    pub default_timeout: Duration,
    /// Capacity of each captured stream, in bytes. A run that fills one
    /// fails with an output-limit error instead of returning truncated text.
    pub max_output_bytes: usize,
    /// Trap the guest when its caller has already timed out.
    pub interrupt_on_timeout: bool,
    /// argv prefix passed to the interpreter before the prelude.
    pub interpreter_args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary_url: DEFAULT_BINARY_URL.to_string(),
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            cache_dir: None,
            cache_enabled: true,
            default_timeout: DEFAULT_TIMEOUT,
            max_output_bytes: 1024 * 1024, // 1MB
            interrupt_on_timeout: true,
            interpreter_args: vec![
                "ruby".to_string(),
                "--disable-gems".to_string(),
                "-EUTF-8".to_string(),
            ],
        }
    }
}

impl RunnerConfig {
    /// Create a new builder for RunnerConfig.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Defaults overlaid with `RUBY_WASM_RUNNER_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut builder = Self::builder();
        if let Some(url) = lookup(ENV_BINARY_URL).filter(|v| !v.trim().is_empty()) {
            builder = builder.binary_url(url.trim());
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            builder = builder.cache_dir(dir.trim());
        }
        if let Some(flag) = lookup(ENV_NO_CACHE) {
            let flag = flag.trim();
            if flag == "1" || flag.eq_ignore_ascii_case("true") {
                builder = builder.cache_enabled(false);
            }
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS).and_then(|v| v.trim().parse::<u64>().ok()) {
            if ms > 0 {
                builder = builder.default_timeout(Duration::from_millis(ms));
            }
        }
        builder.build()
    }
}

/// Builder for creating RunnerConfig instances.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfigBuilder {
    binary_url: Option<String>,
    cache_name: Option<String>,
    cache_dir: Option<PathBuf>,
    cache_enabled: Option<bool>,
    default_timeout: Option<Duration>,
    max_output_bytes: Option<usize>,
    interrupt_on_timeout: Option<bool>,
    interpreter_args: Option<Vec<String>>,
}

impl RunnerConfigBuilder {
    /// Set the URL the interpreter binary is downloaded from.
    pub fn binary_url(mut self, url: impl Into<String>) -> Self {
        self.binary_url = Some(url.into());
        self
    }

    /// Set the name of the binary cache.
    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = Some(name.into());
        self
    }

    /// Set the root directory for named caches.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Enable or disable the durable binary cache.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Set the timeout used when a call does not pass one.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the per-stream output capacity in bytes.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Interrupt abandoned evaluations instead of letting them run to completion.
    pub fn interrupt_on_timeout(mut self, interrupt: bool) -> Self {
        self.interrupt_on_timeout = Some(interrupt);
        self
    }

    /// Set the interpreter argv prefix.
    pub fn interpreter_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Build the RunnerConfig.
    pub fn build(self) -> RunnerConfig {
        let default = RunnerConfig::default();
        RunnerConfig {
            binary_url: self.binary_url.unwrap_or(default.binary_url),
            cache_name: self.cache_name.unwrap_or(default.cache_name),
            cache_dir: self.cache_dir.or(default.cache_dir),
            cache_enabled: self.cache_enabled.unwrap_or(default.cache_enabled),
            default_timeout: self.default_timeout.unwrap_or(default.default_timeout),
            max_output_bytes: self.max_output_bytes.unwrap_or(default.max_output_bytes),
            interrupt_on_timeout: self
                .interrupt_on_timeout
                .unwrap_or(default.interrupt_on_timeout),
            interpreter_args: self.interpreter_args.unwrap_or(default.interpreter_args),
        }
    }
}
