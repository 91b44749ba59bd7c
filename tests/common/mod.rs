//! Shared helpers: a fake binary source and tiny WASI guests written in WAT.
//!
//! The guests ignore their arguments and just replay what a real interpreter
//! would write for a given scenario, so the whole stack can be exercised
//! without downloading Ruby.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use ruby_wasm_runner::runner::guest::REPORT_MARKER;
use ruby_wasm_runner::{
    BinaryFetcher, CacheStore, RunnerConfig, RunnerError, RuntimeBinaryCache, RuntimeInstance,
    RuntimeLoader,
};

/// Serves a fixed module and counts how often it was asked to.
pub struct FakeFetcher {
    module: Bytes,
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
}

impl FakeFetcher {
    pub fn new(module: impl Into<String>) -> Arc<Self> {
        Self::with_delay(module, Duration::ZERO)
    }

    pub fn with_delay(module: impl Into<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            module: Bytes::from(module.into()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BinaryFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> ruby_wasm_runner::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RunnerError::fetch(url, "HTTP 503 Service Unavailable"));
        }
        Ok(self.module.clone())
    }
}

/// An uncached instance whose binary comes from `fetcher`.
pub fn instance_with(fetcher: Arc<FakeFetcher>, config: RunnerConfig) -> RuntimeInstance {
    let binaries = RuntimeBinaryCache::uncached(fetcher);
    let loader = RuntimeLoader::new(&config);
    RuntimeInstance::with_components(config, binaries, loader)
}

/// An instance whose binary is looked up in `store` before `fetcher`.
pub fn cached_instance(
    fetcher: Arc<FakeFetcher>,
    store: Arc<dyn CacheStore>,
    config: RunnerConfig,
) -> RuntimeInstance {
    let binaries = RuntimeBinaryCache::new(fetcher, store);
    let loader = RuntimeLoader::new(&config);
    RuntimeInstance::with_components(config, binaries, loader)
}

pub fn instance(fetcher: Arc<FakeFetcher>) -> RuntimeInstance {
    instance_with(fetcher, RunnerConfig::builder().cache_enabled(false).build())
}

/// A guest that writes each `(fd, text)` pair in order and returns.
pub fn writing_guest(writes: &[(u32, &str)]) -> String {
    let mut data = String::new();
    let mut body = String::new();
    let mut offset = 1024usize;
    for (fd, text) in writes {
        let escaped: String = text.bytes().map(|b| format!("\\{:02x}", b)).collect();
        data.push_str(&format!("(data (i32.const {}) \"{}\")\n", offset, escaped));
        body.push_str(&format!(
            "(i32.store (i32.const 0) (i32.const {}))\n\
             (i32.store (i32.const 4) (i32.const {}))\n\
             (drop (call $fd_write (i32.const {}) (i32.const 0) (i32.const 1) (i32.const 8)))\n",
            offset,
            text.len(),
            fd
        ));
        offset += text.len() + 16;
    }
    format!(
        r#"(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  {}
  (func (export "_start")
    {}))"#,
        data, body
    )
}

/// A guest that prints "hi".
pub fn hello_guest() -> String {
    writing_guest(&[(1, "hi\n")])
}

/// A guest that copies stdin to stdout, then prints "EOF" once reads return nothing.
pub const ECHO_GUEST: &str = r#"(module
  (import "wasi_snapshot_preview1" "fd_read" (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 32) "EOF\n")
  (func (export "_start")
    (block $done
      (loop $next
        (i32.store (i32.const 0) (i32.const 1024))
        (i32.store (i32.const 4) (i32.const 4096))
        (i32.store (i32.const 8) (i32.const 0))
        (br_if $done (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
        (br_if $done (i32.eqz (i32.load (i32.const 8))))
        (i32.store (i32.const 16) (i32.const 1024))
        (i32.store (i32.const 20) (i32.load (i32.const 8)))
        (drop (call $fd_write (i32.const 1) (i32.const 16) (i32.const 1) (i32.const 24)))
        (br $next)))
    (i32.store (i32.const 16) (i32.const 32))
    (i32.store (i32.const 20) (i32.const 4))
    (drop (call $fd_write (i32.const 1) (i32.const 16) (i32.const 1) (i32.const 24)))))"#;

/// A guest that never returns.
pub const SPIN_GUEST: &str = r#"(module
  (memory (export "memory") 1)
  (func (export "_start")
    (loop $forever (br $forever))))"#;

/// A guest that sleeps for a second, then prints "late".
pub const SLEEPY_GUEST: &str = r#"(module
  (import "wasi_snapshot_preview1" "poll_oneoff" (func $poll_oneoff (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 512) "late\n")
  (func (export "_start")
    ;; one relative monotonic clock subscription at 0
    (i32.store8 (i32.const 8) (i32.const 0))
    (i32.store (i32.const 16) (i32.const 1))
    (i64.store (i32.const 24) (i64.const 1000000000))
    (i64.store (i32.const 32) (i64.const 0))
    (i32.store16 (i32.const 40) (i32.const 0))
    (drop (call $poll_oneoff (i32.const 0) (i32.const 64) (i32.const 1) (i32.const 128)))
    (i32.store (i32.const 256) (i32.const 512))
    (i32.store (i32.const 260) (i32.const 5))
    (drop (call $fd_write (i32.const 1) (i32.const 256) (i32.const 1) (i32.const 264)))))"#;

/// A guest that exits with status 3 without writing anything.
pub const EXIT_GUEST: &str = r#"(module
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (func (export "_start") (call $proc_exit (i32.const 3))))"#;

/// A report line as the Ruby preludes write it.
pub fn report(kind: &str, class: &str, ancestors: &[&str], message: &str) -> String {
    let fields = [class.to_string(), ancestors.join("\n"), message.to_string(), String::new()];
    let encoded: Vec<String> = fields.iter().map(|f| STANDARD.encode(f)).collect();
    format!("{}{}:{}\n", REPORT_MARKER, kind, encoded.join(":"))
}

/// A guest that prints `before`, then reports a `ZeroDivisionError`.
pub fn zero_division_guest() -> String {
    let line = report(
        "raise",
        "ZeroDivisionError",
        &["ZeroDivisionError", "ArithmeticError", "StandardError", "Exception", "Object"],
        "divided by 0",
    );
    writing_guest(&[(1, "before\n"), (2, &line)])
}
