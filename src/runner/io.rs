//! Request-scoped I/O bridge between the host and a guest evaluation.

use bytes::Bytes;
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::WasiCtxBuilder;

/// Simulated interactive input, one entry per line the guest may read.
///
/// The guest consumes the lines in order through its stdin; once they are
/// exhausted its reads return end-of-input (`gets` yields `nil`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputLines {
    lines: Vec<String>,
}

impl InputLines {
    /// Create input from explicit lines.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Split newline-delimited text into lines.
    ///
    /// A trailing newline does not add an empty final line, and `\r\n`
    /// endings are accepted. Empty text means no input.
    pub fn from_text(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }
        let body = text.strip_suffix('\n').unwrap_or(text);
        Self::new(
            body.split('\n')
                .map(|line| line.strip_suffix('\r').unwrap_or(line)),
        )
    }

    /// The lines, in read order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if there is no input at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The bytes the guest reads from stdin: every line newline-terminated.
    pub fn to_stdin_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
        }
        data
    }
}

/// The I/O wiring for one evaluation.
///
/// Guest stdout and stderr share one output pipe (the prelude also points
/// `$stderr` at `$stdout`), and the interpreter's own stderr descriptor is
/// kept separate as the diagnostics channel for structured reports.
#[derive(Clone)]
pub struct IoBridge {
    stdin: MemoryInputPipe,
    output: MemoryOutputPipe,
    diagnostics: MemoryOutputPipe,
    capacity: usize,
}

impl IoBridge {
    /// Create a bridge feeding `input` and capturing at most `capacity` bytes per stream.
    pub fn new(input: &InputLines, capacity: usize) -> Self {
        Self {
            stdin: MemoryInputPipe::new(Bytes::from(input.to_stdin_bytes())),
            output: MemoryOutputPipe::new(capacity),
            diagnostics: MemoryOutputPipe::new(capacity),
            capacity,
        }
    }

    /// Capacity of each captured stream, in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if either captured stream filled up.
    ///
    /// A full pipe refuses further writes, so anything the guest printed
    /// past this point was lost.
    pub fn overflowed(&self) -> bool {
        self.output.contents().len() >= self.capacity
            || self.diagnostics.contents().len() >= self.capacity
    }

    /// Build the WASI context for an evaluation with the given argv.
    ///
    /// Nothing is inherited from the host: no stdio, environment or
    /// preopened directories.
    pub fn wasi_ctx(&self, args: &[String]) -> WasiP1Ctx {
        let mut builder = WasiCtxBuilder::new();
        builder
            .args(args)
            .stdin(self.stdin.clone())
            .stdout(self.output.clone())
            .stderr(self.diagnostics.clone());
        builder.build_p1()
    }

    /// Everything the guest wrote to its output streams.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.contents()).into_owned()
    }

    /// Everything the interpreter wrote to its diagnostics channel.
    pub fn diagnostics(&self) -> String {
        String::from_utf8_lossy(&self.diagnostics.contents()).into_owned()
    }
}
