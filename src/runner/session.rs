//! Running one guest program against the shared runtime handle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::runner::classify::GuestError;
use crate::runner::config::DEFAULT_TIMEOUT;
use crate::runner::guest::{self, GuestReport};
use crate::runner::io::{InputLines, IoBridge};
use crate::runner::loader::{GuestExit, RuntimeHandle};
use crate::runner::store::CancelFlag;

/// One request to run guest source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Guest source text.
    pub source: String,
    /// Simulated input lines.
    pub input: InputLines,
    /// Wall-clock limit.
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Create a request with no input and the default timeout.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            input: InputLines::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the simulated input lines.
    pub fn input(mut self, input: InputLines) -> Self {
        self.input = input;
        self
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Why an execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The guest program raised an exception.
    Guest(GuestError),
    /// The timer won the race.
    TimedOut(Duration),
    /// The guest exited with a non-zero status without raising.
    Exited(i32),
    /// The guest printed more than the captured streams hold.
    OutputLimitExceeded(usize),
    /// The host could not evaluate the program.
    Host(String),
}

impl ExecutionFailure {
    /// The message shown to the learner.
    pub fn message(&self) -> String {
        match self {
            ExecutionFailure::Guest(err) => err.describe(),
            ExecutionFailure::TimedOut(timeout) => format!(
                "Execution timed out after {}. Your code may have an infinite loop.",
                describe_duration(*timeout)
            ),
            ExecutionFailure::Exited(code) => format!("Program exited with status {}", code),
            ExecutionFailure::OutputLimitExceeded(limit) => format!(
                "Output limit exceeded: the program printed more than {} bytes.",
                limit
            ),
            ExecutionFailure::Host(reason) => format!("Internal Error: {}", reason),
        }
    }
}

/// Result of running a guest program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Everything the program printed, including output written before a failure.
    pub output: String,
    /// Classified error message, if the run did not succeed.
    pub error: Option<String>,
    /// Structured failure behind `error`.
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionResult {
    /// A successful run.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
            failure: None,
        }
    }

    /// A failed run with whatever output was produced first.
    pub fn failed(output: impl Into<String>, failure: ExecutionFailure) -> Self {
        Self {
            output: output.into(),
            error: Some(failure.message()),
            failure: Some(failure),
        }
    }

    /// A run abandoned after `timeout`. Output is discarded.
    pub fn timed_out(timeout: Duration) -> Self {
        Self::failed(String::new(), ExecutionFailure::TimedOut(timeout))
    }

    /// Check if the program ran to completion without error.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Check if the run timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, Some(ExecutionFailure::TimedOut(_)))
    }

    /// The guest exception, if the program raised one.
    pub fn guest_error(&self) -> Option<&GuestError> {
        match &self.failure {
            Some(ExecutionFailure::Guest(err)) => Some(err),
            _ => None,
        }
    }
}

/// Runs requests against a runtime handle.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    handle: Arc<RuntimeHandle>,
    interrupt_on_timeout: bool,
}

impl ExecutionSession {
    /// Create a session on `handle`. Timed-out evaluations are interrupted by default.
    pub fn new(handle: Arc<RuntimeHandle>) -> Self {
        Self {
            handle,
            interrupt_on_timeout: true,
        }
    }

    /// Choose whether an abandoned evaluation is trapped or left to finish.
    pub fn interrupt_on_timeout(mut self, interrupt: bool) -> Self {
        self.interrupt_on_timeout = interrupt;
        self
    }

    /// Run `request`, racing it against its timeout.
    ///
    /// Never fails: guest errors, timeouts and host failures all come back
    /// as an [`ExecutionResult`]. When the timer wins the evaluation is
    /// detached and whatever it eventually produces is dropped. Unless
    /// interruption is enabled it keeps a blocking thread busy until the
    /// guest finishes on its own.
    pub async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        if request.source.trim().is_empty() {
            return ExecutionResult::success(String::new());
        }

        let timeout = request.timeout;
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let handle = Arc::clone(&self.handle);
        let evaluation =
            tokio::task::spawn_blocking(move || evaluate(&handle, &request, &worker_cancel));

        tokio::select! {
            joined = evaluation => match joined {
                Ok(result) => result,
                Err(e) => ExecutionResult::failed(
                    String::new(),
                    ExecutionFailure::Host(format!("evaluation task failed: {}", e)),
                ),
            },
            _ = tokio::time::sleep(timeout) => {
                warn!(?timeout, interrupt = self.interrupt_on_timeout, "guest evaluation timed out");
                if self.interrupt_on_timeout {
                    cancel.cancel();
                    self.handle.engine().increment_epoch(); // Force interrupt
                }
                ExecutionResult::timed_out(timeout)
            }
        }
    }
}

/// Synchronous evaluation (runs in blocking task).
fn evaluate(handle: &RuntimeHandle, request: &ExecutionRequest, cancel: &CancelFlag) -> ExecutionResult {
    if let Err(e) = guest::check_source(&request.source) {
        return ExecutionResult::failed(String::new(), ExecutionFailure::Host(e.to_string()));
    }

    let io = IoBridge::new(&request.input, handle.max_output_bytes());
    let args = guest::execute_args(handle.interpreter_args(), &request.source);
    let exit = handle.evaluate(&args, &io, cancel);

    // Program stderr follows its stdout; the closing report is not output.
    let diagnostics = guest::split_diagnostics(&io.diagnostics());
    let mut output = io.output();
    output.push_str(&diagnostics.text);

    let code = match exit {
        Ok(GuestExit::Interrupted) => return ExecutionResult::timed_out(request.timeout),
        _ if io.overflowed() => {
            return ExecutionResult::failed(
                output,
                ExecutionFailure::OutputLimitExceeded(io.capacity()),
            )
        }
        Ok(GuestExit::Exited(code)) => code,
        Err(e) => return ExecutionResult::failed(output, ExecutionFailure::Host(format!("{:#}", e))),
    };

    match diagnostics.report {
        Some(Ok(GuestReport::Raised(err))) => {
            debug!(class = %err.class_name, kind = ?err.kind, "guest raised");
            ExecutionResult::failed(output, ExecutionFailure::Guest(err))
        }
        Some(Ok(GuestReport::Accepted)) | Some(Ok(GuestReport::Exited(0))) => {
            ExecutionResult::success(output)
        }
        Some(Ok(GuestReport::Exited(status))) => {
            ExecutionResult::failed(output, ExecutionFailure::Exited(status))
        }
        Some(Ok(report)) => ExecutionResult::failed(
            output,
            ExecutionFailure::Host(format!("unexpected guest report: {:?}", report)),
        ),
        Some(Err(e)) => ExecutionResult::failed(
            output,
            ExecutionFailure::Host(format!("unreadable guest error report: {:#}", e)),
        ),
        None if code == 0 => ExecutionResult::success(output),
        None if diagnostics.text.trim().is_empty() => {
            ExecutionResult::failed(output, ExecutionFailure::Exited(code))
        }
        None => ExecutionResult::failed(
            output,
            ExecutionFailure::Host(format!(
                "interpreter exited with status {}: {}",
                code,
                diagnostics.text.trim()
            )),
        ),
    }
}

fn describe_duration(timeout: Duration) -> String {
    let millis = timeout.as_millis();
    match millis {
        1000 => "1 second".to_string(),
        m if m % 1000 == 0 => format!("{} seconds", m / 1000),
        m => format!("{} ms", m),
    }
}
