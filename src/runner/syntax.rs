//! Syntax checking without execution.

use std::sync::LazyLock;

use anyhow::{bail, Context};
use regex::Regex;
use tracing::debug;

use crate::runner::guest::{self, GuestReport};
use crate::runner::io::{InputLines, IoBridge};
use crate::runner::loader::{GuestExit, RuntimeHandle};
use crate::runner::store::CancelFlag;

static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<code>:(\d+):(?:(\d+):)?\s*").expect("location pattern is valid")
});

/// Where and why the source failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxDiagnostic {
    /// Diagnostic text without the location prefix.
    pub message: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column; 1 when the interpreter does not report one.
    pub column: u32,
}

/// Outcome of a syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxCheckResult {
    /// Whether the source parsed (or the check could not be made).
    pub valid: bool,
    /// Diagnostic for invalid source.
    pub error: Option<SyntaxDiagnostic>,
}

impl SyntaxCheckResult {
    /// Source that parsed, or a check that failed open.
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    /// Source that failed to parse.
    pub fn invalid(diagnostic: SyntaxDiagnostic) -> Self {
        Self {
            valid: false,
            error: Some(diagnostic),
        }
    }
}

/// Check `source` for syntax errors without running it.
///
/// Fails open: without a handle, or when the check itself breaks, the source
/// is reported valid so callers never show an error the interpreter did not
/// produce. Blocks until the interpreter has compiled the source; the work
/// happens on a scoped thread so this is safe to call from async code.
pub fn check_syntax(handle: Option<&RuntimeHandle>, source: &str) -> SyntaxCheckResult {
    let Some(handle) = handle else {
        return SyntaxCheckResult::valid();
    };
    if source.trim().is_empty() {
        return SyntaxCheckResult::valid();
    }

    let outcome = std::thread::scope(|scope| scope.spawn(|| run_check(handle, source)).join());
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            let reason = format!("{:#}", e);
            debug!(error = %reason, "syntax check failed, assuming valid");
            SyntaxCheckResult::valid()
        }
        Err(_) => {
            debug!("syntax check panicked, assuming valid");
            SyntaxCheckResult::valid()
        }
    }
}

fn run_check(handle: &RuntimeHandle, source: &str) -> anyhow::Result<SyntaxCheckResult> {
    guest::check_source(source)?;

    let io = IoBridge::new(&InputLines::default(), handle.max_output_bytes());
    let args = guest::syntax_args(handle.interpreter_args(), source);
    if let GuestExit::Interrupted = handle.evaluate(&args, &io, &CancelFlag::new())? {
        bail!("syntax check interrupted");
    }

    let report = guest::find_report(&io.diagnostics()).context("interpreter wrote no syntax report")??;
    match report {
        GuestReport::Accepted => Ok(SyntaxCheckResult::valid()),
        GuestReport::Syntax(err) => Ok(SyntaxCheckResult::invalid(parse_diagnostic(&err.message))),
        GuestReport::Raised(err) => bail!("syntax check raised {}", err.class_name),
        GuestReport::Exited(code) => bail!("syntax check exited with status {}", code),
    }
}

/// Extract the location from an interpreter syntax error message.
///
/// Without a recognizable `<code>:LINE:` prefix the error is placed at
/// line 1, column 1 with the message unchanged.
pub fn parse_diagnostic(message: &str) -> SyntaxDiagnostic {
    let Some(caps) = LOCATION.captures(message) else {
        return SyntaxDiagnostic {
            message: message.trim().to_string(),
            line: 1,
            column: 1,
        };
    };

    let number = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1)
    };
    let line = number(1);
    let column = number(2);

    let mut cleaned = String::with_capacity(message.len());
    if let Some(whole) = caps.get(0) {
        cleaned.push_str(&message[..whole.start()]);
        cleaned.push_str(&message[whole.end()..]);
    }
    let cleaned = cleaned.trim();

    SyntaxDiagnostic {
        message: if cleaned.is_empty() {
            message.trim().to_string()
        } else {
            cleaned.to_string()
        },
        line,
        column,
    }
}
