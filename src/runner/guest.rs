//! Guest-side preludes and the report protocol they speak.
//!
//! The user's source is passed as the last interpreter argument and never
//! spliced into Ruby code. A prelude runs it, catches whatever it raises and
//! ends the interpreter's real stderr with a single report line:
//!
//! ```text
//! \x1erbrun:ok
//! \x1erbrun:exit:<status>
//! \x1erbrun:<raise|syntax>:<class>:<ancestors>:<message>:<backtrace>
//! ```
//!
//! where every `raise`/`syntax` field is base64 and list fields are
//! newline-joined before encoding. Only the final line counts as a report;
//! anything the program itself wrote to stderr precedes it and is returned
//! as plain text.

use anyhow::{anyhow, bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::runner::classify::GuestError;

/// File name guest source is evaluated under; diagnostics refer to it.
pub const SOURCE_NAME: &str = "<code>";

/// Prefix of a report line on the diagnostics channel.
pub const REPORT_MARKER: &str = "\u{1e}rbrun:";

/// Runs the source with output redirected and always ends with a report.
/// `SystemExit` propagates so `exit n` keeps its status.
const EXECUTE_PRELUDE: &str = r#"$stdout.sync = true
$stderr = $stdout
$__rbrun_source = ARGV.shift.to_s
$__rbrun_report = lambda do |kind, e|
  fields = [
    e.class.name,
    e.class.ancestors.map(&:to_s).join("\n"),
    e.message,
    Array(e.backtrace).select { |l| l.start_with?("<code>:") }.first(5).join("\n"),
  ]
  STDERR.write("\x1erbrun:#{kind}:" + fields.map { |f| [f.to_s].pack("m0") }.join(":") + "\n")
end
$__rbrun_outcome = "ok"
begin
  eval($__rbrun_source, TOPLEVEL_BINDING, "<code>", 1)
rescue SystemExit => e
  $__rbrun_outcome = "exit:#{e.status}"
  raise
rescue Exception => e
  $__rbrun_outcome = nil
  $__rbrun_report.call("raise", e)
ensure
  $stdout.flush
  STDERR.write("\x1erbrun:#{$__rbrun_outcome}\n") if $__rbrun_outcome
end
"#;

/// Compiles the source without running it.
const SYNTAX_PRELUDE: &str = r#"source = ARGV.shift.to_s
begin
  RubyVM::InstructionSequence.compile(source, "<code>")
  STDERR.write("\x1erbrun:ok\n")
rescue SyntaxError => e
  fields = [e.class.name, e.class.ancestors.map(&:to_s).join("\n"), e.message, ""]
  STDERR.write("\x1erbrun:syntax:" + fields.map { |f| [f.to_s].pack("m0") }.join(":") + "\n")
end
"#;

/// A report decoded from the diagnostics channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestReport {
    /// The source compiled, or ran to completion.
    Accepted,
    /// The source called `exit` with this status.
    Exited(i32),
    /// The source raised while running.
    Raised(GuestError),
    /// The source failed to compile.
    Syntax(GuestError),
}

/// argv for running `source`.
pub fn execute_args(interpreter: &[String], source: &str) -> Vec<String> {
    with_prelude(interpreter, EXECUTE_PRELUDE, source)
}

/// argv for syntax-checking `source`.
pub fn syntax_args(interpreter: &[String], source: &str) -> Vec<String> {
    with_prelude(interpreter, SYNTAX_PRELUDE, source)
}

fn with_prelude(interpreter: &[String], prelude: &str, source: &str) -> Vec<String> {
    interpreter
        .iter()
        .cloned()
        .chain(["-e", prelude, "--", source].map(String::from))
        .collect()
}

/// Reject source that cannot travel as an argument.
pub fn check_source(source: &str) -> anyhow::Result<()> {
    if source.contains('\0') {
        bail!("source contains a NUL byte");
    }
    Ok(())
}

/// The interpreter's stderr, split into program text and the closing report.
#[derive(Debug)]
pub struct Diagnostics {
    /// What the program wrote to stderr, report excluded.
    pub text: String,
    /// The closing report; `None` when the last line is not one.
    pub report: Option<anyhow::Result<GuestReport>>,
}

/// Split raw stderr into program text and the report on its final line.
///
/// Marker lines anywhere else were written by the program and stay text.
pub fn split_diagnostics(raw: &str) -> Diagnostics {
    let body = raw.trim_end_matches(|c: char| c == '\n' || c == '\r');
    let start = body.rfind('\n').map_or(0, |i| i + 1);
    match body[start..].strip_prefix(REPORT_MARKER) {
        Some(report) => Diagnostics {
            text: raw[..start].to_string(),
            report: Some(parse_report(report)),
        },
        None => Diagnostics {
            text: raw.to_string(),
            report: None,
        },
    }
}

/// Decode the report closing `diagnostics`, if there is one.
pub fn find_report(diagnostics: &str) -> Option<anyhow::Result<GuestReport>> {
    split_diagnostics(diagnostics).report
}

fn parse_report(body: &str) -> anyhow::Result<GuestReport> {
    let mut parts = body.split(':');
    let kind = parts.next().unwrap_or_default();
    match kind {
        "ok" => return Ok(GuestReport::Accepted),
        "exit" => {
            let status = parts.next().unwrap_or_default();
            let code = status
                .parse::<i32>()
                .with_context(|| format!("bad exit status {:?}", status))?;
            return Ok(GuestReport::Exited(code));
        }
        _ => {}
    }

    let fields = parts
        .map(decode_field)
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(|| format!("malformed {:?} report", kind))?;
    let [class_name, ancestors, message, backtrace]: [String; 4] = fields
        .try_into()
        .map_err(|f: Vec<String>| anyhow!("expected 4 report fields, found {}", f.len()))?;

    let ancestors = split_list(&ancestors);
    let error = GuestError::new(class_name, &ancestors, message, split_list(&backtrace));
    match kind {
        "raise" => Ok(GuestReport::Raised(error)),
        "syntax" => Ok(GuestReport::Syntax(error)),
        other => bail!("unknown report kind {:?}", other),
    }
}

fn decode_field(field: &str) -> anyhow::Result<String> {
    let raw = STANDARD
        .decode(field)
        .context("report field is not base64")?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
