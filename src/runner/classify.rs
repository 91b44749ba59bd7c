//! Classification of errors raised by guest programs.
//!
//! The guest prelude reports the raised exception's class name together with
//! its ancestor chain, so classification works on class names rather than on
//! the wording of the message.

use std::fmt;

/// Category of a guest exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `SyntaxError`
    Syntax,
    /// `NameError`
    Name,
    /// `TypeError`
    Type,
    /// `NoMethodError`
    NoMethod,
    /// `ArgumentError`
    Argument,
    /// `ZeroDivisionError`
    ZeroDivision,
    /// `RuntimeError`
    Runtime,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Map an exception class name to its category, if it names one.
    ///
    /// Only exact class names match; `KeyError` is not a `NameError`.
    pub fn from_class_name(name: &str) -> Option<Self> {
        let kind = match name {
            "SyntaxError" => ErrorKind::Syntax,
            "NameError" => ErrorKind::Name,
            "TypeError" => ErrorKind::Type,
            "NoMethodError" => ErrorKind::NoMethod,
            "ArgumentError" => ErrorKind::Argument,
            "ZeroDivisionError" => ErrorKind::ZeroDivision,
            "RuntimeError" => ErrorKind::Runtime,
            _ => return None,
        };
        Some(kind)
    }

    /// Resolve the category from an ancestor chain (most specific first).
    ///
    /// `NoMethodError` comes before `NameError` in its own chain, so the
    /// closest known ancestor wins.
    pub fn from_ancestors<'a, I>(ancestors: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        ancestors
            .into_iter()
            .find_map(Self::from_class_name)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// The class name this category is named after.
    pub fn class_name(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Syntax => Some("SyntaxError"),
            ErrorKind::Name => Some("NameError"),
            ErrorKind::Type => Some("TypeError"),
            ErrorKind::NoMethod => Some("NoMethodError"),
            ErrorKind::Argument => Some("ArgumentError"),
            ErrorKind::ZeroDivision => Some("ZeroDivisionError"),
            ErrorKind::Runtime => Some("RuntimeError"),
            ErrorKind::Unknown => None,
        }
    }

    /// Human-readable label used as the message prefix.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Syntax => Some("Syntax Error"),
            ErrorKind::Name => Some("Name Error"),
            ErrorKind::Type => Some("Type Error"),
            ErrorKind::NoMethod => Some("No Method Error"),
            ErrorKind::Argument => Some("Argument Error"),
            ErrorKind::ZeroDivision => Some("Division by Zero Error"),
            ErrorKind::Runtime => Some("Runtime Error"),
            ErrorKind::Unknown => None,
        }
    }
}

const BACKTRACE_LINES: usize = 5;

/// An exception raised by a guest program, as reported by the guest prelude.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestError {
    /// Class name of the raised exception (e.g. `"ZeroDivisionError"`).
    pub class_name: String,
    /// The exception message, verbatim.
    pub message: String,
    /// The first few backtrace lines, innermost first.
    pub backtrace: Vec<String>,
    /// Resolved category.
    pub kind: ErrorKind,
}

impl GuestError {
    /// Create a guest error, resolving its category from `ancestors`.
    ///
    /// The class itself is always considered first, even when `ancestors`
    /// is empty.
    pub fn new(
        class_name: impl Into<String>,
        ancestors: &[String],
        message: impl Into<String>,
        backtrace: Vec<String>,
    ) -> Self {
        let class_name = class_name.into();
        let kind = ErrorKind::from_ancestors(
            std::iter::once(class_name.as_str()).chain(ancestors.iter().map(String::as_str)),
        );
        Self {
            class_name,
            message: message.into(),
            backtrace,
            kind,
        }
    }

    /// The classified message followed by up to five backtrace lines.
    pub fn describe(&self) -> String {
        let mut text = classify(self);
        for line in self.backtrace.iter().take(BACKTRACE_LINES) {
            text.push_str("\n  ");
            text.push_str(line);
        }
        text
    }
}

impl fmt::Display for GuestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&classify(self))
    }
}

impl std::error::Error for GuestError {}

/// Produce the prefixed message shown to the learner.
///
/// Unrecognized classes keep their own name as the prefix and the message
/// is never altered.
pub fn classify(err: &GuestError) -> String {
    match (err.kind.label(), err.kind.class_name()) {
        (Some(label), Some(class)) if class == err.class_name => {
            format!("{}: {}", label, err.message)
        }
        (Some(label), _) => format!("{} ({}): {}", label, err.class_name, err.message),
        (None, _) if err.class_name.is_empty() => err.message.clone(),
        (None, _) => format!("{}: {}", err.class_name, err.message),
    }
}
