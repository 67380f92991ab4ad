//! Build-time error types.
//!
//! The core has exactly two error pathways: typed build errors raised to the
//! host (this module), and runtime failure *values* that propagate through the
//! engine (see `value::Value::is_fail`). Nothing in the core panics on bad
//! input.

use std::fmt;

use crate::cop::Span;

/// A syntax error with the source span it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self { message: message.into(), span }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at {}:{}: {}", self.span.line, self.span.col, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Errors raised while building a module: parsing, extraction, namespace
/// construction, resolution, or loading.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BuildError {
    Syntax(ParseError),
    /// A referenced name has conflicting definitions; lists the qualified
    /// names that collide. Only raised when the name is actually used.
    AmbiguousReference {
        name: String,
        candidates: Vec<String>,
    },
    UndefinedReference {
        name: String,
        span: Option<Span>,
    },
    /// A module-level binding violated its prefix contract, e.g. `pkg.x`
    /// bound to a non-constant or `startup.x` bound to a non-block.
    InvalidModuleAssignment {
        name: String,
        reason: String,
    },
    ModuleNotFound {
        resource: String,
        searched: Vec<String>,
    },
    /// URL-like module resources are reserved and rejected.
    UnsupportedResource {
        resource: String,
    },
    SourceTooLarge {
        resource: String,
        size: u64,
    },
    Io {
        resource: String,
        message: String,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(err) => write!(f, "{err}"),
            Self::AmbiguousReference { name, candidates } => {
                write!(f, "ambiguous reference '{name}' matches: {}", candidates.join(", "))
            }
            Self::UndefinedReference { name, span } => match span {
                Some(span) => write!(f, "undefined reference '{name}' at {}:{}", span.line, span.col),
                None => write!(f, "undefined reference '{name}'"),
            },
            Self::InvalidModuleAssignment { name, reason } => {
                write!(f, "invalid module assignment '{name}': {reason}")
            }
            Self::ModuleNotFound { resource, searched } => {
                write!(f, "module '{resource}' not found, searched: {}", searched.join(", "))
            }
            Self::UnsupportedResource { resource } => {
                write!(f, "module resource '{resource}' uses an unsupported scheme")
            }
            Self::SourceTooLarge { resource, size } => {
                write!(f, "module '{resource}' is too large ({size} bytes)")
            }
            Self::Io { resource, message } => write!(f, "failed to read '{resource}': {message}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<ParseError> for BuildError {
    fn from(err: ParseError) -> Self {
        Self::Syntax(err)
    }
}
