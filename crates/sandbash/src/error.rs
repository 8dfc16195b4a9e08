//! Error types for Sandbash
//!
//! The taxonomy mirrors how a shell reports failures:
//! - [`Error::Syntax`]: the script could not be parsed
//! - [`Error::Shell`]: a runtime semantic error (bad substitution, division by zero, ...)
//! - [`Error::Fs`]: a POSIX-kind-tagged filesystem failure
//! - [`Error::ResourceLimit`]: a governor limit was hit; aborts the whole script
//! - [`Error::Network`]: a request was refused by the network policy or failed
//!
//! Only `ResourceLimit` escapes [`Bash::exec`](crate::Bash::exec) during
//! execution; the others are converted to stderr text and an exit code at the
//! command boundary, like a real shell.

use crate::fs::FsError;
use crate::interpreter::ExecResult;
use crate::limits::LimitExceeded;
use thiserror::Error;

/// Result type alias using Sandbash's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Sandbash error types.
///
/// Messages are safe to show to end users: no host paths, memory addresses
/// or panic payloads.
#[derive(Error, Debug)]
pub enum Error {
    /// The script could not be parsed.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// Runtime semantic error.
    #[error("{0}")]
    Shell(String),

    /// Filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// Resource limit exceeded.
    ///
    /// Fatal to the whole script. `partial` holds the output produced before
    /// the limit was hit.
    #[error("resource limit exceeded: {limit}")]
    ResourceLimit {
        limit: LimitExceeded,
        partial: Box<ExecResult>,
    },

    /// Network policy refusal or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Internal error for unexpected failures.
    ///
    /// Used for recovered builtin panics. Never carries the panic payload.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a syntax error with source location.
    pub fn syntax(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    /// Whether this error must abort the whole script.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ResourceLimit { .. })
    }

    /// Output captured before a resource limit aborted execution.
    pub fn partial_output(&self) -> Option<&ExecResult> {
        match self {
            Self::ResourceLimit { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Prepend output produced by an enclosing unit to a fatal error's
    /// partial result, so the caller sees everything emitted so far.
    pub(crate) fn with_prior_output(self, stdout: &str, stderr: &str) -> Self {
        match self {
            Self::ResourceLimit { limit, mut partial } => {
                if !stdout.is_empty() {
                    partial.stdout.insert_str(0, stdout);
                }
                if !stderr.is_empty() {
                    partial.stderr.insert_str(0, stderr);
                }
                Self::ResourceLimit { limit, partial }
            }
            other => other,
        }
    }
}

impl From<LimitExceeded> for Error {
    fn from(limit: LimitExceeded) -> Self {
        Self::ResourceLimit {
            limit,
            partial: Box::default(),
        }
    }
}
