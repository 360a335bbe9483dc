//! Crate-wide error type.
//!
//! One variant per failure kind the class/category model induction and
//! evaluation pipeline can raise. Non-fatal conditions (renormalization
//! drift, OOV skips, pruned EM updates) are logged via `tracing::warn!`
//! at the call site instead of being threaded through `Result`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input at line {line}: {detail}")]
    MalformedInput { line: usize, detail: String },

    #[error("conflicting configuration: {detail}")]
    ConfigConflict { detail: String },

    #[error("invariant violated: {detail}")]
    InvariantViolation { detail: String },

    #[error("beam became empty while segmenting: {detail}")]
    EmptyBeam { detail: String },

    #[error("numeric domain error: {detail}")]
    NumericDomain { detail: String },
}

impl Error {
    pub fn malformed(line: usize, detail: impl Into<String>) -> Self {
        Error::MalformedInput { line, detail: detail.into() }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        Error::InvariantViolation { detail: detail.into() }
    }

    pub fn config_conflict(detail: impl Into<String>) -> Self {
        Error::ConfigConflict { detail: detail.into() }
    }

    pub fn numeric(detail: impl Into<String>) -> Self {
        Error::NumericDomain { detail: detail.into() }
    }

    pub fn empty_beam(detail: impl Into<String>) -> Self {
        Error::EmptyBeam { detail: detail.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = Error::malformed(12, "expected 3 fields, found 2");
        let msg = format!("{e}");
        assert!(msg.contains("line 12"));
        assert!(msg.contains("expected 3 fields"));
    }
}
