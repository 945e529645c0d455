//! Error types for the StripeGuard engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while evaluating a RAID-6 strip
#[derive(Error, Debug)]
pub enum Error {
    /// The caller handed us a strip layout the engine cannot evaluate
    #[error("Invalid strip geometry: {0}")]
    InvalidGeometry(String),

    // =========================================================================
    // Fatal Algorithm Errors
    // =========================================================================
    /// The state machine ran out of passes without settling the strip
    #[error("Strip evaluation did not reach DONE after {passes} passes")]
    StateMachineIncomplete { passes: usize },

    /// A finish step was dispatched for a state that has no finish step
    #[error("Unexpected scratch state during evaluation: {state}")]
    UnexpectedState { state: String },

    /// An end-of-evaluation consistency check failed
    #[error("Invariant violation in {check}: {detail}")]
    InvariantViolation { check: String, detail: String },

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// True for errors that signal a bug in the engine rather than a media
    /// condition. Callers must not retry these.
    pub fn is_fatal_algorithm(&self) -> bool {
        matches!(
            self,
            Error::StateMachineIncomplete { .. }
                | Error::UnexpectedState { .. }
                | Error::InvariantViolation { .. }
        )
    }

    pub(crate) fn invariant(check: &str, detail: impl Into<String>) -> Self {
        Error::InvariantViolation {
            check: check.to_string(),
            detail: detail.into(),
        }
    }
}
