//! Failure taxonomy for the generate → validate → execute → repair loop.
//!
//! Every failure below the submission boundary is converted into one of
//! these variants and either earns a repair attempt or ends the submission.

use thiserror::Error;

/// What went wrong during one generation attempt.
#[derive(Debug, Error)]
pub enum GenError {
    /// Credentials or settings are missing; nothing was sent to a backend.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend was unreachable or returned a malformed response.
    #[error("backend request failed: {0}")]
    Transport(String),

    /// The response contained no usable fenced code block.
    #[error("no usable code block in the model response")]
    Extraction,

    /// The candidate imports a denylisted module. Never executed.
    #[error("unsafe code rejected: {0}")]
    Unsafe(String),

    /// The candidate does not parse as Python.
    #[error("generated code failed to parse: {0}")]
    Syntax(String),

    /// The host raised while running the candidate. The message is the
    /// host's diagnostic text, forwarded verbatim into the repair prompt.
    #[error("script execution failed: {0}")]
    Execution(String),
}

impl GenError {
    /// Fatal errors end the submission immediately; everything else earns
    /// a repair attempt while the budget lasts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GenError::Config(_))
    }
}
