//! Error types for the lmstream session manager.

use thiserror::Error;

/// A specialized Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a model file could not be materialized into a native context.
///
/// Load failures are recoverable: the session moves to the error state and the
/// caller may retry `load_model`, possibly with a different file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    FileNotFound(String),
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),
    #[error("out of memory while materializing weights: {0}")]
    OutOfMemory(String),
    #[error("corrupt model file: {0}")]
    Corrupt(String),
}

/// Failure reported by the native runtime during tokenization or a
/// forward-pass step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("runtime step failed: {reason}")]
pub struct StepError {
    pub reason: String,
    /// Set when the runtime reports the handle itself as no longer usable.
    /// The session then escalates to the error state instead of returning
    /// to ready.
    pub handle_poisoned: bool,
}

impl StepError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            handle_poisoned: false,
        }
    }

    pub fn poisoned(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            handle_poisoned: true,
        }
    }
}

/// Consumer-side protocol misuse on a result stream. Never fatal to the
/// session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("stream polled after its terminal signal was delivered")]
    TerminalAlreadyDelivered,
    #[error("result channel closed before a terminal signal")]
    Disconnected,
}

/// The error type for session commands.
#[derive(Debug, Error)]
pub enum Error {
    /// Model load failed; retry with `load_model`.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Command issued while the session cannot legally accept it.
    #[error("operation `{op}` rejected while session is {state}")]
    Busy { op: &'static str, state: &'static str },
    /// Native runtime failure surfaced through a command result.
    #[error(transparent)]
    Step(#[from] StepError),
    /// Result-stream protocol violation.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Worker infrastructure failure (e.g. a panicked blocking task).
    #[error("session worker failed: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors the caller can resolve by retrying later.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_error_names_operation_and_state() {
        let err = Error::Busy {
            op: "generate",
            state: "generating",
        };
        assert!(err.is_busy());
        assert_eq!(
            err.to_string(),
            "operation `generate` rejected while session is generating"
        );
    }

    #[test]
    fn step_error_carries_poison_flag() {
        assert!(!StepError::new("oom during decode").handle_poisoned);
        assert!(StepError::poisoned("kv cache corrupt").handle_poisoned);
    }
}
