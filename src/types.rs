//! Core data types shared across the session manager.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SamplingConfig;

/// Identifier for one generation request, monotonically assigned per session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Token id in the runtime's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub i32);

/// A generation request as submitted to the scheduler. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: RequestId,
    pub prompt: String,
    pub sampling: SamplingConfig,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(request_id: RequestId, prompt: impl Into<String>, sampling: SamplingConfig) -> Self {
        Self {
            request_id,
            prompt: prompt.into(),
            sampling,
            created_at: Utc::now(),
        }
    }
}

/// An incremental piece of generated text delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationFragment {
    pub request_id: RequestId,
    /// Contiguous from 0 within a request; a gap is a protocol violation.
    pub seq: u64,
    pub text: String,
    /// Set when this fragment is known at emission time to be the last one.
    pub is_final: bool,
}

/// The single event that closes out a generation request. Always the last
/// item observed on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationSignal {
    Completed,
    Cancelled,
    Failed(String),
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Completed => write!(f, "completed"),
            TerminationSignal::Cancelled => write!(f, "cancelled"),
            TerminationSignal::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Snapshot of the session state machine.
///
/// The native handle itself never appears in a snapshot; it lives only
/// inside the session's internal slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unloaded,
    Loading { path: PathBuf },
    Ready,
    Generating { request_id: RequestId },
    Cancelling { request_id: RequestId },
    Error { reason: String },
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// Short lowercase name, used in busy-error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unloaded => "unloaded",
            SessionState::Loading { .. } => "loading",
            SessionState::Ready => "ready",
            SessionState::Generating { .. } => "generating",
            SessionState::Cancelling { .. } => "cancelling",
            SessionState::Error { .. } => "error",
        }
    }
}
