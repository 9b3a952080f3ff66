//! Runtime abstraction layer over external inference engines.
//!
//! The session core never talks to a native engine directly; it goes through
//! [`ModelRuntime`], a narrow adapter contract: load a weight file into an
//! opaque handle, tokenize text, drive a non-reentrant step-wise decode loop,
//! and release the handle (idempotently).

use std::path::Path;

use crate::config::{LoadConfig, SamplingConfig};
use crate::error::{LoadError, StepError};
use crate::types::TokenId;

#[cfg(feature = "llamacpp")]
pub mod llamacpp;
pub mod stub;

#[cfg(feature = "llamacpp")]
pub use llamacpp::LlamaCppRuntime;
pub use stub::{StubBehavior, StubRuntime};

/// Outcome of one native forward-pass step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The next sampled token, already decoded to its text piece.
    Piece(String),
    /// The runtime emitted its end-of-sequence token.
    EndOfSequence,
}

/// Step-wise decoder for one in-flight request.
///
/// Non-reentrant: at most one live stepper per handle, and `step` must never
/// be invoked concurrently. The session's single-active-generation discipline
/// enforces this.
pub trait TokenStepper {
    fn step(&mut self) -> Result<StepOutcome, StepError>;
}

/// Abstract adapter over an external inference engine.
///
/// The handle is exclusively owned by the session; the scheduler borrows it
/// only for the duration of one request through [`ModelRuntime::begin`].
/// All methods may block for native work and are called from a dedicated
/// blocking context, never from an async task directly.
pub trait ModelRuntime: Send + Sync + 'static {
    /// Opaque loaded model/context handle.
    type Handle: Send + 'static;
    /// Stepper borrowing the handle for one generation.
    type Stepper<'h>: TokenStepper
    where
        Self: 'h;

    /// Materialize a weight file. Potentially seconds of blocking work.
    fn load(&self, path: &Path, config: &LoadConfig) -> Result<Self::Handle, LoadError>;

    /// Encode text into runtime token ids.
    fn tokenize(&self, handle: &Self::Handle, text: &str) -> Result<Vec<TokenId>, StepError>;

    /// Feed the prompt and prepare a step-wise decode loop.
    fn begin<'h>(
        &self,
        handle: &'h mut Self::Handle,
        prompt: &[TokenId],
        sampling: &SamplingConfig,
    ) -> Result<Self::Stepper<'h>, StepError>;

    /// Release native resources. Idempotent: safe to call on an
    /// already-released handle.
    fn release(&self, handle: &mut Self::Handle);
}
