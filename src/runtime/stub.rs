//! Deterministic in-memory runtime for tests and demos.
//!
//! Emits a small fixed vocabulary cyclically and can be scripted to hit
//! end-of-sequence, fail (optionally poisoning the handle), or sleep per
//! step so cancellation timing is observable.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LoadConfig, SamplingConfig};
use crate::error::{LoadError, StepError};
use crate::runtime::{ModelRuntime, StepOutcome, TokenStepper};
use crate::types::TokenId;

/// Scripted behavior for the stub runtime.
#[derive(Debug, Clone)]
pub struct StubBehavior {
    /// Token pieces emitted cyclically, one per step.
    pub vocab: Vec<String>,
    /// Emit end-of-sequence once this many pieces were produced.
    pub eos_after: Option<usize>,
    /// Fail on this zero-based step index.
    pub fail_at: Option<usize>,
    /// Report the handle unusable when failing.
    pub poison_on_failure: bool,
    /// Artificial per-step latency.
    pub step_delay: Option<Duration>,
    /// Reject load when the path does not exist on disk.
    pub require_existing_path: bool,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            vocab: vec![
                "alpha ".to_string(),
                "beta ".to_string(),
                "gamma ".to_string(),
                "delta ".to_string(),
            ],
            eos_after: None,
            fail_at: None,
            poison_on_failure: false,
            step_delay: None,
            require_existing_path: true,
        }
    }
}

/// In-memory engine implementing [`ModelRuntime`].
pub struct StubRuntime {
    behavior: StubBehavior,
    releases: Arc<AtomicUsize>,
}

impl StubRuntime {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(StubBehavior::default())
    }

    /// Shared counter of actual native releases, for exactly-once assertions.
    /// Survives handing the runtime over to a session.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        self.releases.clone()
    }
}

/// Handle produced by [`StubRuntime::load`].
#[derive(Debug)]
pub struct StubHandle {
    behavior: StubBehavior,
    releases: Arc<AtomicUsize>,
    released: bool,
    steps_taken: usize,
}

/// Stepper borrowing a [`StubHandle`] for one request.
#[derive(Debug)]
pub struct StubStepper<'h> {
    handle: &'h mut StubHandle,
}

impl TokenStepper for StubStepper<'_> {
    fn step(&mut self) -> Result<StepOutcome, StepError> {
        let handle = &mut *self.handle;
        if let Some(delay) = handle.behavior.step_delay {
            std::thread::sleep(delay);
        }
        let idx = handle.steps_taken;
        if handle.behavior.fail_at == Some(idx) {
            return Err(if handle.behavior.poison_on_failure {
                StepError::poisoned("scripted step failure")
            } else {
                StepError::new("scripted step failure")
            });
        }
        if let Some(eos) = handle.behavior.eos_after {
            if idx >= eos {
                return Ok(StepOutcome::EndOfSequence);
            }
        }
        handle.steps_taken += 1;
        let piece = handle.behavior.vocab[idx % handle.behavior.vocab.len()].clone();
        Ok(StepOutcome::Piece(piece))
    }
}

impl ModelRuntime for StubRuntime {
    type Handle = StubHandle;
    type Stepper<'h>
        = StubStepper<'h>
    where
        Self: 'h;

    fn load(&self, path: &Path, _config: &LoadConfig) -> Result<StubHandle, LoadError> {
        if self.behavior.require_existing_path && !path.exists() {
            return Err(LoadError::FileNotFound(path.display().to_string()));
        }
        Ok(StubHandle {
            behavior: self.behavior.clone(),
            releases: self.releases.clone(),
            released: false,
            steps_taken: 0,
        })
    }

    fn tokenize(&self, _handle: &StubHandle, text: &str) -> Result<Vec<TokenId>, StepError> {
        Ok(text
            .split_whitespace()
            .enumerate()
            .map(|(i, _)| TokenId(i as i32))
            .collect())
    }

    fn begin<'h>(
        &self,
        handle: &'h mut StubHandle,
        _prompt: &[TokenId],
        _sampling: &SamplingConfig,
    ) -> Result<StubStepper<'h>, StepError> {
        if handle.released {
            return Err(StepError::poisoned("handle already released"));
        }
        handle.steps_taken = 0;
        Ok(StubStepper { handle })
    }

    fn release(&self, handle: &mut StubHandle) {
        if !handle.released {
            handle.released = true;
            handle.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
