//! Inference session state machine.
//!
//! An [`InferenceSession`] owns at most one loaded model at a time and
//! serializes every command against it. The native handle lives in an
//! internal slot guarded by a mutex; during a generation the handle moves
//! onto a dedicated blocking thread and is reinstalled in the slot before
//! the terminal signal is emitted, so `unload` never races a live native
//! call. Sessions are explicitly constructed objects, not globals; tests
//! run as many independent sessions as they like.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{LoadConfig, SamplingConfig};
use crate::error::{Error, Result};
use crate::guard::HandleGuard;
use crate::runtime::ModelRuntime;
use crate::scheduler;
use crate::stream::{result_channel, GenerationStream};
use crate::types::{GenerationRequest, RequestId, SessionState};

/// Bookkeeping for the request currently on the worker thread.
struct ActiveGeneration {
    request_id: RequestId,
    cancel: CancellationToken,
    /// Flips to true once the worker has reinstalled the handle.
    done_rx: watch::Receiver<bool>,
}

/// Internal state slot. Exactly one of these per session; the handle only
/// ever lives here or on the worker thread, never both.
enum Slot<R: ModelRuntime> {
    Unloaded,
    Loading { path: PathBuf },
    Ready { guard: HandleGuard<R> },
    Generating { active: ActiveGeneration },
    Error { reason: String },
}

impl<R: ModelRuntime> Slot<R> {
    fn name(&self) -> &'static str {
        match self {
            Slot::Unloaded => "unloaded",
            Slot::Loading { .. } => "loading",
            Slot::Ready { .. } => "ready",
            Slot::Generating { active } => {
                if active.cancel.is_cancelled() {
                    "cancelling"
                } else {
                    "generating"
                }
            }
            Slot::Error { .. } => "error",
        }
    }
}

struct Inner<R: ModelRuntime> {
    slot: Mutex<Slot<R>>,
    next_request: AtomicU64,
}

/// Session manager owning one native model/context handle.
///
/// Commands are issued from async callers; the generation loop runs on a
/// blocking thread and communicates only through the result channel and
/// state snapshots, so the caller context is never blocked by a native call.
pub struct InferenceSession<R: ModelRuntime> {
    runtime: Arc<R>,
    inner: Arc<Inner<R>>,
}

impl<R: ModelRuntime> InferenceSession<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime: Arc::new(runtime),
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Unloaded),
                next_request: AtomicU64::new(0),
            }),
        }
    }

    /// Load a model file. Valid from the unloaded and error states only;
    /// anything else is rejected as busy. The native load runs on a
    /// blocking thread and may take seconds.
    pub async fn load_model(&self, path: impl AsRef<Path>, config: LoadConfig) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        {
            let mut slot = self.inner.slot.lock();
            match &*slot {
                Slot::Unloaded | Slot::Error { .. } => {
                    *slot = Slot::Loading { path: path.clone() };
                }
                other => {
                    return Err(Error::Busy {
                        op: "load_model",
                        state: other.name(),
                    })
                }
            }
        }

        info!(path = %path.display(), "loading model");
        let runtime = self.runtime.clone();
        let load_path = path.clone();
        let loaded =
            tokio::task::spawn_blocking(move || runtime.load(&load_path, &config)).await;

        let mut slot = self.inner.slot.lock();
        match loaded {
            Ok(Ok(handle)) => {
                *slot = Slot::Ready {
                    guard: HandleGuard::new(self.runtime.clone(), handle),
                };
                info!(path = %path.display(), "model ready");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(path = %path.display(), error = %err, "model load failed");
                *slot = Slot::Error {
                    reason: err.to_string(),
                };
                Err(err.into())
            }
            Err(join_err) => {
                let reason = format!("model load panicked: {join_err}");
                warn!(path = %path.display(), "{reason}");
                *slot = Slot::Error {
                    reason: reason.clone(),
                };
                Err(Error::Internal(reason))
            }
        }
    }

    /// Start a generation. Valid from the ready state only; a concurrent
    /// generation (or an in-flight load) is rejected as busy without
    /// disturbing the active request.
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
        sampling: SamplingConfig,
    ) -> Result<GenerationStream> {
        let request_id = RequestId(self.inner.next_request.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let guard = {
            let mut slot = self.inner.slot.lock();
            match mem::replace(&mut *slot, Slot::Unloaded) {
                Slot::Ready { guard } => {
                    *slot = Slot::Generating {
                        active: ActiveGeneration {
                            request_id,
                            cancel: cancel.clone(),
                            done_rx,
                        },
                    };
                    guard
                }
                other => {
                    let state = other.name();
                    *slot = other;
                    return Err(Error::Busy {
                        op: "generate",
                        state,
                    });
                }
            }
        };

        let request = GenerationRequest::new(request_id, prompt, sampling);
        let (sink, stream) = result_channel(request_id);
        debug!(request_id = %request_id, "generation started");

        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let outcome = {
                let (runtime, handle) = guard.parts();
                scheduler::run_generation(runtime, handle, &request, &cancel, &sink)
            };

            // Reinstall the handle before anything observable happens, so a
            // waiter woken by the terminal signal always finds it back.
            {
                let mut slot = inner.slot.lock();
                if outcome.handle_poisoned {
                    guard.release();
                    *slot = Slot::Error {
                        reason: match &outcome.signal {
                            crate::types::TerminationSignal::Failed(reason) => reason.clone(),
                            other => other.to_string(),
                        },
                    };
                } else {
                    *slot = Slot::Ready { guard };
                }
            }

            debug!(request_id = %request.request_id, signal = %outcome.signal, "generation finished");
            sink.terminal(outcome.signal);
            let _ = done_tx.send(true);
        });

        Ok(stream)
    }

    /// Request cooperative cancellation of the active generation. Observed
    /// between native steps, so latency is bounded by one step. No-op when
    /// nothing is generating.
    pub fn cancel(&self) {
        let slot = self.inner.slot.lock();
        if let Slot::Generating { active } = &*slot {
            debug!(request_id = %active.request_id, "cancellation requested");
            active.cancel.cancel();
        }
    }

    /// Unload the model, releasing the native handle exactly once. If a
    /// generation is in flight it is cancelled first and awaited; the
    /// release never races a live native call. No-op when already unloaded.
    pub async fn unload(&self) -> Result<()> {
        loop {
            let mut done_rx = {
                let mut slot = self.inner.slot.lock();
                match mem::replace(&mut *slot, Slot::Unloaded) {
                    Slot::Unloaded => return Ok(()),
                    Slot::Error { .. } => {
                        info!("cleared error state");
                        return Ok(());
                    }
                    Slot::Ready { mut guard } => {
                        guard.release();
                        info!("model unloaded");
                        return Ok(());
                    }
                    loading @ Slot::Loading { .. } => {
                        *slot = loading;
                        return Err(Error::Busy {
                            op: "unload",
                            state: "loading",
                        });
                    }
                    Slot::Generating { active } => {
                        active.cancel.cancel();
                        let rx = active.done_rx.clone();
                        *slot = Slot::Generating { active };
                        rx
                    }
                }
            };

            // Wait for the worker to reinstall the handle, then retry.
            loop {
                let done = *done_rx.borrow();
                if done || done_rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Snapshot of the current state. Never blocks on native work.
    pub fn state(&self) -> SessionState {
        match &*self.inner.slot.lock() {
            Slot::Unloaded => SessionState::Unloaded,
            Slot::Loading { path } => SessionState::Loading { path: path.clone() },
            Slot::Ready { .. } => SessionState::Ready,
            Slot::Generating { active } => {
                if active.cancel.is_cancelled() {
                    SessionState::Cancelling {
                        request_id: active.request_id,
                    }
                } else {
                    SessionState::Generating {
                        request_id: active.request_id,
                    }
                }
            }
            Slot::Error { reason } => SessionState::Error {
                reason: reason.clone(),
            },
        }
    }
}

impl<R: ModelRuntime> Drop for InferenceSession<R> {
    /// Process-teardown path: cancel any in-flight generation. The worker
    /// holds the last reference to the slot and reinstalls the guard, whose
    /// own drop then releases the handle.
    fn drop(&mut self) {
        let slot = self.inner.slot.lock();
        if let Slot::Generating { active } = &*slot {
            active.cancel.cancel();
        }
    }
}
