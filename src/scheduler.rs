//! Generation step loop and stop-condition policy.
//!
//! Runs entirely on a dedicated blocking thread; the only way results leave
//! this module is through the result sink. Terminal signals are emitted by
//! the session after it has reinstalled the handle, so the outcome is
//! returned rather than sent here.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::runtime::{ModelRuntime, StepOutcome, TokenStepper};
use crate::stream::ResultSink;
use crate::types::{GenerationFragment, GenerationRequest, TerminationSignal};

/// What the step loop left behind for the state machine.
pub(crate) struct GenerationOutcome {
    pub signal: TerminationSignal,
    /// The runtime reported the handle unusable; the session must move to
    /// the error state and release the handle.
    pub handle_poisoned: bool,
}

impl GenerationOutcome {
    fn completed() -> Self {
        Self {
            signal: TerminationSignal::Completed,
            handle_poisoned: false,
        }
    }

    fn cancelled() -> Self {
        Self {
            signal: TerminationSignal::Cancelled,
            handle_poisoned: false,
        }
    }

    fn failed(reason: String, handle_poisoned: bool) -> Self {
        Self {
            signal: TerminationSignal::Failed(reason),
            handle_poisoned,
        }
    }
}

/// Drive one request against the borrowed handle.
///
/// Fragments are pushed to the sink immediately as they are produced.
/// Cancellation is cooperative: the token is checked between steps only, so
/// a step already dispatched to the native runtime always completes.
pub(crate) fn run_generation<R: ModelRuntime>(
    runtime: &R,
    handle: &mut R::Handle,
    request: &GenerationRequest,
    cancel: &CancellationToken,
    sink: &ResultSink,
) -> GenerationOutcome {
    let prompt_tokens = match runtime.tokenize(handle, &request.prompt) {
        Ok(tokens) => tokens,
        Err(err) => {
            warn!(request_id = %request.request_id, error = %err, "prompt tokenization failed");
            return GenerationOutcome::failed(err.reason, err.handle_poisoned);
        }
    };
    debug!(
        request_id = %request.request_id,
        prompt_tokens = prompt_tokens.len(),
        "prompt tokenized"
    );

    let mut stepper = match runtime.begin(handle, &prompt_tokens, &request.sampling) {
        Ok(stepper) => stepper,
        Err(err) => {
            warn!(request_id = %request.request_id, error = %err, "could not start generation");
            return GenerationOutcome::failed(err.reason, err.handle_poisoned);
        }
    };

    let max_tokens = request.sampling.max_tokens;
    let stops = &request.sampling.stop_sequences;
    // Rolling text of everything produced so far, so a stop sequence may
    // span fragment boundaries.
    let mut produced_text = String::new();
    let mut produced = 0usize;
    let mut seq = 0u64;

    loop {
        if cancel.is_cancelled() {
            debug!(request_id = %request.request_id, produced, "generation cancelled");
            return GenerationOutcome::cancelled();
        }
        if produced >= max_tokens {
            return GenerationOutcome::completed();
        }

        let piece = match stepper.step() {
            Ok(StepOutcome::Piece(piece)) => piece,
            Ok(StepOutcome::EndOfSequence) => {
                debug!(request_id = %request.request_id, produced, "end of sequence");
                return GenerationOutcome::completed();
            }
            Err(err) => {
                warn!(
                    request_id = %request.request_id,
                    error = %err,
                    poisoned = err.handle_poisoned,
                    "step failed"
                );
                return GenerationOutcome::failed(err.reason, err.handle_poisoned);
            }
        };

        produced += 1;
        let piece_start = produced_text.len();
        produced_text.push_str(&piece);

        // Stop-sequence match takes precedence over the token budget when
        // both trigger on the same step. The triggering fragment is still
        // delivered, trimmed after the end of the match.
        if let Some(match_end) = stop_match(&produced_text, stops) {
            let keep = match_end - piece_start;
            sink.fragment(GenerationFragment {
                request_id: request.request_id,
                seq,
                text: piece[..keep].to_string(),
                is_final: true,
            });
            debug!(request_id = %request.request_id, produced, "stop sequence hit");
            return GenerationOutcome::completed();
        }

        let is_final = produced >= max_tokens;
        sink.fragment(GenerationFragment {
            request_id: request.request_id,
            seq,
            text: piece,
            is_final,
        });
        seq += 1;

        if is_final {
            return GenerationOutcome::completed();
        }
    }
}

/// Byte offset just past the earliest stop-sequence match, if any.
///
/// Since matching runs after every step, any match must end inside the most
/// recent piece; earlier text alone can never contain one.
fn stop_match(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|stop| !stop.is_empty())
        .filter_map(|stop| text.find(stop.as_str()).map(|start| start + stop.len()))
        .min()
}
