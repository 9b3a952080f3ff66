//! Cross-boundary result channel.
//!
//! Single producer (the generation worker), single consumer (the caller that
//! issued the request). Backed by an unbounded channel: nothing is dropped or
//! reordered under backpressure — a slow consumer buffers, completeness wins
//! over freshness. A dropped consumer just makes sends no-ops; the worker
//! still runs to its terminal signal.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::types::{GenerationFragment, RequestId, TerminationSignal};

/// One item observed on a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(GenerationFragment),
    Terminal(TerminationSignal),
}

pub(crate) fn result_channel(request_id: RequestId) -> (ResultSink, GenerationStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ResultSink { tx },
        GenerationStream {
            request_id,
            rx,
            finished: false,
        },
    )
}

/// Producer half; lives on the generation worker.
pub(crate) struct ResultSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ResultSink {
    /// A send failure means the consumer abandoned the stream; generation
    /// still runs to its terminal signal, so failures are ignored here.
    pub(crate) fn fragment(&self, fragment: GenerationFragment) {
        let _ = self.tx.send(StreamEvent::Fragment(fragment));
    }

    pub(crate) fn terminal(&self, signal: TerminationSignal) {
        let _ = self.tx.send(StreamEvent::Terminal(signal));
    }
}

/// Consumer half of the result channel for one request.
///
/// Fragments arrive in sequence-number order, followed by exactly one
/// [`StreamEvent::Terminal`]. Polling past the terminal is a protocol error.
#[derive(Debug)]
pub struct GenerationStream {
    request_id: RequestId,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    finished: bool,
}

impl GenerationStream {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Next fragment or the terminal signal; suspends until one is available.
    pub async fn next_event(&mut self) -> Result<StreamEvent, ChannelError> {
        if self.finished {
            return Err(ChannelError::TerminalAlreadyDelivered);
        }
        match self.rx.recv().await {
            Some(event) => {
                if matches!(event, StreamEvent::Terminal(_)) {
                    self.finished = true;
                }
                Ok(event)
            }
            None => {
                self.finished = true;
                Err(ChannelError::Disconnected)
            }
        }
    }

    /// Drain the stream, concatenating fragment text.
    pub async fn collect_text(mut self) -> Result<(String, TerminationSignal), ChannelError> {
        let mut text = String::new();
        loop {
            match self.next_event().await? {
                StreamEvent::Fragment(fragment) => text.push_str(&fragment.text),
                StreamEvent::Terminal(signal) => return Ok((text, signal)),
            }
        }
    }
}

impl Stream for GenerationStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if matches!(event, StreamEvent::Terminal(_)) {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn fragment(seq: u64, text: &str) -> GenerationFragment {
        GenerationFragment {
            request_id: RequestId(1),
            seq,
            text: text.to_string(),
            is_final: false,
        }
    }

    #[tokio::test]
    async fn delivers_fragments_in_order_then_terminal() {
        let (sink, mut stream) = result_channel(RequestId(1));
        sink.fragment(fragment(0, "a"));
        sink.fragment(fragment(1, "b"));
        sink.terminal(TerminationSignal::Completed);

        assert_eq!(stream.next_event().await.unwrap(), StreamEvent::Fragment(fragment(0, "a")));
        assert_eq!(stream.next_event().await.unwrap(), StreamEvent::Fragment(fragment(1, "b")));
        assert_eq!(
            stream.next_event().await.unwrap(),
            StreamEvent::Terminal(TerminationSignal::Completed)
        );
    }

    #[tokio::test]
    async fn polling_past_terminal_is_a_protocol_error() {
        let (sink, mut stream) = result_channel(RequestId(1));
        sink.terminal(TerminationSignal::Cancelled);

        assert!(matches!(
            stream.next_event().await.unwrap(),
            StreamEvent::Terminal(TerminationSignal::Cancelled)
        ));
        assert_eq!(
            stream.next_event().await.unwrap_err(),
            ChannelError::TerminalAlreadyDelivered
        );
    }

    #[tokio::test]
    async fn stream_impl_ends_after_terminal() {
        let (sink, stream) = result_channel(RequestId(2));
        sink.fragment(fragment(0, "x"));
        sink.terminal(TerminationSignal::Completed);
        drop(sink);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Terminal(_)));
    }

    #[tokio::test]
    async fn producer_vanishing_without_terminal_reports_disconnect() {
        let (sink, mut stream) = result_channel(RequestId(3));
        drop(sink);
        assert_eq!(
            stream.next_event().await.unwrap_err(),
            ChannelError::Disconnected
        );
    }

    #[tokio::test]
    async fn collect_text_concatenates_fragments() {
        let (sink, stream) = result_channel(RequestId(4));
        sink.fragment(fragment(0, "hello "));
        sink.fragment(fragment(1, "world"));
        sink.terminal(TerminationSignal::Completed);

        let (text, signal) = stream.collect_text().await.unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(signal, TerminationSignal::Completed);
    }

    #[tokio::test]
    async fn abandoned_consumer_does_not_block_the_producer() {
        let (sink, stream) = result_channel(RequestId(5));
        drop(stream);
        // sends become no-ops rather than errors or blocks
        sink.fragment(fragment(0, "ignored"));
        sink.terminal(TerminationSignal::Completed);
    }
}
