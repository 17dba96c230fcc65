pub mod sse;
pub mod transcoder;

pub use sse::{encode_stream_event, sse_frame_stream, SseEvent, SseParser};
pub use transcoder::{StreamTransformer, TransformOptions};

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::error::BridgeError;
use crate::protocol::messages::{MessagesResponse, StreamEvent};

/// Sender half of a client-disconnect signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Receiver half of a client-disconnect signal.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled. A dropped handle never cancels.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

/// How a pumped stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The backend sent its completion signal.
    Completed,
    /// The backend stream ended early; the turn was force-terminated.
    Truncated,
    /// The client went away; nothing further was written.
    Cancelled,
}

impl PumpOutcome {
    /// A cancelled pump becomes [`BridgeError::Cancelled`], which hosts must
    /// not report downstream.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Cancelled`] for [`PumpOutcome::Cancelled`].
    pub fn into_result(self) -> Result<Self, BridgeError> {
        match self {
            PumpOutcome::Cancelled => Err(BridgeError::Cancelled),
            other => Ok(other),
        }
    }
}

/// Drive backend SSE frames through `transformer`, forwarding every client
/// event to `sink` in order.
pub async fn pump_backend_stream<S>(
    frames: S,
    transformer: &mut StreamTransformer,
    sink: &mpsc::Sender<StreamEvent>,
    mut cancel: CancelSignal,
) -> PumpOutcome
where
    S: Stream<Item = SseEvent>,
{
    let mut frames = std::pin::pin!(frames);
    let mut batch = Vec::with_capacity(8);

    loop {
        if cancel.is_cancelled() {
            return abandon(transformer, "client cancelled stream");
        }
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return abandon(transformer, "client cancelled stream");
            }
            frame = frames.next() => frame,
        };

        let ended_by_backend = match next {
            Some(frame) => {
                transformer.handle_frame(&frame.data, &mut batch);
                transformer.has_ended()
            }
            None => {
                tracing::warn!(
                    message_id = transformer.message_id(),
                    "backend stream ended without completion signal"
                );
                transformer.force_terminate(&mut batch);
                false
            }
        };

        for event in batch.drain(..) {
            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return abandon(transformer, "client cancelled stream");
                }
                sent = sink.send(event) => sent,
            };
            if sent.is_err() {
                return abandon(transformer, "client receiver dropped");
            }
        }

        if ended_by_backend {
            return PumpOutcome::Completed;
        }
        if transformer.has_ended() {
            return PumpOutcome::Truncated;
        }
    }
}

/// End the turn without writing anything further downstream.
fn abandon(transformer: &mut StreamTransformer, reason: &str) -> PumpOutcome {
    tracing::debug!(message_id = transformer.message_id(), "{}", reason);
    let mut discarded = Vec::new();
    transformer.force_terminate(&mut discarded);
    PumpOutcome::Cancelled
}

/// Consume a whole backend stream and return the aggregated response.
pub async fn aggregate_backend_stream<S>(
    frames: S,
    mut transformer: StreamTransformer,
) -> MessagesResponse
where
    S: Stream<Item = SseEvent>,
{
    let mut frames = std::pin::pin!(frames);
    let mut discarded = Vec::new();
    while let Some(frame) = frames.next().await {
        transformer.handle_frame(&frame.data, &mut discarded);
        discarded.clear();
        if transformer.has_ended() {
            break;
        }
    }
    transformer.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignaturesConfig;
    use crate::protocol::canonical::ContentBlock;
    use crate::state::SignatureCache;
    use std::sync::Arc;

    fn frame(data: &str) -> SseEvent {
        SseEvent {
            data: data.to_string(),
            ..SseEvent::default()
        }
    }

    fn transformer() -> StreamTransformer {
        StreamTransformer::new(
            TransformOptions::new("m"),
            Arc::new(SignatureCache::new(&SignaturesConfig::default())),
        )
    }

    const DELTA: &str =
        r#"{"event":"on_message_delta","data":{"delta":{"content":[{"type":"text","text":"hi"}]}}}"#;

    #[tokio::test]
    async fn test_pump_completes_on_final() {
        let frames = futures_util::stream::iter(vec![
            frame(DELTA),
            frame(r#"{"final":true,"responseMessage":{"messageId":"r1"}}"#),
            frame(DELTA),
        ]);
        let (tx, mut rx) = mpsc::channel(64);
        let (_handle, signal) = cancel_pair();
        let mut t = transformer();
        let outcome = pump_backend_stream(frames, &mut t, &tx, signal).await;
        assert_eq!(outcome, PumpOutcome::Completed);
        drop(tx);
        let mut types = Vec::new();
        while let Some(event) = rx.recv().await {
            types.push(event.event_type());
        }
        assert_eq!(types.first(), Some(&"message_start"));
        assert_eq!(types.last(), Some(&"message_stop"));
        assert_eq!(t.to_response().content, vec![ContentBlock::text("hi")]);
    }

    #[tokio::test]
    async fn test_pump_force_terminates_truncated_stream() {
        let frames = futures_util::stream::iter(vec![frame(DELTA)]);
        let (tx, mut rx) = mpsc::channel(64);
        let (_handle, signal) = cancel_pair();
        let mut t = transformer();
        let outcome = pump_backend_stream(frames, &mut t, &tx, signal).await;
        assert_eq!(outcome, PumpOutcome::Truncated);
        drop(tx);
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(StreamEvent::MessageStop {}));
    }

    #[tokio::test]
    async fn test_pump_stops_writing_after_cancel() {
        let frames = futures_util::stream::iter(vec![frame(DELTA)]).chain(futures_util::stream::pending());
        let (tx, mut rx) = mpsc::channel(64);
        let (handle, signal) = cancel_pair();
        let mut t = transformer();
        let pump = pump_backend_stream(frames, &mut t, &tx, signal);
        let cancel = async {
            tokio::task::yield_now().await;
            handle.cancel();
        };
        let (outcome, ()) = tokio::join!(pump, cancel);
        assert_eq!(outcome, PumpOutcome::Cancelled);
        assert!(t.has_ended());
        drop(tx);
        let mut types = Vec::new();
        while let Some(event) = rx.recv().await {
            types.push(event.event_type());
        }
        assert!(!types.contains(&"message_stop"));
    }

    #[tokio::test]
    async fn test_cancel_while_sink_full_drops_rest_of_batch() {
        let frames = futures_util::stream::iter(vec![frame(DELTA)]).chain(futures_util::stream::pending());
        let (tx, mut rx) = mpsc::channel(1);
        let (handle, signal) = cancel_pair();
        let mut t = transformer();
        let pump = async {
            let outcome = pump_backend_stream(frames, &mut t, &tx, signal).await;
            drop(tx);
            outcome
        };
        let client = async {
            let first = rx.recv().await.map(|event| event.event_type());
            handle.cancel();
            let mut after_cancel = Vec::new();
            while let Some(event) = rx.recv().await {
                after_cancel.push(event.event_type());
            }
            (first, after_cancel)
        };
        let (outcome, (first, after_cancel)) = tokio::join!(pump, client);
        assert_eq!(outcome, PumpOutcome::Cancelled);
        assert_eq!(first, Some("message_start"));
        assert!(after_cancel.is_empty(), "written after cancel: {after_cancel:?}");
        assert!(t.has_ended());
    }

    #[test]
    fn test_cancelled_outcome_is_unreportable_error() {
        assert_eq!(PumpOutcome::Completed.into_result().ok(), Some(PumpOutcome::Completed));
        assert_eq!(PumpOutcome::Truncated.into_result().ok(), Some(PumpOutcome::Truncated));
        let err = PumpOutcome::Cancelled.into_result().unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
        assert!(!err.is_reportable());
    }

    #[tokio::test]
    async fn test_aggregate_collects_response() {
        let frames = futures_util::stream::iter(vec![frame(DELTA), frame(DELTA)]);
        let response = aggregate_backend_stream(frames, transformer()).await;
        assert_eq!(response.content, vec![ContentBlock::text("hihi")]);
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
    }
}
