//! The typed event stream consumed by the external caller.
//!
//! Events are produced into a bounded channel and consumed by exactly one
//! reader per request. Dropping the consumer side cancels the request:
//! the [`EventStream`] carries a cancellation token that every in-flight
//! pipeline task selects on.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::SynthesisResult;

/// One search result as presented on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultInfo {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// One selected source with its relevance at selection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSource {
    pub url: String,
    pub relevance: f64,
}

/// Tagged union of everything the pipeline emits.
///
/// The serialized shape is the wire contract consumed by the external
/// presentation layer; field and tag names are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Stage transition notice.
    Status { stage: String, message: String },

    /// One candidate delivered, in arrival order.
    SearchResult {
        index: u64,
        result: SearchResultInfo,
    },

    /// Running analysis over the candidates delivered so far. Emitted only
    /// after all `results_analyzed` candidates it summarizes.
    InterimAnalysis {
        results_analyzed: usize,
        patterns: Vec<String>,
    },

    /// The one-time ranking/truncation of validated candidates.
    SourceSelection { sources: Vec<SelectedSource> },

    /// Terminal success event; always last when present.
    FinalSynthesis {
        content: String,
        sources: Vec<String>,
        confidence: f64,
    },

    /// A degradation (`partial = true`) or terminal failure
    /// (`partial = false` only on fatal errors with no prior candidates).
    Error {
        kind: String,
        message: String,
        partial: bool,
    },
}

impl Event {
    /// Shorthand for a status event.
    pub fn status(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Build the terminal success event from a synthesis result.
    pub fn final_synthesis(result: &SynthesisResult) -> Self {
        Self::FinalSynthesis {
            content: result.content.clone(),
            sources: result.sources.clone(),
            confidence: result.confidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Stream handles
// ---------------------------------------------------------------------------

/// Create a connected producer/consumer pair for one request.
pub fn event_channel(capacity: usize) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();
    (
        EventSender {
            tx,
            cancel: cancel.clone(),
        },
        EventStream { rx, cancel },
    )
}

/// Producer half held by the pipeline.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl EventSender {
    /// Emit one event. Returns `false` when the consumer has gone away, in
    /// which case the request's cancellation token is also triggered.
    pub async fn emit(&self, event: Event) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return false;
        }
        true
    }

    /// Token that fires when the consumer closes the stream.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Consumer half returned to the caller of `aggregate`.
///
/// Dropping this handle cancels all in-flight work for the request.
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
}

impl EventStream {
    /// Receive the next event; `None` once the pipeline has finished and
    /// the terminal event was consumed.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Explicitly cancel the request without dropping the handle.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_stable() {
        let event = Event::SearchResult {
            index: 2,
            result: SearchResultInfo {
                title: "T".into(),
                url: "https://a.example/".into(),
                description: "D".into(),
            },
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "search_result");
        assert_eq!(json["index"], 2);
        assert_eq!(json["result"]["title"], "T");

        let event = Event::Error {
            kind: "timeout".into(),
            message: "fetch timed out".into(),
            partial: true,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "error");
        assert_eq!(json["partial"], true);
    }

    #[tokio::test]
    async fn emit_and_receive() {
        let (tx, mut rx) = event_channel(8);
        assert!(tx.emit(Event::status("searching", "started")).await);
        match rx.next().await {
            Some(Event::Status { stage, .. }) => assert_eq!(stage, "searching"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_consumer_cancels_producer() {
        let (tx, rx) = event_channel(1);
        let cancel = tx.cancel_token();
        drop(rx);
        assert!(cancel.is_cancelled());
        assert!(!tx.emit(Event::status("searching", "late")).await);
    }

    #[tokio::test]
    async fn explicit_cancel_stops_emission() {
        let (tx, rx) = event_channel(4);
        rx.cancel();
        assert!(!tx.emit(Event::status("searching", "x")).await);
    }
}
