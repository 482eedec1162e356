use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use repair_qa_common::QueueEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::protocol::{Classified, FrameClassifier};
use crate::queue::EventSender;
use crate::routing::RoutingTable;
use crate::upstream::{ChatRequest, ChatService};

/// How an adapter run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `message_end` received
    Completed,
    /// Upstream sent an `error` event
    UpstreamError(String),
    /// Request rejected, transport failure or idle timeout
    Failed(String),
    /// Body ended without `message_end`
    Exhausted,
    /// Consumer went away
    Cancelled,
}

impl Termination {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::UpstreamError(_) | Self::Failed(_) | Self::Exhausted)
    }

    fn describe(&self) -> String {
        match self {
            Self::Completed => "completed".to_string(),
            Self::UpstreamError(msg) => format!("upstream error: {}", msg),
            Self::Failed(msg) => msg.clone(),
            Self::Exhausted => "upstream closed the stream before message_end".to_string(),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Consumes one upstream chat run and feeds its fragments into a stream queue.
///
/// Whatever happens upstream, a run enqueues exactly one `end`.
pub struct StreamAdapter {
    chat: Arc<dyn ChatService>,
    routing: Arc<RoutingTable>,
    idle_timeout: Duration,
    surface_errors: bool,
}

impl StreamAdapter {
    pub fn new(
        chat: Arc<dyn ChatService>,
        routing: Arc<RoutingTable>,
        idle_timeout: Duration,
        surface_errors: bool,
    ) -> Self {
        Self {
            chat,
            routing,
            idle_timeout,
            surface_errors,
        }
    }

    #[instrument(skip(self, request, sink, cancel), fields(stream_id = %request.stream_id))]
    pub async fn run(
        &self,
        request: ChatRequest,
        sink: EventSender,
        cancel: CancellationToken,
    ) -> Termination {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Termination::Cancelled,
            outcome = self.pump(&request, &sink) => outcome,
        };

        match &outcome {
            Termination::Completed => info!("Upstream run completed"),
            Termination::Cancelled => debug!("Upstream run cancelled"),
            failure => warn!(reason = %failure.describe(), "Upstream run ended early"),
        }

        self.finish(&sink, &outcome);
        outcome
    }

    async fn pump(&self, request: &ChatRequest, sink: &EventSender) -> Termination {
        let mut lines = match self.chat.stream_chat(request).await {
            Ok(lines) => lines,
            Err(e) => {
                error!(error = %e, "Chat request failed");
                return Termination::Failed(e.to_string());
            }
        };

        let mut classifier = FrameClassifier::new(Arc::clone(&self.routing));
        loop {
            let next = match tokio::time::timeout(self.idle_timeout, lines.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return Termination::Failed(format!(
                        "no upstream data for {}s",
                        self.idle_timeout.as_secs()
                    ))
                }
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    error!(error = %e, "Upstream stream broke");
                    return Termination::Failed(e.to_string());
                }
                None => return Termination::Exhausted,
            };

            match classifier.classify(&line) {
                Classified::Skip => {}
                Classified::Emit(event) => {
                    debug!(kind = %event.kind, "Forwarding fragment");
                    if !sink.put(event) {
                        return Termination::Cancelled;
                    }
                }
                Classified::Finished => return Termination::Completed,
                Classified::Failed(message) => {
                    error!(message = %message, "Upstream reported an error");
                    return Termination::UpstreamError(message);
                }
            }
        }
    }

    fn finish(&self, sink: &EventSender, outcome: &Termination) {
        if self.surface_errors && outcome.is_failure() {
            sink.put(QueueEvent::error(outcome.describe()));
        }
        sink.put(QueueEvent::end());
    }
}
