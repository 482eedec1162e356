//! Drains a stream queue into SSE frames.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use repair_qa_common::{EventKind, Payload, QueueEvent, StreamId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::queue::{EventReceiver, QueueError};
use crate::registry::StreamLease;

/// Closing marker sent after the last fragment
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Serialized `{"type", "text"}` fragment
    Data(String),
    Done,
}

impl SseFrame {
    pub fn payload(&self) -> &str {
        match self {
            Self::Data(json) => json,
            Self::Done => DONE_MARKER,
        }
    }

    /// Frame as written on the wire
    pub fn to_wire(&self) -> String {
        format!("data: {}\n\n", self.payload())
    }

    pub fn into_event(self) -> Event {
        Event::default().data(self.payload())
    }
}

#[derive(Serialize)]
struct WireFragment<'a> {
    #[serde(rename = "type")]
    kind: &'a EventKind,
    text: &'a Payload,
}

fn render(event: &QueueEvent) -> serde_json::Result<String> {
    serde_json::to_string(&WireFragment {
        kind: &event.kind,
        text: &event.payload,
    })
}

/// Consumer side of one stream. Owns the stream lease, so dropping the
/// emitter (or its frame stream) cancels the producer and unregisters the stream.
pub struct SseEmitter {
    receiver: EventReceiver,
    lease: StreamLease,
    idle_timeout: Option<Duration>,
}

impl SseEmitter {
    pub fn new(receiver: EventReceiver, lease: StreamLease, idle_timeout: Option<Duration>) -> Self {
        Self {
            receiver,
            lease,
            idle_timeout,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.lease.id()
    }

    /// Frames in enqueue order, ending with exactly one [`SseFrame::Done`]
    pub fn frames(self) -> impl Stream<Item = SseFrame> + Send + 'static {
        let Self {
            mut receiver,
            lease,
            idle_timeout,
        } = self;

        stream! {
            let stream_id = lease.id();
            let _lease = lease;

            loop {
                let next = match idle_timeout {
                    Some(timeout) => match receiver.get(timeout).await {
                        Ok(event) => Some(event),
                        Err(QueueError::Closed) => None,
                        Err(QueueError::Timeout) => {
                            warn!(stream_id = %stream_id, "Stream idle, closing");
                            None
                        }
                    },
                    None => receiver.recv().await,
                };

                let Some(event) = next else {
                    yield SseFrame::Done;
                    break;
                };

                if event.is_end() {
                    debug!(stream_id = %stream_id, "End of stream");
                    yield SseFrame::Done;
                    break;
                }

                if !event.kind.is_forwardable() {
                    debug!(stream_id = %stream_id, kind = %event.kind, "Dropping unknown kind");
                    continue;
                }

                match render(&event) {
                    Ok(json) => yield SseFrame::Data(json),
                    Err(e) => warn!(stream_id = %stream_id, error = %e, "Failed to serialize fragment"),
                }
            }
        }
    }

    pub fn into_sse(self) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
        let events = self.frames().map(|frame| Ok(frame.into_event()));
        Sse::new(events).keep_alive(KeepAlive::default())
    }
}
