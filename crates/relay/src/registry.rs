//! Registry of open streams.
//!
//! Every SSE response owns one queue. The registry keeps the producer half so
//! that auxiliary endpoints can push into a stream they did not open, and the
//! [`StreamLease`] held by the emitter removes the entry when the response ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use repair_qa_common::{ConversationId, QueueEvent, StreamId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::queue::{EventQueue, EventReceiver, EventSender};

#[derive(Debug)]
struct StreamEntry {
    sender: EventSender,
    conversation_id: Option<ConversationId>,
    seq: u64,
}

/// Handles returned when a stream is opened
pub struct OpenedStream {
    pub lease: StreamLease,
    pub sender: EventSender,
    pub receiver: EventReceiver,
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: DashMap<StreamId, StreamEntry>,
    next_seq: AtomicU64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh stream with its own queue
    pub fn open(self: &Arc<Self>, conversation_id: Option<ConversationId>) -> OpenedStream {
        let id = StreamId::new();
        let (sender, receiver) = EventQueue::unbounded();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        self.streams.insert(
            id,
            StreamEntry {
                sender: sender.clone(),
                conversation_id: conversation_id.clone(),
                seq,
            },
        );
        info!(stream_id = %id, conversation_id = ?conversation_id, "Stream opened");

        OpenedStream {
            lease: StreamLease {
                id,
                registry: Arc::clone(self),
                cancel: CancellationToken::new(),
            },
            sender,
            receiver,
        }
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        self.streams.contains_key(id)
    }

    /// Pick the stream an auxiliary push should go to.
    ///
    /// An explicit id is used only while that stream is open. Without one the
    /// most recently opened stream is chosen.
    pub fn resolve(&self, explicit: Option<StreamId>) -> Option<StreamId> {
        match explicit {
            Some(id) if self.contains(&id) => Some(id),
            Some(id) => {
                debug!(stream_id = %id, "Requested stream is not open");
                None
            }
            None => self
                .streams
                .iter()
                .max_by_key(|entry| entry.value().seq)
                .map(|entry| *entry.key()),
        }
    }

    pub fn sender(&self, id: &StreamId) -> Option<EventSender> {
        self.streams.get(id).map(|entry| entry.sender.clone())
    }

    pub fn conversation_of(&self, id: &StreamId) -> Option<ConversationId> {
        self.streams.get(id).and_then(|entry| entry.conversation_id.clone())
    }

    /// Push an event into the resolved stream. Returns the stream that took it.
    pub fn publish(&self, target: Option<StreamId>, event: QueueEvent) -> Option<StreamId> {
        let id = self.resolve(target)?;
        let sender = self.sender(&id)?;
        sender.put(event).then_some(id)
    }

    pub fn close(&self, id: &StreamId) {
        if self.streams.remove(id).is_some() {
            info!(stream_id = %id, "Stream closed");
        }
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }
}

/// Ownership of one open stream.
///
/// Dropping the lease cancels the producer bound to [`StreamLease::cancel_token`]
/// and unregisters the stream.
#[derive(Debug)]
pub struct StreamLease {
    id: StreamId,
    registry: Arc<StreamRegistry>,
    cancel: CancellationToken,
}

impl StreamLease {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.close(&self.id);
    }
}
