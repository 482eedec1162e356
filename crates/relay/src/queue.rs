//! Unbounded FIFO queue carrying [`QueueEvent`]s from a producer to the SSE emitter.

use std::time::Duration;

use repair_qa_common::QueueEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("no event arrived within the timeout")]
    Timeout,

    #[error("all producers are gone")]
    Closed,
}

pub struct EventQueue;

impl EventQueue {
    pub fn unbounded() -> (EventSender, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { inner: tx }, EventReceiver { inner: rx })
    }
}

/// Producer half. Cloning yields another producer for the same queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    inner: mpsc::UnboundedSender<QueueEvent>,
}

impl EventSender {
    /// Enqueue without blocking. Returns `false` when the consumer is gone.
    pub fn put(&self, event: QueueEvent) -> bool {
        match self.inner.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!(kind = %event.kind, "Dropping event, receiver closed");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    inner: mpsc::UnboundedReceiver<QueueEvent>,
}

impl EventReceiver {
    /// Next event, waiting at most `timeout`
    pub async fn get(&mut self, timeout: Duration) -> Result<QueueEvent, QueueError> {
        match tokio::time::timeout(timeout, self.inner.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout),
        }
    }

    pub async fn recv(&mut self) -> Option<QueueEvent> {
        self.inner.recv().await
    }
}
