//! Streaming relay between the upstream chat service and SSE clients.
//!
//! ```text
//! POST /ask ──> ConversationRelay::open
//!                 │  registry.open() -> (lease, sender, receiver)
//!                 │  optional upload
//!                 ├─ spawn StreamAdapter::run ── lines ──> FrameClassifier ──> sender
//!                 └─ SseEmitter(receiver, lease) ──> data: {...} ... data: [DONE]
//! ```
//!
//! Each stream has its own queue. Dropping the emitter cancels the adapter
//! and removes the stream from the registry.

pub mod adapter;
pub mod emitter;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod routing;
pub mod upstream;

pub use adapter::{StreamAdapter, Termination};
pub use emitter::{SseEmitter, SseFrame, DONE_MARKER};
pub use error::{RelayError, Result};
pub use queue::{EventQueue, EventReceiver, EventSender, QueueError};
pub use registry::{OpenedStream, StreamLease, StreamRegistry};
pub use relay::{ConversationRelay, RelaySettings};
pub use routing::RoutingTable;
pub use upstream::{Attachment, ChatRequest, ChatService, DifyClient, LineStream};
