//! # Repair Q&A Relay HTTP API
//!
//! axum server in front of the streaming chat relay.
//!
//! ```text
//! ┌──────────────────────────┐
//! │  /api/qa/ask (SSE)       │ <- JSON or multipart, optional image
//! ├──────────────────────────┤
//! │  /query-to-image         │ <- pushes `images` into an open stream
//! │  /keywords-to-graph      │ <- pushes `echarts` into an open stream
//! ├──────────────────────────┤
//! │  ConversationRelay       │ <- stream registry, upstream adapter
//! ├──────────────────────────┤
//! │  Chat service / embedder │
//! └──────────────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Request problems are answered before any stream opens, with an
//! [`ErrorResponse`] carrying a machine-readable `code`. Failures after the
//! stream opened only end the stream.

pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod types;

pub use server::{build_router, AppState, QaServer};
pub use types::*;
