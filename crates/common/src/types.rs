use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{QaError, Result};

/// Retrieval breadth used when a request does not carry `top_k`
pub const DEFAULT_TOP_K: usize = 5;

/// Unique identifier for conversations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Client-supplied id, trimmed; blank input means no conversation
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one open SSE stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| QaError::InvalidRequest(format!("invalid stream id '{}': {}", s, e)))
    }
}

/// File reference returned by the upstream upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadedFileId(pub String);

impl fmt::Display for UploadedFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Semantic category of a streamed fragment.
///
/// Channel names produced by the routing table that are not part of the known
/// set are kept as `Unknown` so the emitter can drop them instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Think,
    PlainText,
    Graph,
    Table,
    Images,
    Echarts,
    Error,
    End,
    Unknown(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Think => "think",
            Self::PlainText => "plain_text",
            Self::Graph => "graph",
            Self::Table => "table",
            Self::Images => "images",
            Self::Echarts => "echarts",
            Self::Error => "error",
            Self::End => "end",
            Self::Unknown(name) => name,
        }
    }

    /// Kinds that reach the client as a `data:` frame
    pub fn is_forwardable(&self) -> bool {
        !matches!(self, Self::End | Self::Unknown(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "think" => Self::Think,
            "plain_text" => Self::PlainText,
            "graph" => Self::Graph,
            "table" => Self::Table,
            "images" => Self::Images,
            "echarts" => Self::Echarts,
            "error" => Self::Error,
            "end" => Self::End,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}

/// Body of a streamed fragment; serialized untagged into the `text` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Free text, or a JSON-encoded chart specification
    Text(String),
    /// Image references (URLs)
    Images(Vec<String>),
}

impl Default for Payload {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// Unit of communication between the upstream adapter and the SSE emitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEvent {
    pub kind: EventKind,
    pub payload: Payload,
}

impl QueueEvent {
    pub fn new(kind: EventKind, payload: Payload) -> Self {
        Self { kind, payload }
    }

    pub fn text(kind: EventKind, text: impl Into<String>) -> Self {
        Self::new(kind, Payload::Text(text.into()))
    }

    pub fn images(urls: Vec<String>) -> Self {
        Self::new(EventKind::Images, Payload::Images(urls))
    }

    /// Chart fragment carrying a JSON-encoded chart option
    pub fn chart(spec: impl Into<String>) -> Self {
        Self::text(EventKind::Echarts, spec)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::text(EventKind::Error, message)
    }

    /// The stream sentinel
    pub fn end() -> Self {
        Self::new(EventKind::End, Payload::default())
    }

    pub fn is_end(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Canonical form of an inbound question, shared by the JSON and multipart
/// request shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationRequest {
    pub question: String,
    pub conversation_id: Option<ConversationId>,
    pub top_k: usize,
    pub history: Vec<serde_json::Value>,
    pub image: Option<UploadedFileId>,
}

impl ConversationRequest {
    /// Create a request, rejecting blank questions
    pub fn new(question: impl Into<String>) -> Result<Self> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(QaError::InvalidRequest("question cannot be empty".to_string()));
        }
        Ok(Self {
            question,
            conversation_id: None,
            top_k: DEFAULT_TOP_K,
            history: Vec::new(),
            image: None,
        })
    }

    pub fn with_conversation_id(mut self, conversation_id: Option<ConversationId>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(QaError::InvalidRequest("top_k must be at least 1".to_string()));
        }
        self.top_k = top_k;
        Ok(self)
    }

    pub fn with_history(mut self, history: Vec<serde_json::Value>) -> Self {
        self.history = history;
        self
    }

    pub fn with_image(mut self, image: UploadedFileId) -> Self {
        self.image = Some(image);
        self
    }
}

/// Subject/relation/object record of the knowledge graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Triple {
    pub head: String,
    pub relation: String,
    pub tail: String,
}

impl Triple {
    pub fn new(head: impl Into<String>, relation: impl Into<String>, tail: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            relation: relation.into(),
            tail: tail.into(),
        }
    }

    /// Whether the keyword occurs in the head or tail entity
    pub fn mentions(&self, keyword: &str) -> bool {
        self.head.contains(keyword) || self.tail.contains(keyword)
    }
}

/// Ranked result of an image similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    pub path: PathBuf,
    pub score: f32,
}

impl ImageMatch {
    pub fn new(path: impl Into<PathBuf>, score: f32) -> Self {
        Self {
            path: path.into(),
            score,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
