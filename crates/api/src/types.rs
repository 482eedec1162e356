//! Type definitions for the Q&A API

use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use repair_qa_common::{ConversationId, ConversationRequest, Triple};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Rejection returned by handlers
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Conversation id as sent by clients, either a string or an integer
#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ConversationIdInput {
    Number(i64),
    Text(String),
}

impl ConversationIdInput {
    /// Same normalization as the multipart form field
    pub fn into_id(self) -> Option<ConversationId> {
        match self {
            ConversationIdInput::Number(n) => ConversationId::parse(&n.to_string()),
            ConversationIdInput::Text(s) => ConversationId::parse(&s),
        }
    }
}

/// JSON body of `POST /ask`. The multipart form carries the same fields plus `image`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AskQuestionRequest {
    /// The question to answer
    pub question: String,

    /// Optional conversation id (string or integer)
    #[serde(default)]
    pub conversation_id: Option<ConversationIdInput>,

    /// Retrieval breadth, defaults to 5
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Prior turns, passed through to the upstream service
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<Value>,
}

/// Body of `POST /query-to-image`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct QueryToImageRequest {
    /// Query rewrites; their embeddings are averaged
    pub questions: Vec<String>,

    /// Stream to push matches into; defaults to the latest open stream
    #[serde(default)]
    pub stream_id: Option<String>,
}

/// Body of `POST /keywords-to-graph`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct KeywordsRequest {
    pub keywords: Vec<String>,

    /// Chart title
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub stream_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriplesResponse {
    /// Matching triples without duplicates
    pub triples: Vec<Triple>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Health status
    pub status: String,

    /// Optional additional information
    pub message: Option<String>,

    /// Number of open SSE streams
    pub active_streams: usize,

    /// Timestamp of health check
    pub timestamp: DateTime<Utc>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    pub code: Option<String>,

    /// Timestamp of error
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn reject(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
        (
            status,
            Json(Self {
                error: error.into(),
                code: Some(code.to_string()),
                timestamp: Utc::now(),
            }),
        )
    }
}

/// Raw `/ask` fields before validation, shared by the JSON and multipart paths
#[derive(Debug, Default)]
pub struct AskFields {
    pub question: Option<String>,
    pub conversation_id: Option<ConversationId>,
    pub top_k: Option<usize>,
    pub history: Vec<Value>,
}

impl AskFields {
    /// Build the canonical request
    pub fn into_request(self) -> Result<ConversationRequest, ApiError> {
        let Some(question) = self.question else {
            return Err(ErrorResponse::reject(
                StatusCode::UNPROCESSABLE_ENTITY,
                "MISSING_FIELD_QUESTION",
                "Missing required field 'question'.",
            ));
        };

        let request = ConversationRequest::new(question).map_err(|_| {
            ErrorResponse::reject(
                StatusCode::UNPROCESSABLE_ENTITY,
                "EMPTY_QUESTION",
                "Question cannot be empty.",
            )
        })?;

        let request = match self.top_k {
            Some(top_k) => request.with_top_k(top_k).map_err(|_| invalid_top_k())?,
            None => request,
        };

        Ok(request
            .with_conversation_id(self.conversation_id)
            .with_history(self.history))
    }
}

impl From<AskQuestionRequest> for AskFields {
    fn from(body: AskQuestionRequest) -> Self {
        Self {
            question: Some(body.question),
            conversation_id: body.conversation_id.and_then(ConversationIdInput::into_id),
            top_k: body.top_k,
            history: body.history,
        }
    }
}

pub fn invalid_top_k() -> ApiError {
    ErrorResponse::reject(
        StatusCode::UNPROCESSABLE_ENTITY,
        "INVALID_FIELD_TOP_K",
        "Field 'top_k' must be a positive integer.",
    )
}

pub fn invalid_history() -> ApiError {
    ErrorResponse::reject(
        StatusCode::UNPROCESSABLE_ENTITY,
        "INVALID_FIELD_HISTORY",
        "Field 'history' must be a JSON array.",
    )
}
