pub mod ask;
pub mod graph;
pub mod health;
pub mod images;

use axum::body::Body;
use axum::http::StatusCode;
use repair_qa_common::StreamId;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::types::{ApiError, ErrorResponse};

/// Read a request body, rejecting it when larger than `limit`
pub(crate) async fn read_body(body: Body, limit: usize) -> Result<bytes::Bytes, ApiError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        error!(error = %e, "Failed to read request body");
        ErrorResponse::reject(
            StatusCode::BAD_REQUEST,
            "BODY_READ_ERROR",
            format!("Failed to read request body: {}", e),
        )
    })
}

/// Parse bytes as JSON, reporting the position of syntax errors
pub(crate) fn parse_json_value(body: &[u8]) -> Result<Value, ApiError> {
    serde_json::from_slice::<Value>(body).map_err(|e| {
        error!(error = %e, line = e.line(), column = e.column(), "JSON parsing failed");
        ErrorResponse::reject(
            StatusCode::BAD_REQUEST,
            "JSON_PARSE_ERROR",
            format!("Invalid JSON at line {}, column {}: {}", e.line(), e.column(), e),
        )
    })
}

/// Read and deserialize a JSON body into `T`
pub(crate) async fn extract_json<T: DeserializeOwned>(body: Body, limit: usize) -> Result<T, ApiError> {
    let bytes = read_body(body, limit).await?;
    let value = parse_json_value(&bytes)?;
    debug!(body_size = bytes.len(), "Request body parsed");

    serde_json::from_value(value).map_err(|e| {
        let message = if e.to_string().contains("missing field") {
            format!("Missing required field in request structure: {}", e)
        } else {
            format!("Invalid request structure: {}", e)
        };
        ErrorResponse::reject(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST_STRUCTURE", message)
    })
}

pub(crate) fn parse_stream_id(raw: Option<&str>) -> Result<Option<StreamId>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse::<StreamId>().map(Some).map_err(|e| {
            ErrorResponse::reject(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_FIELD_STREAM_ID", e.to_string())
        }),
    }
}
