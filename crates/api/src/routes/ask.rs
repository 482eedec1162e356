use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use repair_qa_common::ConversationId;
use repair_qa_relay::Attachment;
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::routes::{parse_json_value, read_body};
use crate::server::AppState;
use crate::types::{invalid_history, invalid_top_k, ApiError, AskFields, AskQuestionRequest, ErrorResponse};

/// Response header carrying the id of the opened stream
pub const STREAM_ID_HEADER: &str = "x-stream-id";

/// Ask a question and stream the answer
///
/// Accepts `application/json` or `multipart/form-data`. The multipart form
/// carries the same fields as the JSON body, with `history` as a JSON-encoded
/// string, plus an optional `image` file that is uploaded upstream first.
///
/// The response is `text/event-stream`. Every frame is
/// `data: {"type": <kind>, "text": <payload>}` and the stream ends with
/// `data: [DONE]`. The `x-stream-id` header names the stream so that
/// `/query-to-image` and `/keywords-to-graph` can target it.
#[utoipa::path(
    post,
    path = "/api/qa/ask",
    tag = "qa",
    request_body(
        content = AskQuestionRequest,
        description = "JSON body; multipart/form-data with the same fields plus `image` is also accepted"
    ),
    responses(
        (status = 200, description = "SSE stream of answer fragments", content_type = "text/event-stream", body = String),
        (status = 400, description = "Unreadable JSON or multipart body", body = ErrorResponse),
        (status = 422, description = "Missing or invalid field", body = ErrorResponse)
    )
)]
#[instrument(skip(state, request))]
pub async fn ask_question(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().starts_with("application/json"))
        .unwrap_or(false);

    let (fields, attachment) = if is_json {
        let limit = state.config.server.max_body_bytes;
        (extract_json_fields(request, limit).await?, None)
    } else {
        extract_multipart_fields(request, &state).await?
    };

    let conversation = fields.into_request()?;
    info!(
        question_length = conversation.question.chars().count(),
        conversation_id = ?conversation.conversation_id,
        top_k = conversation.top_k,
        history_len = conversation.history.len(),
        has_image = attachment.is_some(),
        "Question accepted"
    );

    let emitter = state.relay.open(conversation, attachment).await;
    let stream_id = emitter.stream_id();

    let mut response = emitter.into_sse().into_response();
    if let Ok(value) = HeaderValue::from_str(&stream_id.to_string()) {
        response.headers_mut().insert(STREAM_ID_HEADER, value);
    }
    Ok(response)
}

/// Normalize a JSON `/ask` body
pub async fn extract_json_fields(request: Request, limit: usize) -> Result<AskFields, ApiError> {
    let body = read_body(request.into_body(), limit).await?;
    let value = parse_json_value(&body)?;
    ask_fields_from_value(value)
}

/// Field-level validation of a parsed JSON body
pub fn ask_fields_from_value(value: Value) -> Result<AskFields, ApiError> {
    if !value.is_object() {
        return Err(ErrorResponse::reject(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_REQUEST_STRUCTURE",
            "Request body must be a JSON object.",
        ));
    }

    match value.get("question") {
        None | Some(Value::Null) => {
            error!("Missing required field: 'question'");
            return Err(ErrorResponse::reject(
                StatusCode::UNPROCESSABLE_ENTITY,
                "MISSING_FIELD_QUESTION",
                "Missing required field 'question'.",
            ));
        }
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(ErrorResponse::reject(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_FIELD_QUESTION_TYPE",
                "Field 'question' must be a string.",
            ));
        }
    }

    match value.get("top_k") {
        None | Some(Value::Null) => {}
        Some(top_k) if top_k.as_u64().is_some_and(|k| k >= 1) => {}
        Some(_) => return Err(invalid_top_k()),
    }

    match value.get("history") {
        None | Some(Value::Null) | Some(Value::Array(_)) => {}
        Some(_) => return Err(invalid_history()),
    }

    match value.get("conversation_id") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(id) if id.is_i64() => {}
        Some(_) => {
            return Err(ErrorResponse::reject(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_FIELD_CONVERSATION_ID",
                "Field 'conversation_id' must be a string or an integer.",
            ));
        }
    }

    let mut value = value;
    if let Some(map) = value.as_object_mut() {
        // explicit nulls behave like absent fields
        map.retain(|_, v| !v.is_null());
    }

    let body: AskQuestionRequest = serde_json::from_value(value).map_err(|e| {
        ErrorResponse::reject(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_REQUEST_STRUCTURE",
            format!("Invalid request structure: {}", e),
        )
    })?;
    Ok(AskFields::from(body))
}

fn multipart_error(e: impl std::fmt::Display) -> ApiError {
    error!(error = %e, "Failed to read multipart body");
    ErrorResponse::reject(
        StatusCode::BAD_REQUEST,
        "MULTIPART_PARSE_ERROR",
        format!("Invalid multipart body: {}", e),
    )
}

/// Normalize a multipart `/ask` body, separating the optional image
pub async fn extract_multipart_fields<S: Send + Sync>(
    request: Request,
    state: &S,
) -> Result<(AskFields, Option<Attachment>), ApiError> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| multipart_error(e.body_text()))?;

    let mut fields = AskFields::default();
    let mut attachment = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            if bytes.is_empty() {
                debug!("Empty image part ignored");
                continue;
            }
            attachment = Some(Attachment {
                file_name: file_name.unwrap_or_else(|| "image".to_string()),
                content_type,
                bytes,
            });
            continue;
        }

        let text = field.text().await.map_err(multipart_error)?;
        let trimmed = text.trim();
        match name.as_str() {
            "question" => fields.question = Some(text),
            "conversation_id" => fields.conversation_id = ConversationId::parse(&text),
            "top_k" if !trimmed.is_empty() => {
                fields.top_k = Some(trimmed.parse::<usize>().map_err(|_| invalid_top_k())?);
            }
            "history" if !trimmed.is_empty() => {
                fields.history = serde_json::from_str::<Vec<Value>>(trimmed).map_err(|_| invalid_history())?;
            }
            "top_k" | "history" => {}
            other => debug!(field = other, "Ignoring form field"),
        }
    }

    Ok((fields, attachment))
}
