use axum::{body::Body, extract::State, http::StatusCode};
use repair_qa_common::{ImageMatch, QueueEvent};
use tracing::{error, info, instrument};

use crate::routes::{extract_json, parse_stream_id};
use crate::server::AppState;
use crate::types::{ApiError, ErrorResponse, QueryToImageRequest};

/// Push images similar to the question into an open stream
///
/// Matches scoring below the configured threshold are dropped. When no
/// stream is open the push is skipped and the request still succeeds.
#[utoipa::path(
    post,
    path = "/api/qa/query-to-image",
    tag = "qa",
    request_body = QueryToImageRequest,
    responses(
        (status = 204, description = "Matches pushed (or nothing to push)"),
        (status = 400, description = "Invalid JSON", body = ErrorResponse),
        (status = 422, description = "Invalid request structure", body = ErrorResponse),
        (status = 502, description = "Embedding service failed", body = ErrorResponse)
    )
)]
#[instrument(skip(state, body))]
pub async fn query_to_image(State(state): State<AppState>, body: Body) -> Result<StatusCode, ApiError> {
    let request: QueryToImageRequest = extract_json(body, state.config.server.max_body_bytes).await?;
    let target = parse_stream_id(request.stream_id.as_deref())?;

    let matches = state
        .image_searcher
        .search(&request.questions, state.config.images.top_k)
        .await
        .map_err(|e| {
            error!(error = %e, "Image search failed");
            ErrorResponse::reject(StatusCode::BAD_GATEWAY, "IMAGE_SEARCH_FAILED", e.to_string())
        })?;

    let urls = accepted_urls(&matches, state.config.images.score_threshold, &state.config.images.base_url);
    info!(candidates = matches.len(), accepted = urls.len(), "Image search finished");

    for url in urls {
        state.relay.publish(target, QueueEvent::images(vec![url]));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// URLs of the matches at or above `threshold`, best first
pub fn accepted_urls(matches: &[ImageMatch], threshold: f32, base_url: &str) -> Vec<String> {
    matches
        .iter()
        .filter(|m| m.score >= threshold)
        .filter_map(|m| m.file_name().map(|name| format!("{}{}", base_url, name)))
        .collect()
}
