use axum::{body::Body, extract::State, Json};
use repair_qa_common::QueueEvent;
use repair_qa_knowledge::build_chart;
use tracing::{info, instrument};

use crate::routes::{extract_json, parse_stream_id};
use crate::server::AppState;
use crate::types::{ApiError, ErrorResponse, KeywordsRequest, TriplesResponse};

/// Push a knowledge-graph chart for the keywords and return the matched triples
#[utoipa::path(
    post,
    path = "/api/qa/keywords-to-graph",
    tag = "qa",
    request_body = KeywordsRequest,
    responses(
        (status = 200, description = "Deduplicated triples", body = TriplesResponse),
        (status = 400, description = "Invalid JSON", body = ErrorResponse),
        (status = 422, description = "Invalid request structure", body = ErrorResponse)
    )
)]
#[instrument(skip(state, body))]
pub async fn keywords_to_graph(
    State(state): State<AppState>,
    body: Body,
) -> Result<Json<TriplesResponse>, ApiError> {
    let request: KeywordsRequest = extract_json(body, state.config.server.max_body_bytes).await?;
    let target = parse_stream_id(request.stream_id.as_deref())?;

    let lookup = state
        .graph
        .lookup(&request.keywords, state.config.knowledge.per_keyword_limit);
    info!(
        keywords = request.keywords.len(),
        chart_records = lookup.chart_records.len(),
        triples = lookup.triples.len(),
        "Keyword lookup finished"
    );

    let chart = build_chart(&lookup.chart_records, &request.title);
    state.relay.publish(target, QueueEvent::chart(chart.to_string()));

    Ok(Json(TriplesResponse { triples: lookup.triples }))
}
