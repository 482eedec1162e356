//! OpenAPI document for the Q&A relay, generated with utoipa

use crate::types::*;

#[derive(utoipa::OpenApi)]
#[openapi(
    info(
        title = "Repair Q&A Relay API",
        description = "
Streaming question answering for equipment repair.

1. **POST** `/api/qa/ask` opens a `text/event-stream`. Frames are
   `data: {\"type\": <kind>, \"text\": <payload>}` and the stream ends with `data: [DONE]`.
   The `x-stream-id` response header names the stream.
2. While the stream is open, **POST** `/api/qa/query-to-image` and
   **POST** `/api/qa/keywords-to-graph` push `images` and `echarts` fragments into it.
   Without `stream_id` they target the most recently opened stream.
3. Image URLs point at **GET** `/api/qa/images/{file}`.
        ",
        version = "0.1.0"
    ),
    paths(
        crate::routes::ask::ask_question,
        crate::routes::images::query_to_image,
        crate::routes::graph::keywords_to_graph,
        crate::routes::health::health_check
    ),
    components(schemas(
        AskQuestionRequest,
        ConversationIdInput,
        QueryToImageRequest,
        KeywordsRequest,
        TriplesResponse,
        HealthResponse,
        ErrorResponse,
        repair_qa_common::Triple
    )),
    tags(
        (name = "qa", description = "Question answering and auxiliary pushes"),
        (name = "health", description = "System health and status")
    )
)]
pub struct ApiDoc;
