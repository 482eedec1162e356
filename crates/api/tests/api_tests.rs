use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::stream;
use repair_qa_api::{build_router, AppState, TriplesResponse};
use repair_qa_common::{ConversationId, EventKind, ImageMatch, Payload, StreamId, SystemConfig, Triple, UploadedFileId};
use repair_qa_knowledge::{ImageSearcher, KnowledgeGraph};
use repair_qa_relay::{Attachment, ChatRequest, ChatService, LineStream, QueueError, Result, RoutingTable};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const ROUTES: &str = r#"{"messages": {"plain_text": ["n_text"], "think": ["n_think"]}}"#;
const BOUNDARY: &str = "qa-test-boundary";

/// Chat service answering every question with the same two fragments
#[derive(Default)]
struct CannedChat {
    chat_calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

#[async_trait]
impl ChatService for CannedChat {
    async fn upload_file(&self, attachment: Attachment, _user: &str) -> Result<UploadedFileId> {
        Ok(UploadedFileId(format!("file-{}", attachment.file_name)))
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<LineStream> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let lines = vec![
            Ok(format!(
                "data: {}",
                json!({"event": "message", "answer": "检查天线", "from_variable_selector": ["n_text", "text"]})
            )),
            Ok(r#"data: {"event": "message_end"}"#.to_string()),
        ];
        Ok(Box::pin(stream::iter(lines)))
    }
}

struct FixedImages(Vec<ImageMatch>);

#[async_trait]
impl ImageSearcher for FixedImages {
    async fn search(&self, _queries: &[String], top_k: usize) -> repair_qa_common::Result<Vec<ImageMatch>> {
        Ok(self.0.iter().take(top_k).cloned().collect())
    }
}

struct Harness {
    router: Router,
    state: AppState,
    chat: Arc<CannedChat>,
    _static_dir: TempDir,
}

fn harness_with(images: Vec<ImageMatch>, api_key: Option<&str>) -> Harness {
    let static_dir = TempDir::new().unwrap();
    fs::write(static_dir.path().join("GSMR呼叫.png"), b"png-bytes").unwrap();

    let toml = format!(
        r#"
[upstream]
base_url = "http://localhost:5001/v1"

[images]
static_dir = '{}'
base_url = "http://localhost:8000/api/qa/images/"
cache_path = '{}'

[knowledge]
triples_path = "/unused/triples.txt"
"#,
        static_dir.path().display(),
        static_dir.path().join("cache.json").display()
    );
    let mut config = SystemConfig::from_toml_str(&toml).unwrap();
    config.server.api_key = api_key.map(str::to_string);

    let graph = KnowledgeGraph::from_triples(vec![
        Triple::new("CIR", "包含", "MMI"),
        Triple::new("CIR", "连接", "天线"),
        Triple::new("天线", "连接", "CIR"),
        Triple::new("GSM-R", "承载", "语音"),
    ]);

    let chat = Arc::new(CannedChat::default());
    let state = AppState::new(
        chat.clone(),
        Arc::new(RoutingTable::from_json_str(ROUTES).unwrap()),
        Arc::new(FixedImages(images)),
        graph,
        config,
    );

    Harness {
        router: build_router(state.clone()),
        state,
        chat,
        _static_dir: static_dir,
    }
}

fn harness() -> Harness {
    harness_with(Vec::new(), None)
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/qa/ask")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn error_code(response: axum::response::Response) -> String {
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    body["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_ask_streams_fragments_then_done() {
    let h = harness();
    let response = h
        .router
        .clone()
        .oneshot(json_request("/api/qa/ask", json!({"question": "CIR注册失败怎么办"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));
    let stream_id = response.headers()["x-stream-id"].to_str().unwrap().to_string();
    assert!(stream_id.parse::<StreamId>().is_ok());

    let body = body_text(response).await;
    assert_eq!(
        body,
        "data: {\"type\":\"plain_text\",\"text\":\"检查天线\"}\n\ndata: [DONE]\n\n"
    );

    let requests = h.chat.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].query, "CIR注册失败怎么办");
    assert_eq!(requests[0].top_k, 5);
    assert_eq!(requests[0].stream_id.to_string(), stream_id);
}

#[tokio::test]
async fn test_ask_rejects_invalid_json_before_streaming() {
    let h = harness();

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/qa/ask")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"question\": "))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "JSON_PARSE_ERROR");

    let response = h
        .router
        .clone()
        .oneshot(json_request("/api/qa/ask", json!({"history": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(response).await, "MISSING_FIELD_QUESTION");

    let response = h
        .router
        .clone()
        .oneshot(json_request("/api/qa/ask", json!({"question": "q", "top_k": -1})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(response).await, "INVALID_FIELD_TOP_K");

    assert_eq!(h.chat.chat_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.state.relay.registry().active_count(), 0);
}

#[tokio::test]
async fn test_json_and_multipart_requests_are_equivalent() {
    let h = harness();
    let history = json!([{"role": "user", "content": "之前的问题"}]);
    let expected_conversation = Some(ConversationId::from_string("7".to_string()));

    let mut bodies = Vec::new();
    for conversation_id in [json!(" 7 "), json!(7)] {
        let response = h
            .router
            .clone()
            .oneshot(json_request(
                "/api/qa/ask",
                json!({"question": "天线故障", "conversation_id": conversation_id, "top_k": 3, "history": history}),
            ))
            .await
            .unwrap();
        // the stream stays registered until its body is consumed
        let stream_id: StreamId = response.headers()["x-stream-id"].to_str().unwrap().parse().unwrap();
        assert_eq!(h.state.relay.registry().conversation_of(&stream_id), expected_conversation);
        bodies.push(body_text(response).await);
    }

    let form = multipart_body(
        &[
            ("question", "天线故障"),
            ("conversation_id", " 7 "),
            ("top_k", "3"),
            ("history", &history.to_string()),
        ],
        None,
    );
    let multipart_response = h.router.clone().oneshot(multipart_request(form)).await.unwrap();
    assert_eq!(multipart_response.status(), StatusCode::OK);
    let stream_id: StreamId = multipart_response.headers()["x-stream-id"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(h.state.relay.registry().conversation_of(&stream_id), expected_conversation);
    let multipart_body = body_text(multipart_response).await;

    assert_eq!(bodies[0], multipart_body);
    assert_eq!(bodies[1], multipart_body);

    let requests = h.chat.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    for request in requests.iter().skip(1) {
        assert_eq!(request.query, requests[0].query);
        assert_eq!(request.top_k, requests[0].top_k);
        assert_eq!(request.history, requests[0].history);
        assert_eq!(request.file_id, None);
    }
}

#[tokio::test]
async fn test_multipart_image_is_uploaded_and_referenced() {
    let h = harness();
    let form = multipart_body(&[("question", "这个指示灯什么意思")], Some(("panel.png", b"\x89PNG")));

    let response = h.router.clone().oneshot(multipart_request(form)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await;

    let requests = h.chat.requests.lock().unwrap();
    assert_eq!(requests[0].file_id, Some(UploadedFileId("file-panel.png".to_string())));
}

#[tokio::test]
async fn test_multipart_invalid_fields() {
    let h = harness();

    let response = h
        .router
        .clone()
        .oneshot(multipart_request(multipart_body(&[("question", "q"), ("top_k", "many")], None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(response).await, "INVALID_FIELD_TOP_K");

    let response = h
        .router
        .clone()
        .oneshot(multipart_request(multipart_body(&[("question", "q"), ("history", "{not json")], None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(response).await, "INVALID_FIELD_HISTORY");

    let response = h
        .router
        .clone()
        .oneshot(multipart_request(multipart_body(&[("top_k", "2")], None)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(response).await, "MISSING_FIELD_QUESTION");

    assert_eq!(h.chat.chat_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_to_image_pushes_matches_above_threshold() {
    let h = harness_with(
        vec![
            ImageMatch::new("/srv/images/GSMR呼叫.png", 0.81),
            ImageMatch::new("/srv/images/天线.jpg", 0.52),
        ],
        None,
    );
    let mut opened = h.state.relay.registry().open(None);

    let response = h
        .router
        .clone()
        .oneshot(json_request("/api/qa/query-to-image", json!({"questions": ["GSMR呼叫失败"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let first = opened.receiver.get(Duration::from_millis(200)).await.unwrap();
    let second = opened.receiver.get(Duration::from_millis(200)).await.unwrap();
    assert_eq!(first.kind, EventKind::Images);
    assert_eq!(
        first.payload,
        Payload::Images(vec!["http://localhost:8000/api/qa/images/GSMR呼叫.png".to_string()])
    );
    assert_eq!(
        second.payload,
        Payload::Images(vec!["http://localhost:8000/api/qa/images/天线.jpg".to_string()])
    );
}

#[tokio::test]
async fn test_query_to_image_low_scores_push_nothing() {
    let h = harness_with(
        vec![
            ImageMatch::new("/srv/images/a.png", 0.35),
            ImageMatch::new("/srv/images/b.png", 0.2),
        ],
        None,
    );
    let mut opened = h.state.relay.registry().open(None);

    let response = h
        .router
        .clone()
        .oneshot(json_request("/api/qa/query-to-image", json!({"questions": ["天气怎么样"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(
        opened.receiver.get(Duration::from_millis(100)).await,
        Err(QueueError::Timeout)
    );
}

#[tokio::test]
async fn test_query_to_image_without_open_stream_still_succeeds() {
    let h = harness_with(vec![ImageMatch::new("/srv/images/a.png", 0.9)], None);

    let response = h
        .router
        .clone()
        .oneshot(json_request("/api/qa/query-to-image", json!({"questions": ["q"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_explicit_stream_id_targets_only_that_stream() {
    let h = harness_with(vec![ImageMatch::new("/srv/images/a.png", 0.9)], None);
    let mut older = h.state.relay.registry().open(None);
    let mut newer = h.state.relay.registry().open(None);

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "/api/qa/query-to-image",
            json!({"questions": ["q"], "stream_id": older.lease.id().to_string()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(
        older.receiver.get(Duration::from_millis(200)).await.unwrap().kind,
        EventKind::Images
    );
    assert_eq!(
        newer.receiver.get(Duration::from_millis(100)).await,
        Err(QueueError::Timeout)
    );

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "/api/qa/query-to-image",
            json!({"questions": ["q"], "stream_id": "not-a-uuid"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(response).await, "INVALID_FIELD_STREAM_ID");
}

#[tokio::test]
async fn test_keywords_to_graph_pushes_chart_and_returns_unique_triples() {
    let h = harness();
    let mut opened = h.state.relay.registry().open(None);

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "/api/qa/keywords-to-graph",
            json!({"keywords": ["CIR", "天线"], "title": "CIR"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: TriplesResponse = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body.triples,
        vec![
            Triple::new("CIR", "包含", "MMI"),
            Triple::new("CIR", "连接", "天线"),
            Triple::new("天线", "连接", "CIR"),
        ]
    );

    let event = opened.receiver.get(Duration::from_millis(200)).await.unwrap();
    assert_eq!(event.kind, EventKind::Echarts);
    let Payload::Text(chart) = event.payload else {
        panic!("chart should be a text payload");
    };
    let chart: Value = serde_json::from_str(&chart).unwrap();
    assert_eq!(chart["title"][0]["text"], "CIR");
    // three CIR matches plus two 天线 matches, duplicates kept in the chart
    assert_eq!(chart["series"][0]["links"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_static_images_are_served() {
    let h = harness();

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/qa/images/GSMR%E5%91%BC%E5%8F%AB.png")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "png-bytes");

    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/api/qa/images/missing.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_active_streams() {
    let h = harness();
    let _opened = h.state.relay.registry().open(None);

    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_streams"], 1);
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let h = harness_with(Vec::new(), Some("s3cret"));

    let response = h
        .router
        .clone()
        .oneshot(json_request("/api/qa/keywords-to-graph", json!({"keywords": ["CIR"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(error_code(response).await, "UNAUTHORIZED");

    let mut request = json_request("/api/qa/keywords-to-graph", json!({"keywords": ["CIR"]}));
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut request = json_request("/api/qa/keywords-to-graph", json!({"keywords": ["CIR"]}));
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "bearer s3cret".parse().unwrap());
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/qa/images/GSMR%E5%91%BC%E5%8F%AB.png")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let h = harness();
    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/api-doc/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(doc["paths"]["/api/qa/ask"].is_object());
}
