//! Client side of the external chat service.

use std::pin::Pin;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use repair_qa_common::{StreamId, UpstreamConfig, UploadedFileId};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

use crate::error::{RelayError, Result};
use crate::protocol::LineDecoder;

/// Raw protocol lines of one chat run
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Image received with a question, forwarded to the upstream file store
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Inputs of one upstream chat run
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub query: String,
    pub history: Vec<Value>,
    pub user: String,
    pub base_city: String,
    pub top_k: usize,
    pub stream_id: StreamId,
    pub file_id: Option<UploadedFileId>,
}

impl ChatRequest {
    /// JSON body of `POST /chat-messages`
    pub fn to_body(&self) -> Result<Value> {
        let files: Vec<Value> = self
            .file_id
            .iter()
            .map(|id| {
                json!({
                    "type": "image",
                    "transfer_method": "local_file",
                    "upload_file_id": id.0,
                })
            })
            .collect();

        Ok(json!({
            "inputs": {
                "chat_histories": serde_json::to_string(&self.history)?,
                "base_city": self.base_city,
                "top_k": self.top_k,
                "stream_id": self.stream_id.to_string(),
            },
            "query": self.query,
            "response_mode": "streaming",
            "user": self.user,
            "files": files,
        }))
    }
}

#[async_trait]
pub trait ChatService: Send + Sync {
    /// Store an attachment upstream and return its file id
    async fn upload_file(&self, attachment: Attachment, user: &str) -> Result<UploadedFileId>;

    /// Start a streaming run and return its protocol lines
    async fn stream_chat(&self, request: &ChatRequest) -> Result<LineStream>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// Dify `chat-messages` client
#[derive(Debug, Clone)]
pub struct DifyClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl DifyClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        info!(base_url = %config.base_url, "Chat service client ready");
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ChatService for DifyClient {
    #[instrument(skip(self, attachment), fields(file_name = %attachment.file_name, size = attachment.bytes.len()))]
    async fn upload_file(&self, attachment: Attachment, user: &str) -> Result<UploadedFileId> {
        let mut part = Part::bytes(attachment.bytes.to_vec()).file_name(attachment.file_name);
        if let Some(content_type) = attachment.content_type.as_deref() {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new().part("file", part).text("user", user.to_string());

        let response = self
            .client
            .post(self.url("files/upload"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "File upload rejected");
            return Err(RelayError::Upload(format!("status {}: {}", status.as_u16(), body)));
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Upload(format!("unreadable upload response: {}", e)))?;
        debug!(file_id = %uploaded.id, "File uploaded");
        Ok(UploadedFileId(uploaded.id))
    }

    #[instrument(skip(self, request), fields(stream_id = %request.stream_id, has_file = request.file_id.is_some()))]
    async fn stream_chat(&self, request: &ChatRequest) -> Result<LineStream> {
        let body = request.to_body()?;
        let response = self
            .client
            .post(self.url("chat-messages"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut chunks = Box::pin(response.bytes_stream());
        let lines = stream! {
            let mut decoder = LineDecoder::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => {
                        for line in decoder.push(&chunk) {
                            yield Ok::<String, RelayError>(line);
                        }
                    }
                    Err(e) => {
                        yield Err(RelayError::from(e));
                        return;
                    }
                }
            }
            if let Some(line) = decoder.finish() {
                yield Ok(line);
            }
        };

        Ok(Box::pin(lines))
    }
}
