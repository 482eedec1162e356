use std::sync::Arc;
use std::time::Duration;

use repair_qa_common::{ConversationRequest, QueueEvent, StreamId, SystemConfig};
use tracing::{error, info, instrument, warn};

use crate::adapter::StreamAdapter;
use crate::emitter::SseEmitter;
use crate::registry::StreamRegistry;
use crate::routing::RoutingTable;
use crate::upstream::{Attachment, ChatRequest, ChatService};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub user: String,
    pub base_city: String,
    pub surface_errors: bool,
    pub stream_idle_timeout: Option<Duration>,
    pub upstream_idle_timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            user: config.upstream.user.clone(),
            base_city: config.upstream.base_city.clone(),
            surface_errors: config.stream.surface_errors,
            stream_idle_timeout: config.stream.idle_timeout(),
            upstream_idle_timeout: config.upstream.idle_timeout(),
        }
    }
}

/// Opens conversation streams and runs their upstream adapters.
pub struct ConversationRelay {
    chat: Arc<dyn ChatService>,
    routing: Arc<RoutingTable>,
    registry: Arc<StreamRegistry>,
    settings: RelaySettings,
}

impl ConversationRelay {
    pub fn new(chat: Arc<dyn ChatService>, routing: Arc<RoutingTable>, settings: RelaySettings) -> Self {
        Self {
            chat,
            routing,
            registry: Arc::new(StreamRegistry::new()),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Open a stream for `request`.
    ///
    /// The attachment, if any, is uploaded before the adapter starts. The
    /// adapter runs on its own task and is cancelled when the returned emitter
    /// is dropped.
    #[instrument(skip(self, request, attachment), fields(conversation_id = ?request.conversation_id, top_k = request.top_k))]
    pub async fn open(&self, request: ConversationRequest, attachment: Option<Attachment>) -> SseEmitter {
        let opened = self.registry.open(request.conversation_id.clone());
        let stream_id = opened.lease.id();

        let mut request = request;
        if let Some(attachment) = attachment {
            match self.chat.upload_file(attachment, &self.settings.user).await {
                Ok(file_id) => request = request.with_image(file_id),
                Err(e) => {
                    error!(stream_id = %stream_id, error = %e, "Attachment upload failed, closing stream");
                    if self.settings.surface_errors {
                        opened.sender.put(QueueEvent::error(e.to_string()));
                    }
                    opened.sender.put(QueueEvent::end());
                    return SseEmitter::new(opened.receiver, opened.lease, self.settings.stream_idle_timeout);
                }
            }
        }

        let chat_request = ChatRequest {
            query: request.question,
            history: request.history,
            user: self.settings.user.clone(),
            base_city: self.settings.base_city.clone(),
            top_k: request.top_k,
            stream_id,
            file_id: request.image,
        };

        let adapter = StreamAdapter::new(
            Arc::clone(&self.chat),
            Arc::clone(&self.routing),
            self.settings.upstream_idle_timeout,
            self.settings.surface_errors,
        );
        let sink = opened.sender;
        let cancel = opened.lease.cancel_token();
        tokio::spawn(async move {
            adapter.run(chat_request, sink, cancel).await;
        });

        info!(stream_id = %stream_id, "Upstream run started");
        SseEmitter::new(opened.receiver, opened.lease, self.settings.stream_idle_timeout)
    }

    /// Push a fragment produced outside the adapter into an open stream
    pub fn publish(&self, target: Option<StreamId>, event: QueueEvent) -> Option<StreamId> {
        let kind = event.kind.clone();
        let delivered = self.registry.publish(target, event);
        match delivered {
            Some(id) => info!(stream_id = %id, kind = %kind, "Published auxiliary fragment"),
            None => warn!(requested = ?target, kind = %kind, "No open stream, fragment skipped"),
        }
        delivered
    }
}
