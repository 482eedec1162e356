//! HTTP server wiring: shared state, router and serve loop

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Json, Router,
};
use repair_qa_common::SystemConfig;
use repair_qa_knowledge::{
    Embedder, EmbeddingImageSearcher, ImageSearcher, KnowledgeGraph, OpenAiEmbedder, SegmentingEmbedder,
};
use repair_qa_relay::{ChatService, ConversationRelay, DifyClient, RelaySettings, RoutingTable};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::info;
use utoipa::OpenApi;

use crate::middleware::{get_tracing_layer, logging_middleware, require_api_key, ApiKey};
use crate::openapi::ApiDoc;
use crate::routes::{ask, graph, health, images};

/// Collaborators shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ConversationRelay>,
    pub image_searcher: Arc<dyn ImageSearcher>,
    pub graph: Arc<KnowledgeGraph>,
    pub config: Arc<SystemConfig>,
}

impl AppState {
    pub fn new(
        chat: Arc<dyn ChatService>,
        routing: Arc<RoutingTable>,
        image_searcher: Arc<dyn ImageSearcher>,
        graph: KnowledgeGraph,
        config: SystemConfig,
    ) -> Self {
        let relay = ConversationRelay::new(chat, routing, RelaySettings::from_config(&config));
        Self {
            relay: Arc::new(relay),
            image_searcher,
            graph: Arc::new(graph),
            config: Arc::new(config),
        }
    }
}

pub struct QaServer {
    state: AppState,
}

impl QaServer {
    /// Build every collaborator from configuration
    ///
    /// Embeds images missing from the cache, so start-up may call the
    /// embedding service.
    pub async fn new(config: SystemConfig) -> Result<Self> {
        let chat = DifyClient::new(&config.upstream).context("failed to build upstream client")?;
        let routing = RoutingTable::from_config(&config.routing).context("failed to load routing table")?;
        info!(channels = ?routing.channels(), "Routing table loaded");

        let embedder: Arc<dyn Embedder> =
            Arc::new(OpenAiEmbedder::new(&config.embedding).context("failed to build embedding client")?);
        let embedder: Arc<dyn Embedder> = if config.embedding.segment_words {
            info!("Word segmentation enabled for embeddings");
            Arc::new(SegmentingEmbedder::new(embedder))
        } else {
            embedder
        };
        let searcher = EmbeddingImageSearcher::load(
            embedder,
            &config.images.static_dir,
            &config.images.cache_path,
        )
        .await
        .context("failed to build image index")?;

        let graph = KnowledgeGraph::load(&config.knowledge.triples_path).context("failed to load knowledge graph")?;
        info!(triples = graph.len(), "Knowledge graph loaded");

        let state = AppState::new(
            Arc::new(chat),
            Arc::new(routing),
            Arc::new(searcher),
            graph,
            config,
        );
        Ok(Self { state })
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!(address = %addr, "Q&A relay listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        info!("Server stopped");
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut qa = Router::new()
        .route("/ask", post(ask::ask_question))
        .route("/query-to-image", post(images::query_to_image))
        .route("/keywords-to-graph", post(graph::keywords_to_graph));

    // images stay public so that pushed URLs render in the browser
    match &config.server.api_key {
        Some(key) => {
            info!("Bearer authentication enabled for /api/qa");
            qa = qa.route_layer(middleware::from_fn_with_state(ApiKey::new(key.as_str()), require_api_key));
        }
        None => info!("Bearer authentication disabled"),
    }

    let qa = qa.nest_service("/images", ServeDir::new(&config.images.static_dir));

    Router::new()
        .nest("/api/qa", qa)
        .route("/health", get(health::health_check))
        .route("/api-doc/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .layer(middleware::from_fn(logging_middleware))
        .layer(get_tracing_layer())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
