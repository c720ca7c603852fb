//! Hub-and-spoke service construction. Leaf services (`ObjectStore`,
//! `VectorStore`) are built first and passed down into the registries and
//! pipelines that depend on them; nothing here depends upward.

use crate::capability::{Chatter, Embedder, Reranker, TextExtractor};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::ingestion::IngestionPipeline;
use crate::object_store::s3::S3ObjectStore;
use crate::object_store::ObjectStore;
use crate::retrieval::RetrievalPipeline;
use crate::session_store::SessionStore;
use crate::space_registry::SpaceRegistry;
use crate::supervisor::IndexingSupervisor;
use crate::vector_store::qdrant::QdrantVectorStore;
use crate::vector_store::VectorStore;
use std::sync::Arc;

/// External capability bindings an operator supplies at construction
/// time; the core never instantiates these itself (§1 Non-goals).
pub struct Capabilities {
    pub embedder: Arc<dyn Embedder>,
    pub chatter: Arc<dyn Chatter>,
    pub reranker: Option<Arc<dyn Reranker>>,
    pub extractor: Arc<dyn TextExtractor>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub object_store: Arc<dyn ObjectStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub space_registry: Arc<SpaceRegistry>,
    pub session_store: Arc<SessionStore>,
    pub ingestion: Arc<IngestionPipeline>,
    pub retrieval: Arc<RetrievalPipeline>,
    pub supervisor: Arc<IndexingSupervisor>,
    pub chatter: Arc<dyn Chatter>,
}

impl AppState {
    pub async fn new(config: AppConfig, capabilities: Capabilities) -> AppResult<Self> {
        let object_store: Arc<dyn ObjectStore> = Arc::new(
            S3ObjectStore::connect(&config.minio_endpoint, &config.minio_access_key, &config.minio_secret_key).await?,
        );
        let vector_store: Arc<dyn VectorStore> =
            Arc::new(QdrantVectorStore::connect(&config.milvus_host, config.milvus_port)?);

        let space_registry = Arc::new(SpaceRegistry::new(object_store.clone(), vector_store.clone()));
        space_registry.sync().await?;

        let session_store = Arc::new(SessionStore::new(object_store.clone()));

        let ingestion = Arc::new(IngestionPipeline::new(
            object_store.clone(),
            vector_store.clone(),
            capabilities.embedder.clone(),
            capabilities.extractor,
        ));

        let retrieval = Arc::new(RetrievalPipeline::new(
            object_store.clone(),
            vector_store.clone(),
            capabilities.embedder,
            capabilities.reranker,
        ));

        let supervisor = IndexingSupervisor::new(
            ingestion.clone(),
            space_registry.clone(),
            object_store.clone(),
            config.progress_queue_capacity,
            config.broadcaster_tick_hz,
        );

        Ok(Self {
            config,
            object_store,
            vector_store,
            space_registry,
            session_store,
            ingestion,
            retrieval,
            supervisor,
            chatter: capabilities.chatter,
        })
    }
}
