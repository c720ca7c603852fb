//! End-to-end scenarios exercised against in-memory fakes for every
//! external collaborator: `ObjectStore`, `VectorStore`, `Embedder`,
//! `TextExtractor`. Mirrors the six scenarios walked through by hand
//! during design, now pinned down as tests.

use crate::capability::fakes::{FakeEmbedder, FakeTextExtractor};
use crate::ingestion::{IngestionPipeline, IngestionRequest};
use crate::model::{ProgressEventType, SpaceConfig};
use crate::object_store::fakes::InMemoryObjectStore;
use crate::retrieval::{RetrievalPipeline, RetrievalRequest};
use crate::space_registry::SpaceRegistry;
use crate::supervisor::IndexingSupervisor;
use crate::vector_store::fakes::InMemoryVectorStore;
use crate::vector_store::VectorStore;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Harness {
    object_store: Arc<InMemoryObjectStore>,
    vector_store: Arc<InMemoryVectorStore>,
    registry: Arc<SpaceRegistry>,
    ingestion: IngestionPipeline,
    retrieval: RetrievalPipeline,
    dir: PathBuf,
}

impl Harness {
    async fn new() -> Self {
        let object_store = Arc::new(InMemoryObjectStore::new());
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let registry = Arc::new(SpaceRegistry::new(object_store.clone(), vector_store.clone()));
        let embedder = Arc::new(FakeEmbedder { dim: 4 });
        let ingestion = IngestionPipeline::new(
            object_store.clone(),
            vector_store.clone(),
            embedder.clone(),
            Arc::new(FakeTextExtractor),
        );
        let retrieval = RetrievalPipeline::new(object_store.clone(), vector_store.clone(), embedder, None);
        let dir = std::env::temp_dir().join(format!("e2e-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        Self { object_store, vector_store, registry, ingestion, retrieval, dir }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.dir).ok();
    }
}

#[tokio::test]
async fn scenario_1_create_upload_index_query() {
    let h = Harness::new().await;
    let space = h.registry.create("Docs A", Some(SpaceConfig { chunk_size: 1000, ..Default::default() })).await.unwrap();
    assert_eq!(space.storage_key, "docs-a");

    h.write("readme.md", "Hello world\nSecond line");

    let (tx, _rx) = mpsc::channel(64);
    let outcome = h
        .ingestion
        .run(
            IngestionRequest { space: space.clone(), target_paths: vec![h.dir.clone()], embedding_model: "fake".into() },
            Arc::new(AtomicBool::new(false)),
            tx,
        )
        .await
        .unwrap();
    assert_eq!(outcome.files_total, 1);
    assert_eq!(outcome.chunks_total, 1);

    let mut indexed_space = space;
    indexed_space.indexed_files_metadata = outcome.indexed_metadata;
    indexed_space.config.embedding_dim = outcome.embedding_dim;

    let result = h
        .retrieval
        .retrieve(RetrievalRequest {
            space: indexed_space,
            query: "hello".into(),
            top_k: 5,
            enable_rerank: false,
            embedding_model: "fake".into(),
        })
        .await
        .unwrap();
    assert_eq!(result.chunks[0].filename, "readme.md");
    assert!(result.chunks[0].content.starts_with("Hello world"));
}

#[tokio::test]
async fn scenario_2_incremental_noop_reports_zero_processed() {
    let h = Harness::new().await;
    let space = h.registry.create("Docs A", None).await.unwrap();
    h.write("readme.md", "Hello world\nSecond line");

    let (tx, _rx) = mpsc::channel(64);
    let outcome = h
        .ingestion
        .run(
            IngestionRequest { space: space.clone(), target_paths: vec![h.dir.clone()], embedding_model: "fake".into() },
            Arc::new(AtomicBool::new(false)),
            tx.clone(),
        )
        .await
        .unwrap();

    let mut space2 = space;
    space2.indexed_files_metadata = outcome.indexed_metadata;
    space2.config.embedding_dim = outcome.embedding_dim;

    let outcome2 = h
        .ingestion
        .run(
            IngestionRequest { space: space2, target_paths: vec![h.dir.clone()], embedding_model: "fake".into() },
            Arc::new(AtomicBool::new(false)),
            tx,
        )
        .await
        .unwrap();
    assert_eq!(outcome2.files_processed, 0);
}

#[tokio::test]
async fn scenario_3_incremental_update_replaces_stale_chunks() {
    let h = Harness::new().await;
    let space = h.registry.create("Docs A", None).await.unwrap();
    h.write("readme.md", "Hello world\nSecond line");

    let (tx, _rx) = mpsc::channel(64);
    let outcome = h
        .ingestion
        .run(
            IngestionRequest { space: space.clone(), target_paths: vec![h.dir.clone()], embedding_model: "fake".into() },
            Arc::new(AtomicBool::new(false)),
            tx.clone(),
        )
        .await
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    h.write("readme.md", "Hello world\nThird line");

    let mut space2 = space;
    space2.indexed_files_metadata = outcome.indexed_metadata;
    space2.config.embedding_dim = outcome.embedding_dim;

    let (tx2, mut rx2) = mpsc::channel(64);
    let outcome2 = h
        .ingestion
        .run(
            IngestionRequest { space: space2.clone(), target_paths: vec![h.dir.clone()], embedding_model: "fake".into() },
            Arc::new(AtomicBool::new(false)),
            tx2,
        )
        .await
        .unwrap();
    assert_eq!(outcome2.files_processed, 1);

    let mut saw_file_deleted = false;
    while let Ok(event) = rx2.try_recv() {
        if event.event_type == ProgressEventType::FileDeleted {
            saw_file_deleted = true;
        }
    }
    assert!(saw_file_deleted, "expected a file_deleted event during the incremental update");

    let hits = h.vector_store.search("Docs_A", &vec![0.0; 4], 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].content.contains("Third line"));
}

#[tokio::test]
async fn scenario_4_dim_mismatch_triggers_full_reindex() {
    let h = Harness::new().await;
    let mut config = SpaceConfig::default();
    config.embedding_dim = Some(768);
    let space = h.registry.create("Docs A", Some(config)).await.unwrap();
    h.write("readme.md", "Hello world");

    // First index establishes a 768-dim collection directly (no probe
    // needed since embedding_dim is already configured).
    h.vector_store.ensure_collection("Docs_A", 768, true).await.unwrap();

    // Now index through the pipeline with a fake embedder that yields a
    // different width, forcing the dimension-mismatch/full-reindex path.
    let mismatched_embedder = Arc::new(FakeEmbedder { dim: 384 });
    let ingestion = IngestionPipeline::new(
        h.object_store.clone(),
        h.vector_store.clone(),
        mismatched_embedder,
        Arc::new(FakeTextExtractor),
    );

    let mut space_for_reindex = space;
    space_for_reindex.config.embedding_dim = None; // force a fresh probe
    space_for_reindex.indexed_files_metadata.clear(); // empty metadata => full mode

    let (tx, _rx) = mpsc::channel(64);
    let outcome = ingestion
        .run(
            IngestionRequest { space: space_for_reindex, target_paths: vec![h.dir.clone()], embedding_model: "fake".into() },
            Arc::new(AtomicBool::new(false)),
            tx,
        )
        .await
        .unwrap();
    assert_eq!(outcome.embedding_dim, Some(384));

    let hits = h.vector_store.search("Docs_A", &vec![0.0; 384], 10).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn scenario_5_concurrent_start_rejected_running_job_unperturbed() {
    let h = Harness::new().await;
    h.registry.create("Docs A", None).await.unwrap();
    h.write("readme.md", "Hello world");

    let ingestion = Arc::new(IngestionPipeline::new(
        h.object_store.clone(),
        h.vector_store.clone(),
        Arc::new(FakeEmbedder { dim: 4 }),
        Arc::new(FakeTextExtractor),
    ));
    let supervisor = IndexingSupervisor::new(ingestion, h.registry.clone(), h.object_store.clone(), 1024, 20);

    supervisor.start("Docs A", vec![h.dir.clone()], "fake".into()).unwrap();
    let second = supervisor.start("Docs A", vec![h.dir.clone()], "fake".into());
    assert!(matches!(second, Err(crate::error::AppError::Conflict(_))));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let hits = h.vector_store.search("Docs_A", &vec![0.0; 4], 10).await.unwrap();
    assert_eq!(hits.len(), 1, "the first job should have completed unperturbed");
}

#[tokio::test]
async fn scenario_6_subscriber_resync_then_ordered_events() {
    let h = Harness::new().await;
    h.registry.create("Docs A", None).await.unwrap();
    h.write("readme.md", "Hello world");

    let ingestion = Arc::new(IngestionPipeline::new(
        h.object_store.clone(),
        h.vector_store.clone(),
        Arc::new(FakeEmbedder { dim: 4 }),
        Arc::new(FakeTextExtractor),
    ));
    let supervisor = IndexingSupervisor::new(ingestion, h.registry.clone(), h.object_store.clone(), 1024, 20);

    supervisor.start("Docs A", vec![h.dir.clone()], "fake".into()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let (_rx, last) = supervisor.subscribe("docs-a");
    assert!(last.is_some(), "a mid-job subscriber should immediately see the last persisted progress event");
}
