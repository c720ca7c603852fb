//! Typed wrapper over an ANN database (§4.2). Owns collection lifecycle,
//! insert, delete-by-predicate, and indexed search.

use crate::error::{AppError, AppResult};
use crate::model::{Chunk, HitSource, RetrievalHit};
use async_trait::async_trait;

/// IVF-family index/search tuning (§4.2: "nlist=128, search nprobe=10").
/// Qdrant indexes with HNSW rather than IVF, so these translate to the
/// closest HNSW equivalents: `NLIST` seeds `ef_construct` (build-time
/// graph quality) and `NPROBE` seeds `hnsw_ef` (search-time breadth) —
/// see `qdrant::QdrantVectorStore`.
pub const NLIST: u64 = 128;
pub const NPROBE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionSetupOutcome {
    Created,
    Reset,
    Reused,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// If `recreate`, drops any existing collection and creates fresh;
    /// otherwise reuses it if present, creates otherwise. A dimension
    /// mismatch with an existing collection is a fatal error requiring
    /// the caller to pass `recreate = true`.
    async fn ensure_collection(&self, name: &str, dim: usize, recreate: bool) -> AppResult<CollectionSetupOutcome>;
    async fn insert(&self, name: &str, rows: &[Chunk]) -> AppResult<()>;
    /// Only `filename == value` predicates are required.
    async fn delete_where_filename(&self, name: &str, filename: &str) -> AppResult<()>;
    async fn create_index(&self, name: &str) -> AppResult<()>;
    async fn search(&self, name: &str, vector: &[f32], limit: usize) -> AppResult<Vec<RetrievalHit>>;
    async fn load(&self, name: &str) -> AppResult<()>;
    async fn drop_collection(&self, name: &str) -> AppResult<()>;
    async fn exists(&self, name: &str) -> AppResult<bool>;
    async fn list(&self) -> AppResult<Vec<String>>;
}

pub mod qdrant {
    use super::*;
    use qdrant_client::qdrant::{
        point_id::PointIdOptions, vectors_config::Config, CreateCollectionBuilder, Distance,
        HnswConfigDiffBuilder, PointId, PointStruct, SearchParamsBuilder, SearchPointsBuilder,
        UpsertPointsBuilder, VectorParamsBuilder, VectorsConfig,
    };
    use qdrant_client::{Payload, Qdrant};

    pub struct QdrantVectorStore {
        client: Qdrant,
    }

    impl QdrantVectorStore {
        pub fn connect(host: &str, port: u16) -> AppResult<Self> {
            let client = Qdrant::from_url(&format!("http://{host}:{port}"))
                .build()
                .map_err(|e| AppError::Upstream(format!("connect to vector store: {e}")))?;
            Ok(Self { client })
        }

        async fn dim_of(&self, name: &str) -> AppResult<Option<usize>> {
            let info = match self.client.collection_info(name).await {
                Ok(info) => info,
                Err(_) => return Ok(None),
            };
            let dim = info
                .result
                .and_then(|r| r.config)
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|vc| vc.config)
                .and_then(|cfg| match cfg {
                    Config::Params(params) => Some(params.size as usize),
                    _ => None,
                });
            Ok(dim)
        }
    }

    #[async_trait]
    impl VectorStore for QdrantVectorStore {
        async fn ensure_collection(&self, name: &str, dim: usize, recreate: bool) -> AppResult<CollectionSetupOutcome> {
            let existing_dim = self.dim_of(name).await?;

            let outcome = match existing_dim {
                Some(existing) if recreate => {
                    self.client
                        .delete_collection(name)
                        .await
                        .map_err(|e| AppError::Upstream(format!("drop collection {name}: {e}")))?;
                    let _ = existing;
                    CollectionSetupOutcome::Reset
                }
                Some(existing) if existing != dim => {
                    return Err(AppError::Fatal(format!(
                        "collection {name} has dim {existing}, requested {dim}; recreate required"
                    )));
                }
                Some(_) => CollectionSetupOutcome::Reused,
                None => CollectionSetupOutcome::Created,
            };

            if !matches!(outcome, CollectionSetupOutcome::Reused) {
                let vectors_config = VectorsConfig {
                    config: Some(Config::Params(
                        VectorParamsBuilder::new(dim as u64, Distance::Euclid).build(),
                    )),
                };
                let hnsw_config = HnswConfigDiffBuilder::default().ef_construct(NLIST).build();
                self.client
                    .create_collection(
                        CreateCollectionBuilder::new(name)
                            .vectors_config(vectors_config)
                            .hnsw_config(hnsw_config),
                    )
                    .await
                    .map_err(|e| AppError::Upstream(format!("create collection {name}: {e}")))?;
            }

            Ok(outcome)
        }

        async fn insert(&self, name: &str, rows: &[Chunk]) -> AppResult<()> {
            let points: Vec<PointStruct> = rows
                .iter()
                .map(|chunk| {
                    let mut payload = Payload::new();
                    payload.insert("content", chunk.content.clone());
                    payload.insert("filename", chunk.filename.clone());
                    PointStruct::new(
                        PointId {
                            point_id_options: Some(PointIdOptions::Uuid(uuid::Uuid::new_v4().to_string())),
                        },
                        chunk.embedding.clone(),
                        payload,
                    )
                })
                .collect();

            self.client
                .upsert_points(UpsertPointsBuilder::new(name, points))
                .await
                .map_err(|e| AppError::Upstream(format!("insert into {name}: {e}")))?;
            Ok(())
        }

        async fn delete_where_filename(&self, name: &str, filename: &str) -> AppResult<()> {
            use qdrant_client::qdrant::{Condition, Filter};
            let filter = Filter::must([Condition::matches("filename", filename.to_string())]);
            self.client
                .delete_points(
                    qdrant_client::qdrant::DeletePointsBuilder::new(name)
                        .points(qdrant_client::qdrant::PointsSelector::from(filter)),
                )
                .await
                .map_err(|e| AppError::Upstream(format!("delete_where filename={filename} in {name}: {e}")))?;
            Ok(())
        }

        async fn create_index(&self, _name: &str) -> AppResult<()> {
            // Qdrant builds its HNSW index automatically on insert, seeded
            // with the ef_construct passed at collection creation; an
            // explicit indexing step is Milvus/IVF-specific and has no
            // counterpart here.
            Ok(())
        }

        async fn search(&self, name: &str, vector: &[f32], limit: usize) -> AppResult<Vec<RetrievalHit>> {
            let resp = self
                .client
                .search_points(
                    SearchPointsBuilder::new(name, vector.to_vec(), limit as u64)
                        .with_payload(true)
                        .params(SearchParamsBuilder::default().hnsw_ef(NPROBE).build()),
                )
                .await
                .map_err(|e| AppError::Upstream(format!("search {name}: {e}")))?;

            Ok(resp
                .result
                .into_iter()
                .map(|point| {
                    let content = point
                        .payload
                        .get("content")
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    let filename = point
                        .payload
                        .get("filename")
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    RetrievalHit {
                        content,
                        filename,
                        score: point.score,
                        source: HitSource::Vector,
                        rerank_score: None,
                    }
                })
                .collect())
        }

        async fn load(&self, _name: &str) -> AppResult<()> {
            // Qdrant collections are always loaded; no-op, kept for
            // parity with the contract's load/drop/exists surface.
            Ok(())
        }

        async fn drop_collection(&self, name: &str) -> AppResult<()> {
            self.client
                .delete_collection(name)
                .await
                .map_err(|e| AppError::Upstream(format!("drop collection {name}: {e}")))?;
            Ok(())
        }

        async fn exists(&self, name: &str) -> AppResult<bool> {
            Ok(self.dim_of(name).await?.is_some())
        }

        async fn list(&self) -> AppResult<Vec<String>> {
            let resp = self
                .client
                .list_collections()
                .await
                .map_err(|e| AppError::Upstream(format!("list collections: {e}")))?;
            Ok(resp.collections.into_iter().map(|c| c.name).collect())
        }
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Mutex;

    struct Collection {
        dim: usize,
        rows: Mutex<Vec<Chunk>>,
    }

    /// Brute-force L2 in-memory fake, sufficient for tests where corpora
    /// are small; production search goes through `qdrant::QdrantVectorStore`.
    #[derive(Default)]
    pub struct InMemoryVectorStore {
        collections: DashMap<String, Collection>,
    }

    impl InMemoryVectorStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
    }

    #[async_trait]
    impl VectorStore for InMemoryVectorStore {
        async fn ensure_collection(&self, name: &str, dim: usize, recreate: bool) -> AppResult<CollectionSetupOutcome> {
            let existing = self.collections.get(name).map(|c| c.dim);
            match existing {
                Some(existing_dim) if recreate => {
                    self.collections.insert(
                        name.to_string(),
                        Collection { dim, rows: Mutex::new(Vec::new()) },
                    );
                    let _ = existing_dim;
                    Ok(CollectionSetupOutcome::Reset)
                }
                Some(existing_dim) if existing_dim != dim => Err(AppError::Fatal(format!(
                    "collection {name} has dim {existing_dim}, requested {dim}; recreate required"
                ))),
                Some(_) => Ok(CollectionSetupOutcome::Reused),
                None => {
                    self.collections.insert(
                        name.to_string(),
                        Collection { dim, rows: Mutex::new(Vec::new()) },
                    );
                    Ok(CollectionSetupOutcome::Created)
                }
            }
        }

        async fn insert(&self, name: &str, rows: &[Chunk]) -> AppResult<()> {
            let collection = self
                .collections
                .get(name)
                .ok_or_else(|| AppError::NotFound(format!("collection {name}")))?;
            collection.rows.lock().unwrap().extend_from_slice(rows);
            Ok(())
        }

        async fn delete_where_filename(&self, name: &str, filename: &str) -> AppResult<()> {
            if let Some(collection) = self.collections.get(name) {
                collection.rows.lock().unwrap().retain(|r| r.filename != filename);
            }
            Ok(())
        }

        async fn create_index(&self, _name: &str) -> AppResult<()> {
            Ok(())
        }

        async fn search(&self, name: &str, vector: &[f32], limit: usize) -> AppResult<Vec<RetrievalHit>> {
            let collection = self
                .collections
                .get(name)
                .ok_or_else(|| AppError::NotFound(format!("index not found: {name}")))?;
            let rows = collection.rows.lock().unwrap();
            let mut scored: Vec<(f32, &Chunk)> = rows.iter().map(|r| (l2_distance(vector, &r.embedding), r)).collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(limit);
            Ok(scored
                .into_iter()
                .map(|(dist, chunk)| RetrievalHit {
                    content: chunk.content.clone(),
                    filename: chunk.filename.clone(),
                    score: dist,
                    source: HitSource::Vector,
                    rerank_score: None,
                })
                .collect())
        }

        async fn load(&self, _name: &str) -> AppResult<()> {
            Ok(())
        }

        async fn drop_collection(&self, name: &str) -> AppResult<()> {
            self.collections.remove(name);
            Ok(())
        }

        async fn exists(&self, name: &str) -> AppResult<bool> {
            Ok(self.collections.contains_key(name))
        }

        async fn list(&self) -> AppResult<Vec<String>> {
            Ok(self.collections.iter().map(|e| e.key().clone()).collect())
        }
    }

    #[tokio::test]
    async fn ensure_collection_reuses_when_dim_matches() {
        let store = InMemoryVectorStore::new();
        assert_eq!(store.ensure_collection("c", 3, false).await.unwrap(), CollectionSetupOutcome::Created);
        assert_eq!(store.ensure_collection("c", 3, false).await.unwrap(), CollectionSetupOutcome::Reused);
    }

    #[tokio::test]
    async fn ensure_collection_fatal_on_dim_mismatch_without_recreate() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 3, false).await.unwrap();
        let err = store.ensure_collection("c", 5, false).await.unwrap_err();
        assert!(err.is_job_fatal());
    }

    #[tokio::test]
    async fn delete_where_filename_purges_only_matching_rows() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 1, false).await.unwrap();
        store
            .insert(
                "c",
                &[
                    Chunk { content: "a".into(), filename: "a.txt".into(), embedding: vec![0.0] },
                    Chunk { content: "b".into(), filename: "b.txt".into(), embedding: vec![1.0] },
                ],
            )
            .await
            .unwrap();
        store.delete_where_filename("c", "a.txt").await.unwrap();
        let hits = store.search("c", &[0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "b.txt");
    }

    #[tokio::test]
    async fn search_missing_collection_surfaces_not_found() {
        let store = InMemoryVectorStore::new();
        let err = store.search("missing", &[0.0], 1).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
