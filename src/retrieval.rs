//! Hybrid retrieval: dense + sparse search fused via reciprocal rank
//! fusion, with optional cross-encoder reranking (§4.7).

use crate::bm25::Bm25Index;
use crate::capability::{Embedder, Reranker};
use crate::model::{Bm25Artifact, HitSource, RetrievalHit, Space};
use crate::object_store::{JsonGet, ObjectStore};
use crate::vector_store::VectorStore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

const BM25_KEY: &str = "index/bm25.pkl";
const RRF_K: f32 = 60.0;
const SPARSE_TOP_K: usize = 20;
const RERANK_DEDUP_PREFIX: usize = 100;
const FUSION_KEY_PREFIX: usize = 50;

pub struct RetrievalRequest {
    pub space: Space,
    pub query: String,
    /// Defaults to 5 per §4.7.
    pub top_k: usize,
    pub enable_rerank: bool,
    pub embedding_model: String,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievalHit>,
    pub context: String,
}

pub struct RetrievalPipeline {
    object_store: Arc<dyn ObjectStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
}

/// `(filename, truncated content hash)`, the fusion/dedup key from §4.7.
fn fusion_key(hit: &RetrievalHit) -> (String, u64) {
    let prefix: String = hit.content.chars().take(FUSION_KEY_PREFIX).collect();
    let digest = Sha256::digest(prefix.as_bytes());
    let hash = u64::from_be_bytes(digest[0..8].try_into().unwrap());
    (hit.filename.clone(), hash)
}

fn rerank_signature(content: &str) -> String {
    content.chars().take(RERANK_DEDUP_PREFIX).collect()
}

impl RetrievalPipeline {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        Self {
            object_store,
            vector_store,
            embedder,
            reranker,
        }
    }

    async fn load_bm25(&self, space: &Space) -> AppRes<Option<Bm25Index>> {
        match self.object_store.get_json(&space.storage_key, BM25_KEY).await? {
            JsonGet::Found(value) => {
                let artifact: Bm25Artifact = serde_json::from_value(value)?;
                Ok(Some(Bm25Index::from_artifact(artifact)))
            }
            JsonGet::Absent => Ok(None),
        }
    }

    pub async fn retrieve(&self, req: RetrievalRequest) -> AppRes<RetrievalResult> {
        // Step 1: embed query. Dispatched to a worker thread (§5: external
        // model calls are blocking and must not run on the request-plane
        // handler).
        let query_vector =
            crate::capability::embed_on_worker(self.embedder.clone(), &req.query, &req.embedding_model).await?;

        // Step 2: dense search with widened limit.
        let dense_limit = (4 * req.top_k).max(20);
        let dense_hits = self
            .vector_store
            .search(&req.space.collection_key, &query_vector, dense_limit)
            .await?;

        // Step 3: sparse search. Absence of a BM25 artifact is not an error.
        let sparse_hits = match self.load_bm25(&req.space).await? {
            Some(index) => index.search(&req.query, SPARSE_TOP_K),
            None => Vec::new(),
        };

        // Step 4: RRF fusion.
        let fused = self.fuse(&dense_hits, &sparse_hits);

        // Step 5: optional rerank, falling back to fused order on any
        // reranker failure (§7: "never fail the query").
        let final_hits = if req.enable_rerank {
            match self.rerank(&req.query, &fused, req.top_k).await {
                Ok(reranked) => reranked,
                Err(_) => fused.into_iter().take(req.top_k).collect(),
            }
        } else {
            fused.into_iter().take(req.top_k).collect()
        };

        // Step 6: context assembly.
        let context = final_hits
            .iter()
            .map(|h| format!("\n--- File: {} ---\n{}\n", h.filename, h.content))
            .collect::<Vec<_>>()
            .join("");

        Ok(RetrievalResult {
            chunks: final_hits,
            context,
        })
    }

    /// `Σ 1/(rank + 60)` per input list, accumulated by fusion key,
    /// sorted desc; tie-break is first occurrence across input lists
    /// (stable sort preserves the concatenation order below).
    fn fuse(&self, dense: &[RetrievalHit], sparse: &[RetrievalHit]) -> Vec<RetrievalHit> {
        let mut scores: HashMap<(String, u64), f32> = HashMap::new();
        let mut first_seen: HashMap<(String, u64), RetrievalHit> = HashMap::new();

        for list in [dense, sparse] {
            for (rank, hit) in list.iter().enumerate() {
                let key = fusion_key(hit);
                *scores.entry(key.clone()).or_insert(0.0) += 1.0 / (rank as f32 + RRF_K);
                first_seen.entry(key).or_insert_with(|| hit.clone());
            }
        }

        let mut order: Vec<(String, u64)> = Vec::new();
        for list in [dense, sparse] {
            for hit in list {
                let key = fusion_key(hit);
                if !order.contains(&key) {
                    order.push(key);
                }
            }
        }

        let mut fused: Vec<RetrievalHit> = order
            .into_iter()
            .map(|key| {
                let score = scores[&key];
                let mut hit = first_seen.remove(&key).unwrap();
                hit.score = score;
                hit.source = HitSource::Fused;
                hit
            })
            .collect();

        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        fused
    }

    async fn rerank(&self, query: &str, fused: &[RetrievalHit], top_k: usize) -> AppRes<Vec<RetrievalHit>> {
        let Some(reranker) = &self.reranker else {
            return Ok(fused.iter().take(top_k).cloned().collect());
        };

        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<RetrievalHit> = fused
            .iter()
            .filter(|h| seen.insert(rerank_signature(&h.content)))
            .cloned()
            .collect();

        let contents: Vec<String> = deduped.iter().map(|h| h.content.clone()).collect();
        let scores = crate::capability::rerank_on_worker(reranker.clone(), query, &contents).await?;

        let mut scored: Vec<RetrievalHit> = deduped
            .into_iter()
            .zip(scores)
            .map(|(mut hit, score)| {
                hit.rerank_score = Some(score);
                hit
            })
            .collect();
        scored.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

type AppRes<T> = crate::error::AppResult<T>;
