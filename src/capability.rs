//! Capability interfaces for external collaborators the core depends on
//! but does not implement (§9 "dynamic dispatch over external systems").
//! Production code binds these to real services; tests swap in the
//! in-memory fakes defined alongside each trait's production binding.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Opaque embedding-model interface. A single call embeds one piece of
/// text; batching, if the backing model supports it, is the binding's
/// concern, not the core's.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, model: &str) -> AppResult<Vec<f32>>;
}

/// Opaque chat/LLM interface. Returns the full generated answer; the
/// core's Non-goals exclude defining a streaming transport, so a binding
/// that streams internally collects before returning here.
#[async_trait]
pub trait Chatter: Send + Sync {
    async fn chat(&self, model: &str, context: &str, query: &str, temperature: f32) -> AppResult<String>;
}

/// Opaque cross-encoder reranker. Returns one score per `(query, content)`
/// pair in the input order. Per §7, reranker unavailability must never
/// fail the query — callers catch the error and fall back to fused order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, contents: &[String]) -> AppResult<Vec<f32>>;
}

/// Opaque web-page-to-PDF renderer used by the scraping subsystem.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_pdf(&self, url: &url::Url) -> AppResult<Vec<u8>>;
}

/// Opaque text extraction for a downloaded file. Implementations decide
/// how to handle PDF/DOCX/XLSX/PPTX/plain-text formats; the core only
/// ever sees the extracted string.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &std::path::Path) -> AppResult<String>;
}

/// External-model calls are blocking and MUST be invoked from worker
/// threads, never on the request-plane handler or an async executor
/// thread running other cooperative tasks (§5). Each helper here hands
/// the call to `tokio::task::spawn_blocking` and drives the capability's
/// (async) future to completion on that dedicated thread via
/// `Handle::block_on`, mirroring the teacher's `spawn_blocking` dispatch
/// for its own blocking model calls in `routes/search.rs`.
pub async fn embed_on_worker(embedder: Arc<dyn Embedder>, text: &str, model: &str) -> AppResult<Vec<f32>> {
    let text = text.to_string();
    let model = model.to_string();
    tokio::task::spawn_blocking(move || tokio::runtime::Handle::current().block_on(embedder.embed(&text, &model)))
        .await
        .map_err(|e| AppError::Upstream(format!("embedding worker task failed: {e}")))?
}

pub async fn rerank_on_worker(reranker: Arc<dyn Reranker>, query: &str, contents: &[String]) -> AppResult<Vec<f32>> {
    let query = query.to_string();
    let contents = contents.to_vec();
    tokio::task::spawn_blocking(move || tokio::runtime::Handle::current().block_on(reranker.score(&query, &contents)))
        .await
        .map_err(|e| AppError::Upstream(format!("rerank worker task failed: {e}")))?
}

/// Stand-ins for capability bindings the demo binary has no real backend
/// for. Every call fails with `Upstream`, loudly, rather than silently
/// returning zeroed data — an operator wiring this crate into a real
/// deployment replaces these with bindings to an actual embedding
/// service, LLM, cross-encoder, and headless renderer.
pub mod unconfigured {
    use super::*;

    pub struct UnconfiguredEmbedder;

    #[async_trait]
    impl Embedder for UnconfiguredEmbedder {
        async fn embed(&self, _text: &str, model: &str) -> AppResult<Vec<f32>> {
            Err(crate::error::AppError::Upstream(format!(
                "no Embedder binding configured for model '{model}'"
            )))
        }
    }

    pub struct UnconfiguredChatter;

    #[async_trait]
    impl Chatter for UnconfiguredChatter {
        async fn chat(&self, model: &str, _context: &str, _query: &str, _temperature: f32) -> AppResult<String> {
            Err(crate::error::AppError::Upstream(format!(
                "no Chatter binding configured for model '{model}'"
            )))
        }
    }

    pub struct UnconfiguredTextExtractor;

    #[async_trait]
    impl TextExtractor for UnconfiguredTextExtractor {
        async fn extract(&self, path: &std::path::Path) -> AppResult<String> {
            Err(crate::error::AppError::Upstream(format!(
                "no TextExtractor binding configured for {}",
                path.display()
            )))
        }
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;

    /// Deterministic hash-based embedder: same text always yields the
    /// same vector, distinct texts yield (with overwhelming probability)
    /// distinct vectors. Dimension is fixed at construction to model a
    /// real model's fixed output width.
    pub struct FakeEmbedder {
        pub dim: usize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str, _model: &str) -> AppResult<Vec<f32>> {
            let mut seed: u64 = 1469598103934665603;
            for byte in text.bytes() {
                seed ^= byte as u64;
                seed = seed.wrapping_mul(1099511628211);
            }
            let mut out = Vec::with_capacity(self.dim);
            let mut state = seed;
            for _ in 0..self.dim {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                out.push(((state >> 33) as i32 % 1000) as f32 / 1000.0);
            }
            Ok(out)
        }
    }

    pub struct FakeChatter;

    #[async_trait]
    impl Chatter for FakeChatter {
        async fn chat(&self, _model: &str, context: &str, query: &str, _temperature: f32) -> AppResult<String> {
            Ok(format!("answer to '{query}' grounded on: {context}"))
        }
    }

    /// Scores by naive term overlap, just enough to exercise the rerank
    /// path deterministically without a real cross-encoder.
    pub struct FakeReranker;

    #[async_trait]
    impl Reranker for FakeReranker {
        async fn score(&self, query: &str, contents: &[String]) -> AppResult<Vec<f32>> {
            let query_terms: std::collections::HashSet<String> =
                crate::bm25::tokenize(query).into_iter().collect();
            Ok(contents
                .iter()
                .map(|c| {
                    let terms = crate::bm25::tokenize(c);
                    terms.iter().filter(|t| query_terms.contains(*t)).count() as f32
                })
                .collect())
        }
    }

    pub struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn score(&self, _query: &str, _contents: &[String]) -> AppResult<Vec<f32>> {
            Err(crate::error::AppError::Upstream("reranker unavailable".into()))
        }
    }

    /// Line-based extractor: treats the file's bytes as UTF-8 text
    /// directly, standing in for the real format-specific extraction the
    /// core depends on as an opaque capability.
    pub struct FakeTextExtractor;

    #[async_trait]
    impl TextExtractor for FakeTextExtractor {
        async fn extract(&self, path: &std::path::Path) -> AppResult<String> {
            Ok(tokio::fs::read_to_string(path).await?)
        }
    }

    pub struct FakePageRenderer {
        pub pages: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl PageRenderer for FakePageRenderer {
        async fn render_pdf(&self, url: &url::Url) -> AppResult<Vec<u8>> {
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| crate::error::AppError::Upstream(format!("no fake page for {url}")))
        }
    }
}
