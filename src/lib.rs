//! Multi-tenant document indexing and hybrid retrieval engine.
//!
//! The request/transport layer, file-format extraction, and the
//! embedding/chat/rerank/page-rendering backends are external
//! collaborators represented here as capability traits
//! ([`capability::Embedder`], [`capability::Chatter`],
//! [`capability::Reranker`], [`capability::PageRenderer`],
//! [`capability::TextExtractor`]); this crate implements everything
//! around them: Space state, dual-index maintenance, hybrid retrieval,
//! and progress fan-out.

pub mod bm25;
pub mod capability;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod model;
pub mod object_store;
pub mod retrieval;
pub mod sanitize;
pub mod session_store;
pub mod space_registry;
pub mod state;
pub mod supervisor;
pub mod vector_store;

pub use error::{AppError, AppResult};
pub use state::{AppState, Capabilities};

#[cfg(test)]
mod end_to_end_tests;
