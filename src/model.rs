use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-file change-detection fingerprint. Two files are considered
/// unchanged iff both fields are equal to the previously recorded values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub size: u64,
    pub mtime_unix: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceConfig {
    pub chunk_size: usize,
    pub llm_model: String,
    pub embedding_model: String,
    pub embedding_dim: Option<usize>,
    pub temperature: f32,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            llm_model: String::new(),
            embedding_model: String::new(),
            embedding_dim: None,
            temperature: 0.7,
        }
    }
}

impl SpaceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(100..=5000).contains(&self.chunk_size) {
            return Err(format!("chunk_size {} out of range [100, 5000]", self.chunk_size));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature {} out of range [0.0, 2.0]", self.temperature));
        }
        Ok(())
    }
}

/// Logical tenant. `storage_key` and `collection_key` are pure functions
/// of `name` (see `crate::sanitize`); `name` itself is immutable once a
/// Space is created (rename is delete+recreate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    pub storage_key: String,
    pub collection_key: String,
    pub config: SpaceConfig,
    pub file_count: usize,
    pub last_indexed: Option<DateTime<Utc>>,
    pub indexed_files_metadata: HashMap<String, FileFingerprint>,
    /// Derived from a live `list_objects(uploads/)` call; never authoritative.
    #[serde(skip)]
    pub uploads: Vec<String>,
}

impl Space {
    pub fn new(name: String, storage_key: String, collection_key: String, config: SpaceConfig) -> Self {
        Self {
            name,
            storage_key,
            collection_key,
            config,
            file_count: 0,
            last_indexed: None,
            indexed_files_metadata: HashMap::new(),
            uploads: Vec::new(),
        }
    }
}

/// The persisted subset of `Space` written to `config.json` at the bucket
/// root (§6). `uploads` is intentionally absent — it's derived, not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfigDocument {
    pub name: String,
    pub config: SpaceConfig,
    pub file_count: usize,
    pub last_indexed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub indexed_files_metadata: HashMap<String, FileFingerprint>,
}

impl From<&Space> for SpaceConfigDocument {
    fn from(space: &Space) -> Self {
        Self {
            name: space.name.clone(),
            config: space.config.clone(),
            file_count: space.file_count,
            last_indexed: space.last_indexed,
            indexed_files_metadata: space.indexed_files_metadata.clone(),
        }
    }
}

/// A unit of retrieval: an extracted text slice paired with its dense
/// embedding. No stable cross-run identity — chunks are owned by
/// `filename`, which is the unit of delete-on-reindex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub filename: String,
    pub embedding: Vec<f32>,
}

/// A scored retrieval hit before/after fusion. `score` carries whichever
/// stage last touched it (vector L2 distance, BM25 score, RRF fused
/// score, or cross-encoder `rerank_score`, tracked separately).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub content: String,
    pub filename: String,
    pub score: f32,
    #[serde(rename = "type")]
    pub source: HitSource,
    pub rerank_score: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Vector,
    Bm25,
    Fused,
}

/// `{bm25_state, contents[], filenames[]}` serialized as a single blob at
/// `index/bm25.pkl`. Contents and filenames are aligned by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Artifact {
    pub state: crate::bm25::Bm25State,
    pub contents: Vec<String>,
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<ChunkSummary>>,
}

/// Closed set of progress-event types (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    Started,
    Downloading,
    MilvusConnected,
    CountingFiles,
    FilesCounted,
    DetectingDimension,
    DimensionDetected,
    CollectionCreated,
    CollectionReset,
    CollectionReused,
    FileStarted,
    FileCompleted,
    FileDeleted,
    FileError,
    InsertingData,
    CreatingIndex,
    IndexingBm25,
    Bm25Saved,
    Complete,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl ProgressEvent {
    pub fn new(event_type: ProgressEventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }
}
