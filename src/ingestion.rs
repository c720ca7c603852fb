//! The indexing worker (§4.6). Downloads are assumed already staged
//! locally (that's `ObjectStore::download_prefix`'s job, invoked by the
//! caller); this module walks the staged paths, decides the new/changed
//! set via `(size, mtime)` fingerprints, extracts, chunks, embeds, writes
//! vectors, rebuilds BM25, and emits structured progress.

use crate::bm25::Bm25Index;
use crate::capability::{Embedder, TextExtractor};
use crate::config::{has_excluded_component, is_supported_extension};
use crate::error::{AppError, AppResult};
use crate::model::{
    Bm25Artifact, Chunk, FileFingerprint, ProgressEvent, ProgressEventType, Space,
};
use crate::object_store::{JsonGet, ObjectStore};
use crate::vector_store::{CollectionSetupOutcome, VectorStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const BM25_KEY: &str = "index/bm25.pkl";
const DIMENSION_PROBE_TEXT: &str = "test";

pub struct IngestionPipeline {
    object_store: Arc<dyn ObjectStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
}

pub struct IngestionRequest {
    pub space: Space,
    /// Local paths (already downloaded from the ObjectStore) to walk.
    pub target_paths: Vec<PathBuf>,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionOutcome {
    pub files_total: usize,
    pub files_processed: usize,
    pub chunks_total: usize,
    pub embedding_dim: Option<usize>,
    pub indexed_metadata: HashMap<String, FileFingerprint>,
    pub stopped: bool,
}

/// Splits `text` into fixed-width character chunks (last chunk may be
/// shorter). Concatenating the result in order reproduces `text` exactly.
/// Text that is empty after trimming contributes zero chunks.
fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.trim().is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|slice| slice.iter().collect())
        .collect()
}

fn fingerprint(metadata: &std::fs::Metadata) -> AppResult<FileFingerprint> {
    let mtime_unix = metadata
        .modified()
        .map_err(|e| AppError::Upstream(format!("read mtime: {e}")))?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(FileFingerprint {
        size: metadata.len(),
        mtime_unix,
    })
}

/// Walks every `target_path`, returning eligible files keyed by their
/// basename filename alongside their absolute path and fingerprint, in
/// deterministic (sorted) enumeration order.
fn enumerate_eligible_files(target_paths: &[PathBuf]) -> AppResult<Vec<(String, PathBuf, FileFingerprint)>> {
    let mut found = Vec::new();
    for target in target_paths {
        if !target.exists() {
            return Err(AppError::Invalid(format!("target path does not exist: {}", target.display())));
        }
        for entry in ignore::WalkBuilder::new(target).hidden(false).git_ignore(false).build() {
            let entry = entry.map_err(|e| AppError::Upstream(format!("walk {}: {e}", target.display())))?;
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if has_excluded_component(path) {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !is_supported_extension(ext) {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let metadata = std::fs::metadata(path)?;
            found.push((filename.to_string(), path.to_path_buf(), fingerprint(&metadata)?));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

impl IngestionPipeline {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            object_store,
            vector_store,
            embedder,
            extractor,
        }
    }

    pub async fn run(
        &self,
        req: IngestionRequest,
        stop_flag: Arc<AtomicBool>,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> AppResult<IngestionOutcome> {
        let emit = |event_type: ProgressEventType, data: serde_json::Value| {
            // Progress is lossy by design (§9): a full queue silently
            // drops this send rather than blocking the worker.
            let _ = progress.try_send(ProgressEvent::new(event_type, data));
        };

        emit(ProgressEventType::Started, serde_json::json!({"space": req.space.name}));

        // Step 1: validate.
        for path in &req.target_paths {
            if !path.exists() {
                return Err(AppError::Invalid(format!("target path does not exist: {}", path.display())));
            }
        }

        // Step 2: dimension probe.
        emit(ProgressEventType::DetectingDimension, serde_json::json!({}));
        let embedding_dim = match req.space.config.embedding_dim {
            Some(dim) => dim,
            None => {
                let probe = crate::capability::embed_on_worker(
                    self.embedder.clone(),
                    DIMENSION_PROBE_TEXT,
                    &req.embedding_model,
                )
                .await
                .map_err(|e| AppError::Fatal(format!("dimension probe failed: {e}")))?;
                probe.len()
            }
        };
        emit(ProgressEventType::DimensionDetected, serde_json::json!({"embedding_dim": embedding_dim}));

        // Step 3: collection setup. Per §4.6: non-empty prior metadata means
        // incremental (reuse); empty metadata means full (recreate).
        let full_mode = req.space.indexed_files_metadata.is_empty();
        let setup_outcome = self
            .vector_store
            .ensure_collection(&req.space.collection_key, embedding_dim, full_mode)
            .await?;
        emit(
            match setup_outcome {
                CollectionSetupOutcome::Created => ProgressEventType::CollectionCreated,
                CollectionSetupOutcome::Reset => ProgressEventType::CollectionReset,
                CollectionSetupOutcome::Reused => ProgressEventType::CollectionReused,
            },
            serde_json::json!({}),
        );

        // Step 4: enumeration.
        emit(ProgressEventType::CountingFiles, serde_json::json!({}));
        let eligible = enumerate_eligible_files(&req.target_paths)?;
        emit(ProgressEventType::FilesCounted, serde_json::json!({"files_total": eligible.len()}));

        // Step 5: change detection.
        let needs_indexing = |filename: &str, fp: &FileFingerprint| -> bool {
            if full_mode {
                return true;
            }
            match req.space.indexed_files_metadata.get(filename) {
                Some(prior) => prior != fp,
                None => true,
            }
        };

        let mut new_metadata = req.space.indexed_files_metadata.clone();
        let mut batch_contents = Vec::new();
        let mut batch_filenames = Vec::new();
        let mut batch_embeddings = Vec::new();
        let mut files_processed = 0usize;
        let mut stopped = false;

        // Step 6: per-file processing.
        'files: for (filename, path, fp) in &eligible {
            if stop_flag.load(Ordering::SeqCst) {
                stopped = true;
                break 'files;
            }
            if !needs_indexing(filename, fp) {
                continue;
            }

            emit(ProgressEventType::FileStarted, serde_json::json!({"filename": filename}));

            let previously_indexed = req.space.indexed_files_metadata.contains_key(filename);
            if !full_mode && previously_indexed {
                self.vector_store
                    .delete_where_filename(&req.space.collection_key, filename)
                    .await?;
                emit(ProgressEventType::FileDeleted, serde_json::json!({"filename": filename}));
            }

            let text = match self.extractor.extract(path).await {
                Ok(text) => text,
                Err(e) => {
                    emit(
                        ProgressEventType::FileError,
                        serde_json::json!({"filename": filename, "error": e.to_string()}),
                    );
                    continue;
                }
            };

            let chunks = chunk_text(&text, req.space.config.chunk_size);
            let mut file_chunk_count = 0usize;
            for chunk_content in &chunks {
                if stop_flag.load(Ordering::SeqCst) {
                    stopped = true;
                    break 'files;
                }
                let embedding =
                    crate::capability::embed_on_worker(self.embedder.clone(), chunk_content, &req.embedding_model)
                        .await?;
                batch_contents.push(chunk_content.clone());
                batch_filenames.push(filename.clone());
                batch_embeddings.push(embedding);
                file_chunk_count += 1;
            }

            new_metadata.insert(filename.clone(), *fp);
            files_processed += 1;
            emit(
                ProgressEventType::FileCompleted,
                serde_json::json!({
                    "filename": filename,
                    "chunks": file_chunk_count,
                    "files_processed": files_processed,
                }),
            );
        }

        let chunks_total = batch_contents.len();

        if chunks_total == 0 {
            emit(
                ProgressEventType::Complete,
                serde_json::json!({"files_total": eligible.len(), "files_processed": 0, "chunks_total": 0}),
            );
            return Ok(IngestionOutcome {
                files_total: eligible.len(),
                files_processed,
                chunks_total: 0,
                embedding_dim: Some(embedding_dim),
                indexed_metadata: new_metadata,
                stopped,
            });
        }

        // Step 7: persistence.
        emit(ProgressEventType::InsertingData, serde_json::json!({"chunks_total": chunks_total}));
        let rows: Vec<Chunk> = batch_contents
            .iter()
            .zip(batch_filenames.iter())
            .zip(batch_embeddings.iter())
            .map(|((content, filename), embedding)| Chunk {
                content: content.clone(),
                filename: filename.clone(),
                embedding: embedding.clone(),
            })
            .collect();
        self.vector_store.insert(&req.space.collection_key, &rows).await?;

        if full_mode {
            emit(ProgressEventType::CreatingIndex, serde_json::json!({}));
            self.vector_store.create_index(&req.space.collection_key).await?;
        }
        self.vector_store.load(&req.space.collection_key).await?;

        emit(ProgressEventType::IndexingBm25, serde_json::json!({}));
        match self
            .rebuild_bm25(&req.space, &batch_contents, &batch_filenames, full_mode)
            .await
        {
            Ok(()) => emit(ProgressEventType::Bm25Saved, serde_json::json!({})),
            Err(e) => {
                // §7: BM25 failure after a successful vector phase is a
                // non-fatal warning; the vector index remains usable.
                tracing::warn!(space = %req.space.name, error = %e, "bm25 rebuild failed, vector index remains usable");
            }
        }

        emit(
            ProgressEventType::Complete,
            serde_json::json!({
                "files_total": eligible.len(),
                "files_processed": files_processed,
                "chunks_total": chunks_total,
                "embedding_dim": embedding_dim,
            }),
        );

        if stopped {
            emit(ProgressEventType::Stopped, serde_json::json!({}));
        }

        Ok(IngestionOutcome {
            files_total: eligible.len(),
            files_processed,
            chunks_total,
            embedding_dim: Some(embedding_dim),
            indexed_metadata: new_metadata,
            stopped,
        })
    }

    /// Union semantics (§9 Open Question 1): merge the current batch with
    /// the previously saved BM25Artifact's contents/filenames, minus any
    /// filenames just deleted in this run's incremental pass, then
    /// rebuild from the union. Diverges from current-batch-only rebuild,
    /// which would silently drop prior files from the sparse index.
    async fn rebuild_bm25(
        &self,
        space: &Space,
        batch_contents: &[String],
        batch_filenames: &[String],
        full_mode: bool,
    ) -> AppResult<()> {
        let mut contents = Vec::new();
        let mut filenames = Vec::new();

        if !full_mode {
            if let JsonGet::Found(value) = self.object_store.get_json(&space.storage_key, BM25_KEY).await? {
                if let Ok(prior) = serde_json::from_value::<Bm25Artifact>(value) {
                    let touched: std::collections::HashSet<&String> = batch_filenames.iter().collect();
                    for (content, filename) in prior.contents.into_iter().zip(prior.filenames.into_iter()) {
                        if !touched.contains(&filename) {
                            contents.push(content);
                            filenames.push(filename);
                        }
                    }
                }
            }
        }

        contents.extend_from_slice(batch_contents);
        filenames.extend_from_slice(batch_filenames);

        let index = Bm25Index::build(contents, filenames);
        let artifact = index.into_artifact();
        self.object_store
            .put_json(&space.storage_key, BM25_KEY, &serde_json::to_value(&artifact)?)
            .await
    }
}
