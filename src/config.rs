use serde::{Deserialize, Serialize};

/// Canonical list of file extensions considered indexable. The ingestion
/// walker is the single caller that consults this list, so there is only
/// one place extension support can drift.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // Documents (extracted via an opaque TextExtractor)
    "pdf", "docx", "xlsx", "pptx",
    // Text / docs
    "md", "mdx", "txt", "rst",
    // Code
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "rs", "py", "go", "java", "c",
    "cpp", "h", "hpp", "cs", "rb", "php", "swift", "kt", "scala", "sql",
    "sh", "bash", "zsh", "fish",
    // Data / config
    "json", "yaml", "yml", "toml", "xml",
];

/// Directory components that are never eligible for indexing, regardless
/// of file extension (§4.6 step 4).
pub const EXCLUDED_DIR_COMPONENTS: &[&str] = &[".git", "venv", "__pycache__", "node_modules"];

/// Check whether a file extension (without leading dot) is indexable.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// True if any component of `path` names an excluded directory.
pub fn has_excluded_component(path: &std::path::Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| EXCLUDED_DIR_COMPONENTS.contains(&s))
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub milvus_host: String,
    pub milvus_port: u16,
    pub minio_endpoint: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    /// Local scratch root uploads are downloaded into before extraction.
    pub project_path: String,
    /// Bounded progress-queue capacity (§9: "capacity small, e.g. 1024").
    pub progress_queue_capacity: usize,
    /// Broadcaster drain tick rate in Hz (§5: "~10 Hz or on each enqueue").
    pub broadcaster_tick_hz: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            milvus_host: std::env::var("MILVUS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            milvus_port: std::env::var("MILVUS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(19530),
            minio_endpoint: std::env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| "localhost:9000".to_string()),
            minio_access_key: std::env::var("MINIO_ACCESS_KEY").unwrap_or_default(),
            minio_secret_key: std::env::var("MINIO_SECRET_KEY").unwrap_or_default(),
            project_path: std::env::var("PROJECT_PATH")
                .unwrap_or_else(|_| "/workspace".to_string()),
            progress_queue_capacity: std::env::var("INDEX_PROGRESS_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            broadcaster_tick_hz: std::env::var("INDEX_BROADCASTER_TICK_HZ")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn supported_extension_is_case_insensitive() {
        assert!(is_supported_extension("MD"));
        assert!(is_supported_extension("rs"));
        assert!(!is_supported_extension("exe"));
    }

    #[test]
    fn excludes_nested_venv() {
        assert!(has_excluded_component(Path::new("src/venv/lib/x.py")));
        assert!(!has_excluded_component(Path::new("src/lib/x.py")));
    }
}
