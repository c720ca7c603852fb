//! Typed wrapper over an S3-compatible blob store (§4.1). Owns bucket
//! lifecycle, object CRUD, JSON get/put, prefix listing, and streaming
//! download to a local cache directory.

use crate::error::{AppError, AppResult};
use crate::sanitize::sanitize_bucket_name;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

/// Result of a JSON read that distinguishes "object absent" from "object
/// present but unreadable/corrupt" — replacing the exception-as-signal
/// pattern where both collapse into `{}` (§9 "error-flow control").
#[derive(Debug, Clone, PartialEq)]
pub enum JsonGet {
    Found(Value),
    Absent,
}

impl JsonGet {
    /// Collapses `Absent` to an empty object, preserving the legacy
    /// "absence → empty object" behavior for callers that explicitly want
    /// it (§9: "only when callers explicitly opt in").
    pub fn or_empty_object(self) -> Value {
        match self {
            JsonGet::Found(v) => v,
            JsonGet::Absent => Value::Object(Default::default()),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent create; sanitizes `name` to a storage key internally.
    async fn ensure_bucket(&self, name: &str) -> AppResult<String>;
    async fn list_buckets(&self) -> AppResult<Vec<String>>;
    /// Recursive listing under `prefix`; returns full object keys.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> AppResult<Vec<String>>;
    async fn put_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> AppResult<()>;
    async fn put_json(&self, bucket: &str, key: &str, value: &Value) -> AppResult<()>;
    async fn get_bytes(&self, bucket: &str, key: &str) -> AppResult<Vec<u8>>;
    async fn get_json(&self, bucket: &str, key: &str) -> AppResult<JsonGet>;
    async fn remove_object(&self, bucket: &str, key: &str) -> AppResult<()>;
    /// Recursive delete: list, remove all, remove the bucket.
    async fn delete_bucket(&self, bucket: &str) -> AppResult<()>;
    /// Streams every object under `prefix` to `local_dir/<key>`, creating
    /// intermediate directories as needed.
    async fn download_prefix(&self, bucket: &str, prefix: &str, local_dir: &Path) -> AppResult<Vec<String>>;
}

/// Normalizes a user-supplied display name to its storage key. All trait
/// methods receive bucket names that have already passed through here at
/// the call site that owns the Space (`SpaceRegistry`); this helper exists
/// so `ensure_bucket` itself is idempotent even if called directly.
pub fn storage_key(name: &str) -> String {
    sanitize_bucket_name(name)
}

pub mod s3 {
    use super::*;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;

    pub struct S3ObjectStore {
        client: Client,
    }

    impl S3ObjectStore {
        pub async fn connect(endpoint: &str, access_key: &str, secret_key: &str) -> AppResult<Self> {
            let creds = aws_sdk_s3::config::Credentials::new(access_key, secret_key, None, None, "static");
            let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_sdk_s3::config::Region::new("us-east-1"))
                .endpoint_url(format!("http://{endpoint}"))
                .credentials_provider(creds)
                .load()
                .await;
            let s3_config = aws_sdk_s3::config::Builder::from(&config)
                .force_path_style(true)
                .build();
            Ok(Self {
                client: Client::from_conf(s3_config),
            })
        }
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn ensure_bucket(&self, name: &str) -> AppResult<String> {
            let key = storage_key(name);
            match self.client.head_bucket().bucket(&key).send().await {
                Ok(_) => Ok(key),
                Err(_) => {
                    self.client
                        .create_bucket()
                        .bucket(&key)
                        .send()
                        .await
                        .map_err(|e| AppError::Upstream(format!("create_bucket {key}: {e}")))?;
                    Ok(key)
                }
            }
        }

        async fn list_buckets(&self) -> AppResult<Vec<String>> {
            let resp = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|e| AppError::Upstream(format!("list_buckets: {e}")))?;
            Ok(resp
                .buckets()
                .iter()
                .filter_map(|b| b.name().map(str::to_string))
                .collect())
        }

        async fn list_objects(&self, bucket: &str, prefix: &str) -> AppResult<Vec<String>> {
            let mut keys = Vec::new();
            let mut continuation = None;
            loop {
                let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
                if let Some(token) = continuation.take() {
                    req = req.continuation_token(token);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| AppError::Upstream(format!("list_objects {bucket}/{prefix}: {e}")))?;
                keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));
                if resp.is_truncated().unwrap_or(false) {
                    continuation = resp.next_continuation_token().map(str::to_string);
                } else {
                    break;
                }
            }
            Ok(keys)
        }

        async fn put_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> AppResult<()> {
            let mut req = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(bytes));
            if let Some(ct) = content_type {
                req = req.content_type(ct);
            }
            req.send()
                .await
                .map_err(|e| AppError::Upstream(format!("put_object {bucket}/{key}: {e}")))?;
            Ok(())
        }

        async fn put_json(&self, bucket: &str, key: &str, value: &Value) -> AppResult<()> {
            let bytes = serde_json::to_vec(value)?;
            self.put_bytes(bucket, key, bytes, Some("application/json")).await
        }

        async fn get_bytes(&self, bucket: &str, key: &str) -> AppResult<Vec<u8>> {
            let resp = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|_| AppError::NotFound(format!("{bucket}/{key}")))?;
            let bytes = resp
                .body
                .collect()
                .await
                .map_err(|e| AppError::Upstream(format!("read body {bucket}/{key}: {e}")))?;
            Ok(bytes.into_bytes().to_vec())
        }

        async fn get_json(&self, bucket: &str, key: &str) -> AppResult<JsonGet> {
            match self.get_bytes(bucket, key).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(value) => Ok(JsonGet::Found(value)),
                    Err(_) => Ok(JsonGet::Absent),
                },
                Err(AppError::NotFound(_)) => Ok(JsonGet::Absent),
                Err(other) => Err(other),
            }
        }

        async fn remove_object(&self, bucket: &str, key: &str) -> AppResult<()> {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| AppError::Upstream(format!("delete_object {bucket}/{key}: {e}")))?;
            Ok(())
        }

        async fn delete_bucket(&self, bucket: &str) -> AppResult<()> {
            let keys = self.list_objects(bucket, "").await?;
            for key in keys {
                self.remove_object(bucket, &key).await?;
            }
            self.client
                .delete_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| AppError::Upstream(format!("delete_bucket {bucket}: {e}")))?;
            Ok(())
        }

        async fn download_prefix(&self, bucket: &str, prefix: &str, local_dir: &Path) -> AppResult<Vec<String>> {
            let keys = self.list_objects(bucket, prefix).await?;
            let mut downloaded = Vec::with_capacity(keys.len());
            for key in &keys {
                let bytes = self.get_bytes(bucket, key).await?;
                let dest = local_dir.join(key);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&dest, bytes).await?;
                downloaded.push(key.clone());
            }
            Ok(downloaded)
        }
    }
}
