//! Per-Space chat session persistence (§4.5): append-only JSON per
//! session under `chats/session<N>.json` in the ObjectStore.

use crate::error::{AppError, AppResult};
use crate::model::{ChatMessage, Space};
use crate::object_store::{JsonGet, ObjectStore};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const SESSION_PREFIX: &str = "chats/session";
const SESSION_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_messages: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

fn session_key(id: u64) -> String {
    format!("{SESSION_PREFIX}{id}{SESSION_SUFFIX}")
}

fn parse_session_id(key: &str) -> Option<u64> {
    key.strip_prefix(SESSION_PREFIX)?
        .strip_suffix(SESSION_SUFFIX)?
        .parse()
        .ok()
}

/// Single-process deployment model (§9 Open Question 2): a per-Space
/// `tokio::sync::Mutex` serializes each session file's read-modify-write.
/// Multi-process deployment, where this would need object-store-level
/// conditional writes, is explicitly out of scope.
pub struct SessionStore {
    object_store: Arc<dyn ObjectStore>,
    active_session: DashMap<String, u64>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionStore {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            active_session: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, storage_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(storage_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Ordered by id descending; ids are parsed from the key pattern
    /// `chats/session<N>.json`, skipping malformed keys.
    pub async fn sessions(&self, space: &Space) -> AppResult<Vec<SessionHandle>> {
        let keys = self.object_store.list_objects(&space.storage_key, SESSION_PREFIX).await?;
        let mut ids: Vec<u64> = keys.iter().filter_map(|k| parse_session_id(k)).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids.into_iter().map(|id| SessionHandle { id }).collect())
    }

    async fn highest_session_id(&self, space: &Space) -> AppResult<Option<u64>> {
        Ok(self.sessions(space).await?.into_iter().map(|h| h.id).max())
    }

    pub async fn load(&self, space: &Space, id: u64) -> AppResult<Vec<ChatMessage>> {
        let key = session_key(id);
        let messages = match self.object_store.get_json(&space.storage_key, &key).await? {
            JsonGet::Found(value) => serde_json::from_value(value)?,
            JsonGet::Absent => return Err(AppError::NotFound(format!("session {id} in space {}", space.name))),
        };
        self.active_session.insert(space.storage_key.clone(), id);
        Ok(messages)
    }

    /// Ensures an active session exists (picking the highest existing N,
    /// or 1 on first access), then read-modify-writes the session file.
    pub async fn append(&self, space: &Space, message: ChatMessage) -> AppResult<u64> {
        let lock = self.lock_for(&space.storage_key);
        let _guard = lock.lock().await;

        let id = match self.active_session.get(&space.storage_key).map(|e| *e) {
            Some(id) => id,
            None => self.highest_session_id(space).await?.unwrap_or(1),
        };

        let key = session_key(id);
        let mut messages: Vec<ChatMessage> = match self.object_store.get_json(&space.storage_key, &key).await? {
            JsonGet::Found(value) => serde_json::from_value(value).unwrap_or_default(),
            JsonGet::Absent => Vec::new(),
        };
        messages.push(message);
        self.object_store
            .put_json(&space.storage_key, &key, &serde_json::to_value(&messages)?)
            .await?;
        self.active_session.insert(space.storage_key.clone(), id);
        Ok(id)
    }

    /// Allocates `max_N + 1`, writes an empty list, and makes it active.
    pub async fn clear(&self, space: &Space) -> AppResult<u64> {
        let lock = self.lock_for(&space.storage_key);
        let _guard = lock.lock().await;

        let new_id = self.highest_session_id(space).await?.map(|n| n + 1).unwrap_or(1);
        let key = session_key(new_id);
        self.object_store
            .put_json(&space.storage_key, &key, &serde_json::to_value::<Vec<ChatMessage>>(&Vec::new())?)
            .await?;
        self.active_session.insert(space.storage_key.clone(), new_id);
        Ok(new_id)
    }

    pub async fn stats(&self, space: &Space) -> AppResult<SessionStats> {
        let handles = self.sessions(space).await?;
        let mut total_messages = 0;
        let mut last_activity = None;
        for handle in &handles {
            if let JsonGet::Found(value) = self
                .object_store
                .get_json(&space.storage_key, &session_key(handle.id))
                .await?
            {
                if let Ok(messages) = serde_json::from_value::<Vec<ChatMessage>>(value) {
                    total_messages += messages.len();
                    if let Some(last) = messages.last() {
                        last_activity = last_activity.max(Some(last.timestamp));
                    }
                }
            }
        }
        Ok(SessionStats {
            total_sessions: handles.len(),
            total_messages,
            last_activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, SpaceConfig};
    use crate::object_store::fakes::InMemoryObjectStore;

    fn test_space() -> Space {
        Space::new("Docs A".into(), "docs-a".into(), "Docs_A".into(), SpaceConfig::default())
    }

    fn test_message(content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
            sources: None,
        }
    }

    #[tokio::test]
    async fn append_picks_session_one_on_first_access() {
        let object_store = Arc::new(InMemoryObjectStore::new());
        object_store.ensure_bucket("docs-a").await.unwrap();
        let store = SessionStore::new(object_store);
        let space = test_space();
        let id = store.append(&space, test_message("hi")).await.unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn clear_allocates_new_highest_id_with_empty_contents() {
        let object_store = Arc::new(InMemoryObjectStore::new());
        object_store.ensure_bucket("docs-a").await.unwrap();
        let store = SessionStore::new(object_store);
        let space = test_space();
        store.append(&space, test_message("hi")).await.unwrap();
        let new_id = store.clear(&space).await.unwrap();
        assert_eq!(new_id, 2);
        let sessions = store.sessions(&space).await.unwrap();
        assert_eq!(sessions[0].id, 2);
        let messages = store.load(&space, new_id).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn sessions_ordered_descending_and_skip_malformed_keys() {
        let object_store = Arc::new(InMemoryObjectStore::new());
        object_store.ensure_bucket("docs-a").await.unwrap();
        object_store
            .put_bytes("docs-a", "chats/not-a-session.json", b"{}".to_vec(), None)
            .await
            .unwrap();
        let store = SessionStore::new(object_store);
        let space = test_space();
        store.append(&space, test_message("a")).await.unwrap();
        store.clear(&space).await.unwrap();
        store.append(&space, test_message("b")).await.unwrap();
        let sessions = store.sessions(&space).await.unwrap();
        assert_eq!(sessions.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn stats_counts_messages_across_sessions() {
        let object_store = Arc::new(InMemoryObjectStore::new());
        object_store.ensure_bucket("docs-a").await.unwrap();
        let store = SessionStore::new(object_store);
        let space = test_space();
        store.append(&space, test_message("a")).await.unwrap();
        store.append(&space, test_message("b")).await.unwrap();
        let stats = store.stats(&space).await.unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_messages, 2);
    }
}
