//! Singleton orchestrator for indexing jobs (§4.8) plus the progress
//! broadcaster that fans events out to live subscribers.

use crate::error::{AppError, AppResult};
use crate::ingestion::{IngestionPipeline, IngestionRequest};
use crate::model::ProgressEvent;
use crate::object_store::ObjectStore;
use crate::space_registry::SpaceRegistry;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

const PROGRESS_STATE_KEY: &str = "progress_state.json";
/// Upper bound on the bridge channel between the worker and the bounded
/// queue below; large enough that `try_send` here never legitimately
/// fails — the oldest-drop policy is enforced by `ProgressQueue`, not by
/// this channel's own backpressure.
const BRIDGE_CHANNEL_CAPACITY: usize = 100_000;

/// Bounded, oldest-drop progress queue (capacity small, e.g. 1024).
/// A plain `VecDeque` behind a lock plus a `Notify`, rather than a
/// channel, because tokio's mpsc drops the *newest* item on overflow,
/// and here it's the oldest event that should give way.
struct ProgressQueue {
    capacity: usize,
    inner: SyncMutex<VecDeque<(String, ProgressEvent)>>,
    notify: Notify,
}

impl ProgressQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: SyncMutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, space_key: String, event: ProgressEvent) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back((space_key, event));
        drop(guard);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<(String, ProgressEvent)> {
        self.inner.lock().drain(..).collect()
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub is_running: bool,
    pub last_progress: Option<ProgressEvent>,
    pub subscriber_count: usize,
}

struct CurrentJob {
    space_key: String,
    stop_flag: Arc<AtomicBool>,
}

pub struct IndexingSupervisor {
    ingestion: Arc<IngestionPipeline>,
    space_registry: Arc<SpaceRegistry>,
    object_store: Arc<dyn ObjectStore>,
    is_running: Arc<AtomicBool>,
    current_job: SyncMutex<Option<CurrentJob>>,
    queue: Arc<ProgressQueue>,
    subscribers: DashMap<String, DashMap<Uuid, mpsc::Sender<ProgressEvent>>>,
    last_progress: DashMap<String, ProgressEvent>,
}

impl IndexingSupervisor {
    pub fn new(
        ingestion: Arc<IngestionPipeline>,
        space_registry: Arc<SpaceRegistry>,
        object_store: Arc<dyn ObjectStore>,
        queue_capacity: usize,
        broadcaster_tick_hz: u64,
    ) -> Arc<Self> {
        let supervisor = Arc::new(Self {
            ingestion,
            space_registry,
            object_store,
            is_running: Arc::new(AtomicBool::new(false)),
            current_job: SyncMutex::new(None),
            queue: Arc::new(ProgressQueue::new(queue_capacity)),
            subscribers: DashMap::new(),
            last_progress: DashMap::new(),
        });
        supervisor.clone().spawn_broadcaster(broadcaster_tick_hz);
        supervisor
    }

    fn spawn_broadcaster(self: Arc<Self>, tick_hz: u64) {
        let tick_period = std::time::Duration::from_millis(1000 / tick_hz.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.queue.wait() => {}
                }
                for (space_key, event) in self.queue.drain() {
                    self.deliver(&space_key, event).await;
                }
            }
        });
    }

    async fn deliver(&self, space_key: &str, event: ProgressEvent) {
        self.last_progress.insert(space_key.to_string(), event.clone());

        if let Ok(value) = serde_json::to_value(&serde_json::json!({
            "bucket_name": space_key,
            "last_progress": event,
        })) {
            let _ = self.object_store.put_json(space_key, PROGRESS_STATE_KEY, &value).await;
        }

        if let Some(subs) = self.subscribers.get(space_key) {
            let mut dead = Vec::new();
            for entry in subs.iter() {
                if entry.value().try_send(event.clone()).is_err() {
                    dead.push(*entry.key());
                }
            }
            for id in dead {
                subs.remove(&id);
            }
        }
    }

    /// At most one indexing job runs concurrently across the whole
    /// process; a start request while running fails fast with `Conflict`.
    pub fn start(
        self: &Arc<Self>,
        space_name: &str,
        target_paths: Vec<PathBuf>,
        embedding_model: String,
    ) -> AppResult<()> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::Conflict("an indexing job is already running".into()));
        }

        let space = match self.space_registry.get(space_name) {
            Ok(space) => space,
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let stop_flag = Arc::new(AtomicBool::new(false));
        *self.current_job.lock() = Some(CurrentJob {
            space_key: space.storage_key.clone(),
            stop_flag: stop_flag.clone(),
        });

        let supervisor = self.clone();
        let space_key = space.storage_key.clone();
        let (bridge_tx, mut bridge_rx) = mpsc::channel::<ProgressEvent>(BRIDGE_CHANNEL_CAPACITY);

        let queue = self.queue.clone();
        let bridge_space_key = space_key.clone();
        tokio::spawn(async move {
            while let Some(event) = bridge_rx.recv().await {
                queue.push(bridge_space_key.clone(), event);
            }
        });

        tokio::spawn(async move {
            let ingestion = supervisor.ingestion.clone();
            let req = IngestionRequest {
                space,
                target_paths,
                embedding_model,
            };
            let outcome = ingestion.run(req, stop_flag, bridge_tx).await;

            if let Ok(outcome) = &outcome {
                let _ = supervisor
                    .space_registry
                    .update_stats(space_name, outcome.files_total, outcome.embedding_dim)
                    .await;
            }

            *supervisor.current_job.lock() = None;
            supervisor.is_running.store(false, Ordering::SeqCst);

            if let Err(e) = outcome {
                tracing::warn!(space = %space_key, error = %e, "indexing job terminated with a fatal error");
            }
        });

        Ok(())
    }

    /// Sets the current job's cooperative stop flag and returns
    /// immediately; the worker exits at its next file or chunk boundary.
    pub fn stop(&self) {
        if let Some(job) = self.current_job.lock().as_ref() {
            job.stop_flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn status(&self, space_key: &str) -> SupervisorStatus {
        SupervisorStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            last_progress: self.last_progress.get(space_key).map(|e| e.clone()),
            subscriber_count: self.subscribers.get(space_key).map(|s| s.len()).unwrap_or(0),
        }
    }

    /// Registers a new subscriber for `space_key` and immediately returns
    /// the last persisted progress snapshot, if any, so a subscriber
    /// connecting mid-job resyncs without waiting for the next event
    /// (§8 scenario 6).
    pub fn subscribe(&self, space_key: &str) -> (mpsc::Receiver<ProgressEvent>, Option<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers
            .entry(space_key.to_string())
            .or_default()
            .insert(Uuid::new_v4(), tx);
        let last = self.last_progress.get(space_key).map(|e| e.clone());
        (rx, last)
    }
}
