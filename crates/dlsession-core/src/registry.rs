//! Live-task lookup and lifecycle operations against the underlying engine.
//!
//! The engine keeps no per-key index, so lookup is enumerate-and-filter.
//! Every mutation holds a per-key lock: two concurrent starts (or a
//! pause racing a resume) on the same key serialize here, which is what
//! keeps at most one live task per key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use crate::engine::TransferEngine;
use crate::store::ResumeStateStore;
use dlsession_types::TaskSnapshot;

pub struct TransferRegistry {
    engine: Arc<dyn TransferEngine>,
    store: ResumeStateStore,
    key_locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Bounds concurrent engine operations (default 3).
    ops: Semaphore,
}

impl TransferRegistry {
    pub fn new(
        engine: Arc<dyn TransferEngine>,
        store: ResumeStateStore,
        max_concurrent: usize,
    ) -> Self {
        Self {
            engine,
            store,
            key_locks: SyncMutex::new(HashMap::new()),
            ops: Semaphore::new(max_concurrent.max(1)),
        }
    }

    async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock();
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn find_task(&self, key: &str) -> Option<TaskSnapshot> {
        self.engine
            .live_tasks()
            .await
            .into_iter()
            .find(|task| task.matches_key(key))
    }

    /// The live task for `key`, if any.
    pub async fn current_task(&self, key: &str) -> Option<TaskSnapshot> {
        let _permit = self.ops.acquire().await.ok();
        self.find_task(key).await
    }

    /// Create a live task for `key` unless one already exists.
    pub async fn start(&self, key: &str, url: Url) {
        let _guard = self.lock_key(key).await;
        let _permit = self.ops.acquire().await.ok();

        if self.find_task(key).await.is_some() {
            debug!("transfer {} already live, ignoring start", key);
            return;
        }
        let id = self.engine.start_task(key, url).await;
        info!("started transfer {} as task {}", key, id);
    }

    /// Cancel-with-resume the live task and persist whatever blob the
    /// engine yields. No blob means the transfer state is lost and nothing
    /// is written.
    pub async fn pause(&self, key: &str) {
        let _guard = self.lock_key(key).await;
        let _permit = self.ops.acquire().await.ok();

        let Some(task) = self.find_task(key).await else {
            debug!("no live task for {}, ignoring pause", key);
            return;
        };
        match self.engine.cancel_with_resume(task.id).await {
            Some(blob) => {
                self.store.write(key, &blob);
                info!("paused transfer {}, resume record is {} bytes", key, blob.len());
            }
            None => warn!("no resume state produced for {}; transfer state lost", key),
        }
    }

    /// Recreate a live task from the persisted record. The record is
    /// deleted exactly once, at the moment its blob is consumed.
    pub async fn resume(&self, key: &str) {
        let _guard = self.lock_key(key).await;
        let _permit = self.ops.acquire().await.ok();

        if self.find_task(key).await.is_some() {
            debug!("transfer {} already live, ignoring resume", key);
            return;
        }
        let Some(blob) = self.store.read(key) else {
            debug!("no resume record for {}, ignoring resume", key);
            return;
        };
        let id = self.engine.resume_task(key, blob).await;
        self.store.clear(key);
        info!("resumed transfer {} as task {}", key, id);
    }

    /// Cancel any live task and delete any record, unconditionally.
    pub async fn cancel(&self, key: &str) {
        let _guard = self.lock_key(key).await;
        let _permit = self.ops.acquire().await.ok();

        self.store.clear(key);
        if let Some(task) = self.find_task(key).await {
            self.engine.cancel(task.id).await;
            info!("cancelled transfer {}", key);
        }
    }
}
