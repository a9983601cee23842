//! dlsession core - resumable keyed downloads
//!
//! The coordinator manages concurrent, pausable, resumable downloads
//! identified by stable caller-supplied keys. It persists resume state
//! across restarts, merges on-disk records with live engine tasks into one
//! status view, and fans out finished/failed/progress events.

pub mod engine;
mod error;
mod events;
mod registry;
mod store;

pub use engine::{HttpTransferEngine, ResumeBlob, TransferEngine};
pub use error::SessionError;
pub use events::{DelegateGuard, EventNotifier, TransferDelegate};
pub use registry::TransferRegistry;
pub use store::{extract_received_bytes, ResumeStateStore};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use dlsession_types::{
    CompletionOutcome, EngineEvent, TaskState, TransferEvent, TransferState, TransferStatus,
};

/// Coordinator construction parameters.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Root directory; resume records live in a subdirectory of it.
    pub data_dir: PathBuf,
    /// Bound on concurrent engine operations.
    pub max_concurrent: usize,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "dlsession")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir,
            max_concurrent: 3,
            event_capacity: 256,
        }
    }
}

/// Orchestrates start/pause/resume/cancel/status for keyed transfers by
/// composing the registry, the resume-state store, and the notifier.
///
/// Explicitly constructed; whoever assembles the process owns it and its
/// lifetime. Dropping it stops event delivery.
pub struct DownloadCoordinator {
    registry: TransferRegistry,
    store: ResumeStateStore,
    notifier: EventNotifier,
    engine: Arc<dyn TransferEngine>,
    pump: JoinHandle<()>,
}

impl DownloadCoordinator {
    /// Wire a coordinator to an engine and the engine's event stream.
    pub fn new(
        engine: Arc<dyn TransferEngine>,
        engine_events: mpsc::Receiver<EngineEvent>,
        config: CoordinatorConfig,
    ) -> Self {
        let store = ResumeStateStore::new(&config.data_dir);
        let registry =
            TransferRegistry::new(engine.clone(), store.clone(), config.max_concurrent);
        let notifier = EventNotifier::new(config.event_capacity);
        let pump = tokio::spawn(run_event_pump(
            engine.clone(),
            store.clone(),
            notifier.clone(),
            engine_events,
        ));
        Self {
            registry,
            store,
            notifier,
            engine,
            pump,
        }
    }

    /// Start a new transfer for `key` unless one is already live. The only
    /// synchronous failure is an unparsable URL.
    pub async fn start_download(&self, key: &str, url: &str) -> Result<(), SessionError> {
        let url = Url::parse(url).map_err(|_| SessionError::InvalidUrl(url.to_string()))?;
        self.registry.start(key, url).await;
        Ok(())
    }

    /// Interrupt the live transfer for `key`, persisting resume state when
    /// the engine can produce it.
    pub async fn pause_download(&self, key: &str) {
        self.registry.pause(key).await;
    }

    /// Continue a paused transfer from its persisted record, consuming the
    /// record. No record, no effect.
    pub async fn resume_download(&self, key: &str) {
        self.registry.resume(key).await;
    }

    /// Drop the transfer entirely: live task cancelled, record deleted.
    pub async fn cancel_download(&self, key: &str) {
        self.registry.cancel(key).await;
        self.notifier.progress(key, 0);
    }

    /// One status per known key: every persisted record contributes a
    /// Paused entry, then live tasks overwrite. Live always wins.
    pub async fn get_all_statuses(&self) -> HashMap<String, TransferStatus> {
        let mut statuses = HashMap::new();

        for key in self.store.list_keys() {
            let bytes = self
                .store
                .read(&key)
                .map(|blob| extract_received_bytes(&blob))
                .unwrap_or(0);
            statuses.insert(
                key,
                TransferStatus {
                    state: TransferState::Paused,
                    bytes_received: bytes,
                },
            );
        }

        for task in self.engine.live_tasks().await {
            let Some(key) = task.key else {
                warn!("live task {} carries no key, skipping", task.id);
                continue;
            };
            statuses.insert(
                key,
                TransferStatus {
                    state: derive_state(task.state),
                    bytes_received: task.bytes_received,
                },
            );
        }

        statuses
    }

    /// Full-set computation filtered to one key; fine for registries of
    /// modest size. A key nobody ever started is Absent at 0 bytes.
    pub async fn get_one_status(&self, key: &str) -> TransferStatus {
        self.get_all_statuses()
            .await
            .remove(key)
            .unwrap_or_default()
    }

    /// Open-ended subscription to transfer events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.notifier.subscribe()
    }

    /// Attach the single typed delegate; the guard detaches it on drop.
    pub fn set_delegate(&self, delegate: Arc<dyn TransferDelegate>) -> DelegateGuard {
        self.notifier.set_delegate(delegate)
    }
}

impl Drop for DownloadCoordinator {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn derive_state(state: TaskState) -> TransferState {
    match state {
        TaskState::Running => TransferState::Downloading,
        // a just-completed handle still counts as paused until it is gone
        TaskState::Suspended | TaskState::Completed => TransferState::Paused,
        TaskState::Cancelling => TransferState::Absent,
    }
}

/// The one designated execution context: every engine callback lands here,
/// so per-key event order follows engine callback order and both event
/// sinks fire from a single task.
async fn run_event_pump(
    engine: Arc<dyn TransferEngine>,
    store: ResumeStateStore,
    notifier: EventNotifier,
    mut events: mpsc::Receiver<EngineEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Progress {
                task,
                key,
                bytes_received,
                bytes_expected,
            } => {
                let Some(key) = key else {
                    warn!("received progress for unknown task {}", task);
                    engine.cancel(task).await;
                    continue;
                };
                if bytes_expected.is_some_and(|total| total > 0) {
                    notifier.progress(&key, bytes_received);
                }
            }
            EngineEvent::Completed { task, key, outcome } => {
                let Some(key) = key else {
                    warn!("received completion for unknown task {}", task);
                    engine.cancel(task).await;
                    continue;
                };
                match outcome {
                    CompletionOutcome::Finished {
                        location,
                        status_code,
                    } => {
                        if (200..=299).contains(&status_code) {
                            store.clear(&key);
                            notifier.finished(&key, &location);
                        } else {
                            let err = SessionError::Server {
                                status: status_code,
                            };
                            notifier.failed(&key, &err.to_string());
                        }
                    }
                    CompletionOutcome::Failed {
                        reason,
                        resume_blob: Some(blob),
                    } => {
                        // Recoverable: persist the blob and go quiet. The
                        // key shows up as Paused until the caller resumes.
                        info!("transfer {} interrupted ({}), resume state saved", key, reason);
                        store.write(&key, &blob);
                    }
                    CompletionOutcome::Failed {
                        reason,
                        resume_blob: None,
                    } => {
                        notifier.failed(&key, &reason);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dlsession_types::TaskSnapshot;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::time::timeout;
    use uuid::Uuid;

    struct MockTask {
        key: Option<String>,
        state: TaskState,
        bytes_received: u64,
    }

    struct MockEngine {
        tasks: parking_lot::Mutex<HashMap<Uuid, MockTask>>,
        events: mpsc::Sender<EngineEvent>,
        starts: AtomicUsize,
        resumes: AtomicUsize,
        pause_blob: parking_lot::Mutex<Option<Vec<u8>>>,
        list_delay: Duration,
    }

    impl MockEngine {
        fn new() -> (Arc<Self>, mpsc::Receiver<EngineEvent>) {
            Self::with_list_delay(Duration::ZERO)
        }

        fn with_list_delay(list_delay: Duration) -> (Arc<Self>, mpsc::Receiver<EngineEvent>) {
            let (tx, rx) = mpsc::channel(64);
            let engine = Arc::new(Self {
                tasks: parking_lot::Mutex::new(HashMap::new()),
                events: tx,
                starts: AtomicUsize::new(0),
                resumes: AtomicUsize::new(0),
                pause_blob: parking_lot::Mutex::new(None),
                list_delay,
            });
            (engine, rx)
        }

        fn set_pause_blob(&self, blob: &[u8]) {
            *self.pause_blob.lock() = Some(blob.to_vec());
        }

        fn task_id(&self, key: &str) -> Option<Uuid> {
            self.tasks
                .lock()
                .iter()
                .find(|(_, t)| t.key.as_deref() == Some(key))
                .map(|(id, _)| *id)
        }

        fn insert_keyless(&self) -> Uuid {
            let id = Uuid::new_v4();
            self.tasks.lock().insert(
                id,
                MockTask {
                    key: None,
                    state: TaskState::Running,
                    bytes_received: 0,
                },
            );
            id
        }

        fn contains(&self, id: Uuid) -> bool {
            self.tasks.lock().contains_key(&id)
        }

        /// Emulates the engine finishing a task: the handle leaves the live
        /// set and the completion event fires.
        async fn complete(&self, key: &str, outcome: CompletionOutcome) {
            let id = self.task_id(key).unwrap_or_else(Uuid::new_v4);
            self.tasks.lock().remove(&id);
            self.events
                .send(EngineEvent::Completed {
                    task: id,
                    key: Some(key.to_string()),
                    outcome,
                })
                .await
                .unwrap();
        }

        async fn emit(&self, event: EngineEvent) {
            self.events.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl TransferEngine for MockEngine {
        async fn start_task(&self, key: &str, _url: Url) -> Uuid {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let id = Uuid::new_v4();
            self.tasks.lock().insert(
                id,
                MockTask {
                    key: Some(key.to_string()),
                    state: TaskState::Running,
                    bytes_received: 0,
                },
            );
            id
        }

        async fn resume_task(&self, key: &str, blob: Vec<u8>) -> Uuid {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            let id = Uuid::new_v4();
            self.tasks.lock().insert(
                id,
                MockTask {
                    key: Some(key.to_string()),
                    state: TaskState::Running,
                    bytes_received: extract_received_bytes(&blob),
                },
            );
            id
        }

        async fn live_tasks(&self) -> Vec<TaskSnapshot> {
            tokio::time::sleep(self.list_delay).await;
            self.tasks
                .lock()
                .iter()
                .map(|(id, t)| TaskSnapshot {
                    id: *id,
                    key: t.key.clone(),
                    state: t.state,
                    bytes_received: t.bytes_received,
                    bytes_expected: None,
                })
                .collect()
        }

        async fn cancel(&self, id: Uuid) {
            self.tasks.lock().remove(&id);
        }

        async fn cancel_with_resume(&self, id: Uuid) -> Option<Vec<u8>> {
            self.tasks.lock().remove(&id)?;
            self.pause_blob.lock().clone()
        }
    }

    fn coordinator(
        dir: &TempDir,
        engine: Arc<MockEngine>,
        events: mpsc::Receiver<EngineEvent>,
    ) -> DownloadCoordinator {
        DownloadCoordinator::new(
            engine,
            events,
            CoordinatorConfig {
                data_dir: dir.path().to_path_buf(),
                max_concurrent: 3,
                event_capacity: 64,
            },
        )
    }

    fn record_path(dir: &TempDir, key: &str) -> PathBuf {
        dir.path().join("resume-state").join(key)
    }

    async fn next_event(rx: &mut broadcast::Receiver<TransferEvent>) -> TransferEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Pushes a marker progress event through the pump and waits for it to
    /// come out the broadcast side, proving everything queued before it was
    /// already processed.
    async fn flush_pump(
        engine: &MockEngine,
        rx: &mut broadcast::Receiver<TransferEvent>,
    ) -> TransferEvent {
        engine
            .emit(EngineEvent::Progress {
                task: Uuid::new_v4(),
                key: Some("__probe__".to_string()),
                bytes_received: 1,
                bytes_expected: Some(1),
            })
            .await;
        next_event(rx).await
    }

    #[tokio::test]
    async fn unknown_key_is_absent_at_zero() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine, events);

        let status = coord.get_one_status("never-started").await;
        assert_eq!(status.state, TransferState::Absent);
        assert_eq!(status.bytes_received, 0);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);

        let err = coord.start_download("k", "not a url").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidUrl(_)));
        assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_starts_create_one_task() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::with_list_delay(Duration::from_millis(50));
        let coord = coordinator(&dir, engine.clone(), events);

        let (a, b) = tokio::join!(
            coord.start_download("iso", "http://mirror.test/iso"),
            coord.start_download("iso", "http://mirror.test/iso"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.tasks.lock().len(), 1);
    }

    #[tokio::test]
    async fn started_key_reports_downloading() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);

        coord.start_download("k", "http://host.test/k").await.unwrap();
        if let Some(task) = engine.tasks.lock().values_mut().next() {
            task.bytes_received = 321;
        }

        let status = coord.get_one_status("k").await;
        assert_eq!(status.state, TransferState::Downloading);
        assert_eq!(status.bytes_received, 321);
    }

    #[tokio::test]
    async fn pause_persists_the_resume_blob() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        engine.set_pause_blob(br#"{"bytes_received":1234}"#);
        let coord = coordinator(&dir, engine.clone(), events);

        coord.start_download("k", "http://host.test/k").await.unwrap();
        coord.pause_download("k").await;

        assert!(engine.tasks.lock().is_empty());
        assert!(record_path(&dir, "k").exists());

        let status = coord.get_one_status("k").await;
        assert_eq!(status.state, TransferState::Paused);
        assert_eq!(status.bytes_received, 1234);
    }

    #[tokio::test]
    async fn pause_without_blob_loses_the_transfer() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);

        coord.start_download("k", "http://host.test/k").await.unwrap();
        coord.pause_download("k").await;

        assert!(!record_path(&dir, "k").exists());
        assert_eq!(coord.get_one_status("k").await.state, TransferState::Absent);
    }

    #[tokio::test]
    async fn resume_consumes_the_record_exactly_once() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);

        std::fs::create_dir_all(dir.path().join("resume-state")).unwrap();
        std::fs::write(record_path(&dir, "k"), br#"{"bytes_received":500}"#).unwrap();

        coord.resume_download("k").await;
        assert_eq!(engine.resumes.load(Ordering::SeqCst), 1);
        assert!(!record_path(&dir, "k").exists());
        let status = coord.get_one_status("k").await;
        assert_eq!(status.state, TransferState::Downloading);
        assert_eq!(status.bytes_received, 500);

        // live task present: resume is a no-op
        coord.resume_download("k").await;
        assert_eq!(engine.resumes.load(Ordering::SeqCst), 1);

        // no task, no record: still a no-op
        engine.tasks.lock().clear();
        coord.resume_download("k").await;
        assert_eq!(engine.resumes.load(Ordering::SeqCst), 1);
        assert!(engine.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn cancel_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();

        coord.start_download("k", "http://host.test/k").await.unwrap();
        std::fs::write(record_path(&dir, "k"), br#"{"bytes_received":10}"#).unwrap();

        coord.cancel_download("k").await;

        assert!(engine.tasks.lock().is_empty());
        assert!(!record_path(&dir, "k").exists());
        let status = coord.get_one_status("k").await;
        assert_eq!(status, TransferStatus::default());

        match next_event(&mut rx).await {
            TransferEvent::Progress {
                key,
                bytes_received,
            } => {
                assert_eq!(key, "k");
                assert_eq!(bytes_received, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_of_a_paused_key_drops_the_record() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine, events);

        std::fs::create_dir_all(dir.path().join("resume-state")).unwrap();
        std::fs::write(record_path(&dir, "k"), br#"{"bytes_received":77}"#).unwrap();

        coord.cancel_download("k").await;
        assert!(!record_path(&dir, "k").exists());
        assert_eq!(coord.get_one_status("k").await.state, TransferState::Absent);
    }

    #[tokio::test]
    async fn finished_clears_the_record_and_notifies() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();

        coord.start_download("k", "http://host.test/k").await.unwrap();
        std::fs::write(record_path(&dir, "k"), br#"{"bytes_received":10}"#).unwrap();

        engine
            .complete(
                "k",
                CompletionOutcome::Finished {
                    location: dir.path().join("k"),
                    status_code: 200,
                },
            )
            .await;

        match next_event(&mut rx).await {
            TransferEvent::Finished { key, location } => {
                assert_eq!(key, "k");
                assert_eq!(location, dir.path().join("k"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!record_path(&dir, "k").exists());
        assert_eq!(coord.get_one_status("k").await.state, TransferState::Absent);
    }

    #[tokio::test]
    async fn non_success_status_surfaces_as_failed() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();

        coord.start_download("k", "http://host.test/k").await.unwrap();
        std::fs::write(record_path(&dir, "k"), br#"{"bytes_received":10}"#).unwrap();

        engine
            .complete(
                "k",
                CompletionOutcome::Finished {
                    location: dir.path().join("k.part"),
                    status_code: 404,
                },
            )
            .await;

        match next_event(&mut rx).await {
            TransferEvent::Failed { key, reason } => {
                assert_eq!(key, "k");
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // a non-success finish does not touch the record
        assert!(record_path(&dir, "k").exists());
    }

    #[tokio::test]
    async fn recoverable_failure_is_silent_and_paused() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();

        coord.start_download("k", "http://host.test/k").await.unwrap();
        engine
            .complete(
                "k",
                CompletionOutcome::Failed {
                    reason: "connection reset".to_string(),
                    resume_blob: Some(br#"{"bytes_received":777}"#.to_vec()),
                },
            )
            .await;

        // the next event out of the pump is our probe, not a failure
        match flush_pump(&engine, &mut rx).await {
            TransferEvent::Progress { key, .. } => assert_eq!(key, "__probe__"),
            other => panic!("unexpected event: {other:?}"),
        }

        let status = coord.get_one_status("k").await;
        assert_eq!(status.state, TransferState::Paused);
        assert_eq!(status.bytes_received, 777);
    }

    #[tokio::test]
    async fn permanent_failure_surfaces_exactly_once() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();

        coord.start_download("k", "http://host.test/k").await.unwrap();
        engine
            .complete(
                "k",
                CompletionOutcome::Failed {
                    reason: "no route to host".to_string(),
                    resume_blob: None,
                },
            )
            .await;

        match next_event(&mut rx).await {
            TransferEvent::Failed { key, reason } => {
                assert_eq!(key, "k");
                assert_eq!(reason, "no route to host");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(coord.get_one_status("k").await.state, TransferState::Absent);
    }

    #[tokio::test]
    async fn keyless_task_is_cancelled_and_dropped() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();

        let id = engine.insert_keyless();
        engine
            .emit(EngineEvent::Completed {
                task: id,
                key: None,
                outcome: CompletionOutcome::Failed {
                    reason: "whatever".to_string(),
                    resume_blob: None,
                },
            })
            .await;

        match flush_pump(&engine, &mut rx).await {
            TransferEvent::Progress { key, .. } => assert_eq!(key, "__probe__"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!engine.contains(id));
    }

    #[tokio::test]
    async fn progress_needs_a_known_total() {
        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();

        coord.start_download("k", "http://host.test/k").await.unwrap();
        let id = engine.task_id("k").unwrap();

        engine
            .emit(EngineEvent::Progress {
                task: id,
                key: Some("k".to_string()),
                bytes_received: 600,
                bytes_expected: None,
            })
            .await;
        engine
            .emit(EngineEvent::Progress {
                task: id,
                key: Some("k".to_string()),
                bytes_received: 700,
                bytes_expected: Some(1000),
            })
            .await;

        match next_event(&mut rx).await {
            TransferEvent::Progress {
                key,
                bytes_received,
            } => {
                assert_eq!(key, "k");
                assert_eq!(bytes_received, 700);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delegate_sees_completion() {
        struct Last {
            finished: parking_lot::Mutex<Option<(String, PathBuf)>>,
        }
        impl TransferDelegate for Last {
            fn transfer_finished(&self, key: &str, location: &Path) {
                *self.finished.lock() = Some((key.to_string(), location.to_path_buf()));
            }
            fn transfer_failed(&self, _key: &str, _reason: &str) {}
            fn transfer_progress(&self, _key: &str, _bytes_received: u64) {}
        }

        let dir = tempdir().unwrap();
        let (engine, events) = MockEngine::new();
        let coord = coordinator(&dir, engine.clone(), events);
        let mut rx = coord.subscribe();
        let last = Arc::new(Last {
            finished: parking_lot::Mutex::new(None),
        });
        let _guard = coord.set_delegate(last.clone());

        coord.start_download("k", "http://host.test/k").await.unwrap();
        engine
            .complete(
                "k",
                CompletionOutcome::Finished {
                    location: dir.path().join("k"),
                    status_code: 201,
                },
            )
            .await;

        next_event(&mut rx).await;
        let finished = last.finished.lock().clone();
        assert_eq!(finished, Some(("k".to_string(), dir.path().join("k"))));
    }
}
