//! reqwest-backed transfer engine with range-based resume.
//!
//! One task streams one response body into `<key>.part` under the download
//! directory. Interrupting a range-capable transfer yields a resume blob;
//! resuming re-stats the part file and continues with a `Range` request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::TransferEngine;
use crate::error::SessionError;
use dlsession_types::{CompletionOutcome, EngineEvent, TaskSnapshot, TaskState};

/// Sentinel for "the server never said" in the expected-bytes atomic.
const UNKNOWN: u64 = u64::MAX;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Serialized resume state. Opaque to every other layer; `bytes_received`
/// is the one field the store may introspect for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeBlob {
    pub url: String,
    pub part_path: PathBuf,
    pub bytes_received: u64,
    pub bytes_expected: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Per-task state shared between the engine handle and the worker.
struct TaskControl {
    key: String,
    url: String,
    bytes_received: AtomicU64,
    bytes_expected: AtomicU64,
    state: Mutex<TaskState>,
}

impl TaskControl {
    fn new(key: &str, url: String) -> Self {
        Self {
            key: key.to_string(),
            url,
            bytes_received: AtomicU64::new(0),
            bytes_expected: AtomicU64::new(UNKNOWN),
            state: Mutex::new(TaskState::Running),
        }
    }

    fn snapshot(&self, id: Uuid) -> TaskSnapshot {
        let expected = self.bytes_expected.load(Ordering::Acquire);
        TaskSnapshot {
            id,
            key: Some(self.key.clone()),
            state: *self.state.lock(),
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            bytes_expected: (expected != UNKNOWN).then_some(expected),
        }
    }
}

/// How a worker is asked to stop.
enum StopRequest {
    Discard,
    ProduceResume(oneshot::Sender<Option<Vec<u8>>>),
}

struct TaskEntry {
    ctl: Arc<TaskControl>,
    stop: mpsc::Sender<StopRequest>,
}

type TaskMap = Arc<RwLock<HashMap<Uuid, TaskEntry>>>;

/// Single-connection HTTP engine. Constructed together with the event
/// receiver the coordinator consumes.
pub struct HttpTransferEngine {
    client: Client,
    download_dir: PathBuf,
    tasks: TaskMap,
    events: mpsc::Sender<EngineEvent>,
}

impl HttpTransferEngine {
    pub fn new(
        download_dir: PathBuf,
    ) -> Result<(Arc<Self>, mpsc::Receiver<EngineEvent>), SessionError> {
        std::fs::create_dir_all(&download_dir)?;
        let client = Client::builder()
            .user_agent(concat!("dlsession/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (tx, rx) = mpsc::channel(256);
        let engine = Arc::new(Self {
            client,
            download_dir,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            events: tx,
        });
        Ok((engine, rx))
    }

    async fn spawn_worker(&self, key: &str, url: String, resume: Option<ResumeBlob>) -> Uuid {
        let id = Uuid::new_v4();
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let ctl = Arc::new(TaskControl::new(key, url));

        self.tasks.write().await.insert(
            id,
            TaskEntry {
                ctl: ctl.clone(),
                stop: stop_tx,
            },
        );

        let worker = TransferWorker {
            id,
            ctl,
            client: self.client.clone(),
            download_dir: self.download_dir.clone(),
            events: self.events.clone(),
            tasks: self.tasks.clone(),
        };
        tokio::spawn(worker.run(stop_rx, resume));
        id
    }
}

#[async_trait]
impl TransferEngine for HttpTransferEngine {
    async fn start_task(&self, key: &str, url: Url) -> Uuid {
        let id = self.spawn_worker(key, url.to_string(), None).await;
        info!("task {} fetching {} for {}", id, url, key);
        id
    }

    async fn resume_task(&self, key: &str, blob: Vec<u8>) -> Uuid {
        match serde_json::from_slice::<ResumeBlob>(&blob) {
            Ok(resume) => {
                let id = self
                    .spawn_worker(key, resume.url.clone(), Some(resume))
                    .await;
                info!("task {} resuming {}", id, key);
                id
            }
            Err(e) => {
                // The task "lives" just long enough to fail; no blob means
                // the coordinator surfaces this one.
                let id = Uuid::new_v4();
                let reason = SessionError::MalformedBlob(e).to_string();
                warn!("undecodable resume blob for {}: {}", key, reason);
                let _ = self
                    .events
                    .send(EngineEvent::Completed {
                        task: id,
                        key: Some(key.to_string()),
                        outcome: CompletionOutcome::Failed {
                            reason,
                            resume_blob: None,
                        },
                    })
                    .await;
                id
            }
        }
    }

    async fn live_tasks(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|(id, entry)| entry.ctl.snapshot(*id))
            .collect()
    }

    async fn cancel(&self, id: Uuid) {
        let tasks = self.tasks.read().await;
        if let Some(entry) = tasks.get(&id) {
            *entry.ctl.state.lock() = TaskState::Cancelling;
            let _ = entry.stop.try_send(StopRequest::Discard);
        }
    }

    async fn cancel_with_resume(&self, id: Uuid) -> Option<Vec<u8>> {
        let stop = {
            let tasks = self.tasks.read().await;
            let entry = tasks.get(&id)?;
            *entry.ctl.state.lock() = TaskState::Cancelling;
            entry.stop.clone()
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if stop.send(StopRequest::ProduceResume(reply_tx)).await.is_err() {
            // worker already gone - the transfer finished under us
            return None;
        }
        reply_rx.await.ok().flatten()
    }
}

/// Outcome of one worker run, resolved after the task left the live map.
enum Flow {
    Completed(CompletionOutcome),
    Stopped(Option<(oneshot::Sender<Option<Vec<u8>>>, Option<Vec<u8>>)>),
}

struct TransferWorker {
    id: Uuid,
    ctl: Arc<TaskControl>,
    client: Client,
    download_dir: PathBuf,
    events: mpsc::Sender<EngineEvent>,
    tasks: TaskMap,
}

impl TransferWorker {
    async fn run(self, mut stop_rx: mpsc::Receiver<StopRequest>, resume: Option<ResumeBlob>) {
        let flow = self.transfer(&mut stop_rx, resume).await;

        // Leave the live map before anything observable happens, so a
        // status query never sees a task that already answered its cancel
        // or emitted its completion.
        self.tasks.write().await.remove(&self.id);

        match flow {
            Flow::Completed(outcome) => {
                let _ = self
                    .events
                    .send(EngineEvent::Completed {
                        task: self.id,
                        key: Some(self.ctl.key.clone()),
                        outcome,
                    })
                    .await;
            }
            Flow::Stopped(Some((reply, blob))) => {
                let _ = reply.send(blob);
            }
            Flow::Stopped(None) => {}
        }
    }

    async fn transfer(
        &self,
        stop_rx: &mut mpsc::Receiver<StopRequest>,
        resume: Option<ResumeBlob>,
    ) -> Flow {
        let part_path = self.download_dir.join(format!("{}.part", self.ctl.key));

        // The part file on disk is authoritative for the resume offset.
        let mut offset = 0u64;
        if resume.is_some() {
            offset = tokio::fs::metadata(&part_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
        }
        let mut range_capable = resume.is_some();
        self.ctl.bytes_received.store(offset, Ordering::Release);

        let mut request = self.client.get(&self.ctl.url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            stop = stop_rx.recv() => {
                return self.stopped(stop, &part_path, offset, range_capable).await;
            }
            result = request.send() => match result {
                Ok(response) => response,
                Err(e) => {
                    return self
                        .failed(e.to_string(), &part_path, offset, range_capable)
                        .await;
                }
            },
        };

        let status = response.status();
        if offset > 0 && status.as_u16() != 206 {
            // server ignored the range request; start over
            debug!("{}: server answered {} to a range request", self.ctl.key, status);
            offset = 0;
            self.ctl.bytes_received.store(0, Ordering::Release);
        }
        range_capable = status.as_u16() == 206
            || response
                .headers()
                .get(reqwest::header::ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == "bytes")
                .unwrap_or(false);

        let expected = response.content_length().map(|len| offset + len);
        if let Some(total) = expected {
            self.ctl.bytes_expected.store(total, Ordering::Release);
        }

        let open = if offset > 0 {
            OpenOptions::new().append(true).open(&part_path).await
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&part_path)
                .await
        };
        let mut file = match open {
            Ok(file) => file,
            Err(e) => {
                return self
                    .failed(e.to_string(), &part_path, offset, range_capable)
                    .await;
            }
        };

        let mut stream = Box::pin(response.bytes_stream());
        let mut received = offset;
        let mut last_emit: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                stop = stop_rx.recv() => {
                    let _ = file.flush().await;
                    return self.stopped(stop, &part_path, received, range_capable).await;
                }
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Err(e)) => {
                        let _ = file.flush().await;
                        return self
                            .failed(e.to_string(), &part_path, received, range_capable)
                            .await;
                    }
                    Some(Ok(bytes)) => {
                        if let Err(e) = file.write_all(&bytes).await {
                            let _ = file.flush().await;
                            return self
                                .failed(e.to_string(), &part_path, received, range_capable)
                                .await;
                        }
                        received += bytes.len() as u64;
                        self.ctl.bytes_received.store(received, Ordering::Release);

                        if last_emit.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
                            let _ = self
                                .events
                                .send(EngineEvent::Progress {
                                    task: self.id,
                                    key: Some(self.ctl.key.clone()),
                                    bytes_received: received,
                                    bytes_expected: expected,
                                })
                                .await;
                            last_emit = Some(tokio::time::Instant::now());
                        }
                    }
                },
            }
        }

        if let Err(e) = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await
        {
            return self
                .failed(e.to_string(), &part_path, received, range_capable)
                .await;
        }

        // Whether the response counts as success is coordinator policy; the
        // engine just reports where the body landed. Only a success body is
        // promoted to its final location.
        let location = if status.is_success() {
            let final_path = self.download_dir.join(&self.ctl.key);
            if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
                return self
                    .failed(e.to_string(), &part_path, received, range_capable)
                    .await;
            }
            final_path
        } else {
            part_path.clone()
        };

        info!(
            "{}: transfer complete, {} bytes, status {}",
            self.ctl.key, received, status
        );
        Flow::Completed(CompletionOutcome::Finished {
            location,
            status_code: status.as_u16(),
        })
    }

    async fn stopped(
        &self,
        stop: Option<StopRequest>,
        part_path: &Path,
        received: u64,
        range_capable: bool,
    ) -> Flow {
        match stop {
            Some(StopRequest::ProduceResume(reply)) => {
                let blob = self.make_blob(part_path, received, range_capable);
                if blob.is_none() {
                    // nothing to continue from, the partial body is useless
                    let _ = tokio::fs::remove_file(part_path).await;
                }
                Flow::Stopped(Some((reply, blob)))
            }
            Some(StopRequest::Discard) | None => {
                let _ = tokio::fs::remove_file(part_path).await;
                Flow::Stopped(None)
            }
        }
    }

    async fn failed(
        &self,
        reason: String,
        part_path: &Path,
        received: u64,
        range_capable: bool,
    ) -> Flow {
        let resume_blob = self.make_blob(part_path, received, range_capable);
        if resume_blob.is_none() {
            let _ = tokio::fs::remove_file(part_path).await;
        }
        warn!("{}: transfer interrupted: {}", self.ctl.key, reason);
        Flow::Completed(CompletionOutcome::Failed { reason, resume_blob })
    }

    fn make_blob(&self, part_path: &Path, received: u64, range_capable: bool) -> Option<Vec<u8>> {
        if received == 0 || !range_capable {
            return None;
        }
        let expected = self.ctl.bytes_expected.load(Ordering::Acquire);
        let blob = ResumeBlob {
            url: self.ctl.url.clone(),
            part_path: part_path.to_path_buf(),
            bytes_received: received,
            bytes_expected: (expected != UNKNOWN).then_some(expected),
            created_at: Utc::now(),
        };
        match serde_json::to_vec(&blob) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("{}: could not serialize resume blob: {}", self.ctl.key, e);
                None
            }
        }
    }
}
