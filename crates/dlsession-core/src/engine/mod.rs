//! Underlying transfer engine interface.
//!
//! The coordinator never performs network I/O itself. It drives an engine
//! through this trait and consumes the engine's event stream; `http`
//! provides the reqwest-backed implementation.

mod http;

pub use http::{HttpTransferEngine, ResumeBlob};

use async_trait::async_trait;
use dlsession_types::TaskSnapshot;
use url::Url;
use uuid::Uuid;

/// Operations the coordinator requires from a transfer engine.
///
/// Task creation is infallible by contract: anything that goes wrong after
/// a task exists surfaces through the engine's event stream as a completed
/// outcome, never as a synchronous error.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Create a live task for `key` fetching `url`, tagged with the key.
    async fn start_task(&self, key: &str, url: Url) -> Uuid;

    /// Create a live task from a previously captured resume blob. A blob
    /// the engine cannot decode yields a task that immediately completes
    /// failed, with no new blob.
    async fn resume_task(&self, key: &str, blob: Vec<u8>) -> Uuid;

    /// Enumerate every live handle the engine currently tracks.
    async fn live_tasks(&self) -> Vec<TaskSnapshot>;

    /// Cancel, discarding partial state. Cooperative: the task confirms by
    /// disappearing from `live_tasks`, and no completion event fires.
    async fn cancel(&self, id: Uuid);

    /// Cooperative cancel yielding a resume blob when the transfer can
    /// continue later. `None` when it already finished or cannot resume.
    /// No completion event fires on this path.
    async fn cancel_with_resume(&self, id: Uuid) -> Option<Vec<u8>>;
}
