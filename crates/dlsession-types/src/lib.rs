//! Shared types for dlsession
//!
//! Data structures exchanged between the coordinator, the underlying
//! transfer engine, and event subscribers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Derived transfer status
// ============================================================================

/// Derived state of one keyed transfer. Never stored; computed on demand by
/// merging persisted resume records with live engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Downloading,
    Paused,
    Absent,
}

/// State plus the best-known received-byte count for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub state: TransferState,
    pub bytes_received: u64,
}

impl Default for TransferStatus {
    fn default() -> Self {
        Self {
            state: TransferState::Absent,
            bytes_received: 0,
        }
    }
}

// ============================================================================
// Engine-side task view
// ============================================================================

/// Lifecycle state of a live engine task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Suspended,
    Cancelling,
    Completed,
}

/// Read-only snapshot of one live transfer handle, as reported by the
/// engine's enumeration. `key` is `None` when the engine reports a task the
/// coordinator cannot attribute to any caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub key: Option<String>,
    pub state: TaskState,
    pub bytes_received: u64,
    pub bytes_expected: Option<u64>,
}

impl TaskSnapshot {
    pub fn matches_key(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Consumer-facing transfer events, delivered via the coordinator's
/// broadcast channel and the optional typed delegate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferEvent {
    Finished {
        key: String,
        location: PathBuf,
    },
    Failed {
        key: String,
        reason: String,
    },
    Progress {
        key: String,
        bytes_received: u64,
    },
}

impl TransferEvent {
    /// The transfer key this event concerns.
    pub fn key(&self) -> &str {
        match self {
            TransferEvent::Finished { key, .. }
            | TransferEvent::Failed { key, .. }
            | TransferEvent::Progress { key, .. } => key,
        }
    }
}

/// What engine implementations push into the coordinator's event pump.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Progress {
        task: Uuid,
        key: Option<String>,
        bytes_received: u64,
        bytes_expected: Option<u64>,
    },
    Completed {
        task: Uuid,
        key: Option<String>,
        outcome: CompletionOutcome,
    },
}

/// How a transfer ended, from the engine's point of view. A `Failed`
/// outcome carrying a resume blob is recoverable; classifying it is the
/// coordinator's job, not the engine's.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Finished {
        location: PathBuf,
        status_code: u16,
    },
    Failed {
        reason: String,
        resume_blob: Option<Vec<u8>>,
    },
}
