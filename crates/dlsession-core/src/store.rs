//! Durable resume-state records, one file per transfer key.
//!
//! Records hold opaque engine-defined blobs; the only introspection ever
//! performed is a best-effort read of the `bytes_received` counter for
//! display. All failures are logged and degrade to "no persisted state" -
//! nothing in here raises to the caller.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_DIR: &str = "resume-state";

/// File-per-key store under `<data_dir>/resume-state/`. The filename is the
/// transfer key itself, so a record is individually addressable.
#[derive(Clone, Debug)]
pub struct ResumeStateStore {
    dir: PathBuf,
}

impl ResumeStateStore {
    /// Creates the record directory if missing. A creation failure is
    /// logged; the store then reports no persisted state until a later
    /// write recreates the directory.
    pub fn new(data_dir: &Path) -> Self {
        let dir = data_dir.join(RECORD_DIR);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("failed to create {}: {}", dir.display(), e);
        }
        Self { dir }
    }

    /// Missing record and read failure both yield `None`.
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        match fs::read(self.record_path(key)) {
            Ok(blob) => Some(blob),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("failed to read resume record for {}: {}", key, e);
                None
            }
        }
    }

    /// Atomic replace: the blob lands in a temp file first and is renamed
    /// over the record, so a crash mid-write never leaves a partial record.
    pub fn write(&self, key: &str, blob: &[u8]) {
        if let Err(e) = self.try_write(key, blob) {
            warn!("failed to write resume record for {}: {}", key, e);
        }
    }

    fn try_write(&self, key: &str, blob: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{key}.tmp"));
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, self.record_path(key))
    }

    /// Delete the record if present; a missing record is not an error.
    pub fn clear(&self, key: &str) {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => debug!("cleared resume record for {}", key),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to clear resume record for {}: {}", key, e),
        }
    }

    /// Every key with a record currently on disk. Half-written `.tmp`
    /// leftovers are excluded.
    pub fn list_keys(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("failed to list resume records: {}", e);
                }
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let name = entry.file_name().into_string().ok()?;
                if name.ends_with(".tmp") {
                    return None;
                }
                entry.file_type().ok()?.is_file().then_some(name)
            })
            .collect()
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

/// Best-effort recovery of the received-byte counter from a structured
/// resume blob. Unrecognized or malformed blobs yield 0. Display only -
/// this never resumes anything.
pub fn extract_received_bytes(blob: &[u8]) -> u64 {
    serde_json::from_slice::<serde_json::Value>(blob)
        .ok()
        .and_then(|v| v.get("bytes_received").and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}
