//! Event fan-out: a broadcast channel open to any subscriber, plus at most
//! one strongly-typed delegate.
//!
//! Both sinks are driven from the coordinator's event-pump task, so per-key
//! delivery order follows the order the engine's callbacks fired.

use dlsession_types::TransferEvent;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Typed observer for transfer events. At most one is attached at a time.
pub trait TransferDelegate: Send + Sync {
    fn transfer_finished(&self, key: &str, location: &Path);
    fn transfer_failed(&self, key: &str, reason: &str);
    fn transfer_progress(&self, key: &str, bytes_received: u64);
}

type DelegateSlot = Arc<Mutex<Option<Arc<dyn TransferDelegate>>>>;

/// Detaches its delegate when dropped. Dropping a stale guard after the
/// delegate was replaced leaves the replacement attached.
pub struct DelegateGuard {
    slot: DelegateSlot,
    mine: Weak<dyn TransferDelegate>,
}

impl Drop for DelegateGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if let (Some(current), Some(mine)) = (slot.as_ref(), self.mine.upgrade()) {
            if Arc::ptr_eq(current, &mine) {
                *slot = None;
            }
        }
    }
}

#[derive(Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<TransferEvent>,
    delegate: DelegateSlot,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            delegate: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.tx.subscribe()
    }

    /// Attach a delegate, replacing any previous one. The returned guard
    /// detaches it on drop.
    pub fn set_delegate(&self, delegate: Arc<dyn TransferDelegate>) -> DelegateGuard {
        let mine = Arc::downgrade(&delegate);
        *self.delegate.lock() = Some(delegate);
        DelegateGuard {
            slot: self.delegate.clone(),
            mine,
        }
    }

    pub fn finished(&self, key: &str, location: &Path) {
        let _ = self.tx.send(TransferEvent::Finished {
            key: key.to_string(),
            location: location.to_path_buf(),
        });
        if let Some(delegate) = self.current_delegate() {
            delegate.transfer_finished(key, location);
        }
    }

    pub fn failed(&self, key: &str, reason: &str) {
        let _ = self.tx.send(TransferEvent::Failed {
            key: key.to_string(),
            reason: reason.to_string(),
        });
        if let Some(delegate) = self.current_delegate() {
            delegate.transfer_failed(key, reason);
        }
    }

    pub fn progress(&self, key: &str, bytes_received: u64) {
        let _ = self.tx.send(TransferEvent::Progress {
            key: key.to_string(),
            bytes_received,
        });
        if let Some(delegate) = self.current_delegate() {
            delegate.transfer_progress(key, bytes_received);
        }
    }

    fn current_delegate(&self) -> Option<Arc<dyn TransferDelegate>> {
        self.delegate.lock().clone()
    }
}
