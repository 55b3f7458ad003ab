//! Process-wide sync state for the background context.
//!
//! One instance per context, explicitly constructed at activation and
//! recreated from the persistent store on every cold start - the context
//! itself has no memory across restarts. Pending count is always derived
//! from the store, never held here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Default)]
pub struct SyncState {
    online: AtomicBool,
    draining: AtomicBool,
    last_sync_attempt: Mutex<Option<DateTime<Utc>>>,
    last_sync_success: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    pub last_sync_success_at: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Claim the single drain slot. Exactly one `drain()` may be active per
    /// context; a second caller gets `false` and must not start a pass.
    pub fn begin_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_drain(&self) {
        self.draining.store(false, Ordering::SeqCst);
    }

    pub fn mark_attempt(&self) {
        let mut attempt = self.last_sync_attempt.lock().expect("sync state lock poisoned");
        *attempt = Some(Utc::now());
    }

    pub fn mark_success(&self) {
        let mut success = self.last_sync_success.lock().expect("sync state lock poisoned");
        *success = Some(Utc::now());
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.is_online(),
            last_sync_attempt_at: *self.last_sync_attempt.lock().expect("sync state lock poisoned"),
            last_sync_success_at: *self.last_sync_success.lock().expect("sync state lock poisoned"),
        }
    }
}
