use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Platform hook that actually keeps the screen awake.
pub trait ScreenLock: Send + Sync {
    fn request(&self) -> Result<(), SyncError>;
    fn release(&self);
}

#[derive(Debug, Default)]
struct LockState {
    // Callers that asked for the lock and have not released it yet
    holders: usize,
    // Platform lock is live
    held: bool,
    failed: bool,
}

/// Process-scoped wake-lock coordinator.
///
/// Shared by every player in the process. Each `acquire` must be paired
/// with one `release`; the platform lock is held while at least one holder
/// remains. Once a request
/// fails the coordinator stays failed for the rest of the session and never
/// asks again.
pub struct WakeLock {
    platform: Box<dyn ScreenLock>,
    state: Mutex<LockState>,
}

impl WakeLock {
    pub fn new(platform: Box<dyn ScreenLock>) -> Self {
        Self {
            platform,
            state: Mutex::new(LockState::default()),
        }
    }

    /// Registers a holder. Returns true when the lock is held after the call.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.holders += 1;
        self.ensure_held(&mut state)
    }

    /// Requests a fresh platform lock for the current holders after the
    /// platform dropped it. Does not register a holder.
    pub fn restore(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.holders == 0 {
            return false;
        }
        self.ensure_held(&mut state)
    }

    fn ensure_held(&self, state: &mut LockState) -> bool {
        if state.held {
            return true;
        }
        if state.failed {
            return false;
        }
        match self.platform.request() {
            Ok(()) => {
                debug!("Wake lock acquired");
                state.held = true;
                true
            }
            Err(e) => {
                warn!(error = %e, "Wake lock unavailable, not retrying this session");
                state.failed = true;
                false
            }
        }
    }

    /// Drops one holder; the platform lock goes with the last one.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.holders == 0 {
            return;
        }
        state.holders -= 1;
        if state.holders == 0 && state.held {
            self.platform.release();
            state.held = false;
            debug!("Wake lock released");
        }
    }

    /// Records that the platform dropped the lock on its own (e.g. the page
    /// was hidden), so the next `acquire` or `restore` requests a fresh one.
    pub fn mark_lost(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.held {
            info!("Wake lock dropped by the platform");
            state.held = false;
        }
    }

    pub fn is_held(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
    }

    pub fn holders(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .holders
    }

    pub fn has_failed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failed
    }
}

impl std::fmt::Debug for WakeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("WakeLock")
            .field("holders", &state.holders)
            .field("held", &state.held)
            .field("failed", &state.failed)
            .finish()
    }
}
