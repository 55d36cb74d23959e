//! Per-subject sync context threaded through every collector

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::phase;
use crate::error::{SyncError, storage};
use crate::models::CursorKey;
use crate::storage::SyncStore;

/// Cooperative cancellation checked at every page boundary
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a collector needs to sync one subject
pub struct SyncContext<'a> {
    pub subject: &'a str,
    pub store: &'a dyn SyncStore,
    /// Lower bound for initial (non-incremental) syncs
    pub window_start: DateTime<Utc>,
    /// Items per unit before pagination stops early; `None` pages to exhaustion
    pub result_cap: Option<usize>,
    pub deadline: Option<Instant>,
    pub cancel: &'a CancelFlag,
    pub verbose: bool,
}

impl<'a> SyncContext<'a> {
    /// Same context with the result cap lifted
    pub fn uncapped(&self) -> SyncContext<'a> {
        SyncContext {
            result_cap: None,
            ..*self
        }
    }

    /// Fail fast when the sweep was cancelled or the subject ran out of time
    pub fn check_continue(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SyncError::DeadlineExceeded);
        }
        Ok(())
    }

    pub fn read_cursor(&self, key: &CursorKey) -> Result<Option<String>, SyncError> {
        let value = self.store.get_cursor(key).map_err(storage)?;
        phase::cursor_read(key.service, self.subject, &key.key, value.as_deref(), self.verbose);
        Ok(value)
    }

    pub fn write_cursor(&self, key: &CursorKey, value: &str) -> Result<(), SyncError> {
        self.store.set_cursor(key, value).map_err(storage)?;
        phase::cursor_write(key.service, self.subject, &key.key, value);
        Ok(())
    }

    pub fn clear_cursor(&self, key: &CursorKey, reason: &str) -> Result<(), SyncError> {
        self.store.clear_cursor(key).map_err(storage)?;
        phase::cursor_clear(key.service, self.subject, &key.key, reason);
        Ok(())
    }

    pub fn skip_cursor(&self, key: &CursorKey, reason: &str) {
        phase::cursor_skip(key.service, self.subject, &key.key, reason);
    }
}
