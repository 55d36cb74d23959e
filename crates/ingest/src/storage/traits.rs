//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{BlocklistEntry, Cursor, CursorKey, RecordBatch, Service, Table};

/// Persisted incremental-sync markers.
///
/// Every write is an upsert of a single key and is atomic on its own.
pub trait CursorStore: Send + Sync {
    /// Read one cursor value
    fn get_cursor(&self, key: &CursorKey) -> Result<Option<String>>;

    /// Insert or overwrite one cursor value
    fn set_cursor(&self, key: &CursorKey, value: &str) -> Result<()>;

    /// Remove a cursor so the next sync of its unit starts from scratch
    fn clear_cursor(&self, key: &CursorKey) -> Result<()>;

    /// All cursors of one subject for one service, ordered by key
    fn list_cursors(&self, service: Service, subject: &str) -> Result<Vec<Cursor>>;
}

/// Row bookkeeping timestamps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordTimes {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Idempotent persistence of mirrored records
pub trait RecordStore: Send + Sync {
    /// Upsert a batch of records on their natural keys.
    ///
    /// Existing rows get their mutable fields and `updated_at` overwritten,
    /// new rows get `created_at = updated_at = now`. Safe to call again with
    /// overlapping batches. Returns the number of records written.
    fn upsert_batch(&self, subject: &str, batch: RecordBatch<'_>) -> Result<usize>;

    /// Number of rows a subject owns in a table
    fn count(&self, table: Table, subject: &str) -> Result<usize>;

    /// Bookkeeping timestamps of one row, looked up by resource id
    fn record_times(&self, table: Table, subject: &str, id: &str) -> Result<Option<RecordTimes>>;

    /// Exported text of a stored document
    fn get_document_text(&self, subject: &str, id: &str) -> Result<Option<String>>;

    /// Stored native documents modified at or after `since` whose export is
    /// missing or older than the file, sorted by id. Trashed files are left out.
    fn pending_documents(&self, subject: &str, since: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Subjects excluded from sweeps
pub trait BlocklistStore: Send + Sync {
    fn get_block(&self, subject: &str) -> Result<Option<BlocklistEntry>>;

    /// All entries, ordered by subject
    fn list_blocks(&self) -> Result<Vec<BlocklistEntry>>;

    /// Insert or replace the entry for `entry.subject`
    fn put_block(&self, entry: &BlocklistEntry) -> Result<()>;

    fn remove_block(&self, subject: &str) -> Result<()>;
}

/// Per-subject mutual exclusion across concurrent sweeps
pub trait LeaseStore: Send + Sync {
    /// Take the lease if it is free, expired, or already held by `holder`
    fn try_acquire_lease(
        &self,
        subject: &str,
        holder: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop the lease if `holder` still owns it
    fn release_lease(&self, subject: &str, holder: &str) -> Result<()>;
}

/// Everything a sweep needs from storage
pub trait SyncStore: CursorStore + RecordStore + BlocklistStore + LeaseStore {}

impl<T: CursorStore + RecordStore + BlocklistStore + LeaseStore> SyncStore for T {}
