//! Dependent document collector
//!
//! Exports the native documents the files collector found pending. Identifiers
//! carry no temporal order, so each batch is sorted once and stored next to a
//! cursor naming the last identifier exported from it. A later run finishes
//! the stored batch first, then starts a new one with whatever it has not
//! seen yet. The cursor advances after every persisted document and only ever
//! indexes the batch stored with it.

use log::{debug, warn};

use super::context::SyncContext;
use super::outcome::{Halt, ServiceRun, UnitEnd, UnitOutcome};
use super::phase;
use crate::error::{ApiError, ErrorClass, SyncError, storage};
use crate::models::{CursorKey, Document, RecordBatch, Service, SyncMode};
use crate::remote::DriveApi;

const DOCUMENTS_UNIT: &str = "documents";

/// Document identifiers handed from the files collector, sorted and unique
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDocuments {
    ids: Vec<String>,
}

impl DiscoveredDocuments {
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self { ids }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.binary_search_by(|stored| stored.as_str().cmp(id)).is_ok()
    }

    /// Identifiers strictly after `cursor` in sorted order
    pub fn after(&self, cursor: Option<&str>) -> &[String] {
        match cursor {
            Some(cursor) => {
                let start = self.ids.partition_point(|id| id.as_str() <= cursor);
                &self.ids[start..]
            }
            None => &self.ids,
        }
    }

    /// Identifiers not part of `other`
    pub fn without(&self, other: &DiscoveredDocuments) -> DiscoveredDocuments {
        Self {
            ids: self.ids.iter().filter(|id| !other.contains(id)).cloned().collect(),
        }
    }

    fn encode(&self) -> Result<String, SyncError> {
        serde_json::to_string(&self.ids).map_err(|e| storage(e.into()))
    }

    fn decode(value: &str) -> Option<Self> {
        serde_json::from_str::<Vec<String>>(value).ok().map(Self::new)
    }
}

/// Batch and cursor left behind by an earlier run
#[derive(Debug)]
struct StoredBatch {
    ids: Option<DiscoveredDocuments>,
    cursor: Option<String>,
}

impl StoredBatch {
    fn read(ctx: &SyncContext<'_>) -> Result<Self, SyncError> {
        let cursor = ctx.read_cursor(&CursorKey::last_document(ctx.subject))?;
        let ids = match ctx.read_cursor(&CursorKey::document_batch(ctx.subject))? {
            Some(value) => {
                let ids = DiscoveredDocuments::decode(&value);
                if ids.is_none() {
                    warn!("documents {}: stored batch is unreadable, starting over", ctx.subject);
                }
                ids
            }
            None => None,
        };
        if let (None, Some(cursor)) = (&ids, &cursor) {
            warn!(
                "documents {}: cursor {cursor} has no stored batch, ignoring it",
                ctx.subject
            );
        }
        Ok(Self { ids, cursor })
    }

    fn is_empty(&self) -> bool {
        self.ids.is_none() && self.cursor.is_none()
    }
}

/// Export and persist one subject's pending documents
pub fn sync_documents(
    ctx: &SyncContext<'_>,
    api: &dyn DriveApi,
    discovered: &DiscoveredDocuments,
) -> ServiceRun {
    let mut run = ServiceRun::new(Service::Documents);

    let (outcome, err) = match StoredBatch::read(ctx) {
        Ok(stored) => export_all(ctx, api, discovered, stored),
        Err(e) => {
            let mut outcome = UnitOutcome::new(DOCUMENTS_UNIT, SyncMode::Initial);
            outcome.end = UnitEnd::Failed { class: e.class() };
            (outcome, Some(e))
        }
    };

    phase::unit_end(Service::Documents, ctx.subject, &outcome);
    run.halt = err.as_ref().and_then(Halt::from_error);
    run.record(outcome);
    run
}

fn export_all(
    ctx: &SyncContext<'_>,
    api: &dyn DriveApi,
    discovered: &DiscoveredDocuments,
    stored: StoredBatch,
) -> (UnitOutcome, Option<SyncError>) {
    let mode = if stored.ids.is_some() {
        SyncMode::Incremental
    } else {
        SyncMode::Initial
    };
    let mut outcome = UnitOutcome::new(DOCUMENTS_UNIT, mode);
    phase::unit_start(Service::Documents, ctx.subject, DOCUMENTS_UNIT, mode);

    match export_batches(ctx, api, discovered, stored, &mut outcome) {
        Ok(()) => (outcome, None),
        Err(e) => {
            outcome.end = UnitEnd::Failed { class: e.class() };
            (outcome, Some(e))
        }
    }
}

fn export_batches(
    ctx: &SyncContext<'_>,
    api: &dyn DriveApi,
    discovered: &DiscoveredDocuments,
    stored: StoredBatch,
    outcome: &mut UnitOutcome,
) -> Result<(), SyncError> {
    let cursor_key = CursorKey::last_document(ctx.subject);
    let batch_key = CursorKey::document_batch(ctx.subject);
    let mut dirty = !stored.is_empty();

    let fresh = match &stored.ids {
        Some(ids) => {
            let remaining = ids.after(stored.cursor.as_deref());
            debug!(
                "documents {}: resuming stored batch after {:?}, {} of {} remaining",
                ctx.subject,
                stored.cursor,
                remaining.len(),
                ids.len()
            );
            export_batch(ctx, api, &cursor_key, remaining, outcome)?;
            discovered.without(ids)
        }
        None => discovered.clone(),
    };

    if !fresh.is_empty() {
        // Clear first: a cursor must never sit next to a batch it did not index
        if dirty {
            ctx.clear_cursor(&cursor_key, "new_batch")?;
        }
        ctx.write_cursor(&batch_key, &fresh.encode()?)?;
        dirty = true;
        export_batch(ctx, api, &cursor_key, fresh.ids(), outcome)?;
    }

    if dirty {
        ctx.clear_cursor(&cursor_key, "batch_complete")?;
        ctx.clear_cursor(&batch_key, "batch_complete")?;
    } else {
        ctx.skip_cursor(&cursor_key, "no_new_value");
    }
    Ok(())
}

fn export_batch(
    ctx: &SyncContext<'_>,
    api: &dyn DriveApi,
    key: &CursorKey,
    ids: &[String],
    outcome: &mut UnitOutcome,
) -> Result<(), SyncError> {
    if !ids.is_empty() {
        outcome.pages += 1;
    }

    for id in ids {
        ctx.check_continue()?;
        outcome.fetched += 1;

        match export_one(ctx, api, id) {
            Ok(()) => {
                outcome.stored += 1;
                ctx.write_cursor(key, id)?;
                outcome.cursor_written = true;
            }
            Err(SyncError::Api(ApiError::NotFound(_))) => {
                debug!("documents {}: {id} gone since discovery", ctx.subject);
                outcome.skip(ErrorClass::NotFound);
            }
            Err(SyncError::Api(ApiError::Transient(msg))) => {
                warn!("documents {}: {id} skipped after transient error: {msg}", ctx.subject);
                outcome.skip(ErrorClass::Transient);
            }
            Err(e @ SyncError::Api(ApiError::RateLimited { .. }))
            | Err(e @ SyncError::Api(ApiError::SubjectMissing(_))) => {
                warn!(
                    "documents {}: stopping batch at {id}, {} exported: {e}",
                    ctx.subject, outcome.stored
                );
                return Err(e);
            }
            Err(SyncError::Api(e)) => {
                warn!("documents {}: {id} skipped: {e}", ctx.subject);
                outcome.skip(e.class());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn export_one(ctx: &SyncContext<'_>, api: &dyn DriveApi, id: &str) -> Result<(), SyncError> {
    let file = api.get_file(ctx.subject, id)?;
    if file.trashed {
        return Err(ApiError::NotFound(format!("{id} is trashed")).into());
    }
    let text = api.export_text(ctx.subject, id)?;
    let document = Document {
        id: file.id,
        title: file.name,
        modified_time: Some(file.modified_time),
        text,
        raw: file.raw,
    };
    ctx.store
        .upsert_batch(ctx.subject, RecordBatch::Documents(std::slice::from_ref(&document)))
        .map_err(storage)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Table;
    use crate::storage::{CursorStore, InMemoryStore, RecordStore};
    use crate::sync::context::{CancelFlag, test_support::context};
    use crate::sync::outcome::ServiceStatus;
    use crate::testing::{FakeDrive, document_file};
    use chrono::Utc;

    const SUBJECT: &str = "a@example.com";

    fn drive_with(ids: &[&str]) -> FakeDrive {
        let api = FakeDrive::default();
        for id in ids {
            api.add_document(document_file(id, Utc::now()), &format!("text of {id}"));
        }
        api
    }

    fn discovered(ids: &[&str]) -> DiscoveredDocuments {
        DiscoveredDocuments::new(ids.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_discovered_ids_are_sorted_and_unique() {
        let docs = discovered(&["d3", "d1", "d2", "d1"]);
        assert_eq!(docs.ids(), ["d1", "d2", "d3"].map(String::from));
        assert_eq!(docs.after(Some("d1")), ["d2", "d3"].map(String::from));
        assert!(docs.contains("d2") && !docs.contains("d4"));
        assert_eq!(
            discovered(&["a1", "d2"]).without(&docs).ids(),
            ["a1".to_string()]
        );
        assert_eq!(docs.after(Some("c")), docs.ids());
        assert!(docs.after(Some("d3")).is_empty());
    }

    fn store_batch(store: &InMemoryStore, ids: &[&str], cursor: Option<&str>) {
        store
            .set_cursor(
                &CursorKey::document_batch(SUBJECT),
                &discovered(ids).encode().unwrap(),
            )
            .unwrap();
        if let Some(cursor) = cursor {
            store
                .set_cursor(&CursorKey::last_document(SUBJECT), cursor)
                .unwrap();
        }
    }

    fn exported(api: &FakeDrive) -> Vec<String> {
        api.calls
            .all()
            .into_iter()
            .filter_map(|call| call.strip_prefix("export_text a@example.com ").map(String::from))
            .collect()
    }

    #[test]
    fn test_resume_processes_only_ids_after_cursor() {
        let store = InMemoryStore::new();
        store_batch(&store, &["d1", "d2", "d3"], Some("d1"));
        let cancel = CancelFlag::new();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = drive_with(&["d1", "d2", "d3"]);

        let run = sync_documents(&ctx, &api, &discovered(&["d3", "d1", "d2"]));

        assert_eq!(run.status(), ServiceStatus::Complete);
        assert_eq!(
            api.calls.all(),
            vec![
                "get_file a@example.com d2",
                "export_text a@example.com d2",
                "get_file a@example.com d3",
                "export_text a@example.com d3",
            ]
        );
        assert_eq!(store.count(Table::Documents, SUBJECT).unwrap(), 2);
        assert_eq!(
            store.get_document_text(SUBJECT, "d3").unwrap().as_deref(),
            Some("text of d3")
        );
    }

    #[test]
    fn test_stored_batch_finishes_before_new_documents() {
        let store = InMemoryStore::new();
        store_batch(&store, &["d1", "d2", "d3"], Some("d1"));
        let cancel = CancelFlag::new();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = drive_with(&["a1", "d2", "d3"]);

        // a1 sorts below the stored cursor but belongs to a later batch
        let run = sync_documents(&ctx, &api, &discovered(&["a1", "d2", "d3"]));

        assert_eq!(run.status(), ServiceStatus::Complete);
        assert_eq!(exported(&api), ["d2", "d3", "a1"]);
        assert_eq!(store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap(), None);
        assert_eq!(store.get_cursor(&CursorKey::document_batch(SUBJECT)).unwrap(), None);
    }

    #[test]
    fn test_batch_aborted_before_first_export_is_redone() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = drive_with(&["d1", "d2"]);
        api.fail_export("d1", ApiError::RateLimited { retry_after: None });

        let run = sync_documents(&ctx, &api, &discovered(&["d1", "d2"]));
        assert_eq!(run.status(), ServiceStatus::ErrorTransient);
        assert_eq!(store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap(), None);

        let api = drive_with(&["d1", "d2"]);
        let run = sync_documents(&ctx, &api, &DiscoveredDocuments::default());

        assert_eq!(run.status(), ServiceStatus::Complete);
        assert_eq!(exported(&api), ["d1", "d2"]);
        assert_eq!(store.get_cursor(&CursorKey::document_batch(SUBJECT)).unwrap(), None);
    }

    #[test]
    fn test_cursor_without_its_batch_is_ignored() {
        let store = InMemoryStore::new();
        store
            .set_cursor(&CursorKey::last_document(SUBJECT), "d5")
            .unwrap();
        let cancel = CancelFlag::new();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = drive_with(&["d1", "d2"]);

        let run = sync_documents(&ctx, &api, &discovered(&["d1", "d2"]));

        assert_eq!(run.units[DOCUMENTS_UNIT].mode, SyncMode::Initial);
        assert_eq!(exported(&api), ["d1", "d2"]);
        assert_eq!(store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap(), None);
    }

    #[test]
    fn test_quota_abort_keeps_cursor_at_last_success() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = drive_with(&["d1", "d2", "d3"]);
        api.fail_export("d2", ApiError::RateLimited { retry_after: None });

        let run = sync_documents(&ctx, &api, &discovered(&["d1", "d2", "d3"]));

        assert_eq!(run.status(), ServiceStatus::ErrorTransient);
        assert_eq!(api.calls.count_matching("get_file a@example.com d3"), 0);
        assert_eq!(
            store
                .get_cursor(&CursorKey::last_document(SUBJECT))
                .unwrap()
                .as_deref(),
            Some("d1")
        );
        assert_eq!(
            store
                .get_cursor(&CursorKey::document_batch(SUBJECT))
                .unwrap()
                .as_deref(),
            Some(r#"["d1","d2","d3"]"#)
        );
    }

    #[test]
    fn test_missing_and_failing_documents_are_skipped() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = drive_with(&["d2", "d3", "d4"]);
        api.fail_export("d3", ApiError::Transient("backend error".into()));
        api.fail_export(
            "d4",
            ApiError::Other {
                status: Some(403),
                message: "export size limit".into(),
            },
        );

        let run = sync_documents(&ctx, &api, &discovered(&["d1", "d2", "d3", "d4"]));

        let unit = &run.units[DOCUMENTS_UNIT];
        assert_eq!(run.status(), ServiceStatus::Complete);
        assert_eq!(unit.stored, 1);
        assert_eq!(unit.skipped[&ErrorClass::NotFound], 1);
        assert_eq!(unit.skipped[&ErrorClass::Transient], 1);
        assert_eq!(unit.skipped[&ErrorClass::Other], 1);
        assert_eq!(store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap(), None);
    }

    #[test]
    fn test_trashed_document_counts_as_missing() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = FakeDrive::default();
        let mut file = document_file("d1", Utc::now());
        file.trashed = true;
        api.add_document(file, "stale");

        let run = sync_documents(&ctx, &api, &discovered(&["d1"]));

        assert_eq!(run.units[DOCUMENTS_UNIT].skipped[&ErrorClass::NotFound], 1);
        assert_eq!(api.calls.count_matching("export_text"), 0);
    }

    #[test]
    fn test_cancellation_stops_before_next_document() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let ctx = context(SUBJECT, &store, &cancel);
        let api = drive_with(&["d1"]);

        let run = sync_documents(&ctx, &api, &discovered(&["d1"]));

        assert_eq!(run.status(), ServiceStatus::ErrorTransient);
        assert!(api.calls.all().is_empty());
    }
}
