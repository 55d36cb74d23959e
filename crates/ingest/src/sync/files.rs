//! Files collector
//!
//! A single unit per subject, watermarked on the newest modification time
//! that was fully paged through. Besides mirroring file metadata it hands
//! the document collector every stored native document in the window whose
//! export is missing or stale, so documents left over by an aborted batch are
//! offered again even after the watermark moved past them.

use log::warn;

use super::context::SyncContext;
use super::documents::DiscoveredDocuments;
use super::outcome::{Halt, ServiceRun, UnitEnd, UnitOutcome};
use super::pager::{PageProgress, paginate};
use super::{gate_cursor, phase};
use crate::error::{ErrorClass, storage};
use crate::models::{CursorKey, RecordBatch, Service, SyncMode, Watermark};
use crate::remote::DriveApi;

const FILES_UNIT: &str = "files";

/// Files collector output for one subject
#[derive(Debug, Clone, PartialEq)]
pub struct FilesRun {
    pub run: ServiceRun,
    /// Documents awaiting export, in the order the document collector must
    /// process them
    pub documents: DiscoveredDocuments,
}

/// Sync one subject's file listing
pub fn sync_files(ctx: &SyncContext<'_>, api: &dyn DriveApi) -> FilesRun {
    let mut run = ServiceRun::new(Service::Files);
    let key = CursorKey::files_modified(ctx.subject);

    let stored = match ctx.read_cursor(&key) {
        Ok(stored) => stored,
        Err(e) => {
            let mut outcome = UnitOutcome::new(FILES_UNIT, SyncMode::Initial);
            outcome.end = UnitEnd::Failed { class: e.class() };
            phase::unit_end(Service::Files, ctx.subject, &outcome);
            run.record(outcome);
            return FilesRun {
                run,
                documents: DiscoveredDocuments::default(),
            };
        }
    };

    let previous = Watermark::from_stored(stored.as_deref());
    let (mode, modified_after) = match previous.get() {
        Some(at) => (SyncMode::Incremental, at),
        None => (SyncMode::Initial, ctx.window_start),
    };
    let mut outcome = UnitOutcome::new(FILES_UNIT, mode);
    phase::unit_start(Service::Files, ctx.subject, FILES_UNIT, mode);

    let mut seen = previous;
    let page_run = paginate(ctx, Service::Files, FILES_UNIT, |token| {
        let page = api.list_files(ctx.subject, modified_after, token)?;
        let stored = ctx
            .store
            .upsert_batch(ctx.subject, RecordBatch::Files(&page.items))
            .map_err(storage)?;
        for file in &page.items {
            seen.observe(file.modified_time);
        }
        Ok(PageProgress {
            fetched: page.items.len(),
            stored,
            next_page_token: page.next_page_token,
        })
    });

    if matches!(page_run.unit_end(), UnitEnd::Capped) {
        warn!(
            "files {}: listing truncated at the result cap after {} files",
            ctx.subject,
            page_run.fetched
        );
    }

    let err = gate_cursor(ctx, &key, &mut outcome, &page_run, stored.as_deref(), seen.encode());
    let err = err.or_else(|| page_run.into_error());

    phase::unit_end(Service::Files, ctx.subject, &outcome);
    run.halt = err.as_ref().and_then(Halt::from_error);
    run.record(outcome);

    let documents = match ctx.store.pending_documents(ctx.subject, ctx.window_start) {
        Ok(ids) => DiscoveredDocuments::new(ids),
        Err(e) => {
            warn!("files {}: could not list pending documents: {e:#}", ctx.subject);
            if run.halt.is_none() {
                run.halt = Some(Halt::Failed {
                    class: ErrorClass::Storage,
                    message: format!("{e:#}"),
                });
            }
            DiscoveredDocuments::default()
        }
    };

    FilesRun { run, documents }
}
