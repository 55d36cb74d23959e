//! Incremental sync engine
//!
//! One collector per remote service, a dependent document collector fed by
//! the files collector, and the sweep orchestrator that drives them across
//! subjects. Every collector follows the same discipline: persist each page
//! as soon as it arrives, and write a unit's cursor only once the unit's
//! pagination is exhausted.

mod calendar;
mod chat;
mod context;
mod documents;
mod files;
mod mail;
mod outcome;
mod pager;
pub mod phase;
mod report;
mod sweep;
mod timing;

pub use calendar::sync_calendar;
pub use chat::sync_chat;
pub use context::{CancelFlag, SyncContext};
pub use documents::{DiscoveredDocuments, sync_documents};
pub use files::{FilesRun, sync_files};
pub use mail::sync_mail;
pub use outcome::{Halt, ServiceRun, ServiceStatus, UnitEnd, UnitOutcome};
pub use report::{Disposition, Invariants, Plan, RunReport, ServiceReport, ServiceTotals, SubjectReport};
pub use sweep::{Sweep, SweepOptions};
pub use timing::{retry_at, retry_elapsed};

use pager::PageRun;

use crate::error::SyncError;
use crate::models::CursorKey;

/// Copy page statistics into the unit outcome and apply the cursor gate.
///
/// The cursor is written only when the page loop exhausted the unit and the
/// new value differs from the stored one. A failed cursor write turns the
/// unit into a storage failure.
pub(crate) fn gate_cursor(
    ctx: &SyncContext<'_>,
    key: &CursorKey,
    outcome: &mut UnitOutcome,
    run: &PageRun,
    previous: Option<&str>,
    next_value: Option<String>,
) -> Option<SyncError> {
    outcome.pages += run.pages;
    outcome.fetched += run.fetched;
    outcome.stored += run.stored;
    outcome.end = run.unit_end();

    if !run.exhausted() {
        ctx.skip_cursor(key, outcome.end.error_label());
        return None;
    }

    match next_value {
        Some(value) if previous != Some(value.as_str()) => match ctx.write_cursor(key, &value) {
            Ok(()) => {
                outcome.cursor_written = true;
                None
            }
            Err(e) => {
                outcome.end = UnitEnd::Failed { class: e.class() };
                Some(e)
            }
        },
        Some(_) => {
            ctx.skip_cursor(key, "unchanged");
            None
        }
        None => {
            ctx.skip_cursor(key, "no_new_value");
            None
        }
    }
}

/// Page through a container listing (calendars, spaces) without a result cap
pub(crate) fn collect_ids<F>(
    ctx: &SyncContext<'_>,
    service: crate::models::Service,
    label: &str,
    mut fetch: F,
) -> Result<Vec<String>, Halt>
where
    F: FnMut(Option<&str>) -> Result<crate::remote::Page<String>, crate::error::ApiError>,
{
    let uncapped = ctx.uncapped();
    let mut ids = Vec::new();
    let run = pager::paginate(&uncapped, service, label, |token| {
        let page = fetch(token)?;
        let fetched = page.items.len();
        ids.extend(page.items);
        Ok(pager::PageProgress {
            fetched,
            stored: 0,
            next_page_token: page.next_page_token,
        })
    });

    if let Some(err) = run.error() {
        return Err(Halt::from_error(err).unwrap_or_else(|| Halt::Failed {
            class: err.class(),
            message: format!("listing {label} failed: {err}"),
        }));
    }
    if !run.exhausted() {
        return Err(Halt::Failed {
            class: crate::error::ErrorClass::Other,
            message: format!("listing {label} ended early: {}", run.unit_end().error_label()),
        });
    }

    ids.sort();
    ids.dedup();
    Ok(ids)
}
