//! Chat collector
//!
//! The chat API has no server-side date filter or ordering on messages, so
//! every page is filtered client-side against the space's watermark (or the
//! sync window on first contact). Each space keeps its own watermark; the
//! subject-level rollup moves only after every space was exhausted.

use chrono::{DateTime, Utc};
use log::{info, warn};

use super::context::SyncContext;
use super::outcome::{Halt, ServiceRun, UnitEnd, UnitOutcome};
use super::pager::{PageProgress, paginate};
use super::{collect_ids, gate_cursor, phase};
use crate::error::{SyncError, storage};
use crate::models::{ChatMessage, CursorKey, RecordBatch, Service, SyncMode, Watermark};
use crate::remote::ChatApi;

/// Sync every space of one subject
pub fn sync_chat(ctx: &SyncContext<'_>, api: &dyn ChatApi) -> ServiceRun {
    let mut run = ServiceRun::new(Service::Chat);

    let spaces = match collect_ids(ctx, Service::Chat, "spaces", |token| {
        api.list_spaces(ctx.subject, token)
    }) {
        Ok(ids) => ids,
        Err(halt) => {
            warn!("chat {}: could not list spaces: {halt:?}", ctx.subject);
            run.halt = Some(halt);
            return run;
        }
    };

    let mut rollup = Watermark::default();
    for space_id in &spaces {
        let (outcome, watermark, err) = sync_space(ctx, api, space_id);
        phase::unit_end(Service::Chat, ctx.subject, &outcome);
        if let Some(at) = watermark {
            rollup.observe(at);
        }
        run.record(outcome);

        if let Some(halt) = err.as_ref().and_then(Halt::from_error) {
            run.halt = Some(halt);
            break;
        }
    }

    let rollup_key = CursorKey::chat_rollup(ctx.subject);
    if run.halt.is_some() || !run.units.values().all(UnitOutcome::exhausted) {
        ctx.skip_cursor(&rollup_key, "spaces_incomplete");
        return run;
    }
    if let Err(e) = write_rollup(ctx, &rollup_key, rollup) {
        warn!("chat {}: could not write rollup: {e}", ctx.subject);
        run.halt = Some(Halt::from_error(&e).unwrap_or_else(|| Halt::Failed {
            class: e.class(),
            message: e.to_string(),
        }));
    }
    run
}

/// Sync one space, returning its outcome and the watermark it ended at
fn sync_space(
    ctx: &SyncContext<'_>,
    api: &dyn ChatApi,
    space_id: &str,
) -> (UnitOutcome, Option<DateTime<Utc>>, Option<SyncError>) {
    let key = CursorKey::chat_space(ctx.subject, space_id);

    let stored = match ctx.read_cursor(&key) {
        Ok(stored) => stored,
        Err(e) => {
            let mut outcome = UnitOutcome::new(space_id, SyncMode::Initial);
            outcome.end = UnitEnd::Failed { class: e.class() };
            return (outcome, None, Some(e));
        }
    };

    let previous = Watermark::from_stored(stored.as_deref());
    let mode = if previous.get().is_some() {
        SyncMode::Incremental
    } else {
        SyncMode::Initial
    };
    let mut outcome = UnitOutcome::new(space_id, mode);
    phase::unit_start(Service::Chat, ctx.subject, space_id, mode);

    let mut seen = previous.clone();
    let page_run = paginate(ctx, Service::Chat, space_id, |token| {
        let page = api.list_messages(ctx.subject, space_id, token)?;
        let fresh: Vec<ChatMessage> = page
            .items
            .iter()
            .filter(|m| is_new(m, previous.get(), ctx.window_start))
            .cloned()
            .collect();
        let stored = ctx
            .store
            .upsert_batch(ctx.subject, RecordBatch::Chat(&fresh))
            .map_err(storage)?;
        for message in &fresh {
            seen.observe(message.seen_time());
        }
        Ok(PageProgress {
            fetched: page.items.len(),
            stored,
            next_page_token: page.next_page_token,
        })
    });

    if matches!(page_run.unit_end(), UnitEnd::Capped) {
        warn!(
            "chat {}: space {space_id} truncated at the result cap after {} messages",
            ctx.subject, page_run.fetched
        );
    }

    let err = gate_cursor(ctx, &key, &mut outcome, &page_run, stored.as_deref(), seen.encode());
    let watermark = if outcome.exhausted() {
        seen.get()
    } else {
        previous.get()
    };
    (outcome, watermark, err.or_else(|| page_run.into_error()))
}

fn is_new(message: &ChatMessage, watermark: Option<DateTime<Utc>>, window_start: DateTime<Utc>) -> bool {
    match watermark {
        Some(watermark) => message.seen_time() >= watermark,
        None => message.seen_time() >= window_start,
    }
}

fn write_rollup(ctx: &SyncContext<'_>, key: &CursorKey, spaces: Watermark) -> Result<(), SyncError> {
    let previous = ctx.read_cursor(key)?;
    let mut rollup = Watermark::from_stored(previous.as_deref());
    if let Some(at) = spaces.get() {
        rollup.observe(at);
    }
    match rollup.encode() {
        Some(value) if previous.as_deref() != Some(value.as_str()) => {
            info!("chat {}: rollup advanced to {value}", ctx.subject);
            ctx.write_cursor(key, &value)
        }
        Some(_) => {
            ctx.skip_cursor(key, "unchanged");
            Ok(())
        }
        None => {
            ctx.skip_cursor(key, "no_new_value");
            Ok(())
        }
    }
}
