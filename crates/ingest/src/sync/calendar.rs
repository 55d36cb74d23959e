//! Calendar collector
//!
//! One unit per calendar, each with its own sync token. A calendar whose
//! token the remote reports as gone has the token cleared and is re-listed
//! over the sync window; other calendars are unaffected.

use log::warn;

use super::context::SyncContext;
use super::outcome::{Halt, ServiceRun, UnitEnd, UnitOutcome};
use super::pager::{PageProgress, paginate};
use super::{collect_ids, gate_cursor, phase};
use crate::error::{ApiError, SyncError, storage};
use crate::models::{CursorKey, RecordBatch, Service, SyncMode};
use crate::remote::{CalendarApi, EventQuery};

/// Sync every calendar of one subject
pub fn sync_calendar(ctx: &SyncContext<'_>, api: &dyn CalendarApi) -> ServiceRun {
    let mut run = ServiceRun::new(Service::Calendar);

    let calendars = match collect_ids(ctx, Service::Calendar, "calendars", |token| {
        api.list_calendars(ctx.subject, token)
    }) {
        Ok(ids) => ids,
        Err(halt) => {
            warn!("calendar {}: could not list calendars: {halt:?}", ctx.subject);
            run.halt = Some(halt);
            return run;
        }
    };

    for calendar_id in &calendars {
        let (outcome, err) = sync_one(ctx, api, calendar_id);
        phase::unit_end(Service::Calendar, ctx.subject, &outcome);
        run.record(outcome);

        if let Some(halt) = err.as_ref().and_then(Halt::from_error) {
            run.halt = Some(halt);
            break;
        }
    }

    run
}

fn sync_one(
    ctx: &SyncContext<'_>,
    api: &dyn CalendarApi,
    calendar_id: &str,
) -> (UnitOutcome, Option<SyncError>) {
    let key = CursorKey::calendar_token(ctx.subject, calendar_id);

    let stored = match ctx.read_cursor(&key) {
        Ok(stored) => stored,
        Err(e) => {
            let mut outcome = UnitOutcome::new(calendar_id, SyncMode::Initial);
            outcome.end = UnitEnd::Failed { class: e.class() };
            return (outcome, Some(e));
        }
    };

    let Some(token) = stored else {
        return list_events(ctx, api, calendar_id, &key, None);
    };

    let (mut outcome, err) = list_events(ctx, api, calendar_id, &key, Some(&token));
    if !matches!(err, Some(SyncError::Api(ApiError::TokenGone))) {
        return (outcome, err);
    }

    warn!(
        "calendar {}: sync token for {calendar_id} is gone, resyncing that calendar",
        ctx.subject
    );
    if let Err(e) = ctx.clear_cursor(&key, "token_gone") {
        outcome.end = UnitEnd::Failed { class: e.class() };
        return (outcome, Some(e));
    }

    let (mut fallback, err) = list_events(ctx, api, calendar_id, &key, None);
    fallback.invalidated = true;
    fallback.pages += outcome.pages;
    (fallback, err)
}

/// Page through one calendar, incrementally when `sync_token` is given
fn list_events(
    ctx: &SyncContext<'_>,
    api: &dyn CalendarApi,
    calendar_id: &str,
    key: &CursorKey,
    sync_token: Option<&str>,
) -> (UnitOutcome, Option<SyncError>) {
    let (mode, query) = match sync_token {
        Some(sync_token) => (SyncMode::Incremental, EventQuery::Incremental { sync_token }),
        None => (
            SyncMode::Initial,
            EventQuery::Initial {
                time_min: ctx.window_start,
            },
        ),
    };

    let mut outcome = UnitOutcome::new(calendar_id, mode);
    phase::unit_start(Service::Calendar, ctx.subject, calendar_id, mode);

    let mut next_sync_token: Option<String> = None;
    let page_run = paginate(ctx, Service::Calendar, calendar_id, |page_token| {
        let page = api.list_events(ctx.subject, calendar_id, query, page_token)?;
        let stored = ctx
            .store
            .upsert_batch(ctx.subject, RecordBatch::Events(&page.events))
            .map_err(storage)?;
        if page.next_sync_token.is_some() {
            next_sync_token = page.next_sync_token;
        }
        Ok(PageProgress {
            fetched: page.events.len(),
            stored,
            next_page_token: page.next_page_token,
        })
    });

    let err = gate_cursor(ctx, key, &mut outcome, &page_run, sync_token, next_sync_token);
    (outcome, err.or_else(|| page_run.into_error()))
}
