//! Mail collector
//!
//! One unit per subject, keyed by the mailbox change-log token. Without a
//! token the mailbox is listed over the sync window; the change-log position
//! is captured before that listing starts so messages arriving mid-sync are
//! replayed by the next incremental run.

use log::{debug, warn};

use super::context::SyncContext;
use super::outcome::{Halt, ServiceRun, UnitEnd, UnitOutcome};
use super::pager::{PageProgress, paginate};
use super::{gate_cursor, phase};
use crate::error::{ApiError, ErrorClass, SyncError, storage};
use crate::models::{CursorKey, MailMessage, RecordBatch, Service, SyncMode};
use crate::remote::MailApi;

const MAILBOX_UNIT: &str = "mailbox";

/// Sync one subject's mailbox
pub fn sync_mail(ctx: &SyncContext<'_>, api: &dyn MailApi) -> ServiceRun {
    let mut run = ServiceRun::new(Service::Mail);
    let key = CursorKey::mail_history(ctx.subject);

    let (outcome, err) = match ctx.read_cursor(&key) {
        Ok(Some(start)) => {
            let (mut outcome, err) = incremental(ctx, api, &key, &start);
            if matches!(err, Some(SyncError::Api(ApiError::TokenGone))) {
                warn!(
                    "mail {}: history id {start} expired, falling back to windowed sync",
                    ctx.subject
                );
                match ctx.clear_cursor(&key, "token_expired") {
                    Ok(()) => {
                        let (mut fallback, err) = initial(ctx, api, &key);
                        fallback.invalidated = true;
                        fallback.pages += outcome.pages;
                        (fallback, err)
                    }
                    Err(e) => {
                        outcome.end = UnitEnd::Failed { class: e.class() };
                        (outcome, Some(e))
                    }
                }
            } else {
                (outcome, err)
            }
        }
        Ok(None) => initial(ctx, api, &key),
        Err(e) => {
            let mut outcome = UnitOutcome::new(MAILBOX_UNIT, SyncMode::Initial);
            outcome.end = UnitEnd::Failed { class: e.class() };
            (outcome, Some(e))
        }
    };

    phase::unit_end(Service::Mail, ctx.subject, &outcome);
    run.halt = err.as_ref().and_then(Halt::from_error);
    run.record(outcome);
    run
}

fn incremental(
    ctx: &SyncContext<'_>,
    api: &dyn MailApi,
    key: &CursorKey,
    start: &str,
) -> (UnitOutcome, Option<SyncError>) {
    let mut outcome = UnitOutcome::new(MAILBOX_UNIT, SyncMode::Incremental);
    phase::unit_start(Service::Mail, ctx.subject, MAILBOX_UNIT, SyncMode::Incremental);

    let mut latest = start.to_string();
    let page_run = paginate(ctx, Service::Mail, MAILBOX_UNIT, |token| {
        let page = api.list_history(ctx.subject, start, token)?;
        if let Some(history_id) = page.history_id.as_deref()
            && history_is_newer(history_id, &latest)
        {
            latest = history_id.to_string();
        }
        let stored = persist_messages(ctx, api, &page.message_ids, &mut outcome)?;
        Ok(PageProgress {
            fetched: page.message_ids.len(),
            stored,
            next_page_token: page.next_page_token,
        })
    });

    let err = gate_cursor(ctx, key, &mut outcome, &page_run, Some(start), Some(latest));
    (outcome, err.or_else(|| page_run.into_error()))
}

fn initial(
    ctx: &SyncContext<'_>,
    api: &dyn MailApi,
    key: &CursorKey,
) -> (UnitOutcome, Option<SyncError>) {
    let mut outcome = UnitOutcome::new(MAILBOX_UNIT, SyncMode::Initial);
    phase::unit_start(Service::Mail, ctx.subject, MAILBOX_UNIT, SyncMode::Initial);

    let start_history = match api.current_history_id(ctx.subject) {
        Ok(id) => id,
        Err(e) => {
            outcome.end = UnitEnd::Failed { class: e.class() };
            ctx.skip_cursor(key, outcome.end.error_label());
            return (outcome, Some(e.into()));
        }
    };

    let page_run = paginate(ctx, Service::Mail, MAILBOX_UNIT, |token| {
        let page = api.list_message_ids(ctx.subject, ctx.window_start, token)?;
        let stored = persist_messages(ctx, api, &page.items, &mut outcome)?;
        Ok(PageProgress {
            fetched: page.items.len(),
            stored,
            next_page_token: page.next_page_token,
        })
    });

    let err = gate_cursor(ctx, key, &mut outcome, &page_run, None, Some(start_history));
    (outcome, err.or_else(|| page_run.into_error()))
}

/// Fetch and upsert one page of messages.
///
/// Messages deleted between listing and fetch are skipped; any other
/// failure aborts the page so the unit is not treated as exhausted.
fn persist_messages(
    ctx: &SyncContext<'_>,
    api: &dyn MailApi,
    ids: &[String],
    outcome: &mut UnitOutcome,
) -> Result<usize, SyncError> {
    let mut messages: Vec<MailMessage> = Vec::with_capacity(ids.len());
    for id in ids {
        match api.get_message(ctx.subject, id) {
            Ok(message) => messages.push(message),
            Err(ApiError::NotFound(_)) => {
                debug!("mail {}: message {id} vanished before fetch", ctx.subject);
                outcome.skip(ErrorClass::NotFound);
            }
            Err(e) => return Err(e.into()),
        }
    }

    ctx.store
        .upsert_batch(ctx.subject, RecordBatch::Mail(&messages))
        .map_err(storage)
}

/// History ids are decimal and grow monotonically
fn history_is_newer(candidate: &str, current: &str) -> bool {
    match (candidate.parse::<u64>(), current.parse::<u64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => candidate > current,
    }
}
