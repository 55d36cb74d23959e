//! Shared page loop
//!
//! Drives one unit's pagination and returns an explicit end state. Callers
//! may only advance a cursor when the loop reports [`PageEnd::Exhausted`];
//! a result cap or a repeated page token is never mistaken for exhaustion.

use log::warn;
use std::collections::HashSet;

use super::context::SyncContext;
use super::outcome::UnitEnd;
use super::phase;
use crate::error::SyncError;
use crate::models::Service;

/// What one fetched-and-persisted page contributed
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PageProgress {
    /// Items the remote returned on this page
    pub fetched: usize,
    /// Records persisted from this page
    pub stored: usize,
    pub next_page_token: Option<String>,
}

pub(crate) enum PageEnd {
    Exhausted,
    Capped,
    LoopDetected,
    Failed(SyncError),
}

pub(crate) struct PageRun {
    pub pages: usize,
    pub fetched: usize,
    pub stored: usize,
    pub end: PageEnd,
}

impl PageRun {
    pub fn unit_end(&self) -> UnitEnd {
        match &self.end {
            PageEnd::Exhausted => UnitEnd::Exhausted,
            PageEnd::Capped => UnitEnd::Capped,
            PageEnd::LoopDetected => UnitEnd::LoopDetected,
            PageEnd::Failed(e) => UnitEnd::Failed { class: e.class() },
        }
    }

    pub fn exhausted(&self) -> bool {
        matches!(self.end, PageEnd::Exhausted)
    }

    pub fn into_error(self) -> Option<SyncError> {
        match self.end {
            PageEnd::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.end {
            PageEnd::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Page through one unit, handing each page to `step` for fetch and persist.
///
/// `step` receives the page token to request (`None` for the first page).
/// The loop stops on the first error, when the remote stops returning page
/// tokens, when a token repeats, or when the result cap is reached.
pub(crate) fn paginate<F>(ctx: &SyncContext<'_>, service: Service, unit: &str, mut step: F) -> PageRun
where
    F: FnMut(Option<&str>) -> Result<PageProgress, SyncError>,
{
    let mut run = PageRun {
        pages: 0,
        fetched: 0,
        stored: 0,
        end: PageEnd::Exhausted,
    };
    let mut token: Option<String> = None;
    let mut used_tokens: HashSet<String> = HashSet::new();

    loop {
        if let Err(e) = ctx.check_continue() {
            run.end = PageEnd::Failed(e);
            return run;
        }

        let progress = match step(token.as_deref()) {
            Ok(progress) => progress,
            Err(e) => {
                warn!("{service} {} unit {unit}: page {} failed: {e}", ctx.subject, run.pages + 1);
                run.end = PageEnd::Failed(e);
                return run;
            }
        };

        run.pages += 1;
        run.fetched += progress.fetched;
        run.stored += progress.stored;
        phase::page(service, ctx.subject, unit, run.pages, progress.fetched, ctx.verbose);

        let Some(next) = progress.next_page_token else {
            run.end = PageEnd::Exhausted;
            return run;
        };

        if let Some(current) = token.take() {
            used_tokens.insert(current);
        }
        if used_tokens.contains(&next) {
            warn!(
                "{service} {} unit {unit}: page token repeated after {} pages, abandoning unit",
                ctx.subject, run.pages
            );
            run.end = PageEnd::LoopDetected;
            return run;
        }

        if let Some(cap) = ctx.result_cap
            && run.fetched >= cap
        {
            warn!(
                "{service} {} unit {unit}: result cap {cap} reached with pages remaining, not exhausted",
                ctx.subject
            );
            run.end = PageEnd::Capped;
            return run;
        }

        token = Some(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::storage::InMemoryStore;
    use crate::sync::context::{CancelFlag, test_support::context};

    fn page(n: usize, next: Option<&str>) -> Result<PageProgress, SyncError> {
        Ok(PageProgress {
            fetched: n,
            stored: n,
            next_page_token: next.map(str::to_string),
        })
    }

    #[test]
    fn test_exhausts_when_tokens_run_out() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context("a@example.com", &store, &cancel);

        let run = paginate(&ctx, Service::Files, "files", |token| match token {
            None => page(2, Some("p2")),
            Some("p2") => page(3, Some("p3")),
            Some("p3") => page(1, None),
            other => panic!("unexpected token {other:?}"),
        });

        assert!(run.exhausted());
        assert_eq!(run.pages, 3);
        assert_eq!(run.fetched, 6);
    }

    #[test]
    fn test_repeated_token_stops_within_one_page() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context("a@example.com", &store, &cancel);

        let mut calls = 0;
        let run = paginate(&ctx, Service::Chat, "spaces/A", |token| {
            calls += 1;
            match token {
                None => page(1, Some("t1")),
                Some("t1") => page(1, Some("t1")),
                other => panic!("unexpected token {other:?}"),
            }
        });

        assert_eq!(run.unit_end(), UnitEnd::LoopDetected);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_cycle_through_older_token_is_detected() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context("a@example.com", &store, &cancel);

        let run = paginate(&ctx, Service::Chat, "spaces/A", |token| match token {
            None => page(1, Some("a")),
            Some("a") => page(1, Some("b")),
            Some("b") => page(1, Some("a")),
            other => panic!("unexpected token {other:?}"),
        });

        assert_eq!(run.unit_end(), UnitEnd::LoopDetected);
        assert_eq!(run.pages, 3);
    }

    #[test]
    fn test_cap_is_not_exhaustion() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let mut ctx = context("a@example.com", &store, &cancel);
        ctx.result_cap = Some(4);

        let run = paginate(&ctx, Service::Files, "files", |token| match token {
            None => page(3, Some("p2")),
            Some("p2") => page(3, Some("p3")),
            other => panic!("unexpected token {other:?}"),
        });

        assert_eq!(run.unit_end(), UnitEnd::Capped);
        assert!(!run.exhausted());
    }

    #[test]
    fn test_cap_reached_on_last_page_still_exhausts() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let mut ctx = context("a@example.com", &store, &cancel);
        ctx.result_cap = Some(2);

        let run = paginate(&ctx, Service::Files, "files", |_| page(5, None));
        assert!(run.exhausted());
    }

    #[test]
    fn test_error_and_cancellation_end_the_unit() {
        let store = InMemoryStore::new();
        let cancel = CancelFlag::new();
        let ctx = context("a@example.com", &store, &cancel);

        let run = paginate(&ctx, Service::Mail, "mailbox", |token| match token {
            None => page(1, Some("p2")),
            _ => Err(ApiError::Transient("502".into()).into()),
        });
        assert_eq!(run.pages, 1);
        assert!(matches!(run.error(), Some(SyncError::Api(ApiError::Transient(_)))));

        cancel.cancel();
        let run = paginate(&ctx, Service::Mail, "mailbox", |_| page(1, None));
        assert_eq!(run.pages, 0);
        assert_eq!(
            run.unit_end(),
            UnitEnd::Failed {
                class: crate::error::ErrorClass::Interrupted
            }
        );
    }
}
