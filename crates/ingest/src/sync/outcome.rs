//! Per-unit and per-service results

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ErrorClass, SyncError};
use crate::models::{Service, SyncMode};

/// How a unit's pagination ended.
///
/// Only `Exhausted` means the remote reported no further page; every other
/// variant leaves the unit's cursor untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitEnd {
    Exhausted,
    /// Stopped by the configured result cap with pages still outstanding
    Capped,
    /// The remote handed back a page token it had already issued
    LoopDetected,
    Failed { class: ErrorClass },
}

impl UnitEnd {
    pub fn error_label(&self) -> &'static str {
        match self {
            UnitEnd::Exhausted => "none",
            UnitEnd::Capped => "result_cap",
            UnitEnd::LoopDetected => "page_loop",
            UnitEnd::Failed { class } => class.as_str(),
        }
    }
}

/// Result of syncing one unit (a mailbox, a calendar, a space, ...)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitOutcome {
    pub unit: String,
    pub mode: SyncMode,
    pub end: UnitEnd,
    pub pages: usize,
    /// Items returned by the remote
    pub fetched: usize,
    /// Records persisted
    pub stored: usize,
    pub cursor_written: bool,
    /// The stored cursor was rejected and cleared during this run
    pub invalidated: bool,
    /// Items skipped without failing the unit, by error class
    pub skipped: BTreeMap<ErrorClass, usize>,
}

impl UnitOutcome {
    pub fn new(unit: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            unit: unit.into(),
            mode,
            end: UnitEnd::Exhausted,
            pages: 0,
            fetched: 0,
            stored: 0,
            cursor_written: false,
            invalidated: false,
            skipped: BTreeMap::new(),
        }
    }

    pub fn skip(&mut self, class: ErrorClass) {
        *self.skipped.entry(class).or_default() += 1;
    }

    pub fn exhausted(&self) -> bool {
        self.end == UnitEnd::Exhausted
    }
}

/// Reason a service stopped before visiting all of its units
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Halt {
    /// Fatal to the subject for the rest of the sweep
    SubjectMissing { reason: String },
    /// Remaining units of this service are abandoned
    RateLimited {
        #[serde(skip)]
        retry_after: Option<Duration>,
    },
    /// Listing the units themselves failed
    Failed { class: ErrorClass, message: String },
}

impl Halt {
    /// Decide whether a unit failure stops the whole service
    pub(crate) fn from_error(err: &SyncError) -> Option<Halt> {
        match err {
            SyncError::Api(crate::error::ApiError::SubjectMissing(reason)) => {
                Some(Halt::SubjectMissing {
                    reason: reason.clone(),
                })
            }
            SyncError::Api(crate::error::ApiError::RateLimited { retry_after }) => {
                Some(Halt::RateLimited {
                    retry_after: *retry_after,
                })
            }
            SyncError::Interrupted | SyncError::DeadlineExceeded => Some(Halt::Failed {
                class: err.class(),
                message: err.to_string(),
            }),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Halt::SubjectMissing { .. } => ErrorClass::SubjectMissing,
            Halt::RateLimited { .. } => ErrorClass::RateLimited,
            Halt::Failed { class, .. } => *class,
        }
    }
}

/// Final state of one (subject, service) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    NotStarted,
    Complete,
    Partial,
    ErrorPermanent,
    ErrorTransient,
    /// Not run: dependency missing, subject busy, or dry run
    Skipped,
}

/// Result of one collector run for one subject
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRun {
    pub service: Service,
    /// Independent per-unit results keyed by unit id
    pub units: BTreeMap<String, UnitOutcome>,
    pub halt: Option<Halt>,
}

impl ServiceRun {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            units: BTreeMap::new(),
            halt: None,
        }
    }

    pub fn record(&mut self, outcome: UnitOutcome) {
        self.units.insert(outcome.unit.clone(), outcome);
    }

    pub fn status(&self) -> ServiceStatus {
        match &self.halt {
            Some(Halt::SubjectMissing { .. }) => ServiceStatus::ErrorPermanent,
            Some(_) => ServiceStatus::ErrorTransient,
            None if self.units.values().all(UnitOutcome::exhausted) => ServiceStatus::Complete,
            None => ServiceStatus::Partial,
        }
    }

    /// Records persisted across all units
    pub fn stored(&self) -> usize {
        self.units.values().map(|u| u.stored).sum()
    }

    /// Error classes of failed units
    pub fn unit_errors(&self) -> impl Iterator<Item = ErrorClass> + '_ {
        self.units.values().filter_map(|u| match u.end {
            UnitEnd::Failed { class } => Some(class),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_unfinished_unit_makes_service_partial() {
        let mut run = ServiceRun::new(Service::Calendar);
        run.record(UnitOutcome::new("primary", SyncMode::Incremental));
        assert_eq!(run.status(), ServiceStatus::Complete);

        let mut capped = UnitOutcome::new("team", SyncMode::Initial);
        capped.end = UnitEnd::Capped;
        run.record(capped);
        assert_eq!(run.status(), ServiceStatus::Partial);
    }

    #[test]
    fn test_halt_overrides_unit_results() {
        let mut run = ServiceRun::new(Service::Mail);
        run.record(UnitOutcome::new("mailbox", SyncMode::Initial));
        run.halt = Some(Halt::SubjectMissing {
            reason: "gone".into(),
        });
        assert_eq!(run.status(), ServiceStatus::ErrorPermanent);

        run.halt = Some(Halt::RateLimited { retry_after: None });
        assert_eq!(run.status(), ServiceStatus::ErrorTransient);
    }
}
