//! Run report
//!
//! Each subject produces its own [`SubjectReport`]; the sweep merges them
//! into one [`RunReport`] after the worker pool drains, so concurrent
//! subjects never share counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::outcome::{Halt, ServiceRun, ServiceStatus, UnitEnd, UnitOutcome};
use crate::error::ErrorClass;
use crate::models::{Service, SyncMode};

/// Work a dry run would perform for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub mode: SyncMode,
    /// Units with a stored cursor
    pub known_units: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport {
    pub service: Service,
    pub status: ServiceStatus,
    pub units: Vec<UnitOutcome>,
    pub stored: usize,
    pub cursors_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<Halt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ServiceReport {
    pub fn from_run(run: &ServiceRun) -> Self {
        let units: Vec<UnitOutcome> = run.units.values().cloned().collect();
        Self {
            service: run.service,
            status: run.status(),
            stored: run.stored(),
            cursors_written: units.iter().filter(|u| u.cursor_written).count(),
            units,
            halt: run.halt.clone(),
            plan: None,
            note: None,
        }
    }

    /// Service that was deliberately not run
    pub fn skipped(service: Service, note: impl Into<String>) -> Self {
        Self {
            service,
            status: ServiceStatus::Skipped,
            units: Vec::new(),
            stored: 0,
            cursors_written: 0,
            halt: None,
            plan: None,
            note: Some(note.into()),
        }
    }

    pub fn planned(service: Service, plan: Plan) -> Self {
        Self {
            service,
            status: ServiceStatus::NotStarted,
            units: Vec::new(),
            stored: 0,
            cursors_written: 0,
            halt: None,
            plan: Some(plan),
            note: None,
        }
    }
}

/// What happened to a subject as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Swept,
    Planned,
    BlockedPermanent,
    BlockedTransient,
    /// Another sweep holds the subject's lease
    Busy,
    /// Storage failed before any service ran
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectReport {
    pub subject: String,
    pub disposition: Disposition,
    /// Services in the order they ran
    pub services: Vec<ServiceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubjectReport {
    pub fn new(subject: impl Into<String>, disposition: Disposition) -> Self {
        Self {
            subject: subject.into(),
            disposition,
            services: Vec::new(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn service(&self, service: Service) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.service == service)
    }

    /// Any service ended without exhausting all of its units
    pub fn is_partial(&self) -> bool {
        self.services.iter().any(|s| {
            matches!(
                s.status,
                ServiceStatus::Partial | ServiceStatus::ErrorTransient
            )
        })
    }

    pub fn has_permanent_error(&self) -> bool {
        self.services
            .iter()
            .any(|s| s.status == ServiceStatus::ErrorPermanent)
    }
}

/// Per-service counters across subjects
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceTotals {
    /// Subjects the service ran for
    pub attempted: usize,
    /// Complete with at least one record stored
    pub ok: usize,
    /// Complete with nothing new
    pub empty: usize,
    pub partial: usize,
    pub skipped: usize,
    pub stored: usize,
    /// Halts and failed units by class
    pub errors: BTreeMap<ErrorClass, usize>,
}

impl ServiceTotals {
    fn add(&mut self, report: &ServiceReport) {
        match report.status {
            ServiceStatus::Skipped | ServiceStatus::NotStarted => {
                self.skipped += 1;
                return;
            }
            ServiceStatus::Complete if report.stored > 0 => self.ok += 1,
            ServiceStatus::Complete => self.empty += 1,
            ServiceStatus::Partial => self.partial += 1,
            ServiceStatus::ErrorPermanent | ServiceStatus::ErrorTransient => {}
        }
        self.attempted += 1;
        self.stored += report.stored;
        if let Some(halt) = &report.halt {
            *self.errors.entry(halt.class()).or_default() += 1;
        }
        for unit in &report.units {
            if let UnitEnd::Failed { class } = unit.end {
                *self.errors.entry(class).or_default() += 1;
            }
        }
    }
}

/// End-of-sweep checks; `passed` is the sweep's success criterion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invariants {
    pub partial_subjects_count: usize,
    pub error_subjects_count: usize,
    /// Documents never ran for a subject before files did
    pub documents_after_files: bool,
    /// No watermark or token was written for a unit that did not exhaust
    pub cursor_writes_gated: bool,
    pub passed: bool,
}

impl Invariants {
    fn check(subjects: &[SubjectReport]) -> Self {
        let partial_subjects_count = subjects.iter().filter(|s| s.is_partial()).count();
        let error_subjects_count = subjects.iter().filter(|s| s.has_permanent_error()).count();
        let documents_after_files = subjects.iter().all(documents_follow_files);
        let cursor_writes_gated = subjects
            .iter()
            .flat_map(|s| &s.services)
            // the document cursor advances per document
            .filter(|s| s.service != Service::Documents)
            .flat_map(|s| &s.units)
            .all(|u| !u.cursor_written || u.exhausted());
        Self {
            partial_subjects_count,
            error_subjects_count,
            documents_after_files,
            cursor_writes_gated,
            passed: partial_subjects_count == 0 && documents_after_files && cursor_writes_gated,
        }
    }
}

fn documents_follow_files(subject: &SubjectReport) -> bool {
    let ran = |s: &&ServiceReport| {
        !matches!(s.status, ServiceStatus::Skipped | ServiceStatus::NotStarted)
    };
    let position = |service: Service| {
        subject
            .services
            .iter()
            .filter(ran)
            .position(|s| s.service == service)
    };
    match (position(Service::Files), position(Service::Documents)) {
        (_, None) => true,
        (Some(files), Some(documents)) => files < documents,
        (None, Some(_)) => false,
    }
}

/// Report of one sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub services: Vec<Service>,
    pub subjects: Vec<SubjectReport>,
    pub skipped_permanent: Vec<String>,
    pub skipped_transient: Vec<String>,
    pub busy: Vec<String>,
    pub totals: BTreeMap<Service, ServiceTotals>,
    pub invariants: Option<Invariants>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool, services: Vec<Service>) -> Self {
        Self {
            started_at,
            finished_at: None,
            dry_run,
            services,
            subjects: Vec::new(),
            skipped_permanent: Vec::new(),
            skipped_transient: Vec::new(),
            busy: Vec::new(),
            totals: BTreeMap::new(),
            invariants: None,
        }
    }

    /// Fold one subject's report into the run
    pub fn merge(&mut self, subject: SubjectReport) {
        match subject.disposition {
            Disposition::BlockedPermanent => self.skipped_permanent.push(subject.subject.clone()),
            Disposition::BlockedTransient => self.skipped_transient.push(subject.subject.clone()),
            Disposition::Busy => self.busy.push(subject.subject.clone()),
            Disposition::Swept | Disposition::Planned | Disposition::Failed => {}
        }
        for service in &subject.services {
            self.totals
                .entry(service.service)
                .or_default()
                .add(service);
        }
        self.subjects.push(subject);
    }

    /// Sort subjects, stamp the finish time and evaluate invariants
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.subjects.sort_by(|a, b| a.subject.cmp(&b.subject));
        self.skipped_permanent.sort();
        self.skipped_transient.sort();
        self.busy.sort();
        self.finished_at = Some(finished_at);
        self.invariants = Some(Invariants::check(&self.subjects));
    }

    pub fn subject(&self, subject: &str) -> Option<&SubjectReport> {
        self.subjects.iter().find(|s| s.subject == subject)
    }

    pub fn passed(&self) -> bool {
        self.invariants.as_ref().is_some_and(|i| i.passed)
    }

    /// One `key=value` line for the log
    pub fn summary(&self) -> String {
        let swept = self
            .subjects
            .iter()
            .filter(|s| s.disposition == Disposition::Swept)
            .count();
        let stored: usize = self.totals.values().map(|t| t.stored).sum();
        let (partial, errors) = self
            .invariants
            .as_ref()
            .map(|i| (i.partial_subjects_count, i.error_subjects_count))
            .unwrap_or_default();
        format!(
            "phase=sweep_end dry_run={} subjects={} swept={swept} skipped_permanent={} skipped_transient={} busy={} stored={stored} partial_subjects_count={partial} error_subjects_count={errors} passed={}",
            self.dry_run,
            self.subjects.len(),
            self.skipped_permanent.len(),
            self.skipped_transient.len(),
            self.busy.len(),
            self.passed(),
        )
    }
}
