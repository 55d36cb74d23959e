//! Sweep orchestrator
//!
//! Visits subjects in sorted order on a bounded worker pool. Within a
//! subject, services run strictly in [`Service`] order on one thread, with
//! documents fed by the files collector's output from the same subject run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::context::{CancelFlag, SyncContext};
use super::documents::DiscoveredDocuments;
use super::outcome::{Halt, ServiceRun};
use super::report::{Disposition, Plan, RunReport, ServiceReport, SubjectReport};
use super::timing::retry_at;
use super::{phase, sync_calendar, sync_chat, sync_documents, sync_files, sync_mail};
use crate::models::{CursorKey, Service, SyncMode};
use crate::registry::{Blocklist, Eligibility, SubjectRegistry};
use crate::remote::Remotes;
use crate::storage::SyncStore;

/// Knobs for one sweep
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Services to run; always executed in [`Service`] order
    pub services: Vec<Service>,
    /// Ignore `result_cap` and page every unit to exhaustion
    pub exhaustive: bool,
    /// Admit transiently blocked subjects whose retry window has passed
    pub include_retryable: bool,
    /// Report planned work without calling any remote
    pub dry_run: bool,
    /// Sweep only this subject, listed or not
    pub subject: Option<String>,
    pub concurrency: usize,
    /// How far back initial syncs reach
    pub window: chrono::Duration,
    pub result_cap: Option<usize>,
    pub subject_timeout: Option<Duration>,
    pub rate_limit_backoff: Duration,
    pub lease_ttl: Duration,
    pub verbose: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            services: Service::ALL.to_vec(),
            exhaustive: false,
            include_retryable: false,
            dry_run: false,
            subject: None,
            concurrency: 4,
            window: chrono::Duration::days(30),
            result_cap: Some(1000),
            subject_timeout: Some(Duration::from_secs(900)),
            rate_limit_backoff: Duration::from_secs(3600),
            lease_ttl: Duration::from_secs(1800),
            verbose: false,
        }
    }
}

/// One sweep across all eligible subjects
pub struct Sweep {
    store: Arc<dyn SyncStore>,
    remotes: Remotes,
    registry: SubjectRegistry,
    options: SweepOptions,
    cancel: CancelFlag,
    holder: String,
}

impl Sweep {
    pub fn new(
        store: Arc<dyn SyncStore>,
        remotes: Remotes,
        registry: SubjectRegistry,
        mut options: SweepOptions,
    ) -> Self {
        options.services.sort();
        options.services.dedup();
        let holder = format!(
            "sweep-{}-{}",
            std::process::id(),
            Utc::now().timestamp_millis()
        );
        Self {
            store,
            remotes,
            registry,
            options,
            cancel: CancelFlag::new(),
            holder,
        }
    }

    /// Flag that interrupts the sweep at the next page boundary
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Subjects this sweep visits, in order
    pub fn subjects(&self) -> Vec<String> {
        match &self.options.subject {
            Some(subject) => SubjectRegistry::single(subject).subjects().to_vec(),
            None => self.registry.subjects().to_vec(),
        }
    }

    /// Run the sweep. Only failing to start the worker pool is an error;
    /// everything else is recorded in the report.
    pub fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let subjects = self.subjects();
        info!(
            "sweep starting: {} subjects, services={:?}, dry_run={}, exhaustive={}",
            subjects.len(),
            self.options.services,
            self.options.dry_run,
            self.options.exhaustive
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .thread_name(|i| format!("sweep-worker-{i}"))
            .build()
            .context("failed to start sweep worker pool")?;

        let reports: Vec<SubjectReport> = pool.install(|| {
            subjects
                .par_iter()
                .map(|subject| self.sweep_subject(subject))
                .collect()
        });

        let mut report = RunReport::new(started_at, self.options.dry_run, self.options.services.clone());
        for subject in reports {
            report.merge(subject);
        }
        report.finish(Utc::now());
        info!(target: phase::TARGET, "{}", report.summary());
        Ok(report)
    }

    fn sweep_subject(&self, subject: &str) -> SubjectReport {
        let now = Utc::now();
        let blocklist = Blocklist::new(self.store.as_ref());

        let retrying = match blocklist.check(subject, self.options.include_retryable, now) {
            Ok(Eligibility::Eligible) => false,
            Ok(Eligibility::Retry(entry)) => {
                info!("{subject}: retrying after transient block ({})", entry.reason);
                true
            }
            Ok(Eligibility::BlockedPermanent(entry)) => {
                debug!("{subject}: permanently blocked ({})", entry.reason);
                return SubjectReport::new(subject, Disposition::BlockedPermanent)
                    .with_message(entry.reason);
            }
            Ok(Eligibility::BlockedTransient(entry)) => {
                debug!("{subject}: transiently blocked until {:?}", entry.retry_at);
                return SubjectReport::new(subject, Disposition::BlockedTransient)
                    .with_message(entry.reason);
            }
            Err(e) => {
                warn!("{subject}: blocklist lookup failed: {e:#}");
                return SubjectReport::new(subject, Disposition::Failed)
                    .with_message(format!("{e:#}"));
            }
        };

        if self.options.dry_run {
            return self.plan_subject(subject);
        }

        let ttl = chrono::Duration::from_std(self.options.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        match self
            .store
            .try_acquire_lease(subject, &self.holder, now + ttl, now)
        {
            Ok(true) => {}
            Ok(false) => {
                info!("{subject}: leased by another sweep, skipping");
                return SubjectReport::new(subject, Disposition::Busy);
            }
            Err(e) => {
                warn!("{subject}: could not take lease: {e:#}");
                return SubjectReport::new(subject, Disposition::Failed)
                    .with_message(format!("{e:#}"));
            }
        }

        let report = self.run_services(subject, now, retrying);

        if let Err(e) = self.store.release_lease(subject, &self.holder) {
            warn!("{subject}: could not release lease: {e:#}");
        }
        report
    }

    fn run_services(&self, subject: &str, now: DateTime<Utc>, retrying: bool) -> SubjectReport {
        let ctx = SyncContext {
            subject,
            store: self.store.as_ref(),
            window_start: now - self.options.window,
            result_cap: if self.options.exhaustive {
                None
            } else {
                self.options.result_cap
            },
            deadline: self.options.subject_timeout.map(|t| Instant::now() + t),
            cancel: &self.cancel,
            verbose: self.options.verbose,
        };
        let blocklist = Blocklist::new(self.store.as_ref());
        let mut report = SubjectReport::new(subject, Disposition::Swept);
        let mut discovered: Option<DiscoveredDocuments> = None;
        let mut rate_limited = false;
        let mut stopped: Option<String> = None;

        for &service in &self.options.services {
            if let Some(reason) = &stopped {
                report.services.push(ServiceReport::skipped(service, reason.clone()));
                continue;
            }
            if let Err(e) = ctx.check_continue() {
                let reason = e.class().to_string();
                report.services.push(ServiceReport::skipped(service, reason.clone()));
                stopped = Some(reason);
                continue;
            }

            let run = match service {
                Service::Mail => sync_mail(&ctx, self.remotes.mail.as_ref()),
                Service::Calendar => sync_calendar(&ctx, self.remotes.calendar.as_ref()),
                Service::Chat => sync_chat(&ctx, self.remotes.chat.as_ref()),
                Service::Files => {
                    let files = sync_files(&ctx, self.remotes.drive.as_ref());
                    if files.run.halt.is_none() {
                        discovered = Some(files.documents);
                    }
                    files.run
                }
                Service::Documents => match &discovered {
                    Some(documents) => sync_documents(&ctx, self.remotes.drive.as_ref(), documents),
                    None => {
                        debug!("{subject}: files did not complete a run, skipping documents");
                        report
                            .services
                            .push(ServiceReport::skipped(service, "files_not_run"));
                        continue;
                    }
                },
            };

            match &run.halt {
                Some(Halt::SubjectMissing { reason }) => {
                    warn!("{subject}: does not exist upstream ({reason}), blocking permanently");
                    if let Err(e) = blocklist.block_permanent(subject, reason) {
                        warn!("{subject}: could not record permanent block: {e:#}");
                    }
                    stopped = Some("subject_missing".to_string());
                }
                Some(Halt::RateLimited { retry_after }) => {
                    rate_limited = true;
                    let until = retry_at(Utc::now(), *retry_after, self.options.rate_limit_backoff);
                    warn!("{subject}: {service} rate limited, retry after {until}");
                    if let Err(e) = blocklist.block_transient(subject, &format!("rate_limited:{service}"), until) {
                        warn!("{subject}: could not record transient block: {e:#}");
                    }
                }
                Some(Halt::Failed { class, message }) => {
                    warn!("{subject}: {service} stopped ({class}): {message}");
                }
                None => {}
            }
            log_service_end(subject, &run);
            report.services.push(ServiceReport::from_run(&run));
        }

        if retrying && !rate_limited && stopped.is_none() {
            if let Err(e) = blocklist.clear_transient(subject) {
                warn!("{subject}: could not clear transient block: {e:#}");
            }
        }
        report
    }

    /// Cursor-only view of what a real sweep would do
    fn plan_subject(&self, subject: &str) -> SubjectReport {
        let mut report = SubjectReport::new(subject, Disposition::Planned);
        for &service in &self.options.services {
            match self.known_units(service, subject) {
                Ok(known_units) => {
                    let mode = if known_units > 0 {
                        SyncMode::Incremental
                    } else {
                        SyncMode::Initial
                    };
                    report
                        .services
                        .push(ServiceReport::planned(service, Plan { mode, known_units }));
                }
                Err(e) => {
                    return SubjectReport::new(subject, Disposition::Failed)
                        .with_message(format!("{e:#}"));
                }
            }
        }
        report
    }

    fn known_units(&self, service: Service, subject: &str) -> Result<usize> {
        let single = |key: CursorKey| -> Result<usize> {
            Ok(usize::from(self.store.get_cursor(&key)?.is_some()))
        };
        let prefixed = |prefix: &str| -> Result<usize> {
            Ok(self
                .store
                .list_cursors(service, subject)?
                .iter()
                .filter(|c| c.key.key.starts_with(prefix))
                .count())
        };
        match service {
            Service::Mail => single(CursorKey::mail_history(subject)),
            Service::Calendar => prefixed("calendar_sync_token:"),
            Service::Chat => prefixed("space:"),
            Service::Files => single(CursorKey::files_modified(subject)),
            Service::Documents => single(CursorKey::last_document(subject)),
        }
    }
}

fn log_service_end(subject: &str, run: &ServiceRun) {
    info!(
        "{subject}: {} {:?}, {} units, {} stored",
        run.service,
        run.status(),
        run.units.len(),
        run.stored()
    );
}
