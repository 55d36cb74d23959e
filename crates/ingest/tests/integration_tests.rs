//! Integration tests for the ingest crate
//!
//! These drive full sweeps against scripted remotes and check the sync
//! properties end to end: reruns are no-ops, cursors never move backwards,
//! interrupted sweeps resume cleanly and documents follow files.

use chrono::{DateTime, Duration, Utc};
use ingest::testing::{
    FakeRemotes, calendar_event, chat_message, document_file, drive_file, mail_message,
};
use ingest::{
    ApiError, CursorKey, CursorStore, DriveFile, EventPage, HistoryPage, InMemoryStore, Page,
    RecordStore, RunReport, Service, ServiceStatus, SqliteStore, SubjectRegistry, Sweep,
    SweepOptions, SyncMode, SyncStore, Table, UnitEnd,
};
use std::sync::Arc;
use tempfile::TempDir;

const SUBJECT: &str = "ada@example.com";

fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

/// Second page of the file listing, documents d2 and d3
fn second_files_page(now: DateTime<Utc>) -> Page<DriveFile> {
    Page::last(vec![
        document_file("d2", now - Duration::hours(5)),
        document_file("d3", now - Duration::hours(4)),
    ])
}

fn populated_remotes() -> FakeRemotes {
    remotes_at(Utc::now())
}

/// A subject with data in every service, timestamped relative to `now`
fn remotes_at(now: DateTime<Utc>) -> FakeRemotes {
    let hours_ago = |hours: i64| now - Duration::hours(hours);
    let fakes = FakeRemotes::default();

    fakes.mail.history_ids.set(SUBJECT, None, Ok("100".into()));
    fakes
        .mail
        .listings
        .set(SUBJECT, None, Ok(Page::last(vec!["m1".into(), "m2".into()])));
    fakes.mail.add_message(mail_message("m1", 5));
    fakes.mail.add_message(mail_message("m2", 4));

    fakes
        .calendar
        .calendars
        .set(SUBJECT, None, Ok(Page::last(vec!["primary".into()])));
    fakes.calendar.events.set(
        &format!("{SUBJECT}|primary|initial"),
        None,
        Ok(EventPage {
            events: vec![calendar_event("primary", "e1", hours_ago(3))],
            next_page_token: None,
            next_sync_token: Some("s1".into()),
        }),
    );
    fakes.calendar.events.set(
        &format!("{SUBJECT}|primary|sync:s1"),
        None,
        Ok(EventPage {
            events: vec![],
            next_page_token: None,
            next_sync_token: Some("s1".into()),
        }),
    );

    fakes
        .chat
        .spaces
        .set(SUBJECT, None, Ok(Page::last(vec!["spaces/A".into()])));
    fakes.chat.messages.set(
        &format!("{SUBJECT}|spaces/A"),
        None,
        Ok(Page::last(vec![chat_message("spaces/A", "c1", hours_ago(2))])),
    );

    let d1 = document_file("d1", hours_ago(6));
    fakes.drive.files.set(
        SUBJECT,
        None,
        Ok(Page::more(vec![d1.clone(), drive_file("f1", "application/pdf", hours_ago(6))], "p2")),
    );
    let second = second_files_page(now);
    fakes.drive.files.set(SUBJECT, Some("p2"), Ok(second.clone()));
    for doc in std::iter::once(d1).chain(second.items) {
        let text = format!("text of {}", doc.id);
        fakes.drive.add_document(doc, &text);
    }

    fakes
}

fn sweep(store: Arc<dyn SyncStore>, fakes: &FakeRemotes, options: SweepOptions) -> RunReport {
    Sweep::new(
        store,
        fakes.remotes(),
        SubjectRegistry::new([SUBJECT.to_string()]),
        options,
    )
    .run()
    .unwrap()
}

fn only(services: &[Service]) -> SweepOptions {
    SweepOptions {
        services: services.to_vec(),
        ..SweepOptions::default()
    }
}

fn counts(store: &dyn SyncStore) -> Vec<(Table, usize)> {
    Table::ALL
        .iter()
        .map(|&table| (table, store.count(table, SUBJECT).unwrap()))
        .collect()
}

fn cursors(store: &dyn SyncStore) -> Vec<(String, String)> {
    let mut all: Vec<(String, String)> = Service::ALL
        .iter()
        .flat_map(|&service| store.list_cursors(service, SUBJECT).unwrap())
        .map(|c| (c.key.key, c.value))
        .collect();
    all.sort();
    all
}

fn status(report: &RunReport, service: Service) -> ServiceStatus {
    report.subjects[0].service(service).unwrap().status
}

#[test]
fn test_full_sweep_populates_every_service() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();

    let report = sweep(store.clone(), &fakes, SweepOptions::default());

    assert!(report.passed());
    for service in Service::ALL {
        assert_eq!(status(&report, service), ServiceStatus::Complete, "{service}");
    }
    assert_eq!(
        counts(store.as_ref()),
        vec![
            (Table::MailMessages, 2),
            (Table::CalendarEvents, 1),
            (Table::ChatMessages, 1),
            (Table::DriveFiles, 4),
            (Table::Documents, 3),
        ]
    );
    assert_eq!(
        store.get_document_text(SUBJECT, "d2").unwrap().as_deref(),
        Some("text of d2")
    );
    // A completed document batch leaves no resume point behind
    assert_eq!(store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap(), None);
    assert_eq!(store.get_cursor(&CursorKey::document_batch(SUBJECT)).unwrap(), None);
}

#[test]
fn test_rerun_without_remote_changes_is_a_no_op() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();

    sweep(store.clone(), &fakes, SweepOptions::default());
    let rows = counts(store.as_ref());
    let marks = cursors(store.as_ref());

    let report = sweep(store.clone(), &fakes, SweepOptions::default());

    assert!(report.passed());
    assert_eq!(counts(store.as_ref()), rows);
    assert_eq!(cursors(store.as_ref()), marks);
    for service in [Service::Mail, Service::Calendar, Service::Chat, Service::Files] {
        let service_report = report.subjects[0].service(service).unwrap();
        assert_eq!(service_report.cursors_written, 0, "{service} rewrote an unchanged cursor");
        assert!(
            service_report.units.iter().all(|u| u.mode == SyncMode::Incremental),
            "{service} did not resume incrementally"
        );
    }
}

#[test]
fn test_cursors_never_move_backwards() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();
    sweep(store.clone(), &fakes, SweepOptions::default());
    let files_mark = store.get_cursor(&CursorKey::files_modified(SUBJECT)).unwrap();

    // The remote now reports an older mailbox position and a stale file
    fakes.mail.histories.set(
        &format!("{SUBJECT}|100"),
        None,
        Ok(HistoryPage {
            message_ids: vec![],
            history_id: Some("90".into()),
            next_page_token: None,
        }),
    );
    fakes.drive.files.set(
        SUBJECT,
        None,
        Ok(Page::last(vec![drive_file("old", "text/plain", hours_ago(200))])),
    );

    sweep(store.clone(), &fakes, only(&[Service::Mail, Service::Files]));

    assert_eq!(
        store.get_cursor(&CursorKey::mail_history(SUBJECT)).unwrap().as_deref(),
        Some("100")
    );
    assert_eq!(store.get_cursor(&CursorKey::files_modified(SUBJECT)).unwrap(), files_mark);
    // Older than the watermark, so the incremental query leaves it out
    assert_eq!(store.count(Table::DriveFiles, SUBJECT).unwrap(), 4);
}

#[test]
fn test_failed_page_keeps_rows_but_not_cursor() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();
    fakes
        .drive
        .files
        .set(SUBJECT, Some("p2"), Err(ApiError::Transient("503".into())));

    let report = sweep(store.clone(), &fakes, only(&[Service::Files]));

    let files = report.subjects[0].service(Service::Files).unwrap();
    assert_eq!(files.status, ServiceStatus::Partial);
    assert!(!files.units[0].cursor_written);
    assert_eq!(store.count(Table::DriveFiles, SUBJECT).unwrap(), 2);
    assert_eq!(store.get_cursor(&CursorKey::files_modified(SUBJECT)).unwrap(), None);
    assert!(!report.passed());
}

#[test]
fn test_result_cap_is_not_exhaustion() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();
    let options = SweepOptions {
        result_cap: Some(1),
        ..only(&[Service::Files])
    };

    let report = sweep(store.clone(), &fakes, options);

    let files = report.subjects[0].service(Service::Files).unwrap();
    assert_eq!(files.units[0].end, UnitEnd::Capped);
    assert_eq!(store.get_cursor(&CursorKey::files_modified(SUBJECT)).unwrap(), None);

    // Exhaustive mode lifts the cap and completes the unit
    let options = SweepOptions {
        result_cap: Some(1),
        exhaustive: true,
        ..only(&[Service::Files])
    };
    let report = sweep(store.clone(), &fakes, options);
    assert_eq!(status(&report, Service::Files), ServiceStatus::Complete);
    assert!(store.get_cursor(&CursorKey::files_modified(SUBJECT)).unwrap().is_some());
}

#[test]
fn test_repeated_page_token_terminates() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = FakeRemotes::default();
    fakes.drive.files.set(
        SUBJECT,
        None,
        Ok(Page::more(vec![drive_file("a", "text/plain", hours_ago(1))], "p1")),
    );
    fakes.drive.files.set(
        SUBJECT,
        Some("p1"),
        Ok(Page::more(vec![drive_file("b", "text/plain", hours_ago(1))], "p1")),
    );

    let report = sweep(store.clone(), &fakes, only(&[Service::Files]));

    let files = report.subjects[0].service(Service::Files).unwrap();
    assert_eq!(files.units[0].end, UnitEnd::LoopDetected);
    assert_eq!(fakes.drive.calls.count_matching("list_files"), 2);
    assert_eq!(store.get_cursor(&CursorKey::files_modified(SUBJECT)).unwrap(), None);
}

#[test]
fn test_documents_follow_files_within_a_subject() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();

    sweep(store.clone(), &fakes, only(&[Service::Documents, Service::Files]));

    let calls = fakes.drive.calls.all();
    let last_listing = calls.iter().rposition(|c| c.starts_with("list_files")).unwrap();
    let first_export = calls.iter().position(|c| c.starts_with("get_file")).unwrap();
    assert!(last_listing < first_export);
}

#[test]
fn test_documents_skipped_when_files_halts() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();
    fakes.drive.files.set(
        SUBJECT,
        None,
        Err(ApiError::RateLimited { retry_after: None }),
    );

    let report = sweep(store.clone(), &fakes, only(&[Service::Files, Service::Documents]));

    assert_eq!(status(&report, Service::Files), ServiceStatus::ErrorTransient);
    assert_eq!(status(&report, Service::Documents), ServiceStatus::Skipped);
    assert_eq!(fakes.drive.calls.count_matching("export_text"), 0);
    assert_eq!(store.count(Table::Documents, SUBJECT).unwrap(), 0);
    assert!(report.invariants.as_ref().unwrap().documents_after_files);
}

#[test]
fn test_document_batch_resumes_after_stored_id() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();
    store
        .set_cursor(&CursorKey::document_batch(SUBJECT), r#"["d1","d2","d3"]"#)
        .unwrap();
    store
        .set_cursor(&CursorKey::last_document(SUBJECT), "d1")
        .unwrap();

    let report = sweep(store.clone(), &fakes, only(&[Service::Files, Service::Documents]));

    assert_eq!(status(&report, Service::Documents), ServiceStatus::Complete);
    let exported: Vec<String> = fakes
        .drive
        .calls
        .all()
        .into_iter()
        .filter(|c| c.starts_with("export_text"))
        .collect();
    assert_eq!(
        exported,
        vec![
            format!("export_text {SUBJECT} d2"),
            format!("export_text {SUBJECT} d3"),
        ]
    );
    assert_eq!(store.get_document_text(SUBJECT, "d1").unwrap(), None);
    assert_eq!(store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap(), None);
}

#[test]
fn test_quota_abort_resumes_on_next_sweep_with_new_documents() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    let fakes = remotes_at(now);
    fakes
        .drive
        .fail_export("d2", ApiError::RateLimited { retry_after: None });
    let options = SweepOptions {
        include_retryable: true,
        rate_limit_backoff: std::time::Duration::ZERO,
        ..only(&[Service::Files, Service::Documents])
    };

    let report = sweep(store.clone(), &fakes, options.clone());

    assert_eq!(status(&report, Service::Documents), ServiceStatus::ErrorTransient);
    assert_eq!(
        store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap().as_deref(),
        Some("d1")
    );
    assert_eq!(store.get_document_text(SUBJECT, "d3").unwrap(), None);

    // Quota is back, and a new document sorting below the cursor appears
    // after the files watermark, so only it comes back from the listing
    let a1 = document_file("a1", now - Duration::hours(1));
    fakes.drive.add_document(a1.clone(), "text of a1");
    fakes
        .drive
        .add_document(document_file("d2", now - Duration::hours(5)), "text of d2");
    let mut second = second_files_page(now);
    second.items.push(a1);
    fakes.drive.files.set(SUBJECT, Some("p2"), Ok(second));

    let report = sweep(store.clone(), &fakes, options);

    assert!(report.passed());
    assert_eq!(status(&report, Service::Documents), ServiceStatus::Complete);
    for id in ["a1", "d1", "d2", "d3"] {
        assert_eq!(
            store.get_document_text(SUBJECT, id).unwrap(),
            Some(format!("text of {id}")),
            "{id} was not exported"
        );
    }
    assert_eq!(fakes.drive.calls.count_matching(&format!("export_text {SUBJECT} d1")), 1);
    assert_eq!(store.get_cursor(&CursorKey::last_document(SUBJECT)).unwrap(), None);
    assert_eq!(store.get_cursor(&CursorKey::document_batch(SUBJECT)).unwrap(), None);
}

#[test]
fn test_expired_calendar_token_falls_back_to_initial() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();
    store
        .set_cursor(&CursorKey::calendar_token(SUBJECT, "primary"), "stale")
        .unwrap();
    fakes.calendar.events.set(
        &format!("{SUBJECT}|primary|sync:stale"),
        None,
        Err(ApiError::TokenGone),
    );

    let report = sweep(store.clone(), &fakes, only(&[Service::Calendar]));

    let calendar = report.subjects[0].service(Service::Calendar).unwrap();
    assert_eq!(calendar.status, ServiceStatus::Complete);
    assert!(calendar.units[0].invalidated);
    assert_eq!(calendar.units[0].mode, SyncMode::Initial);
    assert_eq!(
        store
            .get_cursor(&CursorKey::calendar_token(SUBJECT, "primary"))
            .unwrap()
            .as_deref(),
        Some("s1")
    );
    assert_eq!(store.count(Table::CalendarEvents, SUBJECT).unwrap(), 1);
}

#[test]
fn test_interrupted_sweep_resumes_to_same_state() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("resume.test.sqlite");

    let now = Utc::now();

    // Uninterrupted reference run
    let reference = Arc::new(InMemoryStore::new());
    sweep(reference.clone(), &remotes_at(now), SweepOptions::default());

    // First attempt dies on the second files page and the calendar listing
    let flaky = remotes_at(now);
    flaky
        .drive
        .files
        .set(SUBJECT, Some("p2"), Err(ApiError::Transient("reset".into())));
    flaky.drive.files.push(SUBJECT, Some("p2"), Ok(second_files_page(now)));
    flaky
        .calendar
        .calendars
        .set(SUBJECT, None, Err(ApiError::Transient("reset".into())));
    flaky
        .calendar
        .calendars
        .push(SUBJECT, None, Ok(Page::last(vec!["primary".into()])));
    {
        let store = Arc::new(SqliteStore::new(&db_path).unwrap());
        let report = sweep(store, &flaky, SweepOptions::default());
        assert!(!report.passed());
    }

    // A fresh process picks up from whatever was persisted
    let store = Arc::new(SqliteStore::new(&db_path).unwrap());
    let report = sweep(store.clone(), &flaky, SweepOptions::default());

    assert!(report.passed());
    assert_eq!(counts(store.as_ref()), counts(reference.as_ref()));
    assert_eq!(cursors(store.as_ref()), cursors(reference.as_ref()));
}

#[test]
fn test_cancelled_sweep_writes_nothing_and_resumes() {
    let store = Arc::new(InMemoryStore::new());
    let fakes = populated_remotes();
    let cancelled = Sweep::new(
        store.clone(),
        fakes.remotes(),
        SubjectRegistry::new([SUBJECT.to_string()]),
        SweepOptions::default(),
    );
    cancelled.cancel_flag().cancel();

    let report = cancelled.run().unwrap();

    assert!(
        report.subjects[0]
            .services
            .iter()
            .all(|s| s.status == ServiceStatus::Skipped)
    );
    assert!(cursors(store.as_ref()).is_empty());

    let report = sweep(store.clone(), &fakes, SweepOptions::default());
    assert!(report.passed());
    assert_eq!(store.count(Table::Documents, SUBJECT).unwrap(), 3);
}
