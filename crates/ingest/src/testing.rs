//! Scripted fake remotes for tests
//!
//! Each fake answers from a [`Script`] keyed by a scope string and the page
//! token requested, and records every call so tests can assert which sync
//! mode a collector used.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ApiError;
use crate::models::{CalendarEvent, ChatMessage, DriveFile, MailMessage};
use crate::remote::{
    CalendarApi, ChatApi, DriveApi, EventPage, EventQuery, HistoryPage, MailApi, Page, Remotes,
};

type Key = (String, Option<String>);

/// Responses keyed by (scope, page token).
///
/// A queued response is consumed unless it is the last one for its key, which
/// then answers every further call. Unknown keys fall back to the default.
pub struct Script<T> {
    entries: Mutex<HashMap<Key, VecDeque<Result<T, ApiError>>>>,
    fallback: Mutex<Option<Result<T, ApiError>>>,
}

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
        }
    }
}

impl<T: Clone> Script<T> {
    pub fn push(&self, scope: &str, token: Option<&str>, response: Result<T, ApiError>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry((scope.to_string(), token.map(str::to_string)))
            .or_default()
            .push_back(response);
    }

    /// Replace every queued response for a key
    pub fn set(&self, scope: &str, token: Option<&str>, response: Result<T, ApiError>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            (scope.to_string(), token.map(str::to_string)),
            VecDeque::from([response]),
        );
    }

    pub fn fallback(&self, response: Result<T, ApiError>) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
    }

    fn next(&self, scope: &str, token: Option<&str>) -> Result<T, ApiError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (scope.to_string(), token.map(str::to_string));
        if let Some(queue) = entries.get_mut(&key) {
            let response = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(response) = response {
                return response;
            }
        }
        drop(entries);

        self.fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| {
                Err(ApiError::Other {
                    status: None,
                    message: format!("unscripted call: {scope} {token:?}"),
                })
            })
    }
}

/// Ordered log of remote calls
#[derive(Default)]
pub struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn push(&self, call: String) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.all().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub struct FakeMail {
    /// scope: subject
    pub history_ids: Script<String>,
    /// scope: subject
    pub listings: Script<Page<String>>,
    /// scope: `subject|start_history_id`
    pub histories: Script<HistoryPage>,
    /// Message bodies by id; unknown ids answer `NotFound`
    pub messages: Mutex<HashMap<String, Result<MailMessage, ApiError>>>,
    pub calls: CallLog,
}

impl Default for FakeMail {
    fn default() -> Self {
        let fake = Self {
            history_ids: Script::default(),
            listings: Script::default(),
            histories: Script::default(),
            messages: Mutex::new(HashMap::new()),
            calls: CallLog::default(),
        };
        fake.history_ids.fallback(Ok("1".to_string()));
        fake.listings.fallback(Ok(Page::last(vec![])));
        fake.histories.fallback(Ok(HistoryPage::default()));
        fake
    }
}

impl FakeMail {
    pub fn add_message(&self, message: MailMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message.id.clone(), Ok(message));
    }

    pub fn fail_message(&self, id: &str, err: ApiError) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), Err(err));
    }
}

impl MailApi for FakeMail {
    fn current_history_id(&self, subject: &str) -> Result<String, ApiError> {
        self.calls.push(format!("current_history_id {subject}"));
        self.history_ids.next(subject, None)
    }

    fn list_message_ids(
        &self,
        subject: &str,
        _after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page<String>, ApiError> {
        self.calls.push(format!("list_message_ids {subject} {page_token:?}"));
        self.listings.next(subject, page_token)
    }

    fn list_history(
        &self,
        subject: &str,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ApiError> {
        self.calls
            .push(format!("list_history {subject} start={start_history_id} {page_token:?}"));
        self.histories
            .next(&format!("{subject}|{start_history_id}"), page_token)
    }

    fn get_message(&self, subject: &str, id: &str) -> Result<MailMessage, ApiError> {
        self.calls.push(format!("get_message {subject} {id}"));
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_else(|| Err(ApiError::NotFound(id.to_string())))
    }
}

pub struct FakeCalendar {
    /// scope: subject
    pub calendars: Script<Page<String>>,
    /// scope: `subject|calendar|initial` or `subject|calendar|sync:TOKEN`
    pub events: Script<EventPage>,
    pub calls: CallLog,
}

impl Default for FakeCalendar {
    fn default() -> Self {
        let fake = Self {
            calendars: Script::default(),
            events: Script::default(),
            calls: CallLog::default(),
        };
        fake.calendars.fallback(Ok(Page::last(vec![])));
        fake
    }
}

impl CalendarApi for FakeCalendar {
    fn list_calendars(&self, subject: &str, page_token: Option<&str>) -> Result<Page<String>, ApiError> {
        self.calls.push(format!("list_calendars {subject} {page_token:?}"));
        self.calendars.next(subject, page_token)
    }

    fn list_events(
        &self,
        subject: &str,
        calendar_id: &str,
        query: EventQuery<'_>,
        page_token: Option<&str>,
    ) -> Result<EventPage, ApiError> {
        let mode = match query {
            EventQuery::Incremental { sync_token } => format!("sync:{sync_token}"),
            EventQuery::Initial { .. } => "initial".to_string(),
        };
        self.calls
            .push(format!("list_events {subject} {calendar_id} {mode} {page_token:?}"));
        self.events
            .next(&format!("{subject}|{calendar_id}|{mode}"), page_token)
    }
}

pub struct FakeChat {
    /// scope: subject
    pub spaces: Script<Page<String>>,
    /// scope: `subject|space`
    pub messages: Script<Page<ChatMessage>>,
    pub calls: CallLog,
}

impl Default for FakeChat {
    fn default() -> Self {
        let fake = Self {
            spaces: Script::default(),
            messages: Script::default(),
            calls: CallLog::default(),
        };
        fake.spaces.fallback(Ok(Page::last(vec![])));
        fake
    }
}

impl ChatApi for FakeChat {
    fn list_spaces(&self, subject: &str, page_token: Option<&str>) -> Result<Page<String>, ApiError> {
        self.calls.push(format!("list_spaces {subject} {page_token:?}"));
        self.spaces.next(subject, page_token)
    }

    fn list_messages(
        &self,
        subject: &str,
        space_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<ChatMessage>, ApiError> {
        self.calls
            .push(format!("list_messages {subject} {space_id} {page_token:?}"));
        self.messages.next(&format!("{subject}|{space_id}"), page_token)
    }
}

pub struct FakeDrive {
    /// scope: subject
    pub files: Script<Page<DriveFile>>,
    /// Metadata by id; unknown ids answer `NotFound`
    pub metadata: Mutex<HashMap<String, Result<DriveFile, ApiError>>>,
    /// Exports by id; unknown ids answer `NotFound`
    pub exports: Mutex<HashMap<String, Result<String, ApiError>>>,
    pub calls: CallLog,
}

impl Default for FakeDrive {
    fn default() -> Self {
        let fake = Self {
            files: Script::default(),
            metadata: Mutex::new(HashMap::new()),
            exports: Mutex::new(HashMap::new()),
            calls: CallLog::default(),
        };
        fake.files.fallback(Ok(Page::last(vec![])));
        fake
    }
}

impl FakeDrive {
    /// Make a document fetchable and exportable
    pub fn add_document(&self, file: DriveFile, text: &str) {
        self.exports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file.id.clone(), Ok(text.to_string()));
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file.id.clone(), Ok(file));
    }

    pub fn fail_export(&self, id: &str, err: ApiError) {
        self.exports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), Err(err));
    }
}

impl DriveApi for FakeDrive {
    fn list_files(
        &self,
        subject: &str,
        modified_after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page<DriveFile>, ApiError> {
        self.calls.push(format!(
            "list_files {subject} after={} {page_token:?}",
            modified_after.to_rfc3339()
        ));
        // Same predicate as the real listing query
        self.files.next(subject, page_token).map(|mut page| {
            page.items.retain(|file| file.modified_time > modified_after);
            page
        })
    }

    fn get_file(&self, subject: &str, id: &str) -> Result<DriveFile, ApiError> {
        self.calls.push(format!("get_file {subject} {id}"));
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_else(|| Err(ApiError::NotFound(id.to_string())))
    }

    fn export_text(&self, subject: &str, id: &str) -> Result<String, ApiError> {
        self.calls.push(format!("export_text {subject} {id}"));
        self.exports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_else(|| Err(ApiError::NotFound(id.to_string())))
    }
}

/// All four fakes, shareable with a sweep
#[derive(Default, Clone)]
pub struct FakeRemotes {
    pub mail: Arc<FakeMail>,
    pub calendar: Arc<FakeCalendar>,
    pub chat: Arc<FakeChat>,
    pub drive: Arc<FakeDrive>,
}

impl FakeRemotes {
    pub fn remotes(&self) -> Remotes {
        Remotes {
            mail: self.mail.clone(),
            calendar: self.calendar.clone(),
            chat: self.chat.clone(),
            drive: self.drive.clone(),
        }
    }
}

pub fn mail_message(id: &str, age_hours: i64) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        history_id: None,
        internal_date: Utc::now() - Duration::hours(age_hours),
        from: Some("Sender <sender@example.com>".to_string()),
        title: Some(format!("Message {id}")),
        snippet: format!("Snippet for {id}"),
        label_ids: vec!["INBOX".to_string()],
        raw: serde_json::json!({ "id": id }),
    }
}

pub fn calendar_event(calendar_id: &str, id: &str, start: DateTime<Utc>) -> CalendarEvent {
    CalendarEvent {
        calendar_id: calendar_id.to_string(),
        id: id.to_string(),
        status: Some("confirmed".to_string()),
        summary: Some(format!("Event {id}")),
        start: Some(start),
        end: Some(start + Duration::minutes(30)),
        updated: Some(start),
        raw: serde_json::json!({ "id": id }),
    }
}

pub fn chat_message(space_id: &str, id: &str, create_time: DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        space_id: space_id.to_string(),
        id: format!("{space_id}/messages/{id}"),
        thread: None,
        sender: Some("users/1".to_string()),
        text: Some(format!("message {id}")),
        create_time,
        last_update_time: None,
        raw: serde_json::json!({ "name": id }),
    }
}

pub fn drive_file(id: &str, mime_type: &str, modified_time: DateTime<Utc>) -> DriveFile {
    DriveFile {
        id: id.to_string(),
        name: format!("File {id}"),
        mime_type: mime_type.to_string(),
        modified_time,
        trashed: false,
        owner: Some("owner@example.com".to_string()),
        raw: serde_json::json!({ "id": id }),
    }
}

pub fn document_file(id: &str, modified_time: DateTime<Utc>) -> DriveFile {
    drive_file(id, DriveFile::DOCUMENT_MIME, modified_time)
}
