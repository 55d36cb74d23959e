//! Remote API seams
//!
//! Collectors talk to these traits only. Pages come back already normalized
//! into domain records; the Google HTTP clients in [`crate::google`] are the
//! production implementations and [`crate::testing`] holds scripted fakes.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::{CalendarEvent, ChatMessage, DriveFile, MailMessage};

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    pub fn more(items: Vec<T>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(next_page_token.into()),
        }
    }
}

/// One page of the mailbox change log
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryPage {
    /// Messages added since the start token
    pub message_ids: Vec<String>,
    /// Current mailbox history id as reported with this page
    pub history_id: Option<String>,
    pub next_page_token: Option<String>,
}

/// One page of calendar events
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPage {
    pub events: Vec<CalendarEvent>,
    pub next_page_token: Option<String>,
    /// Only present on the final page
    pub next_sync_token: Option<String>,
}

/// How to list events for one calendar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventQuery<'a> {
    /// Changes since a stored sync token
    Incremental { sync_token: &'a str },
    /// Time-windowed listing sorted ascending by start time
    Initial { time_min: DateTime<Utc> },
}

pub trait MailApi: Send + Sync {
    /// Current change-log position of the mailbox
    fn current_history_id(&self, subject: &str) -> Result<String, ApiError>;

    /// Message ids received after `after`
    fn list_message_ids(
        &self,
        subject: &str,
        after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page<String>, ApiError>;

    /// Change log since `start_history_id`; `TokenGone` when it is too old
    fn list_history(
        &self,
        subject: &str,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ApiError>;

    fn get_message(&self, subject: &str, id: &str) -> Result<MailMessage, ApiError>;
}

pub trait CalendarApi: Send + Sync {
    /// Calendar ids visible to the subject
    fn list_calendars(&self, subject: &str, page_token: Option<&str>)
    -> Result<Page<String>, ApiError>;

    fn list_events(
        &self,
        subject: &str,
        calendar_id: &str,
        query: EventQuery<'_>,
        page_token: Option<&str>,
    ) -> Result<EventPage, ApiError>;
}

/// Chat offers no server-side ordering or date filter on messages.
pub trait ChatApi: Send + Sync {
    /// Space ids the subject belongs to
    fn list_spaces(&self, subject: &str, page_token: Option<&str>) -> Result<Page<String>, ApiError>;

    fn list_messages(
        &self,
        subject: &str,
        space_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<ChatMessage>, ApiError>;
}

pub trait DriveApi: Send + Sync {
    /// Files modified strictly after `modified_after`, ascending by modification time
    fn list_files(
        &self,
        subject: &str,
        modified_after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page<DriveFile>, ApiError>;

    /// Current metadata of one file
    fn get_file(&self, subject: &str, id: &str) -> Result<DriveFile, ApiError>;

    /// Plain-text export of a native document
    fn export_text(&self, subject: &str, id: &str) -> Result<String, ApiError>;
}

/// The set of remote services a sweep talks to
#[derive(Clone)]
pub struct Remotes {
    pub mail: Arc<dyn MailApi>,
    pub calendar: Arc<dyn CalendarApi>,
    pub chat: Arc<dyn ChatApi>,
    pub drive: Arc<dyn DriveApi>,
}
