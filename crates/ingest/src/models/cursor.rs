//! Incremental sync markers

use chrono::{DateTime, SecondsFormat, Utc};

use super::Service;

/// Composite identity of one cursor: (service, subject, key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorKey {
    pub service: Service,
    pub subject: String,
    pub key: String,
}

impl CursorKey {
    pub fn new(service: Service, subject: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            service,
            subject: subject.into(),
            key: key.into(),
        }
    }

    /// Mail change-log token for a whole mailbox
    pub fn mail_history(subject: &str) -> Self {
        Self::new(Service::Mail, subject, "history_id")
    }

    /// Per-calendar sync token
    pub fn calendar_token(subject: &str, calendar_id: &str) -> Self {
        Self::new(
            Service::Calendar,
            subject,
            format!("calendar_sync_token:{calendar_id}"),
        )
    }

    /// Per-space last seen message time
    pub fn chat_space(subject: &str, space_id: &str) -> Self {
        Self::new(Service::Chat, subject, format!("space:{space_id}:last_seen_time"))
    }

    /// Subject-level rollup over all chat spaces
    pub fn chat_rollup(subject: &str) -> Self {
        Self::new(Service::Chat, subject, "last_seen_time")
    }

    /// Max observed file modification time
    pub fn files_modified(subject: &str) -> Self {
        Self::new(Service::Files, subject, "modified_time")
    }

    /// Last successfully exported document identifier
    pub fn last_document(subject: &str) -> Self {
        Self::new(Service::Documents, subject, "last_document_id")
    }

    /// Sorted identifiers of the document batch `last_document` indexes
    pub fn document_batch(subject: &str) -> Self {
        Self::new(Service::Documents, subject, "document_batch")
    }
}

/// A stored cursor value
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub key: CursorKey,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Maximum-so-far tracker for watermark style cursors.
///
/// Timestamps are normalized to RFC 3339 UTC with millisecond precision so
/// stored values compare the same way as the times they encode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watermark {
    max: Option<DateTime<Utc>>,
}

impl Watermark {
    /// Start from a previously stored value, ignoring unparseable text
    pub fn from_stored(value: Option<&str>) -> Self {
        Self {
            max: value.and_then(parse_time),
        }
    }

    pub fn observe(&mut self, at: DateTime<Utc>) {
        if self.max.is_none_or(|max| at > max) {
            self.max = Some(at);
        }
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.max
    }

    pub fn encode(&self) -> Option<String> {
        self.max.map(format_time)
    }
}

/// RFC 3339, UTC, millisecond precision
pub fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
