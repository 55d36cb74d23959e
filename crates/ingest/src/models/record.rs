//! Mirrored remote records
//!
//! Each record type maps to one table. The natural key is the subject plus
//! the remote identifier, and for nested resources the parent identifier too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Gmail message (metadata projection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    pub history_id: Option<String>,
    pub internal_date: DateTime<Utc>,
    pub from: Option<String>,
    pub title: Option<String>,
    pub snippet: String,
    pub label_ids: Vec<String>,
    pub raw: serde_json::Value,
}

/// A calendar event, nested under its calendar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub calendar_id: String,
    pub id: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

/// A chat message, nested under its space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub space_id: String,
    pub id: String,
    pub thread: Option<String>,
    pub sender: Option<String>,
    pub text: Option<String>,
    pub create_time: DateTime<Utc>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

impl ChatMessage {
    /// Latest time this message changed
    pub fn seen_time(&self) -> DateTime<Utc> {
        match self.last_update_time {
            Some(updated) if updated > self.create_time => updated,
            _ => self.create_time,
        }
    }
}

/// A file in cloud storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: DateTime<Utc>,
    pub trashed: bool,
    pub owner: Option<String>,
    pub raw: serde_json::Value,
}

impl DriveFile {
    /// Mime type of native text documents exported by the document collector
    pub const DOCUMENT_MIME: &'static str = "application/vnd.google-apps.document";

    pub fn is_document(&self) -> bool {
        self.mime_type == Self::DOCUMENT_MIME && !self.trashed
    }
}

/// Exported textual content of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub text: String,
    pub raw: serde_json::Value,
}

/// Local tables, one per resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    MailMessages,
    CalendarEvents,
    ChatMessages,
    DriveFiles,
    Documents,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::MailMessages,
        Table::CalendarEvents,
        Table::ChatMessages,
        Table::DriveFiles,
        Table::Documents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::MailMessages => "mail_messages",
            Table::CalendarEvents => "calendar_events",
            Table::ChatMessages => "chat_messages",
            Table::DriveFiles => "drive_files",
            Table::Documents => "documents",
        }
    }
}

/// A page of records bound for one table
#[derive(Debug, Clone, Copy)]
pub enum RecordBatch<'a> {
    Mail(&'a [MailMessage]),
    Events(&'a [CalendarEvent]),
    Chat(&'a [ChatMessage]),
    Files(&'a [DriveFile]),
    Documents(&'a [Document]),
}

impl RecordBatch<'_> {
    pub fn table(&self) -> Table {
        match self {
            RecordBatch::Mail(_) => Table::MailMessages,
            RecordBatch::Events(_) => Table::CalendarEvents,
            RecordBatch::Chat(_) => Table::ChatMessages,
            RecordBatch::Files(_) => Table::DriveFiles,
            RecordBatch::Documents(_) => Table::Documents,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Mail(items) => items.len(),
            RecordBatch::Events(items) => items.len(),
            RecordBatch::Chat(items) => items.len(),
            RecordBatch::Files(items) => items.len(),
            RecordBatch::Documents(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seen_time_prefers_later_update() {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let mut msg = ChatMessage {
            space_id: "spaces/A".into(),
            id: "spaces/A/messages/1".into(),
            thread: None,
            sender: None,
            text: Some("hi".into()),
            create_time: created,
            last_update_time: Some(updated),
            raw: serde_json::Value::Null,
        };
        assert_eq!(msg.seen_time(), updated);

        msg.last_update_time = None;
        assert_eq!(msg.seen_time(), created);
    }

    #[test]
    fn test_trashed_docs_are_not_documents() {
        let file = DriveFile {
            id: "f1".into(),
            name: "Plan".into(),
            mime_type: DriveFile::DOCUMENT_MIME.into(),
            modified_time: Utc::now(),
            trashed: true,
            owner: None,
            raw: serde_json::Value::Null,
        };
        assert!(!file.is_document());
    }
}
