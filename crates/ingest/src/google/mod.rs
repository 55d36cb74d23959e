//! Google Workspace API integration
//!
//! Production implementations of the [`crate::remote`] traits:
//! - Gmail (messages and the history change log)
//! - Calendar (per-calendar sync tokens)
//! - Chat (spaces and messages)
//! - Drive (file listing, metadata and document export)
//!
//! Responses are normalized into domain records here; collectors never see
//! wire types.

mod auth;
mod calendar;
mod chat;
mod drive;
mod gmail;
mod http;

pub use auth::{AccessTokens, StaticTokens, TOKEN_ENV, TOKENS_FILE};
pub use calendar::CalendarClient;
pub use chat::ChatClient;
pub use drive::DriveClient;
pub use gmail::GmailClient;
pub use http::{GoogleHttp, classify_status};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiError;
use crate::remote::Remotes;

/// All four clients over one token source
pub fn remotes(tokens: Arc<dyn AccessTokens>, page_size: u32, page_timeout: Duration) -> Remotes {
    let http = GoogleHttp::new(tokens, page_timeout);
    Remotes {
        mail: Arc::new(GmailClient::new(http.clone(), page_size)),
        calendar: Arc::new(CalendarClient::new(http.clone(), page_size)),
        chat: Arc::new(ChatClient::new(http.clone(), page_size)),
        drive: Arc::new(DriveClient::new(http, page_size)),
    }
}

/// Decode one raw item into its wire type
fn decode<T: DeserializeOwned>(raw: &serde_json::Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(raw.clone()).map_err(|e| ApiError::Other {
        status: None,
        message: format!("malformed {what}: {e}"),
    })
}

fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::Other {
            status: None,
            message: format!("bad {what} timestamp {value:?}: {e}"),
        })
}

/// Google API response types
pub mod api {
    use serde::Deserialize;

    // === Gmail ===

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Profile {
        pub email_address: Option<String>,
        pub history_id: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub history_id: Option<String>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub messages_added: Option<Vec<MessageAdded>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessageAdded {
        pub message: MessageRef,
    }

    /// Message in `format=metadata`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: String,
        pub history_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        pub snippet: Option<String>,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Deserialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    // === Calendar ===

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CalendarListResponse {
        pub items: Option<Vec<CalendarListEntry>>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct CalendarListEntry {
        pub id: String,
    }

    /// Event list page; items stay raw so each record keeps its payload
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EventsResponse {
        pub items: Option<Vec<serde_json::Value>>,
        pub next_page_token: Option<String>,
        pub next_sync_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Event {
        pub id: String,
        pub status: Option<String>,
        pub summary: Option<String>,
        pub start: Option<EventTime>,
        pub end: Option<EventTime>,
        pub updated: Option<String>,
    }

    /// Either a timed instant or an all-day date
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EventTime {
        pub date_time: Option<String>,
        pub date: Option<String>,
    }

    // === Chat ===

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListSpacesResponse {
        pub spaces: Option<Vec<Space>>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Space {
        pub name: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListChatMessagesResponse {
        pub messages: Option<Vec<serde_json::Value>>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChatMessage {
        pub name: String,
        pub thread: Option<NamedRef>,
        pub sender: Option<NamedRef>,
        pub text: Option<String>,
        pub create_time: String,
        pub last_update_time: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct NamedRef {
        pub name: String,
    }

    // === Drive ===

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FileListResponse {
        pub files: Option<Vec<serde_json::Value>>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct File {
        pub id: String,
        pub name: String,
        pub mime_type: String,
        pub modified_time: String,
        pub trashed: Option<bool>,
        pub owners: Option<Vec<Owner>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Owner {
        pub email_address: Option<String>,
    }
}
