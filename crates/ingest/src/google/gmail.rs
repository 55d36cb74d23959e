//! Gmail API client

use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, HistoryResponse, ListMessagesResponse, MessagePayload, Profile};
use super::http::{GoogleHttp, endpoint};
use super::decode;
use crate::error::ApiError;
use crate::models::MailMessage;
use crate::remote::{HistoryPage, MailApi, Page};

pub struct GmailClient {
    http: GoogleHttp,
    page_size: u32,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    pub fn new(http: GoogleHttp, page_size: u32) -> Self {
        Self { http, page_size }
    }

    fn max_results(&self) -> String {
        self.page_size.clamp(1, 500).to_string()
    }
}

impl MailApi for GmailClient {
    fn current_history_id(&self, subject: &str) -> Result<String, ApiError> {
        let url = endpoint(Self::BASE_URL, &["users", subject, "profile"], &[])?;
        let profile: Profile = self.http.get_json(subject, &url).map_err(|e| match e {
            ApiError::NotFound(reason) => ApiError::SubjectMissing(reason),
            other => other,
        })?;
        Ok(profile.history_id)
    }

    fn list_message_ids(
        &self,
        subject: &str,
        after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page<String>, ApiError> {
        let q = format!("after:{}", after.timestamp());
        let max = self.max_results();
        let mut query = vec![("q", q.as_str()), ("maxResults", max.as_str())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let url = endpoint(Self::BASE_URL, &["users", subject, "messages"], &query)?;
        let list: ListMessagesResponse = self.http.get_json(subject, &url)?;
        Ok(Page {
            items: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.id)
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    fn list_history(
        &self,
        subject: &str,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ApiError> {
        let max = self.max_results();
        let mut query = vec![
            ("startHistoryId", start_history_id),
            ("historyTypes", "messageAdded"),
            ("maxResults", max.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let url = endpoint(Self::BASE_URL, &["users", subject, "history"], &query)?;
        // Gmail answers 404 when the start id is older than its retained history
        let history: HistoryResponse = self.http.get_json(subject, &url).map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::TokenGone,
            other => other,
        })?;
        Ok(history_page(history))
    }

    fn get_message(&self, subject: &str, id: &str) -> Result<MailMessage, ApiError> {
        let url = endpoint(
            Self::BASE_URL,
            &["users", subject, "messages", id],
            &[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
            ],
        )?;
        let raw: serde_json::Value = self.http.get_json(subject, &url)?;
        normalize_message(raw)
    }
}

fn history_page(history: HistoryResponse) -> HistoryPage {
    let mut message_ids: Vec<String> = history
        .history
        .unwrap_or_default()
        .into_iter()
        .flat_map(|record| record.messages_added.unwrap_or_default())
        .map(|added| added.message.id)
        .collect();
    message_ids.sort();
    message_ids.dedup();
    HistoryPage {
        message_ids,
        history_id: history.history_id,
        next_page_token: history.next_page_token,
    }
}

/// Normalize a Gmail API message into a mirrored record
pub(crate) fn normalize_message(raw: serde_json::Value) -> Result<MailMessage, ApiError> {
    let message: GmailMessage = decode(&raw, "gmail message")?;

    // internalDate is milliseconds since epoch, as a string
    let internal_date = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH);

    Ok(MailMessage {
        from: header(message.payload.as_ref(), "From"),
        title: header(message.payload.as_ref(), "Subject"),
        id: message.id,
        thread_id: message.thread_id,
        history_id: message.history_id,
        internal_date,
        snippet: message.snippet.unwrap_or_default(),
        label_ids: message.label_ids.unwrap_or_default(),
        raw,
    })
}

/// Extract a header value by name
fn header(payload: Option<&MessagePayload>, name: &str) -> Option<String> {
    payload?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}
