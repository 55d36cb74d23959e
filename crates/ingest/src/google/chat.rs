//! Chat API client

use super::api::{ChatMessage as WireMessage, ListChatMessagesResponse, ListSpacesResponse};
use super::http::{GoogleHttp, endpoint};
use super::{decode, parse_timestamp};
use crate::error::ApiError;
use crate::models::ChatMessage;
use crate::remote::{ChatApi, Page};

pub struct ChatClient {
    http: GoogleHttp,
    page_size: u32,
}

impl ChatClient {
    const BASE_URL: &'static str = "https://chat.googleapis.com/v1";

    pub fn new(http: GoogleHttp, page_size: u32) -> Self {
        Self { http, page_size }
    }

    fn page_size(&self) -> String {
        self.page_size.clamp(1, 1000).to_string()
    }
}

impl ChatApi for ChatClient {
    fn list_spaces(&self, subject: &str, page_token: Option<&str>) -> Result<Page<String>, ApiError> {
        let size = self.page_size();
        let mut query = vec![("pageSize", size.as_str())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let url = endpoint(Self::BASE_URL, &["spaces"], &query)?;
        let list: ListSpacesResponse = self.http.get_json(subject, &url)?;
        Ok(Page {
            items: list.spaces.unwrap_or_default().into_iter().map(|s| s.name).collect(),
            next_page_token: list.next_page_token,
        })
    }

    fn list_messages(
        &self,
        subject: &str,
        space_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<ChatMessage>, ApiError> {
        let size = self.page_size();
        let mut query = vec![("pageSize", size.as_str())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        // space ids look like "spaces/AAAA"; each part is its own segment
        let mut segments: Vec<&str> = space_id.split('/').collect();
        segments.push("messages");
        let url = endpoint(Self::BASE_URL, &segments, &query)?;
        let list: ListChatMessagesResponse = self.http.get_json(subject, &url)?;
        messages_page(space_id, list)
    }
}

fn messages_page(space_id: &str, list: ListChatMessagesResponse) -> Result<Page<ChatMessage>, ApiError> {
    let items = list
        .messages
        .unwrap_or_default()
        .into_iter()
        .map(|raw| normalize_message(space_id, raw))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
    })
}

/// Normalize a Chat API message into a mirrored record
pub(crate) fn normalize_message(space_id: &str, raw: serde_json::Value) -> Result<ChatMessage, ApiError> {
    let message: WireMessage = decode(&raw, "chat message")?;
    Ok(ChatMessage {
        space_id: space_id.to_string(),
        create_time: parse_timestamp(&message.create_time, "chat createTime")?,
        last_update_time: message
            .last_update_time
            .as_deref()
            .map(|t| parse_timestamp(t, "chat lastUpdateTime"))
            .transpose()?,
        id: message.name,
        thread: message.thread.map(|t| t.name),
        sender: message.sender.map(|s| s.name),
        text: message.text,
        raw,
    })
}
