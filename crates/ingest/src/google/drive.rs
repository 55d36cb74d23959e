//! Drive API client

use chrono::{DateTime, Utc};

use super::api::{File, FileListResponse};
use super::http::{GoogleHttp, endpoint};
use super::{decode, parse_timestamp};
use crate::error::ApiError;
use crate::models::{DriveFile, format_time};
use crate::remote::{DriveApi, Page};

const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,trashed,owners(emailAddress)";

pub struct DriveClient {
    http: GoogleHttp,
    page_size: u32,
}

impl DriveClient {
    const BASE_URL: &'static str = "https://www.googleapis.com/drive/v3";

    pub fn new(http: GoogleHttp, page_size: u32) -> Self {
        Self { http, page_size }
    }
}

impl DriveApi for DriveClient {
    fn list_files(
        &self,
        subject: &str,
        modified_after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page<DriveFile>, ApiError> {
        let q = format!("modifiedTime > '{}'", format_time(modified_after));
        let size = self.page_size.clamp(1, 1000).to_string();
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut query = vec![
            ("q", q.as_str()),
            ("orderBy", "modifiedTime"),
            ("pageSize", size.as_str()),
            ("fields", fields.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let url = endpoint(Self::BASE_URL, &["files"], &query)?;
        let list: FileListResponse = self.http.get_json(subject, &url)?;
        files_page(list)
    }

    fn get_file(&self, subject: &str, id: &str) -> Result<DriveFile, ApiError> {
        let url = endpoint(Self::BASE_URL, &["files", id], &[("fields", FILE_FIELDS)])?;
        let raw: serde_json::Value = self.http.get_json(subject, &url)?;
        normalize_file(raw)
    }

    fn export_text(&self, subject: &str, id: &str) -> Result<String, ApiError> {
        let url = endpoint(
            Self::BASE_URL,
            &["files", id, "export"],
            &[("mimeType", "text/plain")],
        )?;
        self.http.get_text(subject, &url)
    }
}

fn files_page(list: FileListResponse) -> Result<Page<DriveFile>, ApiError> {
    let items = list
        .files
        .unwrap_or_default()
        .into_iter()
        .map(normalize_file)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        next_page_token: list.next_page_token,
    })
}

/// Normalize a Drive API file into a mirrored record
pub(crate) fn normalize_file(raw: serde_json::Value) -> Result<DriveFile, ApiError> {
    let file: File = decode(&raw, "drive file")?;
    Ok(DriveFile {
        modified_time: parse_timestamp(&file.modified_time, "drive modifiedTime")?,
        owner: file
            .owners
            .unwrap_or_default()
            .into_iter()
            .find_map(|o| o.email_address),
        id: file.id,
        name: file.name,
        mime_type: file.mime_type,
        trashed: file.trashed.unwrap_or(false),
        raw,
    })
}
