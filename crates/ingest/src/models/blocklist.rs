//! Subjects excluded from sweeps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockClass {
    /// Skipped forever (e.g. the subject no longer exists upstream)
    Permanent,
    /// Skipped until `retry_at` elapses
    Transient,
}

impl BlockClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockClass::Permanent => "permanent",
            BlockClass::Transient => "transient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permanent" => Some(BlockClass::Permanent),
            "transient" => Some(BlockClass::Transient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub subject: String,
    pub class: BlockClass,
    pub reason: String,
    pub retry_at: Option<DateTime<Utc>>,
}

impl BlocklistEntry {
    pub fn permanent(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            class: BlockClass::Permanent,
            reason: reason.into(),
            retry_at: None,
        }
    }

    pub fn transient(
        subject: impl Into<String>,
        reason: impl Into<String>,
        retry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.into(),
            class: BlockClass::Transient,
            reason: reason.into(),
            retry_at: Some(retry_at),
        }
    }
}
