//! Remote services mirrored by the sweep

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One remote collaboration service.
///
/// The declaration order is the fixed order in which a sweep visits the
/// services of a subject. `Documents` is always last because it consumes
/// identifiers discovered by `Files` in the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Mail,
    Calendar,
    Chat,
    Files,
    Documents,
}

impl Service {
    /// All services in sweep order
    pub const ALL: [Service; 5] = [
        Service::Mail,
        Service::Calendar,
        Service::Chat,
        Service::Files,
        Service::Documents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Mail => "mail",
            Service::Calendar => "calendar",
            Service::Chat => "chat",
            Service::Files => "files",
            Service::Documents => "documents",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mail" | "gmail" => Ok(Service::Mail),
            "calendar" => Ok(Service::Calendar),
            "chat" => Ok(Service::Chat),
            "files" | "drive" => Ok(Service::Files),
            "documents" | "docs" => Ok(Service::Documents),
            other => Err(format!("unknown service: {other}")),
        }
    }
}

/// How a sync unit is being paged this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// No usable cursor: page the time window from scratch
    Initial,
    /// Resume from a stored cursor
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Initial => "initial",
            SyncMode::Incremental => "incremental",
        }
    }
}
