//! Access token sources
//!
//! Obtaining tokens (OAuth flows, service-account delegation) happens outside
//! the sweep; the clients only ask for a bearer token per subject.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::ApiError;

/// Token filename in the config directory
pub const TOKENS_FILE: &str = "tokens.json";

/// Environment variable holding a single token used for every subject
pub const TOKEN_ENV: &str = "INGEST_ACCESS_TOKEN";

/// Bearer tokens for remote calls made on behalf of a subject
pub trait AccessTokens: Send + Sync {
    fn access_token(&self, subject: &str) -> Result<String, ApiError>;
}

/// Fixed tokens, per subject with an optional fallback
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StaticTokens {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    subjects: HashMap<String, String>,
}

impl StaticTokens {
    /// Load tokens using the following priority:
    /// 1. JSON file (~/.config/ingest/tokens.json)
    /// 2. `INGEST_ACCESS_TOKEN` environment variable
    pub fn load() -> Result<Self> {
        if config::config_exists(TOKENS_FILE) {
            return config::load_json(TOKENS_FILE);
        }
        let token = std::env::var(TOKEN_ENV)
            .with_context(|| format!("no {TOKENS_FILE} in the config directory and {TOKEN_ENV} not set"))?;
        Ok(Self::with_default(token))
    }

    pub fn with_default(token: impl Into<String>) -> Self {
        Self {
            default: Some(token.into()),
            subjects: HashMap::new(),
        }
    }

    /// Parse tokens from JSON (`{"default": "...", "subjects": {"a@org": "..."}}`)
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse tokens JSON")
    }
}

impl AccessTokens for StaticTokens {
    fn access_token(&self, subject: &str) -> Result<String, ApiError> {
        self.subjects
            .get(subject)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| ApiError::Other {
                status: None,
                message: format!("no access token configured for {subject}"),
            })
    }
}
