use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;

use crate::models::{BlockClass, BlocklistEntry};
use crate::storage::BlocklistStore;
use crate::sync::retry_elapsed;

/// Whether a subject may be swept right now
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible,
    /// Transiently blocked, but the retry window has passed and retries were requested
    Retry(BlocklistEntry),
    BlockedPermanent(BlocklistEntry),
    BlockedTransient(BlocklistEntry),
}

impl Eligibility {
    pub fn admitted(&self) -> bool {
        matches!(self, Eligibility::Eligible | Eligibility::Retry(_))
    }
}

/// Blocklist rules over a [`BlocklistStore`]
pub struct Blocklist<'a, S: BlocklistStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: BlocklistStore + ?Sized> Blocklist<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Permanent entries always exclude. Transient entries exclude unless
    /// `include_retryable` is set and their retry window has elapsed.
    pub fn check(&self, subject: &str, include_retryable: bool, now: DateTime<Utc>) -> Result<Eligibility> {
        let Some(entry) = self.store.get_block(subject)? else {
            return Ok(Eligibility::Eligible);
        };
        Ok(match entry.class {
            BlockClass::Permanent => Eligibility::BlockedPermanent(entry),
            BlockClass::Transient if include_retryable && retry_elapsed(entry.retry_at, now) => {
                Eligibility::Retry(entry)
            }
            BlockClass::Transient => Eligibility::BlockedTransient(entry),
        })
    }

    pub fn block_permanent(&self, subject: &str, reason: &str) -> Result<()> {
        info!("blocklist: {subject} blocked permanently: {reason}");
        self.store.put_block(&BlocklistEntry::permanent(subject, reason))
    }

    /// Record a transient block; an existing permanent entry is kept
    pub fn block_transient(&self, subject: &str, reason: &str, retry_at: DateTime<Utc>) -> Result<()> {
        if let Some(existing) = self.store.get_block(subject)?
            && existing.class == BlockClass::Permanent
        {
            return Ok(());
        }
        info!("blocklist: {subject} blocked until {retry_at}: {reason}");
        self.store
            .put_block(&BlocklistEntry::transient(subject, reason, retry_at))
    }

    /// Drop a transient entry after a clean retry; permanent entries stay
    pub fn clear_transient(&self, subject: &str) -> Result<()> {
        match self.store.get_block(subject)? {
            Some(entry) if entry.class == BlockClass::Transient => {
                info!("blocklist: {subject} unblocked");
                self.store.remove_block(subject)
            }
            _ => Ok(()),
        }
    }
}
