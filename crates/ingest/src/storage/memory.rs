//! In-memory storage implementation
//!
//! Used by tests and dry runs. Mirrors the SQLite semantics: upserts on the
//! natural key, `created_at` preserved across updates.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::traits::{BlocklistStore, CursorStore, LeaseStore, RecordStore, RecordTimes};
use crate::models::{
    BlocklistEntry, Cursor, CursorKey, Document, DriveFile, RecordBatch, Service, Table,
};

/// (table, subject, natural key)
type RowKey = (Table, String, String);

struct StoredRow {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    payload: serde_json::Value,
}

struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// In-memory implementation of every storage trait
#[derive(Default)]
pub struct InMemoryStore {
    cursors: RwLock<BTreeMap<CursorKey, Cursor>>,
    rows: RwLock<HashMap<RowKey, StoredRow>>,
    blocks: RwLock<BTreeMap<String, BlocklistEntry>>,
    leases: RwLock<HashMap<String, Lease>>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn put_rows<T: Serialize>(
        &self,
        table: Table,
        subject: &str,
        items: &[T],
        key_of: impl Fn(&T) -> (String, String),
    ) -> Result<()> {
        let now = Utc::now();
        let mut rows = self.rows.write().map_err(poisoned)?;
        for item in items {
            let (natural, id) = key_of(item);
            let payload = serde_json::to_value(item)?;
            rows.entry((table, subject.to_string(), natural))
                .and_modify(|row| {
                    row.updated_at = now;
                    row.payload = payload.clone();
                })
                .or_insert_with(|| StoredRow {
                    id,
                    created_at: now,
                    updated_at: now,
                    payload,
                });
        }
        Ok(())
    }
}

fn nested(parent: &str, id: &str) -> (String, String) {
    (format!("{parent}\u{1f}{id}"), id.to_string())
}

fn flat(id: &str) -> (String, String) {
    (id.to_string(), id.to_string())
}

impl CursorStore for InMemoryStore {
    fn get_cursor(&self, key: &CursorKey) -> Result<Option<String>> {
        let cursors = self.cursors.read().map_err(poisoned)?;
        Ok(cursors.get(key).map(|c| c.value.clone()))
    }

    fn set_cursor(&self, key: &CursorKey, value: &str) -> Result<()> {
        let mut cursors = self.cursors.write().map_err(poisoned)?;
        cursors.insert(
            key.clone(),
            Cursor {
                key: key.clone(),
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn clear_cursor(&self, key: &CursorKey) -> Result<()> {
        let mut cursors = self.cursors.write().map_err(poisoned)?;
        cursors.remove(key);
        Ok(())
    }

    fn list_cursors(&self, service: Service, subject: &str) -> Result<Vec<Cursor>> {
        let cursors = self.cursors.read().map_err(poisoned)?;
        Ok(cursors
            .values()
            .filter(|c| c.key.service == service && c.key.subject == subject)
            .cloned()
            .collect())
    }
}

impl RecordStore for InMemoryStore {
    fn upsert_batch(&self, subject: &str, batch: RecordBatch<'_>) -> Result<usize> {
        let table = batch.table();
        match batch {
            RecordBatch::Mail(items) => self.put_rows(table, subject, items, |m| flat(&m.id))?,
            RecordBatch::Events(items) => {
                self.put_rows(table, subject, items, |e| nested(&e.calendar_id, &e.id))?
            }
            RecordBatch::Chat(items) => {
                self.put_rows(table, subject, items, |m| nested(&m.space_id, &m.id))?
            }
            RecordBatch::Files(items) => self.put_rows(table, subject, items, |f| flat(&f.id))?,
            RecordBatch::Documents(items) => {
                self.put_rows(table, subject, items, |d| flat(&d.id))?
            }
        }
        Ok(batch.len())
    }

    fn count(&self, table: Table, subject: &str) -> Result<usize> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .keys()
            .filter(|(t, s, _)| *t == table && s == subject)
            .count())
    }

    fn record_times(&self, table: Table, subject: &str, id: &str) -> Result<Option<RecordTimes>> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .iter()
            .find(|((t, s, _), row)| *t == table && s == subject && row.id == id)
            .map(|(_, row)| RecordTimes {
                created_at: row.created_at,
                updated_at: row.updated_at,
            }))
    }

    fn get_document_text(&self, subject: &str, id: &str) -> Result<Option<String>> {
        let rows = self.rows.read().map_err(poisoned)?;
        let key = (Table::Documents, subject.to_string(), id.to_string());
        rows.get(&key)
            .map(|row| -> Result<String> {
                let doc: Document = serde_json::from_value(row.payload.clone())?;
                Ok(doc.text)
            })
            .transpose()
    }

    fn pending_documents(&self, subject: &str, since: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = self.rows.read().map_err(poisoned)?;
        let mut ids = Vec::new();
        for ((table, owner, _), row) in rows.iter() {
            if *table != Table::DriveFiles || owner != subject {
                continue;
            }
            let file: DriveFile = serde_json::from_value(row.payload.clone())?;
            if !file.is_document() || file.modified_time < since {
                continue;
            }
            let key = (Table::Documents, subject.to_string(), file.id.clone());
            let exported = rows
                .get(&key)
                .map(|row| serde_json::from_value::<Document>(row.payload.clone()))
                .transpose()?
                .and_then(|doc| doc.modified_time);
            if exported.is_none_or(|at| at < file.modified_time) {
                ids.push(file.id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl BlocklistStore for InMemoryStore {
    fn get_block(&self, subject: &str) -> Result<Option<BlocklistEntry>> {
        let blocks = self.blocks.read().map_err(poisoned)?;
        Ok(blocks.get(subject).cloned())
    }

    fn list_blocks(&self) -> Result<Vec<BlocklistEntry>> {
        let blocks = self.blocks.read().map_err(poisoned)?;
        Ok(blocks.values().cloned().collect())
    }

    fn put_block(&self, entry: &BlocklistEntry) -> Result<()> {
        let mut blocks = self.blocks.write().map_err(poisoned)?;
        blocks.insert(entry.subject.clone(), entry.clone());
        Ok(())
    }

    fn remove_block(&self, subject: &str) -> Result<()> {
        let mut blocks = self.blocks.write().map_err(poisoned)?;
        blocks.remove(subject);
        Ok(())
    }
}

impl LeaseStore for InMemoryStore {
    fn try_acquire_lease(
        &self,
        subject: &str,
        holder: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut leases = self.leases.write().map_err(poisoned)?;
        if let Some(current) = leases.get(subject)
            && current.holder != holder
            && current.expires_at > now
        {
            return Ok(false);
        }
        leases.insert(
            subject.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    fn release_lease(&self, subject: &str, holder: &str) -> Result<()> {
        let mut leases = self.leases.write().map_err(poisoned)?;
        if leases.get(subject).is_some_and(|l| l.holder == holder) {
            leases.remove(subject);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;

    fn chat(space: &str, id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            space_id: space.to_string(),
            id: id.to_string(),
            thread: None,
            sender: Some("users/1".to_string()),
            text: Some(text.to_string()),
            create_time: Utc::now(),
            last_update_time: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let store = InMemoryStore::new();
        store
            .upsert_batch("a@example.com", RecordBatch::Chat(&[chat("s1", "m1", "hello")]))
            .unwrap();
        store
            .upsert_batch("a@example.com", RecordBatch::Chat(&[chat("s1", "m1", "edited")]))
            .unwrap();
        store
            .upsert_batch("a@example.com", RecordBatch::Chat(&[chat("s2", "m1", "other")]))
            .unwrap();

        assert_eq!(store.count(Table::ChatMessages, "a@example.com").unwrap(), 2);
        assert_eq!(store.count(Table::ChatMessages, "b@example.com").unwrap(), 0);
    }

    #[test]
    fn test_pending_documents_follow_file_changes() {
        let store = InMemoryStore::new();
        let at = Utc::now() - chrono::Duration::hours(1);
        let file = |id: &str, modified_time| DriveFile {
            id: id.to_string(),
            name: id.to_string(),
            mime_type: DriveFile::DOCUMENT_MIME.to_string(),
            modified_time,
            trashed: false,
            owner: None,
            raw: serde_json::Value::Null,
        };
        let doc = Document {
            id: "d1".to_string(),
            title: "d1".to_string(),
            modified_time: Some(at),
            text: "body".to_string(),
            raw: serde_json::Value::Null,
        };
        store
            .upsert_batch("a@example.com", RecordBatch::Files(&[file("d2", at), file("d1", at)]))
            .unwrap();
        store
            .upsert_batch("a@example.com", RecordBatch::Documents(std::slice::from_ref(&doc)))
            .unwrap();
        let since = at - chrono::Duration::days(1);
        assert_eq!(store.pending_documents("a@example.com", since).unwrap(), ["d2"]);

        let edited = at + chrono::Duration::minutes(1);
        store
            .upsert_batch("a@example.com", RecordBatch::Files(&[file("d1", edited)]))
            .unwrap();
        assert_eq!(
            store.pending_documents("a@example.com", since).unwrap(),
            ["d1", "d2"]
        );
    }

    #[test]
    fn test_lease_release_by_non_holder_is_ignored() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(5);
        assert!(store.try_acquire_lease("a", "w1", later, now).unwrap());
        store.release_lease("a", "w2").unwrap();
        assert!(!store.try_acquire_lease("a", "w2", later, now).unwrap());
    }
}
