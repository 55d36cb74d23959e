//! SQLite-backed sync store

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{BlocklistStore, CursorStore, LeaseStore, RecordStore, RecordTimes};
use crate::models::{
    BlockClass, BlocklistEntry, CalendarEvent, ChatMessage, Cursor, CursorKey, Document,
    DriveFile, MailMessage, RecordBatch, Service, Table, format_time, parse_time,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: cursors, blocklist and record tables
        M::up(
            r#"
            CREATE TABLE cursors (
                service TEXT NOT NULL,
                subject TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (service, subject, key)
            );

            CREATE TABLE blocklist (
                subject TEXT PRIMARY KEY,
                class TEXT NOT NULL,
                reason TEXT NOT NULL,
                retry_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE mail_messages (
                subject TEXT NOT NULL,
                message_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                history_id TEXT,
                internal_date TEXT NOT NULL,
                sender TEXT,
                title TEXT,
                snippet TEXT NOT NULL,
                label_ids TEXT NOT NULL DEFAULT '[]',
                raw TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (subject, message_id)
            );

            CREATE INDEX idx_mail_messages_subject_date
                ON mail_messages(subject, internal_date);

            CREATE TABLE calendar_events (
                subject TEXT NOT NULL,
                calendar_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                status TEXT,
                summary TEXT,
                start_time TEXT,
                end_time TEXT,
                updated_time TEXT,
                raw TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (subject, calendar_id, event_id)
            );

            CREATE INDEX idx_calendar_events_subject_start
                ON calendar_events(subject, start_time);

            CREATE TABLE chat_messages (
                subject TEXT NOT NULL,
                space_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                thread_name TEXT,
                sender TEXT,
                text TEXT,
                create_time TEXT NOT NULL,
                last_update_time TEXT,
                raw TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (subject, space_id, message_id)
            );

            CREATE INDEX idx_chat_messages_subject_create
                ON chat_messages(subject, create_time);

            CREATE TABLE drive_files (
                subject TEXT NOT NULL,
                file_id TEXT NOT NULL,
                name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                modified_time TEXT NOT NULL,
                trashed INTEGER NOT NULL DEFAULT 0,
                owner TEXT,
                raw TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (subject, file_id)
            );

            CREATE INDEX idx_drive_files_subject_modified
                ON drive_files(subject, modified_time);

            CREATE TABLE documents (
                subject TEXT NOT NULL,
                document_id TEXT NOT NULL,
                title TEXT NOT NULL,
                modified_time TEXT,
                content BLOB NOT NULL,  -- zstd compressed
                content_chars INTEGER NOT NULL DEFAULT 0,
                raw TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (subject, document_id)
            );

            CREATE INDEX idx_documents_subject_modified
                ON documents(subject, modified_time);
            "#,
        ),
        // Migration 2: per-subject leases for concurrent sweeps
        M::up(
            r#"
            CREATE TABLE subject_leases (
                subject TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            "#,
        ),
    ])
}

/// SQLite-backed implementation of every storage trait
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL keeps readers unblocked while a sweep writes pages
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection mutex poisoned"))
    }
}

fn upsert_mail(tx: &Transaction<'_>, subject: &str, items: &[MailMessage], now: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO mail_messages
         (subject, message_id, thread_id, history_id, internal_date, sender, title,
          snippet, label_ids, raw, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
         ON CONFLICT(subject, message_id) DO UPDATE SET
            thread_id = excluded.thread_id,
            history_id = excluded.history_id,
            internal_date = excluded.internal_date,
            sender = excluded.sender,
            title = excluded.title,
            snippet = excluded.snippet,
            label_ids = excluded.label_ids,
            raw = excluded.raw,
            updated_at = excluded.updated_at",
    )?;

    for msg in items {
        stmt.execute(params![
            subject,
            msg.id,
            msg.thread_id,
            msg.history_id,
            format_time(msg.internal_date),
            msg.from,
            msg.title,
            msg.snippet,
            serde_json::to_string(&msg.label_ids)?,
            msg.raw.to_string(),
            now,
        ])?;
    }
    Ok(())
}

fn upsert_events(
    tx: &Transaction<'_>,
    subject: &str,
    items: &[CalendarEvent],
    now: &str,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO calendar_events
         (subject, calendar_id, event_id, status, summary, start_time, end_time,
          updated_time, raw, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(subject, calendar_id, event_id) DO UPDATE SET
            status = excluded.status,
            summary = excluded.summary,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            updated_time = excluded.updated_time,
            raw = excluded.raw,
            updated_at = excluded.updated_at",
    )?;

    for event in items {
        stmt.execute(params![
            subject,
            event.calendar_id,
            event.id,
            event.status,
            event.summary,
            event.start.map(format_time),
            event.end.map(format_time),
            event.updated.map(format_time),
            event.raw.to_string(),
            now,
        ])?;
    }
    Ok(())
}

fn upsert_chat(tx: &Transaction<'_>, subject: &str, items: &[ChatMessage], now: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO chat_messages
         (subject, space_id, message_id, thread_name, sender, text, create_time,
          last_update_time, raw, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(subject, space_id, message_id) DO UPDATE SET
            thread_name = excluded.thread_name,
            sender = excluded.sender,
            text = excluded.text,
            create_time = excluded.create_time,
            last_update_time = excluded.last_update_time,
            raw = excluded.raw,
            updated_at = excluded.updated_at",
    )?;

    for msg in items {
        stmt.execute(params![
            subject,
            msg.space_id,
            msg.id,
            msg.thread,
            msg.sender,
            msg.text,
            format_time(msg.create_time),
            msg.last_update_time.map(format_time),
            msg.raw.to_string(),
            now,
        ])?;
    }
    Ok(())
}

fn upsert_files(tx: &Transaction<'_>, subject: &str, items: &[DriveFile], now: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO drive_files
         (subject, file_id, name, mime_type, modified_time, trashed, owner, raw,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(subject, file_id) DO UPDATE SET
            name = excluded.name,
            mime_type = excluded.mime_type,
            modified_time = excluded.modified_time,
            trashed = excluded.trashed,
            owner = excluded.owner,
            raw = excluded.raw,
            updated_at = excluded.updated_at",
    )?;

    for file in items {
        stmt.execute(params![
            subject,
            file.id,
            file.name,
            file.mime_type,
            format_time(file.modified_time),
            file.trashed,
            file.owner,
            file.raw.to_string(),
            now,
        ])?;
    }
    Ok(())
}

fn upsert_documents(
    tx: &Transaction<'_>,
    subject: &str,
    items: &[Document],
    now: &str,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO documents
         (subject, document_id, title, modified_time, content, content_chars, raw,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(subject, document_id) DO UPDATE SET
            title = excluded.title,
            modified_time = excluded.modified_time,
            content = excluded.content,
            content_chars = excluded.content_chars,
            raw = excluded.raw,
            updated_at = excluded.updated_at",
    )?;

    for doc in items {
        // Level 3 trades a little ratio for fast exports
        let compressed = zstd::encode_all(doc.text.as_bytes(), 3)
            .context("Failed to compress document text")?;
        stmt.execute(params![
            subject,
            doc.id,
            doc.title,
            doc.modified_time.map(format_time),
            compressed,
            doc.text.chars().count() as i64,
            doc.raw.to_string(),
            now,
        ])?;
    }
    Ok(())
}

/// Column holding the resource id of each table
fn id_column(table: Table) -> &'static str {
    match table {
        Table::MailMessages => "message_id",
        Table::CalendarEvents => "event_id",
        Table::ChatMessages => "message_id",
        Table::DriveFiles => "file_id",
        Table::Documents => "document_id",
    }
}

fn parse_stored_time(value: &str) -> Result<DateTime<Utc>> {
    parse_time(value).with_context(|| format!("Invalid stored timestamp: {value}"))
}

impl CursorStore for SqliteStore {
    fn get_cursor(&self, key: &CursorKey) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM cursors WHERE service = ? AND subject = ? AND key = ?",
                params![key.service.as_str(), key.subject, key.key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_cursor(&self, key: &CursorKey, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cursors (service, subject, key, value, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(service, subject, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![
                key.service.as_str(),
                key.subject,
                key.key,
                value,
                format_time(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn clear_cursor(&self, key: &CursorKey) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM cursors WHERE service = ? AND subject = ? AND key = ?",
            params![key.service.as_str(), key.subject, key.key],
        )?;
        Ok(())
    }

    fn list_cursors(&self, service: Service, subject: &str) -> Result<Vec<Cursor>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, value, updated_at FROM cursors
             WHERE service = ? AND subject = ?
             ORDER BY key",
        )?;

        let rows = stmt
            .query_map(params![service.as_str(), subject], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, value, updated_at)| -> Result<Cursor> {
                Ok(Cursor {
                    key: CursorKey::new(service, subject, key),
                    value,
                    updated_at: parse_stored_time(&updated_at)?,
                })
            })
            .collect()
    }
}

impl RecordStore for SqliteStore {
    fn upsert_batch(&self, subject: &str, batch: RecordBatch<'_>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = format_time(Utc::now());
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        match batch {
            RecordBatch::Mail(items) => upsert_mail(&tx, subject, items, &now)?,
            RecordBatch::Events(items) => upsert_events(&tx, subject, items, &now)?,
            RecordBatch::Chat(items) => upsert_chat(&tx, subject, items, &now)?,
            RecordBatch::Files(items) => upsert_files(&tx, subject, items, &now)?,
            RecordBatch::Documents(items) => upsert_documents(&tx, subject, items, &now)?,
        }

        tx.commit()
            .with_context(|| format!("Failed to commit {} batch", batch.table().as_str()))?;
        Ok(batch.len())
    }

    fn count(&self, table: Table, subject: &str) -> Result<usize> {
        let conn = self.conn()?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE subject = ?", table.as_str());
        let count: i64 = conn.query_row(&sql, [subject], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn record_times(&self, table: Table, subject: &str, id: &str) -> Result<Option<RecordTimes>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT created_at, updated_at FROM {} WHERE subject = ? AND {} = ? LIMIT 1",
            table.as_str(),
            id_column(table)
        );
        let row: Option<(String, String)> = conn
            .query_row(&sql, params![subject, id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        row.map(|(created_at, updated_at)| -> Result<RecordTimes> {
            Ok(RecordTimes {
                created_at: parse_stored_time(&created_at)?,
                updated_at: parse_stored_time(&updated_at)?,
            })
        })
        .transpose()
    }

    fn get_document_text(&self, subject: &str, id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let content: Option<Vec<u8>> = conn
            .query_row(
                "SELECT content FROM documents WHERE subject = ? AND document_id = ?",
                params![subject, id],
                |row| row.get(0),
            )
            .optional()?;

        content
            .map(|bytes| -> Result<String> {
                let raw = zstd::decode_all(bytes.as_slice())
                    .context("Failed to decompress document text")?;
                String::from_utf8(raw).context("Document text is not UTF-8")
            })
            .transpose()
    }

    fn pending_documents(&self, subject: &str, since: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn()?;
        // Both time columns hold format_time output, so text order is time order
        let mut stmt = conn.prepare(
            "SELECT f.file_id FROM drive_files f
             LEFT JOIN documents d
                ON d.subject = f.subject AND d.document_id = f.file_id
             WHERE f.subject = ?1
               AND f.mime_type = ?2
               AND f.trashed = 0
               AND f.modified_time >= ?3
               AND (d.document_id IS NULL
                    OR d.modified_time IS NULL
                    OR d.modified_time < f.modified_time)
             ORDER BY f.file_id",
        )?;
        let ids = stmt
            .query_map(
                params![subject, DriveFile::DOCUMENT_MIME, format_time(since)],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl BlocklistStore for SqliteStore {
    fn get_block(&self, subject: &str) -> Result<Option<BlocklistEntry>> {
        let conn = self.conn()?;
        let row: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT class, reason, retry_at FROM blocklist WHERE subject = ?",
                [subject],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(class, reason, retry_at)| block_from_row(subject.to_string(), class, reason, retry_at))
            .transpose()
    }

    fn list_blocks(&self) -> Result<Vec<BlocklistEntry>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT subject, class, reason, retry_at FROM blocklist ORDER BY subject")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(subject, class, reason, retry_at)| block_from_row(subject, class, reason, retry_at))
            .collect()
    }

    fn put_block(&self, entry: &BlocklistEntry) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO blocklist (subject, class, reason, retry_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(subject) DO UPDATE SET
                class = excluded.class,
                reason = excluded.reason,
                retry_at = excluded.retry_at,
                updated_at = excluded.updated_at",
            params![
                entry.subject,
                entry.class.as_str(),
                entry.reason,
                entry.retry_at.map(format_time),
                format_time(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn remove_block(&self, subject: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM blocklist WHERE subject = ?", [subject])?;
        Ok(())
    }
}

fn block_from_row(
    subject: String,
    class: String,
    reason: String,
    retry_at: Option<String>,
) -> Result<BlocklistEntry> {
    let class = BlockClass::parse(&class)
        .with_context(|| format!("Unknown blocklist class for {subject}: {class}"))?;
    let retry_at = retry_at.as_deref().map(parse_stored_time).transpose()?;
    Ok(BlocklistEntry {
        subject,
        class,
        reason,
        retry_at,
    })
}

impl LeaseStore for SqliteStore {
    fn try_acquire_lease(
        &self,
        subject: &str,
        holder: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        // The WHERE clause on the update arm keeps a live foreign lease intact
        let changed = conn.execute(
            "INSERT INTO subject_leases (subject, holder, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(subject) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
             WHERE subject_leases.holder = excluded.holder
                OR subject_leases.expires_at <= ?4",
            params![subject, holder, format_time(expires_at), format_time(now)],
        )?;
        Ok(changed > 0)
    }

    fn release_lease(&self, subject: &str, holder: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM subject_leases WHERE subject = ? AND holder = ?",
            params![subject, holder],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        // Use .test.sqlite extension to clearly distinguish from production databases
        let db_path = dir.path().join("ingest.test.sqlite");
        let store = SqliteStore::new(&db_path).unwrap();
        (store, dir)
    }

    fn make_file(id: &str, minutes: i64) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: format!("File {id}"),
            mime_type: DriveFile::DOCUMENT_MIME.to_string(),
            modified_time: Utc::now() - Duration::minutes(minutes),
            trashed: false,
            owner: Some("owner@example.com".to_string()),
            raw: serde_json::json!({ "id": id }),
        }
    }

    #[test]
    fn test_cursor_crud() {
        let (store, _dir) = create_test_store();
        let key = CursorKey::mail_history("a@example.com");

        assert_eq!(store.get_cursor(&key).unwrap(), None);
        store.set_cursor(&key, "100").unwrap();
        store.set_cursor(&key, "200").unwrap();
        assert_eq!(store.get_cursor(&key).unwrap().as_deref(), Some("200"));

        let listed = store.list_cursors(Service::Mail, "a@example.com").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value, "200");

        store.clear_cursor(&key).unwrap();
        assert_eq!(store.get_cursor(&key).unwrap(), None);
    }

    #[test]
    fn test_cursors_are_scoped_per_subject() {
        let (store, _dir) = create_test_store();
        store
            .set_cursor(&CursorKey::files_modified("a@example.com"), "x")
            .unwrap();
        assert_eq!(
            store
                .get_cursor(&CursorKey::files_modified("b@example.com"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (store, _dir) = create_test_store();
        let files = vec![make_file("f1", 10), make_file("f2", 5)];

        store.upsert_batch("a@example.com", RecordBatch::Files(&files)).unwrap();
        let first = store
            .record_times(Table::DriveFiles, "a@example.com", "f1")
            .unwrap()
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.upsert_batch("a@example.com", RecordBatch::Files(&files)).unwrap();
        let second = store
            .record_times(Table::DriveFiles, "a@example.com", "f1")
            .unwrap()
            .unwrap();

        assert_eq!(store.count(Table::DriveFiles, "a@example.com").unwrap(), 2);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[test]
    fn test_same_resource_id_under_two_subjects() {
        let (store, _dir) = create_test_store();
        let files = vec![make_file("shared", 1)];
        store.upsert_batch("a@example.com", RecordBatch::Files(&files)).unwrap();
        store.upsert_batch("b@example.com", RecordBatch::Files(&files)).unwrap();
        assert_eq!(store.count(Table::DriveFiles, "a@example.com").unwrap(), 1);
        assert_eq!(store.count(Table::DriveFiles, "b@example.com").unwrap(), 1);
    }

    #[test]
    fn test_events_keyed_under_calendar() {
        let (store, _dir) = create_test_store();
        let event = |calendar: &str| CalendarEvent {
            calendar_id: calendar.to_string(),
            id: "e1".to_string(),
            status: Some("confirmed".to_string()),
            summary: Some("Standup".to_string()),
            start: Some(Utc::now()),
            end: None,
            updated: None,
            raw: serde_json::Value::Null,
        };
        let events = vec![event("primary"), event("team")];
        store.upsert_batch("a@example.com", RecordBatch::Events(&events)).unwrap();
        store.upsert_batch("a@example.com", RecordBatch::Events(&events)).unwrap();
        assert_eq!(store.count(Table::CalendarEvents, "a@example.com").unwrap(), 2);
    }

    #[test]
    fn test_document_text_roundtrips_through_compression() {
        let (store, _dir) = create_test_store();
        let doc = Document {
            id: "d1".to_string(),
            title: "Notes".to_string(),
            modified_time: Some(Utc::now()),
            text: "Quarterly plan\n".repeat(50),
            raw: serde_json::Value::Null,
        };
        store
            .upsert_batch("a@example.com", RecordBatch::Documents(std::slice::from_ref(&doc)))
            .unwrap();

        let text = store.get_document_text("a@example.com", "d1").unwrap();
        assert_eq!(text, Some(doc.text));
    }

    #[test]
    fn test_pending_documents_skip_current_exports() {
        let (store, _dir) = create_test_store();
        let mut trashed = make_file("d-trashed", 10);
        trashed.trashed = true;
        let mut sheet = make_file("s1", 10);
        sheet.mime_type = "application/vnd.google-apps.spreadsheet".to_string();
        let files = vec![
            make_file("d3", 10),
            make_file("d1", 20),
            make_file("d2", 30),
            make_file("d-old", 60 * 24 * 40),
            trashed,
            sheet,
        ];
        store.upsert_batch("a@example.com", RecordBatch::Files(&files)).unwrap();

        let export = |file: &DriveFile, modified_time| Document {
            id: file.id.clone(),
            title: file.name.clone(),
            modified_time,
            text: String::new(),
            raw: serde_json::Value::Null,
        };
        // d1 is current, d2 was exported before its last change
        let docs = vec![
            export(&files[1], Some(files[1].modified_time)),
            export(&files[2], Some(files[2].modified_time - Duration::minutes(5))),
        ];
        store.upsert_batch("a@example.com", RecordBatch::Documents(&docs)).unwrap();

        let since = Utc::now() - Duration::days(30);
        assert_eq!(
            store.pending_documents("a@example.com", since).unwrap(),
            vec!["d2".to_string(), "d3".to_string()]
        );
        assert!(store.pending_documents("b@example.com", since).unwrap().is_empty());
    }

    #[test]
    fn test_record_tables_carry_subject_time_index() {
        let (store, _dir) = create_test_store();
        let conn = store.conn().unwrap();
        for table in Table::ALL {
            let mut stmt = conn
                .prepare(&format!("PRAGMA index_list({})", table.as_str()))
                .unwrap();
            let names: Vec<String> = stmt
                .query_map([], |row| row.get(1))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            assert!(
                names.iter().any(|n| n.starts_with(&format!("idx_{}_subject", table.as_str()))),
                "{} is missing its (subject, time) index",
                table.as_str()
            );
        }
    }

    #[test]
    fn test_blocklist_roundtrip() {
        let (store, _dir) = create_test_store();
        let retry = Utc::now() + Duration::hours(1);
        store
            .put_block(&BlocklistEntry::transient("a@example.com", "rate limited", retry))
            .unwrap();
        store
            .put_block(&BlocklistEntry::permanent("b@example.com", "user deleted"))
            .unwrap();

        let blocks = store.list_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].class, BlockClass::Transient);
        assert_eq!(blocks[1].retry_at, None);

        store.remove_block("a@example.com").unwrap();
        assert!(store.get_block("a@example.com").unwrap().is_none());
    }

    #[test]
    fn test_lease_excludes_other_holders() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();
        let later = now + Duration::minutes(30);

        assert!(store.try_acquire_lease("a@example.com", "w1", later, now).unwrap());
        assert!(!store.try_acquire_lease("a@example.com", "w2", later, now).unwrap());
        assert!(store.try_acquire_lease("a@example.com", "w1", later, now).unwrap());

        // An expired lease can be taken over
        let after_expiry = later + Duration::seconds(1);
        assert!(
            store
                .try_acquire_lease("a@example.com", "w2", after_expiry + Duration::minutes(30), after_expiry)
                .unwrap()
        );

        store.release_lease("a@example.com", "w2").unwrap();
        assert!(store.try_acquire_lease("a@example.com", "w3", later, now).unwrap());
    }
}
