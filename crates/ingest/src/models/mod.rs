//! Domain models for mirrored collaboration data

mod blocklist;
mod cursor;
mod record;
mod service;

pub use blocklist::{BlockClass, BlocklistEntry};
pub use cursor::{Cursor, CursorKey, Watermark};
pub use cursor::{format_time, parse_time};
pub use record::{CalendarEvent, ChatMessage, Document, DriveFile, MailMessage, RecordBatch, Table};
pub use service::{Service, SyncMode};
