//! Ingest crate - incremental mirroring of collaboration APIs
//!
//! This crate provides the sync engine that mirrors mail, calendar, chat,
//! files and exported documents for many subjects into a local store:
//! - Domain models (records, cursors, blocklist entries)
//! - Storage traits with SQLite and in-memory backends
//! - Remote API traits and Google HTTP clients
//! - One collector per service plus the dependent document collector
//! - The sweep orchestrator and its run report
//!
//! Collectors persist every page as it arrives and write a unit's cursor
//! only after its pagination is exhausted, so an interrupted sweep can
//! always be resumed.

pub mod config;
pub mod error;
pub mod google;
pub mod models;
pub mod registry;
pub mod remote;
pub mod storage;
pub mod sync;

#[doc(hidden)]
pub mod testing;

pub use crate::config::SweepConfig;
pub use error::{ApiError, ErrorClass, SyncError};
pub use models::{
    BlockClass, BlocklistEntry, CalendarEvent, ChatMessage, Cursor, CursorKey, Document, DriveFile,
    MailMessage, RecordBatch, Service, SyncMode, Table, Watermark,
};
pub use registry::{Blocklist, Eligibility, SubjectRegistry};
pub use remote::{CalendarApi, ChatApi, DriveApi, EventPage, EventQuery, HistoryPage, MailApi, Page, Remotes};
pub use storage::{
    BlocklistStore, CursorStore, InMemoryStore, LeaseStore, RecordStore, RecordTimes, SqliteStore,
    SyncStore,
};
pub use sync::{
    // Orchestration
    RunReport, Sweep, SweepOptions,
    // Collectors
    CancelFlag, DiscoveredDocuments, FilesRun, SyncContext, sync_calendar, sync_chat,
    sync_documents, sync_files, sync_mail,
    // Results
    Disposition, Halt, Invariants, ServiceReport, ServiceRun, ServiceStatus, ServiceTotals,
    SubjectReport, UnitEnd, UnitOutcome,
};
