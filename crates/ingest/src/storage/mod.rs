//! Storage traits and implementations
//!
//! The cursor store, the persistence layer, the blocklist and subject leases
//! are separate traits so collectors only see what they need. Both backends
//! implement all of them; [`SyncStore`] bundles them for the orchestrator.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{BlocklistStore, CursorStore, LeaseStore, RecordStore, RecordTimes, SyncStore};
