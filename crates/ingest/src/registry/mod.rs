//! Which subjects a sweep visits
//!
//! [`SubjectRegistry`] enumerates subjects in a fixed order; [`Blocklist`]
//! decides which of them are currently excluded.

mod blocklist;
mod subjects;

pub use blocklist::{Blocklist, Eligibility};
pub use subjects::{SubjectRegistry, parse_subjects};
