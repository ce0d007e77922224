// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod diff;
pub mod error;
pub mod listing;
pub mod notify;
pub mod orchestrator;
pub mod snapshot;
pub mod sources;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::diff::{diff_listings, DiffOutcome};
pub use crate::error::WatchError;
pub use crate::listing::{FlatCodec, ListingCodec, ListingRecord};
pub use crate::notify::{Dispatcher, Recipient, SendStatus, Transport};
pub use crate::orchestrator::{Orchestrator, RunReport, SourceOutcome, SourceReport};
pub use crate::snapshot::{LastSeen, RetentionPolicy, Snapshot, SnapshotStore};
pub use crate::sources::Source;
