//! # Ledger Feed
//!
//! Live ledger tips merged with paginated history into one ordered,
//! deduplicated, bounded sequence.

pub mod entry;
pub mod reconciled;
pub mod reconciler;

pub use entry::{EntryKind, EntryTime, FeedEntry};
pub use reconciled::{LiveInsert, ReconciledFeed, DEFAULT_WINDOW};
pub use reconciler::{FeedPage, FeedReconciler, FeedSource, PageRequest};
