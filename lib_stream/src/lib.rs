//! # lib_stream
//!
//! The real-time distribution core behind the FL dashboard panels. One shared,
//! long-lived event stream replaces the per-panel pollers: a single connection
//! manager owns the transport, every inbound message is decoded into a typed,
//! partial [`Snapshot`], and the [`SubscriptionRouter`] hands each section only
//! to the consumers that asked for it. The ledger panel gets a dedicated
//! consumer, the [`FeedReconciler`], which merges the live block tail with
//! paginated history.
//!
//! ```ignore
//! use std::sync::Arc;
//! use lib_stream::{ConnectionManager, SectionName, SseTransport, StreamConfig, SubscriptionRouter};
//!
//! let config = StreamConfig::default();
//! let router = Arc::new(SubscriptionRouter::new());
//! router.subscribe(SectionName::Workers, |section| {
//!     println!("workers: {:?}", section);
//!     Ok(())
//! });
//!
//! let manager = ConnectionManager::new(config.clone(), router.clone(), Arc::new(SseTransport::new()));
//! let handle = manager.open(config.stream_endpoint()?);
//! // ...
//! handle.close().await;
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

// Router and connection loop isolate faulty callbacks with `catch_unwind`.
#[cfg(panic = "abort")]
compile_error!("lib_stream must be built with panic = \"unwind\"");

/// Error taxonomy shared by every component.
pub mod error;
/// Base URL resolution and engine tunables.
pub mod configs;
/// Connection manager, decoder, router and the snapshot model.
pub mod core;
/// The ledger feed reconciler.
pub mod feed;
/// HTTP client used by pagination, commands and polling.
pub mod retrieve;
/// Fire-and-forget control commands and document uploads.
pub mod commands;
/// REST pollers used before the stream delivers its first message.
pub mod ingestors;
/// `tracing` subscriber setup for binaries embedding the core.
#[cfg(feature = "loggers")]
pub mod loggers;

// --- Public API Re-exports ---
pub use commands::{CommandDispatcher, CommandOutcome, DocumentUploader, UploadReceipt, UploadStatus};
pub use configs::{base_url, StreamConfig};
pub use crate::core::{
    decode, ConnectionHandle, ConnectionManager, ConnectionState, FallbackPublisher, PublishReport, Section,
    SectionName, Snapshot, SseTransport, SubscriptionId, SubscriptionRouter, Transport,
    TransportSignal,
};
pub use error::{ConfigError, DecodeError, FetchError, HandlerError, TransportError};
pub use feed::{FeedEntry, FeedReconciler, FeedSource, LiveInsert, ReconciledFeed};
pub use ingestors::OverviewPoller;
pub use retrieve::{ApiClient, HttpFeedSource};
