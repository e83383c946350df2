//! # Core Infrastructure
//!
//! The stream pipeline: transport -> connection manager -> decoder -> router.

/// Connection lifecycle and the per-handle event loop.
pub mod connection;
/// Message body to [`Snapshot`] decoding.
pub mod decoder;
/// Per-section fan-out to subscribers.
pub mod router;
/// Typed sections and the snapshot value.
pub mod snapshot;
/// Transport seam and the SSE implementation.
pub mod transport;

pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState, FallbackPublisher, LifecycleCallback};
pub use decoder::{decode, decode_section};
pub use router::{PublishReport, SectionHandler, SubscriptionId, SubscriptionRouter};
pub use snapshot::{
    LedgerTip, MetricValue, NamedMetric, Overview, OverviewMetric, Section, SectionName, SectionRejection,
    SecurityEvent, SecurityMetric, SecurityStatus, ServiceStatus, Snapshot, TrainingMetrics, WorkerRecord,
    WorkerStatus,
};
pub use transport::{SignalStream, SseTransport, Transport, TransportSignal};
