//! # Ingestors
//!
//! REST pollers that feed the router when the stream cannot.

pub mod overview_polling;

pub use overview_polling::{parse_overview, OverviewPoller};
