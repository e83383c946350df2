//! # Retrieval Modules
//!
//! Request/response access to the backend, as opposed to the push stream.

/// Shared HTTP client.
pub mod ky_http;
/// Ledger pagination and the document ledger.
pub mod pagination;

pub use ky_http::{ApiClient, ApiResponse};
pub use pagination::HttpFeedSource;
