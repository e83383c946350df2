//! # Configuration Modules
//!
//! Base URL resolution (once per process) and the tunables shared by the
//! connection manager, the feed reconciler and the HTTP side channels.

/// Provides the engine configuration and the process-wide base URL.
pub mod config_stream;

pub use config_stream::{base_url, resolve_base_url, StreamConfig, API_URL_ENV, FALLBACK_BASE_URL};
