//! # Loggers
//!
//! `tracing` subscriber setup for binaries that embed the stream core.

pub mod tracing_setup;

pub use tracing_setup::{cleanup_old_logs, init_tracing, LoggerError};
