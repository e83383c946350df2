//! # Commands
//!
//! The egress path. Nothing here flows through the subscription router.

/// Control commands.
pub mod dispatcher;
/// Document uploads.
pub mod upload;

pub use dispatcher::{CommandDispatcher, CommandOutcome};
pub use upload::{DocumentUploader, UploadReceipt, UploadStatus};
