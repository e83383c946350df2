//! # Stream Configuration
//!
//! The backend base URL is resolved exactly once, on first access, from the
//! `DASHBOARD_API_URL` environment variable (a `.env` file is honoured) and
//! falls back to the local development backend. It is not re-resolved while
//! running. Everything else lives in [`StreamConfig`], which can be built from
//! defaults or a camelCase JSON file.

use serde::{Deserialize, Serialize};
use static_init::dynamic;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable overriding the backend base URL.
pub const API_URL_ENV: &str = "DASHBOARD_API_URL";

/// Used when no override is present or the override does not parse.
pub const FALLBACK_BASE_URL: &str = "http://localhost:5000/";

/// The process-wide base URL.
#[dynamic]
static BASE_URL: Url = {
    let _ = dotenvy::dotenv();
    resolve_base_url(env::var(API_URL_ENV).ok().as_deref())
};

/// Returns the base URL resolved at first access.
pub fn base_url() -> &'static Url {
    &*BASE_URL
}

/// Resolves a base URL from an optional override.
///
/// A trailing slash is enforced so that relative endpoint paths join under the
/// base instead of replacing its last segment.
pub fn resolve_base_url(override_value: Option<&str>) -> Url {
    let fallback = || Url::parse(FALLBACK_BASE_URL).expect("fallback base URL is valid");

    let Some(raw) = override_value.map(str::trim).filter(|v| !v.is_empty()) else {
        return fallback();
    };

    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };

    match Url::parse(&normalized) {
        Ok(url) if !url.cannot_be_a_base() => url,
        Ok(_) | Err(_) => {
            tracing::warn!(value = raw, "Ignoring unusable {} override, using {}", API_URL_ENV, FALLBACK_BASE_URL);
            fallback()
        }
    }
}

/// Tunables for the stream core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    /// Backend base URL. Defaults to [`base_url`].
    pub base_url: Url,
    /// Server-push stream path, relative to the base.
    pub stream_path: String,
    /// Ledger pagination path.
    pub pagination_path: String,
    /// Document ledger path.
    pub doc_ledger_path: String,
    /// Overview path used by the fallback poller.
    pub overview_path: String,
    /// Prefix of the control endpoint; the action is appended as one segment.
    pub control_path: String,
    /// Multipart upload path.
    pub upload_path: String,
    /// Fixed delay between a transport failure and the next connect attempt.
    pub reconnect_delay_ms: u64,
    /// In-memory cap of the live ledger tail.
    pub feed_window: usize,
    /// Page size for older-entry fetches.
    pub page_size: usize,
    /// Timeout applied to every non-streaming request.
    pub request_timeout_ms: u64,
    /// Interval of the overview fallback poller.
    pub poll_interval_ms: u64,
    /// Time an upload spends in the anchoring state before it is reported as done.
    pub anchoring_delay_ms: u64,
    /// Time a finished upload is displayed before the status returns to idle.
    pub upload_settle_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: base_url().clone(),
            stream_path: "api/stream".to_string(),
            pagination_path: "api/blockchain".to_string(),
            doc_ledger_path: "api/doc-ledger".to_string(),
            overview_path: "api/system-overview".to_string(),
            control_path: "control".to_string(),
            upload_path: "upload_doc".to_string(),
            reconnect_delay_ms: 3_000,
            feed_window: 20,
            page_size: 5,
            request_timeout_ms: 10_000,
            poll_interval_ms: 3_000,
            anchoring_delay_ms: 1_500,
            upload_settle_ms: 4_000,
        }
    }
}

impl StreamConfig {
    /// Defaults pointed at an explicit backend.
    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            base_url,
            ..Default::default()
        }
    }

    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Joins a relative path onto the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| ConfigError::Endpoint {
                path: path.to_string(),
                source,
            })
    }

    pub fn stream_endpoint(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.stream_path)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn anchoring_delay(&self) -> Duration {
        Duration::from_millis(self.anchoring_delay_ms)
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(self.upload_settle_ms)
    }
}
