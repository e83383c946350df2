//! # Overview Polling Ingestor
//!
//! A self-scheduling REST poller for the `overview` section, used only while
//! the stream has not delivered anything yet. The stream is authoritative:
//! once the first stream message arrives the poller stops for good. Results
//! are never published from the poller task; they go to the connection loop,
//! which discards any that it dequeues after the stream went live.
//!
//! Polling runs on a fixed interval. A failed poll is logged and the next one
//! runs on the same schedule.

use std::time::Duration;

use serde_json::Value;

use crate::configs::StreamConfig;
use crate::core::connection::FallbackPublisher;
use crate::core::decoder::decode_section;
use crate::core::snapshot::{Overview, Section, SectionName, Snapshot};
use crate::error::FetchError;
use crate::retrieve::ApiClient;

/// Polls the overview endpoint and hands results to a connection loop, which
/// publishes them only while its stream is still silent.
pub struct OverviewPoller {
    client: ApiClient,
    publisher: FallbackPublisher,
    path: String,
    interval: Duration,
}

impl OverviewPoller {
    pub fn new(client: ApiClient, publisher: FallbackPublisher, config: &StreamConfig) -> Self {
        Self {
            client,
            publisher,
            path: config.overview_path.clone(),
            interval: config.poll_interval(),
        }
    }

    /// Fetches the overview once. `None` while the backend is still initializing.
    pub async fn fetch(&self) -> Result<Option<Overview>, FetchError> {
        let body: Value = self.client.get_json(&self.path, &[]).await?;
        parse_overview(body)
    }

    /// Fetches one overview and offers it to the connection loop. Returns
    /// whether it was queued.
    pub async fn poll_once(&self) -> Result<bool, FetchError> {
        Ok(match self.fetch().await? {
            Some(overview) => self.offer(overview),
            None => false,
        })
    }

    /// Polls until the stream reports a first message or the connection is
    /// closed. Returns the number of overviews queued for publishing.
    pub async fn run_until_stream(&self) -> usize {
        let mut stream_messages = self.publisher.watch_messages();
        let mut offered = 0;
        tracing::info!(path = %self.path, interval_ms = self.interval.as_millis() as u64, "Overview fallback polling started");

        loop {
            if *stream_messages.borrow_and_update() > 0 || self.publisher.is_closed() {
                break;
            }

            match self.fetch().await {
                Ok(Some(overview)) => {
                    if self.offer(overview) {
                        offered += 1;
                    }
                }
                Ok(None) => tracing::debug!("Backend still initializing"),
                Err(e) => tracing::warn!(error = %e, "Overview poll failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = stream_messages.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(offered, "Overview fallback polling stopped");
        offered
    }

    fn offer(&self, overview: Overview) -> bool {
        let queued = self
            .publisher
            .offer(Snapshot::from_sections(vec![Section::Overview(overview)]));
        if !queued {
            tracing::debug!("Polled overview dropped, stream is live");
        }
        queued
    }
}

/// Accepts either an overview object or the `{"status": ...}` placeholder the
/// backend answers with before its first aggregation round.
pub fn parse_overview(body: Value) -> Result<Option<Overview>, FetchError> {
    let initializing = body.get("metrics").is_none() && body.get("status").is_some();
    if initializing {
        return Ok(None);
    }
    match decode_section(SectionName::Overview, body).map_err(FetchError::Body)? {
        Section::Overview(overview) => Ok(Some(overview)),
        other => Err(FetchError::Body(format!("unexpected section {}", other.name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_overview() {
        let body = json!({
            "metrics": [{"label": "Models Verified", "value": 4, "color": "text-purple-500"}],
            "services": [{"name": "Blockchain Node", "status": "running", "uptime": 100.0}]
        });
        let overview = parse_overview(body).unwrap().unwrap();
        assert_eq!(overview.models_verified(), Some(4));
        assert_eq!(overview.services[0].name, "Blockchain Node");
    }

    #[test]
    fn test_parse_initializing_placeholder() {
        assert_eq!(parse_overview(json!({"status": "Initializing..."})).unwrap(), None);
    }

    #[test]
    fn test_parse_wrong_shape() {
        assert!(matches!(parse_overview(json!({"metrics": "n/a"})), Err(FetchError::Body(_))));
    }
}
