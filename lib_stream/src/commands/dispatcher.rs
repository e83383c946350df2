//! # Command Dispatcher
//!
//! Fire-and-forget control requests: exactly one `POST control/{action}` per
//! call, no retry and no queueing. Any HTTP response counts as accepted and
//! its status is reported as-is. Only a request that never got a response is
//! a failure. Commands never touch the live snapshot state; their effects come
//! back through the stream like everything else.

use serde_json::Value;
use url::Url;

use crate::configs::StreamConfig;
use crate::error::FetchError;
use crate::retrieve::ApiClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The backend answered, with any status.
    Accepted { status: u16 },
    /// No response: refused connection, timeout or an unusable action name.
    Failed { reason: String },
}

impl CommandOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    client: ApiClient,
    control_path: String,
}

impl CommandDispatcher {
    pub fn new(client: ApiClient, config: &StreamConfig) -> Self {
        Self {
            client,
            control_path: config.control_path.clone(),
        }
    }

    /// `{base}/{control_path}/{action}`, with `action` encoded as one path segment.
    pub fn control_url(&self, action: &str) -> Result<Url, FetchError> {
        if action.trim().is_empty() {
            return Err(FetchError::InvalidEndpoint("empty control action".to_string()));
        }
        let mut url = self.client.endpoint(&self.control_path)?;
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidEndpoint("base URL cannot take path segments".to_string()))?
            .pop_if_empty()
            .push(action);
        Ok(url)
    }

    /// Sends one control command.
    pub async fn send(&self, action: &str, payload: Option<&Value>) -> CommandOutcome {
        let url = match self.control_url(action) {
            Ok(url) => url,
            Err(e) => return CommandOutcome::Failed { reason: e.to_string() },
        };

        match self.client.post_status(url, payload).await {
            Ok(status) => {
                tracing::info!(action, status, "Control command accepted");
                CommandOutcome::Accepted { status }
            }
            Err(e) => {
                tracing::warn!(action, error = %e, "Control command failed");
                CommandOutcome::Failed { reason: e.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dispatcher(base: &str) -> CommandDispatcher {
        let config = StreamConfig::with_base_url(Url::parse(base).unwrap());
        let client = ApiClient::new(config.base_url.clone(), Duration::from_secs(2)).unwrap();
        CommandDispatcher::new(client, &config)
    }

    #[test]
    fn test_control_url() {
        let d = dispatcher("http://localhost:5000/");
        assert_eq!(d.control_url("start").unwrap().as_str(), "http://localhost:5000/control/start");
        assert_eq!(
            d.control_url("pause round").unwrap().as_str(),
            "http://localhost:5000/control/pause%20round"
        );
        assert_eq!(
            d.control_url("../admin").unwrap().as_str(),
            "http://localhost:5000/control/..%2Fadmin"
        );
        assert!(d.control_url("").is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_is_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let d = dispatcher(&format!("http://127.0.0.1:{}/", port));
        let outcome = d.send("stop", None).await;
        assert!(matches!(outcome, CommandOutcome::Failed { .. }), "got {:?}", outcome);
    }
}
