//! # Stream Transport
//!
//! The seam between the connection manager and the wire. A [`Transport`]
//! turns an endpoint into a stream of [`TransportSignal`]s; the manager owns
//! every policy decision (reconnect delay, instance tracking, state) and the
//! transport owns none.
//!
//! [`SseTransport`] is the production implementation over a server-sent
//! events endpoint. The underlying library's own reconnect is disabled so that
//! a failed connection surfaces as exactly one error and then ends.

use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest_eventsource::{retry::Never, Event, EventSource};
use url::Url;

use crate::error::TransportError;

/// What a live transport reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The transport is open (SSE `open`).
    Connected,
    /// One raw message body.
    Message(String),
}

/// One transport instance. The stream ends after its first error.
pub type SignalStream = BoxStream<'static, Result<TransportSignal, TransportError>>;

/// Opens transport instances for the connection manager.
pub trait Transport: Send + Sync + 'static {
    /// Starts a new connection attempt to `endpoint`.
    fn connect(&self, endpoint: &Url) -> SignalStream;
}

/// Server-sent events transport backed by `reqwest-eventsource`.
#[derive(Debug, Clone, Default)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a caller-built client (proxies, TLS roots, default headers).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for SseTransport {
    fn connect(&self, endpoint: &Url) -> SignalStream {
        let mut source = match EventSource::new(self.client.get(endpoint.clone())) {
            Ok(source) => source,
            Err(e) => {
                let err = TransportError::Connect(e.to_string());
                return stream::once(async move { Err(err) }).boxed();
            }
        };
        source.set_retry_policy(Box::new(Never));

        // Stop at the first error: the manager schedules its own reconnect.
        source
            .map(|item| match item {
                Ok(Event::Open) => Ok(TransportSignal::Connected),
                Ok(Event::Message(message)) => Ok(TransportSignal::Message(message.data)),
                Err(e) => Err(map_sse_error(e)),
            })
            .scan(false, |failed, item| {
                if *failed {
                    return futures_util::future::ready(None);
                }
                *failed = item.is_err();
                futures_util::future::ready(Some(item))
            })
            .boxed()
    }
}

fn map_sse_error(err: reqwest_eventsource::Error) -> TransportError {
    use reqwest_eventsource::Error;

    match err {
        Error::StreamEnded => TransportError::Closed,
        Error::InvalidStatusCode(status, _) => TransportError::InvalidResponse(format!("HTTP {}", status)),
        Error::InvalidContentType(content_type, _) => TransportError::InvalidResponse(format!(
            "unexpected content type {:?}",
            content_type
        )),
        Error::Transport(e) if e.is_connect() || e.is_timeout() => TransportError::Connect(e.to_string()),
        other => TransportError::Read(other.to_string()),
    }
}
