//! # Stream Connection Manager
//!
//! Owns the single long-lived transport connection behind a
//! [`ConnectionHandle`] and drives it through its lifecycle:
//!
//! ```text
//! idle -> connecting -> open -> errored -> reconnecting -> connecting -> ...
//!   ^__________________________ close() from any state ___________________|
//! ```
//!
//! ## Core Design Principles:
//!
//! 1.  **One Event Loop per Handle**: Transport events, the reconnect timer and
//!     close commands are all processed by one task through `tokio::select!`.
//!     Snapshots are published from inside that loop, so subscribers see the
//!     messages of one connection in receipt order and never concurrently.
//!
//! 2.  **Instance Tagging**: Every transport attempt gets a fresh, increasing
//!     instance id and its reader task tags each event with it. Events from a
//!     superseded instance are dropped, so a late error or message from an old
//!     connection can never touch the current state.
//!
//! 3.  **Fixed Reconnect**: After any transport failure the manager waits a
//!     fixed delay and starts a new instance. No backoff, no jitter, no cap.
//!
//! 4.  **Errors Stay Local**: Malformed messages are logged and dropped without
//!     affecting the connection. Subscribers only ever receive decoded sections.
//!
//! 5.  **One Publisher**: Snapshots obtained out of band (the REST fallback
//!     poller) are handed to the loop through a [`FallbackPublisher`] and
//!     published there. The loop drops them once the stream has delivered a
//!     message, so a slow poll can never overwrite fresher stream data.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use url::Url;

use crate::configs::StreamConfig;
use crate::core::decoder::decode;
use crate::core::router::SubscriptionRouter;
use crate::core::snapshot::Snapshot;
use crate::core::transport::{Transport, TransportSignal};
use crate::error::TransportError;

/// Lifecycle state of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Errored,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Errored => "errored",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Called with `(from, to)` on every state transition.
pub type LifecycleCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

type TaggedEvent = (u64, Result<TransportSignal, TransportError>);

enum Command {
    Close,
}

/// Opens managed connections that publish into a shared router.
pub struct ConnectionManager {
    reconnect_delay: Duration,
    router: Arc<SubscriptionRouter>,
    transport: Arc<dyn Transport>,
    lifecycle: Option<LifecycleCallback>,
}

impl ConnectionManager {
    pub fn new(config: StreamConfig, router: Arc<SubscriptionRouter>, transport: Arc<dyn Transport>) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            router,
            transport,
            lifecycle: None,
        }
    }

    /// Installs a transition observer. A panicking observer is logged and ignored.
    pub fn with_lifecycle_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.lifecycle = Some(Arc::new(callback));
        self
    }

    /// Starts connecting to `endpoint` and returns the handle owning the connection.
    ///
    /// Must be called from within a tokio runtime. The returned handle is already
    /// in [`ConnectionState::Connecting`].
    pub fn open(&self, endpoint: Url) -> ConnectionHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (messages_tx, messages_rx) = watch::channel(0u64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (fallback_tx, fallback_rx) = mpsc::unbounded_channel();

        let mut event_loop = EventLoop {
            endpoint,
            reconnect_delay: self.reconnect_delay,
            router: Arc::clone(&self.router),
            transport: Arc::clone(&self.transport),
            lifecycle: self.lifecycle.clone(),
            state_tx,
            messages_tx,
            events_tx: events_tx.clone(),
            instance: 0,
            reader: None,
            reconnect_at: None,
        };
        event_loop.start_instance();

        let task = tokio::spawn(event_loop.run(command_rx, events_rx, fallback_rx));

        ConnectionHandle {
            state_rx,
            messages_rx,
            command_tx,
            fallback_tx,
            task,
            #[cfg(test)]
            events_tx,
        }
    }
}

/// Owner of one managed connection.
///
/// Dropping the handle without calling [`ConnectionHandle::close`] also shuts
/// the connection down, but does not wait for it.
pub struct ConnectionHandle {
    state_rx: watch::Receiver<ConnectionState>,
    messages_rx: watch::Receiver<u64>,
    command_tx: mpsc::UnboundedSender<Command>,
    fallback_tx: mpsc::UnboundedSender<Snapshot>,
    task: JoinHandle<()>,
    #[cfg(test)]
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Receiver counting raw messages received across all instances.
    pub fn watch_messages(&self) -> watch::Receiver<u64> {
        self.messages_rx.clone()
    }

    /// Sender for snapshots fetched outside the stream. They are published by
    /// the connection loop only while no stream message has been received.
    pub fn fallback_publisher(&self) -> FallbackPublisher {
        FallbackPublisher {
            tx: self.fallback_tx.clone(),
            messages: self.messages_rx.clone(),
        }
    }

    /// Closes the connection: aborts the current transport, cancels any pending
    /// reconnect and moves to [`ConnectionState::Idle`]. Terminal.
    pub async fn close(self) {
        let _ = self.command_tx.send(Command::Close);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Connection task ended abnormally");
        }
    }

    #[cfg(test)]
    fn inject(&self, instance: u64, event: Result<TransportSignal, TransportError>) {
        let _ = self.events_tx.send((instance, event));
    }
}

/// Hands out-of-band snapshots to a connection loop.
#[derive(Debug, Clone)]
pub struct FallbackPublisher {
    tx: mpsc::UnboundedSender<Snapshot>,
    messages: watch::Receiver<u64>,
}

impl FallbackPublisher {
    /// Queues `snapshot` for the loop. Returns `false` when the stream is
    /// already live or the connection is closed. A `true` return does not
    /// guarantee delivery: the loop re-checks when it dequeues.
    pub fn offer(&self, snapshot: Snapshot) -> bool {
        if self.stream_started() {
            return false;
        }
        self.tx.send(snapshot).is_ok()
    }

    pub fn stream_started(&self) -> bool {
        *self.messages.borrow() > 0
    }

    /// Receiver counting stream messages, as [`ConnectionHandle::watch_messages`].
    pub fn watch_messages(&self) -> watch::Receiver<u64> {
        self.messages.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct EventLoop {
    endpoint: Url,
    reconnect_delay: Duration,
    router: Arc<SubscriptionRouter>,
    transport: Arc<dyn Transport>,
    lifecycle: Option<LifecycleCallback>,
    state_tx: watch::Sender<ConnectionState>,
    messages_tx: watch::Sender<u64>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    instance: u64,
    reader: Option<JoinHandle<()>>,
    reconnect_at: Option<Instant>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TaggedEvent>,
        mut fallback: mpsc::UnboundedReceiver<Snapshot>,
    ) {
        loop {
            let deadline = self.reconnect_at;

            tokio::select! {
                // A dropped handle counts as close.
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Close) | None => break,
                    }
                }
                Some((instance, event)) = events.recv() => {
                    if instance != self.instance {
                        tracing::debug!(instance, current = self.instance, "Dropping event from superseded transport");
                        continue;
                    }
                    self.handle_event(event);
                }
                Some(snapshot) = fallback.recv() => {
                    self.publish_fallback(&snapshot);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.reconnect_at = None;
                    self.start_instance();
                }
            }
        }

        self.shutdown();
    }

    fn handle_event(&mut self, event: Result<TransportSignal, TransportError>) {
        match event {
            Ok(TransportSignal::Connected) => {
                if self.state() == ConnectionState::Connecting {
                    self.transition(ConnectionState::Open);
                }
            }
            Ok(TransportSignal::Message(raw)) => {
                if self.state() == ConnectionState::Connecting {
                    self.transition(ConnectionState::Open);
                }
                self.messages_tx.send_modify(|count| *count += 1);
                self.dispatch(&raw);
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    error = %e,
                    "Stream transport failed. Reconnecting in {}ms",
                    self.reconnect_delay.as_millis()
                );
                self.stop_reader();
                self.transition(ConnectionState::Errored);
                self.transition(ConnectionState::Reconnecting);
                self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
            }
        }
    }

    fn dispatch(&self, raw: &str) {
        let snapshot = match decode(raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "Dropping undecodable stream message");
                return;
            }
        };

        for rejection in snapshot.rejected() {
            tracing::warn!(section = %rejection.section, reason = %rejection.reason, "Dropping invalid section");
        }

        if snapshot.is_empty() {
            return;
        }

        let report = self.router.publish(&snapshot);
        tracing::trace!(
            sections = snapshot.sections().len(),
            delivered = report.delivered,
            failed = report.failed,
            "Snapshot published"
        );
    }

    fn publish_fallback(&self, snapshot: &Snapshot) {
        let received = *self.messages_tx.borrow();
        if received > 0 {
            tracing::debug!(received, "Discarding fallback snapshot, stream is live");
            return;
        }
        let report = self.router.publish(snapshot);
        tracing::debug!(delivered = report.delivered, failed = report.failed, "Fallback snapshot published");
    }

    /// Starts a new transport instance and forwards its signals, tagged, to the loop.
    fn start_instance(&mut self) {
        self.stop_reader();
        self.instance += 1;
        self.transition(ConnectionState::Connecting);
        tracing::info!(endpoint = %self.endpoint, instance = self.instance, "Connecting to stream");

        let instance = self.instance;
        let events_tx = self.events_tx.clone();
        let mut signals = self.transport.connect(&self.endpoint);

        self.reader = Some(tokio::spawn(async move {
            while let Some(item) = signals.next().await {
                let failed = item.is_err();
                if events_tx.send((instance, item)).is_err() || failed {
                    return;
                }
            }
            // A stream that ends without an error is an abrupt close.
            let _ = events_tx.send((instance, Err(TransportError::Closed)));
        }));
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn shutdown(&mut self) {
        self.stop_reader();
        self.reconnect_at = None;
        self.transition(ConnectionState::Idle);
        tracing::info!(endpoint = %self.endpoint, "Stream connection closed");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state_tx.send_replace(to);
        if from == to {
            return;
        }
        tracing::debug!(%from, %to, "Connection state changed");

        if let Some(callback) = &self.lifecycle {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(from, to))).is_err() {
                tracing::error!(%from, %to, "Lifecycle callback panicked");
            }
        }
    }
}
