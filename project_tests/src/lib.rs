//! # Mock Dashboard Backend
//!
//! An in-process `axum` server speaking the backend's wire contract, used by
//! the integration suites under `tests/` and by the `test_mock_backend` binary:
//!
//! - `GET  /api/stream`          server-sent events, one JSON snapshot per event
//! - `GET  /api/blockchain`      ledger pages (`limit`, `offset`), newest first
//! - `GET  /api/system-overview` overview, or the initializing placeholder
//! - `POST /control/{action}`    recorded, answered with a configurable status
//! - `POST /upload_doc`          multipart `file`, answered `{success, cid}`
//! - `GET  /api/doc-ledger`      anchored documents, oldest first
//!
//! Tests drive the stream through [`MockBackend::push`] and
//! [`MockBackend::close_streams`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use lib_stream::StreamConfig;

#[derive(Debug, Clone)]
enum StreamFrame {
    Data(String),
    Close,
}

/// One recorded control request.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCall {
    pub action: String,
    pub body: Option<Value>,
}

/// Shared backend state. Every field is observable from tests.
pub struct MockState {
    frames: broadcast::Sender<StreamFrame>,
    stream_connects: AtomicUsize,
    blocks: Mutex<Vec<Value>>,
    report_total: AtomicBool,
    overview: Mutex<Value>,
    overview_requests: AtomicUsize,
    overview_delay_ms: AtomicU64,
    upload_delay_ms: AtomicU64,
    control_calls: Mutex<Vec<ControlCall>>,
    control_status: AtomicU16,
    uploads: Mutex<Vec<(String, usize)>>,
    doc_ledger: Mutex<Vec<Value>>,
    page_requests: Mutex<Vec<(usize, usize)>>,
}

impl Default for MockState {
    fn default() -> Self {
        let (frames, _) = broadcast::channel(64);
        Self {
            frames,
            stream_connects: AtomicUsize::new(0),
            blocks: Mutex::new(Vec::new()),
            report_total: AtomicBool::new(false),
            overview: Mutex::new(json!({ "status": "Initializing..." })),
            overview_requests: AtomicUsize::new(0),
            overview_delay_ms: AtomicU64::new(0),
            upload_delay_ms: AtomicU64::new(0),
            control_calls: Mutex::new(Vec::new()),
            control_status: AtomicU16::new(200),
            uploads: Mutex::new(Vec::new()),
            doc_ledger: Mutex::new(vec![json!({
                "index": 0,
                "timestamp": 1700000000.0,
                "doc_cid": "GENESIS",
                "doc_name": "Genesis",
                "previous_hash": "0"
            })]),
            page_requests: Mutex::new(Vec::new()),
        }
    }
}

/// A running mock backend. The server task is aborted on drop.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_on("127.0.0.1:0").await
    }

    pub async fn start_on(bind: &str) -> anyhow::Result<Self> {
        let state = Arc::new(MockState::default());
        let app = router(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Mock backend stopped");
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("socket address forms a URL")
    }

    /// Engine config pointed at this backend with test-friendly delays.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            reconnect_delay_ms: 200,
            poll_interval_ms: 100,
            anchoring_delay_ms: 50,
            upload_settle_ms: 100,
            request_timeout_ms: 2_000,
            ..StreamConfig::with_base_url(self.base_url())
        }
    }

    /// Pushes one snapshot to every connected stream client.
    pub fn push(&self, snapshot: Value) {
        self.push_raw(snapshot.to_string());
    }

    /// Pushes an arbitrary event body, valid JSON or not.
    pub fn push_raw(&self, body: impl Into<String>) {
        let _ = self.state.frames.send(StreamFrame::Data(body.into()));
    }

    /// Ends every open stream response, as a backend restart would.
    pub fn close_streams(&self) {
        let _ = self.state.frames.send(StreamFrame::Close);
    }

    /// Stream clients currently subscribed.
    pub fn stream_clients(&self) -> usize {
        self.state.frames.receiver_count()
    }

    pub fn stream_connects(&self) -> usize {
        self.state.stream_connects.load(Ordering::SeqCst)
    }

    /// Appends a ledger block (newer than every existing one) without pushing it.
    pub fn mint_block(&self, index: u64) -> Value {
        let block = block_json(index);
        self.state.blocks.lock().unwrap_or_else(|e| e.into_inner()).insert(0, block.clone());
        block
    }

    /// Mints a block and pushes it as the live ledger tip.
    pub fn push_block(&self, index: u64) {
        let block = self.mint_block(index);
        self.push(json!({ "blockchain": { "latest_block": block } }));
    }

    pub fn set_report_total(&self, report: bool) {
        self.state.report_total.store(report, Ordering::SeqCst);
    }

    pub fn set_overview(&self, overview: Value) {
        *self.state.overview.lock().unwrap_or_else(|e| e.into_inner()) = overview;
    }

    /// Holds every overview response back by `delay`. The overview is read
    /// after the delay.
    pub fn set_overview_delay(&self, delay: Duration) {
        self.state.overview_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn overview_requests(&self) -> usize {
        self.state.overview_requests.load(Ordering::SeqCst)
    }

    /// Holds every upload response back by `delay`.
    pub fn set_upload_delay(&self, delay: Duration) {
        self.state.upload_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_control_status(&self, status: u16) {
        self.state.control_status.store(status, Ordering::SeqCst);
    }

    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.state.control_calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.state.uploads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `(limit, offset)` of every pagination request, in arrival order.
    pub fn page_requests(&self) -> Vec<(usize, usize)> {
        self.state.page_requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Polls `cond` until it holds or `timeout` passes.
    pub async fn wait_until(&self, timeout: Duration, mut cond: impl FnMut(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if cond(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond(self)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A ledger block as the node serializes it.
pub fn block_json(index: u64) -> Value {
    json!({
        "index": index,
        "timestamp": 1700000000.0 + index as f64 * 30.0,
        "round_num": index.saturating_sub(1),
        "model_hash": format!("{:064x}", index * 7919),
        "previous_hash": format!("{:064x}", index.saturating_sub(1) * 7919),
    })
}

/// An overview section reporting `verified` anchored models.
pub fn overview_json(verified: u64) -> Value {
    json!({
        "metrics": [
            { "label": "Active Edge Workers", "value": "3/5", "color": "text-green-500" },
            { "label": "Models Verified", "value": verified.to_string(), "color": "text-purple-500" }
        ],
        "services": [
            { "name": "Parameter Server", "status": "running", "uptime": 99.9 },
            { "name": "Blockchain Node", "status": "running", "uptime": 100.0 }
        ]
    })
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/stream", get(stream_handler))
        .route("/api/blockchain", get(blockchain_handler))
        .route("/api/system-overview", get(overview_handler))
        .route("/api/doc-ledger", get(doc_ledger_handler))
        .route("/control/{action}", post(control_handler))
        .route("/upload_doc", post(upload_handler))
        .with_state(state)
}

async fn stream_handler(State(state): State<Arc<MockState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.stream_connects.fetch_add(1, Ordering::SeqCst);
    let rx = state.frames.subscribe();

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(StreamFrame::Data(body)) => return Some((Ok(Event::default().data(body)), rx)),
                Ok(StreamFrame::Close) | Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn blockchain_handler(State(state): State<Arc<MockState>>, Query(page): Query<PageQuery>) -> Json<Value> {
    let limit = page.limit.unwrap_or(5);
    let offset = page.offset.unwrap_or(0);
    state
        .page_requests
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((limit, offset));

    let blocks = state.blocks.lock().unwrap_or_else(|e| e.into_inner());
    let slice: Vec<Value> = blocks.iter().skip(offset).take(limit).cloned().collect();

    if state.report_total.load(Ordering::SeqCst) {
        Json(json!({ "blocks": slice, "total": blocks.len() }))
    } else {
        Json(Value::Array(slice))
    }
}

async fn overview_handler(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.overview_requests.fetch_add(1, Ordering::SeqCst);
    pause(&state.overview_delay_ms).await;
    Json(state.overview.lock().unwrap_or_else(|e| e.into_inner()).clone())
}

async fn pause(delay_ms: &AtomicU64) {
    let delay = delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

async fn doc_ledger_handler(State(state): State<Arc<MockState>>) -> Json<Value> {
    Json(Value::Array(state.doc_ledger.lock().unwrap_or_else(|e| e.into_inner()).clone()))
}

async fn control_handler(
    State(state): State<Arc<MockState>>,
    Path(action): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let body = serde_json::from_slice::<Value>(&body).ok();
    state
        .control_calls
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(ControlCall {
            action: action.clone(),
            body,
        });

    let status = StatusCode::from_u16(state.control_status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK);
    (status, Json(json!({ "status": "ok", "action": action })))
}

async fn upload_handler(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> (StatusCode, Json<Value>) {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let name = field.file_name().unwrap_or("document").to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((name, bytes.len())),
                    Err(e) => {
                        return (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": e.to_string() })));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": e.to_string() })));
            }
        }
    }

    pause(&state.upload_delay_ms).await;

    let Some((name, size)) = upload else {
        return (StatusCode::OK, Json(json!({ "success": false, "error": "No file part" })));
    };

    let mut ledger = state.doc_ledger.lock().unwrap_or_else(|e| e.into_inner());
    let index = ledger.len() as u64;
    let cid = format!("QmMock{:040}", index);
    ledger.push(json!({
        "index": index,
        "timestamp": 1700000000.0 + index as f64,
        "doc_cid": cid,
        "doc_name": name,
        "previous_hash": format!("{:064x}", index),
    }));
    state
        .uploads
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((name, size));

    (StatusCode::OK, Json(json!({ "success": true, "cid": cid })))
}
