//! Runs the mock backend standalone and mints a ledger block every few
//! seconds, so `feed_monitor` can be exercised without the real platform.
//!
//! ```text
//! cargo run -p project_tests --bin test_mock_backend -- --port 5000
//! DASHBOARD_API_URL=http://127.0.0.1:5000 cargo run -p monitor --bin feed_monitor
//! ```

use clap::Parser;
use serde_json::json;
use std::time::Duration;

use project_tests::{overview_json, MockBackend};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[clap(short, long, default_value_t = 5000)]
    port: u16,

    /// Seconds between minted blocks
    #[clap(short, long, default_value_t = 3)]
    interval_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(true).init();
    let args = Args::parse();

    let backend = MockBackend::start_on(&format!("127.0.0.1:{}", args.port)).await?;
    backend.set_report_total(true);
    tracing::info!("Mock backend listening on {}", backend.base_url());

    for index in 1..=12 {
        backend.mint_block(index);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_seconds));
    let mut index = 12u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                index += 1;
                backend.set_overview(overview_json(index));
                backend.push(json!({
                    "overview": overview_json(index),
                    "workers": [
                        { "id": "worker-01", "status": "training", "dataset": "Medical-A", "samples": 2500, "progress": (index * 7) % 100 },
                        { "id": "worker-02", "status": "idle", "dataset": "Medical-B", "samples": 1800, "progress": 0 }
                    ],
                    "training": { "round": index, "metrics": [{ "label": "Accuracy", "value": 80.0 + (index % 15) as f64, "target": 90.0 }] },
                    "security": { "metrics": [{ "label": "Failed Auth", "value": 0, "status": "secure" }] }
                }));
                backend.push_block(index);
                tracing::info!(index, clients = backend.stream_clients(), "Minted block");
            }
        }
    }

    tracing::info!("Mock backend stopped");
    Ok(())
}
