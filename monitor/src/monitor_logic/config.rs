use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_stream::StreamConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Headless FL dashboard monitor", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "DASHBOARD_API_URL", help = "Backend base URL.")]
    pub base_url: Option<String>,

    #[clap(long, env = "FEED_MONITOR_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FEED_MONITOR_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FEED_MONITOR_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FEED_MONITOR_RECONNECT_DELAY_MS", help = "Fixed delay in milliseconds before reconnecting the stream.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_MONITOR_FEED_WINDOW", help = "Number of live ledger entries kept in memory.")]
    pub feed_window: Option<usize>,

    #[clap(long, env = "FEED_MONITOR_PAGE_SIZE", help = "Ledger entries requested per history page.")]
    pub page_size: Option<usize>,

    #[clap(long, env = "FEED_MONITOR_REQUEST_TIMEOUT_MS", help = "Timeout in milliseconds for REST requests.")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "FEED_MONITOR_POLL_INTERVAL_MS", help = "Overview polling interval in milliseconds before the stream delivers.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, help = "Control action to send once at startup (e.g. start, stop).")]
    pub command: Option<String>,

    #[clap(long, help = "Document to upload once at startup.")]
    pub upload: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            base_url: other.base_url.or(self.base_url),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            feed_window: other.feed_window.or(self.feed_window),
            page_size: other.page_size.or(self.page_size),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            command: other.command.or(self.command),
            upload: other.upload.or(self.upload),
        }
    }

    fn defaults() -> Config {
        let stream = StreamConfig::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            reconnect_delay_ms: Some(stream.reconnect_delay_ms),
            feed_window: Some(stream.feed_window),
            page_size: Some(stream.page_size),
            request_timeout_ms: Some(stream.request_timeout_ms),
            poll_interval_ms: Some(stream.poll_interval_ms),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or_else(|| Path::new("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Engine configuration with every set field applied over the defaults.
    pub fn stream_config(&self) -> Result<StreamConfig> {
        let mut stream = match &self.base_url {
            Some(raw) => {
                let url = Url::parse(raw).with_context(|| format!("Invalid base URL: {}", raw))?;
                // `host:port` parses with the host as its scheme.
                if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
                    bail!("Invalid base URL: {} (expected http:// or https://)", raw);
                }
                StreamConfig::with_base_url(lib_stream::configs::resolve_base_url(Some(url.as_str())))
            }
            None => StreamConfig::default(),
        };

        if let Some(v) = self.reconnect_delay_ms {
            stream.reconnect_delay_ms = v;
        }
        if let Some(v) = self.feed_window {
            stream.feed_window = v;
        }
        if let Some(v) = self.page_size {
            stream.page_size = v;
        }
        if let Some(v) = self.request_timeout_ms {
            stream.request_timeout_ms = v;
        }
        if let Some(v) = self.poll_interval_ms {
            stream.poll_interval_ms = v;
        }
        Ok(stream)
    }
}

/// Defaults < config file < environment and CLI.
pub fn load_config() -> Config {
    let _ = dotenvy::dotenv();
    resolve(Config::parse())
}

fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("feed_monitor.conf"));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => eprintln!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => eprintln!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }

    current_config.merge(cli)
}
