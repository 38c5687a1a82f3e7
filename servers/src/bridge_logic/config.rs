use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Redis Pub/Sub to WebSocket bridge with an HTTP publish API", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "ATLAS_BROKER_URL", help = "Redis broker URL, e.g. redis://127.0.0.1:6379/.")]
    pub broker_url: Option<String>,

    #[clap(long, env = "ATLAS_TOPIC_FILTER", help = "Pattern subscribed on the broker (PSUBSCRIBE syntax).")]
    pub topic_filter: Option<String>,

    #[clap(long, env = "ATLAS_WS_PORT", help = "Port the realtime WebSocket server binds to.")]
    pub ws_port: Option<u16>,

    #[clap(long, env = "ATLAS_HTTP_PORT", help = "Port the publish gateway binds to.")]
    pub http_port: Option<u16>,

    #[clap(long, env = "ATLAS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "ATLAS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "ATLAS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "ATLAS_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for broker reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "ATLAS_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for broker reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "ATLAS_PUBLISH_QUEUE_CAPACITY", help = "Capacity of the internal publish command queue.")]
    pub publish_queue_capacity: Option<usize>,

    #[clap(long, env = "ATLAS_FANOUT_CAPACITY", help = "Capacity of the fan-out channel; a client lagging past it drops oldest messages.")]
    pub fanout_capacity: Option<usize>,

    #[clap(long, env = "ATLAS_MONITOR_INTERVAL_SECONDS", help = "Interval in seconds between link monitor checks.")]
    pub monitor_interval_seconds: Option<u64>,

    #[clap(long, env = "ATLAS_DATAFLOW_INACTIVITY_THRESHOLD_SECONDS", help = "Seconds of broker silence before the monitor warns.")]
    pub dataflow_inactivity_threshold_seconds: Option<u64>,
}

/// Fully resolved configuration, immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct Settings {
    pub broker_url: String,
    pub topic_filter: String,
    pub ws_port: u16,
    pub http_port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub publish_queue_capacity: usize,
    pub fanout_capacity: usize,
    pub monitor_interval_seconds: u64,
    pub dataflow_inactivity_threshold_seconds: u64,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            broker_url: other.broker_url.or(self.broker_url),
            topic_filter: other.topic_filter.or(self.topic_filter),
            ws_port: other.ws_port.or(self.ws_port),
            http_port: other.http_port.or(self.http_port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            publish_queue_capacity: other.publish_queue_capacity.or(self.publish_queue_capacity),
            fanout_capacity: other.fanout_capacity.or(self.fanout_capacity),
            monitor_interval_seconds: other.monitor_interval_seconds.or(self.monitor_interval_seconds),
            dataflow_inactivity_threshold_seconds: other
                .dataflow_inactivity_threshold_seconds
                .or(self.dataflow_inactivity_threshold_seconds),
        }
    }

    fn into_settings(self) -> Settings {
        Settings {
            broker_url: self
                .broker_url
                .unwrap_or_else(|| "redis://127.0.0.1:6379/".to_string()),
            topic_filter: self
                .topic_filter
                .unwrap_or_else(|| "dojo/nodes/pulse/*".to_string()),
            ws_port: self.ws_port.unwrap_or(3000),
            http_port: self.http_port.unwrap_or(3001),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            reconnect_base_delay_ms: self.reconnect_base_delay_ms.unwrap_or(1000),
            reconnect_max_delay_ms: self.reconnect_max_delay_ms.unwrap_or(60000),
            publish_queue_capacity: self.publish_queue_capacity.unwrap_or(64),
            fanout_capacity: self.fanout_capacity.unwrap_or(1000),
            monitor_interval_seconds: self.monitor_interval_seconds.unwrap_or(10),
            dataflow_inactivity_threshold_seconds: self
                .dataflow_inactivity_threshold_seconds
                .unwrap_or(60),
        }
    }
}

pub fn load_config() -> Settings {
    // CLI arguments (including env vars handled by clap) win over the file.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_bridge.conf"));

    let mut current_config = Config::default();

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                eprintln!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            eprintln!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    }

    current_config.merge(cli_args).into_settings()
}
