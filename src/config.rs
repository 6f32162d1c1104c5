//! Runtime configuration, loaded from the environment the way every other `clap::Parser` group
//! in this crate loads its defaults -- each field has an explicit default and can be overridden
//! either on the command line or through its environment variable.

use std::path::PathBuf;
use std::time::Duration;

#[derive(clap::Parser, Debug, Clone)]
#[group(id = "config::Args")]
pub struct Args {
    /// Path to the `chip-tool` executable this bridge shells out to for every Matter operation.
    #[arg(long, env = "CHIP_TOOL_PATH", default_value = "./chip-tool")]
    pub chip_tool_path: PathBuf,

    /// Directory chip-tool uses to persist commissioner state (fabric keys, trust store).
    #[arg(long, env = "COMMISSIONING_DIR", default_value = "./commissioning_dir")]
    pub commissioning_dir: PathBuf,

    /// Hostname or address of the MQTT broker devices are published to.
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "localhost")]
    pub mqtt_broker_url: String,

    /// Port of the MQTT broker.
    #[arg(long, env = "MQTT_BROKER_PORT", default_value = "9001")]
    pub mqtt_broker_port: u16,

    /// Path to the Matter PAA trust store directory passed to `chip-tool` during commissioning.
    #[arg(long, env = "PAA_CERT_DIR_PATH", default_value = "./credentials/paa_root_cert")]
    pub paa_cert_dir_path: PathBuf,

    /// Path to the SQLite device database file.
    #[arg(long, env = "DATABASE_PATH", default_value = "./db/matterbridge.db")]
    pub database_path: PathBuf,

    /// Address the HTTP/WebSocket server binds to.
    #[arg(long, env = "HTTP_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub http_bind_addr: std::net::SocketAddr,

    /// How often, in seconds, each device's attributes are polled.
    #[arg(long, env = "POLLING_INTERVAL", default_value = "5")]
    pub polling_interval_secs: u64,

    /// Maximum number of devices polled concurrently.
    #[arg(long, env = "MAX_CONCURRENT_DEVICES", default_value = "5")]
    pub max_concurrent_devices: usize,

    /// Per-command timeout passed to the process executor while polling.
    #[arg(long, env = "COMMAND_TIMEOUT", default_value = "10")]
    pub command_timeout_secs: u64,

    /// Whether a device's polling loop disables itself after a read error, rather than retrying.
    #[arg(long, env = "DEVICE_ERROR_STOP", default_value = "true")]
    pub device_error_stop: bool,

    /// How often, in seconds, the bridge rescans for newly commissioned devices that have not
    /// yet been added to the polling set.
    #[arg(long, env = "AUTO_DISCOVERY_INTERVAL", default_value = "300")]
    pub auto_discovery_interval_secs: u64,

    /// Maximum number of `chip-tool` subprocesses running concurrently.
    #[arg(long, env = "MAX_CONCURRENT_PROCESSES", default_value = "10")]
    pub max_concurrent_processes: usize,

    /// Number of retries the process executor performs when `chip-tool` reports it is busy.
    #[arg(long, env = "COMMAND_RETRIES", default_value = "3")]
    pub command_retries: usize,

    /// Log level filter, as accepted by `tracing_subscriber::EnvFilter`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Whether log output is ANSI colored.
    #[arg(long, env = "ENABLE_COLORED_LOGS", default_value = "true")]
    pub enable_colored_logs: bool,
}

impl Args {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn auto_discovery_interval(&self) -> Duration {
        Duration::from_secs(self.auto_discovery_interval_secs)
    }
}
