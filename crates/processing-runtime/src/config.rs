//! # Runtime Configuration
//!
//! Command-line flags and the validated configuration built from them.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use kgi_02_dag_processing::ProcessingConfig;
use kgi_telemetry::TelemetryConfig;
use thiserror::Error;

use crate::adapters::wrpc::WrpcConfig;

/// Network the node is expected to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Network {
    #[default]
    Mainnet,
    #[value(name = "testnet-10")]
    Testnet10,
    #[value(name = "testnet-11")]
    Testnet11,
    Devnet,
    Simnet,
}

impl Network {
    /// Name as reported by the node's DAG info.
    pub fn node_name(&self) -> &'static str {
        match self {
            Network::Mainnet => "kaspa-mainnet",
            Network::Testnet10 => "kaspa-testnet-10",
            Network::Testnet11 => "kaspa-testnet-11",
            Network::Devnet => "kaspa-devnet",
            Network::Simnet => "kaspa-simnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node_name())
    }
}

/// Kaspa Graph Inspector processing tier.
#[derive(Parser, Debug, Clone)]
#[command(name = "kgi-processing")]
#[command(author, version, about = "Mirrors a Kaspa node's block DAG into a local store")]
pub struct Args {
    /// Directory of the RocksDB database
    #[arg(long = "connection-string", env = "KGI_CONNECTION_STRING")]
    pub connection_string: PathBuf,

    /// Node wRPC (JSON) URL, e.g. ws://127.0.0.1:18110
    #[arg(short = 's', long = "rpcserver", env = "KGI_RPCSERVER")]
    pub rpcserver: String,

    /// Network the node runs on
    #[arg(long, value_enum, default_value_t = Network::Mainnet)]
    pub network: Network,

    /// Re-verify every block between the pruning point and the tip
    #[arg(long)]
    pub resync: bool,

    /// Wipe the store and sync from scratch
    #[arg(long = "clear-db")]
    pub clear_db: bool,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(short = 'd', long = "loglevel", default_value = "info")]
    pub log_level: String,

    /// Directory for rolling log files
    #[arg(long = "logdir")]
    pub log_dir: Option<PathBuf>,

    /// Emit console logs as JSON
    #[arg(long = "json-logs")]
    pub json_logs: bool,

    /// Identity cache capacity in entries
    #[arg(long = "cache-capacity", default_value_t = 500_000)]
    pub cache_capacity: usize,

    /// Wait for the node to report itself synced before the first resync
    #[arg(long = "wait-for-sync")]
    pub wait_for_sync: bool,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub data_dir: PathBuf,
    pub network: Network,
    pub wait_for_sync: bool,
    pub wrpc: WrpcConfig,
    pub processing: ProcessingConfig,
    pub telemetry: TelemetryConfig,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--connection-string must not be empty")]
    MissingDataDir,

    #[error("--rpcserver must be a ws:// or wss:// URL, got '{0}'")]
    InvalidRpcServer(String),

    #[error("invalid processing configuration: {0}")]
    Processing(String),
}

impl RuntimeConfig {
    /// Build the configuration from parsed flags.
    pub fn from_args(args: Args) -> Self {
        let processing = ProcessingConfig {
            resync: args.resync,
            clear_db: args.clear_db,
            cache_capacity: args.cache_capacity,
            ..ProcessingConfig::default()
        };
        let telemetry = TelemetryConfig {
            log_level: args.log_level,
            json_logs: args.json_logs,
            log_dir: args.log_dir,
            ..TelemetryConfig::default()
        };
        Self {
            data_dir: args.connection_string,
            network: args.network,
            wait_for_sync: args.wait_for_sync,
            wrpc: WrpcConfig::new(args.rpcserver),
            processing,
            telemetry,
        }
    }

    /// Check the configuration before anything is opened or connected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingDataDir);
        }
        let url = self.wrpc.url.as_str();
        let has_scheme = url
            .strip_prefix("ws://")
            .or_else(|| url.strip_prefix("wss://"))
            .is_some_and(|rest| !rest.is_empty());
        if !has_scheme {
            return Err(ConfigError::InvalidRpcServer(url.to_string()));
        }
        self.processing
            .validate()
            .map_err(|e| ConfigError::Processing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "kgi-processing",
            "--connection-string",
            "/tmp/kgi",
            "--rpcserver",
            "ws://127.0.0.1:18110",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_args(parse(&[]));
        assert_eq!(config.network, Network::Mainnet);
        assert!(!config.processing.resync);
        assert!(!config.processing.clear_db);
        assert_eq!(config.processing.cache_capacity, 500_000);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(!config.wait_for_sync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_map_into_sections() {
        let config = RuntimeConfig::from_args(parse(&[
            "--network",
            "testnet-11",
            "--resync",
            "--clear-db",
            "--loglevel",
            "debug",
            "--logdir",
            "/var/log/kgi",
            "--json-logs",
            "--cache-capacity",
            "1000",
            "--wait-for-sync",
        ]));
        assert_eq!(config.network, Network::Testnet11);
        assert_eq!(config.network.to_string(), "kaspa-testnet-11");
        assert!(config.processing.resync);
        assert!(config.processing.clear_db);
        assert_eq!(config.processing.cache_capacity, 1000);
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.telemetry.log_dir, Some(PathBuf::from("/var/log/kgi")));
        assert!(config.telemetry.json_logs);
        assert!(config.wait_for_sync);
    }

    #[test]
    fn test_required_flags() {
        assert!(Args::try_parse_from(["kgi-processing", "--rpcserver", "ws://x"]).is_err());
        assert!(Args::try_parse_from(["kgi-processing", "--connection-string", "/tmp"]).is_err());
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let mut config = RuntimeConfig::from_args(parse(&[]));
        config.wrpc.url = "http://127.0.0.1:16110".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRpcServer(_))
        ));
        config.wrpc.url = "ws://".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_cache_capacity() {
        let config = RuntimeConfig::from_args(parse(&["--cache-capacity", "0"]));
        assert!(matches!(config.validate(), Err(ConfigError::Processing(_))));
    }
}
