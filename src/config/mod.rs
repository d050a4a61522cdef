//! Configuration for the pool core
//!
//! Loaded from a YAML or JSON file, with a small set of CLI overrides.
//! The serde structs here convert into the runtime configs of the
//! components they describe.

use crate::core::PrefixAddressValidator;
use crate::daemon::{DaemonClientConfig, TemplateFeedConfig};
use crate::error::{ConfigError, Error, Result};
use crate::pow::CoinFamily;
use crate::stratum::{BanConfig, PortConfig, StratumConfig, VardiffConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "cnpool",
    about = "CryptoNote stratum pool core",
    version,
    author
)]
pub struct Args {
    /// Configuration file in YAML or JSON format
    #[clap(short = 'c', long = "config-file", value_name = "FILE")]
    pub config_file: PathBuf,

    /// Override the configured log level
    #[clap(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Print the parsed configuration and exit
    #[clap(long = "print-config")]
    pub print_config: bool,
}

/// PoW backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PowBackend {
    /// RandomX via the native bindings
    #[default]
    Randomx,
    /// Deterministic Blake2 digest, for dev networks and tests
    Blake2Sim,
}

fn default_address_prefixes() -> Vec<String> {
    vec!["4".to_string(), "8".to_string()]
}
fn default_address_min_len() -> usize {
    95
}
fn default_address_max_len() -> usize {
    106
}
fn default_payment_id_hex_len() -> usize {
    64
}

/// Coin template settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinConfig {
    pub name: String,
    pub family: CoinFamily,
    #[serde(default = "default_address_prefixes")]
    pub address_prefixes: Vec<String>,
    #[serde(default = "default_address_min_len")]
    pub address_min_len: usize,
    #[serde(default = "default_address_max_len")]
    pub address_max_len: usize,
    #[serde(default = "default_payment_id_hex_len")]
    pub payment_id_hex_len: usize,
    #[serde(default)]
    pub pow_backend: PowBackend,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:18081/json_rpc".to_string()
}
fn default_reserve_size() -> u32 {
    crate::core::constants::DEFAULT_RESERVE_SIZE
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_rpc_timeout_secs() -> u64 {
    10
}

/// Daemon connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    pub wallet_address: String,
    #[serde(default = "default_reserve_size")]
    pub reserve_size: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub template_stream_url: Option<String>,
}

fn default_start_difficulty() -> u64 {
    5_000
}
fn default_min_difficulty() -> u64 {
    100
}
fn default_max_difficulty() -> u64 {
    1_000_000_000_000
}
fn default_target_time_secs() -> u64 {
    10
}
fn default_variance_percent() -> f64 {
    0.30
}
fn default_retarget_interval_secs() -> u64 {
    30
}
fn default_vardiff_window() -> usize {
    50
}

/// Per-port difficulty settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultySettings {
    #[serde(default = "default_start_difficulty")]
    pub start: u64,
    #[serde(default = "default_min_difficulty")]
    pub min: u64,
    #[serde(default = "default_max_difficulty")]
    pub max: u64,
    #[serde(default = "default_target_time_secs")]
    pub target_time_secs: u64,
    #[serde(default = "default_variance_percent")]
    pub variance_percent: f64,
    #[serde(default = "default_retarget_interval_secs")]
    pub retarget_interval_secs: u64,
    #[serde(default = "default_vardiff_window")]
    pub window: usize,
}

impl Default for DifficultySettings {
    fn default() -> Self {
        Self {
            start: default_start_difficulty(),
            min: default_min_difficulty(),
            max: default_max_difficulty(),
            target_time_secs: default_target_time_secs(),
            variance_percent: default_variance_percent(),
            retarget_interval_secs: default_retarget_interval_secs(),
            window: default_vardiff_window(),
        }
    }
}

/// One stratum listening port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    pub port: u16,
    #[serde(default)]
    pub difficulty: DifficultySettings,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    8_192
}
fn default_max_connections_per_ip() -> usize {
    32
}
fn default_connection_timeout_secs() -> u64 {
    600
}
fn default_max_share_age_secs() -> u64 {
    6
}

/// Stratum server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub ports: Vec<PortSettings>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_max_share_age_secs")]
    pub max_share_age_secs: u64,
    /// Hash pool slots, 0 sizes to physical cores
    #[serde(default)]
    pub hash_workers: usize,
}

fn default_ban_enabled() -> bool {
    true
}
fn default_invalid_threshold() -> u32 {
    25
}
fn default_check_window_secs() -> u64 {
    600
}
fn default_ban_duration_secs() -> u64 {
    1_800
}

/// Ban policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanSettings {
    #[serde(default = "default_ban_enabled")]
    pub enabled: bool,
    #[serde(default = "default_invalid_threshold")]
    pub invalid_threshold: u32,
    #[serde(default = "default_check_window_secs")]
    pub check_window_secs: u64,
    #[serde(default = "default_ban_duration_secs")]
    pub ban_duration_secs: u64,
}

impl Default for BanSettings {
    fn default() -> Self {
        Self {
            enabled: default_ban_enabled(),
            invalid_threshold: default_invalid_threshold(),
            check_window_secs: default_check_window_secs(),
            ban_duration_secs: default_ban_duration_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "plain".to_string()
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub coin: CoinConfig,
    pub daemon: DaemonSettings,
    pub stratum: StratumSettings,
    #[serde(default)]
    pub banning: BanSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Config {
    /// Load a config file, dispatching on extension.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|_| {
            Error::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            })
        })?;

        let config: Config = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&contents).map_err(|e| {
                Error::Config(ConfigError::ParseError {
                    file: path.display().to_string(),
                    message: e.to_string(),
                })
            })?
        } else {
            serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(ConfigError::ParseError {
                    file: path.display().to_string(),
                    message: e.to_string(),
                })
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from parsed CLI arguments, applying overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = Self::load(&args.config_file)?;
        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
        Ok(config)
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Result<()> {
        if self.daemon.wallet_address.is_empty() {
            return Err(Error::Config(ConfigError::MissingField {
                field: "daemon.wallet_address".to_string(),
            }));
        }
        if self.stratum.ports.is_empty() {
            return Err(Error::Config(ConfigError::MissingField {
                field: "stratum.ports".to_string(),
            }));
        }
        for port in &self.stratum.ports {
            let d = &port.difficulty;
            if d.min == 0 || d.min > d.max || d.start < d.min || d.start > d.max {
                return Err(Error::config_invalid_value(
                    format!("stratum.ports[{}].difficulty", port.port),
                    format!("start={} min={} max={}", d.start, d.min, d.max),
                    "0 < min <= start <= max",
                ));
            }
            if d.variance_percent <= 0.0 || d.target_time_secs == 0 {
                return Err(Error::config_invalid_value(
                    format!("stratum.ports[{}].difficulty", port.port),
                    format!(
                        "variance={} target_time={}",
                        d.variance_percent, d.target_time_secs
                    ),
                    "positive variance and target time",
                ));
            }
        }
        if self.coin.payment_id_hex_len == 0 || self.coin.payment_id_hex_len % 2 != 0 {
            return Err(Error::config_invalid_value(
                "coin.payment_id_hex_len",
                self.coin.payment_id_hex_len.to_string(),
                "even, non-zero hex length",
            ));
        }
        Ok(())
    }

    /// Daemon client runtime config.
    pub fn daemon_client_config(&self) -> DaemonClientConfig {
        DaemonClientConfig {
            rpc_url: self.daemon.rpc_url.clone(),
            timeout: Duration::from_secs(self.daemon.rpc_timeout_secs),
        }
    }

    /// Template feed runtime config.
    pub fn template_feed_config(&self) -> TemplateFeedConfig {
        TemplateFeedConfig {
            wallet_address: self.daemon.wallet_address.clone(),
            reserve_size: self.daemon.reserve_size,
            poll_interval: Duration::from_millis(self.daemon.poll_interval_ms),
            refresh_interval: Duration::from_secs(self.daemon.refresh_interval_secs),
            stream_url: self.daemon.template_stream_url.clone(),
        }
    }

    /// Stratum server runtime config.
    pub fn stratum_config(&self) -> StratumConfig {
        StratumConfig {
            bind_address: self.stratum.bind_address.clone(),
            ports: self
                .stratum
                .ports
                .iter()
                .map(|p| PortConfig {
                    port: p.port,
                    vardiff: VardiffConfig {
                        start_difficulty: p.difficulty.start,
                        min_difficulty: p.difficulty.min,
                        max_difficulty: p.difficulty.max,
                        target_time: Duration::from_secs(p.difficulty.target_time_secs),
                        variance_percent: p.difficulty.variance_percent,
                        retarget_interval: Duration::from_secs(p.difficulty.retarget_interval_secs),
                        window: p.difficulty.window,
                    },
                })
                .collect(),
            max_connections: self.stratum.max_connections,
            max_connections_per_ip: self.stratum.max_connections_per_ip,
            connection_timeout: Duration::from_secs(self.stratum.connection_timeout_secs),
            max_share_age: Duration::from_secs(self.stratum.max_share_age_secs),
        }
    }

    /// Ban policy runtime config.
    pub fn ban_config(&self) -> BanConfig {
        BanConfig {
            enabled: self.banning.enabled,
            invalid_threshold: self.banning.invalid_threshold,
            check_window: Duration::from_secs(self.banning.check_window_secs),
            ban_duration: Duration::from_secs(self.banning.ban_duration_secs),
        }
    }

    /// Address validator built from the coin template.
    pub fn address_validator(&self) -> PrefixAddressValidator {
        PrefixAddressValidator::new(
            self.coin.address_prefixes.clone(),
            self.coin.address_min_len,
            self.coin.address_max_len,
        )
    }
}
