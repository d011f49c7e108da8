use crate::onchain::CoinFace;
use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, U256};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} is not a valid address: {value}")]
    BadAddress { field: &'static str, value: String },
    #[error("wager.face must be \"heads\" or \"tails\", got {0:?}")]
    BadFace(String),
    #[error("wager.stake_eth is not a valid amount: {0}")]
    BadStake(String),
    #[error("transport.mode must be \"push\", \"poll\" or \"push-with-poll-fallback\", got {0:?}")]
    BadMode(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub wager: WagerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC HTTP endpoint (submission, balance queries, log polling)
    #[serde(default = "default_http_url")]
    pub http_url: String,
    /// JSON-RPC WebSocket endpoint (push log subscription)
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Coinflip contract address - loaded from env FLIP_CONTRACT_ADDRESS
    #[serde(default)]
    pub contract_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Delivery strategy: "push", "poll", or "push-with-poll-fallback".
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How many blocks behind the head each poll window reaches.
    #[serde(default = "default_poll_lookback")]
    pub poll_lookback_blocks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelatorConfig {
    /// Seconds a tracked wager may stay pending before it times out.
    /// 0 disables the deadline.
    #[serde(default = "default_resolution_timeout")]
    pub resolution_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WagerConfig {
    /// Place one wager at startup and exit once it settles.
    /// false = monitor-only mode.
    #[serde(default)]
    pub place: bool,
    /// "heads" or "tails".
    #[serde(default = "default_face")]
    pub face: String,
    /// Stake in whole native-token units, e.g. "0.01".
    #[serde(default = "default_stake")]
    pub stake_eth: String,
    /// Account to watch in monitor-only mode (ignored when a private
    /// key is configured; the signer address wins).
    #[serde(default)]
    pub bettor_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Append-only wager journal (JSON lines).
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_http_url() -> String {
    "http://localhost:8545".to_string()
}
fn default_ws_url() -> String {
    "ws://localhost:8546".to_string()
}
fn default_mode() -> String {
    "push-with-poll-fallback".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_poll_lookback() -> u64 {
    10
}
fn default_resolution_timeout() -> u64 {
    120
}
fn default_face() -> String {
    "heads".to_string()
}
fn default_stake() -> String {
    "0.01".to_string()
}
fn default_journal_path() -> String {
    "flipwatch-journal.jsonl".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            http_url: default_http_url(),
            ws_url: default_ws_url(),
            contract_address: String::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_lookback_blocks: default_poll_lookback(),
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            resolution_timeout_secs: default_resolution_timeout(),
        }
    }
}

impl Default for WagerConfig {
    fn default() -> Self {
        Self {
            place: false,
            face: default_face(),
            stake_eth: default_stake(),
            bettor_address: String::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Load a default config from environment variables alone (no file).
    pub fn from_env() -> Self {
        let mut config = Config {
            chain: ChainConfig::default(),
            transport: TransportConfig::default(),
            correlator: CorrelatorConfig::default(),
            wager: WagerConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.overlay_env();
        config
    }

    fn overlay_env(&mut self) {
        if let Ok(url) = std::env::var("FLIP_HTTP_URL") {
            self.chain.http_url = url;
        }
        if let Ok(url) = std::env::var("FLIP_WS_URL") {
            self.chain.ws_url = url;
        }
        if let Ok(addr) = std::env::var("FLIP_CONTRACT_ADDRESS") {
            self.chain.contract_address = addr;
        }
    }

    /// Parsed coinflip contract address.
    pub fn contract(&self) -> Result<Address, ConfigError> {
        Address::from_str(&self.chain.contract_address).map_err(|_| ConfigError::BadAddress {
            field: "chain.contract_address",
            value: self.chain.contract_address.clone(),
        })
    }

    /// Explicit bettor address for monitor-only mode, if configured.
    pub fn bettor_override(&self) -> Result<Option<Address>, ConfigError> {
        if self.wager.bettor_address.is_empty() {
            return Ok(None);
        }
        Address::from_str(&self.wager.bettor_address)
            .map(Some)
            .map_err(|_| ConfigError::BadAddress {
                field: "wager.bettor_address",
                value: self.wager.bettor_address.clone(),
            })
    }

    /// Parsed wager face.
    pub fn face(&self) -> Result<CoinFace, ConfigError> {
        match self.wager.face.to_ascii_lowercase().as_str() {
            "heads" => Ok(CoinFace::Heads),
            "tails" => Ok(CoinFace::Tails),
            _ => Err(ConfigError::BadFace(self.wager.face.clone())),
        }
    }

    /// Parsed stake in wei.
    pub fn stake(&self) -> Result<U256, ConfigError> {
        parse_ether(&self.wager.stake_eth)
            .map_err(|_| ConfigError::BadStake(self.wager.stake_eth.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.transport.mode, "push-with-poll-fallback");
        assert_eq!(config.transport.poll_interval_ms, 1000);
        assert_eq!(config.transport.poll_lookback_blocks, 10);
        assert_eq!(config.correlator.resolution_timeout_secs, 120);
        assert!(!config.wager.place);
    }

    #[test]
    fn parses_wager_section() {
        let config: Config = toml::from_str(
            r#"
            [wager]
            place = true
            face = "Tails"
            stake_eth = "0.5"
            "#,
        )
        .unwrap();
        assert!(config.wager.place);
        assert_eq!(config.face().unwrap(), CoinFace::Tails);
        assert_eq!(config.stake().unwrap(), parse_ether("0.5").unwrap());
    }

    #[test]
    fn rejects_bad_face_and_stake() {
        let config: Config = toml::from_str(
            r#"
            [wager]
            face = "edge"
            stake_eth = "lots"
            "#,
        )
        .unwrap();
        assert!(matches!(config.face(), Err(ConfigError::BadFace(_))));
        assert!(matches!(config.stake(), Err(ConfigError::BadStake(_))));
    }

    #[test]
    fn rejects_missing_contract_address() {
        let config: Config = toml::from_str("").unwrap();
        assert!(matches!(
            config.contract(),
            Err(ConfigError::BadAddress { .. })
        ));
    }
}
