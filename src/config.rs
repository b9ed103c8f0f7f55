//! Configuration management for HashLedger

use crate::crypto::Address;
use crate::error::ChainError;
use crate::network::normalize_peer_url;
use crate::transaction::Amount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Highest meaningful difficulty: a SHA-256 hex digest has 64 characters.
pub const MAX_DIFFICULTY: usize = 64;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_peers_file")]
    pub peers_file: String,
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    #[serde(default)]
    pub confirmation_requirement: usize,
    #[serde(default)]
    pub genesis_allocations: HashMap<Address, Amount>,
    #[serde(default = "default_true")]
    pub rebuild_balances_on_replace: bool,
    #[serde(default = "default_true")]
    pub resolve_on_invalid_block: bool,
}

/// What `POST /transaction` does with a validated transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MinerMode {
    /// Admit into the mempool and let the periodic miner pick it up.
    #[default]
    Pooled,
    /// Mine a block holding just this transaction before answering.
    Immediate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MinerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: MinerMode,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub reward_address: Option<Address>,
    #[serde(default)]
    pub block_reward: Amount,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_wallet_interval_secs")]
    pub wallet_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            peers_file: default_peers_file(),
            peer_timeout_ms: default_peer_timeout_ms(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            confirmation_requirement: 0,
            genesis_allocations: HashMap::new(),
            rebuild_balances_on_replace: true,
            resolve_on_invalid_block: true,
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: MinerMode::default(),
            interval_secs: default_interval_secs(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            threads: default_threads(),
            reward_address: None,
            block_reward: Amount::ZERO,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            wallet_interval_secs: default_wallet_interval_secs(),
        }
    }
}

fn default_api_port() -> u16 {
    5000
}

fn default_peers_file() -> String {
    "nodes.json".to_string()
}

fn default_peer_timeout_ms() -> u64 {
    3000
}

fn default_difficulty() -> usize {
    crate::blockchain::DEFAULT_DIFFICULTY
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    10
}

fn default_min_batch_size() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    10
}

fn default_threads() -> usize {
    1
}

fn default_wallet_interval_secs() -> u64 {
    30
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.chain.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "chain.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.chain.difficulty
            )));
        }
        if self.miner.max_batch_size == 0 {
            return Err(ChainError::ConfigError("miner.max_batch_size must be at least 1".to_string()));
        }
        if self.miner.min_batch_size > self.miner.max_batch_size {
            return Err(ChainError::ConfigError(format!(
                "miner.min_batch_size ({}) exceeds miner.max_batch_size ({})",
                self.miner.min_batch_size, self.miner.max_batch_size
            )));
        }
        if self.miner.threads == 0 {
            return Err(ChainError::ConfigError("miner.threads must be at least 1".to_string()));
        }
        if self.miner.block_reward < Amount::ZERO {
            return Err(ChainError::ConfigError("miner.block_reward must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.network.peer_timeout_ms)
    }

    /// The reward transaction target, when block rewards are switched on.
    pub fn block_reward(&self) -> Option<(Address, Amount)> {
        match &self.miner.reward_address {
            Some(address) if self.miner.block_reward > Amount::ZERO => Some((address.clone(), self.miner.block_reward)),
            _ => None,
        }
    }
}

/// Reads and validates `path`. A missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<NodeConfig, ChainError> {
    let path = path.as_ref();
    let config = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<NodeConfig>(&raw)
            .map_err(|e| ChainError::ConfigError(format!("{}: {}", path.display(), e)))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "No config file, using defaults");
            NodeConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Deserialize)]
struct PeerFile {
    #[serde(default)]
    nodes: Vec<String>,
}

/// Loads the `{"nodes": [...]}` peer list, normalised and de-duplicated.
pub fn load_peers(path: impl AsRef<Path>) -> Result<Vec<String>, ChainError> {
    let path = path.as_ref();
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "Peer list not found, starting without peers");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    let file: PeerFile = serde_json::from_str(&raw)
        .map_err(|e| ChainError::ConfigError(format!("{}: {}", path.display(), e)))?;

    let mut peers: Vec<String> = Vec::with_capacity(file.nodes.len());
    for node in &file.nodes {
        let Some(url) = normalize_peer_url(node) else {
            warn!(entry = %node, "Skipping empty peer entry");
            continue;
        };
        if !peers.contains(&url) {
            peers.push(url);
        }
    }
    info!(count = peers.len(), "Loaded peer list");
    Ok(peers)
}
