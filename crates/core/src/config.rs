use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{Address, BlockNumber, TraceMode};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UpstreamConfig {
    pub rpc_url: String,

    /// Chain the node is expected to serve; checked at startup when set.
    pub chain_id: Option<u64>,

    #[serde(default = "UpstreamConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    fn default_timeout_secs() -> u64 {
        30
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".into(),
            chain_id: None,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RedbStorageConfig {
    /// Database file. Relative paths resolve against `storage.path`.
    pub path: Option<PathBuf>,

    /// Cache size in MB.
    pub cache: Option<usize>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    Redb(RedbStorageConfig),
    /// In-memory backend (ephemeral, data lost on restart).
    #[serde(rename = "in_memory")]
    InMemory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Redb(RedbStorageConfig {
            path: None,
            cache: None,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StorageConfig {
    /// Root directory for storage files.
    pub path: PathBuf,

    #[serde(default)]
    pub rows: StoreConfig,
}

impl StorageConfig {
    pub fn rows_path(&self) -> Option<PathBuf> {
        match &self.rows {
            StoreConfig::Redb(cfg) => Some(match &cfg.path {
                Some(p) if p.is_absolute() => p.clone(),
                Some(p) => self.path.join(p),
                None => self.path.join("rows"),
            }),
            StoreConfig::InMemory => None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            rows: StoreConfig::default(),
        }
    }
}

/// What to do when the fork point is not inside the scanned window.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeepReorgPolicy {
    /// Double the depth until the fork is found or `max_reorg_depth` is hit.
    #[default]
    Widen,
    /// Stop with an error and leave the store untouched.
    Halt,
    /// Roll back to the window floor and let re-indexing catch up.
    Warn,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct IndexerConfig {
    pub start_block: BlockNumber,
    pub concurrency: usize,
    pub max_range_blocks: u64,
    pub trace_mode: TraceMode,
    pub reorg_depth: u64,
    pub max_reorg_depth: u64,
    pub deep_reorg_policy: DeepReorgPolicy,
    pub gap_lookback: u64,
    /// Run the gap diagnostic every N iterations; zero disables it.
    pub gap_check_every: u64,
    pub poll_interval_secs: u64,
    pub stall_timeout_secs: u64,
    pub progress_every: u64,
    pub cache_capacity: usize,
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            concurrency: 8,
            max_range_blocks: 1_000,
            trace_mode: TraceMode::None,
            reorg_depth: 64,
            max_reorg_depth: 4_096,
            deep_reorg_policy: DeepReorgPolicy::default(),
            gap_lookback: 10_000,
            gap_check_every: 100,
            poll_interval_secs: 6,
            stall_timeout_secs: 30 * 60,
            progress_every: 500,
            cache_capacity: 100_000,
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransformsConfig {
    pub enabled: Vec<String>,

    /// Base registrar emitting `NameRegistered`; needed by `ens_registrations`.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub ens_registrar: Option<Address>,
}

impl Default for TransformsConfig {
    fn default() -> Self {
        Self {
            enabled: [
                "transactions",
                "internal_txs",
                "erc20_transfers",
                "erc721_transfers",
                "erc1155_transfers",
                "uncles",
                "withdrawals",
                "contracts",
                "balance_markers",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            ens_registrar: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct EnrichConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub sub_batch_size: usize,
    pub concurrency: usize,
    pub retries: usize,
    /// Upper bound of batches run after each indexing iteration.
    pub max_batches_per_iteration: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 1_000,
            sub_batch_size: 100,
            concurrency: 8,
            retries: 3,
            max_batches_per_iteration: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LeaseConfig {
    #[serde(default = "LeaseConfig::default_name")]
    pub name: String,

    pub holder: String,

    #[serde(default = "LeaseConfig::default_ttl_secs")]
    pub ttl_secs: u64,
}

impl LeaseConfig {
    fn default_name() -> String {
        "indexer".into()
    }

    fn default_ttl_secs() -> u64 {
        120
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub backoff_unit_sec: u64,
    pub backoff_factor: u32,
    pub max_backoff_sec: u64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as u32;
        let factor = (self.backoff_factor as u64).saturating_pow(exp);
        let secs = self.backoff_unit_sec.saturating_mul(factor);

        Duration::from_secs(secs.min(self.max_backoff_sec))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            backoff_unit_sec: 2,
            backoff_factor: 2,
            max_backoff_sec: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatusConfig {
    /// JSON status file rewritten on every heartbeat.
    pub path: Option<PathBuf>,

    #[serde(default = "StatusConfig::default_interval_secs")]
    pub interval_secs: u64,
}

impl StatusConfig {
    fn default_interval_secs() -> u64 {
        30
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoggingConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub max_level: tracing::Level,

    #[serde(default)]
    pub include_rpc: bool,

    #[serde(default)]
    pub include_redb: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_level: tracing::Level::INFO,
            include_rpc: Default::default(),
            include_redb: Default::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RootConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub transforms: TransformsConfig,

    #[serde(default)]
    pub enrich: EnrichConfig,

    pub lease: Option<LeaseConfig>,
    pub retries: Option<RetryConfig>,
    pub status: Option<StatusConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retries = RetryConfig {
            max_retries: 5,
            backoff_unit_sec: 1,
            backoff_factor: 3,
            max_backoff_sec: 20,
        };

        assert_eq!(retries.backoff(1), Duration::from_secs(1));
        assert_eq!(retries.backoff(2), Duration::from_secs(3));
        assert_eq!(retries.backoff(3), Duration::from_secs(9));
        assert_eq!(retries.backoff(4), Duration::from_secs(20));
        assert_eq!(retries.backoff(100), Duration::from_secs(20));
    }

    #[test]
    fn relative_store_path_joins_root() {
        let storage = StorageConfig {
            path: PathBuf::from("/var/ethdex"),
            rows: StoreConfig::Redb(RedbStorageConfig {
                path: Some(PathBuf::from("mainnet.redb")),
                cache: None,
            }),
        };

        assert_eq!(
            storage.rows_path(),
            Some(PathBuf::from("/var/ethdex/mainnet.redb"))
        );
    }

    #[test]
    fn default_transforms_are_registrable() {
        let chain = crate::TransformChain::from_config(&TransformsConfig::default()).unwrap();
        assert_eq!(chain.names().len(), 9);
    }

    #[test]
    fn reorg_policy_parses_snake_case() {
        let policy: DeepReorgPolicy = serde_json::from_str("\"halt\"").unwrap();
        assert_eq!(policy, DeepReorgPolicy::Halt);
    }
}
