//! Derived tables.
//!
//! A [`Transform`] turns one raw block into the rows of one derived table.
//! Transforms are pure with respect to the block: running one twice over the
//! same block yields the same batch, which is what lets reorg repair and gap
//! backfill re-derive ranges that were already seen.

use serde::Serialize;
use thiserror::Error;

use crate::{
    config::TransformsConfig, Block, MetadataCache, MutationBatch, TableName, Word,
};

mod chain_data;
mod contracts;
mod ens;
mod tokens;
mod txs;

pub use chain_data::{UncleRow, UnclesTransform, WithdrawalsTransform};
pub use contracts::{ContractRow, ContractsTransform};
pub use ens::{EnsRegistrationRow, EnsTransform, NAME_REGISTERED_TOPIC};
pub use tokens::{
    BalanceMarkersTransform, Erc1155Transform, Erc20Transform, Erc721Transform, MultiTokenRow,
    TransferRow, TRANSFER_BATCH_TOPIC, TRANSFER_SINGLE_TOPIC, TRANSFER_TOPIC,
};
pub use txs::{InternalTxRow, InternalTxsTransform, TransactionRow, TransactionsTransform};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("payload decoding error: {0}")]
    Decoding(String),

    #[error("row encoding error: {0}")]
    Encoding(String),

    #[error("malformed log {log_index}: {reason}")]
    MalformedLog { log_index: u32, reason: String },

    #[error("unknown transform {0}")]
    Unknown(String),

    #[error("transform {0} needs configuration: {1}")]
    Misconfigured(&'static str, &'static str),
}

impl From<bincode::Error> for TransformError {
    fn from(value: bincode::Error) -> Self {
        TransformError::Decoding(value.to_string())
    }
}

pub(crate) fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>, TransformError> {
    bincode::serialize(row).map_err(|e| TransformError::Encoding(e.to_string()))
}

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn table(&self) -> TableName;

    fn apply(&self, block: &Block, cache: &MetadataCache) -> Result<MutationBatch, TransformError>;
}

/// The ordered set of transforms the control loop runs for every block.
#[derive(Default)]
pub struct TransformChain {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn with(mut self, transform: impl Transform + 'static) -> Self {
        self.register(Box::new(transform));
        self
    }

    pub fn from_config(config: &TransformsConfig) -> Result<Self, TransformError> {
        let mut chain = Self::new();

        for name in config.enabled.iter() {
            let transform: Box<dyn Transform> = match name.as_str() {
                "transactions" => Box::new(TransactionsTransform),
                "internal_txs" => Box::new(InternalTxsTransform),
                "erc20_transfers" => Box::new(Erc20Transform),
                "erc721_transfers" => Box::new(Erc721Transform),
                "erc1155_transfers" => Box::new(Erc1155Transform),
                "uncles" => Box::new(UnclesTransform),
                "withdrawals" => Box::new(WithdrawalsTransform),
                "contracts" => Box::new(ContractsTransform),
                "balance_markers" => Box::new(BalanceMarkersTransform),
                "ens_registrations" => {
                    let registrar = config.ens_registrar.ok_or(TransformError::Misconfigured(
                        "ens_registrations",
                        "ens_registrar",
                    ))?;

                    Box::new(EnsTransform::new(registrar))
                }
                other => return Err(TransformError::Unknown(other.to_string())),
            };

            chain.register(transform);
        }

        Ok(chain)
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Runs every transform over `block`, failing on the first error.
    pub fn apply(
        &self,
        block: &Block,
        cache: &MetadataCache,
    ) -> Result<Vec<MutationBatch>, (&'static str, TransformError)> {
        self.transforms
            .iter()
            .map(|t| t.apply(block, cache).map_err(|e| (t.name(), e)))
            .collect()
    }
}

/// Decodes a 0x-prefixed 32-byte hex literal at compile time.
pub(crate) const fn topic(hex: &str) -> Word {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => panic!("invalid hex digit"),
        }
    }

    let bytes = hex.as_bytes();
    assert!(bytes.len() == 66, "topic must be 0x + 64 hex digits");

    let mut out = [0u8; 32];
    let mut i = 0;

    while i < 32 {
        out[i] = (nibble(bytes[2 + i * 2]) << 4) | nibble(bytes[3 + i * 2]);
        i += 1;
    }

    out
}

/// Reads the 32-byte ABI word at `offset`.
pub(crate) fn abi_word(data: &[u8], offset: usize) -> Option<Word> {
    let slice = data.get(offset..offset.checked_add(32)?)?;
    slice.try_into().ok()
}

/// Reads an ABI word that must fit in a `usize` (offsets and lengths).
pub(crate) fn abi_usize(data: &[u8], offset: usize) -> Option<usize> {
    let word = abi_word(data, offset)?;

    if word[..24].iter().any(|x| *x != 0) {
        return None;
    }

    let value = u64::from_be_bytes(word[24..].try_into().ok()?);
    usize::try_from(value).ok()
}

pub(crate) fn log_subkey(log_index: u32) -> [u8; 4] {
    log_index.to_be_bytes()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_literal_decodes() {
        let word = topic("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
        assert_eq!(hex::encode(word), "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
    }

    #[test]
    fn registers_known_names() {
        let config = TransformsConfig {
            enabled: vec!["transactions".into(), "erc20_transfers".into()],
            ens_registrar: None,
        };

        let chain = TransformChain::from_config(&config).unwrap();
        assert_eq!(chain.names(), vec!["transactions", "erc20_transfers"]);
    }

    #[test]
    fn rejects_unknown_names() {
        let config = TransformsConfig {
            enabled: vec!["nfts".into()],
            ens_registrar: None,
        };

        assert!(matches!(
            TransformChain::from_config(&config),
            Err(TransformError::Unknown(_))
        ));
    }

    #[test]
    fn ens_requires_registrar() {
        let config = TransformsConfig {
            enabled: vec!["ens_registrations".into()],
            ens_registrar: None,
        };

        assert!(matches!(
            TransformChain::from_config(&config),
            Err(TransformError::Misconfigured(..))
        ));
    }

    #[test]
    fn abi_usize_rejects_huge_words() {
        let mut data = vec![0u8; 32];
        data[0] = 1;
        assert_eq!(abi_usize(&data, 0), None);

        let mut data = vec![0u8; 32];
        data[31] = 64;
        assert_eq!(abi_usize(&data, 0), Some(64));
    }
}
