use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{abi_word, encode_row, log_subkey, topic, Transform, TransformError};
use crate::{
    keys, store::tables, Address, Block, MetadataCache, MutationBatch, TableName, TxHash, Word,
};

/// `NameRegistered(uint256,address,uint256)` as emitted by the .eth base
/// registrar.
pub const NAME_REGISTERED_TOPIC: Word =
    topic("0xb3d987963d01b2f68493b4bdb130988f157ea43070d4ad840fee0466ed9370d9");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsRegistrationRow {
    pub tx_hash: TxHash,
    pub label_hash: Word,
    pub owner: Address,
    pub expires: u64,
}

pub struct EnsTransform {
    registrar: Address,
}

impl EnsTransform {
    pub fn new(registrar: Address) -> Self {
        Self { registrar }
    }
}

impl Transform for EnsTransform {
    fn name(&self) -> &'static str {
        "ens_registrations"
    }

    fn table(&self) -> TableName {
        tables::ENS_REGISTRATIONS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let mut batch = MutationBatch::replacing(self.table(), block.point());

        for receipt in block.decode_receipts()? {
            let logs = receipt.logs.iter().filter(|l| {
                l.address == self.registrar
                    && l.topics.len() == 3
                    && l.topics[0] == NAME_REGISTERED_TOPIC
            });

            for log in logs {
                let Some(expires) = abi_word(&log.data, 0) else {
                    warn!(
                        number = block.number,
                        log_index = log.index,
                        "skipping ens log without expiry"
                    );
                    continue;
                };

                let mut tail = [0u8; 8];
                tail.copy_from_slice(&expires[24..]);

                let row = EnsRegistrationRow {
                    tx_hash: receipt.tx_hash,
                    label_hash: log.topics[1],
                    owner: Address::from_word(&log.topics[2]),
                    expires: u64::from_be_bytes(tail),
                };

                let key = keys::row_key(block.chain_id, block.number, &log_subkey(log.index));
                batch.put(key, encode_row(&row)?);
            }
        }

        Ok(batch)
    }
}
