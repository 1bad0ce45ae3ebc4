use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{encode_row, Transform, TransformError};
use crate::{
    keys, store::tables, Address, Block, MetadataCache, MutationBatch, TableName, TxHash,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRow {
    pub address: Address,
    pub creator: Option<Address>,
    pub tx_hash: TxHash,
    pub code_size: usize,
}

/// Contracts deployed by top-level transactions, taken from receipts.
pub struct ContractsTransform;

impl Transform for ContractsTransform {
    fn name(&self) -> &'static str {
        "contracts"
    }

    fn table(&self) -> TableName {
        tables::CONTRACTS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let txs = block.decode_transactions()?;
        let txs: HashMap<_, _> = txs.iter().map(|t| (t.index, t)).collect();

        let mut batch = MutationBatch::replacing(self.table(), block.point());

        for receipt in block.decode_receipts()? {
            let Some(address) = receipt.contract_address else {
                continue;
            };

            if !receipt.success {
                continue;
            }

            let tx = txs.get(&receipt.tx_index);

            let row = ContractRow {
                address,
                creator: tx.map(|t| t.from),
                tx_hash: receipt.tx_hash,
                code_size: tx.map(|t| t.input.len()).unwrap_or_default(),
            };

            let key = keys::row_key(block.chain_id, block.number, address.as_slice());
            batch.put(key, encode_row(&row)?);
        }

        Ok(batch)
    }
}
