use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{encode_row, Transform, TransformError};
use crate::{
    is_zero, keys, store::tables, Address, Block, CallKind, MetadataCache, MutationBatch,
    TableName, TxHash, Word,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub value: Word,
    pub nonce: u64,
    pub gas_price: Option<u64>,
    pub gas_used: Option<u64>,
    pub success: Option<bool>,
    pub created: Option<Address>,
    pub timestamp: u64,
}

pub struct TransactionsTransform;

impl Transform for TransactionsTransform {
    fn name(&self) -> &'static str {
        "transactions"
    }

    fn table(&self) -> TableName {
        tables::TRANSACTIONS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let txs = block.decode_transactions()?;
        let receipts = block.decode_receipts()?;

        let receipts: HashMap<_, _> = receipts.iter().map(|r| (r.tx_index, r)).collect();

        let mut batch = MutationBatch::replacing(self.table(), block.point());

        for tx in txs {
            let receipt = receipts.get(&tx.index);

            let row = TransactionRow {
                hash: tx.hash,
                from: tx.from,
                to: tx.to,
                value: tx.value,
                nonce: tx.nonce,
                gas_price: tx.gas_price,
                gas_used: receipt.map(|r| r.gas_used),
                success: receipt.map(|r| r.success),
                created: receipt.and_then(|r| r.contract_address),
                timestamp: block.timestamp,
            };

            let key = keys::row_key(block.chain_id, block.number, &tx.index.to_be_bytes());
            batch.put(key, encode_row(&row)?);
        }

        Ok(batch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTxRow {
    pub tx_hash: TxHash,
    pub kind: CallKind,
    pub from: Address,
    pub to: Option<Address>,
    pub value: Word,
}

/// Value-moving frames below the top-level call.
pub struct InternalTxsTransform;

impl Transform for InternalTxsTransform {
    fn name(&self) -> &'static str {
        "internal_txs"
    }

    fn table(&self) -> TableName {
        tables::INTERNAL_TXS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let traces = block.decode_traces()?;

        let mut batch = MutationBatch::replacing(self.table(), block.point());

        let relevant = traces.into_iter().filter(|t| {
            let creates = matches!(t.kind, CallKind::Create | CallKind::Create2);
            t.depth() > 0 && t.error.is_none() && (creates || !is_zero(&t.value))
        });

        for trace in relevant {
            let mut subkey = trace.tx_index.to_be_bytes().to_vec();

            for step in trace.path.iter() {
                subkey.extend_from_slice(&step.to_be_bytes());
            }

            let row = InternalTxRow {
                tx_hash: trace.tx_hash,
                kind: trace.kind,
                from: trace.from,
                to: trace.to,
                value: trace.value,
            };

            let key = keys::row_key(block.chain_id, block.number, &subkey);
            batch.put(key, encode_row(&row)?);
        }

        Ok(batch)
    }
}
