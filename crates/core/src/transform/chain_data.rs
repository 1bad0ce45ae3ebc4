use serde::{Deserialize, Serialize};

use super::{encode_row, Transform, TransformError};
use crate::{
    keys, store::tables, Address, Block, BlockHash, BlockNumber, MetadataCache, MutationBatch,
    TableName,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncleRow {
    pub hash: BlockHash,
    pub number: BlockNumber,
    pub miner: Address,
    pub nephew: BlockHash,
}

pub struct UnclesTransform;

impl Transform for UnclesTransform {
    fn name(&self) -> &'static str {
        "uncles"
    }

    fn table(&self) -> TableName {
        tables::UNCLES
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let mut batch = MutationBatch::replacing(self.table(), block.point());

        for (position, uncle) in block.decode_uncles()?.into_iter().enumerate() {
            let row = UncleRow {
                hash: uncle.hash,
                number: uncle.number,
                miner: uncle.miner,
                nephew: block.hash,
            };

            let subkey = (position as u32).to_be_bytes();
            let key = keys::row_key(block.chain_id, block.number, &subkey);
            batch.put(key, encode_row(&row)?);
        }

        Ok(batch)
    }
}

pub struct WithdrawalsTransform;

impl Transform for WithdrawalsTransform {
    fn name(&self) -> &'static str {
        "withdrawals"
    }

    fn table(&self) -> TableName {
        tables::WITHDRAWALS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let mut batch = MutationBatch::replacing(self.table(), block.point());

        for withdrawal in block.decode_withdrawals()? {
            let key = keys::row_key(
                block.chain_id,
                block.number,
                &withdrawal.index.to_be_bytes(),
            );

            batch.put(key, encode_row(&withdrawal)?);
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{transform::fixtures::*, Header, Withdrawal};

    #[test]
    fn uncles_point_back_to_nephew() {
        let uncle = Header {
            number: 9,
            hash: BlockHash([0x99; 32]),
            parent_hash: BlockHash([0x98; 32]),
            timestamp: 0,
            miner: addr(5),
            gas_used: 0,
            gas_limit: 0,
            base_fee_per_gas: None,
        };

        let block = block(10, vec![], vec![], vec![], vec![uncle], vec![]);
        let batch = UnclesTransform.apply(&block, &MetadataCache::default()).unwrap();

        let (_, value) = batch.puts().next().unwrap();
        let row: UncleRow = bincode::deserialize(value).unwrap();

        assert_eq!(row.number, 9);
        assert_eq!(row.nephew, block.hash);
    }

    #[test]
    fn withdrawals_keyed_by_index() {
        let withdrawals = vec![
            Withdrawal {
                index: 300,
                validator_index: 1,
                address: addr(1),
                amount_gwei: 32,
            },
            Withdrawal {
                index: 301,
                validator_index: 2,
                address: addr(2),
                amount_gwei: 1,
            },
        ];

        let block = block(10, vec![], vec![], vec![], vec![], withdrawals);
        let batch = WithdrawalsTransform.apply(&block, &MetadataCache::default()).unwrap();

        let subkeys: Vec<_> = batch
            .puts()
            .map(|(k, _)| keys::split_row_key(k).unwrap().2.to_vec())
            .collect();

        assert_eq!(subkeys, vec![300u64.to_be_bytes().to_vec(), 301u64.to_be_bytes().to_vec()]);
    }

    #[test]
    fn empty_payloads_still_clear_the_block() {
        let mut block = block(10, vec![], vec![], vec![], vec![], vec![]);
        block.uncles = vec![];

        let batch = UnclesTransform.apply(&block, &MetadataCache::default()).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.puts().count(), 0);
    }
}
