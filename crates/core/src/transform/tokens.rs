use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{abi_usize, abi_word, encode_row, log_subkey, topic, Transform, TransformError};
use crate::{
    is_zero, keys, store::tables, Address, Block, Log, MetadataCache,
    MutationBatch, TableName, TxHash, Word,
};

/// `Transfer(address,address,uint256)`, shared by ERC20 and ERC721.
pub const TRANSFER_TOPIC: Word =
    topic("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// `TransferSingle(address,address,address,uint256,uint256)`
pub const TRANSFER_SINGLE_TOPIC: Word =
    topic("0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62");

/// `TransferBatch(address,address,address,uint256[],uint256[])`
pub const TRANSFER_BATCH_TOPIC: Word =
    topic("0x4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    /// Amount for ERC20, token id for ERC721.
    pub value: Word,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTokenRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub token: Address,
    pub operator: Address,
    pub from: Address,
    pub to: Address,
    pub id: Word,
    pub value: Word,
}

enum TransferKind {
    Fungible,
    NonFungible,
}

/// ERC20 and ERC721 share a signature; the token id is indexed on 721 so
/// the topic count tells them apart.
fn classify(log: &Log) -> Option<TransferKind> {
    if log.topics.first() != Some(&TRANSFER_TOPIC) {
        return None;
    }

    match (log.topics.len(), log.data.len()) {
        (3, 32) => Some(TransferKind::Fungible),
        (4, 0) => Some(TransferKind::NonFungible),
        _ => None,
    }
}

fn transfer_rows(
    block: &Block,
    wanted: fn(&TransferKind) -> bool,
) -> Result<Vec<(u32, TransferRow)>, TransformError> {
    let mut out = vec![];

    for receipt in block.decode_receipts()? {
        if !receipt.success {
            continue;
        }

        for log in receipt.logs.iter() {
            let Some(kind) = classify(log) else {
                continue;
            };

            if !wanted(&kind) {
                continue;
            }

            let value = match kind {
                TransferKind::Fungible => abi_word(&log.data, 0),
                TransferKind::NonFungible => log.topics.get(3).copied(),
            };

            let Some(value) = value else {
                continue;
            };

            let row = TransferRow {
                tx_hash: receipt.tx_hash,
                log_index: log.index,
                token: log.address,
                from: Address::from_word(&log.topics[1]),
                to: Address::from_word(&log.topics[2]),
                value,
            };

            out.push((log.index, row));
        }
    }

    Ok(out)
}

fn transfer_batch(
    table: TableName,
    block: &Block,
    wanted: fn(&TransferKind) -> bool,
) -> Result<MutationBatch, TransformError> {
    let mut batch = MutationBatch::replacing(table, block.point());

    for (log_index, row) in transfer_rows(block, wanted)? {
        let key = keys::row_key(block.chain_id, block.number, &log_subkey(log_index));
        batch.put(key, encode_row(&row)?);
    }

    Ok(batch)
}

pub struct Erc20Transform;

impl Transform for Erc20Transform {
    fn name(&self) -> &'static str {
        "erc20_transfers"
    }

    fn table(&self) -> TableName {
        tables::ERC20_TRANSFERS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        transfer_batch(self.table(), block, |k| matches!(k, TransferKind::Fungible))
    }
}

pub struct Erc721Transform;

impl Transform for Erc721Transform {
    fn name(&self) -> &'static str {
        "erc721_transfers"
    }

    fn table(&self) -> TableName {
        tables::ERC721_TRANSFERS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        transfer_batch(self.table(), block, |k| matches!(k, TransferKind::NonFungible))
    }
}

fn malformed(log: &Log, reason: &str) -> TransformError {
    TransformError::MalformedLog {
        log_index: log.index,
        reason: reason.to_string(),
    }
}

fn abi_array(data: &[u8], head_offset: usize) -> Option<Vec<Word>> {
    let start = abi_usize(data, head_offset)?;
    let len = abi_usize(data, start)?;

    if len > data.len() / 32 {
        return None;
    }

    (0..len)
        .map(|i| abi_word(data, start + 32 + i * 32))
        .collect()
}

fn decode_multi_token(log: &Log) -> Result<Vec<(Word, Word)>, TransformError> {
    let event = log.topics[0];

    if event == TRANSFER_SINGLE_TOPIC {
        let id = abi_word(&log.data, 0).ok_or_else(|| malformed(log, "missing id"))?;
        let value = abi_word(&log.data, 32).ok_or_else(|| malformed(log, "missing value"))?;
        return Ok(vec![(id, value)]);
    }

    let ids = abi_array(&log.data, 0).ok_or_else(|| malformed(log, "bad ids array"))?;
    let values = abi_array(&log.data, 32).ok_or_else(|| malformed(log, "bad values array"))?;

    if ids.len() != values.len() {
        return Err(malformed(log, "ids and values differ in length"));
    }

    Ok(ids.into_iter().zip(values).collect())
}

pub struct Erc1155Transform;

impl Transform for Erc1155Transform {
    fn name(&self) -> &'static str {
        "erc1155_transfers"
    }

    fn table(&self) -> TableName {
        tables::ERC1155_TRANSFERS
    }

    fn apply(&self, block: &Block, _: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let mut batch = MutationBatch::replacing(self.table(), block.point());

        for receipt in block.decode_receipts()? {
            if !receipt.success {
                continue;
            }

            for log in receipt.logs.iter() {
                let is_multi = matches!(
                    log.topics.first(),
                    Some(t) if *t == TRANSFER_SINGLE_TOPIC || *t == TRANSFER_BATCH_TOPIC
                );

                if !is_multi || log.topics.len() != 4 {
                    continue;
                }

                let pairs = match decode_multi_token(log) {
                    Ok(x) => x,
                    Err(err) => {
                        warn!(
                            number = block.number,
                            log_index = log.index,
                            %err,
                            "skipping erc1155 log"
                        );
                        continue;
                    }
                };

                for (position, (id, value)) in pairs.into_iter().enumerate() {
                    let row = MultiTokenRow {
                        tx_hash: receipt.tx_hash,
                        log_index: log.index,
                        token: log.address,
                        operator: Address::from_word(&log.topics[1]),
                        from: Address::from_word(&log.topics[2]),
                        to: Address::from_word(&log.topics[3]),
                        id,
                        value,
                    };

                    let mut subkey = log_subkey(log.index).to_vec();
                    subkey.extend_from_slice(&(position as u32).to_be_bytes());

                    let key = keys::row_key(block.chain_id, block.number, &subkey);
                    batch.put(key, encode_row(&row)?);
                }
            }
        }

        Ok(batch)
    }
}

/// Marks holders whose balances changed so the enrichment loop refreshes them.
///
/// Markers are keyed by subject rather than block, so they survive reorgs;
/// a marker left behind by an orphaned block only costs an extra lookup.
pub struct BalanceMarkersTransform;

impl BalanceMarkersTransform {
    fn mark(
        batch: &mut MutationBatch,
        cache: &MetadataCache,
        block: &Block,
        holder: Address,
        token: Option<Address>,
    ) -> Result<(), TransformError> {
        if holder == Address::default() {
            return Ok(());
        }

        let key = keys::balance_key(block.chain_id, &holder, token.as_ref());

        if cache.check_and_insert(&key) {
            return Ok(());
        }

        batch.put(key, encode_row(&block.number)?);

        Ok(())
    }
}

impl Transform for BalanceMarkersTransform {
    fn name(&self) -> &'static str {
        "balance_markers"
    }

    fn table(&self) -> TableName {
        tables::PENDING_BALANCES
    }

    fn apply(&self, block: &Block, cache: &MetadataCache) -> Result<MutationBatch, TransformError> {
        let mut batch = MutationBatch::new(self.table(), block.point());

        for tx in block.decode_transactions()? {
            if is_zero(&tx.value) {
                continue;
            }

            Self::mark(&mut batch, cache, block, tx.from, None)?;

            if let Some(to) = tx.to {
                Self::mark(&mut batch, cache, block, to, None)?;
            }
        }

        for (_, row) in transfer_rows(block, |k| matches!(k, TransferKind::Fungible))? {
            Self::mark(&mut batch, cache, block, row.from, Some(row.token))?;
            Self::mark(&mut batch, cache, block, row.to, Some(row.token))?;
        }

        Ok(batch)
    }
}
