use opentelemetry::{global, metrics::Counter, KeyValue};

use crate::{ChainId, Family, TableName};

#[derive(Clone)]
pub struct Metrics {
    pub blocks: Counter<u64>,
    pub reorgs: Counter<u64>,
    pub rows_deleted: Counter<u64>,
    pub balances: Counter<u64>,
}

impl Metrics {
    pub fn new() -> Self {
        let meter = global::meter("ethdex");

        Self {
            blocks: meter.u64_counter("indexed_blocks").build(),
            reorgs: meter.u64_counter("reorgs").build(),
            rows_deleted: meter.u64_counter("rows_deleted").build(),
            balances: meter.u64_counter("enriched_balances").build(),
        }
    }

    pub fn register_blocks(&self, chain_id: ChainId, family: Family, count: u64) {
        self.blocks.add(
            count,
            &[
                KeyValue::new("chain_id", chain_id.to_string()),
                KeyValue::new("family", family.as_str()),
            ],
        );
    }

    pub fn register_reorg(&self, chain_id: ChainId) {
        self.reorgs
            .add(1, &[KeyValue::new("chain_id", chain_id.to_string())]);
    }

    pub fn register_deleted(&self, table: TableName, count: u64) {
        self.rows_deleted
            .add(count, &[KeyValue::new("table", table)]);
    }

    pub fn register_balances(&self, chain_id: ChainId, count: u64) {
        self.balances
            .add(count, &[KeyValue::new("chain_id", chain_id.to_string())]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
