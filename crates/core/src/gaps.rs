use std::collections::BTreeMap;

use itertools::Itertools as _;

use tracing::{info, warn};

use crate::{keys, BlockNumber, ChainId, MutationStore, StoreError, TableName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingRange {
    pub start: BlockNumber,
    pub end: BlockNumber,
}

impl MissingRange {
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapReport {
    pub window: Option<(BlockNumber, BlockNumber)>,
    pub missing: Vec<BlockNumber>,
    pub duplicates: Vec<BlockNumber>,
    pub placeholders: Vec<BlockNumber>,
}

impl GapReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.duplicates.is_empty() && self.placeholders.is_empty()
    }

    /// Numbers that need a backfill: missing or only scheduled.
    pub fn unindexed(&self) -> Vec<BlockNumber> {
        self.missing
            .iter()
            .chain(self.placeholders.iter())
            .copied()
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Collapses [`GapReport::unindexed`] into contiguous ranges.
    pub fn missing_ranges(&self) -> Vec<MissingRange> {
        let mut out: Vec<MissingRange> = vec![];

        for number in self.unindexed() {
            match out.last_mut() {
                Some(last) if last.end + 1 == number => last.end = number,
                _ => out.push(MissingRange {
                    start: number,
                    end: number,
                }),
            }
        }

        out
    }
}

#[derive(Default)]
struct Tally {
    real: usize,
    placeholder: bool,
}

/// Read-only audit of the most recent block numbers of a one-row-per-block
/// table.
pub struct GapDetector<S> {
    store: S,
}

impl<S: MutationStore> GapDetector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Scans the last `lookback` numbers up to the stored tip of `table`.
    pub fn find_gaps(
        &self,
        chain_id: ChainId,
        table: TableName,
        lookback: u64,
    ) -> Result<GapReport, StoreError> {
        let range = keys::prefix_range(&keys::chain_prefix(chain_id));

        let tip = self
            .store
            .last_row(table, range)?
            .and_then(|(key, _)| keys::split_row_key(&key).map(|(_, number, _)| number));

        let Some(tip) = tip else {
            return Ok(GapReport::default());
        };

        if lookback == 0 {
            return Ok(GapReport::default());
        }

        let floor = tip.saturating_sub(lookback - 1);

        self.scan_window(chain_id, table, floor, tip)
    }

    /// Scans `start..=end` regardless of where the stored tip is.
    pub fn scan_window(
        &self,
        chain_id: ChainId,
        table: TableName,
        start: BlockNumber,
        end: BlockNumber,
    ) -> Result<GapReport, StoreError> {
        let mut tallies: BTreeMap<BlockNumber, Tally> = BTreeMap::new();

        for row in self
            .store
            .iter_rows(table, keys::number_range(chain_id, start, end))?
        {
            let (key, value) = row?;

            let Some((_, number, _)) = keys::split_row_key(&key) else {
                continue;
            };

            let tally = tallies.entry(number).or_default();

            if value == [keys::PLACEHOLDER_SENTINEL] {
                tally.placeholder = true;
            } else {
                tally.real += 1;
            }
        }

        let mut report = GapReport {
            window: Some((start, end)),
            ..Default::default()
        };

        for number in start..=end {
            match tallies.get(&number) {
                None => report.missing.push(number),
                Some(t) if t.real > 1 => report.duplicates.push(number),
                Some(t) if t.real == 0 && t.placeholder => report.placeholders.push(number),
                Some(_) => (),
            }
        }

        if report.is_clean() {
            info!(chain_id, table, start, end, "no gaps found");
        } else {
            warn!(
                chain_id,
                table,
                start,
                end,
                missing = report.missing.len(),
                duplicates = report.duplicates.len(),
                placeholders = report.placeholders.len(),
                "gaps found"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_contiguous_numbers() {
        let report = GapReport {
            window: Some((0, 100)),
            missing: vec![3, 4, 5, 9],
            duplicates: vec![7],
            placeholders: vec![6, 20],
        };

        assert_eq!(
            report.missing_ranges(),
            vec![
                MissingRange { start: 3, end: 6 },
                MissingRange { start: 9, end: 9 },
                MissingRange { start: 20, end: 20 },
            ]
        );
    }

    #[test]
    fn empty_report_is_clean() {
        let report = GapReport::default();

        assert!(report.is_clean());
        assert!(report.missing_ranges().is_empty());
    }
}
