//! Row key layout.
//!
//! Every block-scoped row starts with `chain_id ‖ number`, both big-endian,
//! so a lexicographic range over keys is a numeric range over blocks. Raw
//! block rows append the 32-byte block hash; a placeholder row is the bare
//! 16-byte prefix.

use std::ops::Range;

use crate::{Address, BlockHash, BlockNumber, ChainId, RowKey};

pub const CHAIN_PREFIX_LEN: usize = 8;
pub const BLOCK_PREFIX_LEN: usize = 16;

/// Value stored under a placeholder key.
pub const PLACEHOLDER_SENTINEL: u8 = 0x00;

pub fn chain_prefix(chain_id: ChainId) -> RowKey {
    chain_id.to_be_bytes().to_vec()
}

pub fn block_prefix(chain_id: ChainId, number: BlockNumber) -> RowKey {
    let mut key = Vec::with_capacity(BLOCK_PREFIX_LEN);
    key.extend_from_slice(&chain_id.to_be_bytes());
    key.extend_from_slice(&number.to_be_bytes());
    key
}

pub fn row_key(chain_id: ChainId, number: BlockNumber, subkey: &[u8]) -> RowKey {
    let mut key = block_prefix(chain_id, number);
    key.extend_from_slice(subkey);
    key
}

pub fn raw_block_key(chain_id: ChainId, number: BlockNumber, hash: &BlockHash) -> RowKey {
    row_key(chain_id, number, hash.as_slice())
}

pub fn placeholder_key(chain_id: ChainId, number: BlockNumber) -> RowKey {
    block_prefix(chain_id, number)
}

/// Splits a block-scoped key into its chain, number and trailing subkey.
pub fn split_row_key(key: &[u8]) -> Option<(ChainId, BlockNumber, &[u8])> {
    if key.len() < BLOCK_PREFIX_LEN {
        return None;
    }

    let chain = u64::from_be_bytes(key[..8].try_into().ok()?);
    let number = u64::from_be_bytes(key[8..16].try_into().ok()?);

    Some((chain, number, &key[BLOCK_PREFIX_LEN..]))
}

/// Smallest key strictly greater than every key starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<RowKey> {
    let mut out = prefix.to_vec();

    while let Some(last) = out.pop() {
        if last < u8::MAX {
            out.push(last + 1);
            return Some(out);
        }
    }

    None
}

// Keys never exceed a few hundred bytes, so this bounds every real key.
const UNBOUNDED_END: [u8; 256] = [u8::MAX; 256];

pub fn prefix_range(prefix: &[u8]) -> Range<RowKey> {
    let end = prefix_successor(prefix).unwrap_or_else(|| UNBOUNDED_END.to_vec());
    prefix.to_vec()..end
}

/// Key range covering every row of blocks `start..=end` on one chain.
pub fn number_range(chain_id: ChainId, start: BlockNumber, end: BlockNumber) -> Range<RowKey> {
    let from = block_prefix(chain_id, start);

    let to = match end.checked_add(1) {
        Some(next) => block_prefix(chain_id, next),
        None => prefix_range(&chain_prefix(chain_id)).end,
    };

    from..to
}

/// Key range covering blocks `start..` on one chain.
pub fn suffix_range(chain_id: ChainId, start: BlockNumber) -> Range<RowKey> {
    number_range(chain_id, start, BlockNumber::MAX)
}

/// The key that immediately follows `key` in lexicographic order.
pub fn key_after(key: &[u8]) -> RowKey {
    let mut out = key.to_vec();
    out.push(0);
    out
}

pub fn balance_key(chain_id: ChainId, holder: &Address, token: Option<&Address>) -> RowKey {
    let mut key = chain_prefix(chain_id);
    key.extend_from_slice(holder.as_slice());

    if let Some(token) = token {
        key.extend_from_slice(token.as_slice());
    }

    key
}

pub fn split_balance_key(key: &[u8]) -> Option<(ChainId, Address, Option<Address>)> {
    if key.len() < CHAIN_PREFIX_LEN + 20 {
        return None;
    }

    let chain = u64::from_be_bytes(key[..8].try_into().ok()?);
    let holder = Address::from_slice(&key[8..28])?;

    let token = match &key[28..] {
        [] => None,
        rest => Some(Address::from_slice(rest)?),
    };

    Some((chain, holder, token))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use proptest::proptest;

    use super::*;

    proptest! {
        #[test]
        fn test_key_order_follows_block_order(
            chain1 in 0u64..4,
            chain2 in 0u64..4,
            number1 in any::<u64>(),
            number2 in any::<u64>(),
            hash in any::<[u8; 32]>(),
        ) {
            let key1 = raw_block_key(chain1, number1, &BlockHash(hash));
            let key2 = placeholder_key(chain2, number2);

            let block_cmp = (chain1, number1).cmp(&(chain2, number2));

            if block_cmp != std::cmp::Ordering::Equal {
                assert_eq!(key1.cmp(&key2), block_cmp);
            }

            assert!(number_range(chain1, number1, number1).contains(&key1));
        }
    }

    #[test]
    fn numeric_order_matches_key_order() {
        let a = block_prefix(1, 255);
        let b = block_prefix(1, 256);
        let c = block_prefix(2, 0);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn raw_keys_split_back() {
        let hash = BlockHash([7; 32]);
        let key = raw_block_key(5, 42, &hash);

        let (chain, number, rest) = split_row_key(&key).unwrap();
        assert_eq!(chain, 5);
        assert_eq!(number, 42);
        assert_eq!(rest, hash.as_slice());

        let placeholder = placeholder_key(5, 42);
        let (_, _, rest) = split_row_key(&placeholder).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn number_range_bounds() {
        let range = number_range(1, 10, 12);

        assert!(range.contains(&placeholder_key(1, 10)));
        assert!(range.contains(&raw_block_key(1, 12, &BlockHash([0xff; 32]))));
        assert!(!range.contains(&placeholder_key(1, 13)));
        assert!(!range.contains(&placeholder_key(1, 9)));
    }

    #[test]
    fn suffix_range_reaches_end_of_chain() {
        let range = suffix_range(1, 5);

        assert!(range.contains(&row_key(1, u64::MAX, b"x")));
        assert!(!range.contains(&placeholder_key(2, 0)));
    }

    #[test]
    fn successor_skips_saturated_bytes() {
        assert_eq!(prefix_successor(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
    }

    #[test]
    fn balance_keys_split_back() {
        let holder = Address([1; 20]);
        let token = Address([2; 20]);

        let key = balance_key(3, &holder, Some(&token));
        assert_eq!(split_balance_key(&key), Some((3, holder, Some(token))));

        let key = balance_key(3, &holder, None);
        assert_eq!(split_balance_key(&key), Some((3, holder, None)));
    }
}
