use ethdex_core::{
    node::BlockData, transform::TRANSFER_TOPIC, word_from_u64, Address, BlockHash, BlockNumber,
    CallKind, Header, Log, Receipt, Trace, Transaction, TxHash, Withdrawal, Word,
};

/// ERC20 contract every fixture block transfers on.
pub const TOKEN: Address = Address([0xee; 20]);

pub fn address(x: u8) -> Address {
    Address([x; 20])
}

pub fn address_word(x: &Address) -> Word {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(x.as_slice());
    out
}

/// Deterministic hash; different `salt`s give different forks.
pub fn block_hash(number: BlockNumber, salt: u8) -> BlockHash {
    let mut out = [salt; 32];
    out[0] = 0xb1;
    out[24..].copy_from_slice(&number.to_be_bytes());
    BlockHash(out)
}

pub fn tx_hash(number: BlockNumber, index: u32, salt: u8) -> TxHash {
    let mut out = [salt; 32];
    out[0] = 0x7a;
    out[20..28].copy_from_slice(&number.to_be_bytes());
    out[28..].copy_from_slice(&index.to_be_bytes());
    BlockHash(out)
}

/// Everything a node serves for one block.
#[derive(Debug, Clone)]
pub struct FakeBlock {
    pub data: BlockData,
    pub receipts: Vec<Receipt>,
    pub traces: Vec<Trace>,
}

impl FakeBlock {
    pub fn number(&self) -> BlockNumber {
        self.data.header.number
    }

    pub fn hash(&self) -> BlockHash {
        self.data.header.hash
    }
}

/// A block with a native transfer (`1 -> 2`), an ERC20 transfer of
/// [`TOKEN`] (`1 -> 3`) whose call also forwards value to `4`, and one
/// withdrawal.
pub fn fake_block(number: BlockNumber, salt: u8, parent_hash: BlockHash) -> FakeBlock {
    let header = Header {
        number,
        hash: block_hash(number, salt),
        parent_hash,
        timestamp: 1_700_000_000 + number * 12,
        miner: address(0x99),
        gas_used: 42_000,
        gas_limit: 30_000_000,
        base_fee_per_gas: Some(7),
    };

    let native = Transaction {
        hash: tx_hash(number, 0, salt),
        index: 0,
        from: address(1),
        to: Some(address(2)),
        value: word_from_u64(number + 1),
        gas: 21_000,
        gas_price: Some(10),
        nonce: number * 2,
        input: vec![],
    };

    let token_call = Transaction {
        hash: tx_hash(number, 1, salt),
        index: 1,
        from: address(1),
        to: Some(TOKEN),
        value: word_from_u64(0),
        gas: 60_000,
        gas_price: Some(10),
        nonce: number * 2 + 1,
        input: vec![0xa9, 0x05, 0x9c, 0xbb],
    };

    let transfer = Log {
        address: TOKEN,
        topics: vec![
            TRANSFER_TOPIC,
            address_word(&address(1)),
            address_word(&address(3)),
        ],
        data: word_from_u64(10).to_vec(),
        index: 0,
    };

    let receipts = vec![
        Receipt {
            tx_hash: native.hash,
            tx_index: 0,
            success: true,
            gas_used: 21_000,
            contract_address: None,
            logs: vec![],
        },
        Receipt {
            tx_hash: token_call.hash,
            tx_index: 1,
            success: true,
            gas_used: 21_000,
            contract_address: None,
            logs: vec![transfer],
        },
    ];

    let traces = vec![
        Trace {
            tx_hash: token_call.hash,
            tx_index: 1,
            path: vec![],
            kind: CallKind::Call,
            from: address(1),
            to: Some(TOKEN),
            value: word_from_u64(0),
            gas_used: 21_000,
            error: None,
        },
        Trace {
            tx_hash: token_call.hash,
            tx_index: 1,
            path: vec![0],
            kind: CallKind::Call,
            from: TOKEN,
            to: Some(address(4)),
            value: word_from_u64(1),
            gas_used: 2_300,
            error: None,
        },
    ];

    let withdrawals = vec![Withdrawal {
        index: number,
        validator_index: 1_000 + number,
        address: address(5),
        amount_gwei: 32,
    }];

    FakeBlock {
        data: BlockData {
            header,
            transactions: vec![native, token_call],
            uncles: vec![],
            withdrawals,
        },
        receipts,
        traces,
    }
}

/// Blocks `from..=to` chained onto `parent`.
pub fn fake_chain(
    from: BlockNumber,
    to: BlockNumber,
    salt: u8,
    parent: BlockHash,
) -> Vec<FakeBlock> {
    let mut parent = parent;
    let mut out = vec![];

    for number in from..=to {
        let block = fake_block(number, salt, parent);
        parent = block.hash();
        out.push(block);
    }

    out
}
