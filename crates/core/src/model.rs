//! Typed records carried inside the block payload blobs.

use serde::{Deserialize, Serialize};

use crate::{Address, BlockHash, BlockNumber, TxHash, Word};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub timestamp: u64,
    pub miner: Address,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: TxHash,
    pub index: u32,
    pub from: Address,
    pub to: Option<Address>,
    pub value: Word,
    pub gas: u64,
    pub gas_price: Option<u64>,
    pub nonce: u64,
    pub input: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Word>,
    pub data: Vec<u8>,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub tx_index: u32,
    pub success: bool,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    Call,
    DelegateCall,
    StaticCall,
    CallCode,
    Create,
    Create2,
    SelfDestruct,
    Other,
}

impl CallKind {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "CALL" => Self::Call,
            "DELEGATECALL" => Self::DelegateCall,
            "STATICCALL" => Self::StaticCall,
            "CALLCODE" => Self::CallCode,
            "CREATE" => Self::Create,
            "CREATE2" => Self::Create2,
            "SELFDESTRUCT" | "SUICIDE" => Self::SelfDestruct,
            _ => Self::Other,
        }
    }
}

/// One frame of a call trace, flattened in depth-first order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub tx_hash: TxHash,
    pub tx_index: u32,
    /// Position of the frame inside its transaction's call tree.
    pub path: Vec<u32>,
    pub kind: CallKind,
    pub from: Address,
    pub to: Option<Address>,
    pub value: Word,
    pub gas_used: u64,
    pub error: Option<String>,
}

impl Trace {
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub index: u64,
    pub validator_index: u64,
    pub address: Address,
    pub amount_gwei: u64,
}

pub fn is_zero(word: &Word) -> bool {
    word.iter().all(|x| *x == 0)
}

pub fn word_from_u64(value: u64) -> Word {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}
