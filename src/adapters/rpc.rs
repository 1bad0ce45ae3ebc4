//! [`NodeSource`] over Ethereum JSON-RPC.
//!
//! Quantities arrive as `0x`-prefixed hex strings; everything is converted
//! into the core model on the way in so nothing downstream sees wire types.
//! A `null` block or receipt list maps to [`NodeError::NotFound`], transport
//! trouble and server-side RPC errors to [`NodeError::Transient`].

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use ethdex_core::{
    config::UpstreamConfig,
    node::{Balance, BlockData},
    Address, BalanceSubject, BlockHash, BlockNumber, CallKind, ChainId, Header, Log, NodeError,
    NodeSource, Receipt, Trace, TraceMode, Transaction, TxHash, Withdrawal, Word,
};
use futures_util::{future, stream, StreamExt as _};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::prelude::Error;

/// Selector of ERC20 `balanceOf(address)`.
const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

fn invalid(text: impl Into<String>) -> NodeError {
    NodeError::InvalidResponse(text.into())
}

fn digits(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

pub fn quantity(s: &str) -> Result<u64, NodeError> {
    u64::from_str_radix(digits(s), 16).map_err(|_| invalid(format!("bad quantity {s}")))
}

/// A 256-bit quantity or ABI word as a big-endian [`Word`].
pub fn word(s: &str) -> Result<Word, NodeError> {
    let digits = digits(s);

    if digits.is_empty() || digits.len() > 64 {
        return Err(invalid(format!("bad word {s}")));
    }

    let bytes = hex::decode(format!("{digits:0>64}")).map_err(|_| invalid(format!("bad word {s}")))?;

    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);

    Ok(out)
}

fn bytes(s: &str) -> Result<Vec<u8>, NodeError> {
    hex::decode(digits(s)).map_err(|_| invalid(format!("bad bytes {s}")))
}

fn address(s: &str) -> Result<Address, NodeError> {
    s.parse().map_err(|_| invalid(format!("bad address {s}")))
}

fn hash(s: &str) -> Result<BlockHash, NodeError> {
    s.parse().map_err(|_| invalid(format!("bad hash {s}")))
}

fn index(s: &str) -> Result<u32, NodeError> {
    u32::try_from(quantity(s)?).map_err(|_| invalid(format!("index out of range {s}")))
}

fn block_tag(number: BlockNumber) -> String {
    format!("0x{number:x}")
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHeader {
    number: String,
    hash: String,
    parent_hash: String,
    timestamp: String,
    miner: String,
    gas_used: String,
    gas_limit: String,
    #[serde(default)]
    base_fee_per_gas: Option<String>,
}

impl WireHeader {
    fn into_header(self) -> Result<Header, NodeError> {
        Ok(Header {
            number: quantity(&self.number)?,
            hash: hash(&self.hash)?,
            parent_hash: hash(&self.parent_hash)?,
            timestamp: quantity(&self.timestamp)?,
            miner: address(&self.miner)?,
            gas_used: quantity(&self.gas_used)?,
            gas_limit: quantity(&self.gas_limit)?,
            base_fee_per_gas: self.base_fee_per_gas.as_deref().map(quantity).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    hash: String,
    transaction_index: String,
    from: String,
    to: Option<String>,
    value: String,
    gas: String,
    gas_price: Option<String>,
    nonce: String,
    input: String,
}

impl WireTransaction {
    fn into_transaction(self) -> Result<Transaction, NodeError> {
        Ok(Transaction {
            hash: hash(&self.hash)?,
            index: index(&self.transaction_index)?,
            from: address(&self.from)?,
            to: self.to.as_deref().map(address).transpose()?,
            value: word(&self.value)?,
            gas: quantity(&self.gas)?,
            gas_price: self.gas_price.as_deref().map(quantity).transpose()?,
            nonce: quantity(&self.nonce)?,
            input: bytes(&self.input)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWithdrawal {
    index: String,
    validator_index: String,
    address: String,
    amount: String,
}

impl WireWithdrawal {
    fn into_withdrawal(self) -> Result<Withdrawal, NodeError> {
        Ok(Withdrawal {
            index: quantity(&self.index)?,
            validator_index: quantity(&self.validator_index)?,
            address: address(&self.address)?,
            amount_gwei: quantity(&self.amount)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(flatten)]
    header: WireHeader,
    #[serde(default)]
    transactions: Vec<WireTransaction>,
    #[serde(default)]
    uncles: Vec<String>,
    #[serde(default)]
    withdrawals: Option<Vec<WireWithdrawal>>,
}

/// Block fetched without transaction bodies.
#[derive(Debug, Deserialize)]
struct WireHashes {
    hash: String,
    #[serde(default)]
    transactions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLog {
    address: String,
    topics: Vec<String>,
    data: String,
    log_index: String,
}

impl WireLog {
    fn into_log(self) -> Result<Log, NodeError> {
        Ok(Log {
            address: address(&self.address)?,
            topics: self
                .topics
                .iter()
                .map(|t| word(t))
                .collect::<Result<_, _>>()?,
            data: bytes(&self.data)?,
            index: index(&self.log_index)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceipt {
    transaction_hash: String,
    transaction_index: String,
    /// Absent before Byzantium.
    #[serde(default)]
    status: Option<String>,
    gas_used: String,
    #[serde(default)]
    contract_address: Option<String>,
    logs: Vec<WireLog>,
}

impl WireReceipt {
    fn into_receipt(self) -> Result<Receipt, NodeError> {
        let success = match self.status.as_deref() {
            Some(status) => quantity(status)? == 1,
            None => true,
        };

        Ok(Receipt {
            tx_hash: hash(&self.transaction_hash)?,
            tx_index: index(&self.transaction_index)?,
            success,
            gas_used: quantity(&self.gas_used)?,
            contract_address: self.contract_address.as_deref().map(address).transpose()?,
            logs: self
                .logs
                .into_iter()
                .map(WireLog::into_log)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallFrame {
    #[serde(rename = "type")]
    kind: String,
    from: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    calls: Vec<CallFrame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GethTxTrace {
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    result: Option<CallFrame>,
}

fn flatten_frame(
    out: &mut Vec<Trace>,
    tx_hash: TxHash,
    tx_index: u32,
    path: Vec<u32>,
    frame: CallFrame,
) -> Result<(), NodeError> {
    out.push(Trace {
        tx_hash,
        tx_index,
        path: path.clone(),
        kind: CallKind::parse(&frame.kind),
        from: address(&frame.from)?,
        to: frame.to.as_deref().map(address).transpose()?,
        value: frame.value.as_deref().map(word).transpose()?.unwrap_or_default(),
        gas_used: frame.gas_used.as_deref().map(quantity).transpose()?.unwrap_or_default(),
        error: frame.error,
    });

    for (position, child) in frame.calls.into_iter().enumerate() {
        let mut child_path = path.clone();
        child_path.push(position as u32);
        flatten_frame(out, tx_hash, tx_index, child_path, child)?;
    }

    Ok(())
}

/// Flattens call-tracer output depth-first. `tx_hashes` backs up nodes that
/// leave `txHash` out of the result.
fn flatten_geth(traces: Vec<GethTxTrace>, tx_hashes: &[TxHash]) -> Result<Vec<Trace>, NodeError> {
    let mut out = vec![];

    for (position, trace) in traces.into_iter().enumerate() {
        let Some(frame) = trace.result else {
            continue;
        };

        let tx_hash = match (&trace.tx_hash, tx_hashes.get(position)) {
            (Some(x), _) => hash(x)?,
            (None, Some(x)) => *x,
            (None, None) => return Err(invalid(format!("no hash for traced tx {position}"))),
        };

        flatten_frame(&mut out, tx_hash, position as u32, vec![], frame)?;
    }

    Ok(out)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParityAction {
    #[serde(default)]
    call_type: Option<String>,
    #[serde(default)]
    creation_method: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    refund_address: Option<String>,
    #[serde(default)]
    balance: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParityResult {
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParityTrace {
    #[serde(rename = "type")]
    kind: String,
    action: ParityAction,
    #[serde(default)]
    result: Option<ParityResult>,
    #[serde(default)]
    error: Option<String>,
    trace_address: Vec<u32>,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    transaction_position: Option<u32>,
}

impl ParityTrace {
    /// `None` for block and uncle rewards, which belong to no transaction.
    fn into_trace(self) -> Result<Option<Trace>, NodeError> {
        let (Some(tx_hash), Some(tx_index)) = (&self.transaction_hash, self.transaction_position)
        else {
            return Ok(None);
        };

        let action = self.action;
        let result = self.result;

        let (kind, from, to, value) = match self.kind.as_str() {
            "call" => (
                CallKind::parse(action.call_type.as_deref().unwrap_or("call")),
                action.from,
                action.to,
                action.value,
            ),
            "create" => (
                CallKind::parse(action.creation_method.as_deref().unwrap_or("create")),
                action.from,
                result.as_ref().and_then(|r| r.address.clone()),
                action.value,
            ),
            "suicide" => (
                CallKind::SelfDestruct,
                action.address,
                action.refund_address,
                action.balance,
            ),
            _ => return Ok(None),
        };

        let from = from.ok_or_else(|| invalid(format!("{} trace without sender", self.kind)))?;

        Ok(Some(Trace {
            tx_hash: hash(tx_hash)?,
            tx_index,
            path: self.trace_address,
            kind,
            from: address(&from)?,
            to: to.as_deref().map(address).transpose()?,
            value: value.as_deref().map(word).transpose()?.unwrap_or_default(),
            gas_used: result
                .and_then(|r| r.gas_used)
                .as_deref()
                .map(quantity)
                .transpose()?
                .unwrap_or_default(),
            error: self.error,
        }))
    }
}

fn balance_call_data(holder: &Address) -> String {
    let mut data = BALANCE_OF.to_vec();
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(holder.as_slice());

    format!("0x{}", hex::encode(data))
}

#[derive(Clone)]
pub struct JsonRpcNode {
    http: reqwest::Client,
    url: Arc<str>,
    ids: Arc<AtomicU64>,
}

impl JsonRpcNode {
    pub fn new(config: &UpstreamConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(Error::client)?;

        Ok(Self {
            http,
            url: config.rpc_url.as_str().into(),
            ids: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, NodeError> {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        trace!(method, id, "rpc request");

        let response = self
            .http
            .post(&*self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NodeError::Transient(format!("{method}: {e}")))?;

        let status = response.status();

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NodeError::Transient(format!("{method}: http {status}")));
        }

        if !status.is_success() {
            return Err(invalid(format!("{method}: http {status}")));
        }

        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| NodeError::Transient(format!("{method}: {e}")))?;

        if let Some(err) = response.error {
            let text = format!("{method}: {} ({})", err.message, err.code);

            return Err(match err.code {
                // method not found, invalid params
                -32601 | -32602 => invalid(text),
                _ => NodeError::Transient(text),
            });
        }

        match response.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| invalid(format!("{method}: {e}"))),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, NodeError> {
        self.request(method, params)
            .await?
            .ok_or_else(|| invalid(format!("{method} returned null")))
    }

    async fn block_hashes(&self, number: BlockNumber) -> Result<WireHashes, NodeError> {
        self.request("eth_getBlockByNumber", json!([block_tag(number), false]))
            .await?
            .ok_or(NodeError::NotFound(number))
    }

    async fn balance_of(&self, subject: &BalanceSubject, block: &str) -> Result<Word, NodeError> {
        let raw: String = match &subject.token {
            None => {
                self.call("eth_getBalance", json!([subject.holder.to_string(), block]))
                    .await?
            }
            Some(token) => {
                let call = json!({
                    "to": token.to_string(),
                    "data": balance_call_data(&subject.holder),
                });

                self.call("eth_call", json!([call, block])).await?
            }
        };

        word(&raw)
    }

    async fn balance_with_retries(
        &self,
        subject: BalanceSubject,
        block: BlockNumber,
        retries: usize,
    ) -> Option<Balance> {
        let tag = block_tag(block);
        let mut attempt = 0;

        loop {
            match self.balance_of(&subject, &tag).await {
                Ok(amount) => {
                    return Some(Balance {
                        subject,
                        amount,
                        block,
                    })
                }
                Err(err) if err.is_transient() && attempt < retries => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(err) => {
                    debug!(holder = %subject.holder, token = ?subject.token, %err, "balance left unanswered");
                    return None;
                }
            }
        }
    }
}

impl NodeSource for JsonRpcNode {
    async fn chain_id(&self) -> Result<ChainId, NodeError> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        quantity(&raw)
    }

    async fn chain_head(&self) -> Result<BlockNumber, NodeError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        quantity(&raw)
    }

    async fn get_block(&self, number: BlockNumber) -> Result<BlockData, NodeError> {
        let block: WireBlock = self
            .request("eth_getBlockByNumber", json!([block_tag(number), true]))
            .await?
            .ok_or(NodeError::NotFound(number))?;

        let mut uncles = Vec::with_capacity(block.uncles.len());

        for position in 0..block.uncles.len() {
            let uncle: WireHeader = self
                .call(
                    "eth_getUncleByBlockNumberAndIndex",
                    json!([block_tag(number), format!("0x{position:x}")]),
                )
                .await?;

            uncles.push(uncle.into_header()?);
        }

        let header = block.header.into_header()?;

        if header.number != number {
            return Err(invalid(format!(
                "asked for block {number}, got {}",
                header.number
            )));
        }

        Ok(BlockData {
            header,
            transactions: block
                .transactions
                .into_iter()
                .map(WireTransaction::into_transaction)
                .collect::<Result<_, _>>()?,
            uncles,
            withdrawals: block
                .withdrawals
                .unwrap_or_default()
                .into_iter()
                .map(WireWithdrawal::into_withdrawal)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn get_block_receipts(&self, number: BlockNumber) -> Result<Vec<Receipt>, NodeError> {
        let receipts: Vec<WireReceipt> = self
            .request("eth_getBlockReceipts", json!([block_tag(number)]))
            .await?
            .ok_or(NodeError::NotFound(number))?;

        receipts.into_iter().map(WireReceipt::into_receipt).collect()
    }

    async fn get_block_traces(
        &self,
        number: BlockNumber,
        mode: TraceMode,
    ) -> Result<Vec<Trace>, NodeError> {
        match mode {
            TraceMode::None => Ok(vec![]),
            TraceMode::Geth => {
                let traces: Vec<GethTxTrace> = self
                    .call(
                        "debug_traceBlockByNumber",
                        json!([block_tag(number), { "tracer": "callTracer" }]),
                    )
                    .await?;

                let tx_hashes = if traces.iter().any(|t| t.tx_hash.is_none()) {
                    self.block_hashes(number)
                        .await?
                        .transactions
                        .iter()
                        .map(|x| hash(x))
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    vec![]
                };

                flatten_geth(traces, &tx_hashes)
            }
            TraceMode::Parity => {
                let traces: Vec<ParityTrace> = self
                    .call("trace_block", json!([block_tag(number)]))
                    .await?;

                let mut out = vec![];

                for trace in traces {
                    if let Some(trace) = trace.into_trace()? {
                        out.push(trace);
                    }
                }

                Ok(out)
            }
        }
    }

    async fn get_header(&self, number: BlockNumber) -> Result<BlockHash, NodeError> {
        let block = self.block_hashes(number).await?;
        hash(&block.hash)
    }

    async fn get_balances(
        &self,
        subjects: &[BalanceSubject],
        concurrency: usize,
        retries: usize,
    ) -> Result<Vec<Balance>, NodeError> {
        // one block for the whole set so balances are mutually consistent
        let head = self.chain_head().await?;

        let out: Vec<Balance> = stream::iter(subjects.iter().copied())
            .map(|subject| self.balance_with_retries(subject, head, retries))
            .buffer_unordered(concurrency.max(1))
            .filter_map(future::ready)
            .collect()
            .await;

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quantities_and_words() {
        assert_eq!(quantity("0x0").unwrap(), 0);
        assert_eq!(quantity("0x1b4").unwrap(), 436);
        assert!(quantity("0x").is_err());
        assert!(quantity("0xzz").is_err());

        let w = word("0x1").unwrap();
        assert_eq!(w[31], 1);
        assert!(w[..31].iter().all(|x| *x == 0));

        let full = format!("0x{}", "ff".repeat(32));
        assert_eq!(word(&full).unwrap(), [0xff; 32]);

        let too_long = format!("0x{}", "ff".repeat(33));
        assert!(word(&too_long).is_err());
        assert!(word("0x").is_err());
    }

    #[test]
    fn balance_call_data_is_selector_and_padded_holder() {
        let data = balance_call_data(&Address([0x11; 20]));

        assert_eq!(data.len(), 2 + 2 * (4 + 32));
        assert!(data.starts_with("0x70a08231000000000000000000000000"));
        assert!(data.ends_with(&"11".repeat(20)));
    }

    fn wire_header(number: u64) -> Value {
        json!({
            "number": format!("0x{number:x}"),
            "hash": format!("0x{}", "ab".repeat(32)),
            "parentHash": format!("0x{}", "cd".repeat(32)),
            "timestamp": "0x64",
            "miner": format!("0x{}", "01".repeat(20)),
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "baseFeePerGas": "0x7",
        })
    }

    #[test]
    fn decodes_block_with_transactions_and_withdrawals() {
        let mut raw = wire_header(16);

        raw["transactions"] = json!([{
            "hash": format!("0x{}", "ee".repeat(32)),
            "transactionIndex": "0x0",
            "from": format!("0x{}", "02".repeat(20)),
            "to": null,
            "value": "0xde0b6b3a7640000",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "nonce": "0x2",
            "input": "0x6080",
        }]);
        raw["uncles"] = json!([]);
        raw["withdrawals"] = json!([{
            "index": "0x9",
            "validatorIndex": "0x10",
            "address": format!("0x{}", "03".repeat(20)),
            "amount": "0x100",
        }]);

        let block: WireBlock = serde_json::from_value(raw).unwrap();
        let header = block.header.into_header().unwrap();

        assert_eq!(header.number, 16);
        assert_eq!(header.timestamp, 100);
        assert_eq!(header.base_fee_per_gas, Some(7));

        let tx = block
            .transactions
            .into_iter()
            .next()
            .unwrap()
            .into_transaction()
            .unwrap();

        assert_eq!(tx.to, None);
        assert_eq!(tx.nonce, 2);
        assert_eq!(tx.input, vec![0x60, 0x80]);
        assert_eq!(&tx.value[24..], &1_000_000_000_000_000_000u64.to_be_bytes());

        let withdrawal = block.withdrawals.unwrap().pop().unwrap().into_withdrawal().unwrap();
        assert_eq!(withdrawal.amount_gwei, 256);
        assert_eq!(withdrawal.validator_index, 16);
    }

    #[test]
    fn receipt_without_status_counts_as_success() {
        let raw = json!({
            "transactionHash": format!("0x{}", "ee".repeat(32)),
            "transactionIndex": "0x3",
            "gasUsed": "0x5208",
            "contractAddress": null,
            "logs": [{
                "address": format!("0x{}", "04".repeat(20)),
                "topics": [format!("0x{}", "aa".repeat(32))],
                "data": "0x",
                "logIndex": "0x1",
            }],
        });

        let receipt = serde_json::from_value::<WireReceipt>(raw)
            .unwrap()
            .into_receipt()
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.tx_index, 3);
        assert_eq!(receipt.logs[0].index, 1);
        assert!(receipt.logs[0].data.is_empty());
    }

    #[test]
    fn failed_receipt_status() {
        let raw = json!({
            "transactionHash": format!("0x{}", "ee".repeat(32)),
            "transactionIndex": "0x0",
            "status": "0x0",
            "gasUsed": "0x1",
            "logs": [],
        });

        let receipt = serde_json::from_value::<WireReceipt>(raw)
            .unwrap()
            .into_receipt()
            .unwrap();

        assert!(!receipt.success);
    }

    #[test]
    fn flattens_call_tree_depth_first() {
        let a = format!("0x{}", "0a".repeat(20));
        let b = format!("0x{}", "0b".repeat(20));

        let raw = json!([{
            "result": {
                "type": "CALL",
                "from": a,
                "to": b,
                "value": "0x1",
                "gasUsed": "0x10",
                "calls": [
                    {
                        "type": "DELEGATECALL",
                        "from": b,
                        "to": a,
                        "calls": [{ "type": "CREATE2", "from": a, "to": b, "value": "0x5" }],
                    },
                    { "type": "STATICCALL", "from": b, "to": a, "error": "execution reverted" },
                ],
            },
        }]);

        let traces: Vec<GethTxTrace> = serde_json::from_value(raw).unwrap();
        let tx = BlockHash([0x77; 32]);

        let flat = flatten_geth(traces, &[tx]).unwrap();

        let paths: Vec<_> = flat.iter().map(|t| t.path.clone()).collect();
        assert_eq!(paths, vec![vec![], vec![0], vec![0, 0], vec![1]]);

        assert!(flat.iter().all(|t| t.tx_hash == tx));
        assert_eq!(flat[2].kind, CallKind::Create2);
        assert_eq!(flat[2].value[31], 5);
        assert_eq!(flat[3].error.as_deref(), Some("execution reverted"));
    }

    #[test]
    fn geth_trace_without_hash_needs_block_hashes() {
        let raw = json!([{ "result": { "type": "CALL", "from": format!("0x{}", "0a".repeat(20)) } }]);
        let traces: Vec<GethTxTrace> = serde_json::from_value(raw).unwrap();

        assert!(flatten_geth(traces, &[]).is_err());
    }

    #[test]
    fn parity_traces_skip_rewards() {
        let a = format!("0x{}", "0a".repeat(20));
        let c = format!("0x{}", "0c".repeat(20));
        let tx = format!("0x{}", "99".repeat(32));

        let raw = json!([
            {
                "type": "create",
                "action": { "from": a, "value": "0x0", "creationMethod": "create" },
                "result": { "gasUsed": "0x20", "address": c },
                "traceAddress": [0],
                "transactionHash": tx,
                "transactionPosition": 2,
            },
            {
                "type": "reward",
                "action": { "author": a, "value": "0x1", "rewardType": "block" },
                "traceAddress": [],
            },
        ]);

        let traces: Vec<ParityTrace> = serde_json::from_value(raw).unwrap();

        let out: Vec<_> = traces
            .into_iter()
            .filter_map(|t| t.into_trace().unwrap())
            .collect();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, CallKind::Create);
        assert_eq!(out[0].to, Some(Address([0x0c; 20])));
        assert_eq!(out[0].tx_index, 2);
        assert_eq!(out[0].gas_used, 32);
        assert_eq!(out[0].depth(), 1);
    }
}
