#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use alloy_primitives::U256;
use async_trait::async_trait;
use blockdb_evm::{
    ingestion::ChainReader,
    models::{Block, SortOrder, StoredTransaction, Transaction},
    provider::{JsonRpcProvider, JsonRpcProviderError, JsonRpcProviderOptions},
    store::{BlockStore, MemoryStore, StoreError},
};
use error_stack::{Report, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use testcontainers::{core::WaitFor, images::generic::GenericImage};
use wiremock::{http::Method, Match, MockServer, Request, Respond, ResponseTemplate};

pub fn new_block(number: u64) -> Block {
    Block {
        hash: format!("0xb{number}"),
        number,
        timestamp: 1_700_000_000 + number,
        parent_hash: format!("0xb{}", number.saturating_sub(1)),
        nonce: "0x0000000000000000".to_string(),
        difficulty: U256::from(1),
        gas_limit: U256::from(15_000_000),
        gas_used: U256::from(21_000),
        miner: "0x0100000000000000000000000000000000000000".to_string(),
        extra_data: "0x".to_string(),
        base_fee_per_gas: Some(U256::from(25_000_000_000u64)),
    }
}

pub fn new_transaction(
    block_number: u64,
    index: u64,
    from: &str,
    to: Option<&str>,
    value: U256,
) -> Transaction {
    Transaction {
        hash: format!("0xt{block_number}_{index}"),
        block_number,
        block_hash: format!("0xb{block_number}"),
        index,
        tx_type: 2,
        to: to.map(str::to_string),
        from: from.to_string(),
        nonce: index,
        gas_limit: U256::from(21_000),
        gas_price: Some(U256::from(25_000_000_000u64)),
        data: "0x".to_string(),
        value,
        chain_id: Some(U256::from(43_114)),
    }
}

/// Provider options that retry quickly.
pub fn fast_provider_options() -> JsonRpcProviderOptions {
    JsonRpcProviderOptions {
        timeout: Duration::from_secs(2),
        max_retries: 2,
        retry_min_delay: Duration::from_millis(10),
        ..JsonRpcProviderOptions::default()
    }
}

pub fn new_provider(server: &MockServer) -> JsonRpcProvider {
    let url = server.uri().parse().expect("mock server url");
    JsonRpcProvider::new(url, fast_provider_options()).expect("provider")
}

/// A chain with blocks `0..=height`, each with a fixed number of transactions.
pub struct FakeChain {
    pub height: u64,
    pub transactions_per_block: u64,
    pub failing_height: bool,
    pub failing_transactions: HashSet<String>,
    pub balances: HashMap<String, U256>,
}

impl FakeChain {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            transactions_per_block: 2,
            failing_height: false,
            failing_transactions: HashSet::default(),
            balances: HashMap::default(),
        }
    }

    pub fn with_balance(mut self, address: &str, balance: u64) -> Self {
        self.balances
            .insert(address.to_string(), U256::from(balance));
        self
    }

    pub fn transactions_for(&self, number: u64) -> Vec<Transaction> {
        (0..self.transactions_per_block)
            .map(|index| {
                new_transaction(
                    number,
                    index,
                    &format!("0xsender{index}"),
                    Some("0xreceiver"),
                    U256::from(number * 10 + index),
                )
            })
            .collect()
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn current_height(&self) -> Result<u64, JsonRpcProviderError> {
        if self.failing_height {
            return Err(Report::new(JsonRpcProviderError::Timeout));
        }
        Ok(self.height)
    }

    async fn fetch_range(&self, start: u64, end: u64) -> Result<Vec<Block>, JsonRpcProviderError> {
        if end > self.height {
            return Err(Report::new(JsonRpcProviderError::NotFound));
        }
        Ok((start..=end).map(new_block).collect())
    }

    async fn fetch_transactions(
        &self,
        block_hashes: &[String],
    ) -> Result<Vec<Transaction>, JsonRpcProviderError> {
        let mut transactions = Vec::new();
        for hash in block_hashes {
            if self.failing_transactions.contains(hash) {
                return Err(Report::new(JsonRpcProviderError::ServerError));
            }
            let number = hash
                .strip_prefix("0xb")
                .and_then(|n| n.parse::<u64>().ok())
                .ok_or_else(|| Report::new(JsonRpcProviderError::NotFound))?;
            transactions.extend(self.transactions_for(number));
        }
        Ok(transactions)
    }

    async fn balance_of(&self, address: &str) -> Result<U256, JsonRpcProviderError> {
        self.balances
            .get(address)
            .copied()
            .ok_or_else(|| Report::new(JsonRpcProviderError::Rpc))
    }
}

/// A memory store that refuses to save some blocks.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub failing_blocks: HashSet<u64>,
}

impl FailingStore {
    pub fn failing_on(numbers: impl IntoIterator<Item = u64>) -> Self {
        Self {
            inner: MemoryStore::default(),
            failing_blocks: numbers.into_iter().collect(),
        }
    }
}

#[async_trait]
impl BlockStore for FailingStore {
    async fn save_blocks(&self, blocks: &[Block]) -> Result<usize, StoreError> {
        if blocks
            .iter()
            .any(|block| self.failing_blocks.contains(&block.number))
        {
            return Err(Report::new(StoreError::Write));
        }
        self.inner.save_blocks(blocks).await
    }

    async fn save_transactions(&self, transactions: &[Transaction]) -> Result<usize, StoreError> {
        self.inner.save_transactions(transactions).await
    }

    async fn transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        self.inner.transactions_by_address(address).await
    }

    async fn transactions_sorted_by_value(
        &self,
        order: SortOrder,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        self.inner
            .transactions_sorted_by_value(order, limit, offset)
            .await
    }

    async fn unique_addresses(&self) -> Result<Vec<String>, StoreError> {
        self.inner.unique_addresses().await
    }
}

pub fn new_postgres_image() -> GenericImage {
    GenericImage::new("postgres", "15-alpine")
        .with_exposed_port(5432)
        .with_env_var("POSTGRES_DB", "postgres")
        .with_env_var("POSTGRES_HOST_AUTH_METHOD", "trust")
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    /// Requests without parameters omit the field.
    #[serde(default)]
    params: Value,
}

pub struct RpcRequestMatcher {
    method: String,
    params: Value,
}

pub struct RpcResponse {
    result: Value,
}

pub struct RpcErrorResponse {
    message: String,
}

pub fn rpc_request<P>(method: impl Into<String>, params: P) -> RpcRequestMatcher
where
    P: serde::Serialize,
{
    RpcRequestMatcher {
        method: method.into(),
        params: serde_json::to_value(params).expect("failed to serialize JSON params"),
    }
}

impl RpcResponse {
    pub fn new(result: Value) -> Self {
        Self { result }
    }
}

impl RpcErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Match for RpcRequestMatcher {
    fn matches(&self, req: &Request) -> bool {
        if req.method != Method::Post {
            return false;
        }

        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            let params = match rpc_req.params {
                Value::Null => json!([]),
                params => params,
            };
            rpc_req.method == self.method && params == self.params
        } else {
            false
        }
    }
}

impl Respond for RpcResponse {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_req.id,
                "result": self.result,
            }))
        } else {
            ResponseTemplate::new(400)
        }
    }
}

impl Respond for RpcErrorResponse {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_req.id,
                "error": {
                    "code": -32602,
                    "message": self.message,
                }
            }))
        } else {
            ResponseTemplate::new(400)
        }
    }
}

pub const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// A 32 bytes hash whose value is `value`.
pub fn hash(value: u64) -> String {
    format!("{value:#066x}")
}

/// A 20 bytes address whose value is `value`.
pub fn address(value: u64) -> String {
    format!("{value:#042x}")
}

pub fn rpc_block_hash(number: u64) -> String {
    hash(0xb000_0000 + number)
}

/// A header as returned by the `newHeads` subscription.
pub fn rpc_header(number: u64) -> Value {
    json!({
        "hash": rpc_block_hash(number),
        "parentHash": rpc_block_hash(number.saturating_sub(1)),
        "sha3Uncles": ZERO_HASH,
        "miner": "0x0100000000000000000000000000000000000000",
        "stateRoot": ZERO_HASH,
        "transactionsRoot": ZERO_HASH,
        "receiptsRoot": ZERO_HASH,
        "logsBloom": format!("0x{}", "0".repeat(512)),
        "difficulty": "0x1",
        "number": format!("{number:#x}"),
        "gasLimit": "0xe4e1c0",
        "gasUsed": "0x5208",
        "timestamp": "0x6553f100",
        "extraData": "0x",
        "mixHash": ZERO_HASH,
        "nonce": "0x0000000000000000",
        "baseFeePerGas": "0x5d21dba00",
    })
}

/// A block as returned by `eth_getBlockBy*`, with transaction hashes only.
pub fn rpc_block(number: u64, transactions: &[String]) -> Value {
    let mut block = rpc_header(number);
    block["transactions"] = json!(transactions);
    block["uncles"] = json!([]);
    block
}

/// A dynamic fee transaction as returned by `eth_getTransactionByHash`.
pub fn rpc_transaction(hash: &str, block_number: u64, transaction_index: u64) -> Value {
    json!({
        "hash": hash,
        "blockNumber": format!("{block_number:#x}"),
        "blockHash": rpc_block_hash(block_number),
        "transactionIndex": format!("{transaction_index:#x}"),
        "type": "0x2",
        "chainId": "0xa86a",
        "nonce": "0x1",
        "gas": "0x5208",
        "maxFeePerGas": "0x5d21dba00",
        "maxPriorityFeePerGas": "0x1",
        "to": address(0xbb),
        "from": address(0xaa),
        "value": "0xde0b6b3a7640000",
        "accessList": [],
        "input": "0x",
        "r": "0x1",
        "s": "0x1",
        "v": "0x0",
        "yParity": "0x0",
    })
}
