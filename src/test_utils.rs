//! Scripted ledger and payload fixtures shared by the unit tests

use crate::chain::{BlockId, ConfirmationTracker, LedgerClient, Network, Web3Provider};
use crate::config::{NetworkConfig, ProviderConfig, ProviderSettings};
use crate::error::ProviderResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, H256, U256};
use ethers::utils::keccak256;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SENDER: &str = "0x1111111111111111111111111111111111111111";
pub const RECEIVER: &str = "0x2222222222222222222222222222222222222222";
pub const CHAIN_ID: u64 = 1337;

fn quantity(n: u64) -> Value {
    json!(format!("{:#x}", n))
}

fn block_hash(number: u64) -> H256 {
    H256::from_low_u64_be(0xb10c_0000 + number)
}

/// Raw `eth_getBlockByNumber` payload
pub fn block_json(number: u64, base_fee: Option<U256>) -> Value {
    let mut block = json!({
        "number": quantity(number),
        "hash": block_hash(number),
        "parentHash": block_hash(number.saturating_sub(1)),
        "gasLimit": quantity(30_000_000),
        "gasUsed": quantity(21_000),
        "size": quantity(544),
        "timestamp": quantity(1_700_000_000 + number * 12),
        "difficulty": "0x0",
        "totalDifficulty": "0xc70d815d562d3cfa955",
        "transactions": [],
    });
    if let Some(base_fee) = base_fee {
        block["baseFeePerGas"] = json!(base_fee);
    }
    block
}

fn log_json(tx_hash: H256, block_number: u64, index: u64) -> Value {
    json!({
        "address": RECEIVER,
        "topics": [H256::from_low_u64_be(0xe0 + index)],
        "data": "0x",
        "blockHash": block_hash(block_number),
        "blockNumber": quantity(block_number),
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "logIndex": quantity(index),
        "removed": false,
    })
}

/// Raw `eth_getTransactionReceipt` payload, with the sender's nonce folded in
pub fn receipt_json(tx_hash: H256, status: u64, block_number: u64, nonce: u64) -> Value {
    json!({
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": block_hash(block_number),
        "blockNumber": quantity(block_number),
        "from": SENDER,
        "to": RECEIVER,
        "cumulativeGasUsed": quantity(21_000),
        "gasUsed": quantity(21_000),
        "effectiveGasPrice": quantity(52),
        "gasPrice": quantity(50),
        "contractAddress": null,
        "logs": [
            log_json(tx_hash, block_number, 0),
            log_json(tx_hash, block_number, 1),
        ],
        "logsBloom": "0x00",
        "status": quantity(status),
        "nonce": quantity(nonce),
        "type": "0x2",
    })
}

/// Raw `eth_getTransactionByHash` payload
pub fn transaction_json(tx_hash: H256, nonce: u64) -> Value {
    json!({
        "hash": tx_hash,
        "from": SENDER,
        "to": RECEIVER,
        "nonce": quantity(nonce),
        "value": quantity(100),
        "gas": quantity(21_000),
        "gasPrice": quantity(50),
        "input": "0x",
    })
}

/// In-memory ledger that advances one block per `latest` poll
///
/// The sender's nonce moves past `receipt_nonce` after a configurable number
/// of polls; heads can be scripted to simulate reorganisations.
pub struct ScriptedLedger {
    chain_id: u64,
    status: u64,
    receipt_block: u64,
    receipt_nonce: u64,
    nonce_settles_after: usize,
    head: AtomicU64,
    head_step: u64,
    scripted_heads: Mutex<VecDeque<u64>>,
    base_fee: Option<U256>,
    priority_fee: Option<U256>,
    nonce_polls: AtomicUsize,
    block_polls: AtomicUsize,
    calls: AtomicUsize,
    snapshots: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<Bytes>>,
    pub reverted: Mutex<Vec<String>>,
    pub opened_with: Mutex<Vec<Option<String>>>,
}

impl Default for ScriptedLedger {
    fn default() -> Self {
        Self {
            chain_id: CHAIN_ID,
            status: 1,
            receipt_block: 10,
            receipt_nonce: 0,
            nonce_settles_after: 1,
            head: AtomicU64::new(10),
            head_step: 1,
            scripted_heads: Mutex::new(VecDeque::new()),
            base_fee: Some(U256::from(7)),
            priority_fee: Some(U256::from(2)),
            nonce_polls: AtomicUsize::new(0),
            block_polls: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            snapshots: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            reverted: Mutex::new(Vec::new()),
            opened_with: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_status(mut self, status: u64) -> Self {
        self.status = status;
        self
    }

    pub fn with_base_fee(mut self, base_fee: Option<U256>) -> Self {
        self.base_fee = base_fee;
        self
    }

    pub fn with_priority_fee(mut self, priority_fee: Option<U256>) -> Self {
        self.priority_fee = priority_fee;
        self
    }

    pub fn with_nonce_settling_after(mut self, polls: usize) -> Self {
        self.nonce_settles_after = polls;
        self
    }

    pub fn with_head_step(mut self, step: u64) -> Self {
        self.head_step = step;
        self
    }

    /// Heads returned by successive `latest` polls before stepping resumes
    pub fn with_heads(self, heads: impl IntoIterator<Item = u64>) -> Self {
        *self.scripted_heads.lock().unwrap() = heads.into_iter().collect();
        self
    }

    pub fn receipt_block(&self) -> u64 {
        self.receipt_block
    }

    pub fn nonce_polls(&self) -> usize {
        self.nonce_polls.load(Ordering::SeqCst)
    }

    pub fn block_polls(&self) -> usize {
        self.block_polls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn next_head(&self) -> u64 {
        if let Some(head) = self.scripted_heads.lock().unwrap().pop_front() {
            self.head.store(head, Ordering::SeqCst);
            return head;
        }
        self.head.fetch_add(self.head_step, Ordering::SeqCst) + self.head_step
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn chain_id(&self) -> ProviderResult<u64> {
        self.touch();
        Ok(self.chain_id)
    }

    async fn gas_price(&self) -> ProviderResult<U256> {
        self.touch();
        Ok(U256::from(50))
    }

    async fn max_priority_fee(&self) -> ProviderResult<Option<U256>> {
        self.touch();
        Ok(self.priority_fee)
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> ProviderResult<U256> {
        self.touch();
        Ok(U256::from(21_000))
    }

    async fn get_block(&self, id: BlockId) -> ProviderResult<Option<Value>> {
        self.touch();
        let number = match id {
            BlockId::Latest => {
                self.block_polls.fetch_add(1, Ordering::SeqCst);
                self.next_head()
            }
            BlockId::Earliest => 0,
            BlockId::Number(n) if n <= self.head.load(Ordering::SeqCst) => n,
            BlockId::Number(_) | BlockId::Pending | BlockId::Hash(_) => return Ok(None),
        };
        Ok(Some(block_json(number, self.base_fee)))
    }

    async fn get_transaction_count(&self, _address: Address) -> ProviderResult<u64> {
        self.touch();
        let polls = self.nonce_polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls >= self.nonce_settles_after {
            Ok(self.receipt_nonce + 1)
        } else {
            Ok(self.receipt_nonce)
        }
    }

    async fn get_balance(&self, _address: Address) -> ProviderResult<U256> {
        self.touch();
        Ok(U256::exp10(18))
    }

    async fn get_code(&self, _address: Address) -> ProviderResult<Bytes> {
        self.touch();
        Ok(Bytes::default())
    }

    async fn call(&self, _tx: &TypedTransaction) -> ProviderResult<Bytes> {
        self.touch();
        Ok(Bytes::from(vec![0x2a]))
    }

    async fn get_transaction(&self, hash: H256) -> ProviderResult<Option<Value>> {
        self.touch();
        if hash.is_zero() {
            return Ok(None);
        }
        Ok(Some(transaction_json(hash, self.receipt_nonce)))
    }

    async fn wait_for_receipt(&self, hash: H256) -> ProviderResult<Value> {
        self.touch();
        Ok(receipt_json(
            hash,
            self.status,
            self.receipt_block,
            self.receipt_nonce,
        ))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ProviderResult<H256> {
        self.touch();
        let hash = H256::from(keccak256(&raw));
        self.sent.lock().unwrap().push(raw);
        Ok(hash)
    }

    async fn get_logs(&self, _filter: &Filter) -> ProviderResult<Vec<Value>> {
        self.touch();
        let tx_hash = H256::repeat_byte(0xee);
        Ok(vec![
            log_json(tx_hash, self.receipt_block, 0),
            log_json(tx_hash, self.receipt_block, 1),
        ])
    }

    async fn snapshot(&self) -> ProviderResult<String> {
        self.touch();
        let mut snapshots = self.snapshots.lock().unwrap();
        let id = format!("{:#x}", snapshots.len() + 1);
        snapshots.push(id.clone());
        Ok(id)
    }

    async fn revert(&self, snapshot_id: &str) -> ProviderResult<bool> {
        self.touch();
        let mut snapshots = self.snapshots.lock().unwrap();
        match snapshots.iter().position(|id| id == snapshot_id) {
            Some(index) => {
                snapshots.truncate(index);
                self.reverted.lock().unwrap().push(snapshot_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub fn provider_config(development: bool) -> ProviderConfig {
    ProviderConfig {
        name: "scripted".to_string(),
        development,
        data_folder: PathBuf::from("target/ledger-provider-test"),
        request_header: Some("ledger-provider-tests".to_string()),
        settings: ProviderSettings {
            uri: Some("http://127.0.0.1:8545".to_string()),
            ..ProviderSettings::default()
        },
    }
}

pub fn network(required_confirmations: u64) -> Network {
    Network::from_config(&NetworkConfig {
        name: "devnet".to_string(),
        ecosystem: Default::default(),
        chain_id: Some(CHAIN_ID),
        required_confirmations: Some(required_confirmations),
    })
}

/// Provider whose sessions all talk to `ledger`
pub fn scripted_provider(ledger: Arc<ScriptedLedger>, development: bool) -> Web3Provider {
    let factory = move |settings: &ProviderSettings| -> ProviderResult<Arc<dyn LedgerClient>> {
        ledger.opened_with.lock().unwrap().push(settings.uri.clone());
        Ok(ledger.clone() as Arc<dyn LedgerClient>)
    };
    Web3Provider::new(provider_config(development), network(2), Arc::new(factory))
        .with_tracker(ConfirmationTracker::default())
}
