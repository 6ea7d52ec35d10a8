//! Common helpers for integration tests: in-memory ledgers implementing the ledger seams,
//! and a fake JSON-RPC node for exercising the real ledger clients.

#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use relay::{
    AutomationLedger, ContactInfo, DeathDeclarationStatus, DomainEvent, EventStream,
    GracePeriodInfo, Ledger, LedgerError, ObservedEvent, Origin, OwnerMirror, OwnerRecord,
    Receipt, RegistryLedger,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn owner(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn record(grace_interval: u64, is_deceased: bool) -> OwnerRecord {
    OwnerRecord {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        last_heartbeat: U256::from(1_700_000_000u64),
        grace_interval: U256::from(grace_interval),
        is_deceased,
        exists: true,
    }
}

pub fn observed(origin: Origin, event: DomainEvent, block_number: u64) -> ObservedEvent {
    ObservedEvent {
        origin,
        event,
        block_number,
        tx_hash: B256::left_padding_from(&block_number.to_be_bytes()),
        log_index: 0,
    }
}

/// Poll `cond` until it holds or `within` elapses.
pub async fn eventually<F: FnMut() -> bool>(within: Duration, mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Live event streams handed out by a mock ledger's `subscribe`.
#[derive(Default)]
pub struct Feed {
    senders: Mutex<Vec<mpsc::Sender<Result<ObservedEvent, LedgerError>>>>,
    subscribe_calls: AtomicUsize,
}

impl Feed {
    fn subscribe(&self, mut shutdown: watch::Receiver<bool>) -> (EventStream, JoinHandle<()>) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push(tx);
        let task = tokio::spawn(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        });
        (rx, task)
    }

    /// Deliver to every open stream; returns how many received it.
    pub fn emit(&self, item: Result<ObservedEvent, LedgerError>) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|s| !s.is_closed());
        senders
            .iter()
            .filter(|s| s.try_send(item.clone()).is_ok())
            .count()
    }

    pub fn active_streams(&self) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|s| !s.is_closed());
        senders.len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

/// Registry ledger held in memory.
pub struct MockRegistry {
    signer: Address,
    pub feed: Feed,
    owners: Mutex<HashMap<Address, OwnerRecord>>,
    declarations: Mutex<HashMap<Address, DeathDeclarationStatus>>,
    contacts: Mutex<HashMap<Address, Vec<ContactInfo>>>,
    read_error: Mutex<Option<LedgerError>>,
    unreachable: AtomicBool,
    block_calls: AtomicUsize,
    owner_reads: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            signer: Address::repeat_byte(0xa1),
            feed: Feed::default(),
            owners: Mutex::new(HashMap::new()),
            declarations: Mutex::new(HashMap::new()),
            contacts: Mutex::new(HashMap::new()),
            read_error: Mutex::new(None),
            unreachable: AtomicBool::new(false),
            block_calls: AtomicUsize::new(0),
            owner_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_owner(&self, owner: Address, record: OwnerRecord) {
        self.owners.lock().unwrap().insert(owner, record);
    }

    pub fn set_declaration(&self, owner: Address, status: DeathDeclarationStatus) {
        self.declarations.lock().unwrap().insert(owner, status);
    }

    pub fn set_contacts(&self, owner: Address, contacts: Vec<ContactInfo>) {
        self.contacts.lock().unwrap().insert(owner, contacts);
    }

    /// Every read fails with `err` until cleared.
    pub fn fail_reads(&self, err: Option<LedgerError>) {
        *self.read_error.lock().unwrap() = err;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn owner_reads(&self) -> usize {
        self.owner_reads.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        match self.read_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Ledger for MockRegistry {
    fn origin(&self) -> Origin {
        Origin::Registry
    }

    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("connection refused".into()));
        }
        Ok(100)
    }

    fn subscribe(&self, shutdown: watch::Receiver<bool>) -> (EventStream, JoinHandle<()>) {
        self.feed.subscribe(shutdown)
    }
}

impl RegistryLedger for MockRegistry {
    async fn owner_state(&self, owner: Address) -> Result<Option<OwnerRecord>, LedgerError> {
        self.owner_reads.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        Ok(self.owners.lock().unwrap().get(&owner).cloned())
    }

    async fn death_declaration_status(
        &self,
        owner: Address,
    ) -> Result<DeathDeclarationStatus, LedgerError> {
        self.check_read()?;
        Ok(self
            .declarations
            .lock()
            .unwrap()
            .get(&owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn contacts(&self, owner: Address) -> Result<Vec<ContactInfo>, LedgerError> {
        self.check_read()?;
        Ok(self
            .contacts
            .lock()
            .unwrap()
            .get(&owner)
            .cloned()
            .unwrap_or_default())
    }
}

/// One confirmed write on the mock automation ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    UpdateOwnerData {
        owner: Address,
        grace_interval: U256,
        is_deceased: bool,
        exists: bool,
    },
    /// `mirror_grace_interval` is what the mirror held when the grace period started.
    StartGracePeriod {
        owner: Address,
        mirror_grace_interval: U256,
    },
    RecordPing {
        owner: Address,
    },
}

impl Write {
    pub fn owner(&self) -> Address {
        match self {
            Write::UpdateOwnerData { owner, .. }
            | Write::StartGracePeriod { owner, .. }
            | Write::RecordPing { owner } => *owner,
        }
    }
}

/// Automation ledger held in memory, with the contract's checks on grace periods.
pub struct MockAutomation {
    signer: Address,
    pub feed: Feed,
    mirrors: Mutex<HashMap<Address, OwnerMirror>>,
    grace: Mutex<HashMap<Address, GracePeriodInfo>>,
    writes: Mutex<Vec<Write>>,
    /// Error returned by the next call of the named write.
    failures: Mutex<HashMap<&'static str, LedgerError>>,
    write_delay: Mutex<Duration>,
    clock: AtomicU64,
    unreachable: AtomicBool,
    block_calls: AtomicUsize,
}

impl MockAutomation {
    pub fn new() -> Self {
        Self {
            signer: Address::repeat_byte(0xb1),
            feed: Feed::default(),
            mirrors: Mutex::new(HashMap::new()),
            grace: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            write_delay: Mutex::new(Duration::ZERO),
            clock: AtomicU64::new(1_700_000_000),
            unreachable: AtomicBool::new(false),
            block_calls: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn mirror(&self, owner: Address) -> Option<OwnerMirror> {
        self.mirrors.lock().unwrap().get(&owner).cloned()
    }

    pub fn grace(&self, owner: Address) -> Option<GracePeriodInfo> {
        self.grace.lock().unwrap().get(&owner).cloned()
    }

    pub fn set_mirror(&self, owner: Address, mirror: OwnerMirror) {
        self.mirrors.lock().unwrap().insert(owner, mirror);
    }

    /// What the contract's own timer does when a grace period elapses.
    pub fn mark_processed(&self, owner: Address) {
        if let Some(grace) = self.grace.lock().unwrap().get_mut(&owner) {
            grace.processed = true;
        }
    }

    pub fn fail_next(&self, call: &'static str, err: LedgerError) {
        self.failures.lock().unwrap().insert(call, err);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    async fn begin_write(&self, call: &'static str) -> Result<Receipt, LedgerError> {
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().remove(call) {
            return Err(err);
        }
        let n = self.writes.lock().unwrap().len() as u64 + 1;
        Ok(Receipt {
            tx_hash: B256::left_padding_from(&n.to_be_bytes()),
            block_number: 1_000 + n,
            gas_used: 50_000,
        })
    }

    fn now(&self) -> U256 {
        U256::from(self.clock.fetch_add(1, Ordering::SeqCst))
    }
}

impl Ledger for MockAutomation {
    fn origin(&self) -> Origin {
        Origin::Automation
    }

    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("connection refused".into()));
        }
        Ok(200)
    }

    fn subscribe(&self, shutdown: watch::Receiver<bool>) -> (EventStream, JoinHandle<()>) {
        self.feed.subscribe(shutdown)
    }
}

impl AutomationLedger for MockAutomation {
    async fn owner_data(&self, owner: Address) -> Result<OwnerMirror, LedgerError> {
        Ok(self.mirror(owner).unwrap_or_default())
    }

    async fn grace_period_info(&self, owner: Address) -> Result<GracePeriodInfo, LedgerError> {
        Ok(self.grace(owner).unwrap_or_default())
    }

    async fn update_owner_data(
        &self,
        owner: Address,
        grace_interval: U256,
        is_deceased: bool,
        exists: bool,
    ) -> Result<Receipt, LedgerError> {
        let receipt = self.begin_write("updateOwnerData").await?;
        let last_update = self.now();
        self.mirrors.lock().unwrap().insert(
            owner,
            OwnerMirror {
                grace_interval,
                is_deceased,
                exists,
                last_update,
            },
        );
        self.writes.lock().unwrap().push(Write::UpdateOwnerData {
            owner,
            grace_interval,
            is_deceased,
            exists,
        });
        Ok(receipt)
    }

    async fn start_grace_period(&self, owner: Address) -> Result<Receipt, LedgerError> {
        let receipt = self.begin_write("startGracePeriod").await?;
        let mirror = self.mirror(owner).filter(|m| m.exists).ok_or_else(|| {
            LedgerError::Reverted {
                reason: "Owner not registered".into(),
            }
        })?;
        let start_time = self.now();
        self.grace.lock().unwrap().insert(
            owner,
            GracePeriodInfo {
                start_time,
                has_pinged: false,
                processed: false,
                grace_interval: mirror.grace_interval,
                is_deceased: mirror.is_deceased,
            },
        );
        self.writes.lock().unwrap().push(Write::StartGracePeriod {
            owner,
            mirror_grace_interval: mirror.grace_interval,
        });
        Ok(receipt)
    }

    async fn record_ping(&self, owner: Address) -> Result<Receipt, LedgerError> {
        let receipt = self.begin_write("recordPing").await?;
        if let Some(grace) = self.grace.lock().unwrap().get_mut(&owner) {
            grace.has_pinged = true;
        }
        self.writes.lock().unwrap().push(Write::RecordPing { owner });
        Ok(receipt)
    }
}

/// Canned behaviour of [FakeNode].
#[derive(Debug, Clone)]
pub struct NodeBehavior {
    pub chain_id: u64,
    pub block_number: u64,
    /// Hex result returned by every eth_call that is not a revert replay.
    pub call_result: String,
    /// When set, eth_estimateGas fails with this revert reason.
    pub estimate_revert: Option<String>,
    /// Receipt status for every mined transaction.
    pub receipt_status: u64,
    /// Reason returned when a reverted call is replayed at an explicit block.
    pub replay_revert: Option<String>,
    /// Receipts stay unavailable (transaction never mined).
    pub never_mine: bool,
    /// Logs served by eth_getLogs, filtered by the requested block range.
    pub logs: Vec<Value>,
    /// Number of upcoming eth_getLogs requests that fail with a node error.
    pub fail_get_logs: usize,
}

impl Default for NodeBehavior {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            block_number: 100,
            call_result: "0x".into(),
            estimate_revert: None,
            receipt_status: 1,
            replay_revert: None,
            never_mine: false,
            logs: Vec::new(),
            fail_get_logs: 0,
        }
    }
}

#[derive(Default)]
struct NodeState {
    behavior: NodeBehavior,
    sent: Vec<String>,
    methods: Vec<String>,
    nonce: u64,
}

/// JSON-RPC shape of an emitted event.
pub fn log_json<E: alloy::sol_types::SolEvent>(
    contract: Address,
    event: &E,
    block_number: u64,
    log_index: u64,
) -> Value {
    let data = event.encode_log_data();
    let tx_hash = B256::left_padding_from(&block_number.to_be_bytes());
    json!({
        "address": format!("0x{}", hex::encode(contract)),
        "topics": data
            .topics()
            .iter()
            .map(|t| format!("0x{}", hex::encode(t)))
            .collect::<Vec<_>>(),
        "data": format!("0x{}", hex::encode(&data.data)),
        "blockNumber": format!("0x{:x}", block_number),
        "transactionHash": format!("0x{}", hex::encode(tx_hash)),
        "logIndex": format!("0x{:x}", log_index),
        "removed": false,
    })
}

/// In-process JSON-RPC node answering the calls the ledger clients make.
#[derive(Clone)]
pub struct FakeNode {
    state: Arc<Mutex<NodeState>>,
    pub url: String,
}

impl FakeNode {
    pub async fn spawn(behavior: NodeBehavior) -> Self {
        let state = Arc::new(Mutex::new(NodeState {
            behavior,
            ..Default::default()
        }));
        let app = Router::new()
            .route("/", post(handle_rpc))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            state,
            url: format!("http://{}", addr),
        }
    }

    /// Raw transactions received, hex encoded.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.state.lock().unwrap().methods.clone()
    }

    /// Change behaviour while clients are connected.
    pub fn update(&self, f: impl FnOnce(&mut NodeBehavior)) {
        f(&mut self.state.lock().unwrap().behavior);
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }
}

fn revert_error(reason: &str) -> Value {
    json!({ "code": 3, "message": format!("execution reverted: {}", reason) })
}

fn tx_hash_of(raw_hex: &str) -> String {
    let raw = hex::decode(raw_hex.trim_start_matches("0x")).unwrap();
    format!("0x{}", hex::encode(relay::signer::transaction_hash(&raw)))
}

async fn handle_rpc(State(state): State<Arc<Mutex<NodeState>>>, Json(req): Json<Value>) -> Json<Value> {
    let id = req["id"].clone();
    let method = req["method"].as_str().unwrap_or_default().to_string();
    let params = req["params"].clone();
    let mut st = state.lock().unwrap();
    st.methods.push(method.clone());
    let b = st.behavior.clone();
    let outcome: Result<Value, Value> = match method.as_str() {
        "eth_chainId" => Ok(json!(format!("0x{:x}", b.chain_id))),
        "eth_blockNumber" => Ok(json!(format!("0x{:x}", b.block_number))),
        "eth_gasPrice" => Ok(json!("0x3b9aca00")),
        "eth_getTransactionCount" => Ok(json!(format!("0x{:x}", st.nonce))),
        "eth_estimateGas" => match &b.estimate_revert {
            Some(reason) => Err(revert_error(reason)),
            None => Ok(json!("0x186a0")),
        },
        "eth_call" => {
            let replay = params[1].as_str().map(|t| t != "latest").unwrap_or(false);
            match (&b.replay_revert, replay) {
                (Some(reason), true) => Err(revert_error(reason)),
                _ => Ok(json!(b.call_result)),
            }
        }
        "eth_sendRawTransaction" => {
            let raw = params[0].as_str().unwrap_or_default().to_string();
            let hash = tx_hash_of(&raw);
            st.sent.push(raw);
            st.nonce += 1;
            Ok(json!(hash))
        }
        "eth_getTransactionReceipt" => {
            if b.never_mine {
                Ok(Value::Null)
            } else {
                Ok(json!({
                    "transactionHash": params[0],
                    "blockNumber": format!("0x{:x}", b.block_number + 1),
                    "gasUsed": "0xc350",
                    "status": format!("0x{:x}", b.receipt_status),
                }))
            }
        }
        "eth_getLogs" if b.fail_get_logs > 0 => {
            st.behavior.fail_get_logs -= 1;
            Err(json!({ "code": -32000, "message": "upstream unavailable" }))
        }
        "eth_getLogs" => {
            let bound = |key: &str| {
                params[0][key]
                    .as_str()
                    .and_then(|h| u64::from_str_radix(h.trim_start_matches("0x"), 16).ok())
            };
            let from = bound("fromBlock").unwrap_or(0);
            let to = bound("toBlock").unwrap_or(u64::MAX);
            let logs: Vec<Value> = b
                .logs
                .iter()
                .filter(|log| {
                    let n = log["blockNumber"]
                        .as_str()
                        .and_then(|h| u64::from_str_radix(h.trim_start_matches("0x"), 16).ok())
                        .unwrap_or(0);
                    n >= from && n <= to
                })
                .cloned()
                .collect();
            Ok(Value::Array(logs))
        }
        _ => Err(json!({ "code": -32601, "message": "method not found" })),
    };
    Json(match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
    })
}
