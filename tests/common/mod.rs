//! Scripted wallet, relay and contract doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::types::{Address, TransactionReceipt, H256, U256, U64};
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot, watch, Notify};

use sepolia_faucet::adapters::remote::{PairingProposal, RelayError, SessionApproval};
use sepolia_faucet::types::ChainDescriptor;
use sepolia_faucet::utils::{parse_hex_u64, to_hex_quantity};
use sepolia_faucet::{
    ClaimReceipt, ConnectionKind, FaucetContract, FaucetError, ManualClock, NetworkStatus, PairingRelay,
    ProviderError, ProviderEvent, Session, WalletProvider, REQUIRED_CHAIN_ID,
};

pub const NOW: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;

pub fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

/// A session snapshot already connected on Sepolia.
pub fn ready_session(address: Address) -> Session {
    Session {
        address: Some(address),
        chain_id: Some(REQUIRED_CHAIN_ID),
        kind: ConnectionKind::Injected,
        network: NetworkStatus::Supported,
    }
}

/// Wait (bounded) until the watched value satisfies `pred`.
pub async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, pred: F)
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("condition not reached in time")
        .expect("sender dropped");
}

/// In-process wallet whose accounts and chain the test controls.
pub struct ScriptedProvider {
    accounts: Mutex<Vec<Address>>,
    authorized: AtomicBool,
    chain_id: AtomicU64,
    known_chains: Mutex<HashSet<u64>>,
    reject_prompts: AtomicBool,
    events: broadcast::Sender<ProviderEvent>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(account: Address, chain_id: u64) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            accounts: Mutex::new(vec![account]),
            authorized: AtomicBool::new(false),
            chain_id: AtomicU64::new(chain_id),
            known_chains: Mutex::new(HashSet::from([1, chain_id])),
            reject_prompts: AtomicBool::new(false),
            events,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Behave as if the user approved this client in an earlier run.
    pub fn preauthorize(&self) {
        self.authorized.store(true, Ordering::SeqCst);
    }

    pub fn reject_prompts(&self) {
        self.reject_prompts.store(true, Ordering::SeqCst);
    }

    pub fn forget_chain(&self, chain_id: u64) {
        self.known_chains.lock().unwrap().remove(&chain_id);
    }

    /// The user switched or removed accounts in the wallet.
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock().unwrap() = accounts.clone();
        let _ = self.events.send(ProviderEvent::AccountsChanged(accounts));
    }

    /// The user switched chains in the wallet.
    pub fn set_chain(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
        let _ = self.events.send(ProviderEvent::ChainChanged(chain_id));
    }

    pub fn called(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
    }
}

#[async_trait]
impl WalletProvider for ScriptedProvider {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Injected
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.calls.lock().unwrap().push(method.to_string());
        match method {
            "eth_requestAccounts" => {
                if self.reject_prompts.load(Ordering::SeqCst) {
                    return Err(ProviderError::UserRejected);
                }
                self.authorized.store(true, Ordering::SeqCst);
                Ok(json!(*self.accounts.lock().unwrap()))
            }
            "eth_accounts" => {
                if self.authorized.load(Ordering::SeqCst) {
                    Ok(json!(*self.accounts.lock().unwrap()))
                } else {
                    Ok(json!([]))
                }
            }
            "eth_chainId" => Ok(json!(to_hex_quantity(self.chain_id.load(Ordering::SeqCst)))),
            "wallet_switchEthereumChain" => {
                let chain_id = params[0]["chainId"].as_str().and_then(parse_hex_u64).unwrap();
                if !self.known_chains.lock().unwrap().contains(&chain_id) {
                    return Err(ProviderError::from_rpc(4902, "Unrecognized chain ID", None));
                }
                self.set_chain(chain_id);
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let descriptor: ChainDescriptor = serde_json::from_value(params[0].clone()).unwrap();
                self.known_chains
                    .lock()
                    .unwrap()
                    .insert(descriptor.chain_id_u64().unwrap());
                Ok(Value::Null)
            }
            other => Err(ProviderError::from_rpc(-32601, format!("{} not supported", other), None)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// What the fake contract does with the next claim.
#[derive(Clone, Debug)]
pub enum SubmitOutcome {
    Succeed,
    Decline,
    Revert(String),
    NetworkDown,
}

struct FakeState {
    amount: U256,
    cooldown: u64,
    balance: U256,
    last_claims: HashMap<Address, u64>,
    pending: HashMap<H256, Address>,
}

/// Faucet contract double that enforces its own cooldown against a manual clock.
pub struct FakeFaucet {
    clock: Arc<ManualClock>,
    state: Mutex<FakeState>,
    outcome: Mutex<SubmitOutcome>,
    inclusion_gate: Mutex<Option<oneshot::Receiver<()>>>,
    last_claim_script: Mutex<VecDeque<(oneshot::Receiver<()>, u64)>>,
    pub gated_read_started: Notify,
    pub fail_amount: AtomicBool,
    pub fail_balance: AtomicBool,
    pub fail_all: AtomicBool,
    pub amount_reads: AtomicUsize,
    pub submits: AtomicUsize,
    /// Inclusion waits that lose track of the receipt.
    pub lost_receipts: AtomicUsize,
}

impl FakeFaucet {
    pub fn new(clock: Arc<ManualClock>, cooldown: u64) -> Arc<Self> {
        Arc::new(Self {
            clock,
            state: Mutex::new(FakeState {
                amount: U256::exp10(15),
                cooldown,
                balance: U256::exp10(18),
                last_claims: HashMap::new(),
                pending: HashMap::new(),
            }),
            outcome: Mutex::new(SubmitOutcome::Succeed),
            inclusion_gate: Mutex::new(None),
            last_claim_script: Mutex::new(VecDeque::new()),
            gated_read_started: Notify::new(),
            fail_amount: AtomicBool::new(false),
            fail_balance: AtomicBool::new(false),
            fail_all: AtomicBool::new(false),
            amount_reads: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            lost_receipts: AtomicUsize::new(0),
        })
    }

    pub fn set_last_claim(&self, user: Address, timestamp: u64) {
        self.state.lock().unwrap().last_claims.insert(user, timestamp);
    }

    pub fn set_balance(&self, balance: U256) {
        self.state.lock().unwrap().balance = balance;
    }

    pub fn set_outcome(&self, outcome: SubmitOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    /// Hold the next inclusion until the returned sender fires.
    pub fn hold_inclusion(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.inclusion_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Make the next `getLastClaimTime` answer `value`, but only once released.
    pub fn script_last_claim(&self, value: u64) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.last_claim_script.lock().unwrap().push_back((rx, value));
        tx
    }

    fn down(&self) -> Result<(), ProviderError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FaucetContract for FakeFaucet {
    fn address(&self) -> Address {
        Address::repeat_byte(0xfa)
    }

    async fn amount(&self) -> Result<U256, ProviderError> {
        self.amount_reads.fetch_add(1, Ordering::SeqCst);
        self.down()?;
        if self.fail_amount.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("timeout".to_string()));
        }
        Ok(self.state.lock().unwrap().amount)
    }

    async fn cooldown(&self) -> Result<U256, ProviderError> {
        self.down()?;
        Ok(U256::from(self.state.lock().unwrap().cooldown))
    }

    async fn last_claim_time(&self, user: Address) -> Result<U256, ProviderError> {
        self.down()?;
        let scripted = self.last_claim_script.lock().unwrap().pop_front();
        if let Some((gate, value)) = scripted {
            self.gated_read_started.notify_one();
            let _ = gate.await;
            return Ok(U256::from(value));
        }
        let last = self.state.lock().unwrap().last_claims.get(&user).copied().unwrap_or(0);
        Ok(U256::from(last))
    }

    async fn balance(&self) -> Result<U256, ProviderError> {
        self.down()?;
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("timeout".to_string()));
        }
        Ok(self.state.lock().unwrap().balance)
    }

    async fn submit_claim(&self, from: Address) -> sepolia_faucet::Result<H256> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.outcome.lock().unwrap().clone();
        match outcome {
            SubmitOutcome::Decline => Err(FaucetError::UserRejected),
            SubmitOutcome::Revert(reason) => Err(FaucetError::TxReverted { reason }),
            SubmitOutcome::NetworkDown => Err(FaucetError::NetworkError {
                reason: "connection reset".to_string(),
            }),
            SubmitOutcome::Succeed => {
                let hash = H256::from_low_u64_be(n as u64);
                self.state.lock().unwrap().pending.insert(hash, from);
                Ok(hash)
            }
        }
    }

    async fn wait_for_inclusion(&self, tx_hash: H256) -> sepolia_faucet::Result<ClaimReceipt> {
        if take_one(&self.lost_receipts) {
            return Err(FaucetError::NetworkError {
                reason: "receipt lookup timed out".to_string(),
            });
        }
        let gate = self.inclusion_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let now = self.clock_now();
        let mut state = self.state.lock().unwrap();
        let from = state.pending.remove(&tx_hash).expect("unknown transaction");
        let last = state.last_claims.get(&from).copied().unwrap_or(0);
        if last != 0 && last + state.cooldown > now {
            return Err(FaucetError::TxReverted {
                reason: "Cooldown not finished".to_string(),
            });
        }
        state.last_claims.insert(from, now);
        state.balance = state.balance.saturating_sub(state.amount);
        Ok(ClaimReceipt {
            tx_hash,
            block_number: Some(1),
        })
    }
}

impl FakeFaucet {
    fn clock_now(&self) -> u64 {
        use sepolia_faucet::Clock;
        self.clock.now_unix()
    }
}

/// Relay double: answers the next proposal as scripted.
pub struct ScriptedRelay {
    answer: Mutex<Option<Result<SessionApproval, RelayError>>>,
    events: broadcast::Sender<ProviderEvent>,
    pub proposals: Mutex<Vec<PairingProposal>>,
    pub requests: Mutex<Vec<(String, u64, String)>>,
    pub disconnected: AtomicBool,
}

impl ScriptedRelay {
    pub fn new(answer: Result<SessionApproval, RelayError>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            answer: Mutex::new(Some(answer)),
            events,
            proposals: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn approving(account: Address, chain_id: u64) -> Arc<Self> {
        Self::new(Ok(SessionApproval {
            session_topic: "session-topic".to_string(),
            accounts: vec![account],
            chain_id,
        }))
    }

    /// The paired wallet pushes an event.
    pub fn push(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl PairingRelay for ScriptedRelay {
    async fn propose(&self, proposal: &PairingProposal) -> Result<SessionApproval, RelayError> {
        self.proposals.lock().unwrap().push(proposal.clone());
        self.answer.lock().unwrap().take().unwrap_or(Err(RelayError::Expired))
    }

    async fn request(
        &self,
        session_topic: &str,
        chain_id: u64,
        method: &str,
        _params: Value,
    ) -> Result<Value, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((session_topic.to_string(), chain_id, method.to_string()));
        match method {
            "eth_sendTransaction" => Ok(json!(H256::repeat_byte(0x77))),
            _ => Ok(Value::Null),
        }
    }

    fn events(&self, _session_topic: &str) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self, _session_topic: &str) -> Result<(), ProviderError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub fn faucet_address() -> Address {
    Address::repeat_byte(0xfa)
}

/// An `eth_call` failure carrying an `Error(string)` revert payload.
pub fn revert_error(reason: &str) -> ProviderError {
    let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
    data.extend(reason.to_string().encode());
    ProviderError::from_rpc(3, "execution reverted", Some(json!(format!("0x{}", hex::encode(data)))))
}

fn abi_word(value: U256) -> Value {
    json!(format!("0x{}", hex::encode(value.encode())))
}

/// Wallet on a node hosting the faucet contract. Answers the faucet's ABI
/// reads, signs claims, and mines them after a scripted number of polls.
pub struct ChainProvider {
    amount: U256,
    cooldown: u64,
    balance: U256,
    last_claims: Mutex<HashMap<Address, u64>>,
    sent: Mutex<HashMap<H256, Address>>,
    events: broadcast::Sender<ProviderEvent>,
    /// Reason `claim()` reverts with when simulated at the latest block.
    pub simulate_revert: Mutex<Option<String>>,
    /// Reason `claim()` reverts with when replayed at a past block.
    pub replay_revert: Mutex<Option<String>>,
    pub malformed_reads: AtomicBool,
    pub reject_signing: AtomicBool,
    /// Receipt polls answered with `null` before the claim is mined.
    pub pending_polls: AtomicUsize,
    /// Receipt polls that fail outright.
    pub failing_polls: AtomicUsize,
    /// Receipt status of mined claims: 1 success, 0 reverted.
    pub mined_status: AtomicU64,
    pub receipt_polls: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl ChainProvider {
    pub fn new(cooldown: u64) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            amount: U256::exp10(15),
            cooldown,
            balance: U256::exp10(18),
            last_claims: Mutex::new(HashMap::new()),
            sent: Mutex::new(HashMap::new()),
            events,
            simulate_revert: Mutex::new(None),
            replay_revert: Mutex::new(None),
            malformed_reads: AtomicBool::new(false),
            reject_signing: AtomicBool::new(false),
            pending_polls: AtomicUsize::new(0),
            failing_polls: AtomicUsize::new(0),
            mined_status: AtomicU64::new(1),
            receipt_polls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_last_claim(&self, user: Address, timestamp: u64) {
        self.last_claims.lock().unwrap().insert(user, timestamp);
    }

    pub fn called(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
    }

    fn eth_call(&self, params: &Value) -> Result<Value, ProviderError> {
        let tx = &params[0];
        assert_eq!(tx["to"], json!(faucet_address()));
        let data = hex::decode(tx["data"].as_str().unwrap().trim_start_matches("0x")).unwrap();
        let selector: [u8; 4] = data[..4].try_into().unwrap();

        if selector == ethers::utils::id("claim()") {
            let script = if params[1] == json!("latest") {
                &self.simulate_revert
            } else {
                &self.replay_revert
            };
            return match script.lock().unwrap().as_deref() {
                Some(reason) => Err(revert_error(reason)),
                None => Ok(json!("0x")),
            };
        }
        if self.malformed_reads.load(Ordering::SeqCst) {
            return Ok(json!("0x1234"));
        }
        let value = if selector == ethers::utils::id("AMOUNT()") {
            self.amount
        } else if selector == ethers::utils::id("COOLDOWN()") {
            U256::from(self.cooldown)
        } else if selector == ethers::utils::id("getLastClaimTime(address)") {
            let user = Address::from_slice(&data[16..36]);
            U256::from(self.last_claims.lock().unwrap().get(&user).copied().unwrap_or(0))
        } else {
            return Err(ProviderError::from_rpc(-32000, "execution reverted", None));
        };
        Ok(abi_word(value))
    }

    fn receipt(&self, params: &Value) -> Result<Value, ProviderError> {
        self.receipt_polls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_polls) {
            return Err(ProviderError::Transport("request timed out".to_string()));
        }
        if take_one(&self.pending_polls) {
            return Ok(Value::Null);
        }

        let hash: H256 = serde_json::from_value(params[0].clone()).unwrap();
        let from = *self.sent.lock().unwrap().get(&hash).expect("unknown transaction");
        let status = self.mined_status.load(Ordering::SeqCst);
        if status == 1 {
            self.set_last_claim(from, NOW);
        }
        let receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(10)),
            status: Some(U64::from(status)),
            from,
            to: Some(faucet_address()),
            ..Default::default()
        };
        Ok(serde_json::to_value(receipt).unwrap())
    }
}

#[async_trait]
impl WalletProvider for ChainProvider {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Injected
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.calls.lock().unwrap().push(method.to_string());
        match method {
            "eth_chainId" => Ok(json!(to_hex_quantity(REQUIRED_CHAIN_ID))),
            "eth_accounts" | "eth_requestAccounts" => Ok(json!([alice()])),
            "eth_getBalance" => {
                assert_eq!(params[0], json!(faucet_address()));
                Ok(json!(self.balance))
            }
            "eth_call" => self.eth_call(&params),
            "eth_sendTransaction" => {
                if self.reject_signing.load(Ordering::SeqCst) {
                    return Err(ProviderError::from_rpc(4001, "User denied transaction signature", None));
                }
                let from: Address = serde_json::from_value(params[0]["from"].clone()).unwrap();
                let mut sent = self.sent.lock().unwrap();
                let hash = H256::from_low_u64_be(sent.len() as u64 + 1);
                sent.insert(hash, from);
                Ok(json!(hash))
            }
            "eth_getTransactionReceipt" => self.receipt(&params),
            other => Err(ProviderError::from_rpc(-32601, format!("{} not supported", other), None)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
