//! Remote paired-signer provider.
//!
//! A wallet that is not in-process is reached through a relay: the client
//! publishes a pairing proposal, shows the resulting `wc:` URI to the user as
//! a QR code or deep link, and waits for the wallet to approve. After that
//! the provider looks like any other [`WalletProvider`]: wallet methods go
//! over the relay, reads go straight to the chain's RPC endpoint.
//!
//! The relay transport itself (envelope encryption, websocket framing) is
//! supplied by a [`PairingRelay`] implementation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::Address;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::adapters::ethereum::{connect_node, from_node_error};
use crate::adapters::{ProviderError, ProviderEvent, WalletProvider, EVENT_CHANNEL_CAPACITY};
use crate::config::FaucetConfig;
use crate::error::{FaucetError, Result};
use crate::types::ConnectionKind;
use crate::utils::{to_hex_quantity, Clock, SystemClock};

/// Relay protocol advertised in pairing URIs.
pub const RELAY_PROTOCOL: &str = "irn";

/// Lifetime of an unanswered pairing proposal.
pub const PAIRING_TTL_SECS: u64 = 300;

/// Methods that must be answered by the wallet rather than a node.
const WALLET_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_sign",
    "personal_sign",
    "eth_signTypedData_v4",
    "wallet_switchEthereumChain",
    "wallet_addEthereumChain",
];

const SESSION_EVENTS: &[&str] = &["accountsChanged", "chainChanged"];

/// Pairing handshake failures reported by a relay.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Proposal rejected by wallet")]
    Rejected,
    #[error("Proposal expired")]
    Expired,
    #[error("Relay transport error: {0}")]
    Transport(String),
}

/// A `wc:` pairing URI. The symmetric key is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: String,
    sym_key: [u8; 32],
    pub relay_protocol: String,
    pub expiry_timestamp: u64,
}

impl PairingUri {
    /// Fresh random topic and key, expiring `PAIRING_TTL_SECS` after `now`.
    pub fn generate(now: u64) -> Self {
        let mut rng = rand::thread_rng();
        let mut topic = [0u8; 32];
        rng.fill_bytes(&mut topic);
        let mut sym_key = [0u8; 32];
        rng.fill_bytes(&mut sym_key);

        Self {
            topic: hex::encode(topic),
            sym_key,
            relay_protocol: RELAY_PROTOCOL.to_string(),
            expiry_timestamp: now + PAIRING_TTL_SECS,
        }
    }

    pub fn sym_key(&self) -> &[u8; 32] {
        &self.sym_key
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry_timestamp
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wc:{}@2?relay-protocol={}&symKey={}&expiryTimestamp={}",
            self.topic,
            self.relay_protocol,
            hex::encode(self.sym_key),
            self.expiry_timestamp
        )
    }
}

impl fmt::Debug for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingUri")
            .field("topic", &self.topic)
            .field("relay_protocol", &self.relay_protocol)
            .field("expiry_timestamp", &self.expiry_timestamp)
            .finish_non_exhaustive()
    }
}

impl FromStr for PairingUri {
    type Err = FaucetError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| FaucetError::InvalidInput {
            reason: format!("Invalid pairing URI: {}", reason),
        };

        let rest = s.strip_prefix("wc:").ok_or_else(|| invalid("missing wc: scheme"))?;
        let (path, query) = rest.split_once('?').ok_or_else(|| invalid("missing query"))?;
        let topic = path.strip_suffix("@2").ok_or_else(|| invalid("unsupported version"))?;
        if topic.is_empty() {
            return Err(invalid("empty topic"));
        }

        let mut relay_protocol = None;
        let mut sym_key = None;
        let mut expiry_timestamp = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("relay-protocol", v)) => relay_protocol = Some(v.to_string()),
                Some(("symKey", v)) => {
                    let mut bytes = hex::decode(v).map_err(|_| invalid("symKey is not hex"))?;
                    let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| invalid("symKey must be 32 bytes"))?;
                    bytes.zeroize();
                    sym_key = Some(key);
                }
                Some(("expiryTimestamp", v)) => {
                    expiry_timestamp = Some(v.parse().map_err(|_| invalid("bad expiryTimestamp"))?);
                }
                _ => {}
            }
        }

        Ok(Self {
            topic: topic.to_string(),
            sym_key: sym_key.ok_or_else(|| invalid("missing symKey"))?,
            relay_protocol: relay_protocol.ok_or_else(|| invalid("missing relay-protocol"))?,
            // Older URIs carry no expiry; treat them as never expiring locally.
            expiry_timestamp: expiry_timestamp.unwrap_or(u64::MAX),
        })
    }
}

impl Drop for PairingUri {
    fn drop(&mut self) {
        self.sym_key.zeroize();
    }
}

/// Dapp metadata shown in the wallet's approval prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "Sepolia Faucet".to_string(),
            description: "Request Sepolia ETH".to_string(),
            url: "http://localhost:3000".to_string(),
            icons: Vec::new(),
        }
    }
}

/// Fixed relay/project setup for remote pairing.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub project_id: String,
    /// Chains the session must support; the first is the starting chain.
    pub chains: Vec<u64>,
    /// Read endpoint per chain id.
    pub rpc_map: HashMap<u64, String>,
    pub metadata: AppMetadata,
}

impl RemoteConfig {
    pub fn from_config(config: &FaucetConfig) -> Self {
        let mut rpc_map = HashMap::new();
        rpc_map.insert(config.required_chain_id, config.rpc_url.clone());
        Self {
            project_id: config.project_id.clone(),
            chains: vec![config.required_chain_id],
            rpc_map,
            metadata: AppMetadata::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::from_config(&FaucetConfig::default())
    }
}

/// Everything the wallet needs to decide on a pairing.
#[derive(Clone, Debug)]
pub struct PairingProposal {
    pub uri: PairingUri,
    pub project_id: String,
    pub chains: Vec<u64>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    pub metadata: AppMetadata,
}

/// The wallet's answer to an approved proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionApproval {
    pub session_topic: String,
    pub accounts: Vec<Address>,
    pub chain_id: u64,
}

/// Transport to a paired wallet.
#[async_trait]
pub trait PairingRelay: Send + Sync {
    /// Publish `proposal` and wait for the wallet to answer. No local timeout:
    /// the relay reports `Expired` once the proposal's expiry passes.
    async fn propose(&self, proposal: &PairingProposal) -> core::result::Result<SessionApproval, RelayError>;

    /// Forward a wallet request over an established session.
    async fn request(
        &self,
        session_topic: &str,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> core::result::Result<Value, ProviderError>;

    /// Events the wallet pushes on `session_topic`.
    fn events(&self, session_topic: &str) -> broadcast::Receiver<ProviderEvent>;

    /// Tear the session down on the relay.
    async fn disconnect(&self, session_topic: &str) -> core::result::Result<(), ProviderError>;
}

struct SessionState {
    accounts: Vec<Address>,
    chain_id: u64,
}

/// A wallet paired through a relay.
pub struct RemoteProvider {
    relay: Arc<dyn PairingRelay>,
    session_topic: String,
    nodes: HashMap<u64, Arc<Provider<Http>>>,
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<ProviderEvent>,
    listener: JoinHandle<()>,
}

impl RemoteProvider {
    /// Run the pairing handshake.
    ///
    /// `show_uri` receives the pairing URI to render as a QR code or deep
    /// link before the call blocks on the wallet's answer.
    pub async fn pair<F>(relay: Arc<dyn PairingRelay>, config: RemoteConfig, show_uri: F) -> Result<Self>
    where
        F: FnOnce(&PairingUri),
    {
        Self::pair_with_clock(relay, config, &SystemClock, show_uri).await
    }

    pub async fn pair_with_clock<F>(
        relay: Arc<dyn PairingRelay>,
        config: RemoteConfig,
        clock: &dyn Clock,
        show_uri: F,
    ) -> Result<Self>
    where
        F: FnOnce(&PairingUri),
    {
        let mut nodes = HashMap::new();
        for (chain_id, url) in &config.rpc_map {
            let node = connect_node(url).map_err(|e| FaucetError::InvalidInput { reason: e.to_string() })?;
            nodes.insert(*chain_id, node);
        }

        let proposal = PairingProposal {
            uri: PairingUri::generate(clock.now_unix()),
            project_id: config.project_id.clone(),
            chains: config.chains.clone(),
            methods: WALLET_METHODS.iter().map(|m| m.to_string()).collect(),
            events: SESSION_EVENTS.iter().map(|e| e.to_string()).collect(),
            metadata: config.metadata.clone(),
        };
        show_uri(&proposal.uri);
        debug!(topic = %proposal.uri.topic, "Pairing proposal published");

        let approval = relay.propose(&proposal).await.map_err(|e| match e {
            RelayError::Rejected => FaucetError::PairingRejected,
            other => FaucetError::PairingTimeout { reason: other.to_string() },
        })?;
        if approval.accounts.is_empty() {
            return Err(FaucetError::PairingTimeout {
                reason: "wallet approved without accounts".to_string(),
            });
        }
        info!(
            session = %approval.session_topic,
            chain_id = approval.chain_id,
            "Remote wallet paired"
        );

        let state = Arc::new(RwLock::new(SessionState {
            accounts: approval.accounts,
            chain_id: approval.chain_id,
        }));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let listener = spawn_session_listener(
            relay.events(&approval.session_topic),
            Arc::clone(&state),
            events.clone(),
        );

        Ok(Self {
            relay,
            session_topic: approval.session_topic,
            nodes,
            state,
            events,
            listener,
        })
    }

    pub fn session_topic(&self) -> &str {
        &self.session_topic
    }

    pub fn active_chain_id(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).chain_id
    }

    /// End the paired session.
    pub async fn disconnect(&self) -> Result<()> {
        self.relay
            .disconnect(&self.session_topic)
            .await
            .map_err(FaucetError::network)?;
        self.state.write().unwrap_or_else(|e| e.into_inner()).accounts.clear();
        let _ = self.events.send(ProviderEvent::AccountsChanged(Vec::new()));
        info!(session = %self.session_topic, "Remote wallet disconnected");
        Ok(())
    }

    fn accounts(&self) -> Vec<Address> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).accounts.clone()
    }
}

#[async_trait]
impl WalletProvider for RemoteProvider {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Remote
    }

    async fn request(&self, method: &str, params: Value) -> core::result::Result<Value, ProviderError> {
        let chain_id = self.active_chain_id();
        match method {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!(self.accounts())),
            "eth_chainId" => Ok(json!(to_hex_quantity(chain_id))),
            m if WALLET_METHODS.contains(&m) => {
                self.relay.request(&self.session_topic, chain_id, method, params).await
            }
            _ => {
                let node = self.nodes.get(&chain_id).cloned().ok_or_else(|| {
                    ProviderError::UnrecognizedChain(format!("no RPC endpoint for chain {}", chain_id))
                })?;
                node.request::<Value, Value>(method, params)
                    .await
                    .map_err(|e| from_node_error(&e))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

impl Drop for RemoteProvider {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn spawn_session_listener(
    mut relay_events: broadcast::Receiver<ProviderEvent>,
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<ProviderEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match relay_events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Remote session listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            {
                let mut session = state.write().unwrap_or_else(|e| e.into_inner());
                match &event {
                    ProviderEvent::AccountsChanged(accounts) => session.accounts = accounts.clone(),
                    ProviderEvent::ChainChanged(chain_id) => session.chain_id = *chain_id,
                }
            }
            let _ = events.send(event);
        }
    })
}
