//! Local-signer wallet provider.
//!
//! Plays the role a browser-injected wallet plays for a web page: it owns a
//! key, hands out its account once asked, signs `eth_sendTransaction`, and
//! forwards every other request to the node of the chain it is switched to.
//! Uses `ethers-rs` for transport and signing.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::adapters::{ProviderError, ProviderEvent, WalletProvider, EVENT_CHANNEL_CAPACITY};
use crate::config::FaucetConfig;
use crate::error::{FaucetError, Result};
use crate::types::{ChainDescriptor, ConnectionKind};
use crate::utils::parse_hex_u64;
use super::{connect_node, from_node_error};

/// EIP-1193 code for a method called before the account was authorized.
const UNAUTHORIZED_CODE: i64 = 4100;

struct ActiveChain {
    chain_id: u64,
    node: Arc<Provider<Http>>,
}

/// Wallet provider backed by a local key and an HTTP node per chain.
pub struct LocalSignerProvider {
    wallet: LocalWallet,
    rpc_urls: RwLock<HashMap<u64, String>>,
    active: RwLock<ActiveChain>,
    authorized: AtomicBool,
    events: broadcast::Sender<ProviderEvent>,
}

impl LocalSignerProvider {
    /// Create a provider for `private_key`, starting on `chain_id` served by `rpc_url`.
    pub fn new(private_key: &str, rpc_url: &str, chain_id: u64) -> Result<Self> {
        let wallet = LocalWallet::from_str(private_key.trim()).map_err(|e| FaucetError::InvalidInput {
            reason: format!("Invalid private key: {}", e),
        })?;
        let node = connect_node(rpc_url).map_err(|e| FaucetError::InvalidInput {
            reason: e.to_string(),
        })?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut rpc_urls = HashMap::new();
        rpc_urls.insert(chain_id, rpc_url.to_string());

        Ok(Self {
            wallet,
            rpc_urls: RwLock::new(rpc_urls),
            active: RwLock::new(ActiveChain { chain_id, node }),
            authorized: AtomicBool::new(false),
            events,
        })
    }

    /// Create the provider from configuration.
    ///
    /// Without a configured key there is no local wallet at all.
    pub fn from_config(config: &FaucetConfig) -> Result<Self> {
        let key = config.private_key.as_deref().ok_or(FaucetError::ProviderUnavailable)?;
        Self::new(key, &config.rpc_url, config.required_chain_id)
    }

    /// The signer's account.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Chain the provider is currently switched to.
    pub fn active_chain_id(&self) -> u64 {
        self.active.read().unwrap_or_else(|e| e.into_inner()).chain_id
    }

    /// Revoke account access, as a wallet does when the user disconnects the site.
    pub fn disconnect_accounts(&self) {
        if self.authorized.swap(false, Ordering::SeqCst) {
            info!(account = ?self.address(), "Local signer revoked account access");
            let _ = self.events.send(ProviderEvent::AccountsChanged(Vec::new()));
        }
    }

    fn node(&self) -> Arc<Provider<Http>> {
        Arc::clone(&self.active.read().unwrap_or_else(|e| e.into_inner()).node)
    }

    fn authorized_accounts(&self) -> Vec<Address> {
        if self.authorized.load(Ordering::SeqCst) {
            vec![self.address()]
        } else {
            Vec::new()
        }
    }

    fn switch_to(&self, chain_id: u64) -> std::result::Result<(), ProviderError> {
        let url = self
            .rpc_urls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnrecognizedChain(format!("chain {} has not been added", chain_id)))?;

        let node = connect_node(&url)?;
        let changed = {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            let changed = active.chain_id != chain_id;
            *active = ActiveChain { chain_id, node };
            changed
        };
        if changed {
            debug!(chain_id, "Local signer switched chain");
            let _ = self.events.send(ProviderEvent::ChainChanged(chain_id));
        }
        Ok(())
    }

    fn register_chain(&self, descriptor: ChainDescriptor) -> std::result::Result<(), ProviderError> {
        let chain_id = descriptor
            .chain_id_u64()
            .ok_or_else(|| invalid_params(format!("bad chainId {}", descriptor.chain_id)))?;
        let url = descriptor
            .rpc_urls
            .first()
            .cloned()
            .ok_or_else(|| invalid_params("rpcUrls must not be empty".to_string()))?;
        // Reject unparsable endpoints before they are stored.
        connect_node(&url)?;
        self.rpc_urls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chain_id, url);
        debug!(chain_id, "Local signer registered chain");
        Ok(())
    }

    async fn sign_and_send(&self, params: Value) -> std::result::Result<Value, ProviderError> {
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(ProviderError::from_rpc(UNAUTHORIZED_CODE, "account not authorized", None));
        }
        let tx: TransactionRequest = serde_json::from_value(first_param(&params)?.clone())
            .map_err(|e| invalid_params(e.to_string()))?;
        if let Some(from) = tx.from {
            if from != self.address() {
                return Err(ProviderError::from_rpc(UNAUTHORIZED_CODE, "unknown sender", None));
            }
        }

        let client = SignerMiddleware::new_with_provider_chain(self.node(), self.wallet.clone())
            .await
            .map_err(|e| from_signer_error(&e))?;
        let pending = client
            .send_transaction(tx.from(self.address()), None)
            .await
            .map_err(|e| from_signer_error(&e))?;

        Ok(json!(pending.tx_hash()))
    }
}

#[async_trait]
impl WalletProvider for LocalSignerProvider {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Injected
    }

    async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, ProviderError> {
        match method {
            "eth_requestAccounts" => {
                if !self.authorized.swap(true, Ordering::SeqCst) {
                    let _ = self.events.send(ProviderEvent::AccountsChanged(vec![self.address()]));
                }
                Ok(json!(self.authorized_accounts()))
            }
            "eth_accounts" => Ok(json!(self.authorized_accounts())),
            "wallet_switchEthereumChain" => {
                let raw = first_param(&params)?
                    .get("chainId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid_params("missing chainId".to_string()))?;
                let chain_id = parse_hex_u64(raw).ok_or_else(|| invalid_params(format!("bad chainId {}", raw)))?;
                self.switch_to(chain_id)?;
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let descriptor: ChainDescriptor = serde_json::from_value(first_param(&params)?.clone())
                    .map_err(|e| invalid_params(e.to_string()))?;
                self.register_chain(descriptor)?;
                Ok(Value::Null)
            }
            "eth_sendTransaction" => self.sign_and_send(params).await,
            _ => self
                .node()
                .request::<Value, Value>(method, params)
                .await
                .map_err(|e| from_node_error(&e)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

fn first_param(params: &Value) -> std::result::Result<&Value, ProviderError> {
    params
        .get(0)
        .ok_or_else(|| invalid_params("expected one parameter".to_string()))
}

fn invalid_params(reason: String) -> ProviderError {
    ProviderError::from_rpc(-32602, reason, None)
}

fn from_signer_error<E: MiddlewareError>(err: &E) -> ProviderError {
    match MiddlewareError::as_error_response(err) {
        Some(resp) => ProviderError::from_rpc(resp.code, resp.message.clone(), resp.data.clone()),
        None => ProviderError::Transport(err.to_string()),
    }
}
