//! Wallet provider capability.
//!
//! A [`WalletProvider`] is the request/event surface a wallet exposes to the
//! faucet: a single EIP-1193 style `request` entry point plus an explicit
//! event subscription. The typed calls the session and contract binding
//! need live on [`ProviderExt`], which every provider gets for free.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{ChainDescriptor, ConnectionKind};
use crate::utils::{parse_hex_u64, to_hex_quantity};

pub mod ethereum;
pub mod remote;

/// EIP-1193 code for a request the user declined.
pub const USER_REJECTED_CODE: i64 = 4001;

/// EIP-1193 code for a provider disconnected from every chain.
pub const DISCONNECTED_CODE: i64 = 4900;

/// EIP-3326 code for a chain the wallet has not been told about.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// Capacity of each provider's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Errors raised by a wallet provider request.
#[derive(Clone, Debug, Error)]
pub enum ProviderError {
    #[error("User rejected the request")]
    UserRejected,
    #[error("Unrecognized chain: {0}")]
    UnrecognizedChain(String),
    #[error("Provider disconnected")]
    Disconnected,
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected response to {method}: {reason}")]
    Decode { method: String, reason: String },
}

impl ProviderError {
    /// Classify a JSON-RPC error object by its code.
    pub fn from_rpc(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        let message = message.into();
        match code {
            USER_REJECTED_CODE => Self::UserRejected,
            DISCONNECTED_CODE => Self::Disconnected,
            UNRECOGNIZED_CHAIN_CODE => Self::UnrecognizedChain(message),
            _ => Self::Rpc { code, message, data },
        }
    }

    /// Revert payload attached to a failed `eth_call`, if any.
    ///
    /// Nodes put it either directly in `data` or one level down in
    /// `data.data`.
    pub fn revert_data(&self) -> Option<Vec<u8>> {
        let Self::Rpc { data: Some(data), .. } = self else {
            return None;
        };
        let hex_str = match data {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("data")?.as_str()?,
            _ => return None,
        };
        hex::decode(hex_str.trim_start_matches("0x")).ok()
    }

    /// The node's message for a plain RPC error.
    pub fn rpc_message(&self) -> Option<&str> {
        match self {
            Self::Rpc { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Notifications a provider pushes to its listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The authorized account list changed; empty means logged out.
    AccountsChanged(Vec<Address>),
    /// The wallet moved to another chain.
    ChainChanged(u64),
}

/// A wallet reachable through JSON-RPC style requests.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// How this provider was reached.
    fn kind(&self) -> ConnectionKind;

    /// Issue a raw request. May block until the user answers a wallet prompt.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Register a listener for account and chain changes.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Typed wrappers over [`WalletProvider::request`].
#[async_trait]
pub trait ProviderExt: WalletProvider {
    async fn request_as<R>(&self, method: &str, params: Value) -> Result<R, ProviderError>
    where
        R: DeserializeOwned + Send,
    {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(|e| ProviderError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Ask the user to authorize accounts (`eth_requestAccounts`).
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.request_as("eth_requestAccounts", json!([])).await
    }

    /// Accounts already authorized, without prompting (`eth_accounts`).
    async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.request_as("eth_accounts", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64, ProviderError> {
        let raw: String = self.request_as("eth_chainId", json!([])).await?;
        parse_hex_u64(&raw).ok_or_else(|| ProviderError::Decode {
            method: "eth_chainId".to_string(),
            reason: format!("not a hex quantity: {}", raw),
        })
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError> {
        self.request(
            "wallet_switchEthereumChain",
            json!([{ "chainId": to_hex_quantity(chain_id) }]),
        )
        .await?;
        Ok(())
    }

    async fn add_chain(&self, descriptor: &ChainDescriptor) -> Result<(), ProviderError> {
        self.request("wallet_addEthereumChain", json!([descriptor])).await?;
        Ok(())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError> {
        self.request_as("eth_getBalance", json!([address, "latest"])).await
    }

    /// `eth_call` at `block`, or at the latest block.
    async fn call(&self, tx: &TransactionRequest, block: Option<u64>) -> Result<Bytes, ProviderError> {
        let tag = block.map(to_hex_quantity).unwrap_or_else(|| "latest".to_string());
        self.request_as("eth_call", json!([tx, tag])).await
    }

    /// Hand a transaction to the wallet for signing and broadcast.
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<H256, ProviderError> {
        self.request_as("eth_sendTransaction", json!([tx])).await
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ProviderError> {
        self.request_as("eth_getTransactionReceipt", json!([hash])).await
    }
}

impl<P: WalletProvider + ?Sized> ProviderExt for P {}
