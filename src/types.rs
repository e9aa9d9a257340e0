//! Core data types shared by the wallet session and the faucet client.

use core::fmt;

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// How the session reached its signer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    /// A provider available in-process (browser extension analogue).
    Injected,
    /// A wallet paired out of band through a relay.
    Remote,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Injected => write!(f, "injected"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Whether the active chain is the one the faucet lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Chain id not read yet.
    Unknown,
    /// Connected to the required testnet.
    Supported,
    /// Connected elsewhere; faucet actions are gated off.
    WrongNetwork { chain_id: u64 },
}

/// Snapshot of a wallet session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub address: Option<Address>,
    pub chain_id: Option<u64>,
    pub kind: ConnectionKind,
    pub network: NetworkStatus,
}

impl Session {
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            address: None,
            chain_id: None,
            kind,
            network: NetworkStatus::Unknown,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_wrong_network(&self) -> bool {
        matches!(self.network, NetworkStatus::WrongNetwork { .. })
    }

    /// Connected with an account on the required chain.
    pub fn is_ready(&self) -> bool {
        self.address.is_some() && self.network == NetworkStatus::Supported
    }
}

/// Contract state as last read from the chain.
///
/// Every field is `None` until its first successful read. Values are never
/// persisted locally; they are re-read on session change and on each poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaucetState {
    /// Wei transferred per claim (`AMOUNT()`).
    pub claim_amount: Option<U256>,
    /// Seconds between claims (`COOLDOWN()`).
    pub cooldown_period: Option<u64>,
    /// Unix seconds of the bound account's last claim (`getLastClaimTime`).
    pub last_claim_timestamp: Option<u64>,
    /// Native balance of the faucet contract in wei.
    pub faucet_balance: Option<U256>,
}

/// Progress of the session's claim action.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ClaimStatus {
    #[default]
    Idle,
    /// Waiting for the user to approve in their wallet.
    AwaitingConfirmation,
    /// Submitted; waiting for inclusion.
    Broadcasting { tx_hash: H256 },
    Confirmed { tx_hash: H256 },
    Failed { message: String },
}

impl ClaimStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::AwaitingConfirmation | Self::Broadcasting { .. })
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => Ok(()),
            Self::AwaitingConfirmation => write!(f, "Confirm in your wallet..."),
            Self::Broadcasting { .. } => write!(f, "Broadcasting..."),
            Self::Confirmed { .. } => write!(f, "Claim successful!"),
            Self::Failed { message } => write!(f, "{}", message),
        }
    }
}

/// Outcome of an included claim transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

/// Native currency block of an `wallet_addEthereumChain` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// EIP-3085 chain descriptor passed to `wallet_addEthereumChain`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    /// Hex-encoded chain id, e.g. `0xaa36a7`.
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_explorer_urls: Vec<String>,
}

impl ChainDescriptor {
    /// Numeric chain id, if `chain_id` is well-formed hex.
    pub fn chain_id_u64(&self) -> Option<u64> {
        crate::utils::parse_hex_u64(&self.chain_id)
    }
}
