//! Error types for faucet operations.
//!
//! Every failure a wallet session or faucet client can hit is a variant of
//! [`FaucetError`]. Component boundaries convert these into status strings
//! with [`FaucetError::status_message`] so nothing escapes to the caller's UI
//! shell unrendered.

use thiserror::Error;

use crate::adapters::ProviderError;

/// Errors that can occur during wallet and faucet operations.
#[derive(Debug, Error)]
pub enum FaucetError {
    /// No local wallet provider is present.
    #[error("No wallet provider available")]
    ProviderUnavailable,
    /// The user cancelled the remote pairing handshake.
    #[error("Pairing rejected by user")]
    PairingRejected,
    /// The remote pairing handshake failed for any other reason.
    #[error("Pairing timed out: {reason}")]
    PairingTimeout { reason: String },
    /// The wallet is connected to a chain other than the required testnet.
    #[error("Wrong network: expected chain {expected}, connected to {actual:?}")]
    WrongNetwork { expected: u64, actual: Option<u64> },
    /// A required configuration value is absent.
    #[error("Missing configuration: {key}")]
    ConfigMissing { key: &'static str },
    /// RPC failure while binding to the contract.
    #[error("Connect error: {reason}")]
    ConnectError { reason: String },
    /// RPC failure while broadcasting or waiting on a transaction.
    #[error("Network error: {reason}")]
    NetworkError { reason: String },
    /// The user declined the signing prompt.
    #[error("Transaction rejected by user")]
    UserRejected,
    /// The contract reverted the claim.
    #[error("Transaction reverted: {reason}")]
    TxReverted { reason: String },
    /// No account is authorized in the session.
    #[error("Wallet not connected")]
    NotConnected,
    /// A claim from this session is still pending.
    #[error("A claim is already in flight")]
    ClaimInFlight,
    /// The caller's cooldown has not elapsed yet.
    #[error("Cooldown active: {seconds_remaining}s remaining")]
    CooldownActive { seconds_remaining: u64 },
    /// Invalid input parameters
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl FaucetError {
    /// Whether re-triggering the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectError { .. } | Self::NetworkError { .. })
    }

    /// Human-readable status line for the UI.
    pub fn status_message(&self) -> String {
        match self {
            Self::ProviderUnavailable => {
                "No wallet found. Try connecting with a paired wallet instead.".to_string()
            }
            Self::PairingRejected => "Pairing cancelled.".to_string(),
            Self::PairingTimeout { .. } => "Wallet pairing failed. Try again.".to_string(),
            Self::WrongNetwork { .. } => "Please switch your wallet to the Sepolia testnet.".to_string(),
            Self::ConfigMissing { key } => format!("{} is missing from the configuration", key),
            Self::UserRejected => "Request cancelled in wallet.".to_string(),
            // Revert reasons are shown to the user exactly as the contract wrote them.
            Self::TxReverted { reason } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Wrap a provider failure raised while binding to the contract.
    pub(crate) fn connect(err: ProviderError) -> Self {
        match err {
            ProviderError::UserRejected => Self::UserRejected,
            other => Self::ConnectError { reason: other.to_string() },
        }
    }

    /// Wrap a provider failure raised while broadcasting or awaiting a transaction.
    pub(crate) fn network(err: ProviderError) -> Self {
        match err {
            ProviderError::UserRejected => Self::UserRejected,
            other => Self::NetworkError { reason: other.to_string() },
        }
    }
}

/// Result type alias for faucet operations.
pub type Result<T> = core::result::Result<T, FaucetError>;
