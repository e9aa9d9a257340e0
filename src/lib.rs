//! # Sepolia Faucet
//!
//! Client library for a rate-limited Sepolia testnet faucet contract.
//!
//! A [`WalletSession`] reaches the user's wallet either through an
//! in-process provider or through a remotely paired signer, and tracks the
//! authorized account and active chain. A [`FaucetClient`] bound to that
//! session reads the contract's public state, derives the claim countdown
//! locally, and submits claims once the cooldown has elapsed.
//!
//! ## Features
//!
//! - **Chain is authoritative**: the countdown is always recomputed from the
//!   last on-chain read, never trusted over a fresh one
//! - **Single-flight claims**: a second claim while one is pending is rejected
//! - **Network gating**: claims are refused off Sepolia
//! - **Cancellable polling**: refresh stops when the session logs out
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sepolia_faucet::{ConnectionKind, Connector, FaucetClient, FaucetConfig, WalletSession};
//!
//! # async fn run() -> sepolia_faucet::Result<()> {
//! let config = FaucetConfig::from_env()?;
//!
//! // Connect: ask the wallet for an account
//! let mut session = WalletSession::new(Connector::from_config(config.clone())?);
//! session.connect(ConnectionKind::Injected).await?;
//!
//! // Bind: read amount, cooldown, last claim and balance
//! let client = FaucetClient::initialize(&session, &config).await?;
//! let _poller = client.spawn_polling();
//!
//! // Claim once the countdown reaches zero
//! if client.claim_enabled() {
//!     let receipt = client.claim().await?;
//!     println!("claimed in {:?}", receipt.tx_hash);
//! }
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod adapters;
pub mod config;
pub mod error;
pub mod runtime;
pub mod types;
pub mod utils;

// Re-export the wallet and contract surface
pub use adapters::ethereum::{FaucetContract, LocalSignerProvider, SepoliaFaucetContract};
pub use adapters::remote::{PairingRelay, PairingUri, RemoteConfig, RemoteProvider};
pub use adapters::{ProviderError, ProviderEvent, ProviderExt, WalletProvider};

// Re-export the runtime
pub use runtime::{Connector, FaucetClient, FaucetView, PollHandle, WalletSession};

// Re-export types
pub use config::FaucetConfig;
pub use error::{FaucetError, Result};
pub use types::{ClaimReceipt, ClaimStatus, ConnectionKind, FaucetState, NetworkStatus, Session};
pub use utils::{seconds_remaining, Clock, ManualClock, SystemClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Chain the faucet is deployed on (Sepolia).
pub const REQUIRED_CHAIN_ID: u64 = adapters::ethereum::SEPOLIA_CHAIN_ID;
