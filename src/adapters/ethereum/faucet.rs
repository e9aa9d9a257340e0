//! Sepolia faucet contract binding.
//!
//! The faucet exposes four entry points:
//! `AMOUNT()`, `COOLDOWN()`, `getLastClaimTime(address)` and `claim()`.
//! Its native balance is read through `eth_getBalance`, not the ABI.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::contract::{EthCall, EthDisplay};
use ethers::types::{Address, TransactionRequest, H256, U256};
use tracing::{debug, warn};

use crate::adapters::{ProviderError, ProviderExt, WalletProvider};
use crate::error::{FaucetError, Result};
use crate::types::ClaimReceipt;
use crate::utils::decode_revert_reason;

/// Consecutive failed receipt polls before a claim's outcome is reported
/// as unknown.
pub const MAX_RECEIPT_POLL_FAILURES: u32 = 3;

/// `AMOUNT()`
#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall, EthDisplay)]
#[ethcall(name = "AMOUNT", abi = "AMOUNT()")]
pub struct AmountCall;

/// `COOLDOWN()`
#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall, EthDisplay)]
#[ethcall(name = "COOLDOWN", abi = "COOLDOWN()")]
pub struct CooldownCall;

/// `getLastClaimTime(address)`
#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall, EthDisplay)]
#[ethcall(name = "getLastClaimTime", abi = "getLastClaimTime(address)")]
pub struct GetLastClaimTimeCall {
    pub user: Address,
}

/// `claim()`
#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall, EthDisplay)]
#[ethcall(name = "claim", abi = "claim()")]
pub struct ClaimCall;

/// The faucet operations a client needs.
///
/// Reads surface raw provider errors so callers can decide whether a failure
/// is fatal; claim operations already speak the faucet error taxonomy.
#[async_trait]
pub trait FaucetContract: Send + Sync {
    /// Deployed contract address.
    fn address(&self) -> Address;

    /// Wei paid out per claim.
    async fn amount(&self) -> core::result::Result<U256, ProviderError>;

    /// Seconds between claims.
    async fn cooldown(&self) -> core::result::Result<U256, ProviderError>;

    /// Unix seconds of `user`'s last claim; zero if never claimed.
    async fn last_claim_time(&self, user: Address) -> core::result::Result<U256, ProviderError>;

    /// Native balance held by the contract.
    async fn balance(&self) -> core::result::Result<U256, ProviderError>;

    /// Ask the wallet to sign and broadcast `claim()` from `from`.
    async fn submit_claim(&self, from: Address) -> Result<H256>;

    /// Wait until `tx_hash` is included. There is no timeout; a
    /// `NetworkError` means the outcome is unknown, not that it failed.
    async fn wait_for_inclusion(&self, tx_hash: H256) -> Result<ClaimReceipt>;
}

/// [`FaucetContract`] over any wallet provider.
pub struct SepoliaFaucetContract<P: ?Sized> {
    address: Address,
    provider: Arc<P>,
    receipt_poll_interval: Duration,
}

impl<P: WalletProvider + ?Sized> SepoliaFaucetContract<P> {
    pub fn new(address: Address, provider: Arc<P>) -> Self {
        Self {
            address,
            provider,
            receipt_poll_interval: Duration::from_secs(2),
        }
    }

    /// How often to poll for a receipt while a claim is pending.
    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    fn call_tx<C: AbiEncode>(&self, call: C) -> TransactionRequest {
        TransactionRequest::new().to(self.address).data(call.encode())
    }

    async fn read_u256<C: EthCall + AbiEncode>(&self, call: C) -> core::result::Result<U256, ProviderError> {
        let raw = self.provider.call(&self.call_tx(call), None).await?;
        U256::decode(raw.as_ref()).map_err(|e| ProviderError::Decode {
            method: C::function_name().into_owned(),
            reason: e.to_string(),
        })
    }

    /// Re-run `claim()` as a call to recover why the chain rejected it.
    async fn replay_claim(&self, from: Address, block: Option<u64>) -> Option<String> {
        let tx = self.call_tx(ClaimCall).from(from);
        match self.provider.call(&tx, block).await {
            Ok(_) => None,
            Err(err) => revert_reason(&err),
        }
    }
}

#[async_trait]
impl<P: WalletProvider + ?Sized> FaucetContract for SepoliaFaucetContract<P> {
    fn address(&self) -> Address {
        self.address
    }

    async fn amount(&self) -> core::result::Result<U256, ProviderError> {
        self.read_u256(AmountCall).await
    }

    async fn cooldown(&self) -> core::result::Result<U256, ProviderError> {
        self.read_u256(CooldownCall).await
    }

    async fn last_claim_time(&self, user: Address) -> core::result::Result<U256, ProviderError> {
        self.read_u256(GetLastClaimTimeCall { user }).await
    }

    async fn balance(&self) -> core::result::Result<U256, ProviderError> {
        self.provider.get_balance(self.address).await
    }

    async fn submit_claim(&self, from: Address) -> Result<H256> {
        // Simulate first so a revert shows the contract's reason instead of a
        // wallet prompt for a transaction that cannot succeed.
        if let Some(reason) = self.replay_claim(from, None).await {
            debug!(%from, %reason, "Claim simulation reverted");
            return Err(FaucetError::TxReverted { reason });
        }

        let tx = self.call_tx(ClaimCall).from(from);
        self.provider.send_transaction(&tx).await.map_err(|err| match revert_reason(&err) {
            Some(reason) => FaucetError::TxReverted { reason },
            None => FaucetError::network(err),
        })
    }

    async fn wait_for_inclusion(&self, tx_hash: H256) -> Result<ClaimReceipt> {
        let mut failures = 0;
        let receipt = loop {
            match self.provider.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => break receipt,
                Ok(None) => failures = 0,
                Err(err) => {
                    failures += 1;
                    if failures >= MAX_RECEIPT_POLL_FAILURES {
                        return Err(FaucetError::network(err));
                    }
                    debug!(tx_hash = ?tx_hash, error = %err, failures, "Receipt poll failed; retrying");
                }
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        };

        let block_number = receipt.block_number.map(|b| b.as_u64());
        if receipt.status.map(|s| s.as_u64()) == Some(0) {
            let parent = block_number.map(|b| b.saturating_sub(1));
            let reason = self
                .replay_claim(receipt.from, parent)
                .await
                .unwrap_or_else(|| "Transaction reverted".to_string());
            warn!(tx_hash = ?tx_hash, %reason, "Claim reverted on chain");
            return Err(FaucetError::TxReverted { reason });
        }

        Ok(ClaimReceipt { tx_hash, block_number })
    }
}

/// Reason text for an execution revert, or `None` for any other failure.
fn revert_reason(err: &ProviderError) -> Option<String> {
    if let Some(reason) = err.revert_data().as_deref().and_then(decode_revert_reason) {
        return Some(reason);
    }
    let message = err.rpc_message()?;
    if let Some(reason) = message.strip_prefix("execution reverted: ") {
        return Some(reason.to_string());
    }
    if message.contains("revert") {
        return Some(message.to_string());
    }
    None
}
