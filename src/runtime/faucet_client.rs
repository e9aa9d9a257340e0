//! Faucet client: contract reads, the local countdown, and the claim flow.
//!
//! Contract state is authoritative. The countdown is never mutated directly;
//! [`FaucetClient::tick`] recomputes it from the last values read off chain
//! and the clock, and every refresh overwrites it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ethers::types::{Address, H256, U256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapters::ethereum::{FaucetContract, SepoliaFaucetContract};
use crate::adapters::ProviderError;
use crate::config::FaucetConfig;
use crate::error::{FaucetError, Result};
use crate::runtime::session::WalletSession;
use crate::types::{ClaimReceipt, ClaimStatus, ConnectionKind, FaucetState, NetworkStatus, Session};
use crate::utils::{
    format_countdown, format_ether, saturating_u64, seconds_remaining, short_address, Clock, SystemClock,
};

/// Refresh generation that last wrote each field.
#[derive(Debug, Default)]
struct Stamps {
    claim_amount: u64,
    cooldown_period: u64,
    last_claim_timestamp: u64,
    faucet_balance: u64,
}

#[derive(Debug, Default)]
struct Inner {
    state: FaucetState,
    stamps: Stamps,
    /// Account `last_claim_timestamp` belongs to.
    account: Option<Address>,
    countdown: Option<u64>,
    /// Broadcast claim whose outcome is not known yet.
    pending_tx: Option<H256>,
    /// When the last claim was confirmed, for clearing its status.
    confirmed_at: Option<u64>,
}

impl Inner {
    fn recompute(&mut self, now: u64) -> Option<u64> {
        self.countdown = match (self.state.last_claim_timestamp, self.state.cooldown_period) {
            (Some(last), Some(cooldown)) => Some(seconds_remaining(last, cooldown, now)),
            _ => None,
        };
        self.countdown
    }
}

/// Results of one refresh cycle's reads.
struct Reads {
    account: Option<Address>,
    claim_amount: core::result::Result<U256, ProviderError>,
    cooldown_period: core::result::Result<U256, ProviderError>,
    last_claim_timestamp: Option<core::result::Result<U256, ProviderError>>,
    faucet_balance: core::result::Result<U256, ProviderError>,
}

impl Reads {
    fn first_error(&self) -> Option<&ProviderError> {
        self.claim_amount
            .as_ref()
            .err()
            .or(self.cooldown_period.as_ref().err())
            .or(self.last_claim_timestamp.as_ref().and_then(|r| r.as_ref().err()))
            .or(self.faucet_balance.as_ref().err())
    }
}

/// Seconds a confirmed claim's status stays up before returning to idle.
pub const CONFIRMED_STATUS_SECS: u64 = 3;

/// Clears the in-flight flag when the claim finishes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Client for one faucet contract, following one wallet session.
pub struct FaucetClient {
    contract: Arc<dyn FaucetContract>,
    session: watch::Receiver<Session>,
    clock: Arc<dyn Clock>,
    required_chain_id: u64,
    poll_interval: Duration,
    tick_interval: Duration,
    inner: Mutex<Inner>,
    generation: AtomicU64,
    claim_in_flight: AtomicBool,
    status: watch::Sender<ClaimStatus>,
}

impl FaucetClient {
    /// Bind the configured contract through the session's provider and load
    /// its state.
    pub async fn initialize(session: &WalletSession, config: &FaucetConfig) -> Result<Arc<Self>> {
        let address = config.require_contract_address()?;
        let provider = session.provider().ok_or(FaucetError::NotConnected)?;
        let contract = SepoliaFaucetContract::new(address, provider)
            .with_receipt_poll_interval(config.receipt_poll_interval);

        Self::with_contract(Arc::new(contract), session.subscribe(), config, Arc::new(SystemClock)).await
    }

    /// Bind an explicit contract handle. The first refresh is strict: any
    /// failed read is a `ConnectError`.
    pub async fn with_contract(
        contract: Arc<dyn FaucetContract>,
        session: watch::Receiver<Session>,
        config: &FaucetConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let snapshot = session.borrow().clone();
        if !snapshot.is_connected() {
            return Err(FaucetError::NotConnected);
        }
        if snapshot.network != NetworkStatus::Supported {
            return Err(FaucetError::WrongNetwork {
                expected: config.required_chain_id,
                actual: snapshot.chain_id,
            });
        }

        let (status, _) = watch::channel(ClaimStatus::Idle);
        let client = Arc::new(Self {
            contract,
            session,
            clock,
            required_chain_id: config.required_chain_id,
            poll_interval: config.poll_interval,
            tick_interval: config.tick_interval,
            inner: Mutex::new(Inner::default()),
            generation: AtomicU64::new(0),
            claim_in_flight: AtomicBool::new(false),
            status,
        });

        let generation = client.next_generation();
        let reads = client.read_all(generation).await;
        if let Some(err) = reads.first_error() {
            return Err(FaucetError::connect(err.clone()));
        }
        client.apply(generation, reads);
        info!(contract = ?client.contract.address(), "Faucet client initialized");
        Ok(client)
    }

    /// Re-read all contract state.
    ///
    /// Reads run concurrently and are applied independently: a failed read is
    /// logged and leaves the previous value in place. Each value carries the
    /// generation of the refresh that produced it and only overwrites a
    /// value from an older refresh.
    pub async fn refresh_state(&self) -> FaucetState {
        let generation = self.next_generation();
        let reads = self.read_all(generation).await;
        self.apply(generation, reads)
    }

    /// Recompute the countdown from the last read and the clock. No I/O.
    pub fn tick(&self) -> Option<u64> {
        let now = self.clock.now_unix();
        let (countdown, confirmed_expired) = {
            let mut inner = self.lock();
            let expired = inner
                .confirmed_at
                .map_or(false, |at| now >= at.saturating_add(CONFIRMED_STATUS_SECS));
            if expired {
                inner.confirmed_at = None;
            }
            (inner.recompute(now), expired)
        };
        if confirmed_expired {
            self.status.send_if_modified(|status| {
                let confirmed = matches!(status, ClaimStatus::Confirmed { .. });
                if confirmed {
                    *status = ClaimStatus::Idle;
                }
                confirmed
            });
        }
        countdown
    }

    /// Submit one claim and wait for it to be included.
    ///
    /// Rejected up front while another claim from this client is pending,
    /// while the session is not on the required chain, or while the cooldown
    /// is running. After inclusion the state is re-read from the chain.
    ///
    /// Once a claim has been broadcast it stays pending until its receipt is
    /// known. If waiting for the receipt fails, calling `claim` again resumes
    /// waiting on the same transaction instead of sending another one.
    pub async fn claim(&self) -> Result<ClaimReceipt> {
        if self
            .claim_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FaucetError::ClaimInFlight);
        }
        let _guard = InFlight(&self.claim_in_flight);

        let pending = self.lock().pending_tx;
        let outcome = match pending {
            Some(tx_hash) => {
                self.ensure_on_network()?;
                info!(tx_hash = ?tx_hash, "Resuming wait for broadcast claim");
                self.confirm(tx_hash).await
            }
            None => {
                let from = self.ensure_claimable()?;
                self.submit(from).await
            }
        };

        match outcome {
            Ok(receipt) => {
                self.lock().confirmed_at = Some(self.clock.now_unix());
                self.status.send_replace(ClaimStatus::Confirmed { tx_hash: receipt.tx_hash });
                Ok(receipt)
            }
            Err(FaucetError::UserRejected) => {
                debug!("Claim declined in wallet");
                self.status.send_replace(ClaimStatus::Idle);
                Err(FaucetError::UserRejected)
            }
            Err(err) => {
                error!(error = %err, "Claim failed");
                self.status.send_replace(ClaimStatus::Failed {
                    message: err.status_message(),
                });
                Err(err)
            }
        }
    }

    /// Whether the claim action should be offered right now.
    pub fn claim_enabled(&self) -> bool {
        self.session.borrow().is_ready()
            && self.tick() == Some(0)
            && !self.is_claim_pending()
    }

    /// Whether a claim is running or a broadcast claim awaits its receipt.
    pub fn is_claim_pending(&self) -> bool {
        self.claim_in_flight.load(Ordering::SeqCst) || self.lock().pending_tx.is_some()
    }

    /// Hash of a broadcast claim whose outcome is not known yet.
    pub fn pending_tx(&self) -> Option<H256> {
        self.lock().pending_tx
    }

    /// Seconds until the next claim, as of the last tick or refresh.
    pub fn seconds_remaining(&self) -> Option<u64> {
        self.lock().countdown
    }

    pub fn state(&self) -> FaucetState {
        self.lock().state.clone()
    }

    pub fn claim_status(&self) -> ClaimStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ClaimStatus> {
        self.status.subscribe()
    }

    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub(crate) fn session_receiver(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }

    pub fn contract_address(&self) -> Address {
        self.contract.address()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Presentation snapshot.
    pub fn view(&self) -> FaucetView {
        let session = self.session();
        let claim_enabled = self.claim_enabled();
        let (state, seconds_remaining) = {
            let inner = self.lock();
            (inner.state.clone(), inner.countdown)
        };

        FaucetView {
            account: session.address.as_ref().map(short_address),
            kind: session.kind,
            network: session.network,
            faucet_balance: state.faucet_balance.map(format_ether),
            claim_amount: state.claim_amount.map(format_ether),
            seconds_remaining,
            countdown: seconds_remaining.map(format_countdown),
            claim_enabled,
            status: self.claim_status(),
        }
    }

    fn ensure_on_network(&self) -> Result<Address> {
        let session = self.session();
        let from = session.address.ok_or(FaucetError::NotConnected)?;
        if session.network != NetworkStatus::Supported {
            return Err(FaucetError::WrongNetwork {
                expected: self.required_chain_id,
                actual: session.chain_id,
            });
        }
        Ok(from)
    }

    fn ensure_claimable(&self) -> Result<Address> {
        let from = self.ensure_on_network()?;
        match self.tick() {
            Some(0) => Ok(from),
            Some(seconds_remaining) => Err(FaucetError::CooldownActive { seconds_remaining }),
            None => Err(FaucetError::NetworkError {
                reason: "faucet state has not been loaded".to_string(),
            }),
        }
    }

    async fn submit(&self, from: Address) -> Result<ClaimReceipt> {
        self.status.send_replace(ClaimStatus::AwaitingConfirmation);
        let tx_hash = self.contract.submit_claim(from).await?;
        info!(account = %from, tx_hash = ?tx_hash, "Claim broadcast");
        self.lock().pending_tx = Some(tx_hash);
        self.confirm(tx_hash).await
    }

    /// Wait for a broadcast claim. A retryable failure leaves it pending.
    async fn confirm(&self, tx_hash: H256) -> Result<ClaimReceipt> {
        self.status.send_replace(ClaimStatus::Broadcasting { tx_hash });
        let receipt = match self.contract.wait_for_inclusion(tx_hash).await {
            Ok(receipt) => receipt,
            Err(err) if err.is_retryable() => {
                warn!(tx_hash = ?tx_hash, error = %err, "Claim outcome unknown; keeping it pending");
                return Err(err);
            }
            Err(err) => {
                self.lock().pending_tx = None;
                return Err(err);
            }
        };
        self.lock().pending_tx = None;
        info!(tx_hash = ?tx_hash, block = ?receipt.block_number, "Claim confirmed");

        // The optimistic countdown is discarded; the chain's timestamp wins.
        self.refresh_state().await;
        Ok(receipt)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget per-account data if the session moved to another account.
    fn sync_account(&self, account: Option<Address>, generation: u64) {
        let mut inner = self.lock();
        if inner.account != account {
            if inner.account.is_some() {
                debug!(account = ?account, "Account changed; discarding last claim time");
            }
            inner.account = account;
            inner.state.last_claim_timestamp = None;
            // Older refreshes still in flight are stale.
            inner.stamps.last_claim_timestamp = generation - 1;
            inner.countdown = None;
        }
    }

    async fn read_all(&self, generation: u64) -> Reads {
        let account = self.session.borrow().address;
        self.sync_account(account, generation);

        let last_claim = async {
            match account {
                Some(user) => Some(self.contract.last_claim_time(user).await),
                None => None,
            }
        };
        let (claim_amount, cooldown_period, last_claim_timestamp, faucet_balance) = tokio::join!(
            self.contract.amount(),
            self.contract.cooldown(),
            last_claim,
            self.contract.balance(),
        );

        Reads {
            account,
            claim_amount,
            cooldown_period,
            last_claim_timestamp,
            faucet_balance,
        }
    }

    fn apply(&self, generation: u64, reads: Reads) -> FaucetState {
        let now = self.clock.now_unix();
        let mut inner = self.lock();

        match reads.claim_amount {
            Ok(v) if generation > inner.stamps.claim_amount => {
                inner.state.claim_amount = Some(v);
                inner.stamps.claim_amount = generation;
            }
            Ok(_) => {}
            Err(e) => warn!(field = "claim_amount", error = %e, "Refresh read failed; keeping last value"),
        }
        match reads.cooldown_period {
            Ok(v) if generation > inner.stamps.cooldown_period => {
                inner.state.cooldown_period = Some(saturating_u64(v));
                inner.stamps.cooldown_period = generation;
            }
            Ok(_) => {}
            Err(e) => warn!(field = "cooldown_period", error = %e, "Refresh read failed; keeping last value"),
        }
        match reads.last_claim_timestamp {
            Some(Ok(v)) if generation > inner.stamps.last_claim_timestamp && reads.account == inner.account => {
                inner.state.last_claim_timestamp = Some(saturating_u64(v));
                inner.stamps.last_claim_timestamp = generation;
            }
            Some(Err(e)) => {
                warn!(field = "last_claim_timestamp", error = %e, "Refresh read failed; keeping last value")
            }
            _ => {}
        }
        match reads.faucet_balance {
            Ok(v) if generation > inner.stamps.faucet_balance => {
                inner.state.faucet_balance = Some(v);
                inner.stamps.faucet_balance = generation;
            }
            Ok(_) => {}
            Err(e) => warn!(field = "faucet_balance", error = %e, "Refresh read failed; keeping last value"),
        }

        let countdown = inner.recompute(now);
        debug!(generation, seconds_remaining = ?countdown, "Faucet state refreshed");
        inner.state.clone()
    }
}

impl fmt::Debug for FaucetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("FaucetClient")
            .field("contract", &self.contract.address())
            .field("state", &state)
            .field("claim_pending", &self.is_claim_pending())
            .finish()
    }
}

/// What a front-end renders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaucetView {
    /// Shortened account, e.g. `0x1234…abcd`.
    pub account: Option<String>,
    pub kind: ConnectionKind,
    pub network: NetworkStatus,
    /// Faucet balance in ether.
    pub faucet_balance: Option<String>,
    /// Per-claim amount in ether.
    pub claim_amount: Option<String>,
    pub seconds_remaining: Option<u64>,
    pub countdown: Option<String>,
    pub claim_enabled: bool,
    pub status: ClaimStatus,
}

impl fmt::Display for FaucetView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = || "...".to_string();
        writeln!(f, "Account:  {} ({})", self.account.clone().unwrap_or_else(|| "not connected".into()), self.kind)?;
        if let NetworkStatus::WrongNetwork { chain_id } = self.network {
            writeln!(f, "Network:  wrong network (chain {}); switch to Sepolia", chain_id)?;
        }
        writeln!(f, "Balance:  {} ETH", self.faucet_balance.clone().unwrap_or_else(unknown))?;
        writeln!(f, "Amount:   {} ETH per claim", self.claim_amount.clone().unwrap_or_else(unknown))?;
        writeln!(f, "Next:     {}", self.countdown.clone().unwrap_or_else(unknown))?;
        write!(f, "Claim:    {}", if self.claim_enabled { "available" } else { "unavailable" })?;
        if self.status != ClaimStatus::Idle {
            write!(f, "\nStatus:   {}", self.status)?;
        }
        Ok(())
    }
}
