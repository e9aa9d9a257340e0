//! Wallet session.
//!
//! A [`WalletSession`] is bound to exactly one provider at a time: the one
//! chosen by the most recent explicit [`WalletSession::connect`]. Only that
//! provider is subscribed to, so events from any other wallet the user has
//! open are never applied. Snapshots are published on a `watch` channel.

use std::fmt;
use std::sync::Arc;

use ethers::types::Address;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::ethereum::{sepolia_descriptor, LocalSignerProvider};
use crate::adapters::remote::{PairingRelay, PairingUri, RemoteConfig, RemoteProvider};
use crate::adapters::{ProviderError, ProviderEvent, ProviderExt, WalletProvider};
use crate::config::FaucetConfig;
use crate::error::{FaucetError, Result};
use crate::types::{ConnectionKind, NetworkStatus, Session};

type UriHandler = Arc<dyn Fn(&PairingUri) + Send + Sync>;

/// The ways a session can reach a wallet.
pub struct Connector {
    config: FaucetConfig,
    injected: Option<Arc<dyn WalletProvider>>,
    relay: Option<Arc<dyn PairingRelay>>,
    remote_config: RemoteConfig,
    on_pairing_uri: Option<UriHandler>,
}

impl Connector {
    /// A connector with no wallet paths configured.
    pub fn new(config: FaucetConfig) -> Self {
        let remote_config = RemoteConfig::from_config(&config);
        Self {
            config,
            injected: None,
            relay: None,
            remote_config,
            on_pairing_uri: None,
        }
    }

    /// A connector whose injected path is a local signer, when a key is configured.
    pub fn from_config(config: FaucetConfig) -> Result<Self> {
        let connector = Self::new(config);
        match LocalSignerProvider::from_config(&connector.config) {
            Ok(provider) => Ok(connector.with_injected(Arc::new(provider))),
            Err(FaucetError::ProviderUnavailable) => Ok(connector),
            Err(e) => Err(e),
        }
    }

    pub fn with_injected(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.injected = Some(provider);
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn PairingRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_remote_config(mut self, remote_config: RemoteConfig) -> Self {
        self.remote_config = remote_config;
        self
    }

    /// Called with the pairing URI to present as a QR code or deep link.
    pub fn on_pairing_uri<F>(mut self, handler: F) -> Self
    where
        F: Fn(&PairingUri) + Send + Sync + 'static,
    {
        self.on_pairing_uri = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &FaucetConfig {
        &self.config
    }

    pub fn has_injected(&self) -> bool {
        self.injected.is_some()
    }

    async fn open(&self, kind: ConnectionKind) -> Result<Bound> {
        match kind {
            ConnectionKind::Injected => {
                let provider = self.injected.clone().ok_or(FaucetError::ProviderUnavailable)?;
                Ok(Bound { provider, remote: None })
            }
            ConnectionKind::Remote => {
                let relay = self.relay.clone().ok_or_else(|| FaucetError::PairingTimeout {
                    reason: "no pairing relay configured".to_string(),
                })?;
                let handler = self.on_pairing_uri.clone();
                let remote = RemoteProvider::pair(relay, self.remote_config.clone(), |uri| {
                    if let Some(handler) = handler {
                        handler(uri);
                    }
                })
                .await?;
                let remote = Arc::new(remote);
                Ok(Bound {
                    provider: Arc::clone(&remote) as Arc<dyn WalletProvider>,
                    remote: Some(remote),
                })
            }
        }
    }
}

struct Bound {
    provider: Arc<dyn WalletProvider>,
    remote: Option<Arc<RemoteProvider>>,
}

struct Binding {
    bound: Bound,
    listener: JoinHandle<()>,
}

/// An authenticated account on a tracked chain.
pub struct WalletSession {
    connector: Connector,
    binding: Option<Binding>,
    state: Arc<watch::Sender<Session>>,
}

impl WalletSession {
    pub fn new(connector: Connector) -> Self {
        let (state, _) = watch::channel(Session::new(ConnectionKind::Injected));
        Self {
            connector,
            binding: None,
            state: Arc::new(state),
        }
    }

    /// Connect through `kind`, replacing any existing binding.
    ///
    /// Blocks until the user answers the wallet prompt or pairing request.
    pub async fn connect(&mut self, kind: ConnectionKind) -> Result<Session> {
        let bound = self.connector.open(kind).await?;
        self.connect_bound(bound).await
    }

    /// Authorize and bind an opened provider. A paired relay session is
    /// closed again if that fails.
    async fn connect_bound(&mut self, bound: Bound) -> Result<Session> {
        let remote = bound.remote.clone();
        let kind = bound.provider.kind();
        let result = match authorize(bound.provider.as_ref()).await {
            Ok(address) => self.bind(bound, address).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(session) => {
                info!(account = ?session.address, kind = %kind, chain_id = ?session.chain_id, "Wallet connected");
                Ok(session)
            }
            Err(err) => {
                if let Some(remote) = remote {
                    debug!("Connect failed after pairing; closing relay session");
                    release(&remote).await;
                }
                Err(err)
            }
        }
    }

    /// Reattach to an injected wallet that already authorized this client,
    /// without prompting. Returns `None` when nothing is authorized.
    pub async fn restore(&mut self) -> Result<Option<Session>> {
        let bound = match self.connector.open(ConnectionKind::Injected).await {
            Ok(bound) => bound,
            Err(FaucetError::ProviderUnavailable) => return Ok(None),
            Err(e) => return Err(e),
        };
        let accounts = bound.provider.accounts().await.map_err(FaucetError::connect)?;
        let Some(address) = accounts.first().copied() else {
            debug!("No previously authorized account");
            return Ok(None);
        };
        let session = self.bind(bound, address).await?;
        info!(account = %address, "Wallet session restored");
        Ok(Some(session))
    }

    /// Currently authorized address, if any.
    pub fn active_address(&self) -> Option<Address> {
        self.state.borrow().address
    }

    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receive every session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// The bound provider, for contract binding.
    pub fn provider(&self) -> Option<Arc<dyn WalletProvider>> {
        self.binding.as_ref().map(|b| Arc::clone(&b.bound.provider))
    }

    pub fn required_chain_id(&self) -> u64 {
        self.connector.config.required_chain_id
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Apply an account change reported by the provider.
    pub fn on_accounts_changed(&self, address: Option<Address>) {
        apply_event(
            &self.state,
            self.required_chain_id(),
            ProviderEvent::AccountsChanged(address.into_iter().collect()),
        );
    }

    /// Apply a chain change reported by the provider.
    pub fn on_chain_changed(&self, chain_id: u64) {
        apply_event(&self.state, self.required_chain_id(), ProviderEvent::ChainChanged(chain_id));
    }

    /// Ask the wallet to move to the required chain, adding it first if the
    /// wallet does not know it.
    pub async fn switch_network(&self) -> Result<()> {
        let provider = self.provider().ok_or(FaucetError::NotConnected)?;
        let required = self.required_chain_id();

        match provider.switch_chain(required).await {
            Ok(()) => {}
            Err(ProviderError::UnrecognizedChain(_)) => {
                debug!(chain_id = required, "Wallet does not know chain; adding it");
                provider
                    .add_chain(&sepolia_descriptor(&self.connector.config.rpc_url))
                    .await
                    .map_err(FaucetError::connect)?;
                provider.switch_chain(required).await.map_err(FaucetError::connect)?;
            }
            Err(e) => return Err(FaucetError::connect(e)),
        }

        let chain_id = provider.chain_id().await.map_err(FaucetError::connect)?;
        self.on_chain_changed(chain_id);
        Ok(())
    }

    /// Drop the binding and clear the address.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(binding) = self.binding.take() else {
            return Ok(());
        };
        binding.listener.abort();
        if let Some(remote) = &binding.bound.remote {
            release(remote).await;
        }
        self.state.send_modify(|s| {
            s.address = None;
        });
        info!("Wallet disconnected");
        Ok(())
    }

    async fn bind(&mut self, bound: Bound, address: Address) -> Result<Session> {
        // Subscribe before reading the chain id so no change is lost in between.
        let events = bound.provider.subscribe();
        let chain_id = bound.provider.chain_id().await.map_err(FaucetError::connect)?;

        if let Some(previous) = self.binding.take() {
            previous.listener.abort();
            debug!(kind = %bound.provider.kind(), "Replacing existing wallet binding");
            if let Some(remote) = &previous.bound.remote {
                release(remote).await;
            }
        }

        let required = self.required_chain_id();
        let session = Session {
            address: Some(address),
            chain_id: Some(chain_id),
            kind: bound.provider.kind(),
            network: network_status(chain_id, required),
        };
        if session.is_wrong_network() {
            warn!(chain_id, required, "Wallet is on the wrong network");
        }
        self.state.send_replace(session.clone());

        let listener = spawn_listener(events, Arc::clone(&self.state), required);
        self.binding = Some(Binding { bound, listener });
        Ok(session)
    }
}

impl Drop for WalletSession {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.listener.abort();
        }
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("session", &*self.state.borrow())
            .field("bound", &self.binding.is_some())
            .finish()
    }
}

/// Prompt for accounts and take the first.
async fn authorize(provider: &dyn WalletProvider) -> Result<Address> {
    let accounts = provider.request_accounts().await.map_err(FaucetError::connect)?;
    accounts.first().copied().ok_or_else(|| FaucetError::ConnectError {
        reason: "wallet returned no accounts".to_string(),
    })
}

async fn release(remote: &RemoteProvider) {
    if let Err(e) = remote.disconnect().await {
        warn!(session = %remote.session_topic(), error = %e, "Remote disconnect failed");
    }
}

/// Network status of `chain_id` against the required chain.
pub fn network_status(chain_id: u64, required: u64) -> NetworkStatus {
    if chain_id == required {
        NetworkStatus::Supported
    } else {
        NetworkStatus::WrongNetwork { chain_id }
    }
}

fn apply_event(state: &watch::Sender<Session>, required: u64, event: ProviderEvent) {
    match event {
        ProviderEvent::AccountsChanged(accounts) => {
            let address = accounts.first().copied();
            match address {
                Some(account) => debug!(%account, "Accounts changed"),
                None => info!("Wallet reported no accounts; session logged out"),
            }
            state.send_if_modified(|s| {
                let changed = s.address != address;
                s.address = address;
                changed
            });
        }
        ProviderEvent::ChainChanged(chain_id) => {
            let network = network_status(chain_id, required);
            if matches!(network, NetworkStatus::WrongNetwork { .. }) {
                warn!(chain_id, required, "Chain changed to unsupported network");
            } else {
                debug!(chain_id, "Chain changed");
            }
            state.send_if_modified(|s| {
                let changed = s.chain_id != Some(chain_id);
                s.chain_id = Some(chain_id);
                s.network = network;
                changed
            });
        }
    }
}

fn spawn_listener(
    mut events: broadcast::Receiver<ProviderEvent>,
    state: Arc<watch::Sender<Session>>,
    required: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => apply_event(&state, required, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session listener lagged behind provider events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Provider event stream closed");
    })
}
