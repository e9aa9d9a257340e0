//! Faucet configuration.
//!
//! The only setting the faucet cannot run without is the contract address.
//! Everything else has a Sepolia default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::Address;

use crate::adapters::ethereum::{DEFAULT_SEPOLIA_RPC_URL, SEPOLIA_CHAIN_ID};
use crate::error::{FaucetError, Result};

/// Environment variable holding the deployed faucet contract address.
pub const ENV_CONTRACT_ADDRESS: &str = "FAUCET_CONTRACT_ADDRESS";

/// Environment variable holding the read RPC endpoint.
pub const ENV_RPC_URL: &str = "SEPOLIA_RPC_URL";

/// Environment variable holding the local signer's key.
pub const ENV_PRIVATE_KEY: &str = "ETHEREUM_PRIVATE_KEY";

/// Environment variable holding the remote pairing project id.
pub const ENV_PROJECT_ID: &str = "WALLETCONNECT_PROJECT_ID";

/// Environment variable overriding the refresh interval.
pub const ENV_POLL_INTERVAL: &str = "FAUCET_POLL_INTERVAL_SECS";

/// Relay project id used when none is configured.
pub const DEFAULT_PROJECT_ID: &str = "2f19360761d84238a6b1375529db7d54";

#[derive(Clone, Debug)]
pub struct FaucetConfig {
    pub contract_address: Option<Address>,
    pub rpc_url: String,
    pub private_key: Option<String>,
    pub project_id: String,
    pub required_chain_id: u64,
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    /// Cadence of receipt polling while a claim awaits inclusion. Not a timeout.
    pub receipt_poll_interval: Duration,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            contract_address: None,
            rpc_url: DEFAULT_SEPOLIA_RPC_URL.to_string(),
            private_key: None,
            project_id: DEFAULT_PROJECT_ID.to_string(),
            required_chain_id: SEPOLIA_CHAIN_ID,
            poll_interval: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            receipt_poll_interval: Duration::from_secs(2),
        }
    }
}

impl FaucetConfig {
    /// Config for a known contract with Sepolia defaults.
    pub fn new(contract_address: Address) -> Self {
        Self {
            contract_address: Some(contract_address),
            ..Self::default()
        }
    }

    /// Build config from environment variables.
    ///
    /// A missing contract address is not an error here; it surfaces as
    /// `ConfigMissing` when the faucet client is initialized.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = non_empty(lookup(ENV_CONTRACT_ADDRESS)) {
            let address = Address::from_str(raw.trim()).map_err(|e| FaucetError::InvalidInput {
                reason: format!("Invalid {}: {}", ENV_CONTRACT_ADDRESS, e),
            })?;
            config.contract_address = Some(address);
        }
        if let Some(url) = non_empty(lookup(ENV_RPC_URL)) {
            config.rpc_url = url.trim().to_string();
        }
        config.private_key = non_empty(lookup(ENV_PRIVATE_KEY));
        if let Some(project_id) = non_empty(lookup(ENV_PROJECT_ID)) {
            config.project_id = project_id;
        }
        if let Some(raw) = non_empty(lookup(ENV_POLL_INTERVAL)) {
            let secs: u64 = raw.trim().parse().map_err(|_| FaucetError::InvalidInput {
                reason: format!("{} must be a whole number of seconds", ENV_POLL_INTERVAL),
            })?;
            if secs == 0 {
                return Err(FaucetError::InvalidInput {
                    reason: format!("{} must be greater than zero", ENV_POLL_INTERVAL),
                });
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// The contract address, or the fatal `ConfigMissing` error.
    pub fn require_contract_address(&self) -> Result<Address> {
        self.contract_address
            .ok_or(FaucetError::ConfigMissing { key: ENV_CONTRACT_ADDRESS })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
