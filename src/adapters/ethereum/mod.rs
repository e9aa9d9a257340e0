//! Ethereum Sepolia adapter module.
//!
//! Chain constants, the local-signer provider, and the faucet contract binding.

mod faucet;
mod injected;

pub use faucet::{FaucetContract, SepoliaFaucetContract, MAX_RECEIPT_POLL_FAILURES};
pub use injected::LocalSignerProvider;

use std::sync::Arc;

use ethers::providers::{Http, Provider, RpcError};

use crate::adapters::ProviderError;
use crate::types::{ChainDescriptor, NativeCurrency};
use crate::utils::to_hex_quantity;

/// Sepolia Chain ID
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

/// Sepolia Chain ID as wallets report it.
pub const SEPOLIA_CHAIN_ID_HEX: &str = "0xaa36a7";

/// Public Sepolia RPC endpoint
pub const DEFAULT_SEPOLIA_RPC_URL: &str = "https://rpc.sepolia.org";

pub const SEPOLIA_EXPLORER_URL: &str = "https://sepolia.etherscan.io";

/// Descriptor for `wallet_addEthereumChain` when a wallet does not know Sepolia.
pub fn sepolia_descriptor(rpc_url: &str) -> ChainDescriptor {
    ChainDescriptor {
        chain_id: to_hex_quantity(SEPOLIA_CHAIN_ID),
        chain_name: "Sepolia".to_string(),
        native_currency: NativeCurrency {
            name: "Sepolia Ether".to_string(),
            symbol: "ETH".to_string(),
            decimals: 18,
        },
        rpc_urls: vec![rpc_url.to_string()],
        block_explorer_urls: vec![SEPOLIA_EXPLORER_URL.to_string()],
    }
}

/// HTTP JSON-RPC connection to a node. Does not touch the network.
pub(crate) fn connect_node(url: &str) -> Result<Arc<Provider<Http>>, ProviderError> {
    Provider::<Http>::try_from(url)
        .map(Arc::new)
        .map_err(|e| ProviderError::Transport(format!("Invalid RPC URL {}: {}", url, e)))
}

/// Map a node failure onto the provider error taxonomy.
pub(crate) fn from_node_error(err: &ethers::providers::ProviderError) -> ProviderError {
    match RpcError::as_error_response(err) {
        Some(resp) => ProviderError::from_rpc(resp.code, resp.message.clone(), resp.data.clone()),
        None => ProviderError::Transport(err.to_string()),
    }
}
