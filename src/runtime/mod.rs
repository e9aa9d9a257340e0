//! Client runtime: the wallet session, the faucet client and its poller.

pub mod faucet_client;
pub mod poller;
pub mod session;

pub use faucet_client::{FaucetClient, FaucetView};
pub use poller::PollHandle;
pub use session::{network_status, Connector, WalletSession};
