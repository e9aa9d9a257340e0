//! Sepolia faucet command-line client.
//!
//! Connects the locally configured signer, reads the faucet contract, and
//! claims when the cooldown allows it.
//!
//! Usage:
//!   FAUCET_CONTRACT_ADDRESS=0x... ETHEREUM_PRIVATE_KEY=0x... faucet-cli status
//!   faucet-cli --switch-network claim
//!   faucet-cli watch

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use sepolia_faucet::config::{ENV_CONTRACT_ADDRESS, ENV_PRIVATE_KEY, ENV_PROJECT_ID, ENV_RPC_URL};
use sepolia_faucet::{
    Clock, ConnectionKind, Connector, FaucetClient, FaucetConfig, FaucetError, PairingUri, SystemClock,
    WalletSession,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "faucet-cli", version, about = "Claim Sepolia ETH from the faucet contract")]
struct Args {
    /// Deployed faucet contract address
    #[arg(long, env = ENV_CONTRACT_ADDRESS, value_parser = parse_address)]
    contract: Option<Address>,

    /// Sepolia JSON-RPC endpoint
    #[arg(long, env = ENV_RPC_URL)]
    rpc_url: Option<String>,

    /// Key of the local signer
    #[arg(long, env = ENV_PRIVATE_KEY, hide_env_values = true)]
    private_key: Option<String>,

    /// Remote pairing project id
    #[arg(long, env = ENV_PROJECT_ID)]
    project_id: Option<String>,

    /// Ask the wallet to move to Sepolia if it is elsewhere
    #[arg(long)]
    switch_network: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print balance, claim amount and countdown once
    Status,
    /// Claim once and print progress
    Claim,
    /// Keep printing the countdown until interrupted or logged out
    Watch,
    /// Print a fresh pairing URI for a remote wallet
    PairUri,
}

fn parse_address(s: &str) -> Result<Address, &'static str> {
    s.trim().parse().map_err(|_| "Failed to parse address")
}

impl Args {
    fn config(&self) -> Result<FaucetConfig> {
        let mut config = FaucetConfig::from_env().map_err(report)?;
        if let Some(contract) = self.contract {
            config.contract_address = Some(contract);
        }
        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(key) = &self.private_key {
            config.private_key = Some(key.clone());
        }
        if let Some(project_id) = &self.project_id {
            config.project_id = project_id.clone();
        }
        Ok(config)
    }
}

/// Render a faucet error as its user-facing status line.
fn report(err: FaucetError) -> anyhow::Error {
    anyhow!(err.status_message())
}

async fn open_client(config: &FaucetConfig, switch_network: bool) -> Result<(WalletSession, Arc<FaucetClient>)> {
    // Fail on configuration before prompting the wallet.
    config.require_contract_address().map_err(report)?;

    let connector = Connector::from_config(config.clone()).map_err(report)?;
    let mut session = WalletSession::new(connector);
    let snapshot = session.connect(ConnectionKind::Injected).await.map_err(report)?;
    if snapshot.is_wrong_network() && switch_network {
        session.switch_network().await.map_err(report)?;
    }

    let client = FaucetClient::initialize(&session, config).await.map_err(report)?;
    Ok((session, client))
}

async fn claim(client: &FaucetClient) -> Result<()> {
    let mut status = client.subscribe_status();
    let printer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let line = status.borrow_and_update().to_string();
            if !line.is_empty() {
                println!("{}", line);
            }
        }
    });

    let result = client.claim().await;
    printer.abort();
    if let (Err(_), Some(tx_hash)) = (&result, client.pending_tx()) {
        println!("Claim {:?} was broadcast but its outcome is unknown; check it before claiming again.", tx_hash);
    }
    let receipt = result.map_err(report)?;
    println!("Transaction: {:?}", receipt.tx_hash);
    println!("{}", client.view());
    Ok(())
}

async fn watch(client: &Arc<FaucetClient>) -> Result<()> {
    let poller = client.spawn_polling();
    let mut ticker = tokio::time::interval(client.tick_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                if poller.is_finished() {
                    println!("Wallet disconnected.");
                    break;
                }
                let view = client.view();
                println!(
                    "{} | balance {} ETH",
                    view.countdown.unwrap_or_else(|| "...".to_string()),
                    view.faucet_balance.unwrap_or_else(|| "...".to_string()),
                );
            }
        }
    }

    poller.cancel().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.config()?;

    match args.command {
        Command::PairUri => {
            let uri = PairingUri::generate(SystemClock.now_unix());
            println!("Project: {}", config.project_id);
            println!("{}", uri);
        }
        Command::Status => {
            let (_session, client) = open_client(&config, args.switch_network).await?;
            println!("{}", client.view());
        }
        Command::Claim => {
            let (_session, client) = open_client(&config, args.switch_network).await?;
            claim(&client).await?;
        }
        Command::Watch => {
            let (_session, client) = open_client(&config, args.switch_network).await?;
            watch(&client).await?;
        }
    }

    Ok(())
}
