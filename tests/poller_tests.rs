mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use tokio::sync::watch;

use common::*;
use sepolia_faucet::{FaucetClient, FaucetConfig, ManualClock, Session};

async fn polled_client(
    last_claim: u64,
) -> (Arc<ManualClock>, Arc<FakeFaucet>, watch::Sender<Session>, Arc<FaucetClient>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let faucet = FakeFaucet::new(Arc::clone(&clock), DAY);
    faucet.set_last_claim(alice(), last_claim);
    let (session, rx) = watch::channel(ready_session(alice()));
    let config = FaucetConfig::new(Address::repeat_byte(0xfa));
    let client = FaucetClient::with_contract(faucet.clone(), rx, &config, clock.clone())
        .await
        .unwrap();
    (clock, faucet, session, client)
}

#[tokio::test(start_paused = true)]
async fn test_refreshes_on_interval() {
    let (_clock, faucet, _session, client) = polled_client(NOW - 1).await;
    assert_eq!(faucet.amount_reads.load(Ordering::SeqCst), 1);

    let handle = client.spawn_polling();
    tokio::time::sleep(Duration::from_millis(11_500)).await;

    // Refreshes at 5s and 10s.
    assert_eq!(faucet.amount_reads.load(Ordering::SeqCst), 3);
    assert!(!handle.is_finished());
    handle.cancel().await;
}

#[tokio::test(start_paused = true)]
async fn test_tick_follows_clock() {
    let (clock, _faucet, _session, client) = polled_client(NOW - (DAY - 3)).await;
    assert_eq!(client.seconds_remaining(), Some(3));

    let handle = client.spawn_polling();
    clock.advance(2);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(client.seconds_remaining(), Some(1));

    clock.advance(5);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.seconds_remaining(), Some(0));
    assert!(client.claim_enabled());
    drop(handle);
}

#[tokio::test(start_paused = true)]
async fn test_logout_stops_polling() {
    let (_clock, faucet, session, client) = polled_client(NOW - 1).await;
    let handle = client.spawn_polling();

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    let reads = faucet.amount_reads.load(Ordering::SeqCst);
    assert_eq!(reads, 2);

    session.send_modify(|s| s.address = None);
    handle.join().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(faucet.amount_reads.load(Ordering::SeqCst), reads);
}

#[tokio::test(start_paused = true)]
async fn test_account_switch_triggers_refresh() {
    let (_clock, faucet, session, client) = polled_client(NOW - 1).await;
    faucet.set_last_claim(bob(), NOW - DAY);
    let _handle = client.spawn_polling();
    tokio::task::yield_now().await;

    session.send_modify(|s| s.address = Some(bob()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(faucet.amount_reads.load(Ordering::SeqCst), 2);
    assert_eq!(client.seconds_remaining(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling() {
    let (_clock, faucet, _session, client) = polled_client(NOW - 1).await;
    let handle = client.spawn_polling();

    handle.cancel().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(faucet.amount_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_leaves_pending_claim_alone() {
    let (_clock, faucet, _session, client) = polled_client(NOW - DAY).await;
    let release = faucet.hold_inclusion();
    let handle = client.spawn_polling();

    let claimer = Arc::clone(&client);
    let claim = tokio::spawn(async move { claimer.claim().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(client.is_claim_pending());

    handle.cancel().await;
    release.send(()).unwrap();

    let receipt = claim.await.unwrap().unwrap();
    assert_eq!(receipt.block_number, Some(1));
    assert_eq!(client.seconds_remaining(), Some(DAY));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_stalled_refresh() {
    let (_clock, faucet, _session, client) = polled_client(NOW - 1).await;
    // The node never answers the next last-claim read.
    let _stalled = faucet.script_last_claim(NOW - 1);
    let handle = client.spawn_polling();
    faucet.gated_read_started.notified().await;

    tokio::time::timeout(Duration::from_secs(1), handle.cancel())
        .await
        .expect("cancel waited on a stalled read");
}
