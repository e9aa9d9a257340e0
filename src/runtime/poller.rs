//! Background refresh task bound to a session's lifetime.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::runtime::faucet_client::FaucetClient;

/// Handle to a running poll task. Dropping it stops the task.
///
/// Stopping the task only ends future reads; a claim that was already
/// submitted keeps running in its own caller.
pub struct PollHandle {
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl PollHandle {
    /// Stop the task and wait for it to exit. A refresh still waiting on
    /// the node is abandoned.
    pub async fn cancel(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the task has exited, e.g. because the session logged out.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the task to exit on its own.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl FaucetClient {
    /// Start ticking the countdown and refreshing contract state on the
    /// configured intervals until the session's address is cleared.
    ///
    /// A change to a different account triggers an immediate refresh.
    pub fn spawn_polling(self: &Arc<Self>) -> PollHandle {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(Arc::clone(self), shutdown_rx));
        PollHandle {
            task: Some(task),
            shutdown: Some(shutdown),
        }
    }
}

async fn run(client: Arc<FaucetClient>, mut shutdown: oneshot::Receiver<()>) {
    let mut session = client.session_receiver();
    let start = Instant::now();
    let mut tick = interval_at(start + client.tick_interval(), client.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll = interval_at(start + client.poll_interval(), client.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut account = session.borrow_and_update().address;
    debug!(account = ?account, "Polling started");

    while account.is_some() {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Polling cancelled");
                return;
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = session.borrow_and_update().address;
                if current.is_some() && current != account && !refresh(&client, &mut shutdown).await {
                    return;
                }
                account = current;
            }
            _ = poll.tick() => {
                if !refresh(&client, &mut shutdown).await {
                    return;
                }
            }
            _ = tick.tick() => {
                client.tick();
            }
        }
    }
    info!("Session ended; polling stopped");
}

/// Refresh unless cancelled first. Returns `false` on cancellation.
async fn refresh(client: &FaucetClient, shutdown: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = client.refresh_state() => true,
        _ = shutdown => {
            debug!("Polling cancelled during refresh");
            false
        }
    }
}
