use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::controller::Controller;
use crate::player::PlayerDriver;

// --- Reconciliation loop ---
//
// Polls the player on a fixed interval and lets the controller correct drift
// (end of file, crashed or idle player). Each pass takes the controller lock,
// so it never interleaves with an operator intent.

pub fn spawn<D: PlayerDriver>(
    controller: Arc<Controller<D>>,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so boot finishes first.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => controller.reconcile().await,
            }
        }
        info!("reconciliation stopped");
    })
}
