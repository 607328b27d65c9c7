//! Periodic cycle driver

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

/// Run `tick` every `period` until `shutdown` resolves.
///
/// The first tick fires immediately. A tick in progress always completes
/// before shutdown is observed. Returns the number of completed ticks.
pub async fn run_every<F, Fut, S>(period: Duration, shutdown: S, mut tick: F) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
    S: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut ticks = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested after {} cycles", ticks);
                return ticks;
            }
            _ = interval.tick() => {
                tick().await;
                ticks += 1;
            }
        }
    }
}
