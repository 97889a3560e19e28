use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

/// Drive `tick` on a fixed period, forever.
///
/// The tick body is awaited to completion before the next tick is taken, so
/// invocations never overlap; a body that outruns the period (a fetch parked
/// on a full item channel, say) delays the following tick instead of
/// stacking. The loop only ends when a body returns an error.
///
/// Call sites close over whatever arguments their body needs.
pub async fn run_periodic<F, Fut>(period: Duration, mut tick: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        tick().await?;
    }
}
