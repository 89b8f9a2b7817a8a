use std::sync::Arc;
use std::time::Duration;

use tagwatch_core::engine::Engine;
use tokio::time::MissedTickBehavior;

/// Run a cycle now and then every `interval`, forever.
///
/// Cycles run on the blocking pool one at a time; a cycle that outlasts the
/// interval delays the next tick instead of stacking ticks up.
pub async fn run_scheduler(engine: Arc<Engine>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!("scheduler started, interval {}s", interval.as_secs());

    loop {
        ticker.tick().await;
        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || engine.run_cycle()).await {
            Ok(report) => tracing::debug!(
                notified = report.notified(),
                failures = report.failures(),
                "scheduled cycle finished"
            ),
            Err(e) => tracing::error!("scheduled cycle panicked: {e}"),
        }
    }
}
