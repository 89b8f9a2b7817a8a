use std::sync::Arc;
use std::time::Duration;

use tagwatch_core::callback::dispatch_callback;
use tagwatch_core::command::dispatch_command;
use tagwatch_core::engine::Engine;
use tagwatch_core::telegram::TelegramBot;
use tagwatch_core::transport::Inbound;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Drain button presses and chat commands with `getUpdates` long polling,
/// forever.
///
/// Each batch is dispatched before the next poll confirms it, so a crash
/// mid-batch redelivers presses; the action claim makes that harmless.
pub async fn run_poller(engine: Arc<Engine>, bot: Arc<TelegramBot>, poll_timeout: Duration) {
    let mut offset = 0;
    tracing::info!("polling Telegram for updates");

    loop {
        let client = bot.clone();
        let polled =
            tokio::task::spawn_blocking(move || client.poll_updates(offset, poll_timeout)).await;
        let batch = match polled {
            Ok(Ok((batch, next))) => {
                offset = next;
                batch
            }
            Ok(Err(e)) => {
                tracing::warn!("getUpdates failed: {e}");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            Err(e) => {
                tracing::error!("poll task panicked: {e}");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for inbound in batch {
            let engine = engine.clone();
            let dispatched = tokio::task::spawn_blocking(move || match inbound {
                Inbound::Callback(callback) => {
                    dispatch_callback(&engine, &callback);
                }
                Inbound::Command(command) => {
                    dispatch_command(&engine, &command);
                }
            })
            .await;
            if let Err(e) = dispatched {
                tracing::error!("update dispatch panicked: {e}");
            }
        }
    }
}
