use crate::cmd::{load_config, Overrides};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tagwatch_core::config::{InboundMode, ServerConfig, WarnLevel};
use tagwatch_core::engine::Engine;
use tagwatch_core::telegram::TelegramBot;
use tagwatch_server::{AppState, PollerOptions};

pub fn run(config_path: &Path, overrides: &Overrides, bind: Option<String>) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        anyhow::bail!("invalid config: {}", errors.join("; "));
    }

    // Blocking HTTP clients are created, and finally dropped, outside the runtime.
    let state_path = config.resolve_state_path(config_path);
    let engine = Arc::new(
        Engine::from_config(&config, &state_path).context("failed to initialise tagwatch")?,
    );
    let bot = match config.telegram.mode {
        InboundMode::Polling => Some(Arc::new(TelegramBot::new(
            &config.telegram.api_url,
            &config.telegram.token,
            config.telegram.chat_id,
            config.http_timeout(),
        )?)),
        InboundMode::Webhook => None,
    };
    let poller = bot.as_ref().map(|bot| PollerOptions {
        bot: bot.clone(),
        poll_timeout: Duration::from_secs(config.telegram.poll_timeout_secs),
    });

    let bind = bind
        .or_else(|| config.server.as_ref().map(|s| s.bind.clone()))
        .unwrap_or_else(|| ServerConfig::default().bind);
    let app_state =
        AppState::new(engine.clone()).with_webhook_secret(config.telegram.webhook_secret.clone());
    let interval = config.interval();

    tracing::info!(
        repositories = engine.watched().len(),
        mode = ?config.telegram.mode,
        "starting tagwatch"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("failed to bind {bind}"))?;
        tagwatch_server::serve_on(listener, app_state, interval, poller).await
    });
    // A long poll may still be in flight on the blocking pool.
    rt.shutdown_timeout(Duration::from_secs(5));

    drop(bot);
    drop(engine);
    result
}
