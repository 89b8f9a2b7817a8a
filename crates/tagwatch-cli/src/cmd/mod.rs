pub mod actions;
pub mod config;
pub mod init;
pub mod prune;
pub mod run;
pub mod scan;
pub mod status;

use anyhow::Context;
use std::path::Path;
use tagwatch_core::config::Config;
use tagwatch_core::store::StateStore;

/// Secrets given on the command line or through the environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub telegram_token: Option<String>,
    pub ci_token: Option<String>,
}

/// Load the config at `path` and apply secret overrides.
pub fn load_config(path: &Path, overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    if let Some(token) = &overrides.telegram_token {
        config.telegram.token = token.clone();
    }
    if let Some(token) = &overrides.ci_token {
        config.ci.token = token.clone();
    }
    Ok(config)
}

/// Open the state database named by `config`.
///
/// redb takes an exclusive lock, so this fails while `tagwatch run` holds it.
pub fn open_store(config_path: &Path, config: &Config) -> anyhow::Result<StateStore> {
    let state_path = config.resolve_state_path(config_path);
    StateStore::open(&state_path).with_context(|| {
        format!(
            "failed to open state {} (is `tagwatch run` using it? query its HTTP API instead)",
            state_path.display()
        )
    })
}

/// Short, human-friendly timestamp for tables.
pub fn format_time(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}
