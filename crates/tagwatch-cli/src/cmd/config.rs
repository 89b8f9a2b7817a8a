use crate::cmd::{load_config, Overrides};
use crate::output::print_json;
use clap::Subcommand;
use std::path::Path;
use tagwatch_core::config::WarnLevel;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,
}

pub fn run(
    config_path: &Path,
    overrides: &Overrides,
    subcmd: ConfigSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(config_path, overrides, json),
    }
}

fn validate(config_path: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "config": config_path,
            "repositories": config.repositories.len(),
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!(
            "Config is valid. Watching {} repositories.",
            config.repositories.len()
        );
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}
