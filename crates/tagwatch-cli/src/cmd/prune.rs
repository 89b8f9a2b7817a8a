use crate::cmd::{load_config, open_store, Overrides};
use crate::output::print_json;
use std::path::Path;

pub fn run(config_path: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let store = open_store(config_path, &config)?;
    let pruned = store.prune_actions(chrono::Utc::now(), config.action_ttl())?;

    if json {
        print_json(&serde_json::json!({ "pruned": pruned }))?;
    } else {
        println!("Pruned {pruned} expired actions.");
    }
    Ok(())
}
