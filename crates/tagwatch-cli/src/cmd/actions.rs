use crate::cmd::{format_time, load_config, open_store, Overrides};
use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(config_path: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let store = open_store(config_path, &config)?;
    let actions = store.actions()?;

    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }

    let now = chrono::Utc::now();
    let ttl = config.action_ttl();
    let rows = actions
        .iter()
        .map(|a| {
            let status = if a.consumed {
                "consumed"
            } else if a.is_expired(now, ttl) {
                "expired"
            } else {
                "pending"
            };
            vec![
                a.id.to_string(),
                a.repository.clone(),
                a.tag.clone(),
                format_time(a.created_at),
                status.to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "REPOSITORY", "TAG", "CREATED", "STATUS"], rows);
    Ok(())
}
