use crate::cmd::{load_config, Overrides};
use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;
use tagwatch_core::engine::Engine;

pub fn run(config_path: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let state_path = config.resolve_state_path(config_path);
    let engine =
        Engine::from_config(&config, &state_path).context("failed to initialise tagwatch")?;
    let report = engine.run_cycle();

    if json {
        return print_json(&report);
    }
    if report.repositories.is_empty() {
        println!("No repositories configured.");
        return Ok(());
    }

    let rows = report
        .repositories
        .iter()
        .map(|r| {
            let result = match (&r.error, r.baselined) {
                (Some(e), _) => format!("failed: {e}"),
                (None, true) => "baseline recorded".to_string(),
                (None, false) => "ok".to_string(),
            };
            vec![
                r.repository.clone(),
                result,
                r.notified.join(", "),
                r.failed.join(", "),
            ]
        })
        .collect();
    print_table(&["REPOSITORY", "RESULT", "NOTIFIED", "SEND FAILED"], rows);
    if report.pruned_actions > 0 {
        println!("\nPruned {} expired actions.", report.pruned_actions);
    }
    Ok(())
}
