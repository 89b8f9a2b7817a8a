use crate::cmd::{format_time, load_config, open_store, Overrides};
use crate::output::{print_json, print_table};
use std::path::Path;
use tagwatch_core::types::{normalize_repository, NotificationState};

pub fn run(
    config_path: &Path,
    overrides: &Overrides,
    repository: Option<&str>,
    all: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let store = open_store(config_path, &config)?;
    let wanted = repository.map(normalize_repository);

    let mut states = store.repositories()?;
    if let Some(wanted) = &wanted {
        states.retain(|s| &s.repository == wanted);
        if states.is_empty() {
            anyhow::bail!("repository '{wanted}' has not been scanned");
        }
    }

    if json {
        return print_json(&states);
    }
    if states.is_empty() {
        println!("No repositories scanned yet.");
        return Ok(());
    }

    let mut rows = Vec::new();
    for state in &states {
        let baseline = state.in_state(NotificationState::Baseline).count();
        for record in state.tags.values() {
            if record.state == NotificationState::Baseline && !all {
                continue;
            }
            rows.push(vec![
                state.repository.clone(),
                record.name.clone(),
                record.state.to_string(),
                format_time(record.first_seen),
                record
                    .action_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]);
        }
        if !all && baseline > 0 {
            rows.push(vec![
                state.repository.clone(),
                format!("({baseline} baseline)"),
                String::new(),
                format_time(state.baselined_at),
                String::new(),
            ]);
        }
    }
    print_table(&["REPOSITORY", "TAG", "STATE", "FIRST SEEN", "ACTION"], rows);
    Ok(())
}
