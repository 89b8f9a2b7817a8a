use std::path::{Path, PathBuf};

use tagwatch_core::config::CONFIG_FILE;

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` flag / `TAGWATCH_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `tagwatch.yaml`
/// 3. Fall back to `cwd/tagwatch.yaml` (loading it reports the miss)
pub fn resolve_config(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_config_from(&cwd).unwrap_or_else(|| cwd.join(CONFIG_FILE))
}

fn find_config_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}
