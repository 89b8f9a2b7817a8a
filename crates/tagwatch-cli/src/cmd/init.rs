use crate::output::print_json;
use std::path::Path;
use tagwatch_core::config::{Config, RepositoryConfig};
use tagwatch_core::types::{default_ref, DeployTarget};

pub struct InitOptions {
    pub chat_id: i64,
    pub ci_url: String,
    /// Registry repository to watch, e.g. `nginx` or `acme/api`.
    pub watch: Option<String>,
    /// CI repository receiving deploy tags for `watch`.
    pub deploy_repo: Option<String>,
    pub force: bool,
}

pub fn run(config_path: &Path, opts: InitOptions, json: bool) -> anyhow::Result<()> {
    if config_path.exists() && !opts.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let mut config = Config::new(opts.chat_id, opts.ci_url);
    if let Some(path) = opts.watch {
        let deploy_repo = opts
            .deploy_repo
            .ok_or_else(|| anyhow::anyhow!("--watch requires --deploy-repo"))?;
        config.repositories.push(RepositoryConfig {
            path,
            tag_pattern: None,
            skip_artifacts: true,
            deploy: DeployTarget::new(deploy_repo, default_ref()),
        });
    }
    config.save(config_path)?;

    if json {
        print_json(&serde_json::json!({
            "config": config_path,
            "repositories": config.repositories.len(),
        }))?;
    } else {
        println!("Wrote {}", config_path.display());
        println!("Next: set TAGWATCH_TELEGRAM_TOKEN and TAGWATCH_CI_TOKEN, then `tagwatch config validate`.");
    }
    Ok(())
}
