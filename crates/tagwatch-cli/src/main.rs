mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tagwatch",
    about = "Watch container registry tags, announce new ones in Telegram, deploy on request",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: nearest tagwatch.yaml upward from the working directory)
    #[arg(long, global = true, env = "TAGWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Telegram bot token, overriding telegram.token
    #[arg(long, global = true, env = "TAGWATCH_TELEGRAM_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,

    /// CI API token, overriding ci.token
    #[arg(long, global = true, env = "TAGWATCH_CI_TOKEN", hide_env_values = true)]
    ci_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter tagwatch.yaml
    Init {
        /// Telegram chat that receives notifications and may trigger deploys
        #[arg(long, allow_hyphen_values = true)]
        chat_id: i64,
        /// CI API root, e.g. https://git.example.org/api/v1
        #[arg(long)]
        ci_url: String,
        /// Registry repository to watch
        #[arg(long)]
        watch: Option<String>,
        /// CI repository that receives deploy tags for --watch
        #[arg(long)]
        deploy_repo: Option<String>,
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run the scheduler, the callback adapter and the HTTP server
    Run {
        /// Listen address, overriding server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one scan+notify cycle and exit
    Scan,

    /// Show recorded tags per repository
    Status {
        /// Only this repository
        repository: Option<String>,
        /// Include baseline tags
        #[arg(long)]
        all: bool,
    },

    /// List stored deploy actions
    Actions,

    /// Drop actions older than action_ttl_secs
    Prune,

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let config_path = root::resolve_config(cli.config.as_deref());
    let overrides = cmd::Overrides {
        telegram_token: cli.telegram_token,
        ci_token: cli.ci_token,
    };

    let result = match cli.command {
        Commands::Init {
            chat_id,
            ci_url,
            watch,
            deploy_repo,
            force,
        } => {
            // A fresh config lands in the working directory unless a path was given.
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(tagwatch_core::config::CONFIG_FILE));
            cmd::init::run(
                &path,
                cmd::init::InitOptions {
                    chat_id,
                    ci_url,
                    watch,
                    deploy_repo,
                    force,
                },
                cli.json,
            )
        }
        Commands::Run { bind } => cmd::run::run(&config_path, &overrides, bind),
        Commands::Scan => cmd::scan::run(&config_path, &overrides, cli.json),
        Commands::Status { repository, all } => {
            cmd::status::run(&config_path, &overrides, repository.as_deref(), all, cli.json)
        }
        Commands::Actions => cmd::actions::run(&config_path, &overrides, cli.json),
        Commands::Prune => cmd::prune::run(&config_path, &overrides, cli.json),
        Commands::Config { subcommand } => {
            cmd::config::run(&config_path, &overrides, subcommand, cli.json)
        }
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
