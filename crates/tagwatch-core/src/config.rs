use crate::error::{Result, TagwatchError};
use crate::types::{normalize_repository, DeployTarget, WatchedRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "tagwatch.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_registry_url() -> String {
    "https://hub.docker.com".to_string()
}

fn default_page_size() -> u32 {
    100
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            page_size: default_page_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// TelegramConfig
// ---------------------------------------------------------------------------

/// How operator callbacks reach the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundMode {
    /// Long-poll `getUpdates`.
    #[default]
    Polling,
    /// Telegram pushes updates to the HTTP server.
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    pub chat_id: i64,
    #[serde(default = "default_telegram_url")]
    pub api_url: String,
    #[serde(default)]
    pub mode: InboundMode,
    /// Expected value of `X-Telegram-Bot-Api-Secret-Token` in webhook mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    25
}

// ---------------------------------------------------------------------------
// CiConfig
// ---------------------------------------------------------------------------

/// The default CI instance. A repository's `deploy.base_url`/`deploy.token`
/// take precedence over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiConfig {
    /// API root, e.g. `https://git.example.org/api/v1`.
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

// ---------------------------------------------------------------------------
// RepositoryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_pattern: Option<String>,
    #[serde(default = "default_skip_artifacts")]
    pub skip_artifacts: bool,
    pub deploy: DeployTarget,
}

fn default_skip_artifacts() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_action_ttl")]
    pub action_ttl_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Relative paths resolve against the config file's directory.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub registry: RegistryConfig,
    pub telegram: TelegramConfig,
    pub ci: CiConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

fn default_version() -> u32 {
    1
}

fn default_interval() -> u64 {
    3600
}

fn default_action_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_http_timeout() -> u64 {
    15
}

fn default_state_path() -> PathBuf {
    PathBuf::from("tagwatch.redb")
}

impl Config {
    pub fn new(chat_id: i64, ci_base_url: impl Into<String>) -> Self {
        Self {
            version: 1,
            interval_secs: default_interval(),
            action_ttl_secs: default_action_ttl(),
            http_timeout_secs: default_http_timeout(),
            state_path: default_state_path(),
            registry: RegistryConfig::default(),
            telegram: TelegramConfig {
                token: String::new(),
                chat_id,
                api_url: default_telegram_url(),
                mode: InboundMode::Polling,
                webhook_secret: None,
                poll_timeout_secs: default_poll_timeout(),
            },
            ci: CiConfig {
                base_url: ci_base_url.into(),
                token: String::new(),
            },
            server: None,
            repositories: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TagwatchError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn action_ttl(&self) -> Duration {
        Duration::from_secs(self.action_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Location of the redb file for a config loaded from `config_path`.
    pub fn resolve_state_path(&self, config_path: &Path) -> PathBuf {
        if self.state_path.is_absolute() {
            return self.state_path.clone();
        }
        config_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(&self.state_path)
    }

    /// Build the immutable watch list. Fails on the first invalid pattern.
    pub fn watched_repositories(&self) -> Result<Vec<WatchedRepository>> {
        self.repositories
            .iter()
            .map(WatchedRepository::from_config)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.telegram.token.trim().is_empty() {
            error("telegram.token is empty (set it or TAGWATCH_TELEGRAM_TOKEN)".to_string());
        }
        let uses_global_token = self.repositories.is_empty()
            || self.repositories.iter().any(|r| r.deploy.token.is_none());
        if uses_global_token && self.ci.token.trim().is_empty() {
            error("ci.token is empty (set it or TAGWATCH_CI_TOKEN)".to_string());
        }
        if !is_http_url(&self.ci.base_url) {
            error(format!("ci.base_url '{}' is not an http(s) URL", self.ci.base_url));
        }
        if self.interval_secs == 0 {
            error("interval_secs must be greater than zero".to_string());
        }
        if self.http_timeout_secs == 0 {
            error("http_timeout_secs must be greater than zero".to_string());
        }
        if self.telegram.mode == InboundMode::Webhook && self.server.is_none() {
            error("telegram.mode is webhook but no server section is configured".to_string());
        }

        let mut seen = HashSet::new();
        for repo in &self.repositories {
            let normalized = normalize_repository(&repo.path);
            if !seen.insert(normalized.clone()) {
                error(format!("repository '{normalized}' is listed more than once"));
            }
            if let Some(pattern) = &repo.tag_pattern {
                if let Err(e) = regex::Regex::new(pattern) {
                    error(format!(
                        "repository '{normalized}' has an invalid tag_pattern: {e}"
                    ));
                }
            }
            if repo.deploy.repository.trim().is_empty() {
                error(format!("repository '{normalized}' has no deploy.repository"));
            }
            if let Some(url) = &repo.deploy.base_url {
                if !is_http_url(url) {
                    error(format!(
                        "repository '{normalized}' has deploy.base_url '{url}' that is not an http(s) URL"
                    ));
                }
            }
            if repo.deploy.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
                error(format!("repository '{normalized}' has an empty deploy.token"));
            }
        }

        if self.repositories.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no repositories configured; scans will do nothing".to_string(),
            });
        }
        if self.telegram.mode == InboundMode::Webhook && self.telegram.webhook_secret.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "webhook mode without telegram.webhook_secret accepts unsigned callbacks"
                    .to_string(),
            });
        }
        if self.telegram.poll_timeout_secs >= self.http_timeout_secs + 60 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "telegram.poll_timeout_secs={} is unusually long",
                    self.telegram.poll_timeout_secs
                ),
            });
        }

        warnings
    }
}

fn is_http_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("http://") || url.starts_with("https://")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
interval_secs: 1800
telegram:
  token: "123:abc"
  chat_id: 42
ci:
  base_url: https://git.example.org/api/v1
  token: secret
repositories:
  - path: nginx
    tag_pattern: '^\d+\.\d+\.\d+$'
    deploy:
      repository: ops/nginx
  - path: grafana/grafana
    skip_artifacts: false
    deploy:
      repository: ops/grafana
      ref: release
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.interval_secs, 1800);
        assert_eq!(cfg.action_ttl_secs, 7 * 24 * 3600);
        assert_eq!(cfg.http_timeout_secs, 15);
        assert_eq!(cfg.registry.base_url, "https://hub.docker.com");
        assert_eq!(cfg.telegram.mode, InboundMode::Polling);
        assert_eq!(cfg.repositories.len(), 2);
        assert!(cfg.repositories[0].skip_artifacts);
        assert_eq!(cfg.repositories[0].deploy.git_ref, "main");
        assert_eq!(cfg.repositories[1].deploy.git_ref, "release");
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn watched_repositories_are_normalized() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        let watched = cfg.watched_repositories().unwrap();
        assert_eq!(watched[0].path, "library/nginx");
        assert!(watched[0].filter.accepts("1.27.0"));
        assert!(!watched[0].filter.accepts("latest"));
        assert_eq!(watched[1].path, "grafana/grafana");
    }

    #[test]
    fn validate_flags_duplicates_and_bad_patterns() {
        let mut cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.repositories.push(RepositoryConfig {
            path: "library/nginx".into(),
            tag_pattern: Some("(".into()),
            skip_artifacts: true,
            deploy: DeployTarget::new("ops/nginx", "main"),
        });
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("more than once")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("invalid tag_pattern")));
    }

    #[test]
    fn per_repository_ci_overrides() {
        let yaml = r#"
telegram:
  token: "123:abc"
  chat_id: 42
ci:
  base_url: https://git.example.org/api/v1
repositories:
  - path: acme/api
    deploy:
      repository: ops/api
      base_url: https://ci.other.example/api/v1
      token: other
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let deploy = &cfg.watched_repositories().unwrap()[0].deploy;
        assert_eq!(deploy.base_url.as_deref(), Some("https://ci.other.example/api/v1"));
        assert_eq!(deploy.token.as_deref(), Some("other"));
        // Every repository brings its own token, so the global one may stay empty.
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn validate_flags_bad_ci_overrides() {
        let mut cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.repositories[0].deploy.base_url = Some("git.example.org".into());
        cfg.repositories[1].deploy.token = Some("  ".into());
        let messages: Vec<String> = cfg.validate().into_iter().map(|w| w.message).collect();
        assert!(messages.iter().any(|m| m.contains("not an http(s) URL")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("empty deploy.token")), "{messages:?}");
    }

    #[test]
    fn global_ci_token_required_when_a_repository_falls_back() {
        let mut cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.ci.token.clear();
        cfg.repositories[0].deploy.token = Some("own".into());
        assert!(cfg.validate().iter().any(|w| w.message.contains("ci.token is empty")));

        cfg.repositories[1].deploy.token = Some("own".into());
        assert!(!cfg.validate().iter().any(|w| w.message.contains("ci.token")));
    }

    #[test]
    fn validate_flags_webhook_without_server() {
        let mut cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.telegram.mode = InboundMode::Webhook;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.message.contains("no server section")));
        assert!(warnings.iter().any(|w| w.level == WarnLevel::Warning));
    }

    #[test]
    fn state_path_resolves_next_to_config() {
        let cfg = Config::new(1, "https://ci");
        let resolved = cfg.resolve_state_path(Path::new("/etc/tagwatch/tagwatch.yaml"));
        assert_eq!(resolved, PathBuf::from("/etc/tagwatch/tagwatch.redb"));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut cfg = Config::new(7, "https://ci.example/api/v1");
        cfg.telegram.token = "t".into();
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.telegram.chat_id, 7);
        assert_eq!(loaded.ci.base_url, "https://ci.example/api/v1");
    }

    #[test]
    fn load_missing_is_config_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, TagwatchError::ConfigNotFound(_)));
    }
}
