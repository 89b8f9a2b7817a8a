use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagwatchError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid tag pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("registry unavailable for '{repository}': {reason}")]
    RegistryUnavailable { repository: String, reason: String },

    #[error("repository not found in registry: {0}")]
    RegistryNotFound(String),

    #[error("failed to send notification: {0}")]
    TransportSendFailure(String),

    #[error("unknown or expired action: {0}")]
    UnknownAction(String),

    #[error("CI unavailable: {0}")]
    CiUnavailable(String),

    #[error("tag '{tag}' already exists on {repository}")]
    TagAlreadyExists { repository: String, tag: String },

    #[error("tag record not found: {repository}:{tag}")]
    TagNotFound { repository: String, tag: String },

    #[error("invalid transition for {tag} from {from} to {to}")]
    InvalidTransition {
        tag: String,
        from: String,
        to: String,
    },

    #[error("state store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TagwatchError {
    /// True for failures caused by an upstream HTTP service rather than by
    /// local state or input.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::RegistryUnavailable { .. }
                | Self::RegistryNotFound(_)
                | Self::TransportSendFailure(_)
                | Self::CiUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TagwatchError>;
