//! Deploy trigger: creates a tag on the CI/source-control instance, which the
//! pipeline configured there picks up.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use crate::error::{Result, TagwatchError};
use crate::types::DeployTarget;

pub trait DeployTrigger: Send + Sync {
    /// Create tag `tag` on `target.git_ref` of `target.repository`, on the
    /// target's own CI instance when it names one.
    ///
    /// Fails with `TagAlreadyExists` when the tag is present already and with
    /// `CiUnavailable` on any other failure. Never retries.
    fn create_deploy_tag(&self, target: &DeployTarget, tag: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Gitea-compatible tag API
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreateTagBody<'a> {
    tag_name: &'a str,
    target: &'a str,
    message: String,
}

/// Talks to the instance in the `ci` section unless a [`DeployTarget`]
/// carries its own `base_url`/`token`.
pub struct GiteaClient {
    http: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

impl GiteaClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tagwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TagwatchError::InvalidConfig(format!("CI client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

impl DeployTrigger for GiteaClient {
    fn create_deploy_tag(&self, target: &DeployTarget, tag: &str) -> Result<()> {
        let base_url = target
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        let token = target.token.as_deref().unwrap_or(&self.token);
        let url = format!(
            "{base_url}/repos/{}/tags",
            target.repository.trim_matches('/')
        );
        let body = CreateTagBody {
            tag_name: tag,
            target: &target.git_ref,
            message: format!("Deploy {tag} (created by tagwatch)"),
        };

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("token {token}"))
            .json(&body)
            .send()
            .map_err(|e| TagwatchError::CiUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::CONFLICT => Err(TagwatchError::TagAlreadyExists {
                repository: target.repository.clone(),
                tag: tag.to_string(),
            }),
            status if status.is_success() => Ok(()),
            status => {
                let detail = response.text().unwrap_or_default();
                let detail: String = detail.chars().take(200).collect();
                Err(TagwatchError::CiUnavailable(format!("HTTP {status}: {detail}")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
