//! Registry client: lists the tags of one image repository.
//!
//! The client is a pure read. It performs no retries; a failed listing is
//! retried by the next scheduler tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Result, TagwatchError};
use crate::types::RegistryTag;

/// Default upper bound on pages fetched for one listing.
const MAX_PAGES: usize = 100;

pub trait RegistryClient: Send + Sync {
    /// All tags of `repository`, in registry order, pagination flattened.
    fn list_tags(&self, repository: &str) -> Result<Vec<RegistryTag>>;
}

// ---------------------------------------------------------------------------
// Docker Hub v2
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

impl From<TagEntry> for RegistryTag {
    fn from(entry: TagEntry) -> Self {
        let last_updated = entry
            .last_updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        RegistryTag {
            name: entry.name,
            digest: entry.digest,
            last_updated,
        }
    }
}

/// Client for the Docker Hub `/v2/repositories/{repo}/tags` endpoint.
///
/// A listing longer than `max_pages` pages fails as `RegistryUnavailable`;
/// it is never returned truncated.
pub struct DockerHubClient {
    http: reqwest::blocking::Client,
    base_url: String,
    page_size: u32,
    max_pages: usize,
}

impl DockerHubClient {
    pub fn new(base_url: impl Into<String>, page_size: u32, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tagwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TagwatchError::InvalidConfig(format!("registry client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size,
            max_pages: MAX_PAGES,
        })
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    fn first_page_url(&self, repository: &str) -> String {
        format!(
            "{}/v2/repositories/{}/tags?page_size={}",
            self.base_url, repository, self.page_size
        )
    }

    fn fetch_page(&self, repository: &str, url: &str) -> Result<TagPage> {
        let unavailable = |reason: String| TagwatchError::RegistryUnavailable {
            repository: repository.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| unavailable(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(TagwatchError::RegistryNotFound(repository.to_string())),
            status if !status.is_success() => Err(unavailable(format!("HTTP {status}"))),
            _ => response
                .json::<TagPage>()
                .map_err(|e| unavailable(format!("invalid response: {e}"))),
        }
    }
}

impl RegistryClient for DockerHubClient {
    fn list_tags(&self, repository: &str) -> Result<Vec<RegistryTag>> {
        let mut tags = Vec::new();
        let mut next = Some(self.first_page_url(repository));
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages == self.max_pages {
                return Err(TagwatchError::RegistryUnavailable {
                    repository: repository.to_string(),
                    reason: format!("listing exceeds {} pages", self.max_pages),
                });
            }
            let page = self.fetch_page(repository, &url)?;
            pages += 1;
            tags.extend(page.results.into_iter().map(RegistryTag::from));
            next = page.next.filter(|n| !n.is_empty() && *n != url);
        }

        tracing::debug!(repository, pages, count = tags.len(), "listed registry tags");
        Ok(tags)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
