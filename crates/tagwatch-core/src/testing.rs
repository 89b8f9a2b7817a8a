//! In-memory implementations of the external collaborators, for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::deploy::DeployTrigger;
use crate::error::{Result, TagwatchError};
use crate::registry::RegistryClient;
use crate::transport::{ChatTransport, InboundCallback, OutboundMessage};
use crate::types::{DeployTarget, RegistryTag};

// ---------------------------------------------------------------------------
// FakeRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Listing {
    Tags(Vec<RegistryTag>),
    NotFound,
    Unavailable,
}

/// Registry whose listings are set by the test.
#[derive(Default)]
pub struct FakeRegistry {
    listings: Mutex<HashMap<String, Listing>>,
}

impl FakeRegistry {
    pub fn set_tags(&self, repository: &str, tags: &[&str]) {
        let tags = tags.iter().map(|t| RegistryTag::named(*t)).collect();
        self.listings
            .lock()
            .unwrap()
            .insert(repository.to_string(), Listing::Tags(tags));
    }

    pub fn set_not_found(&self, repository: &str) {
        self.listings
            .lock()
            .unwrap()
            .insert(repository.to_string(), Listing::NotFound);
    }

    pub fn set_unavailable(&self, repository: &str) {
        self.listings
            .lock()
            .unwrap()
            .insert(repository.to_string(), Listing::Unavailable);
    }
}

impl RegistryClient for FakeRegistry {
    fn list_tags(&self, repository: &str) -> Result<Vec<RegistryTag>> {
        match self.listings.lock().unwrap().get(repository) {
            Some(Listing::Tags(tags)) => Ok(tags.clone()),
            Some(Listing::Unavailable) => Err(TagwatchError::RegistryUnavailable {
                repository: repository.to_string(),
                reason: "simulated outage".into(),
            }),
            Some(Listing::NotFound) | None => {
                Err(TagwatchError::RegistryNotFound(repository.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FakeTransport
// ---------------------------------------------------------------------------

/// Chat transport that records everything it is asked to deliver.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    acks: Mutex<Vec<(InboundCallback, String)>>,
    replies: Mutex<Vec<(i64, String)>>,
    fail_sends: Mutex<bool>,
}

impl FakeTransport {
    pub fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<(InboundCallback, String)> {
        self.acks.lock().unwrap().clone()
    }

    /// `(chat id, text)` for every command reply.
    pub fn replies(&self) -> Vec<(i64, String)> {
        self.replies.lock().unwrap().clone()
    }
}

impl ChatTransport for FakeTransport {
    fn send(&self, message: &OutboundMessage) -> Result<()> {
        if *self.fail_sends.lock().unwrap() {
            return Err(TagwatchError::TransportSendFailure("simulated outage".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn acknowledge(&self, callback: &InboundCallback, text: &str) -> Result<()> {
        self.acks
            .lock()
            .unwrap()
            .push((callback.clone(), text.to_string()));
        Ok(())
    }

    fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        if *self.fail_sends.lock().unwrap() {
            return Err(TagwatchError::TransportSendFailure("simulated outage".into()));
        }
        self.replies
            .lock()
            .unwrap()
            .push((chat_id, text.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeDeploy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMode {
    #[default]
    Succeed,
    AlreadyExists,
    Unavailable,
}

/// Deploy trigger that counts calls and answers per the configured mode.
#[derive(Default)]
pub struct FakeDeploy {
    calls: Mutex<Vec<(String, String)>>,
    mode: Mutex<DeployMode>,
}

impl FakeDeploy {
    pub fn set_mode(&self, mode: DeployMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// `(ci repository, tag)` for every call made.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl DeployTrigger for FakeDeploy {
    fn create_deploy_tag(&self, target: &DeployTarget, tag: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((target.repository.clone(), tag.to_string()));
        match *self.mode.lock().unwrap() {
            DeployMode::Succeed => Ok(()),
            DeployMode::AlreadyExists => Err(TagwatchError::TagAlreadyExists {
                repository: target.repository.clone(),
                tag: tag.to_string(),
            }),
            DeployMode::Unavailable => {
                Err(TagwatchError::CiUnavailable("simulated outage".into()))
            }
        }
    }
}
