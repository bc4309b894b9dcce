//! Sender display-name resolution against the external user directory.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

/// Display name used when a sender cannot be resolved.
pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directory returned status {0}")]
    Status(StatusCode),
    #[error("no directory configured")]
    NotConfigured,
    #[error("invalid directory base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Lookup of a user's display name by id. `Ok(None)` means the user does not
/// exist.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup_display_name(&self, sender_id: &str) -> Result<Option<String>, DirectoryError>;
}

/// Outcome of resolving a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Fallback,
}

impl Resolution {
    pub fn display_name(&self) -> &str {
        match self {
            Resolution::Resolved(name) => name,
            Resolution::Fallback => UNKNOWN_USER,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback)
    }
}

/// Resolve `sender_id`, waiting at most `timeout`. Every failure (not found,
/// directory error, timeout) degrades to `Resolution::Fallback`.
pub async fn resolve(
    directory: &dyn IdentityDirectory,
    sender_id: &str,
    timeout: Duration,
) -> Resolution {
    match tokio::time::timeout(timeout, directory.lookup_display_name(sender_id)).await {
        Ok(Ok(Some(name))) if !name.trim().is_empty() => Resolution::Resolved(name),
        Ok(Ok(_)) => {
            tracing::warn!(%sender_id, "sender not found in directory, using fallback name");
            Resolution::Fallback
        }
        Ok(Err(err)) => {
            tracing::warn!(%sender_id, ?err, "directory lookup failed, using fallback name");
            Resolution::Fallback
        }
        Err(_elapsed) => {
            tracing::warn!(%sender_id, ?timeout, "directory lookup timed out, using fallback name");
            Resolution::Fallback
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP directory
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UserResponse {
    name: String,
}

/// Directory backed by the user API: `GET {base}/users/{id}` → `{"name": ..}`.
#[derive(Clone)]
pub struct HttpDirectory {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: &str) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| DirectoryError::InvalidBaseUrl(format!("{base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            base_url,
            http: reqwest::Client::new(),
        })
    }

    /// `{base}/users/{sender_id}` with the id percent-encoded as one segment.
    fn user_url(&self, sender_id: &str) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["users", sender_id]);
        Ok(url)
    }
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    async fn lookup_display_name(&self, sender_id: &str) -> Result<Option<String>, DirectoryError> {
        // Dot segments are dropped by URL building and would address another resource.
        if matches!(sender_id, "" | "." | "..") {
            return Ok(None);
        }
        let resp = self.http.get(self.user_url(sender_id)?).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let user: UserResponse = resp.json().await?;
                Ok(Some(user.name))
            }
            status => Err(DirectoryError::Status(status)),
        }
    }
}

// ---------------------------------------------------------------------------
// Static directories
// ---------------------------------------------------------------------------

/// Directory used when no user API is configured. Every lookup fails.
pub struct NoDirectory;

#[async_trait]
impl IdentityDirectory for NoDirectory {
    async fn lookup_display_name(&self, _sender_id: &str) -> Result<Option<String>, DirectoryError> {
        Err(DirectoryError::NotConfigured)
    }
}

/// In-memory directory for tests.
#[derive(Default)]
pub struct MemoryDirectory {
    names: RwLock<HashMap<String, String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, id: &str, name: &str) -> Self {
        self.insert(id, name);
        self
    }

    pub fn insert(&self, id: &str, name: &str) {
        self.names.write().insert(id.to_string(), name.to_string());
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn lookup_display_name(&self, sender_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.names.read().get(sender_id).cloned())
    }
}
