// src/collab.rs
//! External collaborator boundary: item lookup, promotion, curated-list and
//! membership-list access, link canonicalization, and live-stream status.
//! The decision core only ever talks to [`CuratorClient`]; production uses
//! the HTTP implementation, tests and `--offline` use the in-memory one.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::item::Item;

/// Error kinds the decision engine must distinguish. `AlreadyPromoted` and
/// `Authorization` are policy-expected and never logged as errors.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("item {0} not found")]
    Missing(u64),
    #[error("authorization denied")]
    Authorization,
    #[error("item already promoted")]
    AlreadyPromoted,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollabError {
    /// Expected-by-policy errors are recognized by kind, not message.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::AlreadyPromoted | Self::Authorization | Self::Missing(_))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorRef {
    pub id: u64,
    pub handle: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveStatus {
    pub is_live: bool,
    pub is_upcoming: bool,
    #[serde(default)]
    pub channel_id: String,
}

#[async_trait]
pub trait CuratorClient: Send + Sync {
    /// Fetch a single item by id, fully hydrated.
    async fn lookup_item(&self, id: u64) -> Result<Item, CollabError>;

    /// Publish/re-share the item. Returns `AlreadyPromoted` when the backend
    /// independently detects duplication.
    async fn promote(&self, item: &Item) -> Result<(), CollabError>;

    /// Best-effort; failures are non-fatal for the caller.
    async fn add_to_curated_list(&self, author_id: u64) -> Result<(), CollabError>;

    /// Full membership of the externally-maintained ignore list.
    async fn ignore_list_members(&self) -> Result<Vec<AuthorRef>, CollabError>;

    /// Resolve a link to its canonical form. Identity is an acceptable
    /// fallback.
    async fn canonicalize_link(&self, url: &str) -> Result<String, CollabError>;

    async fn live_status(&self, url: &str) -> Result<LiveStatus, CollabError>;
}

/* ----------------------------
Offline client (tests, --offline)
---------------------------- */

/// In-memory collaborator: items served from a map, promotions recorded,
/// canonicalization is the identity function, nothing is ever live.
#[derive(Default)]
pub struct OfflineClient {
    items: Mutex<HashMap<u64, Item>>,
    promoted: Mutex<Vec<u64>>,
    ignore_members: Mutex<Vec<AuthorRef>>,
    live: Mutex<HashMap<String, LiveStatus>>,
}

impl OfflineClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, item: Item) {
        self.items.lock().expect("items mutex").insert(item.id, item);
    }

    pub fn set_ignore_members(&self, members: Vec<AuthorRef>) {
        *self.ignore_members.lock().expect("ignore mutex") = members;
    }

    pub fn set_live(&self, url: impl Into<String>, status: LiveStatus) {
        self.live.lock().expect("live mutex").insert(url.into(), status);
    }

    pub fn promoted_ids(&self) -> Vec<u64> {
        self.promoted.lock().expect("promoted mutex").clone()
    }
}

#[async_trait]
impl CuratorClient for OfflineClient {
    async fn lookup_item(&self, id: u64) -> Result<Item, CollabError> {
        self.items
            .lock()
            .expect("items mutex")
            .get(&id)
            .cloned()
            .ok_or(CollabError::Missing(id))
    }

    async fn promote(&self, item: &Item) -> Result<(), CollabError> {
        let mut promoted = self.promoted.lock().expect("promoted mutex");
        if promoted.contains(&item.id) {
            return Err(CollabError::AlreadyPromoted);
        }
        promoted.push(item.id);
        Ok(())
    }

    async fn add_to_curated_list(&self, _author_id: u64) -> Result<(), CollabError> {
        Ok(())
    }

    async fn ignore_list_members(&self) -> Result<Vec<AuthorRef>, CollabError> {
        Ok(self.ignore_members.lock().expect("ignore mutex").clone())
    }

    async fn canonicalize_link(&self, url: &str) -> Result<String, CollabError> {
        Ok(url.to_string())
    }

    async fn live_status(&self, url: &str) -> Result<LiveStatus, CollabError> {
        let live = self.live.lock().expect("live mutex");
        Ok(live.get(url).cloned().unwrap_or_default())
    }
}

/* ----------------------------
HTTP client (production boundary)
---------------------------- */

/// Thin JSON client against the backend service. Each call carries its own
/// timeout; the classifier never blocks on anything else.
pub struct HttpClient {
    base: String,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(base: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(anyhow::Error::from)?;
        Ok(Self {
            base: base.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), path)
    }

    fn map_status(status: reqwest::StatusCode, id: u64) -> Option<CollabError> {
        match status.as_u16() {
            401 | 403 => Some(CollabError::Authorization),
            404 => Some(CollabError::Missing(id)),
            409 => Some(CollabError::AlreadyPromoted),
            _ => None,
        }
    }
}

#[async_trait]
impl CuratorClient for HttpClient {
    async fn lookup_item(&self, id: u64) -> Result<Item, CollabError> {
        let resp = self
            .http
            .get(self.url(&format!("items/{id}")))
            .send()
            .await
            .map_err(anyhow::Error::from)?;
        if let Some(err) = Self::map_status(resp.status(), id) {
            return Err(err);
        }
        let item = resp
            .error_for_status()
            .map_err(anyhow::Error::from)?
            .json::<Item>()
            .await
            .map_err(anyhow::Error::from)?;
        Ok(item)
    }

    async fn promote(&self, item: &Item) -> Result<(), CollabError> {
        let resp = self
            .http
            .post(self.url(&format!("items/{}/promote", item.id)))
            .send()
            .await
            .map_err(anyhow::Error::from)?;
        if let Some(err) = Self::map_status(resp.status(), item.id) {
            return Err(err);
        }
        resp.error_for_status().map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn add_to_curated_list(&self, author_id: u64) -> Result<(), CollabError> {
        let resp = self
            .http
            .post(self.url(&format!("curated/{author_id}")))
            .send()
            .await
            .map_err(anyhow::Error::from)?;
        if let Some(err) = Self::map_status(resp.status(), author_id) {
            return Err(err);
        }
        resp.error_for_status().map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn ignore_list_members(&self) -> Result<Vec<AuthorRef>, CollabError> {
        let members = self
            .http
            .get(self.url("ignore-list"))
            .send()
            .await
            .map_err(anyhow::Error::from)?
            .error_for_status()
            .map_err(anyhow::Error::from)?
            .json::<Vec<AuthorRef>>()
            .await
            .map_err(anyhow::Error::from)?;
        Ok(members)
    }

    async fn canonicalize_link(&self, url: &str) -> Result<String, CollabError> {
        // Follow redirects and report where the link lands. On any failure
        // the caller falls back to the raw form.
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(anyhow::Error::from)?;
        Ok(resp.url().to_string())
    }

    async fn live_status(&self, url: &str) -> Result<LiveStatus, CollabError> {
        let status = self
            .http
            .get(self.url("live-status"))
            .query(&[("url", url)])
            .send()
            .await
            .map_err(anyhow::Error::from)?
            .error_for_status()
            .map_err(anyhow::Error::from)?
            .json::<LiveStatus>()
            .await
            .map_err(anyhow::Error::from)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Author;

    #[tokio::test]
    async fn offline_client_round_trip() {
        let client = OfflineClient::new();
        let item = Item::new(1, Author::new(5, "padcam_feed"), "ship on the pad");
        client.insert_item(item.clone());

        let fetched = client.lookup_item(1).await.unwrap();
        assert_eq!(fetched.text, "ship on the pad");
        assert!(matches!(
            client.lookup_item(99).await,
            Err(CollabError::Missing(99))
        ));

        client.promote(&item).await.unwrap();
        assert!(matches!(
            client.promote(&item).await,
            Err(CollabError::AlreadyPromoted)
        ));
        assert_eq!(client.promoted_ids(), vec![1]);
    }

    #[test]
    fn expected_errors_are_recognized_by_kind() {
        assert!(CollabError::AlreadyPromoted.is_expected());
        assert!(CollabError::Authorization.is_expected());
        assert!(CollabError::Missing(3).is_expected());
        assert!(!CollabError::Other(anyhow::anyhow!("boom")).is_expected());
    }
}
