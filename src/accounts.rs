// src/accounts.rs
//! Account/identity policy: important and high-quality-media authors, the
//! externally refreshed ignore membership list, and the description-text
//! heuristics. Reads are lock-light; the membership set is swapped whole by
//! a background refresher so readers never observe a partial rebuild.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collab::CuratorClient;
use crate::item::{Author, Item};
use crate::matcher::{extract_mentions, matches_any};

#[derive(Debug, Default)]
struct MembershipState {
    ids: HashSet<u64>,
    handles: HashSet<String>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Shared, refreshable view of the external ignore membership list.
#[derive(Clone, Default)]
pub struct MembershipHandle {
    inner: Arc<RwLock<MembershipState>>,
}

impl MembershipHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_id(&self, id: u64) -> bool {
        self.inner
            .read()
            .map(|s| s.ids.contains(&id))
            .unwrap_or(false)
    }

    pub fn contains_handle(&self, handle: &str) -> bool {
        let lowered = handle.to_ascii_lowercase();
        self.inner
            .read()
            .map(|s| s.handles.contains(&lowered))
            .unwrap_or(false)
    }

    /// Swap in a freshly fetched membership set.
    pub fn replace(&self, members: impl IntoIterator<Item = (u64, String)>) {
        let mut ids = HashSet::new();
        let mut handles = HashSet::new();
        for (id, handle) in members {
            ids.insert(id);
            handles.insert(handle.to_ascii_lowercase());
        }
        if let Ok(mut guard) = self.inner.write() {
            guard.ids = ids;
            guard.handles = handles;
            guard.last_refresh = Some(Utc::now());
        }
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.read().ok().and_then(|s| s.last_refresh)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodic refresher. Staleness of the set is bounded by `interval`; a
/// failed fetch keeps the previous set and retries on the next tick.
pub fn spawn_membership_refresher(
    handle: MembershipHandle,
    client: Arc<dyn CuratorClient>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(target: "policy", "membership refresher shutting down");
                        return;
                    }
                }
            }
            match client.ignore_list_members().await {
                Ok(members) => {
                    let count = members.len();
                    handle.replace(members.into_iter().map(|m| (m.id, m.handle)));
                    gauge!("policy_membership_last_refresh_ts")
                        .set(Utc::now().timestamp() as f64);
                    debug!(target: "policy", count, "ignore membership refreshed");
                }
                Err(e) => {
                    warn!(target: "policy", error = %e, "ignore membership refresh failed");
                }
            }
        }
    })
}

/// Author classification used by the classifier and the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorClass {
    pub important: bool,
    pub trusted_media: bool,
    pub ignored: bool,
}

pub struct AccountPolicy {
    important: HashSet<String>,
    trusted_media: HashSet<String>,
    /// Handles present in the override tables. Known accounts are never
    /// classified as ignored.
    known: HashSet<String>,
    disqualifying_description: Vec<String>,
    membership: MembershipHandle,
}

impl AccountPolicy {
    pub fn new(
        important: impl IntoIterator<Item = String>,
        trusted_media: impl IntoIterator<Item = String>,
        known: impl IntoIterator<Item = String>,
        disqualifying_description: Vec<String>,
        membership: MembershipHandle,
    ) -> Self {
        let lower = |it: &str| it.to_ascii_lowercase();
        Self {
            important: important.into_iter().map(|h| lower(&h)).collect(),
            trusted_media: trusted_media.into_iter().map(|h| lower(&h)).collect(),
            known: known.into_iter().map(|h| lower(&h)).collect(),
            disqualifying_description,
            membership,
        }
    }

    pub fn membership(&self) -> &MembershipHandle {
        &self.membership
    }

    pub fn is_important(&self, author: &Author) -> bool {
        self.important.contains(&author.handle.to_ascii_lowercase())
    }

    pub fn is_trusted_media(&self, author: &Author) -> bool {
        self.trusted_media
            .contains(&author.handle.to_ascii_lowercase())
    }

    pub fn classify(&self, author: &Author) -> AuthorClass {
        AuthorClass {
            important: self.is_important(author),
            trusted_media: self.is_trusted_media(author),
            ignored: self.is_ignored(author),
        }
    }

    /// A known account is never ignored. Otherwise: membership-list hit or
    /// a disqualifying self-description marks the author ignored.
    pub fn is_ignored(&self, author: &Author) -> bool {
        let handle = author.handle.to_ascii_lowercase();
        if self.known.contains(&handle) {
            return false;
        }
        if self.membership.contains_id(author.id) || self.membership.contains_handle(&handle) {
            return true;
        }
        matches_any(&author.description, &self.disqualifying_description)
    }

    fn is_handle_ignored(&self, handle: &str) -> bool {
        let lowered = handle.to_ascii_lowercase();
        !self.known.contains(&lowered) && self.membership.contains_handle(&lowered)
    }

    /// Transitive ignore check: author, quoted author, rebroadcast author,
    /// and every mentioned handle. One hit poisons the whole item.
    pub fn item_touches_ignored(&self, item: &Item) -> Option<String> {
        if self.is_ignored(&item.author) {
            return Some(format!("author:{}", item.author.handle));
        }
        if let Some(q) = &item.quoted {
            if self.is_ignored(&q.author) {
                return Some(format!("quoted:{}", q.author.handle));
            }
        }
        if let Some(r) = &item.rebroadcast_of {
            if self.is_ignored(&r.author) {
                return Some(format!("rebroadcast:{}", r.author.handle));
            }
        }
        extract_mentions(&item.text)
            .into_iter()
            .find(|h| self.is_handle_ignored(h))
            .map(|h| format!("mention:{h}"))
    }
}
