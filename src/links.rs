// src/links.rs
//! Link-based suppression: a 12-hour sliding window over normalized link
//! forms, an allow-list of always-important links, and a live-stream
//! exemption. The window survives restarts through a best-effort JSON
//! snapshot; everything else is in-memory only.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use crate::collab::CuratorClient;
use crate::matcher::extract_links;

pub const LINK_DEDUP_WINDOW_HOURS: i64 = 12;

/// Normalize a link for dedup keying: lowercase scheme and host, drop a
/// leading `www.`, drop the trailing slash. Paths keep their case.
pub fn normalize_link(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let (scheme, rest) = url.split_once("://").unwrap_or(("https", url));
    let (host, path) = match rest.split_once('/') {
        Some((h, p)) => (h, Some(p)),
        None => (rest, None),
    };
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    match path {
        Some(p) => format!("{}://{}/{}", scheme.to_ascii_lowercase(), host, p),
        None => format!("{}://{}", scheme.to_ascii_lowercase(), host),
    }
}

/// True when the text carries a link to a recognized video host.
pub fn has_video_link(text: &str) -> bool {
    extract_links(text)
        .iter()
        .any(|l| is_video_host(&normalize_link(l)))
}

fn is_video_host(url: &str) -> bool {
    ["youtube.com/", "youtu.be/", "twitch.tv/"]
        .iter()
        .any(|h| url.contains(h))
        || url.ends_with("youtube.com")
        || url.ends_with("youtu.be")
        || url.ends_with("twitch.tv")
}

/* ----------------------------
Sliding window
---------------------------- */

/// `normalized link -> last seen`. Entries are swept opportunistically on
/// insert, so the map may transiently hold expired entries; lookups treat
/// those as absent.
#[derive(Debug, Default)]
pub struct LinkWindow {
    entries: HashMap<String, DateTime<Utc>>,
}

impl LinkWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen_within_window(&self, url: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(url)
            .is_some_and(|ts| now - *ts <= Duration::hours(LINK_DEDUP_WINDOW_HOURS))
    }

    pub fn record(&mut self, url: impl Into<String>, now: DateTime<Utc>) {
        self.sweep(now);
        self.entries.insert(url.into(), now);
    }

    fn sweep(&mut self, now: DateTime<Utc>) {
        self.entries
            .retain(|_, ts| now - *ts <= Duration::hours(LINK_DEDUP_WINDOW_HOURS));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flat `url -> unix seconds` form used by the snapshot file.
    fn to_snapshot(&self) -> HashMap<String, i64> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.timestamp()))
            .collect()
    }

    fn from_snapshot(raw: HashMap<String, i64>) -> Self {
        let entries = raw
            .into_iter()
            .filter_map(|(k, secs)| Utc.timestamp_opt(secs, 0).single().map(|ts| (k, ts)))
            .collect();
        Self { entries }
    }

    /// Load failure is non-fatal: proceed with an empty window.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, i64>>(&raw) {
                Ok(map) => {
                    let w = Self::from_snapshot(map);
                    debug!(target: "links", entries = w.len(), "link window loaded");
                    w
                }
                Err(e) => {
                    warn!(target: "links", error = %e, "link snapshot unreadable; starting empty");
                    Self::new()
                }
            },
            Err(_) => Self::new(),
        }
    }

    /// Best-effort; failure is logged and the window continues in memory.
    pub async fn persist(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(target: "links", error = %e, "link state dir");
                return;
            }
        }
        let body = match serde_json::to_vec_pretty(&self.to_snapshot()) {
            Ok(b) => b,
            Err(e) => {
                warn!(target: "links", error = %e, "link snapshot encode");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(path, body).await {
            warn!(target: "links", error = %e, "link snapshot write");
        }
    }
}

/* ----------------------------
Gate
---------------------------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision {
    Allow,
    /// Carries the normalized form of the duplicate link.
    Suppress(String),
}

pub struct LinkGate {
    always_important: Vec<String>,
    live_channels: HashSet<String>,
    window: LinkWindow,
    state_path: Option<PathBuf>,
}

impl LinkGate {
    pub fn new(
        always_important: Vec<String>,
        live_channels: impl IntoIterator<Item = String>,
        window: LinkWindow,
        state_path: Option<PathBuf>,
    ) -> Self {
        Self {
            always_important,
            live_channels: live_channels.into_iter().collect(),
            window,
            state_path,
        }
    }

    pub fn window(&self) -> &LinkWindow {
        &self.window
    }

    fn is_always_important(&self, normalized: &str) -> bool {
        self.always_important.iter().any(|p| normalized.contains(p))
    }

    /// Walk every link in the text. Exempt links are never recorded; a
    /// window hit on any raw or canonical form suppresses the item;
    /// otherwise both forms are recorded and the snapshot saved.
    pub async fn check(
        &mut self,
        text: &str,
        client: &dyn CuratorClient,
        now: DateTime<Utc>,
    ) -> LinkDecision {
        let links = extract_links(text);
        if links.is_empty() {
            return LinkDecision::Allow;
        }

        let mut to_record: Vec<String> = Vec::new();
        for raw in links {
            let raw_norm = normalize_link(&raw);
            if self.is_always_important(&raw_norm) {
                continue;
            }

            let canonical = match client.canonicalize_link(&raw).await {
                Ok(c) => normalize_link(&c),
                Err(e) => {
                    debug!(target: "links", error = %e, "canonicalize failed; using raw form");
                    raw_norm.clone()
                }
            };
            if self.is_always_important(&canonical) {
                continue;
            }

            if is_video_host(&raw_norm) || is_video_host(&canonical) {
                match client.live_status(&raw).await {
                    Ok(status)
                        if (status.is_live || status.is_upcoming)
                            && self.live_channels.contains(&status.channel_id) =>
                    {
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(target: "links", error = %e, "live status check failed");
                    }
                }
            }

            if self.window.seen_within_window(&raw_norm, now)
                || self.window.seen_within_window(&canonical, now)
            {
                return LinkDecision::Suppress(raw_norm);
            }
            to_record.push(raw_norm);
            if !to_record.contains(&canonical) {
                to_record.push(canonical);
            }
        }

        if !to_record.is_empty() {
            for url in to_record {
                self.window.record(url, now);
            }
            if let Some(path) = self.state_path.clone() {
                self.window.persist(&path).await;
            }
        }
        LinkDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{LiveStatus, OfflineClient};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn normalization() {
        assert_eq!(
            normalize_link("HTTPS://WWW.Example.com/Path/"),
            "https://example.com/Path"
        );
        assert_eq!(normalize_link("https://example.com"), "https://example.com");
    }

    #[test]
    fn window_boundaries() {
        let mut w = LinkWindow::new();
        let url = "https://example.com/a";
        w.record(url.to_string(), t0());

        assert!(w.seen_within_window(url, t0() + Duration::hours(11) + Duration::minutes(59)));
        assert!(!w.seen_within_window(url, t0() + Duration::hours(12) + Duration::minutes(1)));
        assert!(!w.seen_within_window("https://example.com/other", t0()));
    }

    #[test]
    fn expired_entries_are_swept_on_record() {
        let mut w = LinkWindow::new();
        w.record("https://example.com/a".to_string(), t0());
        w.record(
            "https://example.com/b".to_string(),
            t0() + Duration::hours(13),
        );
        // "a" expired and was swept when "b" was recorded
        assert_eq!(w.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_link_is_suppressed_then_allowed_after_window() {
        let client = OfflineClient::new();
        let mut gate = LinkGate::new(vec![], vec![], LinkWindow::new(), None);

        let text = "watch https://example.com/stream";
        assert_eq!(gate.check(text, &client, t0()).await, LinkDecision::Allow);
        assert!(matches!(
            gate.check(text, &client, t0() + Duration::hours(1)).await,
            LinkDecision::Suppress(_)
        ));
        assert_eq!(
            gate.check(text, &client, t0() + Duration::hours(13)).await,
            LinkDecision::Allow
        );
    }

    #[tokio::test]
    async fn always_important_links_are_never_suppressed() {
        let client = OfflineClient::new();
        let mut gate = LinkGate::new(
            vec!["nasaspaceflight.com/starbase".to_string()],
            vec![],
            LinkWindow::new(),
            None,
        );
        let text = "live https://www.nasaspaceflight.com/starbase";
        assert_eq!(gate.check(text, &client, t0()).await, LinkDecision::Allow);
        assert_eq!(gate.check(text, &client, t0()).await, LinkDecision::Allow);
        assert!(gate.window().is_empty());
    }

    #[tokio::test]
    async fn live_channel_exemption() {
        let client = OfflineClient::new();
        client.set_live(
            "https://youtube.com/watch?v=abc",
            LiveStatus {
                is_live: true,
                is_upcoming: false,
                channel_id: "UC_padcam_live".to_string(),
            },
        );
        let mut gate = LinkGate::new(
            vec![],
            vec!["UC_padcam_live".to_string()],
            LinkWindow::new(),
            None,
        );

        let text = "live https://youtube.com/watch?v=abc";
        assert_eq!(gate.check(text, &client, t0()).await, LinkDecision::Allow);
        // Exempt while live: not recorded, so a repeat is also allowed.
        assert_eq!(gate.check(text, &client, t0()).await, LinkDecision::Allow);

        // A non-exempt channel still dedups.
        let other = "replay https://youtube.com/watch?v=xyz";
        assert_eq!(gate.check(other, &client, t0()).await, LinkDecision::Allow);
        assert!(matches!(
            gate.check(other, &client, t0()).await,
            LinkDecision::Suppress(_)
        ));
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let dir = std::env::temp_dir().join("starship-curator-test-links");
        let path = dir.join("seen_links.json");
        let _ = tokio::fs::remove_file(&path).await;

        let mut w = LinkWindow::new();
        w.record("https://example.com/a".to_string(), t0());
        w.persist(&path).await;

        let loaded = LinkWindow::load(&path).await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.seen_within_window("https://example.com/a", t0()));

        // Unreadable snapshot: non-fatal, empty window.
        tokio::fs::write(&path, b"not json").await.unwrap();
        let broken = LinkWindow::load(&path).await;
        assert!(broken.is_empty());
    }
}
