// src/engine.rs
//! Decision engine: the stateful core. Consumes one item at a time, keeps
//! the dedup state, walks ancestor/quote chains, applies the filter stack,
//! and emits promotion actions at most once per logical item.
//!
//! Not safe for concurrent invocation: exactly one worker drains the queue
//! and calls [`DecisionEngine::process`] sequentially. Recursion over
//! reply/quote graphs is bounded by the seen-set memo and a depth cap, so
//! inconsistent external data cannot loop it.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::collab::{CollabError, CuratorClient};
use crate::item::{Item, Provenance};
use crate::links::{has_video_link, LinkDecision, LinkGate};
use crate::matcher::{is_tag_only, matches_any};

/// Hard cap on reply-chain ancestor fetches per evaluation.
const MAX_ANCESTOR_DEPTH: usize = 16;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This process's own identity; its posts are never promoted.
    pub self_handle: String,
    /// The single account whose posts trigger the ancestor thread walk.
    pub authority_handle: String,
    /// Company account: quoted/rebroadcast sub-items are processed first.
    pub organization_handle: String,
    /// Phrases that satisfy the location feed's media requirement.
    pub site_announcement_phrases: Vec<String>,
    /// Diagnostic override: re-evaluate items even when already seen.
    pub reprocess_seen: bool,
}

impl EngineConfig {
    fn is_self(&self, handle: &str) -> bool {
        handle.eq_ignore_ascii_case(&self.self_handle)
    }
    fn is_authority(&self, handle: &str) -> bool {
        handle.eq_ignore_ascii_case(&self.authority_handle)
    }
    fn is_organization(&self, handle: &str) -> bool {
        handle.eq_ignore_ascii_case(&self.organization_handle)
    }
}

/// Counters shared with the admin surface. The engine is the only writer.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub seen: AtomicU64,
    pub promoted: AtomicU64,
    pub link_suppressed: AtomicU64,
}

pub struct DecisionEngine {
    cfg: EngineConfig,
    classifier: Classifier,
    client: Arc<dyn CuratorClient>,
    links: LinkGate,
    seen: HashSet<u64>,
    promoted: HashSet<u64>,
    stats: Arc<EngineStats>,
}

impl DecisionEngine {
    pub fn new(
        cfg: EngineConfig,
        classifier: Classifier,
        client: Arc<dyn CuratorClient>,
        links: LinkGate,
    ) -> Self {
        Self {
            cfg,
            classifier,
            client,
            links,
            seen: HashSet::new(),
            promoted: HashSet::new(),
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn has_seen(&self, id: u64) -> bool {
        self.seen.contains(&id)
    }

    pub fn has_promoted(&self, id: u64) -> bool {
        self.promoted.contains(&id)
    }

    pub fn promoted_count(&self) -> usize {
        self.promoted.len()
    }

    /// Process one item against the current wall clock.
    pub async fn process(&mut self, item: Item) -> anyhow::Result<bool> {
        self.process_at(item, Utc::now()).await
    }

    /// Process one item against an explicit clock. Returns whether this
    /// call promoted anything (the item itself or an ancestor).
    pub fn process_at<'a>(
        &'a mut self,
        item: Item,
        now: DateTime<Utc>,
    ) -> BoxFut<'a, anyhow::Result<bool>> {
        Box::pin(async move {
            counter!("curator_items_total").increment(1);

            // AlreadySeenCheck
            if !self.cfg.reprocess_seen
                && (self.seen.contains(&item.id)
                    || self.promoted.contains(&item.id)
                    || item.already_promoted)
            {
                debug!(target: "engine", id = item.id, "already seen; skipping");
                return Ok(false);
            }

            // OwnPostCheck
            if self.cfg.is_self(&item.author.handle) {
                self.mark_seen(item.id);
                return Ok(false);
            }

            // Truncated items are re-fetched whole before evaluation; a
            // failed fetch aborts this item (logged, not retried inline).
            let item = if item.truncated {
                match self.client.lookup_item(item.id).await {
                    Ok(full) => full,
                    Err(e) => {
                        if e.is_expected() {
                            debug!(target: "engine", id = item.id, error = %e, "truncated re-fetch");
                        } else {
                            warn!(target: "engine", id = item.id, error = %e, "truncated re-fetch failed");
                        }
                        self.mark_seen(item.id);
                        return Ok(false);
                    }
                }
            } else {
                item
            };

            // SourceDispatch. The authority walk does its own seen-marking.
            if self.cfg.is_authority(&item.author.handle) {
                return self.walk_thread(item, now).await;
            }

            // Marked before dispatch so malformed self-referential quote or
            // rebroadcast chains terminate at the AlreadySeenCheck.
            self.mark_seen(item.id);

            let promoted = if self.cfg.is_organization(&item.author.handle) {
                // Sub-item first, then this item on its own merits.
                let mut promoted_sub = false;
                if let Some(sub) = item.quoted.clone() {
                    promoted_sub = self.process_at(*sub, now).await?;
                } else if let Some(sub) = item.rebroadcast_of.clone() {
                    promoted_sub = self.process_at(*sub, now).await?;
                }
                let promoted_self = if self.classifier.is_topical_item(&item, now).topical {
                    self.filter_and_emit(&item, now).await?
                } else {
                    false
                };
                promoted_sub || promoted_self
            } else if let Some(target) = item.rebroadcast_of.clone() {
                self.process_at(*target, now).await?
            } else if item.quoted.is_some() {
                self.handle_quote(&item, now).await?
            } else if item.reply_to.is_some() {
                self.handle_reply(&item, now).await?
            } else {
                let verdict = self.classifier.is_topical_item(&item, now);
                if verdict.topical {
                    self.filter_and_emit(&item, now).await?
                } else {
                    counter!("curator_rejected_total").increment(1);
                    false
                }
            };
            Ok(promoted)
        })
    }

    /* ----------------------------
    Thread walk (authority account)
    ---------------------------- */

    /// Recursive ancestor walk, memoized by the seen set. Returns whether
    /// this item or anything on its ancestor path was promoted.
    fn walk_thread<'a>(
        &'a mut self,
        item: Item,
        now: DateTime<Utc>,
    ) -> BoxFut<'a, anyhow::Result<bool>> {
        Box::pin(async move {
            // Promoted before: it was interesting, so its context is too.
            if self.promoted.contains(&item.id) || item.already_promoted {
                return Ok(true);
            }
            if self.seen.contains(&item.id) {
                return Ok(false);
            }
            self.mark_seen(item.id);

            let mut promoted_something = false;

            if let Some(parent_id) = item.reply_to {
                match self.client.lookup_item(parent_id).await {
                    Ok(parent) => {
                        let parent_excluded = {
                            let rules = self.classifier.rules();
                            let set = rules.exclusion_set_for(&parent.author.handle);
                            rules.is_excluded(&parent.text, set).is_some()
                        };
                        if self.walk_thread(parent.clone(), now).await? && !parent_excluded {
                            self.emit(&parent).await?;
                            promoted_something = true;
                        }
                    }
                    Err(e) if e.is_expected() => {
                        debug!(target: "engine", parent_id, error = %e, "walk parent lookup");
                    }
                    Err(e) => {
                        warn!(target: "engine", parent_id, error = %e, "walk parent lookup failed");
                    }
                }
            }

            // A positive quote promotes the current item and short-circuits.
            if let Some(quoted) = item.quoted.clone() {
                if self.walk_thread(*quoted, now).await? {
                    self.emit(&item).await?;
                    return Ok(true);
                }
            }

            // Unwrap one level of rebroadcast and judge the real item.
            let real = item
                .rebroadcast_of
                .clone()
                .map(|b| *b)
                .unwrap_or_else(|| item.clone());
            let verdict = self.classifier.is_topical_item(&real, now);
            if verdict.topical || promoted_something {
                self.emit(&real).await?;
                promoted_something = true;
            }
            Ok(promoted_something)
        })
    }

    /* ----------------------------
    Quote handling
    ---------------------------- */

    async fn handle_quote(&mut self, item: &Item, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let quoted = match &item.quoted {
            Some(q) => (**q).clone(),
            None => return Ok(false),
        };
        let important = self.classifier.policy().is_important(&item.author);

        // An already-seen quote is not re-evaluated for ordinary authors.
        let skip_quote = self.seen.contains(&quoted.id) && !important;
        if !skip_quote && self.classifier.is_topical_item(&quoted, now).topical {
            if quoted.author.id == item.author.id {
                // Same-author amplification: only the copy with media goes.
                if quoted.has_media() && !item.has_media() {
                    self.filter_and_emit(&quoted, now).await?;
                }
            } else {
                self.process_at(quoted.clone(), now).await?;
            }
        }

        // The quoting item itself.
        let verdict = self.classifier.is_topical_item(item, now);
        let quoted_author_ignored = self.classifier.policy().is_ignored(&quoted.author);
        let mut promoted = false;
        if verdict.topical && (item.has_media() || important) && !quoted_author_ignored {
            promoted = self.filter_and_emit(item, now).await?;
            if promoted {
                // Close the other path to the same content.
                self.mark_seen(quoted.id);
            }
        }
        Ok(promoted)
    }

    /* ----------------------------
    Reply handling
    ---------------------------- */

    async fn handle_reply(&mut self, item: &Item, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let parent_id = match item.reply_to {
            Some(id) => id,
            None => return Ok(false),
        };
        let parent = match self.client.lookup_item(parent_id).await {
            Ok(p) => p,
            Err(CollabError::Authorization) | Err(CollabError::Missing(_)) => {
                // Protected or deleted parents are routine; stay quiet.
                return Ok(false);
            }
            Err(e) => {
                warn!(target: "engine", parent_id, error = %e, "reply parent lookup failed");
                return Ok(false);
            }
        };

        let parent_promoted = self.promoted.contains(&parent.id) || parent.already_promoted;
        let reply_topical = self.classifier.is_topical_item(item, now).topical;
        if !((parent_promoted && parent.has_media()) || reply_topical) {
            return Ok(false);
        }

        let rules = self.classifier.rules();
        let set = rules.exclusion_set_for(&item.author.handle);
        if rules.is_excluded(&item.text, set).is_some() {
            return Ok(false);
        }
        if self.is_content_free_question(item) {
            return Ok(false);
        }
        if item.has_reaction_media() {
            return Ok(false);
        }
        if !self.is_author_continuation(item, &parent).await {
            return Ok(false);
        }

        self.filter_and_emit(item, now).await
    }

    /// A question with neither media nor a qualifying location adds nothing.
    fn is_content_free_question(&self, item: &Item) -> bool {
        item.text.trim_end().ends_with('?')
            && !item.has_media()
            && !self
                .classifier
                .rules()
                .is_qualifying_location(item.geo_tag.as_deref())
    }

    /// The whole ancestor chain must belong to the reply's author; a reply
    /// into someone else's thread never qualifies.
    async fn is_author_continuation(&self, reply: &Item, parent: &Item) -> bool {
        if parent.author.id != reply.author.id {
            return false;
        }
        let mut current = parent.clone();
        let mut depth = 0usize;
        while let Some(ancestor_id) = current.reply_to {
            depth += 1;
            if depth > MAX_ANCESTOR_DEPTH {
                warn!(target: "engine", reply = reply.id, "ancestor chain too deep; rejecting");
                return false;
            }
            match self.client.lookup_item(ancestor_id).await {
                Ok(ancestor) => {
                    if ancestor.author.id != reply.author.id {
                        return false;
                    }
                    current = ancestor;
                }
                Err(e) => {
                    if !e.is_expected() {
                        warn!(target: "engine", ancestor_id, error = %e, "ancestor lookup failed");
                    }
                    return false;
                }
            }
        }
        true
    }

    /* ----------------------------
    Filter stack + emit
    ---------------------------- */

    async fn filter_and_emit(&mut self, item: &Item, now: DateTime<Utc>) -> anyhow::Result<bool> {
        if let Some(reason) = self.filter_stack(item, now).await {
            debug!(target: "engine", id = item.id, reason = %reason, "filtered");
            counter!("curator_rejected_total").increment(1);
            return Ok(false);
        }
        self.emit(item).await
    }

    /// Applied only to freshly-evaluated, non-ancestor items that reached a
    /// positive topical verdict.
    async fn filter_stack(&mut self, item: &Item, now: DateTime<Utc>) -> Option<String> {
        if item.language != "en" && item.provenance != Provenance::LocationFeed {
            return Some(format!("language:{}", item.language));
        }

        let client = Arc::clone(&self.client);
        if let LinkDecision::Suppress(url) = self.links.check(&item.text, client.as_ref(), now).await
        {
            self.stats.link_suppressed.fetch_add(1, Ordering::Relaxed);
            counter!("curator_link_suppressed_total").increment(1);
            return Some(format!("link_seen:{url}"));
        }

        if item.sensitive {
            return Some("sensitive".to_string());
        }

        if is_tag_only(&item.text) && !item.has_media() {
            return Some("tag_only_without_media".to_string());
        }

        if item.provenance == Provenance::LocationFeed
            && !item.has_media()
            && !matches_any(&item.text, &self.cfg.site_announcement_phrases)
            && !has_video_link(&item.text)
        {
            return Some("location_feed_needs_media".to_string());
        }

        None
    }

    /// At-most-once promotion. An "already promoted" backend reply is a
    /// quiet success; other errors are logged and processing continues.
    async fn emit(&mut self, item: &Item) -> anyhow::Result<bool> {
        if self.promoted.contains(&item.id) {
            return Ok(true);
        }
        match self.client.promote(item).await {
            Ok(()) => {
                self.record_promoted(item.id);
                info!(target: "engine", id = item.id, author = %item.author.handle, "promoted");
                if item.provenance != Provenance::CuratedList {
                    if let Err(e) = self.client.add_to_curated_list(item.author.id).await {
                        debug!(target: "engine", author = item.author.id, error = %e, "curated list add");
                    }
                }
                Ok(true)
            }
            Err(CollabError::AlreadyPromoted) => {
                self.record_promoted(item.id);
                debug!(target: "engine", id = item.id, "backend reports already promoted");
                Ok(true)
            }
            Err(e) => {
                warn!(target: "engine", id = item.id, error = %e, "promote failed");
                Ok(false)
            }
        }
    }

    fn record_promoted(&mut self, id: u64) {
        self.promoted.insert(id);
        counter!("curator_promoted_total").increment(1);
        self.stats
            .promoted
            .store(self.promoted.len() as u64, Ordering::Relaxed);
    }

    fn mark_seen(&mut self, id: u64) {
        self.seen.insert(id);
        self.stats
            .seen
            .store(self.seen.len() as u64, Ordering::Relaxed);
    }
}
