// src/classifier.rs
//! Item classifier: composes the lexical matcher, the topic rule tables,
//! the account policy, and structural signals (media, geo tag, staleness)
//! into one relevance verdict with a reason trace.
//!
//! The evaluation order below is load-bearing. Tie-breaks (media overriding
//! exclusion at the site, the important-author bypass, per-author exclusion
//! overrides) encode the policy's intent and must not be reordered.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::accounts::AccountPolicy;
use crate::item::Item;
use crate::matcher::{extract_mentions, normalize_ambiguous, strip_links};
use crate::rules::TopicRules;

/// Items older than this are never promoted.
pub const MAX_ITEM_AGE_HOURS: i64 = 24;
/// Explicit date references older than this reject the item.
pub const MAX_DATE_REFERENCE_HOURS: i64 = 48;
/// More distinct mentions than this reads as mass-mention spam.
pub const MAX_DISTINCT_MENTIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub topical: bool,
    pub reasons: Vec<String>,
}

impl Verdict {
    fn accept(mut reasons: Vec<String>, why: impl Into<String>) -> Self {
        reasons.push(why.into());
        Self {
            topical: true,
            reasons,
        }
    }

    fn reject(mut reasons: Vec<String>, why: impl Into<String>) -> Self {
        reasons.push(why.into());
        Self {
            topical: false,
            reasons,
        }
    }
}

#[derive(Clone)]
pub struct Classifier {
    rules: Arc<TopicRules>,
    policy: Arc<AccountPolicy>,
}

impl Classifier {
    pub fn new(rules: Arc<TopicRules>, policy: Arc<AccountPolicy>) -> Self {
        Self { rules, policy }
    }

    pub fn rules(&self) -> &TopicRules {
        &self.rules
    }

    pub fn policy(&self) -> &AccountPolicy {
        &self.policy
    }

    /// Ordered, short-circuiting relevance evaluation.
    pub fn is_topical_item(&self, item: &Item, now: DateTime<Utc>) -> Verdict {
        let verdict = self.evaluate(item, now);
        debug!(
            target: "classify",
            id = %anon_item_id(item),
            topical = verdict.topical,
            reasons = ?verdict.reasons.iter().take(4).collect::<Vec<_>>(),
            "classified"
        );
        verdict
    }

    fn evaluate(&self, item: &Item, now: DateTime<Utc>) -> Verdict {
        let mut reasons = Vec::new();
        let text = item.text.as_str();
        let geo = item.geo_tag.as_deref();

        // 1) Staleness guard: old items, and fresh re-captions of old media.
        if now - item.created_at > Duration::hours(MAX_ITEM_AGE_HOURS) {
            return Verdict::reject(reasons, "stale_age");
        }
        if let Some(date) = stale_date_reference(text, now) {
            return Verdict::reject(reasons, format!("stale_date:{date}"));
        }

        // 2) Important-author bypass for the ignored gate.
        let important = self.policy.is_important(&item.author);
        if important {
            reasons.push("important_author".to_string());
        }

        // 3) Ignored author (or any touched account), unless tagged at a
        //    qualifying location.
        let qualifying_geo = self.rules.is_qualifying_location(geo);
        if !important {
            if let Some(hit) = self.policy.item_touches_ignored(item) {
                if !qualifying_geo {
                    return Verdict::reject(reasons, format!("ignored:{hit}"));
                }
                reasons.push(format!("ignored_but_geo:{hit}"));
            }
        }

        // 4) Resolve the exclusion set (per-author override or global).
        let exclusion_set = self.rules.exclusion_set_for(&item.author.handle);
        let excluded = self.rules.is_excluded(text, exclusion_set);

        // 5) Qualifying geo tag and not excluded.
        if qualifying_geo && excluded.is_none() {
            return Verdict::accept(reasons, "geo_tag");
        }

        // 6) Media from the physical site overrides textual negatives.
        if item.has_media() && self.rules.is_topic_site(geo) {
            return Verdict::accept(reasons, "media_at_site");
        }

        // 7) Exclusion rejects, important authors excepted.
        if let Some(phrase) = &excluded {
            if !important {
                return Verdict::reject(reasons, format!("excluded:{phrase}"));
            }
            reasons.push(format!("exclusion_bypassed:{phrase}"));
        }

        // 8) Mass-mention spam heuristic.
        if extract_mentions(text).len() > MAX_DISTINCT_MENTIONS {
            return Verdict::reject(reasons, "mass_mention");
        }

        // 9) + 10) Two-pass topical test: normalized text without links with
        //    serial matching on, then the raw text with serials off so URL
        //    path fragments cannot produce serial hits.
        let normalized = normalize_ambiguous(text);
        if self.rules.is_topical(&strip_links(&normalized), true) {
            return Verdict::accept(reasons, "topical");
        }
        if self.rules.is_topical(text, false) {
            return Verdict::accept(reasons, "topical_raw");
        }

        // 11) Media post opening with a qualifying phrase.
        if item.has_media() && self.rules.media_prefix_match(text) {
            return Verdict::accept(reasons, "media_prefix");
        }

        // 12) Per-author custom acceptance regexes.
        for (i, re) in self
            .rules
            .accept_patterns_for(&item.author.handle)
            .iter()
            .enumerate()
        {
            if re.is_match(text) {
                return Verdict::accept(reasons, format!("accept_pattern:{i}"));
            }
        }

        // 13) Trusted-media sources: accept iff media present.
        if self.policy.is_trusted_media(&item.author) {
            return if item.has_media() {
                Verdict::accept(reasons, "trusted_media_source")
            } else {
                Verdict::reject(reasons, "trusted_source_without_media")
            };
        }

        // 14) Location-specific phrase sets.
        if self.rules.location_phrase_match(geo, text) {
            return Verdict::accept(reasons, "location_phrase");
        }

        // 15)
        Verdict::reject(reasons, "no_match")
    }
}

/// Short anonymized id for diagnostics; raw text never hits the logs.
pub(crate) fn anon_item_id(item: &Item) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(item.id.to_le_bytes());
    hasher.update(item.text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

static RE_DATE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b",
    )
    .expect("date reference regex")
});

fn month_number(token: &str) -> Option<u32> {
    let m = token.get(..3)?.to_ascii_lowercase();
    Some(match m.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    })
}

/// Finds an explicit month-day reference older than the 48 h horizon.
/// The current year is assumed; a date landing more than a day in the
/// future resolves to the previous year.
pub fn stale_date_reference(text: &str, now: DateTime<Utc>) -> Option<String> {
    for caps in RE_DATE_REF.captures_iter(text) {
        let month = match month_number(&caps[1]) {
            Some(m) => m,
            None => continue,
        };
        let day: u32 = match caps[2].parse() {
            Ok(d) if (1..=31).contains(&d) => d,
            _ => continue,
        };
        let mut date = match NaiveDate::from_ymd_opt(now.year(), month, day) {
            Some(d) => d,
            None => continue,
        };
        let as_utc = |d: NaiveDate| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap());
        if as_utc(date) > now + Duration::days(1) {
            date = match NaiveDate::from_ymd_opt(now.year() - 1, month, day) {
                Some(d) => d,
                None => continue,
            };
        }
        if now - as_utc(date) > Duration::hours(MAX_DATE_REFERENCE_HOURS) {
            return Some(date.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MembershipHandle;
    use crate::item::{Author, MediaKind};

    fn classifier() -> Classifier {
        classifier_with_membership(MembershipHandle::new())
    }

    fn classifier_with_membership(membership: MembershipHandle) -> Classifier {
        let rules = Arc::new(TopicRules::builtin());
        let known: Vec<String> = rules.known_handles().map(str::to_string).collect();
        let policy = Arc::new(AccountPolicy::new(
            vec!["chiefengineer".to_string()],
            vec!["padcam_feed".to_string()],
            known,
            vec!["parody".to_string(), "render".to_string()],
            membership,
        ));
        Classifier::new(rules, policy)
    }

    fn item(text: &str) -> Item {
        Item::new(1, Author::new(10, "regular_user"), text)
    }

    #[test]
    fn plain_serial_text_is_topical() {
        let c = classifier();
        let v = c.is_topical_item(&item("S20 standing on the pad"), Utc::now());
        assert!(v.topical, "reasons: {:?}", v.reasons);
        assert!(v.reasons.iter().any(|r| r == "topical"));
    }

    #[test]
    fn stale_item_rejected() {
        let c = classifier();
        let now = Utc::now();
        let old = item("starship update").with_created_at(now - Duration::hours(25));
        let v = c.is_topical_item(&old, now);
        assert!(!v.topical);
        assert_eq!(v.reasons.last().unwrap(), "stale_age");
    }

    #[test]
    fn old_date_reference_rejected() {
        let c = classifier();
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();

        let dated = item("amazing starship photo from June 1st")
            .with_created_at(now - Duration::hours(1));
        let v = c.is_topical_item(&dated, now);
        assert!(!v.topical);
        assert!(v.reasons.last().unwrap().starts_with("stale_date:"));

        // Within the 48h horizon: fine.
        let fresh = item("starship photo from June 14").with_created_at(now - Duration::hours(1));
        assert!(c.is_topical_item(&fresh, now).topical);
    }

    #[test]
    fn excluded_text_rejected_but_important_bypasses() {
        let c = classifier();
        let now = Utc::now();

        let v = c.is_topical_item(&item("kerbal starship recreation"), now);
        assert!(!v.topical);
        assert!(v.reasons.last().unwrap().starts_with("excluded:"));

        let by_important = Item::new(2, Author::new(1, "chiefengineer"), "kerbal starship recreation");
        let v = c.is_topical_item(&by_important, now);
        assert!(v.topical, "important author bypasses exclusion: {:?}", v.reasons);
    }

    #[test]
    fn ignored_author_gate_and_geo_escape() {
        let membership = MembershipHandle::new();
        membership.replace(vec![(99, "spamfarm".to_string())]);
        let c = classifier_with_membership(membership);
        let now = Utc::now();

        let ignored = Item::new(3, Author::new(99, "spamfarm"), "starship stacked");
        assert!(!c.is_topical_item(&ignored, now).topical);

        // Same author, but tagged at a qualifying location.
        let at_site = Item::new(4, Author::new(99, "spamfarm"), "starship stacked")
            .with_geo("launch_site");
        assert!(c.is_topical_item(&at_site, now).topical);
    }

    #[test]
    fn media_at_site_overrides_exclusion() {
        let c = classifier();
        let now = Utc::now();
        let excluded_text = "kerbal style stacking, but look";

        let no_media = item(excluded_text).with_geo("launch_site");
        // Excluded, geo accept does not apply, no media -> rejected.
        assert!(!c.is_topical_item(&no_media, now).topical);

        let with_media = item(excluded_text)
            .with_geo("launch_site")
            .with_media(MediaKind::Photo);
        let v = c.is_topical_item(&with_media, now);
        assert!(v.topical);
        assert_eq!(v.reasons.last().unwrap(), "media_at_site");
    }

    #[test]
    fn mass_mention_rejected() {
        let c = classifier();
        let mentions: String = (0..12).map(|i| format!("@user{i} ")).collect();
        let v = c.is_topical_item(&item(&format!("{mentions} starship")), Utc::now());
        assert!(!v.topical);
        assert_eq!(v.reasons.last().unwrap(), "mass_mention");
    }

    #[test]
    fn b4_shorthand_does_not_fake_a_serial() {
        let c = classifier();
        let v = c.is_topical_item(&item("get there b4 the crowd"), Utc::now());
        assert!(!v.topical, "reasons: {:?}", v.reasons);
    }

    #[test]
    fn url_fragment_serial_is_not_topical() {
        let c = classifier();
        let v = c.is_topical_item(&item("archive https://example.com/sn15-gallery"), Utc::now());
        assert!(!v.topical, "reasons: {:?}", v.reasons);
    }

    #[test]
    fn media_prefix_needs_media() {
        let c = classifier();
        let now = Utc::now();
        let text = "View of the flame trench this morning";
        assert!(!c.is_topical_item(&item(text), now).topical);
        let v = c.is_topical_item(&item(text).with_media(MediaKind::Photo), now);
        assert!(v.topical);
        assert_eq!(v.reasons.last().unwrap(), "media_prefix");
    }

    #[test]
    fn trusted_media_source_is_terminal() {
        let c = classifier();
        let now = Utc::now();
        let trusted = Author::new(7, "padcam_feed");

        let with_media = Item::new(5, trusted.clone(), "afternoon feed")
            .with_media(MediaKind::Video);
        let v = c.is_topical_item(&with_media, now);
        assert!(v.topical);
        assert_eq!(v.reasons.last().unwrap(), "trusted_media_source");

        let without = Item::new(6, trusted, "afternoon feed");
        let v = c.is_topical_item(&without, now);
        assert!(!v.topical);
        assert_eq!(v.reasons.last().unwrap(), "trusted_source_without_media");
    }

    #[test]
    fn qualifying_geo_accepts_unexcluded_text() {
        let c = classifier();
        let v = c.is_topical_item(
            &item("quiet day out here").with_geo("village"),
            Utc::now(),
        );
        assert!(v.topical);
        assert_eq!(v.reasons.last().unwrap(), "geo_tag");
    }

    #[test]
    fn location_phrase_catches_important_author_after_exclusion_bypass() {
        // Narrow path: excluded text, important author, location phrase set.
        let c = classifier();
        let by_important = Item::new(9, Author::new(1, "chiefengineer"), "kerbal rollout")
            .with_geo("build_site");
        let v = c.is_topical_item(&by_important, Utc::now());
        assert!(v.topical, "reasons: {:?}", v.reasons);
        assert_eq!(v.reasons.last().unwrap(), "location_phrase");
    }

    #[test]
    fn custom_accept_pattern() {
        let c = classifier();
        let author = Author::new(8, "site_photographer");
        let v = c.is_topical_item(
            &Item::new(7, author, "wide shot from the causeway"),
            Utc::now(),
        );
        assert!(v.topical);
        assert!(v.reasons.last().unwrap().starts_with("accept_pattern"));
    }
}
