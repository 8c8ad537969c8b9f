// src/rules.rs
//! Topic rule tables: positive phrases, co-occurrence rules, exclusion
//! phrases and regexes, per-account overrides, and per-location phrase sets.
//! Loaded from TOML once at startup into an immutable compiled object;
//! regex errors are reported per rule id.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;

use crate::matcher::{first_phrase_match, has_serial_code, matches_any, occurs_as_word};

pub const DEFAULT_TOPIC_CONFIG_PATH: &str = "config/topic.toml";
pub const ENV_TOPIC_CONFIG_PATH: &str = "CURATOR_TOPIC_CONFIG";

/// Compiled-in default tables; also what the test suite runs against.
const BUILTIN_TOPIC_TOML: &str = include_str!("../config/topic.toml");

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
struct TopicRoot {
    topic: TopicSection,
    #[serde(default)]
    co_occurrence: Vec<CoOccurrenceCfg>,
    #[serde(default)]
    exclusions: ExclusionsCfg,
    #[serde(default)]
    account_overrides: Vec<AccountOverrideCfg>,
    #[serde(default)]
    locations: HashMap<String, LocationCfg>,
}

#[derive(Debug, Clone, Deserialize)]
struct TopicSection {
    positive_phrases: Vec<String>,
    #[serde(default)]
    media_prefix_phrases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CoOccurrenceCfg {
    id: String,
    trigger: Vec<String>,
    companions: Vec<String>,
    #[serde(default)]
    exclusions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ExclusionsCfg {
    #[serde(default)]
    phrases: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccountOverrideCfg {
    handle: String,
    #[serde(default)]
    exclusions: Option<Vec<String>>,
    #[serde(default)]
    accept_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LocationCfg {
    name: String,
    #[serde(default)]
    topic_site: bool,
    #[serde(default)]
    phrases: Vec<String>,
}

/* ----------------------------
Compiled structures
---------------------------- */

/// A trigger phrase only counts as relevant when a companion phrase also
/// occurs and none of the rule-local exclusions do.
#[derive(Debug)]
pub struct CoOccurrenceRule {
    pub id: String,
    pub trigger: Vec<String>,
    pub companions: Vec<String>,
    pub exclusions: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AccountOverride {
    /// Replaces the global exclusion phrase list for this author.
    pub exclusions: Option<Vec<String>>,
    /// Custom acceptance regexes, tried last by the classifier.
    pub accept_patterns: Vec<Regex>,
}

#[derive(Debug)]
pub struct LocationRules {
    pub name: String,
    pub topic_site: bool,
    pub phrases: Vec<String>,
}

#[derive(Debug)]
pub struct TopicRules {
    positive_phrases: Vec<String>,
    media_prefix_phrases: Vec<String>,
    co_occurrence: Vec<CoOccurrenceRule>,
    exclusion_phrases: Vec<String>,
    exclusion_patterns: Vec<Regex>,
    overrides: HashMap<String, AccountOverride>,
    locations: HashMap<String, LocationRules>,
}

impl TopicRules {
    /// Load from `CURATOR_TOPIC_CONFIG` or the default path.
    pub fn from_path_env() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_TOPIC_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOPIC_CONFIG_PATH));
        let content = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("failed to read topic config at {}: {}", path.display(), e)
        })?;
        Self::from_toml_str(&content)
    }

    /// The compiled-in default rule tables.
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_TOPIC_TOML).expect("builtin topic config")
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let root: TopicRoot = toml::from_str(toml_str)?;

        let exclusion_patterns = root
            .exclusions
            .patterns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                Regex::new(p)
                    .map_err(|e| anyhow::anyhow!("exclusion pattern #{} regex error: {}", i, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut overrides = HashMap::new();
        for o in &root.account_overrides {
            let accept_patterns = o
                .accept_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        anyhow::anyhow!("accept pattern for `{}` regex error: {}", o.handle, e)
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            overrides.insert(
                o.handle.to_ascii_lowercase(),
                AccountOverride {
                    exclusions: o.exclusions.clone(),
                    accept_patterns,
                },
            );
        }

        let co_occurrence = root
            .co_occurrence
            .into_iter()
            .map(|c| CoOccurrenceRule {
                id: c.id,
                trigger: c.trigger,
                companions: c.companions,
                exclusions: c.exclusions,
            })
            .collect();

        let locations = root
            .locations
            .into_iter()
            .map(|(id, l)| {
                (
                    id,
                    LocationRules {
                        name: l.name,
                        topic_site: l.topic_site,
                        phrases: l.phrases,
                    },
                )
            })
            .collect();

        Ok(Self {
            positive_phrases: root.topic.positive_phrases,
            media_prefix_phrases: root.topic.media_prefix_phrases,
            co_occurrence,
            exclusion_phrases: root.exclusions.phrases,
            exclusion_patterns,
            overrides,
            locations,
        })
    }

    /// Exclusion phrase list to use for this author: their override if one
    /// exists, the global list otherwise.
    pub fn exclusion_set_for(&self, handle: &str) -> &[String] {
        self.overrides
            .get(&handle.to_ascii_lowercase())
            .and_then(|o| o.exclusions.as_deref())
            .unwrap_or(&self.exclusion_phrases)
    }

    /// Evaluate exclusions: regexes first (higher-precision multi-token
    /// negatives), then the plain phrase list. First hit wins.
    pub fn is_excluded(&self, text: &str, phrase_set: &[String]) -> Option<String> {
        for re in &self.exclusion_patterns {
            if re.is_match(text) {
                return Some(re.as_str().to_string());
            }
        }
        first_phrase_match(text, phrase_set).map(str::to_string)
    }

    /// True if the text is topical: any positive phrase, any serial code
    /// (unless disabled for a URL-bearing pass), or a satisfied
    /// co-occurrence rule.
    pub fn is_topical(&self, text: &str, allow_serials: bool) -> bool {
        if matches_any(text, &self.positive_phrases) {
            return true;
        }
        if allow_serials && has_serial_code(text) {
            return true;
        }
        self.co_occurrence.iter().any(|rule| {
            matches_any(text, &rule.trigger)
                && matches_any(text, &rule.companions)
                && !matches_any(text, &rule.exclusions)
        })
    }

    /// True if the text opens with one of the media-qualifying phrases.
    pub fn media_prefix_match(&self, text: &str) -> bool {
        let lowered = text.trim_start().to_lowercase();
        self.media_prefix_phrases
            .iter()
            .any(|p| lowered.starts_with(&p.to_lowercase()))
    }

    pub fn accept_patterns_for(&self, handle: &str) -> &[Regex] {
        self.overrides
            .get(&handle.to_ascii_lowercase())
            .map(|o| o.accept_patterns.as_slice())
            .unwrap_or(&[])
    }

    /// Handles that are explicitly known through an override entry.
    /// Known accounts can never be classified as ignored.
    pub fn known_handles(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }

    pub fn is_qualifying_location(&self, geo_tag: Option<&str>) -> bool {
        geo_tag.is_some_and(|g| self.locations.contains_key(g))
    }

    /// True when the tag names the physical site (media there overrides
    /// textual negatives).
    pub fn is_topic_site(&self, geo_tag: Option<&str>) -> bool {
        geo_tag
            .and_then(|g| self.locations.get(g))
            .is_some_and(|l| l.topic_site)
    }

    /// True if the tag has a location phrase set and the text matches it.
    pub fn location_phrase_match(&self, geo_tag: Option<&str>, text: &str) -> bool {
        geo_tag
            .and_then(|g| self.locations.get(g))
            .is_some_and(|l| l.phrases.iter().any(|p| occurs_as_word(text, p)))
    }
}
