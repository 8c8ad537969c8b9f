// src/item.rs
//! Core data model: a social post ("item"), its author, and where it came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which ingestion source originally delivered the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Unknown,
    LocationFeed,
    CuratedList,
    Timeline,
    TrustedAuthor,
}

/// Attached media, if any. Animated GIFs are reaction-type attachments and
/// never satisfy a media requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    None,
    Photo,
    Video,
    AnimatedGif,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub handle: String,
    /// Self-description text; feeds the ignore heuristics.
    #[serde(default)]
    pub description: String,
}

impl Author {
    pub fn new(id: u64, handle: impl Into<String>) -> Self {
        Self {
            id,
            handle: handle.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub media: MediaKind,
    #[serde(default)]
    pub sensitive: bool,
    /// Delivered in clipped form; the full item must be re-fetched.
    #[serde(default)]
    pub truncated: bool,
    /// Location id the post is tagged at, if any (keys of `[locations]`).
    #[serde(default)]
    pub geo_tag: Option<String>,
    #[serde(default)]
    pub reply_to: Option<u64>,
    #[serde(default)]
    pub quoted: Option<Box<Item>>,
    /// Set when this item is a plain re-share of another.
    #[serde(default)]
    pub rebroadcast_of: Option<Box<Item>>,
    /// Set by the backend once the item has been promoted there.
    #[serde(default)]
    pub already_promoted: bool,
    #[serde(default)]
    pub provenance: Provenance,
}

fn default_language() -> String {
    "en".to_string()
}

impl Item {
    pub fn new(id: u64, author: Author, text: impl Into<String>) -> Self {
        Self {
            id,
            author,
            text: text.into(),
            created_at: Utc::now(),
            language: default_language(),
            media: MediaKind::None,
            sensitive: false,
            truncated: false,
            geo_tag: None,
            reply_to: None,
            quoted: None,
            rebroadcast_of: None,
            already_promoted: false,
            provenance: Provenance::Unknown,
        }
    }

    /// True for photo or video attachments. Reaction GIFs do not count.
    pub fn has_media(&self) -> bool {
        matches!(self.media, MediaKind::Photo | MediaKind::Video)
    }

    pub fn has_reaction_media(&self) -> bool {
        self.media == MediaKind::AnimatedGif
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_hours()
    }

    // -- builder-style helpers (used heavily by tests and fixtures) --

    pub fn with_media(mut self, media: MediaKind) -> Self {
        self.media = media;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_geo(mut self, geo_tag: impl Into<String>) -> Self {
        self.geo_tag = Some(geo_tag.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn as_reply_to(mut self, parent_id: u64) -> Self {
        self.reply_to = Some(parent_id);
        self
    }

    pub fn quoting(mut self, quoted: Item) -> Self {
        self.quoted = Some(Box::new(quoted));
        self
    }

    pub fn rebroadcasting(mut self, original: Item) -> Self {
        self.rebroadcast_of = Some(Box::new(original));
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kinds() {
        let a = Author::new(1, "someone");
        let plain = Item::new(10, a.clone(), "hello");
        assert!(!plain.has_media());

        let photo = Item::new(11, a.clone(), "hello").with_media(MediaKind::Photo);
        assert!(photo.has_media());
        assert!(!photo.has_reaction_media());

        let gif = Item::new(12, a, "hello").with_media(MediaKind::AnimatedGif);
        assert!(!gif.has_media());
        assert!(gif.has_reaction_media());
    }

    #[test]
    fn item_roundtrips_through_json() {
        let item = Item::new(42, Author::new(7, "padcam_feed"), "ship on the pad")
            .with_media(MediaKind::Video)
            .with_geo("launch_site");
        let json = serde_json::to_string(&item).unwrap();
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }
}
