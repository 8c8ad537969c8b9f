// src/matcher.rs
//! Lexical matcher primitives: word-boundary phrase matching, serial-code
//! regexes, and the small text extractors (links, mentions, hashtags) the
//! classifier builds on. Stateless; all patterns are compiled once.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Upper bound on boundary-scan restarts per phrase. Pathological inputs
/// (very long runs of the same prefix) give up instead of spinning.
pub const MAX_PHRASE_SCAN: usize = 512;

/// True if `phrase` occurs in `text` starting at a word boundary: preceded by
/// start-of-string or a non-alphanumeric character. Stricter than substring
/// containment, but the phrase itself may span multiple words. `#`/`@`
/// markers count as boundaries, so "#starship" matches the phrase "starship".
/// Matching is case-insensitive.
pub fn occurs_as_word(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let text = text.to_lowercase();
    let phrase = phrase.to_lowercase();

    let mut from = 0usize;
    let mut scans = 0usize;
    while let Some(rel) = text[from..].find(&phrase) {
        scans += 1;
        if scans > MAX_PHRASE_SCAN {
            warn!(
                target: "matcher",
                phrase = %phrase,
                scans,
                "phrase scan cap exceeded; treating as no match"
            );
            return false;
        }
        let at = from + rel;
        let boundary = at == 0
            || text[..at]
                .chars()
                .next_back()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true);
        if boundary {
            return true;
        }
        // Advance past this occurrence and keep scanning.
        match text[at..].char_indices().nth(1) {
            Some((step, _)) => from = at + step,
            None => return false,
        }
    }
    false
}

/// True if any phrase in the set satisfies [`occurs_as_word`].
pub fn matches_any<S: AsRef<str>>(text: &str, phrases: &[S]) -> bool {
    first_phrase_match(text, phrases).is_some()
}

/// Like [`matches_any`] but reports which phrase hit first (set order).
pub fn first_phrase_match<'a, S: AsRef<str>>(text: &str, phrases: &'a [S]) -> Option<&'a str> {
    phrases
        .iter()
        .map(|p| p.as_ref())
        .find(|p| occurs_as_word(text, p))
}

/* ----------------------------
Serial-code patterns
---------------------------- */

// Booster serials: "BN10", "bn-10", "B7", "booster 9". The digit run is
// capped at two so part numbers like "b3496" stay out.
static BOOSTER_SERIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(?:booster[ -]?|bn-?|b-?)\d{1,2}(?:$|[^a-z0-9])")
        .expect("booster serial regex")
});

// Ship serials: "SN15", "S20", "ship 24". Boundary classes on both sides
// keep "wordsn 10" and digit runs inside longer tokens from matching.
static SHIP_SERIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(?:ship[ -]?|sn-?|s-?)\d{1,2}(?:$|[^a-z0-9])")
        .expect("ship serial regex")
});

/// True if the text carries a booster- or ship-style serial code.
pub fn has_serial_code(text: &str) -> bool {
    BOOSTER_SERIAL.is_match(text) || SHIP_SERIAL.is_match(text)
}

pub fn has_booster_serial(text: &str) -> bool {
    BOOSTER_SERIAL.is_match(text)
}

pub fn has_ship_serial(text: &str) -> bool {
    SHIP_SERIAL.is_match(text)
}

/* ----------------------------
Extractors
---------------------------- */

static RE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s]+").expect("link regex"));

static RE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^a-z0-9_])@([a-z0-9_]{1,15})").expect("mention regex"));

static RE_HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^a-z0-9_&])#([a-z0-9_]+)").expect("hashtag regex"));

/// External links in the text, trailing sentence punctuation trimmed.
pub fn extract_links(text: &str) -> Vec<String> {
    RE_LINK
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')', '!', '?']).to_string())
        .collect()
}

/// The text with all links removed (for matching passes where URL path
/// fragments would produce false serial hits).
pub fn strip_links(text: &str) -> String {
    RE_LINK.replace_all(text, " ").into_owned()
}

/// Distinct mentioned handles, lowercased, in order of first occurrence.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in RE_MENTION.captures_iter(text) {
        let handle = caps[1].to_ascii_lowercase();
        if !out.contains(&handle) {
            out.push(handle);
        }
    }
    out
}

/// Distinct hashtags, lowercased, without `#`.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in RE_HASHTAG.captures_iter(text) {
        let tag = caps[1].to_ascii_lowercase();
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// True when the text is nothing but hashtags, mentions, and links.
pub fn is_tag_only(text: &str) -> bool {
    static RE_TAGS: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(#[a-z0-9_]+|@[a-z0-9_]+|https?://[^\s]+)").expect("tag strip regex")
    });
    let stripped = RE_TAGS.replace_all(text, "");
    !stripped.chars().any(|c| c.is_alphanumeric())
}

/// Rewrites the lowercase shorthand token `b4` ("before") so it cannot
/// shadow the booster serial `B4`. Uppercase forms are left intact.
pub fn normalize_ambiguous(text: &str) -> String {
    static RE_B4: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(^|[^A-Za-z0-9])b4($|[^A-Za-z0-9])").expect("b4 regex")
    });
    RE_B4.replace_all(text, "${1}before${2}").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_boundary_matching() {
        assert!(occurs_as_word("the starship rolled out", "starship"));
        assert!(occurs_as_word("Starship rolled out", "starship"));
        assert!(occurs_as_word("#starship rolled out", "starship"));
        assert!(occurs_as_word("@starship_fan said so", "starship"));
        assert!(occurs_as_word("see: starship!", "starship"));
        // multi-word phrase, boundary only required at its start
        assert!(occurs_as_word("over at boca chica today", "boca chica"));
        // no boundary -> no match
        assert!(!occurs_as_word("megastarship", "starship"));
        assert!(!occurs_as_word("abc", ""));
    }

    #[test]
    fn matches_any_reports_first_hit() {
        let phrases = vec!["raptor".to_string(), "starbase".to_string()];
        assert!(matches_any("tour of starbase", &phrases));
        assert_eq!(
            first_phrase_match("raptor test at starbase", &phrases),
            Some("raptor")
        );
        assert_eq!(first_phrase_match("unrelated", &phrases), None);
    }

    // Fixed valid/invalid tables for the serial patterns.

    #[test]
    fn booster_serial_table() {
        for valid in ["bn10", "BN10", "b7", "B4 moved to the pad", "booster 9", "bn-10"] {
            assert!(has_booster_serial(valid), "expected match: {valid}");
        }
        for invalid in ["b3496", "bn", "carbon 10", "10-15", "abn10", "b 10"] {
            assert!(!has_booster_serial(invalid), "unexpected match: {invalid}");
        }
    }

    #[test]
    fn ship_serial_table() {
        for valid in ["sn15", "SN15", "S20 standing on the pad", "ship 24", "sn-8's flight"] {
            assert!(has_ship_serial(valid), "expected match: {valid}");
        }
        for invalid in ["wordsn 10", "sn", "s 10", "1960s", "reasons 10", "s12345"] {
            assert!(!has_ship_serial(invalid), "unexpected match: {invalid}");
        }
    }

    #[test]
    fn extractors() {
        let text = "live now https://example.com/watch?v=a1, cc @PadCam_Feed #Starbase #starbase";
        assert_eq!(extract_links(text), vec!["https://example.com/watch?v=a1"]);
        assert_eq!(extract_mentions(text), vec!["padcam_feed"]);
        assert_eq!(extract_hashtags(text), vec!["starbase"]);
        assert!(!strip_links(text).contains("https"));
    }

    #[test]
    fn email_is_not_a_mention() {
        assert!(extract_mentions("mail me at ops@example.com").is_empty());
    }

    #[test]
    fn tag_only_detection() {
        assert!(is_tag_only("#starship #bn10 @padcam_feed"));
        assert!(is_tag_only("https://example.com/a #tag"));
        assert!(!is_tag_only("#starship is stacked"));
    }

    #[test]
    fn b4_shorthand_is_rewritten() {
        assert_eq!(normalize_ambiguous("done b4 5pm"), "done before 5pm");
        assert_eq!(normalize_ambiguous("B4 on the mount"), "B4 on the mount");
        assert!(!has_serial_code(&normalize_ambiguous("see you b4 the show")));
        assert!(has_serial_code(&normalize_ambiguous("B4 rollback b4 sunset")));
    }

    #[test]
    fn scan_cap_terminates() {
        // Huge run of near-misses; must return quickly with no match.
        let text = "xstarship".repeat(MAX_PHRASE_SCAN * 4);
        assert!(!occurs_as_word(&text, "starship"));
    }
}
