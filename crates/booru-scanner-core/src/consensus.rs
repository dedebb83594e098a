//! Reconciles the cached answers of several providers into one record draft.
//!
//! Rating and source are chosen by majority; ties go to the value seen first
//! in cache iteration order. Tags are the union of everything providers
//! reported plus the scanner's own tags.

use crate::storage::models::CacheEntry;
use std::borrow::Cow;
use std::collections::BTreeSet;

/// Inputs that come from configuration and the scanner rather than the cache.
#[derive(Debug, Clone)]
pub struct ConsensusRules<'a> {
    pub always_tags: &'a [String],
    /// Only applied when no provider found the content.
    pub failure_tags: &'a [String],
    pub ratings: &'a [String],
    pub default_rating: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consensus {
    pub rating: String,
    pub source: Option<String>,
    /// Sorted, deduplicated.
    pub tags: Vec<String>,
    pub found_count: usize,
}

impl Consensus {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

pub fn aggregate(entries: &[CacheEntry], rules: &ConsensusRules<'_>) -> Consensus {
    let found: Vec<&CacheEntry> = entries.iter().filter(|e| e.found).collect();

    let rating = mode(found.iter().map(|e| map_rating(&e.rating, rules)))
        .unwrap_or_else(|| rules.default_rating.to_string());

    let source = mode(
        found
            .iter()
            .filter_map(|e| e.source.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );

    let mut tags: BTreeSet<String> = rules.always_tags.iter().cloned().collect();
    if found.is_empty() {
        tags.extend(rules.failure_tags.iter().cloned());
    }
    for entry in &found {
        for raw in entry.tags.split_whitespace() {
            let tag = unescape_html(raw);
            if is_valid_tag_name(&tag) {
                tags.insert(tag.into_owned());
            }
        }
    }

    Consensus {
        rating,
        source,
        tags: tags.into_iter().collect(),
        found_count: found.len(),
    }
}

/// Most frequent value; ties resolve to whichever value appeared first.
pub fn mode<T, I>(values: I) -> Option<T>
where
    T: PartialEq,
    I: IntoIterator<Item = T>,
{
    let mut counts: Vec<(T, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(T, usize)> = None;
    for (value, count) in counts {
        match &best {
            Some((_, best_count)) if *best_count >= count => {}
            _ => best = Some((value, count)),
        }
    }
    best.map(|(value, _)| value)
}

/// Provider rating names map onto the vocabulary case-insensitively; anything
/// unknown becomes the default rating.
fn map_rating(raw: &str, rules: &ConsensusRules<'_>) -> String {
    let raw = raw.trim();
    rules
        .ratings
        .iter()
        .find(|r| r.eq_ignore_ascii_case(raw))
        .cloned()
        .unwrap_or_else(|| rules.default_rating.to_string())
}

/// Tag vocabulary rule: at least two characters, printable ASCII, no
/// uppercase, and none of the search operators `*` or `-`.
pub fn is_valid_tag_name(name: &str) -> bool {
    name.chars().count() >= 2
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && !c.is_ascii_uppercase() && c != '*' && c != '-')
}

/// Decode character references in provider tag text.
///
/// Numeric references work with or without the closing `;`. Named references
/// cover the HTML5 names that decode to ASCII (plus `nbsp`). The legacy names
/// `amp`, `lt`, `gt` and `quot` also decode without a `;`. Anything else is
/// left as written.
pub fn unescape_html(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match decode_reference(tail) {
            Some((decoded, consumed)) => {
                out.push(decoded);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Decode the reference at the start of `tail` (just past the `&`). Returns
/// the character and how many bytes of `tail` it used.
fn decode_reference(tail: &str) -> Option<(char, usize)> {
    if let Some(number) = tail.strip_prefix('#') {
        let (digits, radix, prefix) = match number.strip_prefix(|c: char| c == 'x' || c == 'X') {
            Some(hex) => (hex, 16, 2),
            None => (number, 10, 1),
        };
        let len = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        if len == 0 {
            return None;
        }
        let decoded = u32::from_str_radix(&digits[..len], radix)
            .ok()
            .and_then(|code| if code == 0 { None } else { char::from_u32(code) })
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        let terminated = digits[len..].starts_with(';');
        return Some((decoded, prefix + len + usize::from(terminated)));
    }

    let len = tail
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(tail.len());
    let name = &tail[..len];
    if tail[len..].starts_with(';') {
        if let Some(decoded) = named_entity(name) {
            return Some((decoded, len + 1));
        }
    }
    LEGACY_ENTITIES
        .iter()
        .find(|(legacy, _)| name.starts_with(legacy))
        .map(|&(legacy, decoded)| (decoded, legacy.len()))
}

/// Names that decode even without the closing `;`, longest first.
const LEGACY_ENTITIES: [(&str, char); 8] = [
    ("quot", '"'),
    ("QUOT", '"'),
    ("amp", '&'),
    ("AMP", '&'),
    ("lt", '<'),
    ("LT", '<'),
    ("gt", '>'),
    ("GT", '>'),
];

fn named_entity(name: &str) -> Option<char> {
    let decoded = match name {
        "amp" | "AMP" => '&',
        "lt" | "LT" => '<',
        "gt" | "GT" => '>',
        "quot" | "QUOT" => '"',
        "apos" => '\'',
        "excl" => '!',
        "num" => '#',
        "dollar" => '$',
        "percnt" => '%',
        "lpar" => '(',
        "rpar" => ')',
        "ast" | "midast" => '*',
        "plus" => '+',
        "comma" => ',',
        "period" => '.',
        "sol" => '/',
        "colon" => ':',
        "semi" => ';',
        "equals" => '=',
        "quest" => '?',
        "commat" => '@',
        "lsqb" | "lbrack" => '[',
        "bsol" => '\\',
        "rsqb" | "rbrack" => ']',
        "Hat" => '^',
        "lowbar" | "UnderBar" => '_',
        "grave" | "DiacriticalGrave" => '`',
        "lcub" | "lbrace" => '{',
        "verbar" | "vert" | "VerticalLine" => '|',
        "rcub" | "rbrace" => '}',
        "Tab" => '\t',
        "NewLine" => '\n',
        "nbsp" => '\u{a0}',
        _ => return None,
    };
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, found: bool, tags: &str, rating: &str, source: Option<&str>) -> CacheEntry {
        CacheEntry {
            id,
            provider_id: id,
            content_hash: "abc".to_string(),
            found,
            tags: tags.to_string(),
            rating: rating.to_string(),
            source: source.map(str::to_string),
            created_at: 0,
        }
    }

    fn ratings() -> Vec<String> {
        vec!["safe".into(), "questionable".into(), "explicit".into()]
    }

    #[test]
    fn test_rating_majority() {
        let ratings = ratings();
        let rules = ConsensusRules {
            always_tags: &[],
            failure_tags: &[],
            ratings: &ratings,
            default_rating: "safe",
        };
        let entries = vec![
            entry(1, true, "a_tag", "explicit", None),
            entry(2, true, "a_tag", "safe", None),
            entry(3, true, "a_tag", "safe", None),
            entry(4, true, "a_tag", "safe", None),
        ];
        assert_eq!(aggregate(&entries, &rules).rating, "safe");
    }

    #[test]
    fn test_rating_tie_goes_to_first_seen() {
        let ratings = ratings();
        let rules = ConsensusRules {
            always_tags: &[],
            failure_tags: &[],
            ratings: &ratings,
            default_rating: "safe",
        };
        let entries = vec![
            entry(1, true, "x1", "explicit", None),
            entry(2, true, "x1", "safe", None),
        ];
        assert_eq!(aggregate(&entries, &rules).rating, "explicit");

        let reversed = vec![entries[1].clone(), entries[0].clone()];
        assert_eq!(aggregate(&reversed, &rules).rating, "safe");
    }

    #[test]
    fn test_unknown_rating_maps_to_default() {
        let ratings = ratings();
        let rules = ConsensusRules {
            always_tags: &[],
            failure_tags: &[],
            ratings: &ratings,
            default_rating: "safe",
        };
        let entries = vec![entry(1, true, "x1", "Sensitive", None)];
        assert_eq!(aggregate(&entries, &rules).rating, "safe");
        let entries = vec![entry(1, true, "x1", "Explicit", None)];
        assert_eq!(aggregate(&entries, &rules).rating, "explicit");
    }

    #[test]
    fn test_not_found_entries_do_not_vote() {
        let ratings = ratings();
        let always = vec!["scanned".to_string()];
        let failure = vec!["tagme".to_string()];
        let rules = ConsensusRules {
            always_tags: &always,
            failure_tags: &failure,
            ratings: &ratings,
            default_rating: "questionable",
        };
        let entries = vec![
            entry(1, false, "", "explicit", Some("http://nope")),
            entry(2, false, "", "", None),
        ];
        let consensus = aggregate(&entries, &rules);
        assert_eq!(consensus.rating, "questionable");
        assert_eq!(consensus.source, None);
        assert_eq!(consensus.tags, vec!["scanned".to_string(), "tagme".to_string()]);
        assert_eq!(consensus.found_count, 0);
    }

    #[test]
    fn test_tags_are_unioned_unescaped_and_validated() {
        let ratings = ratings();
        let failure = vec!["tagme".to_string()];
        let rules = ConsensusRules {
            always_tags: &[],
            failure_tags: &failure,
            ratings: &ratings,
            default_rating: "safe",
        };
        let entries = vec![
            entry(1, true, "1boy pink_hair astolfo_(fate)", "safe", Some("https://a")),
            entry(2, true, "pink_hair &gt;_&lt; Bad e t-shirt", "safe", Some("https://b")),
            entry(3, true, "", "safe", Some("https://b")),
        ];
        let consensus = aggregate(&entries, &rules);
        assert_eq!(
            consensus.tags,
            vec!["1boy", ">_<", "astolfo_(fate)", "pink_hair"]
        );
        assert_eq!(consensus.source.as_deref(), Some("https://b"));
        // failure tags are not applied once anything was found
        assert!(!consensus.tags.contains(&"tagme".to_string()));
    }

    #[test]
    fn test_empty_when_nothing_to_say() {
        let ratings = ratings();
        let rules = ConsensusRules {
            always_tags: &[],
            failure_tags: &[],
            ratings: &ratings,
            default_rating: "safe",
        };
        assert!(aggregate(&[], &rules).is_empty());
        assert!(aggregate(&[entry(1, false, "", "", None)], &rules).is_empty());
    }

    #[test]
    fn test_is_valid_tag_name() {
        for tag in ["1tag", "funny_monkey", "=.=", ":=>"] {
            assert!(is_valid_tag_name(tag), "{tag} should be valid");
        }
        for tag in ["", "     ", "e", "funny-monkey", "funny monkey", "HeHehe", "*.*"] {
            assert!(!is_valid_tag_name(tag), "{tag} should be invalid");
        }
    }

    #[test]
    fn test_unescape_html() {
        assert_eq!(unescape_html("plain"), "plain");
        assert_eq!(unescape_html("a&amp;b"), "a&b");
        assert_eq!(unescape_html("&#39;quote&#x27;"), "'quote'");
        assert_eq!(unescape_html("&bogus;x"), "&bogus;x");
        assert_eq!(unescape_html("trailing&"), "trailing&");
    }

    #[test]
    fn test_unescape_html5_names_and_unterminated_references() {
        assert_eq!(unescape_html("smile&lpar;wink&rpar;"), "smile(wink)");
        assert_eq!(unescape_html("wow&excl;"), "wow!");
        assert_eq!(unescape_html("re&colon;zero"), "re:zero");
        assert_eq!(unescape_html("tom&ampjerry"), "tom&jerry");
        assert_eq!(unescape_html("&#33 &#x21"), "! !");
        assert_eq!(unescape_html("&#0;"), "\u{fffd}");
        assert_eq!(unescape_html("&lparx"), "&lparx");
    }

    #[test]
    fn test_mode_empty() {
        assert_eq!(mode(Vec::<String>::new()), None);
    }
}
