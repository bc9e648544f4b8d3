//! Author name normalization.
//!
//! Two spellings that produce the same normalized key are the same author.
//! The rules are configurable. With the defaults, `"J. Smith"`,
//! `"John Smith"` and `"Smith, John"` all normalize to `"j smith"`.

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalization policy for author names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRules {
    /// Fold `é` to `e`, `ø` stays as is.
    pub strip_diacritics: bool,
    /// Reduce given names to initials (`john ronald smith` -> `j r smith`).
    pub collapse_given_names: bool,
}

impl Default for AuthorRules {
    fn default() -> Self {
        Self {
            strip_diacritics: true,
            collapse_given_names: true,
        }
    }
}

impl AuthorRules {
    /// Stable identifier of the rule set, stored in the catalog so a rule
    /// change can trigger re-normalization of existing authors.
    pub fn fingerprint(&self) -> String {
        format!(
            "v1;diacritics={};initials={}",
            self.strip_diacritics, self.collapse_given_names
        )
    }
}

const FOOTNOTE_MARKS: &[char] = &['*', '†', '‡', '§', '¶', '^', '∗', '⁎'];

/// Cleans a raw author string for display: drops footnote markers and
/// affiliation digits, collapses whitespace.
pub fn display_form(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !FOOTNOTE_MARKS.contains(c) && !c.is_ascii_digit())
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ',' || c == ';')
        .trim()
        .to_string()
}

/// Normalizes an author name into its canonical key.
///
/// Returns `None` when nothing name-like is left.
pub fn normalize_author(raw: &str, rules: &AuthorRules) -> Option<String> {
    let display = display_form(raw);

    // "Surname, Given" -> "Given Surname"
    let ordered = match display.split_once(',') {
        Some((surname, given)) if !given.contains(',') && !given.trim().is_empty() => {
            format!("{} {}", given.trim(), surname.trim())
        }
        _ => display,
    };

    let folded: String = if rules.strip_diacritics {
        ordered.nfkd().filter(|c| !is_combining_mark(*c)).collect()
    } else {
        ordered.nfc().collect()
    };

    let lowered: String = folded
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    let surname = tokens.pop()?;
    if surname.chars().count() < 2 && tokens.is_empty() {
        return None;
    }

    let given: Vec<String> = if rules.collapse_given_names {
        tokens
            .iter()
            .filter_map(|t| t.chars().next())
            .map(|c| c.to_string())
            .collect()
    } else {
        tokens.iter().map(|t| t.to_string()).collect()
    };

    let mut key = given.join(" ");
    if !key.is_empty() {
        key.push(' ');
    }
    key.push_str(surname);
    Some(key)
}

/// Whether `candidate` should replace `current` as an author's display name.
///
/// Longer spellings win ("John Smith" over "J. Smith"); ties go to the
/// lexicographically smaller one, so the outcome does not depend on the
/// order documents were ingested in.
pub fn prefer_display(current: &str, candidate: &str) -> bool {
    let (cur_len, cand_len) = (current.chars().count(), candidate.chars().count());
    cand_len > cur_len || (cand_len == cur_len && candidate < current)
}
