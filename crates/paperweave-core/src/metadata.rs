//! Bibliographic metadata heuristics.
//!
//! Works on text that has already been pulled out of a PDF: layout lines
//! tagged with their font size, plain body text, and the document
//! information dictionary. Decoding the PDF itself happens in the
//! native crate.
//!
//! | Field | Source |
//! |-------|--------|
//! | title | largest-font line on the first page, then `/Info` Title, then filename |
//! | authors | byline right after the title, or an `Authors:` / `By` line, then `/Info` Author |
//! | abstract | block after an `Abstract` heading, up to the next heading or the cap |
//! | keywords | explicit `Keywords:` / `Index Terms` line, then `/Info` Keywords |

use std::collections::{BTreeSet, HashSet};

use crate::models::{title_from_filename, Metadata, MetadataField};

/// One rendered text line with its effective font size.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutLine {
    /// Zero-based page index.
    pub page: u32,
    pub text: String,
    pub font_size: f64,
}

/// Entries of the PDF document information dictionary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Option<String>,
}

/// Everything the heuristics look at for one file.
#[derive(Debug, Clone, Default)]
pub struct RawText {
    pub layout: Vec<LayoutLine>,
    pub body: String,
    pub info: DocumentInfo,
    pub page_count: u32,
}

#[derive(Debug, Clone)]
pub struct HeuristicLimits {
    pub max_abstract_chars: usize,
    pub max_authors: usize,
    pub max_keywords: usize,
}

impl Default for HeuristicLimits {
    fn default() -> Self {
        Self {
            max_abstract_chars: 2000,
            max_authors: 10,
            max_keywords: 15,
        }
    }
}

const MIN_TITLE_CHARS: usize = 6;
const MAX_TITLE_LINES: usize = 3;
const BYLINE_WINDOW: usize = 3;

const AFFILIATION_WORDS: &[&str] = &[
    "abstract",
    "center",
    "centre",
    "college",
    "department",
    "dept",
    "institute",
    "laboratory",
    "school",
    "university",
];

/// Derives metadata from extracted text. Never fails: whatever cannot be
/// found is left empty and recorded in [`Metadata::missing`].
pub fn derive_metadata(raw: &RawText, file_stem: &str, limits: &HeuristicLimits) -> Metadata {
    let mut missing = BTreeSet::new();

    let lines: Vec<&str> = if raw.layout.is_empty() {
        raw.body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    } else {
        raw.layout.iter().map(|l| l.text.trim()).collect()
    };

    let title_span = title_from_layout(&raw.layout);
    let title = match &title_span {
        Some((start, end)) => join_lines(&lines[*start..*end]),
        None => match raw.info.title.as_deref().map(str::trim) {
            Some(t) if t.chars().count() >= MIN_TITLE_CHARS => t.to_string(),
            _ => {
                missing.insert(MetadataField::Title);
                title_from_filename(file_stem)
            }
        },
    };

    let mut authors = find_authors(&lines, title_span.map(|(_, end)| end), &title);
    if authors.is_empty() {
        if let Some(info_author) = &raw.info.author {
            authors = split_info_authors(info_author);
        }
    }
    authors.truncate(limits.max_authors);
    if authors.is_empty() {
        missing.insert(MetadataField::Authors);
    }

    let body_lines: Vec<&str> = raw.body.lines().map(str::trim).collect();

    let abstract_text = find_abstract(&body_lines, limits.max_abstract_chars);
    if abstract_text.is_empty() {
        missing.insert(MetadataField::Abstract);
    }

    let mut keywords = find_keywords(&body_lines);
    if keywords.is_empty() {
        if let Some(info_kw) = &raw.info.keywords {
            keywords = split_keywords(info_kw);
        }
    }
    keywords.truncate(limits.max_keywords);
    if keywords.is_empty() {
        missing.insert(MetadataField::Keywords);
    }

    Metadata {
        title,
        authors,
        abstract_text,
        keywords,
        page_count: raw.page_count,
        missing,
    }
}

/// Returns the `[start, end)` range of layout lines forming the title.
fn title_from_layout(layout: &[LayoutLine]) -> Option<(usize, usize)> {
    let eligible = |l: &LayoutLine| {
        l.page == 0
            && l.text.trim().chars().count() >= MIN_TITLE_CHARS
            && l.text.chars().any(|c| c.is_alphabetic())
    };

    let max_size = layout
        .iter()
        .filter(|l| eligible(l))
        .map(|l| l.font_size)
        .fold(None, |acc: Option<f64>, s| match acc {
            Some(m) if m >= s => Some(m),
            _ => Some(s),
        })?;

    let start = layout
        .iter()
        .position(|l| eligible(l) && same_size(l.font_size, max_size))?;
    let mut end = start + 1;
    while end < layout.len()
        && end - start < MAX_TITLE_LINES
        && layout[end].page == 0
        && same_size(layout[end].font_size, max_size)
        && !layout[end].text.trim().is_empty()
    {
        end += 1;
    }
    Some((start, end))
}

fn same_size(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.01
}

fn join_lines(lines: &[&str]) -> String {
    lines
        .iter()
        .flat_map(|l| l.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_authors(lines: &[&str], after_title: Option<usize>, title: &str) -> Vec<String> {
    // Explicit "Authors:" / "By ..." lines win.
    for line in lines.iter().take(40) {
        if let Some(rest) = strip_prefix_ci(line, &["authors:", "author:", "by "]) {
            let names = split_authors(rest);
            if !names.is_empty() && names.iter().all(|n| looks_like_name(n)) {
                return names;
            }
        }
    }

    let start = match after_title {
        Some(end) => end,
        None => lines
            .iter()
            .position(|l| l.eq_ignore_ascii_case(title))
            .map(|i| i + 1)
            // Without a known title the first line is assumed to be it.
            .unwrap_or(1),
    };

    for line in lines.iter().skip(start).take(BYLINE_WINDOW) {
        let names = split_authors(line);
        if !names.is_empty() && names.iter().all(|n| looks_like_name(n)) {
            return names;
        }
    }
    Vec::new()
}

/// Splits a byline on `,`, `;`, `&`, ` and `, and `、`.
pub fn split_authors(line: &str) -> Vec<String> {
    let line = strip_prefix_ci(line, &["authors:", "author:", "by "]).unwrap_or(line);
    let mut unified = line.replace(['&', ';', '、'], ",");
    for sep in [" and ", " AND ", " And "] {
        unified = unified.replace(sep, ",");
    }
    unified
        .split(',')
        .map(|part| {
            part.trim()
                .trim_matches(|c: char| c.is_ascii_digit() || "*†‡§¶^∗".contains(c))
                .trim()
                .to_string()
        })
        .filter(|p| p.chars().any(|c| c.is_alphabetic()))
        .collect()
}

/// `/Info` Author often holds `Surname, Given` pairs separated by `;`.
fn split_info_authors(value: &str) -> Vec<String> {
    if value.contains(';') {
        value
            .split(';')
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| p.chars().any(|c| c.is_alphabetic()))
            .collect()
    } else {
        split_authors(value)
    }
}

fn looks_like_name(candidate: &str) -> bool {
    let tokens: Vec<&str> = candidate.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > 5 {
        return false;
    }
    tokens.iter().all(|t| {
        let lower = t.to_lowercase();
        let lower = lower.trim_matches(|c: char| !c.is_alphanumeric());
        t.chars().next().is_some_and(|c| c.is_uppercase())
            && !AFFILIATION_WORDS.contains(&lower)
    })
}

fn strip_prefix_ci<'a>(line: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    let lower = line.to_lowercase();
    prefixes.iter().find_map(|p| {
        if lower.starts_with(p) && line.is_char_boundary(p.len()) {
            Some(line[p.len()..].trim())
        } else {
            None
        }
    })
}

fn find_abstract(lines: &[&str], max_chars: usize) -> String {
    let Some(start) = lines.iter().position(|l| is_abstract_heading(l)) else {
        return String::new();
    };

    let mut parts: Vec<&str> = Vec::new();
    let first = lines[start];
    let rest = first
        .get("abstract".len()..)
        .unwrap_or("")
        .trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, ':' | '.' | '-' | '—' | '–')
    });
    if !rest.is_empty() {
        parts.push(rest);
    }

    let mut collected = rest.chars().count();
    for line in &lines[start + 1..] {
        if is_section_heading(line) {
            break;
        }
        if line.is_empty() {
            continue;
        }
        parts.push(line);
        collected += line.chars().count();
        if collected >= max_chars {
            break;
        }
    }

    let text = join_lines(&parts);
    text.chars().take(max_chars).collect::<String>().trim().to_string()
}

fn is_abstract_heading(line: &str) -> bool {
    let lower = line.to_lowercase();
    if !lower.starts_with("abstract") {
        return false;
    }
    // "Abstract", "ABSTRACT", "Abstract—We ...", "Abstract: We ...", not "Abstraction".
    match line.get("abstract".len()..).and_then(|r| r.chars().next()) {
        None => true,
        Some(c) => !c.is_alphabetic(),
    }
}

/// Headings that end an abstract.
pub fn is_section_heading(line: &str) -> bool {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    if ["keywords", "key words", "index terms", "introduction", "references"]
        .iter()
        .any(|h| lower.starts_with(h))
    {
        return true;
    }

    // "1 Introduction", "1. Background", "II. RELATED WORK"
    let mut tokens = trimmed.split_whitespace();
    let (Some(first), Some(second)) = (tokens.next(), tokens.next()) else {
        return false;
    };
    let number = first.trim_end_matches('.');
    let numbered = !number.is_empty()
        && (number.chars().all(|c| c.is_ascii_digit())
            || (first.ends_with('.') && number.chars().all(|c| "IVX".contains(c))));
    numbered
        && trimmed.chars().count() <= 60
        && second.chars().next().is_some_and(|c| c.is_uppercase())
}

fn find_keywords(lines: &[&str]) -> Vec<String> {
    for (i, line) in lines.iter().enumerate() {
        let Some(rest) = strip_prefix_ci(line, &["keywords", "key words", "index terms"]) else {
            continue;
        };
        let rest = rest.trim_start_matches(|c: char| {
            c.is_whitespace() || matches!(c, ':' | '.' | '-' | '—' | '–')
        });
        let source = if rest.is_empty() {
            lines.get(i + 1).copied().unwrap_or("")
        } else {
            rest
        };
        let keywords = split_keywords(source);
        if !keywords.is_empty() {
            return keywords;
        }
    }
    Vec::new()
}

/// Splits a keyword list on `;`, `,`, `·` or `•`, de-duplicating
/// case-insensitively and keeping the first spelling.
pub fn split_keywords(source: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    source
        .split([';', ',', '·', '•'])
        .map(|k| k.split_whitespace().collect::<Vec<_>>().join(" "))
        .map(|k| k.trim_end_matches('.').to_string())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .collect()
}

/// Decodes a PDF text string: UTF-16BE when it carries a byte-order mark,
/// Latin-1 otherwise.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    bytes.iter().map(|b| *b as char).collect()
}

/// Share of characters that look like ordinary text. Low values mean the
/// content stream used a font encoding that did not decode.
pub fn text_quality(text: &str) -> f64 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let good = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .filter(|c| c.is_alphanumeric() || c.is_ascii_punctuation())
        .count();
    good as f64 / total as f64
}
