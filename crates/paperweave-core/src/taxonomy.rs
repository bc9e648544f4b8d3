//! Subject taxonomy and fuzzy resolution of model answers.
//!
//! The model answers in free text. [`Taxonomy::resolve`] turns that text
//! into a [`SubjectMatch`] so nothing downstream compares raw strings.

use sha2::{Digest, Sha256};

use crate::models::SubjectId;

/// Root that collects unclassified documents and pending subject proposals.
pub const UNCLASSIFIED_ROOT: &str = "Unclassified";

/// Answers that mean "no subject".
const NO_SUBJECT_ANSWERS: &[&str] = &["n a", "none", "other", "unclassified", "unknown"];

/// Constrained classification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectMatch {
    /// The answer matched an existing taxonomy subject.
    MatchedSubject(SubjectId),
    /// Nothing matched well enough; the cleaned answer becomes a pending leaf.
    NewSubjectProposal(String),
    /// The model declined to pick a subject.
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyEntry {
    pub id: SubjectId,
    pub path: String,
}

impl TaxonomyEntry {
    pub fn leaf(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// The configured subject tree, as candidates for classification.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
    version: String,
}

impl Taxonomy {
    pub fn new(mut entries: Vec<TaxonomyEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);
        let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
        let version = taxonomy_version(&paths);
        Self { entries, version }
    }

    /// Content fingerprint of the configured paths. Classification results
    /// are cached per version.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    pub fn candidate_paths(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maps a free-text answer onto the taxonomy.
    ///
    /// Each entry is scored against both its full path and its leaf name
    /// with the Sørensen–Dice coefficient over character bigrams. The best
    /// score wins; ties go to the lexicographically smallest path.
    pub fn resolve(&self, answer: &str, min_similarity: f64) -> SubjectMatch {
        let needle = normalize_label(answer);
        if needle.is_empty() || NO_SUBJECT_ANSWERS.contains(&needle.as_str()) {
            return SubjectMatch::Unclassified;
        }

        let mut best: Option<(f64, SubjectId)> = None;
        for entry in &self.entries {
            let score = dice(&needle, &normalize_label(&entry.path))
                .max(dice(&needle, &normalize_label(entry.leaf())));
            // Entries are sorted by path, so strict > keeps the smallest path on ties.
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, entry.id));
            }
        }

        match best {
            Some((score, id)) if score >= min_similarity => SubjectMatch::MatchedSubject(id),
            _ => {
                let leaf = answer.rsplit('/').next().unwrap_or(answer);
                let proposal = leaf.split_whitespace().collect::<Vec<_>>().join(" ");
                if normalize_label(&proposal).is_empty() {
                    SubjectMatch::Unclassified
                } else {
                    SubjectMatch::NewSubjectProposal(proposal)
                }
            }
        }
    }
}

/// Normalizes a configured path: trims segments and drops empty ones.
pub fn normalize_path(raw: &str) -> Option<String> {
    let segments: Vec<String> = raw
        .split('/')
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Expands configured paths so every ancestor is present.
/// `["CS/ML"]` becomes `["CS", "CS/ML"]`. Output is sorted and unique.
pub fn expand_paths(configured: &[String]) -> Vec<String> {
    let mut out = std::collections::BTreeSet::new();
    for raw in configured {
        if let Some(path) = normalize_path(raw) {
            let segments: Vec<&str> = path.split('/').collect();
            for i in 1..=segments.len() {
                out.insert(segments[..i].join("/"));
            }
        }
    }
    out.into_iter().collect()
}

/// SHA-256 over the sorted, de-duplicated paths.
pub fn taxonomy_version(paths: &[String]) -> String {
    let mut sorted: Vec<&String> = paths.iter().collect();
    sorted.sort();
    sorted.dedup();
    let mut hasher = Sha256::new();
    for path in sorted {
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Lowercase, alphanumerics only, single spaces.
fn normalize_label(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    let mut grams: Vec<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
    grams.sort_unstable();
    grams
}

/// Sørensen–Dice coefficient over character bigram multisets.
pub fn dice(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (ga, gb) = (bigrams(a), bigrams(b));
    if ga.is_empty() || gb.is_empty() {
        return 0.0;
    }
    let (mut i, mut j, mut common) = (0, 0, 0usize);
    while i < ga.len() && j < gb.len() {
        match ga[i].cmp(&gb[j]) {
            std::cmp::Ordering::Equal => {
                common += 1;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    2.0 * common as f64 / (ga.len() + gb.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(vec![
            TaxonomyEntry {
                id: 3,
                path: "Computer Science/Machine Learning".into(),
            },
            TaxonomyEntry {
                id: 1,
                path: "Computer Science".into(),
            },
            TaxonomyEntry {
                id: 2,
                path: "Biology".into(),
            },
            TaxonomyEntry {
                id: 4,
                path: "Computer Science/Databases".into(),
            },
        ])
    }

    #[test]
    fn exact_leaf_matches() {
        let t = taxonomy();
        assert_eq!(
            t.resolve("Machine Learning", 0.75),
            SubjectMatch::MatchedSubject(3)
        );
        assert_eq!(
            t.resolve("machine-learning", 0.75),
            SubjectMatch::MatchedSubject(3)
        );
    }

    #[test]
    fn full_path_and_near_spelling_match() {
        let t = taxonomy();
        assert_eq!(
            t.resolve("Computer Science / Databases", 0.75),
            SubjectMatch::MatchedSubject(4)
        );
        assert_eq!(t.resolve("Database", 0.75), SubjectMatch::MatchedSubject(4));
    }

    #[test]
    fn weak_match_becomes_proposal() {
        let t = taxonomy();
        assert_eq!(
            t.resolve("Quantum Biology", 0.75),
            SubjectMatch::NewSubjectProposal("Quantum Biology".into())
        );
    }

    #[test]
    fn refusals_are_unclassified() {
        let t = taxonomy();
        assert_eq!(t.resolve("Unknown", 0.75), SubjectMatch::Unclassified);
        assert_eq!(t.resolve("  ", 0.75), SubjectMatch::Unclassified);
        assert_eq!(t.resolve("N/A", 0.75), SubjectMatch::Unclassified);
    }

    #[test]
    fn empty_taxonomy_always_proposes() {
        let t = Taxonomy::new(Vec::new());
        assert_eq!(
            t.resolve("Robotics", 0.75),
            SubjectMatch::NewSubjectProposal("Robotics".into())
        );
    }

    #[test]
    fn version_ignores_order_and_duplicates() {
        let a = taxonomy_version(&["B".into(), "A".into()]);
        let b = taxonomy_version(&["A".into(), "B".into(), "A".into()]);
        assert_eq!(a, b);
        assert_ne!(a, taxonomy_version(&["A".into()]));
    }

    #[test]
    fn expand_adds_ancestors() {
        let paths = expand_paths(&[" Computer Science / ML ".into(), "Biology".into()]);
        assert_eq!(paths, vec!["Biology", "Computer Science", "Computer Science/ML"]);
        assert_eq!(normalize_path(" / "), None);
    }

    #[test]
    fn dice_bounds() {
        assert_eq!(dice("night", "night"), 1.0);
        assert_eq!(dice("ab", "cd"), 0.0);
        let d = dice("night", "nacht");
        assert!((d - 0.25).abs() < 1e-9);
    }
}
