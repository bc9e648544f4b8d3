//! TF-IDF term vectors and cosine similarity.
//!
//! Vectors are sparse, sorted by term id, and L2-normalized, so cosine
//! similarity is a plain dot product. Term ids come from the sorted
//! vocabulary and every sum runs in term order, which keeps results
//! bit-identical across runs.
//!
//! Weighting:
//! - tf: raw count of the term in the document
//! - idf: `ln((1 + N) / (1 + df)) + 1`

use std::collections::{BTreeMap, BTreeSet};

use crate::models::DocumentId;

/// English function words ignored by the tokenizer. Kept sorted for binary search.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
    "his", "how", "however", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "may",
    "me", "more", "most", "my", "no", "nor", "not", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "out", "over", "own", "same", "she", "should", "so", "some", "such",
    "than", "that", "the", "their", "theirs", "them", "then", "there", "these", "they", "this",
    "those", "through", "thus", "to", "too", "under", "until", "up", "us", "using", "very", "via",
    "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "within", "would", "you", "your", "yours",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Light plural stemmer: `networks` -> `network`, `studies` -> `study`,
/// `boxes` -> `box`. Leaves `analysis`, `class`, `corpus` alone.
pub fn stem(token: &str) -> String {
    let n = token.len();
    if n > 4 && token.ends_with("ies") {
        return format!("{}y", &token[..n - 3]);
    }
    if n > 4 && token.ends_with("es") {
        let base = &token[..n - 2];
        if base.ends_with('s')
            || base.ends_with('x')
            || base.ends_with("ch")
            || base.ends_with("sh")
        {
            return base.to_string();
        }
    }
    if n > 3
        && token.ends_with('s')
        && !token.ends_with("ss")
        && !token.ends_with("us")
        && !token.ends_with("is")
    {
        return token[..n - 1].to_string();
    }
    token.to_string()
}

/// Lowercases, splits on non-alphanumerics, drops stopwords, numbers and
/// single characters, then stems.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .filter(|t| !t.chars().all(|c| c.is_numeric()))
        .filter(|t| !is_stopword(t))
        .map(stem)
        .collect()
}

/// Sparse L2-normalized vector, entries sorted by term id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    entries: Vec<(u32, f64)>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    /// Merge-join dot product in term order.
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (a, b) = (&self.entries, &other.entries);
        let (mut i, mut j, mut sum) = (0, 0, 0.0);
        while i < a.len() && j < b.len() {
            match a[i].0.cmp(&b[j].0) {
                std::cmp::Ordering::Equal => {
                    sum += a[i].1 * b[j].1;
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        sum
    }
}

/// Builds one vector per document from pre-tokenized text.
pub fn build_vectors(
    docs: &BTreeMap<DocumentId, Vec<String>>,
) -> BTreeMap<DocumentId, SparseVector> {
    let vocabulary: BTreeSet<&str> = docs
        .values()
        .flat_map(|terms| terms.iter().map(String::as_str))
        .collect();
    let term_ids: BTreeMap<&str, u32> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (*t, i as u32))
        .collect();

    let mut df: BTreeMap<u32, usize> = BTreeMap::new();
    let mut counts: BTreeMap<DocumentId, BTreeMap<u32, usize>> = BTreeMap::new();
    for (id, terms) in docs {
        let tf = counts.entry(*id).or_default();
        for term in terms {
            if let Some(tid) = term_ids.get(term.as_str()) {
                *tf.entry(*tid).or_default() += 1;
            }
        }
        for tid in tf.keys() {
            *df.entry(*tid).or_default() += 1;
        }
    }

    let n = docs.len() as f64;
    counts
        .into_iter()
        .map(|(id, tf)| {
            let mut entries: Vec<(u32, f64)> = tf
                .into_iter()
                .map(|(tid, count)| {
                    let d = df.get(&tid).copied().unwrap_or(0) as f64;
                    let idf = ((1.0 + n) / (1.0 + d)).ln() + 1.0;
                    (tid, count as f64 * idf)
                })
                .collect();
            let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            if norm > 0.0 {
                for (_, w) in entries.iter_mut() {
                    *w /= norm;
                }
            }
            (id, SparseVector { entries })
        })
        .collect()
}

/// Cosine similarity of two normalized vectors, clamped to [0, 1].
pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    a.dot(b).clamp(0.0, 1.0)
}

/// Rounds a weight to six decimals so stored edges compare exactly.
pub fn round_weight(w: f64) -> f64 {
    (w * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(texts: &[(DocumentId, &str)]) -> BTreeMap<DocumentId, Vec<String>> {
        texts.iter().map(|(id, t)| (*id, tokenize(t))).collect()
    }

    #[test]
    fn stopword_list_is_sorted() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn tokenizer_drops_noise_and_stems() {
        assert_eq!(
            tokenize("The Studies of 2024 Graph-Networks, a survey!"),
            vec!["study", "graph", "network", "survey"]
        );
        assert_eq!(tokenize("analysis class boxes"), vec!["analysis", "class", "box"]);
    }

    #[test]
    fn graph_neural_titles_have_stable_similarity() {
        let docs = corpus(&[
            (1, "Graph Neural Networks"),
            (2, "Graph Neural Network Survey"),
        ]);
        let first = build_vectors(&docs);
        let second = build_vectors(&docs);
        let s1 = cosine(&first[&1], &first[&2]);
        let s2 = cosine(&second[&1], &second[&2]);
        assert_eq!(s1.to_bits(), s2.to_bits());
        // 3 / (sqrt(3) * sqrt(3 + (ln(1.5) + 1)^2))
        assert!((s1 - 0.776517).abs() < 1e-4, "got {}", s1);
    }

    #[test]
    fn disjoint_documents_score_zero() {
        let docs = corpus(&[(1, "protein folding"), (2, "query optimizer")]);
        let v = build_vectors(&docs);
        assert_eq!(cosine(&v[&1], &v[&2]), 0.0);
    }

    #[test]
    fn vectors_are_unit_length() {
        let docs = corpus(&[(1, "graph graph neural"), (2, "neural survey")]);
        for v in build_vectors(&docs).values() {
            let norm: f64 = v.entries().iter().map(|(_, w)| w * w).sum();
            assert!((norm - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_document_has_empty_vector() {
        let docs = corpus(&[(1, "the of and"), (2, "graph")]);
        let v = build_vectors(&docs);
        assert!(v[&1].is_empty());
        assert_eq!(cosine(&v[&1], &v[&2]), 0.0);
    }

    #[test]
    fn rounding_is_six_decimals() {
        assert_eq!(round_weight(0.1234564), 0.123456);
        assert_eq!(round_weight(0.1234566), 0.123457);
    }
}
