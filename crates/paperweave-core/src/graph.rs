//! Relationship-graph computation.
//!
//! Three edge kinds connect typed nodes:
//!
//! | Kind | Endpoints | Weight |
//! |------|-----------|--------|
//! | `similarity` | document–document | TF-IDF cosine, kept if ≥ threshold |
//! | `coauthor` | document–document | Jaccard index of author ids |
//! | `subject` | document–subject | 1.0 |
//! | `subject` | subject–subject | share of document pairs linked across two clusters |
//!
//! [`compute`] takes a snapshot of the live corpus plus a [`RebuildStrategy`]
//! and returns an [`EdgeDiff`] against the edges already stored. The full
//! and incremental strategies share every code path except pair selection.
//! All collections are ordered maps, so identical inputs produce identical
//! diffs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::models::{AuthorId, DocumentId, SubjectId};
use crate::tfidf::{build_vectors, cosine, round_weight, tokenize, SparseVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum NodeRef {
    Document(DocumentId),
    Subject(SubjectId),
}

impl NodeRef {
    pub fn kind_str(&self) -> &'static str {
        match self {
            NodeRef::Document(_) => "document",
            NodeRef::Subject(_) => "subject",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            NodeRef::Document(id) | NodeRef::Subject(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "document" => Some(NodeRef::Document(id)),
            "subject" => Some(NodeRef::Subject(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Similarity,
    Coauthor,
    Subject,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Similarity => "similarity",
            EdgeKind::Coauthor => "coauthor",
            EdgeKind::Subject => "subject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "similarity" => Some(EdgeKind::Similarity),
            "coauthor" => Some(EdgeKind::Coauthor),
            "subject" => Some(EdgeKind::Subject),
            _ => None,
        }
    }
}

/// Canonical edge identity: endpoints ordered so `a <= b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub a: NodeRef,
    pub b: NodeRef,
    pub kind: EdgeKind,
}

impl EdgeKey {
    pub fn new(x: NodeRef, y: NodeRef, kind: EdgeKind) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self { a, b, kind }
    }

    pub fn touches(&self, node: NodeRef) -> bool {
        self.a == node || self.b == node
    }

    fn is_document_pair(&self) -> bool {
        matches!(
            (self.a, self.b),
            (NodeRef::Document(_), NodeRef::Document(_))
        )
    }
}

pub type EdgeSet = BTreeMap<EdgeKey, f64>;

/// A live document as seen by the graph builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDocument {
    pub title: String,
    pub abstract_text: String,
    pub keywords: Vec<String>,
    pub authors: BTreeSet<AuthorId>,
    pub subject_id: Option<SubjectId>,
}

impl GraphDocument {
    fn terms(&self) -> Vec<String> {
        let mut text = String::with_capacity(
            self.title.len() + self.abstract_text.len() + 16 * self.keywords.len(),
        );
        text.push_str(&self.title);
        text.push(' ');
        text.push_str(&self.abstract_text);
        for kw in &self.keywords {
            text.push(' ');
            text.push_str(kw);
        }
        tokenize(&text)
    }
}

/// Consistent view of the catalog taken inside one read transaction.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub generation: i64,
    /// Live (non-tombstoned) documents.
    pub documents: BTreeMap<DocumentId, GraphDocument>,
    pub subjects: BTreeSet<SubjectId>,
    pub authors: BTreeSet<AuthorId>,
    /// Edges currently stored.
    pub edges: EdgeSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphParams {
    pub similarity_threshold: f64,
    /// Minimum members for a subject to get cluster meta-edges. 0 disables them.
    pub cluster_min_size: usize,
    /// Corpora smaller than this are always rebuilt in full.
    pub full_rebuild_cutoff: usize,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.2,
            cluster_min_size: 3,
            full_rebuild_cutoff: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildStrategy {
    Full,
    /// Rescore only pairs that involve one of these documents.
    Incremental(BTreeSet<DocumentId>),
}

impl RebuildStrategy {
    /// Small corpora, or an explicit request, get a full recompute.
    pub fn plan(
        corpus_size: usize,
        changed: BTreeSet<DocumentId>,
        force_full: bool,
        params: &GraphParams,
    ) -> Self {
        if force_full || corpus_size < params.full_rebuild_cutoff {
            RebuildStrategy::Full
        } else {
            RebuildStrategy::Incremental(changed)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RebuildStrategy::Full => "full",
            RebuildStrategy::Incremental(_) => "incremental",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeDiff {
    pub added: EdgeSet,
    pub updated: EdgeSet,
    pub removed: BTreeSet<EdgeKey>,
}

impl EdgeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Applies the diff to an edge set in memory.
    pub fn apply_to(&self, edges: &mut EdgeSet) {
        for key in &self.removed {
            edges.remove(key);
        }
        for (key, weight) in self.added.iter().chain(self.updated.iter()) {
            edges.insert(*key, *weight);
        }
    }
}

/// Computes the edge diff for a snapshot.
pub fn compute(
    snapshot: &GraphSnapshot,
    strategy: &RebuildStrategy,
    params: &GraphParams,
) -> Result<EdgeDiff, SnapshotError> {
    validate(snapshot)?;

    let docs: BTreeMap<DocumentId, Vec<String>> = snapshot
        .documents
        .iter()
        .map(|(id, d)| (*id, d.terms()))
        .collect();
    // IDF always spans the whole live corpus.
    let vectors = build_vectors(&docs);

    let mut target = EdgeSet::new();
    match strategy {
        RebuildStrategy::Full => {
            let ids: Vec<DocumentId> = snapshot.documents.keys().copied().collect();
            for (i, x) in ids.iter().enumerate() {
                for y in &ids[i + 1..] {
                    pair_edges(snapshot, &vectors, *x, *y, params, &mut target);
                }
            }
        }
        RebuildStrategy::Incremental(changed) => {
            // Keep stored pair edges between untouched live documents.
            for (key, weight) in &snapshot.edges {
                if key.kind == EdgeKind::Subject || !key.is_document_pair() {
                    continue;
                }
                let (a, b) = (key.a.id(), key.b.id());
                let live = snapshot.documents.contains_key(&a)
                    && snapshot.documents.contains_key(&b);
                if live && !changed.contains(&a) && !changed.contains(&b) {
                    target.insert(*key, *weight);
                }
            }
            for x in changed.iter().filter(|id| snapshot.documents.contains_key(*id)) {
                for y in snapshot.documents.keys() {
                    if x == y || (changed.contains(y) && y < x) {
                        continue;
                    }
                    pair_edges(snapshot, &vectors, *x, *y, params, &mut target);
                }
            }
        }
    }

    subject_links(snapshot, &mut target);
    let clusters = cluster_edges(snapshot, &target, params);
    target.extend(clusters);

    Ok(diff(&snapshot.edges, &target))
}

fn validate(snapshot: &GraphSnapshot) -> Result<(), SnapshotError> {
    for (id, doc) in &snapshot.documents {
        if let Some(subject) = doc.subject_id {
            if !snapshot.subjects.contains(&subject) {
                return Err(SnapshotError::UnknownSubject {
                    document: *id,
                    subject,
                });
            }
        }
        if let Some(author) = doc.authors.iter().find(|a| !snapshot.authors.contains(a)) {
            return Err(SnapshotError::UnknownAuthor {
                document: *id,
                author: *author,
            });
        }
    }
    Ok(())
}

fn pair_edges(
    snapshot: &GraphSnapshot,
    vectors: &BTreeMap<DocumentId, SparseVector>,
    x: DocumentId,
    y: DocumentId,
    params: &GraphParams,
    out: &mut EdgeSet,
) {
    let (nx, ny) = (NodeRef::Document(x), NodeRef::Document(y));

    if let (Some(vx), Some(vy)) = (vectors.get(&x), vectors.get(&y)) {
        let weight = round_weight(cosine(vx, vy));
        if weight > 0.0 && weight >= params.similarity_threshold {
            out.insert(EdgeKey::new(nx, ny, EdgeKind::Similarity), weight);
        }
    }

    if let (Some(dx), Some(dy)) = (snapshot.documents.get(&x), snapshot.documents.get(&y)) {
        let shared = dx.authors.intersection(&dy.authors).count();
        if shared > 0 {
            let union = dx.authors.union(&dy.authors).count();
            let weight = round_weight(shared as f64 / union as f64);
            out.insert(EdgeKey::new(nx, ny, EdgeKind::Coauthor), weight);
        }
    }
}

fn subject_links(snapshot: &GraphSnapshot, out: &mut EdgeSet) {
    for (id, doc) in &snapshot.documents {
        if let Some(subject) = doc.subject_id {
            out.insert(
                EdgeKey::new(
                    NodeRef::Document(*id),
                    NodeRef::Subject(subject),
                    EdgeKind::Subject,
                ),
                1.0,
            );
        }
    }
}

/// Subject–subject meta-edges between clusters of at least `cluster_min_size`
/// documents that share at least one similarity or co-authorship edge.
fn cluster_edges(snapshot: &GraphSnapshot, pairs: &EdgeSet, params: &GraphParams) -> EdgeSet {
    let mut out = EdgeSet::new();
    if params.cluster_min_size == 0 {
        return out;
    }

    let mut members: BTreeMap<SubjectId, usize> = BTreeMap::new();
    for doc in snapshot.documents.values() {
        if let Some(subject) = doc.subject_id {
            *members.entry(subject).or_default() += 1;
        }
    }

    let mut crossing: BTreeMap<(SubjectId, SubjectId), BTreeSet<(DocumentId, DocumentId)>> =
        BTreeMap::new();
    for key in pairs.keys() {
        if key.kind == EdgeKind::Subject || !key.is_document_pair() {
            continue;
        }
        let (a, b) = (key.a.id(), key.b.id());
        let sa = snapshot.documents.get(&a).and_then(|d| d.subject_id);
        let sb = snapshot.documents.get(&b).and_then(|d| d.subject_id);
        if let (Some(sa), Some(sb)) = (sa, sb) {
            if sa == sb {
                continue;
            }
            let big_enough =
                |s: SubjectId| members.get(&s).copied().unwrap_or(0) >= params.cluster_min_size;
            if big_enough(sa) && big_enough(sb) {
                let subjects = (sa.min(sb), sa.max(sb));
                crossing.entry(subjects).or_default().insert((a, b));
            }
        }
    }

    for ((sa, sb), doc_pairs) in crossing {
        let size_a = members.get(&sa).copied().unwrap_or(0);
        let size_b = members.get(&sb).copied().unwrap_or(0);
        let weight = round_weight(doc_pairs.len() as f64 / (size_a * size_b) as f64);
        out.insert(
            EdgeKey::new(NodeRef::Subject(sa), NodeRef::Subject(sb), EdgeKind::Subject),
            weight,
        );
    }
    out
}

fn diff(existing: &EdgeSet, target: &EdgeSet) -> EdgeDiff {
    let mut result = EdgeDiff::default();
    for (key, weight) in target {
        match existing.get(key) {
            None => {
                result.added.insert(*key, *weight);
            }
            Some(old) if old != weight => {
                result.updated.insert(*key, *weight);
            }
            Some(_) => {}
        }
    }
    for key in existing.keys() {
        if !target.contains_key(key) {
            result.removed.insert(*key);
        }
    }
    result
}
