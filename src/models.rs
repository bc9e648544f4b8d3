//! Data models used throughout paperweave.
//!
//! Catalog records come from [`paperweave_core::models`]; the types here
//! are the read-side shapes returned by catalog queries and printed by the
//! CLI.

use std::collections::BTreeMap;

use paperweave_core::graph::{EdgeKey, EdgeKind, NodeRef};
pub use paperweave_core::models::{
    Annotation, AuthorRef, ClassificationStatus, Document, DocumentId, Metadata, MetadataField,
    Subject, SubjectId, SubjectOrigin,
};
use serde::Serialize;

/// One row of a document listing or search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub title: String,
    pub authors: Vec<String>,
    pub subject_path: Option<String>,
    pub status: ClassificationStatus,
    pub file_path: String,
}

/// A stored edge, flattened for output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub a: NodeRef,
    pub b: NodeRef,
    pub kind: EdgeKind,
    pub weight: f64,
}

impl EdgeRecord {
    pub fn new(key: &EdgeKey, weight: f64) -> Self {
        Self {
            a: key.a,
            b: key.b,
            kind: key.kind,
            weight,
        }
    }
}

/// The documents filed under one subject, the edges among them and their
/// subject links.
#[derive(Debug, Clone, Serialize)]
pub struct Subgraph {
    pub subject: Subject,
    pub documents: Vec<DocumentSummary>,
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    #[serde(flatten)]
    pub node: NodeRef,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_path: Option<String>,
}

/// Whole-graph export: every live document and subject node plus all
/// stored edges.
#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub generation: i64,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogStats {
    pub documents: i64,
    pub missing: i64,
    pub archived: i64,
    pub by_status: BTreeMap<String, i64>,
    /// `(subject path, live documents)`, largest first.
    pub by_subject: Vec<(String, i64)>,
    pub authors: i64,
    pub subjects: i64,
    pub edges_by_kind: BTreeMap<String, i64>,
    pub pending_placements: i64,
    pub cached_classifications: i64,
}
