//! Core data models shared across the pipeline.
//!
//! These types are storage-agnostic. The SQLite catalog maps rows onto
//! them and the CLI serializes them for output.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type DocumentId = i64;
pub type SubjectId = i64;
pub type AuthorId = i64;

/// Classification state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationStatus {
    /// Discovered but not yet classified.
    Pending,
    /// Assigned to a configured taxonomy subject.
    Classified,
    /// No configured subject fit; parked under the `Unclassified` root.
    Unclassified,
    /// Classification failed after retries; the previous subject is kept.
    Stale,
}

impl ClassificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationStatus::Pending => "pending",
            ClassificationStatus::Classified => "classified",
            ClassificationStatus::Unclassified => "unclassified",
            ClassificationStatus::Stale => "stale",
        }
    }
}

impl fmt::Display for ClassificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClassificationStatus::Pending),
            "classified" => Ok(ClassificationStatus::Classified),
            "unclassified" => Ok(ClassificationStatus::Unclassified),
            "stale" => Ok(ClassificationStatus::Stale),
            other => Err(format!("unknown classification status '{}'", other)),
        }
    }
}

/// Bibliographic fields that extraction may fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataField {
    Title,
    Authors,
    Abstract,
    Keywords,
}

/// Structured metadata pulled out of a PDF.
///
/// Fields the heuristics could not find are left empty and listed in
/// `missing`. A title taken from the filename counts as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub keywords: Vec<String>,
    pub page_count: u32,
    pub missing: BTreeSet<MetadataField>,
}

impl Metadata {
    /// Metadata for a file whose content could not be read at all.
    pub fn from_filename(file_stem: &str) -> Self {
        Self {
            title: title_from_filename(file_stem),
            missing: [
                MetadataField::Title,
                MetadataField::Authors,
                MetadataField::Abstract,
                MetadataField::Keywords,
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        }
    }

    pub fn is_missing(&self, field: MetadataField) -> bool {
        self.missing.contains(&field)
    }
}

/// Turns `graph_neural-nets` into `graph neural nets`.
pub fn title_from_filename(file_stem: &str) -> String {
    let spaced: String = file_stem
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    let title = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        "untitled".to_string()
    } else {
        title
    }
}

/// Where a subject row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectOrigin {
    /// Listed in the configured taxonomy.
    Taxonomy,
    /// Proposed by the model, parked under `Unclassified`.
    Pending,
    /// The `Unclassified` root.
    System,
    /// Was configured once, no longer is.
    Retired,
}

impl SubjectOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectOrigin::Taxonomy => "taxonomy",
            SubjectOrigin::Pending => "pending",
            SubjectOrigin::System => "system",
            SubjectOrigin::Retired => "retired",
        }
    }
}

impl FromStr for SubjectOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "taxonomy" => Ok(SubjectOrigin::Taxonomy),
            "pending" => Ok(SubjectOrigin::Pending),
            "system" => Ok(SubjectOrigin::System),
            "retired" => Ok(SubjectOrigin::Retired),
            other => Err(format!("unknown subject origin '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub path: String,
    pub parent_id: Option<SubjectId>,
    pub origin: SubjectOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub id: AuthorId,
    pub display_name: String,
    pub normalized_key: String,
}

/// Full document record as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub content_hash: String,
    /// Canonical current location: the archive path once organized.
    pub file_path: String,
    pub source_path: String,
    pub archive_path: Option<String>,
    pub file_size: i64,
    pub title: String,
    pub authors: Vec<AuthorRef>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub keywords: Vec<String>,
    pub missing_fields: BTreeSet<MetadataField>,
    pub page_count: u32,
    pub subject_id: Option<SubjectId>,
    pub subject_path: Option<String>,
    pub status: ClassificationStatus,
    pub confidence: Option<f64>,
    pub sub_field: Option<String>,
    pub paper_type: Option<String>,
    pub summary: Option<String>,
    pub taxonomy_version: Option<String>,
    pub missing: bool,
    pub ingested_at: i64,
    pub updated_at: i64,
}

/// Opaque per-page annotation written by the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub document_id: DocumentId,
    pub page: u32,
    pub payload: Vec<u8>,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ClassificationStatus::Pending,
            ClassificationStatus::Classified,
            ClassificationStatus::Unclassified,
            ClassificationStatus::Stale,
        ] {
            assert_eq!(status.as_str().parse::<ClassificationStatus>(), Ok(status));
        }
        assert!("bogus".parse::<ClassificationStatus>().is_err());
    }

    #[test]
    fn filename_fallback_flags_every_field() {
        let meta = Metadata::from_filename("graph_neural-nets");
        assert_eq!(meta.title, "graph neural nets");
        assert_eq!(meta.missing.len(), 4);
        assert!(meta.is_missing(MetadataField::Title));
    }

    #[test]
    fn empty_stem_becomes_untitled() {
        assert_eq!(title_from_filename("__"), "untitled");
    }
}
