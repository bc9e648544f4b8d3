//! Typed errors for each pipeline stage.
//!
//! | Error | Scope | Handling |
//! |-------|-------|----------|
//! | [`ExtractionError`] | one document | filename fallback metadata, batch warning |
//! | [`ClassificationError`] | one model call | retried; on exhaustion the document goes stale |
//! | [`OrganizeError`] | one document | left unorganized, classification still committed |
//! | [`GraphBuildError`] | one rebuild | retried wholesale on the next trigger |
//! | [`StoreError::Corruption`] | process | halts the pipeline |

use std::path::{Path, PathBuf};

use paperweave_core::error::{MalformedResponse, SnapshotError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Schema mismatch or an unreadable database file.
    #[error("catalog store is corrupt: {0}")]
    Corruption(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored value: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no text layer")]
    NoTextLayer,
    #[error("corrupt or unreadable PDF: {0}")]
    CorruptFile(String),
    #[error("extraction timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by the model API")]
    RateLimited,
    #[error("model API server error (HTTP {0})")]
    Server(u16),
    #[error(transparent)]
    MalformedResponse(#[from] MalformedResponse),
    #[error("model call timed out")]
    Timeout,
    #[error("model API rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("classifier is disabled")]
    Disabled,
}

impl ClassificationError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClassificationError::Network(_)
                | ClassificationError::RateLimited
                | ClassificationError::Server(_)
                | ClassificationError::MalformedResponse(_)
                | ClassificationError::Timeout
        )
    }
}

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("disk full while writing {}", .0.display())]
    DiskFull(PathBuf),
    #[error("no free archive name near {}", .0.display())]
    UnresolvedCollision(PathBuf),
    #[error("source file is gone: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrganizeError {
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => OrganizeError::PermissionDenied(path.into()),
            std::io::ErrorKind::StorageFull => OrganizeError::DiskFull(path.into()),
            std::io::ErrorKind::NotFound => OrganizeError::SourceMissing(path.into()),
            _ => OrganizeError::Io {
                path: path.into(),
                source: err,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphBuildError {
    #[error("inconsistent graph snapshot: {0}")]
    InconsistentSnapshot(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("graph worker failed: {0}")]
    Join(String),
}

impl From<SnapshotError> for GraphBuildError {
    fn from(e: SnapshotError) -> Self {
        GraphBuildError::InconsistentSnapshot(e.to_string())
    }
}

/// Pipeline stage a per-document issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scan,
    Extract,
    Classify,
    Organize,
    Store,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scan => "scan",
            Stage::Extract => "extract",
            Stage::Classify => "classify",
            Stage::Organize => "organize",
            Stage::Store => "store",
        }
    }
}

/// A per-document problem, carrying document identity for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentIssue {
    pub document_id: Option<i64>,
    pub path: String,
    pub stage: Stage,
    pub message: String,
}

impl DocumentIssue {
    pub fn new(
        document_id: Option<i64>,
        path: impl Into<String>,
        stage: Stage,
        message: impl ToString,
    ) -> Self {
        Self {
            document_id,
            path: path.into(),
            stage,
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for DocumentIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.document_id {
            Some(id) => write!(
                f,
                "[{}] #{} {}: {}",
                self.stage.as_str(),
                id,
                self.path,
                self.message
            ),
            None => write!(f, "[{}] {}: {}", self.stage.as_str(), self.path, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_errors() {
        assert!(ClassificationError::RateLimited.is_transient());
        assert!(ClassificationError::Timeout.is_transient());
        assert!(ClassificationError::Server(503).is_transient());
        assert!(ClassificationError::MalformedResponse(MalformedResponse::new("x")).is_transient());
        assert!(!ClassificationError::Disabled.is_transient());
        assert!(!ClassificationError::Rejected {
            status: 401,
            body: String::new()
        }
        .is_transient());
    }

    #[test]
    fn io_errors_map_to_organize_kinds() {
        let p = Path::new("/x/y.pdf");
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            OrganizeError::from_io(p, denied),
            OrganizeError::PermissionDenied(_)
        ));
        let gone = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            OrganizeError::from_io(p, gone),
            OrganizeError::SourceMissing(_)
        ));
    }

    #[test]
    fn issue_display_includes_identity() {
        let issue = DocumentIssue::new(Some(7), "/in/a.pdf", Stage::Organize, "disk full");
        assert_eq!(issue.to_string(), "[organize] #7 /in/a.pdf: disk full");
    }
}
