//! Error types raised by the pure core.

use thiserror::Error;

/// The model answer could not be turned into a usable classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed model response: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
}

impl MalformedResponse {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A graph snapshot references rows that are not part of the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("document {document} references unknown subject {subject}")]
    UnknownSubject { document: i64, subject: i64 },
    #[error("document {document} references unknown author {author}")]
    UnknownAuthor { document: i64, author: i64 },
}
