//! Document lifecycle: ingestion, tombstones, work selection, atomic
//! commits and archive-name reservations.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use paperweave_core::authors::{display_form, normalize_author, prefer_display, AuthorRules};
use paperweave_core::models::{
    title_from_filename, ClassificationStatus, DocumentId, Metadata, MetadataField, SubjectId,
};
use paperweave_core::taxonomy::UNCLASSIFIED_ROOT;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{bump_generation, now, Catalog};
use crate::error::StoreError;

/// Result of registering a scanned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First time these bytes were seen.
    Created(DocumentId),
    /// Already tracked at this path.
    Existing(DocumentId),
    /// Same bytes as a live document stored elsewhere.
    Duplicate { id: DocumentId, existing: String },
    /// A tombstoned document whose bytes reappeared.
    Revived(DocumentId),
}

impl IngestOutcome {
    pub fn id(&self) -> DocumentId {
        match self {
            IngestOutcome::Created(id)
            | IngestOutcome::Existing(id)
            | IngestOutcome::Revived(id)
            | IngestOutcome::Duplicate { id, .. } => *id,
        }
    }
}

/// File locations of one document, for missing-file detection.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub id: DocumentId,
    pub content_hash: String,
    pub file_path: PathBuf,
    pub source_path: PathBuf,
    pub archive_path: Option<PathBuf>,
    pub missing: bool,
}

/// A live document that still needs extraction, classification or
/// placement.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: DocumentId,
    pub content_hash: String,
    pub file_path: PathBuf,
    pub source_path: PathBuf,
    pub archive_path: Option<PathBuf>,
    pub status: ClassificationStatus,
    pub subject_id: Option<SubjectId>,
    pub taxonomy_version: Option<String>,
    /// Stored metadata when extraction already ran.
    pub metadata: Option<Metadata>,
}

impl WorkItem {
    /// Whether a previous classification is still valid under `version`.
    pub fn classification_current(&self, version: &str) -> bool {
        matches!(
            self.status,
            ClassificationStatus::Classified | ClassificationStatus::Unclassified
        ) && self.taxonomy_version.as_deref() == Some(version)
            && self.subject_id.is_some()
    }
}

/// One author reference of a document, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorLink {
    pub key: String,
    pub display: String,
    pub raw: String,
}

impl AuthorLink {
    /// Normalizes raw names, dropping unusable ones and repeats of the same
    /// author within one document.
    pub fn from_names(names: &[String], rules: &AuthorRules) -> Vec<AuthorLink> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for raw in names {
            let Some(key) = normalize_author(raw, rules) else {
                continue;
            };
            if seen.insert(key.clone()) {
                links.push(AuthorLink {
                    key,
                    display: display_form(raw),
                    raw: raw.clone(),
                });
            }
        }
        links
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationUpdate {
    /// `None` keeps the current subject, or parks the document under the
    /// `Unclassified` root when it has none.
    pub subject_id: Option<SubjectId>,
    pub status: ClassificationStatus,
    pub confidence: Option<f64>,
    pub sub_field: Option<String>,
    pub paper_type: Option<String>,
    pub summary: Option<String>,
    pub taxonomy_version: Option<String>,
}

impl ClassificationUpdate {
    /// Classification failed: keep the previous subject, flag as stale.
    pub fn stale() -> Self {
        Self {
            subject_id: None,
            status: ClassificationStatus::Stale,
            confidence: None,
            sub_field: None,
            paper_type: None,
            summary: None,
            taxonomy_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementCommit {
    Unchanged,
    /// A new archive file was published at this path.
    Archived(PathBuf),
    /// An identical file already sat at this path.
    Linked(PathBuf),
}

/// Everything one pipeline pass learned about a document, committed in a
/// single transaction.
#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub id: DocumentId,
    /// `None` keeps stored metadata and author links.
    pub metadata: Option<(Metadata, Vec<AuthorLink>)>,
    pub classification: Option<ClassificationUpdate>,
    pub placement: PlacementCommit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRow {
    pub document_id: DocumentId,
    pub target_path: PathBuf,
    pub content_hash: String,
}

impl Catalog {
    /// Registers a scanned file by content hash.
    pub async fn ingest_file(
        &self,
        path: &Path,
        content_hash: &str,
        size: u64,
    ) -> Result<IngestOutcome, StoreError> {
        let path_str = path.to_string_lossy().to_string();
        let mut tx = self.writer().begin().await?;

        let existing = sqlx::query(
            "SELECT id, file_path, source_path, archive_path, missing FROM documents WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                let ts = now();
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO documents
                        (content_hash, file_path, source_path, file_size, title,
                         status, ingested_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(content_hash)
                .bind(&path_str)
                .bind(&path_str)
                .bind(size as i64)
                .bind(title_from_filename(&file_stem(path)))
                .bind(ts)
                .bind(ts)
                .fetch_one(&mut *tx)
                .await?;
                bump_generation(&mut tx).await?;
                IngestOutcome::Created(id)
            }
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let file_path: String = row.try_get("file_path")?;
                let source_path: String = row.try_get("source_path")?;
                let missing: bool = row.try_get("missing")?;

                if missing {
                    // The archive copy is gone, so the reappeared file
                    // becomes the canonical one until it is placed again.
                    sqlx::query(
                        r#"
                        UPDATE documents
                        SET missing = 0, file_path = ?, source_path = ?, archive_path = NULL,
                            graph_dirty = 1, updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&path_str)
                    .bind(&path_str)
                    .bind(now())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    bump_generation(&mut tx).await?;
                    IngestOutcome::Revived(id)
                } else if path_str == file_path || path_str == source_path {
                    IngestOutcome::Existing(id)
                } else {
                    IngestOutcome::Duplicate {
                        id,
                        existing: file_path,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn tracked_files(&self) -> Result<Vec<TrackedFile>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, content_hash, file_path, source_path, archive_path, missing FROM documents ORDER BY id",
        )
        .fetch_all(self.reader())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let archive: Option<String> = row.try_get("archive_path")?;
            out.push(TrackedFile {
                id: row.try_get("id")?,
                content_hash: row.try_get("content_hash")?,
                file_path: PathBuf::from(row.try_get::<String, _>("file_path")?),
                source_path: PathBuf::from(row.try_get::<String, _>("source_path")?),
                archive_path: archive.map(PathBuf::from),
                missing: row.try_get("missing")?,
            });
        }
        Ok(out)
    }

    /// Tombstones documents whose canonical file disappeared.
    pub async fn mark_missing(&self, ids: &[DocumentId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ts = now();
        let mut tx = self.writer().begin().await?;
        let mut changed = 0;
        for id in ids {
            changed += sqlx::query(
                "UPDATE documents SET missing = 1, graph_dirty = 1, updated_at = ? WHERE id = ? AND missing = 0",
            )
            .bind(ts)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;
        }
        if changed > 0 {
            bump_generation(&mut tx).await?;
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Points a document whose archive file vanished back at its source.
    pub async fn fall_back_to_source(&self, id: DocumentId) -> Result<(), StoreError> {
        let mut tx = self.writer().begin().await?;
        sqlx::query(
            "UPDATE documents SET file_path = source_path, archive_path = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        bump_generation(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Live documents that are unextracted, unclassified under `version`,
    /// stale, or not yet archived. `reprocess` selects every live document.
    pub async fn documents_needing_work(
        &self,
        version: &str,
        reprocess: bool,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_hash, file_path, source_path, archive_path, status,
                   subject_id, taxonomy_version, extracted, title, abstract,
                   keywords_json, missing_fields_json, page_count
            FROM documents
            WHERE missing = 0
              AND (? OR extracted = 0
                   OR status IN ('pending', 'stale')
                   OR taxonomy_version IS NULL OR taxonomy_version != ?
                   OR archive_path IS NULL)
            ORDER BY id
            "#,
        )
        .bind(reprocess)
        .bind(version)
        .fetch_all(self.reader())
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let extracted: bool = row.try_get("extracted")?;
            let metadata = if extracted && !reprocess {
                Some(self.stored_metadata(id, &row).await?)
            } else {
                None
            };
            let archive: Option<String> = row.try_get("archive_path")?;
            items.push(WorkItem {
                id,
                content_hash: row.try_get("content_hash")?,
                file_path: PathBuf::from(row.try_get::<String, _>("file_path")?),
                source_path: PathBuf::from(row.try_get::<String, _>("source_path")?),
                archive_path: archive.map(PathBuf::from),
                status: parse_status(&row)?,
                subject_id: row.try_get("subject_id")?,
                taxonomy_version: row.try_get("taxonomy_version")?,
                metadata,
            });
        }
        Ok(items)
    }

    async fn stored_metadata(&self, id: DocumentId, row: &SqliteRow) -> Result<Metadata, StoreError> {
        let authors: Vec<String> = sqlx::query_scalar(
            "SELECT raw_name FROM document_authors WHERE document_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(self.reader())
        .await?;
        let keywords: Vec<String> =
            serde_json::from_str(&row.try_get::<String, _>("keywords_json")?)?;
        let missing: BTreeSet<MetadataField> =
            serde_json::from_str(&row.try_get::<String, _>("missing_fields_json")?)?;
        Ok(Metadata {
            title: row.try_get("title")?,
            authors,
            abstract_text: row.try_get("abstract")?,
            keywords,
            page_count: row.try_get::<i64, _>("page_count")?.max(0) as u32,
            missing,
        })
    }

    /// Commits metadata, authors, classification and placement for one
    /// document in a single writer transaction.
    pub async fn commit_document(&self, update: &DocumentUpdate) -> Result<(), StoreError> {
        let ts = now();
        let mut tx = self.writer().begin().await?;

        if let Some((meta, links)) = &update.metadata {
            sqlx::query(
                r#"
                UPDATE documents
                SET title = ?, abstract = ?, keywords_json = ?, missing_fields_json = ?,
                    page_count = ?, extracted = 1
                WHERE id = ?
                "#,
            )
            .bind(&meta.title)
            .bind(&meta.abstract_text)
            .bind(serde_json::to_string(&meta.keywords)?)
            .bind(serde_json::to_string(&meta.missing)?)
            .bind(meta.page_count as i64)
            .bind(update.id)
            .execute(&mut *tx)
            .await?;
            replace_author_links(&mut tx, update.id, links).await?;
        }

        if let Some(c) = &update.classification {
            sqlx::query(
                r#"
                UPDATE documents
                SET subject_id = COALESCE(?, subject_id,
                        (SELECT id FROM subjects WHERE path = ?)),
                    status = ?, confidence = ?, sub_field = ?, paper_type = ?,
                    summary = ?, taxonomy_version = ?
                WHERE id = ?
                "#,
            )
            .bind(c.subject_id)
            .bind(UNCLASSIFIED_ROOT)
            .bind(c.status.as_str())
            .bind(c.confidence)
            .bind(&c.sub_field)
            .bind(&c.paper_type)
            .bind(&c.summary)
            .bind(&c.taxonomy_version)
            .bind(update.id)
            .execute(&mut *tx)
            .await?;
        }

        match &update.placement {
            PlacementCommit::Unchanged => {}
            PlacementCommit::Archived(path) | PlacementCommit::Linked(path) => {
                let path = path.to_string_lossy().to_string();
                sqlx::query("UPDATE documents SET archive_path = ?, file_path = ? WHERE id = ?")
                    .bind(&path)
                    .bind(&path)
                    .bind(update.id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM placements WHERE document_id = ?")
                    .bind(update.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("UPDATE documents SET updated_at = ?, graph_dirty = 1 WHERE id = ?")
            .bind(ts)
            .bind(update.id)
            .execute(&mut *tx)
            .await?;
        bump_generation(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Reserves `target` for `id`. Returns `false` when another document
    /// already holds or reserves that path.
    pub async fn reserve_placement(
        &self,
        id: DocumentId,
        target: &Path,
        content_hash: &str,
    ) -> Result<bool, StoreError> {
        let target = target.to_string_lossy().to_string();
        let mut tx = self.writer().begin().await?;

        let reserved_by: Option<i64> =
            sqlx::query_scalar("SELECT document_id FROM placements WHERE target_path = ?")
                .bind(&target)
                .fetch_optional(&mut *tx)
                .await?;
        let owned_by: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE archive_path = ? OR file_path = ? LIMIT 1",
        )
        .bind(&target)
        .bind(&target)
        .fetch_optional(&mut *tx)
        .await?;

        let claimed = |owner: Option<i64>| owner.is_some_and(|o| o != id);
        if claimed(reserved_by) || claimed(owned_by) {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO placements (document_id, target_path, content_hash, reserved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                target_path = excluded.target_path,
                content_hash = excluded.content_hash,
                reserved_at = excluded.reserved_at
            "#,
        )
        .bind(id)
        .bind(&target)
        .bind(content_hash)
        .bind(now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn release_placement(&self, id: DocumentId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM placements WHERE document_id = ?")
            .bind(id)
            .execute(self.writer())
            .await?;
        Ok(())
    }

    pub async fn placements(&self) -> Result<Vec<PlacementRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT document_id, target_path, content_hash FROM placements ORDER BY document_id",
        )
        .fetch_all(self.reader())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(PlacementRow {
                    document_id: row.try_get("document_id")?,
                    target_path: PathBuf::from(row.try_get::<String, _>("target_path")?),
                    content_hash: row.try_get("content_hash")?,
                })
            })
            .collect()
    }

    /// Document whose record references `path`, if any.
    pub async fn path_owner(&self, path: &Path) -> Result<Option<DocumentId>, StoreError> {
        let path = path.to_string_lossy().to_string();
        Ok(sqlx::query_scalar(
            "SELECT id FROM documents WHERE archive_path = ? OR file_path = ? OR source_path = ? LIMIT 1",
        )
        .bind(&path)
        .bind(&path)
        .bind(&path)
        .fetch_optional(self.reader())
        .await?)
    }
}

async fn replace_author_links(
    conn: &mut SqliteConnection,
    document_id: DocumentId,
    links: &[AuthorLink],
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM document_authors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    for (position, link) in links.iter().enumerate() {
        let existing = sqlx::query("SELECT id, display_name FROM authors WHERE normalized_key = ?")
            .bind(&link.key)
            .fetch_optional(&mut *conn)
            .await?;
        let author_id: i64 = match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let current: String = row.try_get("display_name")?;
                if prefer_display(&current, &link.display) {
                    sqlx::query("UPDATE authors SET display_name = ? WHERE id = ?")
                        .bind(&link.display)
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                }
                id
            }
            None => {
                sqlx::query_scalar(
                    "INSERT INTO authors (normalized_key, display_name) VALUES (?, ?) RETURNING id",
                )
                .bind(&link.key)
                .bind(&link.display)
                .fetch_one(&mut *conn)
                .await?
            }
        };
        sqlx::query(
            "INSERT INTO document_authors (document_id, author_id, position, raw_name) VALUES (?, ?, ?, ?)",
        )
        .bind(document_id)
        .bind(author_id)
        .bind(position as i64)
        .bind(&link.raw)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        "DELETE FROM authors WHERE id NOT IN (SELECT DISTINCT author_id FROM document_authors)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) fn parse_status(row: &SqliteRow) -> Result<ClassificationStatus, StoreError> {
    let raw: String = row.try_get("status")?;
    raw.parse().map_err(StoreError::Decode)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}
