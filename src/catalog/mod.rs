//! Catalog store.
//!
//! Durable record of documents, authors, subjects, edges, annotations,
//! in-flight placements and the classification cache, kept in SQLite.
//!
//! All mutations go through the single-connection writer pool, one
//! transaction each, and every document mutation bumps the `generation`
//! counter in `catalog_meta`. Graph rebuilds compare generations to detect
//! snapshots that went stale while they were being computed.
//!
//! The API is split across submodules by concern:
//!
//! | Module | Concern |
//! |--------|---------|
//! | `documents` | ingestion, tombstones, work lists, atomic commits, placements |
//! | `edges` | graph snapshots and edge diffs |
//! | `queries` | read-only query surface and annotations |

mod documents;
mod edges;
mod queries;

use std::collections::{BTreeMap, HashSet};

use paperweave_core::authors::{display_form, normalize_author, prefer_display, AuthorRules};
use paperweave_core::models::{SubjectId, SubjectOrigin};
use paperweave_core::response::ModelAnswer;
use paperweave_core::taxonomy::{expand_paths, Taxonomy, TaxonomyEntry, UNCLASSIFIED_ROOT};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::config::Config;
use crate::db::{self, Pools};
use crate::error::StoreError;
use crate::migrate;

pub use documents::{
    AuthorLink, ClassificationUpdate, DocumentUpdate, IngestOutcome, PlacementCommit,
    PlacementRow, TrackedFile, WorkItem,
};

/// Handle to the catalog. Cheap to clone; clones share the pools.
#[derive(Clone, Debug)]
pub struct Catalog {
    pools: Pools,
}

/// One persisted classification-cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnswer {
    pub content_hash: String,
    pub taxonomy_version: String,
    pub answer: ModelAnswer,
}

impl Catalog {
    /// Opens the store, creating and migrating it if needed.
    ///
    /// Fails with [`StoreError::Corruption`] when the file is unreadable or
    /// carries a different schema version.
    pub async fn open(config: &Config) -> Result<Self, StoreError> {
        let pools = db::connect(config).await?;
        migrate::run_migrations(&pools).await?;
        Ok(Self { pools })
    }

    pub fn reader(&self) -> &SqlitePool {
        &self.pools.reader
    }

    fn writer(&self) -> &SqlitePool {
        &self.pools.writer
    }

    pub async fn close(&self) {
        self.pools.close().await;
    }

    /// Current mutation generation.
    pub async fn generation(&self) -> Result<i64, StoreError> {
        let mut conn = self.reader().acquire().await?;
        read_generation(&mut conn).await
    }

    /// Upserts the configured taxonomy and returns it with subject ids.
    ///
    /// Ancestors of configured paths are added implicitly. Configured
    /// subjects that are no longer listed are marked retired, never
    /// deleted, so documents keep pointing at a valid row.
    pub async fn sync_taxonomy(&self, configured: &[String]) -> Result<Taxonomy, StoreError> {
        let paths = expand_paths(configured);
        let mut tx = self.writer().begin().await?;

        for path in &paths {
            let (parent_path, name) = match path.rsplit_once('/') {
                Some((parent, leaf)) => (Some(parent), leaf),
                None => (None, path.as_str()),
            };
            let parent_id: Option<i64> = match parent_path {
                Some(p) => sqlx::query_scalar("SELECT id FROM subjects WHERE path = ?")
                    .bind(p)
                    .fetch_optional(&mut *tx)
                    .await?,
                None => None,
            };
            sqlx::query(
                r#"
                INSERT INTO subjects (name, path, parent_id, origin) VALUES (?, ?, ?, 'taxonomy')
                ON CONFLICT(path) DO UPDATE SET
                    origin = 'taxonomy',
                    parent_id = excluded.parent_id
                "#,
            )
            .bind(name)
            .bind(path)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
        }

        let keep: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let rows = sqlx::query("SELECT id, path FROM subjects WHERE origin = 'taxonomy'")
            .fetch_all(&mut *tx)
            .await?;

        let mut entries = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let path: String = row.try_get("path")?;
            if keep.contains(path.as_str()) {
                entries.push(TaxonomyEntry { id, path });
            } else {
                sqlx::query("UPDATE subjects SET origin = 'retired' WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tracing::info!(subject = %path, "retired subject no longer in taxonomy");
            }
        }

        tx.commit().await?;
        Ok(Taxonomy::new(entries))
    }

    /// Id of the `Unclassified` root.
    pub async fn unclassified_root(&self) -> Result<SubjectId, StoreError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM subjects WHERE path = ?")
            .bind(UNCLASSIFIED_ROOT)
            .fetch_optional(self.reader())
            .await?;
        id.ok_or_else(|| StoreError::Corruption("missing Unclassified root subject".into()))
    }

    /// Creates (or finds) the pending leaf `Unclassified/<name>`.
    pub async fn ensure_pending_subject(&self, name: &str) -> Result<SubjectId, StoreError> {
        let leaf = name
            .replace('/', "-")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let path = format!("{}/{}", UNCLASSIFIED_ROOT, leaf);

        let mut tx = self.writer().begin().await?;
        let root: Option<i64> = sqlx::query_scalar("SELECT id FROM subjects WHERE path = ?")
            .bind(UNCLASSIFIED_ROOT)
            .fetch_optional(&mut *tx)
            .await?;
        let root = root
            .ok_or_else(|| StoreError::Corruption("missing Unclassified root subject".into()))?;

        sqlx::query(
            r#"
            INSERT INTO subjects (name, path, parent_id, origin) VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO NOTHING
            "#,
        )
        .bind(&leaf)
        .bind(&path)
        .bind(root)
        .bind(SubjectOrigin::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM subjects WHERE path = ?")
            .bind(&path)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn subject_path(&self, id: SubjectId) -> Result<Option<String>, StoreError> {
        Ok(sqlx::query_scalar("SELECT path FROM subjects WHERE id = ?")
            .bind(id)
            .fetch_optional(self.reader())
            .await?)
    }

    pub async fn load_classification_cache(&self) -> Result<Vec<CachedAnswer>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT content_hash, taxonomy_version, subject_name, confidence,
                   sub_field, paper_type, summary
            FROM classification_cache
            ORDER BY content_hash, taxonomy_version
            "#,
        )
        .fetch_all(self.reader())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(CachedAnswer {
                content_hash: row.try_get("content_hash")?,
                taxonomy_version: row.try_get("taxonomy_version")?,
                answer: ModelAnswer {
                    subject_name: row.try_get("subject_name")?,
                    confidence: row.try_get("confidence")?,
                    sub_field: row.try_get("sub_field")?,
                    paper_type: row.try_get("paper_type")?,
                    summary: row.try_get("summary")?,
                },
            });
        }
        Ok(out)
    }

    /// Writes cache entries in one transaction through the writer.
    pub async fn store_classification_cache(
        &self,
        entries: &[CachedAnswer],
    ) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = now();
        let mut tx = self.writer().begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO classification_cache
                    (content_hash, taxonomy_version, subject_name, confidence,
                     sub_field, paper_type, summary, cached_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(content_hash, taxonomy_version) DO UPDATE SET
                    subject_name = excluded.subject_name,
                    confidence = excluded.confidence,
                    sub_field = excluded.sub_field,
                    paper_type = excluded.paper_type,
                    summary = excluded.summary,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&entry.content_hash)
            .bind(&entry.taxonomy_version)
            .bind(&entry.answer.subject_name)
            .bind(entry.answer.confidence)
            .bind(&entry.answer.sub_field)
            .bind(&entry.answer.paper_type)
            .bind(&entry.answer.summary)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(entries.len())
    }

    /// Re-normalizes every author link when the normalization rules changed
    /// since the last run. Authors whose keys now collide are merged into
    /// the lowest surviving id.
    ///
    /// Returns `true` when the rules changed, so callers can rebuild the
    /// graph in full.
    pub async fn sync_author_rules(&self, rules: &AuthorRules) -> Result<bool, StoreError> {
        let fingerprint = rules.fingerprint();
        let mut tx = self.writer().begin().await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM catalog_meta WHERE key = 'author_rules'")
                .fetch_optional(&mut *tx)
                .await?;
        if stored.as_deref() == Some(fingerprint.as_str()) {
            return Ok(false);
        }

        let links = sqlx::query(
            "SELECT document_id, position, author_id, raw_name FROM document_authors ORDER BY document_id, position",
        )
        .fetch_all(&mut *tx)
        .await?;

        // new key -> (display name, old author ids, link ids)
        let mut groups: BTreeMap<String, (String, Vec<i64>, Vec<(i64, i64)>)> = BTreeMap::new();
        let mut dropped: Vec<(i64, i64)> = Vec::new();
        for row in &links {
            let document_id: i64 = row.try_get("document_id")?;
            let position: i64 = row.try_get("position")?;
            let author_id: i64 = row.try_get("author_id")?;
            let raw: String = row.try_get("raw_name")?;
            match normalize_author(&raw, rules) {
                Some(key) => {
                    let display = display_form(&raw);
                    let group = groups
                        .entry(key)
                        .or_insert_with(|| (display.clone(), Vec::new(), Vec::new()));
                    if prefer_display(&group.0, &display) {
                        group.0 = display;
                    }
                    group.1.push(author_id);
                    group.2.push((document_id, position));
                }
                None => dropped.push((document_id, position)),
            }
        }

        // Park every key so reassignments cannot trip the UNIQUE constraint.
        sqlx::query("UPDATE authors SET normalized_key = '#' || id")
            .execute(&mut *tx)
            .await?;

        let mut used: HashSet<i64> = HashSet::new();
        for (key, (display, mut old_ids, link_ids)) in groups {
            old_ids.sort_unstable();
            old_ids.dedup();
            let survivor = old_ids.into_iter().find(|id| !used.contains(id));
            let author_id = match survivor {
                Some(id) => {
                    sqlx::query(
                        "UPDATE authors SET normalized_key = ?, display_name = ? WHERE id = ?",
                    )
                    .bind(&key)
                    .bind(&display)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    id
                }
                None => sqlx::query_scalar(
                    "INSERT INTO authors (normalized_key, display_name) VALUES (?, ?) RETURNING id",
                )
                .bind(&key)
                .bind(&display)
                .fetch_one(&mut *tx)
                .await?,
            };
            used.insert(author_id);
            for (document_id, position) in link_ids {
                sqlx::query(
                    "UPDATE document_authors SET author_id = ? WHERE document_id = ? AND position = ?",
                )
                .bind(author_id)
                .bind(document_id)
                .bind(position)
                .execute(&mut *tx)
                .await?;
            }
        }

        for (document_id, position) in dropped {
            sqlx::query("DELETE FROM document_authors WHERE document_id = ? AND position = ?")
                .bind(document_id)
                .bind(position)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "DELETE FROM authors WHERE id NOT IN (SELECT DISTINCT author_id FROM document_authors)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO catalog_meta (key, value) VALUES ('author_rules', ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&fingerprint)
        .execute(&mut *tx)
        .await?;
        bump_generation(&mut tx).await?;

        tx.commit().await?;
        tracing::info!(rules = %fingerprint, "author normalization rules applied");
        Ok(true)
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) async fn read_generation(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM catalog_meta WHERE key = 'generation'")
            .fetch_optional(&mut *conn)
            .await?;
    value
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| StoreError::Corruption("missing or invalid generation counter".into()))
}

pub(crate) async fn bump_generation(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE catalog_meta SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) WHERE key = 'generation'",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}
