//! Read-only query surface plus annotations.

use std::collections::BTreeSet;

use paperweave_core::graph::{EdgeKind, NodeRef};
use paperweave_core::models::{
    Annotation, AuthorRef, Document, DocumentId, MetadataField, Subject, SubjectOrigin,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::documents::parse_status;
use super::edges::read_edges;
use super::{now, Catalog};
use crate::error::StoreError;
use crate::models::{CatalogStats, DocumentSummary, EdgeRecord, GraphExport, GraphNode, Subgraph};

const SUMMARY_COLUMNS: &str = r#"
    d.id, d.title, d.status, d.file_path, s.path AS subject_path
    FROM documents d
    LEFT JOIN subjects s ON s.id = d.subject_id
"#;

impl Catalog {
    pub async fn subject(&self, path: &str) -> Result<Option<Subject>, StoreError> {
        let row = sqlx::query("SELECT id, name, path, parent_id, origin FROM subjects WHERE path = ?")
            .bind(path.trim_matches('/'))
            .fetch_optional(self.reader())
            .await?;
        row.map(|r| decode_subject(&r)).transpose()
    }

    /// Live documents filed under `path`, optionally including descendant
    /// subjects.
    pub async fn documents_by_subject(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<DocumentSummary>, StoreError> {
        let path = path.trim_matches('/');
        let sql = format!(
            r#"SELECT {SUMMARY_COLUMNS}
            WHERE d.missing = 0
              AND (s.path = ? OR (? AND s.path LIKE ? ESCAPE '\'))
            ORDER BY d.id"#
        );
        let rows = sqlx::query(&sql)
            .bind(path)
            .bind(recursive)
            .bind(format!("{}/%", escape_like(path)))
            .fetch_all(self.reader())
            .await?;
        self.summaries(rows).await
    }

    /// Case-insensitive substring search over titles and author names.
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<DocumentSummary>, StoreError> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let sql = format!(
            r#"SELECT {SUMMARY_COLUMNS}
            WHERE d.missing = 0
              AND (d.title LIKE ?1 ESCAPE '\'
                   OR EXISTS (
                       SELECT 1 FROM document_authors da
                       JOIN authors a ON a.id = da.author_id
                       WHERE da.document_id = d.id
                         AND (a.display_name LIKE ?1 ESCAPE '\' OR da.raw_name LIKE ?1 ESCAPE '\')
                   ))
            ORDER BY d.id
            LIMIT ?2"#
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(limit)
            .fetch_all(self.reader())
            .await?;
        self.summaries(rows).await
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT d.*, s.path AS subject_path
            FROM documents d
            LEFT JOIN subjects s ON s.id = d.subject_id
            WHERE d.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.reader())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let authors = sqlx::query(
            r#"
            SELECT a.id, a.display_name, a.normalized_key
            FROM document_authors da
            JOIN authors a ON a.id = da.author_id
            WHERE da.document_id = ?
            ORDER BY da.position
            "#,
        )
        .bind(id)
        .fetch_all(self.reader())
        .await?
        .iter()
        .map(|r| {
            Ok(AuthorRef {
                id: r.try_get("id")?,
                display_name: r.try_get("display_name")?,
                normalized_key: r.try_get("normalized_key")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

        let keywords: Vec<String> =
            serde_json::from_str(&row.try_get::<String, _>("keywords_json")?)?;
        let missing_fields: BTreeSet<MetadataField> =
            serde_json::from_str(&row.try_get::<String, _>("missing_fields_json")?)?;

        Ok(Some(Document {
            id: row.try_get("id")?,
            content_hash: row.try_get("content_hash")?,
            file_path: row.try_get("file_path")?,
            source_path: row.try_get("source_path")?,
            archive_path: row.try_get("archive_path")?,
            file_size: row.try_get("file_size")?,
            title: row.try_get("title")?,
            authors,
            abstract_text: row.try_get("abstract")?,
            keywords,
            missing_fields,
            page_count: row.try_get::<i64, _>("page_count")?.max(0) as u32,
            subject_id: row.try_get("subject_id")?,
            subject_path: row.try_get("subject_path")?,
            status: parse_status(&row)?,
            confidence: row.try_get("confidence")?,
            sub_field: row.try_get("sub_field")?,
            paper_type: row.try_get("paper_type")?,
            summary: row.try_get("summary")?,
            taxonomy_version: row.try_get("taxonomy_version")?,
            missing: row.try_get("missing")?,
            ingested_at: row.try_get("ingested_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Documents directly under a subject, the document edges among them
    /// and their subject links.
    pub async fn subject_subgraph(&self, path: &str) -> Result<Option<Subgraph>, StoreError> {
        let Some(subject) = self.subject(path).await? else {
            return Ok(None);
        };
        let documents = self.documents_by_subject(&subject.path, false).await?;
        let members: BTreeSet<NodeRef> = documents
            .iter()
            .map(|d| NodeRef::Document(d.id))
            .collect();
        let subject_node = NodeRef::Subject(subject.id);

        let mut conn = self.reader().acquire().await?;
        let edges = read_edges(&mut conn)
            .await?
            .iter()
            .filter(|(key, _)| {
                let inside = |n: &NodeRef| members.contains(n);
                match key.kind {
                    EdgeKind::Subject => {
                        (inside(&key.a) && key.b == subject_node)
                            || (inside(&key.b) && key.a == subject_node)
                    }
                    _ => inside(&key.a) && inside(&key.b),
                }
            })
            .map(|(key, weight)| EdgeRecord::new(key, *weight))
            .collect();

        Ok(Some(Subgraph {
            subject,
            documents,
            edges,
        }))
    }

    pub async fn stats(&self) -> Result<CatalogStats, StoreError> {
        let pool = self.reader();
        let count = |sql: &'static str| async move {
            sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await
        };

        let mut stats = CatalogStats {
            documents: count("SELECT COUNT(*) FROM documents WHERE missing = 0").await?,
            missing: count("SELECT COUNT(*) FROM documents WHERE missing = 1").await?,
            archived: count(
                "SELECT COUNT(*) FROM documents WHERE missing = 0 AND archive_path IS NOT NULL",
            )
            .await?,
            authors: count("SELECT COUNT(*) FROM authors").await?,
            subjects: count("SELECT COUNT(*) FROM subjects WHERE origin != 'retired'").await?,
            pending_placements: count("SELECT COUNT(*) FROM placements").await?,
            cached_classifications: count("SELECT COUNT(*) FROM classification_cache").await?,
            ..Default::default()
        };

        for row in sqlx::query(
            "SELECT status, COUNT(*) AS n FROM documents WHERE missing = 0 GROUP BY status",
        )
        .fetch_all(pool)
        .await?
        {
            stats
                .by_status
                .insert(row.try_get("status")?, row.try_get("n")?);
        }

        for row in sqlx::query(
            r#"
            SELECT s.path, COUNT(*) AS n
            FROM documents d
            JOIN subjects s ON s.id = d.subject_id
            WHERE d.missing = 0
            GROUP BY s.path
            ORDER BY n DESC, s.path
            "#,
        )
        .fetch_all(pool)
        .await?
        {
            stats
                .by_subject
                .push((row.try_get("path")?, row.try_get("n")?));
        }

        for row in sqlx::query("SELECT kind, COUNT(*) AS n FROM edges GROUP BY kind")
            .fetch_all(pool)
            .await?
        {
            stats
                .edges_by_kind
                .insert(row.try_get("kind")?, row.try_get("n")?);
        }

        Ok(stats)
    }

    /// Every live document, every non-retired subject and all stored edges.
    pub async fn export_graph(&self) -> Result<GraphExport, StoreError> {
        let mut tx = self.reader().begin().await?;
        let generation = super::read_generation(&mut tx).await?;

        let mut nodes = Vec::new();
        let subjects = sqlx::query(
            "SELECT id, path FROM subjects WHERE origin != 'retired' ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;
        for row in subjects {
            let path: String = row.try_get("path")?;
            nodes.push(GraphNode {
                node: NodeRef::Subject(row.try_get("id")?),
                label: path.rsplit('/').next().unwrap_or(&path).to_string(),
                subject_path: Some(path),
            });
        }

        let documents = sqlx::query(
            r#"
            SELECT d.id, d.title, s.path AS subject_path
            FROM documents d
            LEFT JOIN subjects s ON s.id = d.subject_id
            WHERE d.missing = 0
            ORDER BY d.id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        for row in documents {
            nodes.push(GraphNode {
                node: NodeRef::Document(row.try_get("id")?),
                label: row.try_get("title")?,
                subject_path: row.try_get("subject_path")?,
            });
        }

        let edges = read_edges(&mut tx)
            .await?
            .iter()
            .map(|(key, weight)| EdgeRecord::new(key, *weight))
            .collect();
        tx.commit().await?;

        Ok(GraphExport {
            generation,
            nodes,
            edges,
        })
    }

    /// Stores an opaque page annotation, replacing any previous one.
    pub async fn put_annotation(
        &self,
        document_id: DocumentId,
        page: u32,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO annotations (document_id, page, payload, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id, page) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document_id)
        .bind(page as i64)
        .bind(payload)
        .bind(now())
        .execute(self.writer())
        .await?;
        Ok(())
    }

    pub async fn annotations(&self, document_id: DocumentId) -> Result<Vec<Annotation>, StoreError> {
        let rows = sqlx::query(
            "SELECT document_id, page, payload, updated_at FROM annotations WHERE document_id = ? ORDER BY page",
        )
        .bind(document_id)
        .fetch_all(self.reader())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Annotation {
                    document_id: row.try_get("document_id")?,
                    page: row.try_get::<i64, _>("page")?.max(0) as u32,
                    payload: row.try_get("payload")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn summaries(&self, rows: Vec<SqliteRow>) -> Result<Vec<DocumentSummary>, StoreError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let authors: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT a.display_name
                FROM document_authors da
                JOIN authors a ON a.id = da.author_id
                WHERE da.document_id = ?
                ORDER BY da.position
                "#,
            )
            .bind(id)
            .fetch_all(self.reader())
            .await?;
            out.push(DocumentSummary {
                id,
                title: row.try_get("title")?,
                authors,
                subject_path: row.try_get("subject_path")?,
                status: parse_status(&row)?,
                file_path: row.try_get("file_path")?,
            });
        }
        Ok(out)
    }
}

fn decode_subject(row: &SqliteRow) -> Result<Subject, StoreError> {
    let origin: String = row.try_get("origin")?;
    Ok(Subject {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        parent_id: row.try_get("parent_id")?,
        origin: origin.parse::<SubjectOrigin>().map_err(StoreError::Decode)?,
    })
}

/// Escapes `\`, `%` and `_` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
