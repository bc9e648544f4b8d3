//! Graph snapshots and edge persistence.

use std::collections::{BTreeMap, BTreeSet};

use paperweave_core::graph::{
    EdgeDiff, EdgeKey, EdgeKind, EdgeSet, GraphDocument, GraphSnapshot, NodeRef,
};
use paperweave_core::models::DocumentId;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{read_generation, Catalog};
use crate::error::{GraphBuildError, StoreError};

impl Catalog {
    /// Reads the live corpus, all subject and author ids, the stored edges
    /// and the documents changed since the last applied rebuild, all inside
    /// one read transaction.
    pub async fn graph_snapshot(
        &self,
    ) -> Result<(GraphSnapshot, BTreeSet<DocumentId>), StoreError> {
        let mut tx = self.reader().begin().await?;

        let generation = read_generation(&mut tx).await?;

        let rows = sqlx::query(
            "SELECT id, title, abstract, keywords_json, subject_id FROM documents WHERE missing = 0 ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut documents = BTreeMap::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let keywords: Vec<String> =
                serde_json::from_str(&row.try_get::<String, _>("keywords_json")?)?;
            documents.insert(
                id,
                GraphDocument {
                    title: row.try_get("title")?,
                    abstract_text: row.try_get("abstract")?,
                    keywords,
                    authors: BTreeSet::new(),
                    subject_id: row.try_get("subject_id")?,
                },
            );
        }

        let links = sqlx::query("SELECT document_id, author_id FROM document_authors")
            .fetch_all(&mut *tx)
            .await?;
        for row in links {
            let document_id: i64 = row.try_get("document_id")?;
            if let Some(doc) = documents.get_mut(&document_id) {
                doc.authors.insert(row.try_get::<i64, _>("author_id")?);
            }
        }

        let subjects: BTreeSet<i64> = sqlx::query_scalar::<_, i64>("SELECT id FROM subjects")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
        let authors: BTreeSet<i64> = sqlx::query_scalar::<_, i64>("SELECT id FROM authors")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

        let edges = read_edges(&mut tx).await?;

        let changed: BTreeSet<DocumentId> =
            sqlx::query_scalar::<_, i64>("SELECT id FROM documents WHERE graph_dirty = 1")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        tx.commit().await?;
        Ok((
            GraphSnapshot {
                generation,
                documents,
                subjects,
                authors,
                edges,
            },
            changed,
        ))
    }

    /// Applies a diff computed from the snapshot taken at `generation`.
    ///
    /// Fails with [`GraphBuildError::InconsistentSnapshot`] when any
    /// document mutation committed in between. Applying edges does not
    /// itself advance the generation.
    pub async fn apply_edge_diff(
        &self,
        diff: &EdgeDiff,
        generation: i64,
    ) -> Result<(), GraphBuildError> {
        let mut tx = self.writer().begin().await.map_err(StoreError::from)?;

        let current = read_generation(&mut tx).await?;
        if current != generation {
            return Err(GraphBuildError::InconsistentSnapshot(format!(
                "catalog changed during rebuild (generation {} -> {})",
                generation, current
            )));
        }

        for key in &diff.removed {
            sqlx::query(
                "DELETE FROM edges WHERE a_kind = ? AND a_id = ? AND b_kind = ? AND b_id = ? AND kind = ?",
            )
            .bind(key.a.kind_str())
            .bind(key.a.id())
            .bind(key.b.kind_str())
            .bind(key.b.id())
            .bind(key.kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        }

        for (key, weight) in diff.added.iter().chain(diff.updated.iter()) {
            sqlx::query(
                r#"
                INSERT INTO edges (a_kind, a_id, b_kind, b_id, kind, weight)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(a_kind, a_id, b_kind, b_id, kind) DO UPDATE SET weight = excluded.weight
                "#,
            )
            .bind(key.a.kind_str())
            .bind(key.a.id())
            .bind(key.b.kind_str())
            .bind(key.b.id())
            .bind(key.kind.as_str())
            .bind(weight)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        }

        sqlx::query("UPDATE documents SET graph_dirty = 0 WHERE graph_dirty = 1")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    /// Every stored edge, in canonical order.
    pub async fn edges(&self) -> Result<EdgeSet, StoreError> {
        let mut conn = self.reader().acquire().await?;
        read_edges(&mut conn).await
    }
}

pub(crate) async fn read_edges(conn: &mut SqliteConnection) -> Result<EdgeSet, StoreError> {
    let rows = sqlx::query("SELECT a_kind, a_id, b_kind, b_id, kind, weight FROM edges")
        .fetch_all(&mut *conn)
        .await?;
    let mut edges = EdgeSet::new();
    for row in rows {
        let (key, weight) = decode_edge(&row)?;
        edges.insert(key, weight);
    }
    Ok(edges)
}

pub(crate) fn decode_edge(row: &SqliteRow) -> Result<(EdgeKey, f64), StoreError> {
    let node = |kind_col: &str, id_col: &str| -> Result<NodeRef, StoreError> {
        let kind: String = row.try_get(kind_col)?;
        let id: i64 = row.try_get(id_col)?;
        NodeRef::from_parts(&kind, id)
            .ok_or_else(|| StoreError::Decode(format!("unknown node kind '{}'", kind)))
    };
    let kind: String = row.try_get("kind")?;
    let kind = EdgeKind::parse(&kind)
        .ok_or_else(|| StoreError::Decode(format!("unknown edge kind '{}'", kind)))?;
    let key = EdgeKey::new(node("a_kind", "a_id")?, node("b_kind", "b_id")?, kind);
    Ok((key, row.try_get("weight")?))
}
