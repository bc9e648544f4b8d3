//! Catalog schema.
//!
//! Creates every table idempotently and stamps `catalog_meta` with the
//! schema version. A store stamped with any other version is treated as
//! corrupt rather than silently reinterpreted.

use paperweave_core::models::SubjectOrigin;
use paperweave_core::taxonomy::UNCLASSIFIED_ROOT;

use crate::db::Pools;
use crate::error::StoreError;

pub const SCHEMA_VERSION: i64 = 1;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS catalog_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subjects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        path TEXT NOT NULL UNIQUE,
        parent_id INTEGER REFERENCES subjects(id),
        origin TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_hash TEXT NOT NULL UNIQUE,
        file_path TEXT NOT NULL,
        source_path TEXT NOT NULL,
        archive_path TEXT UNIQUE,
        file_size INTEGER NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        abstract TEXT NOT NULL DEFAULT '',
        keywords_json TEXT NOT NULL DEFAULT '[]',
        missing_fields_json TEXT NOT NULL DEFAULT '[]',
        page_count INTEGER NOT NULL DEFAULT 0,
        extracted INTEGER NOT NULL DEFAULT 0,
        subject_id INTEGER REFERENCES subjects(id),
        status TEXT NOT NULL DEFAULT 'pending',
        confidence REAL,
        sub_field TEXT,
        paper_type TEXT,
        summary TEXT,
        taxonomy_version TEXT,
        missing INTEGER NOT NULL DEFAULT 0,
        graph_dirty INTEGER NOT NULL DEFAULT 1,
        ingested_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS authors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        normalized_key TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_authors (
        document_id INTEGER NOT NULL REFERENCES documents(id),
        author_id INTEGER NOT NULL REFERENCES authors(id),
        position INTEGER NOT NULL,
        raw_name TEXT NOT NULL,
        PRIMARY KEY (document_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        a_kind TEXT NOT NULL,
        a_id INTEGER NOT NULL,
        b_kind TEXT NOT NULL,
        b_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        weight REAL NOT NULL,
        PRIMARY KEY (a_kind, a_id, b_kind, b_id, kind)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS placements (
        document_id INTEGER PRIMARY KEY REFERENCES documents(id),
        target_path TEXT NOT NULL UNIQUE,
        content_hash TEXT NOT NULL,
        reserved_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS classification_cache (
        content_hash TEXT NOT NULL,
        taxonomy_version TEXT NOT NULL,
        subject_name TEXT NOT NULL,
        confidence REAL NOT NULL,
        sub_field TEXT,
        paper_type TEXT,
        summary TEXT,
        cached_at INTEGER NOT NULL,
        PRIMARY KEY (content_hash, taxonomy_version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS annotations (
        document_id INTEGER NOT NULL REFERENCES documents(id),
        page INTEGER NOT NULL,
        payload BLOB NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (document_id, page)
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_documents_subject ON documents(subject_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
    "CREATE INDEX IF NOT EXISTS idx_document_authors_author ON document_authors(author_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_b ON edges(b_kind, b_id)",
    "CREATE INDEX IF NOT EXISTS idx_subjects_parent ON subjects(parent_id)",
];

/// Creates the schema if needed and verifies the version stamp.
pub async fn run_migrations(pools: &Pools) -> Result<(), StoreError> {
    let mut tx = pools.writer.begin().await?;

    for ddl in TABLES.iter().chain(INDEXES.iter()) {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }

    let stamped: Option<String> =
        sqlx::query_scalar("SELECT value FROM catalog_meta WHERE key = 'schema_version'")
            .fetch_optional(&mut *tx)
            .await?;

    match stamped {
        None => {
            sqlx::query(
                r#"
                INSERT INTO catalog_meta (key, value) VALUES
                    ('schema_version', ?),
                    ('generation', '0')
                "#,
            )
            .bind(SCHEMA_VERSION.to_string())
            .execute(&mut *tx)
            .await?;
        }
        Some(v) if v.parse::<i64>().ok() == Some(SCHEMA_VERSION) => {}
        Some(v) => {
            return Err(StoreError::Corruption(format!(
                "schema version {} does not match expected {}",
                v, SCHEMA_VERSION
            )));
        }
    }

    sqlx::query(
        "INSERT OR IGNORE INTO subjects (name, path, parent_id, origin) VALUES (?, ?, NULL, ?)",
    )
    .bind(UNCLASSIFIED_ROOT)
    .bind(UNCLASSIFIED_ROOT)
    .bind(SubjectOrigin::System.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
