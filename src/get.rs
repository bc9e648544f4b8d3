//! Document detail.
//!
//! Backs `pw get <id>`: the full catalog record with authors, subject,
//! classification extras and file locations.

use anyhow::{bail, Result};
use paperweave_core::models::{Document, DocumentId};

use crate::catalog::Catalog;
use crate::config::Config;

/// Loads one document, failing when the id is unknown.
pub async fn get_document(catalog: &Catalog, id: DocumentId) -> Result<Document> {
    match catalog.get_document(id).await? {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {}", id),
    }
}

pub async fn run_get(config: &Config, id: DocumentId) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let result = get_document(&catalog, id).await;
    catalog.close().await;
    let doc = result?;

    println!("--- document #{} ---", doc.id);
    println!("title: {}", doc.title);
    if !doc.authors.is_empty() {
        let names: Vec<&str> = doc.authors.iter().map(|a| a.display_name.as_str()).collect();
        println!("authors: {}", names.join(", "));
    }
    println!(
        "subject: {} ({})",
        doc.subject_path.as_deref().unwrap_or("-"),
        doc.status.as_str()
    );
    if let Some(confidence) = doc.confidence {
        println!("confidence: {:.2}", confidence);
    }
    if let Some(sub_field) = &doc.sub_field {
        println!("sub-field: {}", sub_field);
    }
    if let Some(paper_type) = &doc.paper_type {
        println!("type: {}", paper_type);
    }
    if !doc.keywords.is_empty() {
        println!("keywords: {}", doc.keywords.join(", "));
    }
    println!("pages: {}", doc.page_count);
    println!("hash: {}", doc.content_hash);
    println!("file: {}", doc.file_path);
    if doc.source_path != doc.file_path {
        println!("source: {}", doc.source_path);
    }
    if doc.missing {
        println!("status: missing");
    }
    println!("updated: {}", format_ts_iso(doc.updated_at));
    if !doc.missing_fields.is_empty() {
        let fields: Vec<String> = doc
            .missing_fields
            .iter()
            .map(|f| format!("{:?}", f).to_lowercase())
            .collect();
        println!("not extracted: {}", fields.join(", "));
    }
    if let Some(summary) = &doc.summary {
        println!();
        println!("{}", summary);
    }
    if !doc.abstract_text.is_empty() {
        println!();
        println!("{}", doc.abstract_text);
    }

    Ok(())
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::open_temp;

    #[tokio::test]
    async fn unknown_id_is_an_error() {
        let (_dir, catalog) = open_temp().await;
        let err = get_document(&catalog, 42).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn formats_timestamps() {
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
