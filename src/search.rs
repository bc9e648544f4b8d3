//! Catalog lookups for the CLI: subject listings and title/author search.

use anyhow::{bail, Result};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::models::DocumentSummary;

/// `pw search <query>`
pub async fn run_search(config: &Config, query: &str, limit: i64) -> Result<()> {
    if query.trim().is_empty() {
        bail!("search query must not be empty");
    }
    let catalog = Catalog::open(config).await?;
    let results = catalog.search(query, limit).await;
    catalog.close().await;
    print_summaries(&results?);
    Ok(())
}

/// `pw list <subject>`
pub async fn run_list(config: &Config, subject: &str, recursive: bool) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let result = async {
        if catalog.subject(subject).await?.is_none() {
            bail!("unknown subject: {}", subject);
        }
        Ok::<_, anyhow::Error>(catalog.documents_by_subject(subject, recursive).await?)
    }
    .await;
    catalog.close().await;
    print_summaries(&result?);
    Ok(())
}

fn print_summaries(docs: &[DocumentSummary]) {
    if docs.is_empty() {
        println!("No results.");
        return;
    }
    for (i, doc) in docs.iter().enumerate() {
        println!("{}. #{} {}", i + 1, doc.id, doc.title);
        if !doc.authors.is_empty() {
            println!("    authors: {}", doc.authors.join(", "));
        }
        println!(
            "    subject: {} ({})",
            doc.subject_path.as_deref().unwrap_or("-"),
            doc.status.as_str()
        );
        println!("    file: {}", doc.file_path);
        println!();
    }
}
