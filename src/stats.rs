//! Catalog statistics.
//!
//! Provides a quick summary of the corpus: document counts by status and
//! subject, author and edge counts, and leftovers such as pending
//! placements. Used by `pw stats` to confirm a batch did what it should.

use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::Config;

pub async fn run_stats(config: &Config) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let result = catalog.stats().await;
    let generation = catalog.generation().await;
    catalog.close().await;
    let stats = result?;
    let generation = generation?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Paperweave — Catalog Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Generation:  {}", generation);
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Archived:    {}", stats.archived);
    println!("  Missing:     {}", stats.missing);
    println!("  Authors:     {}", stats.authors);
    println!("  Subjects:    {}", stats.subjects);
    println!("  Cached:      {}", stats.cached_classifications);
    if stats.pending_placements > 0 {
        println!("  Pending placements: {}", stats.pending_placements);
    }

    if !stats.by_status.is_empty() {
        println!();
        println!("  By status:");
        for (status, count) in &stats.by_status {
            println!("  {:<24} {:>6}", status, count);
        }
    }

    if !stats.by_subject.is_empty() {
        println!();
        println!("  By subject:");
        println!("  {:<48} {:>6}", "SUBJECT", "DOCS");
        println!("  {}", "-".repeat(56));
        for (path, count) in &stats.by_subject {
            println!("  {:<48} {:>6}", path, count);
        }
    }

    if !stats.edges_by_kind.is_empty() {
        println!();
        println!("  Edges:");
        for (kind, count) in &stats.edges_by_kind {
            println!("  {:<24} {:>6}", kind, count);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
