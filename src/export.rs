//! Graph export as JSON.
//!
//! `pw export` writes every live document and subject node plus all stored
//! edges; `pw subgraph` prints the documents filed directly under one
//! subject with the edges among them.

use std::path::Path;

use anyhow::{bail, Result};

use crate::catalog::Catalog;
use crate::config::Config;

/// Export the whole graph.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let export = catalog.export_graph().await;
    catalog.close().await;
    let export = export?;

    let json = serde_json::to_string_pretty(&export)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} nodes, {} edges to {}",
                export.nodes.len(),
                export.edges.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// `pw subgraph <subject>`
pub async fn run_subgraph(config: &Config, subject: &str) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let subgraph = catalog.subject_subgraph(subject).await;
    catalog.close().await;
    let Some(subgraph) = subgraph? else {
        bail!("unknown subject: {}", subject);
    };
    println!("{}", serde_json::to_string_pretty(&subgraph)?);
    Ok(())
}
