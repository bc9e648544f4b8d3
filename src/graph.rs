//! Relationship graph rebuilds.
//!
//! Takes a consistent snapshot through the catalog, computes the edge diff
//! on the blocking pool with [`paperweave_core::graph::compute`] and
//! applies it through the writer, which rejects the diff if any document
//! changed in the meantime. A rejected rebuild is simply retried on the
//! next trigger.

use std::collections::BTreeSet;

use anyhow::Result;
use paperweave_core::graph::{compute, GraphParams, RebuildStrategy};
use paperweave_core::models::DocumentId;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::GraphBuildError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub strategy: &'static str,
    pub documents: usize,
    pub changed: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct GraphBuilder {
    catalog: Catalog,
    params: GraphParams,
}

impl GraphBuilder {
    pub fn new(config: &Config, catalog: Catalog) -> Self {
        Self {
            catalog,
            params: config.graph.params(),
        }
    }

    /// Rescores pairs touching documents changed since the last applied
    /// rebuild plus `extra`. Small corpora fall back to a full rebuild.
    pub async fn rebuild_incremental(
        &self,
        extra: &BTreeSet<DocumentId>,
    ) -> Result<RebuildReport, GraphBuildError> {
        self.rebuild(false, extra).await
    }

    pub async fn rebuild_full(&self) -> Result<RebuildReport, GraphBuildError> {
        self.rebuild(true, &BTreeSet::new()).await
    }

    async fn rebuild(
        &self,
        force_full: bool,
        extra: &BTreeSet<DocumentId>,
    ) -> Result<RebuildReport, GraphBuildError> {
        let (snapshot, mut changed) = self.catalog.graph_snapshot().await?;
        changed.extend(extra.iter().copied());

        let generation = snapshot.generation;
        let documents = snapshot.documents.len();
        let changed_count = changed.len();
        let strategy = RebuildStrategy::plan(documents, changed, force_full, &self.params);

        if matches!(&strategy, RebuildStrategy::Incremental(c) if c.is_empty()) {
            tracing::debug!("graph is up to date");
            return Ok(RebuildReport {
                strategy: strategy.name(),
                documents,
                ..Default::default()
            });
        }

        let name = strategy.name();
        let params = self.params.clone();
        let diff = tokio::task::spawn_blocking(move || compute(&snapshot, &strategy, &params))
            .await
            .map_err(|e| GraphBuildError::Join(e.to_string()))??;

        let report = RebuildReport {
            strategy: name,
            documents,
            changed: changed_count,
            added: diff.added.len(),
            updated: diff.updated.len(),
            removed: diff.removed.len(),
        };

        self.catalog.apply_edge_diff(&diff, generation).await?;
        tracing::info!(
            strategy = name,
            documents,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            "graph rebuilt"
        );
        Ok(report)
    }
}

/// `pw graph rebuild [--full]`
pub async fn run_graph_rebuild(config: &Config, full: bool) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let builder = GraphBuilder::new(config, catalog.clone());
    let report = if full {
        builder.rebuild_full().await?
    } else {
        builder.rebuild_incremental(&BTreeSet::new()).await?
    };

    println!(
        "graph rebuild ({}): {} documents, {} changed",
        report.strategy, report.documents, report.changed
    );
    println!(
        "edges: +{} ~{} -{}",
        report.added, report.updated, report.removed
    );
    println!("ok");

    catalog.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use paperweave_core::authors::AuthorRules;
    use paperweave_core::graph::{EdgeKind, NodeRef};

    use super::*;
    use crate::catalog::test_support::{config_in, open_temp};
    use crate::catalog::{AuthorLink, DocumentUpdate, PlacementCommit};
    use paperweave_core::models::Metadata;

    async fn add(catalog: &Catalog, name: &str, title: &str, authors: &[&str]) -> DocumentId {
        let id = catalog
            .ingest_file(
                std::path::Path::new(&format!("/in/{}.pdf", name)),
                &format!("hash-{}", name),
                1,
            )
            .await
            .unwrap()
            .id();
        let names: Vec<String> = authors.iter().map(|s| s.to_string()).collect();
        let links = AuthorLink::from_names(&names, &AuthorRules::default());
        catalog
            .commit_document(&DocumentUpdate {
                id,
                metadata: Some((
                    Metadata {
                        title: title.into(),
                        authors: names,
                        ..Default::default()
                    },
                    links,
                )),
                classification: None,
                placement: PlacementCommit::Unchanged,
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn rebuild_writes_similarity_and_coauthor_edges() {
        let (dir, catalog) = open_temp().await;
        let builder = GraphBuilder::new(&config_in(&dir), catalog.clone());
        let a = add(&catalog, "a", "Graph Neural Networks", &["X One", "Y Two"]).await;
        let b = add(&catalog, "b", "Graph Neural Network Survey", &["X One", "Z Three"]).await;

        let report = builder.rebuild_incremental(&BTreeSet::new()).await.unwrap();
        assert_eq!(report.strategy, "full");

        let edges = catalog.edges().await.unwrap();
        let pair = |kind| {
            edges
                .iter()
                .find(|(k, _)| {
                    k.kind == kind && k.a == NodeRef::Document(a) && k.b == NodeRef::Document(b)
                })
                .map(|(_, w)| *w)
        };
        let sim = pair(EdgeKind::Similarity).unwrap();
        assert!((sim - 0.776517).abs() < 1e-4);
        let co = pair(EdgeKind::Coauthor).unwrap();
        assert!((co - 0.333333).abs() < 1e-9);

        let again = builder.rebuild_incremental(&BTreeSet::new()).await.unwrap();
        assert_eq!(again.added + again.updated + again.removed, 0);
        assert_eq!(catalog.edges().await.unwrap(), edges);
    }

    #[tokio::test]
    async fn tombstoned_documents_lose_their_edges() {
        let (dir, catalog) = open_temp().await;
        let builder = GraphBuilder::new(&config_in(&dir), catalog.clone());
        let a = add(&catalog, "a", "Graph Neural Networks", &["X One"]).await;
        add(&catalog, "b", "Graph Neural Network Survey", &["X One"]).await;
        builder.rebuild_full().await.unwrap();
        assert_eq!(catalog.edges().await.unwrap().len(), 2);

        catalog.mark_missing(&[a]).await.unwrap();
        let report = builder.rebuild_incremental(&BTreeSet::new()).await.unwrap();
        assert_eq!(report.removed, 2);
        assert!(catalog.edges().await.unwrap().is_empty());
    }
}
