//! Batch pipeline: scan → extract → classify → organize → graph.
//!
//! One run:
//!
//! 1. Sync the configured taxonomy and author-normalization rules.
//! 2. Reconcile archive leftovers from an interrupted run.
//! 3. Scan the input directory and register every PDF by content hash.
//! 4. Tombstone documents whose canonical file vanished.
//! 5. Process every document that still needs work on a bounded pool of
//!    workers (`pipeline.workers`). Each document is extracted, classified
//!    and placed, and its results are committed in one transaction.
//! 6. Flush new classification answers to the cache.
//! 7. Rebuild the relationship graph, in full when the author rules
//!    changed or a full rebuild was requested.
//!
//! Cancellation is cooperative: a worker checks the signal before each
//! stage, so a document is either fully committed or left as it was.
//! Placement is never interrupted once started. The graph is not rebuilt
//! for a cancelled run.
//!
//! Per-document failures are collected as [`DocumentIssue`]s and never
//! abort the batch. A corrupt catalog ([`StoreError::Corruption`]) does.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use paperweave_core::authors::AuthorRules;
use paperweave_core::models::{ClassificationStatus, DocumentId, Metadata, SubjectId};
use paperweave_core::taxonomy::{SubjectMatch, Taxonomy, UNCLASSIFIED_ROOT};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::cache::ClassificationCache;
use crate::catalog::{
    AuthorLink, Catalog, ClassificationUpdate, DocumentUpdate, IngestOutcome, PlacementCommit,
    WorkItem,
};
use crate::classifier::{create_model, Classifier, SubjectModel};
use crate::config::Config;
use crate::error::{DocumentIssue, Stage, StoreError};
use crate::extract::Extractor;
use crate::graph::{GraphBuilder, RebuildReport};
use crate::organizer::{Organizer, PlaceOutcome, RecoveryReport};
use crate::scanner::scan_library;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Re-extract and reclassify every live document.
    pub reprocess: bool,
    /// Process at most this many documents.
    pub limit: Option<usize>,
    /// Rebuild the graph in full instead of incrementally.
    pub full_graph: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub scanned: usize,
    pub created: usize,
    pub duplicates: usize,
    pub revived: usize,
    pub marked_missing: usize,
    pub fell_back_to_source: usize,
    pub processed: usize,
    pub classified: usize,
    pub unclassified: usize,
    pub stale: usize,
    pub archived: usize,
    pub linked: usize,
    pub unorganized: usize,
    pub cache_hits: usize,
    pub model_calls: usize,
    pub cancelled: bool,
    #[serde(skip)]
    pub recovery: RecoveryReport,
    pub graph: Option<RebuildReport>,
    pub graph_error: Option<String>,
    pub issues: Vec<DocumentIssue>,
}

/// What one worker did with one document.
#[derive(Debug, Default)]
struct DocumentOutcome {
    cancelled: bool,
    status: Option<ClassificationStatus>,
    placement: Option<PlaceOutcome>,
    cache_hit: bool,
    issues: Vec<DocumentIssue>,
}

/// Shared state for the worker pool.
struct Worker {
    catalog: Catalog,
    extractor: Extractor,
    classifier: Classifier,
    organizer: Organizer,
    taxonomy: Taxonomy,
    rules: AuthorRules,
    version: String,
    unclassified_root: SubjectId,
}

pub struct Pipeline {
    config: Config,
    catalog: Catalog,
    model: Arc<dyn SubjectModel>,
}

impl Pipeline {
    pub fn new(config: Config, catalog: Catalog, model: Arc<dyn SubjectModel>) -> Self {
        Self {
            config,
            catalog,
            model,
        }
    }

    /// Builds a pipeline with the configured classifier backend.
    pub fn from_config(config: Config, catalog: Catalog) -> Result<Self> {
        let model = create_model(&config.classifier)?;
        Ok(Self::new(config, catalog, model))
    }

    pub async fn run(
        &self,
        options: &BatchOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        let taxonomy = self
            .catalog
            .sync_taxonomy(&self.config.classifier.taxonomy)
            .await?;
        let rules = self.config.authors.rules();
        let rules_changed = self.catalog.sync_author_rules(&rules).await?;
        if rules_changed {
            tracing::info!("author normalization rules changed, graph will be rebuilt in full");
        }

        let organizer = Organizer::new(&self.config, self.catalog.clone());
        report.recovery = organizer.recover().await?;
        report.fell_back_to_source += report.recovery.fell_back_to_source;

        self.ingest(&mut report).await?;
        self.detect_missing(&mut report).await?;

        let cache = Arc::new(ClassificationCache::load(&self.catalog).await?);
        let classifier = Classifier::new(&self.config.classifier, self.model.clone(), cache.clone());
        let version = classifier.effective_version(&taxonomy);

        let mut work = self
            .catalog
            .documents_needing_work(&version, options.reprocess)
            .await?;
        if let Some(limit) = options.limit {
            work.truncate(limit);
        }
        tracing::info!(documents = work.len(), taxonomy = %version, "processing documents");

        let worker = Arc::new(Worker {
            catalog: self.catalog.clone(),
            extractor: Extractor::new(&self.config.extraction),
            classifier,
            organizer,
            unclassified_root: self.catalog.unclassified_root().await?,
            taxonomy,
            rules,
            version,
        });

        let fatal = self.process(&worker, work, cancel.clone(), &mut report).await;
        report.model_calls = worker.classifier.calls();

        match cache.flush(&self.catalog).await {
            Ok(n) if n > 0 => tracing::debug!(entries = n, "classification cache flushed"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not flush classification cache"),
        }

        if let Some(e) = fatal {
            bail!("catalog store failure, batch halted: {}", e);
        }

        if report.cancelled || *cancel.borrow() {
            report.cancelled = true;
            tracing::warn!("batch cancelled, graph rebuild skipped");
            return Ok(report);
        }

        let builder = GraphBuilder::new(&self.config, self.catalog.clone());
        let rebuilt = if options.full_graph || rules_changed {
            builder.rebuild_full().await
        } else {
            builder.rebuild_incremental(&BTreeSet::new()).await
        };
        match rebuilt {
            Ok(graph) => report.graph = Some(graph),
            Err(e) => {
                tracing::warn!(error = %e, "graph rebuild failed, will retry on next run");
                report.graph_error = Some(e.to_string());
            }
        }

        Ok(report)
    }

    async fn ingest(&self, report: &mut BatchReport) -> Result<()> {
        let config = self.config.clone();
        let scan = tokio::task::spawn_blocking(move || scan_library(&config)).await??;
        report.scanned = scan.files.len();
        report.issues.extend(scan.skipped);

        for file in &scan.files {
            match self
                .catalog
                .ingest_file(&file.path, &file.content_hash, file.size)
                .await?
            {
                IngestOutcome::Created(id) => {
                    tracing::debug!(document = id, path = %file.path.display(), "registered");
                    report.created += 1;
                }
                IngestOutcome::Existing(_) => {}
                IngestOutcome::Duplicate { id, existing } => {
                    tracing::info!(
                        document = id,
                        path = %file.path.display(),
                        existing = %existing,
                        "duplicate content, skipping"
                    );
                    report.duplicates += 1;
                }
                IngestOutcome::Revived(id) => {
                    tracing::info!(document = id, path = %file.path.display(), "missing document reappeared");
                    report.revived += 1;
                }
            }
        }
        Ok(())
    }

    /// A document whose canonical file is gone falls back to its source
    /// when that still exists and is tombstoned otherwise.
    async fn detect_missing(&self, report: &mut BatchReport) -> Result<()> {
        let mut gone = Vec::new();
        for tracked in self.catalog.tracked_files().await? {
            if tracked.missing || tracked.file_path.exists() {
                continue;
            }
            if tracked.file_path != tracked.source_path && tracked.source_path.exists() {
                self.catalog.fall_back_to_source(tracked.id).await?;
                report.fell_back_to_source += 1;
                continue;
            }
            tracing::info!(document = tracked.id, path = %tracked.file_path.display(), "file missing");
            gone.push(tracked.id);
        }
        report.marked_missing = self.catalog.mark_missing(&gone).await?;
        Ok(())
    }

    /// Runs the worker pool. Returns the store error that halted the batch,
    /// if any.
    async fn process(
        &self,
        worker: &Arc<Worker>,
        work: Vec<WorkItem>,
        cancel: watch::Receiver<bool>,
        report: &mut BatchReport,
    ) -> Option<StoreError> {
        let slots = Arc::new(Semaphore::new(self.config.pipeline.workers));
        let (halt_tx, halt_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let mut fatal = None;

        for item in work {
            if *cancel.borrow() || fatal.is_some() {
                report.cancelled |= *cancel.borrow();
                break;
            }
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let worker = worker.clone();
            let cancel = cancel.clone();
            let halt = halt_rx.clone();
            let span = tracing::info_span!("document", id = item.id);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let stop = move || *cancel.borrow() || *halt.borrow();
                    let id = item.id;
                    let path = item.file_path.display().to_string();
                    (id, path, worker.process_document(item, stop).await)
                }
                .instrument(span),
            );

            while let Some(joined) = tasks.try_join_next() {
                fold(joined, report, &mut fatal, &halt_tx);
            }
        }

        drain(&mut tasks, |joined| fold(joined, report, &mut fatal, &halt_tx)).await;
        fatal
    }
}

type TaskResult = (DocumentId, String, Result<DocumentOutcome, StoreError>);

/// Waits for every spawned worker. Workers are never aborted: a halted
/// batch stops them at their next stage boundary, and a placement already
/// under way runs through its commit.
async fn drain<T: 'static>(
    tasks: &mut JoinSet<T>,
    mut on_done: impl FnMut(Result<T, tokio::task::JoinError>),
) {
    while let Some(joined) = tasks.join_next().await {
        on_done(joined);
    }
}

fn fold(
    joined: Result<TaskResult, tokio::task::JoinError>,
    report: &mut BatchReport,
    fatal: &mut Option<StoreError>,
    halt: &watch::Sender<bool>,
) {
    if let Some(e) = collect(joined, report) {
        if fatal.is_none() {
            tracing::error!(error = %e, "catalog store failure, halting batch");
            let _ = halt.send(true);
            *fatal = Some(e);
        }
    }
}

/// Folds one finished task into the report. Returns a corruption error
/// that must halt the batch.
fn collect(
    joined: Result<TaskResult, tokio::task::JoinError>,
    report: &mut BatchReport,
) -> Option<StoreError> {
    let outcome = match joined {
        Ok((_, _, Ok(outcome))) => outcome,
        Ok((_, _, Err(e))) if e.is_corruption() => return Some(e),
        Ok((id, path, Err(e))) => {
            tracing::warn!(document = id, path = %path, error = %e, "document failed");
            report
                .issues
                .push(DocumentIssue::new(Some(id), path, Stage::Store, e));
            return None;
        }
        Err(e) => {
            tracing::error!(error = %e, "worker task failed");
            return None;
        }
    };

    report.issues.extend(outcome.issues);
    if outcome.cancelled {
        report.cancelled = true;
        return None;
    }
    report.processed += 1;
    if outcome.cache_hit {
        report.cache_hits += 1;
    }
    match outcome.status {
        Some(ClassificationStatus::Classified) => report.classified += 1,
        Some(ClassificationStatus::Unclassified) => report.unclassified += 1,
        Some(ClassificationStatus::Stale) => report.stale += 1,
        _ => {}
    }
    match outcome.placement {
        Some(PlaceOutcome::Archived(_)) => report.archived += 1,
        Some(PlaceOutcome::Linked(_)) => report.linked += 1,
        Some(PlaceOutcome::AlreadyPlaced(_)) => {}
        None => report.unorganized += 1,
    }
    None
}

impl Worker {
    async fn process_document(
        &self,
        item: WorkItem,
        stop: impl Fn() -> bool,
    ) -> Result<DocumentOutcome, StoreError> {
        let mut outcome = DocumentOutcome::default();
        let path = item.file_path.display().to_string();

        if stop() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        // Extract
        let (metadata, fresh) = match &item.metadata {
            Some(stored) => (stored.clone(), false),
            None => match self.extractor.extract(&item.file_path).await {
                Ok(metadata) => (metadata, true),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "extraction failed, using file name");
                    outcome
                        .issues
                        .push(DocumentIssue::new(Some(item.id), &path, Stage::Extract, &e));
                    (Metadata::from_filename(&file_stem(&item.source_path)), true)
                }
            },
        };

        if stop() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        // Classify
        let mut subject_id = item.subject_id;
        let classification = if item.classification_current(&self.version) {
            outcome.status = Some(item.status);
            None
        } else {
            match self
                .classifier
                .classify(&item.content_hash, &metadata, &self.taxonomy)
                .await
            {
                Ok(result) => {
                    outcome.cache_hit = result.cached;
                    let (subject, status) = match &result.matched {
                        SubjectMatch::MatchedSubject(id) => (*id, ClassificationStatus::Classified),
                        SubjectMatch::NewSubjectProposal(name) => {
                            tracing::info!(proposal = %name, "model proposed a new subject");
                            (
                                self.catalog.ensure_pending_subject(name).await?,
                                ClassificationStatus::Unclassified,
                            )
                        }
                        SubjectMatch::Unclassified => {
                            (self.unclassified_root, ClassificationStatus::Unclassified)
                        }
                    };
                    subject_id = Some(subject);
                    outcome.status = Some(status);
                    let answer = result.answer.as_ref();
                    Some(ClassificationUpdate {
                        subject_id: Some(subject),
                        status,
                        confidence: answer.map(|a| a.confidence),
                        sub_field: answer.and_then(|a| a.sub_field.clone()),
                        paper_type: answer.and_then(|a| a.paper_type.clone()),
                        summary: answer.and_then(|a| a.summary.clone()),
                        taxonomy_version: Some(self.version.clone()),
                    })
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "classification failed, marking stale");
                    outcome
                        .issues
                        .push(DocumentIssue::new(Some(item.id), &path, Stage::Classify, &e));
                    outcome.status = Some(ClassificationStatus::Stale);
                    Some(ClassificationUpdate::stale())
                }
            }
        };

        let update = DocumentUpdate {
            id: item.id,
            metadata: fresh.then(|| {
                let links = AuthorLink::from_names(&metadata.authors, &self.rules);
                (metadata.clone(), links)
            }),
            classification,
            placement: PlacementCommit::Unchanged,
        };

        // A cancelled document keeps nothing from this pass.
        if stop() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        // Organize
        let subject_path = match subject_id {
            Some(id) => self.catalog.subject_path(id).await?,
            None => None,
        }
        .unwrap_or_else(|| UNCLASSIFIED_ROOT.to_string());

        match self
            .organizer
            .place(&item, &subject_path, &metadata.title, update.clone())
            .await
        {
            Ok(placed) => {
                tracing::debug!(path = %placed.path().display(), "placed");
                outcome.placement = Some(placed);
            }
            Err(crate::error::OrganizeError::Store(e)) if e.is_corruption() => return Err(e),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "could not organize document");
                outcome
                    .issues
                    .push(DocumentIssue::new(Some(item.id), &path, Stage::Organize, &e));
                // Nothing new to record when extraction and classification
                // were already current.
                if update.metadata.is_some() || update.classification.is_some() {
                    self.catalog.commit_document(&update).await?;
                }
            }
        }

        Ok(outcome)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// `pw run`
pub async fn run_batch(config: &Config, options: BatchOptions) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let pipeline = Pipeline::from_config(config.clone(), catalog.clone())?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight documents");
            let _ = cancel_tx.send(true);
        }
    });

    let result = pipeline.run(&options, cancel_rx).await;
    catalog.close().await;
    let report = result?;

    println!(
        "scanned {} files: {} new, {} duplicate, {} revived, {} missing",
        report.scanned, report.created, report.duplicates, report.revived, report.marked_missing
    );
    println!(
        "processed {} documents: {} classified, {} unclassified, {} stale",
        report.processed, report.classified, report.unclassified, report.stale
    );
    println!(
        "archive: {} archived, {} linked, {} unorganized",
        report.archived, report.linked, report.unorganized
    );
    println!(
        "classifier: {} model calls, {} cache hits",
        report.model_calls, report.cache_hits
    );
    if let Some(graph) = &report.graph {
        println!(
            "graph ({}): +{} ~{} -{} edges",
            graph.strategy, graph.added, graph.updated, graph.removed
        );
    }
    if let Some(e) = &report.graph_error {
        println!("graph rebuild failed: {}", e);
    }
    if !report.issues.is_empty() {
        println!("{} issue(s):", report.issues.len());
        for issue in &report.issues {
            println!("  {}", issue);
        }
    }
    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
    Ok(())
}
