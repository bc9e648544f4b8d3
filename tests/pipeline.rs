mod common;

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use paperweave::catalog::Catalog;
use paperweave::classifier::{DisabledModel, SubjectModel};
use paperweave::error::{ClassificationError, Stage};
use paperweave::models::ClassificationStatus;
use paperweave::pipeline::{BatchOptions, BatchReport, Pipeline};
use paperweave_core::graph::{EdgeKey, EdgeKind, NodeRef};
use paperweave_core::response::ClassifyRequest;
use tokio::sync::watch;

use common::TestLibrary;

/// Answers by title keyword; can be switched to reject every call.
#[derive(Default)]
struct KeywordModel {
    calls: AtomicUsize,
    failing: AtomicBool,
}

#[async_trait]
impl SubjectModel for KeywordModel {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn complete(&self, request: &ClassifyRequest) -> Result<String, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClassificationError::Rejected {
                status: 401,
                body: "invalid key".into(),
            });
        }
        let subject = if request.title.contains("Neural") {
            "Machine Learning"
        } else if request.title.contains("Protein") {
            "Biology"
        } else {
            "unknown"
        };
        Ok(format!(
            r#"{{"subject_name": "{}", "confidence": 0.9, "paper_type": "article"}}"#,
            subject
        ))
    }
}

async fn run(lib: &TestLibrary, model: Arc<dyn SubjectModel>) -> (Catalog, BatchReport) {
    run_with(lib, "openai", model, &BatchOptions::default(), false).await
}

async fn run_with(
    lib: &TestLibrary,
    provider: &str,
    model: Arc<dyn SubjectModel>,
    options: &BatchOptions,
    cancelled: bool,
) -> (Catalog, BatchReport) {
    let config = lib.config(provider);
    let catalog = Catalog::open(&config).await.unwrap();
    let pipeline = Pipeline::new(config, catalog.clone(), model);
    let (_tx, rx) = watch::channel(cancelled);
    let report = pipeline.run(options, rx).await.unwrap();
    (catalog, report)
}

fn three_papers(lib: &TestLibrary) {
    lib.add_paper("a", "Graph Neural Networks", "Ada Lovelace, Alan Turing");
    lib.add_paper("b", "Graph Neural Network Survey", "Ada Lovelace, Grace Hopper");
    lib.add_paper("c", "Protein Folding Dynamics", "Rosalind Franklin");
}

#[tokio::test]
async fn batch_classifies_archives_and_links() {
    let lib = TestLibrary::new();
    three_papers(&lib);
    let model = Arc::new(KeywordModel::default());

    let (catalog, report) = run(&lib, model.clone()).await;
    assert_eq!(report.scanned, 3);
    assert_eq!(report.created, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.classified, 3);
    assert_eq!(report.archived, 3);
    assert!(report.issues.is_empty(), "{:?}", report.issues);
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);

    let ml = "Computer Science/Machine Learning";
    assert!(lib.archived(ml, "Graph Neural Networks").exists());
    assert!(lib.archived(ml, "Graph Neural Network Survey").exists());
    assert!(lib.archived("Biology", "Protein Folding Dynamics").exists());
    // Copy mode leaves the input untouched.
    assert!(lib.input.join("a.pdf").exists());

    let filed = catalog.documents_by_subject(ml, false).await.unwrap();
    assert_eq!(filed.len(), 2);
    let recursive = catalog
        .documents_by_subject("Computer Science", true)
        .await
        .unwrap();
    assert_eq!(recursive.len(), 2);

    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(doc.title, "Graph Neural Networks");
    assert_eq!(doc.status, ClassificationStatus::Classified);
    assert_eq!(doc.subject_path.as_deref(), Some(ml));
    assert_eq!(doc.paper_type.as_deref(), Some("article"));
    assert_eq!(doc.authors.len(), 2);

    let edges = catalog.edges().await.unwrap();
    let coauthor = EdgeKey::new(NodeRef::Document(1), NodeRef::Document(2), EdgeKind::Coauthor);
    assert!((edges[&coauthor] - 1.0 / 3.0).abs() < 1e-6);
    let no_link = EdgeKey::new(NodeRef::Document(1), NodeRef::Document(3), EdgeKind::Coauthor);
    assert!(!edges.contains_key(&no_link));
    let subject_links = edges
        .keys()
        .filter(|k| k.kind == EdgeKind::Subject)
        .count();
    assert_eq!(subject_links, 3);

    // Only the two graph papers are similar enough to link.
    let similar: Vec<_> = edges
        .iter()
        .filter(|(k, _)| k.kind == EdgeKind::Similarity)
        .collect();
    assert_eq!(similar.len(), 1, "{:?}", similar);
    let (key, weight) = similar[0];
    assert_eq!(
        *key,
        EdgeKey::new(NodeRef::Document(1), NodeRef::Document(2), EdgeKind::Similarity)
    );
    assert!(*weight > 0.2 && *weight <= 1.0);
    assert!(report.graph.is_some());
}

#[tokio::test]
async fn second_run_does_no_work() {
    let lib = TestLibrary::new();
    three_papers(&lib);
    let model = Arc::new(KeywordModel::default());

    let (catalog, _) = run(&lib, model.clone()).await;
    let edges = catalog.edges().await.unwrap();
    let generation = catalog.generation().await.unwrap();
    catalog.close().await;

    let (catalog, report) = run(&lib, model.clone()).await;
    assert_eq!(report.processed, 0);
    assert_eq!(report.created, 0);
    assert_eq!(report.model_calls, 0);
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(catalog.edges().await.unwrap(), edges);
    assert_eq!(catalog.generation().await.unwrap(), generation);
}

#[tokio::test]
async fn unplaceable_document_is_not_recommitted_on_rerun() {
    let lib = TestLibrary::new();
    lib.add_paper("c", "Protein Folding Dynamics", "Rosalind Franklin");
    // A plain file where the subject directory should go.
    fs::create_dir_all(&lib.output).unwrap();
    fs::write(lib.output.join("Biology"), b"not a directory").unwrap();
    let model = Arc::new(KeywordModel::default());

    let (catalog, report) = run(&lib, model.clone()).await;
    assert_eq!(report.classified, 1);
    assert_eq!(report.unorganized, 1);
    assert_eq!(report.issues[0].stage, Stage::Organize);
    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(doc.status, ClassificationStatus::Classified);
    assert!(doc.archive_path.is_none());
    let generation = catalog.generation().await.unwrap();
    let edges = catalog.edges().await.unwrap();
    catalog.close().await;

    let (catalog, report) = run(&lib, model.clone()).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.unorganized, 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(catalog.generation().await.unwrap(), generation);
    assert_eq!(catalog.edges().await.unwrap(), edges);
    if let Some(graph) = report.graph {
        assert_eq!(graph.changed, 0);
    }
}

#[tokio::test]
async fn duplicate_content_is_registered_once() {
    let lib = TestLibrary::new();
    let a = lib.add_paper("a", "Protein Folding Dynamics", "Rosalind Franklin");
    fs::copy(&a, lib.input.join("copy-of-a.pdf")).unwrap();

    let (catalog, report) = run(&lib, Arc::new(KeywordModel::default())).await;
    assert_eq!(report.scanned, 2);
    assert_eq!(report.created, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(catalog.stats().await.unwrap().documents, 1);
}

#[tokio::test]
async fn model_failure_marks_stale_and_recovers_later() {
    let lib = TestLibrary::new();
    lib.add_paper("c", "Protein Folding Dynamics", "Rosalind Franklin");
    let model = Arc::new(KeywordModel::default());
    model.failing.store(true, Ordering::SeqCst);

    let (catalog, report) = run(&lib, model.clone()).await;
    assert_eq!(report.stale, 1);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].stage, Stage::Classify);
    // Rejections are not retried.
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(doc.status, ClassificationStatus::Stale);
    assert_eq!(doc.subject_path.as_deref(), Some("Unclassified"));
    assert_eq!(doc.title, "Protein Folding Dynamics");
    let parked = lib.archived("Unclassified", "Protein Folding Dynamics");
    assert!(parked.exists());
    catalog.close().await;

    model.failing.store(false, Ordering::SeqCst);
    let (catalog, report) = run(&lib, model.clone()).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.classified, 1);
    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(doc.status, ClassificationStatus::Classified);
    assert_eq!(doc.subject_path.as_deref(), Some("Biology"));
    assert!(lib.archived("Biology", "Protein Folding Dynamics").exists());
    assert!(!parked.exists());
}

#[tokio::test]
async fn cancelled_batch_commits_nothing_per_document() {
    let lib = TestLibrary::new();
    three_papers(&lib);
    let model = Arc::new(KeywordModel::default());

    let (catalog, report) = run_with(
        &lib,
        "openai",
        model.clone(),
        &BatchOptions::default(),
        true,
    )
    .await;
    assert!(report.cancelled);
    assert_eq!(report.processed, 0);
    assert!(report.graph.is_none());
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    assert!(catalog.edges().await.unwrap().is_empty());
    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(doc.status, ClassificationStatus::Pending);
    assert!(doc.archive_path.is_none());
    assert_eq!(fs::read_dir(&lib.output).unwrap().count(), 0);
    catalog.close().await;

    let (_catalog, report) = run(&lib, model).await;
    assert!(!report.cancelled);
    assert_eq!(report.processed, 3);
    assert_eq!(report.archived, 3);
}

/// Classifies like [`KeywordModel`], then requests cancellation.
struct CancelAfterAnswer {
    inner: KeywordModel,
    cancel: watch::Sender<bool>,
}

#[async_trait]
impl SubjectModel for CancelAfterAnswer {
    fn name(&self) -> &str {
        "cancel-after-answer"
    }

    async fn complete(&self, request: &ClassifyRequest) -> Result<String, ClassificationError> {
        let answer = self.inner.complete(request).await;
        let _ = self.cancel.send(true);
        answer
    }
}

#[tokio::test]
async fn mid_batch_cancel_leaves_archive_and_catalog_consistent() {
    let lib = TestLibrary::new();
    three_papers(&lib);
    let config = lib.config("openai");
    let catalog = Catalog::open(&config).await.unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let model = Arc::new(CancelAfterAnswer {
        inner: KeywordModel::default(),
        cancel: cancel_tx,
    });
    let pipeline = Pipeline::new(config, catalog.clone(), model);

    let report = pipeline.run(&BatchOptions::default(), cancel_rx).await.unwrap();
    assert!(report.cancelled);
    assert!(report.processed < 3);
    assert!(report.graph.is_none());

    let mut recorded = Vec::new();
    for id in 1..=3 {
        let doc = catalog.get_document(id).await.unwrap().unwrap();
        if let Some(path) = doc.archive_path.map(std::path::PathBuf::from) {
            assert!(path.exists(), "{} has no file", path.display());
            recorded.push(path);
        }
    }
    assert_eq!(recorded.len(), report.archived);
    for entry in walkdir::WalkDir::new(&lib.output) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            assert!(
                recorded.iter().any(|p| p == entry.path()),
                "{} has no record",
                entry.path().display()
            );
        }
    }
    assert!(catalog.placements().await.unwrap().is_empty());
    catalog.close().await;

    let (catalog, report) = run(&lib, Arc::new(KeywordModel::default())).await;
    assert!(!report.cancelled);
    for id in 1..=3 {
        let doc = catalog.get_document(id).await.unwrap().unwrap();
        assert!(std::path::Path::new(&doc.archive_path.unwrap()).exists());
    }
}

#[tokio::test]
async fn existing_archive_file_is_never_overwritten() {
    let lib = TestLibrary::new();
    lib.add_paper("c", "Protein Folding Dynamics", "Rosalind Franklin");
    let occupied = lib.archived("Biology", "Protein Folding Dynamics");
    fs::create_dir_all(occupied.parent().unwrap()).unwrap();
    fs::write(&occupied, b"somebody else's file").unwrap();

    let (catalog, report) = run(&lib, Arc::new(KeywordModel::default())).await;
    assert_eq!(report.archived, 1);
    assert_eq!(fs::read(&occupied).unwrap(), b"somebody else's file");

    let doc = catalog.get_document(1).await.unwrap().unwrap();
    let placed = doc.archive_path.unwrap();
    assert!(placed.ends_with("Protein Folding Dynamics_1.pdf"));
    assert_eq!(
        fs::read(&placed).unwrap(),
        fs::read(lib.input.join("c.pdf")).unwrap()
    );
}

#[tokio::test]
async fn disabled_classifier_parks_documents_under_unclassified() {
    let lib = TestLibrary::new();
    lib.add_paper("a", "Graph Neural Networks", "Ada Lovelace");

    let (catalog, report) = run_with(
        &lib,
        "disabled",
        Arc::new(DisabledModel),
        &BatchOptions::default(),
        false,
    )
    .await;
    assert_eq!(report.unclassified, 1);
    assert_eq!(report.model_calls, 0);
    assert!(lib.archived("Unclassified", "Graph Neural Networks").exists());
    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(doc.status, ClassificationStatus::Unclassified);
    assert!(doc.taxonomy_version.unwrap().starts_with("disabled:"));
    catalog.close().await;

    // Enabling the classifier later picks the document up again.
    let model = Arc::new(KeywordModel::default());
    let (catalog, report) = run(&lib, model.clone()).await;
    assert_eq!(report.classified, 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(
        doc.subject_path.as_deref(),
        Some("Computer Science/Machine Learning")
    );
}

#[tokio::test]
async fn unknown_answer_becomes_pending_subject() {
    let lib = TestLibrary::new();
    lib.add_paper("x", "Medieval Trade Routes", "Marco Polo");

    struct History;

    #[async_trait]
    impl SubjectModel for History {
        fn name(&self) -> &str {
            "history"
        }

        async fn complete(&self, _request: &ClassifyRequest) -> Result<String, ClassificationError> {
            Ok(r#"{"subject_name": "Economic History", "confidence": 0.6}"#.into())
        }
    }

    let (catalog, report) = run(&lib, Arc::new(History)).await;
    assert_eq!(report.unclassified, 1);
    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert_eq!(doc.status, ClassificationStatus::Unclassified);
    assert_eq!(
        doc.subject_path.as_deref(),
        Some("Unclassified/Economic History")
    );
    assert!(lib
        .archived("Unclassified/Economic History", "Medieval Trade Routes")
        .exists());
}

#[tokio::test]
async fn vanished_input_is_tombstoned_and_loses_edges() {
    let lib = TestLibrary::new();
    lib.add_paper("a", "Graph Neural Networks", "Ada Lovelace");
    lib.add_paper("b", "Graph Neural Network Survey", "Ada Lovelace");

    // Move mode, so the archive copy is the only one.
    let config_text = lib
        .config_text("openai", "")
        .replace("output_dir = ", "archive_mode = \"move\"\noutput_dir = ");
    let config = paperweave::config::parse_config(&config_text).unwrap();
    let catalog = Catalog::open(&config).await.unwrap();
    let model = Arc::new(KeywordModel::default());
    let pipeline = Pipeline::new(config, catalog.clone(), model);
    let (_tx, rx) = watch::channel(false);
    let report = pipeline.run(&BatchOptions::default(), rx.clone()).await.unwrap();
    assert_eq!(report.archived, 2);
    assert!(!lib.input.join("a.pdf").exists());
    assert!(!catalog.edges().await.unwrap().is_empty());

    let doc = catalog.get_document(1).await.unwrap().unwrap();
    fs::remove_file(doc.archive_path.unwrap()).unwrap();

    let report = pipeline.run(&BatchOptions::default(), rx).await.unwrap();
    assert_eq!(report.marked_missing, 1);
    let doc = catalog.get_document(1).await.unwrap().unwrap();
    assert!(doc.missing);
    let edges = catalog.edges().await.unwrap();
    assert!(edges.keys().all(|k| !k.touches(NodeRef::Document(1))));
}

#[tokio::test]
async fn author_spellings_merge_into_one_coauthor_edge() {
    use paperweave::catalog::{AuthorLink, DocumentUpdate, PlacementCommit};
    use paperweave::graph::GraphBuilder;
    use paperweave_core::models::Metadata;
    use std::path::Path;

    let lib = TestLibrary::new();
    let config = lib.config("disabled");
    let catalog = Catalog::open(&config).await.unwrap();
    let rules = config.authors.rules();

    let papers: [(&str, &str, &[&str]); 2] = [
        ("a", "Sparse Attention", &["J. Smith", "Ada Lovelace"]),
        ("b", "Protein Folding", &["John Smith"]),
    ];
    for (name, title, authors) in papers {
        let id = catalog
            .ingest_file(
                Path::new(&format!("/in/{}.pdf", name)),
                &format!("hash-{}", name),
                1,
            )
            .await
            .unwrap()
            .id();
        let names: Vec<String> = authors.iter().map(|s| s.to_string()).collect();
        let links = AuthorLink::from_names(&names, &rules);
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
    }

    GraphBuilder::new(&config, catalog.clone())
        .rebuild_full()
        .await
        .unwrap();

    assert_eq!(catalog.stats().await.unwrap().authors, 2);
    let smith = catalog.get_document(2).await.unwrap().unwrap().authors;
    assert_eq!(smith.len(), 1);
    assert_eq!(smith[0].display_name, "John Smith");

    let edges = catalog.edges().await.unwrap();
    let coauthor: Vec<_> = edges
        .iter()
        .filter(|(k, _)| k.kind == EdgeKind::Coauthor)
        .collect();
    assert_eq!(coauthor.len(), 1);
    assert!((coauthor[0].1 - 0.5).abs() < 1e-9);
}
