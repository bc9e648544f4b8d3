//! Archive organizer.
//!
//! Places a classified document at
//! `output_dir/<subject segments>/<sanitized title>.pdf` with a two-phase
//! move:
//!
//! 1. reserve the name in `placements` through the catalog writer;
//! 2. copy the source to a hidden `.<uuid>.pwpart` file next to the target
//!    and fsync it;
//! 3. publish with `hard_link`, which refuses to replace an existing name;
//! 4. commit the record update and drop the reservation in one transaction;
//! 5. remove the old file only after the commit (move mode, or relocation).
//!
//! A failure before step 4 removes whatever was published and the
//! reservation. [`Organizer::recover`] reconciles leftovers from a crash
//! by content hash.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::catalog::{Catalog, DocumentUpdate, PlacementCommit, WorkItem};
use crate::config::{ArchiveMode, Config};
use crate::error::{OrganizeError, StoreError};
use crate::scanner::hash_file;

const MAX_NAME_CHARS: usize = 80;
const MAX_CANDIDATES: usize = 1000;
const TEMP_SUFFIX: &str = "pwpart";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// A new archive file was published.
    Archived(PathBuf),
    /// An identical file already existed at the target and was adopted.
    Linked(PathBuf),
    /// The document already lives at its target.
    AlreadyPlaced(PathBuf),
}

impl PlaceOutcome {
    pub fn path(&self) -> &Path {
        match self {
            PlaceOutcome::Archived(p) | PlaceOutcome::Linked(p) | PlaceOutcome::AlreadyPlaced(p) => {
                p
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub orphans_removed: usize,
    pub reservations_released: usize,
    pub temp_files_removed: usize,
    pub fell_back_to_source: usize,
}

pub struct Organizer {
    catalog: Catalog,
    output_root: PathBuf,
    mode: ArchiveMode,
}

enum Publish {
    Published,
    Occupied,
}

impl Organizer {
    pub fn new(config: &Config, catalog: Catalog) -> Self {
        Self {
            catalog,
            output_root: config.library.output_dir.clone(),
            mode: config.library.archive_mode,
        }
    }

    /// Target directory for a subject path.
    pub fn subject_dir(&self, subject_path: &str) -> PathBuf {
        let mut dir = self.output_root.clone();
        for segment in subject_path.split('/').filter(|s| !s.trim().is_empty()) {
            dir.push(sanitize(segment));
        }
        dir
    }

    /// Places the document and commits `update` together with the new
    /// location. On error nothing is committed and no file is left behind.
    pub async fn place(
        &self,
        item: &WorkItem,
        subject_path: &str,
        title: &str,
        mut update: DocumentUpdate,
    ) -> Result<PlaceOutcome, OrganizeError> {
        let dir = self.subject_dir(subject_path);
        let base = sanitize(title);
        let source = item.file_path.clone();

        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(OrganizeError::SourceMissing(source));
        }

        for n in 0..MAX_CANDIDATES {
            let candidate = dir.join(candidate_name(&base, n));

            if item.archive_path.as_deref() == Some(candidate.as_path()) && candidate.exists() {
                update.placement = PlacementCommit::Unchanged;
                self.catalog.commit_document(&update).await?;
                return Ok(PlaceOutcome::AlreadyPlaced(candidate));
            }

            if !self
                .catalog
                .reserve_placement(item.id, &candidate, &item.content_hash)
                .await?
            {
                continue;
            }

            if candidate.exists() {
                let existing = blocking(&candidate, {
                    let c = candidate.clone();
                    move || hash_file(&c)
                })
                .await;
                match existing {
                    Ok(hash) if hash == item.content_hash => {
                        update.placement = PlacementCommit::Linked(candidate.clone());
                        if let Err(e) = self.catalog.commit_document(&update).await {
                            self.release(item).await;
                            return Err(e.into());
                        }
                        self.after_commit(item, &candidate).await;
                        return Ok(PlaceOutcome::Linked(candidate));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        self.release(item).await;
                        return Err(e);
                    }
                }
            }

            let published = blocking(&candidate, {
                let (source, dir, candidate) = (source.clone(), dir.clone(), candidate.clone());
                move || publish(&source, &dir, &candidate)
            })
            .await;
            match published {
                Ok(Publish::Published) => {}
                Ok(Publish::Occupied) => continue,
                Err(e) => {
                    self.release(item).await;
                    return Err(e);
                }
            }

            update.placement = PlacementCommit::Archived(candidate.clone());
            if let Err(e) = self.catalog.commit_document(&update).await {
                if let Err(rm) = fs::remove_file(&candidate) {
                    tracing::warn!(path = %candidate.display(), error = %rm, "could not remove unpublished archive file");
                }
                self.release(item).await;
                return Err(e.into());
            }
            self.after_commit(item, &candidate).await;
            return Ok(PlaceOutcome::Archived(candidate));
        }

        self.release(item).await;
        Err(OrganizeError::UnresolvedCollision(
            dir.join(candidate_name(&base, 0)),
        ))
    }

    async fn release(&self, item: &WorkItem) {
        if let Err(e) = self.catalog.release_placement(item.id).await {
            tracing::warn!(document = item.id, error = %e, "could not release placement");
        }
    }

    /// Old copies are removed only once the new location is committed.
    async fn after_commit(&self, item: &WorkItem, placed: &Path) {
        let mut stale = Vec::new();
        if let Some(old) = &item.archive_path {
            if old != placed {
                stale.push(old.clone());
            }
        }
        if self.mode == ArchiveMode::Move
            && item.file_path == item.source_path
            && item.source_path != placed
        {
            stale.push(item.source_path.clone());
        }
        for path in stale {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "removed superseded file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove superseded file")
                }
            }
        }
    }

    /// Reconciles the archive tree with the catalog after a crash.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();

        for row in self.catalog.placements().await? {
            let target = &row.target_path;
            if target.exists() && self.catalog.path_owner(target).await?.is_none() {
                let same = {
                    let t = target.clone();
                    tokio::task::spawn_blocking(move || hash_file(&t))
                        .await
                        .ok()
                        .and_then(Result::ok)
                };
                if same.as_deref() == Some(row.content_hash.as_str()) {
                    match tokio::fs::remove_file(target).await {
                        Ok(()) => report.orphans_removed += 1,
                        Err(e) => {
                            tracing::warn!(path = %target.display(), error = %e, "could not remove orphaned archive file")
                        }
                    }
                }
            }
            self.catalog.release_placement(row.document_id).await?;
            report.reservations_released += 1;
        }

        let root = self.output_root.clone();
        let temps = tokio::task::spawn_blocking(move || stray_temp_files(&root))
            .await
            .unwrap_or_default();
        for temp in temps {
            match tokio::fs::remove_file(&temp).await {
                Ok(()) => report.temp_files_removed += 1,
                Err(e) => tracing::warn!(path = %temp.display(), error = %e, "could not remove temp file"),
            }
        }

        for tracked in self.catalog.tracked_files().await? {
            if tracked.missing {
                continue;
            }
            if let Some(archive) = &tracked.archive_path {
                if !archive.exists() && tracked.source_path.exists() {
                    self.catalog.fall_back_to_source(tracked.id).await?;
                    report.fell_back_to_source += 1;
                    tracing::info!(
                        document = tracked.id,
                        archive = %archive.display(),
                        "archive copy vanished, falling back to source"
                    );
                }
            }
        }

        Ok(report)
    }
}

/// Replaces characters that are unsafe in file names, collapses
/// whitespace, trims dots and spaces, and caps the length.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_NAME_CHARS).collect();
    let trimmed = capped.trim_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

fn candidate_name(base: &str, n: usize) -> String {
    if n == 0 {
        format!("{}.pdf", base)
    } else {
        format!("{}_{}.pdf", base, n)
    }
}

async fn blocking<T, F>(path: &Path, f: F) -> Result<T, OrganizeError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(OrganizeError::from_io(path, e)),
        Err(join) => Err(OrganizeError::Io {
            path: path.to_path_buf(),
            source: io::Error::other(join.to_string()),
        }),
    }
}

/// Copies `source` into a temp file in `dir` and publishes it at `target`
/// without ever replacing an existing file.
fn publish(source: &Path, dir: &Path, target: &Path) -> io::Result<Publish> {
    fs::create_dir_all(dir)?;
    let temp = dir.join(format!(".{}.{}", uuid::Uuid::new_v4(), TEMP_SUFFIX));

    let result = (|| -> io::Result<Publish> {
        let mut input = File::open(source)?;
        let mut output = OpenOptions::new().write(true).create_new(true).open(&temp)?;
        io::copy(&mut input, &mut output)?;
        output.sync_all()?;
        drop(output);

        match fs::hard_link(&temp, target) {
            Ok(()) => Ok(Publish::Published),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(Publish::Occupied),
            Err(e) => {
                // Filesystems without hard links: guarded rename.
                tracing::debug!(error = %e, "hard_link unsupported, falling back to rename");
                if target.exists() {
                    Ok(Publish::Occupied)
                } else {
                    fs::rename(&temp, target)?;
                    Ok(Publish::Published)
                }
            }
        }
    })();

    if temp.exists() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn stray_temp_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with('.') && name.ends_with(&format!(".{}", TEMP_SUFFIX))
        })
        .map(|e| e.into_path())
        .collect()
}

/// `pw recover`
pub async fn run_recover(config: &Config) -> anyhow::Result<()> {
    let catalog = Catalog::open(config).await?;
    let organizer = Organizer::new(config, catalog.clone());
    let report = organizer.recover().await;
    catalog.close().await;
    let report = report?;

    println!("reservations released: {}", report.reservations_released);
    println!("orphaned archive files removed: {}", report.orphans_removed);
    println!("temp files removed: {}", report.temp_files_removed);
    println!("fell back to source: {}", report.fell_back_to_source);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use paperweave_core::models::{ClassificationStatus, Metadata};

    use super::*;
    use crate::catalog::test_support::{config_in, open_temp};
    use crate::catalog::ClassificationUpdate;
    use tempfile::TempDir;

    async fn setup(mode: ArchiveMode) -> (TempDir, Catalog, Organizer, Config) {
        let (dir, catalog) = open_temp().await;
        let mut cfg = config_in(&dir);
        cfg.library.archive_mode = mode;
        let organizer = Organizer::new(&cfg, catalog.clone());
        (dir, catalog, organizer, cfg)
    }

    async fn work_item(catalog: &Catalog, cfg: &Config, name: &str, bytes: &[u8]) -> WorkItem {
        let path = cfg.library.input_dir.join(name);
        fs::write(&path, bytes).unwrap();
        let hash = hash_file(&path).unwrap();
        catalog.ingest_file(&path, &hash, bytes.len() as u64).await.unwrap();
        catalog
            .documents_needing_work("v", false)
            .await
            .unwrap()
            .into_iter()
            .find(|w| w.content_hash == hash)
            .unwrap()
    }

    fn update(item: &WorkItem) -> DocumentUpdate {
        DocumentUpdate {
            id: item.id,
            metadata: Some((Metadata::from_filename("x"), Vec::new())),
            classification: Some(ClassificationUpdate {
                subject_id: None,
                status: ClassificationStatus::Unclassified,
                confidence: None,
                sub_field: None,
                paper_type: None,
                summary: None,
                taxonomy_version: Some("v".into()),
            }),
            placement: PlacementCommit::Unchanged,
        }
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize("a/b: c?"), "a_b_ c_");
        assert_eq!(sanitize("  ..hidden.. "), "hidden");
        assert_eq!(sanitize("..."), "untitled");
        assert_eq!(sanitize("tab\there"), "tab_here");
        assert_eq!(sanitize(&"x".repeat(200)).chars().count(), MAX_NAME_CHARS);
    }

    #[tokio::test]
    async fn copy_mode_archives_and_keeps_source() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Copy).await;
        let item = work_item(&catalog, &cfg, "a.pdf", b"alpha").await;

        let out = org
            .place(&item, "CS/ML", "Sparse: Attention?", update(&item))
            .await
            .unwrap();
        let expected = cfg.library.output_dir.join("CS/ML/Sparse_ Attention_.pdf");
        assert_eq!(out, PlaceOutcome::Archived(expected.clone()));
        assert_eq!(fs::read(&expected).unwrap(), b"alpha");
        assert!(item.source_path.exists());
        assert!(catalog.placements().await.unwrap().is_empty());

        let doc = catalog.get_document(item.id).await.unwrap().unwrap();
        assert_eq!(doc.file_path, expected.to_string_lossy());
        assert_eq!(doc.archive_path.as_deref(), Some(doc.file_path.as_str()));
        assert!(stray_temp_files(&cfg.library.output_dir).is_empty());
    }

    #[tokio::test]
    async fn occupied_target_gets_suffix_and_is_never_overwritten() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Copy).await;
        let target_dir = cfg.library.output_dir.join("Bio");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(target_dir.join("Paper.pdf"), b"someone else").unwrap();

        let item = work_item(&catalog, &cfg, "a.pdf", b"mine").await;
        let out = org.place(&item, "Bio", "Paper", update(&item)).await.unwrap();
        assert_eq!(out, PlaceOutcome::Archived(target_dir.join("Paper_1.pdf")));
        assert_eq!(fs::read(target_dir.join("Paper.pdf")).unwrap(), b"someone else");
    }

    #[tokio::test]
    async fn identical_file_at_target_is_linked() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Copy).await;
        let target_dir = cfg.library.output_dir.join("Bio");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(target_dir.join("Paper.pdf"), b"same").unwrap();

        let item = work_item(&catalog, &cfg, "a.pdf", b"same").await;
        let out = org.place(&item, "Bio", "Paper", update(&item)).await.unwrap();
        assert_eq!(out, PlaceOutcome::Linked(target_dir.join("Paper.pdf")));
        assert_eq!(fs::read_dir(&target_dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn move_mode_removes_source_after_commit() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Move).await;
        let item = work_item(&catalog, &cfg, "a.pdf", b"alpha").await;
        let out = org.place(&item, "Bio", "Paper", update(&item)).await.unwrap();
        assert!(out.path().exists());
        assert!(!item.source_path.exists());
    }

    #[tokio::test]
    async fn relocation_removes_old_archive_and_is_idempotent() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Copy).await;
        let item = work_item(&catalog, &cfg, "a.pdf", b"alpha").await;
        let first = org.place(&item, "Bio", "Paper", update(&item)).await.unwrap();

        let moved = catalog
            .documents_needing_work("v", true)
            .await
            .unwrap()
            .remove(0);
        let again = org.place(&moved, "Bio", "Paper", update(&moved)).await.unwrap();
        assert_eq!(again, PlaceOutcome::AlreadyPlaced(first.path().to_path_buf()));

        let second = org.place(&moved, "Chem", "Paper", update(&moved)).await.unwrap();
        assert!(second.path().exists());
        assert!(!first.path().exists());
    }

    #[tokio::test]
    async fn missing_source_fails_without_side_effects() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Copy).await;
        let item = work_item(&catalog, &cfg, "a.pdf", b"alpha").await;
        fs::remove_file(&item.source_path).unwrap();

        let err = org.place(&item, "Bio", "Paper", update(&item)).await.unwrap_err();
        assert!(matches!(err, OrganizeError::SourceMissing(_)));
        assert!(catalog.placements().await.unwrap().is_empty());
        let doc = catalog.get_document(item.id).await.unwrap().unwrap();
        assert!(doc.archive_path.is_none());
    }

    #[tokio::test]
    async fn recovery_removes_orphans_and_temp_files() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Copy).await;
        let item = work_item(&catalog, &cfg, "a.pdf", b"alpha").await;

        // Simulate a crash between publish and commit.
        let target = cfg.library.output_dir.join("Bio/Paper.pdf");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"alpha").unwrap();
        fs::write(target.with_file_name(".dead.pwpart"), b"partial").unwrap();
        assert!(catalog
            .reserve_placement(item.id, &target, &item.content_hash)
            .await
            .unwrap());

        let report = org.recover().await.unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.reservations_released, 1);
        assert_eq!(report.temp_files_removed, 1);
        assert!(!target.exists());
        assert!(item.source_path.exists());
        assert!(catalog.placements().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovery_falls_back_when_archive_vanishes() {
        let (_dir, catalog, org, cfg) = setup(ArchiveMode::Copy).await;
        let item = work_item(&catalog, &cfg, "a.pdf", b"alpha").await;
        let placed = org.place(&item, "Bio", "Paper", update(&item)).await.unwrap();
        fs::remove_file(placed.path()).unwrap();

        let report = org.recover().await.unwrap();
        assert_eq!(report.fell_back_to_source, 1);
        let doc = catalog.get_document(item.id).await.unwrap().unwrap();
        assert_eq!(doc.file_path, item.source_path.to_string_lossy());
        assert!(doc.archive_path.is_none());
    }
}
