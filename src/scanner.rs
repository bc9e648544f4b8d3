//! Input-directory scanner.
//!
//! Walks `library.input_dir` with `walkdir`, filters by the configured
//! include/exclude globs and hashes every candidate with SHA-256. Results
//! are sorted by path so document ids are assigned deterministically.
//! The input tree is never written to.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{DocumentIssue, Stage};

/// A candidate file with its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub content_hash: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<ScannedFile>,
    pub skipped: Vec<DocumentIssue>,
}

pub fn scan_library(config: &Config) -> Result<ScanOutcome> {
    let lib = &config.library;
    let root = &lib.input_dir;
    if !root.is_dir() {
        bail!("library.input_dir does not exist: {}", root.display());
    }

    let include_set = build_globset(&lib.include_globs)?;
    let mut default_excludes = vec!["**/.*".to_string(), "**/*.pwpart".to_string()];
    default_excludes.extend(lib.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let output_dir = lib
        .output_dir
        .canonicalize()
        .unwrap_or_else(|_| lib.output_dir.clone());

    let mut outcome = ScanOutcome::default();

    let walker = WalkDir::new(root)
        .follow_links(lib.follow_symlinks)
        .into_iter()
        .filter_entry(|e| {
            let p = e.path();
            p.canonicalize().map(|c| c != output_dir).unwrap_or(true)
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                outcome
                    .skipped
                    .push(DocumentIssue::new(None, path, Stage::Scan, e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                outcome.skipped.push(DocumentIssue::new(
                    None,
                    path.display().to_string(),
                    Stage::Scan,
                    e,
                ));
                continue;
            }
        };
        if size > lib.max_file_bytes {
            tracing::warn!(path = %path.display(), size, "skipping oversized file");
            outcome.skipped.push(DocumentIssue::new(
                None,
                path.display().to_string(),
                Stage::Scan,
                format!("file is {} bytes, limit is {}", size, lib.max_file_bytes),
            ));
            continue;
        }

        match hash_file(path) {
            Ok(content_hash) => outcome.files.push(ScannedFile {
                path: path.to_path_buf(),
                content_hash,
                size,
            }),
            Err(e) => outcome.skipped.push(DocumentIssue::new(
                None,
                path.display().to_string(),
                Stage::Scan,
                e,
            )),
        }
    }

    // Sort for deterministic ordering
    outcome.files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(outcome)
}

/// SHA-256 hex digest of a file's bytes.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
