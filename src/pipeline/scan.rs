//! Repository file discovery.
use crate::indexer::languages::language_for_path;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Directory names never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "bower_components",
    "vendor",
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    ".next",
    "__pycache__",
    ".venv",
    "venv",
];

const TEST_FILE_GLOBS: &[&str] = &[
    "**/*.spec.*",
    "**/*.test.*",
    "**/__tests__/**",
    "**/test_*.py",
    "**/*_test.go",
];

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("repository root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid test file pattern: {0}")]
    Pattern(#[from] globset::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Languages to keep; empty keeps every supported language.
    pub languages: Vec<String>,
    pub include_tests: bool,
    /// Extra directory names to skip.
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Repository-relative, `/` separated.
    pub relative: String,
    pub language: &'static str,
}

fn test_file_matcher() -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in TEST_FILE_GLOBS {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel.to_string_lossy().replace('\\', "/");
    (!rel.is_empty()).then_some(rel)
}

/// Walks `root` and returns the source files worth indexing, sorted by
/// relative path.
///
/// `.gitignore` rules apply. Directories are excluded by whole path segment,
/// so `build/` is skipped but `builder/` is not.
pub fn scan_repository(root: &Path, options: &ScanOptions) -> Result<Vec<ScannedFile>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let tests = test_file_matcher()?;
    let mut excluded: Vec<String> = DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect();
    excluded.extend(options.exclude_dirs.iter().cloned());

    let walk_root = root.to_path_buf();
    let dir_excludes = excluded.clone();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir {
                return true;
            }
            match relative_path(&walk_root, entry.path()) {
                Some(rel) => !rel.split('/').any(|seg| dir_excludes.iter().any(|d| d == seg)),
                None => true,
            }
        })
        .build();

    let mut files = Vec::new();
    let mut skipped_tests = 0usize;

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Walker error: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let Some(relative) = relative_path(root, entry.path()) else {
            continue;
        };
        // Files reached through symlinked dirs still need the segment check
        let segments: Vec<&str> = relative.split('/').collect();
        if segments[..segments.len() - 1]
            .iter()
            .any(|seg| excluded.iter().any(|d| d == seg))
        {
            continue;
        }

        let Some(language) = language_for_path(&relative) else {
            continue;
        };
        if !options.languages.is_empty() && !options.languages.iter().any(|l| l == language) {
            continue;
        }
        if !options.include_tests && tests.is_match(&relative) {
            skipped_tests += 1;
            continue;
        }

        debug!("Found {language} file: {relative}");
        files.push(ScannedFile {
            path: entry.path().to_path_buf(),
            relative,
            language,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    info!(
        "Scanned {}: {} files ({} test files skipped)",
        root.display(),
        files.len(),
        skipped_tests
    );
    Ok(files)
}
