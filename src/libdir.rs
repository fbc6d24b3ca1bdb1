//! Archive-directory context construction
//!
//! Builds a [`ResolutionContext`] from a directory of archive files: scan the
//! directory (optionally recursively), collect files with the configured
//! extensions, sort them for determinism, and hand the paths to the context.
//! Pure file I/O; failures surface at build time, before any call runs.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::context::ResolutionContext;
use crate::error::ContextBuildError;

/// Platform dynamic-library suffixes scanned by default.
#[cfg(target_os = "macos")]
const DEFAULT_EXTENSIONS: &[&str] = &["dylib"];
#[cfg(target_os = "windows")]
const DEFAULT_EXTENSIONS: &[&str] = &["dll"];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const DEFAULT_EXTENSIONS: &[&str] = &["so"];

/// Scan description for one archive directory.
pub struct ArchiveScan {
    directory: PathBuf,
    recursive: bool,
    extensions: Vec<String>,
}

impl ArchiveScan {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            recursive: false,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Descend into subdirectories as well.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Replace the archive extensions to collect (without leading dot).
    pub fn extensions(mut self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Collect the archive paths this scan matches, sorted.
    pub fn collect_archives(&self) -> Result<Vec<PathBuf>, ContextBuildError> {
        if !self.directory.exists() {
            return Err(ContextBuildError::DirectoryNotFound(self.directory.clone()));
        }
        if !self.directory.is_dir() {
            return Err(ContextBuildError::NotADirectory(self.directory.clone()));
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut archives = Vec::new();

        for entry in WalkDir::new(&self.directory).max_depth(max_depth) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.matches_extension(entry.path()) {
                archives.push(entry.into_path());
            }
        }

        archives.sort();
        debug!(
            directory = %self.directory.display(),
            recursive = self.recursive,
            count = archives.len(),
            "Collected archive files"
        );
        Ok(archives)
    }

    /// Build a resolution context labeled after the directory, backed by the
    /// scanned archives.
    pub fn build_context(&self) -> Result<ResolutionContext, ContextBuildError> {
        let archives = self.collect_archives()?;
        let label = self.directory.display().to_string();
        info!(
            label = %label,
            entries = archives.len(),
            "Built resolution context from archive directory"
        );
        Ok(ResolutionContext::with_entries(label, archives))
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed == ext))
            .unwrap_or(false)
    }
}
