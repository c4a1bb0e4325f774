//! Loading documents from the filesystem.
//!
//! Plain text and markdown are read directly. PDF and Word files must be
//! converted to text by an external tool first.

use crate::chunking::Document;
use crate::error::{DocentError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Extensions that can be ingested directly.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Extensions recognised as documents but needing conversion to text.
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &["pdf", "docx"];

/// A file to ingest and the source id it is indexed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the directory being ingested, `/`-separated; the bare
    /// file name for files named directly.
    pub source_id: String,
}

impl SourceFile {
    /// A file named directly, identified by its file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DocentError::InvalidInput(format!("Invalid file name: {}", path.display())))?
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            source_id,
        })
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Whether a directory walk should pick up this file.
fn is_document(path: &Path) -> bool {
    extension(path)
        .map(|e| TEXT_EXTENSIONS.contains(&e.as_str()) || CONVERTIBLE_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false)
}

/// Decode file contents as UTF-8, falling back to Latin-1.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| char::from(b)).collect(),
    }
}

/// Load one file as a document.
///
/// The title is the file stem.
pub fn load_document(file: &SourceFile) -> Result<Document> {
    let path = &file.path;
    let ext = extension(path).unwrap_or_default();
    if CONVERTIBLE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DocentError::UnsupportedFormat(format!(
            "{}: convert .{} files to text or markdown before ingesting",
            path.display(),
            ext
        )));
    }
    if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DocentError::UnsupportedFormat(format!(
            "{}: expected one of {}",
            path.display(),
            TEXT_EXTENSIONS.join(", ")
        )));
    }

    let title = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
    let text = decode(std::fs::read(path)?);
    debug!("Loaded {} ({} chars)", file.source_id, text.chars().count());

    Ok(Document::new(file.source_id.clone(), title, text))
}

/// Expand files and directories into the documents to ingest, sorted by source id.
///
/// Directories are walked recursively without following symlinks; hidden
/// entries are skipped. Explicit file arguments are kept even if their format
/// is unsupported, so the caller can report them. Two different files that
/// would share a source id are rejected.
pub fn discover(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    let mut found = Vec::new();

    for path in paths {
        if path.is_dir() {
            walk(path, &mut found);
        } else if path.exists() {
            found.push(SourceFile::from_path(path)?);
        } else {
            return Err(DocentError::InvalidInput(format!(
                "Path not found: {}",
                path.display()
            )));
        }
    }

    found.sort_by(|a, b| a.source_id.cmp(&b.source_id).then_with(|| a.path.cmp(&b.path)));
    found.dedup();

    if let Some(pair) = found.windows(2).find(|w| w[0].source_id == w[1].source_id) {
        return Err(DocentError::InvalidInput(format!(
            "{} and {} would both be indexed as '{}'; ingest their parent directory instead",
            pair[0].path.display(),
            pair[1].path.display(),
            pair[0].source_id
        )));
    }

    Ok(found)
}

fn walk(root: &Path, found: &mut Vec<SourceFile>) {
    let entries = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            if entry.path_is_symlink() {
                debug!("Not following symlink {}", entry.path().display());
            }
            continue;
        }
        if !is_document(entry.path()) {
            warn!("Skipping unsupported file {}", entry.path().display());
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let source_id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        found.push(SourceFile {
            path: entry.into_path(),
            source_id,
        });
    }
}
