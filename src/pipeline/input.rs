//! Input loading: read local files (or every PDF in a directory) into
//! [`Document`]s.
//!
//! Only I/O problems fail here. A file whose bytes are not a PDF still becomes
//! a [`Document`]; ingestion rejects it and the batch reports it as that
//! document's failure.

use crate::error::PipelineError;
use crate::output::Document;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load every path in order. Directories contribute their `*.pdf` entries
/// (non-recursive, sorted by file name).
pub fn load_documents<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Document>, PipelineError> {
    let mut documents = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            for file in pdfs_in_dir(path)? {
                documents.push(load_document(&file)?);
            }
        } else {
            documents.push(load_document(path)?);
        }
    }
    Ok(documents)
}

/// Read one file, validating existence and permissions.
///
/// The display name is the file name; the id is the full path so documents
/// with equal names from different directories stay distinguishable.
pub fn load_document(path: &Path) -> Result<Document, PipelineError> {
    let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;

    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let document = Document::new(display_name, bytes).with_id(path.display().to_string());

    debug!("Loaded {} ({} bytes)", path.display(), document.bytes.len());
    Ok(document)
}

fn pdfs_in_dir(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && has_pdf_extension(p))
        .collect();
    files.sort();
    Ok(files)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"))
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    match e.kind() {
        ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
    }
}
