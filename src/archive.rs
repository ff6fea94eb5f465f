//! Zip aggregate of the original documents under their new names.
//!
//! The archive always carries the submitted bytes, never the backend's copy
//! or a derivative (sample, snapshot). Documents that failed are left out
//! unless `keep_failed` is set, in which case they keep their original name
//! behind an `ERROR_` marker. Cancelled documents are never included.

use crate::error::PipelineError;
use crate::output::{Document, ProcessingResult, ResultStatus};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const FAILED_PREFIX: &str = "ERROR_";

/// Build the zip for one run.
///
/// `documents` must be the slice the results were produced from; results are
/// matched to documents by index.
pub fn build_archive(
    results: &[ProcessingResult],
    documents: &[Document],
    keep_failed: bool,
) -> Result<Vec<u8>, PipelineError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for result in results {
        let name = match (result.status(), result.new_name.as_deref()) {
            (ResultStatus::Renamed, Some(name)) => name.to_string(),
            (ResultStatus::Failed, _) if keep_failed => {
                format!("{FAILED_PREFIX}{}", result.original_name)
            }
            _ => continue,
        };
        let Some(document) = documents.get(result.index) else {
            return Err(PipelineError::ArchiveFailed(format!(
                "no document at index {} for '{}'",
                result.index, result.original_name
            )));
        };

        let entry = unique_name(&name, &mut used);
        writer
            .start_file(entry.as_str(), options)
            .map_err(|e| PipelineError::ArchiveFailed(format!("{entry}: {e}")))?;
        writer
            .write_all(&document.bytes)
            .map_err(|e| PipelineError::ArchiveFailed(format!("{entry}: {e}")))?;
        debug!("Archived {} as {}", document.display_name, entry);
    }

    let cursor = writer
        .finish()
        .map_err(|e| PipelineError::ArchiveFailed(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// `name`, or `stem_2.ext`, `stem_3.ext`… when already taken.
pub(crate) fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    (2..)
        .map(|n| format!("{stem}_{n}{ext}"))
        .find(|candidate| used.insert(candidate.clone()))
        .unwrap_or_else(|| name.to_string())
}
