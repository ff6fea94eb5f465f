//! Extraction instructions sent with every generation request.
//!
//! Callers can override the default via
//! [`crate::config::RenameConfig::instruction`]; the constants here are used
//! only when no override is provided.

/// Default instruction describing the target naming grammar.
///
/// The model is asked for exactly one line so the sanitiser only has to deal
/// with stray formatting, not prose.
pub const DEFAULT_INSTRUCTION: &str = r#"Task: give this administrative document a short, structured file name.

Format: <DATE8>_<DOCTYPE>_<DOCNUMBER>_<SUMMARY>_<STATUS>.pdf

Rules:
- DATE8: the issuance date as 8 digits, YYYYMMDD (e.g. 20251231).
- DOCTYPE: a short code such as QD, TTr, CV, TB, GP, HD, BB, BC.
- DOCNUMBER: the issuing number with every "/" replaced by "-" (e.g. 125-UBND).
- SUMMARY: the subject in unaccented words joined by "_".
- STATUS: the literal word Signed.

Return ONLY the single file name ending in .pdf. No quotes, no code fences, no explanation."#;

/// Preamble for the text-excerpt strategy, placed before the document text.
pub const EXCERPT_HEADING: &str = "Document text:";

/// Substituted when a page has no extractable text layer (typically a scan).
pub const UNREADABLE_TEXT_NOTE: &str =
    "(scanned document: the text layer is empty or unreadable)";

/// Build the text part for the excerpt strategy.
pub fn excerpt_message(excerpt: &str) -> String {
    let body = if excerpt.trim().is_empty() {
        UNREADABLE_TEXT_NOTE
    } else {
        excerpt
    };
    format!("{EXCERPT_HEADING}\n\"\"\"\n{body}\n\"\"\"")
}
