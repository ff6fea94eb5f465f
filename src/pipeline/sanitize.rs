//! Name sanitisation: turn raw model text into a safe `.pdf` file name.
//!
//! Models are asked for a single bare file name, but they still wrap it in
//! code fences, quote it, or append `.pdf` twice. The rules here are cheap and
//! deterministic, and they never interpret the naming grammar itself; they
//! only guarantee a syntactically safe file name.
//!
//! ## Rule Order
//!
//! 1. Drop invisible Unicode (BOM, zero-width spaces) so later trims see it
//! 2. Unwrap an outer code fence, then drop any stray backticks
//! 3. Strip one layer of matching quotes
//! 4. Replace path separators with `-`
//! 5. Strip every trailing `.pdf` (case-insensitive), cap the stem length
//! 6. Reject an empty stem or one containing control characters
//! 7. Append exactly one `.pdf`
//!
//! The output is a fixed point: `sanitize(sanitize(x)) == sanitize(x)`.

use crate::error::DocumentError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest stem kept, in bytes. Common file systems cap names at 255 bytes.
pub const DEFAULT_MAX_STEM_BYTES: usize = 200;

const EXTENSION: &str = ".pdf";

/// Normalises and validates model output into a file name.
#[derive(Debug, Clone, Copy)]
pub struct NameSanitizer {
    max_stem_bytes: usize,
}

impl Default for NameSanitizer {
    fn default() -> Self {
        Self {
            max_stem_bytes: DEFAULT_MAX_STEM_BYTES,
        }
    }
}

impl NameSanitizer {
    pub fn with_max_stem_bytes(max_stem_bytes: usize) -> Self {
        Self {
            max_stem_bytes: max_stem_bytes.max(1),
        }
    }

    pub fn sanitize(&self, raw: &str) -> Result<String, DocumentError> {
        let s = remove_invisible_chars(raw);
        let s = strip_fences(&s);
        let s = strip_quotes(s.trim());
        let s = s.replace(['/', '\\'], "-");

        let stem = strip_pdf_suffixes(&s);
        let stem = strip_pdf_suffixes(cap_bytes(stem, self.max_stem_bytes));

        if stem.is_empty() {
            return Err(invalid(raw, "empty name"));
        }
        if stem.chars().any(char::is_control) {
            return Err(invalid(raw, "contains control characters"));
        }

        Ok(format!("{stem}{EXTENSION}"))
    }
}

/// [`NameSanitizer::sanitize`] with default limits.
pub fn sanitize(raw: &str) -> Result<String, DocumentError> {
    NameSanitizer::default().sanitize(raw)
}

fn invalid(raw: &str, reason: &str) -> DocumentError {
    DocumentError::InvalidName {
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}

// ── Rule 1: invisible characters ─────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 2: fences and backticks ─────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:[A-Za-z]*[ \t]*\r?\n)?(.*?)\r?\n?```$").unwrap());

fn strip_fences(input: &str) -> String {
    let trimmed = input.trim();
    let inner = match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => trimmed,
    };
    inner.replace('`', "")
}

// ── Rule 3: quotes ───────────────────────────────────────────────────────────

fn strip_quotes(input: &str) -> &str {
    for q in ['"', '\''] {
        if input.len() >= 2 && input.starts_with(q) && input.ends_with(q) {
            return input[1..input.len() - 1].trim();
        }
    }
    input
}

// ── Rule 5: suffix and length ────────────────────────────────────────────────

fn strip_pdf_suffixes(input: &str) -> &str {
    let mut s = input.trim();
    while s.len() >= EXTENSION.len()
        && s[s.len() - EXTENSION.len()..].eq_ignore_ascii_case(EXTENSION)
    {
        s = s[..s.len() - EXTENSION.len()].trim();
    }
    s
}

fn cap_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backticked_name_gains_extension() {
        assert_eq!(
            sanitize("  `20250101_QD_1-UBND_abc`  ").unwrap(),
            "20250101_QD_1-UBND_abc.pdf"
        );
    }

    #[test]
    fn existing_extension_is_kept_once() {
        assert_eq!(sanitize("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize("report.pdf.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize("report.PDF").unwrap(), "report.pdf");
        assert_eq!(sanitize("report .pdf .pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn fenced_block_is_unwrapped() {
        let raw = "```text\n20240315_CV_125-UBND_Ke_hoach_Signed.pdf\n```";
        assert_eq!(sanitize(raw).unwrap(), "20240315_CV_125-UBND_Ke_hoach_Signed.pdf");
        assert_eq!(sanitize("```x.pdf```").unwrap(), "x.pdf");
    }

    #[test]
    fn quotes_and_separators() {
        assert_eq!(sanitize("\"abc.pdf\"").unwrap(), "abc.pdf");
        assert_eq!(sanitize("'abc'").unwrap(), "abc.pdf");
        assert_eq!(sanitize("20250101_QD_12/QD-UBND_x").unwrap(), "20250101_QD_12-QD-UBND_x.pdf");
        assert_eq!(sanitize(r"a\b").unwrap(), "a-b.pdf");
    }

    #[test]
    fn invisible_chars_are_dropped() {
        assert_eq!(sanitize("\u{FEFF}abc\u{200B}").unwrap(), "abc.pdf");
    }

    #[test]
    fn empty_results_are_rejected() {
        for raw in ["", "   ", "``", "```\n```", ".pdf", "\"\"", " .PDF.pdf "] {
            match sanitize(raw) {
                Err(DocumentError::InvalidName { reason, .. }) => assert_eq!(reason, "empty name"),
                other => panic!("{raw:?} → {other:?}"),
            }
        }
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(matches!(
            sanitize("line one\nline two"),
            Err(DocumentError::InvalidName { .. })
        ));
        assert!(matches!(sanitize("bad\u{0007}name"), Err(DocumentError::InvalidName { .. })));
    }

    #[test]
    fn long_names_are_capped_on_char_boundary() {
        let s = NameSanitizer::with_max_stem_bytes(5);
        // "é" is two bytes; a cut at byte 5 would split the third one.
        assert_eq!(s.sanitize("ééééé").unwrap(), "éé.pdf");
        assert_eq!(s.sanitize("abcd .pdf").unwrap(), "abcd.pdf");
        assert_eq!(s.sanitize("abcd  xyz").unwrap(), "abcd.pdf");
    }

    #[test]
    fn output_is_a_fixed_point() {
        let inputs = [
            "  `20250101_QD_1-UBND_abc`  ",
            "report.pdf",
            "\"'quoted'\"",
            "```\nname.pdf.PDF\n```",
            "a/b\\c",
            "\"a\".pdf",
            "x .pdf",
        ];
        for raw in inputs {
            let once = sanitize(raw).unwrap();
            assert_eq!(sanitize(&once).unwrap(), once, "not idempotent for {raw:?}");
        }
        let capped = NameSanitizer::with_max_stem_bytes(8);
        let once = capped.sanitize("abcdefg hijk.pdf").unwrap();
        assert_eq!(capped.sanitize(&once).unwrap(), once);
    }
}
