//! pdfium work: leading-page samples, first-page snapshots, first-page text.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is not safe
//! to call from async contexts. Every entry point here moves its work onto
//! the blocking pool so rendering never stalls the Tokio workers that keep
//! other documents' polls and retries moving.
//!
//! All functions report failures as a plain detail string; the caller decides
//! whether that is fatal (snapshot) or triggers a fallback (sample).

use image::DynamicImage;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Bind to pdfium, fetching it into the local cache on first use.
///
/// The CLI pre-fetches with a progress bar; library callers pay the download
/// here, inside the blocking pool. A system-wide pdfium is the last resort.
fn bind_pdfium() -> Result<Pdfium, String> {
    match pdfium_auto::bind_pdfium_silent() {
        Ok(pdfium) => Ok(pdfium),
        Err(auto) => Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|_| format!("pdfium unavailable: {auto}")),
    }
}

async fn blocking<T, F>(task: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| format!("pdfium task panicked: {e}"))?
}

/// Build a new PDF holding only the first `pages` pages.
///
/// Documents already within the limit are returned unchanged.
pub async fn sample_leading_pages(bytes: Arc<[u8]>, pages: u16) -> Result<Vec<u8>, String> {
    blocking(move || sample_leading_pages_blocking(&bytes, pages)).await
}

fn sample_leading_pages_blocking(bytes: &[u8], pages: u16) -> Result<Vec<u8>, String> {
    let pdfium = bind_pdfium()?;
    let source = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("cannot open PDF: {e:?}"))?;

    let total = source.pages().len();
    if total == 0 {
        return Err("PDF has no pages".into());
    }
    if total <= pages {
        debug!("Sample covers the whole document ({} pages)", total);
        return Ok(bytes.to_vec());
    }

    let mut sample = pdfium
        .create_new_pdf()
        .map_err(|e| format!("cannot create sample PDF: {e:?}"))?;
    sample
        .pages_mut()
        .copy_page_range_from_document(&source, 0..=(pages - 1), 0)
        .map_err(|e| format!("cannot copy pages: {e:?}"))?;
    let out = sample
        .save_to_bytes()
        .map_err(|e| format!("cannot save sample PDF: {e:?}"))?;

    debug!("Sampled {}/{} pages → {} bytes", pages, total, out.len());
    Ok(out)
}

/// Rasterise page one with its longest edge capped at `max_pixels`.
pub async fn render_first_page(bytes: Arc<[u8]>, max_pixels: u32) -> Result<DynamicImage, String> {
    blocking(move || render_first_page_blocking(&bytes, max_pixels)).await
}

fn render_first_page_blocking(bytes: &[u8], max_pixels: u32) -> Result<DynamicImage, String> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("cannot open PDF: {e:?}"))?;

    let page = document
        .pages()
        .get(0)
        .map_err(|e| format!("cannot read page 1: {e:?}"))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let image = page
        .render_with_config(&render_config)
        .map_err(|e| format!("cannot render page 1: {e:?}"))?
        .as_image();

    debug!("Rendered page 1 → {}x{} px", image.width(), image.height());
    Ok(image)
}

/// Text layer of page one, cut to at most `max_chars` characters.
///
/// An empty string means the page has no text layer (typically a scan).
pub async fn first_page_text(bytes: Arc<[u8]>, max_chars: usize) -> Result<String, String> {
    blocking(move || first_page_text_blocking(&bytes, max_chars)).await
}

fn first_page_text_blocking(bytes: &[u8], max_chars: usize) -> Result<String, String> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("cannot open PDF: {e:?}"))?;

    let page = document
        .pages()
        .get(0)
        .map_err(|e| format!("cannot read page 1: {e:?}"))?;
    let text = page
        .text()
        .map_err(|e| format!("cannot read text layer: {e:?}"))?
        .all();

    Ok(truncate_chars(text.trim(), max_chars).to_string())
}

/// Cut `s` to `max_chars` characters without splitting a code point.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
