//! # pdfium-auto
//!
//! Find a usable [PDFium](https://pdfium.googlesource.com/pdfium/) shared
//! library for `pdfium-render`, downloading and caching it on first use.
//!
//! pdf-autoname only needs PDFium for its page-sampling, snapshot and text
//! excerpt strategies. Plain uploads never touch it.
//!
//! ## Lookup order
//!
//! 1. `PDFIUM_LIB_PATH`, when it names an existing file.
//! 2. `{cache}/pdf-autoname/pdfium-{VERSION}/` (see [`pdfium_cache_dir`]).
//! 3. A download of the platform archive from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries),
//!    unless `PDFIUM_AUTO_OFFLINE` is set.
//!
//! The resolved path is remembered for the rest of the process.
//!
//! ```rust,no_run
//! use pdfium_auto::{bind_pdfium_from_path, bind_pdfium_silent, ensure_pdfium_library};
//!
//! let pdfium = bind_pdfium_silent().expect("PDFium unavailable");
//!
//! let path = ensure_pdfium_library(Some(&|done, total| {
//!     eprint!("\r{done}/{} bytes", total.unwrap_or(0));
//! }))
//! .expect("download failed");
//! let pdfium = bind_pdfium_from_path(&path).expect("bind failed");
//! ```
//!
//! ## Environment
//!
//! - `PDFIUM_LIB_PATH`: existing library to use as-is.
//! - `PDFIUM_AUTO_CACHE_DIR`: base directory replacing the platform cache dir.
//! - `PDFIUM_AUTO_OFFLINE`: `1`/`true`/`yes` forbids downloading.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;

/// pdfium-binaries release tag (`chromium/{VERSION}`).
pub const PDFIUM_VERSION: &str = "7690";

pub const LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";
pub const CACHE_DIR_ENV: &str = "PDFIUM_AUTO_CACHE_DIR";
pub const OFFLINE_ENV: &str = "PDFIUM_AUTO_OFFLINE";

const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";
const CACHE_NAMESPACE: &str = "pdf-autoname";
const CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum PdfiumAutoError {
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Nothing cached and downloading is switched off.
    #[error(
        "PDFium not found at {} and PDFIUM_AUTO_OFFLINE forbids downloading it",
        .expected.display()
    )]
    Offline { expected: PathBuf },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Archive extraction failed: {0}")]
    Extract(String),

    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlatformInfo {
    /// Release asset, e.g. `pdfium-linux-x64.tgz`.
    archive_name: &'static str,
    /// Path of the library inside the archive.
    lib_path_in_archive: &'static str,
    /// File name written to the cache.
    lib_name: &'static str,
}

const MAC: (&str, &str) = ("lib/libpdfium.dylib", "libpdfium.dylib");
const LINUX: (&str, &str) = ("lib/libpdfium.so", "libpdfium.so");
const WINDOWS: (&str, &str) = ("bin/pdfium.dll", "pdfium.dll");

fn platform_for(os: &str, arch: &str) -> Result<PlatformInfo, PdfiumAutoError> {
    let (archive_name, (lib_path_in_archive, lib_name)) = match (os, arch) {
        ("macos", "aarch64") => ("pdfium-mac-arm64.tgz", MAC),
        ("macos", "x86_64") => ("pdfium-mac-x64.tgz", MAC),
        ("linux", "x86_64") => ("pdfium-linux-x64.tgz", LINUX),
        ("linux", "aarch64") => ("pdfium-linux-arm64.tgz", LINUX),
        ("windows", "x86_64") => ("pdfium-win-x64.tgz", WINDOWS),
        ("windows", "aarch64") => ("pdfium-win-arm64.tgz", WINDOWS),
        ("windows", "x86") => ("pdfium-win-x86.tgz", WINDOWS),
        (os, arch) => {
            return Err(PdfiumAutoError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
        }
    };
    Ok(PlatformInfo {
        archive_name,
        lib_path_in_archive,
        lib_name,
    })
}

fn detect_platform() -> Result<PlatformInfo, PdfiumAutoError> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

/// Per-version cache directory for the library.
///
/// `{PDFIUM_AUTO_CACHE_DIR or platform cache dir}/pdf-autoname/pdfium-{VERSION}`.
pub fn pdfium_cache_dir() -> PathBuf {
    cache_dir_from(std::env::var_os(CACHE_DIR_ENV))
}

fn cache_dir_from(override_dir: Option<OsString>) -> PathBuf {
    let base = match override_dir {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
            .unwrap_or_else(std::env::temp_dir),
    };
    base.join(CACHE_NAMESPACE).join(format!("pdfium-{PDFIUM_VERSION}"))
}

fn flag_is_set(value: Option<OsString>) -> bool {
    value
        .and_then(|v| v.into_string().ok())
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Where to look, read once from the environment.
#[derive(Debug, Clone)]
struct Settings {
    lib_override: Option<PathBuf>,
    cache_dir: PathBuf,
    offline: bool,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            lib_override: std::env::var_os(LIB_PATH_ENV)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            cache_dir: pdfium_cache_dir(),
            offline: flag_is_set(std::env::var_os(OFFLINE_ENV)),
        }
    }

    fn existing(&self, info: &PlatformInfo) -> Option<PathBuf> {
        if let Some(path) = self.lib_override.as_ref().filter(|p| p.exists()) {
            return Some(path.clone());
        }
        Some(self.cache_dir.join(info.lib_name)).filter(|p| p.exists())
    }
}

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

/// `true` when a library is available without any network access.
pub fn is_pdfium_cached() -> bool {
    cached_pdfium_path().is_some()
}

/// The library that would be used right now, if one exists on disk.
pub fn cached_pdfium_path() -> Option<PathBuf> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Some(path.clone());
    }
    let info = detect_platform().ok()?;
    Settings::from_env().existing(&info)
}

/// Make sure the library exists locally and return its path.
///
/// `on_progress` receives `(bytes_downloaded, total_bytes)` while a download
/// is running. Safe to call from several threads; once a path is resolved no
/// further lookups happen in this process.
pub fn ensure_pdfium_library(
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, PdfiumAutoError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve_or_download(&Settings::from_env(), detect_platform()?, on_progress)?;
    Ok(RESOLVED_PATH.get_or_init(|| path).clone())
}

/// Bind to PDFium, downloading it first when needed.
pub fn bind_pdfium(
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Pdfium, PdfiumAutoError> {
    let lib_path = ensure_pdfium_library(on_progress)?;
    bind_pdfium_from_path(&lib_path)
}

/// [`bind_pdfium`] without progress reporting.
pub fn bind_pdfium_silent() -> Result<Pdfium, PdfiumAutoError> {
    bind_pdfium(None)
}

/// Bind to the library at `path`, bypassing lookup and download.
pub fn bind_pdfium_from_path(path: &Path) -> Result<Pdfium, PdfiumAutoError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| PdfiumAutoError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn resolve_or_download(
    settings: &Settings,
    info: PlatformInfo,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, PdfiumAutoError> {
    if let Some(path) = settings.existing(&info) {
        return Ok(path);
    }

    let lib_path = settings.cache_dir.join(info.lib_name);
    if settings.offline {
        return Err(PdfiumAutoError::Offline { expected: lib_path });
    }
    if let Some(missing) = &settings.lib_override {
        eprintln!(
            "pdfium-auto: {LIB_PATH_ENV} '{}' not found; downloading …",
            missing.display()
        );
    }

    let url = format!("{BASE_URL}/chromium%2F{PDFIUM_VERSION}/{}", info.archive_name);
    std::fs::create_dir_all(&settings.cache_dir).map_err(PdfiumAutoError::CacheDir)?;

    let archive_bytes = download_bytes(&url, on_progress)?;
    extract_library(&archive_bytes, info.lib_path_in_archive, &lib_path)?;
    Ok(lib_path)
}

/// Read `url` into memory, reporting progress every 64 KiB.
fn download_bytes(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, PdfiumAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| PdfiumAutoError::Download(e.to_string()))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| PdfiumAutoError::Download(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(PdfiumAutoError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(total.unwrap_or(35 * 1024 * 1024) as usize);
    let mut chunk = vec![0u8; CHUNK];
    let mut downloaded: u64 = 0;

    loop {
        match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PdfiumAutoError::Download(format!("Read error: {e}"))),
        }
    }

    Ok(buf)
}

/// Unpack one file of a `.tgz` to `dest_path`.
///
/// The file is written next to its destination and renamed into place, so an
/// interrupted extraction never leaves a truncated library that later runs
/// would treat as cached.
fn extract_library(
    archive_bytes: &[u8],
    lib_path_in_archive: &str,
    dest_path: &Path,
) -> Result<(), PdfiumAutoError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let extract = |e: std::io::Error| PdfiumAutoError::Extract(e.to_string());
    let mut archive = Archive::new(GzDecoder::new(archive_bytes));

    for entry in archive.entries().map_err(extract)? {
        let mut entry = entry.map_err(extract)?;
        if entry.path().map_err(extract)?.to_string_lossy() != lib_path_in_archive {
            continue;
        }

        let partial = dest_path.with_extension("part");
        entry
            .unpack(&partial)
            .map_err(|e| PdfiumAutoError::Extract(format!("Unpack failed: {e}")))?;
        return std::fs::rename(&partial, dest_path).map_err(PdfiumAutoError::CacheDir);
    }

    Err(PdfiumAutoError::Extract(format!(
        "Library '{lib_path_in_archive}' not found in archive"
    )))
}
