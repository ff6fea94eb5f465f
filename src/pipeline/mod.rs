//! Pipeline stages for renaming a batch of documents.
//!
//! Each submodule implements exactly one step, so each can be tested against
//! a scripted backend without the others.
//!
//! ## Data Flow
//!
//! ```text
//!            once per run
//! resolve ─────────────────┐
//!                          ▼
//! input ──▶ ingest ──▶ extract ──▶ sanitize
//! (files)   (upload,   (generate,   (file name)
//!            poll)      retry)
//! ```
//!
//! 1. [`input`]    — read paths and directories into documents
//! 2. [`resolve`]  — choose the run's model once and cache it
//! 3. [`ingest`]   — upload (or sample, render, excerpt) and wait for the
//!    asset to become usable; uses [`render`] and [`encode`] for the
//!    derivative strategies, which run pdfium in `spawn_blocking`
//! 4. [`extract`]  — generation with transient-error retry
//! 5. [`sanitize`] — deterministic cleanup of the model's answer
//!
//! [`wait`] holds the cancellable wait every stage pauses through.

pub mod encode;
pub mod extract;
pub mod ingest;
pub mod input;
pub mod render;
pub mod resolve;
pub mod sanitize;
pub mod wait;
