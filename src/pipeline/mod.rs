//! Pipeline stages for image/PDF-to-LaTeX conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested without the others and without a live model.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ preprocess ──▶ encode ──▶ recognize ──▶ sanitize
//! (upload/URL) (pdfium)  (resize/binarise) (base64)  (VLM)        (fences)
//! ```
//!
//! 1. [`input`]      — validate the extension and stage the bytes in the workspace
//! 2. [`render`]     — rasterise PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`preprocess`] — bound the image size, optionally binarise, blur check
//! 4. [`encode`]     — base64-wrap the processed file for the request body
//! 5. [`recognize`]  — one model call per page under a timeout; the only stage
//!    with network I/O besides URL download
//! 6. [`sanitize`]   — strip the code fences models wrap around LaTeX

pub mod encode;
pub mod input;
pub mod preprocess;
pub mod recognize;
pub mod render;
pub mod sanitize;
