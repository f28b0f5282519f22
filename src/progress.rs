//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each page. The CLI renders them as a
//! progress bar; a server could forward them to a websocket instead.
//!
//! # Example
//!
//! ```rust
//! use edgequake_img2latex::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, latex_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, latex_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it processes each page.
///
/// All methods have no-op defaults so implementors override only what they
/// need. With `page_concurrency > 1` the page events may arrive from several
/// tasks at once, so implementations must be `Send + Sync`.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is recognised.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is preprocessed and sent to the model.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages in the request
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when the blur check flags a page. Conversion continues.
    ///
    /// # Arguments
    /// * `page_num` — 1-indexed page number
    /// * `variance` — measured Laplacian variance
    fn on_page_blurry(&self, page_num: usize, variance: f64) {
        let _ = (page_num, variance);
    }

    /// Called when a page has been recognised and sanitised.
    ///
    /// # Arguments
    /// * `latex_len` — byte length of the page's LaTeX
    fn on_page_complete(&self, page_num: usize, total_pages: usize, latex_len: usize) {
        let _ = (page_num, total_pages, latex_len);
    }

    /// Called when a page fails. The conversion aborts right after.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page succeeded.
    fn on_conversion_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
