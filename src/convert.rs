//! The conversion orchestrator.
//!
//! [`Converter`] owns the recognition backend and the configuration and
//! drives one request through the pipeline:
//!
//! ```text
//! validate ─▶ admit ─▶ workspace ─▶ stage input ─▶ rasterise | single page
//!                                                     │
//!            for each page, in order: preprocess ─▶ recognize ─▶ sanitize
//! ```
//!
//! Any failure aborts the request: no partial page list is returned. The
//! workspace is released on every path after it was acquired, and the
//! extension check runs before one is acquired at all.

use crate::backend::{resolve_backend, BackendConfig, RecognitionBackend};
use crate::config::ConversionConfig;
use crate::error::{ConversionError, Stage, StageError, StageResultExt};
use crate::output::ConversionResult;
use crate::pipeline::input::{self, ConversionRequest, InputKind};
use crate::pipeline::recognize::RecognitionClient;
use crate::pipeline::render::{self, PageImage};
use crate::pipeline::{preprocess, sanitize};
use crate::progress::ProgressCallback;
use crate::workspace::{self, Workspace};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Converts PDFs and images to LaTeX, one request at a time or many at once.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
///
/// # Example
///
/// ```rust,no_run
/// use edgequake_img2latex::{BackendConfig, ConversionConfig, ConversionRequest, Converter};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let converter = Converter::from_backend_config(&BackendConfig::Auto, ConversionConfig::default())?;
///     let bytes = std::fs::read("lecture.pdf")?;
///     let result = converter.convert(ConversionRequest::upload("lecture.pdf", bytes)).await?;
///     for (i, page) in result.latex_content.iter().enumerate() {
///         println!("% page {}\n{}", i + 1, page);
///     }
///     Ok(())
/// }
/// ```
pub struct Converter {
    client: RecognitionClient,
    backend_name: String,
    config: ConversionConfig,
    admission: Semaphore,
    max_in_flight: u32,
    closed: AtomicBool,
}

impl Converter {
    pub fn new(backend: Arc<dyn RecognitionBackend>, config: ConversionConfig) -> Self {
        let max_in_flight = config.max_concurrent_conversions.clamp(1, u32::MAX as usize) as u32;
        Self {
            client: RecognitionClient::new(Arc::clone(&backend), &config),
            backend_name: backend.name().to_string(),
            admission: Semaphore::new(max_in_flight as usize),
            max_in_flight,
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Resolve a backend from `backend` and build a converter around it.
    pub fn from_backend_config(
        backend: &BackendConfig,
        config: ConversionConfig,
    ) -> Result<Self, StageError> {
        Ok(Self::new(resolve_backend(backend)?, config))
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Convert one request.
    pub async fn convert(
        &self,
        request: ConversionRequest,
    ) -> Result<ConversionResult, ConversionError> {
        let filename = request.filename();
        let kind = InputKind::from_filename(&filename).at(Stage::Validate)?;

        if self.closed.load(Ordering::SeqCst) {
            return Err(shut_down());
        }
        let _permit = self.admission.acquire().await.map_err(|_| shut_down())?;

        let start = Instant::now();
        info!("Starting conversion: {} ({:?})", filename, kind);

        let workspace = workspace::acquire(self.config.workspace_root.clone())
            .await
            .at(Stage::Workspace)?;

        let outcome = self.run(kind, request, &workspace).await;
        workspace::release(workspace).await;

        match &outcome {
            Ok(result) => info!(
                "Conversion complete: {} — {} page(s) in {:?}",
                filename,
                result.page_count(),
                start.elapsed()
            ),
            Err(e) => warn!("Conversion failed: {} — {}", filename, e),
        }
        outcome
    }

    /// Read a local file and convert it as an upload.
    pub async fn convert_path(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ConversionResult, ConversionError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        InputKind::from_filename(&filename).at(Stage::Validate)?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StageError::NotFound {
                    path: path.to_path_buf(),
                },
                _ => StageError::Resource(format!("Failed to read {}: {}", path.display(), e)),
            })
            .at(Stage::Input)?;

        self.convert(ConversionRequest::upload(filename, bytes)).await
    }

    /// Download `url` and convert it. The extension of the last path segment
    /// decides the input kind.
    pub async fn convert_url(
        &self,
        url: impl Into<String>,
    ) -> Result<ConversionResult, ConversionError> {
        self.convert(ConversionRequest::url(url)).await
    }

    /// Stop admitting conversions and wait for in-flight ones to finish.
    ///
    /// Later calls to [`Converter::convert`] fail with a resource error.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down converter, draining in-flight conversions");
        // Fair semaphore: this waits behind every conversion already queued.
        if let Ok(drained) = self.admission.acquire_many(self.max_in_flight).await {
            self.admission.close();
            drop(drained);
        }
        debug!("Converter drained");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn run(
        &self,
        kind: InputKind,
        request: ConversionRequest,
        workspace: &Workspace,
    ) -> Result<ConversionResult, ConversionError> {
        let staged = input::stage_input(
            request.source,
            workspace.path(),
            self.config.download_timeout_secs,
        )
        .await
        .at(Stage::Input)?;

        let pages = match kind {
            InputKind::Pdf => render::rasterize(&staged, workspace.path(), self.config.zoom_factor)
                .await
                .at(Stage::Rasterize)?,
            InputKind::Image => vec![PageImage::single(staged)],
        };

        let total = pages.len();
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_conversion_start(total);
        }

        let latex_content = if self.config.page_concurrency <= 1 {
            self.process_sequential(pages, workspace.path()).await?
        } else {
            self.process_buffered(pages, workspace.path()).await?
        };

        if let Some(cb) = cb {
            cb.on_conversion_complete(total);
        }
        Ok(ConversionResult { latex_content })
    }

    /// One page at a time, in page order.
    async fn process_sequential(
        &self,
        pages: Vec<PageImage>,
        out_dir: &Path,
    ) -> Result<Vec<String>, ConversionError> {
        let total = pages.len();
        let mut results = Vec::with_capacity(total);
        for page in pages {
            results.push(self.process_page(page, total, out_dir).await?);
        }
        Ok(results)
    }

    /// Up to `page_concurrency` pages in flight; `buffered` yields results in
    /// submission order, so the output still follows page order.
    async fn process_buffered(
        &self,
        pages: Vec<PageImage>,
        out_dir: &Path,
    ) -> Result<Vec<String>, ConversionError> {
        let total = pages.len();
        stream::iter(
            pages
                .into_iter()
                .map(|page| self.process_page(page, total, out_dir)),
        )
        .buffered(self.config.page_concurrency)
        .try_collect()
        .await
    }

    async fn process_page(
        &self,
        page: PageImage,
        total: usize,
        out_dir: &Path,
    ) -> Result<String, ConversionError> {
        let number = page.number;
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_page_start(number, total);
        }

        let result = self
            .page_pipeline(&page, out_dir, cb)
            .await
            .map_err(|e| e.on_page(number));

        if let Some(cb) = cb {
            match &result {
                Ok(latex) => cb.on_page_complete(number, total, latex.len()),
                Err(e) => cb.on_page_error(number, total, &e.to_string()),
            }
        }
        result
    }

    async fn page_pipeline(
        &self,
        page: &PageImage,
        out_dir: &Path,
        cb: Option<&ProgressCallback>,
    ) -> Result<String, ConversionError> {
        if let Some(threshold) = self.config.blur_threshold {
            self.check_blur(page, threshold, cb).await;
        }

        let processed = preprocess::preprocess(
            &page.path,
            out_dir,
            self.config.profile,
            self.config.max_dimension,
        )
        .await
        .at(Stage::Preprocess)?;

        let raw = self
            .client
            .recognize(&processed)
            .await
            .at(Stage::Recognize)?;

        Ok(sanitize::sanitize_with(&raw, self.config.sanitize))
    }

    /// Informational only: a blurry page is reported, never rejected.
    async fn check_blur(&self, page: &PageImage, threshold: f64, cb: Option<&ProgressCallback>) {
        let path = page.path.clone();
        let measured = tokio::task::spawn_blocking(move || preprocess::blur_variance(&path)).await;

        match measured {
            Ok(Ok(variance)) if variance < threshold => {
                warn!(
                    "Page {} looks blurry (Laplacian variance {:.1} < {:.1}); recognition may be poor",
                    page.number, variance, threshold
                );
                if let Some(cb) = cb {
                    cb.on_page_blurry(page.number, variance);
                }
            }
            Ok(Ok(variance)) => debug!("Page {} sharpness: {:.1}", page.number, variance),
            Ok(Err(e)) => debug!("Page {} blur check skipped: {}", page.number, e),
            Err(e) => debug!("Page {} blur check task failed: {}", page.number, e),
        }
    }
}

fn shut_down() -> ConversionError {
    ConversionError::new(
        Stage::Admission,
        StageError::Resource("converter is shut down".into()),
    )
}
