//! Error types for the edgequake-img2latex library.
//!
//! Two layers reflect where a failure is observed:
//!
//! * [`StageError`] — what went wrong inside one pipeline stage (a missing
//!   file, an undecodable image, a provider that timed out). Every stage
//!   function returns `Result<_, StageError>`.
//!
//! * [`ConversionError`] — what the caller sees. The orchestrator tags the
//!   failing [`StageError`] with the [`Stage`] it came from, so a single
//!   message names both the step and the root cause.
//!
//! There is no partial-success type: a failure on any page aborts the whole
//! conversion and no LaTeX is returned alongside an error.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A failure inside a single pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The declared filename has an extension the pipeline cannot handle.
    #[error("Invalid file format '{filename}'. Please upload a PDF or image file (PNG, JPG, or JPEG).")]
    UnsupportedFormat { filename: String },

    /// A file expected by the stage does not exist.
    #[error("File not found: '{path}'")]
    NotFound { path: PathBuf },

    /// A file exists but has zero bytes.
    #[error("File is empty: '{path}'")]
    EmptyFile { path: PathBuf },

    /// HTTP download of a URL input failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Document / image errors ───────────────────────────────────────────
    /// The image could not be decoded or re-encoded.
    #[error("Could not read the image file '{path}': {detail}")]
    Decode { path: PathBuf, detail: String },

    /// The document could not be opened, or a page failed to render.
    #[error("Rasterization failed for '{path}': {detail}")]
    Rasterization { path: PathBuf, detail: String },

    /// No pdfium shared library could be bound.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumUnavailable(String),

    // ── Recognition errors ────────────────────────────────────────────────
    /// Transport failure, non-2xx status or malformed reply from the backend.
    #[error("Recognition backend error: {message}")]
    ExternalService { message: String },

    /// The backend did not answer within the per-call budget.
    #[error("Recognition call timed out after {secs}s")]
    Timeout { secs: u64 },

    // ── Resource / config errors ──────────────────────────────────────────
    /// Scratch space could not be allocated, or the converter is shut down.
    #[error("Resource error: {0}")]
    Resource(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    /// Coarse classification, stable across message wording changes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            StageError::NotFound { .. } => ErrorKind::NotFound,
            StageError::EmptyFile { .. } => ErrorKind::EmptyFile,
            StageError::Decode { .. } => ErrorKind::Decode,
            StageError::Rasterization { .. } | StageError::PdfiumUnavailable(_) => {
                ErrorKind::Rasterization
            }
            StageError::ExternalService { .. }
            | StageError::Timeout { .. }
            | StageError::DownloadFailed { .. } => ErrorKind::ExternalService,
            StageError::Resource(_) => ErrorKind::Resource,
            StageError::InvalidConfig(_) | StageError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// The error taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedFormat,
    NotFound,
    EmptyFile,
    Decode,
    Rasterization,
    ExternalService,
    Resource,
    Internal,
}

/// The pipeline step a [`ConversionError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Admission,
    Workspace,
    Input,
    Rasterize,
    Preprocess,
    Recognize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "input validation",
            Stage::Admission => "admission",
            Stage::Workspace => "workspace allocation",
            Stage::Input => "input staging",
            Stage::Rasterize => "PDF rasterization",
            Stage::Preprocess => "image preprocessing",
            Stage::Recognize => "LaTeX recognition",
        };
        f.write_str(name)
    }
}

/// The single error returned by [`crate::convert::Converter::convert`].
#[derive(Debug, Error)]
#[error("Conversion failed during {stage}{}: {source}", page_suffix(.page))]
pub struct ConversionError {
    stage: Stage,
    page: Option<usize>,
    #[source]
    source: StageError,
}

fn page_suffix(page: &Option<usize>) -> String {
    page.map(|p| format!(" (page {p})")).unwrap_or_default()
}

impl ConversionError {
    pub fn new(stage: Stage, source: StageError) -> Self {
        Self {
            stage,
            page: None,
            source,
        }
    }

    /// Attach the 1-based page number that failed.
    pub fn on_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn page(&self) -> Option<usize> {
        self.page
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    pub fn stage_error(&self) -> &StageError {
        &self.source
    }

    /// True when the caller sent something the pipeline rejects outright
    /// (the 4xx class); everything else is a server-side failure.
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::UnsupportedFormat
    }
}

/// Extension trait: tag a stage result with the stage it came from.
pub(crate) trait StageResultExt<T> {
    fn at(self, stage: Stage) -> Result<T, ConversionError>;
}

impl<T> StageResultExt<T> for Result<T, StageError> {
    fn at(self, stage: Stage) -> Result<T, ConversionError> {
        self.map_err(|e| ConversionError::new(stage, e))
    }
}
