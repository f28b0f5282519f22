//! # edgequake-img2latex
//!
//! Convert photos, scans and PDFs of handwritten or printed pages into
//! compilable LaTeX using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Classical OCR reads characters, not structure: fractions, integrals and
//! aligned equations come out as a flat string of symbols. Instead this crate
//! rasterises each page, cleans the image up just enough, and asks a VLM to
//! write the LaTeX document a human typesetter would, one document per page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload / URL
//!  │
//!  ├─ 1. Validate   .pdf / .png / .jpg / .jpeg only, before any I/O
//!  ├─ 2. Workspace  private temp dir, removed on every exit path
//!  ├─ 3. Render     PDF pages → PNG via pdfium (spawn_blocking)
//!  ├─ 4. Prepare    bound to 2000 px, optional binarise, blur check
//!  ├─ 5. Recognize  one VLM call per page, under a timeout
//!  └─ 6. Sanitize   strip ```latex fences
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_img2latex::{BackendConfig, ConversionConfig, Converter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from IMG2LATEX_PROVIDER / OPENAI_API_KEY / …
//!     let converter = Converter::from_backend_config(&BackendConfig::Auto, ConversionConfig::default())?;
//!     let result = converter.convert_path("whiteboard.jpg").await?;
//!     println!("{}", result.latex_content[0]);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2latex` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-img2latex = { version = "0.1", default-features = false }
//! ```
//!
//! ## Native dependency
//!
//! PDF input needs the pdfium shared library at runtime. It is looked up via
//! `PDFIUM_LIB_PATH`, then the working directory, then the system library
//! path. Image-only use never loads it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    resolve_backend, BackendConfig, ChatCompletionsBackend, ProviderBackend, RecognitionBackend,
    RecognitionRequest,
};
pub use config::{ConversionConfig, ConversionConfigBuilder, PreprocessProfile, SanitizePolicy};
pub use convert::Converter;
pub use error::{ConversionError, ErrorKind, Stage, StageError};
pub use output::{ConversionResponse, ConversionResult, ErrorResponse};
pub use pipeline::encode::EncodedImage;
pub use pipeline::input::{ConversionRequest, InputKind, InputSource};
pub use pipeline::preprocess::{is_blurry, laplacian_variance};
pub use pipeline::render::PageImage;
pub use pipeline::sanitize::{sanitize, sanitize_with};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use workspace::Workspace;
