//! PDF rasterisation: render every page to a PNG in the workspace via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is CPU-bound
//! and not async-aware. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so request-handling worker threads never stall on a render.
//!
//! ## Zoom, not DPI
//!
//! A PDF page is measured in points (1/72 inch). Each page is rendered at
//! `zoom × width_pt` pixels wide with the aspect ratio preserved, so the
//! default zoom of 2.0 yields 144 DPI output. The preprocessor later bounds
//! the longest edge, so oversized pages cost memory here but never upload size.

use crate::error::StageError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a pdfium shared library (file or directory).
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// One page ready for preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number.
    pub number: usize,
    pub path: PathBuf,
}

impl PageImage {
    /// The single synthetic page of a direct image upload.
    pub fn single(path: PathBuf) -> Self {
        Self { number: 1, path }
    }
}

/// Rasterise all pages of `pdf_path` into `out_dir/page_{n}.png`.
///
/// Returns the pages in ascending order.
pub async fn rasterize(
    pdf_path: &Path,
    out_dir: &Path,
    zoom: f32,
) -> Result<Vec<PageImage>, StageError> {
    let path = pdf_path.to_path_buf();
    let dir = out_dir.to_path_buf();

    tokio::task::spawn_blocking(move || rasterize_blocking(&path, &dir, zoom))
        .await
        .map_err(|e| StageError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
pub fn rasterize_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    zoom: f32,
) -> Result<Vec<PageImage>, StageError> {
    if !pdf_path.exists() {
        return Err(StageError::NotFound {
            path: pdf_path.to_path_buf(),
        });
    }

    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| rasterization(pdf_path, format!("{:?}", e)))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    if total_pages == 0 {
        return Err(rasterization(pdf_path, "document has no pages".into()));
    }

    let mut results = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let number = idx + 1;
        let page = pages
            .get(idx as u16)
            .map_err(|e| rasterization(pdf_path, format!("page {}: {:?}", number, e)))?;

        let target_width = (page.width().value * zoom).round().max(1.0) as i32;
        let render_config = PdfRenderConfig::new().set_target_width(target_width);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| rasterization(pdf_path, format!("page {}: {:?}", number, e)))?;

        let image = bitmap.as_image();
        let output_path = out_dir.join(format!("page_{}.png", number));
        image
            .save_with_format(&output_path, image::ImageFormat::Png)
            .map_err(|e| rasterization(pdf_path, format!("page {}: {}", number, e)))?;

        debug!(
            "Rendered page {} → {}x{} px at {}",
            number,
            image.width(),
            image.height(),
            output_path.display()
        );

        results.push(PageImage {
            number,
            path: output_path,
        });
    }

    Ok(results)
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the working directory, then
/// the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, StageError> {
    let bindings = match std::env::var(PDFIUM_LIB_PATH_ENV) {
        Ok(configured) => {
            let configured = PathBuf::from(configured);
            let lib = if configured.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&configured)
            } else {
                configured
            };
            Pdfium::bind_to_library(&lib)
        }
        Err(_) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| StageError::PdfiumUnavailable(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn rasterization(path: &Path, detail: String) -> StageError {
    StageError::Rasterization {
        path: path.to_path_buf(),
        detail,
    }
}
