//! Image preprocessing: bound the image size and, optionally, binarise it.
//!
//! Every page goes through here before it is encoded for the model. The
//! output is always a lossless PNG written next to the input inside the
//! workspace as `processed_<stem>.png`.
//!
//! The blur check lives here too. It is a focus measure only: the variance of
//! the 4-neighbour Laplacian over the grayscale image. Low variance means few
//! sharp edges. The pipeline reports it and carries on.

use crate::config::PreprocessProfile;
use crate::error::StageError;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{dilate, erode};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sigma matching a 5×5 Gaussian kernel.
const BINARIZE_BLUR_SIGMA: f32 = 1.1;

/// Preprocess `image_path` into `output_dir` on the blocking pool.
pub async fn preprocess(
    image_path: &Path,
    output_dir: &Path,
    profile: PreprocessProfile,
    max_dimension: u32,
) -> Result<PathBuf, StageError> {
    let path = image_path.to_path_buf();
    let dir = output_dir.to_path_buf();

    tokio::task::spawn_blocking(move || preprocess_blocking(&path, &dir, profile, max_dimension))
        .await
        .map_err(|e| StageError::Internal(format!("Preprocess task panicked: {}", e)))?
}

/// Blocking implementation of [`preprocess`].
pub fn preprocess_blocking(
    image_path: &Path,
    output_dir: &Path,
    profile: PreprocessProfile,
    max_dimension: u32,
) -> Result<PathBuf, StageError> {
    let img = load_image(image_path)?;
    let (width, height) = (img.width(), img.height());

    let resized = resize_to_bound(img, max_dimension);
    if (resized.width(), resized.height()) != (width, height) {
        debug!(
            "Resized {} from {}x{} to {}x{}",
            image_path.display(),
            width,
            height,
            resized.width(),
            resized.height()
        );
    }

    let processed = match profile {
        PreprocessProfile::ResizeOnly => resized,
        PreprocessProfile::Binarize => DynamicImage::ImageLuma8(binarize(&resized.to_luma8())),
    };

    let output_path = output_dir.join(processed_name(image_path));
    processed
        .save_with_format(&output_path, ImageFormat::Png)
        .map_err(|e| StageError::Resource(format!("Failed to write preprocessed image: {e}")))?;

    debug!("Preprocessed image saved to: {}", output_path.display());
    Ok(output_path)
}

/// Target size for a `width × height` image whose longest edge must not
/// exceed `max_dimension`. Never upscales.
pub fn bounded_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }

    let scale = max_dimension as f64 / longest as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max_dimension);

    if width >= height {
        (max_dimension, scaled(height))
    } else {
        (scaled(width), max_dimension)
    }
}

fn resize_to_bound(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (w, h) = bounded_dimensions(img.width(), img.height(), max_dimension);
    if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Triangle)
    }
}

/// Grayscale → Gaussian blur → Otsu threshold → 3×3 dilate then erode.
pub fn binarize(gray: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, BINARIZE_BLUR_SIGMA);
    let level = otsu_level(&blurred);
    let binary = threshold(&blurred, level, ThresholdType::Binary);
    let dilated = dilate(&binary, Norm::LInf, 1);
    erode(&dilated, Norm::LInf, 1)
}

fn processed_name(image_path: &Path) -> String {
    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    format!("processed_{stem}.png")
}

/// Decode an image, sniffing the format from its content, and rotate it
/// upright according to its EXIF orientation tag.
fn load_image(path: &Path) -> Result<DynamicImage, StageError> {
    if !path.exists() {
        return Err(StageError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let decode = |detail: String| StageError::Decode {
        path: path.to_path_buf(),
        detail,
    };

    let mut decoder = image::ImageReader::open(path)
        .map_err(|e| decode(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode(e.to_string()))?
        .into_decoder()
        .map_err(|e| decode(e.to_string()))?;

    // Missing or unreadable EXIF leaves the pixels as stored.
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);

    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| decode(e.to_string()))?;
    if !matches!(orientation, Orientation::NoTransforms) {
        debug!("Applying EXIF orientation {:?} to {}", orientation, path.display());
        img.apply_orientation(orientation);
    }
    Ok(img)
}

// ── Blur check ───────────────────────────────────────────────────────────

/// Variance of the Laplacian of `img`.
///
/// Uses the kernel `[0,1,0; 1,-4,1; 0,1,0]` with replicated borders, so every
/// pixel contributes and a flat image scores exactly 0.
pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }

    let px = |x: i64, y: i64| -> f64 {
        let cx = x.clamp(0, w as i64 - 1) as u32;
        let cy = y.clamp(0, h as i64 - 1) as u32;
        img.get_pixel(cx, cy).0[0] as f64
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let laplacian =
                px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += laplacian;
            sum_sq += laplacian * laplacian;
        }
    }

    let count = (w as u64 * h as u64) as f64;
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// Laplacian variance of the image at `path`.
pub fn blur_variance(path: &Path) -> Result<f64, StageError> {
    let gray = load_image(path)?.to_luma8();
    Ok(laplacian_variance(&gray))
}

/// True when the image's Laplacian variance is below `threshold`.
pub fn is_blurry(path: &Path, threshold: f64) -> Result<bool, StageError> {
    Ok(blur_variance(path)? < threshold)
}
