//! Configuration types for image/PDF-to-LaTeX conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One struct holds every knob so a
//! [`crate::convert::Converter`] can be shared across requests and its
//! settings logged in one line.

use crate::error::StageError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_img2latex::{ConversionConfig, PreprocessProfile};
///
/// let config = ConversionConfig::builder()
///     .zoom_factor(2.0)
///     .profile(PreprocessProfile::ResizeOnly)
///     .max_tokens(2000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Magnification applied to both axes when rasterising PDF pages. Default: 2.0.
    ///
    /// A PDF point is 1/72 inch, so 2.0 renders at 144 DPI: enough for
    /// handwriting and sub/superscripts to stay legible to the model.
    pub zoom_factor: f32,

    /// Longest allowed image edge in pixels before upload. Default: 2000.
    ///
    /// Larger images are downscaled uniformly; smaller ones are never upscaled.
    pub max_dimension: u32,

    /// Image preprocessing policy. Default: [`PreprocessProfile::ResizeOnly`].
    pub profile: PreprocessProfile,

    /// Laplacian-variance threshold for the blur check. Default: `Some(100.0)`.
    ///
    /// The check is informational: a blurry page is logged and reported to the
    /// progress callback but still converted. `None` skips the check.
    pub blur_threshold: Option<f64>,

    /// Maximum tokens the model may generate per page. Default: 1500.
    ///
    /// A full LaTeX document for a dense page of equations usually fits in
    /// 1500 tokens; raise it for pages with long derivations.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Custom instruction text. If None, uses [`crate::prompts::DEFAULT_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Per-recognition-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Number of pages recognised at once within one conversion. Default: 1.
    ///
    /// Values above 1 issue several model calls concurrently; results are
    /// still collected in page order.
    pub page_concurrency: usize,

    /// Ceiling on conversions running at once in one [`crate::convert::Converter`]. Default: 4.
    pub max_concurrent_conversions: usize,

    /// How model replies are cleaned. Default: [`SanitizePolicy::FenceStrip`].
    pub sanitize: SanitizePolicy,

    /// Directory under which per-request workspaces are created.
    /// If None, uses the system temp directory.
    pub workspace_root: Option<PathBuf>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            zoom_factor: 2.0,
            max_dimension: 2000,
            profile: PreprocessProfile::default(),
            blur_threshold: Some(100.0),
            max_tokens: 1500,
            temperature: 0.1,
            instruction: None,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            page_concurrency: 1,
            max_concurrent_conversions: 4,
            sanitize: SanitizePolicy::default(),
            workspace_root: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("zoom_factor", &self.zoom_factor)
            .field("max_dimension", &self.max_dimension)
            .field("profile", &self.profile)
            .field("blur_threshold", &self.blur_threshold)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("page_concurrency", &self.page_concurrency)
            .field("max_concurrent_conversions", &self.max_concurrent_conversions)
            .field("sanitize", &self.sanitize)
            .field("workspace_root", &self.workspace_root)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn zoom_factor(mut self, zoom: f32) -> Self {
        self.config.zoom_factor = zoom;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn profile(mut self, profile: PreprocessProfile) -> Self {
        self.config.profile = profile;
        self
    }

    pub fn blur_threshold(mut self, threshold: Option<f64>) -> Self {
        self.config.blur_threshold = threshold;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.config.instruction = Some(text.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn max_concurrent_conversions(mut self, n: usize) -> Self {
        self.config.max_concurrent_conversions = n.max(1);
        self
    }

    pub fn sanitize(mut self, policy: SanitizePolicy) -> Self {
        self.config.sanitize = policy;
        self
    }

    pub fn workspace_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, StageError> {
        let c = &self.config;
        if !(c.zoom_factor.is_finite() && c.zoom_factor > 0.0 && c.zoom_factor <= 10.0) {
            return Err(StageError::InvalidConfig(format!(
                "Zoom factor must be in (0, 10], got {}",
                c.zoom_factor
            )));
        }
        if c.max_dimension < 100 {
            return Err(StageError::InvalidConfig(format!(
                "Max dimension must be ≥ 100 px, got {}",
                c.max_dimension
            )));
        }
        if c.max_tokens == 0 {
            return Err(StageError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(StageError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.download_timeout_secs == 0 {
            return Err(StageError::InvalidConfig(
                "Download timeout must be ≥ 1 second".into(),
            ));
        }
        if let Some(t) = c.blur_threshold {
            if !(t.is_finite() && t >= 0.0) {
                return Err(StageError::InvalidConfig(format!(
                    "Blur threshold must be a non-negative number, got {t}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Image preprocessing policy applied before an image is sent to the model.
///
/// | Profile | Steps |
/// |---------|-------|
/// | `ResizeOnly` | bound the longest edge, re-encode as PNG (default) |
/// | `Binarize` | `ResizeOnly` + grayscale, Gaussian blur, Otsu threshold, dilate/erode |
///
/// Vision models read colour photos well, so the default leaves pixels alone.
/// `Binarize` helps with faint pencil on textured paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreprocessProfile {
    #[default]
    ResizeOnly,
    Binarize,
}

/// How raw model replies are cleaned before being returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SanitizePolicy {
    /// Strip an opening/closing code fence and trim. (default)
    #[default]
    FenceStrip,
    /// `FenceStrip` + line-ending normalisation, trailing-space trim and
    /// removal of invisible Unicode.
    Thorough,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ConversionConfig::default();
        assert_eq!(c.zoom_factor, 2.0);
        assert_eq!(c.max_dimension, 2000);
        assert_eq!(c.profile, PreprocessProfile::ResizeOnly);
        assert_eq!(c.blur_threshold, Some(100.0));
        assert_eq!(c.max_tokens, 1500);
        assert_eq!(c.page_concurrency, 1);
        assert_eq!(c.sanitize, SanitizePolicy::FenceStrip);
    }

    #[test]
    fn builder_rejects_bad_zoom() {
        assert!(ConversionConfig::builder().zoom_factor(0.0).build().is_err());
        assert!(ConversionConfig::builder()
            .zoom_factor(f32::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn builder_rejects_tiny_max_dimension() {
        let err = ConversionConfig::builder()
            .max_dimension(10)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Max dimension"));
    }

    #[test]
    fn builder_rejects_zero_timeouts() {
        let err = ConversionConfig::builder()
            .download_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Download timeout"));
        assert!(ConversionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .is_err());
        assert!(ConversionConfig::builder()
            .download_timeout_secs(1)
            .build()
            .is_ok());
    }

    #[test]
    fn builder_rejects_negative_blur_threshold() {
        assert!(ConversionConfig::builder()
            .blur_threshold(Some(-1.0))
            .build()
            .is_err());
        assert!(ConversionConfig::builder()
            .blur_threshold(None)
            .build()
            .is_ok());
    }

    #[test]
    fn concurrency_setters_clamp_to_one() {
        let c = ConversionConfig::builder()
            .page_concurrency(0)
            .max_concurrent_conversions(0)
            .build()
            .unwrap();
        assert_eq!(c.page_concurrency, 1);
        assert_eq!(c.max_concurrent_conversions, 1);
    }

    #[test]
    fn debug_hides_callback() {
        let c = ConversionConfig::default();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("zoom_factor"));
    }
}
