//! Image encoding: file on disk → base64 payload for the vision model.
//!
//! Both backends send the image inline. The provider path wraps it in
//! `ImageData` with `detail: "high"`; the chat-completions path embeds it as a
//! `data:` URI. The content-type comes from the file extension alone.

use crate::error::StageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// A base64-encoded image and its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: &'static str,
    pub base64: String,
}

impl EncodedImage {
    /// `data:<mime>;base64,<payload>`
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Provider attachment. `detail: "high"` keeps sub/superscripts legible
    /// to tiling models.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64.clone(), self.mime_type).with_detail("high")
    }
}

/// `image/png` for `.png` (any case), `image/jpeg` for everything else.
pub fn mime_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// Read and encode `path` on the blocking pool.
pub async fn encode_image(path: &Path) -> Result<EncodedImage, StageError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || encode_image_blocking(&path))
        .await
        .map_err(|e| StageError::Internal(format!("Encode task panicked: {}", e)))?
}

/// Blocking implementation of [`encode_image`].
pub fn encode_image_blocking(path: &Path) -> Result<EncodedImage, StageError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StageError::NotFound {
            path: path.to_path_buf(),
        },
        _ => StageError::Resource(format!("Failed to read image {}: {}", path.display(), e)),
    })?;

    if bytes.is_empty() {
        return Err(StageError::EmptyFile {
            path: path.to_path_buf(),
        });
    }

    let base64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), base64.len());

    Ok(EncodedImage {
        mime_type: mime_for_path(path),
        base64,
    })
}
