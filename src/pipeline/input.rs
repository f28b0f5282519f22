//! Input resolution: classify the request and stage its bytes in the workspace.
//!
//! The declared filename decides everything downstream: `.pdf` goes through
//! the rasteriser, `.png`/`.jpg`/`.jpeg` become a single synthetic page, and
//! anything else is rejected here, before a workspace is allocated or a byte
//! is downloaded.

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What kind of document a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Pdf,
    Image,
}

impl InputKind {
    /// Classify by extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Result<Self, StageError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("pdf") => Ok(InputKind::Pdf),
            Some("png" | "jpg" | "jpeg") => Ok(InputKind::Image),
            _ => Err(StageError::UnsupportedFormat {
                filename: filename.to_string(),
            }),
        }
    }
}

/// Where the document bytes come from.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// Bytes already in memory, e.g. a multipart upload.
    Upload { filename: String, bytes: Vec<u8> },
    /// A remote file fetched over HTTP(S) and then treated like an upload.
    Url(String),
}

/// One conversion request. Lives only as long as the call that consumes it.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: InputSource,
}

impl ConversionRequest {
    pub fn upload(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: InputSource::Upload {
                filename: filename.into(),
                bytes: bytes.into(),
            },
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            source: InputSource::Url(url.into()),
        }
    }

    /// The declared filename (for URLs, the last path segment).
    pub fn filename(&self) -> String {
        match &self.source {
            InputSource::Upload { filename, .. } => filename.clone(),
            InputSource::Url(url) => filename_from_url(url),
        }
    }

    pub fn kind(&self) -> Result<InputKind, StageError> {
        InputKind::from_filename(&self.filename())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Write the request's bytes into `workspace_dir` and return the file path.
pub async fn stage_input(
    source: InputSource,
    workspace_dir: &Path,
    download_timeout_secs: u64,
) -> Result<PathBuf, StageError> {
    let (filename, bytes) = match source {
        InputSource::Upload { filename, bytes } => (filename, bytes),
        InputSource::Url(url) => {
            let bytes = download_url(&url, download_timeout_secs).await?;
            (filename_from_url(&url), bytes)
        }
    };

    let save_path = workspace_dir.join(local_filename(&filename));
    if bytes.is_empty() {
        return Err(StageError::EmptyFile { path: save_path });
    }

    tokio::fs::write(&save_path, &bytes)
        .await
        .map_err(|e| StageError::Resource(format!("Failed to write upload: {e}")))?;

    debug!(
        "Staged input {} ({} bytes)",
        save_path.display(),
        bytes.len()
    );
    Ok(save_path)
}

/// Reduce an uploaded filename to its final component so it cannot escape
/// the workspace.
fn local_filename(filename: &str) -> String {
    match Path::new(filename).file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            let ext = Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("bin");
            format!("upload.{ext}")
        }
    }
}

/// Extract a filename from the URL path, falling back to "download".
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, StageError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| StageError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        let reason = if e.is_timeout() {
            format!("timed out after {timeout_secs}s")
        } else {
            e.to_string()
        };
        StageError::DownloadFailed {
            url: url.to_string(),
            reason,
        }
    })?;

    if !response.status().is_success() {
        return Err(StageError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| StageError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
