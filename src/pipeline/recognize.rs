//! Recognition: one page image in, the model's raw reply out.
//!
//! [`RecognitionClient`] binds a [`RecognitionBackend`] to the per-call
//! settings (instruction, token budget, temperature, timeout). It reads and
//! encodes the image, makes exactly one backend call under
//! `tokio::time::timeout`, and returns the reply unmodified. Fence stripping
//! belongs to [`crate::pipeline::sanitize`].

use crate::backend::{RecognitionBackend, RecognitionRequest};
use crate::config::ConversionConfig;
use crate::error::StageError;
use crate::pipeline::encode;
use crate::prompts::DEFAULT_INSTRUCTION;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A backend plus the settings for each call.
#[derive(Clone)]
pub struct RecognitionClient {
    backend: Arc<dyn RecognitionBackend>,
    instruction: String,
    max_tokens: usize,
    temperature: f32,
    timeout: Duration,
}

impl RecognitionClient {
    pub fn new(backend: Arc<dyn RecognitionBackend>, config: &ConversionConfig) -> Self {
        Self {
            backend,
            instruction: config
                .instruction
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Encode the image at `image_path` and ask the model for LaTeX.
    pub async fn recognize(&self, image_path: &Path) -> Result<String, StageError> {
        let image = encode::encode_image(image_path).await?;
        let request = RecognitionRequest {
            instruction: &self.instruction,
            image: &image,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let start = Instant::now();
        let reply = tokio::time::timeout(self.timeout, self.backend.recognize(&request))
            .await
            .map_err(|_| StageError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        debug!(
            "{}: {} chars from {} in {:?}",
            self.backend.name(),
            reply.len(),
            image_path.display(),
            start.elapsed()
        );
        Ok(reply)
    }
}
