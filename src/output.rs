//! Output types returned by the conversion API.
//!
//! [`ConversionResult`] is what the library hands back: one LaTeX string per
//! page, in page order. [`ConversionResponse`] and [`ErrorResponse`] are the
//! JSON bodies a transport layer (the CLI's `--json`, or an HTTP handler)
//! serialises for the two outcomes.

use crate::error::ConversionError;
use serde::{Deserialize, Serialize};

/// Successful conversion: one LaTeX document per page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub latex_content: Vec<String>,
}

impl ConversionResult {
    pub fn page_count(&self) -> usize {
        self.latex_content.len()
    }

    /// All pages joined into one text, each preceded by a `% Page N` line.
    pub fn joined(&self) -> String {
        let mut out = String::new();
        for (i, latex) in self.latex_content.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            out.push_str(&format!("% Page {}\n", i + 1));
            out.push_str(latex);
        }
        out.push('\n');
        out
    }
}

/// Wire body for a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub latex_content: Vec<String>,
    pub status: String,
}

impl From<ConversionResult> for ConversionResponse {
    fn from(result: ConversionResult) -> Self {
        Self {
            latex_content: result.latex_content,
            status: "success".to_string(),
        }
    }
}

/// Wire body for a failed conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            status: "error".to_string(),
        }
    }
}

impl From<&ConversionError> for ErrorResponse {
    fn from(err: &ConversionError) -> Self {
        Self::new(err.to_string())
    }
}
