//! Instruction text sent to the vision model with every page image.
//!
//! Kept in one place so wording changes touch a single constant and tests can
//! assert on the prompt without a live model. Callers override it through
//! [`crate::config::ConversionConfig::instruction`].

/// Default instruction for turning one page image into a LaTeX document.
pub const DEFAULT_INSTRUCTION: &str = "Please generate a complete LaTeX document for this image, \
including the document structure with \\documentclass, \\begin{document}, and \\end{document}. \
Ensure that the LaTeX code can be compiled directly. \
Do not write anything else other than the latex code.";
