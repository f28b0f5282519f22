//! Response sanitising: strip the Markdown fences models wrap around LaTeX.
//!
//! The instruction asks for bare LaTeX, but vision models routinely answer
//! with ` ```latex ... ``` `. [`sanitize`] removes one opening fence (with its
//! language tag) and one closing fence and trims the result. Replies without
//! fences pass through trimmed and otherwise untouched.
//!
//! [`SanitizePolicy::Thorough`] adds a few cheap text-hygiene passes for
//! models that also emit CRLF line endings, trailing blanks or zero-width
//! characters. It never rewrites LaTeX content.

use crate::config::SanitizePolicy;
use once_cell::sync::Lazy;
use regex::Regex;

const FENCE: &str = "```";

/// Strip an opening and a closing code fence, then trim.
///
/// * Opening fence followed by a newline: everything through the end of the
///   first line is dropped (fence plus language tag).
/// * Opening fence with no newline anywhere: only the three backticks go, so
///   a one-line "```X```" becomes "X".
/// * Closing fence: the trailing three backticks go.
pub fn sanitize(raw: &str) -> String {
    let mut s = raw.trim();

    if let Some(rest) = s.strip_prefix(FENCE) {
        s = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
    }

    if let Some(rest) = s.strip_suffix(FENCE) {
        s = rest;
    }

    s.trim().to_string()
}

/// Sanitise according to `policy`.
pub fn sanitize_with(raw: &str, policy: SanitizePolicy) -> String {
    match policy {
        SanitizePolicy::FenceStrip => sanitize(raw),
        SanitizePolicy::Thorough => {
            let s = remove_invisible_chars(&normalise_line_endings(raw));
            let s = sanitize(&s);
            let s = trim_trailing_whitespace(&s);
            collapse_blank_lines(&s)
        }
    }
}

// ── Thorough passes ──────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

/// At most two consecutive blank lines.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}
