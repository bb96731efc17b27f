//! Syntax errors.

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// A lexing or parsing failure with its location in the query text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    /// Optional suggestion shown under the caret.
    pub hint: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Render the error with the offending source line and a caret.
    pub fn format_with_source(&self, source: &str) -> String {
        render_diagnostic(source, "error", &self.message, self.span, self.hint.as_deref())
    }
}

/// Shared diagnostic renderer, also used by semantic errors downstream.
pub fn render_diagnostic(
    source: &str,
    label: &str,
    message: &str,
    span: Span,
    hint: Option<&str>,
) -> String {
    let (line, col) = offset_to_line_col(source, span.start);
    let mut result = format!("{}: {}\n", label, message);
    result.push_str(&format!("  --> line {}:{}\n", line, col));

    if let Some(source_line) = source.lines().nth(line - 1) {
        result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));
        for _ in 0..col {
            result.push(' ');
        }
        result.push('^');

        let remaining = source_line.chars().count().saturating_sub(col - 1);
        for _ in 1..span.len().min(remaining) {
            result.push('~');
        }
        result.push('\n');
    }

    if let Some(hint) = hint {
        result.push_str(&format!("   = hint: {}\n", hint));
    }

    result
}
