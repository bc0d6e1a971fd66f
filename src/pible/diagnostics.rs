//! # Diagnostics Module
//!
//! Source positions and error rendering for the Pible compiler.
//!
//! Every compile-time error carries a [`Span`] into the original source.
//! Line and column numbers are derived on demand through a [`LineIndex`]
//! built once per compilation, so tokens and AST nodes only store byte
//! offsets.

use std::fmt;

/// A half-open byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset of the first byte covered.
    pub offset: usize,
    /// Number of bytes covered.
    pub len: usize,
}

impl Span {
    /// Creates a span from a start offset and length.
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Smallest span covering both `self` and `other`.
    pub fn merge(&self, other: Span) -> Span {
        let offset = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        Span::new(offset, end - offset)
    }

    /// True when `other` lies entirely within `self`.
    pub fn contains(&self, other: Span) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

/// Severity of a diagnostic. The pipeline short-circuits on the first
/// `Error`; warnings are reported and compilation continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fatal to the current compilation.
    Error,
    /// Informational only.
    Warning,
}

/// A rendered diagnostic: severity, location, and message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// How severe the condition is.
    pub severity: Severity,
    /// Byte range the diagnostic refers to.
    pub span: Span,
    /// Human-readable description.
    pub message: String,
}

impl Diagnostic {
    /// Creates a fatal diagnostic for the given span.
    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            span,
            message: message.into(),
        }
    }

    /// Formats the diagnostic as `line:column: severity: message`.
    pub fn render(&self, index: &LineIndex) -> String {
        let (line, column) = index.line_col(self.span.offset);
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        format!("{}:{}: {}: {}", line, column, tag, self.message)
    }
}

/// Precomputed line-start offsets for a source buffer.
///
/// Built once per compilation; `line_col` is a binary search over the
/// start offsets, so positions are computed only when an error is
/// actually reported.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    /// Scans `source` and records the byte offset of every line start.
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// Returns the 1-based `(line, column)` of a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// Number of lines in the indexed source.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_for_multiline_source() {
        let index = LineIndex::new("U0 main() {\n  return 0;\n}\n");
        assert_eq!(index.line_col(0), (1, 1));
        assert_eq!(index.line_col(3), (1, 4));
        assert_eq!(index.line_col(12), (2, 1));
        assert_eq!(index.line_col(14), (2, 3));
        assert_eq!(index.line_count(), 4);
    }

    #[test]
    fn span_merge_and_contains() {
        let outer = Span::new(4, 20);
        let inner = Span::new(8, 6);
        assert!(outer.contains(inner));
        assert_eq!(inner.merge(Span::new(2, 3)), Span::new(2, 12));
    }

    #[test]
    fn diagnostic_renders_position() {
        let index = LineIndex::new("a\nbc\n");
        let diag = Diagnostic::error(Span::new(3, 1), "unexpected character");
        assert_eq!(diag.render(&index), "2:2: error: unexpected character");
    }
}
