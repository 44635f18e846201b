use serde::{Deserialize, Serialize};

/// Source code span with byte offsets and 1-indexed line/column positions.
///
/// The parser front end stamps one onto every AST node it hands to the
/// semantic core; diagnostics carry the span of the item being processed
/// when the error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        start_line: usize,
        end_line: usize,
        start_column: usize,
        end_column: usize,
    ) -> Self {
        Self {
            start,
            end,
            start_line,
            end_line,
            start_column,
            end_column,
        }
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// True for the zero span used by synthesized AST nodes.
    pub fn is_synthetic(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_text() {
        let src = "var x = 42;";
        let span = Span::new(8, 10, 1, 1, 9, 11);
        assert_eq!(span.text(src), "42");
    }

    #[test]
    fn test_default_span_is_synthetic() {
        assert!(Span::default().is_synthetic());
        assert!(!Span::new(0, 1, 1, 1, 1, 2).is_synthetic());
    }
}
