//! Source positions and the error type shared by every compiler phase.

use std::{borrow::Cow, fmt};

/// Number of characters shown on either side of an error position in excerpts.
const EXCERPT_RADIUS: usize = 25;

/// A position in source code: 1-based line, 0-based character column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A span of source code, attached to every AST node.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CodeRange {
    start: CodeLoc,
    end: CodeLoc,
}

/// Custom Debug implementation to keep AST dumps readable.
impl fmt::Debug for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

impl CodeRange {
    #[must_use]
    pub const fn new(start: CodeLoc, end: CodeLoc) -> Self {
        Self { start, end }
    }

    /// A zero-width range at `loc`.
    #[must_use]
    pub const fn point(loc: CodeLoc) -> Self {
        Self { start: loc, end: loc }
    }

    #[must_use]
    pub fn start(&self) -> CodeLoc {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> CodeLoc {
        self.end
    }

    /// First line of the range, used for line-number tables.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.start.line
    }

    /// Returns a new `CodeRange` with an updated end location.
    #[must_use]
    pub fn with_end(self, end: CodeLoc) -> Self {
        Self { start: self.start, end }
    }

    /// Range spanning from the start of `self` to the end of `other`.
    #[must_use]
    pub fn to(self, other: Self) -> Self {
        self.with_end(other.end)
    }
}

/// Errors produced while tokenizing, parsing, resolving scopes or emitting code.
///
/// `Syntax` errors are user-facing and positioned. `Internal` errors mean the
/// compiler itself produced inconsistent state (an unbound label, a negative
/// stack depth) and should never be seen for any input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Syntax {
        msg: Cow<'static, str>,
        filename: Option<String>,
        position: CodeRange,
        excerpt: Option<String>,
    },
    Internal {
        msg: Cow<'static, str>,
    },
}

impl CompileError {
    pub(crate) fn syntax(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::Syntax {
            msg: msg.into(),
            filename: None,
            position,
            excerpt: None,
        }
    }

    pub(crate) fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal { msg: msg.into() }
    }

    /// Attaches the filename and, unless one is already present, a source excerpt.
    #[must_use]
    pub fn with_source(self, name: &str, source: &str) -> Self {
        match self {
            Self::Syntax {
                msg,
                filename,
                position,
                excerpt,
            } => Self::Syntax {
                msg,
                filename: filename.or_else(|| Some(name.to_owned())),
                excerpt: excerpt.or_else(|| Some(excerpt_around(source, position.start()))),
                position,
            },
            internal @ Self::Internal { .. } => internal,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { msg, .. } | Self::Internal { msg } => msg,
        }
    }

    #[must_use]
    pub fn position(&self) -> Option<CodeRange> {
        match self {
            Self::Syntax { position, .. } => Some(*position),
            Self::Internal { .. } => None,
        }
    }

    #[must_use]
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            Self::Syntax { excerpt, .. } => excerpt.as_deref(),
            Self::Internal { .. } => None,
        }
    }

    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax {
                msg,
                filename,
                position,
                excerpt,
            } => {
                writeln!(f, "SyntaxError: {msg}")?;
                let start = position.start();
                write!(
                    f,
                    "  File \"{}\", line {}, column {}",
                    filename.as_deref().unwrap_or("<unknown>"),
                    start.line,
                    start.column
                )?;
                if let Some(excerpt) = excerpt {
                    write!(f, "\n    {excerpt}")?;
                }
                Ok(())
            }
            Self::Internal { msg } => write!(f, "internal compiler error: {msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Source text within `EXCERPT_RADIUS` characters of `loc`, newlines included.
#[must_use]
pub fn excerpt_around(source: &str, loc: CodeLoc) -> String {
    let mut offset = 0usize;
    for (index, line) in source.split_inclusive('\n').enumerate() {
        if index + 1 == loc.line as usize {
            break;
        }
        offset += line.chars().count();
    }
    let center = offset + loc.column as usize;
    let begin = center.saturating_sub(EXCERPT_RADIUS);
    source.chars().skip(begin).take(center + EXCERPT_RADIUS - begin).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_around_second_line() {
        let source = "x = 1\ny = (\n";
        let excerpt = excerpt_around(source, CodeLoc::new(2, 4));
        assert_eq!(excerpt, source);
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let source = "a".repeat(100);
        let excerpt = excerpt_around(&source, CodeLoc::new(1, 50));
        assert_eq!(excerpt.len(), EXCERPT_RADIUS * 2);
    }

    #[test]
    fn test_display_syntax_error() {
        let err = CompileError::syntax("invalid syntax", CodeRange::point(CodeLoc::new(3, 7)))
            .with_source("demo.py", "a\nb\nc = = 1\n");
        let rendered = err.to_string();
        assert!(rendered.starts_with("SyntaxError: invalid syntax\n"), "got {rendered}");
        assert!(rendered.contains("File \"demo.py\", line 3, column 7"), "got {rendered}");
    }

    #[test]
    fn test_internal_error_has_no_position() {
        let err = CompileError::internal("label bound twice");
        assert!(err.position().is_none());
        assert!(!err.is_syntax());
        assert_eq!(err.to_string(), "internal compiler error: label bound twice");
    }
}
