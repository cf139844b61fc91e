//! Tokens consumed by the parser.

use crate::error::{CodeLoc, CodeRange};

/// Reserved words of the language, `async` and `await` included.
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del",
    "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal",
    "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

#[must_use]
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    Name,
    Number,
    String,
    Keyword,
    Op,
    Indent,
    Dedent,
    Newline,
    #[strum(serialize = "ENDMARKER")]
    EndMarker,
}

/// A lexed token. `text` is the exact source text, prefixes and quotes included
/// for strings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    #[must_use]
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == keyword
    }

    #[must_use]
    pub fn loc(&self) -> CodeLoc {
        CodeLoc::new(self.line, self.column)
    }

    /// Position just past the token, following newlines inside the text.
    #[must_use]
    pub fn end_loc(&self) -> CodeLoc {
        match self.text.rfind('\n') {
            Some(index) => {
                let extra_lines = self.text.matches('\n').count();
                let tail = self.text[index + 1..].chars().count();
                CodeLoc::new(self.line + u32::try_from(extra_lines).unwrap_or(0), u32::try_from(tail).unwrap_or(0))
            }
            None => {
                let width = self.text.chars().count();
                CodeLoc::new(self.line, self.column + u32::try_from(width).unwrap_or(0))
            }
        }
    }

    #[must_use]
    pub fn range(&self) -> CodeRange {
        CodeRange::new(self.loc(), self.end_loc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_kind_names() {
        assert_eq!(TokenKind::EndMarker.to_string(), "ENDMARKER");
        assert_eq!(TokenKind::Newline.to_string(), "NEWLINE");
    }

    #[test]
    fn test_end_loc_multiline_string() {
        let token = Token::new(TokenKind::String, "'''a\nbc'''", 4, 2);
        assert_eq!(token.end_loc(), CodeLoc::new(5, 5));
        let name = Token::new(TokenKind::Name, "spam", 1, 3);
        assert_eq!(name.end_loc(), CodeLoc::new(1, 7));
    }
}
