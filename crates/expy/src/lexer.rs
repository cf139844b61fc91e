//! Tokenizer producing the token stream the parser consumes.
//!
//! Follows the layout rules of Python's own tokenizer: blank and comment-only
//! lines produce nothing, newlines inside brackets are ignored, a trailing
//! backslash joins lines, and changes of indentation produce `Indent` /
//! `Dedent` tokens.

use tracing::trace;

use crate::{
    error::{CodeLoc, CodeRange, CompileError},
    token::{Token, TokenKind, is_keyword},
};

const TAB_SIZE: u32 = 8;

const THREE_CHAR_OPS: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];
const TWO_CHAR_OPS: &[&str] = &[
    "**", "//", ">>", "<<", "<=", ">=", "==", "!=", "->", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", ":=",
];
const ONE_CHAR_OPS: &str = "+-*/%&|^~<>()[]{},:;.=@";

/// Tokenizes `source`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let tokens = Lexer::new(source).run()?;
    trace!(count = tokens.len(), "tokenized source");
    Ok(tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    line_start: usize,
    indents: Vec<u32>,
    paren_depth: u32,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            line_start: 0,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                if !self.indentation()? {
                    break;
                }
                continue;
            }
            let Some(c) = self.peek(0) else { break };
            match c {
                ' ' | '\t' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.is_line_break(1) => {
                    self.pos += 1;
                    self.consume_line_break();
                }
                '\r' | '\n' => {
                    if self.paren_depth == 0 {
                        let column = self.column();
                        self.push(TokenKind::Newline, "\n", self.line, column);
                        self.at_line_start = true;
                    }
                    self.consume_line_break();
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek(1).is_some_and(|next| next.is_ascii_digit()) => self.number()?,
                '\'' | '"' => self.string(self.pos)?,
                c if is_identifier_start(c) => self.name_or_string()?,
                _ => self.operator()?,
            }
        }
        self.finish();
        Ok(self.tokens)
    }

    /// Measures the indentation of a logical line start, emitting `Indent` /
    /// `Dedent` tokens. Returns `false` at end of input.
    fn indentation(&mut self) -> Result<bool, CompileError> {
        let mut width = 0u32;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_SIZE + 1) * TAB_SIZE,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek(0) {
            None => return Ok(false),
            Some('#') => {
                self.skip_comment();
                if self.peek(0).is_none() {
                    return Ok(false);
                }
                self.consume_line_break();
                return Ok(true);
            }
            Some('\r' | '\n') => {
                self.consume_line_break();
                return Ok(true);
            }
            Some('\\') if self.is_line_break(1) => {
                self.pos += 1;
                self.consume_line_break();
                return Ok(true);
            }
            Some(_) => {}
        }
        let current = self.indents.last().copied().unwrap_or(0);
        let column = self.column();
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, "", self.line, column);
        } else if width < current {
            while self.indents.last().is_some_and(|&top| top > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, "", self.line, column);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(CompileError::syntax(
                    "unindent does not match any outer indentation level",
                    CodeRange::point(CodeLoc::new(self.line, column)),
                ));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn finish(&mut self) {
        let line = self.line;
        let column = self.column();
        if self
            .tokens
            .last()
            .is_some_and(|token| !matches!(token.kind, TokenKind::Newline | TokenKind::Dedent))
        {
            self.push(TokenKind::Newline, "", line, column);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, "", line, 0);
        }
        self.push(TokenKind::EndMarker, "", line, 0);
    }

    fn name_or_string(&mut self) -> Result<(), CompileError> {
        let start = self.pos;
        while self.peek(0).is_some_and(is_identifier_continue) {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if matches!(self.peek(0), Some('\'' | '"')) && is_string_prefix(&word) {
            return self.string(start);
        }
        let kind = if is_keyword(&word) { TokenKind::Keyword } else { TokenKind::Name };
        let column = self.column_of(start);
        self.push(kind, word, self.line, column);
        Ok(())
    }

    fn number(&mut self) -> Result<(), CompileError> {
        let start = self.pos;
        let radix_prefix = self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'));
        if radix_prefix {
            self.pos += 2;
            while self.peek(0).is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.pos += 1;
            }
        } else {
            self.digits();
            if self.peek(0) == Some('.') {
                self.pos += 1;
                self.digits();
            }
            if matches!(self.peek(0), Some('e' | 'E')) {
                let signed = matches!(self.peek(1), Some('+' | '-'));
                let digit_at = if signed { 2 } else { 1 };
                if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += digit_at;
                    self.digits();
                }
            }
            if matches!(self.peek(0), Some('j' | 'J')) {
                self.pos += 1;
            }
        }
        if self.peek(0).is_some_and(is_identifier_continue) {
            return Err(self.error_here("invalid syntax"));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let column = self.column_of(start);
        self.push(TokenKind::Number, text, self.line, column);
        Ok(())
    }

    fn digits(&mut self) {
        while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
    }

    /// Scans a string literal whose prefix starts at `start`; `self.pos` is on
    /// the opening quote.
    fn string(&mut self, start: usize) -> Result<(), CompileError> {
        let line = self.line;
        let column = self.column_of(start);
        let Some(quote) = self.peek(0) else {
            return Err(self.error_here("EOF while scanning string literal"));
        };
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        loop {
            match self.peek(0) {
                None => {
                    let msg = if triple {
                        "EOF while scanning triple-quoted string literal"
                    } else {
                        "EOL while scanning string literal"
                    };
                    return Err(CompileError::syntax(msg, CodeRange::point(CodeLoc::new(line, column))));
                }
                Some('\\') => {
                    self.pos += 1;
                    if self.is_line_break(0) {
                        self.consume_line_break();
                    } else if self.peek(0).is_some() {
                        self.pos += 1;
                    }
                }
                Some('\r' | '\n') => {
                    if !triple {
                        return Err(CompileError::syntax(
                            "EOL while scanning string literal",
                            CodeRange::point(CodeLoc::new(line, column)),
                        ));
                    }
                    self.consume_line_break();
                }
                Some(c) if c == quote => {
                    if !triple {
                        self.pos += 1;
                        break;
                    }
                    if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.pos += 3;
                        break;
                    }
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        self.push(TokenKind::String, text, line, column);
        Ok(())
    }

    fn operator(&mut self) -> Result<(), CompileError> {
        let column = self.column();
        for (width, table) in [(3, THREE_CHAR_OPS), (2, TWO_CHAR_OPS)] {
            let candidate: String = self.chars.iter().skip(self.pos).take(width).collect();
            if table.contains(&candidate.as_str()) {
                self.pos += width;
                self.push(TokenKind::Op, candidate, self.line, column);
                return Ok(());
            }
        }
        let Some(c) = self.peek(0) else {
            return Ok(());
        };
        if !ONE_CHAR_OPS.contains(c) {
            return Err(self.error_here(format!("invalid character '{c}' in source")));
        }
        match c {
            '(' | '[' | '{' => self.paren_depth += 1,
            ')' | ']' | '}' => self.paren_depth = self.paren_depth.saturating_sub(1),
            _ => {}
        }
        self.pos += 1;
        self.push(TokenKind::Op, c.to_string(), self.line, column);
        Ok(())
    }

    fn skip_comment(&mut self) {
        while self.peek(0).is_some_and(|c| c != '\n' && c != '\r') {
            self.pos += 1;
        }
    }

    fn is_line_break(&self, ahead: usize) -> bool {
        matches!(self.peek(ahead), Some('\n' | '\r'))
    }

    fn consume_line_break(&mut self) {
        if self.peek(0) == Some('\r') {
            self.pos += 1;
            if self.peek(0) == Some('\n') {
                self.pos += 1;
            }
        } else {
            self.pos += 1;
        }
        self.line += 1;
        self.line_start = self.pos;
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn column(&self) -> u32 {
        self.column_of(self.pos)
    }

    fn column_of(&self, pos: usize) -> u32 {
        u32::try_from(pos.saturating_sub(self.line_start)).unwrap_or(u32::MAX)
    }

    fn push(&mut self, kind: TokenKind, text: impl Into<String>, line: u32, column: u32) {
        self.tokens.push(Token::new(kind, text, line, column));
    }

    fn error_here(&self, msg: impl Into<std::borrow::Cow<'static, str>>) -> CompileError {
        CompileError::syntax(msg, CodeRange::point(CodeLoc::new(self.line, self.column())))
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_identifier_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_string_prefix(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|token| token.kind).collect()
    }

    fn texts(source: &str) -> Vec<String> {
        tokenize(source).unwrap().into_iter().map(|token| token.text).collect()
    }

    #[test]
    fn test_simple_assignment() {
        use TokenKind::{EndMarker, Name, Newline, Number, Op};
        assert_eq!(kinds("x = 1\n"), vec![Name, Op, Number, Newline, EndMarker]);
    }

    #[test]
    fn test_missing_final_newline_is_added() {
        use TokenKind::{EndMarker, Name, Newline};
        assert_eq!(kinds("x"), vec![Name, Newline, EndMarker]);
    }

    #[test]
    fn test_indent_dedent() {
        use TokenKind::{Dedent, EndMarker, Indent, Keyword, Name, Newline, Op};
        let source = "if x:\n    y\n\n    # comment\nz\n";
        assert_eq!(
            kinds(source),
            vec![
                Keyword, Name, Op, Newline, Indent, Name, Newline, Dedent, Name, Newline, EndMarker
            ]
        );
    }

    #[test]
    fn test_dedents_at_end_of_input() {
        let tokens = tokenize("def f():\n    if x:\n        pass").unwrap();
        let dedents = tokens.iter().filter(|token| token.kind == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last().map(|token| token.kind), Some(TokenKind::EndMarker));
    }

    #[test]
    fn test_brackets_join_lines() {
        assert_eq!(texts("f(a,\n  b)\n"), vec!["f", "(", "a", ",", "b", ")", "\n", ""]);
    }

    #[test]
    fn test_backslash_continuation() {
        assert_eq!(texts("x = 1 + \\\n  2\n"), vec!["x", "=", "1", "+", "2", "\n", ""]);
    }

    #[test]
    fn test_longest_match_operators() {
        assert_eq!(
            texts("a **= b // c := ...\n"),
            vec!["a", "**=", "b", "//", "c", ":=", "...", "\n", ""]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            texts("0x1F 1_000 3.14 1e-3 .5 2j 0b101\n"),
            vec!["0x1F", "1_000", "3.14", "1e-3", ".5", "2j", "0b101", "\n", ""]
        );
    }

    #[test]
    fn test_string_prefixes_and_triple_quotes() {
        let tokens = tokenize("rb'\\x' f\"{a}\" '''one\ntwo''' x\n").unwrap();
        assert_eq!(tokens[0].text, "rb'\\x'");
        assert_eq!(tokens[1].text, "f\"{a}\"");
        assert_eq!(tokens[2].text, "'''one\ntwo'''");
        assert_eq!(tokens[3].text, "x");
        assert_eq!(tokens[3].line, 2);
    }

    #[test]
    fn test_keywords() {
        let tokens = tokenize("async def f(): await x\n").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Keyword);
        assert_eq!(tokens[2].kind, TokenKind::Name);
        assert_eq!(tokens[6].kind, TokenKind::Keyword);
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a = 1\n  \nbb  = 2\n").unwrap();
        let bb = &tokens[4];
        assert_eq!((bb.text.as_str(), bb.line, bb.column), ("bb", 3, 0));
        let two = &tokens[6];
        assert_eq!((two.line, two.column), (3, 6));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert_eq!(err.message(), "EOL while scanning string literal");
        assert_eq!(err.position().map(|p| p.start()), Some(CodeLoc::new(1, 4)));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let err = tokenize("if x:\n    a\n  b\n").unwrap_err();
        assert_eq!(err.message(), "unindent does not match any outer indentation level");
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("a ? b\n").unwrap_err();
        assert_eq!(err.message(), "invalid character '?' in source");
    }
}
