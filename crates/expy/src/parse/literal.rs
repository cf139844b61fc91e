//! Number and string literals: escape decoding, implicit concatenation and
//! f-string replacement fields.

use num_bigint::BigInt;

use super::{PResult, Parser, need};
use crate::{
    error::{CodeLoc, CompileError},
    expressions::{Conversion, Expr, ExprLoc, FStringPart, Literal},
    lexer::tokenize,
    token::{Token, TokenKind},
};

/// One string token after decoding.
enum StringPiece {
    Str(String),
    Bytes(Vec<u8>),
    Formatted(Vec<FStringPart>),
}

/// Replacement fields may nest inside a format spec once.
const MAX_FSTRING_DEPTH: u8 = 2;

impl Parser<'_> {
    pub(super) fn number_atom(&mut self) -> PResult<ExprLoc> {
        let Some(token) = self.peek().filter(|token| token.kind == TokenKind::Number) else {
            return Ok(None);
        };
        let Some(literal) = parse_number(&token.text) else {
            return Err(CompileError::syntax("invalid token", token.range()));
        };
        self.pos += 1;
        Ok(Some(ExprLoc::new(token.range(), Expr::Literal(literal))))
    }

    /// Adjacent string tokens, concatenated.
    pub(super) fn string_atom(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let mut pieces = Vec::new();
        while let Some(token) = self.peek().filter(|token| token.kind == TokenKind::String) {
            self.pos += 1;
            pieces.push(self.string_piece(token)?);
        }
        if pieces.is_empty() {
            return Ok(None);
        }
        let position = self.range_from(start);
        let bytes_count = pieces
            .iter()
            .filter(|piece| matches!(piece, StringPiece::Bytes(_)))
            .count();
        if bytes_count > 0 && bytes_count < pieces.len() {
            return Err(CompileError::syntax("cannot mix bytes and nonbytes literals", position));
        }
        if bytes_count > 0 {
            let mut bytes = Vec::new();
            for piece in pieces {
                if let StringPiece::Bytes(part) = piece {
                    bytes.extend(part);
                }
            }
            return Ok(Some(ExprLoc::new(position, Expr::Literal(Literal::Bytes(bytes)))));
        }
        let mut parts: Vec<FStringPart> = Vec::new();
        for piece in pieces {
            match piece {
                StringPiece::Str(text) => push_literal(&mut parts, text),
                StringPiece::Formatted(formatted) => {
                    for part in formatted {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, text),
                            field @ FStringPart::Formatted { .. } => parts.push(field),
                        }
                    }
                }
                StringPiece::Bytes(_) => {}
            }
        }
        let expr = match parts.as_slice() {
            [] => Expr::Literal(Literal::Str(String::new())),
            [FStringPart::Literal(_)] => match parts.pop() {
                Some(FStringPart::Literal(text)) => Expr::Literal(Literal::Str(text)),
                _ => Expr::JoinedStr(parts),
            },
            _ => Expr::JoinedStr(parts),
        };
        Ok(Some(ExprLoc::new(position, expr)))
    }

    fn string_piece(&mut self, token: &Token) -> Result<StringPiece, CompileError> {
        let text = token.text.as_str();
        let Some(quote_at) = text.find(['\'', '"']) else {
            return Err(CompileError::internal("string token without a quote"));
        };
        let prefix = text[..quote_at].to_ascii_lowercase();
        let quoted = &text[quote_at..];
        let quote_len = if quoted.len() >= 6 && (quoted.starts_with("'''") || quoted.starts_with("\"\"\"")) {
            3
        } else {
            1
        };
        let Some(body) = quoted.get(quote_len..quoted.len().saturating_sub(quote_len)) else {
            return Err(CompileError::internal("unterminated string token"));
        };
        let raw = prefix.contains('r');
        if prefix.contains('f') {
            let chars: Vec<char> = body.chars().collect();
            // the prefix and quotes are ASCII, so byte and char offsets agree
            let parts = self.fstring_parts(token, &chars, quote_at + quote_len, raw, 0)?;
            return Ok(StringPiece::Formatted(parts));
        }
        if prefix.contains('b') {
            if !body.is_ascii() {
                return Err(CompileError::syntax(
                    "bytes can only contain ASCII literal characters.",
                    token.range(),
                ));
            }
            if raw {
                return Ok(StringPiece::Bytes(body.as_bytes().to_vec()));
            }
            let decoded = unescape(body, true).map_err(|msg| CompileError::syntax(msg, token.range()))?;
            // bytes escapes never produce code points above 0xff
            return Ok(StringPiece::Bytes(
                decoded.into_iter().map(|code| (code & 0xff) as u8).collect(),
            ));
        }
        if raw {
            return Ok(StringPiece::Str(body.to_owned()));
        }
        decode_str(body, token).map(StringPiece::Str)
    }

    /// Splits f-string text into literal runs and replacement fields.
    ///
    /// `offset` is the character offset of `text` within the token, used to
    /// position the expressions inside replacement fields.
    fn fstring_parts(
        &mut self,
        token: &Token,
        text: &[char],
        offset: usize,
        raw: bool,
        depth: u8,
    ) -> Result<Vec<FStringPart>, CompileError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut index = 0;
        while let Some(&c) = text.get(index) {
            match c {
                '{' if text.get(index + 1) == Some(&'{') => {
                    literal.push('{');
                    index += 2;
                }
                '}' if text.get(index + 1) == Some(&'}') => {
                    literal.push('}');
                    index += 2;
                }
                '}' => return Err(CompileError::syntax("f-string: single '}' is not allowed", token.range())),
                '{' => {
                    if depth >= MAX_FSTRING_DEPTH {
                        return Err(CompileError::syntax(
                            "f-string: expressions nested too deeply",
                            token.range(),
                        ));
                    }
                    flush_literal(&mut parts, &mut literal, raw, token)?;
                    let (field, next) = self.fstring_field(token, text, offset, index + 1, raw, depth)?;
                    parts.push(field);
                    index = next;
                }
                '\\' if !raw => {
                    literal.push('\\');
                    if let Some(&escaped) = text.get(index + 1) {
                        literal.push(escaped);
                    }
                    index += 2;
                }
                _ => {
                    literal.push(c);
                    index += 1;
                }
            }
        }
        flush_literal(&mut parts, &mut literal, raw, token)?;
        Ok(parts)
    }

    /// Parses one replacement field starting just after its `{`; returns the
    /// field and the index just past its closing `}`.
    fn fstring_field(
        &mut self,
        token: &Token,
        text: &[char],
        offset: usize,
        start: usize,
        raw: bool,
        depth: u8,
    ) -> Result<(FStringPart, usize), CompileError> {
        let error = |msg: &'static str| CompileError::syntax(msg, token.range());
        let mut end = start;
        let mut brackets = 0u32;
        let mut quote = None;
        loop {
            let Some(&c) = text.get(end) else {
                return Err(error("f-string: expecting '}'"));
            };
            if let Some(open) = quote {
                if c == open {
                    quote = None;
                }
                end += 1;
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => brackets += 1,
                ')' | ']' | '}' if brackets > 0 => brackets -= 1,
                '}' => break,
                '!' if brackets == 0 && text.get(end + 1) != Some(&'=') => break,
                ':' if brackets == 0 => break,
                '\\' => return Err(error("f-string expression part cannot include a backslash")),
                '#' => return Err(error("f-string expression part cannot include '#'")),
                _ => {}
            }
            end += 1;
        }
        let source: String = text[start..end].iter().collect();
        if source.trim().is_empty() {
            return Err(error("f-string: empty expression not allowed"));
        }
        let value = self.fstring_expression(&source, loc_in_token(token, offset + start), token)?;

        let mut conversion = Conversion::None;
        if text.get(end) == Some(&'!') {
            conversion = match text.get(end + 1) {
                Some('s') => Conversion::Str,
                Some('r') => Conversion::Repr,
                Some('a') => Conversion::Ascii,
                _ => return Err(error("f-string: invalid conversion character: expected 's', 'r', or 'a'")),
            };
            end += 2;
        }
        let mut format_spec = None;
        if text.get(end) == Some(&':') {
            let spec_start = end + 1;
            let mut spec_end = spec_start;
            let mut nesting = 0u32;
            loop {
                match text.get(spec_end) {
                    None => return Err(error("f-string: expecting '}'")),
                    Some('{') => nesting += 1,
                    Some('}') if nesting == 0 => break,
                    Some('}') => nesting -= 1,
                    Some(_) => {}
                }
                spec_end += 1;
            }
            format_spec = Some(self.fstring_parts(
                token,
                &text[spec_start..spec_end],
                offset + spec_start,
                raw,
                depth + 1,
            )?);
            end = spec_end;
        }
        if text.get(end) != Some(&'}') {
            return Err(error("f-string: expecting '}'"));
        }
        let field = FStringPart::Formatted {
            value: Box::new(value),
            conversion,
            format_spec,
        };
        Ok((field, end + 1))
    }

    /// Parses the expression of a replacement field with a sub-parser that
    /// shares this parser's identifier table and scope keys.
    fn fstring_expression(&mut self, source: &str, base: CodeLoc, token: &Token) -> Result<ExprLoc, CompileError> {
        let wrapped = format!("({source})");
        let tokens: Vec<Token> = tokenize(&wrapped)
            .map_err(|err| CompileError::syntax(format!("f-string: {}", err.message()), token.range()))?
            .into_iter()
            .map(|sub_token| relocate(sub_token, base))
            .collect();
        let mut sub = Parser::new(
            &tokens,
            self.max_nesting.saturating_sub(self.nesting),
            self.max_depth.saturating_sub(self.nesting.saturating_add(self.links)),
        );
        std::mem::swap(&mut sub.state, &mut self.state);
        let parsed = sub.parenthesized_expression();
        std::mem::swap(&mut sub.state, &mut self.state);
        match parsed? {
            Some(expr) => Ok(expr),
            None => {
                let position = sub.furthest_failure().position().unwrap_or_else(|| token.range());
                Err(CompileError::syntax("f-string: invalid syntax", position))
            }
        }
    }

    fn parenthesized_expression(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let expr = need!(self, start, self.paren_atom());
        while self.eat_kind(TokenKind::Newline) {}
        if !self.at_end() {
            return Ok(self.reset(start));
        }
        Ok(Some(expr))
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(FStringPart::Literal(previous)) = parts.last_mut() {
        previous.push_str(&text);
    } else {
        parts.push(FStringPart::Literal(text));
    }
}

fn flush_literal(
    parts: &mut Vec<FStringPart>,
    literal: &mut String,
    raw: bool,
    token: &Token,
) -> Result<(), CompileError> {
    if literal.is_empty() {
        return Ok(());
    }
    let text = std::mem::take(literal);
    let decoded = if raw { text } else { decode_str(&text, token)? };
    push_literal(parts, decoded);
    Ok(())
}

fn decode_str(body: &str, token: &Token) -> Result<String, CompileError> {
    let codes = unescape(body, false).map_err(|msg| CompileError::syntax(msg, token.range()))?;
    codes
        .into_iter()
        .map(|code| {
            char::from_u32(code).ok_or_else(|| {
                CompileError::syntax(
                    format!("(unicode error) code point U+{code:04X} is not a valid character"),
                    token.range(),
                )
            })
        })
        .collect()
}

/// Location of the character `offset` characters into `token`'s text.
fn loc_in_token(token: &Token, offset: usize) -> CodeLoc {
    let mut loc = token.loc();
    for c in token.text.chars().take(offset) {
        if c == '\n' {
            loc.line += 1;
            loc.column = 0;
        } else {
            loc.column += 1;
        }
    }
    loc
}

/// Moves a token lexed from `(expr)` to where `expr` sits in the f-string.
fn relocate(mut token: Token, base: CodeLoc) -> Token {
    if token.line == 1 {
        // column 0 of the wrapped source is the added parenthesis
        token.column = (base.column + token.column).saturating_sub(1);
        token.line = base.line;
    } else {
        token.line += base.line - 1;
    }
    token
}

/// Decodes backslash escapes into code points.
///
/// Bytes literals only understand the byte-sized escapes; `\u`, `\U` and `\N`
/// are kept verbatim there.
fn unescape(body: &str, bytes: bool) -> Result<Vec<u32>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut index = 0;
    while let Some(&c) = chars.get(index) {
        index += 1;
        if c != '\\' {
            out.push(u32::from(c));
            continue;
        }
        let Some(&escaped) = chars.get(index) else {
            out.push(u32::from('\\'));
            break;
        };
        index += 1;
        match escaped {
            '\n' => {}
            '\r' => {
                if chars.get(index) == Some(&'\n') {
                    index += 1;
                }
            }
            '\\' | '\'' | '"' => out.push(u32::from(escaped)),
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(0x0a),
            'r' => out.push(0x0d),
            't' => out.push(0x09),
            'v' => out.push(0x0b),
            '0'..='7' => {
                let mut value = escaped.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.get(index).and_then(|digit| digit.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            index += 1;
                        }
                        None => break,
                    }
                }
                out.push(value);
            }
            'x' => out.push(hex_escape(&chars, &mut index, 2, "truncated \\xXX escape")?),
            'u' if !bytes => out.push(hex_escape(&chars, &mut index, 4, "truncated \\uXXXX escape")?),
            'U' if !bytes => out.push(hex_escape(&chars, &mut index, 8, "truncated \\UXXXXXXXX escape")?),
            'N' if !bytes => return Err("(unicode error) \\N{...} escapes are not supported".to_owned()),
            other => {
                out.push(u32::from('\\'));
                out.push(u32::from(other));
            }
        }
    }
    Ok(out)
}

fn hex_escape(chars: &[char], index: &mut usize, width: usize, msg: &str) -> Result<u32, String> {
    let mut value = 0u32;
    for _ in 0..width {
        let Some(digit) = chars.get(*index).and_then(|c| c.to_digit(16)) else {
            return Err(format!("(unicode error) {msg}"));
        };
        value = value.wrapping_mul(16).wrapping_add(digit);
        *index += 1;
    }
    Ok(value)
}

/// Parses the text of a NUMBER token.
///
/// Returns `None` for malformed literals such as `0x` or `012`.
pub(crate) fn parse_number(text: &str) -> Option<Literal> {
    let digits: String = text.chars().filter(|c| *c != '_').collect::<String>().to_ascii_lowercase();
    if let Some(imaginary) = digits.strip_suffix('j') {
        return imaginary.parse::<f64>().ok().map(Literal::Imaginary);
    }
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(rest) = digits.strip_prefix(prefix) {
            return BigInt::parse_bytes(rest.as_bytes(), radix).map(Literal::Int);
        }
    }
    if digits.contains(['.', 'e']) {
        return digits.parse::<f64>().ok().map(Literal::Float);
    }
    if digits.len() > 1 && digits.starts_with('0') && digits.bytes().any(|b| b != b'0') {
        return None;
    }
    BigInt::parse_bytes(digits.as_bytes(), 10).map(Literal::Int)
}
