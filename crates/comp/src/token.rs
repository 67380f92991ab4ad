//! Tokenizer for Comp source text.
//!
//! Produces a flat token list with spans and an adjacency flag. Adjacency is
//! what lets the parser distinguish `f(x=1)` (invocation) from `f (x=1)` (two
//! struct fields); Comp has no other use for whitespace beyond separation.
//!
//! Hyphens are identifier characters when flanked by letters, so hyphenated
//! names like `div-zero` lex as single tokens. Subtraction therefore needs
//! space before the minus (`a - b`), which matches how Comp sources are
//! written.
//!
//! `--` starts a line comment and `---` a doc block; both are skipped unless
//! the lexer is asked to keep docs (the scanner pass wants them).

use crate::{cop::Span, error::ParseError, num::Decimal};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Raw numeric literal text, including any base prefix.
    Number(String),
    /// Decoded text literal.
    Text(String),
    /// Identifier or scope identifier (`$in`); hyphenated names are one token.
    Ident(String),
    /// Dotted tag path following `#`.
    Tag(String),
    /// Doc comment content (only produced when docs are kept).
    Doc(String),
    Import,
    Let,
    Pure,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Pipe,
    Assign,
    Dot,
    Spread,
    Tilde,
    TildeStar,
    TildeQuestion,
    Fallback,
    AndAnd,
    OrOr,
    Not,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// True when no whitespace separates this token from the previous one.
    pub adjacent: bool,
}

/// Decodes a raw numeric literal (decimal, or `0x`/`0o`/`0b` prefixed) into a
/// [`Decimal`].
///
/// # Errors
/// Returns a message when the literal is malformed.
pub fn decode_number(literal: &str) -> Result<Decimal, String> {
    let lower = literal.to_ascii_lowercase();
    if let Some(body) = lower.strip_prefix("0x") {
        Decimal::parse_radix(body, 16)
    } else if let Some(body) = lower.strip_prefix("0o") {
        Decimal::parse_radix(body, 8)
    } else if let Some(body) = lower.strip_prefix("0b") {
        Decimal::parse_radix(body, 2)
    } else {
        Decimal::parse(literal)
    }
}

pub struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    line: u32,
    col: u32,
    keep_docs: bool,
}

impl<'src> Lexer<'src> {
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self { source: source.as_bytes(), pos: 0, line: 1, col: 1, keep_docs: false }
    }

    /// A lexer that emits doc comments as tokens, for the scanner pass.
    #[must_use]
    pub fn with_docs(source: &'src str) -> Self {
        Self { keep_docs: true, ..Self::new(source) }
    }

    /// Tokenizes the whole input.
    ///
    /// # Errors
    /// Returns the first syntax error: bad escape, unterminated text or doc
    /// block, malformed number, or an unexpected character.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let skipped = self.skip_whitespace();
            if let Some(doc) = self.take_comment()? {
                if self.keep_docs {
                    tokens.push(doc);
                }
                continue;
            }
            if self.pos >= self.source.len() {
                return Ok(tokens);
            }
            let adjacent = !skipped && !tokens.is_empty();
            let token = self.next_token(adjacent)?;
            tokens.push(token);
        }
    }

    /// Tokenizes as much as possible, skipping bytes that do not lex.
    ///
    /// This never fails; it backs the scanner pass, which must survive
    /// syntax errors that the real parser would report.
    #[must_use]
    pub fn tokenize_lossy(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let skipped = self.skip_whitespace();
            match self.take_comment() {
                Ok(Some(doc)) => {
                    if self.keep_docs {
                        tokens.push(doc);
                    }
                    continue;
                }
                Ok(None) => {}
                Err(_) => {
                    // Unterminated doc block: nothing lexable remains.
                    while self.bump().is_some() {}
                }
            }
            if self.pos >= self.source.len() {
                return tokens;
            }
            let adjacent = !skipped && !tokens.is_empty();
            let before = self.pos;
            match self.next_token(adjacent) {
                Ok(token) => tokens.push(token),
                Err(_) => {
                    if self.pos == before {
                        self.bump();
                    }
                }
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(byte)
    }

    fn here(&self) -> Span {
        Span::point(self.line, self.col)
    }

    fn span_from(&self, start: Span) -> Span {
        Span { line: start.line, col: start.col, end_line: self.line, end_col: self.col }
    }

    /// Skips spaces and newlines; returns whether anything was skipped.
    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.bump();
        }
        self.pos != start
    }

    /// Consumes a `--` line comment or `---` doc block when one starts here.
    fn take_comment(&mut self) -> Result<Option<Token>, ParseError> {
        if self.peek() != Some(b'-') || self.peek_at(1) != Some(b'-') {
            return Ok(None);
        }
        let start = self.here();
        if self.peek_at(2) == Some(b'-') {
            // Doc block: --- content ---
            self.bump();
            self.bump();
            self.bump();
            let content_start = self.pos;
            loop {
                if self.pos >= self.source.len() {
                    return Err(ParseError::new("unterminated doc comment", self.span_from(start)));
                }
                if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') && self.peek_at(2) == Some(b'-') {
                    let content = String::from_utf8_lossy(&self.source[content_start..self.pos])
                        .trim()
                        .to_string();
                    self.bump();
                    self.bump();
                    self.bump();
                    return Ok(Some(Token {
                        kind: TokenKind::Doc(content),
                        span: self.span_from(start),
                        adjacent: false,
                    }));
                }
                self.bump();
            }
        }
        // Line comment: -- content to end of line
        self.bump();
        self.bump();
        let content_start = self.pos;
        while self.peek().is_some_and(|b| b != b'\n') {
            self.bump();
        }
        let content = String::from_utf8_lossy(&self.source[content_start..self.pos])
            .trim()
            .to_string();
        Ok(Some(Token {
            kind: TokenKind::Doc(content),
            span: self.span_from(start),
            adjacent: false,
        }))
    }

    fn next_token(&mut self, adjacent: bool) -> Result<Token, ParseError> {
        let start = self.here();
        let byte = self.peek().expect("caller checked for input");

        let kind = match byte {
            b'0'..=b'9' => self.lex_number(start)?,
            b'"' => self.lex_text(start)?,
            b'#' => self.lex_tag(),
            b'$' => {
                self.bump();
                let mut name = String::from("$");
                name.push_str(&self.lex_ident_body());
                if name.len() == 1 {
                    return Err(ParseError::new("'$' must be followed by a scope name", self.span_from(start)));
                }
                TokenKind::Ident(name)
            }
            b'!' => {
                self.bump();
                match self.peek() {
                    Some(b'=') => {
                        self.bump();
                        TokenKind::NotEq
                    }
                    Some(b'!') => {
                        self.bump();
                        TokenKind::Not
                    }
                    _ => {
                        let word = self.lex_ident_body();
                        match word.as_str() {
                            "import" => TokenKind::Import,
                            "let" => TokenKind::Let,
                            "pure" => TokenKind::Pure,
                            _ => {
                                return Err(ParseError::new(
                                    format!("unknown directive '!{word}'"),
                                    self.span_from(start),
                                ));
                            }
                        }
                    }
                }
            }
            b'(' => self.single(TokenKind::LParen),
            b')' => self.single(TokenKind::RParen),
            b'[' => self.single(TokenKind::LBracket),
            b']' => self.single(TokenKind::RBracket),
            b',' => self.single(TokenKind::Comma),
            b':' => self.single(TokenKind::Colon),
            b'|' => {
                self.bump();
                if self.peek() == Some(b'|') {
                    self.bump();
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            b'&' => {
                self.bump();
                if self.peek() == Some(b'&') {
                    self.bump();
                    TokenKind::AndAnd
                } else {
                    return Err(ParseError::new("expected '&&'", self.span_from(start)));
                }
            }
            b'?' => {
                self.bump();
                if self.peek() == Some(b'?') {
                    self.bump();
                    TokenKind::Fallback
                } else {
                    return Err(ParseError::new("expected '??'", self.span_from(start)));
                }
            }
            b'=' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            b'<' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'.' => {
                self.bump();
                if self.peek() == Some(b'.') {
                    self.bump();
                    TokenKind::Spread
                } else {
                    TokenKind::Dot
                }
            }
            b'~' => {
                self.bump();
                match self.peek() {
                    Some(b'*') => {
                        self.bump();
                        TokenKind::TildeStar
                    }
                    Some(b'?') => {
                        self.bump();
                        TokenKind::TildeQuestion
                    }
                    _ => TokenKind::Tilde,
                }
            }
            b'+' => self.single(TokenKind::Plus),
            b'-' => self.single(TokenKind::Minus),
            b'*' => self.single(TokenKind::Star),
            b'/' => self.single(TokenKind::Slash),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => TokenKind::Ident(self.lex_ident_body()),
            other => {
                return Err(ParseError::new(
                    format!("unexpected character '{}'", char::from(other)),
                    self.span_from(start),
                ));
            }
        };

        Ok(Token { kind, span: self.span_from(start), adjacent })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    /// Identifier body: letters, digits, underscores, and hyphens flanked by
    /// letters.
    fn lex_ident_body(&mut self) -> String {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' => {
                    self.bump();
                }
                b'-' if self.peek_at(1).is_some_and(|b| b.is_ascii_alphabetic()) => {
                    self.bump();
                }
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.source[start..self.pos]).into_owned()
    }

    fn lex_tag(&mut self) -> TokenKind {
        self.bump(); // '#'
        let start = self.pos;
        let mut last_was_dot = true;
        while let Some(byte) = self.peek() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' => {
                    self.bump();
                    last_was_dot = false;
                }
                b'-' if self.peek_at(1).is_some_and(|b| b.is_ascii_alphabetic()) => {
                    self.bump();
                    last_was_dot = false;
                }
                b'.' if !last_was_dot && self.peek_at(1).is_some_and(|b| b.is_ascii_alphabetic()) => {
                    self.bump();
                    last_was_dot = true;
                }
                _ => break,
            }
        }
        TokenKind::Tag(String::from_utf8_lossy(&self.source[start..self.pos]).into_owned())
    }

    fn lex_number(&mut self, start: Span) -> Result<TokenKind, ParseError> {
        let begin = self.pos;

        // Base-prefixed integers: 0x / 0o / 0b.
        if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x' | b'X' | b'o' | b'O' | b'b' | b'B'))
        {
            self.bump();
            self.bump();
            while self.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
                self.bump();
            }
            let literal = String::from_utf8_lossy(&self.source[begin..self.pos]).into_owned();
            decode_number(&literal).map_err(|message| ParseError::new(message, self.span_from(start)))?;
            return Ok(TokenKind::Number(literal));
        }

        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|b| b.is_ascii_digit()) {
                self.bump();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.bump();
                }
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let literal = String::from_utf8_lossy(&self.source[begin..self.pos]).into_owned();
        decode_number(&literal).map_err(|message| ParseError::new(message, self.span_from(start)))?;
        Ok(TokenKind::Number(literal))
    }

    fn lex_text(&mut self, start: Span) -> Result<TokenKind, ParseError> {
        self.bump(); // opening quote
        let mut content = String::new();
        loop {
            let Some(byte) = self.bump() else {
                return Err(ParseError::new("unterminated text literal", self.span_from(start)));
            };
            match byte {
                b'"' => return Ok(TokenKind::Text(content)),
                b'\\' => {
                    let Some(escape) = self.bump() else {
                        return Err(ParseError::new("unterminated escape", self.span_from(start)));
                    };
                    match escape {
                        b'n' => content.push('\n'),
                        b'r' => content.push('\r'),
                        b't' => content.push('\t'),
                        b'\\' => content.push('\\'),
                        b'"' => content.push('"'),
                        b'u' => {
                            let mut code = 0u32;
                            for _ in 0..4 {
                                let Some(digit) = self.bump().and_then(|b| char::from(b).to_digit(16)) else {
                                    return Err(ParseError::new(
                                        "invalid \\u escape: expected 4 hex digits",
                                        self.span_from(start),
                                    ));
                                };
                                code = code * 16 + digit;
                            }
                            let Some(ch) = char::from_u32(code) else {
                                return Err(ParseError::new(
                                    format!("invalid \\u escape: U+{code:04X} is not a character"),
                                    self.span_from(start),
                                ));
                            };
                            content.push(ch);
                        }
                        other => {
                            return Err(ParseError::new(
                                format!("unknown escape '\\{}'", char::from(other)),
                                self.span_from(start),
                            ));
                        }
                    }
                }
                _ => {
                    // Re-assemble multi-byte UTF-8 sequences.
                    if byte < 0x80 {
                        content.push(char::from(byte));
                    } else {
                        let width = utf8_width(byte);
                        let mut buf = vec![byte];
                        for _ in 1..width {
                            if let Some(next) = self.bump() {
                                buf.push(next);
                            }
                        }
                        content.push_str(&String::from_utf8_lossy(&buf));
                    }
                }
            }
        }
    }
}

fn utf8_width(byte: u8) -> usize {
    match byte {
        0xF0..=0xF7 => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            kinds("x = 1 + 2"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Number("1".into()),
                TokenKind::Plus,
                TokenKind::Number("2".into()),
            ]
        );
    }

    #[test]
    fn hyphenated_identifiers() {
        assert_eq!(kinds("div-zero"), vec![TokenKind::Ident("div-zero".into())]);
        assert_eq!(
            kinds("a - b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Minus,
                TokenKind::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn tags_and_scopes() {
        assert_eq!(kinds("#fail.div-zero"), vec![TokenKind::Tag("fail.div-zero".into())]);
        assert_eq!(kinds("$in"), vec![TokenKind::Ident("$in".into())]);
    }

    #[test]
    fn morph_and_fallback_operators() {
        assert_eq!(
            kinds("~ ~* ~? ?? && || !!"),
            vec![
                TokenKind::Tilde,
                TokenKind::TildeStar,
                TokenKind::TildeQuestion,
                TokenKind::Fallback,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Not,
            ]
        );
    }

    #[test]
    fn adjacency_is_tracked() {
        let tokens = Lexer::new("f(1) g (2)").tokenize().unwrap();
        // f ( 1 ) g ( 2 )
        assert!(tokens[1].adjacent, "call paren is adjacent");
        assert!(!tokens[5].adjacent, "spaced paren is not");
    }

    #[test]
    fn text_escapes() {
        assert_eq!(kinds(r#""a\n\"bA""#), vec![TokenKind::Text("a\n\"bA".into())]);
        assert!(Lexer::new(r#""\uZZZZ""#).tokenize().is_err());
        assert!(Lexer::new(r#""\q""#).tokenize().is_err());
        assert!(Lexer::new("\"open").tokenize().is_err());
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1.5 0xff 0b101 2e3"),
            vec![
                TokenKind::Number("1.5".into()),
                TokenKind::Number("0xff".into()),
                TokenKind::Number("0b101".into()),
                TokenKind::Number("2e3".into()),
            ]
        );
        assert!(Lexer::new("0xgg").tokenize().is_err());
    }

    #[test]
    fn comments_are_skipped_but_docs_can_be_kept() {
        assert_eq!(kinds("1 -- trailing\n2"), vec![
            TokenKind::Number("1".into()),
            TokenKind::Number("2".into()),
        ]);
        let tokens = Lexer::with_docs("--- block doc ---\nx = 1").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Doc("block doc".into()));
    }

    #[test]
    fn directives() {
        assert_eq!(
            kinds("!import !let !pure != !!"),
            vec![
                TokenKind::Import,
                TokenKind::Let,
                TokenKind::Pure,
                TokenKind::NotEq,
                TokenKind::Not,
            ]
        );
        assert!(Lexer::new("!bogus").tokenize().is_err());
    }
}
