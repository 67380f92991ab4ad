//! Parser: source text to COP trees.
//!
//! A recursive-descent parser with precedence climbing over the token stream
//! from [`crate::token::Lexer`]. The output is a `mod.define` COP node whose
//! kids are `mod.namefield` nodes, one per top-level binding. `!import`
//! statements are consumed and discarded here; the error-tolerant scanner
//! pass (`crate::scan`) is responsible for them.
//!
//! Grammar notes:
//! - `(…)` is always a struct literal; a parenthesized lone expression is a
//!   one-field struct, which scalar promotion makes interchangeable with the
//!   bare value during morphing.
//! - Shapes appear only in shape positions: after a morph operator, inside a
//!   block signature, or prefixed with `~` in expression position (`~(x ~num)`
//!   is a shape *value*).
//! - `f(…)` with an adjacent paren is invocation; `f (…)` is two struct
//!   fields.
//! - Block sugar `:w1 w2 (sig)(body)` desugars to `wrap(w1, wrap(w2,
//!   :(sig)(body)))` at parse time, spans preserved.

use crate::{
    cop::{Cop, CopTag, Span},
    error::ParseError,
    token::{Lexer, Token, TokenKind},
};

/// Parses a whole module source into a `mod.define` COP tree.
///
/// # Errors
/// Returns the first syntax error encountered.
pub fn parse_module(source: &str) -> Result<Cop, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.module()
}

/// Parses a single expression, for tests and embedding hosts.
///
/// # Errors
/// Returns a syntax error if the source is not exactly one expression.
pub fn parse_expression(source: &str) -> Result<Cop, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error_here("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.bump().expect("peeked"))
        } else {
            Err(self.error_here(&format!("expected {what}")))
        }
    }

    fn error_here(&self, message: &str) -> ParseError {
        let span = self
            .peek()
            .or_else(|| self.tokens.last())
            .map_or(Span::point(1, 1), |t| t.span);
        ParseError::new(message, span)
    }

    fn here_span(&self) -> Option<Span> {
        self.peek().map(|t| t.span)
    }

    fn last_span(&self) -> Option<Span> {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
    }

    fn spanned_from(&self, cop: Cop, start: Option<Span>) -> Cop {
        let span = match (start, self.last_span()) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, b) => a.or(b),
        };
        cop.spanned(span)
    }

    // --- module level ---

    fn module(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut fields = Vec::new();
        while self.peek().is_some() {
            if self.at(&TokenKind::Import) {
                self.skip_import()?;
                continue;
            }
            fields.push(self.mod_field()?);
        }
        Ok(self.spanned_from(Cop::with_kids(CopTag::ModDefine, fields), start))
    }

    /// Consumes `!import name (source compiler?)`; the scanner pass extracts
    /// its content.
    fn skip_import(&mut self) -> Result<(), ParseError> {
        self.expect(&TokenKind::Import, "'!import'")?;
        match self.peek_kind() {
            Some(TokenKind::Ident(_)) => {
                self.bump();
            }
            _ => return Err(self.error_here("expected module name after '!import'")),
        }
        self.expect(&TokenKind::LParen, "'(' after import name")?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.bump().map(|t| t.kind) {
                Some(TokenKind::LParen) => depth += 1,
                Some(TokenKind::RParen) => depth -= 1,
                Some(_) => {}
                None => return Err(self.error_here("unterminated '!import'")),
            }
        }
        Ok(())
    }

    fn mod_field(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let name = self.identifier()?;
        self.expect(&TokenKind::Assign, "'=' after binding name")?;
        let tag_binding = name
            .identifier_name()
            .is_some_and(|n| n == "tag" || n.starts_with("tag."));
        let value = if tag_binding {
            self.shape_spec()?
        } else {
            self.expression()?
        };
        let node = Cop::with_kids(CopTag::ModNamefield, vec![name, value]).op("=");
        Ok(self.spanned_from(node, start))
    }

    // --- expressions, precedence low to high ---

    fn expression(&mut self) -> Result<Cop, ParseError> {
        self.fallback()
    }

    fn fallback(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut left = self.logic_or()?;
        while self.eat(&TokenKind::Fallback) {
            let right = self.logic_or()?;
            left = self.spanned_from(
                Cop::with_kids(CopTag::ValueFallback, vec![left, right]).op("??"),
                start,
            );
        }
        Ok(left)
    }

    fn logic_or(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut left = self.logic_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.logic_and()?;
            left = self.spanned_from(
                Cop::with_kids(CopTag::ValueLogicBinary, vec![left, right]).op("||"),
                start,
            );
        }
        Ok(left)
    }

    fn logic_and(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut left = self.comparison()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.comparison()?;
            left = self.spanned_from(
                Cop::with_kids(CopTag::ValueLogicBinary, vec![left, right]).op("&&"),
                start,
            );
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut left = self.additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => "==",
                Some(TokenKind::NotEq) => "!=",
                Some(TokenKind::Lt) => "<",
                Some(TokenKind::Le) => "<=",
                Some(TokenKind::Gt) => ">",
                Some(TokenKind::Ge) => ">=",
                _ => return Ok(left),
            };
            self.bump();
            let right = self.additive()?;
            left = self.spanned_from(
                Cop::with_kids(CopTag::ValueCompare, vec![left, right]).op(op),
                start,
            );
        }
    }

    fn additive(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => "+",
                Some(TokenKind::Minus) => "-",
                _ => return Ok(left),
            };
            self.bump();
            let right = self.multiplicative()?;
            left = self.spanned_from(
                Cop::with_kids(CopTag::ValueMathBinary, vec![left, right]).op(op),
                start,
            );
        }
    }

    fn multiplicative(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => "*",
                Some(TokenKind::Slash) => "/",
                _ => return Ok(left),
            };
            self.bump();
            let right = self.unary()?;
            left = self.spanned_from(
                Cop::with_kids(CopTag::ValueMathBinary, vec![left, right]).op(op),
                start,
            );
        }
    }

    fn unary(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        match self.peek_kind() {
            Some(TokenKind::Plus) => {
                self.bump();
                let operand = self.unary()?;
                Ok(self.spanned_from(
                    Cop::with_kids(CopTag::ValueMathUnary, vec![operand]).op("+"),
                    start,
                ))
            }
            Some(TokenKind::Minus) => {
                self.bump();
                let operand = self.unary()?;
                Ok(self.spanned_from(
                    Cop::with_kids(CopTag::ValueMathUnary, vec![operand]).op("-"),
                    start,
                ))
            }
            Some(TokenKind::Not) => {
                self.bump();
                let operand = self.unary()?;
                Ok(self.spanned_from(
                    Cop::with_kids(CopTag::ValueLogicUnary, vec![operand]).op("!!"),
                    start,
                ))
            }
            _ => self.morph(),
        }
    }

    fn morph(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut operand = self.postfix()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Tilde) => "~",
                Some(TokenKind::TildeStar) => "~*",
                Some(TokenKind::TildeQuestion) => "~?",
                _ => return Ok(operand),
            };
            self.bump();
            let shape = self.shape_spec()?;
            operand = self.spanned_from(
                Cop::with_kids(CopTag::ValueMorph, vec![operand, shape]).op(op),
                start,
            );
        }
    }

    fn postfix(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut value = self.atom()?;
        // Invocation requires the paren to touch the callee.
        while self.peek().is_some_and(|t| t.kind == TokenKind::LParen && t.adjacent) {
            let args = self.struct_literal()?;
            value = self.spanned_from(Cop::with_kids(CopTag::ValueInvoke, vec![value, args]), start);
        }
        Ok(value)
    }

    fn atom(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        match self.peek_kind() {
            Some(TokenKind::Number(_)) => {
                let Some(Token { kind: TokenKind::Number(literal), .. }) = self.bump() else {
                    unreachable!()
                };
                Ok(self.spanned_from(Cop::node(CopTag::ValueNumber).literal(literal), start))
            }
            Some(TokenKind::Text(_)) => {
                let Some(Token { kind: TokenKind::Text(text), .. }) = self.bump() else {
                    unreachable!()
                };
                Ok(self.spanned_from(Cop::node(CopTag::ValueText).literal(text), start))
            }
            Some(TokenKind::Tag(_)) => {
                let Some(Token { kind: TokenKind::Tag(path), .. }) = self.bump() else {
                    unreachable!()
                };
                Ok(self.spanned_from(Cop::node(CopTag::ValueTagref).literal(path), start))
            }
            Some(TokenKind::Ident(_)) => self.identifier(),
            Some(TokenKind::LParen) => self.struct_literal(),
            Some(TokenKind::LBracket) => self.pipeline(),
            Some(TokenKind::Colon) => self.block_literal(),
            // A shape value in expression position: ~(x ~num), ~num, ~#fail.
            Some(TokenKind::Tilde) => {
                self.bump();
                self.shape_spec()
            }
            _ => Err(self.error_here("expected an expression")),
        }
    }

    /// A dotted identifier: token, text, and computed `[expr]` segments.
    fn identifier(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut segments = Vec::new();
        match self.peek_kind() {
            Some(TokenKind::Ident(_)) => {
                let Some(Token { kind: TokenKind::Ident(name), span, .. }) = self.bump() else {
                    unreachable!()
                };
                segments.push(Cop::node(CopTag::IdentToken).literal(name).spanned(Some(span)));
            }
            _ => return Err(self.error_here("expected an identifier")),
        }
        while self.at(&TokenKind::Dot) {
            self.bump();
            match self.peek_kind() {
                Some(TokenKind::Ident(_)) => {
                    let Some(Token { kind: TokenKind::Ident(name), span, .. }) = self.bump() else {
                        unreachable!()
                    };
                    segments.push(Cop::node(CopTag::IdentToken).literal(name).spanned(Some(span)));
                }
                Some(TokenKind::Text(_)) => {
                    let Some(Token { kind: TokenKind::Text(text), span, .. }) = self.bump() else {
                        unreachable!()
                    };
                    segments.push(Cop::node(CopTag::IdentText).literal(text).spanned(Some(span)));
                }
                Some(TokenKind::LBracket) => {
                    self.bump();
                    let expr = self.expression()?;
                    self.expect(&TokenKind::RBracket, "']' after computed field")?;
                    segments.push(Cop::with_kids(CopTag::IdentExpr, vec![expr]));
                }
                _ => return Err(self.error_here("expected a field after '.'")),
            }
        }
        Ok(self.spanned_from(Cop::with_kids(CopTag::ValueIdentifier, segments), start))
    }

    /// `( field* )` where a field is `expr`, `name=expr`, `!let name=expr`,
    /// `..expr`, or a leading `|decorator`.
    fn struct_literal(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        self.expect(&TokenKind::LParen, "'('")?;
        let mut fields = Vec::new();
        let mut leading = true;
        while !self.at(&TokenKind::RParen) {
            if self.peek().is_none() {
                return Err(self.error_here("unterminated struct literal"));
            }
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            let field_start = self.here_span();
            if self.at(&TokenKind::Pipe) {
                if !leading {
                    return Err(self.error_here("decorators must lead the body"));
                }
                self.bump();
                let name = self.identifier()?;
                fields.push(self.spanned_from(
                    Cop::with_kids(CopTag::StructDecorator, vec![name]),
                    field_start,
                ));
                continue;
            }
            leading = false;
            if self.eat(&TokenKind::Spread) {
                let expr = self.expression()?;
                fields.push(self.spanned_from(Cop::with_kids(CopTag::StructSpread, vec![expr]), field_start));
                continue;
            }
            if self.eat(&TokenKind::Let) {
                let name = self.identifier()?;
                self.expect(&TokenKind::Assign, "'=' in '!let'")?;
                let value = self.expression()?;
                fields.push(self.spanned_from(
                    Cop::with_kids(CopTag::StructLetassign, vec![name, value]).op("="),
                    field_start,
                ));
                continue;
            }
            // `name=expr` needs a single-segment identifier directly before '='.
            let named = matches!(self.peek_kind(), Some(TokenKind::Ident(_)))
                && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Assign);
            if named {
                let name = self.identifier()?;
                self.expect(&TokenKind::Assign, "'='")?;
                let value = self.expression()?;
                fields.push(self.spanned_from(
                    Cop::with_kids(CopTag::StructNamefield, vec![name, value]).op("="),
                    field_start,
                ));
            } else {
                let value = self.expression()?;
                fields.push(self.spanned_from(Cop::with_kids(CopTag::StructPosfield, vec![value]), field_start));
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(self.spanned_from(Cop::with_kids(CopTag::StructDefine, fields), start))
    }

    /// `[ first (|stage args?)* ]`
    fn pipeline(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        self.expect(&TokenKind::LBracket, "'['")?;
        let mut kids = vec![self.expression()?];
        while self.eat(&TokenKind::Pipe) {
            let stage_start = self.here_span();
            let callee = self.identifier()?;
            if self.at(&TokenKind::LParen) {
                let args = self.struct_literal()?;
                kids.push(self.spanned_from(
                    Cop::with_kids(CopTag::ValueBinding, vec![callee, args]),
                    stage_start,
                ));
            } else {
                kids.push(callee);
            }
        }
        self.expect(&TokenKind::RBracket, "']' closing pipeline")?;
        Ok(self.spanned_from(Cop::with_kids(CopTag::ValuePipeline, kids), start))
    }

    /// `:wrap* (sig)(body)` — wrapper names desugar to `wrap` invocations.
    fn block_literal(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        self.expect(&TokenKind::Colon, "':'")?;

        let mut wrappers = Vec::new();
        while matches!(self.peek_kind(), Some(TokenKind::Ident(_))) {
            let Some(Token { kind: TokenKind::Ident(name), span, .. }) = self.bump() else {
                unreachable!()
            };
            wrappers.push((name, span));
        }

        self.expect(&TokenKind::LParen, "'(' opening block signature")?;
        let pure = self.eat(&TokenKind::Pure);
        let mut sig_fields = Vec::new();
        while !self.at(&TokenKind::RParen) {
            if self.peek().is_none() {
                return Err(self.error_here("unterminated block signature"));
            }
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            sig_fields.push(self.shape_field()?);
        }
        self.expect(&TokenKind::RParen, "')'")?;
        let signature = Cop::with_kids(CopTag::ShapeDefine, sig_fields);

        let body = self.struct_literal()?;
        let mut block = Cop::with_kids(CopTag::ValueBlock, vec![signature, body]);
        if pure {
            block = block.op("pure");
        }
        let mut result = self.spanned_from(block, start);

        // :w1 w2 (sig)(body) => wrap(w1, wrap(w2, :(sig)(body)))
        for (name, span) in wrappers.into_iter().rev() {
            let wrap_ident = Cop::with_kids(
                CopTag::ValueIdentifier,
                vec![Cop::node(CopTag::IdentToken).literal("wrap".to_string())],
            )
            .spanned(Some(span));
            let wrapper_ident = Cop::with_kids(
                CopTag::ValueIdentifier,
                vec![Cop::node(CopTag::IdentToken).literal(name).spanned(Some(span))],
            )
            .spanned(Some(span));
            let args = Cop::with_kids(
                CopTag::StructDefine,
                vec![
                    Cop::with_kids(CopTag::StructPosfield, vec![wrapper_ident]),
                    Cop::with_kids(CopTag::StructPosfield, vec![result]),
                ],
            )
            .spanned(Some(span));
            result = Cop::with_kids(CopTag::ValueInvoke, vec![wrap_ident, args]).spanned(Some(span));
        }
        Ok(result)
    }

    // --- shapes ---

    /// A shape spec: named shape, tag, block-shape, or parenthesized fields
    /// (which may be a `|`-joined union). A leading `~` is accepted and
    /// ignored so canonical unparsed shapes reparse to the same tree.
    fn shape_spec(&mut self) -> Result<Cop, ParseError> {
        self.eat(&TokenKind::Tilde);
        self.shape_primary()
    }

    fn shape_primary(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        match self.peek_kind() {
            Some(TokenKind::Ident(_)) => self.identifier(),
            Some(TokenKind::Tag(_)) => {
                let Some(Token { kind: TokenKind::Tag(path), .. }) = self.bump() else {
                    unreachable!()
                };
                Ok(self.spanned_from(Cop::node(CopTag::ValueTagref).literal(path), start))
            }
            Some(TokenKind::Colon) => {
                // Block shape :(fields)
                self.bump();
                self.expect(&TokenKind::LParen, "'(' after ':' in block shape")?;
                let fields = self.shape_fields_until_rparen()?;
                let node = Cop::with_kids(CopTag::ShapeDefine, fields).op("block");
                Ok(self.spanned_from(node, start))
            }
            Some(TokenKind::LParen) => {
                self.bump();
                if self.at(&TokenKind::RParen) {
                    self.bump();
                    return Ok(self.spanned_from(Cop::node(CopTag::ShapeDefine), start));
                }
                let first = self.shape_field()?;
                if self.at(&TokenKind::Pipe) {
                    // Union: (a | b | …)
                    let mut variants = vec![Self::field_to_variant(first)?];
                    while self.eat(&TokenKind::Pipe) {
                        variants.push(self.shape_primary()?);
                    }
                    self.expect(&TokenKind::RParen, "')' closing union")?;
                    return Ok(self.spanned_from(Cop::with_kids(CopTag::ShapeUnion, variants), start));
                }
                let mut fields = vec![first];
                fields.extend(self.shape_fields_until_rparen()?);
                Ok(self.spanned_from(Cop::with_kids(CopTag::ShapeDefine, fields), start))
            }
            _ => Err(self.error_here("expected a shape")),
        }
    }

    /// Reinterprets an already-parsed shape field as a union variant.
    fn field_to_variant(field: Cop) -> Result<Cop, ParseError> {
        if field.attrs.name.is_none() && field.attrs.op.as_deref() == Some("~") && field.kids.len() == 1 {
            let mut kids = field.kids;
            return Ok(kids.remove(0));
        }
        if let Some(name) = &field.attrs.name
            && field.kids.is_empty()
        {
            let token = Cop::node(CopTag::IdentToken).literal(name.clone());
            return Ok(Cop::with_kids(CopTag::ValueIdentifier, vec![token]).spanned(field.span));
        }
        Err(ParseError::new(
            "union variants cannot carry names or defaults",
            field.span.unwrap_or(Span::point(1, 1)),
        ))
    }

    fn shape_fields_until_rparen(&mut self) -> Result<Vec<Cop>, ParseError> {
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RParen) {
            if self.peek().is_none() {
                return Err(self.error_here("unterminated shape"));
            }
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            fields.push(self.shape_field()?);
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(fields)
    }

    /// One shape field: `name`, `~shape`, `name ~shape`, a nested group, with
    /// an optional `= default`. The `op` attribute records which kids are
    /// present: `~` constraint only, `=` default only, `~=` both.
    fn shape_field(&mut self) -> Result<Cop, ParseError> {
        let start = self.here_span();
        let mut name = None;
        if let Some(TokenKind::Ident(ident)) = self.peek_kind() {
            name = Some(ident.clone());
            self.bump();
        }

        let mut kids = Vec::new();
        let mut op = String::new();
        if self.eat(&TokenKind::Tilde) {
            kids.push(self.shape_primary()?);
            op.push('~');
        } else if matches!(self.peek_kind(), Some(TokenKind::LParen | TokenKind::Colon)) {
            // A nested group (or block shape) is a constraint without the tilde.
            kids.push(self.shape_primary()?);
            op.push('~');
        }
        if self.eat(&TokenKind::Assign) {
            kids.push(self.expression()?);
            op.push('=');
        }

        if name.is_none() && kids.is_empty() {
            return Err(self.error_here("expected a shape field"));
        }

        let mut node = Cop::with_kids(CopTag::ShapeField, kids);
        if let Some(name) = name {
            node = node.named(&name);
        }
        if !op.is_empty() {
            node = node.op(&op);
        }
        Ok(self.spanned_from(node, start))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cop::unparse;

    fn round_trip(source: &str) {
        let first = parse_module(source).unwrap();
        let text = unparse(&first);
        let second = parse_module(&text).unwrap_or_else(|e| panic!("reparse of {text:?} failed: {e}"));
        assert_eq!(first, second, "unparse round-trip for {source:?} via {text:?}");
    }

    #[test]
    fn binding_produces_namefield() {
        let module = parse_module("x = 1 + 2").unwrap();
        assert_eq!(module.tag, CopTag::ModDefine);
        assert_eq!(module.kids.len(), 1);
        let field = &module.kids[0];
        assert_eq!(field.tag, CopTag::ModNamefield);
        assert_eq!(field.name_kid().unwrap().identifier_name().unwrap(), "x");
        assert_eq!(field.value_kid().unwrap().tag, CopTag::ValueMathBinary);
    }

    #[test]
    fn precedence_shapes_the_tree() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(expr.attrs.op.as_deref(), Some("+"));
        let right = expr.kid(1).unwrap();
        assert_eq!(right.attrs.op.as_deref(), Some("*"));

        let cmp = parse_expression("1 + 2 == 3").unwrap();
        assert_eq!(cmp.tag, CopTag::ValueCompare);
    }

    #[test]
    fn struct_fields() {
        let expr = parse_expression("(x=1 2 ..p !let t=3)").unwrap();
        assert_eq!(expr.tag, CopTag::StructDefine);
        let tags: Vec<CopTag> = expr.kids.iter().map(|k| k.tag).collect();
        assert_eq!(
            tags,
            vec![
                CopTag::StructNamefield,
                CopTag::StructPosfield,
                CopTag::StructSpread,
                CopTag::StructLetassign,
            ]
        );
    }

    #[test]
    fn adjacency_separates_call_from_fields() {
        let call = parse_expression("(f(x=1))").unwrap();
        assert_eq!(call.kids.len(), 1);
        assert_eq!(call.kids[0].kid(0).unwrap().tag, CopTag::ValueInvoke);

        let fields = parse_expression("(f (x=1))").unwrap();
        assert_eq!(fields.kids.len(), 2);
    }

    #[test]
    fn pipeline_stages() {
        let expr = parse_expression("[3 |add (n=4) |double]").unwrap();
        assert_eq!(expr.tag, CopTag::ValuePipeline);
        assert_eq!(expr.kids.len(), 3);
        assert_eq!(expr.kids[0].tag, CopTag::ValueNumber);
        assert_eq!(expr.kids[1].tag, CopTag::ValueBinding);
        assert_eq!(expr.kids[2].tag, CopTag::ValueIdentifier);
    }

    #[test]
    fn block_with_signature() {
        let expr = parse_expression(":(n ~num)($in + n)").unwrap();
        assert_eq!(expr.tag, CopTag::ValueBlock);
        let signature = expr.signature().unwrap();
        assert_eq!(signature.kids.len(), 1);
        assert_eq!(signature.kids[0].attrs.name.as_deref(), Some("n"));
        assert_eq!(expr.body().unwrap().tag, CopTag::StructDefine);
    }

    #[test]
    fn pure_marker() {
        let expr = parse_expression(":(!pure n ~num)($in + n)").unwrap();
        assert_eq!(expr.attrs.op.as_deref(), Some("pure"));
    }

    #[test]
    fn block_wrapper_sugar() {
        let expr = parse_expression(":memo (n)(n)").unwrap();
        assert_eq!(expr.tag, CopTag::ValueInvoke);
        assert_eq!(expr.kid(0).unwrap().identifier_name().unwrap(), "wrap");
        let args = expr.kid(1).unwrap();
        assert_eq!(args.kids.len(), 2);
        assert_eq!(args.kids[1].kid(0).unwrap().tag, CopTag::ValueBlock);
    }

    #[test]
    fn decorators_must_lead() {
        let expr = parse_expression(":(n)(|traced n)").unwrap();
        let body = expr.body().unwrap();
        assert_eq!(body.kids[0].tag, CopTag::StructDecorator);
        assert!(parse_expression("(1 |traced)").is_err());
    }

    #[test]
    fn morph_operators() {
        let expr = parse_expression("v ~(x ~num, y ~num)").unwrap();
        assert_eq!(expr.tag, CopTag::ValueMorph);
        assert_eq!(expr.attrs.op.as_deref(), Some("~"));
        let shape = expr.kid(1).unwrap();
        assert_eq!(shape.tag, CopTag::ShapeDefine);
        assert_eq!(shape.kids.len(), 2);

        assert_eq!(parse_expression("v ~*s").unwrap().attrs.op.as_deref(), Some("~*"));
        assert_eq!(parse_expression("v ~?s").unwrap().attrs.op.as_deref(), Some("~?"));
        assert_eq!(parse_expression("v ~#fail").unwrap().kid(1).unwrap().tag, CopTag::ValueTagref);
    }

    #[test]
    fn shape_unions_and_defaults() {
        let expr = parse_expression("v ~(num | text)").unwrap();
        let shape = expr.kid(1).unwrap();
        assert_eq!(shape.tag, CopTag::ShapeUnion);
        assert_eq!(shape.kids.len(), 2);

        let module = parse_module("tag.status = (ok error)").unwrap();
        let value = module.kids[0].value_kid().unwrap();
        assert_eq!(value.tag, CopTag::ShapeDefine);

        let with_default = parse_expression("v ~(timeout ~num = 30)").unwrap();
        let field = &with_default.kid(1).unwrap().kids[0];
        assert_eq!(field.attrs.op.as_deref(), Some("~="));
        assert_eq!(field.kids.len(), 2);
    }

    #[test]
    fn nested_tag_groups_attach_to_names() {
        let module = parse_module("tag.status = (ok error (timeout parse))").unwrap();
        let shape = module.kids[0].value_kid().unwrap();
        assert_eq!(shape.kids.len(), 2);
        let error = &shape.kids[1];
        assert_eq!(error.attrs.name.as_deref(), Some("error"));
        assert_eq!(error.kids[0].tag, CopTag::ShapeDefine);
    }

    #[test]
    fn imports_are_skipped() {
        let module = parse_module("!import util (\"./util\" comp)\nx = 1").unwrap();
        assert_eq!(module.kids.len(), 1);
    }

    #[test]
    fn identifier_segments() {
        let expr = parse_expression("a.\"odd name\".[1 + 2]").unwrap();
        assert_eq!(expr.tag, CopTag::ValueIdentifier);
        assert_eq!(expr.kids[0].tag, CopTag::IdentToken);
        assert_eq!(expr.kids[1].tag, CopTag::IdentText);
        assert_eq!(expr.kids[2].tag, CopTag::IdentExpr);
    }

    #[test]
    fn unparse_round_trips() {
        round_trip("x = 1 + 2 * 3");
        round_trip("p = (x=1 y=2)\nq = (..p z=3)");
        round_trip("f = :(n ~num)($in + n)");
        round_trip("g = :(!pure a b ~text = \"hi\")(a)");
        round_trip("r = [3 |add (n=4) |double]");
        round_trip("m = v ~(x ~num, y ~num = 7)");
        round_trip("s = v ~*point");
        round_trip("w = a ?? b || c && d == e + f * -g");
        round_trip("t = #fail.div-zero");
        round_trip("u = (1 \"two\" three.four)");
        round_trip("tag.status = (ok error (ok2 error2))");
        round_trip("b = :memo (n)(|traced n ..extra)");
        round_trip("c = x.\"funny field\".[1 + i]");
    }
}
