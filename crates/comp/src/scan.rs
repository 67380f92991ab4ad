//! Lightweight module scanner for imports, package metadata, and docs.
//!
//! The scanner reads the same source as the parser but through the lossy
//! tokenizer, so it never fails: module discovery has to see a file's imports
//! before anyone knows whether the file parses, and documentation indexing
//! wants doc comments even from broken sources.

use serde::{Deserialize, Serialize};

use crate::{
    cop::Span,
    token::{Lexer, Token, TokenKind},
};

/// An `!import name (source compiler?)` directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDecl {
    pub name: String,
    /// Module resource string, e.g. `./util` or `stdlib/loop`.
    pub source: String,
    /// Optional compiler identifier; empty when not given.
    pub compiler: String,
    pub span: Span,
}

/// A `pkg.*` assignment with its literal value text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkgAssign {
    pub name: String,
    pub value: String,
    pub span: Span,
}

/// A doc comment (`--- block ---` or `-- line`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocComment {
    pub content: String,
    pub span: Span,
}

/// Everything the scanner extracts from one source text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub imports: Vec<ImportDecl>,
    pub pkgs: Vec<PkgAssign>,
    pub docs: Vec<DocComment>,
}

/// Scans source text for imports, pkg assignments, and doc comments.
///
/// Never fails; unlexable stretches are skipped.
#[must_use]
pub fn scan(source: &str) -> ScanReport {
    let tokens = Lexer::with_docs(source).tokenize_lossy();
    let mut report = ScanReport::default();
    let mut pos = 0usize;

    while pos < tokens.len() {
        match &tokens[pos].kind {
            TokenKind::Doc(content) => {
                if !content.is_empty() {
                    report.docs.push(DocComment {
                        content: content.clone(),
                        span: tokens[pos].span,
                    });
                }
                pos += 1;
            }
            TokenKind::Import => {
                pos += 1;
                if let Some(import) = scan_import(&tokens, &mut pos) {
                    report.imports.push(import);
                }
            }
            TokenKind::Ident(name) if name == "pkg" => {
                if let Some(pkg) = scan_pkg(&tokens, &mut pos) {
                    report.pkgs.push(pkg);
                } else {
                    pos += 1;
                }
            }
            _ => pos += 1,
        }
    }
    report
}

/// Parses `name (source compiler?)` after an `!import` token. Returns `None`
/// and leaves `pos` past whatever was consumed when the form is incomplete.
fn scan_import(tokens: &[Token], pos: &mut usize) -> Option<ImportDecl> {
    let (name, span) = match tokens.get(*pos) {
        Some(Token { kind: TokenKind::Ident(name), span, .. }) => (name.clone(), *span),
        _ => return None,
    };
    *pos += 1;

    if !matches!(tokens.get(*pos).map(|t| &t.kind), Some(TokenKind::LParen)) {
        return None;
    }
    *pos += 1;

    let mut source = String::new();
    let mut compiler = String::new();
    let mut depth = 1usize;
    while let Some(token) = tokens.get(*pos) {
        *pos += 1;
        match &token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            TokenKind::Text(text) if source.is_empty() => source.clone_from(text),
            TokenKind::Ident(ident) if depth == 1 => {
                if source.is_empty() {
                    source.clone_from(ident);
                } else if compiler.is_empty() {
                    compiler.clone_from(ident);
                }
            }
            _ => {}
        }
    }

    if source.is_empty() {
        return None;
    }
    Some(ImportDecl { name, source, compiler, span })
}

/// Parses a dotted `pkg.*` name, `=`, and a simple literal value.
fn scan_pkg(tokens: &[Token], pos: &mut usize) -> Option<PkgAssign> {
    let start = *pos;
    let span = tokens[start].span;
    let mut parts = vec!["pkg".to_string()];
    let mut cursor = start + 1;

    while matches!(tokens.get(cursor).map(|t| &t.kind), Some(TokenKind::Dot)) {
        match tokens.get(cursor + 1) {
            Some(Token { kind: TokenKind::Ident(part), .. }) => {
                parts.push(part.clone());
                cursor += 2;
            }
            _ => return None,
        }
    }
    if parts.len() < 2 {
        return None;
    }

    if !matches!(tokens.get(cursor).map(|t| &t.kind), Some(TokenKind::Assign)) {
        return None;
    }
    cursor += 1;

    let value = match tokens.get(cursor).map(|t| &t.kind) {
        Some(TokenKind::Number(literal)) => literal.clone(),
        Some(TokenKind::Text(text)) => text.clone(),
        Some(TokenKind::Ident(ident)) => ident.clone(),
        _ => return None,
    };
    *pos = cursor + 1;

    Some(PkgAssign { name: parts.join("."), value, span })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_imports_pkgs_and_docs() {
        let source = r#"
--- The utility module ---
!import util ("./util" comp)
!import loop (stdlib)
pkg.name = "demo"
pkg.version = 3
-- helper note
x = 1 + 2
"#;
        let report = scan(source);

        assert_eq!(report.imports.len(), 2);
        assert_eq!(report.imports[0].name, "util");
        assert_eq!(report.imports[0].source, "./util");
        assert_eq!(report.imports[0].compiler, "comp");
        assert_eq!(report.imports[1].source, "stdlib");
        assert_eq!(report.imports[1].compiler, "");

        assert_eq!(report.pkgs.len(), 2);
        assert_eq!(report.pkgs[0].name, "pkg.name");
        assert_eq!(report.pkgs[0].value, "demo");
        assert_eq!(report.pkgs[1].value, "3");

        assert_eq!(report.docs.len(), 2);
        assert_eq!(report.docs[0].content, "The utility module");
        assert_eq!(report.docs[1].content, "helper note");
    }

    #[test]
    fn tolerates_syntax_errors() {
        // Stray characters, unbalanced parens, and a half-written binding
        // must not stop the scan.
        let source = "!import a (\"./a\")\nx = @@@ ((( y =\n!import b (\"./b\")";
        let report = scan(source);
        assert_eq!(report.imports.len(), 2);
        assert_eq!(report.imports[1].name, "b");
    }

    #[test]
    fn incomplete_imports_are_dropped() {
        let report = scan("!import broken\n!import ok (\"./ok\")");
        assert_eq!(report.imports.len(), 1);
        assert_eq!(report.imports[0].name, "ok");
    }
}
