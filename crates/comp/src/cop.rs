//! COP (compiler operator) trees.
//!
//! COP is the uniform intermediate representation shared by the parser,
//! resolver, folder, and code generator: a tagged node with positional kids,
//! a small typed attribute record, and a source span. Kid roles are positional
//! per tag (a binary node's kids are `[left, right]`, a namefield's are
//! `[name, value]`); the named-slot accessors below give them their names.
//!
//! COP nodes serialize (via serde) for diagnostics and tooling, and unparse
//! back to canonical source text. For any source that parses, unparsing the
//! tree and reparsing the result yields a structurally equal tree.

use std::fmt::Write as _;

use crate::value::{Value, escape_text};

/// Node tags, displayed with their dotted names from the built-in `cop` tag
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum CopTag {
    #[strum(serialize = "mod.define")]
    ModDefine,
    #[strum(serialize = "mod.namefield")]
    ModNamefield,
    #[strum(serialize = "struct.define")]
    StructDefine,
    #[strum(serialize = "struct.posfield")]
    StructPosfield,
    #[strum(serialize = "struct.namefield")]
    StructNamefield,
    #[strum(serialize = "struct.letassign")]
    StructLetassign,
    #[strum(serialize = "struct.spread")]
    StructSpread,
    #[strum(serialize = "struct.decorator")]
    StructDecorator,
    #[strum(serialize = "shape.define")]
    ShapeDefine,
    #[strum(serialize = "shape.field")]
    ShapeField,
    #[strum(serialize = "shape.union")]
    ShapeUnion,
    #[strum(serialize = "value.identifier")]
    ValueIdentifier,
    #[strum(serialize = "value.reference")]
    ValueReference,
    #[strum(serialize = "value.constant")]
    ValueConstant,
    #[strum(serialize = "value.number")]
    ValueNumber,
    #[strum(serialize = "value.text")]
    ValueText,
    #[strum(serialize = "value.tagref")]
    ValueTagref,
    #[strum(serialize = "value.block")]
    ValueBlock,
    #[strum(serialize = "value.math.unary")]
    ValueMathUnary,
    #[strum(serialize = "value.math.binary")]
    ValueMathBinary,
    #[strum(serialize = "value.compare")]
    ValueCompare,
    #[strum(serialize = "value.logic.unary")]
    ValueLogicUnary,
    #[strum(serialize = "value.logic.binary")]
    ValueLogicBinary,
    #[strum(serialize = "value.invoke")]
    ValueInvoke,
    #[strum(serialize = "value.pipeline")]
    ValuePipeline,
    #[strum(serialize = "value.fallback")]
    ValueFallback,
    #[strum(serialize = "value.binding")]
    ValueBinding,
    #[strum(serialize = "value.morph")]
    ValueMorph,
    #[strum(serialize = "ident.token")]
    IdentToken,
    #[strum(serialize = "ident.text")]
    IdentText,
    #[strum(serialize = "ident.expr")]
    IdentExpr,
}

impl serde::Serialize for CopTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Source span: start line/column and end line/column, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    #[must_use]
    pub fn point(line: u32, col: u32) -> Self {
        Self { line, col, end_line: line, end_col: col }
    }

    /// The smallest span covering both operands.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            line: self.line.min(other.line),
            col: if self.line <= other.line { self.col } else { other.col },
            end_line: self.end_line.max(other.end_line),
            end_col: if self.end_line >= other.end_line { self.end_col } else { other.end_col },
        }
    }
}

/// Typed attribute record of a COP node. Only the attributes a given tag
/// uses are populated.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Attrs {
    /// Operator text for unary/binary/morph nodes, assignment ops, and the
    /// `pure` marker on blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Raw literal text for `value.number`, decoded text for `value.text`,
    /// token text for `ident.*`, tag path for `value.tagref`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    /// Field name for `shape.field`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Qualified definition name for `value.reference`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualified: Option<String>,
    /// Owning module of a reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<u32>,
    /// Import-namespace prefix the reference was found through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Folded constant payload of `value.constant`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
}

/// A COP tree node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Cop {
    pub tag: CopTag,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kids: Vec<Cop>,
    #[serde(flatten)]
    pub attrs: Attrs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl PartialEq for Cop {
    /// Structural equality: tag, attributes, and kids. Spans are positional
    /// bookkeeping and do not participate.
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.attrs.op == other.attrs.op
            && self.attrs.literal == other.attrs.literal
            && self.attrs.name == other.attrs.name
            && self.attrs.qualified == other.attrs.qualified
            && self.attrs.module == other.attrs.module
            && self.attrs.namespace == other.attrs.namespace
            && self.attrs.constant == other.attrs.constant
            && self.kids == other.kids
    }
}

impl Cop {
    #[must_use]
    pub fn node(tag: CopTag) -> Self {
        Self { tag, kids: Vec::new(), attrs: Attrs::default(), span: None }
    }

    #[must_use]
    pub fn with_kids(tag: CopTag, kids: Vec<Cop>) -> Self {
        Self { tag, kids, attrs: Attrs::default(), span: None }
    }

    #[must_use]
    pub fn spanned(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn op(mut self, op: &str) -> Self {
        self.attrs.op = Some(op.to_string());
        self
    }

    #[must_use]
    pub fn literal(mut self, literal: String) -> Self {
        self.attrs.literal = Some(literal);
        self
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.attrs.name = Some(name.to_string());
        self
    }

    /// A `value.constant` node carrying `value`, with position copied from
    /// `original`.
    #[must_use]
    pub fn constant(value: Value, original: Option<&Cop>) -> Self {
        let mut node = Self::node(CopTag::ValueConstant);
        node.attrs.constant = Some(value);
        node.span = original.and_then(|cop| cop.span);
        node
    }

    /// A `value.reference` node for a resolved definition.
    #[must_use]
    pub fn reference(qualified: &str, module: u32, namespace: Option<&str>, original: Option<&Cop>) -> Self {
        let mut node = Self::node(CopTag::ValueReference);
        node.attrs.qualified = Some(qualified.to_string());
        node.attrs.module = Some(module);
        node.attrs.namespace = namespace.map(ToString::to_string);
        node.span = original.and_then(|cop| cop.span);
        node
    }

    /// Rebuilds this node with new kids, keeping tag, attributes, and span.
    #[must_use]
    pub fn rebuild(&self, kids: Vec<Cop>) -> Self {
        Self { tag: self.tag, kids, attrs: self.attrs.clone(), span: self.span }
    }

    #[must_use]
    pub fn kid(&self, index: usize) -> Option<&Cop> {
        self.kids.get(index)
    }

    // Named kid slots. Roles are fixed per tag; these accessors are the map
    // from role name to position.

    /// Left operand of a binary node.
    #[must_use]
    pub fn left(&self) -> Option<&Cop> {
        self.kid(0)
    }

    /// Right operand of a binary node, operand of a unary node's single kid.
    #[must_use]
    pub fn right(&self) -> Option<&Cop> {
        self.kid(if self.kids.len() > 1 { 1 } else { 0 })
    }

    /// Name kid of a namefield or letassign.
    #[must_use]
    pub fn name_kid(&self) -> Option<&Cop> {
        self.kid(0)
    }

    /// Value kid of a namefield or letassign.
    #[must_use]
    pub fn value_kid(&self) -> Option<&Cop> {
        self.kid(1)
    }

    /// Signature kid of a `value.block`.
    #[must_use]
    pub fn signature(&self) -> Option<&Cop> {
        self.kid(0)
    }

    /// Body kid of a `value.block`.
    #[must_use]
    pub fn body(&self) -> Option<&Cop> {
        self.kid(1)
    }

    /// The constant payload when this is a `value.constant`.
    #[must_use]
    pub fn constant_value(&self) -> Option<&Value> {
        if self.tag == CopTag::ValueConstant {
            self.attrs.constant.as_ref()
        } else {
            None
        }
    }

    /// The dotted name when this is a `value.identifier` made only of plain
    /// token segments. Computed or text segments yield `None`.
    #[must_use]
    pub fn identifier_name(&self) -> Option<String> {
        if self.tag != CopTag::ValueIdentifier {
            return None;
        }
        let mut parts = Vec::with_capacity(self.kids.len());
        for kid in &self.kids {
            if kid.tag != CopTag::IdentToken {
                return None;
            }
            parts.push(kid.attrs.literal.clone()?);
        }
        if parts.is_empty() { None } else { Some(parts.join(".")) }
    }

    /// The name when this is a one-segment plain identifier.
    #[must_use]
    pub fn simple_identifier(&self) -> Option<&str> {
        if self.tag == CopTag::ValueIdentifier
            && self.kids.len() == 1
            && self.kids[0].tag == CopTag::IdentToken
        {
            self.kids[0].attrs.literal.as_deref()
        } else {
            None
        }
    }
}

/// Converts a COP tree back to canonical source text.
///
/// The output is not the original source — whitespace and number spellings are
/// normalized — but parsing it produces a structurally equal tree.
#[must_use]
pub fn unparse(cop: &Cop) -> String {
    let mut out = String::new();
    write_cop(cop, &mut out);
    out
}

fn write_cop(cop: &Cop, out: &mut String) {
    match cop.tag {
        CopTag::ModDefine => {
            for (i, kid) in cop.kids.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                write_cop(kid, out);
            }
        }
        CopTag::ModNamefield => {
            if let (Some(name), Some(value)) = (cop.name_kid(), cop.value_kid()) {
                write_cop(name, out);
                out.push_str(" = ");
                write_cop(value, out);
            }
        }
        CopTag::StructDefine => {
            out.push('(');
            for (i, kid) in cop.kids.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_cop(kid, out);
            }
            out.push(')');
        }
        CopTag::StructPosfield => {
            if let Some(kid) = cop.kid(0) {
                write_cop(kid, out);
            }
        }
        CopTag::StructNamefield => {
            if let (Some(name), Some(value)) = (cop.name_kid(), cop.value_kid()) {
                write_cop(name, out);
                out.push('=');
                write_cop(value, out);
            }
        }
        CopTag::StructLetassign => {
            if let (Some(name), Some(value)) = (cop.name_kid(), cop.value_kid()) {
                out.push_str("!let ");
                write_cop(name, out);
                out.push('=');
                write_cop(value, out);
            }
        }
        CopTag::StructSpread => {
            out.push_str("..");
            if let Some(kid) = cop.kid(0) {
                write_cop(kid, out);
            }
        }
        CopTag::StructDecorator => {
            out.push('|');
            if let Some(kid) = cop.kid(0) {
                write_cop(kid, out);
            }
        }
        // A shape in value position prints with a leading '~' so it reparses
        // as a shape, not a struct literal.
        CopTag::ShapeDefine | CopTag::ShapeUnion => {
            out.push('~');
            write_shape_body(cop, out);
        }
        CopTag::ShapeField => {
            let mut wrote = false;
            if let Some(name) = &cop.attrs.name {
                out.push_str(name);
                wrote = true;
            }
            let op = cop.attrs.op.as_deref().unwrap_or("");
            let mut kids = cop.kids.iter();
            if op.starts_with('~') {
                if let Some(constraint) = kids.next() {
                    if wrote {
                        out.push(' ');
                    }
                    out.push('~');
                    write_shape_body(constraint, out);
                    wrote = true;
                }
            }
            if op.ends_with('=') {
                if let Some(default) = kids.next() {
                    if wrote {
                        out.push(' ');
                    }
                    out.push_str("= ");
                    write_cop(default, out);
                }
            }
        }
        CopTag::ValueIdentifier => {
            for (i, kid) in cop.kids.iter().enumerate() {
                if i > 0 {
                    out.push('.');
                }
                write_cop(kid, out);
            }
        }
        CopTag::IdentToken => {
            if let Some(text) = &cop.attrs.literal {
                out.push_str(text);
            }
        }
        CopTag::IdentText => {
            if let Some(text) = &cop.attrs.literal {
                out.push('"');
                escape_text(text, out);
                out.push('"');
            }
        }
        CopTag::IdentExpr => {
            out.push('[');
            if let Some(kid) = cop.kid(0) {
                write_cop(kid, out);
            }
            out.push(']');
        }
        CopTag::ValueReference => {
            if let Some(namespace) = &cop.attrs.namespace {
                let _ = write!(out, "{namespace}.");
            }
            if let Some(qualified) = &cop.attrs.qualified {
                out.push_str(qualified);
            }
        }
        CopTag::ValueConstant => {
            if let Some(value) = &cop.attrs.constant {
                let _ = write!(out, "{value}");
            }
        }
        CopTag::ValueNumber => {
            if let Some(literal) = &cop.attrs.literal {
                out.push_str(literal);
            }
        }
        CopTag::ValueText => {
            if let Some(text) = &cop.attrs.literal {
                out.push('"');
                escape_text(text, out);
                out.push('"');
            }
        }
        CopTag::ValueTagref => {
            out.push('#');
            if let Some(path) = &cop.attrs.literal {
                out.push_str(path);
            }
        }
        CopTag::ValueBlock => {
            out.push(':');
            out.push('(');
            if let Some(signature) = cop.signature() {
                if cop.attrs.op.as_deref() == Some("pure") {
                    out.push_str("!pure");
                    if !signature.kids.is_empty() {
                        out.push(' ');
                    }
                }
                for (i, kid) in signature.kids.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    write_cop(kid, out);
                }
            }
            out.push(')');
            if let Some(body) = cop.body() {
                write_cop(body, out);
            }
        }
        CopTag::ValueMathUnary | CopTag::ValueLogicUnary => {
            if let Some(op) = &cop.attrs.op {
                out.push_str(op);
            }
            if let Some(kid) = cop.kid(0) {
                // `--x` would relex as a comment; keep stacked unaries apart.
                if matches!(kid.tag, CopTag::ValueMathUnary | CopTag::ValueLogicUnary) {
                    out.push(' ');
                }
                write_cop(kid, out);
            }
        }
        CopTag::ValueMathBinary | CopTag::ValueCompare | CopTag::ValueLogicBinary | CopTag::ValueFallback => {
            if let (Some(left), Some(right)) = (cop.left(), cop.kid(1)) {
                write_cop(left, out);
                let _ = write!(out, " {} ", cop.attrs.op.as_deref().unwrap_or("??"));
                write_cop(right, out);
            }
        }
        CopTag::ValueMorph => {
            if let (Some(operand), Some(shape)) = (cop.kid(0), cop.kid(1)) {
                write_cop(operand, out);
                out.push(' ');
                out.push_str(cop.attrs.op.as_deref().unwrap_or("~"));
                write_shape_body(shape, out);
            }
        }
        CopTag::ValueInvoke => {
            if let (Some(callee), Some(args)) = (cop.kid(0), cop.kid(1)) {
                write_cop(callee, out);
                write_cop(args, out);
            }
        }
        CopTag::ValuePipeline => {
            out.push('[');
            for (i, kid) in cop.kids.iter().enumerate() {
                if i == 0 {
                    write_cop(kid, out);
                } else {
                    out.push(' ');
                    write_stage(kid, out);
                }
            }
            out.push(']');
        }
        CopTag::ValueBinding => write_stage(cop, out),
    }
}

/// A shape in shape position: no leading '~', `:(…)` for block shapes,
/// `(a | b)` for unions.
fn write_shape_body(cop: &Cop, out: &mut String) {
    match cop.tag {
        CopTag::ShapeDefine => {
            if cop.attrs.op.as_deref() == Some("block") {
                out.push(':');
            }
            out.push('(');
            for (i, kid) in cop.kids.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_cop(kid, out);
            }
            out.push(')');
        }
        CopTag::ShapeUnion => {
            out.push('(');
            for (i, kid) in cop.kids.iter().enumerate() {
                if i > 0 {
                    out.push_str(" | ");
                }
                write_shape_body(kid, out);
            }
            out.push(')');
        }
        _ => write_cop(cop, out),
    }
}

/// A pipeline stage: `|name` or `|name (args)`.
fn write_stage(stage: &Cop, out: &mut String) {
    if stage.tag == CopTag::ValueBinding {
        if let (Some(callee), Some(args)) = (stage.kid(0), stage.kid(1)) {
            out.push('|');
            write_cop(callee, out);
            out.push(' ');
            write_cop(args, out);
        }
    } else {
        out.push('|');
        write_cop(stage, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_round_trip_through_strum() {
        use std::str::FromStr;
        assert_eq!(CopTag::ModNamefield.to_string(), "mod.namefield");
        assert_eq!(CopTag::from_str("value.math.binary").unwrap(), CopTag::ValueMathBinary);
    }

    #[test]
    fn span_merge_covers_both() {
        let a = Span { line: 1, col: 5, end_line: 1, end_col: 9 };
        let b = Span { line: 2, col: 1, end_line: 2, end_col: 4 };
        let merged = a.merge(b);
        assert_eq!((merged.line, merged.col), (1, 5));
        assert_eq!((merged.end_line, merged.end_col), (2, 4));
    }

    #[test]
    fn structural_equality_ignores_spans() {
        let mut a = Cop::node(CopTag::ValueNumber).literal("42".to_string());
        let b = a.clone();
        a.span = Some(Span::point(3, 7));
        assert_eq!(a, b);
    }
}
