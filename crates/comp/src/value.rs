//! Primary value type representing Comp data at runtime.
//!
//! Every runtime value is one of: number, text, tag reference, struct, shape,
//! or block. The only compound is the struct: an insertion-ordered sequence of
//! key/value fields where a key is either a name or an [`FieldKey::Unnamed`]
//! positional marker.
//!
//! Values are immutable and cheap to clone: struct bodies, text, and block
//! payloads sit behind `Rc`. The reference graph is a DAG by construction
//! (there is no way to build a cycle from the language), so plain reference
//! counting suffices.

use std::{fmt, rc::Rc, sync::atomic::{AtomicU64, Ordering}};

use crate::{
    function::{Block, RawBlock},
    num::Decimal,
    shape::ShapeRef,
    tag::TagRef,
};

/// Monotonic source of positional-key serial numbers.
///
/// Each `Unnamed` occurrence gets a fresh serial so two positional keys are
/// never the same key, only the same kind of key.
static UNNAMED_SERIAL: AtomicU64 = AtomicU64::new(0);

/// A struct field key: a name, or a positional marker with per-occurrence
/// identity.
///
/// `matches` implements *key lookup* semantics: positional keys never match
/// anything, including themselves. Struct *value* equality is positional and
/// lives on [`Value`].
#[derive(Debug, Clone)]
pub enum FieldKey {
    Name(Rc<str>),
    Unnamed(u64),
}

impl FieldKey {
    /// A fresh positional key, distinct from every other key ever made.
    #[must_use]
    pub fn unnamed() -> Self {
        Self::Unnamed(UNNAMED_SERIAL.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }

    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Unnamed(_) => None,
        }
    }

    /// Key-lookup equality: names match by string, positional keys never match.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Name(a), Self::Name(b)) => a == b,
            _ => false,
        }
    }
}

/// An ordered sequence of struct fields behind a shared pointer.
pub type StructValue = Rc<Vec<(FieldKey, Value)>>;

/// A block value: raw (no input shape yet) or typed (morphed against a
/// block-shape and ready for invocation).
///
/// `Overloads` carries an overload set out of a namespace lookup so call
/// sites can dispatch on argument shape; it is callable but not morphable.
#[derive(Debug, Clone)]
pub enum BlockValue {
    Raw(Rc<RawBlock>),
    Typed(Rc<Block>),
    Overloads(Rc<Vec<Value>>),
}

/// A Comp runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Number(Decimal),
    Text(Rc<str>),
    Tag(TagRef),
    Struct(StructValue),
    Shape(ShapeRef),
    Block(BlockValue),
}

impl Value {
    /// The empty struct, Comp's unit value.
    #[must_use]
    pub fn empty() -> Self {
        Self::Struct(Rc::new(Vec::new()))
    }

    #[must_use]
    pub fn text(s: &str) -> Self {
        Self::Text(Rc::from(s))
    }

    #[must_use]
    pub fn number(n: Decimal) -> Self {
        Self::Number(n)
    }

    /// Builds a struct from already-keyed fields.
    #[must_use]
    pub fn struct_from(fields: Vec<(FieldKey, Value)>) -> Self {
        Self::Struct(Rc::new(fields))
    }

    #[must_use]
    pub fn is_struct(&self) -> bool {
        matches!(self, Self::Struct(_))
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    #[must_use]
    pub fn is_tag(&self) -> bool {
        matches!(self, Self::Tag(_))
    }

    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    #[must_use]
    pub fn as_struct_fields(&self) -> Option<&[(FieldKey, Value)]> {
        match self {
            Self::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a named field in a struct value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        let fields = self.as_struct_fields()?;
        fields
            .iter()
            .find(|(key, _)| key.as_name() == Some(name))
            .map(|(_, value)| value)
    }

    /// The nth positional (unnamed) field of a struct value.
    #[must_use]
    pub fn positional(&self, index: usize) -> Option<&Value> {
        let fields = self.as_struct_fields()?;
        fields
            .iter()
            .filter(|(key, _)| matches!(key, FieldKey::Unnamed(_)))
            .map(|(_, value)| value)
            .nth(index)
    }

    /// Wraps a non-struct value as a one-field positional struct.
    /// Structs pass through unchanged.
    #[must_use]
    pub fn as_struct(&self) -> Self {
        if self.is_struct() {
            self.clone()
        } else {
            Self::struct_from(vec![(FieldKey::unnamed(), self.clone())])
        }
    }

    /// Unwraps a single-field struct back to its scalar payload, when the
    /// payload is itself a scalar. Everything else returns unchanged.
    #[must_use]
    pub fn as_scalar(&self) -> Self {
        if let Self::Struct(fields) = self
            && fields.len() == 1
        {
            let inner = &fields[0].1;
            if !inner.is_struct() {
                return inner.clone();
            }
        }
        self.clone()
    }

    /// Whether this value is a failure: a struct carrying a `#fail`-descendant
    /// tag in an unnamed field.
    #[must_use]
    pub fn is_fail(&self) -> bool {
        let Self::Struct(fields) = self else {
            return false;
        };
        fields.iter().any(|(key, value)| {
            matches!(key, FieldKey::Unnamed(_))
                && match value {
                    Self::Tag(tag) => {
                        let name = tag.full_name();
                        name == "fail" || name.starts_with("fail.")
                    }
                    _ => false,
                }
        })
    }
}

impl PartialEq for Value {
    /// Structural equality. Struct comparison is positional: field n of one
    /// struct compares against field n of the other, names must agree, and
    /// two positional keys at the same position are considered aligned (their
    /// per-occurrence identity matters for lookup, not for value equality).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Tag(a), Self::Tag(b)) => TagRef::same(a, b),
            (Self::Shape(a), Self::Shape(b)) => a.same(b),
            (Self::Struct(a), Self::Struct(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                        let keys_align = match (ka, kb) {
                            (FieldKey::Name(na), FieldKey::Name(nb)) => na == nb,
                            (FieldKey::Unnamed(_), FieldKey::Unnamed(_)) => true,
                            _ => false,
                        };
                        keys_align && va == vb
                    })
            }
            (Self::Block(BlockValue::Raw(a)), Self::Block(BlockValue::Raw(b))) => Rc::ptr_eq(a, b),
            (Self::Block(BlockValue::Typed(a)), Self::Block(BlockValue::Typed(b))) => Rc::ptr_eq(a, b),
            (Self::Block(BlockValue::Overloads(a)), Self::Block(BlockValue::Overloads(b))) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Escapes text for quoting in source-like output.
pub(crate) fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
}

impl fmt::Display for Value {
    /// Source-like rendering: numbers plain, text quoted, tags `#name`,
    /// structs in `(…)` literal syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => {
                let mut escaped = String::new();
                escape_text(t, &mut escaped);
                write!(f, "\"{escaped}\"")
            }
            Self::Tag(tag) => write!(f, "#{}", tag.full_name()),
            Self::Shape(shape) => write!(f, "~{shape}"),
            Self::Struct(fields) => {
                f.write_str("(")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    match key {
                        FieldKey::Name(name) => write!(f, "{name}={value}")?,
                        FieldKey::Unnamed(_) => write!(f, "{value}")?,
                    }
                }
                f.write_str(")")
            }
            Self::Block(BlockValue::Raw(_)) => f.write_str(":(…)"),
            Self::Block(BlockValue::Typed(block)) => write!(f, ":({})(…)", block.arg_shape_summary()),
            Self::Block(BlockValue::Overloads(set)) => write!(f, ":overloads/{}", set.len()),
        }
    }
}

impl serde::Serialize for Value {
    /// Diagnostic serialization. Tags serialize as their qualified names,
    /// shapes as their display form, blocks as opaque markers.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            Self::Number(n) => serializer.serialize_str(&n.to_string()),
            Self::Text(t) => serializer.serialize_str(t),
            Self::Tag(tag) => serializer.serialize_str(&format!("#{}", tag.full_name())),
            Self::Shape(shape) => serializer.serialize_str(&format!("~{shape}")),
            Self::Block(_) => serializer.serialize_str(":block"),
            Self::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (index, (key, value)) in fields.iter().enumerate() {
                    match key {
                        FieldKey::Name(name) => map.serialize_entry(name.as_ref(), value)?,
                        FieldKey::Unnamed(_) => map.serialize_entry(&index.to_string(), value)?,
                    }
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_keys_never_match() {
        let a = FieldKey::unnamed();
        let b = FieldKey::unnamed();
        assert!(!a.matches(&b));
        assert!(!a.matches(&a.clone()));
        assert!(FieldKey::name("x").matches(&FieldKey::name("x")));
        assert!(!FieldKey::name("x").matches(&FieldKey::name("y")));
    }

    #[test]
    fn struct_equality_is_positional() {
        let a = Value::struct_from(vec![
            (FieldKey::unnamed(), Value::number(Decimal::from_i64(1))),
            (FieldKey::name("x"), Value::text("hi")),
        ]);
        let b = Value::struct_from(vec![
            (FieldKey::unnamed(), Value::number(Decimal::from_i64(1))),
            (FieldKey::name("x"), Value::text("hi")),
        ]);
        assert_eq!(a, b);

        let c = Value::struct_from(vec![(FieldKey::name("y"), Value::text("hi"))]);
        assert_ne!(a, c);
    }

    #[test]
    fn scalar_wrapping_round_trips() {
        let five = Value::number(Decimal::from_i64(5));
        let wrapped = five.as_struct();
        assert!(wrapped.is_struct());
        assert_eq!(wrapped.as_scalar(), five);
    }

    #[test]
    fn display_reads_like_source() {
        let v = Value::struct_from(vec![
            (FieldKey::name("x"), Value::number(Decimal::from_i64(1))),
            (FieldKey::unnamed(), Value::text("a\"b")),
        ]);
        assert_eq!(v.to_string(), "(x=1 \"a\\\"b\")");
    }
}
