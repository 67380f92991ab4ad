//! Shape definitions.
//!
//! Shapes describe the structure values are morphed against: an ordered list
//! of field definitions (named or positional, each with an optional constraint
//! and default), optionally a union of variants. Primitive shapes (`num`,
//! `text`, `struct`, `any`, …) are distinguished singletons rather than field
//! lists. Block-shapes describe the input a block expects and are what turns
//! a raw block into an invocable one.

use std::{fmt, rc::Rc};

use crate::{tag::TagRef, value::Value};

/// Built-in primitive shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum PrimitiveShape {
    #[strum(serialize = "num")]
    Num,
    #[strum(serialize = "text")]
    Text,
    #[strum(serialize = "struct")]
    Struct,
    #[strum(serialize = "any")]
    Any,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "tag")]
    Tag,
    #[strum(serialize = "block")]
    Block,
}

/// A field inside a shape or block-shape.
///
/// At least one of `name` or `constraint` is present in practice; a bare name
/// accepts anything, a bare constraint is positional.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: Option<Rc<str>>,
    pub constraint: Option<ShapeRef>,
    pub default: Option<Value>,
}

impl FieldDef {
    #[must_use]
    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    #[must_use]
    pub fn is_positional(&self) -> bool {
        self.name.is_none()
    }
}

/// A structural shape definition: ordered fields, or a union of variants.
#[derive(Debug)]
pub struct ShapeDef {
    /// Fully qualified name within the defining module.
    pub qualified: String,
    pub fields: Vec<FieldDef>,
    /// Present iff this is a union shape; morphing tries each variant and
    /// keeps the best score.
    pub variants: Option<Vec<ShapeRef>>,
}

/// The input description for blocks. Morphing a raw block against one of
/// these produces a typed block.
#[derive(Debug)]
pub struct BlockShape {
    pub fields: Vec<FieldDef>,
}

/// A shape usable as a morph target or field constraint.
///
/// Tags are valid constraints (`~#fail` matches any failure value), so they
/// appear here alongside structural and primitive shapes.
#[derive(Debug, Clone)]
pub enum ShapeRef {
    Primitive(PrimitiveShape),
    Def(Rc<ShapeDef>),
    Block(Rc<BlockShape>),
    Tag(TagRef),
}

impl ShapeRef {
    /// Identity comparison, used by value equality.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Primitive(a), Self::Primitive(b)) => a == b,
            (Self::Def(a), Self::Def(b)) => Rc::ptr_eq(a, b),
            (Self::Block(a), Self::Block(b)) => Rc::ptr_eq(a, b),
            (Self::Tag(a), Self::Tag(b)) => TagRef::same(a, b),
            _ => false,
        }
    }

    /// An anonymous structural shape from parsed fields.
    #[must_use]
    pub fn anonymous(fields: Vec<FieldDef>) -> Self {
        Self::Def(Rc::new(ShapeDef {
            qualified: String::new(),
            fields,
            variants: None,
        }))
    }

    /// An anonymous union from variant shapes.
    #[must_use]
    pub fn union(variants: Vec<Self>) -> Self {
        Self::Def(Rc::new(ShapeDef {
            qualified: String::new(),
            fields: Vec::new(),
            variants: Some(variants),
        }))
    }
}

impl fmt::Display for ShapeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::Def(def) if !def.qualified.is_empty() => write!(f, "{}", def.qualified),
            Self::Def(def) => match &def.variants {
                Some(variants) => {
                    for (i, variant) in variants.iter().enumerate() {
                        if i > 0 {
                            f.write_str(" | ")?;
                        }
                        write!(f, "{variant}")?;
                    }
                    Ok(())
                }
                None => {
                    f.write_str("(")?;
                    for (i, field) in def.fields.iter().enumerate() {
                        if i > 0 {
                            f.write_str(" ")?;
                        }
                        write!(f, "{field}")?;
                    }
                    f.write_str(")")
                }
            },
            Self::Block(block) => {
                f.write_str(":(")?;
                for (i, field) in block.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
            Self::Tag(tag) => write!(f, "{tag}"),
        }
    }
}

impl fmt::Display for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(name) = &self.name {
            write!(f, "{name}")?;
            wrote = true;
        }
        if let Some(constraint) = &self.constraint {
            if wrote {
                f.write_str(" ")?;
            }
            write!(f, "~{constraint}")?;
            wrote = true;
        }
        if let Some(default) = &self.default {
            if wrote {
                f.write_str(" ")?;
            }
            write!(f, "= {default}")?;
        }
        Ok(())
    }
}
