//! The builtin system module: core tags and primitive shapes.
//!
//! Constructed once by the loader at startup and passed by reference; nothing
//! here is global state. Every user module implicitly sees these entries at
//! system priority, shadowed by anything imported or local.

use crate::{
    module::ModuleId,
    shape::{PrimitiveShape, ShapeRef},
    tag::{TagDef, TagRef},
    value::{FieldKey, Value},
};

/// The module id the loader reserves for the builtin module.
pub const BUILTIN_MODULE: ModuleId = ModuleId(0);

/// Core tags and shapes available to every module.
#[derive(Debug)]
pub struct Builtins {
    pub bool_tag: TagRef,
    pub true_tag: TagRef,
    pub false_tag: TagRef,
    pub fail: TagRef,
    pub fail_type: TagRef,
    pub fail_div_zero: TagRef,
    pub fail_runtime: TagRef,
    pub fail_missing: TagRef,
}

impl Builtins {
    #[must_use]
    pub fn new() -> Self {
        let bool_tag = root_tag("bool");
        let true_tag = child_tag(&bool_tag, "true");
        let false_tag = child_tag(&bool_tag, "false");
        let fail = root_tag("fail");
        let fail_type = child_tag(&fail, "type");
        let fail_div_zero = child_tag(&fail, "div_zero");
        let fail_runtime = child_tag(&fail, "runtime");
        let fail_missing = child_tag(&fail, "missing");
        Self {
            bool_tag,
            true_tag,
            false_tag,
            fail,
            fail_type,
            fail_div_zero,
            fail_runtime,
            fail_missing,
        }
    }

    /// `#bool.true` or `#bool.false`.
    #[must_use]
    pub fn bool_value(&self, value: bool) -> Value {
        Value::Tag(if value { self.true_tag.clone() } else { self.false_tag.clone() })
    }

    /// Reads a boolean tag back, unwrapping a single-field struct first.
    #[must_use]
    pub fn as_bool(&self, value: &Value) -> Option<bool> {
        match value.as_scalar() {
            Value::Tag(tag) if TagRef::same(&tag, &self.true_tag) => Some(true),
            Value::Tag(tag) if TagRef::same(&tag, &self.false_tag) => Some(false),
            _ => None,
        }
    }

    /// Builds a failure value: the tag in an unnamed field for morph-based
    /// detection, plus `type` and `message` fields.
    #[must_use]
    pub fn fail_value(&self, tag: &TagRef, message: &str) -> Value {
        Value::struct_from(vec![
            (FieldKey::unnamed(), Value::Tag(tag.clone())),
            (FieldKey::name("type"), Value::text(&tag.full_name())),
            (FieldKey::name("message"), Value::text(message)),
        ])
    }

    /// All builtin tags, for tag-literal resolution.
    #[must_use]
    pub fn tags(&self) -> Vec<TagRef> {
        vec![
            self.bool_tag.clone(),
            self.true_tag.clone(),
            self.false_tag.clone(),
            self.fail.clone(),
            self.fail_type.clone(),
            self.fail_div_zero.clone(),
            self.fail_runtime.clone(),
            self.fail_missing.clone(),
        ]
    }

    /// Qualified name / value pairs inserted into every namespace at system
    /// priority. The namespace builder generates the suffix permutations.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = [
            PrimitiveShape::Num,
            PrimitiveShape::Text,
            PrimitiveShape::Struct,
            PrimitiveShape::Any,
            PrimitiveShape::Bool,
            PrimitiveShape::Tag,
            PrimitiveShape::Block,
        ]
        .into_iter()
        .map(|p| (p.to_string(), Value::Shape(ShapeRef::Primitive(p))))
        .collect();

        for tag in self.tags() {
            entries.push((tag.full_name(), Value::Tag(tag)));
        }
        entries
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

fn root_tag(name: &str) -> TagRef {
    TagRef::new(TagDef {
        path: [name.to_string()].into_iter().collect(),
        module: BUILTIN_MODULE,
        value: None,
        parent: None,
        extends: None,
    })
}

fn child_tag(parent: &TagRef, name: &str) -> TagRef {
    let mut path = parent.0.path.clone();
    path.push(name.to_string());
    TagRef::new(TagDef {
        path,
        module: BUILTIN_MODULE,
        value: None,
        parent: Some(parent.clone()),
        extends: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::is_compatible;

    #[test]
    fn failure_values_carry_the_hierarchy() {
        let builtins = Builtins::new();
        let failure = builtins.fail_value(&builtins.fail_div_zero, "division by zero");
        assert!(failure.is_fail());
        assert!(is_compatible(&builtins.fail_div_zero, &builtins.fail));
        assert_eq!(failure.field("message"), Some(&Value::text("division by zero")));
    }

    #[test]
    fn booleans_are_tags() {
        let builtins = Builtins::new();
        assert_eq!(builtins.as_bool(&builtins.bool_value(true)), Some(true));
        assert_eq!(builtins.as_bool(&Value::text("true")), None);
        assert!(!builtins.bool_value(false).is_fail());
    }
}
