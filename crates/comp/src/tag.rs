//! Hierarchical tags.
//!
//! A tag is a nominal identifier with a dotted path (`#fail.div-zero`) owned
//! by a module. Tag identity is the definition object itself, not the display
//! string: two modules can both define `#status.ok` without the tags being
//! interchangeable. Hierarchy is positional (path prefix) within a module and
//! explicit (`extends`) across modules.

use std::{fmt, rc::Rc};

use smallvec::SmallVec;

use crate::{module::ModuleId, value::Value};

/// Path segments of a tag, leaf last.
pub type TagPath = SmallVec<[String; 4]>;

/// A tag definition owned by a module.
#[derive(Debug)]
pub struct TagDef {
    /// Full path in definition order, e.g. `["status", "error", "timeout"]`.
    pub path: TagPath,
    /// The module that defined this tag.
    pub module: ModuleId,
    /// Optional value carried by the tag (used when morphing to primitives).
    pub value: Option<Value>,
    /// Parent tag within the same module, if this is not a root tag.
    pub parent: Option<TagRef>,
    /// Tag in another module this one extends, making it a cross-module
    /// descendant for compatibility checks.
    pub extends: Option<TagRef>,
}

/// A runtime reference to a tag definition. Equality is identity of the
/// referenced definition.
#[derive(Debug, Clone)]
pub struct TagRef(pub Rc<TagDef>);

impl TagRef {
    #[must_use]
    pub fn new(def: TagDef) -> Self {
        Self(Rc::new(def))
    }

    /// Identity comparison: same definition object.
    #[must_use]
    pub fn same(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Dotted display name, e.g. `fail.div-zero`.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.0.path.join(".")
    }

    /// Leaf segment of the path.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.path.last().map_or("", String::as_str)
    }

    /// Path length; deeper tags are more specific, which the morph score
    /// rewards.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.path.len()
    }

    /// Whether this tag's path ends with the given partial path, in
    /// definition order: `#error.timeout` names any `….error.timeout`.
    #[must_use]
    pub fn matches_partial(&self, partial: &[String]) -> bool {
        if partial.is_empty() || partial.len() > self.0.path.len() {
            return false;
        }
        let tail = &self.0.path[self.0.path.len() - partial.len()..];
        tail.iter().zip(partial.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.full_name())
    }
}

/// Checks whether an input tag is acceptable where a field demands `field`.
///
/// Compatible means the input is the same tag, a descendant within the same
/// module (the field's path is a proper prefix of the input's path), a tag
/// that `extends` the field's tag directly or transitively, or a descendant
/// of such a tag.
#[must_use]
pub fn is_compatible(input: &TagRef, field: &TagRef) -> bool {
    if TagRef::same(input, field) {
        return true;
    }

    // Walk the extends chain.
    let mut current = input.clone();
    let mut steps = 0usize;
    while let Some(extends) = current.0.extends.clone() {
        if TagRef::same(&extends, field) {
            return true;
        }
        current = extends;
        steps += 1;
        if steps > 64 {
            break;
        }
    }

    if input.0.module == field.0.module {
        // Within one module the hierarchy is the path itself.
        if field.0.path.len() >= input.0.path.len() {
            return false;
        }
        return input.0.path[..field.0.path.len()] == field.0.path[..];
    }

    // A child of an extending tag is also compatible across modules.
    match &input.0.parent {
        Some(parent) => is_compatible(parent, field),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(module: u32, path: &[&str], parent: Option<&TagRef>, extends: Option<&TagRef>) -> TagRef {
        TagRef::new(TagDef {
            path: path.iter().map(|s| (*s).to_string()).collect(),
            module: ModuleId(module),
            value: None,
            parent: parent.cloned(),
            extends: extends.cloned(),
        })
    }

    #[test]
    fn same_module_hierarchy() {
        let error = tag(0, &["error"], None, None);
        let timeout = tag(0, &["error", "timeout"], Some(&error), None);
        let success = tag(0, &["success"], None, None);

        assert!(is_compatible(&error, &error));
        assert!(is_compatible(&timeout, &error));
        assert!(!is_compatible(&error, &timeout));
        assert!(!is_compatible(&success, &error));
    }

    #[test]
    fn cross_module_extends() {
        let fail = tag(0, &["fail"], None, None);
        let sqlite_fail = tag(1, &["fail"], None, Some(&fail));
        let locked = tag(1, &["fail", "locked"], Some(&sqlite_fail), None);

        assert!(is_compatible(&sqlite_fail, &fail));
        assert!(is_compatible(&locked, &fail));
        assert!(!is_compatible(&fail, &sqlite_fail));
    }

    #[test]
    fn partial_matching_is_a_path_suffix() {
        let timeout = tag(0, &["status", "error", "timeout"], None, None);
        assert!(timeout.matches_partial(&["timeout".into()]));
        assert!(timeout.matches_partial(&["error".into(), "timeout".into()]));
        assert!(timeout.matches_partial(&["status".into(), "error".into(), "timeout".into()]));
        assert!(!timeout.matches_partial(&["error".into()]));
        assert!(!timeout.matches_partial(&["timeout".into(), "error".into()]));
        assert!(!timeout.matches_partial(&[]));
    }

    #[test]
    fn identity_not_name() {
        let a = tag(0, &["ok"], None, None);
        let b = tag(1, &["ok"], None, None);
        assert!(!TagRef::same(&a, &b));
        assert_eq!(a.full_name(), b.full_name());
    }
}
