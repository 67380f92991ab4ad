//! Namespace building and lookup for modules.
//!
//! A namespace maps lookup names to prioritized bindings. Every qualified
//! definition contributes all of its suffix permutations (`a.b.c` is
//! reachable as `a.b.c`, `b.c`, and `c`), plus an import-prefixed permutation
//! for imported definitions. Collisions at equal priority merge into overload
//! sets when the parties are callable (blocks, shapes) and into [`Ambiguous`]
//! markers otherwise; higher priority simply shadows lower.
//!
//! Priorities: `-1` system builtins, `0` imported definitions, `1` local
//! definitions.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    module::{DefKind, Definition},
    value::Value,
};

/// What a lookup name binds to: a definition, or a plain value (system
/// builtins are values with no definition behind them).
#[derive(Debug, Clone)]
pub enum NamespaceValue {
    Def(Rc<Definition>),
    Const(Value),
}

impl NamespaceValue {
    /// Qualified name for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Def(def) => def.qualified.clone(),
            Self::Const(value) => value.to_string(),
        }
    }

    fn is_shape(&self) -> bool {
        match self {
            Self::Def(def) => def.kind == DefKind::Shape,
            Self::Const(value) => matches!(value, Value::Shape(_)),
        }
    }

    fn is_callable(&self) -> bool {
        match self {
            Self::Def(def) => matches!(def.kind, DefKind::Block | DefKind::Shape),
            Self::Const(value) => matches!(value, Value::Shape(_) | Value::Block(_)),
        }
    }
}

/// Overloaded callables sharing one name: at most one shape plus any number
/// of blocks.
#[derive(Debug, Clone, Default)]
pub struct OverloadSet {
    pub shape: Option<NamespaceValue>,
    pub callables: Vec<NamespaceValue>,
}

impl OverloadSet {
    fn add(&mut self, value: NamespaceValue) -> Result<(), ()> {
        if value.is_shape() {
            if self.shape.is_some() {
                return Err(());
            }
            self.shape = Some(value.clone());
        }
        self.callables.push(value);
        Ok(())
    }
}

/// A name conflict: the qualified names that collide. Referencing the name is
/// a build error; merely having the conflict is not.
#[derive(Debug, Clone)]
pub struct Ambiguous {
    pub qualified_names: Vec<String>,
}

/// One resolved binding.
#[derive(Debug, Clone)]
pub enum Binding {
    Single(NamespaceValue),
    Overloads(Rc<OverloadSet>),
    Ambiguous(Rc<Ambiguous>),
}

/// A binding with the priority it was inserted at.
#[derive(Debug, Clone)]
pub struct NamespaceSlot {
    pub priority: i8,
    pub binding: Binding,
}

/// The finished lookup map.
pub type Namespace = AHashMap<String, NamespaceSlot>;

/// Builds a module namespace with permutations, shadowing, overloads, and
/// conflict markers.
#[derive(Debug, Default)]
pub struct NamespaceBuilder {
    map: AHashMap<String, NamespaceSlot>,
}

impl NamespaceBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one definition under all its lookup permutations.
    pub fn add_definition(
        &mut self,
        qualified: &str,
        value: NamespaceValue,
        import_prefix: Option<&str>,
        is_local: bool,
    ) {
        let priority = if is_local { 1 } else { 0 };
        for name in permutations(qualified, import_prefix) {
            self.insert(&name, qualified, value.clone(), priority);
        }
    }

    /// Adds system builtins at priority −1, never displacing anything.
    pub fn add_system(&mut self, entries: &[(String, Value)]) {
        for (qualified, value) in entries {
            for name in permutations(qualified, None) {
                if !self.map.contains_key(&name) {
                    self.map.insert(
                        name,
                        NamespaceSlot {
                            priority: -1,
                            binding: Binding::Single(NamespaceValue::Const(value.clone())),
                        },
                    );
                }
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.map.get(name).map(|slot| &slot.binding)
    }

    /// All names currently marked ambiguous.
    #[must_use]
    pub fn conflicts(&self) -> Vec<(&str, &Ambiguous)> {
        self.map
            .iter()
            .filter_map(|(name, slot)| match &slot.binding {
                Binding::Ambiguous(ambiguous) => Some((name.as_str(), ambiguous.as_ref())),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn into_map(self) -> Namespace {
        self.map
    }

    fn insert(&mut self, name: &str, qualified: &str, value: NamespaceValue, priority: i8) {
        let Some(existing) = self.map.get_mut(name) else {
            self.map
                .insert(name.to_string(), NamespaceSlot { priority, binding: Binding::Single(value) });
            return;
        };

        if priority < existing.priority {
            return; // shadowed by a more local binding
        }
        if priority > existing.priority {
            *existing = NamespaceSlot { priority, binding: Binding::Single(value) };
            return;
        }

        // Equal priority: merge into overloads or mark ambiguous.
        let binding = std::mem::replace(&mut existing.binding, Binding::Ambiguous(Rc::new(Ambiguous {
            qualified_names: Vec::new(),
        })));
        existing.binding = merge(binding, qualified, value);
    }
}

fn merge(existing: Binding, qualified: &str, value: NamespaceValue) -> Binding {
    match existing {
        Binding::Ambiguous(ambiguous) => {
            let mut names = ambiguous.qualified_names.clone();
            if !names.contains(&qualified.to_string()) {
                names.push(qualified.to_string());
            }
            Binding::Ambiguous(Rc::new(Ambiguous { qualified_names: names }))
        }
        Binding::Overloads(set) => {
            if value.is_callable() {
                let mut set = (*set).clone();
                match set.add(value) {
                    Ok(()) => Binding::Overloads(Rc::new(set)),
                    Err(()) => {
                        // Two shapes under one name.
                        let mut names: Vec<String> =
                            set.callables.iter().map(NamespaceValue::describe).collect();
                        names.push(qualified.to_string());
                        Binding::Ambiguous(Rc::new(Ambiguous { qualified_names: names }))
                    }
                }
            } else {
                let mut names: Vec<String> = set.callables.iter().map(NamespaceValue::describe).collect();
                names.push(qualified.to_string());
                Binding::Ambiguous(Rc::new(Ambiguous { qualified_names: names }))
            }
        }
        Binding::Single(first) => {
            if first.is_callable() && value.is_callable() {
                let mut set = OverloadSet::default();
                let first_name = first.describe();
                if set.add(first).is_ok() && set.add(value).is_ok() {
                    Binding::Overloads(Rc::new(set))
                } else {
                    Binding::Ambiguous(Rc::new(Ambiguous {
                        qualified_names: vec![first_name, qualified.to_string()],
                    }))
                }
            } else {
                Binding::Ambiguous(Rc::new(Ambiguous {
                    qualified_names: vec![first.describe(), qualified.to_string()],
                }))
            }
        }
    }
}

/// Strips a stable `.iNNN` overload suffix.
#[must_use]
pub fn strip_overload_suffix(qualified: &str) -> &str {
    let Some((base, last)) = qualified.rsplit_once('.') else {
        return qualified;
    };
    let mut chars = last.chars();
    if chars.next() == Some('i') && last.len() > 1 && chars.all(|c| c.is_ascii_digit()) {
        base
    } else {
        qualified
    }
}

/// All lookup names one qualified name is reachable under.
fn permutations(qualified: &str, import_prefix: Option<&str>) -> Vec<String> {
    let base = strip_overload_suffix(qualified);
    let mut names = Vec::new();
    if let Some(prefix) = import_prefix {
        names.push(format!("{prefix}.{base}"));
    }
    let parts: Vec<&str> = base.split('.').collect();
    for start in 0..parts.len() {
        names.push(parts[start..].join("."));
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{num::Decimal, shape::{PrimitiveShape, ShapeRef}};

    fn const_value(n: i64) -> NamespaceValue {
        NamespaceValue::Const(Value::Number(Decimal::from_i64(n)))
    }

    fn shape_value() -> NamespaceValue {
        NamespaceValue::Const(Value::Shape(ShapeRef::Primitive(PrimitiveShape::Num)))
    }

    #[test]
    fn suffix_permutations() {
        assert_eq!(
            permutations("display.set_mode.i001", Some("pg")),
            vec!["pg.display.set_mode", "display.set_mode", "set_mode"]
        );
        assert_eq!(strip_overload_suffix("add.i003"), "add");
        assert_eq!(strip_overload_suffix("add.inner"), "add.inner");
        assert_eq!(strip_overload_suffix("i001"), "i001");
    }

    #[test]
    fn local_shadows_import_shadows_system() {
        let mut builder = NamespaceBuilder::new();
        builder.add_system(&[("host".to_string(), Value::text("system"))]);
        builder.add_definition("host", const_value(1), None, false);
        builder.add_definition("server.host", const_value(2), None, true);

        match builder.lookup("host") {
            Some(Binding::Single(NamespaceValue::Const(v))) => {
                assert_eq!(*v, Value::Number(Decimal::from_i64(2)));
            }
            other => panic!("unexpected binding: {other:?}"),
        }
    }

    #[test]
    fn non_callable_collision_is_ambiguous() {
        let mut builder = NamespaceBuilder::new();
        builder.add_definition("server.port", const_value(80), None, true);
        builder.add_definition("client.port", const_value(8080), None, true);

        match builder.lookup("port") {
            Some(Binding::Ambiguous(ambiguous)) => {
                assert_eq!(ambiguous.qualified_names.len(), 2);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        // The fully qualified names stay reachable.
        assert!(matches!(builder.lookup("server.port"), Some(Binding::Single(_))));
    }

    #[test]
    fn callables_overload_and_two_shapes_conflict() {
        let mut builder = NamespaceBuilder::new();
        builder.add_definition("a.point", shape_value(), None, true);
        builder.add_definition("b.point", shape_value(), None, true);
        assert!(matches!(builder.lookup("point"), Some(Binding::Ambiguous(_))));
    }
}
