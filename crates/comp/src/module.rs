//! Modules and definitions.
//!
//! A module aggregates the definitions extracted from one source text, the
//! modules it imports, its tag registry, and the namespace built over all of
//! them. Modules live in the loader's arena and are addressed by [`ModuleId`];
//! every cross-reference (tags, definitions, imports) goes through ids or
//! shared pointers into that arena, which keeps the graph cycle-tolerant.
//!
//! Definition lifecycle: created at extraction with `original_cop`; the
//! resolver fills `resolved`; the folder rewrites it in place and sets
//! `folded` once when the value reduces to a constant; the pure evaluator
//! rewrites `resolved` again; finalize sets `compiled` for block definitions
//! and freezes the module.

use std::{
    cell::{OnceCell, RefCell},
    rc::Rc,
};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    cop::{Cop, CopTag, Span},
    error::BuildError,
    namespace::Namespace,
    num::Decimal,
    scan::DocComment,
    tag::{TagDef, TagRef},
    value::Value,
};

/// Index of a module in the loader's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ModuleId(pub u32);

/// What kind of value a definition binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Block,
    Shape,
    Tag,
    Value,
}

/// A named module-level binding.
#[derive(Debug)]
pub struct Definition {
    /// Qualified name within the module, including any `.iNNN` suffix.
    pub qualified: String,
    pub module: ModuleId,
    pub kind: DefKind,
    /// Marked `!pure` in its signature; eligible for compile-time evaluation.
    pub pure: bool,
    /// True when the qualified name carries an auto-generated `.iNNN` suffix.
    pub auto_suffix: bool,
    pub original_cop: Cop,
    /// Reference-resolved (then folded, then pure-rewritten) COP.
    pub resolved: RefCell<Option<Cop>>,
    /// Constant value, set at most once by the folder.
    pub folded: OnceCell<Value>,
    /// Compiled block value for block definitions, set at finalize.
    pub compiled: RefCell<Option<Value>>,
    pub span: Option<Span>,
}

impl Definition {
    /// The value a reference to this definition loads at runtime.
    #[must_use]
    pub fn runtime_value(&self) -> Option<Value> {
        if let Some(folded) = self.folded.get() {
            return Some(folded.clone());
        }
        self.compiled.borrow().clone()
    }
}

/// A prepared (or in-preparation) module.
#[derive(Debug)]
pub struct Module {
    pub token: ModuleId,
    /// Display name: the resource it was loaded from, or a host-given name.
    pub name: String,
    /// Directory for resolving this module's relative imports.
    pub anchor: Option<std::path::PathBuf>,
    pub definitions: IndexMap<String, Rc<Definition>>,
    /// Import prefix to module id, in declaration order.
    pub imports: IndexMap<String, ModuleId>,
    /// Tag registry: full dotted path to definition.
    pub tags: IndexMap<String, TagRef>,
    pub namespace: Namespace,
    pub docs: Vec<DocComment>,
    /// Validated `pkg.*` metadata values.
    pub pkg: IndexMap<String, Value>,
    /// The `$mod` scope value.
    pub scope: Value,
    pub finalized: bool,
}

impl Module {
    #[must_use]
    pub fn new(token: ModuleId, name: &str) -> Self {
        Self {
            token,
            name: name.to_string(),
            anchor: None,
            definitions: IndexMap::new(),
            imports: IndexMap::new(),
            tags: IndexMap::new(),
            namespace: Namespace::default(),
            docs: Vec::new(),
            pkg: IndexMap::new(),
            scope: Value::empty(),
            finalized: false,
        }
    }

    /// Registers a tag, reusing an existing definition for the same path.
    pub fn define_tag(&mut self, path: &[String], value: Option<Value>, extends: Option<TagRef>) -> TagRef {
        let full_name = path.join(".");
        if let Some(existing) = self.tags.get(&full_name) {
            return existing.clone();
        }
        let parent = if path.len() > 1 {
            Some(self.define_tag(&path[..path.len() - 1], None, None))
        } else {
            None
        };
        let tag = TagRef::new(TagDef {
            path: SmallVec::from_iter(path.iter().cloned()),
            module: self.token,
            value,
            parent,
            extends,
        });
        self.tags.insert(full_name, tag.clone());
        tag
    }

    /// Finds the single tag whose path ends with `partial`, local tags only.
    ///
    /// Returns `Ok(None)` when nothing matches, an error when several do.
    pub fn lookup_tag(&self, partial: &[String]) -> Result<Option<TagRef>, BuildError> {
        let matches: Vec<&TagRef> = self
            .tags
            .values()
            .filter(|tag| tag.matches_partial(partial))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0].clone())),
            _ => Err(BuildError::AmbiguousReference {
                name: format!("#{}", partial.join(".")),
                candidates: matches.iter().map(|t| format!("#{}", t.full_name())).collect(),
            }),
        }
    }
}

/// Extracts definitions (and tags) from a parsed `mod.define` tree.
///
/// Block definitions auto-suffix as `name.iNNN` with a stable zero-padded
/// counter in declaration order, so overloads never collide in the
/// definitions map.
///
/// # Errors
/// Returns build errors for malformed bindings and violated name-prefix
/// contracts (`startup.*` must be blocks, `tag.*` must be shapes).
pub fn extract_definitions(module: &mut Module, mod_cop: &Cop) -> Result<(), BuildError> {
    let mut overload_counters: IndexMap<String, usize> = IndexMap::new();

    for field in &mod_cop.kids {
        if field.tag != CopTag::ModNamefield {
            continue;
        }
        let Some(name) = field.name_kid().and_then(Cop::identifier_name) else {
            return Err(BuildError::InvalidModuleAssignment {
                name: String::new(),
                reason: "binding name must be a dotted identifier".to_string(),
            });
        };
        let Some(value) = field.value_kid() else {
            return Err(BuildError::InvalidModuleAssignment {
                name,
                reason: "binding has no value".to_string(),
            });
        };

        let is_tag_binding = name == "tag" || name.starts_with("tag.");
        let kind = if is_tag_binding {
            DefKind::Tag
        } else {
            match value.tag {
                CopTag::ValueBlock => DefKind::Block,
                CopTag::ShapeDefine | CopTag::ShapeUnion => DefKind::Shape,
                _ => DefKind::Value,
            }
        };

        if name.starts_with("startup.") && kind != DefKind::Block {
            return Err(BuildError::InvalidModuleAssignment {
                name,
                reason: "startup bindings must be blocks".to_string(),
            });
        }
        if is_tag_binding {
            if !matches!(value.tag, CopTag::ShapeDefine) {
                return Err(BuildError::InvalidModuleAssignment {
                    name,
                    reason: "tag bindings must be shapes".to_string(),
                });
            }
            let base: Vec<String> = name
                .split('.')
                .skip(1)
                .map(ToString::to_string)
                .collect();
            if base.is_empty() {
                return Err(BuildError::InvalidModuleAssignment {
                    name,
                    reason: "tag bindings need a tag name".to_string(),
                });
            }
            module.define_tag(&base, None, None);
            extract_tags(module, &base, value);
        }

        let pure = value.tag == CopTag::ValueBlock && value.attrs.op.as_deref() == Some("pure");
        let (qualified, auto_suffix) = if kind == DefKind::Block {
            let counter = overload_counters.entry(name.clone()).or_insert(0);
            let qualified = format!("{name}.i{counter:03}");
            *counter += 1;
            (qualified, true)
        } else {
            (name.clone(), false)
        };

        let definition = Rc::new(Definition {
            qualified: qualified.clone(),
            module: module.token,
            kind,
            pure,
            auto_suffix,
            original_cop: value.clone(),
            resolved: RefCell::new(None),
            folded: OnceCell::new(),
            compiled: RefCell::new(None),
            span: field.span,
        });
        module.definitions.insert(qualified, definition);
    }
    Ok(())
}

/// Walks a tag-binding shape, declaring child tags for named fields and
/// grandchildren for nested groups. A field default supplies the tag's
/// value when it is a plain literal.
fn extract_tags(module: &mut Module, base: &[String], shape: &Cop) {
    for field in &shape.kids {
        if field.tag != CopTag::ShapeField {
            continue;
        }
        let Some(name) = field.attrs.name.clone() else {
            continue;
        };
        let mut path = base.to_vec();
        path.push(name);

        let op = field.attrs.op.as_deref().unwrap_or("");
        let mut kids = field.kids.iter();
        let nested = if op.starts_with('~') { kids.next() } else { None };
        let value = if op.ends_with('=') {
            kids.next().and_then(literal_value)
        } else {
            None
        };

        module.define_tag(&path, value, None);
        if let Some(nested) = nested
            && nested.tag == CopTag::ShapeDefine
        {
            extract_tags(module, &path, nested);
        }
    }
}

/// Decodes a literal number or text COP, for tag values at extraction time.
fn literal_value(cop: &Cop) -> Option<Value> {
    match cop.tag {
        CopTag::ValueNumber => {
            let literal = cop.attrs.literal.as_deref()?;
            Decimal::parse(literal).ok().map(Value::Number)
        }
        CopTag::ValueText => cop.attrs.literal.as_deref().map(Value::text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    #[test]
    fn blocks_auto_suffix_in_declaration_order() {
        let cop = parse_module("add = :(n)($in + n)\nadd = :(n ~text)(n)\nother = 1").unwrap();
        let mut module = Module::new(ModuleId(1), "test");
        extract_definitions(&mut module, &cop).unwrap();

        let names: Vec<&String> = module.definitions.keys().collect();
        assert_eq!(names, vec!["add.i000", "add.i001", "other"]);
        assert!(module.definitions["add.i000"].auto_suffix);
        assert!(!module.definitions["other"].auto_suffix);
        assert_eq!(module.definitions["other"].kind, DefKind::Value);
    }

    #[test]
    fn tag_bindings_declare_hierarchies() {
        let cop = parse_module("tag.status = (ok error (timeout parse))").unwrap();
        let mut module = Module::new(ModuleId(1), "test");
        extract_definitions(&mut module, &cop).unwrap();

        let names: Vec<&String> = module.tags.keys().collect();
        assert!(names.contains(&&"status".to_string()));
        assert!(names.contains(&&"status.error.timeout".to_string()));
        let timeout = &module.tags["status.error.timeout"];
        assert!(timeout.0.parent.is_some());
        assert_eq!(timeout.0.parent.as_ref().unwrap().full_name(), "status.error");
    }

    #[test]
    fn startup_must_be_a_block() {
        let cop = parse_module("startup.init = 5").unwrap();
        let mut module = Module::new(ModuleId(1), "test");
        assert!(matches!(
            extract_definitions(&mut module, &cop),
            Err(BuildError::InvalidModuleAssignment { .. })
        ));
    }

    #[test]
    fn tag_values_from_defaults() {
        let cop = parse_module("tag.level = (low = 1 high = 10)").unwrap();
        let mut module = Module::new(ModuleId(1), "test");
        extract_definitions(&mut module, &cop).unwrap();
        let low = &module.tags["level.low"];
        assert_eq!(low.0.value, Some(Value::Number(Decimal::from_i64(1))));
    }
}
