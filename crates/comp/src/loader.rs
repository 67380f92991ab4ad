//! Module loading and the preparation pipeline.
//!
//! The loader owns the module arena, the builtin system module, and the
//! stdlib search roots. Preparing a module runs the full pipeline: scan →
//! imports (recursive) → parse → extract → namespace → resolve → fold → pure
//! evaluate → finalize. Import cycles are tolerated because a module is
//! registered in the location cache before its own imports load, so a cycle
//! sees the partially prepared module and resolution simply finds fewer
//! constants there.
//!
//! Resource strings: `./…` and `../…` resolve against the importing module's
//! directory, bare names and `stdlib/…` against the configured search roots,
//! absolute paths as themselves. URL-like schemes are reserved and rejected.
//! File reads happen here only, never inside the engine loop.

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

use ahash::AHashMap;

use crate::{
    builtins::Builtins,
    codegen,
    engine::{Engine, Scopes},
    error::BuildError,
    fold,
    module::{DefKind, Definition, Module, ModuleId, extract_definitions},
    namespace::{Binding, NamespaceBuilder, NamespaceValue},
    parse::parse_module,
    pure,
    resolve::resolve_definitions,
    resource::ResourceLimits,
    scan::scan,
    tag::TagRef,
    value::{FieldKey, Value},
};

/// The source a module was loaded from, with the etag used for cache
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModuleSource {
    /// The resource string as requested.
    pub resource: String,
    /// Absolute location it resolved to.
    pub location: String,
    /// `"file"` or `"memory"`.
    pub source_type: String,
    /// `abspath:mtime_ns` for files.
    pub etag: String,
    pub content: String,
    /// Directory for this module's own relative imports.
    pub anchor: Option<PathBuf>,
}

/// Owns the module arena and drives preparation.
pub struct Loader {
    builtins: Builtins,
    limits: ResourceLimits,
    search_roots: Vec<PathBuf>,
    modules: RefCell<Vec<Rc<RefCell<Module>>>>,
    by_location: RefCell<AHashMap<String, ModuleId>>,
}

impl Loader {
    #[must_use]
    pub fn new(search_roots: Vec<PathBuf>) -> Self {
        let loader = Self {
            builtins: Builtins::new(),
            limits: ResourceLimits::default(),
            search_roots,
            modules: RefCell::new(Vec::new()),
            by_location: RefCell::new(AHashMap::new()),
        };
        // Reserve index 0 for the builtin module.
        let mut builtin = Module::new(crate::builtins::BUILTIN_MODULE, "builtin");
        builtin.finalized = true;
        for tag in loader.builtins.tags() {
            builtin.tags.insert(tag.full_name(), tag);
        }
        loader.modules.borrow_mut().push(Rc::new(RefCell::new(builtin)));
        loader
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Loads and prepares a module from in-memory source.
    ///
    /// # Errors
    /// Any build error from the pipeline.
    pub fn load_source(&self, name: &str, content: &str) -> Result<ModuleId, BuildError> {
        let id = self.new_module(name);
        let source = ModuleSource {
            resource: name.to_string(),
            location: format!("memory:{name}"),
            source_type: "memory".to_string(),
            etag: String::new(),
            content: content.to_string(),
            anchor: None,
        };
        self.prepare(id, &source)?;
        Ok(id)
    }

    /// Loads and prepares a module from a resource string.
    ///
    /// # Errors
    /// Loading or pipeline errors.
    pub fn load_resource(&self, resource: &str) -> Result<ModuleId, BuildError> {
        self.load_for_import(resource, None)
    }

    /// Locates a module resource without preparing it.
    ///
    /// When `etag` is given and still matches, returns `Ok(None)`: the caller
    /// already has the content.
    ///
    /// # Errors
    /// [`BuildError::UnsupportedResource`] for URL-like schemes,
    /// [`BuildError::ModuleNotFound`] when no candidate exists,
    /// [`BuildError::SourceTooLarge`] past the size limit.
    pub fn locate(
        &self,
        resource: &str,
        from_dir: Option<&Path>,
        etag: Option<&str>,
    ) -> Result<Option<ModuleSource>, BuildError> {
        if ["http://", "https://", "git+", "ssh://"]
            .iter()
            .any(|scheme| resource.starts_with(scheme))
        {
            return Err(BuildError::UnsupportedResource { resource: resource.to_string() });
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if resource.starts_with("./") || resource.starts_with("../") {
            let Some(base) = from_dir else {
                return Err(BuildError::ModuleNotFound {
                    resource: resource.to_string(),
                    searched: vec!["<relative import with no anchor>".to_string()],
                });
            };
            push_candidates(&mut candidates, &base.join(resource));
        } else if Path::new(resource).is_absolute() {
            push_candidates(&mut candidates, Path::new(resource));
        } else {
            let bare = resource.strip_prefix("stdlib/").unwrap_or(resource);
            for root in &self.search_roots {
                push_candidates(&mut candidates, &root.join(bare));
                candidates.push(root.join(bare).join("__init__.comp"));
            }
        }

        for candidate in &candidates {
            let Ok(meta) = std::fs::metadata(candidate) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if meta.len() > self.limits.max_source_bytes {
                return Err(BuildError::SourceTooLarge {
                    resource: resource.to_string(),
                    size: meta.len(),
                });
            }
            let location = candidate
                .canonicalize()
                .unwrap_or_else(|_| candidate.clone())
                .to_string_lossy()
                .into_owned();
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos());
            let fresh_etag = format!("{location}:{mtime}");
            if etag == Some(fresh_etag.as_str()) {
                return Ok(None);
            }
            let content = std::fs::read_to_string(candidate).map_err(|err| BuildError::Io {
                resource: resource.to_string(),
                message: err.to_string(),
            })?;
            let anchor = candidate.parent().map(Path::to_path_buf);
            return Ok(Some(ModuleSource {
                resource: resource.to_string(),
                location,
                source_type: "file".to_string(),
                etag: fresh_etag,
                content,
                anchor,
            }));
        }

        Err(BuildError::ModuleNotFound {
            resource: resource.to_string(),
            searched: candidates.iter().map(|p| p.display().to_string()).collect(),
        })
    }

    // --- arena access ---

    #[must_use]
    pub fn module(&self, id: ModuleId) -> Rc<RefCell<Module>> {
        Rc::clone(&self.modules.borrow()[id.0 as usize])
    }

    #[must_use]
    pub fn module_definitions(&self, id: ModuleId) -> Vec<Rc<Definition>> {
        self.module(id).borrow().definitions.values().cloned().collect()
    }

    #[must_use]
    pub fn find_definition(&self, id: ModuleId, qualified: &str) -> Option<Rc<Definition>> {
        self.module(id).borrow().definitions.get(qualified).cloned()
    }

    #[must_use]
    pub fn namespace_binding(&self, id: ModuleId, name: &str) -> Option<Binding> {
        self.module(id)
            .borrow()
            .namespace
            .get(name)
            .map(|slot| slot.binding.clone())
    }

    /// The `$mod` scope value: the module's validated pkg metadata.
    #[must_use]
    pub fn module_scope(&self, id: ModuleId) -> Value {
        self.module(id).borrow().scope.clone()
    }

    #[must_use]
    pub fn import_target(&self, id: ModuleId, prefix: &str) -> Option<ModuleId> {
        self.module(id).borrow().imports.get(prefix).copied()
    }

    #[must_use]
    pub fn import_list(&self, id: ModuleId) -> Vec<(String, ModuleId)> {
        self.module(id)
            .borrow()
            .imports
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }

    /// Looks up a tag by partial path in one module's registry.
    ///
    /// # Errors
    /// Ambiguity within the module.
    pub fn lookup_local_tag(&self, id: ModuleId, partial: &[String]) -> Result<Option<TagRef>, BuildError> {
        self.module(id).borrow().lookup_tag(partial)
    }

    /// Evaluates a definition with empty scopes, compiling on demand.
    /// Failures come back as failure values.
    #[must_use]
    pub fn evaluate(&self, id: ModuleId, qualified: &str) -> Value {
        let Some(def) = self.find_definition(id, qualified) else {
            return self
                .builtins
                .fail_value(&self.builtins.fail_missing, &format!("'{qualified}' is not defined"));
        };
        if let Some(value) = def.runtime_value() {
            return value;
        }
        let resolved = def.resolved.borrow().clone();
        let Some(resolved) = resolved else {
            return self
                .builtins
                .fail_value(&self.builtins.fail_runtime, &format!("'{qualified}' was never resolved"));
        };
        match codegen::generate_for_definition(&resolved, qualified) {
            Ok(program) => {
                let mut engine = Engine::new(self).with_limits(self.limits);
                engine.run(program, Scopes::module_level(id))
            }
            Err(err) => self
                .builtins
                .fail_value(&self.builtins.fail_runtime, &err.message),
        }
    }

    // --- pipeline ---

    fn new_module(&self, name: &str) -> ModuleId {
        let mut modules = self.modules.borrow_mut();
        let id = ModuleId(u32::try_from(modules.len()).unwrap_or(u32::MAX));
        modules.push(Rc::new(RefCell::new(Module::new(id, name))));
        id
    }

    fn load_for_import(&self, resource: &str, from_dir: Option<&Path>) -> Result<ModuleId, BuildError> {
        let source = self
            .locate(resource, from_dir, None)?
            .expect("no etag given, locate always returns content");
        if let Some(existing) = self.by_location.borrow().get(&source.location) {
            return Ok(*existing);
        }
        let id = self.new_module(resource);
        // Register before preparing so import cycles find this module.
        self.by_location
            .borrow_mut()
            .insert(source.location.clone(), id);
        self.prepare(id, &source)?;
        Ok(id)
    }

    fn prepare(&self, id: ModuleId, source: &ModuleSource) -> Result<(), BuildError> {
        if source.content.len() as u64 > self.limits.max_source_bytes {
            return Err(BuildError::SourceTooLarge {
                resource: source.resource.clone(),
                size: source.content.len() as u64,
            });
        }

        // Scan: imports, pkg metadata, docs. Never fails.
        let report = scan(&source.content);
        {
            let cell = self.module(id);
            let mut module = cell.borrow_mut();
            module.docs = report.docs.clone();
            module.anchor.clone_from(&source.anchor);
        }

        // Parse and extract definitions before touching imports, so an
        // import cycle arriving back here finds this module's definitions.
        let mod_cop = parse_module(&source.content)?;
        {
            let cell = self.module(id);
            let mut module = cell.borrow_mut();
            extract_definitions(&mut module, &mod_cop)?;
        }

        // Imports, recursively.
        for import in &report.imports {
            let target = self.load_for_import(&import.source, source.anchor.as_deref())?;
            let cell = self.module(id);
            cell.borrow_mut().imports.insert(import.name.clone(), target);
        }

        self.build_namespace(id);
        resolve_definitions(self, id)?;
        fold::fold_definitions(self, id);
        pure::evaluate_pure_definitions(self, id);
        self.finalize(id)
    }

    fn build_namespace(&self, id: ModuleId) {
        let mut builder = NamespaceBuilder::new();
        builder.add_system(&self.builtins.entries());

        for (prefix, import_id) in self.import_list(id) {
            for def in self.module_definitions(import_id) {
                if skip_in_namespace(&def.qualified) {
                    continue;
                }
                builder.add_definition(
                    &def.qualified,
                    NamespaceValue::Def(Rc::clone(&def)),
                    Some(&prefix),
                    false,
                );
            }
        }
        for def in self.module_definitions(id) {
            if skip_in_namespace(&def.qualified) {
                continue;
            }
            builder.add_definition(&def.qualified, NamespaceValue::Def(Rc::clone(&def)), None, true);
        }

        let cell = self.module(id);
        cell.borrow_mut().namespace = builder.into_map();
    }

    /// Finalize: compile block definitions, pick up constants the pure pass
    /// produced, validate `pkg.*`, build `$mod`, freeze.
    fn finalize(&self, id: ModuleId) -> Result<(), BuildError> {
        for def in self.module_definitions(id) {
            // The pure pass may have reduced a definition to a constant.
            if def.folded.get().is_none()
                && let Some(resolved) = def.resolved.borrow().as_ref()
                && let Some(value) = resolved.constant_value()
            {
                let _ = def.folded.set(value.clone());
            }

            if def.kind == DefKind::Block && def.compiled.borrow().is_none() {
                let resolved = def.resolved.borrow().clone();
                if let Some(resolved) = resolved
                    && let Ok(program) = codegen::generate_for_definition(&resolved, &def.qualified)
                {
                    let mut engine = Engine::new(self).with_limits(self.limits);
                    let value = engine.run(program, Scopes::module_level(id));
                    if !value.is_fail() {
                        *def.compiled.borrow_mut() = Some(value);
                    }
                }
            }
        }

        // pkg.* bindings must have folded to constants.
        let mut pkg_fields: Vec<(FieldKey, Value)> = Vec::new();
        for def in self.module_definitions(id) {
            if let Some(short) = def.qualified.strip_prefix("pkg.") {
                match def.folded.get() {
                    Some(value) => pkg_fields.push((FieldKey::name(short), value.clone())),
                    None => {
                        return Err(BuildError::InvalidModuleAssignment {
                            name: def.qualified.clone(),
                            reason: "pkg bindings must be constant".to_string(),
                        });
                    }
                }
            }
        }

        let cell = self.module(id);
        let mut module = cell.borrow_mut();
        for (key, value) in pkg_fields {
            if let Some(name) = key.as_name() {
                module.pkg.insert(name.to_string(), value);
            }
        }
        module.scope = Value::struct_from(
            module
                .pkg
                .iter()
                .map(|(name, value)| (FieldKey::name(name), value.clone()))
                .collect(),
        );
        module.finalized = true;
        Ok(())
    }
}

fn skip_in_namespace(qualified: &str) -> bool {
    qualified.starts_with("pkg.") || qualified == "tag" || qualified.starts_with("tag.")
}

fn push_candidates(candidates: &mut Vec<PathBuf>, base: &Path) {
    if base.extension().is_none() {
        candidates.push(base.with_extension("comp"));
    }
    candidates.push(base.to_path_buf());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_schemes_are_rejected() {
        let loader = Loader::new(vec![]);
        for resource in ["http://x", "https://x/y", "git+ssh://x", "ssh://x"] {
            assert!(matches!(
                loader.locate(resource, None, None),
                Err(BuildError::UnsupportedResource { .. })
            ));
        }
    }

    #[test]
    fn missing_modules_report_the_search_list() {
        let loader = Loader::new(vec![PathBuf::from("/nonexistent-root")]);
        match loader.locate("nothing", None, None) {
            Err(BuildError::ModuleNotFound { searched, .. }) => assert!(!searched.is_empty()),
            other => panic!("expected not-found, got {other:?}"),
        }
    }

    #[test]
    fn etag_caching_round_trip() {
        let dir = std::env::temp_dir().join("comp-loader-test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("mod_a.comp");
        std::fs::write(&file, "x = 1").unwrap();

        let loader = Loader::new(vec![dir.clone()]);
        let first = loader.locate("mod_a", None, None).unwrap().unwrap();
        assert_eq!(first.content, "x = 1");
        assert!(first.etag.contains("mod_a"));

        // Same etag: no change.
        assert!(loader.locate("mod_a", None, Some(first.etag.as_str())).unwrap().is_none());
        // Different etag: content again.
        assert!(loader.locate("mod_a", None, Some("stale")).unwrap().is_some());
        std::fs::remove_file(&file).ok();
    }
}
