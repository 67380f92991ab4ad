//! Identifier resolution.
//!
//! Walks a definition's original COP bottom-up, producing a new tree in which
//! every identifier that resolves unambiguously in the module's namespace
//! becomes a `value.reference` (for definitions) or `value.constant` (for
//! system builtins), and every tag literal becomes a tag constant. Identifiers
//! that hit an overload set stay identifiers for call-site dispatch; names
//! matching an enclosing block's parameters are never touched; everything
//! else unresolved is left for the runtime scope search.
//!
//! Referencing an ambiguous name is the build-time error; an unused conflict
//! is not.

use ahash::AHashSet;

use crate::{
    cop::{Cop, CopTag},
    error::BuildError,
    loader::Loader,
    module::ModuleId,
    namespace::{Binding, NamespaceValue},
    value::Value,
};

/// Resolves every definition of a module that is not already resolved.
///
/// # Errors
/// Returns the first ambiguous or undefined reference error.
pub fn resolve_definitions(loader: &Loader, module: ModuleId) -> Result<(), BuildError> {
    for def in loader.module_definitions(module) {
        if def.resolved.borrow().is_some() {
            continue;
        }
        let params = base_params();
        let resolved = resolve_cop(&def.original_cop, loader, module, &params)?;
        *def.resolved.borrow_mut() = Some(resolved);
    }
    Ok(())
}

/// Names the runtime scope search owns; the resolver leaves them alone.
fn base_params() -> AHashSet<String> {
    ["in", "out", "arg", "ctx", "mod", "local", "input", "args"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

/// Resolves one COP tree against a module's namespace.
///
/// # Errors
/// Returns ambiguity errors for referenced conflicts and undefined-tag errors
/// for tag literals that match nothing.
pub fn resolve_cop(
    cop: &Cop,
    loader: &Loader,
    module: ModuleId,
    params: &AHashSet<String>,
) -> Result<Cop, BuildError> {
    match cop.tag {
        CopTag::ValueIdentifier => resolve_identifier(cop, loader, module, params),
        CopTag::ValueTagref => {
            let path = cop.attrs.literal.as_deref().unwrap_or("");
            let tag = resolve_tag(loader, module, path, cop)?;
            Ok(Cop::constant(Value::Tag(tag), Some(cop)))
        }
        CopTag::ValueBlock => {
            let (Some(signature), Some(body)) = (cop.signature(), cop.body()) else {
                return Ok(cop.clone());
            };
            // Signature constraints and defaults resolve in the outer scope.
            let new_signature = resolve_kids(signature, loader, module, params)?;

            // The block's parameters shadow module names inside the body.
            let mut inner = params.clone();
            for field in &signature.kids {
                if let Some(name) = &field.attrs.name {
                    inner.insert(name.clone());
                    inner.insert(format!("${name}"));
                }
            }
            let new_body = resolve_cop(body, loader, module, &inner)?;
            Ok(cop.rebuild(vec![new_signature, new_body]))
        }
        CopTag::ModNamefield | CopTag::StructNamefield | CopTag::StructLetassign => {
            // The name kid is a binding target, never a reference.
            let (Some(name), Some(value)) = (cop.name_kid(), cop.value_kid()) else {
                return Ok(cop.clone());
            };
            let new_value = resolve_cop(value, loader, module, params)?;
            Ok(cop.rebuild(vec![name.clone(), new_value]))
        }
        _ => resolve_kids(cop, loader, module, params),
    }
}

fn resolve_kids(
    cop: &Cop,
    loader: &Loader,
    module: ModuleId,
    params: &AHashSet<String>,
) -> Result<Cop, BuildError> {
    let mut kids = Vec::with_capacity(cop.kids.len());
    let mut changed = false;
    for kid in &cop.kids {
        let resolved = resolve_cop(kid, loader, module, params)?;
        if !changed && resolved != *kid {
            changed = true;
        }
        kids.push(resolved);
    }
    Ok(if changed { cop.rebuild(kids) } else { cop.clone() })
}

fn resolve_identifier(
    cop: &Cop,
    loader: &Loader,
    module: ModuleId,
    params: &AHashSet<String>,
) -> Result<Cop, BuildError> {
    let Some(name) = cop.identifier_name() else {
        // Computed or text segments: resolve inside any [expr] kids, keep the
        // identifier itself for runtime field access.
        return resolve_kids(cop, loader, module, params);
    };

    // Parameters and scope names belong to the runtime search.
    let root = name.split('.').next().unwrap_or(&name);
    if params.contains(&name) || params.contains(root) || root.starts_with('$') {
        return Ok(cop.clone());
    }

    match loader.namespace_binding(module, &name) {
        Some(Binding::Single(NamespaceValue::Def(def))) => {
            let prefix = import_prefix(loader, module, &name, def.module);
            Ok(Cop::reference(&def.qualified, def.module.0, prefix.as_deref(), Some(cop)))
        }
        Some(Binding::Single(NamespaceValue::Const(value))) => {
            Ok(Cop::constant(value, Some(cop)))
        }
        // Overloads dispatch at the call site; leave the identifier.
        Some(Binding::Overloads(_)) => Ok(cop.clone()),
        Some(Binding::Ambiguous(ambiguous)) => Err(BuildError::AmbiguousReference {
            name,
            candidates: ambiguous.qualified_names.clone(),
        }),
        // Could still be a field of the piped input at runtime.
        None => Ok(cop.clone()),
    }
}

/// The import prefix a cross-module reference was reached through, for
/// diagnostics and unparse.
fn import_prefix(loader: &Loader, module: ModuleId, name: &str, target: ModuleId) -> Option<String> {
    if target == module {
        return None;
    }
    let prefix = name.split('.').next()?;
    loader
        .import_target(module, prefix)
        .filter(|id| *id == target)
        .map(|_| prefix.to_string())
}

/// Resolves a tag literal: local tags first, then each import, then the
/// builtins.
///
/// # Errors
/// Ambiguity within a scope or across imports is an error; so is no match
/// anywhere.
fn resolve_tag(loader: &Loader, module: ModuleId, path: &str, cop: &Cop) -> Result<crate::tag::TagRef, BuildError> {
    let segments: Vec<String> = path.split('.').map(ToString::to_string).collect();

    if let Some(tag) = loader.lookup_local_tag(module, &segments)? {
        return Ok(tag);
    }

    let mut found: Vec<(String, crate::tag::TagRef)> = Vec::new();
    for (prefix, import) in loader.import_list(module) {
        if let Ok(Some(tag)) = loader.lookup_local_tag(import, &segments) {
            found.push((prefix, tag));
        }
    }
    for tag in loader.builtins().tags() {
        if tag.matches_partial(&segments) {
            found.push(("builtin".to_string(), tag));
        }
    }

    match found.len() {
        0 => Err(BuildError::UndefinedReference {
            name: format!("#{path}"),
            span: cop.span,
        }),
        1 => Ok(found.remove(0).1),
        _ => Err(BuildError::AmbiguousReference {
            name: format!("#{path}"),
            candidates: found
                .iter()
                .map(|(prefix, tag)| format!("{prefix}/#{}", tag.full_name()))
                .collect(),
        }),
    }
}
