//! Constant folding over resolved COP trees.
//!
//! Folding runs bottom-up: literals become `value.constant` nodes, operators
//! over constants apply, struct literals whose fields are all constant become
//! struct constants (spreads of constant structs splice in place), shape
//! literals whose constraints and defaults are constant become shape value
//! constants, and references to already-folded definitions substitute their
//! values.
//!
//! Division by zero is never folded: the site is recorded for reporting and
//! left intact so running it produces the `#fail.div_zero` failure at
//! runtime.
//!
//! Definition folding drives `cop_fold` across a module's definition DAG with
//! an in-progress set for cycle detection, so each definition is folded at
//! most once.

use std::rc::Rc;

use ahash::AHashSet;

use crate::{
    cop::{Cop, CopTag, Span},
    loader::Loader,
    module::{Definition, ModuleId},
    ops::{self, BinaryOp, UnaryOp},
    shape::{BlockShape, FieldDef, ShapeDef, ShapeRef},
    token::decode_number,
    value::{FieldKey, Value},
};

/// Folding context: the loader for reference lookups plus the record of
/// division-by-zero sites encountered.
pub struct FoldCtx<'a> {
    pub loader: &'a Loader,
    pub div_zero_sites: Vec<Option<Span>>,
}

impl<'a> FoldCtx<'a> {
    #[must_use]
    pub fn new(loader: &'a Loader) -> Self {
        Self { loader, div_zero_sites: Vec::new() }
    }
}

/// Folds one COP tree. Returns the original node unchanged when nothing
/// reduced.
pub fn cop_fold(cop: &Cop, ctx: &mut FoldCtx<'_>) -> Cop {
    let mut kids = Vec::with_capacity(cop.kids.len());
    let mut changed = false;
    for kid in &cop.kids {
        let folded = cop_fold(kid, ctx);
        if !changed && folded != *kid {
            changed = true;
        }
        kids.push(folded);
    }

    match cop.tag {
        CopTag::ValueText => {
            let text = cop.attrs.literal.as_deref().unwrap_or("");
            Cop::constant(Value::text(text), Some(cop))
        }
        CopTag::ValueNumber => match cop.attrs.literal.as_deref().and_then(|l| decode_number(l).ok()) {
            Some(number) => Cop::constant(Value::Number(number), Some(cop)),
            None => rebuild_if(cop, kids, changed),
        },
        CopTag::ValueMathUnary => {
            let op = cop.attrs.op.as_deref().and_then(UnaryOp::parse);
            if op == Some(UnaryOp::Pos) {
                return kids.into_iter().next().unwrap_or_else(|| cop.clone());
            }
            if let (Some(op), Some(value)) = (op, kids.first().and_then(Cop::constant_value))
                && let Ok(result) = ops::math_unary(op, value)
            {
                return Cop::constant(result, Some(cop));
            }
            rebuild_if(cop, kids, changed)
        }
        CopTag::ValueMathBinary => {
            let op = cop.attrs.op.as_deref().and_then(BinaryOp::parse);
            let left = kids.first().and_then(Cop::constant_value);
            let right = kids.get(1).and_then(Cop::constant_value);
            if let (Some(op), Some(left), Some(right)) = (op, left, right) {
                match ops::math_binary(op, left, right) {
                    Ok(result) => return Cop::constant(result, Some(cop)),
                    Err(ops::OpError::DivideByZero) => {
                        // Left for runtime; remember the site for reporting.
                        ctx.div_zero_sites.push(cop.span);
                    }
                    Err(ops::OpError::Type { .. }) => {}
                }
            }
            rebuild_if(cop, kids, changed)
        }
        CopTag::ValueCompare => {
            let op = cop.attrs.op.as_deref().and_then(BinaryOp::parse);
            let left = kids.first().and_then(Cop::constant_value);
            let right = kids.get(1).and_then(Cop::constant_value);
            if let (Some(op), Some(left), Some(right)) = (op, left, right)
                && let Ok(result) = ops::compare(op, left, right, self_builtins(ctx))
            {
                return Cop::constant(result, Some(cop));
            }
            rebuild_if(cop, kids, changed)
        }
        CopTag::StructDefine => match fold_struct(&kids) {
            Some(value) => Cop::constant(value, Some(cop)),
            None => rebuild_if(cop, kids, changed),
        },
        CopTag::ShapeDefine | CopTag::ShapeUnion => {
            let rebuilt = cop.rebuild(kids);
            match shape_from_cop(&rebuilt) {
                Ok(shape) => Cop::constant(Value::Shape(shape), Some(cop)),
                Err(_) => rebuilt,
            }
        }
        CopTag::ValueReference => {
            let module = cop.attrs.module.map(ModuleId);
            let qualified = cop.attrs.qualified.as_deref();
            if let (Some(module), Some(qualified)) = (module, qualified)
                && let Some(def) = ctx.loader.find_definition(module, qualified)
                && let Some(value) = def.folded.get()
            {
                return Cop::constant(value.clone(), Some(cop));
            }
            cop.clone()
        }
        _ => rebuild_if(cop, kids, changed),
    }
}

fn self_builtins<'b>(ctx: &'b FoldCtx<'_>) -> &'b crate::builtins::Builtins {
    ctx.loader.builtins()
}

fn rebuild_if(cop: &Cop, kids: Vec<Cop>, changed: bool) -> Cop {
    if changed { cop.rebuild(kids) } else { cop.clone() }
}

/// Builds a struct constant when every field folded; spreads splice their
/// fields, with named keys replacing earlier fields of the same name.
fn fold_struct(kids: &[Cop]) -> Option<Value> {
    let mut fields: Vec<(FieldKey, Value)> = Vec::new();
    for kid in kids {
        match kid.tag {
            CopTag::StructPosfield => {
                let value = kid.kid(0).and_then(Cop::constant_value)?;
                fields.push((FieldKey::unnamed(), value.clone()));
            }
            CopTag::StructNamefield => {
                let name = kid.name_kid().and_then(Cop::simple_identifier)?;
                let value = kid.value_kid().and_then(Cop::constant_value)?;
                merge_field(&mut fields, FieldKey::name(name), value.clone());
            }
            CopTag::StructSpread => {
                let value = kid.kid(0).and_then(Cop::constant_value)?;
                let spread = value.as_struct_fields()?;
                for (key, value) in spread {
                    match key {
                        FieldKey::Name(_) => merge_field(&mut fields, key.clone(), value.clone()),
                        FieldKey::Unnamed(_) => fields.push((FieldKey::unnamed(), value.clone())),
                    }
                }
            }
            _ => return None,
        }
    }
    Some(Value::struct_from(fields))
}

/// Inserts a named field, replacing an earlier field with the same name.
fn merge_field(fields: &mut Vec<(FieldKey, Value)>, key: FieldKey, value: Value) {
    if let FieldKey::Name(name) = &key
        && let Some(existing) = fields
            .iter_mut()
            .find(|(k, _)| k.as_name() == Some(name.as_ref()))
    {
        existing.1 = value;
        return;
    }
    fields.push((key, value));
}

/// Builds a [`ShapeRef`] from a shape COP whose constraints and defaults have
/// already folded to constants.
///
/// # Errors
/// Returns a message naming the first unresolved part.
pub fn shape_from_cop(cop: &Cop) -> Result<ShapeRef, String> {
    match cop.tag {
        CopTag::ShapeUnion => {
            let variants = cop
                .kids
                .iter()
                .map(shape_operand)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ShapeRef::union(variants))
        }
        CopTag::ShapeDefine => {
            let mut fields = Vec::with_capacity(cop.kids.len());
            for kid in &cop.kids {
                if kid.tag != CopTag::ShapeField {
                    return Err(format!("unexpected {} inside a shape", kid.tag));
                }
                fields.push(field_from_cop(kid)?);
            }
            if cop.attrs.op.as_deref() == Some("block") {
                Ok(ShapeRef::Block(Rc::new(BlockShape { fields })))
            } else {
                Ok(ShapeRef::Def(Rc::new(ShapeDef {
                    qualified: String::new(),
                    fields,
                    variants: None,
                })))
            }
        }
        _ => shape_operand(cop),
    }
}

fn field_from_cop(cop: &Cop) -> Result<FieldDef, String> {
    let op = cop.attrs.op.as_deref().unwrap_or("");
    let mut kids = cop.kids.iter();
    let constraint = if op.starts_with('~') {
        let kid = kids.next().ok_or("shape field missing its constraint")?;
        Some(shape_operand(kid)?)
    } else {
        None
    };
    let default = if op.ends_with('=') {
        let kid = kids.next().ok_or("shape field missing its default")?;
        let value = kid
            .constant_value()
            .ok_or("shape field default is not a constant")?;
        Some(value.clone())
    } else {
        None
    };
    Ok(FieldDef {
        name: cop.attrs.name.as_deref().map(Rc::from),
        constraint,
        default,
    })
}

/// A shape in operand position: a folded constant, or a nested literal.
fn shape_operand(cop: &Cop) -> Result<ShapeRef, String> {
    match cop.tag {
        CopTag::ValueConstant => match cop.constant_value() {
            Some(Value::Shape(shape)) => Ok(shape.clone()),
            Some(Value::Tag(tag)) => Ok(ShapeRef::Tag(tag.clone())),
            Some(other) => Err(format!("{other} is not a shape")),
            None => Err("constant node without a value".to_string()),
        },
        CopTag::ShapeDefine | CopTag::ShapeUnion => shape_from_cop(cop),
        CopTag::ValueIdentifier => Err(format!(
            "unresolved shape name '{}'",
            cop.identifier_name().unwrap_or_default()
        )),
        CopTag::ValueTagref => Err(format!(
            "unresolved tag '#{}'",
            cop.attrs.literal.as_deref().unwrap_or("?")
        )),
        CopTag::ValueReference => Err(format!(
            "shape reference '{}' did not fold",
            cop.attrs.qualified.as_deref().unwrap_or("?")
        )),
        other => Err(format!("{other} cannot be used as a shape")),
    }
}

/// Folds every definition of a module, dependencies first, with cycle
/// detection. Performs at most one fold attempt per definition.
pub fn fold_definitions(loader: &Loader, module: ModuleId) {
    let definitions = loader.module_definitions(module);
    let mut in_progress: AHashSet<String> = AHashSet::new();
    for def in definitions {
        ensure_folded(loader, &def, &mut in_progress);
    }
}

fn fold_key(def: &Definition) -> String {
    format!("{}:{}", def.module.0, def.qualified)
}

fn ensure_folded(loader: &Loader, def: &Rc<Definition>, in_progress: &mut AHashSet<String>) {
    if def.folded.get().is_some() {
        return;
    }
    let key = fold_key(def);
    if !in_progress.insert(key.clone()) {
        // Cycle: leave the reference unresolved.
        return;
    }

    let resolved = def.resolved.borrow().clone();
    if let Some(resolved) = resolved {
        // Fold dependencies first so their constants substitute.
        ensure_dependencies(loader, &resolved, in_progress);

        let mut ctx = FoldCtx::new(loader);
        let folded = cop_fold(&resolved, &mut ctx);
        if let Some(value) = folded.constant_value() {
            let _ = def.folded.set(value.clone());
        }
        *def.resolved.borrow_mut() = Some(folded);
    }

    in_progress.remove(&key);
}

fn ensure_dependencies(loader: &Loader, cop: &Cop, in_progress: &mut AHashSet<String>) {
    if cop.tag == CopTag::ValueReference
        && let (Some(module), Some(qualified)) = (cop.attrs.module, cop.attrs.qualified.as_deref())
        && let Some(dep) = loader.find_definition(ModuleId(module), qualified)
    {
        ensure_folded(loader, &dep, in_progress);
    }
    for kid in &cop.kids {
        ensure_dependencies(loader, kid, in_progress);
    }
}
