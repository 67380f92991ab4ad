//! Pure function evaluation at compile time.
//!
//! Definitions whose signature carries `!pure` compile to blocks, and every
//! other definition's resolved COP is rewritten bottom-up:
//!
//! - a `value.reference` to a pure callable becomes the constant result of an
//!   implicit nullary invocation,
//! - a `value.binding` whose callee is pure and whose arguments folded to a
//!   constant becomes the constant call result,
//! - a pipeline's maximal prefix of pure stages with constant inputs
//!   collapses to a constant, leaving the remainder untouched.
//!
//! Any failure during evaluation leaves that site alone; the original COP
//! stays runnable at runtime.

use ahash::AHashMap;

use crate::{
    codegen,
    cop::{Cop, CopTag},
    engine::{Engine, Scopes},
    loader::Loader,
    module::ModuleId,
    value::Value,
};

/// Runs the pure pass over one module's definitions.
pub fn evaluate_pure_definitions(loader: &Loader, module: ModuleId) {
    let definitions = loader.module_definitions(module);

    // Phase 1: compile every !pure definition to its block value.
    let mut pure_blocks: AHashMap<String, Value> = AHashMap::new();
    for def in &definitions {
        if !def.pure {
            continue;
        }
        let Some(resolved) = def.resolved.borrow().clone() else {
            continue;
        };
        let Ok(program) = codegen::generate_for_definition(&resolved, &def.qualified) else {
            continue;
        };
        let mut engine = Engine::new(loader).with_limits(loader.limits());
        let value = engine.run(program, Scopes::module_level(module));
        if matches!(value, Value::Block(_)) {
            pure_blocks.insert(def.qualified.clone(), value);
        }
    }
    if pure_blocks.is_empty() {
        return;
    }

    // Phase 2: rewrite each definition's resolved COP.
    for def in &definitions {
        let Some(resolved) = def.resolved.borrow().clone() else {
            continue;
        };
        let rewritten = eval_in_cop(&resolved, &pure_blocks, loader, module);
        if rewritten != resolved {
            *def.resolved.borrow_mut() = Some(rewritten);
        }
    }
}

fn eval_in_cop(
    cop: &Cop,
    pure_blocks: &AHashMap<String, Value>,
    loader: &Loader,
    module: ModuleId,
) -> Cop {
    // Pipelines evaluate stage by stage as a unit.
    if cop.tag == CopTag::ValuePipeline {
        return eval_pipeline(cop, pure_blocks, loader, module);
    }

    // Bottom-up: inner pure calls fold before outer nodes are checked.
    let mut kids = Vec::with_capacity(cop.kids.len());
    let mut changed = false;
    for kid in &cop.kids {
        let rewritten = eval_in_cop(kid, pure_blocks, loader, module);
        if !changed && rewritten != *kid {
            changed = true;
        }
        kids.push(rewritten);
    }
    let cop = if changed { cop.rebuild(kids) } else { cop.clone() };

    match cop.tag {
        // A reference to a pure function has implicit nullary-call semantics.
        CopTag::ValueReference => match try_eval_reference(&cop, pure_blocks, loader) {
            Some(constant) => constant,
            None => cop,
        },
        CopTag::ValueBinding => match try_eval_binding(&cop, pure_blocks, loader) {
            Some(constant) => constant,
            None => cop,
        },
        _ => cop,
    }
}

fn pure_block<'a>(pure_blocks: &'a AHashMap<String, Value>, cop: &Cop) -> Option<&'a Value> {
    if cop.tag != CopTag::ValueReference {
        return None;
    }
    pure_blocks.get(cop.attrs.qualified.as_deref()?)
}

fn try_eval_reference(cop: &Cop, pure_blocks: &AHashMap<String, Value>, loader: &Loader) -> Option<Cop> {
    let block = pure_block(pure_blocks, cop)?;
    run_pure(loader, block, Value::empty(), Value::empty())
        .map(|result| Cop::constant(result, Some(cop)))
}

fn try_eval_binding(cop: &Cop, pure_blocks: &AHashMap<String, Value>, loader: &Loader) -> Option<Cop> {
    let callee = cop.kid(0)?;
    let args = cop.kid(1)?.constant_value()?.clone();
    let block = pure_block(pure_blocks, callee)?;
    run_pure(loader, block, Value::empty(), args)
        .map(|result| Cop::constant(result, Some(cop)))
}

/// Evaluates the maximal prefix of pure stages whose inputs are constant.
fn eval_pipeline(
    cop: &Cop,
    pure_blocks: &AHashMap<String, Value>,
    loader: &Loader,
    module: ModuleId,
) -> Cop {
    let stages: Vec<Cop> = cop
        .kids
        .iter()
        .map(|kid| eval_in_cop(kid, pure_blocks, loader, module))
        .collect();
    let Some(first) = stages.first() else {
        return cop.clone();
    };

    let mut current = first.constant_value().cloned();
    let mut evaluated_up_to = 0usize;

    if current.is_some() {
        for (index, stage) in stages.iter().enumerate().skip(1) {
            let (callee, args) = match stage.tag {
                CopTag::ValueReference => (stage, None),
                CopTag::ValueBinding => {
                    let Some(callee) = stage.kid(0) else { break };
                    (callee, stage.kid(1))
                }
                _ => break,
            };
            let Some(block) = pure_block(pure_blocks, callee) else {
                break;
            };
            let args_value = match args {
                Some(args_cop) => match args_cop.constant_value() {
                    Some(value) => value.clone(),
                    None => break, // arguments not constant
                },
                None => Value::empty(),
            };
            let piped = current.clone().expect("checked above");
            match run_pure(loader, block, piped, args_value) {
                Some(result) => {
                    current = Some(result);
                    evaluated_up_to = index;
                }
                None => break,
            }
        }
    }

    if evaluated_up_to == stages.len() - 1 && stages.len() > 1 {
        // Every stage evaluated: the pipeline is a constant.
        return Cop::constant(current.expect("all stages evaluated"), Some(cop));
    }
    if evaluated_up_to > 0 {
        // Replace the evaluated prefix with its constant.
        let mut remaining = Vec::with_capacity(stages.len() - evaluated_up_to);
        remaining.push(Cop::constant(current.expect("prefix evaluated"), Some(first)));
        remaining.extend(stages.into_iter().skip(evaluated_up_to + 1));
        if remaining.len() == 1 {
            return remaining.remove(0);
        }
        return cop.rebuild(remaining);
    }

    // Nothing evaluated; keep any sub-rewrites.
    if stages != cop.kids {
        cop.rebuild(stages)
    } else {
        cop.clone()
    }
}

/// Runs one pure block; `None` when the result is a failure (the fold site
/// is left intact rather than poisoned).
fn run_pure(loader: &Loader, block: &Value, piped: Value, args: Value) -> Option<Value> {
    let mut engine = Engine::new(loader).with_limits(loader.limits());
    let result = engine.call(block, piped, args);
    if result.is_fail() { None } else { Some(result) }
}
