//! Block values: Comp's functions.
//!
//! A block is defined raw — body instructions plus the scopes captured from
//! its defining frame — and becomes invocable once morphed against a
//! block-shape, which supplies its input shape. Module-level function
//! definitions compile straight to raw blocks whose argument shape comes from
//! their signature.

use std::rc::Rc;

use crate::{
    codegen::InstrNode,
    module::ModuleId,
    shape::BlockShape,
    value::Value,
};

/// Scopes a raw block captures from the frame it was defined in.
///
/// `in` and `out` are never captured: piped input arrives at invocation time
/// and the output accumulator belongs to the running body.
#[derive(Debug, Clone)]
pub struct CapturedScopes {
    pub arg: Value,
    pub ctx: Value,
    pub module: ModuleId,
}

impl CapturedScopes {
    /// Captures for a module-level definition, where no enclosing function
    /// exists.
    #[must_use]
    pub fn module_level(module: ModuleId) -> Self {
        Self { arg: Value::empty(), ctx: Value::empty(), module }
    }
}

/// An untyped block: compiled body plus captured context, no input shape yet.
#[derive(Debug)]
pub struct RawBlock {
    /// Qualified definition name, or empty for anonymous blocks.
    pub qualified: String,
    /// Name the piped input binds to in the body.
    pub input_name: String,
    /// Name the argument struct binds to in the body.
    pub arg_name: String,
    /// Argument shape from the signature.
    pub arg_shape: Rc<BlockShape>,
    pub body: Rc<[InstrNode]>,
    pub captured: CapturedScopes,
    pub pure: bool,
    /// Decorator names lifted from the leading `|name` entries of the body.
    pub decorators: Vec<String>,
}

/// A typed block: a raw block plus the input shape it was morphed with.
#[derive(Debug)]
pub struct Block {
    pub raw: Rc<RawBlock>,
    pub input_shape: Rc<BlockShape>,
}

impl Block {
    #[must_use]
    pub fn new(raw: Rc<RawBlock>, input_shape: Rc<BlockShape>) -> Self {
        Self { raw, input_shape }
    }

    /// Short signature text for display.
    #[must_use]
    pub fn arg_shape_summary(&self) -> String {
        let names: Vec<&str> = self
            .raw
            .arg_shape
            .fields
            .iter()
            .filter_map(|f| f.name.as_deref())
            .collect();
        names.join(" ")
    }
}
