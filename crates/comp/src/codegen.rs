//! Code generation: resolved COP trees to linear instruction lists.
//!
//! Register numbering is implicit — an instruction's index is its result
//! register, and operands reference earlier indices. Constants in expression
//! positions always materialize through `Const` before use.
//!
//! Two instruction forms carry nested programs: `BuildBlock` (a block body
//! lowered in a fresh context) and `Fallback` (the `??` operator's arms, run
//! in child frames so the primary arm's failure can be caught).
//!
//! References to earlier named fields of the enclosing struct literal bind
//! here, at lowering time, to the register that computed the field. This is
//! the static realization of the out-then-in chained lookup: names that are
//! not fields of the enclosing literal fall through to the runtime scope
//! search, which ends at the piped input's fields.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    cop::{Cop, CopTag, Span},
    module::ModuleId,
    morph::MorphMode,
    ops::{BinaryOp, UnaryOp},
    shape::BlockShape,
    token::decode_number,
    value::Value,
};

/// A lowering failure; becomes a build error for the definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenError {
    pub message: String,
    pub span: Option<Span>,
}

impl CodegenError {
    fn new(message: impl Into<String>, cop: &Cop) -> Self {
        Self { message: message.into(), span: cop.span }
    }
}

/// One entry of a `BuildStruct` field list.
#[derive(Debug, Clone)]
pub enum FieldEntry {
    Named(Rc<str>, usize),
    Positional(usize),
    /// `..expr`: the struct in the register splices its fields in place.
    Spread(usize),
}

/// Field selector for postfix access.
#[derive(Debug, Clone)]
pub enum FieldSel {
    Name(String),
    /// Computed `[expr]` segment; the register holds the key.
    Computed(usize),
}

/// The un-invoked form of a block literal; `BuildBlock` captures the running
/// frame's scopes around this at execution time.
#[derive(Debug)]
pub struct BlockTemplate {
    pub qualified: String,
    pub signature: Rc<BlockShape>,
    pub body: Rc<[InstrNode]>,
    pub pure: bool,
    pub decorators: Vec<String>,
}

/// A single instruction. The index of an instruction in its program is the
/// register its result lands in.
#[derive(Debug, Clone)]
pub enum Instr {
    /// Materialise a constant.
    Const { value: Value },
    /// Read a named parameter, local, or scope field.
    LoadVar { name: String },
    /// Read a module definition resolved at build time.
    LoadRef { qualified: String, module: ModuleId },
    /// Bind a local from a computed register (`!let`).
    StoreVar { name: String, src: usize },
    BinOp { op: BinaryOp, left: usize, right: usize },
    UnOp { op: UnaryOp, operand: usize },
    /// Call with an explicit argument struct.
    Invoke { callable: usize, args: usize },
    /// Call with piped input and an argument struct.
    PipeInvoke { callable: usize, piped: usize, args: usize },
    /// Assemble an ordered struct. `!let` bindings emitted `StoreVar` inline
    /// and do not appear here.
    BuildStruct { fields: Vec<FieldEntry> },
    /// Build an un-invoked block, capturing the current frame's scopes.
    BuildBlock { template: Rc<BlockTemplate> },
    /// Shape-directed rewrite of a register against a shape register.
    Morph { src: usize, shape: usize, mode: MorphMode },
    /// `??`: run `primary` in a child frame that may fail; on failure run
    /// `fallback` instead.
    Fallback { primary: Rc<[InstrNode]>, fallback: Rc<[InstrNode]> },
    /// Postfix field access.
    Field { src: usize, sel: FieldSel },
}

/// An instruction with the source span it came from.
#[derive(Debug, Clone)]
pub struct InstrNode {
    pub instr: Instr,
    pub span: Option<Span>,
}

impl InstrNode {
    /// Short description for tracing.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.instr {
            Instr::Const { value } => format!("const {value}"),
            Instr::LoadVar { name } => format!("load {name}"),
            Instr::LoadRef { qualified, .. } => format!("ref {qualified}"),
            Instr::StoreVar { name, src } => format!("store {name} <- r{src}"),
            Instr::BinOp { op, left, right } => format!("binop r{left} {op} r{right}"),
            Instr::UnOp { op, operand } => format!("unop {op} r{operand}"),
            Instr::Invoke { callable, args } => format!("invoke r{callable}(r{args})"),
            Instr::PipeInvoke { callable, piped, args } => {
                format!("pipe r{piped} | r{callable}(r{args})")
            }
            Instr::BuildStruct { fields } => format!("struct/{}", fields.len()),
            Instr::BuildBlock { template } => format!("block {}", template.qualified),
            Instr::Morph { src, mode, .. } => format!("morph r{src} {mode}"),
            Instr::Fallback { .. } => "fallback".to_string(),
            Instr::Field { src, .. } => format!("field r{src}"),
        }
    }
}

/// Lowers one definition's resolved COP into a program.
///
/// # Errors
/// Returns a [`CodegenError`] for malformed or unresolved trees.
pub fn generate(cop: &Cop) -> Result<Rc<[InstrNode]>, CodegenError> {
    let mut ctx = Context::default();
    ctx.build_ensure_register(cop)?;
    Ok(ctx.instructions.into())
}

/// Code generation context for one program.
///
/// `struct_fields` is the stack of enclosing struct literals' named fields,
/// innermost last, mapping field names to the registers that computed them.
#[derive(Default)]
struct Context {
    instructions: Vec<InstrNode>,
    struct_fields: Vec<AHashMap<String, usize>>,
}

/// A built expression: either already in a register, or an inlineable
/// constant that only gets a `Const` when something needs the register.
enum Built {
    Reg(usize),
    Inline(Value),
}

impl Context {
    fn emit(&mut self, instr: Instr, span: Option<Span>) -> usize {
        let index = self.instructions.len();
        self.instructions.push(InstrNode { instr, span });
        index
    }

    fn build_ensure_register(&mut self, cop: &Cop) -> Result<usize, CodegenError> {
        match self.build_value(cop)? {
            Built::Reg(reg) => Ok(reg),
            Built::Inline(value) => Ok(self.emit(Instr::Const { value }, cop.span)),
        }
    }

    fn build_value(&mut self, cop: &Cop) -> Result<Built, CodegenError> {
        match cop.tag {
            CopTag::ValueConstant => {
                let value = cop
                    .constant_value()
                    .ok_or_else(|| CodegenError::new("constant node without a value", cop))?;
                Ok(Built::Inline(value.clone()))
            }
            CopTag::ValueNumber => {
                let literal = cop
                    .attrs
                    .literal
                    .as_deref()
                    .ok_or_else(|| CodegenError::new("number node without a literal", cop))?;
                let number = decode_number(literal).map_err(|message| CodegenError::new(message, cop))?;
                Ok(Built::Inline(Value::Number(number)))
            }
            CopTag::ValueText => {
                let text = cop
                    .attrs
                    .literal
                    .as_deref()
                    .ok_or_else(|| CodegenError::new("text node without a literal", cop))?;
                Ok(Built::Inline(Value::text(text)))
            }
            CopTag::ValueReference => {
                let qualified = cop
                    .attrs
                    .qualified
                    .clone()
                    .ok_or_else(|| CodegenError::new("reference without a qualified name", cop))?;
                let module = ModuleId(
                    cop.attrs
                        .module
                        .ok_or_else(|| CodegenError::new("reference without a module", cop))?,
                );
                Ok(Built::Reg(self.emit(Instr::LoadRef { qualified, module }, cop.span)))
            }
            CopTag::ValueIdentifier => self.build_identifier(cop),
            CopTag::ValueTagref => Err(CodegenError::new(
                format!("unresolved tag #{}", cop.attrs.literal.as_deref().unwrap_or("?")),
                cop,
            )),
            CopTag::ValueMathBinary | CopTag::ValueCompare | CopTag::ValueLogicBinary => {
                let op_text = cop.attrs.op.as_deref().unwrap_or("");
                let op = BinaryOp::parse(op_text)
                    .ok_or_else(|| CodegenError::new(format!("unknown operator '{op_text}'"), cop))?;
                let (Some(left_cop), Some(right_cop)) = (cop.left(), cop.kid(1)) else {
                    return Err(CodegenError::new("binary node missing operands", cop));
                };
                let left = self.build_ensure_register(left_cop)?;
                let right = self.build_ensure_register(right_cop)?;
                Ok(Built::Reg(self.emit(Instr::BinOp { op, left, right }, cop.span)))
            }
            CopTag::ValueMathUnary | CopTag::ValueLogicUnary => {
                let op_text = cop.attrs.op.as_deref().unwrap_or("");
                let op = UnaryOp::parse(op_text)
                    .ok_or_else(|| CodegenError::new(format!("unknown operator '{op_text}'"), cop))?;
                let operand_cop = cop
                    .kid(0)
                    .ok_or_else(|| CodegenError::new("unary node missing operand", cop))?;
                if op == UnaryOp::Pos {
                    return self.build_value(operand_cop);
                }
                let operand = self.build_ensure_register(operand_cop)?;
                Ok(Built::Reg(self.emit(Instr::UnOp { op, operand }, cop.span)))
            }
            CopTag::ValueInvoke => {
                let (Some(callee_cop), Some(args_cop)) = (cop.kid(0), cop.kid(1)) else {
                    return Err(CodegenError::new("invoke missing callee or arguments", cop));
                };
                let callable = self.build_ensure_register(callee_cop)?;
                let args = self.build_ensure_register(args_cop)?;
                Ok(Built::Reg(self.emit(Instr::Invoke { callable, args }, cop.span)))
            }
            CopTag::ValuePipeline => self.build_pipeline(cop),
            CopTag::ValueFallback => {
                let (Some(primary_cop), Some(fallback_cop)) = (cop.kid(0), cop.kid(1)) else {
                    return Err(CodegenError::new("fallback missing an arm", cop));
                };
                // Arms run in child frames with their own registers, so they
                // lower in fresh contexts; enclosing struct fields resolve
                // through the runtime scope search instead.
                let primary = generate(primary_cop)?;
                let fallback = generate(fallback_cop)?;
                Ok(Built::Reg(self.emit(Instr::Fallback { primary, fallback }, cop.span)))
            }
            CopTag::ValueMorph => {
                let (Some(operand_cop), Some(shape_cop)) = (cop.kid(0), cop.kid(1)) else {
                    return Err(CodegenError::new("morph missing operand or shape", cop));
                };
                let op_text = cop.attrs.op.as_deref().unwrap_or("~");
                let mode = op_text
                    .parse::<MorphMode>()
                    .map_err(|_| CodegenError::new(format!("unknown morph operator '{op_text}'"), cop))?;
                let src = self.build_ensure_register(operand_cop)?;
                let shape = self.build_ensure_register(shape_cop)?;
                Ok(Built::Reg(self.emit(Instr::Morph { src, shape, mode }, cop.span)))
            }
            CopTag::ValueBlock => Ok(Built::Reg(self.build_block(cop, "")?)),
            CopTag::StructDefine => self.build_struct(cop),
            CopTag::ShapeDefine | CopTag::ShapeUnion => Err(CodegenError::new(
                "shape did not fold to a constant (unresolved names inside?)",
                cop,
            )),
            _ => Err(CodegenError::new(format!("unsupported COP tag {}", cop.tag), cop)),
        }
    }

    fn build_identifier(&mut self, cop: &Cop) -> Result<Built, CodegenError> {
        let mut segments = cop.kids.iter();
        let root = segments
            .next()
            .ok_or_else(|| CodegenError::new("identifier has no segments", cop))?;
        let root_name = match root.tag {
            CopTag::IdentToken => root
                .attrs
                .literal
                .clone()
                .ok_or_else(|| CodegenError::new("identifier token without text", cop))?,
            _ => return Err(CodegenError::new("identifier cannot start with this segment", cop)),
        };
        let root_name = canonical_scope_name(&root_name);

        // Earlier fields of the enclosing struct literal bind statically.
        let mut reg = match self.lookup_struct_field(&root_name) {
            Some(reg) => reg,
            None => self.emit(Instr::LoadVar { name: root_name }, root.span),
        };

        for segment in segments {
            let sel = match segment.tag {
                CopTag::IdentToken | CopTag::IdentText => FieldSel::Name(
                    segment
                        .attrs
                        .literal
                        .clone()
                        .ok_or_else(|| CodegenError::new("identifier segment without text", cop))?,
                ),
                CopTag::IdentExpr => {
                    let expr = segment
                        .kid(0)
                        .ok_or_else(|| CodegenError::new("computed segment without expression", cop))?;
                    FieldSel::Computed(self.build_ensure_register(expr)?)
                }
                _ => return Err(CodegenError::new("unsupported identifier segment", cop)),
            };
            reg = self.emit(Instr::Field { src: reg, sel }, segment.span.or(cop.span));
        }
        Ok(Built::Reg(reg))
    }

    fn build_pipeline(&mut self, cop: &Cop) -> Result<Built, CodegenError> {
        let mut kids = cop.kids.iter();
        let first = kids
            .next()
            .ok_or_else(|| CodegenError::new("empty pipeline", cop))?;
        let mut piped = self.build_ensure_register(first)?;

        for stage in kids {
            match stage.tag {
                CopTag::ValueBinding => {
                    let (Some(callee_cop), Some(args_cop)) = (stage.kid(0), stage.kid(1)) else {
                        return Err(CodegenError::new("pipeline stage missing callee", stage));
                    };
                    let callable = self.build_ensure_register(callee_cop)?;
                    let args = self.build_ensure_register(args_cop)?;
                    piped = self.emit(Instr::PipeInvoke { callable, piped, args }, stage.span);
                }
                CopTag::ValueIdentifier | CopTag::ValueReference => {
                    let callable = self.build_ensure_register(stage)?;
                    let args = self.emit(Instr::BuildStruct { fields: Vec::new() }, stage.span);
                    piped = self.emit(Instr::PipeInvoke { callable, piped, args }, stage.span);
                }
                // An expression stage replaces the piped value outright.
                _ => piped = self.build_ensure_register(stage)?,
            }
        }
        Ok(Built::Reg(piped))
    }

    fn build_struct(&mut self, cop: &Cop) -> Result<Built, CodegenError> {
        let mut fields = Vec::new();
        self.struct_fields.push(AHashMap::new());
        let result = self.build_struct_fields(cop, &mut fields);
        self.struct_fields.pop();
        result?;
        Ok(Built::Reg(self.emit(Instr::BuildStruct { fields }, cop.span)))
    }

    fn build_struct_fields(&mut self, cop: &Cop, fields: &mut Vec<FieldEntry>) -> Result<(), CodegenError> {
        for kid in &cop.kids {
            match kid.tag {
                CopTag::StructPosfield => {
                    let value = kid
                        .kid(0)
                        .ok_or_else(|| CodegenError::new("positional field without a value", kid))?;
                    let reg = self.build_ensure_register(value)?;
                    fields.push(FieldEntry::Positional(reg));
                }
                CopTag::StructNamefield => {
                    let (Some(name_cop), Some(value_cop)) = (kid.name_kid(), kid.value_kid()) else {
                        return Err(CodegenError::new("named field missing name or value", kid));
                    };
                    let name = name_cop
                        .simple_identifier()
                        .ok_or_else(|| CodegenError::new("field name must be a simple identifier", kid))?
                        .to_string();
                    let reg = self.build_ensure_register(value_cop)?;
                    if let Some(scope) = self.struct_fields.last_mut() {
                        scope.insert(name.clone(), reg);
                    }
                    fields.push(FieldEntry::Named(Rc::from(name.as_str()), reg));
                }
                CopTag::StructLetassign => {
                    let (Some(name_cop), Some(value_cop)) = (kid.name_kid(), kid.value_kid()) else {
                        return Err(CodegenError::new("'!let' missing name or value", kid));
                    };
                    let name = name_cop
                        .simple_identifier()
                        .ok_or_else(|| CodegenError::new("'!let' name must be a simple identifier", kid))?
                        .to_string();
                    let reg = self.build_ensure_register(value_cop)?;
                    if let Some(scope) = self.struct_fields.last_mut() {
                        scope.insert(name.clone(), reg);
                    }
                    self.emit(Instr::StoreVar { name, src: reg }, kid.span);
                    // !let contributes no field to the struct.
                }
                CopTag::StructSpread => {
                    let value = kid
                        .kid(0)
                        .ok_or_else(|| CodegenError::new("'..' without a value", kid))?;
                    let reg = self.build_ensure_register(value)?;
                    fields.push(FieldEntry::Spread(reg));
                }
                CopTag::StructDecorator => {
                    return Err(CodegenError::new("decorator outside a block body", kid));
                }
                _ => return Err(CodegenError::new("unsupported struct field", kid)),
            }
        }
        Ok(())
    }

    fn build_block(&mut self, cop: &Cop, qualified: &str) -> Result<usize, CodegenError> {
        let signature_cop = cop
            .signature()
            .ok_or_else(|| CodegenError::new("block without a signature", cop))?;
        let body_cop = cop
            .body()
            .ok_or_else(|| CodegenError::new("block without a body", cop))?;

        let signature = Rc::new(block_shape_from_cop(signature_cop)?);

        // Leading decorators lift out of the body into the template.
        let mut decorators = Vec::new();
        let mut body_kids = Vec::new();
        for kid in &body_cop.kids {
            if kid.tag == CopTag::StructDecorator && body_kids.is_empty() {
                let name = kid
                    .kid(0)
                    .and_then(Cop::identifier_name)
                    .ok_or_else(|| CodegenError::new("decorator without a name", kid))?;
                decorators.push(name);
            } else {
                body_kids.push(kid.clone());
            }
        }
        let clean_body = body_cop.rebuild(body_kids);

        let mut body_ctx = Context::default();
        body_ctx.build_ensure_register(&clean_body)?;
        let body: Rc<[InstrNode]> = body_ctx.instructions.into();

        let template = Rc::new(BlockTemplate {
            qualified: qualified.to_string(),
            signature,
            body,
            pure: cop.attrs.op.as_deref() == Some("pure"),
            decorators,
        });
        Ok(self.emit(Instr::BuildBlock { template }, cop.span))
    }

    fn lookup_struct_field(&self, name: &str) -> Option<usize> {
        self.struct_fields
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }
}

/// Lowers a whole definition value; blocks get their qualified name attached.
///
/// # Errors
/// Returns a [`CodegenError`] for malformed or unresolved trees.
pub fn generate_for_definition(cop: &Cop, qualified: &str) -> Result<Rc<[InstrNode]>, CodegenError> {
    if cop.tag == CopTag::ValueBlock {
        let mut ctx = Context::default();
        ctx.build_block(cop, qualified)?;
        Ok(ctx.instructions.into())
    } else {
        generate(cop)
    }
}

/// `$in` and friends normalize to the plain scope names the engine knows.
fn canonical_scope_name(name: &str) -> String {
    match name {
        "$in" | "input" => "in".to_string(),
        "$arg" | "args" => "arg".to_string(),
        "$ctx" => "ctx".to_string(),
        "$mod" => "mod".to_string(),
        "$out" => "out".to_string(),
        "$local" => "local".to_string(),
        other => other.strip_prefix('$').unwrap_or(other).to_string(),
    }
}

/// Builds a [`BlockShape`] from a signature COP whose constraints and
/// defaults have folded to constants.
///
/// # Errors
/// Returns a [`CodegenError`] when a constraint or default is unresolved.
pub fn block_shape_from_cop(signature: &Cop) -> Result<BlockShape, CodegenError> {
    let shape = crate::fold::shape_from_cop(signature)
        .map_err(|message| CodegenError::new(message, signature))?;
    match shape {
        crate::shape::ShapeRef::Def(def) => Ok(BlockShape { fields: def.fields.clone() }),
        crate::shape::ShapeRef::Block(block) => Ok(BlockShape { fields: block.fields.clone() }),
        _ => Err(CodegenError::new("block signature is not a field list", signature)),
    }
}
