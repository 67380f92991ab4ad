//! The evaluation engine: a stackless scheduler over instruction frames.
//!
//! The engine never recurses on the host stack. It keeps an explicit vector
//! of [`Frame`]s; each step advances the top frame by one instruction.
//! Instructions that need a child computation (`Invoke`, `PipeInvoke`, the
//! arms of `Fallback`) push a frame and park the parent in a waiting state;
//! a finished frame pops and delivers its value to the parent's next
//! register.
//!
//! Failures are values, not unwinding: any instruction that produces a
//! `#fail`-tagged struct ends its frame with that value, and the delivery
//! loop pops every waiting ancestor until it finds one that entered its child
//! with `allow_failures` (the `??` operator's primary arm). That ancestor
//! receives the failure and decides — for `??`, by running the fallback arm.
//!
//! Within one frame instructions are strictly sequential; across the stack
//! there is no concurrency. Dropping the engine releases every frame; values
//! are immutable, so there is nothing to roll back.

use std::rc::Rc;

use crate::{
    builtins::Builtins,
    codegen::{BlockTemplate, FieldEntry, FieldSel, Instr, InstrNode},
    function::{CapturedScopes, RawBlock},
    loader::Loader,
    module::ModuleId,
    morph::{self, MorphResult},
    ops::{self, BinaryOp, UnaryOp},
    resource::ResourceLimits,
    shape::ShapeRef,
    tracer::{EngineTracer, NoopTracer},
    value::{BlockValue, FieldKey, Value},
};

/// The scope bundle a frame evaluates under.
#[derive(Debug, Clone)]
pub struct Scopes {
    /// `$in`: the piped input, immutable per frame.
    pub input: Value,
    /// `$arg`: the invocation's argument struct.
    pub arg: Value,
    /// `$ctx`: context owned by the enclosing function.
    pub ctx: Value,
    /// The module definitions resolve against.
    pub module: ModuleId,
    /// `!let` bindings; vanish with the frame.
    pub locals: Vec<(String, Value)>,
}

impl Scopes {
    /// Empty scopes for evaluating a module-level definition.
    #[must_use]
    pub fn module_level(module: ModuleId) -> Self {
        Self {
            input: Value::empty(),
            arg: Value::empty(),
            ctx: Value::empty(),
            module,
            locals: Vec::new(),
        }
    }
}

/// What a frame is parked on.
#[derive(Debug)]
enum Waiting {
    /// Mid-program, not waiting on a child.
    None,
    /// A child frame is computing this frame's current instruction.
    Child {
        /// Whether a failure from the child is received instead of bypassing.
        allow_failures: bool,
        /// The `??` fallback program to run when the primary child fails.
        fallback: Option<Rc<[InstrNode]>>,
    },
}

#[derive(Debug)]
struct Frame {
    program: Rc<[InstrNode]>,
    pc: usize,
    regs: Vec<Value>,
    scopes: Scopes,
    waiting: Waiting,
    /// Block bodies unwrap single-field results on return.
    is_block_body: bool,
    name: String,
}

impl Frame {
    fn new(program: Rc<[InstrNode]>, scopes: Scopes, is_block_body: bool, name: String) -> Self {
        let regs = Vec::with_capacity(program.len());
        Self { program, pc: 0, regs, scopes, waiting: Waiting::None, is_block_body, name }
    }
}

/// One step's outcome, applied to the stack after the frame borrow ends.
enum Action {
    /// Result for the current instruction (may be a failure, which ends the
    /// frame).
    Store(Value),
    /// Push a child frame; the parent waits.
    Call { frame: Frame, allow_failures: bool, fallback: Option<Rc<[InstrNode]>> },
}

/// Outcome of preparing a call: some callees produce a value without a frame.
enum CallOutcome {
    Frame(Frame),
    Value(Value),
}

/// The evaluation engine.
///
/// Parameterized over the tracer so production runs pay nothing for the
/// hooks.
pub struct Engine<'a, T: EngineTracer = NoopTracer> {
    loader: &'a Loader,
    tracer: T,
    limits: ResourceLimits,
    steps: u64,
}

impl<'a> Engine<'a, NoopTracer> {
    #[must_use]
    pub fn new(loader: &'a Loader) -> Self {
        Self::with_tracer(loader, NoopTracer)
    }
}

impl<'a, T: EngineTracer> Engine<'a, T> {
    #[must_use]
    pub fn with_tracer(loader: &'a Loader, tracer: T) -> Self {
        Self { loader, tracer, limits: ResourceLimits::default(), steps: 0 }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    fn builtins(&self) -> &Builtins {
        self.loader.builtins()
    }

    /// Runs a program to completion and returns its value, which is a
    /// failure value if anything failed without a handler.
    pub fn run(&mut self, program: Rc<[InstrNode]>, scopes: Scopes) -> Value {
        self.steps = 0;
        let root = Frame::new(program, scopes, false, "run".to_string());
        self.drive(root)
    }

    /// Invokes a callable value directly: morphs the arguments, pushes the
    /// body, runs to completion. Used by the pure evaluator and hosts.
    pub fn call(&mut self, callee: &Value, piped: Value, args: Value) -> Value {
        self.steps = 0;
        match self.begin_call(callee, Some(piped), args) {
            CallOutcome::Value(value) => value,
            CallOutcome::Frame(frame) => self.drive(frame),
        }
    }

    fn drive(&mut self, root: Frame) -> Value {
        let mut stack = vec![root];
        self.tracer.frame_push("run", stack.len());

        loop {
            if stack.len() > self.limits.max_frames {
                return self.fail_runtime("frame limit exceeded");
            }
            if let Some(max) = self.limits.max_steps
                && self.steps > max
            {
                return self.fail_runtime("step limit exceeded");
            }

            let frame = stack.last_mut().expect("stack never empty here");

            // Frame finished: deliver its result to the parent.
            if frame.pc >= frame.program.len() {
                let mut result = frame.regs.last().cloned().unwrap_or_else(Value::empty);
                if frame.is_block_body {
                    result = result.as_scalar();
                }
                stack.pop();
                self.tracer.frame_pop(stack.len(), &result);
                match self.deliver(&mut stack, result) {
                    Some(final_value) => return final_value,
                    None => continue,
                }
            } else {
                self.steps += 1;
                let node = frame.program[frame.pc].clone();
                self.tracer.instruction(frame.pc, &node.describe());
                let action = self.execute(&node, frame);
                match action {
                    Action::Store(value) => {
                        if value.is_fail() {
                            // A failure ends this frame immediately.
                            stack.pop();
                            self.tracer.frame_pop(stack.len(), &value);
                            match self.deliver(&mut stack, value) {
                                Some(final_value) => return final_value,
                                None => {}
                            }
                        } else {
                            let frame = stack.last_mut().expect("frame still on stack");
                            frame.regs.push(value);
                            frame.pc += 1;
                        }
                    }
                    Action::Call { frame: child, allow_failures, fallback } => {
                        let parent = stack.last_mut().expect("frame still on stack");
                        parent.waiting = Waiting::Child { allow_failures, fallback };
                        self.tracer.frame_push(&child.name, stack.len() + 1);
                        stack.push(child);
                    }
                }
            }
        }
    }

    /// Threads a finished child's result back down the stack. Failures bypass
    /// frames that did not opt in. Returns the final value once the stack is
    /// empty.
    fn deliver(&mut self, stack: &mut Vec<Frame>, result: Value) -> Option<Value> {
        loop {
            let Some(parent) = stack.last_mut() else {
                return Some(result);
            };
            let waiting = std::mem::replace(&mut parent.waiting, Waiting::None);
            match waiting {
                Waiting::Child { allow_failures, fallback } if result.is_fail() => {
                    if allow_failures {
                        if let Some(program) = fallback {
                            // ??: the primary failed; run the fallback arm.
                            let scopes = parent.scopes.clone();
                            parent.waiting = Waiting::Child { allow_failures: false, fallback: None };
                            let child = Frame::new(program, scopes, false, "fallback".to_string());
                            self.tracer.frame_push("fallback", stack.len() + 1);
                            stack.push(child);
                        } else {
                            // The frame asked to receive failures directly.
                            parent.regs.push(result);
                            parent.pc += 1;
                        }
                        return None;
                    }
                    // Bypass: close this frame and keep propagating.
                    self.tracer.failure_bypass(stack.len());
                    stack.pop();
                }
                Waiting::Child { .. } | Waiting::None => {
                    parent.regs.push(result);
                    parent.pc += 1;
                    return None;
                }
            }
        }
    }

    fn execute(&mut self, node: &InstrNode, frame: &mut Frame) -> Action {
        match &node.instr {
            Instr::Const { value } => Action::Store(value.clone()),
            Instr::LoadVar { name } => Action::Store(self.load_var(&frame.scopes, name)),
            Instr::LoadRef { qualified, module } => Action::Store(self.load_ref(*module, qualified)),
            Instr::StoreVar { name, src } => {
                let value = frame.regs[*src].clone();
                frame.scopes.locals.push((name.clone(), value.clone()));
                Action::Store(value)
            }
            Instr::BinOp { op, left, right } => {
                Action::Store(self.binary(*op, &frame.regs[*left], &frame.regs[*right]))
            }
            Instr::UnOp { op, operand } => Action::Store(self.unary(*op, &frame.regs[*operand])),
            Instr::Invoke { callable, args } => {
                let callee = frame.regs[*callable].clone();
                let args = frame.regs[*args].clone();
                match self.begin_call(&callee, None, args) {
                    CallOutcome::Frame(child) => {
                        Action::Call { frame: child, allow_failures: false, fallback: None }
                    }
                    CallOutcome::Value(value) => Action::Store(value),
                }
            }
            Instr::PipeInvoke { callable, piped, args } => {
                let callee = frame.regs[*callable].clone();
                let piped = frame.regs[*piped].clone();
                let args = frame.regs[*args].clone();
                match self.begin_call(&callee, Some(piped), args) {
                    CallOutcome::Frame(child) => {
                        Action::Call { frame: child, allow_failures: false, fallback: None }
                    }
                    CallOutcome::Value(value) => Action::Store(value),
                }
            }
            Instr::BuildStruct { fields } => Action::Store(self.build_struct(fields, &frame.regs)),
            Instr::BuildBlock { template } => {
                Action::Store(self.build_block(template, &frame.scopes))
            }
            Instr::Morph { src, shape, mode } => {
                Action::Store(self.morph_value(&frame.regs[*src], &frame.regs[*shape], *mode))
            }
            Instr::Fallback { primary, fallback } => {
                let child = Frame::new(
                    Rc::clone(primary),
                    frame.scopes.clone(),
                    false,
                    "fallback-primary".to_string(),
                );
                Action::Call {
                    frame: child,
                    allow_failures: true,
                    fallback: Some(Rc::clone(fallback)),
                }
            }
            Instr::Field { src, sel } => {
                Action::Store(self.field_access(&frame.regs[*src], sel, &frame.regs))
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Value {
        let result = match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                ops::math_binary(op, left, right)
            }
            BinaryOp::And | BinaryOp::Or => ops::logic_binary(op, left, right, self.builtins()),
            _ => ops::compare(op, left, right, self.builtins()),
        };
        self.op_result(result)
    }

    fn unary(&self, op: UnaryOp, operand: &Value) -> Value {
        let result = match op {
            UnaryOp::Not => ops::logic_unary(op, operand, self.builtins()),
            _ => ops::math_unary(op, operand),
        };
        self.op_result(result)
    }

    fn op_result(&self, result: Result<Value, ops::OpError>) -> Value {
        match result {
            Ok(value) => value,
            Err(ops::OpError::DivideByZero) => self
                .builtins()
                .fail_value(&self.builtins().fail_div_zero, "division by zero"),
            Err(ops::OpError::Type { op, detail }) => self
                .builtins()
                .fail_value(&self.builtins().fail_type, &format!("'{op}': {detail}")),
        }
    }

    fn fail_runtime(&self, message: &str) -> Value {
        self.builtins().fail_value(&self.builtins().fail_runtime, message)
    }

    fn fail_missing(&self, name: &str) -> Value {
        self.builtins()
            .fail_value(&self.builtins().fail_missing, &format!("'{name}' is not defined"))
    }

    /// Scope search: locals, then argument fields, then piped-input fields,
    /// then the module namespace.
    fn load_var(&self, scopes: &Scopes, name: &str) -> Value {
        match name {
            "in" => return scopes.input.clone(),
            "arg" => return scopes.arg.clone(),
            "ctx" => return scopes.ctx.clone(),
            "mod" => return self.loader.module_scope(scopes.module),
            "local" => {
                return Value::struct_from(
                    scopes
                        .locals
                        .iter()
                        .map(|(n, v)| (FieldKey::name(n), v.clone()))
                        .collect(),
                );
            }
            // The accumulating struct resolves statically during lowering;
            // a dynamic `$out` has nothing to see yet.
            "out" => return Value::empty(),
            _ => {}
        }

        if let Some((_, value)) = scopes.locals.iter().rev().find(|(n, _)| n == name) {
            return value.clone();
        }
        if let Some(value) = scopes.arg.field(name) {
            return value.clone();
        }
        if let Some(value) = scopes.input.field(name) {
            return value.clone();
        }
        match self.loader.namespace_binding(scopes.module, name) {
            Some(crate::namespace::Binding::Single(nsv)) => self.namespace_value(&nsv),
            Some(crate::namespace::Binding::Overloads(set)) => {
                let values: Vec<Value> = set
                    .callables
                    .iter()
                    .map(|nsv| self.namespace_value(nsv))
                    .collect();
                Value::Block(BlockValue::Overloads(Rc::new(values)))
            }
            Some(crate::namespace::Binding::Ambiguous(ambiguous)) => self.builtins().fail_value(
                &self.builtins().fail_type,
                &format!(
                    "'{name}' is ambiguous: {}",
                    ambiguous.qualified_names.join(", ")
                ),
            ),
            None => self.fail_missing(name),
        }
    }

    fn namespace_value(&self, nsv: &crate::namespace::NamespaceValue) -> Value {
        match nsv {
            crate::namespace::NamespaceValue::Const(value) => value.clone(),
            crate::namespace::NamespaceValue::Def(def) => match def.runtime_value() {
                Some(value) => value,
                None => self.fail_runtime(&format!("'{}' is not available yet", def.qualified)),
            },
        }
    }

    fn load_ref(&self, module: ModuleId, qualified: &str) -> Value {
        match self.loader.find_definition(module, qualified) {
            Some(def) => match def.runtime_value() {
                Some(value) => value,
                None => self.fail_runtime(&format!("'{qualified}' is not available yet")),
            },
            None => self.fail_missing(qualified),
        }
    }

    fn build_struct(&self, entries: &[FieldEntry], regs: &[Value]) -> Value {
        let mut fields: Vec<(FieldKey, Value)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                FieldEntry::Positional(src) => fields.push((FieldKey::unnamed(), regs[*src].clone())),
                FieldEntry::Named(name, src) => {
                    let key = FieldKey::Name(Rc::clone(name));
                    let value = regs[*src].clone();
                    if let Some(existing) = fields
                        .iter_mut()
                        .find(|(k, _)| k.as_name() == Some(name.as_ref()))
                    {
                        existing.1 = value;
                    } else {
                        fields.push((key, value));
                    }
                }
                FieldEntry::Spread(src) => {
                    let Some(spread) = regs[*src].as_struct_fields().map(<[_]>::to_vec) else {
                        return self.builtins().fail_value(
                            &self.builtins().fail_type,
                            &format!("cannot spread {}", regs[*src]),
                        );
                    };
                    for (key, value) in spread {
                        match &key {
                            FieldKey::Name(name) => {
                                if let Some(existing) = fields
                                    .iter_mut()
                                    .find(|(k, _)| k.as_name() == Some(name.as_ref()))
                                {
                                    existing.1 = value;
                                } else {
                                    fields.push((key, value));
                                }
                            }
                            FieldKey::Unnamed(_) => fields.push((FieldKey::unnamed(), value)),
                        }
                    }
                }
            }
        }
        Value::struct_from(fields)
    }

    fn build_block(&self, template: &Rc<BlockTemplate>, scopes: &Scopes) -> Value {
        let raw = RawBlock {
            qualified: template.qualified.clone(),
            input_name: "in".to_string(),
            arg_name: "arg".to_string(),
            arg_shape: Rc::clone(&template.signature),
            body: Rc::clone(&template.body),
            captured: CapturedScopes {
                arg: scopes.arg.clone(),
                ctx: scopes.ctx.clone(),
                module: scopes.module,
            },
            pure: template.pure,
            decorators: template.decorators.clone(),
        };
        Value::Block(BlockValue::Raw(Rc::new(raw)))
    }

    fn morph_value(&self, value: &Value, shape: &Value, mode: morph::MorphMode) -> Value {
        let Some(shape) = shape_of_value(shape) else {
            return self.builtins().fail_value(
                &self.builtins().fail_type,
                &format!("{shape} is not a shape"),
            );
        };
        let result: MorphResult = morph::apply(value, &shape, mode);
        match result.value {
            Some(morphed) => morphed,
            None => self.builtins().fail_value(
                &self.builtins().fail_type,
                &format!("{value} does not match ~{shape}"),
            ),
        }
    }

    fn field_access(&self, value: &Value, sel: &FieldSel, regs: &[Value]) -> Value {
        match sel {
            FieldSel::Name(name) => match value.field(name) {
                Some(found) => found.clone(),
                None => self.fail_missing(name),
            },
            FieldSel::Computed(src) => match &regs[*src] {
                Value::Text(name) => match value.field(name) {
                    Some(found) => found.clone(),
                    None => self.fail_missing(name),
                },
                Value::Number(n) => match n.to_u64().and_then(|i| value.positional(i as usize)) {
                    Some(found) => found.clone(),
                    None => self.fail_missing(&n.to_string()),
                },
                other => self.builtins().fail_value(
                    &self.builtins().fail_type,
                    &format!("{other} cannot index a struct"),
                ),
            },
        }
    }

    /// Prepares a call: morph the arguments against the callee's signature
    /// and build the body frame. Shapes invoke as constructors (a plain
    /// morph); overload sets dispatch on best argument score.
    fn begin_call(&mut self, callee: &Value, piped: Option<Value>, args: Value) -> CallOutcome {
        match callee {
            Value::Block(BlockValue::Raw(raw)) => self.block_frame(raw, None, piped, args),
            Value::Block(BlockValue::Typed(block)) => {
                let input_shape = ShapeRef::anonymous(block.input_shape.fields.clone());
                self.block_frame(&block.raw, Some(input_shape), piped, args)
            }
            Value::Block(BlockValue::Overloads(candidates)) => {
                self.dispatch_overloads(candidates, piped, args)
            }
            Value::Shape(shape) => {
                let result = morph::morph(&args, shape);
                match result.value {
                    Some(value) => CallOutcome::Value(value),
                    None => CallOutcome::Value(self.builtins().fail_value(
                        &self.builtins().fail_type,
                        &format!("{args} does not match ~{shape}"),
                    )),
                }
            }
            other => CallOutcome::Value(self.builtins().fail_value(
                &self.builtins().fail_type,
                &format!("{other} is not callable"),
            )),
        }
    }

    fn block_frame(
        &mut self,
        raw: &Rc<RawBlock>,
        input_shape: Option<ShapeRef>,
        piped: Option<Value>,
        args: Value,
    ) -> CallOutcome {
        let arg_shape = ShapeRef::anonymous(raw.arg_shape.fields.clone());
        let args_result = morph::morph(&args.as_struct(), &arg_shape);
        let Some(arg) = args_result.value else {
            return CallOutcome::Value(self.builtins().fail_value(
                &self.builtins().fail_type,
                &format!("arguments {args} do not match '{}'", raw.qualified),
            ));
        };

        let mut input = piped.unwrap_or_else(Value::empty);
        if let Some(shape) = input_shape {
            match morph::morph(&input, &shape).value {
                Some(morphed) => input = morphed,
                None => {
                    return CallOutcome::Value(self.builtins().fail_value(
                        &self.builtins().fail_type,
                        &format!("input {input} does not match '{}'", raw.qualified),
                    ));
                }
            }
        }

        let scopes = Scopes {
            input,
            arg,
            ctx: raw.captured.ctx.clone(),
            module: raw.captured.module,
            locals: Vec::new(),
        };
        let name = if raw.qualified.is_empty() { "block".to_string() } else { raw.qualified.clone() };
        CallOutcome::Frame(Frame::new(Rc::clone(&raw.body), scopes, true, name))
    }

    /// Picks the overload whose signature scores best against the arguments.
    fn dispatch_overloads(
        &mut self,
        candidates: &Rc<Vec<Value>>,
        piped: Option<Value>,
        args: Value,
    ) -> CallOutcome {
        let mut best: Option<(MorphResult, &Value)> = None;
        for candidate in candidates.iter() {
            let signature = match candidate {
                Value::Block(BlockValue::Raw(raw)) => {
                    ShapeRef::anonymous(raw.arg_shape.fields.clone())
                }
                Value::Block(BlockValue::Typed(block)) => {
                    ShapeRef::anonymous(block.raw.arg_shape.fields.clone())
                }
                Value::Shape(shape) => shape.clone(),
                _ => continue,
            };
            let result = morph::morph(&args.as_struct(), &signature);
            if result.success()
                && best
                    .as_ref()
                    .is_none_or(|(current, _)| result.score() > current.score())
            {
                best = Some((result, candidate));
            }
        }
        match best {
            Some((_, winner)) => {
                let winner = winner.clone();
                self.begin_call(&winner, piped, args)
            }
            None => CallOutcome::Value(self.builtins().fail_value(
                &self.builtins().fail_type,
                &format!("no overload accepts {args}"),
            )),
        }
    }
}

/// Reads a shape out of a value used as a morph target.
fn shape_of_value(value: &Value) -> Option<ShapeRef> {
    match value {
        Value::Shape(shape) => Some(shape.clone()),
        Value::Tag(tag) => Some(ShapeRef::Tag(tag.clone())),
        Value::Block(BlockValue::Overloads(set)) => set.iter().find_map(|v| match v {
            Value::Shape(shape) => Some(shape.clone()),
            _ => None,
        }),
        _ => None,
    }
}
