#![doc = include_str!("../../../README.md")]

mod builtins;
mod codegen;
mod cop;
mod engine;
mod error;
mod fold;
mod function;
mod loader;
mod module;
mod morph;
mod namespace;
mod num;
mod ops;
mod parse;
mod pure;
mod resolve;
mod resource;
mod scan;
mod shape;
mod tag;
mod token;
mod tracer;
mod value;

pub use crate::{
    builtins::{BUILTIN_MODULE, Builtins},
    codegen::{BlockTemplate, CodegenError, FieldEntry, FieldSel, Instr, InstrNode, generate, generate_for_definition},
    cop::{Attrs, Cop, CopTag, Span, unparse},
    engine::{Engine, Scopes},
    error::{BuildError, ParseError},
    fold::{FoldCtx, cop_fold, fold_definitions, shape_from_cop},
    function::{Block, CapturedScopes, RawBlock},
    loader::{Loader, ModuleSource},
    module::{DefKind, Definition, Module, ModuleId, extract_definitions},
    morph::{MorphMode, MorphResult, morph, strong_morph, weak_morph},
    namespace::{Ambiguous, Binding, Namespace, NamespaceBuilder, NamespaceSlot, NamespaceValue, OverloadSet},
    num::{DIV_PRECISION, Decimal},
    ops::{BinaryOp, OpError, UnaryOp},
    parse::{parse_expression, parse_module},
    pure::evaluate_pure_definitions,
    resolve::{resolve_cop, resolve_definitions},
    resource::{DEFAULT_MAX_FRAMES, MAX_SOURCE_BYTES, ResourceLimits},
    scan::{DocComment, ImportDecl, PkgAssign, ScanReport, scan},
    shape::{BlockShape, FieldDef, PrimitiveShape, ShapeDef, ShapeRef},
    tag::{TagDef, TagRef, is_compatible},
    token::{Lexer, Token, TokenKind, decode_number},
    tracer::{CountingTracer, EngineTracer, NoopTracer, StderrTracer},
    value::{BlockValue, FieldKey, StructValue, Value},
};
