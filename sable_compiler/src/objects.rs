//! Program entities.
//!
//! Every value the compiler manipulates — types, declarations, compile-time
//! constants, procedures, modules, abstract analysis values — is an
//! [`Object`]. Operations over the sum (analyze, evaluate, print, match)
//! are match statements in their own pass modules rather than methods here,
//! so a pass reads top to bottom in one file.
//!
//! Identity rules: identifiers compare by string, value holders by type and
//! buffer bytes, enum members by declaration and index, and everything else
//! by node identity. Types are hash-consed by the interner in `state`, so
//! node identity on types is structural equality.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::analyzer::{MultiPValue, PValue};
use crate::ast::{CodePtr, ExprListPtr, ExprPtr};
use crate::env::EnvPtr;
use crate::evaluator::{EValue, MultiEValue};
use crate::intrinsics::IntrinsicSignature;
use crate::patterns::{MultiPattern, Pattern};
use crate::span::Span;
use crate::types::TypePtr;

//
// identifiers
//

pub type IdentifierPtr = Rc<Identifier>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

impl Identifier {
    pub fn get(name: &str) -> IdentifierPtr {
        Rc::new(Self {
            name: name.to_string(),
            span: Span::default(),
        })
    }

    pub fn with_span(name: &str, span: Span) -> IdentifierPtr {
        Rc::new(Self {
            name: name.to_string(),
            span,
        })
    }
}

//
// compile-time constants
//

pub type ValueHolderPtr = Rc<ValueHolder>;

/// A compile-time constant: a type plus the target's native bit pattern
/// for a value of that type. Multi-byte scalars are stored little-endian.
#[derive(Debug)]
pub struct ValueHolder {
    pub ty: TypePtr,
    pub buf: RefCell<Vec<u8>>,
}

impl ValueHolder {
    pub fn new(ty: TypePtr, size: usize) -> ValueHolderPtr {
        Rc::new(Self {
            ty,
            buf: RefCell::new(vec![0; size]),
        })
    }

    pub fn with_bytes(ty: TypePtr, bytes: Vec<u8>) -> ValueHolderPtr {
        Rc::new(Self {
            ty,
            buf: RefCell::new(bytes),
        })
    }

    pub fn as_bool(&self) -> bool {
        self.buf.borrow()[0] != 0
    }

    pub fn as_i32(&self) -> i32 {
        let buf = self.buf.borrow();
        i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    pub fn as_u64(&self) -> u64 {
        let buf = self.buf.borrow();
        let mut bytes = [0u8; 8];
        for (i, b) in buf.iter().take(8).enumerate() {
            bytes[i] = *b;
        }
        u64::from_le_bytes(bytes)
    }
}

//
// primitive operations
//

pub use crate::primops::PrimOpCode;

pub type PrimOpPtr = Rc<PrimOp>;

/// A primitive operation node. One node per code is interned by
/// `CompilerState`, so node identity works for equality; the overloadable
/// constructors (Pointer, Array, ...) carry their overload lists here.
#[derive(Debug)]
pub struct PrimOp {
    pub code: PrimOpCode,
    pub overloads: RefCell<Vec<OverloadPtr>>,
}

impl PrimOp {
    pub fn new(code: PrimOpCode) -> PrimOpPtr {
        Rc::new(Self {
            code,
            overloads: RefCell::new(Vec::new()),
        })
    }
}

//
// overloads and procedures
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineAttribute {
    Ignore,
    Inline,
    NeverInline,
}

/// Lazily-initialized unification state of one overload: the pattern
/// cells for its pattern variables and the evaluated target/argument
/// patterns. `Initializing` guards against an overload whose target
/// pattern resolution re-enters itself.
#[derive(Debug)]
pub enum PatternsState {
    Uninitialized,
    Initializing,
    Ready(OverloadPatterns),
}

#[derive(Debug)]
pub struct OverloadPatterns {
    pub cells: Vec<Option<crate::patterns::PatternCellPtr>>,
    pub multi_cells: Vec<Option<crate::patterns::MultiPatternCellPtr>>,
    pub callable_pattern: Pattern,
    pub arg_patterns: Vec<Option<Pattern>>,
    pub var_arg_pattern: Option<MultiPattern>,
}

pub type OverloadPtr = Rc<Overload>;

#[derive(Debug)]
pub struct Overload {
    pub span: Span,
    pub target: ExprPtr,
    pub code: CodePtr,
    pub env: EnvPtr,
    pub call_by_name: bool,
    pub is_inline: InlineAttribute,
    /// `default` overloads lose to later matches under final-overloads
    /// mode instead of making the call ambiguous.
    pub is_default: bool,
    pub name_is_pattern: Cell<bool>,
    pub patterns: RefCell<PatternsState>,
}

impl Overload {
    pub fn new(target: ExprPtr, code: CodePtr, env: EnvPtr) -> OverloadPtr {
        Rc::new(Self {
            span: Span::default(),
            target,
            code,
            env,
            call_by_name: false,
            is_inline: InlineAttribute::Ignore,
            is_default: false,
            name_is_pattern: Cell::new(false),
            patterns: RefCell::new(PatternsState::Uninitialized),
        })
    }

    pub fn call_by_name(target: ExprPtr, code: CodePtr, env: EnvPtr) -> OverloadPtr {
        Rc::new(Self {
            span: Span::default(),
            target,
            code,
            env,
            call_by_name: true,
            is_inline: InlineAttribute::Ignore,
            is_default: false,
            name_is_pattern: Cell::new(false),
            patterns: RefCell::new(PatternsState::Uninitialized),
        })
    }

    pub fn default_overload(target: ExprPtr, code: CodePtr, env: EnvPtr) -> OverloadPtr {
        Rc::new(Self {
            span: Span::default(),
            target,
            code,
            env,
            call_by_name: false,
            is_inline: InlineAttribute::Ignore,
            is_default: true,
            name_is_pattern: Cell::new(false),
            patterns: RefCell::new(PatternsState::Uninitialized),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureMonoState {
    NoOverloads,
    MonoOverload,
    PolyOverload,
}

/// Monomorphic-signature tracking for the static introspection prims: a
/// procedure whose single overload has fully concrete argument types
/// exposes them through `StaticMonoInputTypes`.
#[derive(Debug)]
pub struct ProcedureMono {
    pub state: ProcedureMonoState,
    pub types: Vec<TypePtr>,
}

pub type ProcedurePtr = Rc<Procedure>;

#[derive(Debug)]
pub struct Procedure {
    pub name: IdentifierPtr,
    pub interface: RefCell<Option<OverloadPtr>>,
    /// Newest first: overload installation prepends, so the most recent
    /// declaration is consulted first during resolution.
    pub overloads: RefCell<Vec<OverloadPtr>>,
    /// Standalone procedures (declared with a body, not `define`) reject
    /// additional overloads.
    pub single_overload: Cell<bool>,
    pub mono: RefCell<ProcedureMono>,
    /// Memoization cache for `?`-suffixed procedures: fully-static
    /// argument tuple to static result tuple.
    pub evaluator_cache: RefCell<HashMap<ObjectVecKey, Rc<Vec<Object>>>>,
}

impl Procedure {
    pub fn new(name: IdentifierPtr) -> ProcedurePtr {
        Rc::new(Self {
            name,
            interface: RefCell::new(None),
            overloads: RefCell::new(Vec::new()),
            single_overload: Cell::new(false),
            mono: RefCell::new(ProcedureMono {
                state: ProcedureMonoState::NoOverloads,
                types: Vec::new(),
            }),
            evaluator_cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn with_interface(name: IdentifierPtr, interface: OverloadPtr) -> ProcedurePtr {
        let proc = Self::new(name);
        *proc.interface.borrow_mut() = Some(interface);
        proc
    }
}

//
// declarations
//

#[derive(Debug)]
pub struct RecordField {
    pub name: IdentifierPtr,
    pub type_expr: ExprPtr,
}

pub type RecordDeclPtr = Rc<RecordDecl>;

#[derive(Debug)]
pub struct RecordDecl {
    pub name: IdentifierPtr,
    pub params: Vec<IdentifierPtr>,
    pub var_param: Option<IdentifierPtr>,
    pub fields: Vec<RecordField>,
    pub env: EnvPtr,
    pub overloads: RefCell<Vec<OverloadPtr>>,
    pub builtin_overload_initialized: Cell<bool>,
    pub span: Span,
}

impl RecordDecl {
    pub fn new(
        name: IdentifierPtr,
        params: Vec<IdentifierPtr>,
        var_param: Option<IdentifierPtr>,
        fields: Vec<RecordField>,
        env: EnvPtr,
    ) -> RecordDeclPtr {
        Rc::new(Self {
            name,
            params,
            var_param,
            fields,
            env,
            overloads: RefCell::new(Vec::new()),
            builtin_overload_initialized: Cell::new(false),
            span: Span::default(),
        })
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty() || self.var_param.is_some()
    }
}

pub type VariantDeclPtr = Rc<VariantDecl>;

#[derive(Debug)]
pub struct VariantDecl {
    pub name: IdentifierPtr,
    pub params: Vec<IdentifierPtr>,
    pub var_param: Option<IdentifierPtr>,
    pub open: bool,
    /// Member type expressions from the declaration itself.
    pub default_members: Vec<ExprPtr>,
    /// `instance` declarations attached by module initialization.
    pub instances: RefCell<Vec<InstanceDeclPtr>>,
    pub env: EnvPtr,
    pub overloads: RefCell<Vec<OverloadPtr>>,
    pub span: Span,
}

impl VariantDecl {
    pub fn new(
        name: IdentifierPtr,
        params: Vec<IdentifierPtr>,
        var_param: Option<IdentifierPtr>,
        open: bool,
        default_members: Vec<ExprPtr>,
        env: EnvPtr,
    ) -> VariantDeclPtr {
        Rc::new(Self {
            name,
            params,
            var_param,
            open,
            default_members,
            instances: RefCell::new(Vec::new()),
            env,
            overloads: RefCell::new(Vec::new()),
            span: Span::default(),
        })
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty() || self.var_param.is_some()
    }
}

pub type InstanceDeclPtr = Rc<InstanceDecl>;

#[derive(Debug)]
pub struct InstanceDecl {
    pub pattern_vars: Vec<crate::ast::PatternVar>,
    pub target: ExprPtr,
    pub member: ExprPtr,
    pub env: EnvPtr,
    pub span: Span,
}

pub type EnumDeclPtr = Rc<EnumDecl>;

#[derive(Debug)]
pub struct EnumDecl {
    pub name: IdentifierPtr,
    pub member_names: Vec<IdentifierPtr>,
    pub span: Span,
}

impl EnumDecl {
    pub fn new(name: IdentifierPtr, member_names: Vec<IdentifierPtr>) -> EnumDeclPtr {
        Rc::new(Self {
            name,
            member_names,
            span: Span::default(),
        })
    }
}

/// A reference to one member of an enum declaration. Members compare
/// structurally (declaration identity plus index).
#[derive(Debug)]
pub struct EnumMember {
    pub decl: EnumDeclPtr,
    pub index: usize,
}

impl EnumMember {
    pub fn name(&self) -> &str {
        &self.decl.member_names[self.index].name
    }
}

pub type NewTypeDeclPtr = Rc<NewTypeDecl>;

#[derive(Debug)]
pub struct NewTypeDecl {
    pub name: IdentifierPtr,
    pub base_expr: ExprPtr,
    pub env: EnvPtr,
    pub base_cache: RefCell<Option<TypePtr>>,
    pub span: Span,
}

impl NewTypeDecl {
    pub fn new(name: IdentifierPtr, base_expr: ExprPtr, env: EnvPtr) -> NewTypeDeclPtr {
        Rc::new(Self {
            name,
            base_expr,
            env,
            base_cache: RefCell::new(None),
            span: Span::default(),
        })
    }
}

//
// global variables and aliases
//

pub type GlobalVariablePtr = Rc<GlobalVariable>;

#[derive(Debug)]
pub struct GlobalVariable {
    pub name: IdentifierPtr,
    pub pattern_vars: Vec<crate::ast::PatternVar>,
    pub predicate: Option<ExprPtr>,
    pub params: Vec<IdentifierPtr>,
    pub var_param: Option<IdentifierPtr>,
    pub expr: ExprPtr,
    pub env: EnvPtr,
    pub instances: RefCell<HashMap<ObjectVecKey, GVarInstancePtr>>,
    pub span: Span,
}

impl GlobalVariable {
    pub fn new(name: IdentifierPtr, expr: ExprPtr, env: EnvPtr) -> GlobalVariablePtr {
        Rc::new(Self {
            name,
            pattern_vars: Vec::new(),
            predicate: None,
            params: Vec::new(),
            var_param: None,
            expr,
            env,
            instances: RefCell::new(HashMap::new()),
            span: Span::default(),
        })
    }

    pub fn parameterized(
        name: IdentifierPtr,
        params: Vec<IdentifierPtr>,
        var_param: Option<IdentifierPtr>,
        expr: ExprPtr,
        env: EnvPtr,
    ) -> GlobalVariablePtr {
        Rc::new(Self {
            name,
            pattern_vars: Vec::new(),
            predicate: None,
            params,
            var_param,
            expr,
            env,
            instances: RefCell::new(HashMap::new()),
            span: Span::default(),
        })
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty() || self.var_param.is_some()
    }
}

pub type GVarInstancePtr = Rc<GVarInstance>;

/// One specialization of a (possibly parameterized) global variable:
/// the parameter tuple, a private clone of the initializer, and the
/// analysis result once computed. `analyzing` feeds the recursion
/// sentinel when a global's type depends on itself.
#[derive(Debug)]
pub struct GVarInstance {
    pub gvar: GlobalVariablePtr,
    pub params: Vec<Object>,
    pub expr: RefCell<Option<ExprPtr>>,
    pub env: RefCell<Option<EnvPtr>>,
    pub analyzing: Cell<bool>,
    pub analysis: RefCell<Option<MultiPValue>>,
    pub ty: RefCell<Option<TypePtr>>,
}

pub type GlobalAliasPtr = Rc<GlobalAlias>;

#[derive(Debug)]
pub struct GlobalAlias {
    pub name: IdentifierPtr,
    pub pattern_vars: Vec<crate::ast::PatternVar>,
    pub predicate: Option<ExprPtr>,
    pub params: Vec<IdentifierPtr>,
    pub var_param: Option<IdentifierPtr>,
    pub expr: ExprPtr,
    pub env: EnvPtr,
    pub overloads: RefCell<Vec<OverloadPtr>>,
    pub span: Span,
}

impl GlobalAlias {
    pub fn new(name: IdentifierPtr, expr: ExprPtr, env: EnvPtr) -> GlobalAliasPtr {
        Rc::new(Self {
            name,
            pattern_vars: Vec::new(),
            predicate: None,
            params: Vec::new(),
            var_param: None,
            expr,
            env,
            overloads: RefCell::new(Vec::new()),
            span: Span::default(),
        })
    }

    pub fn parameterized(
        name: IdentifierPtr,
        params: Vec<IdentifierPtr>,
        var_param: Option<IdentifierPtr>,
        expr: ExprPtr,
        env: EnvPtr,
    ) -> GlobalAliasPtr {
        Rc::new(Self {
            name,
            pattern_vars: Vec::new(),
            predicate: None,
            params,
            var_param,
            expr,
            env,
            overloads: RefCell::new(Vec::new()),
            span: Span::default(),
        })
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty() || self.var_param.is_some()
    }
}

//
// external entities
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CallingConv {
    C,
    StdCall,
    FastCall,
    ThisCall,
    Llvm,
}

#[derive(Debug, Default)]
pub struct ExternalAttrs {
    pub calling_conv: Option<CallingConv>,
    pub dll_import: bool,
    pub dll_export: bool,
    pub asm_label: Option<String>,
}

#[derive(Debug)]
pub struct ExternalArg {
    pub name: IdentifierPtr,
    pub type_expr: ExprPtr,
    pub ty: RefCell<Option<TypePtr>>,
}

impl ExternalArg {
    pub fn new(name: IdentifierPtr, type_expr: ExprPtr) -> Self {
        Self {
            name,
            type_expr,
            ty: RefCell::new(None),
        }
    }
}

pub type ExternalProcedurePtr = Rc<ExternalProcedure>;

#[derive(Debug)]
pub struct ExternalProcedure {
    pub name: IdentifierPtr,
    pub args: Vec<ExternalArg>,
    pub has_var_args: bool,
    pub return_type_expr: Option<ExprPtr>,
    pub attributes: ExprListPtr,
    pub env: EnvPtr,
    pub analyzed: Cell<bool>,
    pub attributes_verified: Cell<bool>,
    pub attrs: RefCell<ExternalAttrs>,
    pub ptr_type: RefCell<Option<TypePtr>>,
    pub return_type: RefCell<Option<Option<TypePtr>>>,
    pub span: Span,
}

impl ExternalProcedure {
    pub fn new(
        name: IdentifierPtr,
        args: Vec<ExternalArg>,
        has_var_args: bool,
        return_type_expr: Option<ExprPtr>,
        attributes: ExprListPtr,
        env: EnvPtr,
    ) -> ExternalProcedurePtr {
        Rc::new(Self {
            name,
            args,
            has_var_args,
            return_type_expr,
            attributes,
            env,
            analyzed: Cell::new(false),
            attributes_verified: Cell::new(false),
            attrs: RefCell::new(ExternalAttrs::default()),
            ptr_type: RefCell::new(None),
            return_type: RefCell::new(None),
            span: Span::default(),
        })
    }
}

pub type ExternalVariablePtr = Rc<ExternalVariable>;

#[derive(Debug)]
pub struct ExternalVariable {
    pub name: IdentifierPtr,
    pub type_expr: ExprPtr,
    pub attributes: ExprListPtr,
    pub env: EnvPtr,
    pub ty: RefCell<Option<TypePtr>>,
    pub span: Span,
}

impl ExternalVariable {
    pub fn new(
        name: IdentifierPtr,
        type_expr: ExprPtr,
        attributes: ExprListPtr,
        env: EnvPtr,
    ) -> ExternalVariablePtr {
        Rc::new(Self {
            name,
            type_expr,
            attributes,
            env,
            ty: RefCell::new(None),
            span: Span::default(),
        })
    }
}

//
// intrinsics
//

pub type IntrinsicPtr = Rc<Intrinsic>;

/// A reference to a backend intrinsic. The analyzer type-checks calls
/// against the signature; the evaluator rejects them.
#[derive(Debug)]
pub struct Intrinsic {
    pub name: String,
    pub signature: IntrinsicSignature,
}

//
// modules
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleInitState {
    Loaded,
    Running,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug)]
pub enum ImportKind {
    Module { alias: Option<String> },
    Star,
    Members(Vec<ImportedMember>),
}

#[derive(Debug)]
pub struct ImportedMember {
    pub name: String,
    pub alias: Option<String>,
    pub visibility: Visibility,
}

pub type ImportPtr = Rc<Import>;

#[derive(Debug)]
pub struct Import {
    pub kind: ImportKind,
    pub module_name: String,
    pub module: RefCell<Option<ModulePtr>>,
    pub visibility: Visibility,
    pub span: Span,
}

impl Import {
    pub fn star(module_name: &str) -> ImportPtr {
        Rc::new(Self {
            kind: ImportKind::Star,
            module_name: module_name.to_string(),
            module: RefCell::new(None),
            visibility: Visibility::Private,
            span: Span::default(),
        })
    }

    pub fn members(module_name: &str, members: Vec<ImportedMember>) -> ImportPtr {
        Rc::new(Self {
            kind: ImportKind::Members(members),
            module_name: module_name.to_string(),
            module: RefCell::new(None),
            visibility: Visibility::Private,
            span: Span::default(),
        })
    }

    pub fn module(module_name: &str, alias: Option<&str>) -> ImportPtr {
        Rc::new(Self {
            kind: ImportKind::Module {
                alias: alias.map(str::to_string),
            },
            module_name: module_name.to_string(),
            module: RefCell::new(None),
            visibility: Visibility::Private,
            span: Span::default(),
        })
    }
}

/// One candidate binding of a name in a module's symbol tables, with the
/// module the binding came from (for ambiguity suggestions).
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub obj: Object,
    pub source_module: String,
}

#[derive(Debug, Clone)]
pub enum TopLevelItem {
    Overload(OverloadPtr),
    Instance(InstanceDeclPtr),
    StaticAssert {
        condition: ExprPtr,
        message: ExprListPtr,
        span: Span,
    },
}

pub type ModulePtr = Rc<Module>;

#[derive(Debug)]
pub struct Module {
    pub name: RefCell<String>,
    pub imports: RefCell<Vec<ImportPtr>>,
    pub globals: RefCell<HashMap<String, Object>>,
    pub public_globals: RefCell<HashMap<String, Object>>,
    /// Lazily built import-resolution tables: name to the set of objects
    /// it may denote. More than one object means the name is ambiguous
    /// until disambiguated by a specific import.
    pub all_symbols: RefCell<HashMap<String, Vec<SymbolEntry>>>,
    pub public_symbols: RefCell<HashMap<String, Vec<SymbolEntry>>>,
    pub all_symbols_loaded: Cell<bool>,
    pub public_symbols_loaded: Cell<bool>,
    pub all_symbols_loading: Cell<u32>,
    pub public_symbols_loading: Cell<u32>,
    pub attributes: RefCell<Option<ExprListPtr>>,
    pub attributes_verified: Cell<bool>,
    pub attr_default_integer_type: RefCell<Option<TypePtr>>,
    pub attr_default_float_type: RefCell<Option<TypePtr>>,
    pub attr_build_flags: RefCell<Vec<String>>,
    pub top_level: RefCell<Vec<TopLevelItem>>,
    pub init_state: Cell<ModuleInitState>,
    pub span: Span,
}

impl Module {
    pub fn new(name: &str) -> ModulePtr {
        Rc::new(Self {
            name: RefCell::new(name.to_string()),
            imports: RefCell::new(Vec::new()),
            globals: RefCell::new(HashMap::new()),
            public_globals: RefCell::new(HashMap::new()),
            all_symbols: RefCell::new(HashMap::new()),
            public_symbols: RefCell::new(HashMap::new()),
            all_symbols_loaded: Cell::new(false),
            public_symbols_loaded: Cell::new(false),
            all_symbols_loading: Cell::new(0),
            public_symbols_loading: Cell::new(0),
            attributes: RefCell::new(None),
            attributes_verified: Cell::new(false),
            attr_default_integer_type: RefCell::new(None),
            attr_default_float_type: RefCell::new(None),
            attr_build_flags: RefCell::new(Vec::new()),
            top_level: RefCell::new(Vec::new()),
            init_state: Cell::new(ModuleInitState::Loaded),
            span: Span::default(),
        })
    }
}

//
// the object sum
//

#[derive(Debug, Clone)]
pub enum Object {
    Ident(IdentifierPtr),
    ValueHolder(ValueHolderPtr),
    Type(TypePtr),
    PrimOp(PrimOpPtr),
    Procedure(ProcedurePtr),
    Record(RecordDeclPtr),
    Variant(VariantDeclPtr),
    Enum(EnumDeclPtr),
    EnumMember(Rc<EnumMember>),
    NewType(NewTypeDeclPtr),
    GlobalVariable(GlobalVariablePtr),
    GlobalAlias(GlobalAliasPtr),
    ExternalVariable(ExternalVariablePtr),
    ExternalProcedure(ExternalProcedurePtr),
    Module(ModulePtr),
    Intrinsic(IntrinsicPtr),
    Expr(ExprPtr),
    ExprList(ExprListPtr),
    MultiStatic(Rc<Vec<Object>>),
    PValue(PValue),
    MultiPValue(MultiPValue),
    EValue(EValue),
    MultiEValue(MultiEValue),
    Pattern(Pattern),
    MultiPattern(MultiPattern),
}

impl Object {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Ident(_) => "identifier",
            Self::ValueHolder(_) => "value",
            Self::Type(_) => "type",
            Self::PrimOp(_) => "primitive operation",
            Self::Procedure(_) => "procedure",
            Self::Record(_) => "record declaration",
            Self::Variant(_) => "variant declaration",
            Self::Enum(_) => "enum declaration",
            Self::EnumMember(_) => "enum member",
            Self::NewType(_) => "newtype declaration",
            Self::GlobalVariable(_) => "global variable",
            Self::GlobalAlias(_) => "global alias",
            Self::ExternalVariable(_) => "external variable",
            Self::ExternalProcedure(_) => "external procedure",
            Self::Module(_) => "module",
            Self::Intrinsic(_) => "intrinsic",
            Self::Expr(_) => "expression",
            Self::ExprList(_) => "expression list",
            Self::MultiStatic(_) => "static value list",
            Self::PValue(_) => "analysis value",
            Self::MultiPValue(_) => "analysis value list",
            Self::EValue(_) => "evaluation value",
            Self::MultiEValue(_) => "evaluation value list",
            Self::Pattern(_) => "pattern",
            Self::MultiPattern(_) => "multi-pattern",
        }
    }
}

fn rc_addr<T>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as usize
}

pub fn type_ptr_eq(a: &TypePtr, b: &TypePtr) -> bool {
    Rc::ptr_eq(a, b)
}

/// Structural equality where the data model calls for it, node identity
/// everywhere else.
pub fn object_equals(a: &Object, b: &Object) -> bool {
    match (a, b) {
        (Object::Ident(x), Object::Ident(y)) => x.name == y.name,
        (Object::ValueHolder(x), Object::ValueHolder(y)) => {
            Rc::ptr_eq(&x.ty, &y.ty) && *x.buf.borrow() == *y.buf.borrow()
        }
        (Object::Type(x), Object::Type(y)) => Rc::ptr_eq(x, y),
        (Object::PrimOp(x), Object::PrimOp(y)) => x.code == y.code,
        (Object::Procedure(x), Object::Procedure(y)) => Rc::ptr_eq(x, y),
        (Object::Record(x), Object::Record(y)) => Rc::ptr_eq(x, y),
        (Object::Variant(x), Object::Variant(y)) => Rc::ptr_eq(x, y),
        (Object::Enum(x), Object::Enum(y)) => Rc::ptr_eq(x, y),
        (Object::EnumMember(x), Object::EnumMember(y)) => {
            Rc::ptr_eq(&x.decl, &y.decl) && x.index == y.index
        }
        (Object::NewType(x), Object::NewType(y)) => Rc::ptr_eq(x, y),
        (Object::GlobalVariable(x), Object::GlobalVariable(y)) => Rc::ptr_eq(x, y),
        (Object::GlobalAlias(x), Object::GlobalAlias(y)) => Rc::ptr_eq(x, y),
        (Object::ExternalVariable(x), Object::ExternalVariable(y)) => Rc::ptr_eq(x, y),
        (Object::ExternalProcedure(x), Object::ExternalProcedure(y)) => Rc::ptr_eq(x, y),
        (Object::Module(x), Object::Module(y)) => Rc::ptr_eq(x, y),
        (Object::Intrinsic(x), Object::Intrinsic(y)) => Rc::ptr_eq(x, y),
        (Object::Expr(x), Object::Expr(y)) => Rc::ptr_eq(x, y),
        (Object::ExprList(x), Object::ExprList(y)) => Rc::ptr_eq(x, y),
        (Object::MultiStatic(x), Object::MultiStatic(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(u, v)| object_equals(u, v))
        }
        (Object::PValue(x), Object::PValue(y)) => {
            Rc::ptr_eq(&x.ty, &y.ty) && x.is_temp == y.is_temp
        }
        (Object::EValue(x), Object::EValue(y)) => {
            Rc::ptr_eq(&x.ty, &y.ty) && x.addr == y.addr
        }
        _ => false,
    }
}

pub fn object_hash(obj: &Object) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hash_object(obj, &mut hasher);
    hasher.finish()
}

fn hash_object<H: Hasher>(obj: &Object, hasher: &mut H) {
    std::mem::discriminant(obj).hash(hasher);
    match obj {
        Object::Ident(x) => x.name.hash(hasher),
        Object::ValueHolder(x) => {
            rc_addr(&x.ty).hash(hasher);
            x.buf.borrow().hash(hasher);
        }
        Object::Type(x) => rc_addr(x).hash(hasher),
        Object::PrimOp(x) => (x.code as u32).hash(hasher),
        Object::Procedure(x) => rc_addr(x).hash(hasher),
        Object::Record(x) => rc_addr(x).hash(hasher),
        Object::Variant(x) => rc_addr(x).hash(hasher),
        Object::Enum(x) => rc_addr(x).hash(hasher),
        Object::EnumMember(x) => {
            rc_addr(&x.decl).hash(hasher);
            x.index.hash(hasher);
        }
        Object::NewType(x) => rc_addr(x).hash(hasher),
        Object::GlobalVariable(x) => rc_addr(x).hash(hasher),
        Object::GlobalAlias(x) => rc_addr(x).hash(hasher),
        Object::ExternalVariable(x) => rc_addr(x).hash(hasher),
        Object::ExternalProcedure(x) => rc_addr(x).hash(hasher),
        Object::Module(x) => rc_addr(x).hash(hasher),
        Object::Intrinsic(x) => rc_addr(x).hash(hasher),
        Object::Expr(x) => rc_addr(x).hash(hasher),
        Object::ExprList(x) => rc_addr(x).hash(hasher),
        Object::MultiStatic(x) => {
            for v in x.iter() {
                hash_object(v, hasher);
            }
        }
        Object::PValue(x) => {
            rc_addr(&x.ty).hash(hasher);
            x.is_temp.hash(hasher);
        }
        Object::MultiPValue(x) => x.values.len().hash(hasher),
        Object::EValue(x) => {
            rc_addr(&x.ty).hash(hasher);
            x.addr.hash(hasher);
        }
        Object::MultiEValue(x) => x.values.len().hash(hasher),
        Object::Pattern(_) | Object::MultiPattern(_) => 0u8.hash(hasher),
    }
}

/// A vector of objects usable as a hash-map key: memoization caches,
/// global-variable instance tables, and the invocation index key off it.
#[derive(Debug, Clone)]
pub struct ObjectVecKey(pub Vec<Object>);

impl PartialEq for ObjectVecKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| object_equals(a, b))
    }
}

impl Eq for ObjectVecKey {}

impl Hash for ObjectVecKey {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.0.len().hash(hasher);
        for obj in &self.0 {
            hash_object(obj, hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_compare_by_string() {
        let a = Object::Ident(Identifier::get("size"));
        let b = Object::Ident(Identifier::get("size"));
        let c = Object::Ident(Identifier::get("len"));
        assert!(object_equals(&a, &b));
        assert!(!object_equals(&a, &c));
        assert_eq!(object_hash(&a), object_hash(&b));
    }

    #[test]
    fn test_procedures_compare_by_identity() {
        let p = Procedure::new(Identifier::get("id"));
        let q = Procedure::new(Identifier::get("id"));
        assert!(object_equals(
            &Object::Procedure(p.clone()),
            &Object::Procedure(p.clone())
        ));
        assert!(!object_equals(
            &Object::Procedure(p),
            &Object::Procedure(q)
        ));
    }

    #[test]
    fn test_cross_kind_objects_never_equal() {
        let a = Object::Ident(Identifier::get("x"));
        let b = Object::Procedure(Procedure::new(Identifier::get("x")));
        assert!(!object_equals(&a, &b));
    }

    #[test]
    fn test_object_vec_key_equality() {
        let k1 = ObjectVecKey(vec![Object::Ident(Identifier::get("a"))]);
        let k2 = ObjectVecKey(vec![Object::Ident(Identifier::get("a"))]);
        let k3 = ObjectVecKey(vec![Object::Ident(Identifier::get("b"))]);
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
