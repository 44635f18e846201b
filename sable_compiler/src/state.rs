//! Process-wide compiler state.
//!
//! One `CompilerState` owns the type interner, the module registry, the
//! invocation cache, the analysis memo, the evaluator's value stack, and
//! the diagnostic context stacks. The compiler is single-threaded: all
//! interior mutability here is plain `RefCell`/`Cell`, and borrows are
//! never held across recursive analysis or evaluation.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ast::{ExprPtr, NodeId};
use crate::env::Env;
use crate::error::{CompileError, Diagnostic, Result};
use crate::evaluator::EvalStack;
use crate::invoketables::{InvokeKey, InvokeSet};
use crate::layout::TargetLayout;
use crate::objects::{
    CallingConv, EnumDeclPtr, IdentifierPtr, ModulePtr, NewTypeDeclPtr, Object, ObjectVecKey,
    OverloadPtr, PrimOp, PrimOpPtr, RecordDeclPtr, VariantDeclPtr,
};
use crate::analyzer::MultiPValue;
use crate::patterns::{
    deref_deep, evaluate_one_pattern, unify_pattern_obj, MultiPatternCell, PatternCell,
};
use crate::primops::PrimOpCode;
use crate::span::Span;
use crate::types::{type_node_id, TypeInterner, TypeKind, TypePtr};

pub type ParserHook = Box<dyn Fn(&CompilerState, &str, Span) -> Result<Vec<ExprPtr>>>;

pub struct CompilerState {
    pub target: TargetLayout,
    types: RefCell<TypeInterner>,
    prim_ops: RefCell<HashMap<PrimOpCode, PrimOpPtr>>,
    pub modules: RefCell<HashMap<String, ModulePtr>>,
    main_module: RefCell<Option<ModulePtr>>,
    primitives_module: RefCell<Option<ModulePtr>>,
    by_ref_record: RefCell<Option<RecordDeclPtr>>,

    pub(crate) invoke_table: RefCell<HashMap<InvokeKey, Rc<InvokeSet>>>,
    /// Overloads whose target expression did not resolve to one callable:
    /// they participate in every invocation set.
    pub(crate) pattern_overloads: RefCell<Vec<OverloadPtr>>,
    final_overloads_enabled: Cell<bool>,

    analysis_caching_disabled: Cell<u32>,
    analysis_cache: RefCell<HashMap<NodeId, MultiPValue>>,
    analysis_error: RefCell<Option<(Span, Vec<String>)>>,

    context_stack: RefCell<Vec<String>>,
    location_stack: RefCell<Vec<Span>>,

    pub(crate) eval_stack: RefCell<EvalStack>,

    record_fields_cache: RefCell<HashMap<usize, Rc<Vec<(IdentifierPtr, TypePtr)>>>>,
    variant_members_cache: RefCell<HashMap<usize, Rc<Vec<TypePtr>>>>,

    parser_hook: RefCell<Option<ParserHook>>,
    flags: RefCell<HashSet<String>>,
}

impl std::fmt::Debug for CompilerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerState")
            .field("target", &self.target)
            .field("modules", &self.modules.borrow().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CompilerState {
    /// A compiler for the host target with the primitives module
    /// installed.
    pub fn new() -> Result<Self> {
        Self::for_target(TargetLayout::host())
    }

    pub fn for_target(target: TargetLayout) -> Result<Self> {
        let cst = Self::raw(target);
        crate::loader::install_primitives(&cst)?;
        Ok(cst)
    }

    fn raw(target: TargetLayout) -> Self {
        Self {
            target,
            types: RefCell::new(TypeInterner::default()),
            prim_ops: RefCell::new(HashMap::new()),
            modules: RefCell::new(HashMap::new()),
            main_module: RefCell::new(None),
            primitives_module: RefCell::new(None),
            by_ref_record: RefCell::new(None),
            invoke_table: RefCell::new(HashMap::new()),
            pattern_overloads: RefCell::new(Vec::new()),
            final_overloads_enabled: Cell::new(false),
            analysis_caching_disabled: Cell::new(0),
            analysis_cache: RefCell::new(HashMap::new()),
            analysis_error: RefCell::new(None),
            context_stack: RefCell::new(Vec::new()),
            location_stack: RefCell::new(Vec::new()),
            eval_stack: RefCell::new(EvalStack::new()),
            record_fields_cache: RefCell::new(HashMap::new()),
            variant_members_cache: RefCell::new(HashMap::new()),
            parser_hook: RefCell::new(None),
            flags: RefCell::new(HashSet::new()),
        }
    }

    //
    // diagnostics
    //

    pub fn current_span(&self) -> Span {
        self.location_stack
            .borrow()
            .last()
            .copied()
            .unwrap_or_default()
    }

    pub fn diag(&self, error: CompileError) -> Diagnostic {
        Diagnostic::with_context(error, self.current_span(), self.context_snapshot())
    }

    pub fn diag_at(&self, span: Span, error: CompileError) -> Diagnostic {
        let span = if span.is_synthetic() {
            self.current_span()
        } else {
            span
        };
        Diagnostic::with_context(error, span, self.context_snapshot())
    }

    pub fn push_location(&self, span: Span) -> LocationGuard<'_> {
        if span.is_synthetic() {
            // Synthesized nodes inherit the surrounding location.
            let current = self.current_span();
            self.location_stack.borrow_mut().push(current);
        } else {
            self.location_stack.borrow_mut().push(span);
        }
        LocationGuard { cst: self }
    }

    pub fn push_context(&self, entry: String) -> ContextGuard<'_> {
        self.context_stack.borrow_mut().push(entry);
        ContextGuard { cst: self }
    }

    pub fn context_snapshot(&self) -> Vec<String> {
        self.context_stack.borrow().clone()
    }

    //
    // recursion sentinel
    //

    /// Record the blocked point for the "recursion without base case"
    /// report. Later blocks overwrite earlier ones, so the report names
    /// the innermost location still blocked when the unwind completes.
    pub fn record_analysis_blocked(&self) {
        *self.analysis_error.borrow_mut() =
            Some((self.current_span(), self.context_snapshot()));
    }

    pub fn clear_analysis_blocked(&self) {
        *self.analysis_error.borrow_mut() = None;
    }

    pub fn analysis_blocked_diag(&self) -> Diagnostic {
        match self.analysis_error.borrow_mut().take() {
            Some((span, context)) => Diagnostic::with_context(
                CompileError::RecursionWithoutBaseCase,
                span,
                context,
            ),
            None => self.diag(CompileError::RecursionWithoutBaseCase),
        }
    }

    //
    // analysis memo
    //

    pub fn disable_analysis_caching(&self) -> CachingDisabler<'_> {
        self.analysis_caching_disabled
            .set(self.analysis_caching_disabled.get() + 1);
        CachingDisabler { cst: self }
    }

    pub fn analysis_caching_disabled(&self) -> bool {
        self.analysis_caching_disabled.get() > 0
    }

    pub fn cached_analysis(&self, node: NodeId) -> Option<MultiPValue> {
        self.analysis_cache.borrow().get(&node).cloned()
    }

    pub fn store_analysis(&self, node: NodeId, result: MultiPValue) {
        self.analysis_cache.borrow_mut().insert(node, result);
    }

    //
    // modules
    //

    pub fn add_module(&self, module: &ModulePtr) {
        let name = module.name.borrow().clone();
        self.modules.borrow_mut().insert(name, module.clone());
    }

    pub fn set_main_module(&self, module: &ModulePtr) {
        self.add_module(module);
        *self.main_module.borrow_mut() = Some(module.clone());
    }

    pub fn main_module(&self) -> Option<ModulePtr> {
        self.main_module.borrow().clone()
    }

    pub fn loaded_module(&self, name: &str) -> Option<ModulePtr> {
        self.modules.borrow().get(name).cloned()
    }

    pub fn prelude_module(&self) -> Option<ModulePtr> {
        self.loaded_module("prelude")
    }

    pub fn primitives_module(&self) -> Option<ModulePtr> {
        self.primitives_module.borrow().clone()
    }

    pub(crate) fn set_primitives_module(&self, module: &ModulePtr) {
        *self.primitives_module.borrow_mut() = Some(module.clone());
        self.add_module(module);
    }

    /// Look up an operator hook (`call`, `index`, `fieldRef`, `copy`,
    /// `assign`) in the prelude, when a prelude is registered.
    pub fn prelude_operator(&self, name: &str) -> Result<Option<Object>> {
        match self.prelude_module() {
            Some(prelude) => crate::env::lookup_public(self, &prelude, name),
            None => Ok(None),
        }
    }

    //
    // primitive ops
    //

    pub fn prim_op(&self, code: PrimOpCode) -> PrimOpPtr {
        if let Some(p) = self.prim_ops.borrow().get(&code) {
            return p.clone();
        }
        let p = PrimOp::new(code);
        self.prim_ops.borrow_mut().insert(code, p.clone());
        p
    }

    pub fn calling_conv_attribute(&self, cc: CallingConv) -> PrimOpCode {
        match cc {
            CallingConv::C => PrimOpCode::AttributeCCall,
            CallingConv::StdCall => PrimOpCode::AttributeStdCall,
            CallingConv::FastCall => PrimOpCode::AttributeFastCall,
            CallingConv::ThisCall => PrimOpCode::AttributeThisCall,
            CallingConv::Llvm => PrimOpCode::AttributeLLVMCall,
        }
    }

    pub fn attribute_calling_conv(&self, code: PrimOpCode) -> Option<CallingConv> {
        match code {
            PrimOpCode::AttributeCCall => Some(CallingConv::C),
            PrimOpCode::AttributeStdCall => Some(CallingConv::StdCall),
            PrimOpCode::AttributeFastCall => Some(CallingConv::FastCall),
            PrimOpCode::AttributeThisCall => Some(CallingConv::ThisCall),
            PrimOpCode::AttributeLLVMCall => Some(CallingConv::Llvm),
            _ => None,
        }
    }

    //
    // type constructors
    //

    fn intern(&self, kind: TypeKind) -> TypePtr {
        self.types.borrow_mut().intern(kind)
    }

    pub fn bool_type(&self) -> TypePtr {
        self.intern(TypeKind::Bool)
    }

    pub fn int_type(&self, bits: u8, signed: bool) -> TypePtr {
        self.intern(TypeKind::Integer { bits, signed })
    }

    pub fn float_type(&self, bits: u8, imaginary: bool) -> TypePtr {
        self.intern(TypeKind::Float { bits, imaginary })
    }

    pub fn complex_type(&self, bits: u8) -> TypePtr {
        self.intern(TypeKind::Complex { bits })
    }

    pub fn pointer_type(&self, pointee: &TypePtr) -> TypePtr {
        self.intern(TypeKind::Pointer(pointee.clone()))
    }

    pub fn code_pointer_type(
        &self,
        arg_types: Vec<TypePtr>,
        return_is_ref: Vec<bool>,
        return_types: Vec<TypePtr>,
    ) -> TypePtr {
        self.intern(TypeKind::CodePointer {
            arg_types,
            return_is_ref,
            return_types,
        })
    }

    pub fn c_code_pointer_type(
        &self,
        calling_conv: CallingConv,
        has_var_args: bool,
        arg_types: Vec<TypePtr>,
        return_type: Option<TypePtr>,
    ) -> TypePtr {
        self.intern(TypeKind::CCodePointer {
            calling_conv,
            has_var_args,
            arg_types,
            return_type,
        })
    }

    pub fn array_type(&self, element: &TypePtr, size: u64) -> TypePtr {
        self.intern(TypeKind::Array {
            element: element.clone(),
            size,
        })
    }

    pub fn vec_type(&self, element: &TypePtr, size: u64) -> TypePtr {
        self.intern(TypeKind::Vec {
            element: element.clone(),
            size,
        })
    }

    pub fn tuple_type(&self, elements: Vec<TypePtr>) -> TypePtr {
        self.intern(TypeKind::Tuple(elements))
    }

    pub fn union_type(&self, members: Vec<TypePtr>) -> TypePtr {
        self.intern(TypeKind::Union(members))
    }

    pub fn static_type(&self, obj: Object) -> TypePtr {
        self.intern(TypeKind::Static(obj))
    }

    pub fn enum_type(&self, decl: &EnumDeclPtr) -> TypePtr {
        self.intern(TypeKind::Enum(decl.clone()))
    }

    pub fn new_type(&self, decl: &NewTypeDeclPtr) -> TypePtr {
        self.intern(TypeKind::NewType(decl.clone()))
    }

    pub fn record_type(&self, decl: &RecordDeclPtr, params: Vec<Object>) -> Result<TypePtr> {
        check_decl_arity(
            self,
            decl.params.len(),
            decl.var_param.is_some(),
            params.len(),
        )?;
        Ok(self.intern(TypeKind::Record {
            decl: decl.clone(),
            params,
        }))
    }

    pub fn variant_type(&self, decl: &VariantDeclPtr, params: Vec<Object>) -> Result<TypePtr> {
        check_decl_arity(
            self,
            decl.params.len(),
            decl.var_param.is_some(),
            params.len(),
        )?;
        Ok(self.intern(TypeKind::Variant {
            decl: decl.clone(),
            params,
        }))
    }

    pub fn c_int_type(&self) -> TypePtr {
        self.int_type(32, true)
    }

    pub fn c_size_type(&self) -> TypePtr {
        self.int_type(self.target.pointer_bits() as u8, false)
    }

    pub fn c_ptrdiff_type(&self) -> TypePtr {
        self.int_type(self.target.pointer_bits() as u8, true)
    }

    //
    // the ByRef marker record
    //

    pub(crate) fn set_by_ref_record(&self, decl: &RecordDeclPtr) {
        *self.by_ref_record.borrow_mut() = Some(decl.clone());
    }

    pub fn by_ref_record(&self) -> Option<RecordDeclPtr> {
        self.by_ref_record.borrow().clone()
    }

    /// `ByRef[T]`, the marker return-spec types use to declare by-ref
    /// returns.
    pub fn by_ref_type(&self, t: &TypePtr) -> Result<TypePtr> {
        let decl = self.by_ref_record().ok_or_else(|| {
            self.diag(CompileError::InvalidOperation(
                "primitives module not installed".to_string(),
            ))
        })?;
        self.record_type(&decl, vec![Object::Type(t.clone())])
    }

    //
    // aggregate type contents
    //

    /// Field names and types of a record type, with declaration
    /// parameters substituted. Cached per type node.
    pub fn record_field_types(
        &self,
        t: &TypePtr,
    ) -> Result<Rc<Vec<(IdentifierPtr, TypePtr)>>> {
        let id = type_node_id(t);
        if let Some(cached) = self.record_fields_cache.borrow().get(&id) {
            return Ok(cached.clone());
        }
        let TypeKind::Record { decl, params } = &t.kind else {
            return Err(self.diag(CompileError::InvalidOperation(
                "record fields of non-record type".to_string(),
            )));
        };
        let env = decl_param_env(self, &decl.env, &decl.params, &decl.var_param, params)?;
        let mut fields = Vec::with_capacity(decl.fields.len());
        {
            let _caching = self.disable_analysis_caching();
            for field in &decl.fields {
                let ft = crate::evaluator::evaluate_type(self, &field.type_expr, &env)?;
                fields.push((field.name.clone(), ft));
            }
        }
        let fields = Rc::new(fields);
        self.record_fields_cache.borrow_mut().insert(id, fields.clone());
        Ok(fields)
    }

    /// Member types of a variant type: the declared defaults plus every
    /// `instance` whose target unifies with this type. Cached per type
    /// node.
    pub fn variant_member_types(&self, t: &TypePtr) -> Result<Rc<Vec<TypePtr>>> {
        let id = type_node_id(t);
        if let Some(cached) = self.variant_members_cache.borrow().get(&id) {
            return Ok(cached.clone());
        }
        let TypeKind::Variant { decl, params } = &t.kind else {
            return Err(self.diag(CompileError::InvalidOperation(
                "variant members of non-variant type".to_string(),
            )));
        };
        let env = decl_param_env(self, &decl.env, &decl.params, &decl.var_param, params)?;
        let mut members = Vec::new();
        {
            let _caching = self.disable_analysis_caching();
            for member in &decl.default_members {
                members.push(crate::evaluator::evaluate_type(self, member, &env)?);
            }
            let instances = decl.instances.borrow().clone();
            for instance in instances {
                if let Some(member) = instance_member_for(self, &instance, t)? {
                    members.push(member);
                }
            }
        }
        let members = Rc::new(members);
        self.variant_members_cache
            .borrow_mut()
            .insert(id, members.clone());
        Ok(members)
    }

    pub fn newtype_base_type(&self, decl: &NewTypeDeclPtr) -> Result<TypePtr> {
        if let Some(cached) = decl.base_cache.borrow().clone() {
            return Ok(cached);
        }
        let base = {
            let _caching = self.disable_analysis_caching();
            crate::evaluator::evaluate_type(self, &decl.base_expr, &decl.env)?
        };
        *decl.base_cache.borrow_mut() = Some(base.clone());
        Ok(base)
    }

    //
    // flags and modes
    //

    pub fn set_final_overloads_enabled(&self, enabled: bool) {
        self.final_overloads_enabled.set(enabled);
    }

    pub fn final_overloads_enabled(&self) -> bool {
        self.final_overloads_enabled.get()
    }

    pub fn set_flag(&self, flag: &str) {
        self.flags.borrow_mut().insert(flag.to_string());
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.borrow().contains(flag)
    }

    //
    // parser hook
    //

    pub fn set_parser_hook(&self, hook: ParserHook) {
        *self.parser_hook.borrow_mut() = Some(hook);
    }

    pub fn parse_with_hook(&self, source: &str, span: Span) -> Result<Vec<ExprPtr>> {
        let hook = self.parser_hook.borrow();
        match &*hook {
            Some(hook) => hook(self, source, span),
            None => Err(self.diag_at(
                span,
                CompileError::UnsupportedAtCompileTime(
                    "eval without a front-end parser hook is".to_string(),
                ),
            )),
        }
    }
}

fn check_decl_arity(
    cst: &CompilerState,
    expected: usize,
    variadic: bool,
    got: usize,
) -> Result<()> {
    let ok = if variadic {
        got >= expected
    } else {
        got == expected
    };
    if ok {
        Ok(())
    } else {
        Err(cst.diag(CompileError::Arity {
            expected,
            got,
            variadic,
        }))
    }
}

/// Environment with a declaration's parameters bound to concrete
/// objects; trailing parameters collect into the variadic name.
fn decl_param_env(
    cst: &CompilerState,
    base: &crate::env::EnvPtr,
    names: &[IdentifierPtr],
    var_param: &Option<IdentifierPtr>,
    params: &[Object],
) -> Result<crate::env::EnvPtr> {
    let env = Env::new(base);
    for (name, value) in names.iter().zip(params.iter()) {
        crate::env::add_local(cst, &env, name, value.clone())?;
    }
    if let Some(var_param) = var_param {
        let rest: Vec<Object> = params[names.len()..].to_vec();
        crate::env::add_local(
            cst,
            &env,
            var_param,
            Object::MultiStatic(Rc::new(rest)),
        )?;
    }
    Ok(env)
}

/// Match one variant `instance` declaration against a concrete variant
/// type; when the target unifies, evaluate the instance's member type
/// with its pattern variables bound.
fn instance_member_for(
    cst: &CompilerState,
    instance: &crate::objects::InstanceDeclPtr,
    t: &TypePtr,
) -> Result<Option<TypePtr>> {
    let pattern_env = Env::new(&instance.env);
    let mut cells = Vec::new();
    let mut multi_cells = Vec::new();
    for pvar in &instance.pattern_vars {
        if pvar.is_multi {
            let cell = MultiPatternCell::empty();
            multi_cells.push((pvar.name.clone(), cell.clone()));
            crate::env::add_local(
                cst,
                &pattern_env,
                &pvar.name,
                Object::MultiPattern(crate::patterns::MultiPattern::Cell(cell)),
            )?;
        } else {
            let cell = PatternCell::empty();
            cells.push((pvar.name.clone(), cell.clone()));
            crate::env::add_local(
                cst,
                &pattern_env,
                &pvar.name,
                Object::Pattern(crate::patterns::Pattern::Cell(cell)),
            )?;
        }
    }
    let target_pattern = evaluate_one_pattern(cst, &instance.target, &pattern_env)?;
    if !unify_pattern_obj(cst, &target_pattern, &Object::Type(t.clone()))? {
        return Ok(None);
    }
    let static_env = Env::new(&instance.env);
    for (name, cell) in cells {
        let value = deref_deep(cst, &crate::patterns::Pattern::Cell(cell))?
            .ok_or_else(|| {
                cst.diag_at(
                    name.span,
                    CompileError::UnboundPatternVariable(name.name.clone()),
                )
            })?;
        crate::env::add_local(cst, &static_env, &name, value)?;
    }
    for (name, cell) in multi_cells {
        let values = crate::patterns::deref_deep_multi(
            cst,
            &crate::patterns::MultiPattern::Cell(cell),
        )?
        .ok_or_else(|| {
            cst.diag_at(
                name.span,
                CompileError::UnboundPatternVariable(name.name.clone()),
            )
        })?;
        crate::env::add_local(
            cst,
            &static_env,
            &name,
            Object::MultiStatic(Rc::new(values)),
        )?;
    }
    let member = crate::evaluator::evaluate_type(cst, &instance.member, &static_env)?;
    Ok(Some(member))
}

pub struct LocationGuard<'a> {
    cst: &'a CompilerState,
}

impl Drop for LocationGuard<'_> {
    fn drop(&mut self) {
        self.cst.location_stack.borrow_mut().pop();
    }
}

impl std::fmt::Debug for LocationGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocationGuard")
    }
}

pub struct ContextGuard<'a> {
    cst: &'a CompilerState,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.cst.context_stack.borrow_mut().pop();
    }
}

impl std::fmt::Debug for ContextGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContextGuard")
    }
}

pub struct CachingDisabler<'a> {
    cst: &'a CompilerState,
}

impl Drop for CachingDisabler<'_> {
    fn drop(&mut self) {
        self.cst
            .analysis_caching_disabled
            .set(self.cst.analysis_caching_disabled.get() - 1);
    }
}

impl std::fmt::Debug for CachingDisabler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CachingDisabler")
    }
}

/// Look up a global-variable instance for a parameter tuple, creating it
/// on first use.
pub fn lookup_gvar_instance(
    gvar: &crate::objects::GlobalVariablePtr,
    params: Vec<Object>,
) -> crate::objects::GVarInstancePtr {
    let key = ObjectVecKey(params.clone());
    if let Some(instance) = gvar.instances.borrow().get(&key) {
        return instance.clone();
    }
    let instance = Rc::new(crate::objects::GVarInstance {
        gvar: gvar.clone(),
        params,
        expr: RefCell::new(None),
        env: RefCell::new(None),
        analyzing: Cell::new(false),
        analysis: RefCell::new(None),
        ty: RefCell::new(None),
    });
    gvar.instances.borrow_mut().insert(key, instance.clone());
    instance
}
