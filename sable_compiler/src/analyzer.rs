//! Type analysis.
//!
//! The analyzer is an abstract interpreter over the same AST the
//! evaluator executes. Every expression produces a [`MultiPValue`]: zero
//! or more (type, tempness) pairs. Recursion is tolerated by returning
//! `Ok(None)` from any analysis that is blocked on itself; the blocked
//! location is captured so that, if the unwind never reaches a base
//! case, the "recursion without base case" report points at it.

use std::rc::Rc;

use crate::ast::{
    Binding, BindingKind, Expr, ExprKind, ExprList, ExprListPtr, ExprPtr, ReturnKind, StmtKind,
    StmtPtr, ValueTempness,
};
use crate::env::{add_local, foreign_expr, safe_lookup_env, safe_lookup_public, Env, EnvPtr};
use crate::error::{CompileError, Result};
use crate::evaluator::{
    evaluate_multi_static, evaluate_one_static, evaluate_pattern_predicate,
    evaluate_return_specs, evaluate_type,
};
use crate::invoketables::{lookup_invoke_entry, InvokeEntry};
use crate::matchinvoke::{initialize_pattern_env, MatchFailureReport};
use crate::objects::{
    GVarInstancePtr, GlobalAliasPtr, GlobalVariablePtr, Identifier, Object, PrimOpCode,
};
use crate::patterns::{
    deref_deep, deref_deep_multi, evaluate_multi_pattern, evaluate_one_pattern, unify_multi_objs,
    unify_pattern_obj, MultiPattern, Pattern,
};
use crate::printer::{render_args_key, StaticName, TypeName};
use crate::primops::is_overloadable_prim_op_code;
use crate::state::{lookup_gvar_instance, CompilerState};
use crate::types::{unwrap_static_type, TypeKind, TypePtr};

//
// analysis values
//

/// Abstract value: a type plus whether the value is an rvalue owning its
/// storage (`is_temp`) or an lvalue referenced through an implicit
/// pointer.
#[derive(Debug, Clone)]
pub struct PValue {
    pub ty: TypePtr,
    pub is_temp: bool,
}

impl PValue {
    pub fn new(ty: TypePtr, is_temp: bool) -> Self {
        Self { ty, is_temp }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiPValue {
    pub values: Vec<PValue>,
}

impl MultiPValue {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn single(pv: PValue) -> Self {
        Self { values: vec![pv] }
    }

    pub fn add(&mut self, pv: PValue) {
        self.values.push(pv);
    }

    pub fn add_multi(&mut self, other: &MultiPValue) {
        self.values.extend(other.values.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn static_pvalue(cst: &CompilerState, obj: Object) -> PValue {
    PValue::new(cst.static_type(obj), true)
}

//
// small static helpers
//

/// The type of a compile-time object, for objects that have one.
pub fn object_type(cst: &CompilerState, obj: &Object) -> Result<TypePtr> {
    match obj {
        Object::ValueHolder(vh) => Ok(vh.ty.clone()),
        Object::Type(_)
        | Object::PrimOp(_)
        | Object::Procedure(_)
        | Object::Intrinsic(_)
        | Object::GlobalAlias(_)
        | Object::Record(_)
        | Object::Variant(_)
        | Object::Module(_)
        | Object::Ident(_) => Ok(cst.static_type(obj.clone())),
        _ => Err(cst.diag(CompileError::UntypeableObject)),
    }
}

pub fn static_to_type(obj: &Object) -> Option<TypePtr> {
    match obj {
        Object::Type(t) => Some(t.clone()),
        _ => None,
    }
}

/// A single type, or a tuple value of static types, flattened into a
/// type list.
pub fn static_to_type_tuple(cst: &CompilerState, obj: &Object) -> Option<Vec<TypePtr>> {
    if let Some(t) = static_to_type(obj) {
        return Some(vec![t]);
    }
    let Object::ValueHolder(vh) = obj else {
        return None;
    };
    let TypeKind::Tuple(elems) = &vh.ty.kind else {
        return None;
    };
    let mut out = Vec::with_capacity(elems.len());
    for elem in elems {
        let inner = unwrap_static_type(elem)?;
        out.push(static_to_type(&inner)?);
    }
    let _ = cst;
    Some(out)
}

pub fn static_to_int(cst: &CompilerState, obj: &Object) -> Result<i32> {
    let Object::ValueHolder(vh) = obj else {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: "Int32".to_string(),
            got: obj.kind_name().to_string(),
        }));
    };
    if !Rc::ptr_eq(&vh.ty, &cst.c_int_type()) {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: "Int32".to_string(),
            got: TypeName(&vh.ty).to_string(),
        }));
    }
    Ok(vh.as_i32())
}

pub fn static_to_bool(cst: &CompilerState, obj: &Object) -> Result<bool> {
    let Object::ValueHolder(vh) = obj else {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: "Bool".to_string(),
            got: obj.kind_name().to_string(),
        }));
    };
    if !Rc::ptr_eq(&vh.ty, &cst.bool_type()) {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: "Bool".to_string(),
            got: TypeName(&vh.ty).to_string(),
        }));
    }
    Ok(vh.as_bool())
}

pub fn static_to_calling_conv(
    cst: &CompilerState,
    obj: &Object,
) -> Result<crate::objects::CallingConv> {
    if let Object::PrimOp(p) = obj {
        if let Some(cc) = cst.attribute_calling_conv(p.code) {
            return Ok(cc);
        }
    }
    Err(cst.diag(CompileError::InvalidOperation(
        "expecting a calling convention attribute".to_string(),
    )))
}

pub fn ensure_arity(cst: &CompilerState, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(cst.diag(CompileError::Arity {
            expected,
            got,
            variadic: false,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolKind {
    Expr,
    StaticTrue,
    StaticFalse,
}

/// Classify a condition type: runtime Bool, or a statically known
/// Static[true]/Static[false].
pub fn type_bool_kind(cst: &CompilerState, t: &TypePtr) -> Result<BoolKind> {
    if matches!(t.kind, TypeKind::Bool) {
        return Ok(BoolKind::Expr);
    }
    let Some(obj) = unwrap_static_type(t) else {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: "Bool or static Bool".to_string(),
            got: TypeName(t).to_string(),
        }));
    };
    let value = static_to_bool(cst, &obj)?;
    Ok(if value {
        BoolKind::StaticTrue
    } else {
        BoolKind::StaticFalse
    })
}

/// Strip a `ByRef[T]` marker, reporting whether one was present.
pub fn unwrap_by_ref(cst: &CompilerState, t: &TypePtr) -> Result<(TypePtr, bool)> {
    if let TypeKind::Record { decl, params } = &t.kind {
        if let Some(by_ref) = cst.by_ref_record() {
            if Rc::ptr_eq(decl, &by_ref) {
                let Some(Object::Type(inner)) = params.first().cloned() else {
                    return Err(cst.diag(CompileError::InvalidOperation(format!(
                        "invalid return type: {}",
                        TypeName(t)
                    ))));
                };
                return Ok((inner, true));
            }
        }
    }
    Ok((t.clone(), false))
}

//
// construct_type
//

/// Apply a type constructor to static parameters.
pub fn construct_type(cst: &CompilerState, constructor: &Object, args: &[Object]) -> Result<TypePtr> {
    match constructor {
        Object::PrimOp(p) => match p.code {
            PrimOpCode::Pointer => {
                ensure_arity(cst, 1, args.len())?;
                let pointee = expect_type(cst, &args[0])?;
                Ok(cst.pointer_type(&pointee))
            }
            PrimOpCode::CodePointer => {
                ensure_arity(cst, 2, args.len())?;
                let arg_types = expect_type_tuple(cst, &args[0])?;
                let raw_returns = expect_type_tuple(cst, &args[1])?;
                let mut return_types = Vec::with_capacity(raw_returns.len());
                let mut return_is_ref = Vec::with_capacity(raw_returns.len());
                for rt in raw_returns {
                    let (inner, is_ref) = unwrap_by_ref(cst, &rt)?;
                    return_types.push(inner);
                    return_is_ref.push(is_ref);
                }
                Ok(cst.code_pointer_type(arg_types, return_is_ref, return_types))
            }
            PrimOpCode::ExternalCodePointer => {
                ensure_arity(cst, 4, args.len())?;
                let cc = static_to_calling_conv(cst, &args[0])?;
                let has_var_args = static_to_bool(cst, &args[1])?;
                let arg_types = expect_type_tuple(cst, &args[2])?;
                let return_types = expect_type_tuple(cst, &args[3])?;
                if return_types.len() > 1 {
                    return Err(cst.diag(CompileError::ArgumentError {
                        index: 3,
                        message: "C code cannot return more than one value".to_string(),
                    }));
                }
                Ok(cst.c_code_pointer_type(
                    cc,
                    has_var_args,
                    arg_types,
                    return_types.into_iter().next(),
                ))
            }
            PrimOpCode::Array => {
                ensure_arity(cst, 2, args.len())?;
                let element = expect_type(cst, &args[0])?;
                let size = static_to_int(cst, &args[1])?;
                Ok(cst.array_type(&element, size as u64))
            }
            PrimOpCode::Vec => {
                ensure_arity(cst, 2, args.len())?;
                let element = expect_type(cst, &args[0])?;
                let size = static_to_int(cst, &args[1])?;
                Ok(cst.vec_type(&element, size as u64))
            }
            PrimOpCode::Tuple => {
                let mut elems = Vec::with_capacity(args.len());
                for arg in args {
                    elems.push(expect_type(cst, arg)?);
                }
                Ok(cst.tuple_type(elems))
            }
            PrimOpCode::Union => {
                let mut members = Vec::with_capacity(args.len());
                for arg in args {
                    members.push(expect_type(cst, arg)?);
                }
                Ok(cst.union_type(members))
            }
            PrimOpCode::Static => {
                ensure_arity(cst, 1, args.len())?;
                Ok(cst.static_type(args[0].clone()))
            }
            _ => Err(cst.diag(CompileError::InvalidOperation(format!(
                "{} is not a type constructor",
                p.code.name()
            )))),
        },
        Object::Record(decl) => cst.record_type(decl, args.to_vec()),
        Object::Variant(decl) => cst.variant_type(decl, args.to_vec()),
        _ => Err(cst.diag(CompileError::InvalidOperation(format!(
            "{} is not a type constructor",
            StaticName(constructor)
        )))),
    }
}

pub fn expect_type(cst: &CompilerState, obj: &Object) -> Result<TypePtr> {
    static_to_type(obj).ok_or_else(|| {
        cst.diag(CompileError::TypeMismatch {
            expected: "a type".to_string(),
            got: format!("{}", StaticName(obj)),
        })
    })
}

fn expect_type_tuple(cst: &CompilerState, obj: &Object) -> Result<Vec<TypePtr>> {
    static_to_type_tuple(cst, obj).ok_or_else(|| {
        cst.diag(CompileError::TypeMismatch {
            expected: "zero-or-more types".to_string(),
            got: format!("{}", StaticName(obj)),
        })
    })
}

//
// safe analysis wrappers
//

pub fn safe_analyze_one(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr) -> Result<PValue> {
    match analyze_one(cst, expr, env)? {
        Some(pv) => {
            cst.clear_analysis_blocked();
            Ok(pv)
        }
        None => Err(cst.analysis_blocked_diag()),
    }
}

pub fn safe_analyze_expr(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
) -> Result<MultiPValue> {
    match analyze_expr(cst, expr, env)? {
        Some(mpv) => {
            cst.clear_analysis_blocked();
            Ok(mpv)
        }
        None => Err(cst.analysis_blocked_diag()),
    }
}

pub fn safe_analyze_multi(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    want_count: usize,
) -> Result<MultiPValue> {
    match analyze_multi(cst, exprs, env, want_count)? {
        Some(mpv) => {
            cst.clear_analysis_blocked();
            Ok(mpv)
        }
        None => Err(cst.analysis_blocked_diag()),
    }
}

pub fn safe_analyze_multi_args(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    dispatch_indices: &mut Vec<usize>,
) -> Result<MultiPValue> {
    match analyze_multi_args(cst, exprs, env, dispatch_indices)? {
        Some(mpv) => {
            cst.clear_analysis_blocked();
            Ok(mpv)
        }
        None => Err(cst.analysis_blocked_diag()),
    }
}

pub fn safe_analyze_callable(
    cst: &CompilerState,
    callable: &Object,
    args_key: &[TypePtr],
    args_tempness: &[ValueTempness],
) -> Result<Rc<InvokeEntry>> {
    let entry = analyze_callable(cst, callable, args_key, args_tempness)?;
    if !entry.call_by_name && !entry.analyzed.get() {
        return Err(cst.analysis_blocked_diag());
    }
    cst.clear_analysis_blocked();
    Ok(entry)
}

pub fn safe_analyze_gvar_instance(
    cst: &CompilerState,
    instance: &GVarInstancePtr,
) -> Result<MultiPValue> {
    match analyze_gvar_instance(cst, instance)? {
        Some(mpv) => {
            cst.clear_analysis_blocked();
            Ok(mpv)
        }
        None => Err(cst.analysis_blocked_diag()),
    }
}

//
// analyze_multi
//

fn implicit_unpack_expr(want_count: usize, exprs: &ExprListPtr) -> Option<ExprPtr> {
    if want_count >= 1
        && exprs.len() == 1
        && !matches!(exprs.exprs[0].kind, ExprKind::Unpack(_))
    {
        Some(exprs.exprs[0].clone())
    } else {
        None
    }
}

pub fn analyze_multi(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    want_count: usize,
) -> Result<Option<MultiPValue>> {
    if cst.analysis_caching_disabled() {
        return analyze_multi2(cst, exprs, env, want_count);
    }
    if let Some(cached) = cst.cached_analysis(exprs.id) {
        return Ok(Some(cached));
    }
    let result = analyze_multi2(cst, exprs, env, want_count)?;
    if let Some(mpv) = &result {
        cst.store_analysis(exprs.id, mpv.clone());
    }
    Ok(result)
}

fn analyze_multi2(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    want_count: usize,
) -> Result<Option<MultiPValue>> {
    let mut out = MultiPValue::new();
    if let Some(unpack) = implicit_unpack_expr(want_count, exprs) {
        match analyze_expr(cst, &unpack, env)? {
            None => return Ok(None),
            Some(mpv) => out.add_multi(&mpv),
        }
        return Ok(Some(out));
    }
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => match analyze_expr(cst, inner, env)? {
                None => return Ok(None),
                Some(mpv) => out.add_multi(&mpv),
            },
            ExprKind::Paren(_) => match analyze_expr(cst, expr, env)? {
                None => return Ok(None),
                Some(mpv) => out.add_multi(&mpv),
            },
            _ => match analyze_one(cst, expr, env)? {
                None => return Ok(None),
                Some(pv) => out.add(pv),
            },
        }
    }
    Ok(Some(out))
}

pub fn analyze_one(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr) -> Result<Option<PValue>> {
    let Some(mpv) = analyze_expr(cst, expr, env)? else {
        return Ok(None);
    };
    let _loc = cst.push_location(expr.span);
    ensure_arity(cst, 1, mpv.len())?;
    Ok(Some(mpv.values[0].clone()))
}

//
// argument analysis with dispatch positions
//

pub fn analyze_multi_args(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    dispatch_indices: &mut Vec<usize>,
) -> Result<Option<MultiPValue>> {
    if cst.analysis_caching_disabled() {
        return analyze_multi_args2(cst, exprs, env, 0, dispatch_indices);
    }
    if let Some(cached) = cst.cached_analysis(exprs.id) {
        return Ok(Some(cached));
    }
    let result = analyze_multi_args2(cst, exprs, env, 0, dispatch_indices)?;
    if let Some(mpv) = &result {
        if dispatch_indices.is_empty() {
            cst.store_analysis(exprs.id, mpv.clone());
        }
    }
    Ok(result)
}

fn analyze_multi_args2(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    start_index: usize,
    dispatch_indices: &mut Vec<usize>,
) -> Result<Option<MultiPValue>> {
    let mut out = MultiPValue::new();
    let mut index = start_index;
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => {
                match analyze_arg_expr(cst, inner, env, index, dispatch_indices)? {
                    None => return Ok(None),
                    Some(mpv) => {
                        index += mpv.len();
                        out.add_multi(&mpv);
                    }
                }
            }
            ExprKind::Paren(_) => {
                match analyze_arg_expr(cst, expr, env, index, dispatch_indices)? {
                    None => return Ok(None),
                    Some(mpv) => {
                        index += mpv.len();
                        out.add_multi(&mpv);
                    }
                }
            }
            _ => match analyze_one_arg(cst, expr, env, index, dispatch_indices)? {
                None => return Ok(None),
                Some(pv) => {
                    out.add(pv);
                    index += 1;
                }
            },
        }
    }
    Ok(Some(out))
}

fn analyze_one_arg(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
    start_index: usize,
    dispatch_indices: &mut Vec<usize>,
) -> Result<Option<PValue>> {
    let Some(mpv) = analyze_arg_expr(cst, expr, env, start_index, dispatch_indices)? else {
        return Ok(None);
    };
    let _loc = cst.push_location(expr.span);
    ensure_arity(cst, 1, mpv.len())?;
    Ok(Some(mpv.values[0].clone()))
}

fn analyze_arg_expr(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
    start_index: usize,
    dispatch_indices: &mut Vec<usize>,
) -> Result<Option<MultiPValue>> {
    if let ExprKind::DispatchExpr(inner) = &expr.kind {
        let Some(mpv) = analyze_expr(cst, inner, env)? else {
            return Ok(None);
        };
        for i in 0..mpv.len() {
            dispatch_indices.push(start_index + i);
        }
        return Ok(Some(mpv));
    }
    analyze_expr(cst, expr, env)
}

//
// analyze_expr
//

pub fn analyze_expr(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPValue>> {
    if cst.analysis_caching_disabled() {
        return analyze_expr2(cst, expr, env);
    }
    if let Some(cached) = cst.cached_analysis(expr.id) {
        return Ok(Some(cached));
    }
    let result = analyze_expr2(cst, expr, env)?;
    if let Some(mpv) = &result {
        cst.store_analysis(expr.id, mpv.clone());
    }
    Ok(result)
}

fn analyze_expr2(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPValue>> {
    let _loc = cst.push_location(expr.span);
    match &expr.kind {
        ExprKind::BoolLiteral(_) => Ok(Some(MultiPValue::single(PValue::new(
            cst.bool_type(),
            true,
        )))),
        ExprKind::IntLiteral { value, suffix } => {
            let holder =
                crate::literals::parse_int_literal(cst, env, value, suffix.as_deref())?;
            Ok(Some(MultiPValue::single(PValue::new(holder.ty.clone(), true))))
        }
        ExprKind::FloatLiteral { value, suffix } => {
            let holder =
                crate::literals::parse_float_literal(cst, env, value, suffix.as_deref())?;
            Ok(Some(MultiPValue::single(PValue::new(holder.ty.clone(), true))))
        }
        ExprKind::StringLiteral(s) => Ok(Some(MultiPValue::single(static_pvalue(
            cst,
            Object::Ident(Identifier::get(s)),
        )))),
        ExprKind::NameRef(name) => {
            let obj = safe_lookup_env(cst, env, name)?;
            match obj {
                Object::Expr(e) => analyze_expr(cst, &e, env),
                Object::ExprList(exprs) => analyze_multi(cst, &exprs, env, 0),
                other => analyze_static_object(cst, &other),
            }
        }
        ExprKind::Tuple(args) => {
            let Some(mpv) = analyze_multi(cst, args, env, 0)? else {
                return Ok(None);
            };
            let elems: Vec<TypePtr> = mpv.values.iter().map(|pv| pv.ty.clone()).collect();
            Ok(Some(MultiPValue::single(PValue::new(
                cst.tuple_type(elems),
                true,
            ))))
        }
        ExprKind::Paren(args) => analyze_multi(cst, args, env, 0),
        ExprKind::Indexing { expr: head, args } => {
            analyze_indexing_expr(cst, head, args, env)
        }
        ExprKind::Call { expr: callee, args } => analyze_call_expr(cst, callee, args, env),
        ExprKind::FieldRef { expr: base, name } => {
            let Some(pv) = analyze_one(cst, base, env)? else {
                return Ok(None);
            };
            if let Some(Object::Module(module)) = unwrap_static_type(&pv.ty) {
                let obj = safe_lookup_public(cst, &module, name)?;
                return analyze_static_object(cst, &obj);
            }
            analyze_field_ref_value(cst, &pv, base, name, env)
        }
        ExprKind::StaticIndexing { expr: base, index } => {
            let Some(pv) = analyze_one(cst, base, env)? else {
                return Ok(None);
            };
            let TypeKind::Tuple(elems) = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a tuple".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            let Some(elem) = elems.get(*index as usize) else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: *index as usize,
                    message: format!("tuple has {} elements", elems.len()),
                }));
            };
            Ok(Some(MultiPValue::single(PValue::new(
                elem.clone(),
                pv.is_temp,
            ))))
        }
        ExprKind::AddressOf(inner) => {
            let Some(pv) = analyze_one(cst, inner, env)? else {
                return Ok(None);
            };
            if pv.is_temp {
                return Err(cst.diag(CompileError::AddressOfTemporary));
            }
            Ok(Some(MultiPValue::single(PValue::new(
                cst.pointer_type(&pv.ty),
                true,
            ))))
        }
        ExprKind::Dereference(inner) => {
            let Some(pv) = analyze_one(cst, inner, env)? else {
                return Ok(None);
            };
            let TypeKind::Pointer(pointee) = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            Ok(Some(MultiPValue::single(PValue::new(
                pointee.clone(),
                false,
            ))))
        }
        ExprKind::And { .. } | ExprKind::Or { .. } => Ok(Some(MultiPValue::single(
            PValue::new(cst.bool_type(), true),
        ))),
        ExprKind::Lambda(lambda) => {
            let converted = crate::lambdas::convert_lambda(cst, lambda, env)?;
            analyze_static_object(cst, &converted)
        }
        ExprKind::Unpack(inner) => {
            if !matches!(inner.kind, ExprKind::Foreign { .. }) {
                return Err(cst.diag(CompileError::InvalidOperation(
                    "incorrect usage of unpack operator".to_string(),
                )));
            }
            analyze_expr(cst, inner, env)
        }
        ExprKind::StaticExpr(inner) => {
            let obj = evaluate_one_static(cst, inner, env)?;
            Ok(Some(MultiPValue::single(static_pvalue(cst, obj))))
        }
        ExprKind::DispatchExpr(_) => Err(cst.diag(CompileError::InvalidOperation(
            "incorrect usage of dispatch operator".to_string(),
        ))),
        ExprKind::EvalExpr(args) => {
            let exprs = crate::evaluator::desugar_eval_body(cst, args, env, expr.span)?;
            analyze_multi(cst, &exprs, env, 0)
        }
        ExprKind::Foreign { env: foreign_env, expr: inner } => {
            analyze_expr(cst, inner, foreign_env)
        }
        ExprKind::ObjectExpr(obj) => analyze_static_object(cst, obj),
    }
}

fn analyze_field_ref_value(
    cst: &CompilerState,
    pv: &PValue,
    base: &ExprPtr,
    name: &crate::objects::IdentifierPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPValue>> {
    // A `fieldRef` operator procedure takes precedence, so a library can
    // define field access for arbitrary types.
    if let Some(op) = cst.prelude_operator("fieldRef")? {
        let args = ExprList::new(vec![
            base.clone(),
            Expr::new(
                ExprKind::ObjectExpr(Object::Ident(name.clone())),
                name.span,
            ),
        ]);
        let callee = Expr::new(ExprKind::ObjectExpr(op), base.span);
        return analyze_call_expr(cst, &callee, &args, env);
    }
    if matches!(pv.ty.kind, TypeKind::Record { .. }) {
        let fields = cst.record_field_types(&pv.ty)?;
        for (field_name, field_type) in fields.iter() {
            if field_name.name == name.name {
                return Ok(Some(MultiPValue::single(PValue::new(
                    field_type.clone(),
                    pv.is_temp,
                ))));
            }
        }
        return Err(cst.diag_at(
            name.span,
            CompileError::InvalidOperation(format!(
                "{} has no field named {}",
                TypeName(&pv.ty),
                name.name
            )),
        ));
    }
    Err(cst.diag_at(
        name.span,
        CompileError::InvalidOperation(format!(
            "no field access defined for {}",
            TypeName(&pv.ty)
        )),
    ))
}

//
// analyze_static_object
//

pub fn analyze_static_object(cst: &CompilerState, obj: &Object) -> Result<Option<MultiPValue>> {
    match obj {
        Object::NewType(decl) => {
            let t = cst.new_type(decl);
            Ok(Some(MultiPValue::single(static_pvalue(
                cst,
                Object::Type(t),
            ))))
        }
        Object::EnumMember(member) => Ok(Some(MultiPValue::single(PValue::new(
            cst.enum_type(&member.decl),
            true,
        )))),
        Object::GlobalVariable(gvar) => {
            if gvar.has_params() {
                return Ok(Some(MultiPValue::single(static_pvalue(cst, obj.clone()))));
            }
            let instance = lookup_gvar_instance(gvar, Vec::new());
            analyze_gvar_instance(cst, &instance)
        }
        Object::ExternalVariable(var) => {
            let ty = analyze_external_variable(cst, var)?;
            Ok(Some(MultiPValue::single(PValue::new(ty, false))))
        }
        Object::ExternalProcedure(proc) => {
            analyze_external_procedure(cst, proc)?;
            let ptr_type = proc
                .ptr_type
                .borrow()
                .clone()
                .expect("analyzed external procedure has a pointer type");
            Ok(Some(MultiPValue::single(PValue::new(ptr_type, true))))
        }
        Object::GlobalAlias(alias) => {
            if alias.has_params() {
                return Ok(Some(MultiPValue::single(static_pvalue(cst, obj.clone()))));
            }
            evaluate_pattern_predicate(cst, &alias.pattern_vars, &alias.predicate, &alias.env)?;
            analyze_expr(cst, &alias.expr, &alias.env)
        }
        Object::ValueHolder(vh) => Ok(Some(MultiPValue::single(PValue::new(
            vh.ty.clone(),
            true,
        )))),
        Object::MultiStatic(values) => {
            let mut mpv = MultiPValue::new();
            for value in values.iter() {
                mpv.add(PValue::new(object_type(cst, value)?, true));
            }
            Ok(Some(mpv))
        }
        Object::Record(decl) => {
            let lifted = if decl.has_params() {
                obj.clone()
            } else {
                Object::Type(cst.record_type(decl, Vec::new())?)
            };
            Ok(Some(MultiPValue::single(static_pvalue(cst, lifted))))
        }
        Object::Variant(decl) => {
            let lifted = if decl.has_params() {
                obj.clone()
            } else {
                Object::Type(cst.variant_type(decl, Vec::new())?)
            };
            Ok(Some(MultiPValue::single(static_pvalue(cst, lifted))))
        }
        Object::Type(_)
        | Object::PrimOp(_)
        | Object::Procedure(_)
        | Object::Module(_)
        | Object::Intrinsic(_)
        | Object::Ident(_) => Ok(Some(MultiPValue::single(static_pvalue(cst, obj.clone())))),
        Object::Enum(decl) => {
            let t = cst.enum_type(decl);
            Ok(Some(MultiPValue::single(static_pvalue(
                cst,
                Object::Type(t),
            ))))
        }
        Object::EValue(ev) => Ok(Some(MultiPValue::single(PValue::new(
            ev.ty.clone(),
            ev.forwarded_rvalue,
        )))),
        Object::MultiEValue(mev) => {
            let mut mpv = MultiPValue::new();
            for ev in &mev.values {
                mpv.add(PValue::new(ev.ty.clone(), ev.forwarded_rvalue));
            }
            Ok(Some(mpv))
        }
        Object::PValue(pv) => Ok(Some(MultiPValue::single(pv.clone()))),
        Object::MultiPValue(mpv) => Ok(Some(mpv.clone())),
        Object::Pattern(_) | Object::MultiPattern(_) => Err(cst.diag(
            CompileError::InvalidOperation(
                "pattern variable cannot be used as value".to_string(),
            ),
        )),
        _ => Err(cst.diag(CompileError::InvalidOperation(format!(
            "invalid static object: {}",
            obj.kind_name()
        )))),
    }
}

//
// global variable instances
//

pub fn analyze_gvar_instance(
    cst: &CompilerState,
    instance: &GVarInstancePtr,
) -> Result<Option<MultiPValue>> {
    if let Some(analysis) = instance.analysis.borrow().clone() {
        return Ok(Some(analysis));
    }
    let gvar = &instance.gvar;
    let _ctx = cst.push_context(format!("{}", gvar.name.name));
    if instance.analyzing.get() {
        cst.record_analysis_blocked();
        return Ok(None);
    }

    if instance.expr.borrow().is_none() {
        *instance.expr.borrow_mut() = Some(crate::ast::deep_clone_expr(&gvar.expr));
    }
    if instance.env.borrow().is_none() {
        let env = Env::new(&gvar.env);
        for (name, value) in gvar.params.iter().zip(instance.params.iter()) {
            add_local(cst, &env, name, value.clone())?;
        }
        if let Some(var_param) = &gvar.var_param {
            let rest: Vec<Object> = instance.params[gvar.params.len()..].to_vec();
            add_local(cst, &env, var_param, Object::MultiStatic(Rc::new(rest)))?;
        }
        *instance.env.borrow_mut() = Some(env);
    }
    let expr = instance.expr.borrow().clone().expect("initializer cloned above");
    let env = instance.env.borrow().clone().expect("environment built above");

    instance.analyzing.set(true);
    evaluate_pattern_predicate(cst, &gvar.pattern_vars, &gvar.predicate, &env)?;
    let result = analyze_one(cst, &expr, &env);
    instance.analyzing.set(false);

    let Some(pv) = result? else {
        return Ok(None);
    };
    let analysis = MultiPValue::single(PValue::new(pv.ty.clone(), false));
    *instance.analysis.borrow_mut() = Some(analysis.clone());
    *instance.ty.borrow_mut() = Some(pv.ty);
    Ok(Some(analysis))
}

pub fn analyze_gvar_indexing(
    cst: &CompilerState,
    gvar: &GlobalVariablePtr,
    args: &ExprListPtr,
    env: &EnvPtr,
) -> Result<GVarInstancePtr> {
    debug_assert!(gvar.has_params());
    let params = evaluate_multi_static(cst, args, env)?;
    if gvar.var_param.is_some() {
        if params.len() < gvar.params.len() {
            return Err(cst.diag(CompileError::Arity {
                expected: gvar.params.len(),
                got: params.len(),
                variadic: true,
            }));
        }
    } else {
        ensure_arity(cst, gvar.params.len(), params.len())?;
    }
    Ok(lookup_gvar_instance(gvar, params))
}

//
// external entities
//

pub fn analyze_external_variable(
    cst: &CompilerState,
    var: &crate::objects::ExternalVariablePtr,
) -> Result<TypePtr> {
    if let Some(ty) = var.ty.borrow().clone() {
        return Ok(ty);
    }
    let ty = evaluate_type(cst, &var.type_expr, &var.env)?;
    *var.ty.borrow_mut() = Some(ty.clone());
    Ok(ty)
}

pub fn analyze_external_procedure(
    cst: &CompilerState,
    proc: &crate::objects::ExternalProcedurePtr,
) -> Result<()> {
    if proc.analyzed.get() {
        return Ok(());
    }
    if !proc.attributes_verified.get() {
        verify_external_attributes(cst, proc)?;
    }
    let mut arg_types = Vec::with_capacity(proc.args.len());
    for arg in &proc.args {
        let ty = evaluate_type(cst, &arg.type_expr, &proc.env)?;
        *arg.ty.borrow_mut() = Some(ty.clone());
        arg_types.push(ty);
    }
    let return_type = match &proc.return_type_expr {
        Some(expr) => Some(evaluate_type(cst, expr, &proc.env)?),
        None => None,
    };
    *proc.return_type.borrow_mut() = Some(return_type.clone());
    let cc = proc
        .attrs
        .borrow()
        .calling_conv
        .unwrap_or(crate::objects::CallingConv::C);
    *proc.ptr_type.borrow_mut() = Some(cst.c_code_pointer_type(
        cc,
        proc.has_var_args,
        arg_types,
        return_type,
    ));
    proc.analyzed.set(true);
    Ok(())
}

fn verify_external_attributes(
    cst: &CompilerState,
    proc: &crate::objects::ExternalProcedurePtr,
) -> Result<()> {
    proc.attributes_verified.set(true);
    let attrs = evaluate_multi_static(cst, &proc.attributes, &proc.env)?;
    let mut parsed = crate::objects::ExternalAttrs::default();
    for attr in attrs {
        match &attr {
            Object::PrimOp(p) => {
                if let Some(cc) = cst.attribute_calling_conv(p.code) {
                    if parsed.calling_conv.is_some() {
                        return Err(cst.diag_at(
                            proc.span,
                            CompileError::InvalidOperation(
                                "cannot specify more than one calling convention".to_string(),
                            ),
                        ));
                    }
                    parsed.calling_conv = Some(cc);
                } else if p.code == PrimOpCode::AttributeDLLImport {
                    parsed.dll_import = true;
                } else if p.code == PrimOpCode::AttributeDLLExport {
                    parsed.dll_export = true;
                } else {
                    return Err(cst.diag_at(
                        proc.span,
                        CompileError::InvalidOperation(format!(
                            "invalid external attribute: {}",
                            p.code.name()
                        )),
                    ));
                }
            }
            Object::Ident(label) => {
                parsed.asm_label = Some(label.name.clone());
            }
            other => {
                return Err(cst.diag_at(
                    proc.span,
                    CompileError::InvalidOperation(format!(
                        "invalid external attribute: {}",
                        StaticName(other)
                    )),
                ))
            }
        }
    }
    *proc.attrs.borrow_mut() = parsed;
    Ok(())
}

/// Recognize module attributes: a float type sets the default float
/// type, an integer type the default integer type, and identifiers
/// collect as build flags.
pub fn verify_module_attributes(
    cst: &CompilerState,
    module: &crate::objects::ModulePtr,
) -> Result<()> {
    if module.attributes_verified.get() {
        return Ok(());
    }
    module.attributes_verified.set(true);
    let attributes = module.attributes.borrow().clone();
    let Some(attributes) = attributes else {
        return Ok(());
    };
    let env = Env::for_module(module);
    let attrs = evaluate_multi_static(cst, &attributes, &env)?;
    for attr in attrs {
        match &attr {
            Object::Type(t) => match &t.kind {
                TypeKind::Float { .. } => {
                    *module.attr_default_float_type.borrow_mut() = Some(t.clone());
                }
                TypeKind::Integer { .. } => {
                    *module.attr_default_integer_type.borrow_mut() = Some(t.clone());
                }
                _ => {
                    return Err(cst.diag_at(
                        module.span,
                        CompileError::InvalidOperation(format!(
                            "invalid module attribute: {}",
                            TypeName(t)
                        )),
                    ))
                }
            },
            Object::Ident(flag) => {
                module.attr_build_flags.borrow_mut().push(flag.name.clone());
                cst.set_flag(&flag.name);
            }
            other => {
                return Err(cst.diag_at(
                    module.span,
                    CompileError::InvalidOperation(format!(
                        "invalid module attribute: {}",
                        StaticName(other)
                    )),
                ))
            }
        }
    }
    Ok(())
}

//
// indexing
//

fn is_type_constructor(obj: &Object) -> bool {
    match obj {
        Object::PrimOp(p) => is_overloadable_prim_op_code(p.code),
        Object::Record(_) | Object::Variant(_) => true,
        _ => false,
    }
}

pub fn analyze_indexing_expr(
    cst: &CompilerState,
    indexable: &ExprPtr,
    args: &ExprListPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPValue>> {
    let Some(pv) = analyze_one(cst, indexable, env)? else {
        return Ok(None);
    };
    if let Some(obj) = unwrap_static_type(&pv.ty) {
        if is_type_constructor(&obj) {
            let params = evaluate_multi_static(cst, args, env)?;
            let t = construct_type(cst, &obj, &params)?;
            return Ok(Some(MultiPValue::single(static_pvalue(
                cst,
                Object::Type(t),
            ))));
        }
        if let Object::GlobalAlias(alias) = &obj {
            if alias.has_params() {
                return analyze_alias_indexing(cst, alias, args, env);
            }
        }
        if let Object::GlobalVariable(gvar) = &obj {
            if gvar.has_params() {
                let instance = analyze_gvar_indexing(cst, gvar, args, env)?;
                return analyze_gvar_instance(cst, &instance);
            }
        }
        if !matches!(obj, Object::ValueHolder(_) | Object::Ident(_)) {
            return Err(cst.diag(CompileError::InvalidOperation(
                "invalid indexing operation".to_string(),
            )));
        }
    }
    // Value-level indexing goes through the `index` operator hook.
    if let Some(op) = cst.prelude_operator("index")? {
        let mut all = vec![indexable.clone()];
        all.extend(args.exprs.iter().cloned());
        let callee = Expr::new(ExprKind::ObjectExpr(op), indexable.span);
        return analyze_call_expr(cst, &callee, &ExprList::new(all), env);
    }
    Err(cst.diag(CompileError::InvalidOperation(
        "invalid indexing operation".to_string(),
    )))
}

pub fn analyze_alias_indexing(
    cst: &CompilerState,
    alias: &GlobalAliasPtr,
    args: &ExprListPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPValue>> {
    debug_assert!(alias.has_params());
    let params = evaluate_multi_static(cst, args, env)?;
    if alias.var_param.is_some() {
        if params.len() < alias.params.len() {
            return Err(cst.diag(CompileError::Arity {
                expected: alias.params.len(),
                got: params.len(),
                variadic: true,
            }));
        }
    } else {
        ensure_arity(cst, alias.params.len(), params.len())?;
    }
    let body_env = Env::new(&alias.env);
    for (name, value) in alias.params.iter().zip(params.iter()) {
        add_local(cst, &body_env, name, value.clone())?;
    }
    if let Some(var_param) = &alias.var_param {
        let rest: Vec<Object> = params[alias.params.len()..].to_vec();
        add_local(cst, &body_env, var_param, Object::MultiStatic(Rc::new(rest)))?;
    }
    evaluate_pattern_predicate(cst, &alias.pattern_vars, &alias.predicate, &body_env)?;
    // The same alias body means different things under different
    // substitutions, so nothing in it may be memoized.
    let _caching = cst.disable_analysis_caching();
    analyze_expr(cst, &alias.expr, &body_env)
}

//
// call analysis
//

pub fn compute_args_key(args: &MultiPValue) -> (Vec<TypePtr>, Vec<ValueTempness>) {
    let mut args_key = Vec::with_capacity(args.len());
    let mut args_tempness = Vec::with_capacity(args.len());
    for pv in &args.values {
        args_key.push(pv.ty.clone());
        args_tempness.push(if pv.is_temp {
            ValueTempness::RValue
        } else {
            ValueTempness::LValue
        });
    }
    (args_key, args_tempness)
}

pub fn analyze_return(return_is_ref: &[bool], return_types: &[TypePtr]) -> MultiPValue {
    let mut mpv = MultiPValue::new();
    for (rt, is_ref) in return_types.iter().zip(return_is_ref.iter()) {
        mpv.add(PValue::new(rt.clone(), !is_ref));
    }
    mpv
}

fn is_call_candidate(obj: &Object) -> bool {
    matches!(
        obj,
        Object::Type(_)
            | Object::Record(_)
            | Object::Variant(_)
            | Object::Procedure(_)
            | Object::GlobalAlias(_)
            | Object::PrimOp(_)
    )
}

pub fn analyze_call_expr(
    cst: &CompilerState,
    callable: &ExprPtr,
    args: &ExprListPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPValue>> {
    let Some(pv) = analyze_one(cst, callable, env)? else {
        return Ok(None);
    };
    if matches!(pv.ty.kind, TypeKind::CodePointer { .. }) {
        let Some(_) = analyze_multi(cst, args, env, 0)? else {
            return Ok(None);
        };
        return Ok(Some(analyze_call_pointer(&pv)));
    }
    let Some(obj) = unwrap_static_type(&pv.ty) else {
        // Calling a non-static value goes through the `call` operator.
        let Some(op) = cst.prelude_operator("call")? else {
            return Err(cst.diag(CompileError::InvalidOperation(
                "invalid call expression".to_string(),
            )));
        };
        let mut all = vec![callable.clone()];
        all.extend(args.exprs.iter().cloned());
        let callee = Expr::new(ExprKind::ObjectExpr(op), callable.span);
        return analyze_call_expr(cst, &callee, &ExprList::new(all), env);
    };

    match &obj {
        Object::PrimOp(p) if !is_overloadable_prim_op_code(p.code) => {
            let Some(mpv) = analyze_multi(cst, args, env, 0)? else {
                return Ok(None);
            };
            crate::analyzer_ops::analyze_prim_op(cst, p.code, &mpv).map(Some)
        }
        obj if is_call_candidate(obj) => {
            let mut dispatch_indices = Vec::new();
            let Some(mpv) = analyze_multi_args(cst, args, env, &mut dispatch_indices)? else {
                return Ok(None);
            };
            if !dispatch_indices.is_empty() {
                return analyze_dispatch(cst, obj, &mpv, &dispatch_indices);
            }
            analyze_call_object(cst, obj, &mpv, Some((callable, args, env)))
        }
        Object::Intrinsic(intrinsic) => {
            let Some(mpv) = analyze_multi(cst, args, env, 0)? else {
                return Ok(None);
            };
            crate::intrinsics::analyze_intrinsic(cst, intrinsic, &mpv).map(Some)
        }
        _ => Err(cst.diag(CompileError::InvalidOperation(
            "invalid call expression".to_string(),
        ))),
    }
}

/// Value-level call analysis: used by dispatch fan-out and by native
/// paths that already hold argument PValues.
pub fn analyze_call_value(
    cst: &CompilerState,
    callable: &PValue,
    args: &MultiPValue,
) -> Result<Option<MultiPValue>> {
    if matches!(callable.ty.kind, TypeKind::CodePointer { .. }) {
        return Ok(Some(analyze_call_pointer(callable)));
    }
    let Some(obj) = unwrap_static_type(&callable.ty) else {
        let Some(op) = cst.prelude_operator("call")? else {
            return Err(cst.diag(CompileError::InvalidOperation(
                "invalid call expression".to_string(),
            )));
        };
        let mut all = MultiPValue::single(callable.clone());
        all.add_multi(args);
        return analyze_call_value(cst, &static_pvalue(cst, op), &all);
    };
    match &obj {
        Object::PrimOp(p) if !is_overloadable_prim_op_code(p.code) => {
            crate::analyzer_ops::analyze_prim_op(cst, p.code, args).map(Some)
        }
        obj if is_call_candidate(obj) => analyze_call_object(cst, obj, args, None),
        Object::Intrinsic(intrinsic) => {
            crate::intrinsics::analyze_intrinsic(cst, intrinsic, args).map(Some)
        }
        _ => Err(cst.diag(CompileError::InvalidOperation(
            "invalid call expression".to_string(),
        ))),
    }
}

/// Shared tail of call analysis once the callee object and argument
/// values are known. `call_site` carries the original expressions for
/// call-by-name expansion when analysis came from an expression.
fn analyze_call_object(
    cst: &CompilerState,
    obj: &Object,
    mpv: &MultiPValue,
    call_site: Option<(&ExprPtr, &ExprListPtr, &EnvPtr)>,
) -> Result<Option<MultiPValue>> {
    let (args_key, args_tempness) = compute_args_key(mpv);
    let _ctx = cst.push_context(render_args_key(obj, &args_key));
    let entry = match analyze_callable(cst, obj, &args_key, &args_tempness) {
        Ok(entry) => entry,
        Err(diag) => {
            if matches!(diag.error, CompileError::NoMatchingOverload { .. }) {
                if let Object::Type(t) = obj {
                    if let Some(native) = analyze_native_type_call(cst, t, mpv)? {
                        return Ok(Some(native));
                    }
                }
            }
            return Err(diag);
        }
    };
    if entry.call_by_name {
        return match call_site {
            Some((callable, args, env)) => {
                analyze_call_by_name(cst, &entry, callable, args, env)
            }
            None => {
                // Reached from value context: wrap the values as object
                // expressions so the alias body can re-analyze them.
                let mut exprs = Vec::with_capacity(mpv.len());
                for pv in &mpv.values {
                    exprs.push(Expr::synthetic(ExprKind::ObjectExpr(Object::PValue(
                        pv.clone(),
                    ))));
                }
                let callee = Expr::synthetic(ExprKind::ObjectExpr(obj.clone()));
                analyze_call_by_name(cst, &entry, &callee, &ExprList::new(exprs), &Env::root())
            }
        };
    }
    if !entry.analyzed.get() {
        return Ok(None);
    }
    let result = analyze_return(&entry.return_is_ref.borrow(), &entry.return_types.borrow());
    Ok(Some(result))
}

/// Built-in construction for calls to a type with no matching overload:
/// same-type copy, record construction from exact field types, tuple
/// construction, and variant injection from a member type.
fn analyze_native_type_call(
    cst: &CompilerState,
    t: &TypePtr,
    args: &MultiPValue,
) -> Result<Option<MultiPValue>> {
    let result = MultiPValue::single(PValue::new(t.clone(), true));
    if args.len() == 1 && Rc::ptr_eq(&args.values[0].ty, t) {
        return Ok(Some(result));
    }
    match &t.kind {
        TypeKind::Record { .. } => {
            let fields = cst.record_field_types(t)?;
            if fields.len() == args.len()
                && fields
                    .iter()
                    .zip(args.values.iter())
                    .all(|((_, ft), pv)| Rc::ptr_eq(ft, &pv.ty))
            {
                return Ok(Some(result));
            }
            Ok(None)
        }
        TypeKind::Tuple(elems) => {
            if elems.len() == args.len()
                && elems
                    .iter()
                    .zip(args.values.iter())
                    .all(|(et, pv)| Rc::ptr_eq(et, &pv.ty))
            {
                return Ok(Some(result));
            }
            Ok(None)
        }
        TypeKind::Variant { .. } => {
            if args.len() != 1 {
                return Ok(None);
            }
            let members = cst.variant_member_types(t)?;
            if members.iter().any(|m| Rc::ptr_eq(m, &args.values[0].ty)) {
                return Ok(Some(result));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

pub fn analyze_call_pointer(callable: &PValue) -> MultiPValue {
    let TypeKind::CodePointer {
        return_is_ref,
        return_types,
        ..
    } = &callable.ty.kind
    else {
        unreachable!("checked by callers");
    };
    analyze_return(return_is_ref, return_types)
}

//
// dispatch
//

pub fn dispatch_tag_count(cst: &CompilerState, t: &TypePtr) -> Result<usize> {
    if !matches!(t.kind, TypeKind::Variant { .. }) {
        return Err(cst.diag(CompileError::InvalidOperation(format!(
            "dispatch operator can only be applied to variants, not {}",
            TypeName(t)
        ))));
    }
    Ok(cst.variant_member_types(t)?.len())
}

/// The abstract value of dispatching member `tag` out of a variant.
pub fn analyze_dispatch_index(
    cst: &CompilerState,
    pv: &PValue,
    tag: usize,
) -> Result<PValue> {
    let members = cst.variant_member_types(&pv.ty)?;
    let Some(member) = members.get(tag) else {
        return Err(cst.diag(CompileError::ArgumentError {
            index: tag,
            message: "invalid variant member index".to_string(),
        }));
    };
    Ok(PValue::new(member.clone(), pv.is_temp))
}

pub fn analyze_dispatch(
    cst: &CompilerState,
    obj: &Object,
    args: &MultiPValue,
    dispatch_indices: &[usize],
) -> Result<Option<MultiPValue>> {
    if dispatch_indices.is_empty() {
        return analyze_call_value(cst, &static_pvalue(cst, obj.clone()), args);
    }
    let (args_key, _) = compute_args_key(args);
    let _ctx = cst.push_context(render_args_key(obj, &args_key));

    let index = dispatch_indices[0];
    let rest_indices = &dispatch_indices[1..];
    let pv_dispatch = &args.values[index];
    let member_count = dispatch_tag_count(cst, &pv_dispatch.ty)?;

    let mut result: Option<MultiPValue> = None;
    let mut dispatched_types: Vec<TypePtr> = Vec::new();
    for tag in 0..member_count {
        let pv_member = analyze_dispatch_index(cst, pv_dispatch, tag)?;
        let mut args2 = MultiPValue::new();
        args2.values.extend(args.values[..index].iter().cloned());
        args2.add(pv_member.clone());
        args2.values.extend(args.values[index + 1..].iter().cloned());
        let Some(result2) = analyze_dispatch(cst, obj, &args2, rest_indices)? else {
            return Ok(None);
        };
        match &result {
            None => result = Some(result2),
            Some(prev) => {
                let matches = prev.len() == result2.len()
                    && prev
                        .values
                        .iter()
                        .zip(result2.values.iter())
                        .all(|(a, b)| Rc::ptr_eq(&a.ty, &b.ty) && a.is_temp == b.is_temp);
                if !matches {
                    let expected: Vec<String> =
                        prev.values.iter().map(|v| TypeName(&v.ty).to_string()).collect();
                    let from: Vec<String> =
                        dispatched_types.iter().map(|t| TypeName(t).to_string()).collect();
                    let got: Vec<String> = result2
                        .values
                        .iter()
                        .map(|v| TypeName(&v.ty).to_string())
                        .collect();
                    let message = format!(
                        "\n    expected {}\n        from dispatching to {}\n     but got {}\n        when dispatching to {}",
                        expected.join(", "),
                        from.join(", "),
                        got.join(", "),
                        TypeName(&pv_member.ty)
                    );
                    return Err(cst.diag(CompileError::MismatchingDispatchResults(message)));
                }
            }
        }
        dispatched_types.push(pv_member.ty);
    }
    Ok(result)
}

//
// analyze_callable
//

/// True when an entry with a body exists for the signature; used by the
/// `StaticCallDefinedP` primitive.
pub fn analyze_is_defined(
    cst: &CompilerState,
    callable: &Object,
    args_key: &[TypePtr],
    args_tempness: &[ValueTempness],
) -> Result<bool> {
    let mut failures = MatchFailureReport::default();
    match lookup_invoke_entry(cst, callable, args_key, args_tempness, &mut failures)? {
        Some(entry) => Ok(entry.has_body()),
        None => Ok(false),
    }
}

pub fn analyze_callable(
    cst: &CompilerState,
    callable: &Object,
    args_key: &[TypePtr],
    args_tempness: &[ValueTempness],
) -> Result<Rc<InvokeEntry>> {
    let mut failures = MatchFailureReport::default();
    let entry = lookup_invoke_entry(cst, callable, args_key, args_tempness, &mut failures)?;
    let entry = match entry {
        Some(entry) if entry.has_body() => entry,
        _ => return Err(failures.into_error(cst, callable, args_key)),
    };

    if entry.analyzed.get() {
        return Ok(entry);
    }
    if entry.analyzing.get() {
        cst.record_analysis_blocked();
        return Ok(entry);
    }
    if entry.call_by_name {
        *entry.code.borrow_mut() = crate::ast::deep_clone_code(&entry.orig_code);
        return Ok(entry);
    }

    entry.analyzing.set(true);
    let result = analyze_code_body(cst, &entry);
    entry.analyzing.set(false);
    result?;
    Ok(entry)
}

//
// call-by-name analysis
//

pub fn analyze_call_by_name(
    cst: &CompilerState,
    entry: &Rc<InvokeEntry>,
    callable: &ExprPtr,
    args: &ExprListPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPValue>> {
    debug_assert!(entry.call_by_name);
    let code = entry.code.borrow().clone();
    debug_assert!(code.body.is_some());

    if code.has_return_specs() {
        let (return_is_ref, return_types) = evaluate_return_specs(
            cst,
            &code.return_specs,
            &code.var_return_spec,
            &entry.env,
        )?;
        return Ok(Some(analyze_return(&return_is_ref, &return_types)));
    }

    let body_env = Env::new(&entry.env);
    *body_env.call_by_name_expr_head.borrow_mut() = Some(callable.clone());

    let fixed_count = entry.fixed_arg_names.len();
    if args.len() < fixed_count {
        return Err(cst.diag(CompileError::Arity {
            expected: fixed_count,
            got: args.len(),
            variadic: entry.var_arg_name.is_some(),
        }));
    }
    let mut arg_index = 0;
    for i in 0..entry.var_arg_position {
        let expr = foreign_expr(env, &args.exprs[arg_index]);
        add_local(cst, &body_env, &entry.fixed_arg_names[i], Object::Expr(expr))?;
        arg_index += 1;
    }
    if let Some(var_arg_name) = &entry.var_arg_name {
        let var_count = args.len() - fixed_count;
        let mut var_exprs = Vec::with_capacity(var_count);
        for _ in 0..var_count {
            var_exprs.push(foreign_expr(env, &args.exprs[arg_index]));
            arg_index += 1;
        }
        add_local(
            cst,
            &body_env,
            var_arg_name,
            Object::ExprList(ExprList::new(var_exprs)),
        )?;
        for i in entry.var_arg_position..fixed_count {
            let expr = foreign_expr(env, &args.exprs[arg_index]);
            add_local(cst, &body_env, &entry.fixed_arg_names[i], Object::Expr(expr))?;
            arg_index += 1;
        }
    }

    let body = code.body.clone().expect("call-by-name overload has a body");
    let mut ctx = AnalysisContext::default();
    let sa = analyze_statement(cst, &body, &body_env, &mut ctx)?;
    if sa == StatementAnalysis::Recursive && !ctx.return_initialized {
        return Ok(None);
    }
    if ctx.return_initialized {
        return Ok(Some(analyze_return(&ctx.return_is_ref, &ctx.return_types)));
    }
    if sa == StatementAnalysis::Terminated && ctx.has_recursive_propagation {
        return Err(cst.analysis_blocked_diag());
    }
    Ok(Some(MultiPValue::new()))
}

//
// analyze_code_body
//

fn unify_interface_returns(cst: &CompilerState, entry: &Rc<InvokeEntry>) -> Result<()> {
    let Some(parent) = entry.parent.upgrade() else {
        return Ok(());
    };

    if let Object::Type(t) = &parent.callable {
        let return_types = entry.return_types.borrow();
        let return_is_ref = entry.return_is_ref.borrow();
        if return_types.len() != 1 {
            return Err(cst.diag(CompileError::InterfaceMismatch(format!(
                "constructor overload for type {} must return a single value of that type",
                TypeName(t)
            ))));
        }
        if return_is_ref[0] {
            return Err(cst.diag(CompileError::InterfaceMismatch(format!(
                "constructor overload for type {} must return by value",
                TypeName(t)
            ))));
        }
        if !Rc::ptr_eq(&return_types[0], t) {
            return Err(cst.diag(CompileError::InterfaceMismatch(format!(
                "constructor overload for type {} returns type {}",
                TypeName(t),
                TypeName(&return_types[0])
            ))));
        }
        return Ok(());
    }

    let Some(interface) = parent.interface.clone() else {
        return Ok(());
    };
    if !interface.code.return_specs_declared {
        return Ok(());
    }

    let interface_env = entry
        .interface_env
        .clone()
        .unwrap_or_else(|| entry.env.clone());
    let (interface_is_ref, interface_types) = evaluate_return_specs(
        cst,
        &interface.code.return_specs,
        &interface.code.var_return_spec,
        &interface_env,
    )?;
    let return_types = entry.return_types.borrow();
    let return_is_ref = entry.return_is_ref.borrow();
    let interface_at = format!(
        "\n    interface at line {}:{}",
        interface.span.start_line, interface.span.start_column
    );
    if return_types.len() != interface_types.len() {
        return Err(cst.diag(CompileError::InterfaceMismatch(format!(
            "interface declares {} return values, but overload returns {}{}",
            interface_types.len(),
            return_types.len(),
            interface_at
        ))));
    }
    for (i, (it, rt)) in interface_types.iter().zip(return_types.iter()).enumerate() {
        if !Rc::ptr_eq(it, rt) {
            return Err(cst.diag(CompileError::InterfaceMismatch(format!(
                "return value {}: interface declares return type {}, but overload returns type {}{}",
                i + 1,
                TypeName(it),
                TypeName(rt),
                interface_at
            ))));
        }
        if interface_is_ref[i] && !return_is_ref[i] {
            return Err(cst.diag(CompileError::InterfaceMismatch(format!(
                "return value {}: interface declares return by reference, but overload returns by value{}",
                i + 1,
                interface_at
            ))));
        }
    }
    Ok(())
}

pub fn analyze_code_body(cst: &CompilerState, entry: &Rc<InvokeEntry>) -> Result<()> {
    debug_assert!(!entry.analyzed.get());
    let code = entry.code.borrow().clone();
    debug_assert!(code.has_body());

    if code.has_return_specs() {
        let (return_is_ref, return_types) = evaluate_return_specs(
            cst,
            &code.return_specs,
            &code.var_return_spec,
            &entry.env,
        )?;
        *entry.return_is_ref.borrow_mut() = return_is_ref;
        *entry.return_types.borrow_mut() = return_types;
        entry.analyzed.set(true);
        return Ok(());
    }

    let body_env = Env::new(&entry.env);
    let mut flag_index = 0;
    for i in 0..entry.var_arg_position {
        let flag = entry.forwarded_rvalue_flags[flag_index];
        add_local(
            cst,
            &body_env,
            &entry.fixed_arg_names[i],
            Object::PValue(PValue::new(entry.fixed_arg_types[i].clone(), flag)),
        )?;
        flag_index += 1;
    }
    if let Some(var_arg_name) = &entry.var_arg_name {
        let mut var_args = MultiPValue::new();
        for ty in &entry.var_arg_types {
            let flag = entry.forwarded_rvalue_flags[flag_index];
            var_args.add(PValue::new(ty.clone(), flag));
            flag_index += 1;
        }
        add_local(cst, &body_env, var_arg_name, Object::MultiPValue(var_args))?;
        for i in entry.var_arg_position..entry.fixed_arg_names.len() {
            let flag = entry.forwarded_rvalue_flags[flag_index];
            add_local(
                cst,
                &body_env,
                &entry.fixed_arg_names[i],
                Object::PValue(PValue::new(entry.fixed_arg_types[i].clone(), flag)),
            )?;
            flag_index += 1;
        }
    }

    let body = code.body.clone().expect("body checked above");
    let mut ctx = AnalysisContext::default();
    let sa = analyze_statement(cst, &body, &body_env, &mut ctx)?;
    if sa == StatementAnalysis::Recursive && !ctx.return_initialized {
        return Ok(());
    }
    if ctx.return_initialized {
        *entry.return_is_ref.borrow_mut() = ctx.return_is_ref;
        *entry.return_types.borrow_mut() = ctx.return_types;
    } else if sa == StatementAnalysis::Terminated && ctx.has_recursive_propagation {
        return Err(cst.analysis_blocked_diag());
    }

    unify_interface_returns(cst, entry)?;
    entry.analyzed.set(true);
    Ok(())
}

//
// statements
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementAnalysis {
    Fallthrough,
    Terminated,
    Recursive,
}

#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub return_initialized: bool,
    pub return_is_ref: Vec<bool>,
    pub return_types: Vec<TypePtr>,
    pub has_recursive_propagation: bool,
}

fn combine_statement_analysis(a: StatementAnalysis, b: StatementAnalysis) -> StatementAnalysis {
    use StatementAnalysis::*;
    match (a, b) {
        (Fallthrough, _) | (_, Fallthrough) => Fallthrough,
        (Recursive, Recursive) => Recursive,
        _ => Terminated,
    }
}

fn return_kind_to_by_ref(kind: ReturnKind, pv: &PValue) -> bool {
    match kind {
        ReturnKind::Value => false,
        ReturnKind::Ref => true,
        ReturnKind::Forward => !pv.is_temp,
    }
}

fn analyze_block_statement(
    cst: &CompilerState,
    stmt: &StmtPtr,
    env: &mut EnvPtr,
    ctx: &mut AnalysisContext,
) -> Result<StatementAnalysis> {
    match &stmt.kind {
        StmtKind::Binding(binding) => {
            match analyze_binding(cst, binding, env)? {
                None => {
                    ctx.has_recursive_propagation = true;
                    Ok(StatementAnalysis::Recursive)
                }
                Some(new_env) => {
                    *env = new_env;
                    Ok(StatementAnalysis::Fallthrough)
                }
            }
        }
        StmtKind::EvalStatement(args) => {
            let exprs = crate::evaluator::desugar_eval_body(cst, args, env, stmt.span)?;
            for expr in &exprs.exprs {
                let stmt = crate::ast::Statement::new(
                    StmtKind::ExprStatement(expr.clone()),
                    expr.span,
                );
                let sa = analyze_block_statement(cst, &stmt, env, ctx)?;
                if sa != StatementAnalysis::Fallthrough {
                    return Ok(sa);
                }
            }
            Ok(StatementAnalysis::Fallthrough)
        }
        _ => analyze_statement(cst, stmt, env, ctx),
    }
}

pub fn analyze_statement(
    cst: &CompilerState,
    stmt: &StmtPtr,
    env: &EnvPtr,
    ctx: &mut AnalysisContext,
) -> Result<StatementAnalysis> {
    let _loc = cst.push_location(stmt.span);
    match &stmt.kind {
        StmtKind::Block(stmts) => {
            let mut env = env.clone();
            for stmt in stmts {
                let sa = analyze_block_statement(cst, stmt, &mut env, ctx)?;
                if sa != StatementAnalysis::Fallthrough {
                    return Ok(sa);
                }
            }
            Ok(StatementAnalysis::Fallthrough)
        }
        StmtKind::Label(_)
        | StmtKind::Binding(_)
        | StmtKind::Assignment { .. }
        | StmtKind::ExprStatement(_)
        | StmtKind::StaticAssert { .. } => Ok(StatementAnalysis::Fallthrough),
        StmtKind::Goto(_) => Ok(StatementAnalysis::Terminated),
        StmtKind::Return { kind, values } => {
            let Some(mpv) = analyze_multi(cst, values, env, 0)? else {
                ctx.has_recursive_propagation = true;
                return Ok(StatementAnalysis::Recursive);
            };
            if ctx.return_initialized {
                ensure_arity(cst, ctx.return_types.len(), mpv.len())?;
                for (i, pv) in mpv.values.iter().enumerate() {
                    let by_ref = return_kind_to_by_ref(*kind, pv);
                    if !Rc::ptr_eq(&ctx.return_types[i], &pv.ty) {
                        return Err(cst.diag(CompileError::ArgumentError {
                            index: i,
                            message: format!(
                                "expected return type {}, got {}",
                                TypeName(&ctx.return_types[i]),
                                TypeName(&pv.ty)
                            ),
                        }));
                    }
                    if by_ref != ctx.return_is_ref[i] {
                        return Err(cst.diag(CompileError::ArgumentError {
                            index: i,
                            message: "mismatching by-ref and by-value returns".to_string(),
                        }));
                    }
                    if by_ref && pv.is_temp {
                        return Err(cst.diag(CompileError::ArgumentError {
                            index: i,
                            message: "cannot return a temporary by reference".to_string(),
                        }));
                    }
                }
            } else {
                ctx.return_is_ref.clear();
                ctx.return_types.clear();
                for (i, pv) in mpv.values.iter().enumerate() {
                    let by_ref = return_kind_to_by_ref(*kind, pv);
                    if by_ref && pv.is_temp {
                        return Err(cst.diag(CompileError::ArgumentError {
                            index: i,
                            message: "cannot return a temporary by reference".to_string(),
                        }));
                    }
                    ctx.return_is_ref.push(by_ref);
                    ctx.return_types.push(pv.ty.clone());
                }
                ctx.return_initialized = true;
            }
            Ok(StatementAnalysis::Terminated)
        }
        StmtKind::If {
            condition,
            then_part,
            else_part,
        } => {
            let Some(cond) = analyze_expr(cst, condition, env)? else {
                ctx.has_recursive_propagation = true;
                return Ok(StatementAnalysis::Recursive);
            };
            ensure_arity(cst, 1, cond.len())?;
            let cond_kind = type_bool_kind(cst, &cond.values[0].ty)?;

            let mut then_result = StatementAnalysis::Fallthrough;
            let mut else_result = StatementAnalysis::Fallthrough;
            if matches!(cond_kind, BoolKind::Expr | BoolKind::StaticTrue) {
                then_result = analyze_statement(cst, then_part, env, ctx)?;
            }
            if matches!(cond_kind, BoolKind::Expr | BoolKind::StaticFalse) {
                if let Some(else_part) = else_part {
                    else_result = analyze_statement(cst, else_part, env, ctx)?;
                }
            }
            Ok(combine_statement_analysis(then_result, else_result))
        }
        StmtKind::While { condition, body } => {
            let _ = analyze_expr(cst, condition, env)?;
            let _ = analyze_statement(cst, body, env, ctx)?;
            Ok(StatementAnalysis::Fallthrough)
        }
        StmtKind::Break | StmtKind::Continue => Ok(StatementAnalysis::Terminated),
        StmtKind::StaticFor {
            variable,
            values,
            body,
            clones,
            clones_initialized,
        } => {
            let Some(mpv) = analyze_multi(cst, values, env, 2)? else {
                ctx.has_recursive_propagation = true;
                return Ok(StatementAnalysis::Recursive);
            };
            initialize_static_for_clones(cst, body, clones, clones_initialized, mpv.len());
            let clones = clones.borrow().clone();
            for (pv, clone) in mpv.values.iter().zip(clones.iter()) {
                let env2 = Env::new(env);
                add_local(cst, &env2, variable, Object::PValue(pv.clone()))?;
                let sa = analyze_statement(cst, clone, &env2, ctx)?;
                if sa != StatementAnalysis::Fallthrough {
                    return Ok(sa);
                }
            }
            Ok(StatementAnalysis::Fallthrough)
        }
        StmtKind::Throw(_) => Ok(StatementAnalysis::Terminated),
        StmtKind::Try { try_block, .. } => {
            // No exceptions at compile time: only the try block runs.
            analyze_statement(cst, try_block, env, ctx)
        }
        StmtKind::Unreachable => Ok(StatementAnalysis::Terminated),
        StmtKind::EvalStatement(args) => {
            let exprs = crate::evaluator::desugar_eval_body(cst, args, env, stmt.span)?;
            let _ = analyze_multi(cst, &exprs, env, 0)?;
            Ok(StatementAnalysis::Fallthrough)
        }
        StmtKind::Foreign {
            env: foreign_env,
            statement,
        } => analyze_statement(cst, statement, foreign_env, ctx),
    }
}

pub fn initialize_static_for_clones(
    cst: &CompilerState,
    body: &StmtPtr,
    clones: &std::cell::RefCell<Vec<StmtPtr>>,
    clones_initialized: &std::cell::Cell<bool>,
    count: usize,
) {
    if clones_initialized.get() {
        debug_assert_eq!(count, clones.borrow().len());
        return;
    }
    if !cst.analysis_caching_disabled() {
        clones_initialized.set(true);
    }
    let mut new_clones = Vec::with_capacity(count);
    for _ in 0..count {
        new_clones.push(crate::ast::deep_clone_statement(body));
    }
    *clones.borrow_mut() = new_clones;
}

//
// bindings
//

/// Shared half of binding analysis/evaluation: bind the binding's
/// pattern variables by unifying left-hand type annotations against the
/// right-hand value types, then check the binding predicate. Returns the
/// environment holding the bound pattern variables.
pub fn bind_binding_patterns(
    cst: &CompilerState,
    binding: &Rc<Binding>,
    env: &EnvPtr,
    key: &[TypePtr],
) -> Result<EnvPtr> {
    let pattern_env = Env::new(env);
    let mut cells = Vec::new();
    let mut multi_cells = Vec::new();
    initialize_pattern_env(
        cst,
        &pattern_env,
        &binding.pattern_vars,
        &mut cells,
        &mut multi_cells,
    )?;

    let var_arg_size = if binding.has_var_arg {
        key.len() + 1 - binding.args.len()
    } else {
        0
    };
    let mut key_index = 0;
    for arg in &binding.args {
        if arg.var_arg {
            if let Some(type_expr) = &arg.type_expr {
                let unpack = Expr::new(ExprKind::Unpack(type_expr.clone()), type_expr.span);
                let pattern =
                    evaluate_multi_pattern(cst, &ExprList::single(unpack), &pattern_env)?;
                let types: Vec<Object> = key[key_index..key_index + var_arg_size]
                    .iter()
                    .map(|t| Object::Type(t.clone()))
                    .collect();
                if !unify_multi_objs(cst, &pattern, &types)? {
                    return Err(cst.diag_at(
                        arg.span,
                        CompileError::ArgumentError {
                            index: key_index,
                            message: "variadic binding type pattern did not match".to_string(),
                        },
                    ));
                }
            }
            key_index += var_arg_size;
        } else {
            if let Some(type_expr) = &arg.type_expr {
                let pattern = evaluate_one_pattern(cst, type_expr, &pattern_env)?;
                if !unify_pattern_obj(cst, &pattern, &Object::Type(key[key_index].clone()))? {
                    return Err(cst.diag_at(
                        arg.span,
                        CompileError::ArgumentError {
                            index: key_index,
                            message: format!(
                                "binding pattern did not match type {}",
                                TypeName(&key[key_index])
                            ),
                        },
                    ));
                }
            }
            key_index += 1;
        }
    }

    let static_env = Env::new(env);
    for (i, pvar) in binding.pattern_vars.iter().enumerate() {
        if pvar.is_multi {
            let cell = multi_cells[i].as_ref().expect("multi cell for multi pvar");
            let values = deref_deep_multi(cst, &MultiPattern::Cell(cell.clone()))?;
            match values {
                None => {
                    return Err(cst.diag_at(
                        pvar.name.span,
                        CompileError::UnboundPatternVariable(pvar.name.name.clone()),
                    ))
                }
                Some(values) => add_local(
                    cst,
                    &static_env,
                    &pvar.name,
                    Object::MultiStatic(Rc::new(values)),
                )?,
            }
        } else {
            let cell = cells[i].as_ref().expect("cell for single pvar");
            let value = deref_deep(cst, &Pattern::Cell(cell.clone()))?;
            match value {
                None => {
                    return Err(cst.diag_at(
                        pvar.name.span,
                        CompileError::UnboundPatternVariable(pvar.name.name.clone()),
                    ))
                }
                Some(value) => add_local(cst, &static_env, &pvar.name, value)?,
            }
        }
    }

    evaluate_pattern_predicate(cst, &binding.pattern_vars, &binding.predicate, &static_env)?;
    Ok(static_env)
}

pub fn analyze_binding(
    cst: &CompilerState,
    binding: &Rc<Binding>,
    env: &EnvPtr,
) -> Result<Option<EnvPtr>> {
    match binding.kind {
        BindingKind::Var | BindingKind::Ref | BindingKind::Forward => {
            let Some(mpv) = analyze_multi(cst, &binding.values, env, binding.args.len())?
            else {
                return Ok(None);
            };

            if binding.has_var_arg {
                if mpv.len() + 1 < binding.args.len() {
                    return Err(cst.diag(CompileError::Arity {
                        expected: binding.args.len() - 1,
                        got: mpv.len(),
                        variadic: true,
                    }));
                }
            } else if mpv.len() != binding.args.len() {
                return Err(cst.diag(CompileError::Arity {
                    expected: binding.args.len(),
                    got: mpv.len(),
                    variadic: false,
                }));
            }

            let key: Vec<TypePtr> = mpv.values.iter().map(|pv| pv.ty.clone()).collect();
            let static_env = bind_binding_patterns(cst, binding, env, &key)?;

            let var_arg_size = if binding.has_var_arg {
                key.len() + 1 - binding.args.len()
            } else {
                0
            };
            let env2 = Env::new(&static_env);
            let mut key_index = 0;
            for arg in &binding.args {
                if arg.var_arg {
                    let mut var_args = MultiPValue::new();
                    for _ in 0..var_arg_size {
                        var_args.add(PValue::new(key[key_index].clone(), false));
                        key_index += 1;
                    }
                    add_local(cst, &env2, &arg.name, Object::MultiPValue(var_args))?;
                } else {
                    add_local(
                        cst,
                        &env2,
                        &arg.name,
                        Object::PValue(PValue::new(key[key_index].clone(), false)),
                    )?;
                    key_index += 1;
                }
            }
            Ok(Some(env2))
        }
        BindingKind::Alias => {
            ensure_arity(cst, 1, binding.args.len())?;
            ensure_arity(cst, 1, binding.values.len())?;
            let env2 = Env::new(env);
            let wrapped = foreign_expr(env, &binding.values.exprs[0]);
            add_local(cst, &env2, &binding.args[0].name, Object::Expr(wrapped))?;
            Ok(Some(env2))
        }
    }
}

