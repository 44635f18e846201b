//! Compile-time evaluation.
//!
//! The evaluator executes the same AST the analyzer types, with full
//! value semantics. Values live in one bump arena owned by
//! `CompilerState`; an [`EValue`] is a type plus an arena offset, and a
//! compile-time pointer is an arena offset stored in a pointer-width
//! cell. Every frame marks the arena on entry and pops strictly LIFO on
//! every exit path. Compile-time values are plain data: the destroy hook
//! at the frame boundary is a no-op kept for the discipline.

use std::rc::Rc;

use crate::analyzer::{
    analyze_dispatch_index, compute_args_key, dispatch_tag_count, safe_analyze_callable,
    safe_analyze_expr, safe_analyze_multi, safe_analyze_multi_args, safe_analyze_one,
    type_bool_kind, BoolKind, MultiPValue, PValue,
};
use crate::ast::{
    Binding, BindingKind, Expr, ExprKind, ExprList, ExprListPtr, ExprPtr, PatternVar, StmtKind,
    StmtPtr,
};
use crate::env::{
    add_local, foreign_expr, lookup_env, safe_lookup_env, safe_lookup_public, Env, EnvPtr,
};
use crate::error::{CompileError, Result};
use crate::invoketables::InvokeEntry;
use crate::layout::{record_field_offset, tuple_element_offset, type_size, variant_payload_offset};
use crate::objects::{IdentifierPtr, Object, ObjectVecKey, ValueHolder, ValueHolderPtr};
use crate::printer::{StaticName, TypeName};
use crate::primops::is_overloadable_prim_op_code;
use crate::state::CompilerState;
use crate::types::{is_static_or_tuple_of_statics, unwrap_static_type, TypeKind, TypePtr};

//
// values
//

/// A concrete compile-time value: a type plus the arena address of its
/// bytes. `forwarded_rvalue` carries rvalue-ness through `forward`
/// parameters and bindings.
#[derive(Debug, Clone)]
pub struct EValue {
    pub ty: TypePtr,
    pub addr: usize,
    pub forwarded_rvalue: bool,
}

impl EValue {
    pub fn new(ty: TypePtr, addr: usize) -> Self {
        Self {
            ty,
            addr,
            forwarded_rvalue: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiEValue {
    pub values: Vec<EValue>,
}

impl MultiEValue {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn single(ev: EValue) -> Self {
        Self { values: vec![ev] }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

//
// the value stack
//

#[derive(Debug, Default)]
pub struct EvalStack {
    values: Vec<EValue>,
    pub(crate) mem: Vec<u8>,
}

impl EvalStack {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvalMarker {
    values: usize,
    mem: usize,
}

pub fn eval_mark_stack(cst: &CompilerState) -> EvalMarker {
    let stack = cst.eval_stack.borrow();
    EvalMarker {
        values: stack.values.len(),
        mem: stack.mem.len(),
    }
}

fn eval_value_destroy(_cst: &CompilerState, _ev: &EValue) {
    // Compile-time values are PODs.
}

/// Run destructors back to the marker and release the storage. Strictly
/// LIFO.
pub fn eval_destroy_and_pop_stack(cst: &CompilerState, marker: EvalMarker) {
    loop {
        let ev = {
            let stack = cst.eval_stack.borrow();
            debug_assert!(marker.values <= stack.values.len());
            if stack.values.len() == marker.values {
                break;
            }
            stack.values.last().cloned()
        };
        if let Some(ev) = ev {
            eval_value_destroy(cst, &ev);
        }
        cst.eval_stack.borrow_mut().values.pop();
    }
    let mut stack = cst.eval_stack.borrow_mut();
    debug_assert!(marker.mem <= stack.mem.len());
    stack.mem.truncate(marker.mem);
}

pub fn eval_alloc_value(cst: &CompilerState, ty: &TypePtr) -> Result<EValue> {
    let size = type_size(cst, ty)? as usize;
    let align = crate::layout::type_alignment(cst, ty)? as usize;
    let mut stack = cst.eval_stack.borrow_mut();
    let padded = crate::layout::round_up(stack.mem.len() as u64, align.max(1) as u64) as usize;
    stack.mem.resize(padded + size, 0);
    let ev = EValue::new(ty.clone(), padded);
    stack.values.push(ev.clone());
    Ok(ev)
}

fn eval_alloc_value_for_pvalue(cst: &CompilerState, pv: &PValue) -> Result<EValue> {
    if pv.is_temp {
        eval_alloc_value(cst, &pv.ty)
    } else {
        eval_alloc_value(cst, &cst.pointer_type(&pv.ty))
    }
}

//
// raw memory access
//

pub fn mem_read(cst: &CompilerState, addr: usize, len: usize) -> Vec<u8> {
    let stack = cst.eval_stack.borrow();
    stack.mem[addr..addr + len].to_vec()
}

pub fn mem_write(cst: &CompilerState, addr: usize, bytes: &[u8]) {
    let mut stack = cst.eval_stack.borrow_mut();
    stack.mem[addr..addr + bytes.len()].copy_from_slice(bytes);
}

pub fn ev_read(cst: &CompilerState, ev: &EValue) -> Result<Vec<u8>> {
    let size = type_size(cst, &ev.ty)? as usize;
    Ok(mem_read(cst, ev.addr, size))
}

pub fn ev_write(cst: &CompilerState, ev: &EValue, bytes: &[u8]) -> Result<()> {
    let size = type_size(cst, &ev.ty)? as usize;
    debug_assert_eq!(size, bytes.len());
    mem_write(cst, ev.addr, bytes);
    Ok(())
}

pub fn read_ptr(cst: &CompilerState, addr: usize) -> usize {
    let width = cst.target.pointer_bytes as usize;
    let bytes = mem_read(cst, addr, width);
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(&bytes);
    u64::from_le_bytes(raw) as usize
}

pub fn write_ptr(cst: &CompilerState, addr: usize, value: usize) {
    let width = cst.target.pointer_bytes as usize;
    mem_write(cst, addr, &(value as u64).to_le_bytes()[..width]);
}

//
// value ops
//

/// Same-type value copy is a byte copy; anything else must go through a
/// `copy` operator procedure.
pub fn eval_value_copy(cst: &CompilerState, dest: &EValue, src: &EValue) -> Result<()> {
    if Rc::ptr_eq(&dest.ty, &src.ty) {
        if !matches!(dest.ty.kind, TypeKind::Static(_)) {
            let bytes = ev_read(cst, src)?;
            ev_write(cst, dest, &bytes)?;
        }
        return Ok(());
    }
    if let Some(op) = cst.prelude_operator("copy")? {
        let args = MultiEValue::single(src.clone());
        let pv_args = MultiPValue::single(PValue::new(src.ty.clone(), false));
        let callable = static_evalue(cst, op);
        return eval_call_value(cst, &callable, &args, &pv_args, &MultiEValue::single(dest.clone()));
    }
    Err(cst.diag(CompileError::TypeMismatch {
        expected: TypeName(&dest.ty).to_string(),
        got: TypeName(&src.ty).to_string(),
    }))
}

fn eval_value_assign(cst: &CompilerState, dest: &EValue, src: &EValue) -> Result<()> {
    if Rc::ptr_eq(&dest.ty, &src.ty) {
        return eval_value_copy(cst, dest, src);
    }
    if let Some(op) = cst.prelude_operator("assign")? {
        let args = MultiEValue {
            values: vec![dest.clone(), src.clone()],
        };
        let pv_args = MultiPValue {
            values: vec![
                PValue::new(dest.ty.clone(), false),
                PValue::new(src.ty.clone(), true),
            ],
        };
        let callable = static_evalue(cst, op);
        return eval_call_value(cst, &callable, &args, &pv_args, &MultiEValue::new());
    }
    Err(cst.diag(CompileError::TypeMismatch {
        expected: TypeName(&dest.ty).to_string(),
        got: TypeName(&src.ty).to_string(),
    }))
}

/// Values of static type occupy no storage; a zero-address EValue
/// stands for any static object.
fn static_evalue(cst: &CompilerState, obj: Object) -> EValue {
    EValue::new(cst.static_type(obj), 0)
}

fn deref_value(cst: &CompilerState, ev_ptr: &EValue) -> Result<EValue> {
    let TypeKind::Pointer(pointee) = &ev_ptr.ty.kind else {
        return Err(cst.diag(CompileError::InvalidOperation(
            "dereference of a non-pointer value".to_string(),
        )));
    };
    let addr = read_ptr(cst, ev_ptr.addr);
    Ok(EValue::new(pointee.clone(), addr))
}

fn deref_value_for_pvalue(cst: &CompilerState, ev: &EValue, pv: &PValue) -> Result<EValue> {
    if pv.is_temp {
        Ok(ev.clone())
    } else {
        deref_value(cst, ev)
    }
}

/// Deliver a concrete value to an output slot: copy into a same-typed
/// destination, or store the address when the destination is the
/// implicit pointer of an lvalue result.
fn eval_deliver(cst: &CompilerState, src: &EValue, dest: &EValue) -> Result<()> {
    if Rc::ptr_eq(&dest.ty, &src.ty) {
        return eval_value_copy(cst, dest, src);
    }
    if let TypeKind::Pointer(pointee) = &dest.ty.kind {
        if Rc::ptr_eq(pointee, &src.ty) {
            write_ptr(cst, dest.addr, src.addr);
            return Ok(());
        }
    }
    Err(cst.diag(CompileError::TypeMismatch {
        expected: TypeName(&dest.ty).to_string(),
        got: TypeName(&src.ty).to_string(),
    }))
}

pub fn eval_to_bool(cst: &CompilerState, ev: &EValue) -> Result<bool> {
    match type_bool_kind(cst, &ev.ty)? {
        BoolKind::Expr => Ok(mem_read(cst, ev.addr, 1)[0] != 0),
        BoolKind::StaticTrue => Ok(true),
        BoolKind::StaticFalse => Ok(false),
    }
}

//
// static conversions
//

/// Reflect an evaluated value back into a static object.
pub fn evalue_to_static(cst: &CompilerState, ev: &EValue) -> Result<Object> {
    if let Some(obj) = unwrap_static_type(&ev.ty) {
        return Ok(obj);
    }
    let bytes = ev_read(cst, ev)?;
    Ok(Object::ValueHolder(ValueHolder::with_bytes(
        ev.ty.clone(),
        bytes,
    )))
}

/// Split a tuple-typed constant into element objects.
pub fn value_holder_elements(cst: &CompilerState, vh: &ValueHolderPtr) -> Result<Vec<Object>> {
    let TypeKind::Tuple(elems) = &vh.ty.kind else {
        return Err(cst.diag(CompileError::InvalidOperation(
            "tuple elements of a non-tuple value".to_string(),
        )));
    };
    let buf = vh.buf.borrow();
    let mut out = Vec::with_capacity(elems.len());
    for (i, elem) in elems.iter().enumerate() {
        if let Some(obj) = unwrap_static_type(elem) {
            out.push(obj);
            continue;
        }
        let offset = tuple_element_offset(cst, &vh.ty, i)? as usize;
        let size = type_size(cst, elem)? as usize;
        let bytes = buf[offset..offset + size].to_vec();
        out.push(Object::ValueHolder(ValueHolder::with_bytes(
            elem.clone(),
            bytes,
        )));
    }
    Ok(out)
}

/// Build a tuple constant from element objects. Pure-static element
/// lists collapse into the (zero-sized) tuple of static types.
pub fn make_tuple_value(cst: &CompilerState, elements: &[Object]) -> Result<Object> {
    let mut types = Vec::with_capacity(elements.len());
    for element in elements {
        types.push(crate::analyzer::object_type(cst, element)?);
    }
    let tuple_ty = cst.tuple_type(types.clone());
    let size = type_size(cst, &tuple_ty)? as usize;
    let mut bytes = vec![0u8; size];
    for (i, element) in elements.iter().enumerate() {
        if let Object::ValueHolder(vh) = element {
            let offset = tuple_element_offset(cst, &tuple_ty, i)? as usize;
            let buf = vh.buf.borrow();
            bytes[offset..offset + buf.len()].copy_from_slice(&buf);
        }
    }
    Ok(Object::ValueHolder(ValueHolder::with_bytes(
        tuple_ty, bytes,
    )))
}

//
// static evaluation wrappers
//

pub fn evaluate_expr_static(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
) -> Result<Vec<Object>> {
    // Static evaluation may run the same expression under different
    // bindings (predicates, alias bodies), so nothing analyzed inside
    // it may be memoized.
    let _caching = cst.disable_analysis_caching();
    let mpv = safe_analyze_expr(cst, expr, env)?;
    let all_static = mpv
        .values
        .iter()
        .all(|pv| is_static_or_tuple_of_statics(&pv.ty));

    let mut holders: Vec<ValueHolderPtr> = Vec::with_capacity(mpv.len());
    if all_static {
        for pv in &mpv.values {
            let size = type_size(cst, &pv.ty)? as usize;
            holders.push(ValueHolder::new(pv.ty.clone(), size));
        }
    } else {
        let marker = eval_mark_stack(cst);
        let mut dests = MultiEValue::new();
        for pv in &mpv.values {
            dests.values.push(eval_alloc_value(cst, &pv.ty)?);
        }
        let result = eval_expr_into(cst, expr, env, &dests);
        if result.is_ok() {
            for ev in &dests.values {
                let bytes = ev_read(cst, ev)?;
                holders.push(ValueHolder::with_bytes(ev.ty.clone(), bytes));
            }
        }
        eval_destroy_and_pop_stack(cst, marker);
        result?;
    }

    let mut out = Vec::with_capacity(holders.len());
    for holder in holders {
        match unwrap_static_type(&holder.ty) {
            Some(obj) => out.push(obj),
            None => out.push(Object::ValueHolder(holder)),
        }
    }
    Ok(out)
}

pub fn evaluate_one_static(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr) -> Result<Object> {
    let values = evaluate_expr_static(cst, expr, env)?;
    if values.len() != 1 {
        return Err(cst.diag_at(
            expr.span,
            CompileError::Arity {
                expected: 1,
                got: values.len(),
                variadic: false,
            },
        ));
    }
    Ok(values.into_iter().next().expect("length checked above"))
}

pub fn evaluate_multi_static(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
) -> Result<Vec<Object>> {
    let mut out = Vec::new();
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => out.extend(evaluate_expr_static(cst, inner, env)?),
            ExprKind::Paren(_) => out.extend(evaluate_expr_static(cst, expr, env)?),
            _ => out.push(evaluate_one_static(cst, expr, env)?),
        }
    }
    Ok(out)
}

pub fn evaluate_type(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr) -> Result<TypePtr> {
    let obj = evaluate_one_static(cst, expr, env)?;
    match obj {
        Object::Type(t) => Ok(t),
        other => Err(cst.diag_at(
            expr.span,
            CompileError::TypeMismatch {
                expected: "a type".to_string(),
                got: format!("{}", StaticName(&other)),
            },
        )),
    }
}

pub fn evaluate_bool(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr) -> Result<bool> {
    let obj = evaluate_one_static(cst, expr, env)?;
    let _loc = cst.push_location(expr.span);
    crate::analyzer::static_to_bool(cst, &obj)
}

/// Check that every pattern variable is bound, then check the
/// definition predicate.
pub fn evaluate_pattern_predicate(
    cst: &CompilerState,
    pattern_vars: &[PatternVar],
    predicate: &Option<ExprPtr>,
    env: &EnvPtr,
) -> Result<()> {
    for pvar in pattern_vars {
        if lookup_env(cst, env, &pvar.name.name)?.is_none() {
            return Err(cst.diag_at(
                pvar.name.span,
                CompileError::UnboundPatternVariable(pvar.name.name.clone()),
            ));
        }
    }
    if let Some(predicate) = predicate {
        if !evaluate_bool(cst, predicate, env)? {
            return Err(cst.diag_at(predicate.span, CompileError::PredicateFailed));
        }
    }
    Ok(())
}

pub fn evaluate_static_assert(
    cst: &CompilerState,
    span: crate::span::Span,
    condition: &ExprPtr,
    message: &ExprListPtr,
    env: &EnvPtr,
) -> Result<()> {
    let ok = evaluate_bool(cst, condition, env)?;
    // The message is evaluated even when the assert passes, so a broken
    // message expression fails deterministically.
    let parts = evaluate_multi_static(cst, message, env)?;
    if ok {
        return Ok(());
    }
    let mut rendered = String::new();
    for part in &parts {
        rendered.push_str(&format!("{}", StaticName(part)));
    }
    let message = if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    };
    Err(cst.diag_at(span, CompileError::StaticAssertFailed(message)))
}

/// Evaluate declared return specs into (by-ref flags, types), stripping
/// `ByRef` markers.
pub fn evaluate_return_specs(
    cst: &CompilerState,
    return_specs: &[crate::ast::ReturnSpec],
    var_return_spec: &Option<crate::ast::ReturnSpec>,
    env: &EnvPtr,
) -> Result<(Vec<bool>, Vec<TypePtr>)> {
    let mut return_is_ref = Vec::new();
    let mut return_types = Vec::new();
    for spec in return_specs {
        let t = evaluate_type(cst, &spec.type_expr, env)?;
        let (t, is_ref) = crate::analyzer::unwrap_by_ref(cst, &t)?;
        return_is_ref.push(is_ref);
        return_types.push(t);
    }
    if let Some(var_spec) = var_return_spec {
        let _loc = cst.push_location(var_spec.type_expr.span);
        let values = evaluate_expr_static(cst, &var_spec.type_expr, env)?;
        for value in values {
            let t = crate::analyzer::expect_type(cst, &value)?;
            let (t, is_ref) = crate::analyzer::unwrap_by_ref(cst, &t)?;
            return_is_ref.push(is_ref);
            return_types.push(t);
        }
    }
    Ok((return_is_ref, return_types))
}

/// Shared by `eval` expressions and statements: evaluate the pieces to
/// static strings, splice them, and parse through the front-end hook.
pub fn desugar_eval_body(
    cst: &CompilerState,
    args: &ExprListPtr,
    env: &EnvPtr,
    span: crate::span::Span,
) -> Result<ExprListPtr> {
    let parts = evaluate_multi_static(cst, args, env)?;
    let mut source = String::new();
    for part in &parts {
        match part {
            Object::Ident(ident) => source.push_str(&ident.name),
            other => {
                return Err(cst.diag_at(
                    span,
                    CompileError::TypeMismatch {
                        expected: "a static string".to_string(),
                        got: format!("{}", StaticName(other)),
                    },
                ))
            }
        }
    }
    let exprs = cst.parse_with_hook(&source, span)?;
    Ok(ExprList::new(exprs))
}

//
// into/as-ref evaluation
//

pub fn eval_one(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr, out: &EValue) -> Result<()> {
    eval_expr(cst, expr, env, &MultiEValue::single(out.clone()))
}

/// Evaluate into value-typed destinations, copying lvalue results.
pub fn eval_one_into(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
    out: &EValue,
) -> Result<()> {
    let pv = safe_analyze_one(cst, expr, env)?;
    if pv.is_temp {
        return eval_one(cst, expr, env, out);
    }
    let marker = eval_mark_stack(cst);
    let result = (|| {
        let ev_ptr = eval_alloc_value(cst, &cst.pointer_type(&pv.ty))?;
        eval_one(cst, expr, env, &ev_ptr)?;
        let referent = deref_value(cst, &ev_ptr)?;
        eval_value_copy(cst, out, &referent)
    })();
    eval_destroy_and_pop_stack(cst, marker);
    result
}

pub fn eval_multi_into(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    out: &MultiEValue,
    want_count: usize,
) -> Result<()> {
    let mut out_index = 0;
    if want_count >= 1 && exprs.len() == 1 && !matches!(exprs.exprs[0].kind, ExprKind::Unpack(_))
    {
        return eval_expr_into(cst, &exprs.exprs[0], env, out);
    }
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => {
                let mpv = safe_analyze_expr(cst, inner, env)?;
                let slice = MultiEValue {
                    values: out.values[out_index..out_index + mpv.len()].to_vec(),
                };
                eval_expr_into(cst, inner, env, &slice)?;
                out_index += mpv.len();
            }
            ExprKind::Paren(_) => {
                let mpv = safe_analyze_expr(cst, expr, env)?;
                let slice = MultiEValue {
                    values: out.values[out_index..out_index + mpv.len()].to_vec(),
                };
                eval_expr_into(cst, expr, env, &slice)?;
                out_index += mpv.len();
            }
            _ => {
                eval_one_into(cst, expr, env, &out.values[out_index])?;
                out_index += 1;
            }
        }
    }
    Ok(())
}

pub fn eval_expr_into(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
    out: &MultiEValue,
) -> Result<()> {
    let mpv = safe_analyze_expr(cst, expr, env)?;
    debug_assert_eq!(mpv.len(), out.len());
    let marker = eval_mark_stack(cst);
    let result = (|| {
        let mut dests = MultiEValue::new();
        for (pv, dest) in mpv.values.iter().zip(out.values.iter()) {
            if pv.is_temp {
                dests.values.push(dest.clone());
            } else {
                dests.values.push(eval_alloc_value_for_pvalue(cst, pv)?);
            }
        }
        eval_expr(cst, expr, env, &dests)?;
        for ((pv, dest), computed) in mpv
            .values
            .iter()
            .zip(out.values.iter())
            .zip(dests.values.iter())
        {
            if !pv.is_temp {
                let referent = deref_value(cst, computed)?;
                eval_value_copy(cst, dest, &referent)?;
            }
        }
        Ok(())
    })();
    eval_destroy_and_pop_stack(cst, marker);
    result
}

/// Evaluate to references: lvalues alias their storage, rvalues
/// materialize as fresh temporaries.
pub fn eval_one_as_ref(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr) -> Result<EValue> {
    let pv = safe_analyze_one(cst, expr, env)?;
    let ev = eval_alloc_value_for_pvalue(cst, &pv)?;
    eval_one(cst, expr, env, &ev)?;
    deref_value_for_pvalue(cst, &ev, &pv)
}

pub fn eval_expr_as_ref(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
) -> Result<MultiEValue> {
    let mpv = safe_analyze_expr(cst, expr, env)?;
    let mut dests = MultiEValue::new();
    for pv in &mpv.values {
        dests.values.push(eval_alloc_value_for_pvalue(cst, pv)?);
    }
    eval_expr(cst, expr, env, &dests)?;
    let mut out = MultiEValue::new();
    for (pv, ev) in mpv.values.iter().zip(dests.values.iter()) {
        out.values.push(deref_value_for_pvalue(cst, ev, pv)?);
    }
    Ok(out)
}

pub fn eval_multi_as_ref(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
) -> Result<MultiEValue> {
    let mut out = MultiEValue::new();
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => {
                let vals = eval_expr_as_ref(cst, inner, env)?;
                out.values.extend(vals.values);
            }
            ExprKind::Paren(_) => {
                let vals = eval_expr_as_ref(cst, expr, env)?;
                out.values.extend(vals.values);
            }
            _ => out.values.push(eval_one_as_ref(cst, expr, env)?),
        }
    }
    Ok(out)
}

/// As-ref evaluation that keeps rvalue-ness visible, for `forward`
/// bindings.
fn eval_forward_multi_as_ref(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
) -> Result<MultiEValue> {
    let mut out = MultiEValue::new();
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => {
                let mpv = safe_analyze_expr(cst, inner, env)?;
                let vals = eval_expr_as_ref(cst, inner, env)?;
                for (pv, mut ev) in mpv.values.iter().zip(vals.values.into_iter()) {
                    ev.forwarded_rvalue = pv.is_temp;
                    out.values.push(ev);
                }
            }
            ExprKind::Paren(_) => {
                let mpv = safe_analyze_expr(cst, expr, env)?;
                let vals = eval_expr_as_ref(cst, expr, env)?;
                for (pv, mut ev) in mpv.values.iter().zip(vals.values.into_iter()) {
                    ev.forwarded_rvalue = pv.is_temp;
                    out.values.push(ev);
                }
            }
            _ => {
                let pv = safe_analyze_one(cst, expr, env)?;
                let mut ev = eval_one_as_ref(cst, expr, env)?;
                ev.forwarded_rvalue = pv.is_temp;
                out.values.push(ev);
            }
        }
    }
    Ok(out)
}

//
// argument evaluation with dispatch positions
//

fn eval_multi_args_as_ref(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
) -> Result<MultiEValue> {
    let mut out = MultiEValue::new();
    for expr in &exprs.exprs {
        let stripped = match &expr.kind {
            ExprKind::DispatchExpr(inner) => inner,
            _ => expr,
        };
        match &stripped.kind {
            ExprKind::Unpack(inner) => {
                let vals = eval_expr_as_ref(cst, inner, env)?;
                out.values.extend(vals.values);
            }
            ExprKind::Paren(_) => {
                let vals = eval_expr_as_ref(cst, stripped, env)?;
                out.values.extend(vals.values);
            }
            _ => out.values.push(eval_one_as_ref(cst, stripped, env)?),
        }
    }
    Ok(out)
}

//
// eval_expr
//

pub fn eval_expr(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
    out: &MultiEValue,
) -> Result<()> {
    let _loc = cst.push_location(expr.span);
    match &expr.kind {
        ExprKind::BoolLiteral(value) => {
            ev_write(cst, &out.values[0], &[u8::from(*value)])
        }
        ExprKind::IntLiteral { value, suffix } => {
            let holder = crate::literals::parse_int_literal(cst, env, value, suffix.as_deref())?;
            let result = ev_write(cst, &out.values[0], &holder.buf.borrow());
            result
        }
        ExprKind::FloatLiteral { value, suffix } => {
            let holder =
                crate::literals::parse_float_literal(cst, env, value, suffix.as_deref())?;
            let result = ev_write(cst, &out.values[0], &holder.buf.borrow());
            result
        }
        ExprKind::StringLiteral(_) => Ok(()),
        ExprKind::NameRef(name) => {
            let obj = safe_lookup_env(cst, env, name)?;
            match obj {
                Object::Expr(e) => eval_expr(cst, &e, env, out),
                Object::ExprList(exprs) => eval_multi(cst, &exprs, env, out, 0),
                other => eval_static_object(cst, &other, out),
            }
        }
        ExprKind::Tuple(args) => {
            let dest = &out.values[0];
            let TypeKind::Tuple(elems) = &dest.ty.kind else {
                return Err(cst.diag(CompileError::InvalidOperation(
                    "tuple expression with non-tuple destination".to_string(),
                )));
            };
            debug_assert_eq!(elems.len(), args.len());
            for (i, (arg, elem_ty)) in args.exprs.iter().zip(elems.iter()).enumerate() {
                let offset = tuple_element_offset(cst, &dest.ty, i)? as usize;
                let elem_dest = EValue::new(elem_ty.clone(), dest.addr + offset);
                eval_one_into(cst, arg, env, &elem_dest)?;
            }
            Ok(())
        }
        ExprKind::Paren(args) => eval_multi(cst, args, env, out, 0),
        ExprKind::Indexing { expr: head, args } => {
            eval_indexing_expr(cst, head, args, env, out)
        }
        ExprKind::Call { expr: callee, args } => eval_call_expr(cst, callee, args, env, out),
        ExprKind::FieldRef { expr: base, name } => {
            let pv = safe_analyze_one(cst, base, env)?;
            if let Some(Object::Module(module)) = unwrap_static_type(&pv.ty) {
                let obj = safe_lookup_public(cst, &module, name)?;
                return eval_static_object(cst, &obj, out);
            }
            if let Some(op) = cst.prelude_operator("fieldRef")? {
                let args = ExprList::new(vec![
                    base.clone(),
                    Expr::new(
                        ExprKind::ObjectExpr(Object::Ident(name.clone())),
                        name.span,
                    ),
                ]);
                let callee = Expr::new(ExprKind::ObjectExpr(op), base.span);
                return eval_call_expr(cst, &callee, &args, env, out);
            }
            let base_ev = eval_one_as_ref(cst, base, env)?;
            let fields = cst.record_field_types(&base_ev.ty)?;
            for (i, (field_name, field_type)) in fields.iter().enumerate() {
                if field_name.name == name.name {
                    let offset = record_field_offset(cst, &base_ev.ty, i)? as usize;
                    let field = EValue::new(field_type.clone(), base_ev.addr + offset);
                    return eval_deliver(cst, &field, &out.values[0]);
                }
            }
            Err(cst.diag_at(
                name.span,
                CompileError::InvalidOperation(format!(
                    "{} has no field named {}",
                    TypeName(&base_ev.ty),
                    name.name
                )),
            ))
        }
        ExprKind::StaticIndexing { expr: base, index } => {
            let base_ev = eval_one_as_ref(cst, base, env)?;
            let TypeKind::Tuple(elems) = &base_ev.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a tuple".to_string(),
                    got: TypeName(&base_ev.ty).to_string(),
                }));
            };
            let offset = tuple_element_offset(cst, &base_ev.ty, *index as usize)? as usize;
            let elem = EValue::new(elems[*index as usize].clone(), base_ev.addr + offset);
            eval_deliver(cst, &elem, &out.values[0])
        }
        ExprKind::AddressOf(inner) => {
            let ev = eval_one_as_ref(cst, inner, env)?;
            write_ptr(cst, out.values[0].addr, ev.addr);
            Ok(())
        }
        ExprKind::Dereference(inner) => {
            let ev = eval_one_as_ref(cst, inner, env)?;
            let referent = deref_value(cst, &ev)?;
            eval_deliver(cst, &referent, &out.values[0])
        }
        ExprKind::And { left, right } => {
            let marker = eval_mark_stack(cst);
            let lhs = eval_one_as_ref(cst, left, env)?;
            let lhs_true = eval_to_bool(cst, &lhs)?;
            eval_destroy_and_pop_stack(cst, marker);
            if !lhs_true {
                return ev_write(cst, &out.values[0], &[0]);
            }
            let marker = eval_mark_stack(cst);
            let rhs = eval_one_as_ref(cst, right, env)?;
            let rhs_true = eval_to_bool(cst, &rhs)?;
            eval_destroy_and_pop_stack(cst, marker);
            ev_write(cst, &out.values[0], &[u8::from(rhs_true)])
        }
        ExprKind::Or { left, right } => {
            let marker = eval_mark_stack(cst);
            let lhs = eval_one_as_ref(cst, left, env)?;
            let lhs_true = eval_to_bool(cst, &lhs)?;
            eval_destroy_and_pop_stack(cst, marker);
            if lhs_true {
                return ev_write(cst, &out.values[0], &[1]);
            }
            let marker = eval_mark_stack(cst);
            let rhs = eval_one_as_ref(cst, right, env)?;
            let rhs_true = eval_to_bool(cst, &rhs)?;
            eval_destroy_and_pop_stack(cst, marker);
            ev_write(cst, &out.values[0], &[u8::from(rhs_true)])
        }
        ExprKind::Lambda(lambda) => {
            let _converted = crate::lambdas::convert_lambda(cst, lambda, env)?;
            Ok(())
        }
        ExprKind::Unpack(inner) => {
            if !matches!(inner.kind, ExprKind::Foreign { .. }) {
                return Err(cst.diag(CompileError::InvalidOperation(
                    "incorrect usage of unpack operator".to_string(),
                )));
            }
            eval_expr(cst, inner, env, out)
        }
        ExprKind::StaticExpr(_) => Ok(()),
        ExprKind::DispatchExpr(_) => Err(cst.diag(CompileError::InvalidOperation(
            "incorrect usage of dispatch operator".to_string(),
        ))),
        ExprKind::EvalExpr(args) => {
            let exprs = desugar_eval_body(cst, args, env, expr.span)?;
            eval_multi(cst, &exprs, env, out, 0)
        }
        ExprKind::Foreign {
            env: foreign_env,
            expr: inner,
        } => eval_expr(cst, inner, foreign_env, out),
        ExprKind::ObjectExpr(obj) => eval_static_object(cst, obj, out),
    }
}

pub fn eval_multi(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
    out: &MultiEValue,
    want_count: usize,
) -> Result<()> {
    let mut out_index = 0;
    if want_count >= 1 && exprs.len() == 1 && !matches!(exprs.exprs[0].kind, ExprKind::Unpack(_))
    {
        return eval_expr(cst, &exprs.exprs[0], env, out);
    }
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => {
                let mpv = safe_analyze_expr(cst, inner, env)?;
                let slice = MultiEValue {
                    values: out.values[out_index..out_index + mpv.len()].to_vec(),
                };
                eval_expr(cst, inner, env, &slice)?;
                out_index += mpv.len();
            }
            ExprKind::Paren(_) => {
                let mpv = safe_analyze_expr(cst, expr, env)?;
                let slice = MultiEValue {
                    values: out.values[out_index..out_index + mpv.len()].to_vec(),
                };
                eval_expr(cst, expr, env, &slice)?;
                out_index += mpv.len();
            }
            _ => {
                eval_expr(
                    cst,
                    expr,
                    env,
                    &MultiEValue::single(out.values[out_index].clone()),
                )?;
                out_index += 1;
            }
        }
    }
    Ok(())
}

//
// static objects
//

pub fn eval_static_object(
    cst: &CompilerState,
    obj: &Object,
    out: &MultiEValue,
) -> Result<()> {
    match obj {
        Object::ValueHolder(vh) => {
            let dest = &out.values[0];
            if matches!(dest.ty.kind, TypeKind::Static(_)) {
                return Ok(());
            }
            ev_write(cst, dest, &vh.buf.borrow())
        }
        Object::EValue(ev) => eval_deliver(cst, ev, &out.values[0]),
        Object::MultiEValue(mev) => {
            for (ev, dest) in mev.values.iter().zip(out.values.iter()) {
                eval_deliver(cst, ev, dest)?;
            }
            Ok(())
        }
        Object::MultiStatic(values) => {
            let mut out_index = 0;
            for value in values.iter() {
                let slice = MultiEValue::single(out.values[out_index].clone());
                eval_static_object(cst, value, &slice)?;
                out_index += 1;
            }
            Ok(())
        }
        Object::EnumMember(member) => {
            let dest = &out.values[0];
            ev_write(cst, dest, &(member.index as i32).to_le_bytes())
        }
        Object::GlobalAlias(alias) if !alias.has_params() => {
            evaluate_pattern_predicate(cst, &alias.pattern_vars, &alias.predicate, &alias.env)?;
            eval_expr(cst, &alias.expr, &alias.env, out)
        }
        Object::GlobalVariable(_) => Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            "global variable access is".to_string(),
        ))),
        Object::ExternalVariable(_) | Object::ExternalProcedure(_) => {
            Err(cst.diag(CompileError::UnsupportedAtCompileTime(
                "external symbol access is".to_string(),
            )))
        }
        Object::PValue(_) | Object::MultiPValue(_) => {
            Err(cst.diag(CompileError::InvalidOperation(
                "analysis value escaped into evaluation".to_string(),
            )))
        }
        Object::Pattern(_) | Object::MultiPattern(_) => {
            Err(cst.diag(CompileError::InvalidOperation(
                "pattern variable cannot be used as value".to_string(),
            )))
        }
        // Statics occupy no storage.
        _ => Ok(()),
    }
}

//
// indexing
//

fn eval_indexing_expr(
    cst: &CompilerState,
    indexable: &ExprPtr,
    args: &ExprListPtr,
    env: &EnvPtr,
    out: &MultiEValue,
) -> Result<()> {
    let pv = safe_analyze_one(cst, indexable, env)?;
    if let Some(obj) = unwrap_static_type(&pv.ty) {
        match &obj {
            Object::PrimOp(_) | Object::Record(_) | Object::Variant(_) => {
                // Type construction: the result is a static, no bytes.
                return Ok(());
            }
            Object::GlobalAlias(alias) if alias.has_params() => {
                let params = evaluate_multi_static(cst, args, env)?;
                let body_env = Env::new(&alias.env);
                for (name, value) in alias.params.iter().zip(params.iter()) {
                    add_local(cst, &body_env, name, value.clone())?;
                }
                if let Some(var_param) = &alias.var_param {
                    let rest: Vec<Object> = params[alias.params.len()..].to_vec();
                    add_local(
                        cst,
                        &body_env,
                        var_param,
                        Object::MultiStatic(Rc::new(rest)),
                    )?;
                }
                evaluate_pattern_predicate(
                    cst,
                    &alias.pattern_vars,
                    &alias.predicate,
                    &body_env,
                )?;
                let _caching = cst.disable_analysis_caching();
                return eval_expr(cst, &alias.expr, &body_env, out);
            }
            Object::GlobalVariable(_) => {
                return Err(cst.diag(CompileError::UnsupportedAtCompileTime(
                    "global variable access is".to_string(),
                )))
            }
            _ => {}
        }
    }
    if let Some(op) = cst.prelude_operator("index")? {
        let mut all = vec![indexable.clone()];
        all.extend(args.exprs.iter().cloned());
        let callee = Expr::new(ExprKind::ObjectExpr(op), indexable.span);
        return eval_call_expr(cst, &callee, &ExprList::new(all), env, out);
    }
    Err(cst.diag(CompileError::InvalidOperation(
        "invalid indexing operation".to_string(),
    )))
}

//
// calls
//

fn is_memoizable(callable: &Object) -> bool {
    // Memoize when the procedure name ends with '?': a convention, not a
    // contract.
    match callable {
        Object::Procedure(p) => p.name.name.ends_with('?'),
        _ => false,
    }
}

pub fn eval_call_expr(
    cst: &CompilerState,
    callable: &ExprPtr,
    args: &ExprListPtr,
    env: &EnvPtr,
    out: &MultiEValue,
) -> Result<()> {
    let pv = safe_analyze_one(cst, callable, env)?;
    if matches!(pv.ty.kind, TypeKind::CodePointer { .. }) {
        return Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            "invoking a code pointer is".to_string(),
        )));
    }
    let Some(obj) = unwrap_static_type(&pv.ty) else {
        let Some(op) = cst.prelude_operator("call")? else {
            return Err(cst.diag(CompileError::InvalidOperation(
                "invalid call expression".to_string(),
            )));
        };
        let mut all = vec![callable.clone()];
        all.extend(args.exprs.iter().cloned());
        let callee = Expr::new(ExprKind::ObjectExpr(op), callable.span);
        return eval_call_expr(cst, &callee, &ExprList::new(all), env, out);
    };

    match &obj {
        Object::PrimOp(p) if !is_overloadable_prim_op_code(p.code) => {
            // Argument temporaries live until the enclosing frame pops:
            // lvalue results may alias them.
            let mev = eval_multi_as_ref(cst, args, env)?;
            crate::evaluator_ops::eval_prim_op(cst, p.code, &mev, out)
        }
        Object::Type(_)
        | Object::Record(_)
        | Object::Variant(_)
        | Object::Procedure(_)
        | Object::GlobalAlias(_)
        | Object::PrimOp(_) => {
            let mut dispatch_indices = Vec::new();
            let mpv = safe_analyze_multi_args(cst, args, env, &mut dispatch_indices)?;
            if !dispatch_indices.is_empty() {
                let mev = eval_multi_args_as_ref(cst, args, env)?;
                return eval_dispatch(cst, &obj, &mev, &mpv, &dispatch_indices, out);
            }
            let (args_key, args_tempness) = compute_args_key(&mpv);
            let _ctx = cst.push_context(crate::printer::render_args_key(&obj, &args_key));
            let entry = match safe_analyze_callable(cst, &obj, &args_key, &args_tempness) {
                Ok(entry) => entry,
                Err(diag) => {
                    if matches!(diag.error, CompileError::NoMatchingOverload { .. }) {
                        if let Object::Type(t) = &obj {
                            let mev = eval_multi_as_ref(cst, args, env)?;
                            if eval_native_type_call(cst, t, &mev, &mpv, out)? {
                                return Ok(());
                            }
                        }
                    }
                    return Err(diag);
                }
            };
            if entry.call_by_name {
                return eval_call_by_name(cst, &entry, callable, args, env, out);
            }
            debug_assert!(entry.analyzed.get());
            let mev = eval_multi_as_ref(cst, args, env)?;
            if is_memoizable(&obj) {
                let Object::Procedure(proc) = &obj else {
                    unreachable!("memoizable callables are procedures");
                };
                let mut static_args = Vec::with_capacity(mev.len());
                for ev in &mev.values {
                    static_args.push(evalue_to_static(cst, ev)?);
                }
                let key = ObjectVecKey(static_args);
                let cached = proc.evaluator_cache.borrow().get(&key).cloned();
                match cached {
                    Some(results) => {
                        eval_static_object(cst, &Object::MultiStatic(results), out)
                    }
                    None => {
                        eval_call_code(cst, &entry, &mev, out)?;
                        let mut results = Vec::with_capacity(out.len());
                        for ev in &out.values {
                            results.push(evalue_to_static(cst, ev)?);
                        }
                        proc.evaluator_cache
                            .borrow_mut()
                            .insert(key, Rc::new(results));
                        Ok(())
                    }
                }
            } else {
                eval_call_code(cst, &entry, &mev, out)
            }
        }
        Object::Intrinsic(intrinsic) => Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            format!("calling intrinsic {} is", intrinsic.name),
        ))),
        _ => Err(cst.diag(CompileError::InvalidOperation(
            "invalid call expression".to_string(),
        ))),
    }
}

/// Native construction for type calls without a matching overload,
/// mirroring the analyzer's rules. Returns false when no rule applies.
fn eval_native_type_call(
    cst: &CompilerState,
    t: &TypePtr,
    args: &MultiEValue,
    pv_args: &MultiPValue,
    out: &MultiEValue,
) -> Result<bool> {
    let dest = &out.values[0];
    if args.len() == 1 && Rc::ptr_eq(&pv_args.values[0].ty, t) {
        eval_value_copy(cst, dest, &args.values[0])?;
        return Ok(true);
    }
    match &t.kind {
        TypeKind::Record { .. } => {
            let fields = cst.record_field_types(t)?;
            if fields.len() != args.len()
                || !fields
                    .iter()
                    .zip(args.values.iter())
                    .all(|((_, ft), ev)| Rc::ptr_eq(ft, &ev.ty))
            {
                return Ok(false);
            }
            for (i, (_, field_ty)) in fields.iter().enumerate() {
                let offset = record_field_offset(cst, t, i)? as usize;
                let field_dest = EValue::new(field_ty.clone(), dest.addr + offset);
                eval_value_copy(cst, &field_dest, &args.values[i])?;
            }
            Ok(true)
        }
        TypeKind::Tuple(elems) => {
            if elems.len() != args.len()
                || !elems
                    .iter()
                    .zip(args.values.iter())
                    .all(|(et, ev)| Rc::ptr_eq(et, &ev.ty))
            {
                return Ok(false);
            }
            for (i, elem_ty) in elems.iter().enumerate() {
                let offset = tuple_element_offset(cst, t, i)? as usize;
                let elem_dest = EValue::new(elem_ty.clone(), dest.addr + offset);
                eval_value_copy(cst, &elem_dest, &args.values[i])?;
            }
            Ok(true)
        }
        TypeKind::Variant { .. } => {
            if args.len() != 1 {
                return Ok(false);
            }
            let members = cst.variant_member_types(t)?;
            let Some(tag) = members
                .iter()
                .position(|m| Rc::ptr_eq(m, &args.values[0].ty))
            else {
                return Ok(false);
            };
            // Tags are stored one-based so a zeroed variant reads as
            // uninitialized.
            mem_write(cst, dest.addr, &((tag + 1) as i32).to_le_bytes());
            let payload = variant_payload_offset(cst, t)? as usize;
            let member_dest =
                EValue::new(args.values[0].ty.clone(), dest.addr + payload);
            eval_value_copy(cst, &member_dest, &args.values[0])?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

//
// dispatch
//

pub fn eval_dispatch_tag(cst: &CompilerState, ev: &EValue) -> Result<usize> {
    let bytes = mem_read(cst, ev.addr, 4);
    let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if raw == 0 {
        return Err(cst.diag(CompileError::InvalidOperation(
            "dispatch tag uninitialized".to_string(),
        )));
    }
    Ok((raw - 1) as usize)
}

fn eval_dispatch(
    cst: &CompilerState,
    obj: &Object,
    args: &MultiEValue,
    pv_args: &MultiPValue,
    dispatch_indices: &[usize],
    out: &MultiEValue,
) -> Result<()> {
    if dispatch_indices.is_empty() {
        let callable = static_evalue(cst, obj.clone());
        return eval_call_value(cst, &callable, args, pv_args, out);
    }
    let (args_key, _) = compute_args_key(pv_args);
    let _ctx = cst.push_context(crate::printer::render_args_key(obj, &args_key));

    let index = dispatch_indices[0];
    let rest_indices = &dispatch_indices[1..];
    let ev_dispatch = &args.values[index];
    let pv_dispatch = &pv_args.values[index];

    let tag = eval_dispatch_tag(cst, ev_dispatch)?;
    let tag_count = dispatch_tag_count(cst, &ev_dispatch.ty)?;
    if tag >= tag_count {
        return Err(cst.diag(CompileError::ArgumentError {
            index,
            message: "invalid variant value".to_string(),
        }));
    }

    let pv_member = analyze_dispatch_index(cst, pv_dispatch, tag)?;
    let payload = variant_payload_offset(cst, &ev_dispatch.ty)? as usize;
    let ev_member = EValue::new(pv_member.ty.clone(), ev_dispatch.addr + payload);

    let mut args2 = MultiEValue::new();
    let mut pv_args2 = MultiPValue::new();
    for i in 0..index {
        args2.values.push(args.values[i].clone());
        pv_args2.add(pv_args.values[i].clone());
    }
    args2.values.push(ev_member);
    pv_args2.add(pv_member);
    for i in index + 1..args.len() {
        args2.values.push(args.values[i].clone());
        pv_args2.add(pv_args.values[i].clone());
    }
    eval_dispatch(cst, obj, &args2, &pv_args2, rest_indices, out)
}

//
// value-level calls
//

pub fn eval_call_value(
    cst: &CompilerState,
    callable: &EValue,
    args: &MultiEValue,
    pv_args: &MultiPValue,
    out: &MultiEValue,
) -> Result<()> {
    if matches!(callable.ty.kind, TypeKind::CodePointer { .. }) {
        return Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            "invoking a code pointer is".to_string(),
        )));
    }
    let Some(obj) = unwrap_static_type(&callable.ty) else {
        let Some(op) = cst.prelude_operator("call")? else {
            return Err(cst.diag(CompileError::InvalidOperation(
                "invalid call operation".to_string(),
            )));
        };
        let mut args2 = MultiEValue::single(callable.clone());
        args2.values.extend(args.values.iter().cloned());
        let mut pv_args2 = MultiPValue::single(PValue::new(callable.ty.clone(), false));
        pv_args2.add_multi(pv_args);
        let op_callable = static_evalue(cst, op);
        return eval_call_value(cst, &op_callable, &args2, &pv_args2, out);
    };
    match &obj {
        Object::PrimOp(p) if !is_overloadable_prim_op_code(p.code) => {
            crate::evaluator_ops::eval_prim_op(cst, p.code, args, out)
        }
        Object::Type(_)
        | Object::Record(_)
        | Object::Variant(_)
        | Object::Procedure(_)
        | Object::GlobalAlias(_)
        | Object::PrimOp(_) => {
            let (args_key, args_tempness) = compute_args_key(pv_args);
            let _ctx = cst.push_context(crate::printer::render_args_key(&obj, &args_key));
            let entry = match safe_analyze_callable(cst, &obj, &args_key, &args_tempness) {
                Ok(entry) => entry,
                Err(diag) => {
                    if matches!(diag.error, CompileError::NoMatchingOverload { .. }) {
                        if let Object::Type(t) = &obj {
                            if eval_native_type_call(cst, t, args, pv_args, out)? {
                                return Ok(());
                            }
                        }
                    }
                    return Err(diag);
                }
            };
            if entry.call_by_name {
                let mut exprs = Vec::with_capacity(args.len());
                for ev in &args.values {
                    exprs.push(Expr::synthetic(ExprKind::ObjectExpr(Object::EValue(
                        ev.clone(),
                    ))));
                }
                let callee = Expr::synthetic(ExprKind::ObjectExpr(obj.clone()));
                return eval_call_by_name(
                    cst,
                    &entry,
                    &callee,
                    &ExprList::new(exprs),
                    &Env::root(),
                    out,
                );
            }
            debug_assert!(entry.analyzed.get());
            eval_call_code(cst, &entry, args, out)
        }
        Object::Intrinsic(intrinsic) => Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            format!("calling intrinsic {} is", intrinsic.name),
        ))),
        _ => Err(cst.diag(CompileError::InvalidOperation(
            "invalid call operation".to_string(),
        ))),
    }
}

//
// invoking entries
//

#[derive(Debug, Clone)]
pub struct EReturn {
    pub is_ref: bool,
    pub ty: TypePtr,
    pub value: EValue,
}

#[derive(Debug, Default)]
pub struct EvalContext {
    pub returns: Vec<EReturn>,
}

#[derive(Debug, Clone)]
pub enum Termination {
    Return,
    Break,
    Continue,
    Goto(IdentifierPtr),
}

pub fn eval_call_code(
    cst: &CompilerState,
    entry: &Rc<InvokeEntry>,
    args: &MultiEValue,
    out: &MultiEValue,
) -> Result<()> {
    debug_assert!(!entry.call_by_name);
    debug_assert!(entry.analyzed.get());
    crate::analyzer::ensure_arity(cst, entry.args_key.len(), args.len())?;

    let env = Env::new(&entry.env);
    let mut arg_index = 0;
    for i in 0..entry.var_arg_position {
        let ev = &args.values[arg_index];
        let mut earg = EValue::new(ev.ty.clone(), ev.addr);
        earg.forwarded_rvalue = entry.forwarded_rvalue_flags[arg_index];
        add_local(cst, &env, &entry.fixed_arg_names[i], Object::EValue(earg))?;
        arg_index += 1;
    }
    if let Some(var_arg_name) = &entry.var_arg_name {
        let mut var_args = MultiEValue::new();
        for _ in 0..entry.var_arg_types.len() {
            let ev = &args.values[arg_index];
            let mut earg = EValue::new(ev.ty.clone(), ev.addr);
            earg.forwarded_rvalue = entry.forwarded_rvalue_flags[arg_index];
            var_args.values.push(earg);
            arg_index += 1;
        }
        add_local(cst, &env, var_arg_name, Object::MultiEValue(var_args))?;
        for i in entry.var_arg_position..entry.fixed_arg_names.len() {
            let ev = &args.values[arg_index];
            let mut earg = EValue::new(ev.ty.clone(), ev.addr);
            earg.forwarded_rvalue = entry.forwarded_rvalue_flags[arg_index];
            add_local(cst, &env, &entry.fixed_arg_names[i], Object::EValue(earg))?;
            arg_index += 1;
        }
    }

    let return_types = entry.return_types.borrow().clone();
    let return_is_ref = entry.return_is_ref.borrow().clone();
    debug_assert_eq!(out.len(), return_types.len());
    let mut ctx = EvalContext::default();
    for ((rt, is_ref), ev) in return_types
        .iter()
        .zip(return_is_ref.iter())
        .zip(out.values.iter())
    {
        ctx.returns.push(EReturn {
            is_ref: *is_ref,
            ty: rt.clone(),
            value: ev.clone(),
        });
    }

    let code = entry.code.borrow().clone();
    let env = bind_named_return_specs(cst, &code, &env, &ctx)?;
    let body = code.body.clone().ok_or_else(|| {
        cst.diag(CompileError::InvalidOperation(
            "invoked entry has no body".to_string(),
        ))
    })?;
    match eval_statement(cst, &body, &env, &ctx)? {
        None | Some(Termination::Return) => Ok(()),
        Some(Termination::Break) => Err(cst.diag(CompileError::InvalidOperation(
            "invalid 'break' statement".to_string(),
        ))),
        Some(Termination::Continue) => Err(cst.diag(CompileError::InvalidOperation(
            "invalid 'continue' statement".to_string(),
        ))),
        Some(Termination::Goto(label)) => Err(cst.diag(CompileError::InvalidOperation(
            format!("no label named {}", label.name),
        ))),
    }
}

/// Named return specs bind the return slots as locals so the body can
/// initialize them in place.
fn bind_named_return_specs(
    cst: &CompilerState,
    code: &crate::ast::CodePtr,
    env: &EnvPtr,
    ctx: &EvalContext,
) -> Result<EnvPtr> {
    if !code.has_return_specs() {
        return Ok(env.clone());
    }
    let env = Env::new(env);
    let mut i = 0;
    for spec in &code.return_specs {
        if let Some(name) = &spec.name {
            add_local(cst, &env, name, Object::EValue(ctx.returns[i].value.clone()))?;
        }
        i += 1;
    }
    if let Some(var_spec) = &code.var_return_spec {
        if let Some(name) = &var_spec.name {
            let mut mev = MultiEValue::new();
            for ret in &ctx.returns[i..] {
                mev.values.push(ret.value.clone());
            }
            add_local(cst, &env, name, Object::MultiEValue(mev))?;
        }
    }
    Ok(env)
}

pub fn eval_call_by_name(
    cst: &CompilerState,
    entry: &Rc<InvokeEntry>,
    callable: &ExprPtr,
    args: &ExprListPtr,
    env: &EnvPtr,
    out: &MultiEValue,
) -> Result<()> {
    debug_assert!(entry.call_by_name);
    let code = entry.code.borrow().clone();

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

    // Re-derive the return shape from analysis of this same expansion;
    // `out` was allocated from it, so the two line up slot for slot.
    let analyzed = crate::analyzer::analyze_call_by_name(cst, entry, callable, args, env)?
        .ok_or_else(|| cst.analysis_blocked_diag())?;
    debug_assert_eq!(analyzed.len(), out.len());
    let mut ctx = EvalContext::default();
    for (pv, ev) in analyzed.values.iter().zip(out.values.iter()) {
        ctx.returns.push(EReturn {
            is_ref: !pv.is_temp,
            ty: pv.ty.clone(),
            value: ev.clone(),
        });
    }

    let env2 = bind_named_return_specs(cst, &code, &body_env, &ctx)?;
    let body = code.body.clone().ok_or_else(|| {
        cst.diag(CompileError::InvalidOperation(
            "invoked entry has no body".to_string(),
        ))
    })?;
    match eval_statement(cst, &body, &env2, &ctx)? {
        None | Some(Termination::Return) => Ok(()),
        Some(_) => Err(cst.diag(CompileError::InvalidOperation(
            "invalid loop exit across a call boundary".to_string(),
        ))),
    }
}

//
// statements
//

fn block_label_index(stmts: &[StmtPtr], label: &IdentifierPtr) -> Option<usize> {
    stmts.iter().position(|stmt| {
        matches!(&stmt.kind, StmtKind::Label(name) if name.name == label.name)
    })
}

pub fn eval_statement(
    cst: &CompilerState,
    stmt: &StmtPtr,
    env: &EnvPtr,
    ctx: &EvalContext,
) -> Result<Option<Termination>> {
    let _loc = cst.push_location(stmt.span);
    match &stmt.kind {
        StmtKind::Block(stmts) => {
            let mut env = env.clone();
            let mut i = 0;
            while i < stmts.len() {
                let result = eval_block_statement(cst, &stmts[i], &mut env, ctx)?;
                match result {
                    None => i += 1,
                    Some(Termination::Goto(label)) => {
                        match block_label_index(stmts, &label) {
                            Some(target) => i = target + 1,
                            None => return Ok(Some(Termination::Goto(label))),
                        }
                    }
                    other => return Ok(other),
                }
            }
            Ok(None)
        }
        StmtKind::Label(_) => Ok(None),
        StmtKind::Goto(label) => Ok(Some(Termination::Goto(label.clone()))),
        StmtKind::Return { kind: _, values } => {
            if ctx.returns.is_empty() {
                if !values.is_empty() {
                    let mpv = safe_analyze_multi(cst, values, env, 0)?;
                    crate::analyzer::ensure_arity(cst, 0, mpv.len())?;
                }
                return Ok(Some(Termination::Return));
            }
            let out = MultiEValue {
                values: ctx.returns.iter().map(|r| r.value.clone()).collect(),
            };
            let marker = eval_mark_stack(cst);
            let result = eval_multi(cst, values, env, &out, ctx.returns.len());
            eval_destroy_and_pop_stack(cst, marker);
            result?;
            Ok(Some(Termination::Return))
        }
        StmtKind::If {
            condition,
            then_part,
            else_part,
        } => {
            let marker = eval_mark_stack(cst);
            let cond_ev = eval_one_as_ref(cst, condition, env)?;
            let taken = eval_to_bool(cst, &cond_ev)?;
            eval_destroy_and_pop_stack(cst, marker);
            if taken {
                eval_statement(cst, then_part, env, ctx)
            } else if let Some(else_part) = else_part {
                eval_statement(cst, else_part, env, ctx)
            } else {
                Ok(None)
            }
        }
        StmtKind::While { condition, body } => {
            loop {
                let marker = eval_mark_stack(cst);
                let cond_ev = eval_one_as_ref(cst, condition, env)?;
                let keep_going = eval_to_bool(cst, &cond_ev)?;
                eval_destroy_and_pop_stack(cst, marker);
                if !keep_going {
                    break;
                }
                match eval_statement(cst, body, env, ctx)? {
                    None | Some(Termination::Continue) => {}
                    Some(Termination::Break) => break,
                    other => return Ok(other),
                }
            }
            Ok(None)
        }
        StmtKind::Break => Ok(Some(Termination::Break)),
        StmtKind::Continue => Ok(Some(Termination::Continue)),
        StmtKind::ExprStatement(expr) => {
            let marker = eval_mark_stack(cst);
            let result = (|| {
                let mpv = safe_analyze_expr(cst, expr, env)?;
                let mut out = MultiEValue::new();
                for pv in &mpv.values {
                    out.values.push(eval_alloc_value_for_pvalue(cst, pv)?);
                }
                eval_expr(cst, expr, env, &out)
            })();
            eval_destroy_and_pop_stack(cst, marker);
            result?;
            Ok(None)
        }
        StmtKind::Binding(binding) => {
            // Bindings inside blocks extend the environment through
            // eval_block_statement; a lone binding evaluates for effect.
            let _ = eval_binding(cst, binding, env)?;
            Ok(None)
        }
        StmtKind::Assignment { left, right } => {
            let left_pv = safe_analyze_one(cst, left, env)?;
            if left_pv.is_temp {
                return Err(cst.diag(CompileError::InvalidOperation(
                    "cannot assign to a temporary".to_string(),
                )));
            }
            let marker = eval_mark_stack(cst);
            let result = (|| {
                let left_ev = eval_one_as_ref(cst, left, env)?;
                let right_ev = eval_one_as_ref(cst, right, env)?;
                eval_value_assign(cst, &left_ev, &right_ev)
            })();
            eval_destroy_and_pop_stack(cst, marker);
            result?;
            Ok(None)
        }
        StmtKind::StaticFor {
            variable,
            values,
            body,
            clones,
            clones_initialized,
        } => {
            let marker = eval_mark_stack(cst);
            let result = (|| {
                let mev = eval_forward_multi_as_ref(cst, values, env)?;
                crate::analyzer::initialize_static_for_clones(
                    cst,
                    body,
                    clones,
                    clones_initialized,
                    mev.len(),
                );
                let clones = clones.borrow().clone();
                for (ev, clone) in mev.values.iter().zip(clones.iter()) {
                    let env2 = Env::new(env);
                    add_local(cst, &env2, variable, Object::EValue(ev.clone()))?;
                    match eval_statement(cst, clone, &env2, ctx)? {
                        None => {}
                        other => return Ok(other),
                    }
                }
                Ok(None)
            })();
            let outcome = result;
            eval_destroy_and_pop_stack(cst, marker);
            outcome
        }
        StmtKind::Throw(_) => Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            "exceptions are".to_string(),
        ))),
        StmtKind::Try { try_block, .. } => eval_statement(cst, try_block, env, ctx),
        StmtKind::StaticAssert { condition, message } => {
            evaluate_static_assert(cst, stmt.span, condition, message, env)?;
            Ok(None)
        }
        StmtKind::Unreachable => Err(cst.diag(CompileError::InvalidOperation(
            "unreachable code".to_string(),
        ))),
        StmtKind::EvalStatement(args) => {
            let exprs = desugar_eval_body(cst, args, env, stmt.span)?;
            for expr in &exprs.exprs {
                let stmt =
                    crate::ast::Statement::new(StmtKind::ExprStatement(expr.clone()), expr.span);
                match eval_statement(cst, &stmt, env, ctx)? {
                    None => {}
                    other => return Ok(other),
                }
            }
            Ok(None)
        }
        StmtKind::Foreign {
            env: foreign_env,
            statement,
        } => eval_statement(cst, statement, foreign_env, ctx),
    }
}

fn eval_block_statement(
    cst: &CompilerState,
    stmt: &StmtPtr,
    env: &mut EnvPtr,
    ctx: &EvalContext,
) -> Result<Option<Termination>> {
    match &stmt.kind {
        StmtKind::Binding(binding) => {
            *env = eval_binding(cst, binding, env)?;
            Ok(None)
        }
        _ => eval_statement(cst, stmt, env, ctx),
    }
}

//
// bindings
//

pub fn eval_binding(cst: &CompilerState, binding: &Rc<Binding>, env: &EnvPtr) -> Result<EnvPtr> {
    match binding.kind {
        BindingKind::Var | BindingKind::Ref | BindingKind::Forward => {
            let mpv = safe_analyze_multi(cst, &binding.values, env, binding.args.len())?;
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
            let static_env =
                crate::analyzer::bind_binding_patterns(cst, binding, env, &key)?;

            let values = match binding.kind {
                BindingKind::Var => {
                    // Fresh storage per bound name; the binding owns it.
                    let mut dests = MultiEValue::new();
                    for pv in &mpv.values {
                        dests.values.push(eval_alloc_value(cst, &pv.ty)?);
                    }
                    eval_multi_into(cst, &binding.values, env, &dests, binding.args.len())?;
                    dests
                }
                BindingKind::Ref => {
                    let values = eval_multi_as_ref(cst, &binding.values, env)?;
                    for (pv, _) in mpv.values.iter().zip(values.values.iter()) {
                        if pv.is_temp {
                            return Err(cst.diag(CompileError::InvalidOperation(
                                "ref binding requires an lvalue".to_string(),
                            )));
                        }
                    }
                    values
                }
                BindingKind::Forward => {
                    eval_forward_multi_as_ref(cst, &binding.values, env)?
                }
                BindingKind::Alias => unreachable!("alias handled below"),
            };

            let env2 = Env::new(&static_env);
            let var_arg_size = if binding.has_var_arg {
                key.len() + 1 - binding.args.len()
            } else {
                0
            };
            let mut value_index = 0;
            for arg in &binding.args {
                if arg.var_arg {
                    let mut var_values = MultiEValue::new();
                    for _ in 0..var_arg_size {
                        var_values
                            .values
                            .push(values.values[value_index].clone());
                        value_index += 1;
                    }
                    add_local(cst, &env2, &arg.name, Object::MultiEValue(var_values))?;
                } else {
                    add_local(
                        cst,
                        &env2,
                        &arg.name,
                        Object::EValue(values.values[value_index].clone()),
                    )?;
                    value_index += 1;
                }
            }
            Ok(env2)
        }
        BindingKind::Alias => {
            crate::analyzer::ensure_arity(cst, 1, binding.args.len())?;
            crate::analyzer::ensure_arity(cst, 1, binding.values.len())?;
            let env2 = Env::new(env);
            let wrapped = foreign_expr(env, &binding.values.exprs[0]);
            add_local(cst, &env2, &binding.args[0].name, Object::Expr(wrapped))?;
            Ok(env2)
        }
    }
}

//
// value holders from primitives
//

pub fn int_to_value_holder(cst: &CompilerState, value: i32) -> ValueHolderPtr {
    ValueHolder::with_bytes(cst.c_int_type(), value.to_le_bytes().to_vec())
}

pub fn bool_to_value_holder(cst: &CompilerState, value: bool) -> ValueHolderPtr {
    ValueHolder::with_bytes(cst.bool_type(), vec![u8::from(value)])
}

pub fn size_t_to_value_holder(cst: &CompilerState, value: u64) -> ValueHolderPtr {
    let width = cst.target.pointer_bytes as usize;
    ValueHolder::with_bytes(cst.c_size_type(), value.to_le_bytes()[..width].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_stack_marker_discipline() {
        let cst = CompilerState::new().expect("compiler state");
        let marker = eval_mark_stack(&cst);
        let ev = eval_alloc_value(&cst, &cst.int_type(32, true)).expect("alloc");
        ev_write(&cst, &ev, &42i32.to_le_bytes()).expect("write");
        assert_eq!(ev_read(&cst, &ev).expect("read"), 42i32.to_le_bytes());
        eval_destroy_and_pop_stack(&cst, marker);
        let marker2 = eval_mark_stack(&cst);
        assert_eq!(marker.values, marker2.values);
        assert_eq!(marker.mem, marker2.mem);
    }

    #[test]
    fn test_pointer_round_trip() {
        let cst = CompilerState::new().expect("compiler state");
        let marker = eval_mark_stack(&cst);
        let int_ty = cst.int_type(64, true);
        let ptr_ty = cst.pointer_type(&int_ty);
        let cell = eval_alloc_value(&cst, &ptr_ty).expect("alloc");
        write_ptr(&cst, cell.addr, 0x1234);
        assert_eq!(read_ptr(&cst, cell.addr), 0x1234);
        eval_destroy_and_pop_stack(&cst, marker);
    }
}
