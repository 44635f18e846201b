//! The pattern/unification kernel.
//!
//! Pattern cells are mutable logical variables; structural patterns mirror
//! the type constructors so a concrete type can be pulled apart against a
//! parameterized use. Unification drives both overload matching and type
//! construction. Cells are cleared by the match machinery's reset guard
//! between attempts; nothing here ever unbinds a cell on its own.

use std::cell::RefCell;
use std::rc::Rc;

use crate::analyzer::construct_type;
use crate::ast::{ExprKind, ExprListPtr, ExprPtr};
use crate::env::{add_local, safe_lookup_env, Env, EnvPtr};
use crate::error::{CompileError, Result};
use crate::evaluator::{
    evaluate_expr_static, evaluate_one_static, make_tuple_value, value_holder_elements,
};
use crate::objects::{object_equals, GlobalAliasPtr, Object, ValueHolder};
use crate::primops::is_type_constructor_code;
use crate::state::CompilerState;
use crate::types::{unwrap_static_type, TypeKind, TypePtr};

//
// pattern data
//

pub type PatternCellPtr = Rc<PatternCell>;

#[derive(Debug)]
pub struct PatternCell {
    pub obj: RefCell<Option<Object>>,
}

impl PatternCell {
    pub fn empty() -> PatternCellPtr {
        Rc::new(Self {
            obj: RefCell::new(None),
        })
    }

    pub fn bound(obj: Object) -> PatternCellPtr {
        Rc::new(Self {
            obj: RefCell::new(Some(obj)),
        })
    }
}

pub type PatternStructPtr = Rc<PatternStruct>;

#[derive(Debug)]
pub struct PatternStruct {
    /// A type constructor (overloadable primitive, record or variant
    /// declaration), or `None` for anonymous tuples.
    pub head: Option<Object>,
    pub params: MultiPattern,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Cell(PatternCellPtr),
    Struct(PatternStructPtr),
}

impl Pattern {
    pub fn cell(obj: Object) -> Pattern {
        Pattern::Cell(PatternCell::bound(obj))
    }

    pub fn structure(head: Option<Object>, params: MultiPattern) -> Pattern {
        Pattern::Struct(Rc::new(PatternStruct { head, params }))
    }
}

pub type MultiPatternCellPtr = Rc<MultiPatternCell>;

#[derive(Debug)]
pub struct MultiPatternCell {
    pub data: RefCell<Option<MultiPattern>>,
}

impl MultiPatternCell {
    pub fn empty() -> MultiPatternCellPtr {
        Rc::new(Self {
            data: RefCell::new(None),
        })
    }
}

pub type MultiPatternListPtr = Rc<MultiPatternList>;

#[derive(Debug)]
pub struct MultiPatternList {
    pub items: RefCell<Vec<Pattern>>,
    pub tail: RefCell<Option<MultiPattern>>,
}

impl MultiPatternList {
    pub fn new() -> MultiPatternListPtr {
        Rc::new(Self {
            items: RefCell::new(Vec::new()),
            tail: RefCell::new(None),
        })
    }

    pub fn from_items(items: Vec<Pattern>) -> MultiPatternListPtr {
        Rc::new(Self {
            items: RefCell::new(items),
            tail: RefCell::new(None),
        })
    }
}

#[derive(Debug, Clone)]
pub enum MultiPattern {
    Cell(MultiPatternCellPtr),
    List(MultiPatternListPtr),
}

fn multi_value_in_single_context(cst: &CompilerState) -> crate::error::Diagnostic {
    cst.diag(CompileError::PatternError(
        "incorrect usage of multi-valued pattern in single-valued context".to_string(),
    ))
}

//
// deref_deep
//

fn compute_struct(cst: &CompilerState, head: &Option<Object>, params: Vec<Object>) -> Result<Object> {
    match head {
        None => make_tuple_value(cst, &params),
        Some(head) => {
            let t = construct_type(cst, head, &params)?;
            Ok(Object::Type(t))
        }
    }
}

/// The fully-concrete object a pattern is bound to, rebuilding types from
/// structural patterns; `None` while any reachable cell is unbound.
pub fn deref_deep(cst: &CompilerState, pattern: &Pattern) -> Result<Option<Object>> {
    match pattern {
        Pattern::Cell(cell) => {
            let obj = cell.obj.borrow().clone();
            match obj {
                None => Ok(None),
                Some(Object::Pattern(inner)) => deref_deep(cst, &inner),
                Some(obj) => Ok(Some(obj)),
            }
        }
        Pattern::Struct(ps) => {
            let params = match deref_deep_multi(cst, &ps.params)? {
                None => return Ok(None),
                Some(params) => params,
            };
            Ok(Some(compute_struct(cst, &ps.head, params)?))
        }
    }
}

pub fn deref_deep_multi(cst: &CompilerState, mp: &MultiPattern) -> Result<Option<Vec<Object>>> {
    match mp {
        MultiPattern::Cell(cell) => {
            let data = cell.data.borrow().clone();
            match data {
                None => Ok(None),
                Some(inner) => deref_deep_multi(cst, &inner),
            }
        }
        MultiPattern::List(list) => {
            let mut out = Vec::new();
            let items = list.items.borrow().clone();
            for item in &items {
                match deref_deep(cst, item)? {
                    None => return Ok(None),
                    Some(obj) => out.push(obj),
                }
            }
            let tail = list.tail.borrow().clone();
            if let Some(tail) = tail {
                match deref_deep_multi(cst, &tail)? {
                    None => return Ok(None),
                    Some(rest) => out.extend(rest),
                }
            }
            Ok(Some(out))
        }
    }
}

//
// object_to_pattern
//

fn types_to_pattern_list(cst: &CompilerState, types: &[TypePtr]) -> Result<MultiPatternListPtr> {
    let mut items = Vec::with_capacity(types.len());
    for t in types {
        items.push(object_to_pattern(cst, &Object::Type(t.clone()))?);
    }
    Ok(MultiPatternList::from_items(items))
}

fn objects_to_pattern_list(cst: &CompilerState, objs: &[Object]) -> Result<MultiPatternListPtr> {
    let mut items = Vec::with_capacity(objs.len());
    for obj in objs {
        items.push(object_to_pattern(cst, obj)?);
    }
    Ok(MultiPatternList::from_items(items))
}

/// Reflect any object back into pattern form: parameterized types become
/// structural patterns headed by their constructor; everything else is a
/// cell bound to itself.
pub fn object_to_pattern(cst: &CompilerState, obj: &Object) -> Result<Pattern> {
    match obj {
        Object::Pattern(p) => Ok(p.clone()),
        Object::MultiPattern(_) => Err(multi_value_in_single_context(cst)),
        Object::ValueHolder(vh) => {
            if matches!(vh.ty.kind, TypeKind::Tuple(_)) {
                let elements = value_holder_elements(cst, vh)?;
                let params = objects_to_pattern_list(cst, &elements)?;
                return Ok(Pattern::structure(None, MultiPattern::List(params)));
            }
            Ok(Pattern::cell(obj.clone()))
        }
        Object::Type(t) => match &t.kind {
            TypeKind::Pointer(pointee) => {
                let head = Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::Pointer));
                let params = types_to_pattern_list(cst, std::slice::from_ref(pointee))?;
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::CodePointer {
                arg_types,
                return_is_ref,
                return_types,
            } => {
                let head = Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::CodePointer));
                let arg_list = types_to_pattern_list(cst, arg_types)?;
                let mut ret_items = Vec::with_capacity(return_types.len());
                for (rt, is_ref) in return_types.iter().zip(return_is_ref.iter()) {
                    let rt = if *is_ref {
                        cst.by_ref_type(rt)?
                    } else {
                        rt.clone()
                    };
                    ret_items.push(object_to_pattern(cst, &Object::Type(rt))?);
                }
                let ret_list = MultiPatternList::from_items(ret_items);
                let params = MultiPatternList::from_items(vec![
                    Pattern::structure(None, MultiPattern::List(arg_list)),
                    Pattern::structure(None, MultiPattern::List(ret_list)),
                ]);
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::CCodePointer {
                calling_conv,
                has_var_args,
                arg_types,
                return_type,
            } => {
                let head =
                    Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::ExternalCodePointer));
                let cc_param = Object::PrimOp(cst.prim_op(cst.calling_conv_attribute(*calling_conv)));
                let var_arg_param = Object::ValueHolder(bool_holder(cst, *has_var_args));
                let arg_list = types_to_pattern_list(cst, arg_types)?;
                let ret_list = match return_type {
                    Some(rt) => types_to_pattern_list(cst, std::slice::from_ref(rt))?,
                    None => MultiPatternList::new(),
                };
                let params = MultiPatternList::from_items(vec![
                    object_to_pattern(cst, &cc_param)?,
                    object_to_pattern(cst, &var_arg_param)?,
                    Pattern::structure(None, MultiPattern::List(arg_list)),
                    Pattern::structure(None, MultiPattern::List(ret_list)),
                ]);
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::Array { element, size } => {
                let head = Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::Array));
                let params = MultiPatternList::from_items(vec![
                    object_to_pattern(cst, &Object::Type(element.clone()))?,
                    Pattern::cell(Object::ValueHolder(int_holder(cst, *size as i32))),
                ]);
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::Vec { element, size } => {
                let head = Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::Vec));
                let params = MultiPatternList::from_items(vec![
                    object_to_pattern(cst, &Object::Type(element.clone()))?,
                    Pattern::cell(Object::ValueHolder(int_holder(cst, *size as i32))),
                ]);
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::Tuple(elems) => {
                let head = Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::Tuple));
                let params = types_to_pattern_list(cst, elems)?;
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::Union(members) => {
                let head = Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::Union));
                let params = types_to_pattern_list(cst, members)?;
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::Static(inner) => {
                let head = Object::PrimOp(cst.prim_op(crate::primops::PrimOpCode::Static));
                let params = MultiPatternList::from_items(vec![object_to_pattern(cst, inner)?]);
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::Record { decl, params } => {
                let head = Object::Record(decl.clone());
                let params = objects_to_pattern_list(cst, params)?;
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            TypeKind::Variant { decl, params } => {
                let head = Object::Variant(decl.clone());
                let params = objects_to_pattern_list(cst, params)?;
                Ok(Pattern::structure(Some(head), MultiPattern::List(params)))
            }
            _ => Ok(Pattern::cell(obj.clone())),
        },
        _ => Ok(Pattern::cell(obj.clone())),
    }
}

fn bool_holder(cst: &CompilerState, value: bool) -> crate::objects::ValueHolderPtr {
    ValueHolder::with_bytes(cst.bool_type(), vec![u8::from(value)])
}

fn int_holder(cst: &CompilerState, value: i32) -> crate::objects::ValueHolderPtr {
    ValueHolder::with_bytes(cst.c_int_type(), value.to_le_bytes().to_vec())
}

//
// unification
//

pub fn unify_obj_obj(cst: &CompilerState, a: &Object, b: &Object) -> Result<bool> {
    if let Object::Pattern(a2) = a {
        return unify_pattern_obj(cst, a2, b);
    }
    if matches!(a, Object::MultiPattern(_)) {
        return Err(multi_value_in_single_context(cst));
    }
    if let Object::Pattern(b2) = b {
        return unify_obj_pattern(cst, a, b2);
    }
    if matches!(b, Object::MultiPattern(_)) {
        return Err(multi_value_in_single_context(cst));
    }
    Ok(object_equals(a, b))
}

pub fn unify_obj_pattern(cst: &CompilerState, a: &Object, b: &Pattern) -> Result<bool> {
    if let Object::Pattern(a2) = a {
        return unify(cst, a2, b);
    }
    if matches!(a, Object::MultiPattern(_)) {
        return Err(multi_value_in_single_context(cst));
    }
    match b {
        Pattern::Cell(cell) => {
            let bound = cell.obj.borrow().clone();
            match bound {
                None => {
                    *cell.obj.borrow_mut() = Some(a.clone());
                    Ok(true)
                }
                Some(bound) => unify_obj_obj(cst, &bound, a),
            }
        }
        Pattern::Struct(bs) => {
            let a2 = object_to_pattern(cst, a)?;
            if let Pattern::Struct(a3) = a2 {
                if heads_equal(&a3.head, &bs.head) {
                    return unify_multi(cst, &a3.params, &bs.params);
                }
            }
            Ok(false)
        }
    }
}

pub fn unify_pattern_obj(cst: &CompilerState, a: &Pattern, b: &Object) -> Result<bool> {
    unify_obj_pattern(cst, b, a)
}

fn heads_equal(a: &Option<Object>, b: &Option<Object>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => object_equals(a, b),
        _ => false,
    }
}

pub fn unify(cst: &CompilerState, a: &Pattern, b: &Pattern) -> Result<bool> {
    if let Pattern::Cell(a2) = a {
        let bound = a2.obj.borrow().clone();
        return match bound {
            None => {
                *a2.obj.borrow_mut() = Some(Object::Pattern(b.clone()));
                Ok(true)
            }
            Some(bound) => unify_obj_pattern(cst, &bound, b),
        };
    }
    if let Pattern::Cell(b2) = b {
        let bound = b2.obj.borrow().clone();
        return match bound {
            None => {
                *b2.obj.borrow_mut() = Some(Object::Pattern(a.clone()));
                Ok(true)
            }
            Some(bound) => unify_pattern_obj(cst, a, &bound),
        };
    }
    let (Pattern::Struct(a2), Pattern::Struct(b2)) = (a, b) else {
        unreachable!("cell cases handled above");
    };
    if heads_equal(&a2.head, &b2.head) {
        return unify_multi(cst, &a2.params, &b2.params);
    }
    Ok(false)
}

/// Unify a multi-pattern against a sequence of concrete objects.
pub fn unify_multi_objs(cst: &CompilerState, a: &MultiPattern, b: &[Object]) -> Result<bool> {
    let list = objects_to_pattern_list(cst, b)?;
    unify_multi(cst, a, &MultiPattern::List(list))
}

pub fn unify_multi(cst: &CompilerState, a: &MultiPattern, b: &MultiPattern) -> Result<bool> {
    match a {
        MultiPattern::Cell(a2) => {
            let data = a2.data.borrow().clone();
            match data {
                None => {
                    *a2.data.borrow_mut() = Some(b.clone());
                    Ok(true)
                }
                Some(data) => unify_multi(cst, &data, b),
            }
        }
        MultiPattern::List(a2) => unify_multi_list_mp(cst, a2, 0, b),
    }
}

fn sub_list(list: &MultiPatternListPtr, index: usize) -> MultiPatternListPtr {
    let items = list.items.borrow()[index..].to_vec();
    let out = MultiPatternList::from_items(items);
    *out.tail.borrow_mut() = list.tail.borrow().clone();
    out
}

fn unify_multi_list_mp(
    cst: &CompilerState,
    a: &MultiPatternListPtr,
    index_a: usize,
    b: &MultiPattern,
) -> Result<bool> {
    match b {
        MultiPattern::Cell(b2) => {
            let data = b2.data.borrow().clone();
            match data {
                None => {
                    *b2.data.borrow_mut() = Some(MultiPattern::List(sub_list(a, index_a)));
                    Ok(true)
                }
                Some(data) => unify_multi_list_mp(cst, a, index_a, &data),
            }
        }
        MultiPattern::List(b2) => unify_multi_lists(cst, a, index_a, b2, 0),
    }
}

fn unify_multi_mp_list(
    cst: &CompilerState,
    a: &MultiPattern,
    b: &MultiPatternListPtr,
    index_b: usize,
) -> Result<bool> {
    unify_multi_list_mp(cst, b, index_b, a)
}

fn unify_multi_lists(
    cst: &CompilerState,
    a: &MultiPatternListPtr,
    mut index_a: usize,
    b: &MultiPatternListPtr,
    mut index_b: usize,
) -> Result<bool> {
    loop {
        let a_item = a.items.borrow().get(index_a).cloned();
        let b_item = b.items.borrow().get(index_b).cloned();
        match (a_item, b_item) {
            (Some(ai), Some(bi)) => {
                if !unify(cst, &ai, &bi)? {
                    return Ok(false);
                }
                index_a += 1;
                index_b += 1;
            }
            (Some(_), None) => {
                let b_tail = b.tail.borrow().clone();
                return match b_tail {
                    None => Ok(false),
                    Some(tail) => unify_multi_list_mp(cst, a, index_a, &tail),
                };
            }
            (None, _) => {
                let a_tail = a.tail.borrow().clone();
                return match a_tail {
                    Some(tail) => unify_multi_mp_list(cst, &tail, b, index_b),
                    None => unify_empty_list(b, index_b),
                };
            }
        }
    }
}

fn unify_empty_list(list: &MultiPatternListPtr, index: usize) -> Result<bool> {
    if index < list.items.borrow().len() {
        return Ok(false);
    }
    let tail = list.tail.borrow().clone();
    match tail {
        Some(tail) => unify_empty(&tail),
        None => Ok(true),
    }
}

pub fn unify_empty(mp: &MultiPattern) -> Result<bool> {
    match mp {
        MultiPattern::Cell(cell) => {
            let data = cell.data.borrow().clone();
            match data {
                None => {
                    *cell.data.borrow_mut() =
                        Some(MultiPattern::List(MultiPatternList::new()));
                    Ok(true)
                }
                Some(data) => unify_empty(&data),
            }
        }
        MultiPattern::List(list) => unify_empty_list(list, 0),
    }
}

//
// pattern heads
//

fn is_pattern_head(obj: &Object) -> bool {
    match obj {
        Object::PrimOp(p) => is_type_constructor_code(p.code),
        Object::Record(_) | Object::Variant(_) => true,
        _ => false,
    }
}

//
// source-level pattern evaluation
//

fn named_to_pattern(cst: &CompilerState, obj: &Object) -> Result<Pattern> {
    match obj {
        Object::Pattern(p) => Ok(p.clone()),
        Object::MultiPattern(_) => Err(multi_value_in_single_context(cst)),
        Object::GlobalAlias(alias) => {
            if alias.has_params() {
                return Ok(Pattern::cell(obj.clone()));
            }
            evaluate_one_pattern(cst, &alias.expr, &alias.env)
        }
        Object::Record(decl) => {
            if decl.has_params() {
                Ok(Pattern::cell(obj.clone()))
            } else {
                let t = cst.record_type(decl, Vec::new())?;
                Ok(Pattern::cell(Object::Type(t)))
            }
        }
        Object::Variant(decl) => {
            if decl.has_params() {
                Ok(Pattern::cell(obj.clone()))
            } else {
                let t = cst.variant_type(decl, Vec::new())?;
                Ok(Pattern::cell(Object::Type(t)))
            }
        }
        Object::EnumMember(member) => {
            let t = cst.enum_type(&member.decl);
            let holder =
                ValueHolder::with_bytes(t, (member.index as i32).to_le_bytes().to_vec());
            Ok(Pattern::cell(Object::ValueHolder(holder)))
        }
        Object::PValue(pv) => static_value_to_pattern(cst, &pv.ty),
        Object::EValue(ev) => static_value_to_pattern(cst, &ev.ty),
        _ => Ok(Pattern::cell(obj.clone())),
    }
}

fn static_value_to_pattern(cst: &CompilerState, ty: &TypePtr) -> Result<Pattern> {
    match unwrap_static_type(ty) {
        Some(obj) => Ok(Pattern::cell(obj)),
        None => Err(cst.diag(CompileError::PatternError(
            "non-static value used in pattern context".to_string(),
        ))),
    }
}

pub fn evaluate_one_pattern(cst: &CompilerState, expr: &ExprPtr, env: &EnvPtr) -> Result<Pattern> {
    let _loc = cst.push_location(expr.span);
    match &expr.kind {
        ExprKind::NameRef(name) => {
            let obj = safe_lookup_env(cst, env, name)?;
            named_to_pattern(cst, &obj)
        }
        ExprKind::Indexing { expr: head, args } => {
            let indexable = evaluate_one_static(cst, head, env)?;
            if is_pattern_head(&indexable) {
                let params = evaluate_multi_pattern(cst, args, env)?;
                return Ok(Pattern::structure(Some(indexable), params));
            }
            if let Object::GlobalAlias(alias) = &indexable {
                if alias.has_params() {
                    let params = evaluate_multi_pattern(cst, args, env)?;
                    return evaluate_alias_pattern(cst, alias, &params);
                }
            }
            Ok(Pattern::cell(evaluate_one_static(cst, expr, env)?))
        }
        ExprKind::Tuple(args) => {
            let params = evaluate_multi_pattern(cst, args, env)?;
            Ok(Pattern::structure(None, params))
        }
        _ => Ok(Pattern::cell(evaluate_one_static(cst, expr, env)?)),
    }
}

/// Expand a parameterized alias under pattern parameters: bind fresh
/// cells for the alias's own parameters, evaluate its body as a pattern,
/// then unify the fresh cells against the use-site parameters.
pub fn evaluate_alias_pattern(
    cst: &CompilerState,
    alias: &GlobalAliasPtr,
    params: &MultiPattern,
) -> Result<Pattern> {
    let args = MultiPatternList::new();
    let env = Env::new(&alias.env);
    for param in &alias.params {
        let cell = PatternCell::empty();
        args.items
            .borrow_mut()
            .push(Pattern::Cell(cell.clone()));
        add_local(
            cst,
            &env,
            param,
            Object::Pattern(Pattern::Cell(cell)),
        )?;
    }
    if let Some(var_param) = &alias.var_param {
        let multi_cell = MultiPatternCell::empty();
        *args.tail.borrow_mut() = Some(MultiPattern::Cell(multi_cell.clone()));
        add_local(
            cst,
            &env,
            var_param,
            Object::MultiPattern(MultiPattern::Cell(multi_cell)),
        )?;
    }
    let out = evaluate_one_pattern(cst, &alias.expr, &env)?;
    if !unify_multi(cst, &MultiPattern::List(args), params)? {
        return Err(cst.diag(CompileError::NonMatchingAlias));
    }
    Ok(out)
}

fn check_multi_pattern_name_ref(
    cst: &CompilerState,
    expr: &ExprPtr,
    env: &EnvPtr,
) -> Result<Option<MultiPattern>> {
    let ExprKind::NameRef(name) = &expr.kind else {
        return Ok(None);
    };
    let obj = safe_lookup_env(cst, env, name)?;
    match obj {
        Object::Pattern(_) => Err(cst.diag_at(
            expr.span,
            CompileError::PatternError(
                "single-valued pattern incorrectly used in multi-valued context".to_string(),
            ),
        )),
        Object::MultiPattern(mp) => Ok(Some(mp)),
        _ => Ok(None),
    }
}

fn trailing_pattern_error(cst: &CompilerState, expr: &ExprPtr) -> crate::error::Diagnostic {
    cst.diag_at(
        expr.span,
        CompileError::PatternError(
            "expressions cannot occur after multi-pattern variable".to_string(),
        ),
    )
}

fn append_pattern(cur: &mut Option<MultiPatternListPtr>, x: &MultiPattern) -> bool {
    match x {
        MultiPattern::Cell(cell) => {
            let data = cell.data.borrow().clone();
            if let Some(data) = data {
                return append_pattern(cur, &data);
            }
            match cur.take() {
                None => false,
                Some(list) => {
                    *list.tail.borrow_mut() = Some(x.clone());
                    true
                }
            }
        }
        MultiPattern::List(list) => {
            let items = list.items.borrow().clone();
            if !items.is_empty() {
                match cur {
                    None => return false,
                    Some(target) => target.items.borrow_mut().extend(items),
                }
            }
            let tail = list.tail.borrow().clone();
            if let Some(tail) = tail {
                return append_pattern(cur, &tail);
            }
            true
        }
    }
}

pub fn evaluate_multi_pattern(
    cst: &CompilerState,
    exprs: &ExprListPtr,
    env: &EnvPtr,
) -> Result<MultiPattern> {
    let out = MultiPatternList::new();
    let mut cur = Some(out.clone());
    for expr in &exprs.exprs {
        match &expr.kind {
            ExprKind::Unpack(inner) => {
                if let Some(mp) = check_multi_pattern_name_ref(cst, inner, env)? {
                    if !append_pattern(&mut cur, &mp) {
                        return Err(trailing_pattern_error(cst, expr));
                    }
                } else {
                    let values = evaluate_expr_static(cst, inner, env)?;
                    match &cur {
                        None if !values.is_empty() => {
                            return Err(trailing_pattern_error(cst, expr))
                        }
                        None => {}
                        Some(list) => {
                            for value in values {
                                list.items.borrow_mut().push(Pattern::cell(value));
                            }
                        }
                    }
                }
            }
            ExprKind::Paren(args) => {
                let mp = evaluate_multi_pattern(cst, args, env)?;
                if !append_pattern(&mut cur, &mp) {
                    return Err(trailing_pattern_error(cst, expr));
                }
            }
            _ => match &cur {
                None => return Err(trailing_pattern_error(cst, expr)),
                Some(list) => {
                    let p = evaluate_one_pattern(cst, expr, env)?;
                    list.items.borrow_mut().push(p);
                }
            },
        }
    }
    Ok(MultiPattern::List(out))
}
