//! The invocation cache.
//!
//! Central index from `(callable identity, argument-type tuple)` to an
//! `InvokeSet`, and within each set from the tempness key to the
//! specialized `InvokeEntry`. Sets freeze their candidate list at
//! creation and consult it strictly in order through a cursor, so
//! repeated resolution is deterministic.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::ast::{deep_clone_code, CodePtr, ValueTempness};
use crate::env::EnvPtr;
use crate::error::{CompileError, Result};
use crate::matchinvoke::{match_invoke, MatchFailureReport, MatchResult, MatchSuccess};
use crate::objects::{
    object_equals, object_hash, IdentifierPtr, InlineAttribute, Object, OverloadPtr,
};
use crate::primops::is_overloadable_prim_op_code;
use crate::state::CompilerState;
use crate::types::TypePtr;

//
// table key
//

#[derive(Debug, Clone)]
pub struct InvokeKey {
    pub callable: Object,
    pub args_key: Vec<TypePtr>,
}

impl PartialEq for InvokeKey {
    fn eq(&self, other: &Self) -> bool {
        object_equals(&self.callable, &other.callable)
            && self.args_key.len() == other.args_key.len()
            && self
                .args_key
                .iter()
                .zip(other.args_key.iter())
                .all(|(a, b)| Rc::ptr_eq(a, b))
    }
}

impl Eq for InvokeKey {}

impl Hash for InvokeKey {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        object_hash(&self.callable).hash(hasher);
        for t in &self.args_key {
            (Rc::as_ptr(t) as usize).hash(hasher);
        }
    }
}

//
// invoke sets and entries
//

/// All overloads of one callable under one argument-type key, plus the
/// memoized specializations discovered so far.
#[derive(Debug)]
pub struct InvokeSet {
    pub callable: Object,
    pub args_key: Vec<TypePtr>,
    pub interface: Option<OverloadPtr>,
    /// Frozen candidate list in consult order: the callable's own
    /// overloads (newest declaration first) followed by the module-level
    /// pattern overloads.
    pub overloads: Vec<OverloadPtr>,
    pub matches: RefCell<Vec<Rc<MatchSuccess>>>,
    pub next_overload_index: Cell<usize>,
    /// Raw argument tempness to entry.
    pub tempness_map: RefCell<HashMap<Vec<ValueTempness>, Rc<InvokeEntry>>>,
    /// Resolved tempness key (forward replaced by the actual argument
    /// tempness) to entry; this is what makes distinct forwarded calls
    /// share a specialization.
    pub tempness_map2: RefCell<HashMap<Vec<ValueTempness>, Rc<InvokeEntry>>>,
    pub evaluating_predicate: Cell<bool>,
}

/// The chosen overload specialized for one (argument-type, tempness)
/// combination. Written once, except for the lazily filled analysis
/// results.
#[derive(Debug)]
pub struct InvokeEntry {
    pub parent: Weak<InvokeSet>,
    pub callable: Object,
    pub args_key: Vec<TypePtr>,
    pub forwarded_rvalue_flags: Vec<bool>,

    pub orig_code: CodePtr,
    /// Private clone of the overload body, specialized independently.
    pub code: RefCell<CodePtr>,
    pub env: EnvPtr,
    pub interface_env: Option<EnvPtr>,

    pub fixed_arg_names: Vec<IdentifierPtr>,
    pub fixed_arg_types: Vec<TypePtr>,
    pub var_arg_name: Option<IdentifierPtr>,
    pub var_arg_types: Vec<TypePtr>,
    pub var_arg_position: usize,

    pub is_inline: InlineAttribute,
    pub call_by_name: bool,

    pub analyzed: Cell<bool>,
    pub analyzing: Cell<bool>,
    pub return_is_ref: RefCell<Vec<bool>>,
    pub return_types: RefCell<Vec<TypePtr>>,
}

impl InvokeEntry {
    pub fn has_body(&self) -> bool {
        self.code.borrow().has_body()
    }
}

//
// callable overloads
//

fn init_callable(cst: &CompilerState, callable: &Object) -> Result<()> {
    if let Object::Record(decl) = callable {
        if !decl.builtin_overload_initialized.get() {
            crate::loader::init_builtin_constructor(cst, decl)?;
        }
    }
    Ok(())
}

pub fn callable_interface(callable: &Object) -> Option<OverloadPtr> {
    match callable {
        Object::Procedure(p) => p.interface.borrow().clone(),
        _ => None,
    }
}

pub fn callable_overloads(cst: &CompilerState, callable: &Object) -> Result<Vec<OverloadPtr>> {
    init_callable(cst, callable)?;
    match callable {
        Object::Type(t) => Ok(t.overloads.borrow().clone()),
        Object::Record(decl) => Ok(decl.overloads.borrow().clone()),
        Object::Variant(decl) => Ok(decl.overloads.borrow().clone()),
        Object::Procedure(p) => Ok(p.overloads.borrow().clone()),
        Object::PrimOp(p) if is_overloadable_prim_op_code(p.code) => {
            Ok(cst.prim_op(p.code).overloads.borrow().clone())
        }
        Object::GlobalAlias(alias) if alias.has_params() => Ok(alias.overloads.borrow().clone()),
        _ => Err(cst.diag(CompileError::InvalidOperation(format!(
            "invalid callable: {}",
            crate::printer::StaticName(callable)
        )))),
    }
}

//
// lookup
//

pub fn lookup_invoke_set(
    cst: &CompilerState,
    callable: &Object,
    args_key: &[TypePtr],
) -> Result<Rc<InvokeSet>> {
    let key = InvokeKey {
        callable: callable.clone(),
        args_key: args_key.to_vec(),
    };
    if let Some(set) = cst.invoke_table.borrow().get(&key) {
        return Ok(set.clone());
    }
    let interface = callable_interface(callable);
    let mut overloads = callable_overloads(cst, callable)?;
    overloads.extend(cst.pattern_overloads.borrow().iter().cloned());
    let set = Rc::new(InvokeSet {
        callable: callable.clone(),
        args_key: args_key.to_vec(),
        interface,
        overloads,
        matches: RefCell::new(Vec::new()),
        next_overload_index: Cell::new(0),
        tempness_map: RefCell::new(HashMap::new()),
        tempness_map2: RefCell::new(HashMap::new()),
        evaluating_predicate: Cell::new(false),
    });
    cst.invoke_table.borrow_mut().insert(key, set.clone());
    Ok(set)
}

/// All sets currently cached for a callable, in no particular order.
pub fn lookup_invoke_sets(cst: &CompilerState, callable: &Object) -> Vec<Rc<InvokeSet>> {
    cst.invoke_table
        .borrow()
        .values()
        .filter(|set| object_equals(&set.callable, callable))
        .cloned()
        .collect()
}

fn find_matching_invoke(
    cst: &CompilerState,
    overloads: &[OverloadPtr],
    overload_index: &mut usize,
    callable: &Object,
    args_key: &[TypePtr],
    failures: &mut MatchFailureReport,
) -> Result<Option<Rc<MatchSuccess>>> {
    while *overload_index < overloads.len() {
        let overload = overloads[*overload_index].clone();
        *overload_index += 1;
        let result = match_invoke(cst, &overload, callable, args_key)?;
        match result {
            MatchResult::Success(success) => {
                failures
                    .failures
                    .push((overload, MatchResult::Success(success.clone())));
                return Ok(Some(success));
            }
            other => failures.failures.push((overload, other)),
        }
    }
    Ok(None)
}

fn get_match(
    cst: &CompilerState,
    set: &Rc<InvokeSet>,
    entry_index: usize,
    failures: &mut MatchFailureReport,
) -> Result<Option<Rc<MatchSuccess>>> {
    if let Some(existing) = set.matches.borrow().get(entry_index) {
        return Ok(Some(existing.clone()));
    }
    debug_assert_eq!(entry_index, set.matches.borrow().len());

    let mut next_index = set.next_overload_index.get();
    let found = find_matching_invoke(
        cst,
        &set.overloads,
        &mut next_index,
        &set.callable,
        &set.args_key,
        failures,
    )?;
    match found {
        None => Ok(None),
        Some(success) => {
            set.matches.borrow_mut().push(success.clone());
            set.next_overload_index.set(next_index);
            Ok(Some(success))
        }
    }
}

//
// tempness
//

fn tempness_matches(tempness: ValueTempness, formal: ValueTempness) -> bool {
    match tempness {
        ValueTempness::LValue => matches!(
            formal,
            ValueTempness::DontCare | ValueTempness::LValue | ValueTempness::Forward
        ),
        ValueTempness::RValue => matches!(
            formal,
            ValueTempness::DontCare | ValueTempness::RValue | ValueTempness::Forward
        ),
        _ => false,
    }
}

fn tempness_key_item(formal: ValueTempness, tempness: ValueTempness) -> ValueTempness {
    match formal {
        ValueTempness::Forward => tempness,
        other => other,
    }
}

/// Check the call's argument tempness against the overload's parameter
/// policies; on success, produce the resolved tempness key and the
/// forwarded-rvalue flags.
fn match_tempness(
    cst: &CompilerState,
    code: &CodePtr,
    args_tempness: &[ValueTempness],
    call_by_name: bool,
) -> Result<Option<(Vec<ValueTempness>, Vec<bool>)>> {
    let formal_args = &code.formal_args;
    let var_arg_size = if code.has_var_arg {
        args_tempness.len() + 1 - formal_args.len()
    } else {
        0
    };

    let mut tempness_key = Vec::with_capacity(args_tempness.len());
    let mut forwarded_rvalue_flags = Vec::with_capacity(args_tempness.len());

    let mut arg_index = 0;
    for formal in formal_args.iter() {
        if call_by_name && formal.tempness == ValueTempness::Forward {
            return Err(cst.diag_at(
                formal.span,
                CompileError::InvalidOperation(
                    "forwarded arguments are not allowed in call-by-name procedures".to_string(),
                ),
            ));
        }
        let count = if formal.var_arg { var_arg_size } else { 1 };
        for _ in 0..count {
            let tempness = args_tempness[arg_index];
            if !tempness_matches(tempness, formal.tempness) {
                return Ok(None);
            }
            tempness_key.push(tempness_key_item(formal.tempness, tempness));
            forwarded_rvalue_flags.push(
                formal.tempness == ValueTempness::Forward && tempness == ValueTempness::RValue,
            );
            arg_index += 1;
        }
    }
    Ok(Some((tempness_key, forwarded_rvalue_flags)))
}

fn new_invoke_entry(
    set: &Rc<InvokeSet>,
    success: &MatchSuccess,
    interface_match: Option<&Rc<MatchSuccess>>,
    forwarded_rvalue_flags: Vec<bool>,
) -> Rc<InvokeEntry> {
    Rc::new(InvokeEntry {
        parent: Rc::downgrade(set),
        callable: success.callable.clone(),
        args_key: success.args_key.clone(),
        forwarded_rvalue_flags,
        orig_code: success.overload.code.clone(),
        code: RefCell::new(deep_clone_code(&success.overload.code)),
        env: success.env.clone(),
        interface_env: interface_match.map(|m| m.env.clone()),
        fixed_arg_names: success.fixed_arg_names.clone(),
        fixed_arg_types: success.fixed_arg_types.clone(),
        var_arg_name: success.var_arg_name.clone(),
        var_arg_types: success.var_arg_types.clone(),
        var_arg_position: success.var_arg_position,
        is_inline: success.overload.is_inline,
        call_by_name: success.overload.call_by_name,
        analyzed: Cell::new(false),
        analyzing: Cell::new(false),
        return_is_ref: RefCell::new(Vec::new()),
        return_types: RefCell::new(Vec::new()),
    })
}

struct ClearEvaluatingPredicate {
    set: Rc<InvokeSet>,
}

impl Drop for ClearEvaluatingPredicate {
    fn drop(&mut self) {
        debug_assert!(self.set.evaluating_predicate.get());
        self.set.evaluating_predicate.set(false);
    }
}

/// Resolve `(callable, args_key, args_tempness)` to a memoized entry.
/// `Ok(None)` means no overload matched; the per-candidate reasons are
/// in `failures`.
pub fn lookup_invoke_entry(
    cst: &CompilerState,
    callable: &Object,
    args_key: &[TypePtr],
    args_tempness: &[ValueTempness],
    failures: &mut MatchFailureReport,
) -> Result<Option<Rc<InvokeEntry>>> {
    let set = lookup_invoke_set(cst, callable, args_key)?;

    if set.evaluating_predicate.get() {
        // A predicate under evaluation resolved the same call signature.
        return Err(cst.diag(CompileError::PredicateLoop));
    }
    set.evaluating_predicate.set(true);
    let _clear = ClearEvaluatingPredicate { set: set.clone() };

    if let Some(entry) = set.tempness_map.borrow().get(args_tempness) {
        return Ok(Some(entry.clone()));
    }

    let interface_match = match &set.interface {
        Some(interface) => {
            let result = match_invoke(cst, interface, callable, args_key)?;
            match result {
                MatchResult::Success(success) => Some(success),
                other => {
                    failures.failed_interface = true;
                    failures.failures.push((interface.clone(), other));
                    return Ok(None);
                }
            }
        }
        None => None,
    };

    let mut chosen = None;
    let mut entry_index = 0;
    while let Some(success) = get_match(cst, &set, entry_index, failures)? {
        let overload_code = &success.overload.code;
        if let Some((tempness_key, flags)) = match_tempness(
            cst,
            overload_code,
            args_tempness,
            success.overload.call_by_name,
        )? {
            chosen = Some((success, tempness_key, flags));
            break;
        }
        entry_index += 1;
    }
    let Some((success, tempness_key, forwarded_rvalue_flags)) = chosen else {
        return Ok(None);
    };

    if let Some(entry) = set.tempness_map2.borrow().get(&tempness_key) {
        set.tempness_map
            .borrow_mut()
            .insert(args_tempness.to_vec(), entry.clone());
        return Ok(Some(entry.clone()));
    }

    let entry = new_invoke_entry(
        &set,
        &success,
        interface_match.as_ref(),
        forwarded_rvalue_flags,
    );
    set.tempness_map2
        .borrow_mut()
        .insert(tempness_key, entry.clone());
    set.tempness_map
        .borrow_mut()
        .insert(args_tempness.to_vec(), entry.clone());

    if cst.final_overloads_enabled() {
        // Keep scanning: a later non-default match makes the call
        // ambiguous instead of silently losing.
        let mut scan_index = set.next_overload_index.get();
        loop {
            let later = find_matching_invoke(
                cst,
                &set.overloads,
                &mut scan_index,
                callable,
                args_key,
                failures,
            )?;
            match later {
                None => break,
                Some(later_match) => {
                    let matches_tempness = match_tempness(
                        cst,
                        &later_match.overload.code,
                        args_tempness,
                        later_match.overload.call_by_name,
                    )?
                    .is_some();
                    if matches_tempness {
                        if !later_match.overload.is_default {
                            failures.ambiguous = true;
                            return Ok(None);
                        }
                        break;
                    }
                }
            }
        }
    }

    Ok(Some(entry))
}
