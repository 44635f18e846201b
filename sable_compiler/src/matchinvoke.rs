//! Matching one overload against a call signature.
//!
//! A match binds the overload's pattern variables by unifying its target
//! and argument patterns against the callable and the argument-type key,
//! then evaluates the overload's predicate in the bound environment.
//! Every failure mode carries enough detail for the resolver to report
//! all attempted candidates.

use std::rc::Rc;

use crate::ast::{Expr, ExprKind, ExprList, FormalArgPtr, PatternVar};
use crate::env::{add_local, Env, EnvPtr};
use crate::error::{CompileError, Result};
use crate::evaluator::evaluate_bool;
use crate::objects::{
    IdentifierPtr, Object, OverloadPatterns, OverloadPtr, PatternsState,
};
use crate::patterns::{
    deref_deep, deref_deep_multi, evaluate_multi_pattern, evaluate_one_pattern, unify_multi_objs,
    unify_pattern_obj, MultiPattern, MultiPatternCell, MultiPatternCellPtr, Pattern, PatternCell,
    PatternCellPtr,
};
use crate::printer::{render_args_key, StaticName, TypeName};
use crate::state::CompilerState;
use crate::types::TypePtr;

#[derive(Debug)]
pub struct MatchSuccess {
    pub overload: OverloadPtr,
    /// The overload's environment extended with the bound pattern
    /// variables.
    pub env: EnvPtr,
    pub callable: Object,
    pub args_key: Vec<TypePtr>,
    pub fixed_arg_names: Vec<IdentifierPtr>,
    pub fixed_arg_types: Vec<TypePtr>,
    pub var_arg_name: Option<IdentifierPtr>,
    pub var_arg_types: Vec<TypePtr>,
    pub var_arg_position: usize,
}

#[derive(Debug)]
pub enum MatchResult {
    Success(Rc<MatchSuccess>),
    /// The overload's target pattern did not match the callable.
    CallableError {
        callable: Object,
    },
    ArityError {
        expected: usize,
        got: usize,
        variadic: bool,
    },
    ArgumentError {
        arg_index: usize,
        ty: TypePtr,
        arg: FormalArgPtr,
    },
    MultiArgumentError {
        arg_index: usize,
        types: Vec<TypePtr>,
    },
    PredicateError,
}

impl MatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Render one candidate's failure reason for the bundled report.
pub fn render_match_error(result: &MatchResult) -> String {
    match result {
        MatchResult::Success(_) => "matched".to_string(),
        MatchResult::CallableError { callable } => format!(
            "callable pattern did not match \"{}\"",
            StaticName(callable)
        ),
        MatchResult::ArityError {
            expected,
            got,
            variadic,
        } => {
            let at_least = if *variadic { "at least " } else { "" };
            format!(
                "incorrect number of arguments: expected {}{} arguments, got {} arguments",
                at_least, expected, got
            )
        }
        MatchResult::ArgumentError { arg_index, ty, arg } => format!(
            "pattern for parameter \"{}\" did not match type \"{}\" of argument {}",
            arg.name.name,
            TypeName(ty),
            arg_index + 1
        ),
        MatchResult::MultiArgumentError { arg_index, types } => {
            let rendered: Vec<String> =
                types.iter().map(|t| TypeName(t).to_string()).collect();
            format!(
                "variadic argument type pattern did not match types ({}) starting at argument {}",
                rendered.join(", "),
                arg_index + 1
            )
        }
        MatchResult::PredicateError => "predicate failed".to_string(),
    }
}

/// Bind fresh cells for a pattern-variable list into `pattern_env`.
pub fn initialize_pattern_env(
    cst: &CompilerState,
    pattern_env: &EnvPtr,
    pvars: &[PatternVar],
    cells: &mut Vec<Option<PatternCellPtr>>,
    multi_cells: &mut Vec<Option<MultiPatternCellPtr>>,
) -> Result<()> {
    for pvar in pvars {
        if pvar.is_multi {
            let cell = MultiPatternCell::empty();
            multi_cells.push(Some(cell.clone()));
            cells.push(None);
            add_local(
                cst,
                pattern_env,
                &pvar.name,
                Object::MultiPattern(MultiPattern::Cell(cell)),
            )?;
        } else {
            let cell = PatternCell::empty();
            cells.push(Some(cell.clone()));
            multi_cells.push(None);
            add_local(
                cst,
                pattern_env,
                &pvar.name,
                Object::Pattern(Pattern::Cell(cell)),
            )?;
        }
    }
    Ok(())
}

fn initialize_patterns(cst: &CompilerState, overload: &OverloadPtr) -> Result<()> {
    match &*overload.patterns.borrow() {
        PatternsState::Ready(_) => return Ok(()),
        PatternsState::Initializing => {
            return Err(cst.diag_at(overload.span, CompileError::RecursivePatternInit))
        }
        PatternsState::Uninitialized => {}
    }
    *overload.patterns.borrow_mut() = PatternsState::Initializing;

    let mut cells = Vec::new();
    let mut multi_cells = Vec::new();
    let pattern_env = Env::new(&overload.env);
    initialize_pattern_env(
        cst,
        &pattern_env,
        &overload.code.pattern_vars,
        &mut cells,
        &mut multi_cells,
    )?;

    let callable_pattern = evaluate_one_pattern(cst, &overload.target, &pattern_env)?;

    let mut arg_patterns = Vec::with_capacity(overload.code.formal_args.len());
    let mut var_arg_pattern = None;
    for arg in &overload.code.formal_args {
        match &arg.type_expr {
            Some(type_expr) => {
                if arg.var_arg {
                    let unpack =
                        Expr::new(ExprKind::Unpack(type_expr.clone()), type_expr.span);
                    var_arg_pattern = Some(evaluate_multi_pattern(
                        cst,
                        &ExprList::single(unpack),
                        &pattern_env,
                    )?);
                    arg_patterns.push(None);
                } else {
                    arg_patterns.push(Some(evaluate_one_pattern(cst, type_expr, &pattern_env)?));
                }
            }
            None => arg_patterns.push(None),
        }
    }

    *overload.patterns.borrow_mut() = PatternsState::Ready(OverloadPatterns {
        cells,
        multi_cells,
        callable_pattern,
        arg_patterns,
        var_arg_pattern,
    });
    Ok(())
}

/// Clears a pattern-variable cell set. Dropped on every exit path from a
/// match attempt so the same overload can be retried against different
/// arguments.
struct PatternReseter {
    cells: Vec<Option<PatternCellPtr>>,
    multi_cells: Vec<Option<MultiPatternCellPtr>>,
    armed: bool,
}

impl PatternReseter {
    fn new(
        cells: Vec<Option<PatternCellPtr>>,
        multi_cells: Vec<Option<MultiPatternCellPtr>>,
    ) -> Self {
        Self {
            cells,
            multi_cells,
            armed: true,
        }
    }

    fn reset(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        for cell in self.cells.iter().flatten() {
            *cell.obj.borrow_mut() = None;
        }
        for cell in self.multi_cells.iter().flatten() {
            *cell.data.borrow_mut() = None;
        }
    }
}

impl Drop for PatternReseter {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Match one overload against `(callable, args_key)`.
pub fn match_invoke(
    cst: &CompilerState,
    overload: &OverloadPtr,
    callable: &Object,
    args_key: &[TypePtr],
) -> Result<MatchResult> {
    initialize_patterns(cst, overload)?;

    // Clone the cell handles out so no borrow of the overload's pattern
    // state is held across predicate evaluation, which may re-enter the
    // resolver.
    let (cells, multi_cells, callable_pattern, arg_patterns, var_arg_pattern) = {
        let patterns = overload.patterns.borrow();
        let PatternsState::Ready(p) = &*patterns else {
            unreachable!("patterns initialized above");
        };
        (
            p.cells.clone(),
            p.multi_cells.clone(),
            p.callable_pattern.clone(),
            p.arg_patterns.clone(),
            p.var_arg_pattern.clone(),
        )
    };

    let mut reseter = PatternReseter::new(cells.clone(), multi_cells.clone());

    if !unify_pattern_obj(cst, &callable_pattern, callable)? {
        return Ok(MatchResult::CallableError {
            callable: callable.clone(),
        });
    }

    let code = &overload.code;
    let formal_args = &code.formal_args;
    if code.has_var_arg {
        if args_key.len() + 1 < formal_args.len() {
            return Ok(MatchResult::ArityError {
                expected: formal_args.len() - 1,
                got: args_key.len(),
                variadic: true,
            });
        }
    } else if formal_args.len() != args_key.len() {
        return Ok(MatchResult::ArityError {
            expected: formal_args.len(),
            got: args_key.len(),
            variadic: false,
        });
    }

    let var_arg_size = if code.has_var_arg {
        args_key.len() + 1 - formal_args.len()
    } else {
        0
    };
    let mut key_index = 0;
    for (i, arg) in formal_args.iter().enumerate() {
        if arg.var_arg {
            let types = args_key[key_index..key_index + var_arg_size].to_vec();
            if let Some(pattern) = &var_arg_pattern {
                let objs: Vec<Object> =
                    types.iter().map(|t| Object::Type(t.clone())).collect();
                if !unify_multi_objs(cst, pattern, &objs)? {
                    return Ok(MatchResult::MultiArgumentError {
                        arg_index: key_index,
                        types,
                    });
                }
            }
            key_index += var_arg_size;
        } else {
            if let Some(pattern) = &arg_patterns[i] {
                let arg_type = &args_key[key_index];
                if !unify_pattern_obj(cst, pattern, &Object::Type(arg_type.clone()))? {
                    return Ok(MatchResult::ArgumentError {
                        arg_index: key_index,
                        ty: arg_type.clone(),
                        arg: arg.clone(),
                    });
                }
            }
            key_index += 1;
        }
    }

    let static_env = Env::new(&overload.env);
    for (i, pvar) in code.pattern_vars.iter().enumerate() {
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

    // The predicate may resolve further calls that retry this same
    // overload, so the cells must be clear before it runs.
    reseter.reset();

    if let Some(predicate) = &code.predicate {
        if !evaluate_bool(cst, predicate, &static_env)? {
            return Ok(MatchResult::PredicateError);
        }
    }

    let mut fixed_arg_names = Vec::new();
    let mut fixed_arg_types = Vec::new();
    let mut var_arg_name = None;
    let mut var_arg_types = Vec::new();
    let mut var_arg_position = formal_args.len();
    let mut key_index = 0;
    for arg in formal_args.iter() {
        if arg.var_arg {
            var_arg_name = Some(arg.name.clone());
            var_arg_position = fixed_arg_names.len();
            var_arg_types = args_key[key_index..key_index + var_arg_size].to_vec();
            key_index += var_arg_size;
        } else {
            fixed_arg_names.push(arg.name.clone());
            fixed_arg_types.push(args_key[key_index].clone());
            key_index += 1;
        }
    }
    if !code.has_var_arg {
        var_arg_position = fixed_arg_names.len();
    }

    Ok(MatchResult::Success(Rc::new(MatchSuccess {
        overload: overload.clone(),
        env: static_env,
        callable: callable.clone(),
        args_key: args_key.to_vec(),
        fixed_arg_names,
        fixed_arg_types,
        var_arg_name,
        var_arg_types,
        var_arg_position,
    })))
}

/// The bundled "tried N candidates" failure report.
#[derive(Debug, Default)]
pub struct MatchFailureReport {
    pub failures: Vec<(OverloadPtr, MatchResult)>,
    pub failed_interface: bool,
    pub ambiguous: bool,
}

impl MatchFailureReport {
    pub fn into_error(
        self,
        cst: &CompilerState,
        callable: &Object,
        args_key: &[TypePtr],
    ) -> crate::error::Diagnostic {
        if self.ambiguous {
            return cst.diag(CompileError::AmbiguousCall(render_args_key(
                callable, args_key,
            )));
        }
        let failures = self
            .failures
            .iter()
            .map(|(_, result)| render_match_error(result))
            .collect();
        cst.diag(CompileError::NoMatchingOverload {
            callable: render_args_key(callable, args_key),
            failures,
            failed_interface: self.failed_interface,
        })
    }
}
