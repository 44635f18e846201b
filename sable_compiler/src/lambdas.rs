//! Lambda conversion.
//!
//! A lambda literal becomes an anonymous procedure with a single
//! overload whose environment is the lambda's defining environment, so
//! the body resolves captured names by scope chaining. The free-variable
//! census (via `lookup_env_ex`) is recorded for the code generator,
//! which needs to know which names cross the closure boundary.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::ast::{Expr, ExprKind, Lambda, StmtKind, StmtPtr};
use crate::env::{lookup_env_ex, EnvPtr};
use crate::error::Result;
use crate::objects::{Identifier, Object, Overload, Procedure};
use crate::state::CompilerState;

/// Convert once and cache on the lambda node.
pub fn convert_lambda(
    cst: &CompilerState,
    lambda: &Rc<Lambda>,
    env: &EnvPtr,
) -> Result<Object> {
    if let Some(converted) = lambda.converted.borrow().clone() {
        return Ok(converted);
    }

    let mut captured = BTreeSet::new();
    collect_free_names(cst, &lambda.body, env, &mut captured)?;
    // Parameters are bound inside the body environment, never captured.
    for arg in &lambda.formal_args {
        captured.remove(&arg.name.name);
    }

    let proc = Procedure::new(Identifier::get("<lambda>"));
    let target = Expr::synthetic(ExprKind::ObjectExpr(Object::Procedure(proc.clone())));
    let code = crate::ast::Code::new(
        Vec::new(),
        None,
        lambda.formal_args.clone(),
        Some(lambda.body.clone()),
    );
    let overload = Overload::new(target, code, env.clone());
    proc.overloads.borrow_mut().push(overload);
    proc.single_overload.set(true);

    let converted = Object::Procedure(proc);
    *lambda.converted.borrow_mut() = Some(converted.clone());
    *lambda.captured.borrow_mut() = captured.into_iter().collect();
    Ok(converted)
}

/// Walk the lambda body for name references that resolve outside the
/// lambda and below module scope: those are the captures.
fn collect_free_names(
    cst: &CompilerState,
    stmt: &StmtPtr,
    env: &EnvPtr,
    out: &mut BTreeSet<String>,
) -> Result<()> {
    visit_statement(stmt, &mut |expr| {
        if let ExprKind::NameRef(name) = &expr.kind {
            if let Ok((_, is_non_local, is_global)) =
                lookup_env_ex(cst, env, name, Some(env))
            {
                if is_non_local && !is_global {
                    out.insert(name.name.clone());
                }
            }
        }
    });
    Ok(())
}

fn visit_statement(stmt: &StmtPtr, f: &mut impl FnMut(&crate::ast::ExprPtr)) {
    match &stmt.kind {
        StmtKind::Block(stmts) => {
            for s in stmts {
                visit_statement(s, f);
            }
        }
        StmtKind::Return { values, .. } => {
            for e in &values.exprs {
                visit_expr(e, f);
            }
        }
        StmtKind::If {
            condition,
            then_part,
            else_part,
        } => {
            visit_expr(condition, f);
            visit_statement(then_part, f);
            if let Some(else_part) = else_part {
                visit_statement(else_part, f);
            }
        }
        StmtKind::While { condition, body } => {
            visit_expr(condition, f);
            visit_statement(body, f);
        }
        StmtKind::ExprStatement(e) => visit_expr(e, f),
        StmtKind::Binding(binding) => {
            for e in &binding.values.exprs {
                visit_expr(e, f);
            }
        }
        StmtKind::Assignment { left, right } => {
            visit_expr(left, f);
            visit_expr(right, f);
        }
        StmtKind::StaticFor { values, body, .. } => {
            for e in &values.exprs {
                visit_expr(e, f);
            }
            visit_statement(body, f);
        }
        StmtKind::Throw(Some(e)) => visit_expr(e, f),
        StmtKind::Try {
            try_block,
            catch_block,
        } => {
            visit_statement(try_block, f);
            if let Some(catch_block) = catch_block {
                visit_statement(catch_block, f);
            }
        }
        StmtKind::StaticAssert { condition, message } => {
            visit_expr(condition, f);
            for e in &message.exprs {
                visit_expr(e, f);
            }
        }
        StmtKind::EvalStatement(args) => {
            for e in &args.exprs {
                visit_expr(e, f);
            }
        }
        StmtKind::Foreign { statement, .. } => visit_statement(statement, f),
        _ => {}
    }
}

fn visit_expr(expr: &crate::ast::ExprPtr, f: &mut impl FnMut(&crate::ast::ExprPtr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Tuple(args)
        | ExprKind::Paren(args)
        | ExprKind::EvalExpr(args) => {
            for e in &args.exprs {
                visit_expr(e, f);
            }
        }
        ExprKind::Indexing { expr: head, args } | ExprKind::Call { expr: head, args } => {
            visit_expr(head, f);
            for e in &args.exprs {
                visit_expr(e, f);
            }
        }
        ExprKind::FieldRef { expr: inner, .. }
        | ExprKind::StaticIndexing { expr: inner, .. }
        | ExprKind::AddressOf(inner)
        | ExprKind::Dereference(inner)
        | ExprKind::Unpack(inner)
        | ExprKind::StaticExpr(inner)
        | ExprKind::DispatchExpr(inner) => visit_expr(inner, f),
        ExprKind::And { left, right } | ExprKind::Or { left, right } => {
            visit_expr(left, f);
            visit_expr(right, f);
        }
        ExprKind::Lambda(inner) => visit_statement(&inner.body, f),
        ExprKind::Foreign { expr: inner, .. } => visit_expr(inner, f),
        _ => {}
    }
}
