//! Shared fixtures: a compiler with a main module wired to the
//! primitives module, plus AST builders in the shape the front end
//! produces.

#![allow(dead_code)]

use std::rc::Rc;

use sable_compiler::analyzer::{MultiPValue, PValue};
use sable_compiler::ast::{
    Binding, BindingKind, Code, CodePtr, Expr, ExprKind, ExprList, ExprListPtr, ExprPtr,
    FormalArg, FormalArgPtr, PatternVar, ReturnKind, Statement, StmtKind, StmtPtr,
    ValueTempness,
};
use sable_compiler::env::{Env, EnvPtr};
use sable_compiler::error::Result;
use sable_compiler::loader;
use sable_compiler::objects::{
    Identifier, IdentifierPtr, Import, Module, ModulePtr, Object, Overload, OverloadPtr,
    Procedure, ProcedurePtr, RecordDecl, RecordDeclPtr, RecordField, VariantDecl,
    VariantDeclPtr, Visibility,
};
use sable_compiler::state::CompilerState;
use sable_compiler::types::TypePtr;

pub struct Fixture {
    pub cst: CompilerState,
    pub module: ModulePtr,
    pub env: EnvPtr,
}

/// A compiler plus a main module star-importing `__primitives__`.
pub fn fixture() -> Fixture {
    let cst = CompilerState::new().expect("compiler state");
    let module = Module::new("main");
    module
        .imports
        .borrow_mut()
        .push(Import::star("__primitives__"));
    cst.set_main_module(&module);
    loader::init_module(&cst, &module).expect("main module initializes");
    let env = Env::for_module(&module);
    Fixture { cst, module, env }
}

//
// identifiers and expressions
//

pub fn ident(name: &str) -> IdentifierPtr {
    Identifier::get(name)
}

pub fn name(n: &str) -> ExprPtr {
    Expr::synthetic(ExprKind::NameRef(ident(n)))
}

pub fn int_lit(value: &str) -> ExprPtr {
    Expr::synthetic(ExprKind::IntLiteral {
        value: value.to_string(),
        suffix: None,
    })
}

pub fn int_lit_typed(value: &str, suffix: &str) -> ExprPtr {
    Expr::synthetic(ExprKind::IntLiteral {
        value: value.to_string(),
        suffix: Some(suffix.to_string()),
    })
}

pub fn float_lit(value: &str) -> ExprPtr {
    Expr::synthetic(ExprKind::FloatLiteral {
        value: value.to_string(),
        suffix: None,
    })
}

pub fn bool_lit(value: bool) -> ExprPtr {
    Expr::synthetic(ExprKind::BoolLiteral(value))
}

pub fn string_lit(value: &str) -> ExprPtr {
    Expr::synthetic(ExprKind::StringLiteral(value.to_string()))
}

pub fn obj_expr(obj: Object) -> ExprPtr {
    Expr::synthetic(ExprKind::ObjectExpr(obj))
}

pub fn pvalue_expr(ty: &TypePtr, is_temp: bool) -> ExprPtr {
    obj_expr(Object::PValue(PValue::new(ty.clone(), is_temp)))
}

pub fn call(callee: ExprPtr, args: Vec<ExprPtr>) -> ExprPtr {
    Expr::synthetic(ExprKind::Call {
        expr: callee,
        args: ExprList::new(args),
    })
}

pub fn call_name(callee: &str, args: Vec<ExprPtr>) -> ExprPtr {
    call(name(callee), args)
}

pub fn indexing(head: ExprPtr, args: Vec<ExprPtr>) -> ExprPtr {
    Expr::synthetic(ExprKind::Indexing {
        expr: head,
        args: ExprList::new(args),
    })
}

pub fn field_ref(base: ExprPtr, field: &str) -> ExprPtr {
    Expr::synthetic(ExprKind::FieldRef {
        expr: base,
        name: ident(field),
    })
}

pub fn tuple_expr(elements: Vec<ExprPtr>) -> ExprPtr {
    Expr::synthetic(ExprKind::Tuple(ExprList::new(elements)))
}

pub fn static_expr(inner: ExprPtr) -> ExprPtr {
    Expr::synthetic(ExprKind::StaticExpr(inner))
}

pub fn dispatch_expr(inner: ExprPtr) -> ExprPtr {
    Expr::synthetic(ExprKind::DispatchExpr(inner))
}

//
// statements
//

pub fn block(stmts: Vec<StmtPtr>) -> StmtPtr {
    Statement::synthetic(StmtKind::Block(stmts))
}

pub fn ret(values: Vec<ExprPtr>) -> StmtPtr {
    Statement::synthetic(StmtKind::Return {
        kind: ReturnKind::Value,
        values: ExprList::new(values),
    })
}

pub fn ret_forward(values: Vec<ExprPtr>) -> StmtPtr {
    Statement::synthetic(StmtKind::Return {
        kind: ReturnKind::Forward,
        values: ExprList::new(values),
    })
}

pub fn if_stmt(condition: ExprPtr, then_part: StmtPtr, else_part: Option<StmtPtr>) -> StmtPtr {
    Statement::synthetic(StmtKind::If {
        condition,
        then_part,
        else_part,
    })
}

pub fn while_stmt(condition: ExprPtr, body: StmtPtr) -> StmtPtr {
    Statement::synthetic(StmtKind::While { condition, body })
}

pub fn expr_stmt(expr: ExprPtr) -> StmtPtr {
    Statement::synthetic(StmtKind::ExprStatement(expr))
}

pub fn assign(left: ExprPtr, right: ExprPtr) -> StmtPtr {
    Statement::synthetic(StmtKind::Assignment { left, right })
}

pub fn var_binding(names: Vec<&str>, values: Vec<ExprPtr>) -> StmtPtr {
    let args: Vec<FormalArgPtr> = names
        .into_iter()
        .map(|n| FormalArg::new(ident(n), None))
        .collect();
    Statement::synthetic(StmtKind::Binding(Rc::new(Binding {
        kind: BindingKind::Var,
        pattern_vars: Vec::new(),
        predicate: None,
        has_var_arg: args.iter().any(|a| a.var_arg),
        args,
        values: ExprList::new(values),
    })))
}

pub fn typed_var_binding(
    pattern_vars: Vec<PatternVar>,
    args: Vec<FormalArgPtr>,
    values: Vec<ExprPtr>,
) -> StmtPtr {
    Statement::synthetic(StmtKind::Binding(Rc::new(Binding {
        kind: BindingKind::Var,
        pattern_vars,
        predicate: None,
        has_var_arg: args.iter().any(|a| a.var_arg),
        args,
        values: ExprList::new(values),
    })))
}

//
// formal arguments and code
//

pub fn formal(n: &str, type_expr: Option<ExprPtr>) -> FormalArgPtr {
    FormalArg::new(ident(n), type_expr)
}

pub fn formal_tempness(
    n: &str,
    type_expr: Option<ExprPtr>,
    tempness: ValueTempness,
) -> FormalArgPtr {
    FormalArg::with_tempness(ident(n), type_expr, tempness)
}

pub fn formal_var_arg(n: &str, type_expr: Option<ExprPtr>) -> FormalArgPtr {
    FormalArg::var_arg(ident(n), type_expr)
}

pub fn pvar(n: &str) -> PatternVar {
    PatternVar::single(ident(n))
}

pub fn pvar_multi(n: &str) -> PatternVar {
    PatternVar::multi(ident(n))
}

pub fn code(
    pattern_vars: Vec<PatternVar>,
    predicate: Option<ExprPtr>,
    args: Vec<FormalArgPtr>,
    body: StmtPtr,
) -> CodePtr {
    Code::new(pattern_vars, predicate, args, Some(body))
}

//
// definitions
//

pub fn define_procedure(fx: &Fixture, n: &str) -> ProcedurePtr {
    let proc = Procedure::new(ident(n));
    sable_compiler::env::add_global(
        &fx.cst,
        &fx.module,
        &ident(n),
        Visibility::Public,
        Object::Procedure(proc.clone()),
    )
    .expect("global installs");
    proc
}

/// Add one overload to a procedure through the loader, the way module
/// initialization installs overload declarations.
pub fn add_overload(fx: &Fixture, proc: &ProcedurePtr, overload_code: CodePtr) -> OverloadPtr {
    let target = obj_expr(Object::Procedure(proc.clone()));
    let overload = Overload::new(target, overload_code, fx.env.clone());
    loader::init_overload(&fx.cst, &overload).expect("overload installs");
    overload
}

pub fn define_record(
    fx: &Fixture,
    n: &str,
    fields: Vec<(&str, ExprPtr)>,
) -> RecordDeclPtr {
    let fields = fields
        .into_iter()
        .map(|(field_name, type_expr)| RecordField {
            name: ident(field_name),
            type_expr,
        })
        .collect();
    let decl = RecordDecl::new(ident(n), Vec::new(), None, fields, fx.env.clone());
    sable_compiler::env::add_global(
        &fx.cst,
        &fx.module,
        &ident(n),
        Visibility::Public,
        Object::Record(decl.clone()),
    )
    .expect("record installs");
    decl
}

pub fn define_variant(fx: &Fixture, n: &str, members: Vec<ExprPtr>) -> VariantDeclPtr {
    let decl = VariantDecl::new(ident(n), Vec::new(), None, false, members, fx.env.clone());
    sable_compiler::env::add_global(
        &fx.cst,
        &fx.module,
        &ident(n),
        Visibility::Public,
        Object::Variant(decl.clone()),
    )
    .expect("variant installs");
    decl
}

//
// analysis/evaluation shortcuts
//

pub fn analyze(fx: &Fixture, expr: &ExprPtr) -> Result<MultiPValue> {
    sable_compiler::analyzer::safe_analyze_expr(&fx.cst, expr, &fx.env)
}

pub fn eval_static(fx: &Fixture, expr: &ExprPtr) -> Result<Object> {
    sable_compiler::evaluator::evaluate_one_static(&fx.cst, expr, &fx.env)
}

pub fn int32_of(fx: &Fixture, obj: &Object) -> i32 {
    match obj {
        Object::ValueHolder(vh) => {
            assert!(
                Rc::ptr_eq(&vh.ty, &fx.cst.c_int_type()),
                "expected Int32, got {:?}",
                vh.ty
            );
            vh.as_i32()
        }
        other => panic!("expected a value, got {:?}", other.kind_name()),
    }
}

pub fn type_of_single(mpv: &MultiPValue) -> TypePtr {
    assert_eq!(mpv.len(), 1, "expected one value, got {:?}", mpv);
    mpv.values[0].ty.clone()
}
