//! Type propagation: recursion tolerance, statement analysis, bindings,
//! statically pruned conditionals.

mod common;

use std::rc::Rc;

use common::*;
use sable_compiler::error::CompileError;
use sable_compiler::types::unwrap_static_type;

#[test]
fn test_recursion_with_base_case_resolves() {
    let fx = fixture();
    let r = define_procedure(&fx, "r");
    // r(x: Int32) = if boolNot(true) { return 0; } else { return r(x); }
    // The then-branch supplies the base case; the recursive call fills in
    // on the unwind.
    let body = if_stmt(
        call_name("boolNot", vec![bool_lit(true)]),
        ret(vec![int_lit("0")]),
        Some(ret(vec![call_name("r", vec![name("x")])])),
    );
    add_overload(
        &fx,
        &r,
        code(vec![], None, vec![formal("x", Some(name("Int32")))], body),
    );

    let mpv = analyze(&fx, &call_name("r", vec![int_lit("1")])).expect("base case propagates");
    assert!(Rc::ptr_eq(&type_of_single(&mpv), &fx.cst.int_type(32, true)));
}

#[test]
fn test_recursion_without_base_case_is_fatal() {
    let fx = fixture();
    let r = define_procedure(&fx, "r");
    add_overload(
        &fx,
        &r,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Int32")))],
            ret(vec![call_name("r", vec![name("x")])]),
        ),
    );

    let err = analyze(&fx, &call_name("r", vec![int_lit("1")]))
        .expect_err("no base case anywhere");
    assert!(matches!(err.error, CompileError::RecursionWithoutBaseCase));
}

#[test]
fn test_statically_true_condition_skips_else_branch() {
    let fx = fixture();
    let f = define_procedure(&fx, "pick");
    // A runtime condition would make the branches' return types clash;
    // the static condition analyzes only the then-branch.
    let body = if_stmt(
        static_expr(bool_lit(true)),
        ret(vec![int_lit("1")]),
        Some(ret(vec![float_lit("2.0")])),
    );
    add_overload(
        &fx,
        &f,
        code(vec![], None, vec![formal("x", None)], body),
    );

    let mpv = analyze(&fx, &call_name("pick", vec![int_lit("0")])).expect("else is pruned");
    assert!(Rc::ptr_eq(&type_of_single(&mpv), &fx.cst.int_type(32, true)));
}

#[test]
fn test_runtime_condition_with_mismatched_returns_fails() {
    let fx = fixture();
    let f = define_procedure(&fx, "clash");
    let body = if_stmt(
        call_name("boolNot", vec![bool_lit(false)]),
        ret(vec![int_lit("1")]),
        Some(ret(vec![float_lit("2.0")])),
    );
    add_overload(
        &fx,
        &f,
        code(vec![], None, vec![formal("x", None)], body),
    );

    let err = analyze(&fx, &call_name("clash", vec![int_lit("0")]))
        .expect_err("both branches analyzed");
    assert!(matches!(err.error, CompileError::ArgumentError { .. }));
}

#[test]
fn test_binding_pattern_variables_bind_argument_types() {
    let fx = fixture();
    let f = define_procedure(&fx, "typeof_local");
    // var y: T = x; return #T; — T captures x's type through the binding.
    let binding = typed_var_binding(
        vec![pvar("T")],
        vec![formal("y", Some(name("T")))],
        vec![name("x")],
    );
    let body = block(vec![binding, ret(vec![static_expr(name("T"))])]);
    add_overload(
        &fx,
        &f,
        code(vec![], None, vec![formal("x", None)], body),
    );

    let mpv = analyze(&fx, &call_name("typeof_local", vec![float_lit("2.5")]))
        .expect("binding unifies");
    let inner = unwrap_static_type(&type_of_single(&mpv)).expect("static result");
    match inner {
        sable_compiler::objects::Object::Type(t) => {
            assert!(Rc::ptr_eq(&t, &fx.cst.float_type(64, false)));
        }
        other => panic!("expected a type, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_address_of_temporary_is_rejected() {
    let fx = fixture();
    let expr = sable_compiler::ast::Expr::synthetic(sable_compiler::ast::ExprKind::AddressOf(
        int_lit("1"),
    ));
    let err = analyze(&fx, &expr).expect_err("literals are temporaries");
    assert!(matches!(err.error, CompileError::AddressOfTemporary));
}

#[test]
fn test_address_of_lvalue_types_as_pointer() {
    let fx = fixture();
    let int32 = fx.cst.int_type(32, true);
    let expr = sable_compiler::ast::Expr::synthetic(sable_compiler::ast::ExprKind::AddressOf(
        pvalue_expr(&int32, false),
    ));
    let mpv = analyze(&fx, &expr).expect("lvalues have addresses");
    assert!(Rc::ptr_eq(
        &type_of_single(&mpv),
        &fx.cst.pointer_type(&int32)
    ));
}

#[test]
fn test_tuple_expression_types_natively() {
    let fx = fixture();
    let mpv = analyze(&fx, &tuple_expr(vec![int_lit("1"), bool_lit(true)]))
        .expect("tuple types");
    let t = type_of_single(&mpv);
    let expected = fx
        .cst
        .tuple_type(vec![fx.cst.int_type(32, true), fx.cst.bool_type()]);
    assert!(Rc::ptr_eq(&t, &expected));
}

#[test]
fn test_string_literals_are_static_strings() {
    let fx = fixture();
    let mpv = analyze(&fx, &string_lit("abc")).expect("strings analyze");
    let inner = unwrap_static_type(&type_of_single(&mpv)).expect("static");
    match inner {
        sable_compiler::objects::Object::Ident(ident) => assert_eq!(ident.name, "abc"),
        other => panic!("expected an identifier, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_forward_return_preserves_lvalueness() {
    let fx = fixture();
    let f = define_procedure(&fx, "fwd");
    add_overload(
        &fx,
        &f,
        code(
            vec![],
            None,
            vec![formal_tempness(
                "x",
                None,
                sable_compiler::ast::ValueTempness::Forward,
            )],
            ret_forward(vec![name("x")]),
        ),
    );

    let int32 = fx.cst.int_type(32, true);
    // Forwarded lvalue argument: the return is by reference.
    let lvalue_call = call_name("fwd", vec![pvalue_expr(&int32, false)]);
    let mpv = analyze(&fx, &lvalue_call).expect("lvalue forwards");
    assert!(!mpv.values[0].is_temp);

    // Forwarded rvalue argument: the return is by value.
    let rvalue_call = call_name("fwd", vec![int_lit("3")]);
    let mpv = analyze(&fx, &rvalue_call).expect("rvalue forwards");
    assert!(mpv.values[0].is_temp);
}

#[test]
fn test_lambda_converts_to_callable_procedure() {
    let fx = fixture();
    let lambda = sable_compiler::ast::Expr::synthetic(sable_compiler::ast::ExprKind::Lambda(
        Rc::new(sable_compiler::ast::Lambda {
            formal_args: vec![formal("x", None)],
            has_var_arg: false,
            body: ret(vec![name("x")]),
            converted: std::cell::RefCell::new(None),
            captured: std::cell::RefCell::new(Vec::new()),
        }),
    ));
    let applied = call(lambda, vec![int_lit("11")]);
    let result = eval_static(&fx, &applied).expect("lambda call evaluates");
    assert_eq!(int32_of(&fx, &result), 11);
}
