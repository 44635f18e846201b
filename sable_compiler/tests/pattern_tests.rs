//! The unification kernel through its public surface: structural
//! patterns over constructed types, pattern variables in overload
//! signatures, alias patterns, multi-pattern tails.

mod common;

use std::rc::Rc;

use common::*;
use sable_compiler::env::{add_local, Env};
use sable_compiler::objects::{GlobalAlias, Object, Visibility};
use sable_compiler::patterns::{
    deref_deep, evaluate_one_pattern, unify_pattern_obj, Pattern, PatternCell,
};

#[test]
fn test_pointer_pattern_binds_pointee() {
    let fx = fixture();
    // Evaluate the source pattern Pointer[T] with T a fresh cell.
    let cell = PatternCell::empty();
    let env = Env::new(&fx.env);
    add_local(
        &fx.cst,
        &env,
        &ident("T"),
        Object::Pattern(Pattern::Cell(cell.clone())),
    )
    .expect("pattern variable binds");
    let pattern = evaluate_one_pattern(
        &fx.cst,
        &indexing(name("Pointer"), vec![name("T")]),
        &env,
    )
    .expect("pattern evaluates");

    let int32 = fx.cst.int_type(32, true);
    let ptr_i32 = fx.cst.pointer_type(&int32);
    let matched = unify_pattern_obj(&fx.cst, &pattern, &Object::Type(ptr_i32))
        .expect("unification runs");
    assert!(matched);

    let bound = deref_deep(&fx.cst, &Pattern::Cell(cell.clone()))
        .expect("deref runs")
        .expect("T is bound");
    match bound {
        Object::Type(t) => assert!(Rc::ptr_eq(&t, &int32)),
        other => panic!("expected a type, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_failed_unification_then_reset_allows_retry() {
    let fx = fixture();
    let cell = PatternCell::empty();
    let env = Env::new(&fx.env);
    add_local(
        &fx.cst,
        &env,
        &ident("T"),
        Object::Pattern(Pattern::Cell(cell.clone())),
    )
    .expect("pattern variable binds");
    let pattern = evaluate_one_pattern(
        &fx.cst,
        &indexing(name("Pointer"), vec![name("T")]),
        &env,
    )
    .expect("pattern evaluates");

    // A non-pointer type does not match, and unification reports it.
    let bool_ty = fx.cst.bool_type();
    let matched = unify_pattern_obj(&fx.cst, &pattern, &Object::Type(bool_ty))
        .expect("unification runs");
    assert!(!matched);

    // The reset discipline clears the cell for the next attempt, and a
    // second attempt binds the same way as the first (idempotence).
    *cell.obj.borrow_mut() = None;
    let int64 = fx.cst.int_type(64, true);
    let ptr = fx.cst.pointer_type(&int64);
    assert!(unify_pattern_obj(&fx.cst, &pattern, &Object::Type(ptr.clone()))
        .expect("unification runs"));
    let first = deref_deep(&fx.cst, &Pattern::Cell(cell.clone()))
        .expect("deref runs")
        .expect("bound");

    *cell.obj.borrow_mut() = None;
    assert!(unify_pattern_obj(&fx.cst, &pattern, &Object::Type(ptr))
        .expect("unification runs"));
    let second = deref_deep(&fx.cst, &Pattern::Cell(cell))
        .expect("deref runs")
        .expect("bound");
    assert!(sable_compiler::objects::object_equals(&first, &second));
}

#[test]
fn test_overload_on_constructed_type_extracts_parameters() {
    let fx = fixture();
    let elem = define_procedure(&fx, "elem_type");
    // elem_type(x: Pointer[T]) = #T
    add_overload(
        &fx,
        &elem,
        code(
            vec![pvar("T")],
            None,
            vec![formal("x", Some(indexing(name("Pointer"), vec![name("T")])))],
            ret(vec![static_expr(name("T"))]),
        ),
    );

    let int32 = fx.cst.int_type(32, true);
    let ptr = fx.cst.pointer_type(&int32);
    let mpv = analyze(&fx, &call_name("elem_type", vec![pvalue_expr(&ptr, false)]))
        .expect("pattern overload matches");
    let inner = sable_compiler::types::unwrap_static_type(&type_of_single(&mpv))
        .expect("static result");
    match inner {
        Object::Type(t) => assert!(Rc::ptr_eq(&t, &int32)),
        other => panic!("expected a type, got {:?}", other.kind_name()),
    }

    // Calling with a non-pointer reports an argument mismatch.
    let err = analyze(&fx, &call_name("elem_type", vec![bool_lit(true)]))
        .expect_err("Bool does not unify with Pointer[T]");
    assert!(matches!(
        err.error,
        sable_compiler::error::CompileError::NoMatchingOverload { .. }
    ));
}

#[test]
fn test_alias_pattern_expands_through_the_alias_body() {
    let fx = fixture();
    // alias Pair[T] = Tuple[T, T];
    let pair = GlobalAlias::parameterized(
        ident("Pair"),
        vec![ident("T")],
        None,
        indexing(name("Tuple"), vec![name("T"), name("T")]),
        fx.env.clone(),
    );
    sable_compiler::env::add_global(
        &fx.cst,
        &fx.module,
        &ident("Pair"),
        Visibility::Public,
        Object::GlobalAlias(pair),
    )
    .expect("alias installs");

    let both = define_procedure(&fx, "pair_elem");
    // pair_elem(x: Pair[T]) = #T
    add_overload(
        &fx,
        &both,
        code(
            vec![pvar("T")],
            None,
            vec![formal("x", Some(indexing(name("Pair"), vec![name("T")])))],
            ret(vec![static_expr(name("T"))]),
        ),
    );

    let int32 = fx.cst.int_type(32, true);
    let matching = fx.cst.tuple_type(vec![int32.clone(), int32.clone()]);
    let mpv = analyze(
        &fx,
        &call_name("pair_elem", vec![pvalue_expr(&matching, false)]),
    )
    .expect("alias pattern matches Tuple[Int32, Int32]");
    let inner = sable_compiler::types::unwrap_static_type(&type_of_single(&mpv))
        .expect("static result");
    match inner {
        Object::Type(t) => assert!(Rc::ptr_eq(&t, &int32)),
        other => panic!("expected a type, got {:?}", other.kind_name()),
    }

    // Tuple[Int32, Bool] does not unify: both positions share T.
    let mixed = fx.cst.tuple_type(vec![int32, fx.cst.bool_type()]);
    let err = analyze(
        &fx,
        &call_name("pair_elem", vec![pvalue_expr(&mixed, false)]),
    )
    .expect_err("mismatched pair");
    assert!(matches!(
        err.error,
        sable_compiler::error::CompileError::NoMatchingOverload { .. }
    ));
}

#[test]
fn test_multi_pattern_variable_captures_argument_tail() {
    let fx = fixture();
    let rest = define_procedure(&fx, "rest_types");
    // rest_types(x: Int32, ..rest: Ts) = Tuple type of the tail
    add_overload(
        &fx,
        &rest,
        code(
            vec![pvar_multi("Ts")],
            None,
            vec![
                formal("x", Some(name("Int32"))),
                formal_var_arg("r", Some(name("Ts"))),
            ],
            ret(vec![static_expr(indexing(
                name("Tuple"),
                vec![sable_compiler::ast::Expr::synthetic(
                    sable_compiler::ast::ExprKind::Unpack(name("Ts")),
                )],
            ))]),
        ),
    );

    let mpv = analyze(
        &fx,
        &call_name(
            "rest_types",
            vec![int_lit("1"), float_lit("2.0"), bool_lit(true)],
        ),
    )
    .expect("variadic pattern matches");
    let inner = sable_compiler::types::unwrap_static_type(&type_of_single(&mpv))
        .expect("static result");
    let expected = fx
        .cst
        .tuple_type(vec![fx.cst.float_type(64, false), fx.cst.bool_type()]);
    match inner {
        Object::Type(t) => assert!(Rc::ptr_eq(&t, &expected)),
        other => panic!("expected a type, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_parameterized_record_constructor_binds_parameters() {
    let fx = fixture();
    // record Cell[T] { value: T } — the synthesized constructor binds T
    // from the field argument and returns Cell[T].
    let decl = sable_compiler::objects::RecordDecl::new(
        ident("Cell"),
        vec![ident("T")],
        None,
        vec![sable_compiler::objects::RecordField {
            name: ident("value"),
            type_expr: name("T"),
        }],
        fx.env.clone(),
    );
    sable_compiler::env::add_global(
        &fx.cst,
        &fx.module,
        &ident("Cell"),
        Visibility::Public,
        Object::Record(decl.clone()),
    )
    .expect("record installs");

    let mpv = analyze(&fx, &call_name("Cell", vec![int_lit("5")]))
        .expect("constructor specializes");
    let t = type_of_single(&mpv);
    let expected = fx
        .cst
        .record_type(
            &decl,
            vec![Object::Type(fx.cst.int_type(32, true))],
        )
        .expect("record type");
    assert!(Rc::ptr_eq(&t, &expected));
}

#[test]
fn test_tuple_values_unify_with_anonymous_struct_patterns() {
    let fx = fixture();
    // A tuple of statics explodes into an anonymous structural pattern,
    // so (T, T) in pattern position can take it apart.
    let take_pair = define_procedure(&fx, "static_pair");
    add_overload(
        &fx,
        &take_pair,
        code(
            vec![pvar("T")],
            None,
            vec![formal(
                "x",
                Some(indexing(
                    name("Static"),
                    vec![tuple_expr(vec![name("T"), name("T")])],
                )),
            )],
            ret(vec![static_expr(name("T"))]),
        ),
    );

    let pair = static_expr(tuple_expr(vec![name("Int8"), name("Int8")]));
    let mpv = analyze(&fx, &call_name("static_pair", vec![pair]))
        .expect("static tuple unifies");
    let inner = sable_compiler::types::unwrap_static_type(&type_of_single(&mpv))
        .expect("static result");
    match inner {
        Object::Type(t) => assert!(Rc::ptr_eq(&t, &fx.cst.int_type(8, true))),
        other => panic!("expected a type, got {:?}", other.kind_name()),
    }
}
