//! Overload resolution end to end: matching, predicates, tempness
//! memoization, dispatch fan-out, pattern-targeted overloads.

mod common;

use std::rc::Rc;

use common::*;
use sable_compiler::analyzer::safe_analyze_callable;
use sable_compiler::ast::ValueTempness;
use sable_compiler::error::CompileError;
use sable_compiler::objects::Object;

#[test]
fn test_polymorphic_identity_analysis_and_evaluation() {
    let fx = fixture();
    let id = define_procedure(&fx, "id");
    add_overload(
        &fx,
        &id,
        code(vec![], None, vec![formal("x", None)], ret(vec![name("x")])),
    );

    // Resolution produces an entry with returnTypes = [Int32] by value.
    let int32 = fx.cst.int_type(32, true);
    let entry = safe_analyze_callable(
        &fx.cst,
        &Object::Procedure(id.clone()),
        &[int32.clone()],
        &[ValueTempness::RValue],
    )
    .expect("id(Int32) resolves");
    assert_eq!(entry.return_types.borrow().len(), 1);
    assert!(Rc::ptr_eq(&entry.return_types.borrow()[0], &int32));
    assert_eq!(*entry.return_is_ref.borrow(), vec![false]);

    // Evaluation of id(42) produces 42 : Int32.
    let result = eval_static(&fx, &call_name("id", vec![int_lit("42")])).expect("evaluates");
    assert_eq!(int32_of(&fx, &result), 42);
}

#[test]
fn test_predicate_filtered_overloads() {
    let fx = fixture();
    let f = define_procedure(&fx, "f");

    // f(x:T) when TypeSize(T) == 4 -> 1
    let size_is = |n: &str| {
        call_name(
            "integerEqualsP",
            vec![
                call_name("TypeSize", vec![name("T")]),
                int_lit_typed(n, "u64"),
            ],
        )
    };
    add_overload(
        &fx,
        &f,
        code(
            vec![pvar("T")],
            Some(size_is("4")),
            vec![formal("x", Some(name("T")))],
            ret(vec![int_lit("1")]),
        ),
    );
    // f(x:T) when TypeSize(T) == 8 -> 2
    add_overload(
        &fx,
        &f,
        code(
            vec![pvar("T")],
            Some(size_is("8")),
            vec![formal("x", Some(name("T")))],
            ret(vec![int_lit("2")]),
        ),
    );

    let with_int = eval_static(&fx, &call_name("f", vec![int_lit("5")])).expect("f(Int32)");
    assert_eq!(int32_of(&fx, &with_int), 1);

    let with_float = eval_static(&fx, &call_name("f", vec![float_lit("2.5")])).expect("f(Float64)");
    assert_eq!(int32_of(&fx, &with_float), 2);
}

#[test]
fn test_no_matching_overload_reports_all_candidates() {
    let fx = fixture();
    let f = define_procedure(&fx, "f");
    add_overload(
        &fx,
        &f,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Bool")))],
            ret(vec![int_lit("1")]),
        ),
    );
    add_overload(
        &fx,
        &f,
        code(
            vec![],
            None,
            vec![
                formal("x", Some(name("Int32"))),
                formal("y", Some(name("Int32"))),
            ],
            ret(vec![int_lit("2")]),
        ),
    );

    let err = analyze(&fx, &call_name("f", vec![float_lit("1.5")])).expect_err("no match");
    match &err.error {
        CompileError::NoMatchingOverload {
            failures,
            failed_interface,
            ..
        } => {
            assert_eq!(failures.len(), 2);
            assert!(!failed_interface);
        }
        other => panic!("expected a match failure report, got {:?}", other),
    }
}

#[test]
fn test_repeated_resolution_returns_same_entry() {
    let fx = fixture();
    let f = define_procedure(&fx, "f");
    add_overload(
        &fx,
        &f,
        code(vec![], None, vec![formal("x", None)], ret(vec![name("x")])),
    );

    let key = [fx.cst.int_type(32, true)];
    let tempness = [ValueTempness::RValue];
    let callable = Object::Procedure(f);
    let first = safe_analyze_callable(&fx.cst, &callable, &key, &tempness).expect("resolves");
    let second = safe_analyze_callable(&fx.cst, &callable, &key, &tempness).expect("resolves");
    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn test_tempness_forwarding_splits_entries_on_one_type_key() {
    let fx = fixture();
    let g = define_procedure(&fx, "g");
    add_overload(
        &fx,
        &g,
        code(
            vec![],
            None,
            vec![formal_tempness("x", None, ValueTempness::Forward)],
            ret(vec![int_lit("0")]),
        ),
    );

    let int32 = fx.cst.int_type(32, true);
    let callable = Object::Procedure(g);
    let with_rvalue = safe_analyze_callable(
        &fx.cst,
        &callable,
        std::slice::from_ref(&int32),
        &[ValueTempness::RValue],
    )
    .expect("rvalue call resolves");
    let with_lvalue = safe_analyze_callable(
        &fx.cst,
        &callable,
        std::slice::from_ref(&int32),
        &[ValueTempness::LValue],
    )
    .expect("lvalue call resolves");

    assert_eq!(*with_rvalue.forwarded_rvalue_flags, vec![true]);
    assert_eq!(*with_lvalue.forwarded_rvalue_flags, vec![false]);
    assert!(!Rc::ptr_eq(&with_rvalue, &with_lvalue));
    assert!(Rc::ptr_eq(
        &with_rvalue.args_key[0],
        &with_lvalue.args_key[0]
    ));
}

#[test]
fn test_dispatch_analyzes_all_variant_members() {
    let fx = fixture();
    let v = define_variant(&fx, "V", vec![name("Int32"), name("Float64")]);
    let d = define_procedure(&fx, "d");
    add_overload(
        &fx,
        &d,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Int32")))],
            ret(vec![int_lit("1")]),
        ),
    );
    add_overload(
        &fx,
        &d,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Float64")))],
            ret(vec![int_lit("2")]),
        ),
    );

    let variant_ty = fx.cst.variant_type(&v, Vec::new()).expect("variant type");
    let arg = dispatch_expr(pvalue_expr(&variant_ty, false));
    let mpv = analyze(&fx, &call_name("d", vec![arg])).expect("dispatch unifies");
    assert!(Rc::ptr_eq(&type_of_single(&mpv), &fx.cst.int_type(32, true)));
}

#[test]
fn test_dispatch_result_mismatch_is_reported() {
    let fx = fixture();
    let v = define_variant(&fx, "V", vec![name("Int32"), name("Float64")]);
    let d = define_procedure(&fx, "d");
    add_overload(
        &fx,
        &d,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Int32")))],
            ret(vec![int_lit("1")]),
        ),
    );
    add_overload(
        &fx,
        &d,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Float64")))],
            ret(vec![bool_lit(true)]),
        ),
    );

    let variant_ty = fx.cst.variant_type(&v, Vec::new()).expect("variant type");
    let arg = dispatch_expr(pvalue_expr(&variant_ty, false));
    let err = analyze(&fx, &call_name("d", vec![arg])).expect_err("arm types disagree");
    assert!(matches!(
        err.error,
        CompileError::MismatchingDispatchResults(_)
    ));
}

#[test]
fn test_variadic_overload_consumes_trailing_arguments() {
    let fx = fixture();
    let v = define_procedure(&fx, "first");
    add_overload(
        &fx,
        &v,
        code(
            vec![pvar_multi("Ts")],
            None,
            vec![
                formal("x", Some(name("Int32"))),
                formal_var_arg("rest", Some(name("Ts"))),
            ],
            ret(vec![name("x")]),
        ),
    );

    let result = eval_static(
        &fx,
        &call_name(
            "first",
            vec![int_lit("7"), float_lit("1.5"), bool_lit(true)],
        ),
    )
    .expect("variadic call evaluates");
    assert_eq!(int32_of(&fx, &result), 7);
}

#[test]
fn test_pattern_targeted_overload_applies_to_any_callable() {
    let fx = fixture();
    let h = define_procedure(&fx, "h");
    // overload P(x: Int32) with P a pattern variable: attaches to the
    // module-wide pattern overload list and matches any callable.
    let target = name("P");
    let overload = sable_compiler::objects::Overload::new(
        target,
        sable_compiler::ast::Code::new(
            vec![pvar("P")],
            None,
            vec![formal("x", Some(name("Int32")))],
            Some(ret(vec![int_lit("7")])),
        ),
        fx.env.clone(),
    );
    sable_compiler::loader::init_overload(&fx.cst, &overload).expect("pattern overload installs");
    assert!(overload.name_is_pattern.get());

    let result = eval_static(&fx, &call_name("h", vec![int_lit("0")])).expect("pattern overload");
    assert_eq!(int32_of(&fx, &result), 7);
    let _ = h;
}

#[test]
fn test_final_overloads_mode_reports_ambiguity() {
    let fx = fixture();
    let f = define_procedure(&fx, "amb");
    add_overload(
        &fx,
        &f,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Int32")))],
            ret(vec![int_lit("1")]),
        ),
    );
    add_overload(
        &fx,
        &f,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Int32")))],
            ret(vec![int_lit("2")]),
        ),
    );

    fx.cst.set_final_overloads_enabled(true);
    let err = analyze(&fx, &call_name("amb", vec![int_lit("1")])).expect_err("ambiguous");
    assert!(matches!(err.error, CompileError::AmbiguousCall(_)));
    fx.cst.set_final_overloads_enabled(false);

    // First-match-wins is the default regime.
    let result = eval_static(&fx, &call_name("amb", vec![int_lit("1")])).expect("resolves");
    assert_eq!(int32_of(&fx, &result), 2);
}

#[test]
fn test_native_record_construction_and_field_access() {
    let fx = fixture();
    define_record(&fx, "Point", vec![("x", name("Int32")), ("y", name("Int32"))]);

    let point = call_name("Point", vec![int_lit("3"), int_lit("4")]);
    let y = field_ref(point, "y");
    let result = eval_static(&fx, &y).expect("field access evaluates");
    assert_eq!(int32_of(&fx, &result), 4);
}

#[test]
fn test_predicate_loop_is_detected() {
    let fx = fixture();
    let f = define_procedure(&fx, "looping");
    // looping(x: Int32) when looping(0) == 0 — the predicate resolves
    // the same signature it is guarding.
    let predicate = call_name(
        "integerEqualsP",
        vec![call_name("looping", vec![int_lit("0")]), int_lit("0")],
    );
    add_overload(
        &fx,
        &f,
        code(
            vec![],
            Some(predicate),
            vec![formal("x", Some(name("Int32")))],
            ret(vec![int_lit("1")]),
        ),
    );

    let err = analyze(&fx, &call_name("looping", vec![int_lit("1")]))
        .expect_err("predicate re-enters its own invoke set");
    assert!(matches!(err.error, CompileError::PredicateLoop));
}

#[test]
fn test_constructor_overload_must_return_its_type() {
    let fx = fixture();
    define_record(&fx, "Box", vec![("v", name("Int32"))]);
    // overload Box(x: Bool) returning Int32 instead of Box.
    let box_ty_expr = name("Box");
    let overload = sable_compiler::objects::Overload::new(
        box_ty_expr,
        sable_compiler::ast::Code::new(
            vec![],
            None,
            vec![formal("x", Some(name("Bool")))],
            Some(ret(vec![int_lit("1")])),
        ),
        fx.env.clone(),
    );
    sable_compiler::loader::init_overload(&fx.cst, &overload).expect("constructor installs");

    let err = analyze(&fx, &call_name("Box", vec![bool_lit(true)]))
        .expect_err("constructor must return Box");
    assert!(matches!(err.error, CompileError::InterfaceMismatch(_)));
}

#[test]
fn test_static_call_output_types_reflects_entry() {
    let fx = fixture();
    let f = define_procedure(&fx, "twice");
    add_overload(
        &fx,
        &f,
        code(
            vec![],
            None,
            vec![formal("x", Some(name("Int32")))],
            ret(vec![name("x"), name("x")]),
        ),
    );

    let probe = call_name(
        "StaticCallOutputTypes",
        vec![name("twice"), name("Int32")],
    );
    let mpv = analyze(&fx, &probe).expect("output types compute");
    assert_eq!(mpv.len(), 2);
    for pv in &mpv.values {
        let inner = sable_compiler::types::unwrap_static_type(&pv.ty).expect("static type");
        match inner {
            Object::Type(t) => assert!(Rc::ptr_eq(&t, &fx.cst.int_type(32, true))),
            other => panic!("expected a type, got {:?}", other.kind_name()),
        }
    }
}

#[test]
fn test_interface_constrains_overload_returns() {
    let fx = fixture();
    // define sized(x): Int32; — the interface declares one Int32 return.
    let proc = sable_compiler::objects::Procedure::new(ident("sized"));
    let interface = sable_compiler::objects::Overload::new(
        obj_expr(Object::Procedure(proc.clone())),
        sable_compiler::ast::Code::with_return_specs(
            vec![],
            None,
            vec![formal("x", None)],
            vec![sable_compiler::ast::ReturnSpec {
                type_expr: name("Int32"),
                name: None,
            }],
            None,
            None,
        ),
        fx.env.clone(),
    );
    *proc.interface.borrow_mut() = Some(interface);
    sable_compiler::env::add_global(
        &fx.cst,
        &fx.module,
        &ident("sized"),
        sable_compiler::objects::Visibility::Public,
        Object::Procedure(proc.clone()),
    )
    .expect("procedure installs");

    add_overload(
        &fx,
        &proc,
        code(
            vec![],
            None,
            vec![formal("x", None)],
            ret(vec![bool_lit(true)]),
        ),
    );

    let err = analyze(&fx, &call_name("sized", vec![int_lit("1")]))
        .expect_err("overload violates the interface");
    assert!(matches!(err.error, CompileError::InterfaceMismatch(_)));
}
