//! Compile-time evaluation: checked arithmetic, control flow,
//! memoization, aggregates, rejected runtime operations.

mod common;


use common::*;
use sable_compiler::error::CompileError;
use sable_compiler::objects::Object;

#[test]
fn test_checked_add_overflow_message() {
    let fx = fixture();
    let overflowing = call_name(
        "integerAddChecked",
        vec![int_lit_typed("100", "i8"), int_lit_typed("100", "i8")],
    );
    let err = eval_static(&fx, &overflowing).expect_err("Int8 overflow");
    assert_eq!(
        err.error,
        CompileError::IntegerOverflow("100 + 100".to_string())
    );

    let fitting = call_name(
        "integerAddChecked",
        vec![int_lit_typed("10", "i8"), int_lit_typed("20", "i8")],
    );
    let result = eval_static(&fx, &fitting).expect("fits in Int8");
    match result {
        Object::ValueHolder(vh) => assert_eq!(vh.buf.borrow()[0], 30),
        other => panic!("expected a value, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_checked_division_errors() {
    let fx = fixture();
    let div_zero = call_name(
        "integerQuotientChecked",
        vec![int_lit("1"), int_lit("0")],
    );
    let err = eval_static(&fx, &div_zero).expect_err("division by zero");
    assert_eq!(err.error, CompileError::DivisionByZero);

    let min_negate = call_name(
        "integerQuotientChecked",
        vec![int_lit("-2147483648"), int_lit("-1")],
    );
    let err = eval_static(&fx, &min_negate).expect_err("MIN / -1 overflows");
    assert!(matches!(err.error, CompileError::IntegerOverflow(_)));
}

#[test]
fn test_checked_shift_rejections() {
    let fx = fixture();
    let bad_shift = call_name(
        "integerShiftLeftChecked",
        vec![int_lit("1"), int_lit("-1")],
    );
    let err = eval_static(&fx, &bad_shift).expect_err("negative shift");
    assert!(matches!(err.error, CompileError::InvalidShift(_)));

    let ok_shift = call_name(
        "integerShiftLeftChecked",
        vec![int_lit("3"), int_lit("4")],
    );
    let result = eval_static(&fx, &ok_shift).expect("shift fits");
    assert_eq!(int32_of(&fx, &result), 48);
}

#[test]
fn test_while_loop_with_assignment() {
    let fx = fixture();
    let f = define_procedure(&fx, "count_to_ten");
    // var i = 0; while (i < 10) { i = i + 1; } return i;
    let body = block(vec![
        var_binding(vec!["i"], vec![int_lit("0")]),
        while_stmt(
            call_name("integerLesserP", vec![name("i"), int_lit("10")]),
            block(vec![assign(
                name("i"),
                call_name("numericAdd", vec![name("i"), int_lit("1")]),
            )]),
        ),
        ret(vec![name("i")]),
    ]);
    add_overload(&fx, &f, code(vec![], None, vec![formal("x", None)], body));

    let result = eval_static(&fx, &call_name("count_to_ten", vec![int_lit("0")]))
        .expect("loop evaluates");
    assert_eq!(int32_of(&fx, &result), 10);
}

#[test]
fn test_memoized_procedure_caches_on_static_arguments() {
    let fx = fixture();
    let memo = define_procedure(&fx, "memo?");
    // The body produces a runtime value, so each call actually evaluates
    // (fully static results never reach the evaluator at all).
    add_overload(
        &fx,
        &memo,
        code(vec![], None, vec![formal("x", None)], ret(vec![int_lit("7")])),
    );

    let call_expr = || call_name("memo?", vec![static_expr(int_lit("5"))]);
    let first = eval_static(&fx, &call_expr()).expect("first call");
    let second = eval_static(&fx, &call_expr()).expect("second call");
    assert_eq!(int32_of(&fx, &first), 7);
    assert!(sable_compiler::objects::object_equals(&first, &second));
    assert_eq!(memo.evaluator_cache.borrow().len(), 1);
}

#[test]
fn test_numeric_convert_and_checked_convert() {
    let fx = fixture();
    // Unchecked conversion truncates like C.
    let truncated = call_name(
        "numericConvert",
        vec![name("UInt8"), int_lit("257")],
    );
    let result = eval_static(&fx, &truncated).expect("conversion truncates");
    match result {
        Object::ValueHolder(vh) => assert_eq!(vh.buf.borrow()[0], 1),
        other => panic!("expected a value, got {:?}", other.kind_name()),
    }

    // Checked conversion detects out-of-range.
    let out_of_range = call_name(
        "integerConvertChecked",
        vec![name("UInt8"), int_lit("257")],
    );
    let err = eval_static(&fx, &out_of_range).expect_err("257 does not fit UInt8");
    assert!(matches!(err.error, CompileError::IntegerOverflow(_)));
}

#[test]
fn test_bitcast_size_and_alignment_rules() {
    let fx = fixture();
    let widening = call_name("bitcast", vec![name("UInt64"), int_lit("1")]);
    let err = eval_static(&fx, &widening).expect_err("cannot widen through bitcast");
    assert!(matches!(err.error, CompileError::InvalidBitcast(_)));

    let reinterpret = call_name("bitcast", vec![name("UInt32"), int_lit("-1")]);
    let result = eval_static(&fx, &reinterpret).expect("same-size bitcast");
    match result {
        Object::ValueHolder(vh) => {
            assert_eq!(*vh.buf.borrow(), vec![0xff, 0xff, 0xff, 0xff]);
        }
        other => panic!("expected a value, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_tuple_construction_and_static_indexing() {
    let fx = fixture();
    let tuple = tuple_expr(vec![int_lit("10"), int_lit("20")]);
    let second = sable_compiler::ast::Expr::synthetic(
        sable_compiler::ast::ExprKind::StaticIndexing {
            expr: tuple,
            index: 1,
        },
    );
    let result = eval_static(&fx, &second).expect("tuple projection");
    assert_eq!(int32_of(&fx, &result), 20);
}

#[test]
fn test_variant_injection_and_dispatch_evaluation() {
    let fx = fixture();
    let v = define_variant(&fx, "V", vec![name("Int32"), name("Float64")]);
    let d = define_procedure(&fx, "tagof");
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

    // Inject an Int32 into V natively, then dispatch on it.
    let injected = call_name("V", vec![int_lit("5")]);
    let dispatched = call_name("tagof", vec![dispatch_expr(injected)]);
    let result = eval_static(&fx, &dispatched).expect("dispatch picks the active member");
    assert_eq!(int32_of(&fx, &result), 1);
    let _ = v;
}

#[test]
fn test_static_assert_failure_carries_message() {
    let fx = fixture();
    let f = define_procedure(&fx, "asserts");
    let body = block(vec![
        sable_compiler::ast::Statement::synthetic(sable_compiler::ast::StmtKind::StaticAssert {
            condition: bool_lit(false),
            message: sable_compiler::ast::ExprList::single(string_lit("broken invariant")),
        }),
        ret(vec![int_lit("0")]),
    ]);
    add_overload(&fx, &f, code(vec![], None, vec![formal("x", None)], body));

    let err = eval_static(&fx, &call_name("asserts", vec![int_lit("0")]))
        .expect_err("assert fails");
    assert_eq!(
        err.error,
        CompileError::StaticAssertFailed(Some("#\"broken invariant\"".to_string()))
    );
}

#[test]
fn test_throw_is_rejected_at_compile_time() {
    let fx = fixture();
    let f = define_procedure(&fx, "throws");
    // The throw hides behind a runtime condition so analysis still sees
    // the return and gives the entry a result type.
    let body = block(vec![
        if_stmt(
            call_name("boolNot", vec![bool_lit(false)]),
            sable_compiler::ast::Statement::synthetic(sable_compiler::ast::StmtKind::Throw(
                None,
            )),
            None,
        ),
        ret(vec![int_lit("0")]),
    ]);
    add_overload(&fx, &f, code(vec![], None, vec![formal("x", None)], body));

    let err = eval_static(&fx, &call_name("throws", vec![int_lit("0")]))
        .expect_err("exceptions have no compile-time semantics");
    assert!(matches!(
        err.error,
        CompileError::UnsupportedAtCompileTime(_)
    ));
}

#[test]
fn test_goto_jumps_within_a_block() {
    let fx = fixture();
    let f = define_procedure(&fx, "skipper");
    // var i = 1; if (true-ish) goto done; i = 99; done: return i;
    let body = block(vec![
        var_binding(vec!["i"], vec![int_lit("1")]),
        if_stmt(
            call_name("boolNot", vec![bool_lit(false)]),
            sable_compiler::ast::Statement::synthetic(sable_compiler::ast::StmtKind::Goto(
                ident("done"),
            )),
            None,
        ),
        assign(name("i"), int_lit("99")),
        sable_compiler::ast::Statement::synthetic(sable_compiler::ast::StmtKind::Label(ident(
            "done",
        ))),
        ret(vec![name("i")]),
    ]);
    add_overload(&fx, &f, code(vec![], None, vec![formal("x", None)], body));

    let result = eval_static(&fx, &call_name("skipper", vec![int_lit("0")]))
        .expect("goto skips the assignment");
    assert_eq!(int32_of(&fx, &result), 1);
}

#[test]
fn test_pointer_primitives_round_trip() {
    let fx = fixture();
    let f = define_procedure(&fx, "through_pointer");
    // var i = 41; var p = addressOf(i); pointerDereference(p) gives an
    // lvalue aliasing i; i = 42 through the alias is visible.
    let body = block(vec![
        var_binding(vec!["i"], vec![int_lit("41")]),
        var_binding(vec!["p"], vec![call_name("addressOf", vec![name("i")])]),
        assign(
            call_name("pointerDereference", vec![name("p")]),
            int_lit("42"),
        ),
        ret(vec![name("i")]),
    ]);
    add_overload(&fx, &f, code(vec![], None, vec![formal("x", None)], body));

    let result = eval_static(&fx, &call_name("through_pointer", vec![int_lit("0")]))
        .expect("pointer round trip");
    assert_eq!(int32_of(&fx, &result), 42);
}

#[test]
fn test_atomics_are_rejected_at_compile_time() {
    let fx = fixture();
    let f = define_procedure(&fx, "atomic_read");
    let body = block(vec![
        var_binding(vec!["i"], vec![int_lit("0")]),
        ret(vec![call_name(
            "atomicLoad",
            vec![call_name("addressOf", vec![name("i")])],
        )]),
    ]);
    add_overload(&fx, &f, code(vec![], None, vec![formal("x", None)], body));

    let err = eval_static(&fx, &call_name("atomic_read", vec![int_lit("0")]))
        .expect_err("atomics are runtime-only");
    assert!(matches!(
        err.error,
        CompileError::UnsupportedAtCompileTime(_)
    ));
}

#[test]
fn test_string_literal_primitives() {
    let fx = fixture();
    let sliced = call_name(
        "stringLiteralByteSlice",
        vec![
            string_lit("sable"),
            static_expr(int_lit_typed("1", "u64")),
            static_expr(int_lit_typed("4", "u64")),
        ],
    );
    let result = eval_static(&fx, &sliced).expect("slice computes statically");
    match result {
        Object::Ident(ident) => assert_eq!(ident.name, "abl"),
        other => panic!("expected a static string, got {:?}", other.kind_name()),
    }

    let concat = call_name(
        "stringLiteralConcat",
        vec![string_lit("sa"), string_lit("ble")],
    );
    let result = eval_static(&fx, &concat).expect("concat computes statically");
    match result {
        Object::Ident(ident) => assert_eq!(ident.name, "sable"),
        other => panic!("expected a static string, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_type_size_and_alignment_queries() {
    let fx = fixture();
    let size = eval_static(&fx, &call_name("TypeSize", vec![name("Int64")]))
        .expect("size computes");
    match size {
        Object::ValueHolder(vh) => assert_eq!(vh.as_u64(), 8),
        other => panic!("expected a value, got {:?}", other.kind_name()),
    }

    let alignment = eval_static(
        &fx,
        &call_name(
            "TypeAlignment",
            vec![indexing(name("Tuple"), vec![name("Int8"), name("Int64")])],
        ),
    )
    .expect("alignment computes");
    match alignment {
        Object::ValueHolder(vh) => assert_eq!(vh.as_u64(), 8),
        other => panic!("expected a value, got {:?}", other.kind_name()),
    }
}

#[test]
fn test_static_for_unrolls_per_value() {
    let fx = fixture();
    let f = define_procedure(&fx, "sum3");
    // var acc = 0; static for v in (1, 2, 3) { acc = acc + v; } return acc;
    let body = block(vec![
        var_binding(vec!["acc"], vec![int_lit("0")]),
        sable_compiler::ast::Statement::synthetic(sable_compiler::ast::StmtKind::StaticFor {
            variable: ident("v"),
            values: sable_compiler::ast::ExprList::new(vec![
                int_lit("1"),
                int_lit("2"),
                int_lit("3"),
            ]),
            body: block(vec![assign(
                name("acc"),
                call_name("numericAdd", vec![name("acc"), name("v")]),
            )]),
            clones: std::cell::RefCell::new(Vec::new()),
            clones_initialized: std::cell::Cell::new(false),
        }),
        ret(vec![name("acc")]),
    ]);
    add_overload(&fx, &f, code(vec![], None, vec![formal("x", None)], body));

    let result =
        eval_static(&fx, &call_name("sum3", vec![int_lit("0")])).expect("static for unrolls");
    assert_eq!(int32_of(&fx, &result), 6);
}

#[test]
fn test_float80_arithmetic_round_trips() {
    let fx = fixture();
    let sum = call_name(
        "numericAdd",
        vec![
            call_name("numericConvert", vec![name("Float80"), float_lit("1.25")]),
            call_name("numericConvert", vec![name("Float80"), float_lit("2.5")]),
        ],
    );
    let back = call_name("numericConvert", vec![name("Float64"), sum]);
    let result = eval_static(&fx, &back).expect("extended arithmetic");
    match result {
        Object::ValueHolder(vh) => {
            let buf = vh.buf.borrow();
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[..8]);
            assert_eq!(f64::from_le_bytes(raw), 3.75);
        }
        other => panic!("expected a value, got {:?}", other.kind_name()),
    }
}
