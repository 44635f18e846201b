//! Module wiring: imports, ambiguity, circularity, prelude fallback,
//! module attributes.

mod common;

use std::rc::Rc;

use common::*;
use pretty_assertions::assert_eq;
use sable_compiler::env::{lookup_env, Env};
use sable_compiler::error::CompileError;
use sable_compiler::loader;
use sable_compiler::objects::{
    Import, ImportedMember, Module, Object, Visibility,
};
use sable_compiler::state::CompilerState;

fn define_public_int(
    cst: &CompilerState,
    module: &sable_compiler::objects::ModulePtr,
    name: &str,
    value: i32,
) {
    sable_compiler::env::add_global(
        cst,
        module,
        &ident(name),
        Visibility::Public,
        sable_compiler::literals::int_object(cst, value),
    )
    .expect("global installs");
}

#[test]
fn test_ambiguous_import_suggests_disambiguations() {
    let cst = CompilerState::new().expect("compiler state");
    let b = Module::new("b");
    let c = Module::new("c");
    define_public_int(&cst, &b, "foo", 1);
    define_public_int(&cst, &c, "foo", 2);
    cst.add_module(&b);
    cst.add_module(&c);

    let a = Module::new("a");
    a.imports.borrow_mut().push(Import::star("b"));
    a.imports.borrow_mut().push(Import::star("c"));
    cst.add_module(&a);
    loader::init_module(&cst, &a).expect("a initializes");

    let env = Env::for_module(&a);
    let err = lookup_env(&cst, &env, "foo").expect_err("foo is ambiguous");
    match &err.error {
        CompileError::AmbiguousImport { name, suggestions } => {
            assert_eq!(name, "foo");
            assert_eq!(
                suggestions,
                &vec!["import b.(foo);".to_string(), "import c.(foo);".to_string()]
            );
        }
        other => panic!("expected an ambiguity report, got {:?}", other),
    }
}

#[test]
fn test_specific_import_disambiguates_star_imports() {
    let cst = CompilerState::new().expect("compiler state");
    let b = Module::new("b");
    let c = Module::new("c");
    define_public_int(&cst, &b, "foo", 1);
    define_public_int(&cst, &c, "foo", 2);
    cst.add_module(&b);
    cst.add_module(&c);

    let a = Module::new("a");
    a.imports.borrow_mut().push(Import::star("b"));
    a.imports.borrow_mut().push(Import::star("c"));
    a.imports.borrow_mut().push(Import::members(
        "b",
        vec![ImportedMember {
            name: "foo".to_string(),
            alias: None,
            visibility: Visibility::Public,
        }],
    ));
    cst.add_module(&a);
    loader::init_module(&cst, &a).expect("a initializes");

    let env = Env::for_module(&a);
    let found = lookup_env(&cst, &env, "foo").expect("specific import wins");
    assert!(found.is_some());
}

#[test]
fn test_circular_imports_report_the_chain() {
    let cst = CompilerState::new().expect("compiler state");
    let m1 = Module::new("m1");
    let m2 = Module::new("m2");
    m1.imports.borrow_mut().push(Import::star("m2"));
    m2.imports.borrow_mut().push(Import::star("m1"));
    cst.add_module(&m1);
    cst.add_module(&m2);

    let err = loader::init_module(&cst, &m1).expect_err("import loop");
    match &err.error {
        CompileError::ImportLoop(chain) => {
            assert_eq!(chain, &vec!["m1".to_string(), "m2".to_string(), "m1".to_string()]);
        }
        other => panic!("expected an import loop, got {:?}", other),
    }
}

#[test]
fn test_prelude_may_import_itself() {
    let cst = CompilerState::new().expect("compiler state");
    let prelude = Module::new("prelude");
    prelude.imports.borrow_mut().push(Import::star("prelude"));
    cst.add_module(&prelude);
    loader::init_module(&cst, &prelude).expect("the prelude self-import is allowed");
}

#[test]
fn test_private_lookup_falls_back_to_prelude() {
    let cst = CompilerState::new().expect("compiler state");
    let prelude = Module::new("prelude");
    define_public_int(&cst, &prelude, "helper", 1);
    cst.add_module(&prelude);
    loader::init_module(&cst, &prelude).expect("prelude initializes");

    let main = Module::new("main");
    cst.set_main_module(&main);
    loader::init_module(&cst, &main).expect("main initializes");

    let env = Env::for_module(&main);
    let found = lookup_env(&cst, &env, "helper").expect("fallback works");
    assert!(found.is_some());

    // Within the prelude itself there is no fallback loop.
    let prelude_env = Env::for_module(&prelude);
    let missing = lookup_env(&cst, &prelude_env, "no_such_name").expect("lookup completes");
    assert!(missing.is_none());
}

#[test]
fn test_imported_name_not_found() {
    let cst = CompilerState::new().expect("compiler state");
    let b = Module::new("b");
    cst.add_module(&b);
    let a = Module::new("a");
    a.imports.borrow_mut().push(Import::members(
        "b",
        vec![ImportedMember {
            name: "missing".to_string(),
            alias: None,
            visibility: Visibility::Public,
        }],
    ));
    cst.add_module(&a);
    loader::init_module(&cst, &a).expect("a initializes");

    let env = Env::for_module(&a);
    let err = lookup_env(&cst, &env, "missing").expect_err("import target missing");
    assert!(matches!(err.error, CompileError::ImportedNameNotFound(_)));
}

#[test]
fn test_undefined_name_suggests_defining_modules() {
    let fx = fixture();
    let lib = Module::new("lib");
    define_public_int(&fx.cst, &lib, "gadget", 1);
    fx.cst.add_module(&lib);

    let err = analyze(&fx, &name("gadget")).expect_err("not imported");
    match &err.error {
        CompileError::UndefinedName { name, suggestions } => {
            assert_eq!(name, "gadget");
            assert!(suggestions.contains(&"import lib.(gadget);".to_string()));
        }
        other => panic!("expected an undefined-name report, got {:?}", other),
    }
}

#[test]
fn test_default_integer_type_attribute_changes_literal_typing() {
    let cst = CompilerState::new().expect("compiler state");
    let module = Module::new("main");
    module
        .imports
        .borrow_mut()
        .push(Import::star("__primitives__"));
    *module.attributes.borrow_mut() = Some(sable_compiler::ast::ExprList::single(name("Int64")));
    cst.set_main_module(&module);
    loader::init_module(&cst, &module).expect("module initializes");

    let env = Env::for_module(&module);
    let mpv = sable_compiler::analyzer::safe_analyze_expr(&cst, &int_lit("7"), &env)
        .expect("literal analyzes");
    assert!(Rc::ptr_eq(&mpv.values[0].ty, &cst.int_type(64, true)));
}

#[test]
fn test_module_import_binds_module_object() {
    let cst = CompilerState::new().expect("compiler state");
    let b = Module::new("b");
    define_public_int(&cst, &b, "foo", 1);
    cst.add_module(&b);

    let a = Module::new("a");
    a.imports.borrow_mut().push(Import::module("b", None));
    cst.add_module(&a);
    loader::init_module(&cst, &a).expect("a initializes");

    let env = Env::for_module(&a);
    let found = lookup_env(&cst, &env, "b").expect("module name binds");
    assert!(matches!(found, Some(Object::Module(_))));

    // b.foo resolves through the module binding.
    let access = field_ref(name("b"), "foo");
    let mpv = sable_compiler::analyzer::safe_analyze_expr(&cst, &access, &env)
        .expect("module member resolves");
    assert_eq!(mpv.len(), 1);
}

#[test]
fn test_build_flags_collect_from_attributes() {
    let cst = CompilerState::new().expect("compiler state");
    let module = Module::new("main");
    module
        .imports
        .borrow_mut()
        .push(Import::star("__primitives__"));
    *module.attributes.borrow_mut() = Some(sable_compiler::ast::ExprList::single(string_lit(
        "unix",
    )));
    cst.set_main_module(&module);
    loader::init_module(&cst, &module).expect("module initializes");

    assert!(cst.has_flag("unix"));
    assert_eq!(module.attr_build_flags.borrow().as_slice(), ["unix"]);
}
