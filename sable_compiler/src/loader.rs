//! Module initialization and overload installation.
//!
//! The file-system half of loading (search paths, parsing) belongs to
//! the front end; this is the semantic half: wiring imports with
//! circular-import detection, installing overloads and variant
//! instances in source order, running top-level static asserts, and
//! building the primitives module every program links against.

use std::rc::Rc;

use crate::ast::{Code, Expr, ExprKind, ExprList, FormalArg, PatternVar, ReturnKind, Statement, StmtKind};
use crate::env::{add_global, add_local, Env};
use crate::error::{CompileError, Result};
use crate::evaluator::evaluate_static_assert;
use crate::matchinvoke::initialize_pattern_env;
use crate::objects::{
    Identifier, ImportKind, InstanceDeclPtr, Module, ModuleInitState, ModulePtr, Object,
    OverloadPtr, ProcedureMono, ProcedureMonoState, ProcedurePtr, RecordDecl, RecordDeclPtr,
    Visibility,
};
use crate::patterns::{deref_deep, evaluate_one_pattern, Pattern};
use crate::primops::{is_overloadable_prim_op_code, ALL_PRIM_OPS};
use crate::printer::StaticName;
use crate::state::CompilerState;
use crate::types::TypeKind;

//
// the primitives module
//

/// Build `__primitives__`: one global per primitive operation plus the
/// primitive type names and the `ByRef` marker record.
pub fn install_primitives(cst: &CompilerState) -> Result<ModulePtr> {
    let module = Module::new("__primitives__");

    for &code in ALL_PRIM_OPS {
        add_global(
            cst,
            &module,
            &Identifier::get(code.name()),
            Visibility::Public,
            Object::PrimOp(cst.prim_op(code)),
        )?;
    }

    let mut add_type = |name: &str, t: crate::types::TypePtr| {
        add_global(
            cst,
            &module,
            &Identifier::get(name),
            Visibility::Public,
            Object::Type(t),
        )
    };
    add_type("Bool", cst.bool_type())?;
    for bits in [8u8, 16, 32, 64, 128] {
        add_type(&format!("Int{}", bits), cst.int_type(bits, true))?;
        add_type(&format!("UInt{}", bits), cst.int_type(bits, false))?;
    }
    for bits in [32u8, 64, 80] {
        add_type(&format!("Float{}", bits), cst.float_type(bits, false))?;
        add_type(&format!("Imag{}", bits), cst.float_type(bits, true))?;
        add_type(&format!("Complex{}", bits), cst.complex_type(bits))?;
    }

    // ByRef[T] marks by-reference returns in return specs.
    let env = Env::for_module(&module);
    let by_ref = RecordDecl::new(
        Identifier::get("ByRef"),
        vec![Identifier::get("T")],
        None,
        Vec::new(),
        env,
    );
    cst.set_by_ref_record(&by_ref);
    add_global(
        cst,
        &module,
        &by_ref.name.clone(),
        Visibility::Public,
        Object::Record(by_ref),
    )?;

    module.init_state.set(ModuleInitState::Done);
    cst.set_primitives_module(&module);
    Ok(module)
}

//
// overload installation
//

/// New overloads are consulted before older ones.
fn add_overload(overloads: &mut Vec<OverloadPtr>, overload: &OverloadPtr) {
    overloads.insert(0, overload.clone());
}

fn max_param_count(code: &Code) -> usize {
    if code.has_var_arg {
        usize::MAX
    } else {
        code.formal_args.len()
    }
}

fn min_param_count(code: &Code) -> usize {
    if code.has_var_arg {
        code.formal_args.len() - 1
    } else {
        code.formal_args.len()
    }
}

fn param_count_string(code: &Code) -> String {
    if code.has_var_arg {
        format!("{}+", code.formal_args.len() - 1)
    } else {
        format!("{}", code.formal_args.len())
    }
}

/// Compute the procedure's monomorphic signature if its one overload has
/// fully concrete argument types.
fn update_procedure_mono(
    cst: &CompilerState,
    proc: &ProcedurePtr,
    env: &crate::env::EnvPtr,
    overload: &OverloadPtr,
) -> Result<()> {
    let was_first = proc.mono.borrow().state == ProcedureMonoState::NoOverloads;
    let computed = if was_first && !overload.code.has_var_arg {
        let mut types = Vec::new();
        let mut concrete = true;
        for arg in &overload.code.formal_args {
            let Some(type_expr) = &arg.type_expr else {
                concrete = false;
                break;
            };
            let pattern = evaluate_one_pattern(cst, type_expr, env)?;
            match deref_deep(cst, &pattern)? {
                Some(Object::Type(t)) => types.push(t),
                _ => {
                    concrete = false;
                    break;
                }
            }
        }
        if concrete {
            ProcedureMono {
                state: ProcedureMonoState::MonoOverload,
                types,
            }
        } else {
            ProcedureMono {
                state: ProcedureMonoState::PolyOverload,
                types: Vec::new(),
            }
        }
    } else {
        ProcedureMono {
            state: ProcedureMonoState::PolyOverload,
            types: Vec::new(),
        }
    };
    *proc.mono.borrow_mut() = computed;
    Ok(())
}

pub fn add_procedure_overload(
    cst: &CompilerState,
    proc: &ProcedurePtr,
    env: &crate::env::EnvPtr,
    overload: &OverloadPtr,
) -> Result<()> {
    if proc.single_overload.get() && !proc.overloads.borrow().is_empty() {
        return Err(cst.diag_at(
            overload.span,
            CompileError::InvalidOperation(
                "standalone procedures cannot be overloaded".to_string(),
            ),
        ));
    }

    if let Some(interface) = proc.interface.borrow().clone() {
        if max_param_count(&interface.code) < min_param_count(&overload.code) {
            return Err(cst.diag_at(
                overload.span,
                CompileError::InterfaceMismatch(format!(
                    "overload has more parameters ({}) than declaration ({})",
                    param_count_string(&overload.code),
                    param_count_string(&interface.code)
                )),
            ));
        }
        if max_param_count(&overload.code) < min_param_count(&interface.code) {
            return Err(cst.diag_at(
                overload.span,
                CompileError::InterfaceMismatch(format!(
                    "overload has fewer parameters ({}) than declaration ({})",
                    param_count_string(&overload.code),
                    param_count_string(&interface.code)
                )),
            ));
        }
        if interface.code.return_specs_declared
            && overload.code.return_specs_declared
            && overload.code.return_specs.len() != interface.code.return_specs.len()
        {
            return Err(cst.diag_at(
                overload.span,
                CompileError::InterfaceMismatch(format!(
                    "overload return count ({}) must be equal to declared return count ({})",
                    overload.code.return_specs.len(),
                    interface.code.return_specs.len()
                )),
            ));
        }
    }

    add_overload(&mut proc.overloads.borrow_mut(), overload);
    update_procedure_mono(cst, proc, env, overload)
}

fn overload_pattern_env(
    cst: &CompilerState,
    overload: &OverloadPtr,
) -> Result<crate::env::EnvPtr> {
    let env = Env::new(&overload.env);
    let mut cells = Vec::new();
    let mut multi_cells = Vec::new();
    initialize_pattern_env(
        cst,
        &env,
        &overload.code.pattern_vars,
        &mut cells,
        &mut multi_cells,
    )?;
    Ok(env)
}

/// Attach one overload declaration to its target. A target that does not
/// resolve to a single callable becomes a pattern overload consulted for
/// every call.
pub fn init_overload(cst: &CompilerState, overload: &OverloadPtr) -> Result<()> {
    let env = overload_pattern_env(cst, overload)?;
    let pattern = evaluate_one_pattern(cst, &overload.target, &env)?;
    let target = deref_deep(cst, &pattern)?;
    let Some(target) = target else {
        overload.name_is_pattern.set(true);
        add_overload(&mut cst.pattern_overloads.borrow_mut(), overload);
        return Ok(());
    };
    match &target {
        Object::Procedure(proc) => add_procedure_overload(cst, proc, &env, overload),
        Object::Record(decl) => {
            add_overload(&mut decl.overloads.borrow_mut(), overload);
            Ok(())
        }
        Object::Variant(decl) => {
            add_overload(&mut decl.overloads.borrow_mut(), overload);
            Ok(())
        }
        Object::Type(t) => {
            add_overload(&mut t.overloads.borrow_mut(), overload);
            Ok(())
        }
        Object::PrimOp(p) if is_overloadable_prim_op_code(p.code) => {
            add_overload(&mut cst.prim_op(p.code).overloads.borrow_mut(), overload);
            Ok(())
        }
        Object::GlobalAlias(alias) if alias.has_params() => {
            add_overload(&mut alias.overloads.borrow_mut(), overload);
            Ok(())
        }
        other => Err(cst.diag_at(
            overload.span,
            CompileError::InvalidOperation(format!(
                "invalid overload target: {}",
                StaticName(other)
            )),
        )),
    }
}

/// Attach a variant `instance` declaration to its (possibly still
/// pattern-shaped) target variant.
fn init_variant_instance(cst: &CompilerState, instance: &InstanceDeclPtr) -> Result<()> {
    let env = Env::new(&instance.env);
    for pvar in &instance.pattern_vars {
        if pvar.is_multi {
            let cell = crate::patterns::MultiPatternCell::empty();
            add_local(
                cst,
                &env,
                &pvar.name,
                Object::MultiPattern(crate::patterns::MultiPattern::Cell(cell)),
            )?;
        } else {
            let cell = crate::patterns::PatternCell::empty();
            add_local(
                cst,
                &env,
                &pvar.name,
                Object::Pattern(Pattern::Cell(cell)),
            )?;
        }
    }
    let pattern = evaluate_one_pattern(cst, &instance.target, &env)?;
    let decl = match deref_deep(cst, &pattern)? {
        Some(Object::Type(t)) => match &t.kind {
            TypeKind::Variant { decl, .. } => decl.clone(),
            _ => {
                return Err(cst.diag_at(
                    instance.span,
                    CompileError::InvalidOperation("not a variant type".to_string()),
                ))
            }
        },
        Some(_) => {
            return Err(cst.diag_at(
                instance.span,
                CompileError::InvalidOperation("not a variant type".to_string()),
            ))
        }
        None => match &pattern {
            Pattern::Struct(ps) => match &ps.head {
                Some(Object::Variant(decl)) => decl.clone(),
                _ => {
                    return Err(cst.diag_at(
                        instance.span,
                        CompileError::InvalidOperation("not a variant type".to_string()),
                    ))
                }
            },
            _ => {
                return Err(cst.diag_at(
                    instance.span,
                    CompileError::InvalidOperation("not a variant type".to_string()),
                ))
            }
        },
    };
    if !decl.open {
        return Err(cst.diag_at(
            instance.span,
            CompileError::InvalidOperation(
                "cannot add instances to closed variant".to_string(),
            ),
        ));
    }
    decl.instances.borrow_mut().push(instance.clone());
    Ok(())
}

//
// module initialization
//

pub fn init_module(cst: &CompilerState, module: &ModulePtr) -> Result<()> {
    init_module_with_chain(cst, module, &[])
}

fn init_module_with_chain(
    cst: &CompilerState,
    module: &ModulePtr,
    import_chain: &[String],
) -> Result<()> {
    if module.init_state.get() == ModuleInitState::Done {
        return Ok(());
    }
    let name = module.name.borrow().clone();

    if module.init_state.get() == ModuleInitState::Running {
        // The prelude may import itself; anything else in the chain is a
        // loop.
        if import_chain.last() == Some(&name) {
            return Ok(());
        }
        let mut chain = import_chain.to_vec();
        chain.push(name);
        return Err(cst.diag_at(module.span, CompileError::ImportLoop(chain)));
    }

    let mut chain = import_chain.to_vec();
    chain.push(name.clone());
    module.init_state.set(ModuleInitState::Running);

    let imports = module.imports.borrow().clone();
    for import in &imports {
        if import.module.borrow().is_none() {
            let Some(target) = cst.loaded_module(&import.module_name) else {
                return Err(cst.diag_at(
                    import.span,
                    CompileError::InvalidOperation(format!(
                        "imported module not found: {}",
                        import.module_name
                    )),
                ));
            };
            *import.module.borrow_mut() = Some(target);
        }
        let target = import.module.borrow().clone().expect("resolved above");
        init_module_with_chain(cst, &target, &chain)?;
        // Whole-module imports bind the module object under its (or the
        // alias) name.
        if let ImportKind::Module { alias } = &import.kind {
            let bound = alias.clone().unwrap_or_else(|| import.module_name.clone());
            if !module.globals.borrow().contains_key(&bound) {
                add_global(
                    cst,
                    module,
                    &Identifier::with_span(&bound, import.span),
                    Visibility::Private,
                    Object::Module(target),
                )?;
            }
        }
    }

    module.init_state.set(ModuleInitState::Done);

    crate::analyzer::verify_module_attributes(cst, module)?;

    let env = Env::for_module(module);
    let items = module.top_level.borrow().clone();
    for item in &items {
        match item {
            crate::objects::TopLevelItem::Overload(overload) => init_overload(cst, overload)?,
            crate::objects::TopLevelItem::Instance(instance) => {
                init_variant_instance(cst, instance)?
            }
            crate::objects::TopLevelItem::StaticAssert {
                condition,
                message,
                span,
            } => evaluate_static_assert(cst, *span, condition, message, &env)?,
        }
    }
    Ok(())
}

//
// builtin record constructor
//

/// Parameterized records get a synthesized default constructor: pattern
/// variables for the declaration parameters, one argument per field, and
/// a body returning `R[params](fields)`.
pub fn init_builtin_constructor(cst: &CompilerState, decl: &RecordDeclPtr) -> Result<()> {
    debug_assert!(!decl.builtin_overload_initialized.get());
    decl.builtin_overload_initialized.set(true);
    if !decl.has_params() {
        return Ok(());
    }

    let mut pattern_vars = Vec::new();
    for param in &decl.params {
        pattern_vars.push(PatternVar::single(param.clone()));
    }
    if let Some(var_param) = &decl.var_param {
        pattern_vars.push(PatternVar::multi(var_param.clone()));
    }

    let mut formal_args = Vec::new();
    for field in &decl.fields {
        formal_args.push(FormalArg::new(
            field.name.clone(),
            Some(field.type_expr.clone()),
        ));
    }

    let mut type_args = Vec::new();
    for param in &decl.params {
        type_args.push(Expr::synthetic(ExprKind::NameRef(param.clone())));
    }
    if let Some(var_param) = &decl.var_param {
        let name_ref = Expr::synthetic(ExprKind::NameRef(var_param.clone()));
        type_args.push(Expr::synthetic(ExprKind::Unpack(name_ref)));
    }
    let ret_type = Expr::synthetic(ExprKind::Indexing {
        expr: Expr::synthetic(ExprKind::ObjectExpr(Object::Record(decl.clone()))),
        args: ExprList::new(type_args),
    });

    let mut field_refs = Vec::new();
    for field in &decl.fields {
        field_refs.push(Expr::synthetic(ExprKind::NameRef(field.name.clone())));
    }
    let return_expr = Expr::synthetic(ExprKind::Call {
        expr: ret_type,
        args: ExprList::new(field_refs),
    });
    let body = Statement::synthetic(StmtKind::Return {
        kind: ReturnKind::Value,
        values: ExprList::single(return_expr),
    });

    let code = Code::new(pattern_vars, None, formal_args, Some(body));
    let target = Expr::synthetic(ExprKind::ObjectExpr(Object::Record(decl.clone())));
    let overload = crate::objects::Overload::default_overload(
        target,
        code,
        decl.env.clone(),
    );
    add_overload(&mut decl.overloads.borrow_mut(), &overload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_module_contents() {
        let cst = CompilerState::new().expect("compiler state");
        let prims = cst.primitives_module().expect("installed");
        let globals = prims.globals.borrow();
        assert!(globals.contains_key("integerAddChecked"));
        assert!(globals.contains_key("Pointer"));
        assert!(globals.contains_key("Int32"));
        assert!(globals.contains_key("Float80"));
        assert!(globals.contains_key("ByRef"));
    }

    #[test]
    fn test_primitive_types_are_interned_once() {
        let cst = CompilerState::new().expect("compiler state");
        let prims = cst.primitives_module().expect("installed");
        let globals = prims.globals.borrow();
        let Some(Object::Type(int32)) = globals.get("Int32") else {
            panic!("Int32 missing");
        };
        assert!(Rc::ptr_eq(int32, &cst.int_type(32, true)));
    }
}
