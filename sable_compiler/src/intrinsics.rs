//! Backend intrinsics.
//!
//! The code-generation backend supplies a table of intrinsics with their
//! type signatures; the table arrives as JSON. The analyzer type-checks
//! intrinsic calls against the signature and propagates the declared
//! output type. Intrinsic calls never evaluate: the evaluator rejects
//! them with a specific diagnostic.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::analyzer::{MultiPValue, PValue};
use crate::env::add_global;
use crate::objects::Visibility;
use crate::error::{CompileError, Result};
use crate::objects::{Identifier, Intrinsic, Module, ModulePtr, Object};
use crate::printer::TypeName;
use crate::state::CompilerState;
use crate::types::{TypeKind, TypePtr};

/// The type vocabulary backend intrinsic signatures are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntrinsicType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrinsicSignature {
    pub name: String,
    pub args: Vec<IntrinsicType>,
    pub ret: Option<IntrinsicType>,
}

fn intrinsic_type(cst: &CompilerState, it: IntrinsicType) -> TypePtr {
    match it {
        IntrinsicType::I8 => cst.int_type(8, true),
        IntrinsicType::I16 => cst.int_type(16, true),
        IntrinsicType::I32 => cst.int_type(32, true),
        IntrinsicType::I64 => cst.int_type(64, true),
        IntrinsicType::F32 => cst.float_type(32, false),
        IntrinsicType::F64 => cst.float_type(64, false),
        IntrinsicType::Ptr => cst.pointer_type(&cst.int_type(8, false)),
    }
}

fn type_matches(cst: &CompilerState, it: IntrinsicType, t: &TypePtr) -> bool {
    match it {
        IntrinsicType::Ptr => matches!(t.kind, TypeKind::Pointer(_)),
        other => Rc::ptr_eq(&intrinsic_type(cst, other), t),
    }
}

/// Load a backend intrinsics table from its JSON form into a module
/// named `intrinsics`, one global per entry.
pub fn load_intrinsic_table(cst: &CompilerState, json: &str) -> Result<ModulePtr> {
    let signatures: Vec<IntrinsicSignature> = serde_json::from_str(json).map_err(|e| {
        cst.diag(CompileError::InvalidOperation(format!(
            "invalid intrinsics table: {}",
            e
        )))
    })?;
    let module = Module::new("intrinsics");
    for signature in signatures {
        let name = Identifier::get(&signature.name);
        let intrinsic = Rc::new(Intrinsic {
            name: signature.name.clone(),
            signature,
        });
        add_global(
            cst,
            &module,
            &name,
            Visibility::Public,
            Object::Intrinsic(intrinsic),
        )?;
    }
    cst.add_module(&module);
    Ok(module)
}

/// Type-check an intrinsic call and propagate its declared output type.
pub fn analyze_intrinsic(
    cst: &CompilerState,
    intrinsic: &Rc<Intrinsic>,
    args: &MultiPValue,
) -> Result<MultiPValue> {
    let signature = &intrinsic.signature;
    if args.len() != signature.args.len() {
        return Err(cst.diag(CompileError::Arity {
            expected: signature.args.len(),
            got: args.len(),
            variadic: false,
        }));
    }
    for (index, (expected, pv)) in signature.args.iter().zip(args.values.iter()).enumerate() {
        if !type_matches(cst, *expected, &pv.ty) {
            return Err(cst.diag(CompileError::ArgumentError {
                index,
                message: format!(
                    "intrinsic {} expects {:?}, got {}",
                    intrinsic.name,
                    expected,
                    TypeName(&pv.ty)
                ),
            }));
        }
    }
    let mut out = MultiPValue::new();
    if let Some(ret) = signature.ret {
        out.add(PValue::new(intrinsic_type(cst, ret), true));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_intrinsic_table_from_json() {
        let cst = CompilerState::new().expect("compiler state");
        let module = load_intrinsic_table(
            &cst,
            r#"[{"name": "ctpop_i32", "args": ["i32"], "ret": "i32"},
                {"name": "trap", "args": [], "ret": null}]"#,
        )
        .expect("table loads");
        assert!(module.globals.borrow().contains_key("ctpop_i32"));
        assert!(module.globals.borrow().contains_key("trap"));
    }

    #[test]
    fn test_analyze_intrinsic_checks_types() {
        let cst = CompilerState::new().expect("compiler state");
        let intrinsic = Rc::new(Intrinsic {
            name: "ctpop_i32".to_string(),
            signature: IntrinsicSignature {
                name: "ctpop_i32".to_string(),
                args: vec![IntrinsicType::I32],
                ret: Some(IntrinsicType::I32),
            },
        });
        let good = MultiPValue::single(PValue::new(cst.int_type(32, true), true));
        let result = analyze_intrinsic(&cst, &intrinsic, &good).expect("typed");
        assert_eq!(result.len(), 1);

        let bad = MultiPValue::single(PValue::new(cst.bool_type(), true));
        assert!(analyze_intrinsic(&cst, &intrinsic, &bad).is_err());
    }
}
