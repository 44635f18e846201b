//! Primitive operations, typed.
//!
//! The analyzer side of the primitive surface: given argument PValues,
//! produce the result PValues. Primitives whose results are compile-time
//! objects (string slicing, member names, module reflection) compute the
//! static result here; the evaluator then has nothing to write because
//! the value lives in the type.

use std::rc::Rc;

use crate::analyzer::{
    analyze_static_object, dispatch_tag_count, safe_analyze_callable, static_pvalue,
    static_to_type, MultiPValue, PValue,
};
use crate::ast::ValueTempness;
use crate::error::{CompileError, Result};
use crate::evaluator_ops::string_slice;
use crate::objects::{
    Identifier, IdentifierPtr, Object, PrimOpCode, ProcedureMonoState, ValueHolder,
};
use crate::printer::{StaticName, TypeName};
use crate::state::CompilerState;
use crate::types::{unwrap_static_type, TypeKind, TypePtr};

fn arg_pv<'a>(cst: &CompilerState, args: &'a MultiPValue, index: usize) -> Result<&'a PValue> {
    args.values.get(index).ok_or_else(|| {
        cst.diag(CompileError::Arity {
            expected: index + 1,
            got: args.len(),
            variadic: true,
        })
    })
}

fn arg_static(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<Object> {
    let pv = arg_pv(cst, args, index)?;
    unwrap_static_type(&pv.ty).ok_or_else(|| {
        cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a static value".to_string(),
        })
    })
}

fn arg_static_type(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<TypePtr> {
    let obj = arg_static(cst, args, index)?;
    static_to_type(&obj).ok_or_else(|| {
        cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a type".to_string(),
        })
    })
}

fn arg_static_ident(
    cst: &CompilerState,
    args: &MultiPValue,
    index: usize,
) -> Result<IdentifierPtr> {
    match arg_static(cst, args, index)? {
        Object::Ident(ident) => Ok(ident),
        other => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: format!("expecting a static string, not {}", StaticName(&other)),
        })),
    }
}

fn arg_static_size(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<u64> {
    match arg_static(cst, args, index)? {
        Object::ValueHolder(vh) if matches!(vh.ty.kind, TypeKind::Integer { .. }) => {
            Ok(vh.as_u64())
        }
        _ => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a static integer".to_string(),
        })),
    }
}

fn arg_numeric(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<TypePtr> {
    let pv = arg_pv(cst, args, index)?;
    match pv.ty.kind {
        TypeKind::Integer { .. } | TypeKind::Float { .. } => Ok(pv.ty.clone()),
        _ => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: format!("expecting a numeric value, not {}", TypeName(&pv.ty)),
        })),
    }
}

fn arg_integer(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<TypePtr> {
    let pv = arg_pv(cst, args, index)?;
    match pv.ty.kind {
        TypeKind::Integer { .. } => Ok(pv.ty.clone()),
        _ => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: format!("expecting an integer value, not {}", TypeName(&pv.ty)),
        })),
    }
}

fn arg_integer_or_pointer(
    cst: &CompilerState,
    args: &MultiPValue,
    index: usize,
) -> Result<TypePtr> {
    let pv = arg_pv(cst, args, index)?;
    match pv.ty.kind {
        TypeKind::Integer { .. }
        | TypeKind::Pointer(_)
        | TypeKind::CodePointer { .. }
        | TypeKind::CCodePointer { .. }
        | TypeKind::Enum(_) => Ok(pv.ty.clone()),
        _ => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: format!(
                "expecting an integer or pointer value, not {}",
                TypeName(&pv.ty)
            ),
        })),
    }
}

fn arg_float(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<TypePtr> {
    let pv = arg_pv(cst, args, index)?;
    match pv.ty.kind {
        TypeKind::Float { .. } => Ok(pv.ty.clone()),
        _ => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: format!("expecting a float value, not {}", TypeName(&pv.ty)),
        })),
    }
}

fn same_type_args(cst: &CompilerState, a: &TypePtr, b: &TypePtr) -> Result<()> {
    if Rc::ptr_eq(a, b) {
        Ok(())
    } else {
        Err(cst.diag(CompileError::TypeMismatch {
            expected: TypeName(a).to_string(),
            got: TypeName(b).to_string(),
        }))
    }
}

fn ensure_arity(cst: &CompilerState, args: &MultiPValue, expected: usize) -> Result<()> {
    crate::analyzer::ensure_arity(cst, expected, args.len())
}

fn bool_result(cst: &CompilerState) -> MultiPValue {
    MultiPValue::single(PValue::new(cst.bool_type(), true))
}

fn size_result(cst: &CompilerState) -> MultiPValue {
    MultiPValue::single(PValue::new(cst.c_size_type(), true))
}

fn static_result(cst: &CompilerState, obj: Object) -> MultiPValue {
    MultiPValue::single(static_pvalue(cst, obj))
}

fn static_ident_result(cst: &CompilerState, name: &str) -> MultiPValue {
    static_result(cst, Object::Ident(Identifier::get(name)))
}

fn record_type_arg(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<TypePtr> {
    let t = arg_static_type(cst, args, index)?;
    if matches!(t.kind, TypeKind::Record { .. }) {
        Ok(t)
    } else {
        Err(cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a record type".to_string(),
        }))
    }
}

fn variant_type_arg(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<TypePtr> {
    let t = arg_static_type(cst, args, index)?;
    if matches!(t.kind, TypeKind::Variant { .. }) {
        Ok(t)
    } else {
        Err(cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a variant type".to_string(),
        }))
    }
}

fn enum_type_arg(cst: &CompilerState, args: &MultiPValue, index: usize) -> Result<TypePtr> {
    let t = arg_static_type(cst, args, index)?;
    if matches!(t.kind, TypeKind::Enum(_)) {
        Ok(t)
    } else {
        Err(cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting an enum type".to_string(),
        }))
    }
}

/// The module an object was defined in, found by scanning the registry's
/// globals.
fn static_module_of(cst: &CompilerState, obj: &Object) -> Option<crate::objects::ModulePtr> {
    if let Object::Module(m) = obj {
        return Some(m.clone());
    }
    for module in cst.modules.borrow().values() {
        for global in module.globals.borrow().values() {
            if crate::objects::object_equals(global, obj) {
                return Some(module.clone());
            }
        }
    }
    None
}

pub fn analyze_prim_op(
    cst: &CompilerState,
    code: PrimOpCode,
    args: &MultiPValue,
) -> Result<MultiPValue> {
    match code {
        //
        // static introspection
        //
        PrimOpCode::TypeP
        | PrimOpCode::SymbolP
        | PrimOpCode::StaticMonoP
        | PrimOpCode::RecordP
        | PrimOpCode::VariantP
        | PrimOpCode::EnumP
        | PrimOpCode::StringLiteralP => {
            ensure_arity(cst, args, 1)?;
            Ok(bool_result(cst))
        }
        PrimOpCode::TypeSize | PrimOpCode::TypeAlignment => {
            ensure_arity(cst, args, 1)?;
            let _ = arg_static_type(cst, args, 0)?;
            Ok(size_result(cst))
        }
        PrimOpCode::StaticCallDefinedP => {
            let _ = arg_static(cst, args, 0)?;
            for i in 1..args.len() {
                let _ = arg_static_type(cst, args, i)?;
            }
            Ok(bool_result(cst))
        }
        PrimOpCode::StaticCallOutputTypes => {
            let callable = arg_static(cst, args, 0)?;
            let mut args_key = Vec::with_capacity(args.len().saturating_sub(1));
            for i in 1..args.len() {
                args_key.push(arg_static_type(cst, args, i)?);
            }
            let tempness = vec![ValueTempness::RValue; args_key.len()];
            let entry = safe_analyze_callable(cst, &callable, &args_key, &tempness)?;
            let mut out = MultiPValue::new();
            for rt in entry.return_types.borrow().iter() {
                out.add(static_pvalue(cst, Object::Type(rt.clone())));
            }
            Ok(out)
        }
        PrimOpCode::StaticMonoInputTypes => {
            ensure_arity(cst, args, 1)?;
            let obj = arg_static(cst, args, 0)?;
            let Object::Procedure(proc) = &obj else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting a procedure".to_string(),
                }));
            };
            let mono = proc.mono.borrow();
            if mono.state != ProcedureMonoState::MonoOverload {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: format!("{} is not monomorphic", proc.name.name),
                }));
            }
            let mut out = MultiPValue::new();
            for t in &mono.types {
                out.add(static_pvalue(cst, Object::Type(t.clone())));
            }
            Ok(out)
        }

        //
        // copying
        //
        PrimOpCode::BitCopy => {
            ensure_arity(cst, args, 2)?;
            let a = arg_pv(cst, args, 0)?.ty.clone();
            let b = arg_pv(cst, args, 1)?.ty.clone();
            same_type_args(cst, &a, &b)?;
            Ok(MultiPValue::new())
        }
        PrimOpCode::BitCast => {
            ensure_arity(cst, args, 2)?;
            let t = arg_static_type(cst, args, 0)?;
            let _ = arg_pv(cst, args, 1)?;
            Ok(MultiPValue::single(PValue::new(t, false)))
        }

        //
        // bool
        //
        PrimOpCode::BoolNot => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?;
            if !matches!(pv.ty.kind, TypeKind::Bool) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "Bool".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            }
            Ok(bool_result(cst))
        }

        //
        // comparison
        //
        PrimOpCode::IntegerEqualsP | PrimOpCode::IntegerLesserP => {
            ensure_arity(cst, args, 2)?;
            let a = arg_integer_or_pointer(cst, args, 0)?;
            let b = arg_integer_or_pointer(cst, args, 1)?;
            same_type_args(cst, &a, &b)?;
            Ok(bool_result(cst))
        }
        PrimOpCode::FloatOrderedEqualsP
        | PrimOpCode::FloatOrderedLesserP
        | PrimOpCode::FloatOrderedLesserEqualsP
        | PrimOpCode::FloatOrderedGreaterP
        | PrimOpCode::FloatOrderedGreaterEqualsP
        | PrimOpCode::FloatOrderedNotEqualsP
        | PrimOpCode::FloatOrderedP
        | PrimOpCode::FloatUnorderedEqualsP
        | PrimOpCode::FloatUnorderedLesserP
        | PrimOpCode::FloatUnorderedLesserEqualsP
        | PrimOpCode::FloatUnorderedGreaterP
        | PrimOpCode::FloatUnorderedGreaterEqualsP
        | PrimOpCode::FloatUnorderedNotEqualsP
        | PrimOpCode::FloatUnorderedP => {
            ensure_arity(cst, args, 2)?;
            let a = arg_float(cst, args, 0)?;
            let b = arg_float(cst, args, 1)?;
            same_type_args(cst, &a, &b)?;
            Ok(bool_result(cst))
        }

        //
        // arithmetic
        //
        PrimOpCode::NumericAdd | PrimOpCode::NumericSubtract | PrimOpCode::NumericMultiply => {
            ensure_arity(cst, args, 2)?;
            let a = arg_numeric(cst, args, 0)?;
            let b = arg_numeric(cst, args, 1)?;
            same_type_args(cst, &a, &b)?;
            Ok(MultiPValue::single(PValue::new(a, true)))
        }
        PrimOpCode::FloatDivide => {
            ensure_arity(cst, args, 2)?;
            let a = arg_float(cst, args, 0)?;
            let b = arg_float(cst, args, 1)?;
            same_type_args(cst, &a, &b)?;
            Ok(MultiPValue::single(PValue::new(a, true)))
        }
        PrimOpCode::NumericNegate => {
            ensure_arity(cst, args, 1)?;
            let a = arg_numeric(cst, args, 0)?;
            Ok(MultiPValue::single(PValue::new(a, true)))
        }
        PrimOpCode::IntegerQuotient
        | PrimOpCode::IntegerRemainder
        | PrimOpCode::IntegerShiftLeft
        | PrimOpCode::IntegerShiftRight
        | PrimOpCode::IntegerBitwiseAnd
        | PrimOpCode::IntegerBitwiseOr
        | PrimOpCode::IntegerBitwiseXor
        | PrimOpCode::IntegerAddChecked
        | PrimOpCode::IntegerSubtractChecked
        | PrimOpCode::IntegerMultiplyChecked
        | PrimOpCode::IntegerQuotientChecked
        | PrimOpCode::IntegerRemainderChecked
        | PrimOpCode::IntegerShiftLeftChecked => {
            ensure_arity(cst, args, 2)?;
            let a = arg_integer(cst, args, 0)?;
            let b = arg_integer(cst, args, 1)?;
            same_type_args(cst, &a, &b)?;
            Ok(MultiPValue::single(PValue::new(a, true)))
        }
        PrimOpCode::IntegerBitwiseNot | PrimOpCode::IntegerNegateChecked => {
            ensure_arity(cst, args, 1)?;
            let a = arg_integer(cst, args, 0)?;
            Ok(MultiPValue::single(PValue::new(a, true)))
        }
        PrimOpCode::NumericConvert => {
            ensure_arity(cst, args, 2)?;
            let dest = arg_static_type(cst, args, 0)?;
            let _ = arg_numeric(cst, args, 1)?;
            Ok(MultiPValue::single(PValue::new(dest, true)))
        }
        PrimOpCode::IntegerConvertChecked => {
            ensure_arity(cst, args, 2)?;
            let dest = arg_static_type(cst, args, 0)?;
            let _ = arg_numeric(cst, args, 1)?;
            Ok(MultiPValue::single(PValue::new(dest, true)))
        }

        //
        // pointers
        //
        PrimOpCode::AddressOf => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?;
            if pv.is_temp {
                return Err(cst.diag(CompileError::AddressOfTemporary));
            }
            Ok(MultiPValue::single(PValue::new(
                cst.pointer_type(&pv.ty),
                true,
            )))
        }
        PrimOpCode::PointerDereference => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::Pointer(pointee) = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            Ok(MultiPValue::single(PValue::new(pointee.clone(), false)))
        }
        PrimOpCode::PointerOffset => {
            ensure_arity(cst, args, 2)?;
            let pv = arg_pv(cst, args, 0)?;
            if !matches!(pv.ty.kind, TypeKind::Pointer(_)) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            }
            let _ = arg_integer(cst, args, 1)?;
            Ok(MultiPValue::single(PValue::new(pv.ty.clone(), true)))
        }
        PrimOpCode::PointerToInt => {
            ensure_arity(cst, args, 2)?;
            let dest = arg_static_type(cst, args, 0)?;
            if !matches!(dest.kind, TypeKind::Integer { .. }) {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting an integer type".to_string(),
                }));
            }
            Ok(MultiPValue::single(PValue::new(dest, true)))
        }
        PrimOpCode::IntToPointer => {
            ensure_arity(cst, args, 2)?;
            let pointee = arg_static_type(cst, args, 0)?;
            let _ = arg_integer(cst, args, 1)?;
            Ok(MultiPValue::single(PValue::new(
                cst.pointer_type(&pointee),
                true,
            )))
        }
        PrimOpCode::NullPointer => {
            ensure_arity(cst, args, 1)?;
            let pointee = arg_static_type(cst, args, 0)?;
            Ok(MultiPValue::single(PValue::new(
                cst.pointer_type(&pointee),
                true,
            )))
        }

        //
        // code pointers
        //
        PrimOpCode::MakeCodePointer => {
            let callable = arg_static(cst, args, 0)?;
            let mut args_key = Vec::with_capacity(args.len().saturating_sub(1));
            for i in 1..args.len() {
                args_key.push(arg_static_type(cst, args, i)?);
            }
            let tempness = vec![ValueTempness::RValue; args_key.len()];
            let entry = safe_analyze_callable(cst, &callable, &args_key, &tempness)?;
            let ptr_ty = cst.code_pointer_type(
                args_key,
                entry.return_is_ref.borrow().clone(),
                entry.return_types.borrow().clone(),
            );
            Ok(MultiPValue::single(PValue::new(ptr_ty, true)))
        }
        PrimOpCode::MakeExternalCodePointer => {
            let callable = arg_static(cst, args, 0)?;
            let cc = crate::analyzer::static_to_calling_conv(cst, &arg_static(cst, args, 1)?)?;
            let mut args_key = Vec::with_capacity(args.len().saturating_sub(2));
            for i in 2..args.len() {
                args_key.push(arg_static_type(cst, args, i)?);
            }
            let tempness = vec![ValueTempness::RValue; args_key.len()];
            let entry = safe_analyze_callable(cst, &callable, &args_key, &tempness)?;
            let return_types = entry.return_types.borrow();
            if return_types.len() > 1 {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "C code cannot return more than one value".to_string(),
                }));
            }
            let ptr_ty = cst.c_code_pointer_type(
                cc,
                false,
                args_key,
                return_types.first().cloned(),
            );
            Ok(MultiPValue::single(PValue::new(ptr_ty, true)))
        }
        PrimOpCode::CallExternalCodePointer => {
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::CCodePointer { return_type, .. } = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "an external code pointer".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            let mut out = MultiPValue::new();
            if let Some(rt) = return_type {
                out.add(PValue::new(rt.clone(), true));
            }
            Ok(out)
        }

        //
        // arrays
        //
        PrimOpCode::ArrayRef => {
            ensure_arity(cst, args, 2)?;
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::Array { element, .. } = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "an array".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            let _ = arg_integer(cst, args, 1)?;
            Ok(MultiPValue::single(PValue::new(element.clone(), false)))
        }
        PrimOpCode::ArrayElements => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::Array { element, size } = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "an array".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            let mut out = MultiPValue::new();
            for _ in 0..*size {
                out.add(PValue::new(element.clone(), false));
            }
            Ok(out)
        }

        //
        // tuples
        //
        PrimOpCode::TupleElementCount => {
            ensure_arity(cst, args, 1)?;
            let t = arg_static_type(cst, args, 0)?;
            if !matches!(t.kind, TypeKind::Tuple(_)) {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting a tuple type".to_string(),
                }));
            }
            Ok(size_result(cst))
        }
        PrimOpCode::TupleRef => {
            ensure_arity(cst, args, 2)?;
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::Tuple(elems) = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a tuple".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            let index = arg_static_size(cst, args, 1)? as usize;
            let Some(elem) = elems.get(index) else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!("tuple has {} elements", elems.len()),
                }));
            };
            Ok(MultiPValue::single(PValue::new(elem.clone(), pv.is_temp)))
        }
        PrimOpCode::TupleElements => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::Tuple(elems) = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a tuple".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            let mut out = MultiPValue::new();
            for elem in elems {
                out.add(PValue::new(elem.clone(), pv.is_temp));
            }
            Ok(out)
        }

        //
        // unions
        //
        PrimOpCode::UnionMemberCount => {
            ensure_arity(cst, args, 1)?;
            let t = arg_static_type(cst, args, 0)?;
            if !matches!(t.kind, TypeKind::Union(_)) {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting a union type".to_string(),
                }));
            }
            Ok(size_result(cst))
        }

        //
        // records
        //
        PrimOpCode::RecordFieldCount => {
            ensure_arity(cst, args, 1)?;
            let _ = record_type_arg(cst, args, 0)?;
            Ok(size_result(cst))
        }
        PrimOpCode::RecordFieldName => {
            ensure_arity(cst, args, 2)?;
            let t = record_type_arg(cst, args, 0)?;
            let index = arg_static_size(cst, args, 1)? as usize;
            let fields = cst.record_field_types(&t)?;
            let Some((name, _)) = fields.get(index) else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!("record has {} fields", fields.len()),
                }));
            };
            Ok(static_result(cst, Object::Ident(name.clone())))
        }
        PrimOpCode::RecordWithFieldP => {
            ensure_arity(cst, args, 2)?;
            let _ = arg_static(cst, args, 0)?;
            let _ = arg_static_ident(cst, args, 1)?;
            Ok(bool_result(cst))
        }
        PrimOpCode::RecordFieldRef => {
            ensure_arity(cst, args, 2)?;
            let pv = arg_pv(cst, args, 0)?.clone();
            if !matches!(pv.ty.kind, TypeKind::Record { .. }) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a record".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            }
            let index = arg_static_size(cst, args, 1)? as usize;
            let fields = cst.record_field_types(&pv.ty)?;
            let Some((_, field_ty)) = fields.get(index) else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!("record has {} fields", fields.len()),
                }));
            };
            Ok(MultiPValue::single(PValue::new(field_ty.clone(), pv.is_temp)))
        }
        PrimOpCode::RecordFieldRefByName => {
            ensure_arity(cst, args, 2)?;
            let pv = arg_pv(cst, args, 0)?.clone();
            if !matches!(pv.ty.kind, TypeKind::Record { .. }) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a record".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            }
            let name = arg_static_ident(cst, args, 1)?;
            let fields = cst.record_field_types(&pv.ty)?;
            let Some((_, field_ty)) = fields
                .iter()
                .find(|(field_name, _)| field_name.name == name.name)
            else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!(
                        "{} has no field named {}",
                        TypeName(&pv.ty),
                        name.name
                    ),
                }));
            };
            Ok(MultiPValue::single(PValue::new(field_ty.clone(), pv.is_temp)))
        }
        PrimOpCode::RecordFields => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?.clone();
            if !matches!(pv.ty.kind, TypeKind::Record { .. }) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a record".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            }
            let fields = cst.record_field_types(&pv.ty)?;
            let mut out = MultiPValue::new();
            for (_, field_ty) in fields.iter() {
                out.add(PValue::new(field_ty.clone(), pv.is_temp));
            }
            Ok(out)
        }

        //
        // variants
        //
        PrimOpCode::VariantMemberIndex => {
            ensure_arity(cst, args, 2)?;
            let _ = variant_type_arg(cst, args, 0)?;
            let _ = arg_static_type(cst, args, 1)?;
            Ok(size_result(cst))
        }
        PrimOpCode::VariantMemberCount => {
            ensure_arity(cst, args, 1)?;
            let _ = variant_type_arg(cst, args, 0)?;
            Ok(size_result(cst))
        }
        PrimOpCode::VariantMembers => {
            ensure_arity(cst, args, 1)?;
            let t = variant_type_arg(cst, args, 0)?;
            let members = cst.variant_member_types(&t)?;
            let mut out = MultiPValue::new();
            for member in members.iter() {
                out.add(static_pvalue(cst, Object::Type(member.clone())));
            }
            Ok(out)
        }
        PrimOpCode::VariantRepr => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?.clone();
            let _ = dispatch_tag_count(cst, &pv.ty)?;
            let members = cst.variant_member_types(&pv.ty)?;
            let repr_ty = cst.tuple_type(vec![
                cst.c_int_type(),
                cst.union_type(members.as_ref().clone()),
            ]);
            Ok(MultiPValue::single(PValue::new(repr_ty, pv.is_temp)))
        }

        //
        // newtypes
        //
        PrimOpCode::BaseType => {
            ensure_arity(cst, args, 1)?;
            let t = arg_static_type(cst, args, 0)?;
            let TypeKind::NewType(decl) = &t.kind else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting a newtype".to_string(),
                }));
            };
            let base = cst.newtype_base_type(decl)?;
            Ok(static_result(cst, Object::Type(base)))
        }

        //
        // statics and strings
        //
        PrimOpCode::StaticName => {
            ensure_arity(cst, args, 1)?;
            let obj = arg_static(cst, args, 0)?;
            Ok(static_ident_result(cst, &format!("{}", StaticName(&obj))))
        }
        PrimOpCode::StaticIntegers => {
            ensure_arity(cst, args, 1)?;
            let n = arg_static_size(cst, args, 0)?;
            let mut out = MultiPValue::new();
            for i in 0..n {
                let holder = ValueHolder::with_bytes(
                    cst.c_int_type(),
                    (i as i32).to_le_bytes().to_vec(),
                );
                out.add(static_pvalue(cst, Object::ValueHolder(holder)));
            }
            Ok(out)
        }
        PrimOpCode::Integers => {
            ensure_arity(cst, args, 1)?;
            let n = arg_static_size(cst, args, 0)?;
            let mut out = MultiPValue::new();
            for _ in 0..n {
                out.add(PValue::new(cst.c_int_type(), true));
            }
            Ok(out)
        }
        PrimOpCode::StaticFieldRef => {
            ensure_arity(cst, args, 2)?;
            let module = match arg_static(cst, args, 0)? {
                Object::Module(m) => m,
                other => {
                    return Err(cst.diag(CompileError::ArgumentError {
                        index: 0,
                        message: format!("expecting a module, not {}", StaticName(&other)),
                    }))
                }
            };
            let name = arg_static_ident(cst, args, 1)?;
            let obj = crate::env::safe_lookup_public(cst, &module, &name)?;
            match analyze_static_object(cst, &obj)? {
                Some(mpv) => Ok(mpv),
                None => Err(cst.analysis_blocked_diag()),
            }
        }
        PrimOpCode::StringLiteralByteCount => {
            ensure_arity(cst, args, 1)?;
            let _ = arg_static_ident(cst, args, 0)?;
            Ok(size_result(cst))
        }
        PrimOpCode::StringLiteralByteSlice => {
            ensure_arity(cst, args, 3)?;
            let ident = arg_static_ident(cst, args, 0)?;
            let begin = arg_static_size(cst, args, 1)?;
            let end = arg_static_size(cst, args, 2)?;
            let Some(sliced) = string_slice(&ident.name, begin, end) else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!(
                        "byte range {}..{} out of bounds for a {}-byte string",
                        begin,
                        end,
                        ident.name.len()
                    ),
                }));
            };
            Ok(static_ident_result(cst, &sliced))
        }
        PrimOpCode::StringLiteralConcat => {
            let mut combined = String::new();
            for i in 0..args.len() {
                combined.push_str(&arg_static_ident(cst, args, i)?.name);
            }
            Ok(static_ident_result(cst, &combined))
        }
        PrimOpCode::StringLiteralFromBytes => {
            let mut bytes = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                bytes.push(arg_static_size(cst, args, i)? as u8);
            }
            let text = String::from_utf8(bytes).map_err(|_| {
                cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "invalid utf-8 in string literal bytes".to_string(),
                })
            })?;
            Ok(static_ident_result(cst, &text))
        }

        //
        // modules
        //
        PrimOpCode::MainModule => {
            ensure_arity(cst, args, 0)?;
            let module = cst.main_module().ok_or_else(|| {
                cst.diag(CompileError::InvalidOperation(
                    "no main module registered".to_string(),
                ))
            })?;
            Ok(static_result(cst, Object::Module(module)))
        }
        PrimOpCode::StaticModule => {
            ensure_arity(cst, args, 1)?;
            let obj = arg_static(cst, args, 0)?;
            let module = static_module_of(cst, &obj).ok_or_else(|| {
                cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: format!("{} has no defining module", StaticName(&obj)),
                })
            })?;
            Ok(static_result(cst, Object::Module(module)))
        }
        PrimOpCode::ModuleName => {
            ensure_arity(cst, args, 1)?;
            let obj = arg_static(cst, args, 0)?;
            let module = static_module_of(cst, &obj).ok_or_else(|| {
                cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: format!("{} has no defining module", StaticName(&obj)),
                })
            })?;
            let name = module.name.borrow().clone();
            Ok(static_ident_result(cst, &name))
        }
        PrimOpCode::ModuleMemberNames => {
            ensure_arity(cst, args, 1)?;
            let Object::Module(module) = arg_static(cst, args, 0)? else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting a module".to_string(),
                }));
            };
            let mut names: Vec<String> =
                module.public_globals.borrow().keys().cloned().collect();
            names.sort();
            let mut out = MultiPValue::new();
            for name in names {
                out.add(static_pvalue(cst, Object::Ident(Identifier::get(&name))));
            }
            Ok(out)
        }

        //
        // enums
        //
        PrimOpCode::EnumMemberCount => {
            ensure_arity(cst, args, 1)?;
            let _ = enum_type_arg(cst, args, 0)?;
            Ok(size_result(cst))
        }
        PrimOpCode::EnumMemberName => {
            ensure_arity(cst, args, 2)?;
            let t = enum_type_arg(cst, args, 0)?;
            let TypeKind::Enum(decl) = &t.kind else {
                unreachable!("checked by enum_type_arg");
            };
            let index = arg_static_size(cst, args, 1)? as usize;
            let Some(name) = decl.member_names.get(index) else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!("enum has {} members", decl.member_names.len()),
                }));
            };
            Ok(static_ident_result(cst, &name.name))
        }
        PrimOpCode::EnumToInt => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?;
            if !matches!(pv.ty.kind, TypeKind::Enum(_)) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "an enum value".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            }
            Ok(MultiPValue::single(PValue::new(cst.c_int_type(), true)))
        }
        PrimOpCode::IntToEnum => {
            ensure_arity(cst, args, 2)?;
            let t = enum_type_arg(cst, args, 0)?;
            let _ = arg_integer(cst, args, 1)?;
            Ok(MultiPValue::single(PValue::new(t, true)))
        }

        //
        // build flags
        //
        PrimOpCode::FlagP => {
            ensure_arity(cst, args, 1)?;
            let _ = arg_static_ident(cst, args, 0)?;
            Ok(bool_result(cst))
        }
        PrimOpCode::Flag => {
            ensure_arity(cst, args, 1)?;
            let ident = arg_static_ident(cst, args, 0)?;
            if !cst.has_flag(&ident.name) {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: format!("undefined build flag: {}", ident.name),
                }));
            }
            // Flags carry no value payload; the flag's presence is the
            // value.
            Ok(static_ident_result(cst, ""))
        }

        //
        // runtime-only forms: typed here, rejected by the evaluator
        //
        PrimOpCode::AtomicFence => Ok(MultiPValue::new()),
        PrimOpCode::AtomicLoad => {
            ensure_arity(cst, args, 1)?;
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::Pointer(pointee) = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            Ok(MultiPValue::single(PValue::new(pointee.clone(), true)))
        }
        PrimOpCode::AtomicStore => {
            ensure_arity(cst, args, 2)?;
            let pv = arg_pv(cst, args, 0)?;
            if !matches!(pv.ty.kind, TypeKind::Pointer(_)) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            }
            Ok(MultiPValue::new())
        }
        PrimOpCode::AtomicRMW | PrimOpCode::AtomicCompareExchange => {
            let pv = arg_pv(cst, args, 0)?;
            let TypeKind::Pointer(pointee) = &pv.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&pv.ty).to_string(),
                }));
            };
            Ok(MultiPValue::single(PValue::new(pointee.clone(), true)))
        }
        PrimOpCode::ActiveException => {
            ensure_arity(cst, args, 0)?;
            let byte_ptr = cst.pointer_type(&cst.int_type(8, false));
            Ok(MultiPValue::single(PValue::new(byte_ptr, true)))
        }

        //
        // overloadable constructors and attribute values are not direct
        // calls
        //
        PrimOpCode::Pointer
        | PrimOpCode::CodePointer
        | PrimOpCode::ExternalCodePointer
        | PrimOpCode::Array
        | PrimOpCode::Vec
        | PrimOpCode::Tuple
        | PrimOpCode::Union
        | PrimOpCode::Static
        | PrimOpCode::AttributeCCall
        | PrimOpCode::AttributeStdCall
        | PrimOpCode::AttributeFastCall
        | PrimOpCode::AttributeThisCall
        | PrimOpCode::AttributeLLVMCall
        | PrimOpCode::AttributeDLLImport
        | PrimOpCode::AttributeDLLExport => Err(cst.diag(CompileError::InvalidOperation(
            format!("{} cannot be invoked", code.name()),
        ))),
    }
}
