//! Primitive operations, evaluated.
//!
//! One switch over `PrimOpCode` implements every primitive with exact
//! semantics: wrapping unchecked arithmetic, checked variants that fail
//! with "integer overflow: a OP b", pointer arithmetic over arena
//! offsets, aggregate access through the target layout, and specific
//! rejections for the operations that only exist at runtime (FFI,
//! atomics, exceptions, code pointers).

use std::fmt::Display;
use std::rc::Rc;

use num_traits::{CheckedAdd, CheckedMul, CheckedSub, PrimInt, WrappingAdd, WrappingMul, WrappingSub};

use crate::analyzer::{analyze_is_defined, static_to_type};
use crate::ast::ValueTempness;
use crate::error::{CompileError, Result};
use crate::evaluator::{
    eval_to_bool, ev_read, ev_write, mem_read, read_ptr, write_ptr, EValue, MultiEValue,
};
use crate::layout::{record_field_offset, tuple_element_offset, type_alignment, type_size};
use crate::objects::{IdentifierPtr, Object, PrimOpCode, ProcedureMonoState};
use crate::printer::{StaticName, TypeName};
use crate::state::CompilerState;
use crate::types::{unwrap_static_type, TypeKind, TypePtr};

//
// numeric value views
//

#[derive(Debug, Clone, Copy)]
enum IntVal {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
}

impl IntVal {
    fn as_i128(self) -> i128 {
        match self {
            Self::I8(v) => v as i128,
            Self::I16(v) => v as i128,
            Self::I32(v) => v as i128,
            Self::I64(v) => v as i128,
            Self::I128(v) => v,
            Self::U8(v) => v as i128,
            Self::U16(v) => v as i128,
            Self::U32(v) => v as i128,
            Self::U64(v) => v as i128,
            Self::U128(v) => v as i128,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::I8(v) => v as f64,
            Self::I16(v) => v as f64,
            Self::I32(v) => v as f64,
            Self::I64(v) => v as f64,
            Self::I128(v) => v as f64,
            Self::U8(v) => v as f64,
            Self::U16(v) => v as f64,
            Self::U32(v) => v as f64,
            Self::U64(v) => v as f64,
            Self::U128(v) => v as f64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FloatVal {
    F32(f32),
    F64(f64),
    /// 80-bit extended values are carried through f64; the stored bit
    /// pattern is the extended format.
    F80(f64),
}

impl FloatVal {
    fn as_f64(self) -> f64 {
        match self {
            Self::F32(v) => v as f64,
            Self::F64(v) | Self::F80(v) => v,
        }
    }
}

fn int_type_error(cst: &CompilerState, t: &TypePtr) -> crate::error::Diagnostic {
    cst.diag(CompileError::TypeMismatch {
        expected: "an integer type".to_string(),
        got: TypeName(t).to_string(),
    })
}

fn read_int(cst: &CompilerState, ev: &EValue) -> Result<IntVal> {
    let TypeKind::Integer { bits, signed } = ev.ty.kind else {
        return Err(int_type_error(cst, &ev.ty));
    };
    let bytes = ev_read(cst, ev)?;
    let mut raw = [0u8; 16];
    raw[..bytes.len()].copy_from_slice(&bytes);
    Ok(match (bits, signed) {
        (8, true) => IntVal::I8(i8::from_le_bytes([raw[0]])),
        (16, true) => IntVal::I16(i16::from_le_bytes([raw[0], raw[1]])),
        (32, true) => IntVal::I32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        (64, true) => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[..8]);
            IntVal::I64(i64::from_le_bytes(b))
        }
        (128, true) => IntVal::I128(i128::from_le_bytes(raw)),
        (8, false) => IntVal::U8(raw[0]),
        (16, false) => IntVal::U16(u16::from_le_bytes([raw[0], raw[1]])),
        (32, false) => IntVal::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        (64, false) => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[..8]);
            IntVal::U64(u64::from_le_bytes(b))
        }
        (128, false) => IntVal::U128(u128::from_le_bytes(raw)),
        _ => return Err(int_type_error(cst, &ev.ty)),
    })
}

fn write_int(cst: &CompilerState, ev: &EValue, value: IntVal) -> Result<()> {
    let bytes: Vec<u8> = match value {
        IntVal::I8(v) => v.to_le_bytes().to_vec(),
        IntVal::I16(v) => v.to_le_bytes().to_vec(),
        IntVal::I32(v) => v.to_le_bytes().to_vec(),
        IntVal::I64(v) => v.to_le_bytes().to_vec(),
        IntVal::I128(v) => v.to_le_bytes().to_vec(),
        IntVal::U8(v) => v.to_le_bytes().to_vec(),
        IntVal::U16(v) => v.to_le_bytes().to_vec(),
        IntVal::U32(v) => v.to_le_bytes().to_vec(),
        IntVal::U64(v) => v.to_le_bytes().to_vec(),
        IntVal::U128(v) => v.to_le_bytes().to_vec(),
    };
    ev_write(cst, ev, &bytes)
}

fn read_float(cst: &CompilerState, ev: &EValue) -> Result<FloatVal> {
    let TypeKind::Float { bits, .. } = ev.ty.kind else {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: "a float type".to_string(),
            got: TypeName(&ev.ty).to_string(),
        }));
    };
    let bytes = ev_read(cst, ev)?;
    Ok(match bits {
        32 => FloatVal::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            FloatVal::F64(f64::from_le_bytes(raw))
        }
        80 => FloatVal::F80(f80_decode(&bytes)),
        _ => {
            return Err(cst.diag(CompileError::TypeMismatch {
                expected: "a float type".to_string(),
                got: TypeName(&ev.ty).to_string(),
            }))
        }
    })
}

fn write_float(cst: &CompilerState, ev: &EValue, value: f64) -> Result<()> {
    let TypeKind::Float { bits, .. } = ev.ty.kind else {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: "a float type".to_string(),
            got: TypeName(&ev.ty).to_string(),
        }));
    };
    match bits {
        32 => ev_write(cst, ev, &(value as f32).to_le_bytes()),
        64 => ev_write(cst, ev, &value.to_le_bytes()),
        80 => {
            let size = type_size(cst, &ev.ty)? as usize;
            let mut bytes = vec![0u8; size];
            bytes[..10].copy_from_slice(&f80_encode(value));
            ev_write(cst, ev, &bytes)
        }
        _ => unreachable!("float widths checked above"),
    }
}

//
// 80-bit extended format
//

/// Decode x87 extended precision (little-endian, explicit integer bit)
/// to f64.
pub fn f80_decode(bytes: &[u8]) -> f64 {
    let mut mant_raw = [0u8; 8];
    mant_raw.copy_from_slice(&bytes[..8]);
    let mantissa = u64::from_le_bytes(mant_raw);
    let exp_sign = u16::from_le_bytes([bytes[8], bytes[9]]);
    let sign = if exp_sign & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = (exp_sign & 0x7fff) as i32;

    if exponent == 0 && mantissa == 0 {
        return 0.0 * sign;
    }
    if exponent == 0x7fff {
        if mantissa << 1 == 0 {
            return f64::INFINITY * sign;
        }
        return f64::NAN;
    }
    let m = (mantissa as f64) / (1u64 << 63) as f64;
    sign * m * 2f64.powi(exponent - 16383)
}

/// Encode f64 into x87 extended precision bytes.
pub fn f80_encode(value: f64) -> [u8; 10] {
    let mut out = [0u8; 10];
    let bits = value.to_bits();
    let sign = ((bits >> 63) as u16) << 15;
    let exp11 = ((bits >> 52) & 0x7ff) as i32;
    let frac52 = bits & 0xf_ffff_ffff_ffff;

    if exp11 == 0 && frac52 == 0 {
        out[8..10].copy_from_slice(&sign.to_le_bytes());
        return out;
    }
    if exp11 == 0x7ff {
        let exp_sign = sign | 0x7fff;
        let mantissa: u64 = if frac52 == 0 {
            1u64 << 63
        } else {
            (1u64 << 63) | (frac52 << 11) | (1 << 62)
        };
        out[..8].copy_from_slice(&mantissa.to_le_bytes());
        out[8..10].copy_from_slice(&exp_sign.to_le_bytes());
        return out;
    }

    let (mut exponent, mut mantissa) = if exp11 == 0 {
        // Subnormal f64: normalize into the explicit integer bit.
        let shift = frac52.leading_zeros() - 11;
        (
            -1022 - (shift as i32) + 16383,
            (frac52 << (shift + 11)) | (1u64 << 63),
        )
    } else {
        (exp11 - 1023 + 16383, (1u64 << 63) | (frac52 << 11))
    };
    if exponent <= 0 {
        mantissa >>= 1 - exponent;
        exponent = 0;
    }
    let exp_sign = sign | (exponent as u16 & 0x7fff);
    out[..8].copy_from_slice(&mantissa.to_le_bytes());
    out[8..10].copy_from_slice(&exp_sign.to_le_bytes());
    out
}

//
// checked kernels
//

fn overflow2<T: Display>(cst: &CompilerState, op: &str, a: T, b: T) -> crate::error::Diagnostic {
    cst.diag(CompileError::IntegerOverflow(format!("{} {} {}", a, op, b)))
}

fn overflow1<T: Display>(cst: &CompilerState, op: &str, a: T) -> crate::error::Diagnostic {
    cst.diag(CompileError::IntegerOverflow(format!("{}{}", op, a)))
}

fn checked_add<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt + CheckedAdd + Display,
{
    a.checked_add(&b).ok_or_else(|| overflow2(cst, "+", a, b))
}

fn checked_sub<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt + CheckedSub + Display,
{
    a.checked_sub(&b).ok_or_else(|| overflow2(cst, "-", a, b))
}

fn checked_mul<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt + CheckedMul + Display,
{
    a.checked_mul(&b).ok_or_else(|| overflow2(cst, "*", a, b))
}

fn checked_quotient<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt + Display,
{
    if b.is_zero() {
        return Err(cst.diag(CompileError::DivisionByZero));
    }
    // min / -1 is the one non-zero divisor that overflows.
    if T::min_value() != T::zero()
        && a == T::min_value()
        && b == T::zero() - T::one()
    {
        return Err(overflow2(cst, "/", a, b));
    }
    Ok(a / b)
}

fn checked_remainder<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt + Display,
{
    if b.is_zero() {
        return Err(cst.diag(CompileError::DivisionByZero));
    }
    if T::min_value() != T::zero()
        && a == T::min_value()
        && b == T::zero() - T::one()
    {
        return Ok(T::zero());
    }
    Ok(a % b)
}

fn checked_negate<T>(cst: &CompilerState, a: T) -> Result<T>
where
    T: PrimInt + Display,
{
    if T::min_value() != T::zero() && a == T::min_value() {
        return Err(overflow1(cst, "-", a));
    }
    Ok(T::zero() - a)
}

/// Checked shift-left: negative shifts are invalid, shifts past the
/// width or that discard significant bits overflow.
fn checked_shift_left<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt + Display,
{
    let bits = (std::mem::size_of::<T>() * 8) as u64;
    if b < T::zero() {
        return Err(cst.diag(CompileError::InvalidShift(format!("{} bitshl {}", a, b))));
    }
    if b.is_zero() {
        return Ok(a);
    }
    let shift = b.to_u64().unwrap_or(u64::MAX);
    let signed = T::min_value() != T::zero();
    if signed {
        let test = if a < T::zero() { !a } else { a };
        if shift > bits - 1 || (test >> (bits - shift - 1) as usize) != T::zero() {
            return Err(overflow2(cst, "bitshl", a, b));
        }
    } else if shift > bits || (a >> (bits - shift) as usize) != T::zero() {
        return Err(overflow2(cst, "bitshl", a, b));
    }
    // Only a zero value survives the checks with shift == bits.
    if shift >= bits {
        return Ok(T::zero());
    }
    Ok(a << shift as usize)
}

fn wrap_quotient<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt,
{
    if b.is_zero() {
        return Err(cst.diag(CompileError::DivisionByZero));
    }
    if T::min_value() != T::zero()
        && a == T::min_value()
        && b == T::zero() - T::one()
    {
        return Ok(T::min_value());
    }
    Ok(a / b)
}

fn wrap_remainder<T>(cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt,
{
    if b.is_zero() {
        return Err(cst.diag(CompileError::DivisionByZero));
    }
    if T::min_value() != T::zero()
        && a == T::min_value()
        && b == T::zero() - T::one()
    {
        return Ok(T::zero());
    }
    Ok(a % b)
}

macro_rules! int_binop {
    ($cst:expr, $a:expr, $b:expr, $f:expr) => {
        match ($a, $b) {
            (IntVal::I8(x), IntVal::I8(y)) => IntVal::I8($f($cst, x, y)?),
            (IntVal::I16(x), IntVal::I16(y)) => IntVal::I16($f($cst, x, y)?),
            (IntVal::I32(x), IntVal::I32(y)) => IntVal::I32($f($cst, x, y)?),
            (IntVal::I64(x), IntVal::I64(y)) => IntVal::I64($f($cst, x, y)?),
            (IntVal::I128(x), IntVal::I128(y)) => IntVal::I128($f($cst, x, y)?),
            (IntVal::U8(x), IntVal::U8(y)) => IntVal::U8($f($cst, x, y)?),
            (IntVal::U16(x), IntVal::U16(y)) => IntVal::U16($f($cst, x, y)?),
            (IntVal::U32(x), IntVal::U32(y)) => IntVal::U32($f($cst, x, y)?),
            (IntVal::U64(x), IntVal::U64(y)) => IntVal::U64($f($cst, x, y)?),
            (IntVal::U128(x), IntVal::U128(y)) => IntVal::U128($f($cst, x, y)?),
            _ => {
                return Err($cst.diag(CompileError::TypeMismatch {
                    expected: "matching integer types".to_string(),
                    got: "mixed integer types".to_string(),
                }))
            }
        }
    };
}

macro_rules! int_wrapping_binop {
    ($cst:expr, $a:expr, $b:expr, $method:ident) => {{
        fn apply<T: PrimInt + $crate::evaluator_ops::WrapOp>(
            _cst: &CompilerState,
            a: T,
            b: T,
        ) -> Result<T> {
            Ok(T::$method(&a, &b))
        }
        int_binop!($cst, $a, $b, apply)
    }};
}

/// Wrapping arithmetic surface shared by every integer width.
pub trait WrapOp: Sized {
    fn wrap_add(&self, other: &Self) -> Self;
    fn wrap_sub(&self, other: &Self) -> Self;
    fn wrap_mul(&self, other: &Self) -> Self;
}

impl<T> WrapOp for T
where
    T: WrappingAdd + WrappingSub + WrappingMul,
{
    fn wrap_add(&self, other: &Self) -> Self {
        WrappingAdd::wrapping_add(self, other)
    }

    fn wrap_sub(&self, other: &Self) -> Self {
        WrappingSub::wrapping_sub(self, other)
    }

    fn wrap_mul(&self, other: &Self) -> Self {
        WrappingMul::wrapping_mul(self, other)
    }
}

fn int_compare(cst: &CompilerState, a: IntVal, b: IntVal) -> Result<std::cmp::Ordering> {
    let ord = match (a, b) {
        (IntVal::I8(x), IntVal::I8(y)) => x.cmp(&y),
        (IntVal::I16(x), IntVal::I16(y)) => x.cmp(&y),
        (IntVal::I32(x), IntVal::I32(y)) => x.cmp(&y),
        (IntVal::I64(x), IntVal::I64(y)) => x.cmp(&y),
        (IntVal::I128(x), IntVal::I128(y)) => x.cmp(&y),
        (IntVal::U8(x), IntVal::U8(y)) => x.cmp(&y),
        (IntVal::U16(x), IntVal::U16(y)) => x.cmp(&y),
        (IntVal::U32(x), IntVal::U32(y)) => x.cmp(&y),
        (IntVal::U64(x), IntVal::U64(y)) => x.cmp(&y),
        (IntVal::U128(x), IntVal::U128(y)) => x.cmp(&y),
        _ => {
            return Err(cst.diag(CompileError::TypeMismatch {
                expected: "matching integer types".to_string(),
                got: "mixed integer types".to_string(),
            }))
        }
    };
    Ok(ord)
}

//
// argument views
//

fn arg<'a>(cst: &CompilerState, args: &'a MultiEValue, index: usize) -> Result<&'a EValue> {
    args.values.get(index).ok_or_else(|| {
        cst.diag(CompileError::Arity {
            expected: index + 1,
            got: args.values.len(),
            variadic: true,
        })
    })
}

fn value_to_static(cst: &CompilerState, args: &MultiEValue, index: usize) -> Result<Object> {
    let ev = arg(cst, args, index)?;
    unwrap_static_type(&ev.ty).ok_or_else(|| {
        cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a static value".to_string(),
        })
    })
}

fn value_to_type(cst: &CompilerState, args: &MultiEValue, index: usize) -> Result<TypePtr> {
    let obj = value_to_static(cst, args, index)?;
    static_to_type(&obj).ok_or_else(|| {
        cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a type".to_string(),
        })
    })
}

fn value_to_ident(
    cst: &CompilerState,
    args: &MultiEValue,
    index: usize,
) -> Result<IdentifierPtr> {
    match value_to_static(cst, args, index)? {
        Object::Ident(ident) => Ok(ident),
        other => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: format!("expecting a static string, not {}", StaticName(&other)),
        })),
    }
}

fn value_to_static_size(cst: &CompilerState, args: &MultiEValue, index: usize) -> Result<u64> {
    match value_to_static(cst, args, index)? {
        Object::ValueHolder(vh) => match &vh.ty.kind {
            TypeKind::Integer { .. } => Ok(vh.as_u64()),
            _ => Err(cst.diag(CompileError::ArgumentError {
                index,
                message: "expecting a static integer".to_string(),
            })),
        },
        _ => Err(cst.diag(CompileError::ArgumentError {
            index,
            message: "expecting a static integer".to_string(),
        })),
    }
}

fn write_bool(cst: &CompilerState, out: &MultiEValue, value: bool) -> Result<()> {
    ev_write(cst, &out.values[0], &[u8::from(value)])
}

fn write_size(cst: &CompilerState, out: &MultiEValue, value: u64) -> Result<()> {
    let width = cst.target.pointer_bytes as usize;
    ev_write(cst, &out.values[0], &value.to_le_bytes()[..width])
}

fn deliver_lvalue(cst: &CompilerState, src: &EValue, out: &MultiEValue) -> Result<()> {
    let dest = &out.values[0];
    if let TypeKind::Pointer(pointee) = &dest.ty.kind {
        if Rc::ptr_eq(pointee, &src.ty) {
            write_ptr(cst, dest.addr, src.addr);
            return Ok(());
        }
    }
    if Rc::ptr_eq(&dest.ty, &src.ty) {
        let bytes = ev_read(cst, src)?;
        return ev_write(cst, dest, &bytes);
    }
    Err(cst.diag(CompileError::TypeMismatch {
        expected: TypeName(&dest.ty).to_string(),
        got: TypeName(&src.ty).to_string(),
    }))
}

fn ensure_op_arity(cst: &CompilerState, args: &MultiEValue, expected: usize) -> Result<()> {
    crate::analyzer::ensure_arity(cst, expected, args.values.len())
}

//
// the switch
//

pub fn eval_prim_op(
    cst: &CompilerState,
    code: PrimOpCode,
    args: &MultiEValue,
    out: &MultiEValue,
) -> Result<()> {
    match code {
        //
        // static introspection
        //
        PrimOpCode::TypeP => {
            ensure_op_arity(cst, args, 1)?;
            let obj = value_to_static(cst, args, 0)?;
            write_bool(cst, out, matches!(obj, Object::Type(_)))
        }
        PrimOpCode::TypeSize => {
            ensure_op_arity(cst, args, 1)?;
            let t = value_to_type(cst, args, 0)?;
            write_size(cst, out, type_size(cst, &t)?)
        }
        PrimOpCode::TypeAlignment => {
            ensure_op_arity(cst, args, 1)?;
            let t = value_to_type(cst, args, 0)?;
            write_size(cst, out, type_alignment(cst, &t)?)
        }
        PrimOpCode::SymbolP => {
            ensure_op_arity(cst, args, 1)?;
            let obj = value_to_static(cst, args, 0)?;
            let is_symbol = matches!(
                obj,
                Object::Type(_)
                    | Object::Record(_)
                    | Object::Variant(_)
                    | Object::Enum(_)
                    | Object::NewType(_)
                    | Object::Procedure(_)
                    | Object::GlobalAlias(_)
            );
            write_bool(cst, out, is_symbol)
        }
        PrimOpCode::StaticCallDefinedP => {
            let callable = value_to_static(cst, args, 0)?;
            let mut args_key = Vec::with_capacity(args.len() - 1);
            for i in 1..args.len() {
                args_key.push(value_to_type(cst, args, i)?);
            }
            let tempness = vec![ValueTempness::RValue; args_key.len()];
            let defined = analyze_is_defined(cst, &callable, &args_key, &tempness)?;
            write_bool(cst, out, defined)
        }
        PrimOpCode::StaticCallOutputTypes => Ok(()),
        PrimOpCode::StaticMonoP => {
            ensure_op_arity(cst, args, 1)?;
            let obj = value_to_static(cst, args, 0)?;
            let is_mono = match obj {
                Object::Procedure(p) => {
                    p.mono.borrow().state == ProcedureMonoState::MonoOverload
                }
                _ => false,
            };
            write_bool(cst, out, is_mono)
        }
        PrimOpCode::StaticMonoInputTypes => Ok(()),

        //
        // copying
        //
        PrimOpCode::BitCopy => {
            ensure_op_arity(cst, args, 2)?;
            let dest = arg(cst, args, 0)?;
            let src = arg(cst, args, 1)?;
            if !Rc::ptr_eq(&dest.ty, &src.ty) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: TypeName(&dest.ty).to_string(),
                    got: TypeName(&src.ty).to_string(),
                }));
            }
            let bytes = ev_read(cst, src)?;
            ev_write(cst, dest, &bytes)
        }
        PrimOpCode::BitCast => {
            ensure_op_arity(cst, args, 2)?;
            let t = value_to_type(cst, args, 0)?;
            let src = arg(cst, args, 1)?;
            let (dst_size, src_size) = (type_size(cst, &t)?, type_size(cst, &src.ty)?);
            if dst_size > src_size {
                return Err(cst.diag(CompileError::InvalidBitcast(format!(
                    "destination size {} exceeds source size {}",
                    dst_size, src_size
                ))));
            }
            let (dst_align, src_align) =
                (type_alignment(cst, &t)?, type_alignment(cst, &src.ty)?);
            if dst_align > src_align {
                return Err(cst.diag(CompileError::InvalidBitcast(format!(
                    "destination alignment {} exceeds source alignment {}",
                    dst_align, src_align
                ))));
            }
            let view = EValue::new(t, src.addr);
            deliver_lvalue(cst, &view, out)
        }

        //
        // bool
        //
        PrimOpCode::BoolNot => {
            ensure_op_arity(cst, args, 1)?;
            let v = eval_to_bool(cst, arg(cst, args, 0)?)?;
            write_bool(cst, out, !v)
        }

        //
        // integer comparison
        //
        PrimOpCode::IntegerEqualsP => {
            ensure_op_arity(cst, args, 2)?;
            let result = compare_integer_or_pointer(cst, args)?;
            write_bool(cst, out, result == std::cmp::Ordering::Equal)
        }
        PrimOpCode::IntegerLesserP => {
            ensure_op_arity(cst, args, 2)?;
            let result = compare_integer_or_pointer(cst, args)?;
            write_bool(cst, out, result == std::cmp::Ordering::Less)
        }

        //
        // arithmetic
        //
        PrimOpCode::NumericAdd => numeric_binop(cst, args, out, NumericBinop::Add),
        PrimOpCode::NumericSubtract => numeric_binop(cst, args, out, NumericBinop::Sub),
        PrimOpCode::NumericMultiply => numeric_binop(cst, args, out, NumericBinop::Mul),
        PrimOpCode::FloatDivide => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_float(cst, arg(cst, args, 0)?)?;
            let b = read_float(cst, arg(cst, args, 1)?)?;
            write_float(cst, &out.values[0], a.as_f64() / b.as_f64())
        }
        PrimOpCode::NumericNegate => {
            ensure_op_arity(cst, args, 1)?;
            let ev = arg(cst, args, 0)?;
            match &ev.ty.kind {
                TypeKind::Integer { .. } => {
                    // Wrapping negate, expressed as 0 - a.
                    let a = read_int(cst, ev)?;
                    let r = int_binop!(cst, int_zero_like(a), a, wrap_sub_vals);
                    write_int(cst, &out.values[0], r)
                }
                _ => {
                    let a = read_float(cst, ev)?;
                    write_float(cst, &out.values[0], -a.as_f64())
                }
            }
        }
        PrimOpCode::IntegerQuotient => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, wrap_quotient);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerRemainder => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, wrap_remainder);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerShiftLeft => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            fn shl<T: PrimInt>(_cst: &CompilerState, a: T, b: T) -> Result<T> {
                let shift = b.to_u64().unwrap_or(0) as u32;
                let bits = (std::mem::size_of::<T>() * 8) as u32;
                Ok(if shift >= bits {
                    T::zero()
                } else {
                    a << shift as usize
                })
            }
            let r = int_binop!(cst, a, b, shl);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerShiftRight => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            fn shr<T: PrimInt>(_cst: &CompilerState, a: T, b: T) -> Result<T> {
                let shift = b.to_u64().unwrap_or(0) as u32;
                let bits = (std::mem::size_of::<T>() * 8) as u32;
                let shift = shift.min(bits - 1);
                Ok(a >> shift as usize)
            }
            let r = int_binop!(cst, a, b, shr);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerBitwiseAnd => {
            bitwise_binop(cst, args, out, |a, b| a & b)
        }
        PrimOpCode::IntegerBitwiseOr => {
            bitwise_binop(cst, args, out, |a, b| a | b)
        }
        PrimOpCode::IntegerBitwiseXor => {
            bitwise_binop(cst, args, out, |a, b| a ^ b)
        }
        PrimOpCode::IntegerBitwiseNot => {
            ensure_op_arity(cst, args, 1)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            fn bnot<T: PrimInt>(_cst: &CompilerState, a: T, _b: T) -> Result<T> {
                Ok(!a)
            }
            let r = int_binop!(cst, a, a, bnot);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::NumericConvert => {
            ensure_op_arity(cst, args, 2)?;
            let dest_ty = value_to_type(cst, args, 0)?;
            numeric_convert(cst, &dest_ty, arg(cst, args, 1)?, &out.values[0], false)
        }
        PrimOpCode::IntegerConvertChecked => {
            ensure_op_arity(cst, args, 2)?;
            let dest_ty = value_to_type(cst, args, 0)?;
            numeric_convert(cst, &dest_ty, arg(cst, args, 1)?, &out.values[0], true)
        }

        //
        // checked arithmetic
        //
        PrimOpCode::IntegerAddChecked => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, checked_add);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerSubtractChecked => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, checked_sub);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerMultiplyChecked => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, checked_mul);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerQuotientChecked => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, checked_quotient);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerRemainderChecked => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, checked_remainder);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerShiftLeftChecked => {
            ensure_op_arity(cst, args, 2)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            let b = read_int(cst, arg(cst, args, 1)?)?;
            let r = int_binop!(cst, a, b, checked_shift_left);
            write_int(cst, &out.values[0], r)
        }
        PrimOpCode::IntegerNegateChecked => {
            ensure_op_arity(cst, args, 1)?;
            let a = read_int(cst, arg(cst, args, 0)?)?;
            fn neg<T: PrimInt + Display>(cst: &CompilerState, a: T, _b: T) -> Result<T> {
                checked_negate(cst, a)
            }
            let r = int_binop!(cst, a, a, neg);
            write_int(cst, &out.values[0], r)
        }

        //
        // float comparison
        //
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
            ensure_op_arity(cst, args, 2)?;
            let a = read_float(cst, arg(cst, args, 0)?)?.as_f64();
            let b = read_float(cst, arg(cst, args, 1)?)?.as_f64();
            let result = match code {
                PrimOpCode::FloatOrderedEqualsP => a == b,
                PrimOpCode::FloatOrderedLesserP => a < b,
                PrimOpCode::FloatOrderedLesserEqualsP => a <= b,
                PrimOpCode::FloatOrderedGreaterP => a > b,
                PrimOpCode::FloatOrderedGreaterEqualsP => a >= b,
                PrimOpCode::FloatOrderedNotEqualsP => a != b && a == a && b == b,
                PrimOpCode::FloatOrderedP => a == a && b == b,
                PrimOpCode::FloatUnorderedEqualsP => a == b || a != a || b != b,
                PrimOpCode::FloatUnorderedLesserP => !(a >= b),
                PrimOpCode::FloatUnorderedLesserEqualsP => !(a > b),
                PrimOpCode::FloatUnorderedGreaterP => !(a <= b),
                PrimOpCode::FloatUnorderedGreaterEqualsP => !(a < b),
                PrimOpCode::FloatUnorderedNotEqualsP => a != b,
                PrimOpCode::FloatUnorderedP => a != a || b != b,
                _ => unreachable!("float comparison codes"),
            };
            write_bool(cst, out, result)
        }

        //
        // pointers
        //
        PrimOpCode::AddressOf => {
            ensure_op_arity(cst, args, 1)?;
            let ev = arg(cst, args, 0)?;
            write_ptr(cst, out.values[0].addr, ev.addr);
            Ok(())
        }
        PrimOpCode::PointerDereference => {
            ensure_op_arity(cst, args, 1)?;
            let ev = arg(cst, args, 0)?;
            let TypeKind::Pointer(pointee) = &ev.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&ev.ty).to_string(),
                }));
            };
            let referent = EValue::new(pointee.clone(), read_ptr(cst, ev.addr));
            deliver_lvalue(cst, &referent, out)
        }
        PrimOpCode::PointerOffset => {
            ensure_op_arity(cst, args, 2)?;
            let ev = arg(cst, args, 0)?;
            let TypeKind::Pointer(pointee) = &ev.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&ev.ty).to_string(),
                }));
            };
            let offset = read_int(cst, arg(cst, args, 1)?)?.as_i128();
            let elem_size = type_size(cst, pointee)? as i128;
            let base = read_ptr(cst, ev.addr) as i128;
            let addr = base + offset * elem_size;
            write_ptr(cst, out.values[0].addr, addr as usize);
            Ok(())
        }
        PrimOpCode::PointerToInt => {
            ensure_op_arity(cst, args, 2)?;
            let dest_ty = value_to_type(cst, args, 0)?;
            let ev = arg(cst, args, 1)?;
            if !matches!(ev.ty.kind, TypeKind::Pointer(_)) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a pointer".to_string(),
                    got: TypeName(&ev.ty).to_string(),
                }));
            }
            let addr = read_ptr(cst, ev.addr) as u64;
            let size = type_size(cst, &dest_ty)? as usize;
            let mut bytes = vec![0u8; size];
            let raw = addr.to_le_bytes();
            let copy = size.min(raw.len());
            bytes[..copy].copy_from_slice(&raw[..copy]);
            ev_write(cst, &out.values[0], &bytes)
        }
        PrimOpCode::IntToPointer => {
            ensure_op_arity(cst, args, 2)?;
            let _pointee = value_to_type(cst, args, 0)?;
            let value = read_int(cst, arg(cst, args, 1)?)?.as_i128();
            write_ptr(cst, out.values[0].addr, value as usize);
            Ok(())
        }
        PrimOpCode::NullPointer => {
            ensure_op_arity(cst, args, 1)?;
            write_ptr(cst, out.values[0].addr, 0);
            Ok(())
        }

        //
        // code pointers and externals
        //
        PrimOpCode::MakeCodePointer => Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            "creating code pointers is".to_string(),
        ))),
        PrimOpCode::MakeExternalCodePointer | PrimOpCode::CallExternalCodePointer => {
            Err(cst.diag(CompileError::UnsupportedAtCompileTime(
                "external function calls are".to_string(),
            )))
        }

        //
        // arrays
        //
        PrimOpCode::ArrayRef => {
            ensure_op_arity(cst, args, 2)?;
            let arr = arg(cst, args, 0)?;
            let TypeKind::Array { element, size } = &arr.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "an array".to_string(),
                    got: TypeName(&arr.ty).to_string(),
                }));
            };
            let index = read_int(cst, arg(cst, args, 1)?)?.as_i128();
            if index < 0 || index >= *size as i128 {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!("array index {} out of range for size {}", index, size),
                }));
            }
            let elem_size = type_size(cst, element)? as usize;
            let elem = EValue::new(element.clone(), arr.addr + index as usize * elem_size);
            deliver_lvalue(cst, &elem, out)
        }
        PrimOpCode::ArrayElements => {
            ensure_op_arity(cst, args, 1)?;
            let arr = arg(cst, args, 0)?;
            let TypeKind::Array { element, size } = &arr.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "an array".to_string(),
                    got: TypeName(&arr.ty).to_string(),
                }));
            };
            let elem_size = type_size(cst, element)? as usize;
            for i in 0..*size as usize {
                let elem = EValue::new(element.clone(), arr.addr + i * elem_size);
                deliver_lvalue(
                    cst,
                    &elem,
                    &MultiEValue::single(out.values[i].clone()),
                )?;
            }
            Ok(())
        }

        //
        // tuples
        //
        PrimOpCode::TupleElementCount => {
            ensure_op_arity(cst, args, 1)?;
            let t = value_to_type(cst, args, 0)?;
            let TypeKind::Tuple(elems) = &t.kind else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting a tuple type".to_string(),
                }));
            };
            write_size(cst, out, elems.len() as u64)
        }
        PrimOpCode::TupleRef => {
            ensure_op_arity(cst, args, 2)?;
            let tup = arg(cst, args, 0)?;
            let index = value_to_static_size(cst, args, 1)? as usize;
            let TypeKind::Tuple(elems) = &tup.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a tuple".to_string(),
                    got: TypeName(&tup.ty).to_string(),
                }));
            };
            if index >= elems.len() {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!("tuple has {} elements", elems.len()),
                }));
            }
            let offset = tuple_element_offset(cst, &tup.ty, index)? as usize;
            let elem = EValue::new(elems[index].clone(), tup.addr + offset);
            deliver_lvalue(cst, &elem, out)
        }
        PrimOpCode::TupleElements => {
            ensure_op_arity(cst, args, 1)?;
            let tup = arg(cst, args, 0)?;
            let TypeKind::Tuple(elems) = &tup.ty.kind else {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "a tuple".to_string(),
                    got: TypeName(&tup.ty).to_string(),
                }));
            };
            for (i, elem_ty) in elems.iter().enumerate() {
                let offset = tuple_element_offset(cst, &tup.ty, i)? as usize;
                let elem = EValue::new(elem_ty.clone(), tup.addr + offset);
                deliver_lvalue(
                    cst,
                    &elem,
                    &MultiEValue::single(out.values[i].clone()),
                )?;
            }
            Ok(())
        }

        //
        // unions
        //
        PrimOpCode::UnionMemberCount => {
            ensure_op_arity(cst, args, 1)?;
            let t = value_to_type(cst, args, 0)?;
            let TypeKind::Union(members) = &t.kind else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting a union type".to_string(),
                }));
            };
            write_size(cst, out, members.len() as u64)
        }

        //
        // records
        //
        PrimOpCode::RecordP => {
            ensure_op_arity(cst, args, 1)?;
            let obj = value_to_static(cst, args, 0)?;
            let is_record = matches!(&obj, Object::Type(t) if matches!(t.kind, TypeKind::Record { .. }));
            write_bool(cst, out, is_record)
        }
        PrimOpCode::RecordFieldCount => {
            ensure_op_arity(cst, args, 1)?;
            let t = value_to_type(cst, args, 0)?;
            let fields = cst.record_field_types(&t)?;
            write_size(cst, out, fields.len() as u64)
        }
        PrimOpCode::RecordFieldName => Ok(()),
        PrimOpCode::RecordWithFieldP => {
            ensure_op_arity(cst, args, 2)?;
            let t = value_to_type(cst, args, 0)?;
            let name = value_to_ident(cst, args, 1)?;
            let has_field = matches!(t.kind, TypeKind::Record { .. })
                && cst
                    .record_field_types(&t)?
                    .iter()
                    .any(|(field_name, _)| field_name.name == name.name);
            write_bool(cst, out, has_field)
        }
        PrimOpCode::RecordFieldRef => {
            ensure_op_arity(cst, args, 2)?;
            let record = arg(cst, args, 0)?;
            let index = value_to_static_size(cst, args, 1)? as usize;
            let fields = cst.record_field_types(&record.ty)?;
            if index >= fields.len() {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!("record has {} fields", fields.len()),
                }));
            }
            let offset = record_field_offset(cst, &record.ty, index)? as usize;
            let field = EValue::new(fields[index].1.clone(), record.addr + offset);
            deliver_lvalue(cst, &field, out)
        }
        PrimOpCode::RecordFieldRefByName => {
            ensure_op_arity(cst, args, 2)?;
            let record = arg(cst, args, 0)?;
            let name = value_to_ident(cst, args, 1)?;
            let fields = cst.record_field_types(&record.ty)?;
            let Some(index) = fields
                .iter()
                .position(|(field_name, _)| field_name.name == name.name)
            else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!(
                        "{} has no field named {}",
                        TypeName(&record.ty),
                        name.name
                    ),
                }));
            };
            let offset = record_field_offset(cst, &record.ty, index)? as usize;
            let field = EValue::new(fields[index].1.clone(), record.addr + offset);
            deliver_lvalue(cst, &field, out)
        }
        PrimOpCode::RecordFields => {
            ensure_op_arity(cst, args, 1)?;
            let record = arg(cst, args, 0)?;
            let fields = cst.record_field_types(&record.ty)?;
            for (i, (_, field_ty)) in fields.iter().enumerate() {
                let offset = record_field_offset(cst, &record.ty, i)? as usize;
                let field = EValue::new(field_ty.clone(), record.addr + offset);
                deliver_lvalue(
                    cst,
                    &field,
                    &MultiEValue::single(out.values[i].clone()),
                )?;
            }
            Ok(())
        }

        //
        // variants
        //
        PrimOpCode::VariantP => {
            ensure_op_arity(cst, args, 1)?;
            let obj = value_to_static(cst, args, 0)?;
            let is_variant =
                matches!(&obj, Object::Type(t) if matches!(t.kind, TypeKind::Variant { .. }));
            write_bool(cst, out, is_variant)
        }
        PrimOpCode::VariantMemberIndex => {
            ensure_op_arity(cst, args, 2)?;
            let t = value_to_type(cst, args, 0)?;
            let member = value_to_type(cst, args, 1)?;
            let members = cst.variant_member_types(&t)?;
            let Some(index) = members.iter().position(|m| Rc::ptr_eq(m, &member)) else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 1,
                    message: format!(
                        "{} is not a member of {}",
                        TypeName(&member),
                        TypeName(&t)
                    ),
                }));
            };
            write_size(cst, out, index as u64)
        }
        PrimOpCode::VariantMemberCount => {
            ensure_op_arity(cst, args, 1)?;
            let t = value_to_type(cst, args, 0)?;
            let members = cst.variant_member_types(&t)?;
            write_size(cst, out, members.len() as u64)
        }
        PrimOpCode::VariantMembers => Ok(()),
        PrimOpCode::VariantRepr => {
            ensure_op_arity(cst, args, 1)?;
            let variant = arg(cst, args, 0)?;
            let members = cst.variant_member_types(&variant.ty)?;
            let repr_ty = cst.tuple_type(vec![
                cst.c_int_type(),
                cst.union_type(members.as_ref().clone()),
            ]);
            let repr = EValue::new(repr_ty, variant.addr);
            deliver_lvalue(cst, &repr, out)
        }

        //
        // newtypes
        //
        PrimOpCode::BaseType => Ok(()),

        //
        // statics and strings
        //
        PrimOpCode::StaticName
        | PrimOpCode::StaticIntegers
        | PrimOpCode::StringLiteralByteSlice
        | PrimOpCode::StringLiteralConcat
        | PrimOpCode::StringLiteralFromBytes => Ok(()),
        PrimOpCode::Integers => {
            ensure_op_arity(cst, args, 1)?;
            let n = value_to_static_size(cst, args, 0)?;
            for i in 0..n {
                ev_write(cst, &out.values[i as usize], &(i as i32).to_le_bytes())?;
            }
            Ok(())
        }
        PrimOpCode::StaticFieldRef => {
            ensure_op_arity(cst, args, 2)?;
            let module = match value_to_static(cst, args, 0)? {
                Object::Module(m) => m,
                other => {
                    return Err(cst.diag(CompileError::ArgumentError {
                        index: 0,
                        message: format!("expecting a module, not {}", StaticName(&other)),
                    }))
                }
            };
            let name = value_to_ident(cst, args, 1)?;
            let obj = crate::env::safe_lookup_public(cst, &module, &name)?;
            crate::evaluator::eval_static_object(cst, &obj, out)
        }
        PrimOpCode::StringLiteralP => {
            ensure_op_arity(cst, args, 1)?;
            let obj = value_to_static(cst, args, 0);
            write_bool(cst, out, matches!(obj, Ok(Object::Ident(_))))
        }
        PrimOpCode::StringLiteralByteCount => {
            ensure_op_arity(cst, args, 1)?;
            let ident = value_to_ident(cst, args, 0)?;
            write_size(cst, out, ident.name.len() as u64)
        }

        //
        // modules
        //
        PrimOpCode::MainModule
        | PrimOpCode::StaticModule
        | PrimOpCode::ModuleName
        | PrimOpCode::ModuleMemberNames => Ok(()),

        //
        // enums
        //
        PrimOpCode::EnumP => {
            ensure_op_arity(cst, args, 1)?;
            let obj = value_to_static(cst, args, 0)?;
            let is_enum = matches!(&obj, Object::Type(t) if matches!(t.kind, TypeKind::Enum(_)));
            write_bool(cst, out, is_enum)
        }
        PrimOpCode::EnumMemberCount => {
            ensure_op_arity(cst, args, 1)?;
            let t = value_to_type(cst, args, 0)?;
            let TypeKind::Enum(decl) = &t.kind else {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting an enum type".to_string(),
                }));
            };
            write_size(cst, out, decl.member_names.len() as u64)
        }
        PrimOpCode::EnumMemberName => Ok(()),
        PrimOpCode::EnumToInt => {
            ensure_op_arity(cst, args, 1)?;
            let ev = arg(cst, args, 0)?;
            if !matches!(ev.ty.kind, TypeKind::Enum(_)) {
                return Err(cst.diag(CompileError::TypeMismatch {
                    expected: "an enum value".to_string(),
                    got: TypeName(&ev.ty).to_string(),
                }));
            }
            let bytes = mem_read(cst, ev.addr, 4);
            ev_write(cst, &out.values[0], &bytes)
        }
        PrimOpCode::IntToEnum => {
            ensure_op_arity(cst, args, 2)?;
            let t = value_to_type(cst, args, 0)?;
            if !matches!(t.kind, TypeKind::Enum(_)) {
                return Err(cst.diag(CompileError::ArgumentError {
                    index: 0,
                    message: "expecting an enum type".to_string(),
                }));
            }
            let value = read_int(cst, arg(cst, args, 1)?)?.as_i128() as i32;
            ev_write(cst, &out.values[0], &value.to_le_bytes())
        }

        //
        // build flags
        //
        PrimOpCode::FlagP => {
            ensure_op_arity(cst, args, 1)?;
            let ident = value_to_ident(cst, args, 0)?;
            write_bool(cst, out, cst.has_flag(&ident.name))
        }
        PrimOpCode::Flag => Ok(()),

        //
        // runtime-only operations
        //
        PrimOpCode::AtomicFence
        | PrimOpCode::AtomicRMW
        | PrimOpCode::AtomicLoad
        | PrimOpCode::AtomicStore
        | PrimOpCode::AtomicCompareExchange => Err(cst.diag(
            CompileError::UnsupportedAtCompileTime("atomic operations are".to_string()),
        )),
        PrimOpCode::ActiveException => Err(cst.diag(CompileError::UnsupportedAtCompileTime(
            "exceptions are".to_string(),
        ))),

        //
        // overloadable constructors arrive through the resolver, not
        // here
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

//
// shared op bodies
//

fn wrap_sub_vals<T>(_cst: &CompilerState, a: T, b: T) -> Result<T>
where
    T: PrimInt + WrapOp,
{
    Ok(a.wrap_sub(&b))
}

fn int_zero_like(v: IntVal) -> IntVal {
    match v {
        IntVal::I8(_) => IntVal::I8(0),
        IntVal::I16(_) => IntVal::I16(0),
        IntVal::I32(_) => IntVal::I32(0),
        IntVal::I64(_) => IntVal::I64(0),
        IntVal::I128(_) => IntVal::I128(0),
        IntVal::U8(_) => IntVal::U8(0),
        IntVal::U16(_) => IntVal::U16(0),
        IntVal::U32(_) => IntVal::U32(0),
        IntVal::U64(_) => IntVal::U64(0),
        IntVal::U128(_) => IntVal::U128(0),
    }
}

#[derive(Debug, Clone, Copy)]
enum NumericBinop {
    Add,
    Sub,
    Mul,
}

fn numeric_binop(
    cst: &CompilerState,
    args: &MultiEValue,
    out: &MultiEValue,
    op: NumericBinop,
) -> Result<()> {
    ensure_op_arity(cst, args, 2)?;
    let lhs = arg(cst, args, 0)?;
    let rhs = arg(cst, args, 1)?;
    if !Rc::ptr_eq(&lhs.ty, &rhs.ty) {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: TypeName(&lhs.ty).to_string(),
            got: TypeName(&rhs.ty).to_string(),
        }));
    }
    match &lhs.ty.kind {
        TypeKind::Integer { .. } => {
            let a = read_int(cst, lhs)?;
            let b = read_int(cst, rhs)?;
            let r = match op {
                NumericBinop::Add => int_wrapping_binop!(cst, a, b, wrap_add),
                NumericBinop::Sub => int_wrapping_binop!(cst, a, b, wrap_sub),
                NumericBinop::Mul => int_wrapping_binop!(cst, a, b, wrap_mul),
            };
            write_int(cst, &out.values[0], r)
        }
        TypeKind::Float { .. } => {
            let a = read_float(cst, lhs)?.as_f64();
            let b = read_float(cst, rhs)?.as_f64();
            let r = match op {
                NumericBinop::Add => a + b,
                NumericBinop::Sub => a - b,
                NumericBinop::Mul => a * b,
            };
            write_float(cst, &out.values[0], r)
        }
        _ => Err(cst.diag(CompileError::TypeMismatch {
            expected: "a numeric type".to_string(),
            got: TypeName(&lhs.ty).to_string(),
        })),
    }
}

fn bitwise_binop(
    cst: &CompilerState,
    args: &MultiEValue,
    out: &MultiEValue,
    op: fn(u128, u128) -> u128,
) -> Result<()> {
    ensure_op_arity(cst, args, 2)?;
    let lhs = arg(cst, args, 0)?;
    let rhs = arg(cst, args, 1)?;
    if !Rc::ptr_eq(&lhs.ty, &rhs.ty) {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: TypeName(&lhs.ty).to_string(),
            got: TypeName(&rhs.ty).to_string(),
        }));
    }
    let size = type_size(cst, &lhs.ty)? as usize;
    let mut a_raw = [0u8; 16];
    let mut b_raw = [0u8; 16];
    a_raw[..size].copy_from_slice(&ev_read(cst, lhs)?);
    b_raw[..size].copy_from_slice(&ev_read(cst, rhs)?);
    let result = op(u128::from_le_bytes(a_raw), u128::from_le_bytes(b_raw));
    ev_write(cst, &out.values[0], &result.to_le_bytes()[..size])
}

fn compare_integer_or_pointer(
    cst: &CompilerState,
    args: &MultiEValue,
) -> Result<std::cmp::Ordering> {
    let lhs = arg(cst, args, 0)?;
    let rhs = arg(cst, args, 1)?;
    if !Rc::ptr_eq(&lhs.ty, &rhs.ty) {
        return Err(cst.diag(CompileError::TypeMismatch {
            expected: TypeName(&lhs.ty).to_string(),
            got: TypeName(&rhs.ty).to_string(),
        }));
    }
    match &lhs.ty.kind {
        TypeKind::Integer { .. } => {
            let a = read_int(cst, lhs)?;
            let b = read_int(cst, rhs)?;
            int_compare(cst, a, b)
        }
        TypeKind::Pointer(_) | TypeKind::CodePointer { .. } | TypeKind::CCodePointer { .. } => {
            let a = read_ptr(cst, lhs.addr);
            let b = read_ptr(cst, rhs.addr);
            Ok(a.cmp(&b))
        }
        TypeKind::Enum(_) => {
            let a = i32::from_le_bytes(mem_read(cst, lhs.addr, 4).try_into().expect("4 bytes"));
            let b = i32::from_le_bytes(mem_read(cst, rhs.addr, 4).try_into().expect("4 bytes"));
            Ok(a.cmp(&b))
        }
        _ => Err(cst.diag(CompileError::TypeMismatch {
            expected: "an integer or pointer type".to_string(),
            got: TypeName(&lhs.ty).to_string(),
        })),
    }
}

/// Numeric conversion. Unchecked conversion follows C: integers
/// truncate or extend, floats round, float-to-int truncates toward
/// zero. Checked integer conversion rejects out-of-range values.
fn numeric_convert(
    cst: &CompilerState,
    dest_ty: &TypePtr,
    src: &EValue,
    dest: &EValue,
    checked: bool,
) -> Result<()> {
    debug_assert!(Rc::ptr_eq(&dest.ty, dest_ty));
    match (&src.ty.kind, &dest_ty.kind) {
        (TypeKind::Integer { .. }, TypeKind::Integer { bits, signed }) => {
            let value = read_int(cst, src)?;
            let wide = match value {
                IntVal::U128(v) => {
                    if checked && !unsigned_fits(v, *bits, *signed) {
                        return Err(cst.diag(CompileError::IntegerOverflow(v.to_string())));
                    }
                    v
                }
                other => {
                    let v = other.as_i128();
                    if checked && !signed_fits(v, *bits, *signed) {
                        return Err(cst.diag(CompileError::IntegerOverflow(v.to_string())));
                    }
                    v as u128
                }
            };
            let size = (*bits as usize) / 8;
            ev_write(cst, dest, &wide.to_le_bytes()[..size])
        }
        (TypeKind::Integer { .. }, TypeKind::Float { .. }) => {
            let value = read_int(cst, src)?;
            write_float(cst, dest, value.as_f64())
        }
        (TypeKind::Float { .. }, TypeKind::Integer { bits, signed }) => {
            let value = read_float(cst, src)?.as_f64();
            let truncated = value.trunc();
            if checked
                && (!truncated.is_finite() || !signed_fits(truncated as i128, *bits, *signed))
            {
                return Err(cst.diag(CompileError::IntegerOverflow(value.to_string())));
            }
            let wide = truncated as i128 as u128;
            let size = (*bits as usize) / 8;
            ev_write(cst, dest, &wide.to_le_bytes()[..size])
        }
        (TypeKind::Float { .. }, TypeKind::Float { .. }) => {
            let value = read_float(cst, src)?.as_f64();
            write_float(cst, dest, value)
        }
        _ => Err(cst.diag(CompileError::TypeMismatch {
            expected: "numeric types".to_string(),
            got: format!("{} to {}", TypeName(&src.ty), TypeName(dest_ty)),
        })),
    }
}

fn signed_fits(value: i128, bits: u8, signed: bool) -> bool {
    if bits == 128 {
        return signed || value >= 0;
    }
    if signed {
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        value >= min && value <= max
    } else {
        value >= 0 && value < (1i128 << bits)
    }
}

fn unsigned_fits(value: u128, bits: u8, signed: bool) -> bool {
    if bits == 128 {
        return !signed || value <= i128::MAX as u128;
    }
    if signed {
        value < (1u128 << (bits - 1))
    } else {
        value < (1u128 << bits)
    }
}

/// Compute the byte image of the static result of a string primitive;
/// the analyzer uses these to build the static objects eagerly.
pub fn string_slice(name: &str, begin: u64, end: u64) -> Option<String> {
    let begin = begin as usize;
    let end = end as usize;
    if begin > end || end > name.len() {
        return None;
    }
    Some(name[begin..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_matches_math() {
        let cst = CompilerState::new().expect("compiler state");
        assert_eq!(checked_add(&cst, 10i8, 20i8).expect("fits"), 30);
        let err = checked_add(&cst, 100i8, 100i8).expect_err("overflows");
        assert_eq!(
            err.error,
            CompileError::IntegerOverflow("100 + 100".to_string())
        );
    }

    #[test]
    fn test_checked_quotient_rejects_min_div_minus_one() {
        let cst = CompilerState::new().expect("compiler state");
        assert_eq!(checked_quotient(&cst, 7i32, 2i32).expect("ok"), 3);
        assert!(matches!(
            checked_quotient(&cst, 1i32, 0i32).expect_err("div by zero").error,
            CompileError::DivisionByZero
        ));
        assert!(matches!(
            checked_quotient(&cst, i32::MIN, -1i32)
                .expect_err("overflow")
                .error,
            CompileError::IntegerOverflow(_)
        ));
    }

    #[test]
    fn test_checked_shift_left() {
        let cst = CompilerState::new().expect("compiler state");
        assert_eq!(checked_shift_left(&cst, 1i32, 4i32).expect("ok"), 16);
        assert!(matches!(
            checked_shift_left(&cst, 1i32, -1i32)
                .expect_err("negative shift")
                .error,
            CompileError::InvalidShift(_)
        ));
        assert!(matches!(
            checked_shift_left(&cst, 1i8, 7i8).expect_err("drops sign bit").error,
            CompileError::IntegerOverflow(_)
        ));
        assert_eq!(checked_shift_left(&cst, 1u8, 7u8).expect("ok"), 128);
    }

    #[test]
    fn test_checked_negate_min() {
        let cst = CompilerState::new().expect("compiler state");
        assert_eq!(checked_negate(&cst, 5i16).expect("ok"), -5);
        assert!(checked_negate(&cst, i16::MIN).is_err());
        assert!(checked_negate(&cst, 0u8).is_ok());
    }

    #[test]
    fn test_f80_round_trip() {
        for value in [0.0f64, 1.0, -1.5, 1234.5678, 1e-300, -3.25e10] {
            let encoded = f80_encode(value);
            let decoded = f80_decode(&encoded);
            let error = (decoded - value).abs();
            let tolerance = value.abs() * 1e-12 + 1e-307;
            assert!(
                error <= tolerance,
                "f80 round trip drifted: {} -> {}",
                value,
                decoded
            );
        }
    }

    #[test]
    fn test_f80_specials() {
        assert!(f80_decode(&f80_encode(f64::INFINITY)).is_infinite());
        assert!(f80_decode(&f80_encode(f64::NAN)).is_nan());
        assert_eq!(f80_decode(&f80_encode(0.0)), 0.0);
    }

    #[test]
    fn test_signed_fits() {
        assert!(signed_fits(127, 8, true));
        assert!(!signed_fits(128, 8, true));
        assert!(signed_fits(-128, 8, true));
        assert!(!signed_fits(-129, 8, true));
        assert!(signed_fits(255, 8, false));
        assert!(!signed_fits(256, 8, false));
        assert!(!signed_fits(-1, 8, false));
    }

    #[test]
    fn test_string_slice_bounds() {
        assert_eq!(string_slice("hello", 1, 3), Some("el".to_string()));
        assert_eq!(string_slice("hello", 3, 2), None);
        assert_eq!(string_slice("hello", 0, 9), None);
    }
}
