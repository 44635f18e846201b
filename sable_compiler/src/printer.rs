//! Diagnostic rendering of objects, types, and patterns.
//!
//! Everything here is best-effort display for error messages and match
//! logs; it never consults the compiler state, so value holders of
//! aggregate types render as placeholders rather than full values.

use std::fmt;

use crate::objects::{Object, ValueHolder};
use crate::patterns::{MultiPattern, Pattern};
use crate::types::{TypeKind, TypePtr};

pub struct TypeName<'a>(pub &'a TypePtr);

impl fmt::Display for TypeName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type(f, self.0)
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[Object]) -> fmt::Result {
    write!(f, "[")?;
    for (i, p) in params.iter().enumerate() {
        if i != 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", StaticName(p))?;
    }
    write!(f, "]")
}

fn write_type_list(f: &mut fmt::Formatter<'_>, types: &[TypePtr]) -> fmt::Result {
    write!(f, "[")?;
    for (i, t) in types.iter().enumerate() {
        if i != 0 {
            write!(f, ", ")?;
        }
        write_type(f, t)?;
    }
    write!(f, "]")
}

fn write_type(f: &mut fmt::Formatter<'_>, t: &TypePtr) -> fmt::Result {
    match &t.kind {
        TypeKind::Bool => write!(f, "Bool"),
        TypeKind::Integer { bits, signed } => {
            if *signed {
                write!(f, "Int{}", bits)
            } else {
                write!(f, "UInt{}", bits)
            }
        }
        TypeKind::Float { bits, imaginary } => {
            if *imaginary {
                write!(f, "Imag{}", bits)
            } else {
                write!(f, "Float{}", bits)
            }
        }
        TypeKind::Complex { bits } => write!(f, "Complex{}", bits),
        TypeKind::Pointer(pointee) => {
            write!(f, "Pointer[")?;
            write_type(f, pointee)?;
            write!(f, "]")
        }
        TypeKind::CodePointer {
            arg_types,
            return_types,
            ..
        } => {
            write!(f, "CodePointer[")?;
            write_type_list(f, arg_types)?;
            write!(f, ", ")?;
            write_type_list(f, return_types)?;
            write!(f, "]")
        }
        TypeKind::CCodePointer {
            arg_types,
            return_type,
            ..
        } => {
            write!(f, "ExternalCodePointer[")?;
            write_type_list(f, arg_types)?;
            write!(f, ", ")?;
            match return_type {
                Some(rt) => write_type(f, rt)?,
                None => write!(f, "[]")?,
            }
            write!(f, "]")
        }
        TypeKind::Array { element, size } => {
            write!(f, "Array[")?;
            write_type(f, element)?;
            write!(f, ", {}]", size)
        }
        TypeKind::Vec { element, size } => {
            write!(f, "Vec[")?;
            write_type(f, element)?;
            write!(f, ", {}]", size)
        }
        TypeKind::Tuple(elems) => {
            write!(f, "Tuple")?;
            write_type_list(f, elems)
        }
        TypeKind::Union(members) => {
            write!(f, "Union")?;
            write_type_list(f, members)
        }
        TypeKind::Static(obj) => {
            write!(f, "Static[{}]", StaticName(obj))
        }
        TypeKind::Record { decl, params } => {
            write!(f, "{}", decl.name.name)?;
            if !params.is_empty() {
                write_params(f, params)?;
            }
            Ok(())
        }
        TypeKind::Variant { decl, params } => {
            write!(f, "{}", decl.name.name)?;
            if !params.is_empty() {
                write_params(f, params)?;
            }
            Ok(())
        }
        TypeKind::Enum(decl) => write!(f, "{}", decl.name.name),
        TypeKind::NewType(decl) => write!(f, "{}", decl.name.name),
    }
}

fn write_value_holder(f: &mut fmt::Formatter<'_>, vh: &ValueHolder) -> fmt::Result {
    let buf = vh.buf.borrow();
    match &vh.ty.kind {
        TypeKind::Bool => write!(f, "{}", buf[0] != 0),
        TypeKind::Integer { bits, signed } => {
            let bytes = &buf[..usize::from(*bits) / 8];
            let mut raw = [0u8; 16];
            raw[..bytes.len()].copy_from_slice(bytes);
            if *signed {
                let mut value = i128::from_le_bytes(raw);
                let shift = 128 - u32::from(*bits);
                value = (value << shift) >> shift;
                write!(f, "{}", value)
            } else {
                write!(f, "{}", u128::from_le_bytes(raw))
            }
        }
        TypeKind::Float { bits: 32, .. } if buf.len() >= 4 => {
            let v = f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            write!(f, "{}", v)
        }
        TypeKind::Float { bits: 64, .. } if buf.len() >= 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[..8]);
            write!(f, "{}", f64::from_le_bytes(raw))
        }
        _ => {
            write!(f, "<value of ")?;
            write_type(f, &vh.ty)?;
            write!(f, ">")
        }
    }
}

/// Render an object the way diagnostics name compile-time entities.
pub struct StaticName<'a>(pub &'a Object);

impl fmt::Display for StaticName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Object::Ident(ident) => write!(f, "#\"{}\"", ident.name),
            Object::ValueHolder(vh) => write_value_holder(f, vh),
            Object::Type(t) => write_type(f, t),
            Object::PrimOp(p) => write!(f, "{}", p.code.name()),
            Object::Procedure(p) => write!(f, "{}", p.name.name),
            Object::Record(decl) => write!(f, "{}", decl.name.name),
            Object::Variant(decl) => write!(f, "{}", decl.name.name),
            Object::Enum(decl) => write!(f, "{}", decl.name.name),
            Object::EnumMember(member) => write!(f, "{}", member.name()),
            Object::NewType(decl) => write!(f, "{}", decl.name.name),
            Object::GlobalVariable(gvar) => write!(f, "{}", gvar.name.name),
            Object::GlobalAlias(alias) => write!(f, "{}", alias.name.name),
            Object::ExternalVariable(ev) => write!(f, "{}", ev.name.name),
            Object::ExternalProcedure(ep) => write!(f, "{}", ep.name.name),
            Object::Module(m) => write!(f, "{}", m.name.borrow()),
            Object::Intrinsic(i) => write!(f, "{}", i.name),
            Object::MultiStatic(values) => {
                write!(f, "(")?;
                for (i, v) in values.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", StaticName(v))?;
                }
                write!(f, ")")
            }
            other => write!(f, "<{}>", other.kind_name()),
        }
    }
}

/// Render an argument-type tuple as `callable(T1, T2)` context lines do.
pub fn render_args_key(callable: &Object, args_key: &[TypePtr]) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    let _ = write!(out, "{}(", StaticName(callable));
    for (i, t) in args_key.iter().enumerate() {
        if i != 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", TypeName(t));
    }
    out.push(')');
    out
}

pub struct PatternName<'a>(pub &'a Pattern);

impl fmt::Display for PatternName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Pattern::Cell(cell) => match &*cell.obj.borrow() {
                None => write!(f, "_"),
                Some(obj) => write!(f, "{}", StaticName(obj)),
            },
            Pattern::Struct(ps) => {
                match &ps.head {
                    Some(head) => write!(f, "{}", StaticName(head))?,
                    None => write!(f, "Tuple")?,
                }
                write!(f, "[{}]", MultiPatternName(&ps.params))
            }
        }
    }
}

pub struct MultiPatternName<'a>(pub &'a MultiPattern);

impl fmt::Display for MultiPatternName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            MultiPattern::Cell(cell) => match &*cell.data.borrow() {
                None => write!(f, "..."),
                Some(data) => write!(f, "{}", MultiPatternName(data)),
            },
            MultiPattern::List(list) => {
                let items = list.items.borrow();
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", PatternName(item))?;
                }
                if let Some(tail) = &*list.tail.borrow() {
                    if !items.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", MultiPatternName(tail))?;
                }
                Ok(())
            }
        }
    }
}
