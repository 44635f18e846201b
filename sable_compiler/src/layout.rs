//! Target data layout.
//!
//! Sizes, alignments, and aggregate field offsets for compile-time values.
//! This module answers the questions the code generator's data layout
//! would answer, parameterized by a `target_lexicon` triple so the
//! compile-time bit patterns match the active target. Layout follows the
//! usual C rules: fields at aligned offsets, aggregates padded to their
//! max member alignment.

use target_lexicon::Triple;

use crate::error::{CompileError, Result};
use crate::state::CompilerState;
use crate::types::{TypeKind, TypePtr};

#[derive(Debug)]
pub struct TargetLayout {
    pub triple: Triple,
    pub pointer_bytes: u64,
}

impl TargetLayout {
    pub fn new(triple: Triple) -> Self {
        let pointer_bytes = triple
            .pointer_width()
            .map(|w| u64::from(w.bytes()))
            .unwrap_or(8);
        Self {
            triple,
            pointer_bytes,
        }
    }

    pub fn host() -> Self {
        Self::new(Triple::host())
    }

    pub fn pointer_bits(&self) -> u64 {
        self.pointer_bytes * 8
    }

    fn float80_size_align(&self) -> (u64, u64) {
        // x87 extended precision occupies 16 bytes on 64-bit targets,
        // 12 bytes (4-aligned) on 32-bit ones.
        if self.pointer_bytes == 8 {
            (16, 16)
        } else {
            (12, 4)
        }
    }
}

/// Size of a type in target bytes; cached on the type node.
pub fn type_size(cst: &CompilerState, t: &TypePtr) -> Result<u64> {
    Ok(size_align(cst, t)?.0)
}

/// Alignment of a type in target bytes; cached on the type node.
pub fn type_alignment(cst: &CompilerState, t: &TypePtr) -> Result<u64> {
    Ok(size_align(cst, t)?.1)
}

pub fn size_align(cst: &CompilerState, t: &TypePtr) -> Result<(u64, u64)> {
    if let Some(cached) = t.size_align.get() {
        return Ok(cached);
    }
    let computed = compute_size_align(cst, t)?;
    t.size_align.set(Some(computed));
    Ok(computed)
}

fn float_size_align(cst: &CompilerState, bits: u8) -> Result<(u64, u64)> {
    match bits {
        32 => Ok((4, 4)),
        64 => Ok((8, 8)),
        80 => Ok(cst.target.float80_size_align()),
        _ => Err(cst.diag(CompileError::InvalidOperation(format!(
            "unsupported float width: {}",
            bits
        )))),
    }
}

fn compute_size_align(cst: &CompilerState, t: &TypePtr) -> Result<(u64, u64)> {
    match &t.kind {
        TypeKind::Bool => Ok((1, 1)),
        TypeKind::Integer { bits, .. } => {
            let bytes = u64::from(*bits) / 8;
            Ok((bytes, bytes))
        }
        TypeKind::Float { bits, .. } => float_size_align(cst, *bits),
        TypeKind::Complex { bits } => {
            let (size, align) = float_size_align(cst, *bits)?;
            Ok((size * 2, align))
        }
        TypeKind::Pointer(_) | TypeKind::CodePointer { .. } | TypeKind::CCodePointer { .. } => {
            let p = cst.target.pointer_bytes;
            Ok((p, p))
        }
        TypeKind::Array { element, size } => {
            let (esize, ealign) = size_align(cst, element)?;
            Ok((esize * size, ealign))
        }
        TypeKind::Vec { element, size } => {
            let (esize, ealign) = size_align(cst, element)?;
            let total = esize * size;
            let align = total
                .next_power_of_two()
                .clamp(ealign.max(1), 16);
            Ok((total, align))
        }
        TypeKind::Tuple(elems) => {
            let mut parts = Vec::with_capacity(elems.len());
            for e in elems {
                parts.push(size_align(cst, e)?);
            }
            let (_, size, align) = struct_layout(&parts);
            Ok((size, align))
        }
        TypeKind::Union(members) => {
            let mut size = 0u64;
            let mut align = 1u64;
            for m in members {
                let (msize, malign) = size_align(cst, m)?;
                size = size.max(msize);
                align = align.max(malign);
            }
            Ok((round_up(size, align), align))
        }
        TypeKind::Static(_) => Ok((0, 1)),
        TypeKind::Record { .. } => {
            let fields = cst.record_field_types(t)?;
            let mut parts = Vec::with_capacity(fields.len());
            for (_, ft) in fields.iter() {
                parts.push(size_align(cst, ft)?);
            }
            let (_, size, align) = struct_layout(&parts);
            Ok((size, align))
        }
        TypeKind::Variant { .. } => {
            let members = cst.variant_member_types(t)?;
            let mut payload_size = 0u64;
            let mut payload_align = 1u64;
            for m in members.iter() {
                let (msize, malign) = size_align(cst, m)?;
                payload_size = payload_size.max(msize);
                payload_align = payload_align.max(malign);
            }
            let parts = [(4, 4), (round_up(payload_size, payload_align), payload_align)];
            let (_, size, align) = struct_layout(&parts);
            Ok((size, align))
        }
        TypeKind::Enum(_) => Ok((4, 4)),
        TypeKind::NewType(decl) => {
            let base = cst.newtype_base_type(decl)?;
            size_align(cst, &base)
        }
    }
}

pub fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

/// C struct layout over (size, align) parts: per-field offsets, total
/// size, and alignment.
pub fn struct_layout(parts: &[(u64, u64)]) -> (Vec<u64>, u64, u64) {
    let mut offsets = Vec::with_capacity(parts.len());
    let mut offset = 0u64;
    let mut align = 1u64;
    for &(fsize, falign) in parts {
        offset = round_up(offset, falign.max(1));
        offsets.push(offset);
        offset += fsize;
        align = align.max(falign);
    }
    (offsets, round_up(offset, align), align)
}

/// Byte offset of tuple element `index`.
pub fn tuple_element_offset(cst: &CompilerState, t: &TypePtr, index: usize) -> Result<u64> {
    let TypeKind::Tuple(elems) = &t.kind else {
        return Err(cst.diag(CompileError::InvalidOperation(
            "tuple element offset of non-tuple type".to_string(),
        )));
    };
    let mut parts = Vec::with_capacity(elems.len());
    for e in elems {
        parts.push(size_align(cst, e)?);
    }
    let (offsets, _, _) = struct_layout(&parts);
    Ok(offsets[index])
}

/// Byte offset of record field `index`.
pub fn record_field_offset(cst: &CompilerState, t: &TypePtr, index: usize) -> Result<u64> {
    let fields = cst.record_field_types(t)?;
    let mut parts = Vec::with_capacity(fields.len());
    for (_, ft) in fields.iter() {
        parts.push(size_align(cst, ft)?);
    }
    let (offsets, _, _) = struct_layout(&parts);
    Ok(offsets[index])
}

/// Variant values are a 32-bit tag followed by a max-aligned payload
/// union; this is the payload's byte offset.
pub fn variant_payload_offset(cst: &CompilerState, t: &TypePtr) -> Result<u64> {
    let members = cst.variant_member_types(t)?;
    let mut payload_align = 1u64;
    for m in members.iter() {
        payload_align = payload_align.max(type_alignment(cst, m)?);
    }
    Ok(round_up(4, payload_align))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(4, 4), 4);
        assert_eq!(round_up(9, 8), 16);
    }

    #[test]
    fn test_struct_layout_padding() {
        // { i8, i32, i8 } lays out as 0, 4, 8 with size 12 align 4.
        let (offsets, size, align) = struct_layout(&[(1, 1), (4, 4), (1, 1)]);
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(size, 12);
        assert_eq!(align, 4);
    }

    #[test]
    fn test_struct_layout_empty() {
        let (offsets, size, align) = struct_layout(&[]);
        assert!(offsets.is_empty());
        assert_eq!(size, 0);
        assert_eq!(align, 1);
    }

    #[test]
    fn test_target_layout_pointer_width() {
        let layout = TargetLayout::new(
            "x86_64-unknown-linux-gnu"
                .parse()
                .expect("static triple parses"),
        );
        assert_eq!(layout.pointer_bytes, 8);
        assert_eq!(layout.float80_size_align(), (16, 16));
    }
}
