//! Numeric literal parsing.
//!
//! Literals reach the core as spellings plus an optional suffix; the
//! target type comes from the suffix, or from the enclosing module's
//! `DefaultIntegerType`/`DefaultFloatType` attributes, or from the
//! platform defaults (Int32 / Float64). Values are stored as the
//! target's little-endian bit patterns.

use crate::env::{env_module, EnvPtr};
use crate::error::{CompileError, Result};
use crate::evaluator_ops::f80_encode;
use crate::layout::type_size;
use crate::objects::{Object, ValueHolder, ValueHolderPtr};
use crate::state::CompilerState;
use crate::types::{TypeKind, TypePtr};

fn suffix_type(cst: &CompilerState, suffix: &str) -> Option<TypePtr> {
    Some(match suffix {
        "i8" => cst.int_type(8, true),
        "i16" => cst.int_type(16, true),
        "i32" => cst.int_type(32, true),
        "i64" => cst.int_type(64, true),
        "i128" => cst.int_type(128, true),
        "u8" => cst.int_type(8, false),
        "u16" => cst.int_type(16, false),
        "u32" => cst.int_type(32, false),
        "u64" => cst.int_type(64, false),
        "u128" => cst.int_type(128, false),
        "f32" => cst.float_type(32, false),
        "f64" => cst.float_type(64, false),
        "f80" => cst.float_type(80, false),
        "fj32" => cst.float_type(32, true),
        "fj64" => cst.float_type(64, true),
        "fj80" => cst.float_type(80, true),
        _ => return None,
    })
}

fn default_integer_type(cst: &CompilerState, env: &EnvPtr) -> Result<TypePtr> {
    if let Some(module) = env_module(env) {
        crate::analyzer::verify_module_attributes(cst, &module)?;
        if let Some(t) = module.attr_default_integer_type.borrow().clone() {
            return Ok(t);
        }
    }
    Ok(cst.int_type(32, true))
}

fn default_float_type(cst: &CompilerState, env: &EnvPtr) -> Result<TypePtr> {
    if let Some(module) = env_module(env) {
        crate::analyzer::verify_module_attributes(cst, &module)?;
        if let Some(t) = module.attr_default_float_type.borrow().clone() {
            return Ok(t);
        }
    }
    Ok(cst.float_type(64, false))
}

fn split_radix(digits: &str) -> (u32, &str, bool) {
    let (negative, rest) = match digits.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, digits),
    };
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, hex, negative)
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        (2, bin, negative)
    } else if let Some(oct) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        (8, oct, negative)
    } else {
        (10, rest, negative)
    }
}

fn out_of_range(cst: &CompilerState, value: &str, t: &TypePtr) -> crate::error::Diagnostic {
    cst.diag(CompileError::InvalidOperation(format!(
        "integer literal {} out of range for {}",
        value,
        crate::printer::TypeName(t)
    )))
}

pub fn parse_int_literal(
    cst: &CompilerState,
    env: &EnvPtr,
    value: &str,
    suffix: Option<&str>,
) -> Result<ValueHolderPtr> {
    let ty = match suffix {
        Some(suffix) => suffix_type(cst, suffix).ok_or_else(|| {
            cst.diag(CompileError::InvalidOperation(format!(
                "invalid numeric literal suffix: {}",
                suffix
            )))
        })?,
        None => default_integer_type(cst, env)?,
    };

    // Integer literals with a float suffix are float literals.
    if matches!(ty.kind, TypeKind::Float { .. }) {
        return parse_float_literal(cst, env, value, suffix);
    }

    let TypeKind::Integer { bits, signed } = ty.kind else {
        return Err(cst.diag(CompileError::InvalidOperation(
            "invalid integer literal type".to_string(),
        )));
    };
    let cleaned: String = value.chars().filter(|c| *c != '_').collect();
    let (radix, digits, negative) = split_radix(&cleaned);

    let magnitude = u128::from_str_radix(digits, radix)
        .map_err(|_| {
            cst.diag(CompileError::InvalidOperation(format!(
                "invalid integer literal: {}",
                value
            )))
        })?;

    let encoded: u128 = if signed {
        let signed_value = if negative {
            if magnitude > (1u128 << (bits - 1)) {
                return Err(out_of_range(cst, value, &ty));
            }
            (magnitude as i128).wrapping_neg()
        } else {
            if bits < 128 && magnitude >= (1u128 << (bits - 1)) {
                return Err(out_of_range(cst, value, &ty));
            }
            if bits == 128 && magnitude > i128::MAX as u128 {
                return Err(out_of_range(cst, value, &ty));
            }
            magnitude as i128
        };
        signed_value as u128
    } else {
        if negative && magnitude != 0 {
            return Err(out_of_range(cst, value, &ty));
        }
        if bits < 128 && magnitude >= (1u128 << bits) {
            return Err(out_of_range(cst, value, &ty));
        }
        magnitude
    };

    let size = type_size(cst, &ty)? as usize;
    Ok(ValueHolder::with_bytes(
        ty,
        encoded.to_le_bytes()[..size].to_vec(),
    ))
}

pub fn parse_float_literal(
    cst: &CompilerState,
    env: &EnvPtr,
    value: &str,
    suffix: Option<&str>,
) -> Result<ValueHolderPtr> {
    let ty = match suffix {
        Some(suffix) => suffix_type(cst, suffix).ok_or_else(|| {
            cst.diag(CompileError::InvalidOperation(format!(
                "invalid numeric literal suffix: {}",
                suffix
            )))
        })?,
        None => default_float_type(cst, env)?,
    };
    let TypeKind::Float { bits, .. } = ty.kind else {
        return Err(cst.diag(CompileError::InvalidOperation(format!(
            "invalid float literal suffix: {}",
            suffix.unwrap_or("")
        ))));
    };
    let cleaned: String = value.chars().filter(|c| *c != '_').collect();
    let parsed: f64 = cleaned.parse().map_err(|_| {
        cst.diag(CompileError::InvalidOperation(format!(
            "invalid float literal: {}",
            value
        )))
    })?;
    let size = type_size(cst, &ty)? as usize;
    let bytes = match bits {
        32 => (parsed as f32).to_le_bytes().to_vec(),
        64 => parsed.to_le_bytes().to_vec(),
        80 => {
            let mut bytes = vec![0u8; size];
            bytes[..10].copy_from_slice(&f80_encode(parsed));
            bytes
        }
        _ => {
            return Err(cst.diag(CompileError::InvalidOperation(
                "unsupported float literal width".to_string(),
            )))
        }
    };
    Ok(ValueHolder::with_bytes(ty, bytes))
}

/// Convenience for tests and the loader: an Int32 literal object.
pub fn int_object(cst: &CompilerState, value: i32) -> Object {
    Object::ValueHolder(ValueHolder::with_bytes(
        cst.c_int_type(),
        value.to_le_bytes().to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;

    #[test]
    fn test_unsuffixed_int_defaults_to_int32() {
        let cst = CompilerState::new().expect("compiler state");
        let env = Env::root();
        let holder = parse_int_literal(&cst, &env, "42", None).expect("parses");
        assert!(matches!(
            holder.ty.kind,
            TypeKind::Integer {
                bits: 32,
                signed: true
            }
        ));
        assert_eq!(holder.as_i32(), 42);
    }

    #[test]
    fn test_suffixed_and_radix_literals() {
        let cst = CompilerState::new().expect("compiler state");
        let env = Env::root();
        let holder = parse_int_literal(&cst, &env, "0xff", Some("u8")).expect("parses");
        assert_eq!(holder.buf.borrow()[0], 0xff);
        assert!(parse_int_literal(&cst, &env, "0x100", Some("u8")).is_err());
        assert!(parse_int_literal(&cst, &env, "128", Some("i8")).is_err());
        assert!(parse_int_literal(&cst, &env, "-128", Some("i8")).is_ok());
    }

    #[test]
    fn test_float_literals() {
        let cst = CompilerState::new().expect("compiler state");
        let env = Env::root();
        let holder = parse_float_literal(&cst, &env, "2.5", None).expect("parses");
        let buf = holder.buf.borrow();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[..8]);
        assert_eq!(f64::from_le_bytes(raw), 2.5);
    }
}
