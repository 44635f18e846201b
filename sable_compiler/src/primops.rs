//! The closed set of primitive operations.
//!
//! The primitive surface is fixed: the language's library builds
//! everything else on top of these through ordinary overloads. Names are
//! the source-level spellings the primitives module exports.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

macro_rules! prim_ops {
    ($(($variant:ident, $name:literal)),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum PrimOpCode {
            $($variant),*
        }

        impl PrimOpCode {
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),*
                }
            }
        }

        /// Every primitive op, in registration order.
        pub static ALL_PRIM_OPS: &[PrimOpCode] = &[
            $(PrimOpCode::$variant),*
        ];
    };
}

prim_ops! {
    // static introspection
    (TypeP, "TypeP"),
    (TypeSize, "TypeSize"),
    (TypeAlignment, "TypeAlignment"),
    (SymbolP, "SymbolP"),
    (StaticCallDefinedP, "StaticCallDefinedP"),
    (StaticCallOutputTypes, "StaticCallOutputTypes"),
    (StaticMonoP, "StaticMonoP"),
    (StaticMonoInputTypes, "StaticMonoInputTypes"),

    // copying
    (BitCopy, "bitcopy"),
    (BitCast, "bitcast"),

    // bool
    (BoolNot, "boolNot"),

    // integer comparison
    (IntegerEqualsP, "integerEqualsP"),
    (IntegerLesserP, "integerLesserP"),

    // arithmetic
    (NumericAdd, "numericAdd"),
    (NumericSubtract, "numericSubtract"),
    (NumericMultiply, "numericMultiply"),
    (FloatDivide, "floatDivide"),
    (NumericNegate, "numericNegate"),
    (IntegerQuotient, "integerQuotient"),
    (IntegerRemainder, "integerRemainder"),
    (IntegerShiftLeft, "integerShiftLeft"),
    (IntegerShiftRight, "integerShiftRight"),
    (IntegerBitwiseAnd, "integerBitwiseAnd"),
    (IntegerBitwiseOr, "integerBitwiseOr"),
    (IntegerBitwiseXor, "integerBitwiseXor"),
    (IntegerBitwiseNot, "integerBitwiseNot"),
    (NumericConvert, "numericConvert"),

    // checked arithmetic
    (IntegerAddChecked, "integerAddChecked"),
    (IntegerSubtractChecked, "integerSubtractChecked"),
    (IntegerMultiplyChecked, "integerMultiplyChecked"),
    (IntegerQuotientChecked, "integerQuotientChecked"),
    (IntegerRemainderChecked, "integerRemainderChecked"),
    (IntegerShiftLeftChecked, "integerShiftLeftChecked"),
    (IntegerNegateChecked, "integerNegateChecked"),
    (IntegerConvertChecked, "integerConvertChecked"),

    // float comparison
    (FloatOrderedEqualsP, "floatOrderedEqualsP"),
    (FloatOrderedLesserP, "floatOrderedLesserP"),
    (FloatOrderedLesserEqualsP, "floatOrderedLesserEqualsP"),
    (FloatOrderedGreaterP, "floatOrderedGreaterP"),
    (FloatOrderedGreaterEqualsP, "floatOrderedGreaterEqualsP"),
    (FloatOrderedNotEqualsP, "floatOrderedNotEqualsP"),
    (FloatOrderedP, "floatOrderedP"),
    (FloatUnorderedEqualsP, "floatUnorderedEqualsP"),
    (FloatUnorderedLesserP, "floatUnorderedLesserP"),
    (FloatUnorderedLesserEqualsP, "floatUnorderedLesserEqualsP"),
    (FloatUnorderedGreaterP, "floatUnorderedGreaterP"),
    (FloatUnorderedGreaterEqualsP, "floatUnorderedGreaterEqualsP"),
    (FloatUnorderedNotEqualsP, "floatUnorderedNotEqualsP"),
    (FloatUnorderedP, "floatUnorderedP"),

    // pointers
    (Pointer, "Pointer"),
    (AddressOf, "addressOf"),
    (PointerDereference, "pointerDereference"),
    (PointerOffset, "pointerOffset"),
    (PointerToInt, "pointerToInt"),
    (IntToPointer, "intToPointer"),
    (NullPointer, "nullPointer"),

    // code pointers
    (CodePointer, "CodePointer"),
    (MakeCodePointer, "makeCodePointer"),

    // external attributes
    (AttributeCCall, "AttributeCCall"),
    (AttributeStdCall, "AttributeStdCall"),
    (AttributeFastCall, "AttributeFastCall"),
    (AttributeThisCall, "AttributeThisCall"),
    (AttributeLLVMCall, "AttributeLLVMCall"),
    (AttributeDLLImport, "AttributeDLLImport"),
    (AttributeDLLExport, "AttributeDLLExport"),

    // external code pointers
    (ExternalCodePointer, "ExternalCodePointer"),
    (MakeExternalCodePointer, "makeExternalCodePointer"),
    (CallExternalCodePointer, "callExternalCodePointer"),

    // arrays and vectors
    (Array, "Array"),
    (ArrayRef, "arrayRef"),
    (ArrayElements, "arrayElements"),
    (Vec, "Vec"),

    // tuples
    (Tuple, "Tuple"),
    (TupleElementCount, "TupleElementCount"),
    (TupleRef, "tupleRef"),
    (TupleElements, "tupleElements"),

    // unions
    (Union, "Union"),
    (UnionMemberCount, "UnionMemberCount"),

    // records
    (RecordP, "RecordP"),
    (RecordFieldCount, "RecordFieldCount"),
    (RecordFieldName, "RecordFieldName"),
    (RecordWithFieldP, "RecordWithFieldP"),
    (RecordFieldRef, "recordFieldRef"),
    (RecordFieldRefByName, "recordFieldRefByName"),
    (RecordFields, "recordFields"),

    // variants
    (VariantP, "VariantP"),
    (VariantMemberIndex, "VariantMemberIndex"),
    (VariantMemberCount, "VariantMemberCount"),
    (VariantMembers, "VariantMembers"),
    (VariantRepr, "variantRepr"),

    // newtypes
    (BaseType, "BaseType"),

    // statics
    (Static, "Static"),
    (StaticName, "StaticName"),
    (StaticIntegers, "staticIntegers"),
    (Integers, "integers"),
    (StaticFieldRef, "staticFieldRef"),

    // modules
    (MainModule, "MainModule"),
    (StaticModule, "StaticModule"),
    (ModuleName, "ModuleName"),
    (ModuleMemberNames, "ModuleMemberNames"),

    // enums
    (EnumP, "EnumP"),
    (EnumMemberCount, "EnumMemberCount"),
    (EnumMemberName, "EnumMemberName"),
    (EnumToInt, "enumToInt"),
    (IntToEnum, "intToEnum"),

    // string literals
    (StringLiteralP, "stringLiteralP"),
    (StringLiteralByteCount, "stringLiteralByteCount"),
    (StringLiteralByteSlice, "stringLiteralByteSlice"),
    (StringLiteralConcat, "stringLiteralConcat"),
    (StringLiteralFromBytes, "stringLiteralFromBytes"),

    // build flags
    (FlagP, "FlagP"),
    (Flag, "Flag"),

    // atomics and exceptions: typed by the analyzer, rejected by the
    // evaluator
    (AtomicFence, "atomicFence"),
    (AtomicRMW, "atomicRMW"),
    (AtomicLoad, "atomicLoad"),
    (AtomicStore, "atomicStore"),
    (AtomicCompareExchange, "atomicCompareExchange"),
    (ActiveException, "activeException"),
}

/// Source-name to code, for the primitives module and for tests.
pub static PRIM_OP_BY_NAME: Lazy<HashMap<&'static str, PrimOpCode>> = Lazy::new(|| {
    ALL_PRIM_OPS.iter().map(|&code| (code.name(), code)).collect()
});

/// The overloadable type constructors. Only these primitives accept
/// user overloads; everything else is sealed.
pub fn is_overloadable_prim_op_code(code: PrimOpCode) -> bool {
    matches!(
        code,
        PrimOpCode::Pointer
            | PrimOpCode::CodePointer
            | PrimOpCode::ExternalCodePointer
            | PrimOpCode::Array
            | PrimOpCode::Vec
            | PrimOpCode::Tuple
            | PrimOpCode::Union
            | PrimOpCode::Static
    )
}

/// The same set doubles as the pattern-head constructors.
pub fn is_type_constructor_code(code: PrimOpCode) -> bool {
    is_overloadable_prim_op_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for &code in ALL_PRIM_OPS {
            assert_eq!(PRIM_OP_BY_NAME[code.name()], code);
        }
    }

    #[test]
    fn test_overloadable_set_is_closed() {
        let overloadable: Vec<_> = ALL_PRIM_OPS
            .iter()
            .copied()
            .filter(|&c| is_overloadable_prim_op_code(c))
            .collect();
        assert_eq!(
            overloadable,
            vec![
                PrimOpCode::Pointer,
                PrimOpCode::CodePointer,
                PrimOpCode::ExternalCodePointer,
                PrimOpCode::Array,
                PrimOpCode::Vec,
                PrimOpCode::Tuple,
                PrimOpCode::Union,
                PrimOpCode::Static,
            ]
        );
    }

    #[test]
    fn test_checked_ops_have_lowercase_names() {
        assert_eq!(PrimOpCode::IntegerAddChecked.name(), "integerAddChecked");
        assert_eq!(PrimOpCode::BitCast.name(), "bitcast");
    }
}
