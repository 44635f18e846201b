//! The Sable type graph.
//!
//! Type nodes are produced only by [`TypeInterner::intern`]: two types
//! built from the same constructor and structurally equal parameters are
//! the same `Rc` node, so node identity is structural equality everywhere
//! downstream (argument keys, unification, the invocation cache).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::objects::{
    object_equals, object_hash, CallingConv, EnumDeclPtr, NewTypeDeclPtr, Object, ObjectVecKey,
    OverloadPtr, RecordDeclPtr, VariantDeclPtr,
};

pub type TypePtr = Rc<Type>;

#[derive(Debug)]
pub struct Type {
    pub kind: TypeKind,
    /// Overloads attached to this type as a callable (constructors).
    pub overloads: RefCell<Vec<OverloadPtr>>,
    /// (size, alignment) in target units; computed once by `layout`.
    pub(crate) size_align: Cell<Option<(u64, u64)>>,
}

impl Type {
    fn new(kind: TypeKind) -> TypePtr {
        Rc::new(Self {
            kind,
            overloads: RefCell::new(Vec::new()),
            size_align: Cell::new(None),
        })
    }

}

/// Stable per-node id, used to key side caches.
pub fn type_node_id(t: &TypePtr) -> usize {
    Rc::as_ptr(t) as usize
}

#[derive(Debug)]
pub enum TypeKind {
    Bool,
    Integer {
        bits: u8,
        signed: bool,
    },
    Float {
        bits: u8,
        imaginary: bool,
    },
    Complex {
        bits: u8,
    },
    Pointer(TypePtr),
    CodePointer {
        arg_types: Vec<TypePtr>,
        return_is_ref: Vec<bool>,
        return_types: Vec<TypePtr>,
    },
    CCodePointer {
        calling_conv: CallingConv,
        has_var_args: bool,
        arg_types: Vec<TypePtr>,
        return_type: Option<TypePtr>,
    },
    Array {
        element: TypePtr,
        size: u64,
    },
    Vec {
        element: TypePtr,
        size: u64,
    },
    Tuple(Vec<TypePtr>),
    Union(Vec<TypePtr>),
    /// The one-element type whose sole value is a fixed compile-time
    /// object.
    Static(Object),
    Record {
        decl: RecordDeclPtr,
        params: Vec<Object>,
    },
    Variant {
        decl: VariantDeclPtr,
        params: Vec<Object>,
    },
    Enum(EnumDeclPtr),
    NewType(NewTypeDeclPtr),
}

/// Inverse of `Static`: the object a static type lifts, if any.
pub fn unwrap_static_type(t: &TypePtr) -> Option<Object> {
    match &t.kind {
        TypeKind::Static(obj) => Some(obj.clone()),
        _ => None,
    }
}

pub fn is_static_type(t: &TypePtr) -> bool {
    matches!(t.kind, TypeKind::Static(_))
}

/// True for `Static[..]` and for tuples of such, the shapes whose values
/// are fully determined by their type alone.
pub fn is_static_or_tuple_of_statics(t: &TypePtr) -> bool {
    match &t.kind {
        TypeKind::Static(_) => true,
        TypeKind::Tuple(elems) => elems.iter().all(is_static_or_tuple_of_statics),
        _ => false,
    }
}

//
// interning
//

/// Key projection of a `TypeKind`. Inner types are already interned, so
/// their `Rc` addresses identify them; objects go through
/// `object_hash`/`object_equals`.
#[derive(Debug)]
enum TypeKey {
    Bool,
    Integer(u8, bool),
    Float(u8, bool),
    Complex(u8),
    Pointer(usize),
    CodePointer(Vec<usize>, Vec<bool>, Vec<usize>),
    CCodePointer(CallingConv, bool, Vec<usize>, Option<usize>),
    Array(usize, u64),
    Vec(usize, u64),
    Tuple(Vec<usize>),
    Union(Vec<usize>),
    Static(ObjectKey),
    Record(usize, ObjectVecKey),
    Variant(usize, ObjectVecKey),
    Enum(usize),
    NewType(usize),
}

#[derive(Debug)]
struct ObjectKey(Object);

impl PartialEq for ObjectKey {
    fn eq(&self, other: &Self) -> bool {
        object_equals(&self.0, &other.0)
    }
}

impl Eq for ObjectKey {}

impl Hash for ObjectKey {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        object_hash(&self.0).hash(hasher);
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        use TypeKey::*;
        match (self, other) {
            (Bool, Bool) => true,
            (Integer(a, b), Integer(c, d)) => a == c && b == d,
            (Float(a, b), Float(c, d)) => a == c && b == d,
            (Complex(a), Complex(b)) => a == b,
            (Pointer(a), Pointer(b)) => a == b,
            (CodePointer(a1, a2, a3), CodePointer(b1, b2, b3)) => {
                a1 == b1 && a2 == b2 && a3 == b3
            }
            (CCodePointer(a1, a2, a3, a4), CCodePointer(b1, b2, b3, b4)) => {
                a1 == b1 && a2 == b2 && a3 == b3 && a4 == b4
            }
            (Array(a1, a2), Array(b1, b2)) => a1 == b1 && a2 == b2,
            (Vec(a1, a2), Vec(b1, b2)) => a1 == b1 && a2 == b2,
            (Tuple(a), Tuple(b)) => a == b,
            (Union(a), Union(b)) => a == b,
            (Static(a), Static(b)) => a == b,
            (Record(a1, a2), Record(b1, b2)) => a1 == b1 && a2 == b2,
            (Variant(a1, a2), Variant(b1, b2)) => a1 == b1 && a2 == b2,
            (Enum(a), Enum(b)) => a == b,
            (NewType(a), NewType(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        std::mem::discriminant(self).hash(hasher);
        use TypeKey::*;
        match self {
            Bool => {}
            Integer(bits, signed) => {
                bits.hash(hasher);
                signed.hash(hasher);
            }
            Float(bits, imaginary) => {
                bits.hash(hasher);
                imaginary.hash(hasher);
            }
            Complex(bits) => bits.hash(hasher),
            Pointer(p) => p.hash(hasher),
            CodePointer(args, refs, rets) => {
                args.hash(hasher);
                refs.hash(hasher);
                rets.hash(hasher);
            }
            CCodePointer(cc, var, args, ret) => {
                cc.hash(hasher);
                var.hash(hasher);
                args.hash(hasher);
                ret.hash(hasher);
            }
            Array(e, n) | Vec(e, n) => {
                e.hash(hasher);
                n.hash(hasher);
            }
            Tuple(elems) | Union(elems) => elems.hash(hasher),
            Static(key) => key.hash(hasher),
            Record(decl, params) | Variant(decl, params) => {
                decl.hash(hasher);
                params.hash(hasher);
            }
            Enum(decl) | NewType(decl) => decl.hash(hasher),
        }
    }
}

fn addr(t: &TypePtr) -> usize {
    Rc::as_ptr(t) as usize
}

fn key_of(kind: &TypeKind) -> TypeKey {
    match kind {
        TypeKind::Bool => TypeKey::Bool,
        TypeKind::Integer { bits, signed } => TypeKey::Integer(*bits, *signed),
        TypeKind::Float { bits, imaginary } => TypeKey::Float(*bits, *imaginary),
        TypeKind::Complex { bits } => TypeKey::Complex(*bits),
        TypeKind::Pointer(p) => TypeKey::Pointer(addr(p)),
        TypeKind::CodePointer {
            arg_types,
            return_is_ref,
            return_types,
        } => TypeKey::CodePointer(
            arg_types.iter().map(addr).collect(),
            return_is_ref.clone(),
            return_types.iter().map(addr).collect(),
        ),
        TypeKind::CCodePointer {
            calling_conv,
            has_var_args,
            arg_types,
            return_type,
        } => TypeKey::CCodePointer(
            *calling_conv,
            *has_var_args,
            arg_types.iter().map(addr).collect(),
            return_type.as_ref().map(addr),
        ),
        TypeKind::Array { element, size } => TypeKey::Array(addr(element), *size),
        TypeKind::Vec { element, size } => TypeKey::Vec(addr(element), *size),
        TypeKind::Tuple(elems) => TypeKey::Tuple(elems.iter().map(addr).collect()),
        TypeKind::Union(members) => TypeKey::Union(members.iter().map(addr).collect()),
        TypeKind::Static(obj) => TypeKey::Static(ObjectKey(obj.clone())),
        TypeKind::Record { decl, params } => TypeKey::Record(
            Rc::as_ptr(decl) as usize,
            ObjectVecKey(params.clone()),
        ),
        TypeKind::Variant { decl, params } => TypeKey::Variant(
            Rc::as_ptr(decl) as usize,
            ObjectVecKey(params.clone()),
        ),
        TypeKind::Enum(decl) => TypeKey::Enum(Rc::as_ptr(decl) as usize),
        TypeKind::NewType(decl) => TypeKey::NewType(Rc::as_ptr(decl) as usize),
    }
}

/// The hash-consing table. Entries are never dropped: interned types are
/// keyed by other interned types, and invocation entries outlive any one
/// call, so the table anchors the whole type graph for the life of the
/// compilation.
#[derive(Debug, Default)]
pub struct TypeInterner {
    table: HashMap<TypeKey, TypePtr>,
}

impl TypeInterner {
    pub fn intern(&mut self, kind: TypeKind) -> TypePtr {
        let key = key_of(&kind);
        if let Some(t) = self.table.get(&key) {
            return t.clone();
        }
        let t = Type::new(kind);
        self.table.insert(key, t.clone());
        t
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Identifier;

    #[test]
    fn test_primitive_types_intern_to_one_node() {
        let mut interner = TypeInterner::default();
        let a = interner.intern(TypeKind::Integer {
            bits: 32,
            signed: true,
        });
        let b = interner.intern(TypeKind::Integer {
            bits: 32,
            signed: true,
        });
        let c = interner.intern(TypeKind::Integer {
            bits: 32,
            signed: false,
        });
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_constructed_types_intern_structurally() {
        let mut interner = TypeInterner::default();
        let i64t = interner.intern(TypeKind::Integer {
            bits: 64,
            signed: true,
        });
        let p1 = interner.intern(TypeKind::Pointer(i64t.clone()));
        let p2 = interner.intern(TypeKind::Pointer(i64t.clone()));
        assert!(Rc::ptr_eq(&p1, &p2));

        let t1 = interner.intern(TypeKind::Tuple(vec![i64t.clone(), p1.clone()]));
        let t2 = interner.intern(TypeKind::Tuple(vec![i64t.clone(), p2]));
        assert!(Rc::ptr_eq(&t1, &t2));
    }

    #[test]
    fn test_static_types_intern_by_object_equality() {
        let mut interner = TypeInterner::default();
        let a = interner.intern(TypeKind::Static(Object::Ident(Identifier::get("abc"))));
        let b = interner.intern(TypeKind::Static(Object::Ident(Identifier::get("abc"))));
        let c = interner.intern(TypeKind::Static(Object::Ident(Identifier::get("xyz"))));
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_static_or_tuple_of_statics() {
        let mut interner = TypeInterner::default();
        let s = interner.intern(TypeKind::Static(Object::Ident(Identifier::get("x"))));
        let tup = interner.intern(TypeKind::Tuple(vec![s.clone(), s.clone()]));
        let b = interner.intern(TypeKind::Bool);
        let mixed = interner.intern(TypeKind::Tuple(vec![s.clone(), b.clone()]));
        assert!(is_static_or_tuple_of_statics(&s));
        assert!(is_static_or_tuple_of_statics(&tup));
        assert!(!is_static_or_tuple_of_statics(&b));
        assert!(!is_static_or_tuple_of_statics(&mixed));
    }
}
