use std::collections::BTreeMap;

use cu::pre::*;

use crate::{ArcStr, TypeId};

/// Kind of an output type record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum TypeKind {
    #[display("Intrinsic")]
    Intrinsic,
    #[display("Class")]
    Class,
    #[display("Struct")]
    Struct,
    #[display("Union")]
    Union,
    #[display("Enum")]
    Enum,
    #[display("Array")]
    Array,
    #[display("Const")]
    Const,
    #[display("Volatile")]
    Volatile,
    #[display("Pointer")]
    Pointer,
    #[display("Ref")]
    Ref,
    #[display("Typedef")]
    Typedef,
    #[display("FuncPtr")]
    FuncPtr,
    #[display("MethodPtr")]
    MethodPtr,
    #[display("FieldPtr")]
    FieldPtr,
    #[display("Func")]
    Func,
}

/// Kind family used for canonical-name identity. Struct and class merge
/// into one family; enum, union and typedef each form their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    Record,
    Enum,
    Union,
    Typedef,
    Other,
}

impl TypeKind {
    pub fn family(self) -> Family {
        match self {
            Self::Class | Self::Struct => Family::Record,
            Self::Enum => Family::Enum,
            Self::Union => Family::Union,
            Self::Typedef => Family::Typedef,
            _ => Family::Other,
        }
    }

    /// The lowercase keyword prepended to the qualified name
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Self::Struct => Some("struct"),
            Self::Enum => Some("enum"),
            Self::Union => Some("union"),
            _ => None,
        }
    }
}

/// Where a record was declared
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeclSite {
    pub file: ArcStr,
    pub line: u64,
    /// true when `file` has a header extension
    pub header: bool,
}

/// A data member or enumerator of an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub name: ArcStr,
    pub ty: TypeId,
    /// Byte offset within the aggregate; fixed at 0 for union members
    pub offset: u64,
    pub bitfield: Option<u64>,
    pub access: Option<ArcStr>,
    /// Enumerator constant value, for Enum members
    pub value: Option<i64>,
}

/// A base class of an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseClass {
    pub ty: TypeId,
    pub pos: usize,
    pub access: Option<ArcStr>,
    pub virt: bool,
}

/// One output type record
#[derive(Debug, Clone)]
pub struct TypeRecord {
    pub id: TypeId,
    pub kind: TypeKind,
    /// Canonical name; the identity key within the kind family
    pub name: ArcStr,
    pub size: Option<u64>,
    pub decl: Option<DeclSite>,
    /// Target type for qualifiers, typedefs, arrays and pointers
    pub base: Option<TypeId>,
    pub members: Vec<Member>,
    pub bases: Vec<BaseClass>,
    /// Slot index -> textual vtable entry
    pub vtable: BTreeMap<u64, ArcStr>,
    pub namespace: Option<ArcStr>,
    /// Top-level template parameter names, re-split from the canonical name
    pub tparams: Vec<ArcStr>,
    /// Return type, for function-like kinds
    pub ret: Option<TypeId>,
    /// Ordered parameter types, for function-like kinds
    pub params: Vec<TypeId>,
    /// Class type, for MethodPtr/FieldPtr
    pub class: Option<TypeId>,
    /// Set when the record was filled in from a declaration-only DIE;
    /// cleared when an explicit constructor is seen for the class
    pub copied: bool,
    /// Canonical redirect installed by the specification merge
    pub spec_of: Option<TypeId>,
    /// Declared inside a function body
    pub local: bool,
}

impl TypeRecord {
    pub fn new(id: TypeId, kind: TypeKind, name: ArcStr) -> Self {
        Self {
            id,
            kind,
            name,
            size: None,
            decl: None,
            base: None,
            members: Vec::new(),
            bases: Vec::new(),
            vtable: BTreeMap::new(),
            namespace: None,
            tparams: Vec::new(),
            ret: None,
            params: Vec::new(),
            class: None,
            copied: false,
            spec_of: None,
            local: false,
        }
    }

    pub fn is_anon(&self) -> bool {
        self.name.contains("anon-")
    }

    /// Every type id this record refers to
    pub fn referenced_ids(&self) -> Vec<TypeId> {
        let mut out = Vec::new();
        out.extend(self.base);
        out.extend(self.ret);
        out.extend(self.class);
        out.extend(self.params.iter().copied());
        out.extend(self.members.iter().map(|m| m.ty));
        out.extend(self.bases.iter().map(|b| b.ty));
        out
    }

    /// Rewrite every referenced id through a mapping
    pub fn map_ids<F: Fn(TypeId) -> TypeId>(&mut self, f: F) {
        if let Some(x) = &mut self.base {
            *x = f(*x);
        }
        if let Some(x) = &mut self.ret {
            *x = f(*x);
        }
        if let Some(x) = &mut self.class {
            *x = f(*x);
        }
        for x in &mut self.params {
            *x = f(*x);
        }
        for m in &mut self.members {
            m.ty = f(m.ty);
        }
        for b in &mut self.bases {
            b.ty = f(b.ty);
        }
    }
}
