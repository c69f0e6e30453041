use cu::pre::*;

use crate::{ArcStr, DeclSite, SymId, TypeId};

/// Where a parameter lives at the call boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub enum ParamLoc {
    /// Frame-relative stack offset
    #[display("{}", _0)]
    Stack(i64),
    /// Register name per the target arch table
    #[display("{}", _0)]
    Reg(ArcStr),
}

/// A named symbol parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: ArcStr,
    pub ty: TypeId,
    pub loc: Option<ParamLoc>,
}

/// Retention bucket assigned by symbol selection. Deferred symbols are
/// decided during pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Keep,
    Deferred,
}

/// One output symbol record
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub id: SymId,
    pub short_name: ArcStr,
    pub mangled: ArcStr,
    /// Versioned alias mangling, when the export table says so
    pub alias: Option<ArcStr>,
    pub ctor: bool,
    pub dtor: bool,
    pub virt: bool,
    pub pure_virt: bool,
    pub inline: bool,
    pub artificial: bool,
    pub is_static: bool,
    pub data: bool,
    pub is_const: bool,
    pub is_volatile: bool,
    pub class: Option<TypeId>,
    pub namespace: Option<ArcStr>,
    pub ret: Option<TypeId>,
    pub params: Vec<Param>,
    pub vtable_slot: Option<u64>,
    pub decl: Option<DeclSite>,
    /// Method-context type materialized for class methods; keeps the
    /// `R(C::*)(…)` record alive through pruning
    pub method_type: Option<TypeId>,
    pub bucket: Bucket,
}

impl SymbolRecord {
    pub fn new(id: SymId, short_name: ArcStr, mangled: ArcStr) -> Self {
        Self {
            id,
            short_name,
            mangled,
            alias: None,
            ctor: false,
            dtor: false,
            virt: false,
            pure_virt: false,
            inline: false,
            artificial: false,
            is_static: false,
            data: false,
            is_const: false,
            is_volatile: false,
            class: None,
            namespace: None,
            ret: None,
            params: Vec::new(),
            vtable_slot: None,
            decl: None,
            method_type: None,
            bucket: Bucket::Keep,
        }
    }

    /// Merge a later record for the same mangled name into this one.
    /// Specification-derived information fills gaps; a pure-virtual
    /// declaration followed by an out-of-line definition demotes to
    /// plain virtual.
    pub fn absorb(&mut self, other: &SymbolRecord) {
        if self.pure_virt && !other.pure_virt {
            self.pure_virt = false;
            self.virt = true;
        }
        if self.class.is_none() {
            self.class = other.class;
        }
        if self.ret.is_none() {
            self.ret = other.ret;
        }
        if self.decl.is_none() {
            self.decl = other.decl.clone();
        }
        if self.namespace.is_none() {
            self.namespace = other.namespace.clone();
        }
        // the definition carries the call-boundary locations
        if self.params.is_empty()
            || (!other.params.is_empty()
                && self.params.iter().all(|p| p.loc.is_none())
                && other.params.iter().any(|p| p.loc.is_some()))
        {
            self.params = other.params.clone();
        }
        if other.vtable_slot.is_some() && self.vtable_slot.is_none() {
            self.vtable_slot = other.vtable_slot;
        }
        if other.bucket == Bucket::Keep {
            self.bucket = Bucket::Keep;
        }
        self.ctor |= other.ctor;
        self.dtor |= other.dtor;
        self.virt |= other.virt;
    }

    /// Every type id this record refers to
    pub fn referenced_ids(&self) -> Vec<TypeId> {
        let mut out = Vec::new();
        out.extend(self.ret);
        out.extend(self.class);
        out.extend(self.method_type);
        out.extend(self.params.iter().map(|p| p.ty));
        out
    }

    pub fn map_ids<F: Fn(TypeId) -> TypeId>(&mut self, f: F) {
        if let Some(x) = &mut self.ret {
            *x = f(*x);
        }
        if let Some(x) = &mut self.class {
            *x = f(*x);
        }
        if let Some(x) = &mut self.method_type {
            *x = f(*x);
        }
        for p in &mut self.params {
            p.ty = f(p.ty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_virtual_demotion() {
        let mut decl = SymbolRecord::new(SymId(1), "f".into(), "_ZN1V1fEv".into());
        decl.pure_virt = true;
        decl.virt = true;
        let defn = SymbolRecord::new(SymId(2), "f".into(), "_ZN1V1fEv".into());
        decl.absorb(&defn);
        assert!(decl.virt);
        assert!(!decl.pure_virt);
    }
}
