use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};

use cu::pre::*;

use crate::{
    ArcStr, Family, SymId, SymbolRecord, TypeId, TypeIdMap, TypeKind, TypeRecord,
};

/// Retention and reporting switches threaded through the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    pub sort: bool,
    pub all_types: bool,
    pub all_symbols: bool,
    pub bin_only: bool,
    pub skip_cxx: bool,
    pub loud: bool,
}

/// Facts about the environment that produced the binary
#[derive(Debug, Clone, Default)]
pub struct EnvInfo {
    pub arch: ArcStr,
    pub word_size: u64,
    pub language: ArcStr,
    pub gcc_version: Option<ArcStr>,
    pub compiler: Option<ArcStr>,
    pub library_name: ArcStr,
    pub library_version: ArcStr,
    pub kernel_module: bool,
}

/// The ABI graph: the single context owning type and symbol tables, the
/// canonical-name registry, and the ELF-side tables. Created empty with
/// the two reserved types, populated by the resolvers, rewritten in place
/// by the pruner, frozen before emission.
pub struct AbiGraph {
    pub types: TypeIdMap<TypeRecord>,
    pub symbols: BTreeMap<SymId, SymbolRecord>,
    /// canonical name -> first-occurrence id, per kind family
    first_by_name: BTreeMap<(Family, ArcStr), TypeId>,
    /// later id -> canonical id
    pub merged: TypeIdMap<TypeId>,
    by_mangled: BTreeMap<ArcStr, SymId>,
    pub headers: BTreeSet<ArcStr>,
    pub sources: BTreeSet<ArcStr>,
    pub namespaces: BTreeSet<ArcStr>,
    /// export name -> size (negative for data objects)
    pub exports: BTreeMap<ArcStr, i64>,
    pub undefined: BTreeSet<ArcStr>,
    pub needed: BTreeSet<ArcStr>,
    /// base name -> versioned name
    pub versions: BTreeMap<ArcStr, ArcStr>,
    /// class name -> slot -> entry text
    pub vtables: BTreeMap<ArcStr, BTreeMap<u64, ArcStr>>,
    pub env: EnvInfo,
}

impl Default for AbiGraph {
    fn default() -> Self {
        let mut graph = Self {
            types: TypeIdMap::default(),
            symbols: BTreeMap::new(),
            first_by_name: BTreeMap::new(),
            merged: TypeIdMap::default(),
            by_mangled: BTreeMap::new(),
            headers: BTreeSet::new(),
            sources: BTreeSet::new(),
            namespaces: BTreeSet::new(),
            exports: BTreeMap::new(),
            undefined: BTreeSet::new(),
            needed: BTreeSet::new(),
            versions: BTreeMap::new(),
            vtables: BTreeMap::new(),
            env: EnvInfo::default(),
        };
        graph.register_type(TypeRecord::new(
            TypeId::VOID,
            TypeKind::Intrinsic,
            "void".into(),
        ));
        graph.register_type(TypeRecord::new(
            TypeId::VARIADIC,
            TypeKind::Intrinsic,
            "...".into(),
        ));
        graph
    }
}

impl AbiGraph {
    /// Insert a type record and register its canonical name. A later
    /// record whose name canonicalizes to an already-registered name in the
    /// same family becomes a merge target of the first id.
    pub fn register_type(&mut self, record: TypeRecord) {
        let id = record.id;
        let key = (record.kind.family(), record.name.clone());
        match self.first_by_name.entry(key) {
            Entry::Vacant(e) => {
                e.insert(id);
            }
            Entry::Occupied(e) => {
                let first = *e.get();
                if first != id {
                    self.merged.insert(id, first);
                }
            }
        }
        if let Some(ns) = &record.namespace
            && !ns.is_empty()
        {
            self.namespaces.insert(ns.clone());
        }
        self.types.insert(id, record);
    }

    /// Resolve an id through the merge map to the canonical first id
    pub fn first_id(&self, id: TypeId) -> TypeId {
        let mut cur = id;
        // merge chains are short; bound the walk anyway
        for _ in 0..32 {
            match self.merged.get(&cur) {
                Some(next) => cur = *next,
                None => return cur,
            }
        }
        cur
    }

    pub fn get_type(&self, id: TypeId) -> Option<&TypeRecord> {
        self.types.get(&id)
    }
    pub fn get_type_mut(&mut self, id: TypeId) -> Option<&mut TypeRecord> {
        self.types.get_mut(&id)
    }

    /// Look a canonical name up in one family
    pub fn type_by_name(&self, family: Family, name: &str) -> Option<TypeId> {
        self.first_by_name
            .get(&(family, ArcStr::new(name)))
            .copied()
    }

    /// Look a canonical name up across the families
    pub fn type_by_name_any(&self, name: &str) -> Option<TypeId> {
        for family in [
            Family::Record,
            Family::Enum,
            Family::Union,
            Family::Typedef,
            Family::Other,
        ] {
            if let Some(id) = self.type_by_name(family, name) {
                return Some(id);
            }
        }
        None
    }

    /// Insert a symbol record, collapsing duplicates by mangled name.
    /// Returns the id that ended up owning the mangled name.
    pub fn add_symbol(&mut self, record: SymbolRecord) -> SymId {
        match self.by_mangled.entry(record.mangled.clone()) {
            Entry::Vacant(e) => {
                let id = record.id;
                e.insert(id);
                self.symbols.insert(id, record);
                id
            }
            Entry::Occupied(e) => {
                let id = *e.get();
                if let Some(existing) = self.symbols.get_mut(&id) {
                    existing.absorb(&record);
                }
                id
            }
        }
    }

    pub fn symbol_by_mangled(&self, mangled: &str) -> Option<SymId> {
        self.by_mangled.get(&ArcStr::new(mangled)).copied()
    }

    /// Forget the name-registry claim of a dropped id so the audit does
    /// not resurrect it
    pub fn is_canonical_for_name(&self, record: &TypeRecord) -> bool {
        self.first_by_name
            .get(&(record.kind.family(), record.name.clone()))
            .map(|first| *first == record.id)
            .unwrap_or(true)
    }
}
