use cu::pre::*;

use crate::{ArcStr, DieRecord, Doff, DoffMap, DoffSet, Tag};

/// Per-compilation-unit facts pulled off the unit root DIE
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub offset: Doff,
    pub name: ArcStr,
    pub producer: Option<ArcStr>,
    pub language: Option<ArcStr>,
    pub comp_dir: Option<ArcStr>,
    /// Offset of the unit's table in the line-program dump
    pub stmt_list: Option<u64>,
}

/// Flat index of DIE records with the derived edges the resolvers need
#[derive(Default)]
pub struct DieStore {
    dies: DoffMap<DieRecord>,
    parent: DoffMap<Doff>,
    children: DoffMap<Vec<Doff>>,
    /// declaration offset -> definition offset (reverse of `specification`)
    spec_of: DoffMap<Doff>,
    /// origin offset -> out-of-line/inlined copy (reverse of `abstract_origin`)
    origin_of: DoffMap<Doff>,
    /// aggregate offset -> subprogram/variable children (also indexed under
    /// the aggregate's specification target)
    class_methods: DoffMap<Vec<Doff>>,
    /// types declared inside a function body
    local: DoffSet,
    units: Vec<UnitInfo>,
}

impl DieStore {
    pub fn len(&self) -> usize {
        self.dies.len()
    }
    pub fn is_empty(&self) -> bool {
        self.dies.is_empty()
    }

    pub fn add_unit(&mut self, unit: UnitInfo) {
        self.units.push(unit);
    }
    pub fn units(&self) -> &[UnitInfo] {
        &self.units
    }

    /// The unit a DIE belongs to, by offset range
    pub fn unit_of(&self, off: Doff) -> Option<&UnitInfo> {
        self.units
            .iter()
            .rev()
            .find(|unit| unit.offset <= off)
    }

    /// Insert a scanned record under its lexical parent. Each offset may
    /// appear exactly once.
    pub fn insert(&mut self, die: DieRecord, parent: Option<Doff>) -> cu::Result<()> {
        let offset = die.offset;
        cu::ensure!(
            !self.dies.contains_key(&offset),
            "duplicate DIE offset {offset}"
        )?;
        if let Some(parent) = parent {
            self.parent.insert(offset, parent);
            self.children.entry(parent).or_default().push(offset);
        }
        self.dies.insert(offset, die);
        Ok(())
    }

    pub fn get(&self, off: Doff) -> Option<&DieRecord> {
        self.dies.get(&off)
    }

    pub fn expect(&self, off: Doff) -> cu::Result<&DieRecord> {
        cu::check!(self.dies.get(&off), "no DIE at offset {off}")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Doff, &DieRecord)> {
        self.dies.iter()
    }

    pub fn parent(&self, off: Doff) -> Option<Doff> {
        self.parent.get(&off).copied()
    }

    pub fn children(&self, off: Doff) -> &[Doff] {
        self.children.get(&off).map(|x| x.as_slice()).unwrap_or(&[])
    }

    fn children_tagged(&self, off: Doff, accept: &[Tag]) -> Vec<Doff> {
        self.children(off)
            .iter()
            .copied()
            .filter(|c| {
                self.get(*c)
                    .map(|d| accept.contains(&d.tag))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Ordered `member`/`enumerator` children of an aggregate
    pub fn members(&self, agg: Doff) -> Vec<Doff> {
        self.children_tagged(agg, &[Tag::Member, Tag::Enumerator])
    }

    /// Ordered `inheritance` children of an aggregate
    pub fn inheritances(&self, agg: Doff) -> Vec<Doff> {
        self.children_tagged(agg, &[Tag::Inheritance])
    }

    /// Ordered parameter children of a function-like DIE
    pub fn params(&self, func: Doff) -> Vec<Doff> {
        self.children_tagged(func, &[Tag::FormalParameter, Tag::UnspecifiedParameters])
    }

    /// Definition DIE of a declaration, via the reverse `specification` edge
    pub fn definition_of(&self, decl: Doff) -> Option<Doff> {
        self.spec_of.get(&decl).copied()
    }

    /// Concrete copy of an abstract DIE, via the reverse `abstract_origin`
    /// edge
    pub fn instance_of(&self, origin: Doff) -> Option<Doff> {
        self.origin_of.get(&origin).copied()
    }

    /// Subprogram/variable children recorded for a class/struct aggregate
    pub fn class_methods(&self, agg: Doff) -> &[Doff] {
        self.class_methods
            .get(&agg)
            .map(|x| x.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the DIE is declared inside a function body
    pub fn is_local(&self, off: Doff) -> bool {
        self.local.contains(&off)
    }

    /// Nearest ancestor that opens a qualifier scope
    pub fn nearest_scope(&self, off: Doff) -> Option<Doff> {
        self.scope_chain(off).into_iter().next()
    }

    /// Scope ancestors of a DIE, nearest first
    pub fn scope_chain(&self, off: Doff) -> Vec<Doff> {
        let mut chain = Vec::new();
        let mut cur = off;
        while let Some(parent) = self.parent(cur) {
            if let Some(die) = self.get(parent)
                && die.tag.is_scope()
            {
                chain.push(parent);
            }
            cur = parent;
        }
        chain
    }

    /// Whether any ancestor of the DIE carries one of the given tags
    pub fn has_ancestor(&self, off: Doff, accept: &[Tag]) -> bool {
        let mut cur = off;
        while let Some(parent) = self.parent(cur) {
            if let Some(die) = self.get(parent)
                && accept.contains(&die.tag)
            {
                return true;
            }
            cur = parent;
        }
        false
    }

    /// Build the derived edges once all records are inserted
    pub fn finish(&mut self) -> cu::Result<()> {
        self.units.sort_by_key(|u| u.offset);

        let mut spec_of = DoffMap::default();
        let mut origin_of = DoffMap::default();
        let mut class_methods: DoffMap<Vec<Doff>> = DoffMap::default();
        let mut local = DoffSet::default();

        for (off, die) in &self.dies {
            if let Some(target) = die.ref_opt("specification") {
                spec_of.insert(target, *off);
            }
            if let Some(target) = die.ref_opt("abstract_origin") {
                origin_of.insert(target, *off);
            }
            if matches!(die.tag, Tag::Subprogram | Tag::Variable)
                && let Some(parent) = self.parent(*off)
                && let Some(parent_die) = self.get(parent)
                && matches!(parent_die.tag, Tag::ClassType | Tag::StructureType)
            {
                class_methods.entry(parent).or_default().push(*off);
                if let Some(decl) = parent_die.ref_opt("specification") {
                    class_methods.entry(decl).or_default().push(*off);
                }
            }
            if die.tag.is_type()
                && self.enclosing_subprogram(*off).is_some()
                && !self.is_ctor_template_instance(*off)
            {
                local.insert(*off);
            }
        }

        self.spec_of = spec_of;
        self.origin_of = origin_of;
        self.class_methods = class_methods;
        self.local = local;
        Ok(())
    }

    fn enclosing_subprogram(&self, off: Doff) -> Option<Doff> {
        let mut cur = off;
        while let Some(parent) = self.parent(cur) {
            if let Some(die) = self.get(parent)
                && die.tag == Tag::Subprogram
            {
                return Some(parent);
            }
            cur = parent;
        }
        None
    }

    /// A type nested in a subprogram is a constructor-template instance
    /// (not a local type) when the subprogram's object-pointer type has the
    /// same bare name as the subprogram itself.
    fn is_ctor_template_instance(&self, off: Doff) -> bool {
        let Some(sp) = self.enclosing_subprogram(off) else {
            return false;
        };
        let Some(sp_die) = self.get(sp) else {
            return false;
        };
        let Some(sp_name) = sp_die.untemplated_name_opt() else {
            return false;
        };
        let Some(obj_param) = sp_die.ref_opt("object_pointer") else {
            return false;
        };
        let Some(class) = self.strip_to_named(obj_param) else {
            return false;
        };
        self.get(class)
            .and_then(|d| d.untemplated_name_opt())
            .map(|n| n == sp_name)
            .unwrap_or(false)
    }

    /// Follow `type` edges through pointers and qualifiers until a named
    /// DIE is found
    pub fn strip_to_named(&self, off: Doff) -> Option<Doff> {
        let mut cur = off;
        // bounded: type chains in practice are shallow
        for _ in 0..32 {
            let die = self.get(cur)?;
            if die.name_opt().is_some() && die.tag.is_type() {
                return Some(cur);
            }
            cur = die.ref_opt("type")?;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttrValue;

    fn die(off: usize, tag: Tag, depth: usize) -> DieRecord {
        DieRecord::new(Doff(off), tag, depth)
    }

    #[test]
    fn test_edges() -> cu::Result<()> {
        let mut store = DieStore::default();
        store.insert(die(0xb, Tag::CompileUnit, 0), None)?;
        let mut class = die(0x2d, Tag::ClassType, 2);
        class
            .attrs
            .insert("name".into(), AttrValue::Str("C".into()));
        store.insert(class, Some(Doff(0xb)))?;
        let mut member = die(0x3a, Tag::Member, 4);
        member
            .attrs
            .insert("name".into(), AttrValue::Str("x".into()));
        store.insert(member, Some(Doff(0x2d)))?;
        let mut method = die(0x4b, Tag::Subprogram, 4);
        method
            .attrs
            .insert("specification".into(), AttrValue::Ref(Doff(0x3a)));
        store.insert(method, Some(Doff(0x2d)))?;
        store.finish()?;

        assert_eq!(store.parent(Doff(0x3a)), Some(Doff(0x2d)));
        assert_eq!(store.members(Doff(0x2d)), vec![Doff(0x3a)]);
        assert_eq!(store.definition_of(Doff(0x3a)), Some(Doff(0x4b)));
        assert_eq!(store.class_methods(Doff(0x2d)), &[Doff(0x4b)]);
        assert_eq!(store.scope_chain(Doff(0x3a)), vec![Doff(0x2d)]);
        Ok(())
    }

    #[test]
    fn test_local_flag() -> cu::Result<()> {
        let mut store = DieStore::default();
        store.insert(die(0xb, Tag::CompileUnit, 0), None)?;
        store.insert(die(0x20, Tag::Subprogram, 2), Some(Doff(0xb)))?;
        store.insert(die(0x30, Tag::StructureType, 4), Some(Doff(0x20)))?;
        store.insert(die(0x50, Tag::StructureType, 2), Some(Doff(0xb)))?;
        store.finish()?;
        assert!(store.is_local(Doff(0x30)));
        assert!(!store.is_local(Doff(0x50)));
        Ok(())
    }

    #[test]
    fn test_duplicate_offset_rejected() -> cu::Result<()> {
        let mut store = DieStore::default();
        store.insert(die(0xb, Tag::CompileUnit, 0), None)?;
        assert!(store.insert(die(0xb, Tag::Namespace, 0), None).is_err());
        Ok(())
    }
}
