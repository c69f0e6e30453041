use cu::pre::*;

use crate::{AbiGraph, DumpOptions, TypeId, TypeIdSet};

/// Completeness audit run after pruning: every type id referenced by a
/// retained record must exist and carry a name. Missing entries are
/// reported, not fatal; the dump is still emitted. Returns the number of
/// dangling references found.
pub fn audit(graph: &AbiGraph, opts: &DumpOptions) -> usize {
    let mut missing = TypeIdSet::default();

    let mut check = |id: TypeId, what: &str, holder: &str| {
        if id.is_reserved() {
            return;
        }
        match graph.get_type(id) {
            Some(record) if !record.name.is_empty() => {}
            Some(_) => {
                if missing.insert(id) && opts.loud {
                    cu::warn!("type {id} ({what} of {holder}) has no name");
                }
            }
            None => {
                if missing.insert(id) {
                    if opts.loud {
                        cu::warn!("dangling reference: type {id} ({what} of {holder}) was never materialized");
                    } else {
                        cu::debug!("dangling reference: type {id} ({what} of {holder})");
                    }
                }
            }
        }
    };

    for record in graph.types.values() {
        let holder = record.name.to_string();
        if let Some(base) = record.base {
            check(base, "base type", &holder);
        }
        if let Some(ret) = record.ret {
            check(ret, "return type", &holder);
        }
        if let Some(class) = record.class {
            check(class, "class", &holder);
        }
        for p in &record.params {
            check(*p, "parameter", &holder);
        }
        for m in &record.members {
            check(m.ty, "member type", &holder);
        }
        for b in &record.bases {
            check(b.ty, "base class", &holder);
        }
    }
    for sym in graph.symbols.values() {
        let holder = sym.mangled.to_string();
        if let Some(ret) = sym.ret {
            check(ret, "return type", &holder);
        }
        if let Some(class) = sym.class {
            check(class, "class", &holder);
        }
        for p in &sym.params {
            check(p.ty, "parameter type", &holder);
        }
    }

    if !missing.is_empty() {
        cu::debug!("completeness audit found {} missing types", missing.len());
    }
    missing.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SymId, SymbolRecord, TypeKind, TypeRecord};

    #[test]
    fn test_audit_counts_dangling() {
        let mut graph = AbiGraph::default();
        graph.register_type(TypeRecord::new(TypeId(0x40), TypeKind::Class, "C".into()));
        let mut sym = SymbolRecord::new(SymId(0x100), "f".into(), "_ZN1C1fEv".into());
        sym.class = Some(TypeId(0x40));
        sym.ret = Some(TypeId(0xdead));
        graph.add_symbol(sym);
        assert_eq!(audit(&graph, &DumpOptions::default()), 1);
    }

    #[test]
    fn test_audit_clean() {
        let mut graph = AbiGraph::default();
        graph.register_type(TypeRecord::new(TypeId(0x40), TypeKind::Class, "C".into()));
        let mut sym = SymbolRecord::new(SymId(0x100), "f".into(), "_ZN1C1fEv".into());
        sym.class = Some(TypeId(0x40));
        sym.ret = Some(TypeId::VOID);
        graph.add_symbol(sym);
        assert_eq!(audit(&graph, &DumpOptions::default()), 0);
    }
}
