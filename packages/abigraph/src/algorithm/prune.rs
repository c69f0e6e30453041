use std::collections::BTreeSet;

use cu::pre::*;

use crate::{
    AbiGraph, ArcStr, Bucket, DumpOptions, TypeId, TypeIdSet, TypeKind, algorithm::canonicalize_ids,
};

/// Reachability state accumulated during the walk
#[derive(Default)]
struct Reach {
    types: TypeIdSet,
    /// decl files of reached records, used to decide deferred symbols
    files: BTreeSet<ArcStr>,
}

/// Prune the graph in place: rewrite ids to their canonical form, walk
/// reachability from the kept symbols, decide the deferred bucket, honor
/// `--all-types`, and drop everything unreachable, merged or local.
pub fn prune(graph: &mut AbiGraph, opts: &DumpOptions) -> cu::Result<()> {
    canonicalize_ids(graph);

    let mut reach = Reach::default();
    reach.types.insert(TypeId::VOID);
    reach.types.insert(TypeId::VARIADIC);

    // bucket 1
    let kept = graph
        .symbols
        .values()
        .filter(|s| s.bucket == Bucket::Keep)
        .map(|s| s.id)
        .collect::<Vec<_>>();
    for id in &kept {
        let Some(sym) = graph.symbols.get(id) else {
            continue;
        };
        if let Some(decl) = &sym.decl {
            reach.files.insert(decl.file.clone());
        }
        for ty in sym.referenced_ids() {
            walk_type(graph, ty, &mut reach);
        }
    }

    // bucket 2: keep a deferred symbol only if its class (or a subclass)
    // is already reachable, or its declaring file is
    let deferred = graph
        .symbols
        .values()
        .filter(|s| s.bucket == Bucket::Deferred)
        .map(|s| s.id)
        .collect::<Vec<_>>();
    let mut dropped_syms = Vec::new();
    for id in &deferred {
        let Some(sym) = graph.symbols.get(id) else {
            continue;
        };
        let class_reached = match sym.class {
            Some(class) => {
                let class = graph.first_id(class);
                reach.types.contains(&class) || subclass_reached(graph, &reach, class)
            }
            None => false,
        };
        let file_reached = sym
            .decl
            .as_ref()
            .map(|d| reach.files.contains(&d.file))
            .unwrap_or(false);
        if class_reached || file_reached {
            let tys = sym.referenced_ids();
            if let Some(sym) = graph.symbols.get_mut(id) {
                sym.bucket = Bucket::Keep;
            }
            for ty in tys {
                walk_type(graph, ty, &mut reach);
            }
        } else {
            dropped_syms.push(*id);
        }
    }
    for id in dropped_syms {
        graph.symbols.remove(&id);
    }

    if opts.all_types {
        let eligible = graph
            .types
            .values()
            .filter(|t| !t.local && (!t.is_anon() || t.kind == TypeKind::Enum))
            .map(|t| t.id)
            .collect::<Vec<_>>();
        for id in eligible {
            walk_type(graph, id, &mut reach);
        }
    }

    // local types survive only when transitively referenced, which is
    // exactly reach membership (the all-types blanket skips them)
    let reached = reach.types;
    graph
        .types
        .retain(|id, _| !graph.merged.contains_key(id) && reached.contains(id));

    cu::debug!(
        "pruned graph down to {} types and {} symbols",
        graph.types.len(),
        graph.symbols.len()
    );
    Ok(())
}

/// Register a type and everything it references: bases, members,
/// pointer/array targets, method/field-pointer classes and parameters,
/// and top-level template argument types by name.
fn walk_type(graph: &AbiGraph, start: TypeId, reach: &mut Reach) {
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        let id = graph.first_id(id);
        if !reach.types.insert(id) {
            continue;
        }
        let Some(record) = graph.get_type(id) else {
            continue;
        };
        if let Some(decl) = &record.decl {
            reach.files.insert(decl.file.clone());
        }
        stack.extend(record.referenced_ids());
        for tparam in &record.tparams {
            if let Some(tid) = graph.type_by_name_any(tparam) {
                stack.push(tid);
            }
        }
    }
}

fn subclass_reached(graph: &AbiGraph, reach: &Reach, class: TypeId) -> bool {
    graph.types.values().any(|t| {
        reach.types.contains(&t.id) && t.bases.iter().any(|b| graph.first_id(b.ty) == class)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Member, SymId, SymbolRecord, TypeRecord};

    fn record(id: i64, kind: TypeKind, name: &str) -> TypeRecord {
        TypeRecord::new(TypeId(id), kind, name.into())
    }

    #[test]
    fn test_unreachable_dropped() -> cu::Result<()> {
        let mut graph = AbiGraph::default();
        let mut class = record(0x40, TypeKind::Class, "C");
        class.members.push(Member {
            name: "x".into(),
            ty: TypeId(0x80),
            offset: 0,
            bitfield: None,
            access: None,
            value: None,
        });
        graph.register_type(class);
        graph.register_type(record(0x80, TypeKind::Intrinsic, "int"));
        graph.register_type(record(0x99, TypeKind::Class, "Orphan"));

        let mut sym = SymbolRecord::new(SymId(0x100), "f".into(), "_ZN1C1fEv".into());
        sym.class = Some(TypeId(0x40));
        sym.ret = Some(TypeId::VOID);
        graph.add_symbol(sym);

        prune(&mut graph, &DumpOptions::default())?;
        assert!(graph.types.contains_key(&TypeId(0x40)));
        assert!(graph.types.contains_key(&TypeId(0x80)));
        assert!(!graph.types.contains_key(&TypeId(0x99)));
        assert!(graph.types.contains_key(&TypeId::VOID));
        Ok(())
    }

    #[test]
    fn test_all_types_keeps_orphans() -> cu::Result<()> {
        let mut graph = AbiGraph::default();
        graph.register_type(record(0x99, TypeKind::Class, "Orphan"));
        let mut anon = record(0xa0, TypeKind::Struct, "struct anon-struct-h-3");
        anon.local = false;
        graph.register_type(anon);
        let opts = DumpOptions {
            all_types: true,
            ..Default::default()
        };
        prune(&mut graph, &opts)?;
        assert!(graph.types.contains_key(&TypeId(0x99)));
        assert!(!graph.types.contains_key(&TypeId(0xa0)));
        Ok(())
    }

    #[test]
    fn test_deferred_symbol_needs_reachable_class() -> cu::Result<()> {
        let mut graph = AbiGraph::default();
        graph.register_type(record(0x40, TypeKind::Class, "C"));
        graph.register_type(record(0x60, TypeKind::Class, "D"));

        let mut anchor = SymbolRecord::new(SymId(0x100), "f".into(), "_ZN1C1fEv".into());
        anchor.class = Some(TypeId(0x40));
        graph.add_symbol(anchor);

        let mut inline_kept = SymbolRecord::new(SymId(0x200), "g".into(), "_ZN1C1gEv".into());
        inline_kept.class = Some(TypeId(0x40));
        inline_kept.bucket = Bucket::Deferred;
        graph.add_symbol(inline_kept);

        let mut inline_dropped = SymbolRecord::new(SymId(0x300), "h".into(), "_ZN1D1hEv".into());
        inline_dropped.class = Some(TypeId(0x60));
        inline_dropped.bucket = Bucket::Deferred;
        graph.add_symbol(inline_dropped);

        prune(&mut graph, &DumpOptions::default())?;
        assert!(graph.symbols.contains_key(&SymId(0x200)));
        assert!(!graph.symbols.contains_key(&SymId(0x300)));
        Ok(())
    }
}
