use crate::{AbiGraph, TypeId, TypeIdMap};

/// Rewrite every type reference in the graph to the canonical
/// first-occurrence id. Forward declarations whose definition lives in a
/// different compilation unit collapse onto one id here.
pub fn canonicalize_ids(graph: &mut AbiGraph) {
    if graph.merged.is_empty() {
        return;
    }
    // flatten merge chains once so the rewrite is a single lookup
    let mut flat: TypeIdMap<TypeId> = TypeIdMap::default();
    for id in graph.merged.keys() {
        flat.insert(*id, graph.first_id(*id));
    }
    let resolve = |id: TypeId| *flat.get(&id).unwrap_or(&id);
    for record in graph.types.values_mut() {
        record.map_ids(resolve);
        if let Some(spec) = &mut record.spec_of {
            *spec = resolve(*spec);
        }
    }
    for record in graph.symbols.values_mut() {
        record.map_ids(resolve);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SymId, SymbolRecord, TypeKind, TypeRecord};

    #[test]
    fn test_forward_decl_collapse() {
        let mut graph = AbiGraph::default();
        graph.register_type(TypeRecord::new(
            TypeId(0x40),
            TypeKind::Struct,
            "struct Node".into(),
        ));
        graph.register_type(TypeRecord::new(
            TypeId(0x90),
            TypeKind::Struct,
            "struct Node".into(),
        ));
        let mut sym = SymbolRecord::new(SymId(0x100), "head".into(), "head".into());
        sym.data = true;
        sym.ret = Some(TypeId(0x90));
        graph.add_symbol(sym);

        canonicalize_ids(&mut graph);
        assert_eq!(graph.symbols[&SymId(0x100)].ret, Some(TypeId(0x40)));
    }
}
