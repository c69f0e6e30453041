mod types;
mod symbols;

use abigraph::{
    AbiGraph, ArcStr, DeclSite, DieRecord, DieStore, Doff, DoffMap, DumpOptions, Family, NameCanon,
    Tag, TypeId,
};
use cu::pre::*;

use crate::{DwarfDump, ElfInfo, LineTables, LocTable, VtableMap};

/// Resolves the scanned DIE graph into the ABI graph: types first, then
/// symbols. Resolution is demand-driven and memoized; cycles are broken by
/// registering the final id before recursing.
pub struct Resolver<'a> {
    pub(crate) store: &'a DieStore,
    pub(crate) lines: &'a LineTables,
    pub(crate) loc: &'a LocTable,
    pub(crate) canon: &'a NameCanon,
    pub(crate) opts: DumpOptions,
    pub(crate) memo: DoffMap<Option<TypeId>>,
    pub(crate) graph: AbiGraph,
}

impl<'a> Resolver<'a> {
    pub fn new(
        dump: &'a DwarfDump,
        canon: &'a NameCanon,
        elf: &ElfInfo,
        opts: DumpOptions,
    ) -> Self {
        let mut graph = AbiGraph::default();
        graph.exports = elf.exports.clone();
        graph.undefined = elf.undefined.clone();
        graph.needed = elf.needed.clone();
        graph.versions = elf.versions.clone();
        graph.env.arch = elf.arch.clone();
        graph.env.word_size = elf.word_size;
        Self {
            store: &dump.store,
            lines: &dump.lines,
            loc: &dump.loc,
            canon,
            opts,
            memo: DoffMap::default(),
            graph,
        }
    }

    /// Run both resolution passes and hand the populated graph back
    pub fn run(mut self) -> cu::Result<AbiGraph> {
        self.capture_env();
        self.resolve_all_types()?;
        self.resolve_all_symbols()?;
        Ok(self.graph)
    }

    /// Producer facts and the header/source file sets
    fn capture_env(&mut self) {
        let units = self.store.units();
        let cxx = units
            .iter()
            .filter_map(|u| u.language.as_ref())
            .any(|l| l.contains("plus"));
        if cxx {
            self.graph.env.language = ArcStr::new("C++");
        } else if let Some(lang) = units.iter().find_map(|u| u.language.as_ref()) {
            self.graph.env.language = language_name(lang);
        }
        if let Some(producer) = units.iter().find_map(|u| u.producer.as_ref()) {
            if producer.starts_with("GNU") {
                self.graph.env.gcc_version = producer
                    .split_whitespace()
                    .find(|t| {
                        t.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
                            && t.contains('.')
                    })
                    .map(ArcStr::new);
            }
            if self.graph.env.gcc_version.is_none() {
                self.graph.env.compiler = Some(producer.clone());
            }
        }
        for (_, table) in self.lines.iter() {
            for (_, file) in table.iter() {
                if file.header {
                    self.graph.headers.insert(file.name.clone());
                } else {
                    self.graph.sources.insert(file.name.clone());
                }
            }
        }
        cu::debug!(
            "environment: arch={}, word size {}, language {}",
            self.graph.env.arch,
            self.graph.env.word_size,
            self.graph.env.language
        );
    }

    /// Declaration site of a DIE, resolved through its unit's line table
    pub(crate) fn decl_site(&self, die: &DieRecord) -> Option<DeclSite> {
        let (file, line) = die.decl_coords()?;
        let unit = self.store.unit_of(die.offset)?;
        let table = self.lines.get(unit.stmt_list?)?;
        let entry = table.get(file)?;
        Some(DeclSite {
            file: entry.name.clone(),
            line,
            header: entry.header,
        })
    }

    /// Scope prefix of a DIE from its named namespace/class ancestors,
    /// outermost first
    pub(crate) fn scope_prefix(&self, off: Doff) -> Option<String> {
        let mut segs = Vec::new();
        for anc in self.store.scope_chain(off) {
            let Some(die) = self.store.get(anc) else {
                continue;
            };
            if matches!(
                die.tag,
                Tag::Namespace | Tag::ClassType | Tag::StructureType | Tag::UnionType
            ) {
                // anonymous scopes contribute no segment
                if let Some(name) = die.name_opt() {
                    segs.push(name.to_string());
                }
            }
        }
        if segs.is_empty() {
            return None;
        }
        segs.reverse();
        Some(segs.join("::"))
    }

    /// Namespace-only prefix (no class scopes), for symbol records
    pub(crate) fn namespace_prefix(&self, off: Doff) -> Option<String> {
        let mut segs = Vec::new();
        for anc in self.store.scope_chain(off) {
            let Some(die) = self.store.get(anc) else {
                continue;
            };
            if die.tag == Tag::Namespace
                && let Some(name) = die.name_opt()
            {
                segs.push(name.to_string());
            }
        }
        if segs.is_empty() {
            return None;
        }
        segs.reverse();
        Some(segs.join("::"))
    }

    pub(crate) fn qualified(&self, off: Doff, name: &str) -> String {
        match self.scope_prefix(off) {
            Some(prefix) => format!("{prefix}::{name}"),
            None => name.to_string(),
        }
    }
}

fn language_name(lang: &str) -> ArcStr {
    if lang.contains("plus") {
        return ArcStr::new("C++");
    }
    match lang {
        "C" | "C89" | "C99" | "C11" | "C17" => ArcStr::new("C"),
        other => ArcStr::new(other),
    }
}

/// Attach the vtable dump to the resolved class records by canonical name
pub fn attach_vtables(graph: &mut AbiGraph, canon: &NameCanon, vtables: &VtableMap) {
    for (class, slots) in vtables {
        let name = canon.canon_type(class);
        let id = graph
            .type_by_name(Family::Record, &name)
            .or_else(|| graph.type_by_name(Family::Record, &format!("struct {name}")));
        let Some(id) = id else {
            cu::debug!("vtable dump names class '{name}' which is not in the type graph");
            continue;
        };
        if let Some(record) = graph.get_type_mut(id) {
            record.vtable = slots.clone();
        }
        graph.vtables.insert(name, slots.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abigraph::{ArcStr, TypeKind, algorithm};
    use std::collections::BTreeMap;

    use crate::Scanner;

    fn resolve_fixture(
        dwarf: &str,
        exports: &[(&str, i64)],
        opts: DumpOptions,
    ) -> cu::Result<AbiGraph> {
        let mut elf = ElfInfo::default();
        elf.arch = ArcStr::new("x86-64");
        elf.word_size = 8;
        for (name, size) in exports {
            elf.exports.insert(ArcStr::new(name), *size);
        }
        let scanner = Scanner::default();
        let mut dump = DwarfDump::default();
        scanner.scan(dwarf.as_bytes(), 0, &mut dump)?;
        dump.finish()?;
        let canon = NameCanon::default();
        let mut graph = Resolver::new(&dump, &canon, &elf, opts).run()?;
        algorithm::prune(&mut graph, &opts)?;
        Ok(graph)
    }

    fn type_named<'g>(graph: &'g AbiGraph, name: &str) -> Option<&'g abigraph::TypeRecord> {
        graph.types.values().find(|t| t.name == name)
    }

    const EMPTY_CLASS: &str = r#"DWARF section [28] '.debug_info' at offset 0x40:

 [     b]  compile_unit
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "s1.cpp"
           stmt_list            (sec_offset) 0
 [    2d]    class_type
             name                 (strp) "C"
             byte_size            (data1) 1
             decl_file            (data1) 2
             decl_line            (data1) 1
 [    3a]      subprogram
               external             (flag_present) yes
               name                 (strp) "f"
               linkage_name         (strp) "_ZN1C1fEv"
               decl_file            (data1) 2
               decl_line            (data1) 2
               declaration          (flag_present) yes
 [    52]        formal_parameter
                 type                 (ref4) [0x80]
                 artificial           (flag_present) yes
 [    70]    subprogram
             specification        (ref4) [0x3a]
             low_pc               (addr) 0x1135 <_ZN1C1fEv>
 [    76]      formal_parameter
               type                 (ref4) [0x80]
               artificial           (flag_present) yes
               location             (exprloc) [ 0] reg5
 [    80]    pointer_type
             byte_size            (data1) 8
             type                 (ref4) [0x2d]

DWARF section [30] '.debug_line' at offset 0xa0:

Table at offset 0:
 Directory table:
 File name table:
  Entry Dir   Time      Size      Name
  1     0     0         0         s1.cpp
  2     0     0         0         s1.h
"#;

    #[test]
    fn test_empty_class_inline_method() -> cu::Result<()> {
        let graph = resolve_fixture(EMPTY_CLASS, &[("_ZN1C1fEv", 11)], DumpOptions::default())?;

        let class = type_named(&graph, "C").expect("class C missing");
        assert_eq!(class.kind, TypeKind::Class);
        let method = type_named(&graph, "void(C::*)()").expect("method context missing");
        assert_eq!(method.kind, TypeKind::MethodPtr);

        assert_eq!(graph.symbols.len(), 1);
        let sym = graph.symbols.values().next().unwrap();
        assert_eq!(sym.mangled, "_ZN1C1fEv");
        assert_eq!(sym.short_name, "f");
        assert_eq!(sym.class.map(|c| graph.first_id(c)), Some(class.id));
        assert!(!sym.is_static);
        assert_eq!(sym.ret, Some(abigraph::TypeId::VOID));
        assert!(sym.params.is_empty());
        // the class plus its method context, nothing else but reserved ids
        let named = graph
            .types
            .values()
            .filter(|t| !t.id.is_reserved())
            .count();
        assert_eq!(named, 2);
        Ok(())
    }

    const VIRTUAL_DTOR: &str = r#"DWARF section [28] '.debug_info' at offset 0x40:

 [     b]  compile_unit
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "s2.cpp"
 [    2d]    class_type
             name                 (strp) "V"
             byte_size            (data1) 8
 [    3a]      subprogram
               external             (flag_present) yes
               name                 (strp) "~V"
               linkage_name         (strp) "_ZN1VD1Ev"
               virtuality           (data1) virtual (1)
               vtable_elem_location (data4) 0
               declaration          (flag_present) yes
 [    70]    subprogram
             specification        (ref4) [0x3a]
             low_pc               (addr) 0x1200 <_ZN1VD1Ev>
"#;

    #[test]
    fn test_virtual_destructor() -> cu::Result<()> {
        let mut elf = ElfInfo::default();
        elf.arch = ArcStr::new("x86-64");
        elf.word_size = 8;
        elf.exports.insert(ArcStr::new("_ZN1VD1Ev"), 20);

        let scanner = Scanner::default();
        let mut dump = DwarfDump::default();
        scanner.scan(VIRTUAL_DTOR.as_bytes(), 0, &mut dump)?;
        dump.finish()?;
        let canon = NameCanon::default();
        let mut graph = Resolver::new(&dump, &canon, &elf, DumpOptions::default()).run()?;

        let mut slots = BTreeMap::new();
        slots.insert(16u64, ArcStr::new("V::~V"));
        let mut vtables = VtableMap::new();
        vtables.insert(ArcStr::new("V"), slots);
        attach_vtables(&mut graph, &canon, &vtables);
        algorithm::prune(&mut graph, &DumpOptions::default())?;

        let class = type_named(&graph, "V").expect("class V missing");
        assert_eq!(class.vtable.get(&16).map(|x| x.as_str()), Some("V::~V"));
        let sym = graph
            .symbols
            .values()
            .find(|s| s.mangled == "_ZN1VD1Ev")
            .expect("destructor symbol missing");
        assert!(sym.dtor);
        assert!(sym.virt);
        assert_eq!(sym.class.map(|c| graph.first_id(c)), Some(class.id));
        Ok(())
    }

    const TEMPLATE_DATA: &str = r#"DWARF section [28] '.debug_info' at offset 0x40:

 [     b]  compile_unit
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "s3.cpp"
 [    20]    namespace
             name                 (strp) "std"
 [    2d]      class_type
               name                 (strp) "vector<int, std::allocator<int> >"
               byte_size            (data1) 24
 [    60]    base_type
             name                 (strp) "int"
             byte_size            (data1) 4
 [    70]    variable
             name                 (strp) "g"
             external             (flag_present) yes
             type                 (ref4) [0x2d]
             location             (exprloc) addr 0x4040 <g>
"#;

    #[test]
    fn test_template_instantiation() -> cu::Result<()> {
        let graph = resolve_fixture(TEMPLATE_DATA, &[("g", -24)], DumpOptions::default())?;

        let vec = type_named(&graph, "std::vector<int>").expect("vector type missing");
        assert_eq!(vec.kind, TypeKind::Class);
        assert!(type_named(&graph, "std::vector<int, std::allocator<int> >").is_none());
        assert_eq!(vec.tparams, vec![ArcStr::new("int")]);

        let sym = graph
            .symbols
            .values()
            .find(|s| s.mangled == "g")
            .expect("data symbol missing");
        assert!(sym.data);
        assert_eq!(sym.ret.map(|r| graph.first_id(r)), Some(vec.id));
        Ok(())
    }

    const ANON_TYPEDEF: &str = r#"DWARF section [28] '.debug_info' at offset 0x40:

 [     b]  compile_unit
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "s5.cpp"
           stmt_list            (sec_offset) 0
 [    2d]    structure_type
             byte_size            (data1) 4
             decl_file            (data1) 1
             decl_line            (data1) 3
 [    3a]      member
               name                 (strp) "x"
               type                 (ref4) [0x60]
               data_member_location (data1) 0
 [    50]    typedef
             name                 (strp) "S"
             type                 (ref4) [0x2d]
 [    60]    base_type
             name                 (strp) "int"
             byte_size            (data1) 4
 [    70]    variable
             name                 (strp) "s_obj"
             external             (flag_present) yes
             type                 (ref4) [0x50]
             location             (exprloc) addr 0x4050 <s_obj>

DWARF section [30] '.debug_line' at offset 0xa0:

Table at offset 0:
 Directory table:
 File name table:
  Entry Dir   Time      Size      Name
  1     0     0         0         s5.cpp
"#;

    #[test]
    fn test_anonymous_struct_typedef() -> cu::Result<()> {
        let graph = resolve_fixture(ANON_TYPEDEF, &[("s_obj", -4)], DumpOptions::default())?;

        let typedef = type_named(&graph, "struct S").expect("folded typedef missing");
        assert_eq!(typedef.kind, TypeKind::Typedef);
        assert_eq!(typedef.members.len(), 1);
        assert_eq!(typedef.members[0].name, "x");
        assert_eq!(typedef.size, Some(4));
        // the anonymous base is gone from the table
        assert!(graph.types.values().all(|t| !t.name.contains("anon-")));
        Ok(())
    }

    const METHOD_PTR: &str = r#"DWARF section [28] '.debug_info' at offset 0x40:

 [     b]  compile_unit
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "s6.cpp"
 [    2d]    structure_type
             name                 (strp) "C"
             byte_size            (data1) 4
 [    40]    subroutine_type
             type                 (ref4) [0x60]
 [    48]      formal_parameter
               type                 (ref4) [0x80]
               artificial           (flag_present) yes
 [    50]      formal_parameter
               type                 (ref4) [0x70]
 [    58]    ptr_to_member_type
             containing_type      (ref4) [0x2d]
             type                 (ref4) [0x40]
 [    60]    base_type
             name                 (strp) "int"
             byte_size            (data1) 4
 [    70]    base_type
             name                 (strp) "double"
             byte_size            (data1) 8
 [    80]    pointer_type
             byte_size            (data1) 8
             type                 (ref4) [0x2d]
 [    90]    variable
             name                 (strp) "p"
             external             (flag_present) yes
             type                 (ref4) [0x58]
             location             (exprloc) addr 0x4060 <p>
"#;

    #[test]
    fn test_pointer_to_member_function() -> cu::Result<()> {
        let graph = resolve_fixture(METHOD_PTR, &[("p", -16)], DumpOptions::default())?;

        let pmf = type_named(&graph, "int(C::*)(double)").expect("method pointer missing");
        assert_eq!(pmf.kind, TypeKind::MethodPtr);
        let class = type_named(&graph, "struct C").expect("class missing");
        assert_eq!(pmf.class.map(|c| graph.first_id(c)), Some(class.id));
        let int_ty = type_named(&graph, "int").expect("int missing");
        assert_eq!(pmf.ret.map(|r| graph.first_id(r)), Some(int_ty.id));
        // no spurious this parameter
        let double_ty = type_named(&graph, "double").expect("double missing");
        assert_eq!(
            pmf.params
                .iter()
                .map(|p| graph.first_id(*p))
                .collect::<Vec<_>>(),
            vec![double_ty.id]
        );
        Ok(())
    }

    const PURE_VIRTUAL: &str = r#"DWARF section [28] '.debug_info' at offset 0x40:

 [     b]  compile_unit
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "a.cpp"
 [    2d]    class_type
             name                 (strp) "A"
             byte_size            (data1) 8
 [    3a]      subprogram
               external             (flag_present) yes
               name                 (strp) "f"
               linkage_name         (strp) "_ZN1A1fEv"
               virtuality           (data1) pure_virtual (2)
               vtable_elem_location (data4) 1
               declaration          (flag_present) yes
 [   10b]  compile_unit
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "b.cpp"
 [   12d]    class_type
             name                 (strp) "A"
             byte_size            (data1) 8
 [   13a]      subprogram
               external             (flag_present) yes
               name                 (strp) "f"
               linkage_name         (strp) "_ZN1A1fEv"
               declaration          (flag_present) yes
 [   170]    subprogram
             specification        (ref4) [0x13a]
             low_pc               (addr) 0x1300 <_ZN1A1fEv>
"#;

    #[test]
    fn test_pure_virtual_demoted_by_definition() -> cu::Result<()> {
        let graph = resolve_fixture(PURE_VIRTUAL, &[("_ZN1A1fEv", 9)], DumpOptions::default())?;
        let syms = graph
            .symbols
            .values()
            .filter(|s| s.mangled == "_ZN1A1fEv")
            .collect::<Vec<_>>();
        assert_eq!(syms.len(), 1);
        assert!(syms[0].virt);
        assert!(!syms[0].pure_virt);
        Ok(())
    }
}
