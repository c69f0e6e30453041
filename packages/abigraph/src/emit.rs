use vtree::{VMap, Value};

use crate::{AbiGraph, ParamLoc, SymbolRecord, TypeRecord};

/// Run-level facts stamped into the dump alongside the graph
pub struct DumpMeta {
    pub dumper_version: String,
}

impl AbiGraph {
    /// Assemble the final value tree. Every collection is emitted from a
    /// sorted map, so the tree is identical across runs for the same input.
    pub fn to_value(&self, meta: &DumpMeta) -> Value {
        let mut root = VMap::default();

        let mut type_info = VMap::default();
        for (id, record) in &self.types {
            type_info.insert(id.0, type_value(record));
        }
        root.insert("TypeInfo", type_info);

        let mut symbol_info = VMap::default();
        for (id, sym) in &self.symbols {
            symbol_info.insert(id.0, symbol_value(sym));
        }
        root.insert("SymbolInfo", symbol_info);

        let lib = self.env.library_name.as_str();
        let mut exports = VMap::default();
        for (name, size) in &self.exports {
            exports.insert(name.as_str(), *size);
        }
        let mut symbols = VMap::default();
        symbols.insert(lib, exports);
        root.insert("Symbols", symbols);

        let mut undefined = VMap::default();
        for name in &self.undefined {
            undefined.insert(name.as_str(), 0);
        }
        let mut undefined_by_lib = VMap::default();
        undefined_by_lib.insert(lib, undefined);
        root.insert("UndefinedSymbols", undefined_by_lib);

        let mut needed = VMap::default();
        for name in &self.needed {
            needed.insert(name.as_str(), 1);
        }
        root.insert("Needed", needed);

        let mut versions = VMap::default();
        for (base, versioned) in &self.versions {
            versions.insert(base.as_str(), versioned.as_str());
        }
        root.insert("SymbolVersion", versions);

        root.insert("LibraryVersion", self.env.library_version.as_str());
        root.insert("LibraryName", lib);
        root.insert("Language", self.env.language.as_str());

        let mut headers = VMap::default();
        for h in &self.headers {
            headers.insert(h.as_str(), 1);
        }
        root.insert("Headers", headers);
        let mut sources = VMap::default();
        for s in &self.sources {
            sources.insert(s.as_str(), 1);
        }
        root.insert("Sources", sources);

        let mut namespaces = VMap::default();
        for ns in &self.namespaces {
            namespaces.insert(ns.as_str(), 1);
        }
        root.insert("NameSpaces", namespaces);

        root.insert("Target", "unix");
        root.insert("Arch", self.env.arch.as_str());
        root.insert("WordSize", self.env.word_size as i64);
        root.insert("ABI_DUMP_VERSION", "3.0");
        root.insert("ABI_DUMPER_VERSION", meta.dumper_version.as_str());
        match (&self.env.gcc_version, &self.env.compiler) {
            (Some(v), _) => root.insert("GccVersion", v.as_str()),
            (None, Some(c)) => root.insert("Compiler", c.as_str()),
            (None, None) => root.insert("Compiler", ""),
        }

        Value::Map(root)
    }
}

fn type_value(record: &TypeRecord) -> Value {
    let mut map = VMap::default();
    map.insert("Name", record.name.as_str());
    map.insert("Type", record.kind.to_string());
    if let Some(size) = record.size {
        map.insert("Size", size as i64);
    }
    if let Some(decl) = &record.decl {
        if decl.header {
            map.insert("Header", decl.file.as_str());
            map.insert("Line", decl.line as i64);
        } else {
            map.insert("Source", decl.file.as_str());
            map.insert("SourceLine", decl.line as i64);
        }
    }
    if let Some(base) = record.base {
        map.insert("BaseType", base.0);
    }
    if !record.members.is_empty() {
        let mut members = VMap::default();
        for (pos, m) in record.members.iter().enumerate() {
            let mut entry = VMap::default();
            entry.insert("name", m.name.as_str());
            entry.insert("type", m.ty.0);
            entry.insert("offset", m.offset as i64);
            if let Some(bits) = m.bitfield {
                entry.insert("bitfield", bits as i64);
            }
            if let Some(access) = &m.access {
                entry.insert("access", access.as_str());
            }
            if let Some(value) = m.value {
                entry.insert("value", value);
            }
            members.insert(pos as i64, entry);
        }
        map.insert("Memb", members);
    }
    if !record.bases.is_empty() {
        let mut bases = VMap::default();
        for b in &record.bases {
            let mut entry = VMap::default();
            entry.insert("pos", b.pos as i64);
            if let Some(access) = &b.access {
                entry.insert("access", access.as_str());
            }
            if b.virt {
                entry.insert("virtual", 1);
            }
            bases.insert(b.ty.0, entry);
        }
        map.insert("Base", bases);
    }
    if !record.vtable.is_empty() {
        let mut vtable = VMap::default();
        for (slot, entry) in &record.vtable {
            vtable.insert(*slot as i64, entry.as_str());
        }
        map.insert("VTable", vtable);
    }
    if let Some(ns) = &record.namespace
        && !ns.is_empty()
    {
        map.insert("NameSpace", ns.as_str());
    }
    if !record.tparams.is_empty() {
        let mut tparams = VMap::default();
        for (pos, name) in record.tparams.iter().enumerate() {
            let mut entry = VMap::default();
            entry.insert("name", name.as_str());
            tparams.insert(pos as i64, entry);
        }
        map.insert("TParam", tparams);
    }
    if let Some(ret) = record.ret {
        map.insert("Return", ret.0);
    }
    if !record.params.is_empty() {
        let mut params = VMap::default();
        for (pos, ty) in record.params.iter().enumerate() {
            let mut entry = VMap::default();
            entry.insert("type", ty.0);
            params.insert(pos as i64, entry);
        }
        map.insert("Param", params);
    }
    if let Some(class) = record.class {
        map.insert("Class", class.0);
    }
    if record.copied {
        map.insert("Copied", 1);
    }
    Value::Map(map)
}

fn symbol_value(sym: &SymbolRecord) -> Value {
    let mut map = VMap::default();
    map.insert("ShortName", sym.short_name.as_str());
    if sym.mangled != sym.short_name {
        map.insert("MnglName", sym.mangled.as_str());
    }
    if let Some(alias) = &sym.alias {
        map.insert("Alias", alias.as_str());
    }
    for (flag, name) in [
        (sym.ctor, "Constructor"),
        (sym.dtor, "Destructor"),
        (sym.virt, "Virt"),
        (sym.pure_virt, "PureVirt"),
        (sym.inline, "InLine"),
        (sym.artificial, "Artificial"),
        (sym.is_static, "Static"),
        (sym.data, "Data"),
        (sym.is_const, "Const"),
        (sym.is_volatile, "Volatile"),
    ] {
        if flag {
            map.insert(name, 1);
        }
    }
    if let Some(class) = sym.class {
        map.insert("Class", class.0);
    }
    if let Some(ns) = &sym.namespace
        && !ns.is_empty()
    {
        map.insert("NameSpace", ns.as_str());
    }
    if let Some(ret) = sym.ret {
        map.insert("Return", ret.0);
    }
    if !sym.params.is_empty() {
        let mut params = VMap::default();
        for (pos, p) in sym.params.iter().enumerate() {
            let mut entry = VMap::default();
            entry.insert("name", p.name.as_str());
            entry.insert("type", p.ty.0);
            match &p.loc {
                Some(ParamLoc::Stack(off)) => entry.insert("offset", *off),
                Some(ParamLoc::Reg(reg)) => entry.insert("reg", reg.as_str()),
                None => {}
            }
            params.insert(pos as i64, entry);
        }
        map.insert("Param", params);
    }
    if let Some(slot) = sym.vtable_slot {
        map.insert("VirtPos", slot as i64);
    }
    if let Some(decl) = &sym.decl {
        if decl.header {
            map.insert("Header", decl.file.as_str());
            map.insert("Line", decl.line as i64);
        } else {
            map.insert("Source", decl.file.as_str());
            map.insert("SourceLine", decl.line as i64);
        }
    }
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cu::pre::*;

    use crate::{SymId, SymbolRecord, TypeId, TypeKind, TypeRecord};

    #[test]
    fn test_to_value_shape() -> cu::Result<()> {
        let mut graph = AbiGraph::default();
        graph.env.library_name = "libtest.so".into();
        graph.env.arch = "x86-64".into();
        graph.env.word_size = 8;
        graph.env.language = "C++".into();
        graph.register_type(TypeRecord::new(TypeId(0x40), TypeKind::Class, "C".into()));
        let mut sym = SymbolRecord::new(SymId(0x100), "f".into(), "_ZN1C1fEv".into());
        sym.class = Some(TypeId(0x40));
        sym.ret = Some(TypeId::VOID);
        graph.add_symbol(sym);
        graph.exports.insert("_ZN1C1fEv".into(), 11);

        let meta = DumpMeta {
            dumper_version: "1.2".to_string(),
        };
        let mut value = graph.to_value(&meta);
        value.sort_canonical();
        let text = json::stringify(&value)?;
        assert!(text.contains("\"ABI_DUMP_VERSION\""));
        assert!(text.contains("\"_ZN1C1fEv\""));
        assert!(text.contains("\"Target\""));
        // emission is deterministic
        assert_eq!(text, json::stringify(&value)?);
        Ok(())
    }
}
