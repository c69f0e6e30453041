use abigraph::{
    ArcStr, Bucket, DieRecord, Doff, LocValue, Param, ParamLoc, SymId, SymbolRecord, Tag, TypeId,
    TypeKind, TypeRecord, reg_name,
};
use cu::pre::*;

use super::Resolver;

/// Manglings dropped under `--skip-cxx`
const STD_PREFIXES: &[&str] = &[
    "_ZS", "_ZNS", "_ZNKS", "_ZN9__gnu_cxx", "_ZNK9__gnu_cxx", "_ZTIS", "_ZTSS",
];

impl Resolver<'_> {
    /// Produce symbol records for every subprogram and variable DIE
    pub(crate) fn resolve_all_symbols(&mut self) -> cu::Result<()> {
        let offsets = self
            .store
            .iter()
            .filter(|(_, die)| matches!(die.tag, Tag::Subprogram | Tag::Variable))
            .map(|(off, _)| *off)
            .collect::<Vec<_>>();
        for off in offsets {
            cu::check!(
                self.resolve_symbol(off),
                "failed to resolve symbol at offset {off}"
            )?;
        }
        cu::debug!("resolved {} symbol records", self.graph.symbols.len());
        Ok(())
    }

    fn resolve_symbol(&mut self, off: Doff) -> cu::Result<()> {
        let die = self.store.expect(off)?.clone();
        // DIEs inside another function are locals
        if let Some(parent) = self.store.parent(off)
            && let Some(parent_die) = self.store.get(parent)
            && matches!(parent_die.tag, Tag::Subprogram | Tag::LexicalBlock)
        {
            return Ok(());
        }

        let spec_die = die
            .ref_opt("specification")
            .and_then(|o| self.store.get(o))
            .cloned();
        let origin_die = die
            .ref_opt("abstract_origin")
            .and_then(|o| self.store.get(o))
            .cloned();

        let short_raw = die
            .name_opt()
            .or_else(|| spec_die.as_ref().and_then(|d| d.name_opt()))
            .or_else(|| origin_die.as_ref().and_then(|d| d.name_opt()))
            .map(str::to_string);

        // the tokenized <name> next to the address wins, then linkage
        // names, then the specification's; a bare short name containing a
        // template bracket is a declaration-only DIE
        let mangled = die
            .addr_hint("low_pc")
            .or_else(|| die.addr_hint("location"))
            .or_else(|| die.mangled_opt())
            .or_else(|| spec_die.as_ref().and_then(|d| d.mangled_opt()))
            .or_else(|| origin_die.as_ref().and_then(|d| d.mangled_opt()))
            .map(str::to_string);
        let mangled = match mangled {
            Some(m) => m,
            None => match &short_raw {
                Some(s) if s.contains('<') => return Ok(()),
                Some(s) => s.clone(),
                None => return Ok(()),
            },
        };
        let mangled = mangled.split('@').next().unwrap_or("").to_string();
        if mangled.is_empty() {
            return Ok(());
        }
        // compiler-generated clones and un-demangleable stubs
        if mangled.contains('.') {
            return Ok(());
        }
        if mangled
            .chars()
            .any(|c| !c.is_ascii_alphanumeric() && c != '_')
        {
            return Ok(());
        }
        if self.opts.skip_cxx && STD_PREFIXES.iter().any(|p| mangled.starts_with(p)) {
            return Ok(());
        }

        let ctor = ["C1E", "C2E"].iter().any(|p| mangled.contains(p));
        let dtor = ["D0E", "D1E", "D2E"].iter().any(|p| mangled.contains(p));

        // out-of-line constructor copies point back through their abstract
        // origin to the in-class declaration, which alone carries the
        // name, site, class and virtuality
        let info_die: DieRecord = if ctor || dtor {
            origin_die
                .as_ref()
                .and_then(|o| o.ref_opt("specification"))
                .and_then(|s| self.store.get(s))
                .cloned()
                .or_else(|| spec_die.clone())
                .unwrap_or_else(|| die.clone())
        } else {
            spec_die.clone().unwrap_or_else(|| die.clone())
        };

        let short = info_die
            .name_opt()
            .map(str::to_string)
            .or(short_raw)
            .unwrap_or_else(|| mangled.clone());
        let short = self.canon.canon_symbol(&short);

        let data = die.tag == Tag::Variable;
        // the definition is authoritative for the code location; the
        // declaration only fills in when the definition has none
        let decl = self.decl_site(&die).or_else(|| self.decl_site(&info_die));
        let class = self.enclosing_class(info_die.offset)?;
        let (virt, pure_virt) = {
            let (v1, p1) = info_die.virtuality();
            let (v2, p2) = die.virtuality();
            (v1 || v2, p1 || p2)
        };
        let external = die.flag("external") || info_die.flag("external");
        let inline = is_inline(&die) || is_inline(&info_die);
        let has_code = die.attr("low_pc").is_some();

        // an explicit constructor proves the class is not trivially
        // copyable, whether or not the symbol itself is retained
        if ctor && let Some(class) = class {
            let class = self.graph.first_id(class);
            if let Some(record) = self.graph.get_type_mut(class) {
                record.copied = false;
            }
        }

        let exported = self.graph.exports.contains_key(&ArcStr::new(&mangled))
            || self.graph.versions.contains_key(&ArcStr::new(&mangled));
        let bucket = if !data && has_code {
            if exported {
                Bucket::Keep
            } else if self.opts.all_symbols && external {
                Bucket::Keep
            } else {
                return Ok(());
            }
        } else if exported {
            Bucket::Keep
        } else if self.opts.bin_only {
            return Ok(());
        } else if decl.as_ref().map(|d| d.header).unwrap_or(false) {
            Bucket::Deferred
        } else {
            return Ok(());
        };

        let ret = match die
            .ref_opt("type")
            .or_else(|| info_die.ref_opt("type"))
        {
            Some(ty_off) => self.resolve_type(ty_off)?,
            None => None,
        };
        let (params, dropped_this) = self.symbol_params(off)?;

        let mut sym = SymbolRecord::new(SymId::from(off), short, ArcStr::from(mangled.clone()));
        sym.alias = self.graph.versions.get(&ArcStr::new(&mangled)).cloned();
        sym.ctor = ctor;
        sym.dtor = dtor;
        sym.virt = virt && !pure_virt;
        sym.pure_virt = pure_virt;
        sym.inline = inline;
        sym.artificial = die.flag("artificial");
        sym.data = data;
        sym.is_const = mangled.starts_with("_ZNK") || mangled.starts_with("_ZNVK");
        sym.is_volatile = mangled.starts_with("_ZNV");
        sym.class = class;
        sym.namespace = self.namespace_prefix(info_die.offset).map(ArcStr::from);
        sym.ret = if data { ret } else { Some(ret.unwrap_or(TypeId::VOID)) };
        sym.params = params;
        sym.is_static = class.is_some() && !data && !dropped_this;
        sym.vtable_slot = self.vtable_slot(&die, &info_die);
        sym.decl = decl;
        sym.bucket = bucket;

        if let Some(class) = class
            && !data
        {
            sym.method_type = Some(self.register_method_type(off, class, &sym)?);
        }

        self.graph.add_symbol(sym);
        Ok(())
    }

    /// Parameter list of a function symbol with call-boundary locations.
    /// Returns the list and whether an artificial `this` was dropped.
    fn symbol_params(&mut self, off: Doff) -> cu::Result<(Vec<Param>, bool)> {
        let mut params = Vec::new();
        let mut dropped_this = false;
        for p_off in self.store.params(off) {
            let p_die = self.store.expect(p_off)?.clone();
            if p_die.tag == Tag::UnspecifiedParameters {
                params.push(Param {
                    name: ArcStr::new("..."),
                    ty: TypeId::VARIADIC,
                    loc: None,
                });
                continue;
            }
            if p_die.flag("artificial") {
                dropped_this = true;
                continue;
            }
            let name = p_die
                .name_opt()
                .map(ArcStr::new)
                .or_else(|| {
                    p_die
                        .ref_opt("abstract_origin")
                        .and_then(|o| self.store.get(o))
                        .and_then(|d| d.name_opt())
                        .map(ArcStr::new)
                })
                .unwrap_or_else(|| ArcStr::from(format!("p{}", params.len() + 1)));
            let ty = match p_die.ref_opt("type") {
                Some(ty_off) => self.resolve_type(ty_off)?.unwrap_or(TypeId::VOID),
                None => TypeId::VOID,
            };
            let loc = p_die
                .loc_opt("location")
                .and_then(|l| self.param_loc(l))
                .or_else(|| {
                    p_die
                        .uint_opt("register")
                        .map(|n| ParamLoc::Reg(reg_name(&self.graph.env.arch, n as u16)))
                });
            params.push(Param { name, ty, loc });
        }
        Ok((params, dropped_this))
    }

    fn param_loc(&self, loc: LocValue) -> Option<ParamLoc> {
        match loc {
            LocValue::Frame(x) => Some(ParamLoc::Stack(x)),
            LocValue::Reg(n) => Some(ParamLoc::Reg(reg_name(&self.graph.env.arch, n))),
            LocValue::List(off) => match self.loc.resolve(off)? {
                LocValue::Frame(x) => Some(ParamLoc::Stack(x)),
                LocValue::Reg(n) => Some(ParamLoc::Reg(reg_name(&self.graph.env.arch, n))),
                LocValue::List(_) => None,
            },
        }
    }

    fn vtable_slot(&self, die: &DieRecord, info_die: &DieRecord) -> Option<u64> {
        let loc = die
            .loc_opt("vtable_elem_location")
            .or_else(|| info_die.loc_opt("vtable_elem_location"))?;
        match loc {
            LocValue::Frame(x) if x >= 0 => Some(x as u64),
            LocValue::List(off) => match self.loc.resolve(off)? {
                LocValue::Frame(x) if x >= 0 => Some(x as u64),
                _ => None,
            },
            _ => None,
        }
    }

    /// Nearest class/struct/union ancestor, resolved to a type id
    fn enclosing_class(&mut self, off: Doff) -> cu::Result<Option<TypeId>> {
        let mut cur = off;
        while let Some(parent) = self.store.parent(cur) {
            if let Some(die) = self.store.get(parent)
                && matches!(
                    die.tag,
                    Tag::ClassType | Tag::StructureType | Tag::UnionType
                )
            {
                return self.resolve_type(parent);
            }
            cur = parent;
        }
        Ok(None)
    }

    /// The `R(C::*)(…)` method-context record for a class method
    fn register_method_type(
        &mut self,
        off: Doff,
        class: TypeId,
        sym: &SymbolRecord,
    ) -> cu::Result<TypeId> {
        let id = TypeId::from(off);
        let ret = sym.ret.unwrap_or(TypeId::VOID);
        let ptypes = sym.params.iter().map(|p| p.ty).collect::<Vec<_>>();
        let args = self.param_names(&ptypes);
        let name = self.canon.canon_type(&format!(
            "{}({}::*)({args})",
            self.name_of(ret),
            self.bare_name(class)
        ));
        let mut record = TypeRecord::new(id, TypeKind::MethodPtr, name);
        record.ret = Some(ret);
        record.params = ptypes;
        record.class = Some(class);
        record.size = Some(self.graph.env.word_size);
        self.graph.register_type(record);
        Ok(self.graph.first_id(id))
    }
}

fn is_inline(die: &DieRecord) -> bool {
    match die.str_opt("inline") {
        Some(kw) => kw.contains("inlined"),
        None => matches!(die.int_opt("inline"), Some(1) | Some(3)),
    }
}
