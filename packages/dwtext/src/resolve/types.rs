use abigraph::{
    ArcStr, BaseClass, DieRecord, Doff, LocValue, Member, Tag, TypeId, TypeKind, TypeRecord,
    split_template,
};
use cu::pre::*;

use super::Resolver;

impl Resolver<'_> {
    /// Produce a Type record for every DIE whose tag denotes a type
    pub(crate) fn resolve_all_types(&mut self) -> cu::Result<()> {
        let offsets = self
            .store
            .iter()
            .filter(|(_, die)| die.tag.is_type())
            .map(|(off, _)| *off)
            .collect::<Vec<_>>();
        for off in offsets {
            cu::check!(
                self.resolve_type(off),
                "failed to resolve type at offset {off}"
            )?;
        }
        cu::debug!("resolved {} type records", self.graph.types.len());
        Ok(())
    }

    /// Resolve one DIE to its output type id, on demand and memoized.
    /// Returns None when the DIE does not produce a type (unnamed local
    /// code, or a base that resolved to nothing).
    pub(crate) fn resolve_type(&mut self, off: Doff) -> cu::Result<Option<TypeId>> {
        if let Some(hit) = self.memo.get(&off) {
            return Ok(*hit);
        }
        let Some(die) = self.store.get(off) else {
            self.memo.insert(off, None);
            return Ok(None);
        };
        if !die.tag.is_type() {
            self.memo.insert(off, None);
            return Ok(None);
        }
        let die = die.clone();
        let id = TypeId::from(off);
        // break reference cycles: the id is fixed before any recursion
        self.memo.insert(off, Some(id));

        let produced = match die.tag {
            Tag::ClassType | Tag::StructureType | Tag::UnionType | Tag::EnumerationType => {
                self.build_aggregate(off, &die, id)?
            }
            Tag::Typedef => self.build_typedef(off, &die, id)?,
            _ => self.build_derived(off, &die, id)?,
        };
        if !produced {
            self.memo.insert(off, None);
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// Class/struct/union/enum. The record is registered before members
    /// resolve so self-referential aggregates can name themselves.
    fn build_aggregate(&mut self, off: Doff, die: &DieRecord, id: TypeId) -> cu::Result<bool> {
        let kind = match die.tag {
            Tag::ClassType => TypeKind::Class,
            Tag::StructureType => TypeKind::Struct,
            Tag::UnionType => TypeKind::Union,
            Tag::EnumerationType => TypeKind::Enum,
            _ => return Ok(false),
        };
        // the __pfn shape is a pointer-to-member-function in disguise
        if kind == TypeKind::Struct && self.first_member_is_pfn(off)? {
            return self.build_pfn_method_ptr(off, die, id);
        }

        let decl = self.decl_site(die);
        let name = match die.name_opt() {
            Some(n) => self.qualified(off, n),
            None => match &decl {
                Some(d) => {
                    let kw = kind.keyword().unwrap_or("class");
                    format!("anon-{kw}-{}-{}", d.file, d.line)
                }
                // unnamed and unlocatable: nothing to identify it by
                None => return Ok(false),
            },
        };
        let name = match kind.keyword() {
            Some(kw) => format!("{kw} {name}"),
            None => name,
        };
        let name = self.canon.canon_type(&name);

        let mut record = TypeRecord::new(id, kind, name.clone());
        record.size = die.uint_opt("byte_size");
        record.decl = decl;
        record.namespace = self.scope_prefix(off).map(ArcStr::from);
        record.local = self.store.is_local(off);
        record.copied = die.flag("declaration");
        if name.ends_with('>')
            && let Some((_, args)) = split_template(&name)
        {
            record.tparams = args.iter().map(|a| ArcStr::new(a)).collect();
        }
        self.graph.register_type(record);

        let members = self.build_members(off, id, kind)?;
        let bases = self.build_bases(off)?;
        if let Some(record) = self.graph.get_type_mut(id) {
            record.members = members;
            record.bases = bases;
        }

        if let Some(spec_off) = die.ref_opt("specification")
            && let Some(spec_id) = self.resolve_type(spec_off)?
        {
            self.merge_specification(id, spec_id);
        }
        Ok(true)
    }

    fn build_members(&mut self, off: Doff, id: TypeId, kind: TypeKind) -> cu::Result<Vec<Member>> {
        let mut members = Vec::new();
        let mut unnamed = 0usize;
        for m_off in self.store.members(off) {
            let m_die = self.store.expect(m_off)?.clone();
            if m_die.tag == Tag::Enumerator {
                let Some(name) = m_die.name_opt() else {
                    continue;
                };
                members.push(Member {
                    name: ArcStr::new(name),
                    ty: id,
                    offset: 0,
                    bitfield: None,
                    access: None,
                    value: m_die.int_opt("const_value"),
                });
                continue;
            }
            let Some(ty_off) = m_die.ref_opt("type") else {
                continue;
            };
            let Some(m_ty) = self.resolve_type(ty_off)? else {
                continue;
            };
            let name = match m_die.name_opt() {
                Some(n) if n.starts_with("_vptr.") => ArcStr::new("_vptr"),
                Some(n) => ArcStr::new(n),
                None => {
                    let n = format!("unnamed{unnamed}");
                    unnamed += 1;
                    ArcStr::from(n)
                }
            };
            let offset = if kind == TypeKind::Union {
                0
            } else {
                match m_die.loc_opt("data_member_location") {
                    Some(LocValue::Frame(x)) if x >= 0 => x as u64,
                    _ => 0,
                }
            };
            members.push(Member {
                name,
                ty: m_ty,
                offset,
                bitfield: m_die.uint_opt("bit_size"),
                access: access_of(&m_die),
                value: None,
            });
        }
        Ok(members)
    }

    fn build_bases(&mut self, off: Doff) -> cu::Result<Vec<BaseClass>> {
        let mut bases = Vec::new();
        for (pos, i_off) in self.store.inheritances(off).into_iter().enumerate() {
            let i_die = self.store.expect(i_off)?.clone();
            let Some(ty_off) = i_die.ref_opt("type") else {
                continue;
            };
            let Some(ty) = self.resolve_type(ty_off)? else {
                continue;
            };
            bases.push(BaseClass {
                ty,
                pos,
                access: access_of(&i_die),
                virt: i_die.virtuality().0,
            });
        }
        Ok(bases)
    }

    /// Typedef. Registered before its target resolves; a target that turns
    /// out to be an anonymous aggregate folds into the typedef record.
    fn build_typedef(&mut self, off: Doff, die: &DieRecord, id: TypeId) -> cu::Result<bool> {
        let Some(n) = die.name_opt() else {
            return Ok(false);
        };
        let name = self.canon.canon_type(&self.qualified(off, n));
        let mut record = TypeRecord::new(id, TypeKind::Typedef, name);
        record.decl = self.decl_site(die);
        record.namespace = self.scope_prefix(off).map(ArcStr::from);
        record.local = self.store.is_local(off);
        self.graph.register_type(record);

        let base = match die.ref_opt("type") {
            Some(ty_off) => match self.resolve_type(ty_off)? {
                Some(base) => base,
                None => {
                    // target resolved to nothing, the typedef goes with it
                    self.graph.types.remove(&id);
                    return Ok(false);
                }
            },
            None => TypeId::VOID,
        };

        let base = self.graph.first_id(base);
        let folded = self
            .graph
            .get_type(base)
            .filter(|b| b.is_anon() && !b.kind.family().eq(&abigraph::Family::Other))
            .cloned();
        match folded {
            Some(anon) => {
                // the anonymous aggregate disappears into the typedef
                let kw = anon.kind.keyword().unwrap_or("struct");
                let folded_name = self.canon.canon_type(&format!("{kw} {}", self.qualified(off, n)));
                if let Some(record) = self.graph.get_type_mut(id) {
                    record.name = folded_name.clone();
                    record.members = anon.members.clone();
                    record.size = anon.size;
                    record.bases = anon.bases.clone();
                }
                self.graph.merged.insert(base, id);
                // re-register so the folded spelling is the identity
                if let Some(record) = self.graph.get_type(id).cloned() {
                    self.graph.register_type(record);
                }
            }
            None => {
                if let Some(record) = self.graph.get_type_mut(id) {
                    record.base = Some(base);
                }
            }
        }
        Ok(true)
    }

    /// Qualifiers, pointers, references, arrays, subroutines and
    /// pointer-to-member types: base resolves first, the name derives
    /// from the base record.
    fn build_derived(&mut self, off: Doff, die: &DieRecord, id: TypeId) -> cu::Result<bool> {
        let base = match die.ref_opt("type") {
            Some(ty_off) => match self.resolve_type(ty_off)? {
                Some(base) => Some(base),
                // base yielded no name (local code): drop this type
                None => return Ok(false),
            },
            None => None,
        };

        let record = match die.tag {
            Tag::BaseType => {
                let Some(n) = die.name_opt() else {
                    return Ok(false);
                };
                let name = self.canon.canon_type(n);
                let mut record = TypeRecord::new(id, TypeKind::Intrinsic, name);
                record.size = die.uint_opt("byte_size");
                record
            }
            Tag::ConstType | Tag::VolatileType => {
                let base = base.unwrap_or(TypeId::VOID);
                let qual = if die.tag == Tag::ConstType { "const" } else { "volatile" };
                let name = self
                    .canon
                    .canon_type(&format!("{} {qual}", self.name_of(base)));
                let mut record = TypeRecord::new(
                    id,
                    if die.tag == Tag::ConstType {
                        TypeKind::Const
                    } else {
                        TypeKind::Volatile
                    },
                    name,
                );
                record.base = Some(base);
                record
            }
            Tag::PointerType | Tag::ReferenceType => {
                let base = base.unwrap_or(TypeId::VOID);
                if die.tag == Tag::PointerType && self.is_subroutine(base) {
                    self.build_funcptr(id, base)?
                } else {
                    let sigil = if die.tag == Tag::PointerType { "*" } else { "&" };
                    let name = self
                        .canon
                        .canon_type(&format!("{}{sigil}", self.name_of(base)));
                    let mut record = TypeRecord::new(
                        id,
                        if die.tag == Tag::PointerType {
                            TypeKind::Pointer
                        } else {
                            TypeKind::Ref
                        },
                        name,
                    );
                    record.base = Some(base);
                    record.size = Some(self.graph.env.word_size);
                    record
                }
            }
            Tag::ArrayType => {
                let Some(base) = base else {
                    return Ok(false);
                };
                self.build_array(off, id, base)?
            }
            Tag::SubroutineType => {
                let ret = base.unwrap_or(TypeId::VOID);
                let params = self.subroutine_params(off, false)?;
                let args = self.param_names(&params);
                let name = self
                    .canon
                    .canon_type(&format!("{}()({args})", self.name_of(ret)));
                let mut record = TypeRecord::new(id, TypeKind::Func, name);
                record.ret = Some(ret);
                record.params = params;
                record
            }
            Tag::PtrToMemberType => {
                let Some(class_off) = die.ref_opt("containing_type") else {
                    return Ok(false);
                };
                let Some(class) = self.resolve_type(class_off)? else {
                    return Ok(false);
                };
                let Some(target) = base else {
                    return Ok(false);
                };
                if self.is_subroutine(target) {
                    self.build_ptm_func(id, class, target)?
                } else {
                    let name = self.canon.canon_type(&format!(
                        "{}({}::*)",
                        self.name_of(target),
                        self.bare_name(class)
                    ));
                    let mut record = TypeRecord::new(id, TypeKind::FieldPtr, name);
                    record.base = Some(target);
                    record.class = Some(class);
                    record.size = Some(self.graph.env.word_size);
                    record
                }
            }
            _ => return Ok(false),
        };
        self.graph.register_type(record);
        Ok(true)
    }

    fn build_array(&mut self, off: Doff, id: TypeId, base: TypeId) -> cu::Result<TypeRecord> {
        let mut dims = Vec::new();
        for child in self.store.children(off) {
            let Some(die) = self.store.get(*child) else {
                continue;
            };
            if die.tag != Tag::SubrangeType {
                continue;
            }
            match (die.uint_opt("upper_bound"), die.uint_opt("count")) {
                (Some(ub), _) => dims.push(Some(ub + 1)),
                (None, Some(count)) => dims.push(Some(count)),
                (None, None) => dims.push(None),
            }
        }
        if dims.is_empty() {
            dims.push(None);
        }
        let mut name = self.name_of(base).to_string();
        let mut total = Some(1u64);
        for dim in &dims {
            match dim {
                Some(n) => {
                    name.push_str(&format!("[{n}]"));
                    total = total.map(|t| t * n);
                }
                None => {
                    name.push_str("[]");
                    total = None;
                }
            }
        }
        let elem_size = self
            .graph
            .get_type(self.graph.first_id(base))
            .and_then(|t| t.size);
        let mut record = TypeRecord::new(id, TypeKind::Array, self.canon.canon_type(&name));
        record.base = Some(base);
        record.size = match (total, elem_size) {
            (Some(n), Some(s)) => Some(n * s),
            _ => None,
        };
        Ok(record)
    }

    /// Pointer whose base is a subroutine type: `R(*)(P1,P2,…)`
    fn build_funcptr(&mut self, id: TypeId, sub: TypeId) -> cu::Result<TypeRecord> {
        let sub_first = self.graph.first_id(sub);
        let (ret, params) = match self.graph.get_type(sub_first) {
            Some(record) => (
                record.ret.unwrap_or(TypeId::VOID),
                record.params.clone(),
            ),
            None => (TypeId::VOID, Vec::new()),
        };
        let args = self.param_names(&params);
        let name = self
            .canon
            .canon_type(&format!("{}(*)({args})", self.name_of(ret)));
        let mut record = TypeRecord::new(id, TypeKind::FuncPtr, name);
        record.ret = Some(ret);
        record.params = params;
        record.base = Some(sub);
        record.size = Some(self.graph.env.word_size);
        Ok(record)
    }

    /// `ptr_to_member_type` whose target is a subroutine: `R(C::*)(P…)`
    fn build_ptm_func(&mut self, id: TypeId, class: TypeId, sub: TypeId) -> cu::Result<TypeRecord> {
        let sub_off = Doff(self.graph.first_id(sub).0 as usize);
        let params = self.subroutine_params(sub_off, true)?;
        let ret = self
            .graph
            .get_type(self.graph.first_id(sub))
            .and_then(|t| t.ret)
            .unwrap_or(TypeId::VOID);
        let args = self.param_names(&params);
        let name = self.canon.canon_type(&format!(
            "{}({}::*)({args})",
            self.name_of(ret),
            self.bare_name(class)
        ));
        let mut record = TypeRecord::new(id, TypeKind::MethodPtr, name);
        record.ret = Some(ret);
        record.params = params;
        record.class = Some(class);
        record.size = Some(self.graph.env.word_size);
        Ok(record)
    }

    fn first_member_is_pfn(&self, off: Doff) -> cu::Result<bool> {
        let members = self.store.members(off);
        let Some(first) = members.first() else {
            return Ok(false);
        };
        Ok(self
            .store
            .expect(*first)?
            .name_opt()
            .map(|n| n == "__pfn")
            .unwrap_or(false))
    }

    /// A struct whose first member is `__pfn` is a pointer-to-member-
    /// function pair; the class comes from the subroutine's object pointer
    fn build_pfn_method_ptr(&mut self, off: Doff, die: &DieRecord, id: TypeId) -> cu::Result<bool> {
        let members = self.store.members(off);
        let pfn = self.store.expect(members[0])?;
        // __pfn is a pointer to the subroutine type
        let Some(pfn_ptr) = pfn.ref_opt("type") else {
            return Ok(false);
        };
        let Some(sub_off) = self.store.get(pfn_ptr).and_then(|d| d.ref_opt("type")) else {
            return Ok(false);
        };
        let Some(sub_die) = self.store.get(sub_off) else {
            return Ok(false);
        };
        if sub_die.tag != Tag::SubroutineType {
            return Ok(false);
        }
        let class = match self.object_pointer_class(sub_off)? {
            Some(class_off) => self.resolve_type(class_off)?,
            None => None,
        };
        let Some(class) = class else {
            return Ok(false);
        };
        let ret = match sub_die.ref_opt("type") {
            Some(r) => self.resolve_type(r)?.unwrap_or(TypeId::VOID),
            None => TypeId::VOID,
        };
        let params = self.subroutine_params(sub_off, true)?;
        let args = self.param_names(&params);
        let name = self.canon.canon_type(&format!(
            "{}({}::*)({args})",
            self.name_of(ret),
            self.bare_name(class)
        ));
        let mut record = TypeRecord::new(id, TypeKind::MethodPtr, name);
        record.ret = Some(ret);
        record.params = params;
        record.class = Some(class);
        record.size = die.uint_opt("byte_size");
        record.decl = self.decl_site(die);
        self.graph.register_type(record);
        Ok(true)
    }

    /// The class a subroutine's artificial first parameter points at
    pub(crate) fn object_pointer_class(&self, sub_off: Doff) -> cu::Result<Option<Doff>> {
        let sub_die = self.store.expect(sub_off)?;
        let param = match sub_die.ref_opt("object_pointer") {
            Some(p) => Some(p),
            None => self
                .store
                .params(sub_off)
                .into_iter()
                .find(|p| self.store.get(*p).map(|d| d.flag("artificial")).unwrap_or(false)),
        };
        let Some(param) = param else {
            return Ok(None);
        };
        Ok(self.store.strip_to_named(param))
    }

    /// Parameter types of a subroutine-like DIE, in order. The implicit
    /// `this` is dropped when `skip_artificial` is set.
    pub(crate) fn subroutine_params(
        &mut self,
        off: Doff,
        skip_artificial: bool,
    ) -> cu::Result<Vec<TypeId>> {
        let mut params = Vec::new();
        for p_off in self.store.params(off) {
            let p_die = self.store.expect(p_off)?.clone();
            if p_die.tag == Tag::UnspecifiedParameters {
                params.push(TypeId::VARIADIC);
                continue;
            }
            if skip_artificial && p_die.flag("artificial") {
                continue;
            }
            let Some(ty_off) = p_die.ref_opt("type") else {
                continue;
            };
            match self.resolve_type(ty_off)? {
                Some(ty) => params.push(ty),
                None => params.push(TypeId::VOID),
            }
        }
        Ok(params)
    }

    pub(crate) fn name_of(&self, id: TypeId) -> ArcStr {
        self.graph
            .get_type(self.graph.first_id(id))
            .map(|t| t.name.clone())
            .unwrap_or_default()
    }

    /// Class name without its kind keyword, for member-pointer spellings
    pub(crate) fn bare_name(&self, id: TypeId) -> String {
        let name = self.name_of(id);
        for kw in ["struct ", "union ", "enum "] {
            if let Some(rest) = name.strip_prefix(kw) {
                return rest.to_string();
            }
        }
        name.to_string()
    }

    pub(crate) fn param_names(&self, params: &[TypeId]) -> String {
        params
            .iter()
            .map(|p| self.name_of(*p).to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Definition data flows into the specification record, which stays
    /// the canonical id; the specification keeps its own name and access.
    fn merge_specification(&mut self, def_id: TypeId, spec_id: TypeId) {
        // already merged the other way round through the name registry
        if def_id == spec_id || self.graph.first_id(spec_id) == def_id {
            return;
        }
        let def = self.graph.get_type(def_id).cloned();
        if let (Some(def), Some(spec)) = (def, self.graph.get_type_mut(spec_id)) {
            if spec.members.is_empty() {
                spec.members = def.members.clone();
            }
            if spec.bases.is_empty() {
                spec.bases = def.bases.clone();
            }
            if spec.size.is_none() {
                spec.size = def.size;
            }
            // the definition is authoritative for the code location
            if def.decl.is_some() {
                spec.decl = def.decl.clone();
            }
        }
        if let Some(def) = self.graph.get_type_mut(def_id) {
            def.spec_of = Some(spec_id);
        }
        self.graph.merged.insert(def_id, spec_id);
    }

    fn is_subroutine(&self, id: TypeId) -> bool {
        self.graph
            .get_type(self.graph.first_id(id))
            .map(|t| t.kind == TypeKind::Func)
            .unwrap_or(false)
    }
}

fn access_of(die: &DieRecord) -> Option<ArcStr> {
    if let Some(kw) = die.str_opt("accessibility") {
        return Some(ArcStr::new(kw));
    }
    match die.int_opt("accessibility") {
        Some(1) => Some(ArcStr::new("public")),
        Some(2) => Some(ArcStr::new("protected")),
        Some(3) => Some(ArcStr::new("private")),
        _ => None,
    }
}
