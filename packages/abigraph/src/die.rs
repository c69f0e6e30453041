use std::collections::BTreeMap;

use cu::pre::*;

use crate::{ArcStr, Doff};

/// Tag of a DIE record. The set is closed (DWARF 4/5); tags outside it are
/// kept in the store as [`Tag::Other`] for parentage but never resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    CompileUnit,
    Namespace,
    ClassType,
    StructureType,
    UnionType,
    EnumerationType,
    ArrayType,
    SubroutineType,
    BaseType,
    ConstType,
    PointerType,
    ReferenceType,
    VolatileType,
    Typedef,
    PtrToMemberType,
    Subprogram,
    InlinedSubroutine,
    LexicalBlock,
    Variable,
    Member,
    Enumerator,
    Inheritance,
    FormalParameter,
    UnspecifiedParameters,
    SubrangeType,
    Other,
}

impl Tag {
    pub fn from_name(name: &str) -> Self {
        match name {
            "compile_unit" => Self::CompileUnit,
            "namespace" => Self::Namespace,
            "class_type" => Self::ClassType,
            "structure_type" => Self::StructureType,
            "union_type" => Self::UnionType,
            "enumeration_type" => Self::EnumerationType,
            "array_type" => Self::ArrayType,
            "subroutine_type" => Self::SubroutineType,
            "base_type" => Self::BaseType,
            "const_type" => Self::ConstType,
            "pointer_type" => Self::PointerType,
            "reference_type" => Self::ReferenceType,
            "volatile_type" => Self::VolatileType,
            "typedef" => Self::Typedef,
            "ptr_to_member_type" => Self::PtrToMemberType,
            "subprogram" => Self::Subprogram,
            "inlined_subroutine" => Self::InlinedSubroutine,
            "lexical_block" => Self::LexicalBlock,
            "variable" => Self::Variable,
            "member" => Self::Member,
            "enumerator" => Self::Enumerator,
            "inheritance" => Self::Inheritance,
            "formal_parameter" => Self::FormalParameter,
            "unspecified_parameters" => Self::UnspecifiedParameters,
            "subrange_type" => Self::SubrangeType,
            _ => Self::Other,
        }
    }

    /// Tags that denote a type and produce a Type record
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::ClassType
                | Self::StructureType
                | Self::UnionType
                | Self::EnumerationType
                | Self::ArrayType
                | Self::SubroutineType
                | Self::BaseType
                | Self::ConstType
                | Self::PointerType
                | Self::ReferenceType
                | Self::VolatileType
                | Self::Typedef
                | Self::PtrToMemberType
        )
    }

    /// Tags that open a qualifier scope for nested names
    pub fn is_scope(self) -> bool {
        matches!(
            self,
            Self::Namespace
                | Self::ClassType
                | Self::StructureType
                | Self::UnionType
                | Self::Subprogram
                | Self::LexicalBlock
        )
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            Self::ClassType | Self::StructureType | Self::UnionType | Self::EnumerationType
        )
    }
}

/// A parsed location expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocValue {
    /// Frame-relative offset (`fbreg N`)
    Frame(i64),
    /// DWARF register number (`regN`)
    Reg(u16),
    /// Offset into the location-list table, resolved via the debug_loc map
    List(u64),
}

/// A typed attribute value of a DIE
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrValue {
    /// Reference to another DIE
    Ref(Doff),
    /// Signed integer data
    Int(i64),
    /// String data
    Str(ArcStr),
    /// Enumerated keyword with its annotation stripped
    Kw(ArcStr),
    /// Address value with the optional `<mangled>` hint the disassembler
    /// prints next to it
    Addr { value: u64, hint: Option<ArcStr> },
    /// Location expression
    Loc(LocValue),
}

/// One DIE record. Created during text scanning, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DieRecord {
    pub offset: Doff,
    pub tag: Tag,
    pub depth: usize,
    pub attrs: BTreeMap<ArcStr, AttrValue>,
}

impl DieRecord {
    pub fn new(offset: Doff, tag: Tag, depth: usize) -> Self {
        Self {
            offset,
            tag,
            depth,
            attrs: BTreeMap::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Get a string attribute value (plain string or keyword)
    pub fn str_opt(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name)? {
            AttrValue::Str(s) | AttrValue::Kw(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get a signed integer attribute value
    pub fn int_opt(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name)? {
            AttrValue::Int(x) => Some(*x),
            _ => None,
        }
    }

    /// Get an unsigned integer attribute value
    pub fn uint_opt(&self, name: &str) -> Option<u64> {
        match self.attrs.get(name)? {
            AttrValue::Int(x) if *x >= 0 => Some(*x as u64),
            AttrValue::Addr { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn uint(&self, name: &str) -> cu::Result<u64> {
        let offset = self.offset;
        cu::check!(
            self.uint_opt(name),
            "entry is missing {name} at offset {offset}"
        )
    }

    /// Get an attribute as a DIE reference
    pub fn ref_opt(&self, name: &str) -> Option<Doff> {
        match self.attrs.get(name)? {
            AttrValue::Ref(x) => Some(*x),
            _ => None,
        }
    }

    pub fn ref_attr(&self, name: &str) -> cu::Result<Doff> {
        let offset = self.offset;
        cu::check!(
            self.ref_opt(name),
            "missing {name} reference for entry at offset {offset}"
        )
    }

    /// Get an attribute as a flag. Missing means false.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.attrs.get(name), Some(AttrValue::Int(x)) if *x != 0)
    }

    /// Get a location attribute. Plain integer forms are frame offsets.
    pub fn loc_opt(&self, name: &str) -> Option<LocValue> {
        match self.attrs.get(name)? {
            AttrValue::Loc(x) => Some(*x),
            AttrValue::Int(x) => Some(LocValue::Frame(*x)),
            _ => None,
        }
    }

    /// Get the `<mangled>` hint the disassembler printed next to an
    /// address-valued attribute
    pub fn addr_hint(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name)? {
            AttrValue::Addr { hint, .. } => hint.as_ref().map(|x| x.as_str()),
            _ => None,
        }
    }

    pub fn name_opt(&self) -> Option<&str> {
        self.str_opt("name")
    }

    pub fn name(&self) -> cu::Result<&str> {
        let offset = self.offset;
        cu::check!(
            self.name_opt(),
            "name is missing for entry at offset {offset}"
        )
    }

    /// Get the name before the first `<`. Only meaningful for types, not
    /// function names, because of `operator<`
    pub fn untemplated_name_opt(&self) -> Option<&str> {
        let name = self.name_opt()?;
        Some(match name.find('<') {
            Some(i) => &name[..i],
            None => name,
        })
    }

    /// Get the linkage name, trying both spellings the producer may use
    pub fn mangled_opt(&self) -> Option<&str> {
        self.str_opt("linkage_name")
            .or_else(|| self.str_opt("MIPS_linkage_name"))
    }

    /// Declaration coordinates (file number, line) if present
    pub fn decl_coords(&self) -> Option<(u64, u64)> {
        let file = self.uint_opt("decl_file")?;
        let line = self.uint_opt("decl_line").unwrap_or(0);
        Some((file, line))
    }

    /// Whether the `virtuality` keyword marks this entry virtual or pure
    /// virtual. Returns (virt, pure).
    pub fn virtuality(&self) -> (bool, bool) {
        match self.str_opt("virtuality") {
            Some("virtual") => (true, false),
            Some("pure_virtual") => (true, true),
            _ => (false, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        assert_eq!(Tag::from_name("structure_type"), Tag::StructureType);
        assert_eq!(Tag::from_name("ptr_to_member_type"), Tag::PtrToMemberType);
        assert_eq!(Tag::from_name("partial_unit"), Tag::Other);
        assert!(Tag::Typedef.is_type());
        assert!(!Tag::Subprogram.is_type());
        assert!(Tag::Subprogram.is_scope());
    }

    #[test]
    fn test_accessors() {
        let mut die = DieRecord::new(Doff(0x2d), Tag::Member, 2);
        die.attrs
            .insert("name".into(), AttrValue::Str("field".into()));
        die.attrs.insert("data_member_location".into(), AttrValue::Int(8));
        die.attrs.insert("external".into(), AttrValue::Int(1));
        die.attrs
            .insert("type".into(), AttrValue::Ref(Doff(0x40)));
        assert_eq!(die.name_opt(), Some("field"));
        assert_eq!(die.uint_opt("data_member_location"), Some(8));
        assert!(die.flag("external"));
        assert!(!die.flag("declaration"));
        assert_eq!(die.ref_opt("type"), Some(Doff(0x40)));
        assert_eq!(
            die.loc_opt("data_member_location"),
            Some(LocValue::Frame(8))
        );
    }
}
