use std::collections::{BTreeMap, BTreeSet};

use cu::pre::*;

/// Offset of a DIE in the concatenated debug-info text
///
/// A Doff is the identity of a DIE within one run. When several objects are
/// processed together, each file's offsets are rebased by a running file
/// base so all Doffs live in one flat space.
#[rustfmt::skip]
#[derive(DebugCustom, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Display)]
#[display("0x{:x}", self.0)]
#[debug("0x{:x}", self.0)]
pub struct Doff(pub usize);

pub type DoffMap<T> = BTreeMap<Doff, T>;
pub type DoffSet = BTreeSet<Doff>;

/// Identity of a type in the output graph
///
/// Regular types use their DIE offset value. Two ids are reserved and always
/// present: `1` for `void` and `-1` for the ellipsis placeholder.
#[rustfmt::skip]
#[derive(DebugCustom, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Display)]
#[display("{}", self.0)]
#[debug("{}", self.0)]
pub struct TypeId(pub i64);

impl TypeId {
    pub const VOID: TypeId = TypeId(1);
    pub const VARIADIC: TypeId = TypeId(-1);

    pub const fn is_reserved(self) -> bool {
        self.0 == 1 || self.0 == -1
    }
}

impl From<Doff> for TypeId {
    fn from(value: Doff) -> Self {
        Self(value.0 as i64)
    }
}

impl Serialize for TypeId {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for TypeId {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        Ok(Self(i64::deserialize(de)?))
    }
}

pub type TypeIdMap<T> = BTreeMap<TypeId, T>;
pub type TypeIdSet = BTreeSet<TypeId>;

/// Identity of a symbol record in the output graph
#[rustfmt::skip]
#[derive(DebugCustom, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Display)]
#[display("{}", self.0)]
#[debug("{}", self.0)]
pub struct SymId(pub i64);

impl From<Doff> for SymId {
    fn from(value: Doff) -> Self {
        Self(value.0 as i64)
    }
}
