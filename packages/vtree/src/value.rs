use cu::pre::*;

/// Key of a [`Value::Map`] entry.
///
/// Numeric keys sort numerically and before string keys; string keys sort
/// lexicographically. The JSON encoding spells both as object keys, so a
/// numeric key round-trips through its decimal spelling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Key {
    #[display("{}", _0)]
    Num(i64),
    #[display("{}", _0)]
    Str(String),
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}
impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}
impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl Key {
    fn parse(spelled: &str) -> Self {
        match spelled.parse::<i64>() {
            Ok(n) => Self::Num(n),
            Err(_) => Self::Str(spelled.to_string()),
        }
    }
}

/// A tagged value tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    Seq(Vec<Value>),
    Map(VMap),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }
    pub fn map() -> Self {
        Self::Map(VMap::default())
    }

    /// Recursively sort every map: numeric keys numerically,
    /// string keys lexicographically
    pub fn sort_canonical(&mut self) {
        match self {
            Value::Int(_) | Value::Str(_) => {}
            Value::Seq(items) => {
                for item in items {
                    item.sort_canonical();
                }
            }
            Value::Map(map) => map.sort_canonical(),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}
impl From<VMap> for Value {
    fn from(value: VMap) -> Self {
        Self::Map(value)
    }
}

/// Insertion-ordered map of [`Key`] to [`Value`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VMap {
    entries: Vec<(Key, Value)>,
}

impl VMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert an entry. A duplicate key replaces the earlier value in place.
    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        for (k, v) in &mut self.entries {
            if k == &key {
                *v = value;
                return;
            }
        }
        self.entries.push((key, value));
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn sort_canonical(&mut self) {
        self.entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (_, v) in &mut self.entries {
            v.sort_canonical();
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap as _;
        match self {
            Value::Int(x) => ser.serialize_i64(*x),
            Value::Str(x) => ser.serialize_str(x),
            Value::Seq(x) => x.serialize(ser),
            Value::Map(map) => {
                let mut m = ser.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(&k.to_string(), v)?;
                }
                m.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        return de.deserialize_any(Visitor);
        struct Visitor;
        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Value;
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "an integer, string, sequence or map")
            }
            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(Value::Int(v))
            }
            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Value::Int(v as i64))
            }
            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(Value::Str(v.to_string()))
            }
            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<Value>()? {
                    items.push(item);
                }
                Ok(Value::Seq(items))
            }
            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut map = VMap::default();
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    map.insert(Key::parse(&k), v);
                }
                Ok(Value::Map(map))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order() {
        let mut map = VMap::default();
        map.insert("Zeta", 1);
        map.insert(10, 2);
        map.insert("Alpha", 3);
        map.insert(2, 4);
        map.sort_canonical();
        let keys = map.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                Key::Num(2),
                Key::Num(10),
                Key::Str("Alpha".to_string()),
                Key::Str("Zeta".to_string()),
            ]
        );
    }

    #[test]
    fn test_round_trip() -> cu::Result<()> {
        let mut inner = VMap::default();
        inner.insert(1, "void");
        inner.insert("Name", "f");
        let mut root = VMap::default();
        root.insert("TypeInfo", inner);
        root.insert("WordSize", 8);
        root.insert("Needed", Value::Seq(vec!["libc.so.6".into()]));
        let value = Value::Map(root);

        let text = json::stringify(&value)?;
        let back = json::parse::<Value>(&text)?;
        assert_eq!(back, value);
        Ok(())
    }

    #[test]
    fn test_duplicate_key_replaces() {
        let mut map = VMap::default();
        map.insert("a", 1);
        map.insert("a", 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Key::from("a")), Some(&Value::Int(2)));
    }
}
