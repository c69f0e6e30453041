use abigraph::LocValue;
use fxhash::FxHashMap;

/// First-entry values of the location-list table, keyed by list offset.
/// Attributes scanned as [`LocValue::List`] resolve through this map.
/// Lookup-only, so iteration order never reaches the output.
#[derive(Debug, Clone, Default)]
pub struct LocTable {
    entries: FxHashMap<u64, LocValue>,
}

impl LocTable {
    /// Record the first entry seen for a list offset; later entries of the
    /// same list are ignored
    pub fn insert_first(&mut self, offset: u64, value: LocValue) {
        self.entries.entry(offset).or_insert(value);
    }

    pub fn resolve(&self, offset: u64) -> Option<LocValue> {
        self.entries.get(&offset).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_entry_wins() {
        let mut table = LocTable::default();
        table.insert_first(0x10, LocValue::Reg(5));
        table.insert_first(0x10, LocValue::Frame(-20));
        assert_eq!(table.resolve(0x10), Some(LocValue::Reg(5)));
        assert_eq!(table.resolve(0x20), None);
    }
}
