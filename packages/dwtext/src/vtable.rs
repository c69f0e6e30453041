use std::collections::BTreeMap;
use std::io::BufRead;

use abigraph::ArcStr;
use cu::pre::*;
use regex::Regex;

/// class name -> slot index -> entry text
pub type VtableMap = BTreeMap<ArcStr, BTreeMap<u64, ArcStr>>;

/// Parse the vtable dump: blocks opened by `Vtable for <class>` with
/// `<slot> <entry>` rows. The slot-0 row (the RTTI offset) is discarded.
pub fn read_vtable_dump<R: BufRead>(input: R) -> cu::Result<VtableMap> {
    let re_slot = Regex::new(r"^(\d+)\s+(.+)$").expect("invalid vtable slot pattern");

    let mut map = VtableMap::new();
    let mut current: Option<ArcStr> = None;

    for (lineno, line) in input.lines().enumerate() {
        let line = cu::check!(line, "failed to read vtable dump line {}", lineno + 1)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(class) = trimmed.strip_prefix("Vtable for ") {
            let class = ArcStr::new(class.trim());
            map.entry(class.clone()).or_default();
            current = Some(class);
            continue;
        }
        let Some(class) = &current else {
            continue;
        };
        let Some(m) = re_slot.captures(trimmed) else {
            continue;
        };
        let slot = cu::check!(
            m[1].parse::<u64>(),
            "bad vtable slot on dump line {}",
            lineno + 1
        )?;
        if slot == 0 {
            continue;
        }
        if let Some(slots) = map.get_mut(class) {
            slots.insert(slot, ArcStr::new(m[2].trim()));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "Vtable for V\nV::_ZTV1V: 5 entries\n0     (int (*)(...))0\n8     (int (*)(...))(& _ZTI1V)\n16    V::~V\n24    V::~V\n\n\n\nVtable for W\n0     (int (*)(...))0\n8     W::f\n";

    #[test]
    fn test_read_vtable_dump() -> cu::Result<()> {
        let map = read_vtable_dump(DUMP.as_bytes())?;
        assert_eq!(map.len(), 2);
        let v = map.get(&ArcStr::new("V")).unwrap();
        // slot 0 discarded
        assert!(!v.contains_key(&0));
        assert_eq!(v.get(&16).map(|x| x.as_str()), Some("V::~V"));
        let w = map.get(&ArcStr::new("W")).unwrap();
        assert_eq!(w.get(&8).map(|x| x.as_str()), Some("W::f"));
        Ok(())
    }
}
