use std::path::Path;

use cu::pre::*;

use crate::Value;

/// Serialize the value tree to its JSON encoding
pub fn encode(value: &Value) -> cu::Result<String> {
    json::stringify_pretty(value)
}

/// Write the value tree to a file atomically. The output appears in full
/// or not at all: the encoding goes to a sibling temp file first and is
/// renamed over the target.
pub fn write_atomic(path: impl AsRef<Path>, value: &Value) -> cu::Result<()> {
    let path = path.as_ref();
    let text = encode(value)?;
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".part");
    let tmp = std::path::PathBuf::from(tmp);
    cu::fs::write(&tmp, text)?;
    cu::check!(
        std::fs::rename(&tmp, path),
        "failed to move output into place at {}",
        path.display()
    )?;
    Ok(())
}

/// Write the value tree to standard output
pub fn write_stdout(value: &Value) -> cu::Result<()> {
    let text = encode(value)?;
    cu::print!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VMap;

    #[test]
    fn test_encode_deterministic() -> cu::Result<()> {
        let mut map = VMap::default();
        map.insert("B", 1);
        map.insert("A", 2);
        map.insert(3, "x");
        let mut value = Value::Map(map);
        value.sort_canonical();
        let first = encode(&value)?;
        let second = encode(&value)?;
        assert_eq!(first, second);
        // numeric key sorts ahead of both strings
        let a = first.find("\"3\"").unwrap();
        let b = first.find("\"A\"").unwrap();
        let c = first.find("\"B\"").unwrap();
        assert!(a < b && b < c);
        Ok(())
    }
}
