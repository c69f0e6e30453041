use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;

use abigraph::ArcStr;
use cu::pre::*;
use regex::Regex;

/// Which symbol table the reader is currently inside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    None,
    Dynamic,
    Static,
}

/// Everything read out of the ELF dump: header facts, dependencies, and
/// the classified symbol tables
#[derive(Debug, Default)]
pub struct ElfInfo {
    pub arch: ArcStr,
    pub word_size: u64,
    pub soname: Option<ArcStr>,
    /// export name -> size; data objects carry negative sizes
    pub exports: BTreeMap<ArcStr, i64>,
    pub undefined: BTreeSet<ArcStr>,
    pub needed: BTreeSet<ArcStr>,
    /// base name -> versioned name, default version preferred
    pub versions: BTreeMap<ArcStr, ArcStr>,
}

/// Parse the ELF dump. Static symbol tables are skipped for shared
/// objects and honored for kernel-module debug files.
pub fn read_elf_dump<R: BufRead>(input: R, kernel_module: bool) -> cu::Result<ElfInfo> {
    let re_row = Regex::new(
        r"^\s*\d+:\s+([0-9a-fA-F]+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s*(\S*)\s*$",
    )
    .expect("invalid symbol row pattern");

    let mut info = ElfInfo::default();
    let mut table = Table::None;
    // first-encountered order matters for alias tie-breaking
    let mut order: Vec<(ArcStr, u64)> = Vec::new();

    for (lineno, line) in input.lines().enumerate() {
        let line = cu::check!(line, "failed to read ELF dump line {}", lineno + 1)?;

        if let Some(rest) = line.trim().strip_prefix("Class:") {
            info.word_size = match rest.trim() {
                "ELF64" => 8,
                "ELF32" => 4,
                _ => 0,
            };
            continue;
        }
        if let Some(rest) = line.trim().strip_prefix("Machine:") {
            info.arch = arch_name(rest.trim());
            continue;
        }
        if line.contains("NEEDED")
            && let Some(dep) = bracketed(&line)
        {
            info.needed.insert(ArcStr::new(dep));
            continue;
        }
        if line.contains("SONAME")
            && let Some(soname) = bracketed(&line)
        {
            info.soname = Some(ArcStr::new(soname));
            continue;
        }
        if line.starts_with("Symbol table") {
            table = if line.contains("'.dynsym'") {
                Table::Dynamic
            } else if line.contains("'.symtab'") {
                if kernel_module { Table::Static } else { Table::None }
            } else {
                Table::None
            };
            continue;
        }
        if table == Table::None {
            continue;
        }
        let Some(m) = re_row.captures(&line) else {
            continue;
        };
        let value = cu::check!(
            u64::from_str_radix(&m[1], 16),
            "bad symbol value on ELF dump line {}",
            lineno + 1
        )?;
        let size = parse_size(&m[2])?;
        let sym_type = &m[3];
        let bind = &m[4];
        let vis = &m[5];
        let ndx = &m[6];
        let name = m.get(7).map(|x| x.as_str()).unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }

        if !matches!(bind, "GLOBAL" | "WEAK") {
            continue;
        }
        if !matches!(vis, "DEFAULT" | "PROTECTED") {
            continue;
        }
        let is_data = matches!(sym_type, "OBJECT" | "COMMON");
        let is_code = matches!(sym_type, "FUNC" | "IFUNC" | "GNU_IFUNC");
        if !is_data && !is_code && ndx != "UNDEF" {
            continue;
        }
        // versioning pseudo-symbol
        if is_data && value == 0 && ndx == "ABS" {
            continue;
        }

        if ndx == "UNDEF" {
            info.undefined.insert(ArcStr::new(name));
            continue;
        }
        let size = if is_data { -size } else { size };
        let name = ArcStr::new(name);
        if !info.exports.contains_key(&name) {
            order.push((name.clone(), value));
        }
        info.exports.insert(name, size);
    }

    derive_versions(&order, &mut info.versions);
    Ok(info)
}

fn parse_size(s: &str) -> cu::Result<i64> {
    if let Some(hex) = s.strip_prefix("0x") {
        let v = cu::check!(
            u64::from_str_radix(hex, 16),
            "bad symbol size '{s}' in ELF dump"
        )?;
        return Ok(v as i64);
    }
    cu::check!(s.parse::<i64>(), "bad symbol size '{s}' in ELF dump")
}

fn bracketed(line: &str) -> Option<&str> {
    let start = line.find('[')?;
    let end = line[start..].find(']')? + start;
    Some(line[start + 1..end].trim())
}

fn arch_name(machine: &str) -> ArcStr {
    if machine.contains("X86-64") || machine.contains("x86-64") || machine.contains("x86_64") {
        return ArcStr::new("x86-64");
    }
    if machine.contains("80386") || machine.contains("i386") {
        return ArcStr::new("x86");
    }
    if machine.contains("AArch64") || machine.contains("aarch64") {
        return ArcStr::new("aarch64");
    }
    if machine.contains("ARM") {
        return ArcStr::new("arm");
    }
    ArcStr::from(machine.to_lowercase())
}

/// Group exported names by value and derive the base-name -> versioned-name
/// alias map, preferring default (`@@`) over compatibility (`@`) versions.
/// The map is one-to-one on the base side; ties break by first-encountered
/// order.
fn derive_versions(order: &[(ArcStr, u64)], versions: &mut BTreeMap<ArcStr, ArcStr>) {
    let mut by_value: BTreeMap<u64, Vec<&ArcStr>> = BTreeMap::new();
    for (name, value) in order {
        by_value.entry(*value).or_default().push(name);
    }

    // a plain name sharing a value with a default-versioned one of the
    // same base is an alias of it
    for (name, value) in order {
        if name.contains('@') {
            continue;
        }
        let Some(group) = by_value.get(value) else {
            continue;
        };
        for cand in group {
            if let Some((base, _)) = cand.split_once("@@")
                && base == name.as_str()
            {
                versions.entry(name.clone()).or_insert_with(|| (*cand).clone());
                break;
            }
        }
    }

    // synthesize bases for the rest, default versions first
    for (name, _) in order {
        if let Some((base, _)) = name.split_once("@@") {
            let base = ArcStr::new(base);
            versions.entry(base).or_insert_with(|| name.clone());
        }
    }
    for (name, _) in order {
        if name.contains("@@") {
            continue;
        }
        if let Some((base, _)) = name.split_once('@') {
            let base = ArcStr::new(base);
            versions.entry(base).or_insert_with(|| name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"ELF Header:
  Class:                             ELF64
  Machine:                           Advanced Micro Devices X86-64

Dynamic segment contains 25 entries:
  Type              Value
  NEEDED            Shared library: [libc.so.6]
  NEEDED            Shared library: [libstdc++.so.6]
  SONAME            Library soname: [libtest.so.1]

Symbol table '.dynsym' contains 12 entries:
  Num:    Value          Size Type    Bind   Vis          Ndx Name
    0: 0000000000000000     0 NOTYPE  LOCAL  DEFAULT    UNDEF
    1: 0000000000001135    11 FUNC    GLOBAL DEFAULT       14 _ZN1C1fEv
    2: 0000000000004040     4 OBJECT  GLOBAL DEFAULT       23 g
    3: 0000000000000000     0 FUNC    GLOBAL DEFAULT    UNDEF printf@GLIBC_2.2.5
    4: 0000000000000000     0 OBJECT  GLOBAL DEFAULT      ABS LIB_2
    5: 0000000000002000    33 FUNC    GLOBAL DEFAULT       14 foo@@LIB_2
    6: 0000000000002100    21 FUNC    GLOBAL DEFAULT       14 foo@LIB_1
    7: 0000000000001135    11 FUNC    LOCAL  DEFAULT       14 hidden_local
    8: 0000000000001135    11 FUNC    GLOBAL HIDDEN        14 hidden_vis
    9: 0000000000003000    17 FUNC    WEAK   DEFAULT       14 bar@@LIB_2
   10: 0000000000003000    17 FUNC    GLOBAL DEFAULT       14 bar

Symbol table '.symtab' contains 2 entries:
  Num:    Value          Size Type    Bind   Vis          Ndx Name
    1: 0000000000009000     5 FUNC    GLOBAL DEFAULT       14 static_only
"#;

    #[test]
    fn test_read_elf_dump() -> cu::Result<()> {
        let info = read_elf_dump(DUMP.as_bytes(), false)?;
        assert_eq!(info.arch, "x86-64");
        assert_eq!(info.word_size, 8);
        assert_eq!(
            info.soname.as_ref().map(|x| x.as_str()),
            Some("libtest.so.1")
        );
        assert!(info.needed.contains(&ArcStr::new("libc.so.6")));

        // function export, positive size; data export, negative size
        assert_eq!(info.exports.get(&ArcStr::new("_ZN1C1fEv")), Some(&11));
        assert_eq!(info.exports.get(&ArcStr::new("g")), Some(&-4));
        // undefined import went to its own set
        assert!(info.undefined.contains(&ArcStr::new("printf@GLIBC_2.2.5")));
        assert!(!info.exports.contains_key(&ArcStr::new("printf@GLIBC_2.2.5")));
        // versioning pseudo-symbol dropped
        assert!(!info.exports.contains_key(&ArcStr::new("LIB_2")));
        // binding/visibility filters
        assert!(!info.exports.contains_key(&ArcStr::new("hidden_local")));
        assert!(!info.exports.contains_key(&ArcStr::new("hidden_vis")));
        // static table skipped for shared objects
        assert!(!info.exports.contains_key(&ArcStr::new("static_only")));
        Ok(())
    }

    #[test]
    fn test_static_table_for_kernel_module() -> cu::Result<()> {
        let info = read_elf_dump(DUMP.as_bytes(), true)?;
        assert!(info.exports.contains_key(&ArcStr::new("static_only")));
        Ok(())
    }

    #[test]
    fn test_version_aliases() -> cu::Result<()> {
        let info = read_elf_dump(DUMP.as_bytes(), false)?;
        // synthesized base prefers the default version
        assert_eq!(
            info.versions.get(&ArcStr::new("foo")).map(|x| x.as_str()),
            Some("foo@@LIB_2")
        );
        // plain name sharing a value with a default-versioned one
        assert_eq!(
            info.versions.get(&ArcStr::new("bar")).map(|x| x.as_str()),
            Some("bar@@LIB_2")
        );
        // both versioned rows stay in the export table
        assert!(info.exports.contains_key(&ArcStr::new("foo@@LIB_2")));
        assert!(info.exports.contains_key(&ArcStr::new("foo@LIB_1")));
        Ok(())
    }
}
