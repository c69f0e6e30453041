use std::io::BufRead;

use abigraph::{ArcStr, AttrValue, DieRecord, DieStore, Doff, LocValue, Tag, UnitInfo};
use cu::pre::*;
use regex::Regex;

use crate::{FileEntry, LineTables, LocTable};

/// Everything parsed out of the DWARF text dump of one or more objects
#[derive(Default)]
pub struct DwarfDump {
    pub store: DieStore,
    pub loc: LocTable,
    pub lines: LineTables,
}

impl DwarfDump {
    /// Build the store's derived edges once every object is scanned
    pub fn finish(&mut self) -> cu::Result<()> {
        self.store.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Info,
    Loc,
    Line,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineSub {
    None,
    Dirs,
    Files,
}

/// Scans the disassembler's line-oriented dump into DIE records, the
/// location-list table and the line tables
pub struct Scanner {
    re_die: Regex,
    re_attr: Regex,
    re_loc_row: Regex,
    re_file_row: Regex,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            re_die: Regex::new(r"^ *\[\s*([0-9a-f]+)\]( +)([A-Za-z_]+)")
                .expect("invalid DIE header pattern"),
            re_attr: Regex::new(r"^\s+([A-Za-z_][A-Za-z0-9_]*)\s+\(([a-z_0-9]+)\)\s*(.*)$")
                .expect("invalid attribute pattern"),
            re_loc_row: Regex::new(r"^\s*\[\s*([0-9a-f]+)\]\s*(.+)$")
                .expect("invalid loc row pattern"),
            re_file_row: Regex::new(r"^\s*(\d+)\s+(\d+)\s+\S+\s+\S+\s+(.+)$")
                .expect("invalid file row pattern"),
        }
    }
}

impl Scanner {
    /// Scan one object's dump, rebasing every offset by `base`. Returns
    /// the base the next object should use.
    pub fn scan<R: BufRead>(
        &self,
        input: R,
        base: usize,
        out: &mut DwarfDump,
    ) -> cu::Result<usize> {
        let mut section = Section::None;
        let mut current: Option<(DieRecord, Option<Doff>)> = None;
        let mut depth_stack: Vec<(usize, Doff)> = Vec::new();
        let mut max_off = 0usize;

        let mut line_sub = LineSub::None;
        let mut line_table: Option<u64> = None;
        let mut dirs: Vec<String> = Vec::new();

        for (lineno, line) in input.lines().enumerate() {
            let line = cu::check!(line, "failed to read dump line {}", lineno + 1)?;

            if line.starts_with("DWARF section") {
                Self::flush(&mut current, &mut out.store)?;
                depth_stack.clear();
                section = if line.contains("'.debug_info'") {
                    Section::Info
                } else if line.contains("'.debug_loc'") {
                    Section::Loc
                } else if line.contains("'.debug_line'") {
                    Section::Line
                } else {
                    Section::Skip
                };
                continue;
            }

            match section {
                Section::Info => {
                    self.scan_info_line(
                        &line,
                        base,
                        &mut current,
                        &mut depth_stack,
                        &mut max_off,
                        &mut out.store,
                    )?;
                }
                Section::Loc => {
                    if let Some(m) = self.re_loc_row.captures(&line) {
                        let off = cu::check!(
                            parse_hex(&m[1]),
                            "bad loc offset on dump line {}",
                            lineno + 1
                        )?;
                        if let Some(AttrValue::Loc(value)) = parse_expr(&m[2]) {
                            out.loc.insert_first(off + base as u64, value);
                        }
                    }
                }
                Section::Line => {
                    self.scan_line_line(
                        &line,
                        base,
                        &mut line_sub,
                        &mut line_table,
                        &mut dirs,
                        &mut out.lines,
                    )?;
                }
                Section::None | Section::Skip => {}
            }
        }
        Self::flush(&mut current, &mut out.store)?;

        self.collect_units(base, out)?;
        Ok(base + max_off + 1)
    }

    fn scan_info_line(
        &self,
        line: &str,
        base: usize,
        current: &mut Option<(DieRecord, Option<Doff>)>,
        depth_stack: &mut Vec<(usize, Doff)>,
        max_off: &mut usize,
        store: &mut DieStore,
    ) -> cu::Result<()> {
        if let Some(m) = self.re_die.captures(line) {
            Self::flush(current, store)?;
            let off = cu::check!(parse_hex(&m[1]), "bad DIE offset in dump: {line}")? as usize;
            let depth = m[2].len();
            let tag = Tag::from_name(&m[3]);
            *max_off = (*max_off).max(off);
            let offset = Doff(base + off);

            while depth_stack.last().map(|(d, _)| *d >= depth).unwrap_or(false) {
                depth_stack.pop();
            }
            let parent = depth_stack.last().map(|(_, p)| *p);
            depth_stack.push((depth, offset));
            *current = Some((DieRecord::new(offset, tag, depth), parent));
            return Ok(());
        }
        if let Some(m) = self.re_attr.captures(line) {
            // attribute lines outside a DIE (unit headers) are not ours
            let Some((die, _)) = current.as_mut() else {
                return Ok(());
            };
            let name = &m[1];
            if let Some(value) = parse_value(name, &m[2], m[3].trim(), base) {
                die.attrs.insert(ArcStr::new(name), value);
            }
        }
        Ok(())
    }

    fn scan_line_line(
        &self,
        line: &str,
        base: usize,
        sub: &mut LineSub,
        table: &mut Option<u64>,
        dirs: &mut Vec<String>,
        lines: &mut LineTables,
    ) -> cu::Result<()> {
        if let Some(rest) = line.trim().strip_prefix("Table at offset ") {
            let spec = rest.trim_end_matches(':').trim();
            let off = cu::check!(parse_int(spec), "bad line-table offset in dump: {line}")?;
            *table = Some(off as u64 + base as u64);
            *sub = LineSub::None;
            dirs.clear();
            // index 0 refers to the compilation directory
            dirs.push(String::new());
            return Ok(());
        }
        if line.contains("Directory table") {
            *sub = LineSub::Dirs;
            return Ok(());
        }
        if line.contains("File name table") {
            *sub = LineSub::Files;
            return Ok(());
        }
        match sub {
            LineSub::Dirs => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    *sub = LineSub::None;
                } else {
                    // rows may carry a leading index
                    let mut parts = trimmed.split_whitespace();
                    let first = parts.next().unwrap_or("");
                    match (first.parse::<u64>(), parts.next()) {
                        (Ok(_), Some(path)) => dirs.push(path.to_string()),
                        _ => dirs.push(first.to_string()),
                    }
                }
            }
            LineSub::Files => {
                let Some(off) = *table else {
                    return Ok(());
                };
                if let Some(m) = self.re_file_row.captures(line) {
                    let entry = cu::check!(parse_int(&m[1]), "bad file entry in dump: {line}")?;
                    let dir = cu::check!(parse_int(&m[2]), "bad dir index in dump: {line}")?;
                    let name = m[3].trim();
                    let path = if name.starts_with('/') {
                        name.to_string()
                    } else {
                        match dirs.get(dir as usize) {
                            Some(d) if !d.is_empty() => format!("{d}/{name}"),
                            _ => name.to_string(),
                        }
                    };
                    if let Some(file) = FileEntry::new(&path) {
                        lines.table_mut(off).insert(entry as u64, file);
                    }
                }
            }
            LineSub::None => {}
        }
        Ok(())
    }

    fn flush(
        current: &mut Option<(DieRecord, Option<Doff>)>,
        store: &mut DieStore,
    ) -> cu::Result<()> {
        if let Some((die, parent)) = current.take() {
            store.insert(die, parent)?;
        }
        Ok(())
    }

    /// Pull the per-unit facts off the scanned compile_unit DIEs
    fn collect_units(&self, base: usize, out: &mut DwarfDump) -> cu::Result<()> {
        let mut units = Vec::new();
        for (off, die) in out.store.iter() {
            if off.0 < base || die.tag != Tag::CompileUnit {
                continue;
            }
            units.push(UnitInfo {
                offset: *off,
                name: die.name_opt().unwrap_or("").into(),
                producer: die.str_opt("producer").map(ArcStr::new),
                language: die.str_opt("language").map(ArcStr::new),
                comp_dir: die.str_opt("comp_dir").map(ArcStr::new),
                stmt_list: die.uint_opt("stmt_list"),
            });
        }
        for unit in units {
            out.store.add_unit(unit);
        }
        Ok(())
    }
}

fn parse_hex(s: &str) -> cu::Result<u64> {
    let s = s.trim().trim_start_matches("0x");
    cu::check!(
        u64::from_str_radix(s, 16),
        "failed to parse hex value '{s}'"
    )
}

fn parse_int(s: &str) -> cu::Result<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x") {
        let v = cu::check!(
            u64::from_str_radix(hex, 16),
            "failed to parse hex value '{s}'"
        )?;
        return Ok(v as i64);
    }
    if let Some(hex) = s.strip_prefix("-0x") {
        let v = cu::check!(
            u64::from_str_radix(hex, 16),
            "failed to parse hex value '{s}'"
        )?;
        return Ok(-(v as i64));
    }
    cu::check!(s.parse::<i64>(), "failed to parse integer value '{s}'")
}

/// Extract the `<mangled>` hint the disassembler prints after addresses
fn parse_hint(s: &str) -> Option<ArcStr> {
    let start = s.find('<')?;
    let end = s[start..].find('>')? + start;
    let hint = s[start + 1..end].trim();
    if hint.is_empty() {
        None
    } else {
        Some(ArcStr::new(hint))
    }
}

/// Parse one attribute value by its form hint. Returns None for values
/// the reducer has no use for (they are simply not stored).
fn parse_value(name: &str, form: &str, raw: &str, base: usize) -> Option<AttrValue> {
    match form {
        f if f.starts_with("ref") => {
            let start = raw.find('[')?;
            let end = raw[start..].find(']')? + start;
            let inner = raw[start + 1..end].trim();
            let off = parse_hex(inner).ok()?;
            Some(AttrValue::Ref(Doff(off as usize + base)))
        }
        "strp" | "string" | "line_strp" => {
            let s = raw.trim();
            let s = s
                .strip_prefix('"')
                .and_then(|x| x.strip_suffix('"'))
                .unwrap_or(s);
            Some(AttrValue::Str(ArcStr::new(s)))
        }
        "addr" => {
            let first = raw.split_whitespace().next()?;
            let value = parse_hex(first).ok()?;
            Some(AttrValue::Addr {
                value,
                hint: parse_hint(raw),
            })
        }
        "flag" | "flag_present" => {
            let yes = matches!(raw.trim(), "yes" | "1" | "true" | "");
            Some(AttrValue::Int(if yes { 1 } else { 0 }))
        }
        "sec_offset" => {
            // location-class attributes point into the loclist table;
            // everything else (stmt_list and friends) is a plain offset
            let digits = raw
                .split_whitespace()
                .map(|t| t.trim_matches(|c| c == '[' || c == ']'))
                .find(|t| {
                    !t.is_empty()
                        && (t.starts_with("0x") || t.chars().all(|c| c.is_ascii_digit()))
                })?;
            let off = parse_int(digits).ok()?;
            if matches!(name, "location" | "data_member_location" | "vtable_elem_location") {
                Some(AttrValue::Loc(LocValue::List(off as u64 + base as u64)))
            } else {
                Some(AttrValue::Int(off + base as i64))
            }
        }
        "exprloc" => parse_expr(raw),
        "data1" | "data2" | "data4" | "data8" | "sdata" | "udata" | "implicit_const" => {
            match parse_int(raw) {
                Ok(v) => Some(AttrValue::Int(v)),
                // enumerated keyword under a data form; strip the trailing
                // numeric annotation
                Err(_) => {
                    let word = raw.split_whitespace().next()?;
                    Some(AttrValue::Kw(ArcStr::new(word)))
                }
            }
        }
        _ => {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            match parse_int(raw) {
                Ok(v) => Some(AttrValue::Int(v)),
                Err(_) => {
                    let s = raw
                        .strip_prefix('"')
                        .and_then(|x| x.strip_suffix('"'))
                        .unwrap_or(raw);
                    Some(AttrValue::Str(ArcStr::new(s)))
                }
            }
        }
    }
}

/// Parse a location expression into its final shape: a frame offset, a
/// register number, or an address with a symbol hint
fn parse_expr(raw: &str) -> Option<AttrValue> {
    // strip any leading "[ N]" bracket group
    let mut s = raw.trim();
    if s.starts_with('[')
        && let Some(end) = s.find(']')
    {
        s = s[end + 1..].trim();
    }
    let tokens = s.split_whitespace().collect::<Vec<_>>();
    let mut iter = tokens.iter();
    while let Some(tok) = iter.next() {
        if *tok == "addr" {
            let value = iter.next().and_then(|t| parse_hex(t).ok())?;
            return Some(AttrValue::Addr {
                value,
                hint: parse_hint(s),
            });
        }
        if *tok == "fbreg" || *tok == "plus_uconst" {
            let value = iter.next().and_then(|t| parse_int(t).ok())?;
            return Some(AttrValue::Loc(LocValue::Frame(value)));
        }
        if let Some(n) = tok.strip_prefix("reg")
            && let Ok(n) = n.parse::<u16>()
        {
            return Some(AttrValue::Loc(LocValue::Reg(n)));
        }
    }
    // bare final integer: a constant offset
    let last = tokens.last()?;
    parse_int(last)
        .ok()
        .map(|v| AttrValue::Loc(LocValue::Frame(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"DWARF section [28] '.debug_info' at offset 0x40:

 Compilation unit at offset 0:
 Version: 4, Abbreviation section offset: 0, Address size: 8, Offset size: 4
 [     b]  compile_unit         abbrev: 1
           producer             (strp) "GNU C++14 9.3.0"
           language             (data1) C_plus_plus (4)
           name                 (strp) "test.cpp"
           comp_dir             (strp) "/src"
           stmt_list            (sec_offset) 0
 [    2d]    class_type           abbrev: 2
             name                 (strp) "C"
             byte_size            (data1) 1
             decl_file            (data1) 2
             decl_line            (data1) 1
 [    3a]      subprogram           abbrev: 3
               external             (flag_present) yes
               name                 (strp) "f"
               linkage_name         (strp) "_ZN1C1fEv"
               declaration          (flag_present) yes
 [    5e]    pointer_type         abbrev: 4
             byte_size            (data1) 8
             type                 (ref4) [0x2d]
 [    70]    subprogram           abbrev: 5
             specification        (ref4) [0x3a]
             low_pc               (addr) 0x1135 <_ZN1C1fEv>
 [    8e]      formal_parameter     abbrev: 6
               name                 (strp) "this"
               type                 (ref4) [0x5e]
               artificial           (flag_present) yes
               location             (exprloc) [ 0] reg5

DWARF section [29] '.debug_loc' at offset 0x80:

 [     0]  reg5
 [    23]  fbreg -24

DWARF section [30] '.debug_line' at offset 0xa0:

Table at offset 0:

 Directory table:
  1     /usr/include
 File name table:
  Entry Dir   Time      Size      Name
  1     0     0         0         test.cpp
  2     0     0         0         test.h
  3     1     0         0         stdio.h
  4     0     0         0         <built-in>
"#;

    #[test]
    fn test_scan_full_dump() -> cu::Result<()> {
        let scanner = Scanner::default();
        let mut out = DwarfDump::default();
        let next = scanner.scan(DUMP.as_bytes(), 0, &mut out)?;
        out.finish()?;
        assert!(next > 0x8e);

        let cu_die = out.store.expect(Doff(0xb))?;
        assert_eq!(cu_die.tag, Tag::CompileUnit);
        assert_eq!(cu_die.str_opt("language"), Some("C_plus_plus"));

        let class = out.store.expect(Doff(0x2d))?;
        assert_eq!(class.tag, Tag::ClassType);
        assert_eq!(class.name_opt(), Some("C"));
        assert_eq!(class.uint_opt("byte_size"), Some(1));
        assert_eq!(out.store.parent(Doff(0x2d)), Some(Doff(0xb)));
        assert_eq!(out.store.parent(Doff(0x3a)), Some(Doff(0x2d)));

        let ptr = out.store.expect(Doff(0x5e))?;
        assert_eq!(ptr.ref_opt("type"), Some(Doff(0x2d)));

        let def = out.store.expect(Doff(0x70))?;
        assert_eq!(def.addr_hint("low_pc"), Some("_ZN1C1fEv"));
        assert_eq!(out.store.definition_of(Doff(0x3a)), Some(Doff(0x70)));

        let this_param = out.store.expect(Doff(0x8e))?;
        assert!(this_param.flag("artificial"));
        assert_eq!(this_param.loc_opt("location"), Some(LocValue::Reg(5)));

        assert_eq!(out.loc.resolve(0), Some(LocValue::Reg(5)));
        assert_eq!(out.loc.resolve(0x23), Some(LocValue::Frame(-24)));

        let table = out.lines.get(0).unwrap();
        assert_eq!(table.get(2).map(|f| f.name.as_str()), Some("test.h"));
        assert!(table.get(2).unwrap().header);
        assert!(!table.get(1).unwrap().header);
        assert!(table.get(3).unwrap().header);
        assert!(table.get(4).is_none());

        let units = out.store.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "test.cpp");
        assert_eq!(units[0].stmt_list, Some(0));
        Ok(())
    }

    #[test]
    fn test_rebase_second_object() -> cu::Result<()> {
        let scanner = Scanner::default();
        let mut out = DwarfDump::default();
        let next = scanner.scan(DUMP.as_bytes(), 0, &mut out)?;
        scanner.scan(DUMP.as_bytes(), next, &mut out)?;
        out.finish()?;
        assert_eq!(out.store.units().len(), 2);
        // rebased copy of the class DIE exists and points into itself
        let ptr = out.store.expect(Doff(next + 0x5e))?;
        assert_eq!(ptr.ref_opt("type"), Some(Doff(next + 0x2d)));
        Ok(())
    }
}
