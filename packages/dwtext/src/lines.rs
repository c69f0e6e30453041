use std::collections::BTreeMap;

use abigraph::ArcStr;

/// Extensions that flag a path as a header file
const HEADER_EXTS: &[&str] = &["h", "hh", "hp", "hxx", "hpp", "h++"];

pub fn is_header_path(path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((_, ext)) => HEADER_EXTS.contains(&ext),
        None => false,
    }
}

/// One file referenced by a line table
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Base file name, the spelling used in decl sites and the
    /// Headers/Sources sections
    pub name: ArcStr,
    pub header: bool,
}

impl FileEntry {
    pub fn new(path: &str) -> Option<Self> {
        // compiler-internal pseudo file
        if path == "<built-in>" {
            return None;
        }
        let name = match path.rsplit_once('/') {
            Some((_, base)) => base,
            None => path,
        };
        Some(Self {
            name: ArcStr::new(name),
            header: is_header_path(path),
        })
    }
}

/// File-number -> path map of one compilation unit's line program
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    files: BTreeMap<u64, FileEntry>,
}

impl FileTable {
    pub fn insert(&mut self, num: u64, entry: FileEntry) {
        self.files.insert(num, entry);
    }
    pub fn get(&self, num: u64) -> Option<&FileEntry> {
        self.files.get(&num)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &FileEntry)> {
        self.files.iter()
    }
}

/// All line tables of the dump, keyed by their `stmt_list` offset
#[derive(Debug, Clone, Default)]
pub struct LineTables {
    tables: BTreeMap<u64, FileTable>,
}

impl LineTables {
    pub fn table_mut(&mut self, offset: u64) -> &mut FileTable {
        self.tables.entry(offset).or_default()
    }
    pub fn get(&self, offset: u64) -> Option<&FileTable> {
        self.tables.get(&offset)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &FileTable)> {
        self.tables.iter()
    }
}
