use cu::pre::*;
use dashmap::DashMap;
use regex::Regex;

use crate::ArcStr;

/// Normalization mode. The two modes share the core rules; symbol mode
/// skips whitespace collapsing, never re-parses template arguments, and
/// undoes the `>>` split inside `operator>>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameMode {
    Type,
    Symbol,
}

/// Canonicalizes type and symbol names so two builds of the same library
/// spell every name identically. Pure and memoized by (input, mode).
pub struct NameCanon {
    memo: DashMap<(ArcStr, NameMode), ArcStr>,
    re_punct: Regex,
}

impl Default for NameCanon {
    fn default() -> Self {
        Self {
            memo: DashMap::new(),
            re_punct: Regex::new(r"\s*([<>()\[\]*&,:])\s*").expect("invalid punctuation pattern"),
        }
    }
}

impl NameCanon {
    pub fn canon_type(&self, name: &str) -> ArcStr {
        self.canon(name, NameMode::Type)
    }

    pub fn canon_symbol(&self, name: &str) -> ArcStr {
        self.canon(name, NameMode::Symbol)
    }

    fn canon(&self, name: &str, mode: NameMode) -> ArcStr {
        let key = (ArcStr::new(name), mode);
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }
        let result = ArcStr::from(self.compute(name, mode));
        self.memo.insert(key, result.clone());
        result
    }

    fn compute(&self, name: &str, mode: NameMode) -> String {
        let mut n = self.normalize_flat(name, mode);
        if mode == NameMode::Type
            && n.ends_with('>')
            && let Some((base, args)) = split_template(&n)
        {
            let base = base.to_string();
            let args = args
                .iter()
                .map(|a| self.canon(a, NameMode::Type).to_string())
                .collect::<Vec<_>>();
            let args = self.elide_default_args(&base, args);
            n = join_template(&base, &args);
            if n == "std::basic_string<char>" {
                n = "std::string".to_string();
            }
        }
        n
    }

    /// The flat rules: whitespace, punctuation gluing, comma spacing,
    /// `>>` disambiguation, qualifier order, integer spellings.
    fn normalize_flat(&self, name: &str, mode: NameMode) -> String {
        let mut n = name.trim().to_string();
        if mode == NameMode::Type {
            n = collapse_ws(&n);
        }
        n = self.re_punct.replace_all(&n, "$1").to_string();
        n = n.replace(',', ", ");
        while n.contains(">>") {
            n = n.replace(">>", "> >");
        }
        if mode == NameMode::Symbol {
            // operator>> and operator>>= got caught by the shift split
            n = n.replace("operator> >", "operator>>");
        }
        n = n.replace("volatile const", "const volatile");
        for q in ["const", "volatile"] {
            if let Some(rest) = n.strip_prefix(&format!("{q} "))
                && !rest.contains([' ', '<', '>', '*', '&', '(', ')'])
            {
                n = format!("{rest} {q}");
            }
        }
        if let Some(canon) = integer_name(&n) {
            n = canon.to_string();
        }
        reinsert_qualifier_space(&n)
    }

    /// Drop the well-known default template arguments of the standard
    /// containers so explicit and defaulted spellings compare equal
    fn elide_default_args(&self, base: &str, mut args: Vec<String>) -> Vec<String> {
        match base {
            "std::vector" | "std::list" | "std::deque" if args.len() == 2 => {
                if args[1] == self.allocator_of(&args[0]) {
                    args.truncate(1);
                }
            }
            "std::set" | "std::multiset" if args.len() == 3 => {
                if args[1] == self.less_of(&args[0]) && args[2] == self.allocator_of(&args[0]) {
                    args.truncate(1);
                }
            }
            "std::map" | "std::multimap" if args.len() == 4 => {
                let pair_a = self
                    .canon_type(&format!("std::pair<{} const, {}>", args[0], args[1]))
                    .to_string();
                let pair_b = self
                    .canon_type(&format!("std::pair<const {}, {}>", args[0], args[1]))
                    .to_string();
                if args[2] == self.less_of(&args[0])
                    && (args[3] == self.allocator_of(&pair_a)
                        || args[3] == self.allocator_of(&pair_b))
                {
                    args.truncate(2);
                }
            }
            "std::basic_string" if args.len() == 3 => {
                let traits = self
                    .canon_type(&format!("std::char_traits<{}>", args[0]))
                    .to_string();
                if args[1] == traits && args[2] == self.allocator_of(&args[0]) {
                    args.truncate(1);
                }
            }
            _ => {}
        }
        args
    }

    fn allocator_of(&self, arg: &str) -> String {
        self.canon_type(&format!("std::allocator<{arg}>")).to_string()
    }
    fn less_of(&self, arg: &str) -> String {
        self.canon_type(&format!("std::less<{arg}>")).to_string()
    }
}

fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut ws = false;
    for c in s.chars() {
        if c.is_whitespace() {
            ws = true;
            continue;
        }
        if ws && !out.is_empty() {
            out.push(' ');
        }
        ws = false;
        out.push(c);
    }
    out
}

/// Re-separate a qualifier keyword glued onto a following identifier.
/// A glued qualifier is always preceded by one of the glue punctuation
/// characters, so identifiers that merely contain the keyword (`constant`)
/// are untouched.
fn reinsert_qualifier_space(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut rest = s;
    'outer: while !rest.is_empty() {
        let after_glue = matches!(
            out.chars().next_back(),
            Some('<' | '>' | '(' | ')' | '[' | ']' | '*' | '&' | ',' | ':')
        );
        if after_glue {
            for q in ["const", "volatile"] {
                if rest.starts_with(q) {
                    let next = rest[q.len()..].chars().next();
                    if next.map(|c| c.is_alphabetic() || c == '_').unwrap_or(false) {
                        out.push_str(q);
                        out.push(' ');
                        rest = &rest[q.len()..];
                        continue 'outer;
                    }
                }
            }
        }
        let c = rest.chars().next().expect("non-empty remainder");
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn integer_name(n: &str) -> Option<&'static str> {
    Some(match n {
        "long long unsigned int" | "long long unsigned" | "unsigned long long int" => {
            "unsigned long long"
        }
        "long long int" => "long long",
        "short unsigned int" | "unsigned short int" | "short unsigned" => "unsigned short",
        "short int" => "short",
        "long unsigned int" | "unsigned long int" | "long unsigned" => "unsigned long",
        "long int" => "long",
        _ => return None,
    })
}

/// Split a templated name at the center `<` (the rightmost `<` found at
/// bracket-balance zero), returning the base and the top-level argument
/// list. Returns None when the name is not a balanced template.
pub fn split_template(name: &str) -> Option<(&str, Vec<&str>)> {
    if !name.ends_with('>') {
        return None;
    }
    let mut balance = 0i32;
    let mut center = None;
    for (i, c) in name.char_indices() {
        match c {
            '<' => {
                if balance == 0 {
                    center = Some(i);
                }
                balance += 1;
            }
            '>' => balance -= 1,
            _ => {}
        }
    }
    if balance != 0 {
        return None;
    }
    let center = center?;
    let inner = &name[center + 1..name.len() - 1];
    Some((&name[..center], split_args(inner)))
}

/// Split a template argument list on top-level commas, tracking `<` and
/// `(` nesting
pub fn split_args(inner: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = inner[start..].trim();
    if !last.is_empty() {
        args.push(last);
    }
    args
}

fn join_template(base: &str, args: &[String]) -> String {
    let mut out = String::from(base);
    out.push('<');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(arg);
    }
    if out.ends_with('>') {
        out.push(' ');
    }
    out.push('>');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_and_commas() {
        let canon = NameCanon::default();
        assert_eq!(
            canon.canon_type("std::pair< int ,char >"),
            "std::pair<int, char>"
        );
        assert_eq!(canon.canon_type("  unsigned   int "), "unsigned int");
    }

    #[test]
    fn test_integer_spellings() {
        let canon = NameCanon::default();
        assert_eq!(canon.canon_type("long long unsigned int"), "unsigned long long");
        assert_eq!(canon.canon_type("short int"), "short");
        assert_eq!(canon.canon_type("long int"), "long");
        assert_eq!(canon.canon_type("A<short int>"), "A<short>");
    }

    #[test]
    fn test_qualifier_order() {
        let canon = NameCanon::default();
        assert_eq!(canon.canon_type("const void"), "void const");
        assert_eq!(canon.canon_type("volatile const int"), "const volatile int");
    }

    #[test]
    fn test_shift_split() {
        let canon = NameCanon::default();
        assert_eq!(
            canon.canon_type("std::map<K, std::vector<T>>"),
            "std::map<K, std::vector<T> >"
        );
        assert_eq!(canon.canon_symbol("operator>>"), "operator>>");
        assert_eq!(canon.canon_symbol("operator>>="), "operator>>=");
    }

    #[test]
    fn test_center_split() {
        let (base, args) = split_template("A<B<C,D>,E<F>>").unwrap();
        assert_eq!(base, "A");
        assert_eq!(args, vec!["B<C,D>", "E<F>"]);
        let (base, args) = split_template("A<B>::C<D>").unwrap();
        assert_eq!(base, "A<B>::C");
        assert_eq!(args, vec!["D"]);
    }

    #[test]
    fn test_default_arg_elision() {
        let canon = NameCanon::default();
        assert_eq!(
            canon.canon_type("std::vector<int, std::allocator<int> >"),
            "std::vector<int>"
        );
        assert_eq!(
            canon.canon_type("std::set<int, std::less<int>, std::allocator<int> >"),
            "std::set<int>"
        );
        assert_eq!(
            canon.canon_type(
                "std::map<int, char, std::less<int>, std::allocator<std::pair<const int, char> > >"
            ),
            "std::map<int, char>"
        );
        assert_eq!(
            canon.canon_type(
                "std::basic_string<char, std::char_traits<char>, std::allocator<char> >"
            ),
            "std::string"
        );
        assert_eq!(canon.canon_type("std::basic_string<char>"), "std::string");
        // non-default arguments survive
        assert_eq!(
            canon.canon_type("std::vector<int, MyAlloc<int> >"),
            "std::vector<int, MyAlloc<int> >"
        );
    }

    #[test]
    fn test_idempotent() {
        let canon = NameCanon::default();
        for name in [
            "std::vector<int, std::allocator<int> >",
            "std::map<K,std::vector<T>>",
            "const void",
            "long long unsigned int",
            "unsigned char",
            "void(*)(int, char)",
        ] {
            let once = canon.canon_type(name).to_string();
            let twice = canon.canon_type(&once).to_string();
            assert_eq!(once, twice, "canonicalization not idempotent for {name}");
        }
    }
}
