use std::path::Path;

use abigraph::{ArcStr, DumpMeta, DumpOptions, NameCanon, algorithm};
use cu::pre::*;
use dwtext::resolve::{Resolver, attach_vtables};
use dwtext::{DwarfDump, ElfInfo, Scanner, VtableMap, read_elf_dump, read_vtable_dump};

use crate::cmds::{CmdMain, Fatal, fatal};
use crate::tools;

/// The whole pipeline, end-to-end serial: symbol dump, DIE dump and
/// vtable dump are each consumed to completion before resolution begins.
pub fn run(args: CmdMain) -> Result<(), Fatal> {
    let opts = DumpOptions {
        sort: args.sort,
        all_types: args.all_types || args.all,
        all_symbols: args.all_symbols || args.all,
        bin_only: args.bin_only,
        skip_cxx: args.skip_cxx,
        loud: args.loud,
    };

    for obj in &args.objects {
        if !Path::new(obj).is_file() {
            return Err(Fatal::new(4, format!("cannot read input object: {obj}")));
        }
    }
    let readelf = fatal(3, tools::find_readelf(), "missing external command")?;
    let temp = fatal(
        2,
        tools::TempDir::create(),
        "failed to create temporary directory",
    )?;
    let extra = match &args.extra_info {
        Some(dir) => {
            let dir = Path::new(dir).to_path_buf();
            fatal(
                2,
                cu::fs::make_dir(&dir),
                "failed to create extra-info directory",
            )?;
            Some(dir)
        }
        None => None,
    };

    let kernel_module = args.objects.iter().any(|o| o.contains(".ko"));

    // ELF side first: exports drive symbol selection later
    let mut elf = ElfInfo::default();
    for (i, obj) in args.objects.iter().enumerate() {
        let mut tool_args = vec!["-h", "-d", "--dyn-syms"];
        if kernel_module {
            tool_args.push("--syms");
        }
        tool_args.push(obj.as_str());
        let stderr_path = temp.path().join(format!("elf-{i}.err"));
        let tee = extra.as_ref().map(|d| d.join(format!("elf-{i}.dump")));
        let run = fatal(
            2,
            tools::run_tool(&readelf, &tool_args, &stderr_path, tee.as_deref(), |r| {
                read_elf_dump(r, kernel_module)
            }),
            "failed to read ELF symbol dump",
        )?;
        if !run.ok {
            return Err(Fatal::new(
                4,
                format!("cannot read input object {obj}: {}", run.stderr.trim()),
            ));
        }
        merge_elf(&mut elf, run.value);
    }
    if opts.skip_cxx {
        const STD_PREFIXES: &[&str] = &[
            "_ZS", "_ZNS", "_ZNKS", "_ZN9__gnu_cxx", "_ZNK9__gnu_cxx", "_ZTIS", "_ZTSS",
        ];
        elf.exports
            .retain(|name, _| !STD_PREFIXES.iter().any(|p| name.starts_with(p)));
    }
    cu::info!(
        "collected {} exports and {} undefined imports",
        elf.exports.len(),
        elf.undefined.len()
    );

    // DWARF side: scan each object's DIE dump, rebasing offsets
    let scanner = Scanner::default();
    let mut dump = DwarfDump::default();
    let mut base = 0usize;
    for (i, obj) in args.objects.iter().enumerate() {
        let tool_args = [
            "-N",
            "--debug-dump=info",
            "--debug-dump=loc",
            "--debug-dump=line",
            obj.as_str(),
        ];
        let stderr_path = temp.path().join(format!("dwarf-{i}.err"));
        let tee = extra.as_ref().map(|d| d.join(format!("dwarf-{i}.dump")));
        let run = fatal(
            2,
            tools::run_tool(&readelf, &tool_args, &stderr_path, tee.as_deref(), |r| {
                scanner.scan(r, base, &mut dump)
            }),
            "failed to read DWARF dump",
        )?;
        if run.stderr.contains("No DWARF") {
            return Err(Fatal::new(4, format!("no debug info in input object {obj}")));
        }
        if !run.ok {
            return Err(Fatal::new(
                4,
                format!("cannot read debug info of {obj}: {}", run.stderr.trim()),
            ));
        }
        base = run.value;
    }
    fatal(2, dump.finish(), "failed to index the DIE graph")?;
    if dump.store.is_empty() {
        return Err(Fatal::new(4, "no debug info found in input"));
    }
    cu::info!(
        "scanned {} DIEs across {} compilation units",
        dump.store.len(),
        dump.store.units().len()
    );

    // vtable dump only makes sense for C++ producers
    let is_cxx = dump
        .store
        .units()
        .iter()
        .any(|u| u.language.as_ref().map(|l| l.contains("plus")).unwrap_or(false));
    let vtables = if is_cxx {
        read_vtables(&args, &temp, extra.as_deref())?
    } else {
        VtableMap::new()
    };

    let canon = NameCanon::default();
    let resolver = Resolver::new(&dump, &canon, &elf, opts);
    let mut graph = fatal(2, resolver.run(), "failed to resolve the ABI graph")?;

    let first = &args.objects[0];
    let file_name = Path::new(first)
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or(first.as_str());
    graph.env.library_name = elf
        .soname
        .clone()
        .unwrap_or_else(|| ArcStr::new(file_name));
    graph.env.library_version = match &args.lver {
        Some(v) => ArcStr::new(v),
        None => ArcStr::from(version_from_name(file_name)),
    };
    graph.env.kernel_module = kernel_module;
    attach_vtables(&mut graph, &canon, &vtables);

    fatal(2, algorithm::prune(&mut graph, &opts), "failed to prune the ABI graph")?;
    let missing = algorithm::audit(&graph, &opts);
    if missing > 0 {
        cu::info!("completeness audit: {missing} referenced types missing, dump still emitted");
    }

    let meta = DumpMeta {
        dumper_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let mut value = graph.to_value(&meta);
    if opts.sort {
        value.sort_canonical();
    }
    if args.stdout {
        fatal(2, vtree::write_stdout(&value), "failed to write dump")?;
    } else {
        fatal(2, vtree::write_atomic(&args.output, &value), "failed to write dump")?;
        cu::info!("wrote ABI dump to {}", args.output);
    }
    Ok(())
}

/// Run the vtable helper; degradation is graceful (empty vtables) except
/// when the helper itself cannot load its runtime library
fn read_vtables(
    args: &CmdMain,
    temp: &tools::TempDir,
    extra: Option<&Path>,
) -> Result<VtableMap, Fatal> {
    let dumper = match tools::find_vtable_dumper() {
        Ok(bin) => bin,
        Err(e) => {
            cu::warn!("vtable dumper not found, C++ vtables will be empty: {e}");
            return Ok(VtableMap::new());
        }
    };
    let mut map = VtableMap::new();
    for (i, obj) in args.objects.iter().enumerate() {
        let stderr_path = temp.path().join(format!("vtable-{i}.err"));
        let tee = extra.map(|d| d.join(format!("vtable-{i}.dump")));
        let run = fatal(
            2,
            tools::run_tool(
                &dumper,
                &[obj.as_str()],
                &stderr_path,
                tee.as_deref(),
                |r| read_vtable_dump(r),
            ),
            "failed to read vtable dump",
        )?;
        if run.stderr.contains("error while loading shared libraries") {
            return Err(Fatal::new(
                9,
                format!("vtable dumper cannot load its runtime library: {}", run.stderr.trim()),
            ));
        }
        if !run.ok {
            cu::warn!(
                "vtable dumper failed on {obj} (too old?), C++ vtables will be empty: {}",
                run.stderr.trim()
            );
            continue;
        }
        map.extend(run.value);
    }
    Ok(map)
}

fn merge_elf(into: &mut ElfInfo, from: ElfInfo) {
    if into.arch.is_empty() {
        into.arch = from.arch;
    }
    if into.word_size == 0 {
        into.word_size = from.word_size;
    }
    if into.soname.is_none() {
        into.soname = from.soname;
    }
    into.exports.extend(from.exports);
    into.undefined.extend(from.undefined);
    into.needed.extend(from.needed);
    for (base, versioned) in from.versions {
        into.versions.entry(base).or_insert(versioned);
    }
}

/// `libfoo.so.1.2` carries its version in the name
fn version_from_name(name: &str) -> String {
    match name.find(".so.") {
        Some(i) => name[i + 4..].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_name() {
        assert_eq!(version_from_name("libtest.so.1.2"), "1.2");
        assert_eq!(version_from_name("libtest.so"), "");
        assert_eq!(version_from_name("mod.ko.debug"), "");
    }
}
