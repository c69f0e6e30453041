use cu::pre::*;

mod dump;

/// Format version of the emitted dump tree
pub const DUMP_FORMAT_VERSION: &str = "3.0";

/// Fatal error carrying the process exit code:
/// 2 generic, 3 missing external command, 4 unreadable input or missing
/// debug info, 9 missing runtime module of the vtable helper
pub struct Fatal {
    pub code: u8,
    pub message: String,
}

impl Fatal {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Classify an error at the CLI boundary into a fatal exit
pub(crate) fn fatal<T>(code: u8, result: cu::Result<T>, what: &str) -> Result<T, Fatal> {
    result.map_err(|e| Fatal::new(code, format!("{what}: {e:?}")))
}

#[derive(Debug, clap::Parser, AsRef)]
#[clap(
    name = "abidump",
    about = "Dump the ABI of a shared object or kernel module from its DWARF debug info"
)]
pub struct CmdMain {
    /// Object paths: .so, .so.N, .ko, .ko.debug or stripped debug files
    #[clap(required_unless_present_any = ["dumpversion", "version"])]
    pub objects: Vec<String>,

    /// Print the tool version and exit
    #[clap(short = 'v', long = "version")]
    pub version: bool,

    /// Output path
    #[clap(short, long, default_value = "./ABI.dump")]
    pub output: String,

    /// Write the dump to standard output instead
    #[clap(long)]
    pub stdout: bool,

    /// Canonically sort every map before emission
    #[clap(long)]
    pub sort: bool,

    /// Embed this library version string in the dump
    #[clap(short, long)]
    pub lver: Option<String>,

    /// Also persist the raw disassembler outputs for audit
    #[clap(long = "extra-info")]
    pub extra_info: Option<String>,

    /// Exclude inline, pure-virtual and non-exported globals
    #[clap(long = "bin-only")]
    pub bin_only: bool,

    /// Retain types even when unreferenced
    #[clap(long = "all-types")]
    pub all_types: bool,

    /// Retain non-exported externally-visible symbols
    #[clap(long = "all-symbols")]
    pub all_symbols: bool,

    /// Drop libstdc++ and __gnu_cxx internal symbols
    #[clap(long = "skip-cxx")]
    pub skip_cxx: bool,

    /// Equivalent to --all-types --all-symbols
    #[clap(long)]
    pub all: bool,

    /// Emit non-fatal warnings
    #[clap(long)]
    pub loud: bool,

    /// Print the dump format version and exit
    #[clap(long)]
    pub dumpversion: bool,

    #[clap(flatten)]
    #[as_ref]
    pub common: cu::cli::Flags,
}

pub fn main(args: CmdMain) -> Result<(), Fatal> {
    if args.version {
        cu::print!("abidump {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.dumpversion {
        cu::print!("{DUMP_FORMAT_VERSION}");
        return Ok(());
    }
    dump::run(args)
}
