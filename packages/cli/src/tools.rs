use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use cu::pre::*;

/// Scratch directory for subprocess stderr capture. Created at process
/// start, removed unconditionally when dropped, including on fatal error.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn create() -> cu::Result<Self> {
        let path = std::env::temp_dir().join(format!("abidump-{}", std::process::id()));
        cu::fs::make_dir(&path)?;
        Ok(Self { path })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Locate the ELF/DWARF disassembler
pub fn find_readelf() -> cu::Result<PathBuf> {
    let bin = cu::bin::find(
        "eu-readelf",
        [cu::bin::from_env("ABIDUMP_READELF"), cu::bin::in_PATH()],
    );
    cu::check!(
        bin,
        "could not find eu-readelf (please install elfutils or set ABIDUMP_READELF to its path)"
    )
}

/// Locate the C++ vtable dumper
pub fn find_vtable_dumper() -> cu::Result<PathBuf> {
    let bin = cu::bin::find(
        "vtable-dumper",
        [
            cu::bin::from_env("ABIDUMP_VTABLE_DUMPER"),
            cu::bin::in_PATH(),
        ],
    );
    cu::check!(
        bin,
        "could not find vtable-dumper (set ABIDUMP_VTABLE_DUMPER to its path)"
    )
}

/// Result of one tool invocation: the parsed value, whether the tool
/// exited cleanly, and its captured stderr
pub struct ToolRun<T> {
    pub value: T,
    pub ok: bool,
    pub stderr: String,
}

/// Run a tool and parse its stdout streaming, so the dump text never has
/// to live in memory in full. Stderr is captured into `stderr_path`; with
/// `tee_path` the raw stdout is also persisted for audit.
pub fn run_tool<T, F>(
    bin: &Path,
    args: &[&str],
    stderr_path: &Path,
    tee_path: Option<&Path>,
    parse: F,
) -> cu::Result<ToolRun<T>>
where
    F: FnOnce(&mut dyn BufRead) -> cu::Result<T>,
{
    let cmdline = render_cmdline(bin, args);
    cu::debug!("running: {cmdline}");
    if let Some(tee) = tee_path {
        let mut cmd_path = tee.as_os_str().to_os_string();
        cmd_path.push(".cmd");
        cu::fs::write(cmd_path, &cmdline)?;
    }

    let stderr_file = cu::check!(
        File::create(stderr_path),
        "failed to create stderr capture at {}",
        stderr_path.display()
    )?;
    let mut child = cu::check!(
        Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_file))
            .spawn(),
        "failed to spawn {cmdline}"
    )?;
    let stdout = cu::check!(child.stdout.take(), "no stdout pipe for {cmdline}")?;

    let value = match tee_path {
        Some(tee) => {
            let file = cu::check!(
                File::create(tee),
                "failed to create audit copy at {}",
                tee.display()
            )?;
            let mut reader = BufReader::new(TeeReader {
                inner: stdout,
                copy: file,
            });
            parse(&mut reader)?
        }
        None => {
            let mut reader = BufReader::new(stdout);
            parse(&mut reader)?
        }
    };

    let status = cu::check!(child.wait(), "failed to wait for {cmdline}")?;
    let stderr = std::fs::read_to_string(stderr_path).unwrap_or_default();
    Ok(ToolRun {
        value,
        ok: status.success(),
        stderr,
    })
}

/// The command line as the user could re-run it, for logs and audit files
pub fn render_cmdline(bin: &Path, args: &[&str]) -> String {
    let mut parts = vec![bin.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string()));
    shell_words::join(&parts)
}

struct TeeReader<R: Read> {
    inner: R,
    copy: File,
}

impl<R: Read> Read for TeeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.copy.write_all(&buf[..n])?;
        Ok(n)
    }
}
