use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod apply;
pub mod buildinfo;
pub mod list;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the patch intake daemon.
    Serve(ServeArgs),
    /// Verify a patch container; optionally submit it to a daemon.
    Apply(ApplyArgs),
    /// List patches applied by a running daemon.
    List(ListArgs),
    /// Print a running daemon's build provenance.
    BuildInfo(BuildInfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Apply(args) => apply::run(args, format),
        Command::List(args) => list::run(args, format),
        Command::BuildInfo(args) => buildinfo::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub socket: PathBuf,
    /// Executable sandbox size in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub sandbox_size: usize,
    /// Per-connection read/write deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Patch container (<sha1>.raxlpxs).
    pub file: PathBuf,
    /// Submit to the daemon at this socket after verification.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// Named socket path to bind as this client's identity.
    #[arg(long, requires = "socket")]
    pub identity: Option<PathBuf>,
    /// Expected live bytes at the jump target (64 hex digits).
    #[arg(long, value_name = "HEX", requires = "socket")]
    pub canary_hex: Option<String>,
    /// Target build id (40 hex digits).
    #[arg(long, value_name = "HEX")]
    pub build_id_hex: Option<String>,
    /// Running target version to gate against.
    #[arg(long)]
    pub target_version: Option<String>,
    /// Running target compile date to gate against.
    #[arg(long)]
    pub target_compile_date: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Daemon socket path.
    #[arg(long)]
    pub socket: PathBuf,
    /// Named socket path to bind as this client's identity.
    #[arg(long)]
    pub identity: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BuildInfoArgs {
    /// Daemon socket path.
    #[arg(long)]
    pub socket: PathBuf,
    /// Named socket path to bind as this client's identity.
    #[arg(long)]
    pub identity: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// The single-use identity path bound when the caller does not name one.
pub fn default_identity() -> PathBuf {
    std::env::temp_dir().join(format!("sandpatch-id-{}", std::process::id()))
}

/// Remove a consumed or leftover identity path; the server unlinks it on
/// success, so absence is the common case.
pub fn cleanup_identity(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
}
