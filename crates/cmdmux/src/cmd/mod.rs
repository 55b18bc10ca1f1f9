use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::{io_error, CliResult};
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo command set on a socket.
    Serve(ServeArgs),
    /// Call a command on a serving peer and print the reply.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Session configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Exit once N connections were accepted and have closed.
    #[arg(long, value_name = "N")]
    pub max_connections: Option<u64>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Command name; dots address nested commands (`sys.info`).
    pub command: String,
    /// Positional arguments, each parsed as JSON (plain text otherwise).
    pub args: Vec<String>,
    /// Keyword argument as `key=value` (value parsed like positionals).
    #[arg(long, value_name = "KEY=VALUE")]
    pub kw: Vec<String>,
    /// Open an incoming stream and print every item.
    #[arg(long, conflicts_with = "send")]
    pub stream: bool,
    /// Stream this JSON item to the command (repeatable).
    #[arg(long, value_name = "JSON", conflicts_with = "stream")]
    pub send: Vec<String>,
    /// Give up after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
