//! CLI command definitions and execution
//!
//! Every engine command maps onto one [`oc_oss::Command`] plus its
//! positional arguments; the global transfer flags become the option map
//! the engine parses. `config` is handled locally.

use std::collections::HashMap;

use clap::{Args, Parser, Subcommand};
use oc_core::Options;
use oc_oss::{Command, Invocation};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod config;
mod render;
mod run;

const MIB: u64 = 1024 * 1024;

/// osscmd - command-line client for OSS-style object storage
///
/// Lists, uploads, downloads, copies and deletes objects, with parallel
/// multipart transfers for large files and bulk directory/bucket operations.
#[derive(Parser, Debug)]
#[command(name = "osscmd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bar
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub transfer: TransferArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Endpoint and key pair; flags win over the config file
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Service host, optionally with an http:// or https:// prefix
    #[arg(long, global = true, env = "OSSCMD_HOST")]
    pub host: Option<String>,

    /// Access key id
    #[arg(long, global = true, env = "OSSCMD_ACCESS_ID")]
    pub id: Option<String>,

    /// Access key secret
    #[arg(long, global = true, env = "OSSCMD_ACCESS_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

/// Per-call transfer options
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// Extra headers, "name:value,name:value"; disposition:<file> sets the download name
    #[arg(long, global = true)]
    pub headers: Option<String>,

    /// Confirm destructive bulk operations
    #[arg(long, global = true)]
    pub force: bool,

    /// Transfer even when the destination looks up to date
    #[arg(long, global = true)]
    pub replace: bool,

    /// Only upload files with these suffixes, comma-separated
    #[arg(long, global = true)]
    pub suffix: Option<String>,

    /// Start listing after this key
    #[arg(long, global = true)]
    pub marker: Option<String>,

    /// Group keys sharing a prefix up to this delimiter
    #[arg(long, global = true)]
    pub delimiter: Option<String>,

    /// Maximum number of entries ls returns
    #[arg(long, global = true)]
    pub maxkeys: Option<usize>,

    /// Part size in MB for multipart transfers
    #[arg(long, global = true)]
    pub partsize: Option<u64>,

    /// Number of concurrent workers
    #[arg(long = "thread-num", global = true)]
    pub thread_num: Option<usize>,

    /// Count failed items and keep going instead of aborting bulk operations
    #[arg(long, global = true)]
    pub continue_on_error: bool,
}

impl TransferArgs {
    /// The `name -> value` map the engine parses
    pub fn option_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let mut set = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                map.insert(name.to_string(), value);
            }
        };

        set("headers", self.headers.clone());
        set("force", self.force.then(|| "true".to_string()));
        set("replace", self.replace.then(|| "true".to_string()));
        set("suffix", self.suffix.clone());
        set("marker", self.marker.clone());
        set("delimiter", self.delimiter.clone());
        set("maxkeys", self.maxkeys.map(|n| n.to_string()));
        set(
            "partsize",
            self.partsize.map(|mb| mb.saturating_mul(MIB).to_string()),
        );
        set("thread_num", self.thread_num.map(|n| n.to_string()));
        set(
            "continue_on_error",
            self.continue_on_error.then(|| "true".to_string()),
        );
        map
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List objects under a prefix
    #[command(visible_alias = "list")]
    Ls(RemoteArgs),

    /// Walk every object under a prefix
    #[command(name = "listallobject")]
    ListAllObject(RemoteArgs),

    /// Upload a file in one request
    #[command(visible_alias = "upload")]
    Put(UploadArgs),

    /// Upload a large file in parallel parts
    #[command(name = "uploadlargefile")]
    UploadLargeFile(UploadArgs),

    /// Server-side copy of one object
    Copy(CopyArgs),

    /// Server-side copy of a large object in parallel parts
    #[command(name = "copylargefile")]
    CopyLargeFile(CopyArgs),

    /// Server-side copy of every object under a prefix
    #[command(name = "copybucket")]
    CopyBucket(CopyArgs),

    /// Upload every file under a local directory
    #[command(name = "uploadfromdir")]
    UploadFromDir(UploadArgs),

    /// Download an object with parallel ranged requests
    Get(GetArgs),

    /// Write an object to stdout
    Cat(RemoteArgs),

    /// Show object metadata
    Meta(RemoteArgs),

    /// Delete one object
    #[command(visible_aliases = ["delete", "del"])]
    Rm(RemoteArgs),

    /// Delete every object under a prefix (requires --force)
    #[command(name = "deleteallobject")]
    DeleteAllObject(RemoteArgs),

    /// Store the host and key pair
    Config(config::ConfigArgs),
}

/// A single remote path
#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// oss://bucket[/key]
    pub path: String,
}

/// Local source, remote destination
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Local file or directory
    pub local: String,

    /// oss://bucket[/key]; a trailing / keeps the local file name
    pub dest: String,
}

/// Remote source, remote destination
#[derive(Args, Debug)]
pub struct CopyArgs {
    /// oss://bucket/key
    pub source: String,

    /// oss://bucket[/key]
    pub dest: String,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// oss://bucket/key
    pub source: String,

    /// Local file or directory (default: current directory)
    pub local: Option<String>,
}

impl Commands {
    /// Engine command and positional arguments; `None` for local commands
    pub fn engine_call(&self) -> Option<(Command, Vec<String>)> {
        let remote = |a: &RemoteArgs| vec![a.path.clone()];
        let upload = |a: &UploadArgs| vec![a.local.clone(), a.dest.clone()];
        let copy = |a: &CopyArgs| vec![a.source.clone(), a.dest.clone()];

        let call = match self {
            Commands::Ls(a) => (Command::List, remote(a)),
            Commands::ListAllObject(a) => (Command::ListAll, remote(a)),
            Commands::Put(a) => (Command::Put, upload(a)),
            Commands::UploadLargeFile(a) => (Command::UploadLargeFile, upload(a)),
            Commands::Copy(a) => (Command::Copy, copy(a)),
            Commands::CopyLargeFile(a) => (Command::CopyLargeFile, copy(a)),
            Commands::CopyBucket(a) => (Command::CopyBucket, copy(a)),
            Commands::UploadFromDir(a) => (Command::UploadFromDir, upload(a)),
            Commands::Get(a) => {
                let mut args = vec![a.source.clone()];
                args.extend(a.local.clone());
                (Command::Get, args)
            }
            Commands::Cat(a) => (Command::Cat, remote(a)),
            Commands::Meta(a) => (Command::Meta, remote(a)),
            Commands::Rm(a) => (Command::Delete, remote(a)),
            Commands::DeleteAllObject(a) => (Command::DeleteAll, remote(a)),
            Commands::Config(_) => return None,
        };
        Some(call)
    }
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };

    if let Commands::Config(args) = &cli.command {
        return config::execute(args, &cli.connection, output_config);
    }
    let Some((command, args)) = cli.command.engine_call() else {
        return ExitCode::UsageError;
    };

    let formatter = Formatter::new(output_config);
    let options = match Options::from_map(&cli.transfer.option_map()) {
        Ok(options) => options,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    run::execute(
        Invocation::new(command, args, options),
        &cli.connection,
        output_config,
    )
    .await
}
