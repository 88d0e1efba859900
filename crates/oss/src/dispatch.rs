//! Command dispatch
//!
//! Maps a command name, its positional arguments and the option map onto
//! one engine operation. Argument shape errors are `InvalidArgument` or
//! `InvalidPath`, which the CLI reports as usage errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokio::io::AsyncWrite;
use tracing::debug;

use oc_core::{
    parse_path, Aggregate, CompleteOutcome, CopyOutcome, DeleteOutcome, DownloadOutcome, Error,
    ListEntry, ListPage, ListSummary, ObjectMeta, ObjectRef, Options, ParsedPath, PutOutcome,
    Result, Transport,
};

use crate::client::OssClient;

/// Engine commands, by canonical name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    List,
    ListAll,
    Put,
    UploadLargeFile,
    Copy,
    CopyLargeFile,
    CopyBucket,
    UploadFromDir,
    Get,
    Cat,
    Meta,
    Delete,
    DeleteAll,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::List,
        Command::ListAll,
        Command::Put,
        Command::UploadLargeFile,
        Command::Copy,
        Command::CopyLargeFile,
        Command::CopyBucket,
        Command::UploadFromDir,
        Command::Get,
        Command::Cat,
        Command::Meta,
        Command::Delete,
        Command::DeleteAll,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::List => "ls",
            Command::ListAll => "listallobject",
            Command::Put => "put",
            Command::UploadLargeFile => "uploadlargefile",
            Command::Copy => "copy",
            Command::CopyLargeFile => "copylargefile",
            Command::CopyBucket => "copybucket",
            Command::UploadFromDir => "uploadfromdir",
            Command::Get => "get",
            Command::Cat => "cat",
            Command::Meta => "meta",
            Command::Delete => "rm",
            Command::DeleteAll => "deleteallobject",
        }
    }

    /// Alternative names accepted on the command line
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Command::List => &["list"],
            Command::Put => &["upload"],
            Command::Delete => &["delete", "del"],
            _ => &[],
        }
    }

    /// Accepted positional argument counts, inclusive
    fn arity(self) -> (usize, usize) {
        match self {
            Command::List | Command::ListAll | Command::Meta | Command::Cat => (1, 1),
            Command::Delete | Command::DeleteAll => (1, 1),
            Command::Get => (1, 2),
            Command::Put
            | Command::UploadLargeFile
            | Command::Copy
            | Command::CopyLargeFile
            | Command::CopyBucket
            | Command::UploadFromDir => (2, 2),
        }
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Command::ALL
            .into_iter()
            .find(|c| c.name() == name || c.aliases().contains(&name.as_str()))
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown command: {s}")))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One parsed engine call
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Command,
    pub args: Vec<String>,
    pub options: Options,
}

impl Invocation {
    pub fn new(command: Command, args: Vec<String>, options: Options) -> Self {
        Self {
            command,
            args,
            options,
        }
    }

    /// Build from the raw `command, args, name -> value` triple
    pub fn from_parts(
        command: &str,
        args: Vec<String>,
        options: &HashMap<String, String>,
    ) -> Result<Self> {
        Ok(Self::new(command.parse()?, args, Options::from_map(options)?))
    }

    fn check_arity(&self) -> Result<()> {
        let (min, max) = self.command.arity();
        let n = self.args.len();
        if n < min || n > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{min} to {max}")
            };
            return Err(Error::InvalidArgument(format!(
                "{} expects {expected} argument(s), got {n}",
                self.command
            )));
        }
        Ok(())
    }

    fn remote(&self, index: usize) -> Result<ObjectRef> {
        match parse_path(self.arg(index)?)? {
            ParsedPath::Remote(object) => Ok(object),
            ParsedPath::Local(path) => Err(Error::InvalidPath(format!(
                "{} expects an oss://bucket/key path, got {}",
                self.command,
                path.display()
            ))),
        }
    }

    fn local(&self, index: usize) -> Result<PathBuf> {
        match parse_path(self.arg(index)?)? {
            ParsedPath::Local(path) => Ok(path),
            ParsedPath::Remote(object) => Err(Error::InvalidPath(format!(
                "{} expects a local path, got {object}",
                self.command
            ))),
        }
    }

    /// Remote path that must name a single object
    fn object(&self, index: usize) -> Result<ObjectRef> {
        let object = self.remote(index)?;
        if object.key.is_empty() {
            return Err(Error::InvalidPath(format!(
                "{} needs an object key: {object}",
                self.command
            )));
        }
        Ok(object)
    }

    fn arg(&self, index: usize) -> Result<&str> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidArgument(format!("{}: missing argument", self.command)))
    }
}

/// What a dispatched command produced
#[derive(Debug, Clone)]
pub enum Outcome {
    List(ListPage),
    ListAll(ListSummary),
    Put(PutOutcome),
    Complete(CompleteOutcome),
    Copy(CopyOutcome),
    Aggregate(Aggregate),
    Download(DownloadOutcome),
    Cat { bytes: u64 },
    Meta(ObjectMeta),
    Delete(DeleteOutcome),
}

/// Where streaming commands send their output
pub struct Streams<'a> {
    /// Object bytes for `cat`
    pub stdout: &'a mut (dyn AsyncWrite + Unpin + Send),
    /// Each entry of `listallobject`, in listing order
    pub on_entry: &'a mut (dyn FnMut(&ListEntry) + Send),
}

/// Run one command against `client`
pub async fn run<T: Transport + 'static>(
    client: &OssClient<T>,
    invocation: &Invocation,
    streams: Streams<'_>,
) -> Result<Outcome> {
    invocation.check_arity()?;
    let options = &invocation.options;
    debug!(command = %invocation.command, args = ?invocation.args, "dispatching");

    let outcome = match invocation.command {
        Command::List => Outcome::List(client.list_objects(&invocation.remote(0)?, options).await?),
        Command::ListAll => Outcome::ListAll(
            client
                .list_all_objects(&invocation.remote(0)?, options, streams.on_entry)
                .await?,
        ),
        Command::Put => {
            let local = invocation.local(0)?;
            let dest = invocation.remote(1)?;
            Outcome::Put(
                client
                    .upload_file(&local, &dest, options.disposition())
                    .await?,
            )
        }
        Command::UploadLargeFile => {
            let local = invocation.local(0)?;
            let dest = invocation.remote(1)?;
            Outcome::Complete(client.upload_large_file(&local, &dest, options).await?)
        }
        Command::Copy => {
            let source = invocation.object(0)?;
            let dest = invocation.remote(1)?;
            Outcome::Copy(client.copy_object(&source, &dest).await?)
        }
        Command::CopyLargeFile => {
            let source = invocation.object(0)?;
            let dest = invocation.remote(1)?;
            Outcome::Complete(client.copy_large_file(&source, &dest, options).await?)
        }
        Command::CopyBucket => {
            let source = invocation.remote(0)?;
            let dest = invocation.remote(1)?;
            Outcome::Aggregate(client.copy_bucket(&source, &dest, options).await?)
        }
        Command::UploadFromDir => {
            let local = invocation.local(0)?;
            let dest = invocation.remote(1)?;
            Outcome::Aggregate(client.upload_from_dir(&local, &dest, options).await?)
        }
        Command::Get => {
            let object = invocation.object(0)?;
            let local = if invocation.args.len() > 1 {
                invocation.local(1)?
            } else {
                Path::new(".").to_path_buf()
            };
            Outcome::Download(client.get_object(&object, &local, options).await?)
        }
        Command::Cat => {
            let object = invocation.object(0)?;
            let mut writer = streams.stdout;
            Outcome::Cat {
                bytes: client.cat(&object, &mut writer).await?,
            }
        }
        Command::Meta => {
            let object = invocation.object(0)?;
            let meta = client.head_object(&object.bucket, &object.key).await?;
            if !meta.exists() {
                return Err(Error::from_status(meta.status, object.to_string()));
            }
            Outcome::Meta(meta)
        }
        Command::Delete => {
            let object = invocation.object(0)?;
            Outcome::Delete(client.delete_object(&object.bucket, &object.key).await?)
        }
        Command::DeleteAll => {
            if !options.force {
                return Err(Error::InvalidArgument(
                    "deleteallobject removes every object under the prefix; pass --force"
                        .into(),
                ));
            }
            Outcome::Aggregate(
                client
                    .delete_all_objects(&invocation.remote(0)?, options)
                    .await?,
            )
        }
    };
    Ok(outcome)
}
