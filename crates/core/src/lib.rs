//! oc-core: Core library for the osscmd object storage client
//!
//! This crate provides the SDK-free pieces shared by the engine and the CLI:
//! - Error taxonomy with exit codes
//! - Client configuration, tunables and the TOML config file
//! - `oss://bucket/key` path parsing
//! - Per-call option parsing
//! - The `Transport` and `ProgressSink` seams
//! - Explicit result types for every operation

pub mod config;
pub mod error;
pub mod options;
pub mod path;
pub mod traits;
pub mod types;

pub use config::{
    ClientConfig, Config, ConfigManager, Credentials, FailurePolicy, Tunables, DEFAULT_HOST,
};
pub use error::{Error, Result};
pub use options::Options;
pub use path::{parse_path, ObjectRef, ParsedPath};
pub use traits::{HttpRequest, HttpResponse, Method, NoProgress, ProgressSink, Transport};
pub use types::{
    format_size, Aggregate, CompleteOutcome, CopyOutcome, DeleteOutcome, DownloadOutcome,
    ListEntry, ListPage, ListSummary, ObjectMeta, PutOutcome,
};

#[cfg(any(test, feature = "mock"))]
pub use traits::MockTransport;
