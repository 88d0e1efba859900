//! oc-oss: transfer engine for the osscmd client
//!
//! Signs requests with the OSS header scheme, sends them through a
//! [`oc_core::Transport`], and builds single-object, multipart and bulk
//! operations on top. This is the only crate that speaks HTTP.

pub mod bulk;
pub mod client;
pub mod dispatch;
pub mod download;
pub mod listing;
pub mod multipart;
pub mod plan;
pub mod scheduler;
pub mod signer;
pub mod transport;
pub mod xml;

pub use client::OssClient;
pub use dispatch::{run, Command, Invocation, Outcome, Streams};
pub use listing::{ListParams, Paginator};
pub use multipart::MultipartConfig;
pub use plan::{part_count, plan, Part};
pub use scheduler::{with_retry, PoolReport, Tally, WorkerPool};
pub use signer::Signer;
pub use transport::HttpTransport;
