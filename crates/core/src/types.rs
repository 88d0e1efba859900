//! Result types returned by engine operations

use std::collections::BTreeMap;
use std::path::PathBuf;

use jiff::Timestamp;
use serde::Serialize;

/// Format a byte count the way listings show it
pub fn format_size(size: u64) -> String {
    humansize::format_size(size, humansize::BINARY)
}

/// Metadata from a HEAD request
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectMeta {
    pub bucket: String,
    pub key: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Every response header, lower-cased
    pub headers: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn exists(&self) -> bool {
        self.status == 200
    }
}

/// One object from a bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl ListEntry {
    pub fn size_human(&self) -> String {
        format_size(self.size)
    }
}

/// One page of a marker-based listing
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListPage {
    pub bucket: String,
    pub prefix: String,
    pub marker: String,
    pub delimiter: String,
    pub max_keys: Option<usize>,
    pub is_truncated: bool,
    pub entries: Vec<ListEntry>,
    pub common_prefixes: Vec<String>,
    /// `NextMarker` as sent by the service, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

impl ListPage {
    /// Marker for the following page
    ///
    /// The service's `NextMarker` when present, else the greater of the last
    /// key and the last common prefix.
    pub fn next_marker(&self) -> Option<&str> {
        if !self.is_truncated {
            return None;
        }
        if let Some(marker) = self.next_marker.as_deref().filter(|m| !m.is_empty()) {
            return Some(marker);
        }
        let last_key = self.entries.last().map(|e| e.key.as_str());
        let last_prefix = self.common_prefixes.last().map(String::as_str);
        last_key.max(last_prefix)
    }
}

/// Result of a single PUT
#[derive(Debug, Clone, Serialize)]
pub struct PutOutcome {
    pub status: u16,
    pub location: String,
    pub bucket: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Result of a server-side single copy
#[derive(Debug, Clone, Serialize)]
pub struct CopyOutcome {
    pub status: u16,
    pub bucket: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Result of a completed multipart upload or copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompleteOutcome {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
    /// Number of parts in the completion manifest
    pub parts: usize,
}

/// Result of a DELETE
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub status: u16,
    pub bucket: String,
    pub key: String,
}

/// Result of a ranged parallel download
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub bucket: String,
    pub key: String,
    pub local_file: PathBuf,
    pub size: u64,
}

/// Aggregate counts of a bulk operation
///
/// `fail` is always derived, never tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub total: u64,
    pub finish: u64,
    /// Absent for operations without a skip concept (delete-all)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
}

impl Aggregate {
    pub fn fail(&self) -> u64 {
        self.total
            .saturating_sub(self.finish)
            .saturating_sub(self.skip.unwrap_or(0))
    }
}

/// Totals of a full listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListSummary {
    pub count: u64,
    pub total_size: u64,
    /// Listing requests issued
    pub pages: u64,
}

impl ListSummary {
    pub fn total_size_human(&self) -> String {
        format_size(self.total_size)
    }
}
