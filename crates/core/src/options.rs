//! Per-call options
//!
//! The CLI layer hands the engine a flat `name -> value` string map. This
//! module turns it into typed values once, so operations never look up
//! string keys themselves.

use std::collections::HashMap;

use crate::config::FailurePolicy;
use crate::error::{Error, Result};

/// Typed view of the option map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Extra headers from `--headers="k1:v1,k2:v2"`
    pub headers: Vec<(String, String)>,
    /// Skip interactive confirmation
    pub force: bool,
    /// Transfer even when the destination looks up to date
    pub replace: bool,
    /// Lower-cased suffix allow-list for directory uploads
    pub suffixes: Vec<String>,
    /// Listing start marker
    pub marker: Option<String>,
    /// Listing delimiter
    pub delimiter: Option<String>,
    /// Listing page size / result cap
    pub max_keys: Option<usize>,
    /// Requested part size in bytes
    pub part_size: Option<u64>,
    /// Requested worker count
    pub thread_num: Option<usize>,
    /// Policy override for bulk operations
    pub failure_policy: Option<FailurePolicy>,
}

impl Options {
    /// Parse the string map. Empty values count as absent.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| map.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let headers = get("headers").map(parse_headers).unwrap_or_default();
        let suffixes = get("suffix")
            .map(|s| {
                s.split(',')
                    .map(|x| x.trim().to_lowercase())
                    .filter(|x| !x.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            headers,
            force: get("force").is_some_and(is_true),
            replace: get("replace").is_some_and(is_true),
            suffixes,
            marker: get("marker").map(str::to_string),
            delimiter: get("delimiter").map(str::to_string),
            max_keys: get("maxkeys").map(|v| parse_number("maxkeys", v)).transpose()?,
            part_size: get("partsize").map(|v| parse_number("partsize", v)).transpose()?,
            thread_num: get("thread_num")
                .map(|v| parse_number("thread_num", v))
                .transpose()?,
            failure_policy: get("continue_on_error").map(|v| {
                if is_true(v) {
                    FailurePolicy::Continue
                } else {
                    FailurePolicy::Abort
                }
            }),
        })
    }

    /// Value of a header given through `headers`, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Download file name requested via `headers=disposition:<name>`
    pub fn disposition(&self) -> Option<&str> {
        self.header("disposition").filter(|v| !v.is_empty())
    }

    /// Whether a relative file name passes the suffix allow-list
    pub fn suffix_allowed(&self, file_name: &str) -> bool {
        if self.suffixes.is_empty() {
            return true;
        }
        let lower = file_name.to_lowercase();
        self.suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{name} must be a number, got '{value}'")))
}

fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once(':')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
        })
        .collect()
}
