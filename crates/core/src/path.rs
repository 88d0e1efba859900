//! Path parsing and resolution
//!
//! Handles parsing of remote paths in the format: oss://bucket[/key]
//! Local paths are passed through as-is.

use crate::error::{Error, Result};

/// URI scheme prefix for remote paths
pub const SCHEME: &str = "oss://";

/// A parsed remote path pointing to an object or a key prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Bucket name
    pub bucket: String,
    /// Object key (empty for bucket root)
    pub key: String,
}

impl ObjectRef {
    /// Create a new ObjectRef
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `oss://bucket[/key]`
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path.strip_prefix(SCHEME).ok_or_else(|| {
            Error::InvalidPath(format!("'{path}' must start with {SCHEME}"))
        })?;

        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket, key),
            None => (rest, ""),
        };

        if bucket.is_empty() {
            return Err(Error::InvalidPath("Bucket name cannot be empty".into()));
        }
        if key.starts_with('/') {
            return Err(Error::InvalidPath(format!(
                "Object name should not begin with '/': {path}"
            )));
        }

        Ok(Self::new(bucket, key))
    }

    /// Whether the reference names a prefix rather than a single object
    pub fn is_prefix(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Last path segment of the key
    pub fn basename(&self) -> &str {
        let key = self.key.trim_end_matches('/');
        key.rsplit('/').next().unwrap_or(key)
    }

    /// Join a child path component
    pub fn join(&self, child: &str) -> Self {
        let base = self.key.trim_end_matches('/');
        let child = child.trim_start_matches('/');
        let key = if base.is_empty() {
            child.to_string()
        } else {
            format!("{base}/{child}")
        };
        Self::new(self.bucket.clone(), key)
    }

    /// Fill in a destination key from a source basename.
    ///
    /// An empty key becomes the basename; a key ending in `/` gets the
    /// basename appended. Any other key is kept.
    pub fn with_default_name(&self, basename: &str) -> Self {
        if self.is_prefix() {
            self.join(basename)
        } else {
            self.clone()
        }
    }

    /// Resource path used by copy sources and the signer: `/bucket/key`
    pub fn resource(&self) -> String {
        format!("/{}/{}", self.bucket, self.key)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.bucket, self.key)
    }
}

/// Parsed path that can be either local or remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPath {
    /// Local filesystem path
    Local(std::path::PathBuf),
    /// Remote object path
    Remote(ObjectRef),
}

impl ParsedPath {
    /// Check if this is a remote path
    pub fn is_remote(&self) -> bool {
        matches!(self, ParsedPath::Remote(_))
    }

    /// Get the remote path if this is a remote path
    pub fn as_remote(&self) -> Option<&ObjectRef> {
        match self {
            ParsedPath::Remote(p) => Some(p),
            ParsedPath::Local(_) => None,
        }
    }

    /// Get the local path if this is a local path
    pub fn as_local(&self) -> Option<&std::path::Path> {
        match self {
            ParsedPath::Local(p) => Some(p),
            ParsedPath::Remote(_) => None,
        }
    }
}

/// Parse a path string into a ParsedPath
///
/// Anything carrying the `oss://` scheme is remote; everything else is local.
pub fn parse_path(path: &str) -> Result<ParsedPath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }

    if path.starts_with(SCHEME) {
        ObjectRef::parse(path).map(ParsedPath::Remote)
    } else {
        Ok(ParsedPath::Local(std::path::PathBuf::from(path)))
    }
}
