//! Request signing
//!
//! Builds the canonical string and the `Authorization: OSS <id>:<signature>`
//! header. The canonical form is
//!
//! ```text
//! VERB\n
//! Content-MD5\n
//! Content-Type\n
//! Date\n
//! x-oss-a:value\n            (lower-cased, sorted)
//! /bucket/key[?subresource]
//! ```
//!
//! Any deviation from this byte sequence makes the service answer 403.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use oc_core::{Credentials, Error, Method, Result};

type HmacSha1 = Hmac<Sha1>;

/// Prefix of headers that take part in the signature by name and value
pub const OSS_HEADER_PREFIX: &str = "x-oss-";

/// Signs requests with one access key pair
#[derive(Clone)]
pub struct Signer {
    access_id: String,
    access_secret: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_id", &self.access_id)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            access_id: credentials.access_id.clone(),
            access_secret: credentials.access_secret.clone(),
        }
    }

    /// Build the exact byte sequence that gets signed
    pub fn canonical_string(
        method: Method,
        headers: &[(String, String)],
        bucket: &str,
        key: &str,
        subresource: Option<&str>,
    ) -> String {
        let standard = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .unwrap_or("")
        };

        let mut oss_headers: Vec<(String, &str)> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .filter(|(k, _)| k.starts_with(OSS_HEADER_PREFIX))
            .collect();
        oss_headers.sort();

        let mut canonical = format!(
            "{}\n{}\n{}\n{}\n",
            method.as_str(),
            standard("content-md5"),
            standard("content-type"),
            standard("date"),
        );
        for (name, value) in oss_headers {
            canonical.push_str(&name);
            canonical.push(':');
            canonical.push_str(value);
            canonical.push('\n');
        }

        canonical.push('/');
        canonical.push_str(bucket);
        canonical.push('/');
        canonical.push_str(key);
        if let Some(sub) = subresource {
            canonical.push('?');
            canonical.push_str(sub);
        }
        canonical
    }

    /// Produce the `Authorization` header value
    pub fn sign(
        &self,
        method: Method,
        headers: &[(String, String)],
        bucket: &str,
        key: &str,
        subresource: Option<&str>,
    ) -> String {
        let canonical = Self::canonical_string(method, headers, bucket, key, subresource);
        let mut mac = HmacSha1::new_from_slice(self.access_secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC takes keys of any size"));
        mac.update(canonical.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        format!("OSS {}:{}", self.access_id, signature)
    }
}

/// Base64 of the MD5 digest, as carried in `Content-MD5`
pub fn content_md5(body: &[u8]) -> String {
    BASE64.encode(Md5::digest(body))
}

/// Current time in the RFC 9110 form used by the `Date` header
pub fn http_date_now() -> Result<String> {
    http_date(jiff::Timestamp::now())
}

/// Format a timestamp for the `Date` header
pub fn http_date(ts: jiff::Timestamp) -> Result<String> {
    jiff::fmt::rfc2822::DateTimePrinter::new()
        .timestamp_to_rfc9110_string(&ts)
        .map_err(|e| Error::General(format!("Cannot format date: {e}")))
}

/// Parse a `Last-Modified` / `Date` header value
pub fn parse_http_date(value: &str) -> Option<jiff::Timestamp> {
    jiff::fmt::rfc2822::DateTimeParser::new()
        .parse_timestamp(value)
        .ok()
}
