//! OSS client
//!
//! Composes the [`Signer`] and a [`Transport`] into single-object
//! operations. The raw variants (`put`, `head`, `copy`, ...) return the
//! response whatever its status; the `*_object` variants judge the status
//! and return typed outcomes.

use std::path::Path;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use oc_core::{
    ClientConfig, CopyOutcome, DeleteOutcome, Error, HttpRequest, HttpResponse, Method,
    NoProgress, ObjectMeta, ObjectRef, ProgressSink, PutOutcome, Result, Transport,
};

use crate::signer::{content_md5, http_date_now, parse_http_date, Signer};
use crate::transport::HttpTransport;
use crate::xml::{self, CopyObjectResult};

/// Header that names the source of a server-side copy
pub const COPY_SOURCE_HEADER: &str = "x-oss-copy-source";

/// One request before the `Date` and `Authorization` headers are added
#[derive(Debug, Clone)]
pub(crate) struct RequestSpec {
    pub method: Method,
    pub bucket: String,
    pub key: String,
    /// Signed sub-resource such as `uploads` or `partNumber=1&uploadId=..`
    pub subresource: Option<String>,
    /// Unsigned query parameters, already encoded
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestSpec {
    pub fn new(method: Method, bucket: &str, key: &str) -> Self {
        Self {
            method,
            bucket: bucket.to_string(),
            key: key.to_string(),
            subresource: None,
            query: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn subresource(mut self, sub: impl Into<String>) -> Self {
        self.subresource = Some(sub.into());
        self
    }

    pub fn query(mut self, query: String) -> Self {
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.headers.push((name.to_string(), value));
        }
        self
    }

    /// Attach a body together with its `Content-MD5`
    pub fn body_with_md5(mut self, body: Vec<u8>) -> Self {
        let md5 = content_md5(&body);
        self.body = body;
        self.header("Content-MD5", md5)
    }
}

/// Client for one endpoint and key pair
pub struct OssClient<T = HttpTransport> {
    transport: Arc<T>,
    config: Arc<ClientConfig>,
    signer: Arc<Signer>,
    progress: Arc<dyn ProgressSink>,
    scheme: &'static str,
    host: String,
}

impl<T> Clone for OssClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            signer: Arc::clone(&self.signer),
            progress: Arc::clone(&self.progress),
            scheme: self.scheme,
            host: self.host.clone(),
        }
    }
}

impl OssClient<HttpTransport> {
    /// Create a client that talks HTTP through reqwest
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self::with_transport(config, HttpTransport::new()?))
    }
}

impl<T: Transport + 'static> OssClient<T> {
    /// Create a client over any transport
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let (scheme, host) = split_host(&config.credentials.host);
        Self {
            transport: Arc::new(transport),
            signer: Arc::new(Signer::new(&config.credentials)),
            config: Arc::new(config),
            progress: Arc::new(NoProgress),
            scheme,
            host,
        }
    }

    /// Route scheduler progress to `sink`
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn progress(&self) -> Arc<dyn ProgressSink> {
        Arc::clone(&self.progress)
    }

    /// Public URL of an object
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}://{}.{}/{}", self.scheme, bucket, self.host, encode_key(key))
    }

    /// Sign and send one request
    pub(crate) async fn execute(&self, spec: RequestSpec) -> Result<HttpResponse> {
        let RequestSpec {
            method,
            bucket,
            key,
            subresource,
            query,
            mut headers,
            body,
        } = spec;

        headers.push(("Date".to_string(), http_date_now()?));
        let authorization =
            self.signer
                .sign(method, &headers, &bucket, &key, subresource.as_deref());
        headers.push(("Authorization".to_string(), authorization));

        let mut url = self.object_url(&bucket, &key);
        let params: Vec<&str> = subresource.iter().chain(query.iter()).map(String::as_str).collect();
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }

        debug!(%method, bucket = %bucket, key = %key, "sending request");
        self.transport
            .execute(HttpRequest {
                method,
                url,
                headers,
                body,
            })
            .await
    }

    /// PUT a whole body, returning the raw response
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        disposition: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut spec = RequestSpec::new(Method::Put, bucket, key)
            .body_with_md5(body)
            .header("Content-Type", content_type(key));
        if let Some(name) = disposition {
            spec = spec.header("Content-Disposition", disposition_value(name));
        }
        self.execute(spec).await
    }

    /// PUT a whole body; anything but 200 is an error
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        disposition: Option<&str>,
    ) -> Result<PutOutcome> {
        let res = self.put(bucket, key, body, disposition).await?;
        if res.status != 200 {
            return Err(Error::from_status(res.status, res.body_text()));
        }
        Ok(PutOutcome {
            status: res.status,
            location: self.object_url(bucket, key),
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: res.etag().map(str::to_string),
            request_id: res.header("x-oss-request-id").map(str::to_string),
        })
    }

    /// Read a local file and PUT it in one request
    ///
    /// An empty destination key, or one ending in `/`, takes the file name.
    pub async fn upload_file(
        &self,
        local: &Path,
        dest: &ObjectRef,
        disposition: Option<&str>,
    ) -> Result<PutOutcome> {
        let dest = dest.with_default_name(&file_name(local)?);
        let body = tokio::fs::read(local).await?;
        debug!(file = %local.display(), bytes = body.len(), "uploading file");
        self.put_object(&dest.bucket, &dest.key, body, disposition)
            .await
    }

    /// HEAD an object, returning the raw response
    pub async fn head(&self, bucket: &str, key: &str) -> Result<HttpResponse> {
        self.execute(RequestSpec::new(Method::Head, bucket, key))
            .await
    }

    /// HEAD an object and parse its metadata; missing objects are not an error here
    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let res = self.head(bucket, key).await?;
        Ok(ObjectMeta {
            bucket: bucket.to_string(),
            key: key.to_string(),
            status: res.status,
            size: content_length(&res),
            last_modified: res.header("last-modified").and_then(parse_http_date),
            etag: res.etag().map(str::to_string),
            content_type: res.header("content-type").map(str::to_string),
            request_id: res.header("x-oss-request-id").map(str::to_string),
            headers: res.headers,
        })
    }

    /// Size of an existing object; non-200 is an error
    pub async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        let res = self.head(bucket, key).await?;
        if res.status != 200 {
            return Err(Error::from_status(res.status, format!("oss://{bucket}/{key}")));
        }
        content_length(&res)
            .ok_or_else(|| Error::Parse(format!("No Content-Length for oss://{bucket}/{key}")))
    }

    /// Server-side copy, returning the raw response
    pub async fn copy(&self, source: &ObjectRef, dest: &ObjectRef) -> Result<HttpResponse> {
        let spec = RequestSpec::new(Method::Put, &dest.bucket, &dest.key)
            .header(COPY_SOURCE_HEADER, source.resource());
        self.execute(spec).await
    }

    /// Server-side copy; anything but 200 is an error
    pub async fn copy_object(&self, source: &ObjectRef, dest: &ObjectRef) -> Result<CopyOutcome> {
        let dest = dest.with_default_name(source.basename());
        let res = self.copy(source, &dest).await?;
        if res.status != 200 {
            return Err(Error::from_status(res.status, res.body_text()));
        }
        let parsed: CopyObjectResult = if res.body.is_empty() {
            CopyObjectResult::default()
        } else {
            xml::parse(&res.body)?
        };
        Ok(CopyOutcome {
            status: res.status,
            bucket: dest.bucket,
            key: dest.key,
            etag: parsed.etag.or_else(|| res.etag().map(str::to_string)),
            last_modified: parsed.last_modified,
        })
    }

    /// DELETE an object, returning the raw response
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<HttpResponse> {
        self.execute(RequestSpec::new(Method::Delete, bucket, key))
            .await
    }

    /// DELETE an object; anything but 204 is an error
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<DeleteOutcome> {
        let res = self.delete(bucket, key).await?;
        if res.status != 204 {
            return Err(Error::from_status(res.status, res.body_text()));
        }
        Ok(DeleteOutcome {
            status: res.status,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// GET an inclusive byte range, returning the raw response
    pub async fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<HttpResponse> {
        let spec = RequestSpec::new(Method::Get, bucket, key)
            .header("Range", format!("bytes={start}-{end}"));
        self.execute(spec).await
    }
}

/// Split an optional `http://` / `https://` prefix off the configured host
fn split_host(raw: &str) -> (&'static str, String) {
    let raw = raw.trim().trim_end_matches('/');
    if let Some(rest) = raw.strip_prefix("https://") {
        ("https", rest.to_string())
    } else if let Some(rest) = raw.strip_prefix("http://") {
        ("http", rest.to_string())
    } else {
        ("http", raw.to_string())
    }
}

/// MIME type guessed from the key's extension, empty when unknown
pub fn content_type(key: &str) -> String {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or_default()
        .to_string()
}

/// `Content-Disposition` value that makes browsers download as `name`
pub fn disposition_value(name: &str) -> String {
    format!("attachment; filename=\"{name}\"")
}

pub(crate) fn content_length(res: &HttpResponse) -> Option<u64> {
    res.header("content-length").and_then(|v| v.trim().parse().ok())
}

pub(crate) fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(format!("No file name in {}", path.display())))
}

/// Everything but RFC 3986 unreserved characters
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// As [`QUERY_VALUE`], with `/` left as the path separator
const OBJECT_KEY: &AsciiSet = &QUERY_VALUE.remove(b'/');

/// Percent-encode an object key for the request path, keeping `/`
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, OBJECT_KEY).to_string()
}

/// Percent-encode a query parameter value
pub fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}
