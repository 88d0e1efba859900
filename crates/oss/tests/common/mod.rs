//! In-memory OSS service for engine tests
//!
//! Verifies the signature and Content-MD5 of every request and serves
//! listing, object, copy, multipart and multi-delete calls from memory.
//! Every request is logged so tests can assert on the wire traffic.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use percent_encoding::percent_decode_str;
use url::Url;

use oc_core::{
    ClientConfig, Credentials, Error, HttpRequest, HttpResponse, Method, Result, Transport, Tunables,
};
use oc_oss::signer::{content_md5, http_date};
use oc_oss::{OssClient, Signer};

pub const HOST: &str = "oss.test";
pub const ACCESS_ID: &str = "test-id";
pub const ACCESS_SECRET: &str = "test-secret";

pub const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub modified: Timestamp,
}

impl StoredObject {
    fn etag(&self) -> String {
        format!("\"{}\"", content_md5(&self.data))
    }
}

/// One request as the service saw it
#[derive(Debug, Clone)]
pub struct Logged {
    pub method: Method,
    pub bucket: String,
    pub key: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
}

impl Logged {
    pub fn param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

#[derive(Default)]
struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<usize, (String, Vec<u8>)>,
}

enum ListItem {
    Object(String, StoredObject),
    Prefix(String),
}

impl ListItem {
    fn name(&self) -> &str {
        match self {
            ListItem::Object(key, _) | ListItem::Prefix(key) => key,
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    uploads: HashMap<String, Upload>,
    next_upload: usize,
    log: Vec<Logged>,
    /// Part numbers in the order the service received them, per manifest
    manifests: Vec<Vec<(usize, String)>>,
    delete_batches: Vec<usize>,
}

/// Shared handle; clones see the same state
#[derive(Clone, Default)]
pub struct FakeOss {
    state: Arc<Mutex<State>>,
    /// Delay part uploads so that later parts finish first
    reverse_part_order: bool,
    /// Keys containing this marker are rejected with 500 on PUT
    reject_marker: Option<String>,
    /// PUTs and GETs to keys containing this marker fail at the connection level
    drop_marker: Option<String>,
    /// Leave `NextMarker` out of truncated listings
    omit_next_marker: bool,
}

impl FakeOss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reversed_parts(mut self) -> Self {
        self.reverse_part_order = true;
        self
    }

    pub fn rejecting_puts_containing(mut self, marker: &str) -> Self {
        self.reject_marker = Some(marker.to_string());
        self
    }

    pub fn dropping_transfers_containing(mut self, marker: &str) -> Self {
        self.drop_marker = Some(marker.to_string());
        self
    }

    pub fn without_next_marker(mut self) -> Self {
        self.omit_next_marker = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>, modified: Timestamp) {
        self.state()
            .objects
            .insert((bucket.into(), key.into()), StoredObject { data, modified });
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn log(&self) -> Vec<Logged> {
        self.state().log.clone()
    }

    pub fn manifests(&self) -> Vec<Vec<(usize, String)>> {
        self.state().manifests.clone()
    }

    pub fn delete_batches(&self) -> Vec<usize> {
        self.state().delete_batches.clone()
    }

    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    fn handle(&self, req: &HttpRequest) -> HttpResponse {
        let Ok(url) = Url::parse(&req.url) else {
            return HttpResponse::new(400).with_body("InvalidURI");
        };
        let host = url.host_str().unwrap_or_default();
        let Some(bucket) = host.strip_suffix(&format!(".{HOST}")) else {
            return HttpResponse::new(400).with_body("InvalidBucketName");
        };
        let bucket = bucket.to_string();
        let key = percent_decode(url.path().trim_start_matches('/'));
        let query = url.query().unwrap_or_default().to_string();
        let subresource = is_subresource(&query).then_some(query.as_str());

        let expected = Signer::new(&Credentials::new(HOST, ACCESS_ID, ACCESS_SECRET)).sign(
            req.method,
            &req.headers,
            &bucket,
            &key,
            subresource,
        );
        if req.header("Authorization") != Some(expected.as_str()) {
            return HttpResponse::new(403).with_body("SignatureDoesNotMatch");
        }
        if req.header("Date").is_none() {
            return HttpResponse::new(403).with_body("MissingDate");
        }
        if let Some(md5) = req.header("Content-MD5") {
            if md5 != content_md5(&req.body) {
                return HttpResponse::new(400).with_body("InvalidDigest");
            }
        }

        let logged = Logged {
            method: req.method,
            bucket: bucket.clone(),
            key: key.clone(),
            query: query.clone(),
            headers: req.headers.clone(),
        };
        self.state().log.push(logged.clone());

        match req.method {
            Method::Get if key.is_empty() => self.list(&bucket, &logged),
            Method::Get => self.get(&bucket, &key, req.header("Range")),
            Method::Head => self.head(&bucket, &key),
            Method::Put => self.put(&bucket, &key, req, &logged),
            Method::Post if query == "uploads" => self.initiate(&bucket, &key),
            Method::Post if query == "delete" => self.delete_multiple(&bucket, &req.body),
            Method::Post => match logged.param("uploadId") {
                Some(id) => self.complete(&bucket, &key, &id, &req.body),
                None => HttpResponse::new(400).with_body("InvalidRequest"),
            },
            Method::Delete => {
                self.state().objects.remove(&(bucket, key));
                HttpResponse::new(204)
            }
        }
    }

    fn list(&self, bucket: &str, req: &Logged) -> HttpResponse {
        let prefix = req.param("prefix").unwrap_or_default();
        let marker = req.param("marker").unwrap_or_default();
        let delimiter = req.param("delimiter").unwrap_or_default();
        let max_keys = req
            .param("max-keys")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000usize);

        // Keys and rolled-up prefixes in key order; each counts toward max-keys
        let state = self.state();
        let mut items: Vec<ListItem> = Vec::new();
        for ((b, key), object) in &state.objects {
            if b != bucket || !key.starts_with(&prefix) || key.as_str() <= marker.as_str() {
                continue;
            }
            let rest = &key[prefix.len()..];
            match rest.find(delimiter.as_str()).filter(|_| !delimiter.is_empty()) {
                Some(at) => {
                    let common = format!("{prefix}{}", &rest[..at + delimiter.len()]);
                    let seen = matches!(items.last(), Some(ListItem::Prefix(p)) if *p == common);
                    if !seen && common.as_str() > marker.as_str() {
                        items.push(ListItem::Prefix(common));
                    }
                }
                None => items.push(ListItem::Object(key.clone(), object.clone())),
            }
        }
        let truncated = items.len() > max_keys;
        items.truncate(max_keys);

        let mut body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListBucketResult><Name>{bucket}</Name>\
             <Prefix>{prefix}</Prefix><Marker>{marker}</Marker><MaxKeys>{max_keys}</MaxKeys>\
             <Delimiter>{delimiter}</Delimiter><IsTruncated>{truncated}</IsTruncated>"
        );
        if truncated && !self.omit_next_marker {
            if let Some(last) = items.last() {
                body.push_str(&format!("<NextMarker>{}</NextMarker>", last.name()));
            }
        }
        for item in &items {
            match item {
                ListItem::Object(key, object) => body.push_str(&format!(
                    "<Contents><Key>{key}</Key><LastModified>{}</LastModified><ETag>{}</ETag>\
                     <Type>Normal</Type><Size>{}</Size><StorageClass>Standard</StorageClass></Contents>",
                    object.modified,
                    object.etag().replace('"', "&quot;"),
                    object.data.len()
                )),
                ListItem::Prefix(common) => body.push_str(&format!(
                    "<CommonPrefixes><Prefix>{common}</Prefix></CommonPrefixes>"
                )),
            }
        }
        body.push_str("</ListBucketResult>");
        HttpResponse::new(200).with_body(body)
    }

    fn get(&self, bucket: &str, key: &str, range: Option<&str>) -> HttpResponse {
        let Some(object) = self.object(bucket, key) else {
            return HttpResponse::new(404).with_body("NoSuchKey");
        };
        let Some((start, end)) = range.and_then(parse_range) else {
            return HttpResponse::new(200).with_body(object.data);
        };
        let end = end.min(object.data.len().saturating_sub(1));
        if start > end {
            return HttpResponse::new(416).with_body("InvalidRange");
        }
        HttpResponse::new(206).with_body(object.data[start..=end].to_vec())
    }

    fn head(&self, bucket: &str, key: &str) -> HttpResponse {
        match self.object(bucket, key) {
            Some(object) => HttpResponse::new(200)
                .with_header("Content-Length", object.data.len().to_string())
                .with_header("Last-Modified", http_date(object.modified).unwrap())
                .with_header("ETag", object.etag())
                .with_header("x-oss-request-id", "fake-request"),
            None => HttpResponse::new(404),
        }
    }

    fn put(&self, bucket: &str, key: &str, req: &HttpRequest, logged: &Logged) -> HttpResponse {
        if let Some(marker) = &self.reject_marker {
            if key.contains(marker.as_str()) {
                return HttpResponse::new(500).with_body("InternalError");
            }
        }

        let data = match req.header("x-oss-copy-source") {
            Some(source) => {
                let Some((src_bucket, src_key)) = source.trim_start_matches('/').split_once('/')
                else {
                    return HttpResponse::new(400).with_body("InvalidArgument");
                };
                let Some(object) = self.object(src_bucket, src_key) else {
                    return HttpResponse::new(404).with_body("NoSuchKey");
                };
                match req.header("x-oss-copy-source-range").and_then(parse_range) {
                    Some((start, end)) => object.data[start..=end].to_vec(),
                    None => object.data,
                }
            }
            None => req.body.clone(),
        };
        let etag = format!("\"{}\"", content_md5(&data));
        let copied = req.header("x-oss-copy-source").is_some();

        if let (Some(number), Some(id)) = (logged.param("partNumber"), logged.param("uploadId")) {
            let Ok(number) = number.parse::<usize>() else {
                return HttpResponse::new(400).with_body("InvalidPartNumber");
            };
            let mut state = self.state();
            let Some(upload) = state.uploads.get_mut(&id) else {
                return HttpResponse::new(404).with_body("NoSuchUpload");
            };
            upload.parts.insert(number, (etag.clone(), data));
            return if copied {
                HttpResponse::new(200).with_body(format!(
                    "<CopyPartResult><LastModified>{}</LastModified><ETag>{}</ETag></CopyPartResult>",
                    Timestamp::now(),
                    etag.replace('"', "&quot;")
                ))
            } else {
                HttpResponse::new(200).with_header("ETag", etag)
            };
        }

        self.insert(bucket, key, data, Timestamp::now());
        if copied {
            HttpResponse::new(200).with_body(format!(
                "<CopyObjectResult><LastModified>{}</LastModified><ETag>{}</ETag></CopyObjectResult>",
                Timestamp::now(),
                etag.replace('"', "&quot;")
            ))
        } else {
            HttpResponse::new(200).with_header("ETag", etag)
        }
    }

    fn initiate(&self, bucket: &str, key: &str) -> HttpResponse {
        let mut state = self.state();
        state.next_upload += 1;
        let id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            id.clone(),
            Upload {
                bucket: bucket.into(),
                key: key.into(),
                ..Default::default()
            },
        );
        HttpResponse::new(200).with_body(format!(
            "<InitiateMultipartUploadResult><Bucket>{bucket}</Bucket><Key>{key}</Key>\
             <UploadId>{id}</UploadId></InitiateMultipartUploadResult>"
        ))
    }

    fn complete(&self, bucket: &str, key: &str, id: &str, body: &[u8]) -> HttpResponse {
        let body = String::from_utf8_lossy(body);
        let manifest: Vec<(usize, String)> = body
            .split("<Part>")
            .skip(1)
            .filter_map(|part| {
                let number = between(part, "<PartNumber>", "</PartNumber>")?.parse().ok()?;
                let etag = between(part, "<ETag>", "</ETag>")?.to_string();
                Some((number, etag))
            })
            .collect();

        let mut state = self.state();
        state.manifests.push(manifest.clone());
        let Some(upload) = state.uploads.remove(id) else {
            return HttpResponse::new(404).with_body("NoSuchUpload");
        };
        if upload.bucket != bucket || upload.key != key {
            return HttpResponse::new(400).with_body("InvalidRequest");
        }

        let mut data = Vec::new();
        let mut previous = 0;
        for (number, etag) in &manifest {
            if *number <= previous {
                return HttpResponse::new(400).with_body("InvalidPartOrder");
            }
            previous = *number;
            match upload.parts.get(number) {
                Some((stored, bytes)) if stored == etag => data.extend_from_slice(bytes),
                _ => return HttpResponse::new(400).with_body("InvalidPart"),
            }
        }

        let object = StoredObject {
            data,
            modified: Timestamp::now(),
        };
        let etag = object.etag();
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), object);
        HttpResponse::new(200).with_body(format!(
            "<CompleteMultipartUploadResult><Location>http://{bucket}.{HOST}/{key}</Location>\
             <Bucket>{bucket}</Bucket><Key>{key}</Key><ETag>{}</ETag></CompleteMultipartUploadResult>",
            etag.replace('"', "&quot;")
        ))
    }

    fn delete_multiple(&self, bucket: &str, body: &[u8]) -> HttpResponse {
        let body = String::from_utf8_lossy(body);
        let keys: Vec<String> = body
            .split("<Key>")
            .skip(1)
            .filter_map(|s| s.split_once("</Key>").map(|(k, _)| k.to_string()))
            .collect();

        let mut state = self.state();
        state.delete_batches.push(keys.len());
        for key in keys {
            state.objects.remove(&(bucket.to_string(), key));
        }
        HttpResponse::new(200).with_body("<DeleteResult></DeleteResult>")
    }
}

#[async_trait]
impl Transport for FakeOss {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        if self.reverse_part_order {
            if let Some(number) = part_number(&request.url) {
                // Part 1 waits longest
                let delay = 60u64.saturating_sub(number as u64 * 10);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        if let Some(marker) = &self.drop_marker {
            let transfer = matches!(request.method, Method::Put | Method::Get);
            if transfer && request.url.contains(marker.as_str()) {
                return Err(Error::Connection("connection reset by peer".into()));
            }
        }
        Ok(self.handle(&request))
    }
}

fn is_subresource(query: &str) -> bool {
    query == "uploads"
        || query == "delete"
        || query.starts_with("partNumber=")
        || query.starts_with("uploadId=")
}

fn part_number(url: &str) -> Option<usize> {
    let query = url.split_once('?')?.1;
    let value = query.strip_prefix("partNumber=")?;
    value.split('&').next()?.parse().ok()
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn between<'a>(s: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = s.find(open)? + open.len();
    let len = s[start..].find(close)?;
    Some(&s[start..start + len])
}

fn percent_decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Tunables with the smallest part size so tests stay small
pub fn small_tunables() -> Tunables {
    Tunables {
        part_size_min: MIB as u64,
        recv_buffer_size: 64 * 1024,
        ..Default::default()
    }
}

pub fn client(fake: &FakeOss) -> OssClient<FakeOss> {
    client_with(fake, ACCESS_SECRET, small_tunables())
}

pub fn client_with(fake: &FakeOss, secret: &str, tunables: Tunables) -> OssClient<FakeOss> {
    OssClient::with_transport(
        ClientConfig::new(Credentials::new(HOST, ACCESS_ID, secret)).with_tunables(tunables),
        fake.clone(),
    )
}

/// Deterministic, non-repeating-per-part payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 4096) % 251) as u8).collect()
}
