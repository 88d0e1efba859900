//! Multipart upload and copy
//!
//! Both follow `init -> parts -> complete`. Parts run through the
//! [`WorkerPool`] keyed by index, so out-of-order completion still leaves
//! every ETag in its slot and the completion manifest ascends 1..N.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use oc_core::{
    CompleteOutcome, Error, FailurePolicy, Method, ObjectRef, Options, Result, Transport,
    Tunables,
};

use crate::client::{content_type, disposition_value, file_name, OssClient, RequestSpec};
use crate::plan::{part_count, plan, Part};
use crate::scheduler::WorkerPool;
use crate::xml::{
    self, complete_manifest, CompleteMultipartUploadResult, CopyObjectResult,
    InitiateMultipartUploadResult,
};

/// Header that restricts a part copy to a byte range of the source
pub const COPY_SOURCE_RANGE_HEADER: &str = "x-oss-copy-source-range";

/// Multipart settings for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Part size in bytes
    pub part_size: u64,

    /// Number of concurrent part transfers
    pub concurrency: usize,

    /// Attempts per part
    pub max_attempts: u32,
}

impl MultipartConfig {
    /// Clamp the requested part size and worker count into the configured bounds
    pub fn resolve(tunables: &Tunables, options: &Options, object_size: u64) -> Self {
        let part_size = tunables.part_size(options.part_size);
        let parts = part_count(object_size, part_size);
        Self {
            part_size,
            concurrency: tunables.thread_num(
                options.thread_num,
                usize::try_from(parts).unwrap_or(usize::MAX),
            ),
            max_attempts: tunables.max_retry_num,
        }
    }
}

/// Where the bytes of each part come from
enum PartSource {
    File(PathBuf),
    Object(ObjectRef),
}

struct PartJob<T> {
    client: OssClient<T>,
    dest: ObjectRef,
    upload_id: String,
    source: PartSource,
}

impl<T: Transport + 'static> PartJob<T> {
    async fn run(&self, part: Part) -> Result<String> {
        let Self {
            client,
            dest,
            upload_id,
            source,
        } = self;
        match source {
            PartSource::File(path) => {
                let body = read_part(path, part).await?;
                client
                    .upload_part(&dest.bucket, &dest.key, upload_id, part.number(), body)
                    .await
            }
            PartSource::Object(src) => {
                client
                    .copy_part(src, &dest.bucket, &dest.key, upload_id, part)
                    .await
            }
        }
    }
}

async fn read_part(path: &Path, part: Part) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(part.start)).await?;
    let len = usize::try_from(part.size())
        .map_err(|_| Error::InvalidArgument(format!("Part size {} too large", part.size())))?;
    let mut body = vec![0u8; len];
    file.read_exact(&mut body).await?;
    Ok(body)
}

fn part_subresource(part_number: usize, upload_id: &str) -> String {
    format!("partNumber={part_number}&uploadId={upload_id}")
}

impl<T: Transport + 'static> OssClient<T> {
    /// Open an upload session and return its upload id
    pub async fn init_multipart(
        &self,
        bucket: &str,
        key: &str,
        disposition: Option<&str>,
    ) -> Result<String> {
        let mut spec = RequestSpec::new(Method::Post, bucket, key)
            .subresource("uploads")
            .header("Content-Type", content_type(key));
        if let Some(name) = disposition {
            spec = spec.header("Content-Disposition", disposition_value(name));
        }

        let res = self.execute(spec).await?;
        if !res.is_success() {
            return Err(Error::Init(format!(
                "status {}: {}",
                res.status,
                res.body_text()
            )));
        }
        let parsed: InitiateMultipartUploadResult =
            xml::parse(&res.body).map_err(|e| Error::Init(e.to_string()))?;
        if parsed.upload_id.is_empty() {
            return Err(Error::Init("response carried no UploadId".into()));
        }
        debug!(bucket, key, upload_id = %parsed.upload_id, "multipart session opened");
        Ok(parsed.upload_id)
    }

    /// Upload one part and return its ETag
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: usize,
        body: Vec<u8>,
    ) -> Result<String> {
        let spec = RequestSpec::new(Method::Put, bucket, key)
            .subresource(part_subresource(part_number, upload_id))
            .header("Content-Type", content_type(key))
            .body_with_md5(body);
        let res = self.execute(spec).await?.error_for_status()?;
        res.etag()
            .map(str::to_string)
            .ok_or_else(|| Error::Parse(format!("No ETag for part {part_number}")))
    }

    /// Copy one byte range of `source` into a part and return its ETag
    pub async fn copy_part(
        &self,
        source: &ObjectRef,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part: Part,
    ) -> Result<String> {
        let spec = RequestSpec::new(Method::Put, bucket, key)
            .subresource(part_subresource(part.number(), upload_id))
            .header(crate::client::COPY_SOURCE_HEADER, source.resource())
            .header(COPY_SOURCE_RANGE_HEADER, part.range_header());
        let res = self.execute(spec).await?.error_for_status()?;

        let from_body = if res.body.is_empty() {
            None
        } else {
            xml::parse::<CopyObjectResult>(&res.body)?.etag
        };
        from_body
            .or_else(|| res.etag().map(str::to_string))
            .ok_or_else(|| Error::Parse(format!("No ETag for copied part {}", part.number())))
    }

    /// Finalize the session with the ETags in part order
    pub async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        etags: &[String],
    ) -> Result<CompleteOutcome> {
        let manifest = complete_manifest(etags);
        let spec = RequestSpec::new(Method::Post, bucket, key)
            .subresource(format!("uploadId={upload_id}"))
            .header("Content-Type", content_type(key))
            .body_with_md5(manifest.into_bytes());

        let res = self.execute(spec).await?;
        if res.status != 200 {
            return Err(Error::Completion {
                code: res.status,
                body: res.body_text(),
            });
        }
        let parsed: CompleteMultipartUploadResult = xml::parse(&res.body)?;
        info!(bucket, key, parts = etags.len(), "multipart upload completed");

        Ok(CompleteOutcome {
            location: if parsed.location.is_empty() {
                self.object_url(bucket, key)
            } else {
                parsed.location
            },
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: parsed.etag,
            parts: etags.len(),
        })
    }

    /// Upload a local file in parallel parts
    ///
    /// An empty destination key, or one ending in `/`, takes the file name.
    /// An empty file goes up as a single PUT.
    pub async fn upload_large_file(
        &self,
        local: &Path,
        dest: &ObjectRef,
        options: &Options,
    ) -> Result<CompleteOutcome> {
        let dest = dest.with_default_name(&file_name(local)?);
        let size = tokio::fs::metadata(local).await?.len();

        if size == 0 {
            let put = self
                .put_object(&dest.bucket, &dest.key, Vec::new(), options.disposition())
                .await?;
            return Ok(CompleteOutcome {
                location: put.location,
                bucket: put.bucket,
                key: put.key,
                etag: put.etag.unwrap_or_default(),
                parts: 0,
            });
        }

        self.run_multipart(dest, size, PartSource::File(local.to_path_buf()), options)
            .await
    }

    /// Server-side copy of a large object in parallel ranged parts
    ///
    /// The source size comes from a HEAD; an empty source is copied in one request.
    pub async fn copy_large_file(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        options: &Options,
    ) -> Result<CompleteOutcome> {
        let dest = dest.with_default_name(source.basename());
        let size = self.object_size(&source.bucket, &source.key).await?;

        if size == 0 {
            let copied = self.copy_object(source, &dest).await?;
            return Ok(CompleteOutcome {
                location: self.object_url(&copied.bucket, &copied.key),
                bucket: copied.bucket,
                key: copied.key,
                etag: copied.etag.unwrap_or_default(),
                parts: 0,
            });
        }

        self.run_multipart(dest, size, PartSource::Object(source.clone()), options)
            .await
    }

    async fn run_multipart(
        &self,
        dest: ObjectRef,
        size: u64,
        source: PartSource,
        options: &Options,
    ) -> Result<CompleteOutcome> {
        let settings = MultipartConfig::resolve(&self.config().tunables, options, size);
        let parts = plan(size, settings.part_size);
        let upload_id = self
            .init_multipart(&dest.bucket, &dest.key, options.disposition())
            .await?;
        info!(
            target = %dest,
            size,
            parts = parts.len(),
            part_size = settings.part_size,
            concurrency = settings.concurrency,
            "multipart transfer started"
        );

        let job = Arc::new(PartJob {
            client: self.clone(),
            dest,
            upload_id,
            source,
        });

        // Parts are never skipped: the completion needs every ETag
        let mut pool = WorkerPool::new(
            settings.concurrency,
            parts.len() as u64,
            FailurePolicy::Abort,
            settings.max_attempts,
            self.progress(),
        );
        for part in parts {
            let job = Arc::clone(&job);
            pool.submit(format!("part {}", part.number()), move || {
                let job = Arc::clone(&job);
                async move { job.run(part).await }
            })
            .await?;
        }

        let etags = pool
            .finish()
            .await?
            .into_complete()
            .ok_or_else(|| Error::General("Multipart transfer finished with missing parts".into()))?;

        self.complete_multipart(&job.dest.bucket, &job.dest.key, &job.upload_id, &etags)
            .await
    }
}
