//! Bulk operations over directories and buckets
//!
//! Each enumerates its work items, drives them through the [`WorkerPool`]
//! and reports an [`Aggregate`]. An attempt that got any response counts as
//! done; only a 200 counts as `finish`, so other statuses surface as `fail`.
//!
//! Skip-if-unchanged compares size and modification time only. A changed
//! file with the same size and an older timestamp is skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jiff::Timestamp;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use oc_core::{Aggregate, Error, HttpResponse, Method, ObjectRef, Options, Result, Transport};

use crate::client::{content_length, OssClient, RequestSpec};
use crate::listing::ListParams;
use crate::scheduler::{Tally, WorkerPool};
use crate::signer::parse_http_date;
use crate::xml::delete_body;

/// Keys per multi-delete request
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Whether a destination with `dest_size`/`dest_time` is current for a source
/// with `src_size`/`src_time`. Compared at whole-second precision.
pub fn is_up_to_date(
    src_size: u64,
    src_time: Timestamp,
    dest_size: u64,
    dest_time: Timestamp,
) -> bool {
    src_size == dest_size && dest_time.as_second() >= src_time.as_second()
}

fn remote_stat(res: &HttpResponse) -> Option<(u64, Timestamp)> {
    if res.status != 200 {
        return None;
    }
    let size = content_length(res)?;
    let modified = res.header("last-modified").and_then(parse_http_date)?;
    Some((size, modified))
}

/// Regular files under `root` as `/`-separated relative names, filtered by suffix
pub fn collect_files(root: &Path, options: &Options) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(Error::InvalidPath(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if options.suffix_allowed(&name) {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

struct DirUpload<T> {
    client: OssClient<T>,
    root: PathBuf,
    dest: ObjectRef,
    replace: bool,
    tally: Arc<Tally>,
}

impl<T: Transport + 'static> DirUpload<T> {
    async fn run(&self, name: &str) -> Result<()> {
        let local = self.root.join(name);
        let target = self.dest.join(name);

        if !self.replace {
            let meta = tokio::fs::metadata(&local).await?;
            let local_time = Timestamp::try_from(meta.modified()?)
                .map_err(|e| Error::General(format!("Bad modification time on {name}: {e}")))?;
            let head = self.client.head(&target.bucket, &target.key).await?;
            if let Some((size, remote_time)) = remote_stat(&head) {
                if is_up_to_date(meta.len(), local_time, size, remote_time) {
                    debug!(file = name, "destination up to date, skipping");
                    self.tally.skip();
                    return Ok(());
                }
            }
        }

        let body = tokio::fs::read(&local).await?;
        let res = self
            .client
            .put(&target.bucket, &target.key, body, Some(name))
            .await?;
        if res.status == 200 {
            self.tally.finish();
        } else {
            warn!(file = name, status = res.status, "upload rejected");
        }
        Ok(())
    }
}

struct BucketCopy<T> {
    client: OssClient<T>,
    dest: ObjectRef,
    replace: bool,
    tally: Arc<Tally>,
}

impl<T: Transport + 'static> BucketCopy<T> {
    async fn run(&self, source: &ObjectRef) -> Result<()> {
        let target = self.dest.join(source.basename());

        if !self.replace {
            let dest_head = self.client.head(&target.bucket, &target.key).await?;
            if let Some((dest_size, dest_time)) = remote_stat(&dest_head) {
                let src_head = self.client.head(&source.bucket, &source.key).await?;
                if let Some((src_size, src_time)) = remote_stat(&src_head) {
                    if is_up_to_date(src_size, src_time, dest_size, dest_time) {
                        debug!(source = %source, "destination up to date, skipping");
                        self.tally.skip();
                        return Ok(());
                    }
                }
            }
        }

        let res = self.client.copy(source, &target).await?;
        if res.status == 200 {
            self.tally.finish();
        } else {
            warn!(source = %source, status = res.status, "copy rejected");
        }
        Ok(())
    }
}

impl<T: Transport + 'static> OssClient<T> {
    /// Pool sized for `items` known items, or open-ended when `None`
    fn bulk_pool(&self, options: &Options, items: Option<usize>) -> WorkerPool<()> {
        let tunables = &self.config().tunables;
        WorkerPool::new(
            tunables.thread_num(options.thread_num, items.unwrap_or(usize::MAX)),
            items.unwrap_or(0) as u64,
            options.failure_policy.unwrap_or(tunables.failure_policy),
            tunables.max_retry_num,
            self.progress(),
        )
    }

    /// Upload every file under `local_dir` to keys under `dest`
    ///
    /// Files whose destination has the same size and is not older are
    /// skipped unless `replace` is set.
    pub async fn upload_from_dir(
        &self,
        local_dir: &Path,
        dest: &ObjectRef,
        options: &Options,
    ) -> Result<Aggregate> {
        let files = collect_files(local_dir, options)?;
        let total = files.len() as u64;
        info!(dir = %local_dir.display(), target = %dest, files = total, "directory upload started");

        let tally = Tally::new();
        let job = Arc::new(DirUpload {
            client: self.clone(),
            root: local_dir.to_path_buf(),
            dest: dest.clone(),
            replace: options.replace,
            tally: Arc::clone(&tally),
        });

        let mut pool = self.bulk_pool(options, Some(files.len()));
        for name in files {
            let job = Arc::clone(&job);
            pool.submit(name.clone(), move || {
                let job = Arc::clone(&job);
                let name = name.clone();
                async move { job.run(&name).await }
            })
            .await?;
        }
        pool.finish().await?;

        let aggregate = tally.aggregate(total, true);
        info!(total, finish = aggregate.finish, skip = ?aggregate.skip, "directory upload finished");
        Ok(aggregate)
    }

    /// Server-side copy of every object under `source` into `dest`
    ///
    /// The destination key is `dest` prefix + source basename. Pages of 1000
    /// are listed one at a time; a page is fully processed before the next
    /// is fetched.
    pub async fn copy_bucket(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        options: &Options,
    ) -> Result<Aggregate> {
        let tally = Tally::new();
        let job = Arc::new(BucketCopy {
            client: self.clone(),
            dest: dest.clone(),
            replace: options.replace,
            tally: Arc::clone(&tally),
        });

        let mut pool = self.bulk_pool(options, None);
        let mut pages = self.paginate(&source.bucket, ListParams::prefix(&source.key));
        let mut total = 0u64;

        while let Some(page) = pages.next_page().await? {
            total += page.entries.len() as u64;
            pool.add_total(page.entries.len() as u64);
            for entry in page.entries {
                let object = ObjectRef::new(source.bucket.clone(), entry.key);
                let job = Arc::clone(&job);
                pool.submit(object.to_string(), move || {
                    let job = Arc::clone(&job);
                    let object = object.clone();
                    async move { job.run(&object).await }
                })
                .await?;
            }
            pool.drain().await?;
        }
        pool.finish().await?;

        let aggregate = tally.aggregate(total, true);
        info!(source = %source, target = %dest, total, finish = aggregate.finish, "bucket copy finished");
        Ok(aggregate)
    }

    /// Delete every object under a prefix with batched multi-delete requests
    ///
    /// The whole listing is collected first, then sent in batches of at most
    /// 1000 keys. There is no skip outcome.
    pub async fn delete_all_objects(&self, target: &ObjectRef, options: &Options) -> Result<Aggregate> {
        let mut keys = Vec::new();
        let mut pages = self.paginate(&target.bucket, ListParams::prefix(&target.key));
        while let Some(page) = pages.next_page().await? {
            keys.extend(page.entries.into_iter().map(|e| e.key));
        }
        let total = keys.len() as u64;
        let tally = Tally::new();
        if keys.is_empty() {
            return Ok(tally.aggregate(0, false));
        }

        let batches: Vec<Vec<String>> = keys
            .chunks(DELETE_BATCH_SIZE)
            .map(<[String]>::to_vec)
            .collect();
        info!(target = %target, total, batches = batches.len(), "delete started");

        let mut pool = self.bulk_pool(options, Some(batches.len()));
        for (index, batch) in batches.into_iter().enumerate() {
            let client = self.clone();
            let bucket = target.bucket.clone();
            let tally = Arc::clone(&tally);
            let count = batch.len() as u64;
            let body = Arc::new(delete_body(&batch).into_bytes());
            pool.submit(format!("delete batch {}", index + 1), move || {
                let client = client.clone();
                let bucket = bucket.clone();
                let tally = Arc::clone(&tally);
                let body = Arc::clone(&body);
                async move {
                    let res = client.delete_multiple(&bucket, body.to_vec()).await?;
                    if res.status == 200 {
                        tally.add_finished(count);
                    } else {
                        warn!(bucket = %bucket, status = res.status, "multi-delete rejected");
                    }
                    Ok(())
                }
            })
            .await?;
        }
        pool.finish().await?;

        Ok(tally.aggregate(total, false))
    }

    /// POST one quiet multi-delete body, returning the raw response
    pub async fn delete_multiple(&self, bucket: &str, body: Vec<u8>) -> Result<HttpResponse> {
        let spec = RequestSpec::new(Method::Post, bucket, "")
            .subresource("delete")
            .body_with_md5(body);
        self.execute(spec).await
    }
}
