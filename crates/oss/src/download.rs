//! Ranged downloads
//!
//! `get` fans `recv_buffer_size` ranges out over the worker pool and writes
//! each one at its own offset, so no two workers touch the same bytes.
//! `cat` walks the same ranges sequentially into a writer.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use oc_core::{DownloadOutcome, Error, HttpResponse, ObjectRef, Options, Result, Transport};

use crate::client::OssClient;
use crate::plan::{part_count, plan, Part};
use crate::scheduler::{with_retry, WorkerPool};

/// Write all of `buf` at `offset` without moving a shared cursor
#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

/// Accept only a full answer for the requested range
fn range_body(res: HttpResponse, part: Part) -> Result<Vec<u8>> {
    if res.status != 200 && res.status != 206 {
        return Err(Error::from_status(res.status, res.body_text()));
    }
    if res.body.len() as u64 != part.size() {
        return Err(Error::Connection(format!(
            "Short read for {}: got {} bytes",
            part.range_header(),
            res.body.len()
        )));
    }
    Ok(res.body)
}

/// Local target: a directory, or a path ending in a separator, gets the object's basename
fn resolve_local(local: &Path, object: &ObjectRef) -> PathBuf {
    let raw = local.to_string_lossy();
    if local.is_dir() || raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR) {
        local.join(object.basename())
    } else {
        local.to_path_buf()
    }
}

impl<T: Transport + 'static> OssClient<T> {
    /// Download an object with parallel ranged GETs
    pub async fn get_object(
        &self,
        object: &ObjectRef,
        local: &Path,
        options: &Options,
    ) -> Result<DownloadOutcome> {
        let size = self.object_size(&object.bucket, &object.key).await?;
        let local_file = resolve_local(local, object);

        let file = Arc::new(File::create(&local_file)?);
        let fetched = self
            .fetch_ranges(object, size, &file, options)
            .await
            .and_then(|()| file.sync_all().map_err(Error::from));
        if let Err(e) = fetched {
            drop(file);
            if let Err(rm) = std::fs::remove_file(&local_file) {
                warn!(file = %local_file.display(), error = %rm, "could not remove partial download");
            }
            return Err(e);
        }
        info!(object = %object, file = %local_file.display(), size, "download complete");

        Ok(DownloadOutcome {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            local_file,
            size,
        })
    }

    /// Fill `file` with every range of the object through the worker pool
    async fn fetch_ranges(
        &self,
        object: &ObjectRef,
        size: u64,
        file: &Arc<File>,
        options: &Options,
    ) -> Result<()> {
        file.set_len(size)?;

        let tunables = &self.config().tunables;
        let parts = plan(size, tunables.recv_buffer_size);
        let threads = tunables.thread_num(options.thread_num, parts.len());
        let policy = options.failure_policy.unwrap_or(tunables.failure_policy);
        debug!(object = %object, size, ranges = parts.len(), threads, "download started");

        let mut pool = WorkerPool::new(
            threads,
            parts.len() as u64,
            policy,
            tunables.max_retry_num,
            self.progress(),
        );
        for part in parts {
            let client = self.clone();
            let object = object.clone();
            let file = Arc::clone(file);
            pool.submit(part.range_header(), move || {
                let client = client.clone();
                let object = object.clone();
                let file = Arc::clone(&file);
                async move {
                    let res = client
                        .get_range(&object.bucket, &object.key, part.start, part.end)
                        .await?;
                    let body = range_body(res, part)?;
                    tokio::task::spawn_blocking(move || write_at(&file, &body, part.start))
                        .await
                        .map_err(|e| Error::General(format!("Write task failed: {e}")))??;
                    Ok(())
                }
            })
            .await?;
        }

        let report = pool.finish().await?;
        if report.failed > 0 {
            return Err(Error::General(format!(
                "{} range(s) of {} could not be downloaded",
                report.failed, object
            )));
        }
        Ok(())
    }

    /// Stream an object into `writer` with sequential ranged GETs
    ///
    /// Returns the number of bytes written.
    pub async fn cat<W>(&self, object: &ObjectRef, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let size = self.object_size(&object.bucket, &object.key).await?;
        let tunables = &self.config().tunables;
        debug!(
            object = %object,
            size,
            ranges = part_count(size, tunables.recv_buffer_size),
            "cat started"
        );

        let mut written = 0;
        for part in plan(size, tunables.recv_buffer_size) {
            let body = with_retry(&part.range_header(), tunables.max_retry_num, || async move {
                let res = self
                    .get_range(&object.bucket, &object.key, part.start, part.end)
                    .await?;
                range_body(res, part)
            })
            .await?;
            writer.write_all(&body).await?;
            written += body.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}
