use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use cloudraid_common::{cal_stripe_idx, cal_stripe_offset, StripeId};
use cloudraid_meta::{AllocatorClock, MetadataStore};
use cloudraid_storage::{AsyncUploader, ChunkCache, FileCache, RaidStore};
use dashmap::DashMap;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::err::{FileNotFoundSnafu, MetaSnafu, Result, StorageSnafu};

/// Translates file I/O into whole-stripe I/O.
///
/// Reads try the chunk cache, then the uploader's spool, then the RAID
/// layer; a stripe that was never written reads as zeros. Partial writes
/// read-modify-write the stripe under a per-stripe lock, so two writers
/// can never leave a stripe with chunks from different encodings.
pub struct FileMapper {
    meta: Arc<MetadataStore>,
    raid: Arc<RaidStore>,
    allocator: Arc<AllocatorClock>,
    chunk_cache: Arc<ChunkCache>,
    file_cache: Option<Arc<FileCache>>,
    uploader: Option<Arc<AsyncUploader>>,
    stripe_size: usize,
    stripe_locks: DashMap<StripeId, Arc<Mutex<()>>>,
}

impl FileMapper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        meta: Arc<MetadataStore>,
        raid: Arc<RaidStore>,
        allocator: Arc<AllocatorClock>,
        chunk_cache: Arc<ChunkCache>,
        file_cache: Option<Arc<FileCache>>,
        uploader: Option<Arc<AsyncUploader>>,
        stripe_size: usize,
    ) -> Self {
        Self {
            meta,
            raid,
            allocator,
            chunk_cache,
            file_cache,
            uploader,
            stripe_size,
            stripe_locks: DashMap::new(),
        }
    }

    pub fn stripe_size(&self) -> usize {
        self.stripe_size
    }

    fn stripe_lock(&self, stripe_id: StripeId) -> Arc<Mutex<()>> {
        self.stripe_locks
            .entry(stripe_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn read(&self, path: &str, offset: u64, len: usize) -> Result<Bytes> {
        let size = self
            .meta
            .get_size(path)
            .ok_or_else(|| FileNotFoundSnafu { path }.build())?;
        if offset >= size {
            return Ok(Bytes::new());
        }
        let len = len.min((size - offset) as usize);
        let whole_file = offset == 0 && len as u64 == size;

        if let Some(fc) = &self.file_cache {
            if let Some(data) = fc.get(path) {
                if data.len() as u64 >= offset + len as u64 {
                    return Ok(data.slice(offset as usize..offset as usize + len));
                }
            }
        }

        let stripes = self.meta.get_stripes(path);
        let mut out = BytesMut::with_capacity(len);
        let mut pos = offset;
        let mut remaining = len;
        while remaining > 0 {
            let idx = cal_stripe_idx(pos, self.stripe_size) as usize;
            let off = cal_stripe_offset(pos, self.stripe_size);
            let take = remaining.min(self.stripe_size - off);
            match stripes.get(idx) {
                Some(&stripe_id) => {
                    let stripe = self.read_stripe_padded(stripe_id).await?;
                    out.extend_from_slice(&stripe[off..off + take]);
                }
                // Index past the allocated stripes: a hole.
                None => out.resize(out.len() + take, 0),
            }
            pos += take as u64;
            remaining -= take;
        }

        let out = out.freeze();
        if whole_file {
            if let Some(fc) = &self.file_cache {
                fc.put(path, out.clone());
            }
        }
        Ok(out)
    }

    pub async fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if let Some(fc) = &self.file_cache {
            fc.invalidate(path);
        }

        let mut pos = offset;
        let mut written = 0usize;
        while written < data.len() {
            let idx = cal_stripe_idx(pos, self.stripe_size) as usize;
            let off = cal_stripe_offset(pos, self.stripe_size);
            let take = (data.len() - written).min(self.stripe_size - off);

            while self.meta.get_stripes(path).len() <= idx {
                self.meta
                    .add_stripe(path, self.allocator.allocate())
                    .context(MetaSnafu)?;
            }
            let stripe_id = self.meta.get_stripes(path)[idx];

            let lock = self.stripe_lock(stripe_id);
            let _guard = lock.lock().await;

            let mut buf = if take == self.stripe_size {
                // Whole-stripe overwrite, nothing to read back.
                BytesMut::zeroed(self.stripe_size)
            } else {
                let current = self.read_stripe_padded(stripe_id).await?;
                BytesMut::from(&current[..])
            };
            buf[off..off + take].copy_from_slice(&data[written..written + take]);
            self.write_stripe_payload(stripe_id, buf.freeze()).await?;

            pos += take as u64;
            written += take;
        }

        self.meta
            .grow_size(path, offset + data.len() as u64)
            .context(MetaSnafu)?;
        Ok(())
    }

    /// Update the size and the stripe list; physical chunks of dropped
    /// stripes are orphaned, not deleted.
    pub async fn truncate(&self, path: &str, new_size: u64) -> Result<()> {
        if let Some(fc) = &self.file_cache {
            fc.invalidate(path);
        }
        let old_size = self.meta.get_size(path).unwrap_or(0);
        for stripe_id in self.meta.get_stripes(path) {
            self.chunk_cache.invalidate(stripe_id);
        }

        let ss = self.stripe_size as u64;
        let keep = new_size.div_ceil(ss) as usize;
        if new_size < old_size {
            let orphans = self.meta.truncate_stripes(path, keep).context(MetaSnafu)?;
            if !orphans.is_empty() {
                debug!(path, orphans = orphans.len(), "stripes orphaned by truncate");
            }
            // Zero the physical tail of the boundary stripe, so a later
            // re-extension reads zeros and not resurrected bytes.
            if new_size % ss != 0 {
                if let Some(&stripe_id) = self.meta.get_stripes(path).get(keep - 1) {
                    let lock = self.stripe_lock(stripe_id);
                    let _guard = lock.lock().await;
                    let current = self.read_stripe_padded(stripe_id).await?;
                    let mut buf = BytesMut::from(&current[..]);
                    buf[(new_size % ss) as usize..].fill(0);
                    self.write_stripe_payload(stripe_id, buf.freeze()).await?;
                }
            }
        } else if new_size > old_size {
            while self.meta.get_stripes(path).len() < keep {
                self.meta
                    .add_stripe(path, self.allocator.allocate())
                    .context(MetaSnafu)?;
            }
        }
        self.meta.set_size(path, new_size).context(MetaSnafu)?;
        Ok(())
    }

    /// Wait for the write-back queue to drain.
    pub async fn flush(&self) -> Result<()> {
        if let Some(uploader) = &self.uploader {
            uploader.flush().await;
        }
        Ok(())
    }

    /// Full-stripe payload, zero-padded to the stripe size.
    async fn read_stripe_padded(&self, stripe_id: StripeId) -> Result<Bytes> {
        if let Some(data) = self.chunk_cache.get(stripe_id) {
            return Ok(data);
        }
        if let Some(uploader) = &self.uploader {
            if let Some(data) = uploader.read_from_cache(stripe_id).await {
                return Ok(self.pad(data));
            }
        }
        match self.raid.read_stripe(stripe_id).await {
            Ok(data) => {
                let padded = self.pad(data);
                self.chunk_cache.put(stripe_id, padded.clone());
                Ok(padded)
            }
            // Allocated but never written: all zeros. A stripe with some
            // chunks present but fewer than k is NOT zero-filled; that
            // data existed and is gone, which the caller must see.
            Err(e) if e.is_not_found() => Ok(self.zeros()),
            Err(e) => Err(e).context(StorageSnafu),
        }
    }

    async fn write_stripe_payload(&self, stripe_id: StripeId, payload: Bytes) -> Result<()> {
        self.chunk_cache.invalidate(stripe_id);
        match &self.uploader {
            Some(uploader) => uploader
                .enqueue_stripe(stripe_id, &payload)
                .await
                .context(StorageSnafu)?,
            None => self
                .raid
                .write_stripe(stripe_id, payload.clone())
                .await
                .context(StorageSnafu)?,
        }
        self.chunk_cache.put(stripe_id, payload);
        Ok(())
    }

    fn pad(&self, data: Bytes) -> Bytes {
        if data.len() >= self.stripe_size {
            return data;
        }
        let mut buf = BytesMut::with_capacity(self.stripe_size);
        buf.extend_from_slice(&data);
        buf.resize(self.stripe_size, 0);
        buf.freeze()
    }

    fn zeros(&self) -> Bytes {
        Bytes::from(vec![0u8; self.stripe_size])
    }
}
