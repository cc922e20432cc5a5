use std::{sync::Arc, sync::Mutex, time::Duration};

use bytes::Bytes;
use cloudraid_common::STRIPE_SIZE;
use cloudraid_meta::{AllocatorClock, MetadataStore};
use cloudraid_storage::{
    AsyncUploader, CacheStats, ChunkBackendRef, ChunkCache, ChunkCacheConfig, FileCache,
    FileCacheConfig, RaidStore, UploadConfig, UploaderStats,
};
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::err::{ConfigSnafu, MetaSnafu, Result, StorageSnafu};
use crate::mapper::FileMapper;

const META_SAVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct FsStats {
    pub chunk_cache: CacheStats,
    pub file_cache: Option<CacheStats>,
    pub uploader: Option<UploaderStats>,
}

pub struct CloudRaidBuilder {
    k: usize,
    m: usize,
    stripe_size: usize,
    backends: Vec<ChunkBackendRef>,
    chunk_cache: ChunkCacheConfig,
    file_cache: Option<FileCacheConfig>,
    upload: Option<UploadConfig>,
    meta_save_interval: Duration,
}

impl CloudRaidBuilder {
    pub fn backends(mut self, backends: Vec<ChunkBackendRef>) -> Self {
        self.backends = backends;
        self
    }

    pub fn stripe_size(mut self, stripe_size: usize) -> Self {
        self.stripe_size = stripe_size;
        self
    }

    pub fn chunk_cache(mut self, config: ChunkCacheConfig) -> Self {
        self.chunk_cache = config;
        self
    }

    pub fn file_cache(mut self, config: FileCacheConfig) -> Self {
        self.file_cache = Some(config);
        self
    }

    pub fn async_upload(mut self, config: UploadConfig) -> Self {
        self.upload = Some(config);
        self
    }

    pub fn meta_save_interval(mut self, interval: Duration) -> Self {
        self.meta_save_interval = interval;
        self
    }

    pub async fn build(self) -> Result<Arc<CloudRaid>> {
        let raid = Arc::new(RaidStore::new(self.backends.clone(), self.k, self.m).context(StorageSnafu)?);

        let uploader = match self.upload {
            Some(config) => {
                let uploader = AsyncUploader::new(self.backends.clone(), self.k, self.m, config)
                    .context(StorageSnafu)?;
                uploader.recover_on_startup().await.context(StorageSnafu)?;
                uploader.start();
                Some(uploader)
            }
            None => None,
        };

        let meta = Arc::new(MetadataStore::new(raid.clone(), self.stripe_size));
        meta.load().await.context(MetaSnafu)?;
        let allocator = Arc::new(AllocatorClock::new(meta.allocator_start()));

        let chunk_cache = Arc::new(ChunkCache::new(self.chunk_cache));
        let file_cache = self.file_cache.map(|cfg| Arc::new(FileCache::new(cfg)));

        let mapper = FileMapper::new(
            meta.clone(),
            raid.clone(),
            allocator,
            chunk_cache.clone(),
            file_cache.clone(),
            uploader.clone(),
            self.stripe_size,
        );

        let cancel = CancellationToken::new();
        let engine = Arc::new(CloudRaid {
            meta: meta.clone(),
            raid,
            mapper,
            uploader,
            chunk_cache,
            file_cache,
            cancel: cancel.clone(),
            background: Mutex::new(Vec::new()),
            orphan_tasks: TaskTracker::new(),
        });

        // Persist dirty metadata and sweep expired cache entries on a fixed
        // cadence; save failures are logged and retried on the next tick.
        let interval = self.meta_save_interval;
        let chunk_cache = engine.chunk_cache.clone();
        let file_cache = engine.file_cache.clone();
        let autosave = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        chunk_cache.cleanup_expired();
                        if let Some(fc) = &file_cache {
                            fc.cleanup_expired();
                        }
                        if meta.is_dirty() {
                            if let Err(e) = meta.save().await {
                                warn!("metadata autosave failed: {e}");
                            }
                        }
                    }
                }
            }
        });
        engine.background.lock().unwrap().push(autosave);

        Ok(engine)
    }
}

/// The assembled filesystem engine: the surface a POSIX host adapter
/// drives. Owns the storage stack and the background tasks.
pub struct CloudRaid {
    meta: Arc<MetadataStore>,
    raid: Arc<RaidStore>,
    mapper: FileMapper,
    uploader: Option<Arc<AsyncUploader>>,
    chunk_cache: Arc<ChunkCache>,
    file_cache: Option<Arc<FileCache>>,
    cancel: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
    orphan_tasks: TaskTracker,
}

impl CloudRaid {
    pub fn builder(k: usize, m: usize) -> CloudRaidBuilder {
        CloudRaidBuilder {
            k,
            m,
            stripe_size: STRIPE_SIZE,
            backends: Vec::new(),
            chunk_cache: ChunkCacheConfig::default(),
            file_cache: None,
            upload: None,
            meta_save_interval: META_SAVE_INTERVAL,
        }
    }

    /// Build the engine from a parsed configuration document.
    pub async fn open(config: &Config) -> Result<Arc<Self>> {
        let backends = config.build_backends().context(ConfigSnafu)?;
        let mut builder = Self::builder(config.k, config.m)
            .backends(backends)
            .chunk_cache(config.chunk_cache_config());
        if let Some(fc) = config.file_cache_config() {
            builder = builder.file_cache(fc);
        }
        if let Some(up) = config.upload_config() {
            builder = builder.async_upload(up);
        }
        builder.build().await
    }

    // ------------------------------------------------------------------
    // host adapter surface
    // ------------------------------------------------------------------

    pub async fn read(&self, path: &str, offset: u64, len: usize) -> Result<Bytes> {
        self.mapper.read(path, offset, len).await
    }

    pub async fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.mapper.write(path, offset, data).await
    }

    pub async fn truncate(&self, path: &str, new_size: u64) -> Result<()> {
        self.mapper.truncate(path, new_size).await
    }

    pub fn exists(&self, path: &str) -> bool {
        self.meta.exists(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.meta.is_dir(path)
    }

    pub fn get_size(&self, path: &str) -> Result<u64> {
        self.meta
            .get_size(path)
            .ok_or_else(|| crate::err::FileNotFoundSnafu { path }.build())
    }

    pub fn file_stripe_count(&self, path: &str) -> usize {
        self.meta.get_stripes(path).len()
    }

    pub fn create_file(&self, path: &str) -> Result<()> {
        self.meta.create_file(path).context(MetaSnafu)
    }

    /// Unlink the file. Its stripes are orphaned; physical chunks are
    /// reclaimed in the background, best-effort.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        if let Some(fc) = &self.file_cache {
            fc.invalidate(path);
        }
        let orphans = self.meta.remove_file(path).context(MetaSnafu)?;
        for stripe_id in &orphans {
            self.chunk_cache.invalidate(*stripe_id);
        }
        if !orphans.is_empty() {
            let raid = self.raid.clone();
            self.orphan_tasks.spawn(async move {
                for stripe_id in orphans {
                    if let Err(e) = raid.delete_stripe(stripe_id).await {
                        debug!(stripe_id, "orphan reclamation failed: {e}");
                    }
                }
            });
        }
        Ok(())
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        self.meta.create_dir(path).context(MetaSnafu)
    }

    pub fn remove_dir(&self, path: &str) -> Result<()> {
        self.meta.remove_dir(path).context(MetaSnafu)
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.meta.list_dir(path).context(MetaSnafu)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.meta.rename(old, new).context(MetaSnafu)?;
        if let Some(fc) = &self.file_cache {
            fc.invalidate(old);
            fc.invalidate_prefix(old);
        }
        Ok(())
    }

    /// End-to-end durability point: drains the write-back queue and
    /// persists metadata.
    pub async fn flush(&self) -> Result<()> {
        self.mapper.flush().await?;
        if let Err(e) = self.meta.save().await {
            warn!("metadata save on flush failed: {e}");
        }
        Ok(())
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            chunk_cache: self.chunk_cache.stats(),
            file_cache: self.file_cache.as_ref().map(|fc| fc.stats()),
            uploader: self.uploader.as_ref().map(|up| up.stats()),
        }
    }

    /// Cooperative shutdown: stop background work, drain the uploader,
    /// persist metadata, wait for repairs.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
        if let Some(uploader) = &self.uploader {
            uploader.flush().await;
            uploader.stop().await;
        }
        if let Err(e) = self.meta.save().await {
            warn!("metadata save on shutdown failed: {e}");
        }
        self.orphan_tasks.close();
        self.orphan_tasks.wait().await;
        self.raid.close().await;
        info!("engine shut down");
    }
}
