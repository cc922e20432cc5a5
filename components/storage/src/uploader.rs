use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use cloudraid_codec::ErasureCoder;
use cloudraid_common::{ChunkIndex, StripeId};
use dashmap::DashMap;
use snafu::{ensure, ResultExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ChunkBackendRef;
use crate::err::{
    EncodeSnafu, InvalidGeometrySnafu, QueueFullSnafu, Result, SpoolIoSnafu,
    UploadIncompleteSnafu, UploaderStoppedSnafu,
};

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Spool directory; one file per (stripe, chunk) until uploaded.
    pub cache_dir: PathBuf,
    pub worker_threads: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_queue: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/tmp/cloudraidfs_cache"),
            worker_threads: 4,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            max_queue: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploaderStats {
    pub uploaded: u64,
    pub failed: u64,
    pub queued: usize,
    pub pending_stripes: usize,
}

#[derive(Debug)]
struct UploadTask {
    stripe_id: StripeId,
    chunk_index: ChunkIndex,
    spool_path: PathBuf,
    retry_count: u32,
}

#[derive(Debug, Default)]
struct PendingStripe {
    remaining: usize,
    failed: usize,
}

/// Durable write-back. `enqueue_stripe` returns once every chunk of the
/// encoded stripe sits in the local spool directory; a pool of workers
/// drains the spool into the backends with linear-backoff retries. Spool
/// files of terminally failed chunks are kept for manual recovery, and the
/// spool is replayed by `recover_on_startup` after a crash.
pub struct AsyncUploader {
    backends: Vec<ChunkBackendRef>,
    coder: ErasureCoder,
    config: UploadConfig,

    tx: mpsc::UnboundedSender<UploadTask>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<UploadTask>>,
    queued: AtomicUsize,

    pending: Mutex<HashMap<StripeId, PendingStripe>>,
    /// Stripes whose last upload attempt left chunks behind terminally.
    failed_stripes: DashMap<StripeId, usize>,
    /// Woken on every task completion and stripe completion.
    progress: Notify,

    uploaded: AtomicU64,
    failed: AtomicU64,

    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncUploader {
    pub fn new(
        backends: Vec<ChunkBackendRef>,
        k: usize,
        m: usize,
        config: UploadConfig,
    ) -> Result<Arc<Self>> {
        let coder = ErasureCoder::new(k, m).context(InvalidGeometrySnafu)?;
        std::fs::create_dir_all(&config.cache_dir).context(SpoolIoSnafu {
            path: config.cache_dir.clone(),
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Arc::new(Self {
            backends,
            coder,
            config,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            queued: AtomicUsize::new(0),
            pending: Mutex::new(HashMap::new()),
            failed_stripes: DashMap::new(),
            progress: Notify::new(),
            uploaded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the worker pool.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return;
        }
        info!(workers = self.config.worker_threads, "starting upload workers");
        for id in 0..self.config.worker_threads {
            let uploader = Arc::clone(self);
            workers.push(tokio::spawn(async move { uploader.worker_loop(id).await }));
        }
    }

    /// Stop the workers. In-flight and already queued tasks are drained
    /// first; anything that cannot be uploaded stays in the spool and is
    /// replayed by `recover_on_startup`.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
        info!(
            uploaded = self.uploaded.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "upload workers stopped"
        );
    }

    fn spool_path(&self, stripe_id: StripeId, chunk_index: ChunkIndex) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("stripe_{stripe_id:020}_chunk_{chunk_index:02}.dat"))
    }

    /// Encode and spool a stripe. Success means the payload is durable on
    /// local disk, visible to `read_from_cache`, and will be replayed after
    /// a crash; it does NOT mean the chunks reached the backends.
    pub async fn enqueue_stripe(&self, stripe_id: StripeId, payload: &[u8]) -> Result<()> {
        ensure!(!self.cancel.is_cancelled(), UploaderStoppedSnafu);
        let size = self.queued.load(Ordering::Relaxed);
        ensure!(size < self.config.max_queue, QueueFullSnafu { size });

        let chunks = self.coder.encode(payload).context(EncodeSnafu { stripe_id })?;

        let mut written: Vec<PathBuf> = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let path = self.spool_path(stripe_id, i);
            if let Err(e) = tokio::fs::write(&path, chunk).await {
                for p in &written {
                    let _ = tokio::fs::remove_file(p).await;
                }
                return Err(e).context(SpoolIoSnafu { path });
            }
            written.push(path);
        }

        // A fresh enqueue supersedes any previous terminal failure.
        self.failed_stripes.remove(&stripe_id);
        {
            let mut pending = self.pending.lock().unwrap();
            pending.entry(stripe_id).or_default().remaining += written.len();
        }
        for (i, path) in written.into_iter().enumerate() {
            self.queued.fetch_add(1, Ordering::Relaxed);
            let _ = self.tx.send(UploadTask {
                stripe_id,
                chunk_index: i,
                spool_path: path,
                retry_count: 0,
            });
        }
        debug!(stripe_id, "stripe spooled for upload");
        Ok(())
    }

    /// Rebuild the queue from spool files left behind by a previous run.
    /// Replay is best-effort per chunk: terminally failed chunks of an old
    /// run may be the only ones present.
    pub async fn recover_on_startup(&self) -> Result<usize> {
        let mut dir = tokio::fs::read_dir(&self.config.cache_dir)
            .await
            .context(SpoolIoSnafu {
                path: self.config.cache_dir.clone(),
            })?;
        let mut recovered = 0usize;
        while let Some(entry) = dir.next_entry().await.context(SpoolIoSnafu {
            path: self.config.cache_dir.clone(),
        })? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((stripe_id, chunk_index)) = self.parse_spool_name(name) else {
                continue;
            };
            {
                let mut pending = self.pending.lock().unwrap();
                pending.entry(stripe_id).or_default().remaining += 1;
            }
            self.queued.fetch_add(1, Ordering::Relaxed);
            let _ = self.tx.send(UploadTask {
                stripe_id,
                chunk_index,
                spool_path: entry.path(),
                retry_count: 0,
            });
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "recovered unfinished uploads from spool");
        }
        Ok(recovered)
    }

    fn parse_spool_name(&self, name: &str) -> Option<(StripeId, ChunkIndex)> {
        let rest = name.strip_prefix("stripe_")?.strip_suffix(".dat")?;
        let (id, idx) = rest.split_once("_chunk_")?;
        let stripe_id: StripeId = id.parse().ok()?;
        let chunk_index: ChunkIndex = idx.parse().ok()?;
        (chunk_index < self.coder.total_chunks()).then_some((stripe_id, chunk_index))
    }

    /// Decode the stripe from spool files, if at least k are still present.
    pub async fn read_from_cache(&self, stripe_id: StripeId) -> Option<Bytes> {
        let total = self.coder.total_chunks();
        let mut chunks = vec![Bytes::new(); total];
        let mut present = 0usize;
        for (i, chunk) in chunks.iter_mut().enumerate() {
            if let Ok(data) = tokio::fs::read(self.spool_path(stripe_id, i)).await {
                if !data.is_empty() {
                    *chunk = Bytes::from(data);
                    present += 1;
                }
            }
        }
        if present < self.coder.data_chunks() {
            return None;
        }
        match self.coder.decode(&chunks) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(stripe_id, "spool decode failed: {e}");
                None
            }
        }
    }

    pub fn is_pending(&self, stripe_id: StripeId) -> bool {
        self.pending.lock().unwrap().contains_key(&stripe_id)
    }

    pub fn queue_size(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn pending_stripe_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn stats(&self) -> UploaderStats {
        UploaderStats {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queued: self.queue_size(),
            pending_stripes: self.pending_stripe_count(),
        }
    }

    /// Block until no chunk of the stripe is queued or in flight. Resolves
    /// with `UploadIncomplete` if any chunk failed terminally.
    pub async fn wait_for_stripe(&self, stripe_id: StripeId) -> Result<()> {
        self.wait_until(|| !self.is_pending(stripe_id)).await;
        if let Some(failed) = self.failed_stripes.get(&stripe_id) {
            return UploadIncompleteSnafu {
                stripe_id,
                failed_chunks: *failed,
            }
            .fail();
        }
        Ok(())
    }

    /// Block until the queue is empty and no stripe is in flight.
    pub async fn flush(&self) {
        self.wait_until(|| {
            self.queued.load(Ordering::Relaxed) == 0 && self.pending.lock().unwrap().is_empty()
        })
        .await;
    }

    async fn wait_until(&self, cond: impl Fn() -> bool) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if cond() {
                return;
            }
            notified.await;
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "upload worker running");
        while let Some(task) = self.next_task().await {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            self.process(task).await;
        }
        debug!(worker_id, "upload worker exiting");
    }

    async fn next_task(&self) -> Option<UploadTask> {
        let mut rx = self.rx.lock().await;
        if self.cancel.is_cancelled() {
            // Stopped: drain whatever is still queued, then exit.
            return rx.try_recv().ok();
        }
        tokio::select! {
            task = rx.recv() => task,
            _ = self.cancel.cancelled() => rx.try_recv().ok(),
        }
    }

    async fn process(&self, mut task: UploadTask) {
        let data = match tokio::fs::read(&task.spool_path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) => {
                warn!(
                    stripe_id = task.stripe_id,
                    chunk_index = task.chunk_index,
                    "cannot read spool file: {e}"
                );
                None
            }
        };

        let ok = match data {
            Some(data) => {
                let backend = &self.backends[task.chunk_index];
                match backend
                    .write_chunk(task.stripe_id, task.chunk_index, data)
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            stripe_id = task.stripe_id,
                            chunk_index = task.chunk_index,
                            backend = backend.name(),
                            "chunk upload failed: {e}"
                        );
                        false
                    }
                }
            }
            None => false,
        };

        if ok {
            self.uploaded.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = tokio::fs::remove_file(&task.spool_path).await {
                warn!(
                    path = %task.spool_path.display(),
                    "cannot remove uploaded spool file: {e}"
                );
            }
            self.complete_chunk(task.stripe_id, true);
            return;
        }

        task.retry_count += 1;
        if task.retry_count < self.config.max_retries {
            debug!(
                stripe_id = task.stripe_id,
                chunk_index = task.chunk_index,
                retry = task.retry_count,
                max = self.config.max_retries,
                "re-queueing failed chunk"
            );
            tokio::time::sleep(self.config.retry_delay * task.retry_count).await;
            self.queued.fetch_add(1, Ordering::Relaxed);
            let _ = self.tx.send(task);
        } else {
            warn!(
                stripe_id = task.stripe_id,
                chunk_index = task.chunk_index,
                "chunk failed after {} retries, spool file kept at {}",
                self.config.max_retries,
                task.spool_path.display()
            );
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.complete_chunk(task.stripe_id, false);
        }
    }

    /// A stripe is complete when its last chunk reaches a terminal state,
    /// success or not.
    fn complete_chunk(&self, stripe_id: StripeId, ok: bool) {
        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(p) = pending.get_mut(&stripe_id) {
                p.remaining = p.remaining.saturating_sub(1);
                if !ok {
                    p.failed += 1;
                }
                if p.remaining == 0 {
                    if p.failed > 0 {
                        self.failed_stripes.insert(stripe_id, p.failed);
                    }
                    pending.remove(&stripe_id);
                }
            }
        }
        self.progress.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChunkBackend, ObjectBackend};
    use crate::err::{Error, OpenDalSnafu};
    use crate::raid::RaidStore;
    use async_trait::async_trait;
    use cloudraid_utils::object_storage;

    fn memory_backends(n: usize) -> Vec<ChunkBackendRef> {
        (0..n)
            .map(|i| {
                Arc::new(ObjectBackend::new(
                    format!("mem-{i}"),
                    object_storage::new_memory_store("/").unwrap(),
                )) as ChunkBackendRef
            })
            .collect()
    }

    fn quick_config(dir: &std::path::Path) -> UploadConfig {
        UploadConfig {
            cache_dir: dir.to_path_buf(),
            worker_threads: 2,
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            max_queue: 10_000,
        }
    }

    fn spool_files(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn enqueue_flush_uploads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let backends = memory_backends(3);
        let uploader =
            AsyncUploader::new(backends.clone(), 2, 1, quick_config(dir.path())).unwrap();
        uploader.start();

        let payload = vec![0x5Au8; 10_000];
        uploader.enqueue_stripe(200, &payload).await.unwrap();
        uploader.flush().await;

        assert_eq!(uploader.stats().uploaded, 3);
        assert_eq!(uploader.stats().failed, 0);
        assert!(spool_files(dir.path()).is_empty());

        let raid = Arc::new(RaidStore::new(backends, 2, 1).unwrap());
        assert_eq!(&raid.read_stripe(200).await.unwrap()[..], &payload[..]);
        uploader.stop().await;
    }

    #[tokio::test]
    async fn spooled_stripe_is_readable_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let backends = memory_backends(3);
        let uploader =
            AsyncUploader::new(backends.clone(), 2, 1, quick_config(dir.path())).unwrap();
        // Workers never started: nothing reaches the backends.
        let payload = vec![7u8; 5000];
        uploader.enqueue_stripe(201, &payload).await.unwrap();

        assert!(uploader.is_pending(201));
        assert_eq!(uploader.queue_size(), 3);
        assert_eq!(
            spool_files(dir.path()),
            vec![
                "stripe_00000000000000000201_chunk_00.dat",
                "stripe_00000000000000000201_chunk_01.dat",
                "stripe_00000000000000000201_chunk_02.dat",
            ]
        );
        let got = uploader.read_from_cache(201).await.unwrap();
        assert_eq!(&got[..], &payload[..]);
        assert!(backends[0].read_chunk(201, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn crash_recovery_replays_spool() {
        let dir = tempfile::tempdir().unwrap();
        let backends = memory_backends(3);
        let payload = vec![0xA5u8; 20_000];

        // "Crash": enqueue, never start workers, drop the uploader.
        {
            let uploader =
                AsyncUploader::new(backends.clone(), 2, 1, quick_config(dir.path())).unwrap();
            uploader.enqueue_stripe(300, &payload).await.unwrap();
        }
        assert_eq!(spool_files(dir.path()).len(), 3);

        // Restart with the same spool directory.
        let uploader =
            AsyncUploader::new(backends.clone(), 2, 1, quick_config(dir.path())).unwrap();
        assert_eq!(uploader.recover_on_startup().await.unwrap(), 3);
        uploader.start();
        uploader.flush().await;
        uploader.stop().await;

        let raid = Arc::new(RaidStore::new(backends, 2, 1).unwrap());
        assert_eq!(&raid.read_stripe(300).await.unwrap()[..], &payload[..]);
        assert!(spool_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn queue_full_backpressure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = quick_config(dir.path());
        config.max_queue = 2;
        let uploader = AsyncUploader::new(memory_backends(3), 2, 1, config).unwrap();
        uploader.enqueue_stripe(1, &[1, 2, 3]).await.unwrap();
        assert!(matches!(
            uploader.enqueue_stripe(2, &[4, 5, 6]).await,
            Err(Error::QueueFull { .. })
        ));
    }

    struct FailingBackend {
        name: String,
    }

    #[async_trait]
    impl ChunkBackend for FailingBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn read_chunk(&self, _: StripeId, _: ChunkIndex) -> crate::Result<Option<Bytes>> {
            Ok(None)
        }

        async fn write_chunk(&self, _: StripeId, _: ChunkIndex, _: Bytes) -> crate::Result<()> {
            Err(opendal::Error::new(
                opendal::ErrorKind::Unexpected,
                "injected failure",
            ))
            .context(OpenDalSnafu)
        }

        async fn delete_chunk(&self, _: StripeId, _: ChunkIndex) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn terminal_failure_keeps_spool_and_fails_wait() {
        let dir = tempfile::tempdir().unwrap();
        let mut backends = memory_backends(3);
        backends[1] = Arc::new(FailingBackend {
            name: "broken".to_string(),
        });
        let uploader = AsyncUploader::new(backends, 2, 1, quick_config(dir.path())).unwrap();
        uploader.start();

        uploader.enqueue_stripe(400, &[9u8; 100]).await.unwrap();
        match uploader.wait_for_stripe(400).await {
            Err(Error::UploadIncomplete {
                stripe_id,
                failed_chunks,
                ..
            }) => {
                assert_eq!(stripe_id, 400);
                assert_eq!(failed_chunks, 1);
            }
            other => panic!("expected UploadIncomplete, got {other:?}"),
        }
        assert!(!uploader.is_pending(400));
        assert_eq!(uploader.stats().uploaded, 2);
        assert_eq!(uploader.stats().failed, 1);
        // Only the failed chunk's spool file remains for manual recovery.
        assert_eq!(
            spool_files(dir.path()),
            vec!["stripe_00000000000000000400_chunk_01.dat"]
        );
        uploader.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let backends = memory_backends(3);
        let uploader =
            AsyncUploader::new(backends.clone(), 2, 1, quick_config(dir.path())).unwrap();
        uploader.enqueue_stripe(7, &[1u8; 64]).await.unwrap();
        uploader.start();
        uploader.stop().await;
        assert!(backends[0].read_chunk(7, 0).await.unwrap().is_some());
        assert!(matches!(
            uploader.enqueue_stripe(8, &[1u8; 64]).await,
            Err(Error::UploaderStopped { .. })
        ));
    }
}
