use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use bytes::Bytes;
use cloudraid_codec::ErasureCoder;
use cloudraid_common::StripeId;
use futures::future::join_all;
use snafu::ResultExt;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::backend::ChunkBackendRef;
use crate::err::{
    BackendCountMismatchSnafu, DecodeSnafu, EncodeSnafu, InvalidGeometrySnafu, Result,
    StripeNotFoundSnafu, StripeUnrecoverableSnafu, WriteChunkSnafu,
};

/// Outcome of one backend call inside a fan-out.
#[derive(Debug, Clone)]
pub struct BackendStats {
    pub backend: String,
    pub elapsed: Duration,
    pub success: bool,
}

/// Timing of the last whole-stripe fan-out.
#[derive(Debug, Clone)]
pub struct FanoutStats {
    pub total_elapsed: Duration,
    pub backends: Vec<BackendStats>,
}

/// The RAID dispatcher: encodes a stripe into k+m chunks and fans them out
/// to one backend each, in parallel. Reads tolerate up to m missing chunks
/// and schedule a background repair for whatever was absent.
///
/// Operations are whole-stripe only; the engine has no global view of
/// backend health and treats every call independently.
pub struct RaidStore {
    backends: Vec<ChunkBackendRef>,
    coder: ErasureCoder,
    repair_tasks: TaskTracker,
    last_write_stats: Mutex<Option<FanoutStats>>,
    last_read_stats: Mutex<Option<FanoutStats>>,
}

impl RaidStore {
    pub fn new(backends: Vec<ChunkBackendRef>, k: usize, m: usize) -> Result<Self> {
        let coder = ErasureCoder::new(k, m).context(InvalidGeometrySnafu)?;
        snafu::ensure!(
            backends.len() == coder.total_chunks(),
            BackendCountMismatchSnafu {
                got: backends.len(),
                expected: coder.total_chunks(),
            }
        );
        Ok(Self {
            backends,
            coder,
            repair_tasks: TaskTracker::new(),
            last_write_stats: Mutex::new(None),
            last_read_stats: Mutex::new(None),
        })
    }

    pub fn data_chunks(&self) -> usize {
        self.coder.data_chunks()
    }

    pub fn parity_chunks(&self) -> usize {
        self.coder.parity_chunks()
    }

    pub fn total_chunks(&self) -> usize {
        self.coder.total_chunks()
    }

    pub fn last_write_stats(&self) -> Option<FanoutStats> {
        self.last_write_stats.lock().unwrap().clone()
    }

    pub fn last_read_stats(&self) -> Option<FanoutStats> {
        self.last_read_stats.lock().unwrap().clone()
    }

    /// Encode `payload` and write all k+m chunks in parallel. Succeeds only
    /// if every backend accepted its chunk; a partial failure is surfaced
    /// and the successful peers are left in place.
    pub async fn write_stripe(&self, stripe_id: StripeId, payload: Bytes) -> Result<()> {
        let chunks = self.coder.encode(&payload).context(EncodeSnafu { stripe_id })?;

        let start = Instant::now();
        let writes = self
            .backends
            .iter()
            .zip(chunks)
            .enumerate()
            .map(|(i, (backend, chunk))| async move {
                let begin = Instant::now();
                let res = backend.write_chunk(stripe_id, i, chunk).await;
                (i, begin.elapsed(), res)
            });
        let results = join_all(writes).await;

        let stats = FanoutStats {
            total_elapsed: start.elapsed(),
            backends: results
                .iter()
                .map(|(i, elapsed, res)| BackendStats {
                    backend: self.backends[*i].name().to_string(),
                    elapsed: *elapsed,
                    success: res.is_ok(),
                })
                .collect(),
        };
        debug!(
            stripe_id,
            elapsed_ms = stats.total_elapsed.as_millis() as u64,
            "stripe write fan-out"
        );
        *self.last_write_stats.lock().unwrap() = Some(stats);

        for (i, elapsed, res) in results {
            match res {
                Ok(()) => {
                    debug!(
                        stripe_id,
                        chunk_index = i,
                        backend = self.backends[i].name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "chunk written"
                    );
                }
                Err(e) => {
                    return Err(e).context(WriteChunkSnafu {
                        backend: self.backends[i].name().to_string(),
                        stripe_id,
                        chunk_index: i,
                    });
                }
            }
        }
        Ok(())
    }

    /// Read all chunks in parallel and decode from the survivors. Absent or
    /// wrong-length chunks are repaired in the background once the payload
    /// is recovered; repair failures are logged, never surfaced.
    pub async fn read_stripe(self: &Arc<Self>, stripe_id: StripeId) -> Result<Bytes> {
        let total = self.total_chunks();
        let start = Instant::now();
        let reads = self.backends.iter().enumerate().map(|(i, backend)| async move {
            let begin = Instant::now();
            let res = backend.read_chunk(stripe_id, i).await;
            (i, begin.elapsed(), res)
        });
        let results = join_all(reads).await;

        let stats = FanoutStats {
            total_elapsed: start.elapsed(),
            backends: results
                .iter()
                .map(|(i, elapsed, res)| BackendStats {
                    backend: self.backends[*i].name().to_string(),
                    elapsed: *elapsed,
                    success: matches!(res, Ok(Some(_))),
                })
                .collect(),
        };
        debug!(
            stripe_id,
            elapsed_ms = stats.total_elapsed.as_millis() as u64,
            "stripe read fan-out"
        );
        *self.last_read_stats.lock().unwrap() = Some(stats);

        let mut chunks = vec![Bytes::new(); total];
        let mut absent = Vec::new();
        let mut errored = 0usize;
        for (i, _elapsed, res) in results {
            match res {
                Ok(Some(data)) => chunks[i] = data,
                Ok(None) => absent.push(i),
                Err(e) => {
                    errored += 1;
                    warn!(stripe_id, chunk_index = i, "chunk read failed: {e}");
                }
            }
        }

        // A truncated or wrong-length chunk counts as absence (and gets
        // repaired); keep the most common length among the survivors.
        let mut by_len: HashMap<usize, usize> = HashMap::new();
        for c in chunks.iter().filter(|c| !c.is_empty()) {
            *by_len.entry(c.len()).or_default() += 1;
        }
        if let Some((&expected_len, _)) = by_len.iter().max_by_key(|(len, count)| (**count, **len)) {
            for (i, c) in chunks.iter_mut().enumerate() {
                if !c.is_empty() && c.len() != expected_len {
                    warn!(
                        stripe_id,
                        chunk_index = i,
                        len = c.len(),
                        expected_len,
                        "dropping wrong-length chunk"
                    );
                    *c = Bytes::new();
                    absent.push(i);
                }
            }
        }

        let available = chunks.iter().filter(|c| !c.is_empty()).count();
        if available < self.data_chunks() {
            if available == 0 && errored == 0 {
                // Every backend reported "absent": indistinguishable from
                // "never written", and reported as such.
                return StripeNotFoundSnafu { stripe_id }.fail();
            }
            return StripeUnrecoverableSnafu {
                stripe_id,
                available,
                required: self.data_chunks(),
            }
            .fail();
        }

        let payload = self.coder.decode(&chunks).context(DecodeSnafu { stripe_id })?;

        if !absent.is_empty() {
            self.spawn_repair(stripe_id, payload.clone(), absent);
        }
        Ok(payload)
    }

    /// Delete every chunk of the stripe. Non-existence counts as success at
    /// the backend layer.
    pub async fn delete_stripe(&self, stripe_id: StripeId) -> Result<()> {
        let deletes = self
            .backends
            .iter()
            .enumerate()
            .map(|(i, backend)| async move { (i, backend.delete_chunk(stripe_id, i).await) });
        for (i, res) in join_all(deletes).await {
            if let Err(e) = res {
                return Err(e).context(WriteChunkSnafu {
                    backend: self.backends[i].name().to_string(),
                    stripe_id,
                    chunk_index: i,
                });
            }
        }
        Ok(())
    }

    fn spawn_repair(self: &Arc<Self>, stripe_id: StripeId, payload: Bytes, missing: Vec<usize>) {
        let store = Arc::clone(self);
        self.repair_tasks.spawn(async move {
            let chunks = match store.coder.encode(&payload) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(stripe_id, "repair re-encode failed: {e}");
                    return;
                }
            };
            for i in missing {
                match store.backends[i]
                    .write_chunk(stripe_id, i, chunks[i].clone())
                    .await
                {
                    Ok(()) => debug!(
                        stripe_id,
                        chunk_index = i,
                        backend = store.backends[i].name(),
                        "chunk repaired"
                    ),
                    Err(e) => warn!(
                        stripe_id,
                        chunk_index = i,
                        backend = store.backends[i].name(),
                        "chunk repair failed: {e}"
                    ),
                }
            }
        });
    }

    /// Wait for in-flight repair tasks to settle.
    pub async fn close(&self) {
        self.repair_tasks.close();
        self.repair_tasks.wait().await;
    }
}
