use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cloudraid_common::{ChunkIndex, StripeId};
use cloudraid_utils::object_storage::ObjectStorage;
use opendal::ErrorKind;
use snafu::ResultExt;

use crate::err::{OpenDalSnafu, Result};

/// Uniform access to one chunk of one stripe on a single remote store.
///
/// `read_chunk` returning `None` means the chunk is absent; an empty byte
/// string is reserved for the same meaning. `delete_chunk` of a missing
/// chunk succeeds. Implementations must be thread-safe; durability of
/// acknowledged writes is the backend's responsibility.
#[async_trait]
pub trait ChunkBackend: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn read_chunk(&self, stripe_id: StripeId, chunk_index: ChunkIndex)
        -> Result<Option<Bytes>>;

    async fn write_chunk(
        &self,
        stripe_id: StripeId,
        chunk_index: ChunkIndex,
        data: Bytes,
    ) -> Result<()>;

    async fn delete_chunk(&self, stripe_id: StripeId, chunk_index: ChunkIndex) -> Result<()>;
}

pub type ChunkBackendRef = Arc<dyn ChunkBackend>;

/// A chunk backend over an opendal [Operator]. Local directories, WebDAV
/// endpoints and S3 buckets all land here; only the operator differs.
pub struct ObjectBackend {
    name: String,
    op: ObjectStorage,
}

impl ObjectBackend {
    pub fn new(name: impl Into<String>, op: ObjectStorage) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }

    fn chunk_key(stripe_id: StripeId, chunk_index: ChunkIndex) -> String {
        format!("stripes/{stripe_id:020}/{chunk_index:02}.chunk")
    }
}

#[async_trait]
impl ChunkBackend for ObjectBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_chunk(
        &self,
        stripe_id: StripeId,
        chunk_index: ChunkIndex,
    ) -> Result<Option<Bytes>> {
        let key = Self::chunk_key(stripe_id, chunk_index);
        match self.op.read(&key).await {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(OpenDalSnafu),
        }
    }

    async fn write_chunk(
        &self,
        stripe_id: StripeId,
        chunk_index: ChunkIndex,
        data: Bytes,
    ) -> Result<()> {
        let key = Self::chunk_key(stripe_id, chunk_index);
        self.op.write(&key, data).await.context(OpenDalSnafu)
    }

    async fn delete_chunk(&self, stripe_id: StripeId, chunk_index: ChunkIndex) -> Result<()> {
        let key = Self::chunk_key(stripe_id, chunk_index);
        match self.op.delete(&key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(OpenDalSnafu),
        }
    }
}
