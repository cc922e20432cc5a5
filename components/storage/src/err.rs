use std::path::PathBuf;

use cloudraid_common::StripeId;
use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("opendal operator failed"))]
    OpenDal {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        error: opendal::Error,
    },

    #[snafu(display("got {got} backends, erasure geometry needs {expected}"))]
    BackendCountMismatch {
        got: usize,
        expected: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to encode stripe {stripe_id}"))]
    Encode {
        stripe_id: StripeId,
        source: cloudraid_codec::EncodeError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("invalid erasure parameters"))]
    InvalidGeometry {
        source: cloudraid_codec::EncodeError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to decode stripe {stripe_id}"))]
    Decode {
        stripe_id: StripeId,
        source: cloudraid_codec::DecodeError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "stripe {stripe_id} unrecoverable: {available} chunks available, {required} required"
    ))]
    StripeUnrecoverable {
        stripe_id: StripeId,
        available: usize,
        required: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("stripe {stripe_id} not found on any backend"))]
    StripeNotFound {
        stripe_id: StripeId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("backend {backend} failed on chunk {chunk_index} of stripe {stripe_id}"))]
    WriteChunk {
        backend: String,
        stripe_id: StripeId,
        chunk_index: usize,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("upload queue is full ({size} tasks)"))]
    QueueFull {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("spool i/o failed at {}", path.display()))]
    SpoolIo {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("uploader is stopped"))]
    UploaderStopped {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("stripe {stripe_id} upload incomplete: {failed_chunks} chunks failed"))]
    UploadIncomplete {
        stripe_id: StripeId,
        failed_chunks: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Error {
    /// True when a read found nothing at all, which is indistinguishable
    /// from "never written".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::StripeNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
