use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EncodeError {
    #[snafu(display("invalid erasure parameters k={k}, m={m}"))]
    InvalidParameters {
        k: usize,
        m: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("only {available} chunks available, {required} required"))]
    Insufficient {
        available: usize,
        required: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("recovery matrix is singular"))]
    Singular {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("chunk {index} has length {len}, expected {expected}"))]
    ShortChunk {
        index: usize,
        len: usize,
        expected: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("expected {expected} chunks, got {got}"))]
    WrongChunkCount {
        got: usize,
        expected: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
