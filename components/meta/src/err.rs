use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("path {path} not found"))]
    PathNotFound {
        path: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("path {path} already exists"))]
    AlreadyExists {
        path: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("path {path} is not a directory"))]
    NotADirectory {
        path: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("directory {path} is not empty"))]
    DirNotEmpty {
        path: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("path {path} is reserved"))]
    ReservedPath {
        path: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("metadata payload of {size} bytes exceeds the reserved stripe range"))]
    MetadataTooLarge {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("metadata chain corrupted: {reason}"))]
    Corruption {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("metadata persistence failed"))]
    Storage {
        source: cloudraid_storage::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
