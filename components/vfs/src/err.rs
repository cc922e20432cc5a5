use libc::c_int;
use snafu::{Location, Snafu};

use crate::config::ConfigError;

/// Errors that can be converted to a raw OS error (errno) by the host
/// adapter.
pub trait ToErrno {
    fn to_errno(&self) -> c_int;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum VFSError {
    #[snafu(display("file {path} not found"))]
    FileNotFound {
        path: String,
        #[snafu(implicit)]
        location: Location,
    },

    Meta {
        source: cloudraid_meta::Error,
        #[snafu(implicit)]
        location: Location,
    },

    Storage {
        source: cloudraid_storage::Error,
        #[snafu(implicit)]
        location: Location,
    },

    Config {
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },
}

impl ToErrno for VFSError {
    fn to_errno(&self) -> c_int {
        match self {
            VFSError::FileNotFound { .. } => libc::ENOENT,
            VFSError::Meta { source, .. } => meta_errno(source),
            VFSError::Storage { source, .. } => storage_errno(source),
            VFSError::Config { .. } => libc::EINVAL,
        }
    }
}

fn meta_errno(err: &cloudraid_meta::Error) -> c_int {
    use cloudraid_meta::Error;
    match err {
        Error::PathNotFound { .. } => libc::ENOENT,
        Error::AlreadyExists { .. } => libc::EEXIST,
        Error::NotADirectory { .. } => libc::ENOTDIR,
        Error::DirNotEmpty { .. } => libc::ENOTEMPTY,
        Error::ReservedPath { .. } => libc::EACCES,
        Error::MetadataTooLarge { .. } => libc::ENOSPC,
        Error::Corruption { .. } => libc::EIO,
        Error::Storage { source, .. } => storage_errno(source),
    }
}

fn storage_errno(err: &cloudraid_storage::Error) -> c_int {
    use cloudraid_storage::Error;
    match err {
        Error::StripeNotFound { .. } => libc::ENOENT,
        Error::QueueFull { .. } => libc::EAGAIN,
        Error::SpoolIo { .. } => libc::EIO,
        Error::UploaderStopped { .. } => libc::EIO,
        _ => libc::EIO,
    }
}

pub type Result<T> = std::result::Result<T, VFSError>;
