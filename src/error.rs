use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemFsError {
    #[error("no such object")]
    NotFound,

    #[error("object already exists")]
    AlreadyExists,

    #[error("not a directory")]
    NotADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("file is open")]
    FileOpen,

    #[error("share reservation conflict")]
    ShareConflict,

    #[error("stale object or handle")]
    Stale,

    #[error("buffer too small for handle")]
    TooSmall,

    #[error("operation not supported")]
    NotSupported,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("out of memory")]
    OutOfMemory,

    #[error("malformed handle")]
    BadHandle,

    #[error("file not opened for this access")]
    NotOpened,

    #[error("server fault: {0}")]
    ServerFault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MemFsError {
    /// POSIX errno equivalent, for collaborators that speak errno.
    pub fn errno(&self) -> i32 {
        match self {
            MemFsError::NotFound => libc::ENOENT,
            MemFsError::AlreadyExists => libc::EEXIST,
            MemFsError::NotADirectory => libc::ENOTDIR,
            MemFsError::NotEmpty => libc::ENOTEMPTY,
            MemFsError::FileOpen => libc::EBUSY,
            MemFsError::ShareConflict => libc::EACCES,
            MemFsError::Stale => libc::ESTALE,
            MemFsError::TooSmall => libc::ERANGE,
            MemFsError::NotSupported => libc::ENOTSUP,
            MemFsError::InvalidArgument => libc::EINVAL,
            MemFsError::OutOfMemory => libc::ENOMEM,
            MemFsError::BadHandle => libc::EBADF,
            MemFsError::NotOpened => libc::EBADF,
            MemFsError::ServerFault(_) => libc::EIO,
            MemFsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            MemFsError::Json(_) | MemFsError::Config(_) => libc::EINVAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, MemFsError>;
