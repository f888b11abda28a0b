//! Error types for tagfs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("tag still applies to files: {0}")]
    NotEmpty(String),

    #[error("illegal name: {0}")]
    IllegalName(String),

    #[error("invalid operation: {0}")]
    Invalid(String),

    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("permission denied: {0}")]
    Denied(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state error: {0}")]
    State(String),
}

impl TagError {
    /// The errno handed back through the FUSE reply for this error.
    pub fn errno(&self) -> i32 {
        match self {
            TagError::NotFound(_) => libc::ENOENT,
            TagError::Exists(_) => libc::EEXIST,
            TagError::NotEmpty(_) => libc::ENOTEMPTY,
            TagError::IllegalName(_) | TagError::Invalid(_) => libc::EINVAL,
            TagError::Unsupported(_) => libc::ENOSYS,
            TagError::Denied(_) => libc::EACCES,
            TagError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => libc::ENOENT,
                std::io::ErrorKind::PermissionDenied => libc::EACCES,
                _ => libc::EIO,
            },
            TagError::Database(_) | TagError::Codec(_) | TagError::State(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, TagError>;
