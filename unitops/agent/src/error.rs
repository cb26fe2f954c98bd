use std::{io, process::ExitStatus};

use thiserror::Error;

pub type StorageResult<T, E = StorageError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store failed: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("invalid object key `{key}`: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: object_store::path::Error,
    },

    #[error("io error on `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("storage is misconfigured: {0}")]
    Config(String),
}

pub type ExecutorResult<T, E = ExecutorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The program could not be started at all (missing binary, permissions).
    #[error("failed to start `{name}` ({program}): {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited unsuccessfully, `stderr` holds the tail of its log.
    #[error("`{name}` ({program}) exited with {status}: {stderr}")]
    Exit {
        name: String,
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{context}: {source}")]
    StreamIo {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write stderr log `{path}`: {source}")]
    Log {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("`{name}` was cancelled")]
    Cancelled { name: String },

    #[error("background task of `{name}` failed: {source}")]
    Task {
        name: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl ExecutorError {
    pub(crate) fn stream_io(context: impl Into<String>, source: io::Error) -> Self {
        Self::StreamIo {
            context: context.into(),
            source,
        }
    }
}
