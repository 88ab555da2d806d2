use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Unique constraint violation on insert or update.
    #[error("a user with that email or identifier already exists")]
    Duplicate,
    #[error("user {0} not found")]
    NotFound(i64),
    /// A blob expected to exist is absent (e.g. a registry row whose
    /// signature file is gone).
    #[error("no {namespace} blob stored for {key}")]
    Missing { namespace: &'static str, key: String },
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("invalid signature for {key}: {source}")]
    BadSignature { key: String, source: CodecError },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
