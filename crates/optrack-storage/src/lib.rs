//! Flat-file record storage for optrack: one JSON document per record kind,
//! written atomically and guarded by an advisory lock file.

use std::path::{Path, PathBuf};

use optrack_core::{DomainError, RecordKind};
use thiserror::Error;

mod lock;
mod record_set;
mod store;

pub use lock::{BackoffPolicy, LockOptions, StoreLock};
pub use record_set::{RecordSet, Upserted, CURRENT_SCHEMA_VERSION};
pub use store::{write_atomic, JsonStore, MemoryStore, Store};

pub const CRATE_NAME: &str = "optrack-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("{kind} #{id} not found")]
    NotFound { kind: RecordKind, id: u64 },
    #[error("store {} is busy: lock still held after {waited_ms} ms, try again", path.display())]
    Busy { path: PathBuf, waited_ms: u128 },
    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
