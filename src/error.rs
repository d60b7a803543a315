use thiserror::Error;

use crate::source::SourceError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure of one synchronization run. Every variant leaves the store untouched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("external source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("persistence failure (run rolled back): {0}")]
    Persistence(#[from] StoreError),

    #[error("snapshot lists external id {external_id} with conflicting names {names:?}")]
    AmbiguousSnapshot { external_id: i64, names: Vec<String> },

    #[error("synchronizer lock poisoned by an earlier panic")]
    Poisoned,
}

impl SyncError {
    pub fn is_source_failure(&self) -> bool {
        matches!(self, SyncError::SourceUnavailable(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Persistence(StoreError::Sqlite(err))
    }
}
