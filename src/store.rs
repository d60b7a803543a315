//! Local Store boundary used by the reconciliation engine.
//!
//! The engine only ever needs three calls, all made inside one unit of work:
//! list the active versions, insert a new active version, retire a version.
//! `db::UnitOfWork` is the SQLite implementation.

use thiserror::Error;

use crate::entities::RegionalUnit;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("regional unit {local_id} is already retired")]
    AlreadyRetired { local_id: i64 },

    #[error("regional unit {local_id} not found")]
    UnitNotFound { local_id: i64 },

    #[error("stored value could not be decoded: {0}")]
    Corrupt(String),
}

pub trait UnitStore {
    /// Every version with `active = true`, as seen by this unit of work.
    fn list_active(&self) -> Result<Vec<RegionalUnit>, StoreError>;

    /// Create a new active version. `supersedes` links it to the version it replaces.
    fn insert(
        &mut self,
        external_id: i64,
        name: &str,
        supersedes: Option<i64>,
    ) -> Result<RegionalUnit, StoreError>;

    /// Flip `active` to false. Fails if the version is already retired.
    fn retire(&mut self, unit: &RegionalUnit) -> Result<(), StoreError>;
}
