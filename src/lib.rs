// Regional Sync - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod entities;
pub mod store;
pub mod db;
pub mod source;
pub mod error;
pub mod reconciliation;
pub mod sync;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use entities::{ExternalUnit, RegionalUnit};
pub use store::{StoreError, UnitStore};
pub use db::{
    Event, RegionalStore, UnitOfWork,
    setup_database, list_all_units, list_active_units, unit_history,
    count_units, count_active_units, count_events,
    insert_event, get_events_for_entity, recent_events,
};
pub use source::{
    ExternalSource, FileSource, HttpSource, SourceError, StaticSource,
    parse_json_snapshot,
};
pub use error::SyncError;
pub use reconciliation::{
    Anomaly, ApplyOutcome, Decision, DuplicatePolicy, Mutation,
    ReconciliationEngine, ReconciliationPlan, SyncResult,
    classify,
};
pub use sync::{SyncPreview, SyncReport, Synchronizer, snapshot_hash};
pub use config::{AppConfig, ConfigError};
pub use logging::{LogFormat, init_tracing};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
