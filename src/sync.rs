// 🔄 Synchronizer - One reconciliation run, start to finish
//
//   fetch snapshot → BEGIN IMMEDIATE → list active → plan → apply → audit → COMMIT
//
// The whole run holds the synchronizer lock, so runs in one process never
// interleave. Any failure after BEGIN drops the unit of work, which rolls
// back every write of the run.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::db::{list_active_units, Event, RegionalStore, UnitOfWork};
use crate::entities::ExternalUnit;
use crate::error::{Result, SyncError};
use crate::reconciliation::{
    Anomaly, AppliedMutation, Mutation, ReconciliationEngine, ReconciliationPlan, SyncResult,
};
use crate::source::ExternalSource;
use crate::store::StoreError;

const ACTOR: &str = "reconciler";

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub source: String,
    pub result: SyncResult,
    pub unchanged: usize,
    pub duplicates_retired: usize,
    pub anomalies: Vec<Anomaly>,
    pub snapshot_size: usize,
    pub snapshot_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "Sync {} from {}: {} ({} unchanged, {} anomalies)",
            self.run_id,
            self.source,
            self.result.summary(),
            self.unchanged,
            self.anomalies.len()
        )
    }
}

/// Dry-run output: what a sync would do right now
#[derive(Debug, Clone, Serialize)]
pub struct SyncPreview {
    pub source: String,
    pub snapshot_size: usize,
    pub snapshot_hash: String,
    pub plan: ReconciliationPlan,
}

/// SHA-256 over the snapshot sorted by external id, so arrival order does not matter
pub fn snapshot_hash(snapshot: &[ExternalUnit]) -> String {
    let mut sorted: Vec<&ExternalUnit> = snapshot.iter().collect();
    sorted.sort_by(|a, b| {
        a.external_id
            .cmp(&b.external_id)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut hasher = Sha256::new();
    for unit in sorted {
        hasher.update(format!("{}\t{}\n", unit.external_id, unit.name));
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// SYNCHRONIZER
// ============================================================================

pub struct Synchronizer {
    store: Mutex<RegionalStore>,
    source: Box<dyn ExternalSource>,
    engine: ReconciliationEngine,
}

impl Synchronizer {
    pub fn new(
        store: RegionalStore,
        source: Box<dyn ExternalSource>,
        engine: ReconciliationEngine,
    ) -> Self {
        Synchronizer {
            store: Mutex::new(store),
            source,
            engine,
        }
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Run one reconciliation. All-or-nothing.
    pub fn synchronize(&self) -> Result<SyncReport> {
        let mut store = self.store.lock().map_err(|_| SyncError::Poisoned)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let source = self.source.describe();

        info!(run_id = %run_id, source = %source, "synchronization started");

        match self.run(&mut store, &run_id, &source, started_at) {
            Ok(report) => {
                info!(
                    run_id = %run_id,
                    inserted = report.result.inserted,
                    updated = report.result.updated,
                    deactivated = report.result.deactivated,
                    unchanged = report.unchanged,
                    "synchronization finished"
                );
                Ok(report)
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "synchronization failed; nothing written");
                Err(err)
            }
        }
    }

    fn run(
        &self,
        store: &mut RegionalStore,
        run_id: &str,
        source: &str,
        started_at: DateTime<Utc>,
    ) -> Result<SyncReport> {
        // Fetch outside the transaction: a slow authority must not hold the write lock
        let snapshot = self.source.fetch_snapshot()?;
        let hash = snapshot_hash(&snapshot);

        let mut uow = store.begin()?;
        let (plan, outcome) = self.engine.reconcile(&mut uow, &snapshot)?;

        let mut report = SyncReport {
            run_id: run_id.to_string(),
            source: source.to_string(),
            result: outcome.result,
            unchanged: plan.unchanged,
            duplicates_retired: outcome.duplicates_retired,
            anomalies: plan.anomalies.clone(),
            snapshot_size: snapshot.len(),
            snapshot_hash: hash,
            started_at,
            finished_at: started_at,
        };

        if plan.is_empty() && plan.anomalies.is_empty() {
            // Already converged: leave the store untouched
            drop(uow);
            info!(run_id = %run_id, "mirror already matches snapshot");
            report.finished_at = Utc::now();
            return Ok(report);
        }

        for applied in &outcome.applied {
            uow.record_event(&mutation_event(run_id, applied))?;
        }

        report.finished_at = Utc::now();
        record_run_event(&mut uow, &report)?;
        uow.commit()?;

        for anomaly in &report.anomalies {
            warn!(run_id = %run_id, "{}", anomaly.describe());
        }

        Ok(report)
    }

    /// Fetch and diff without writing anything
    pub fn preview(&self) -> Result<SyncPreview> {
        let store = self.store.lock().map_err(|_| SyncError::Poisoned)?;

        let snapshot = self.source.fetch_snapshot()?;
        let active = list_active_units(store.connection())?;
        let plan = self.engine.plan(&active, &snapshot)?;

        Ok(SyncPreview {
            source: self.source.describe(),
            snapshot_size: snapshot.len(),
            snapshot_hash: snapshot_hash(&snapshot),
            plan,
        })
    }

    /// Run a read-only query against the store, serialized with sync runs
    pub fn read<T>(
        &self,
        query: impl FnOnce(&Connection) -> std::result::Result<T, StoreError>,
    ) -> Result<T> {
        let store = self.store.lock().map_err(|_| SyncError::Poisoned)?;
        Ok(query(store.connection())?)
    }
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

fn mutation_event(run_id: &str, applied: &AppliedMutation) -> Event {
    let (event_type, data) = match &applied.mutation {
        Mutation::Insert { unit } => (
            "unit_inserted",
            serde_json::json!({
                "run_id": run_id,
                "name": unit.name,
                "local_id": applied.inserted.as_ref().map(|u| u.local_id),
            }),
        ),
        Mutation::Supersede { current, name } => (
            "unit_superseded",
            serde_json::json!({
                "run_id": run_id,
                "old_name": current.name,
                "new_name": name,
                "retired_local_id": current.local_id,
                "local_id": applied.inserted.as_ref().map(|u| u.local_id),
            }),
        ),
        Mutation::Retire { current } => (
            "unit_retired",
            serde_json::json!({
                "run_id": run_id,
                "name": current.name,
                "retired_local_id": current.local_id,
            }),
        ),
        Mutation::RetireDuplicate { current, kept } => (
            "duplicate_retired",
            serde_json::json!({
                "run_id": run_id,
                "name": current.name,
                "retired_local_id": current.local_id,
                "kept_local_id": kept,
            }),
        ),
    };

    Event::new(
        event_type,
        "regional_unit",
        &applied.mutation.external_id().to_string(),
        data,
        ACTOR,
    )
}

fn record_run_event(uow: &mut UnitOfWork<'_>, report: &SyncReport) -> std::result::Result<(), StoreError> {
    let event = Event::new(
        "sync_completed",
        "sync_run",
        &report.run_id,
        serde_json::json!({
            "source": report.source,
            "inserted": report.result.inserted,
            "updated": report.result.updated,
            "deactivated": report.result.deactivated,
            "unchanged": report.unchanged,
            "duplicates_retired": report.duplicates_retired,
            "snapshot_size": report.snapshot_size,
            "snapshot_hash": report.snapshot_hash,
            "anomalies": report.anomalies,
        }),
        ACTOR,
    );
    uow.record_event(&event)
}

// ============================================================================
// TESTS
// ============================================================================
