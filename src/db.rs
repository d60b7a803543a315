use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::entities::RegionalUnit;
use crate::store::{StoreError, UnitStore};

/// How long a connection waits on another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UNIT_COLUMNS: &str = "id, external_id, name, active, created_at, retired_at, supersedes";

/// Event for audit trail: every mutation of the mirror is an event
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Regional units (append-only version history)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS regional_units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
            created_at TEXT NOT NULL,
            retired_at TEXT,
            supersedes INTEGER REFERENCES regional_units(id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================

    // At most one active version per external id
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_units_one_active
         ON regional_units(external_id) WHERE active = 1",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_external_id ON regional_units(external_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    // ==========================================================================
    // Append-only guards
    // ==========================================================================
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS trg_units_no_delete
         BEFORE DELETE ON regional_units
         BEGIN
             SELECT RAISE(ABORT, 'regional_units is append-only');
         END;

         CREATE TRIGGER IF NOT EXISTS trg_units_immutable_values
         BEFORE UPDATE OF external_id, name, created_at, supersedes ON regional_units
         BEGIN
             SELECT RAISE(ABORT, 'regional unit values are immutable');
         END;

         CREATE TRIGGER IF NOT EXISTS trg_units_retired_final
         BEFORE UPDATE OF active, retired_at ON regional_units
         WHEN OLD.active = 0
         BEGIN
             SELECT RAISE(ABORT, 'retired regional units never change');
         END;",
    )?;

    Ok(())
}

// ============================================================================
// STORE
// ============================================================================

/// Owns the SQLite connection holding the mirror.
pub struct RegionalStore {
    conn: Connection,
}

impl RegionalStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        setup_database(&conn)?;
        Ok(RegionalStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a unit of work. `IMMEDIATE` takes the write lock up front so
    /// concurrent writers (other processes included) queue behind this run.
    pub fn begin(&mut self) -> Result<UnitOfWork<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(UnitOfWork { tx })
    }
}

/// One transaction against the mirror. Dropping it without `commit` rolls back.
pub struct UnitOfWork<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl<'c> UnitOfWork<'c> {
    pub fn record_event(&mut self, event: &Event) -> Result<(), StoreError> {
        insert_event(&self.tx, event)
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }
}

impl<'c> UnitStore for UnitOfWork<'c> {
    fn list_active(&self) -> Result<Vec<RegionalUnit>, StoreError> {
        list_active_units(&self.tx)
    }

    fn insert(
        &mut self,
        external_id: i64,
        name: &str,
        supersedes: Option<i64>,
    ) -> Result<RegionalUnit, StoreError> {
        let created_at = Utc::now();

        self.tx.execute(
            "INSERT INTO regional_units (external_id, name, active, created_at, supersedes)
             VALUES (?1, ?2, 1, ?3, ?4)",
            params![external_id, name, created_at.to_rfc3339(), supersedes],
        )?;

        Ok(RegionalUnit {
            local_id: self.tx.last_insert_rowid(),
            external_id,
            name: name.to_string(),
            active: true,
            created_at,
            retired_at: None,
            supersedes,
        })
    }

    fn retire(&mut self, unit: &RegionalUnit) -> Result<(), StoreError> {
        let changed = self.tx.execute(
            "UPDATE regional_units SET active = 0, retired_at = ?1
             WHERE id = ?2 AND active = 1",
            params![Utc::now().to_rfc3339(), unit.local_id],
        )?;

        if changed == 0 {
            let existing: Option<bool> = self
                .tx
                .query_row(
                    "SELECT active FROM regional_units WHERE id = ?1",
                    [unit.local_id],
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match existing {
                Some(_) => StoreError::AlreadyRetired {
                    local_id: unit.local_id,
                },
                None => StoreError::UnitNotFound {
                    local_id: unit.local_id,
                },
            });
        }

        Ok(())
    }
}

// ============================================================================
// QUERIES
// ============================================================================

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_unit(row: &Row<'_>) -> rusqlite::Result<RegionalUnit> {
    let created_at: String = row.get(4)?;
    let retired_at: Option<String> = row.get(5)?;

    Ok(RegionalUnit {
        local_id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        active: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
        retired_at: retired_at
            .map(|s| parse_timestamp(5, &s))
            .transpose()?,
        supersedes: row.get(6)?,
    })
}

fn query_units(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<RegionalUnit>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let units = stmt
        .query_map(params, row_to_unit)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(units)
}

/// Every version ever stored, oldest first
pub fn list_all_units(conn: &Connection) -> Result<Vec<RegionalUnit>, StoreError> {
    query_units(
        conn,
        &format!("SELECT {UNIT_COLUMNS} FROM regional_units ORDER BY id"),
        [],
    )
}

/// Current versions, ordered by external id
pub fn list_active_units(conn: &Connection) -> Result<Vec<RegionalUnit>, StoreError> {
    query_units(
        conn,
        &format!(
            "SELECT {UNIT_COLUMNS} FROM regional_units
             WHERE active = 1
             ORDER BY external_id, id"
        ),
        [],
    )
}

/// Version chain of one external id, oldest first
pub fn unit_history(conn: &Connection, external_id: i64) -> Result<Vec<RegionalUnit>, StoreError> {
    query_units(
        conn,
        &format!(
            "SELECT {UNIT_COLUMNS} FROM regional_units
             WHERE external_id = ?1
             ORDER BY id"
        ),
        [external_id],
    )
}

pub fn count_units(conn: &Connection) -> Result<i64, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM regional_units", [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_active_units(conn: &Connection) -> Result<i64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM regional_units WHERE active = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let data_json = serde_json::to_string(&event.data)
        .map_err(|e| StoreError::Corrupt(format!("event data: {e}")))?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let timestamp_str: String = row.get(1)?;
    let data_json: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: parse_timestamp(1, &timestamp_str)?,
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        actor: row.get(6)?,
    })
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Most recent events first
pub fn recent_events(conn: &Connection, limit: usize) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let events = stmt
        .query_map([limit as i64], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn count_events(conn: &Connection) -> Result<i64, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
    Ok(count)
}
