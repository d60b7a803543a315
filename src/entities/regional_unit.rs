// 🗺️ Regional Unit Entity - Stable external identity + append-only versions
//
// "external_id is IDENTITY (never changes), name is a VALUE (can change)"
//
// A change in value never rewrites a row: the current version is retired and
// a new version is inserted. Every version ever observed stays in the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// REGIONAL UNIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalUnit {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Local row identifier, assigned by the store on insert
    pub local_id: i64,

    /// Identifier assigned by the external authority (stable across versions)
    pub external_id: i64,

    // ========================================================================
    // VALUES
    // ========================================================================
    pub name: String,

    /// `true` while this version is the authority's current view
    pub active: bool,

    // ========================================================================
    // VERSIONING
    // ========================================================================
    pub created_at: DateTime<Utc>,

    /// Set together with `active = false`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,

    /// Local id of the version this one replaced (supersede chain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<i64>,
}

impl RegionalUnit {
    /// Check if this version is current
    pub fn is_current(&self) -> bool {
        self.active
    }

    /// Check if this version was the current one at `time`
    pub fn was_active_at(&self, time: DateTime<Utc>) -> bool {
        if self.created_at > time {
            return false;
        }

        match self.retired_at {
            Some(retired_at) => retired_at > time,
            None => self.active,
        }
    }

    /// Name differs from what the authority reports now
    pub fn differs_from(&self, name: &str) -> bool {
        self.name != name
    }
}
