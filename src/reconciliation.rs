// ⚖️ Reconciliation Engine - Converge the local mirror onto the authority's snapshot
//
// Three outcomes per external id:
//   new in snapshot           → INSERT   (counts as inserted)
//   present, name changed     → SUPERSEDE: retire current + insert new version (updated)
//   active but not in snapshot → RETIRE  (deactivated)
//
// The diff is computed once, from the active set read at the start of the
// unit of work, and never re-read while mutations are being applied.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entities::{ExternalUnit, RegionalUnit};
use crate::error::{Result, SyncError};
use crate::store::UnitStore;

// ============================================================================
// SYNC RESULT
// ============================================================================

/// Counts of records created, superseded and retired-without-replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub inserted: usize,
    pub updated: usize,
    pub deactivated: usize,
}

impl SyncResult {
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deactivated == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "inserted={}, updated={}, deactivated={}",
            self.inserted, self.updated, self.deactivated
        )
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// What to do when the snapshot repeats an external id with different names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the last occurrence in arrival order and report an anomaly
    #[default]
    LastWins,

    /// Refuse the whole snapshot
    Reject,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-wins" | "last_wins" => Ok(DuplicatePolicy::LastWins),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(format!(
                "unknown duplicate policy '{other}' (expected last-wins or reject)"
            )),
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Classification of one external unit against the active lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Supersede { current: RegionalUnit },
    Unchanged,
}

pub fn classify(active_by_id: &HashMap<i64, RegionalUnit>, external: &ExternalUnit) -> Decision {
    match active_by_id.get(&external.external_id) {
        None => Decision::Insert,
        Some(current) if current.differs_from(&external.name) => Decision::Supersede {
            current: current.clone(),
        },
        Some(_) => Decision::Unchanged,
    }
}

/// One write-level step of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    Insert { unit: ExternalUnit },
    Supersede { current: RegionalUnit, name: String },
    Retire { current: RegionalUnit },
    /// Extra active version of an id that already has a representative
    RetireDuplicate { current: RegionalUnit, kept: i64 },
}

impl Mutation {
    pub fn external_id(&self) -> i64 {
        match self {
            Mutation::Insert { unit } => unit.external_id,
            Mutation::Supersede { current, .. }
            | Mutation::Retire { current }
            | Mutation::RetireDuplicate { current, .. } => current.external_id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Mutation::Insert { unit } => {
                format!("insert    {} \"{}\"", unit.external_id, unit.name)
            }
            Mutation::Supersede { current, name } => format!(
                "supersede {} \"{}\" -> \"{}\"",
                current.external_id, current.name, name
            ),
            Mutation::Retire { current } => {
                format!("retire    {} \"{}\"", current.external_id, current.name)
            }
            Mutation::RetireDuplicate { current, kept } => format!(
                "retire    {} \"{}\" (duplicate active row {}, keeping {})",
                current.external_id, current.name, current.local_id, kept
            ),
        }
    }
}

/// Irregularity found while planning. Never fatal; surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// More than one active version for one external id (earlier race or bug)
    MultipleActive {
        external_id: i64,
        local_ids: Vec<i64>,
        kept: i64,
    },

    /// Snapshot repeated an external id with different names
    DuplicateInSnapshot {
        external_id: i64,
        names: Vec<String>,
        kept: String,
    },
}

impl Anomaly {
    pub fn describe(&self) -> String {
        match self {
            Anomaly::MultipleActive {
                external_id,
                local_ids,
                kept,
            } => format!(
                "external id {external_id} had {} active rows {local_ids:?}; kept {kept}",
                local_ids.len()
            ),
            Anomaly::DuplicateInSnapshot {
                external_id,
                names,
                kept,
            } => format!(
                "snapshot repeated external id {external_id} as {names:?}; kept \"{kept}\""
            ),
        }
    }
}

// ============================================================================
// PLAN
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub mutations: Vec<Mutation>,
    pub unchanged: usize,
    pub anomalies: Vec<Anomaly>,
}

impl ReconciliationPlan {
    /// Counts the apply phase will report for this plan
    pub fn result(&self) -> SyncResult {
        let mut result = SyncResult::default();
        for mutation in &self.mutations {
            match mutation {
                Mutation::Insert { .. } => result.inserted += 1,
                Mutation::Supersede { .. } => result.updated += 1,
                Mutation::Retire { .. } => result.deactivated += 1,
                Mutation::RetireDuplicate { .. } => {}
            }
        }
        result
    }

    pub fn duplicates_retired(&self) -> usize {
        self.mutations
            .iter()
            .filter(|m| matches!(m, Mutation::RetireDuplicate { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// A mutation as it landed in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    pub mutation: Mutation,
    pub inserted: Option<RegionalUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub result: SyncResult,
    pub duplicates_retired: usize,
    pub applied: Vec<AppliedMutation>,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    pub duplicate_policy: DuplicatePolicy,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine::default()
    }

    pub fn with_policy(duplicate_policy: DuplicatePolicy) -> Self {
        ReconciliationEngine { duplicate_policy }
    }

    /// Diff phase: pure, no I/O.
    pub fn plan(
        &self,
        active: &[RegionalUnit],
        snapshot: &[ExternalUnit],
    ) -> Result<ReconciliationPlan> {
        let mut plan = ReconciliationPlan::default();

        let snapshot = self.dedupe_snapshot(snapshot, &mut plan.anomalies)?;
        let active_by_id = self.index_active(active, &snapshot, &mut plan);

        // New or changed units, in snapshot arrival order
        for external in &snapshot {
            match classify(&active_by_id, external) {
                Decision::Insert => plan.mutations.push(Mutation::Insert {
                    unit: external.clone(),
                }),
                Decision::Supersede { current } => plan.mutations.push(Mutation::Supersede {
                    current,
                    name: external.name.clone(),
                }),
                Decision::Unchanged => plan.unchanged += 1,
            }
        }

        // Active units the authority no longer reports
        let snapshot_ids: HashSet<i64> = snapshot.iter().map(|u| u.external_id).collect();
        let mut absent: Vec<&RegionalUnit> = active_by_id
            .values()
            .filter(|u| !snapshot_ids.contains(&u.external_id))
            .collect();
        absent.sort_by_key(|u| (u.external_id, u.local_id));

        for current in absent {
            plan.mutations.push(Mutation::Retire {
                current: current.clone(),
            });
        }

        debug!(
            mutations = plan.mutations.len(),
            unchanged = plan.unchanged,
            anomalies = plan.anomalies.len(),
            "reconciliation plan computed"
        );

        Ok(plan)
    }

    /// Apply phase. Every write goes through `store`; the caller owns the
    /// transaction and decides whether to commit.
    pub fn apply<S: UnitStore + ?Sized>(
        &self,
        store: &mut S,
        plan: &ReconciliationPlan,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        for mutation in &plan.mutations {
            let applied = match mutation {
                Mutation::Insert { unit } => {
                    let inserted = store.insert(unit.external_id, &unit.name, None)?;
                    outcome.result.inserted += 1;
                    info!(
                        external_id = unit.external_id,
                        name = %unit.name,
                        local_id = inserted.local_id,
                        "regional unit inserted"
                    );
                    AppliedMutation {
                        mutation: mutation.clone(),
                        inserted: Some(inserted),
                    }
                }
                Mutation::Supersede { current, name } => {
                    // Retire first: the store allows one active version per id
                    store.retire(current)?;
                    let inserted =
                        store.insert(current.external_id, name, Some(current.local_id))?;
                    outcome.result.updated += 1;
                    info!(
                        external_id = current.external_id,
                        old_name = %current.name,
                        new_name = %name,
                        "regional unit superseded"
                    );
                    AppliedMutation {
                        mutation: mutation.clone(),
                        inserted: Some(inserted),
                    }
                }
                Mutation::Retire { current } => {
                    store.retire(current)?;
                    outcome.result.deactivated += 1;
                    info!(
                        external_id = current.external_id,
                        name = %current.name,
                        "regional unit retired (absent from snapshot)"
                    );
                    AppliedMutation {
                        mutation: mutation.clone(),
                        inserted: None,
                    }
                }
                Mutation::RetireDuplicate { current, kept } => {
                    store.retire(current)?;
                    outcome.duplicates_retired += 1;
                    warn!(
                        external_id = current.external_id,
                        local_id = current.local_id,
                        kept = *kept,
                        "duplicate active regional unit retired"
                    );
                    AppliedMutation {
                        mutation: mutation.clone(),
                        inserted: None,
                    }
                }
            };

            outcome.applied.push(applied);
        }

        Ok(outcome)
    }

    /// Read the active set, plan against `snapshot`, apply. One consistency
    /// snapshot: the active set is read exactly once.
    pub fn reconcile<S: UnitStore + ?Sized>(
        &self,
        store: &mut S,
        snapshot: &[ExternalUnit],
    ) -> Result<(ReconciliationPlan, ApplyOutcome)> {
        let active = store.list_active()?;
        let plan = self.plan(&active, snapshot)?;
        let outcome = self.apply(store, &plan)?;
        Ok((plan, outcome))
    }

    /// Collapse repeated external ids according to the duplicate policy.
    /// Keeps the position of the first occurrence.
    fn dedupe_snapshot(
        &self,
        snapshot: &[ExternalUnit],
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<Vec<ExternalUnit>> {
        let mut position: HashMap<i64, usize> = HashMap::new();
        let mut units: Vec<ExternalUnit> = Vec::with_capacity(snapshot.len());
        let mut names_seen: Vec<Vec<String>> = Vec::with_capacity(snapshot.len());

        for external in snapshot {
            match position.get(&external.external_id) {
                None => {
                    position.insert(external.external_id, units.len());
                    units.push(external.clone());
                    names_seen.push(vec![external.name.clone()]);
                }
                Some(&idx) => {
                    if !names_seen[idx].contains(&external.name) {
                        names_seen[idx].push(external.name.clone());
                    }
                    // last occurrence wins
                    units[idx].name = external.name.clone();
                }
            }
        }

        for (unit, names) in units.iter().zip(names_seen) {
            if names.len() < 2 {
                continue;
            }

            match self.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(SyncError::AmbiguousSnapshot {
                        external_id: unit.external_id,
                        names,
                    });
                }
                DuplicatePolicy::LastWins => {
                    warn!(
                        external_id = unit.external_id,
                        names = ?names,
                        kept = %unit.name,
                        "snapshot repeats external id with different names"
                    );
                    anomalies.push(Anomaly::DuplicateInSnapshot {
                        external_id: unit.external_id,
                        names,
                        kept: unit.name.clone(),
                    });
                }
            }
        }

        Ok(units)
    }

    /// Build `external_id → active unit`. When an id has several active rows
    /// the newest (highest local id) is kept and the rest are scheduled for
    /// retirement.
    fn index_active(
        &self,
        active: &[RegionalUnit],
        snapshot: &[ExternalUnit],
        plan: &mut ReconciliationPlan,
    ) -> HashMap<i64, RegionalUnit> {
        let wanted: HashMap<i64, &str> = snapshot
            .iter()
            .map(|unit| (unit.external_id, unit.name.as_str()))
            .collect();

        let mut groups: HashMap<i64, Vec<&RegionalUnit>> = HashMap::new();
        for unit in active {
            groups.entry(unit.external_id).or_default().push(unit);
        }

        let mut external_ids: Vec<i64> = groups.keys().copied().collect();
        external_ids.sort_unstable();

        let mut by_id = HashMap::with_capacity(groups.len());
        for external_id in external_ids {
            let mut group = groups.remove(&external_id).unwrap_or_default();
            if group.is_empty() {
                continue;
            }
            group.sort_by_key(|u| u.local_id);

            // A row already carrying the authority's name needs no supersede;
            // otherwise the newest row stands in for the group.
            let position = wanted
                .get(&external_id)
                .and_then(|name| group.iter().rposition(|u| !u.differs_from(name)))
                .unwrap_or(group.len() - 1);
            let local_ids: Vec<i64> = group.iter().map(|u| u.local_id).collect();
            let kept = group.remove(position);

            if !group.is_empty() {
                warn!(
                    external_id,
                    local_ids = ?local_ids,
                    kept = kept.local_id,
                    "multiple active regional units share an external id"
                );
                plan.anomalies.push(Anomaly::MultipleActive {
                    external_id,
                    local_ids,
                    kept: kept.local_id,
                });

                for extra in group {
                    plan.mutations.push(Mutation::RetireDuplicate {
                        current: extra.clone(),
                        kept: kept.local_id,
                    });
                }
            }

            by_id.insert(external_id, kept.clone());
        }

        by_id
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use chrono::Utc;

    /// In-process store that records every write.
    #[derive(Default)]
    struct MemoryStore {
        rows: Vec<RegionalUnit>,
        writes: Vec<String>,
        fail_insert_named: Option<String>,
    }

    impl MemoryStore {
        fn with_active(units: &[(i64, &str)]) -> Self {
            let mut store = MemoryStore::default();
            for (external_id, name) in units {
                store.push(*external_id, name, true);
            }
            store
        }

        fn push(&mut self, external_id: i64, name: &str, active: bool) {
            let local_id = self.rows.len() as i64 + 1;
            self.rows.push(RegionalUnit {
                local_id,
                external_id,
                name: name.to_string(),
                active,
                created_at: Utc::now(),
                retired_at: None,
                supersedes: None,
            });
        }

        fn active_pairs(&self) -> Vec<(i64, String)> {
            let mut pairs: Vec<(i64, String)> = self
                .rows
                .iter()
                .filter(|u| u.active)
                .map(|u| (u.external_id, u.name.clone()))
                .collect();
            pairs.sort();
            pairs
        }
    }

    impl UnitStore for MemoryStore {
        fn list_active(&self) -> std::result::Result<Vec<RegionalUnit>, StoreError> {
            Ok(self.rows.iter().filter(|u| u.active).cloned().collect())
        }

        fn insert(
            &mut self,
            external_id: i64,
            name: &str,
            supersedes: Option<i64>,
        ) -> std::result::Result<RegionalUnit, StoreError> {
            if self.fail_insert_named.as_deref() == Some(name) {
                return Err(StoreError::Corrupt("injected failure".to_string()));
            }
            self.push(external_id, name, true);
            let row = self.rows.last_mut().unwrap();
            row.supersedes = supersedes;
            self.writes.push(format!("insert {external_id} {name}"));
            Ok(row.clone())
        }

        fn retire(&mut self, unit: &RegionalUnit) -> std::result::Result<(), StoreError> {
            let row = self
                .rows
                .iter_mut()
                .find(|u| u.local_id == unit.local_id)
                .ok_or(StoreError::UnitNotFound {
                    local_id: unit.local_id,
                })?;
            if !row.active {
                return Err(StoreError::AlreadyRetired {
                    local_id: unit.local_id,
                });
            }
            row.active = false;
            row.retired_at = Some(Utc::now());
            self.writes.push(format!("retire {}", unit.local_id));
            Ok(())
        }
    }

    fn ext(units: &[(i64, &str)]) -> Vec<ExternalUnit> {
        units
            .iter()
            .map(|(id, name)| ExternalUnit::new(*id, *name))
            .collect()
    }

    fn pairs(units: &[(i64, &str)]) -> Vec<(i64, String)> {
        let mut v: Vec<(i64, String)> = units.iter().map(|(i, n)| (*i, n.to_string())).collect();
        v.sort();
        v
    }

    #[test]
    fn test_insert_new_unit() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::default();

        let (_, outcome) = engine
            .reconcile(&mut store, &ext(&[(200, "South")]))
            .unwrap();

        assert_eq!(
            outcome.result,
            SyncResult {
                inserted: 1,
                updated: 0,
                deactivated: 0,
            }
        );
        assert_eq!(store.active_pairs(), pairs(&[(200, "South")]));
    }

    #[test]
    fn test_retire_unit_absent_from_snapshot() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North")]);

        let (_, outcome) = engine.reconcile(&mut store, &[]).unwrap();

        assert_eq!(
            outcome.result,
            SyncResult {
                inserted: 0,
                updated: 0,
                deactivated: 1,
            }
        );
        assert!(store.active_pairs().is_empty());
        assert_eq!(store.rows.len(), 1);
    }

    #[test]
    fn test_supersede_on_name_change() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North")]);

        let (_, outcome) = engine
            .reconcile(&mut store, &ext(&[(100, "North Updated")]))
            .unwrap();

        assert_eq!(
            outcome.result,
            SyncResult {
                inserted: 0,
                updated: 1,
                deactivated: 0,
            }
        );
        // retire first, then insert
        assert_eq!(store.writes, vec!["retire 1", "insert 100 North Updated"]);
        assert_eq!(store.active_pairs(), pairs(&[(100, "North Updated")]));
        assert_eq!(store.rows[1].supersedes, Some(1));
    }

    #[test]
    fn test_unchanged_unit_issues_no_writes() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North")]);

        let (plan, outcome) = engine
            .reconcile(&mut store, &ext(&[(100, "North")]))
            .unwrap();

        assert!(outcome.result.is_noop());
        assert_eq!(plan.unchanged, 1);
        assert!(store.writes.is_empty());
    }

    #[test]
    fn test_mixed_insert_update_retire() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North"), (200, "South")]);

        let (_, outcome) = engine
            .reconcile(
                &mut store,
                &ext(&[(200, "South Updated"), (300, "West New")]),
            )
            .unwrap();

        assert_eq!(
            outcome.result,
            SyncResult {
                inserted: 1,
                updated: 1,
                deactivated: 1,
            }
        );
        assert_eq!(
            store.active_pairs(),
            pairs(&[(200, "South Updated"), (300, "West New")])
        );
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North"), (200, "South")]);
        let snapshot = ext(&[(200, "South Updated"), (300, "West New")]);

        engine.reconcile(&mut store, &snapshot).unwrap();
        let writes_after_first = store.writes.len();

        let (_, second) = engine.reconcile(&mut store, &snapshot).unwrap();

        assert!(second.result.is_noop());
        assert_eq!(store.writes.len(), writes_after_first);
    }

    #[test]
    fn test_plan_result_matches_apply_result() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(1, "A"), (2, "B"), (3, "C")]);
        let snapshot = ext(&[(2, "B"), (3, "C2"), (4, "D"), (5, "E")]);

        let active = store.list_active().unwrap();
        let plan = engine.plan(&active, &snapshot).unwrap();
        let outcome = engine.apply(&mut store, &plan).unwrap();

        assert_eq!(plan.result(), outcome.result);
        assert_eq!(
            plan.result(),
            SyncResult {
                inserted: 2,
                updated: 1,
                deactivated: 1,
            }
        );
    }

    #[test]
    fn test_classify_tags_each_case() {
        let store = MemoryStore::with_active(&[(100, "North")]);
        let lookup: HashMap<i64, RegionalUnit> = store
            .rows
            .iter()
            .map(|u| (u.external_id, u.clone()))
            .collect();

        assert_eq!(classify(&lookup, &ExternalUnit::new(200, "South")), Decision::Insert);
        assert_eq!(
            classify(&lookup, &ExternalUnit::new(100, "North")),
            Decision::Unchanged
        );
        assert!(matches!(
            classify(&lookup, &ExternalUnit::new(100, "Norte")),
            Decision::Supersede { current } if current.name == "North"
        ));
    }

    #[test]
    fn test_snapshot_duplicates_last_wins() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::default();

        let (plan, outcome) = engine
            .reconcile(&mut store, &ext(&[(500, "First"), (600, "Other"), (500, "Second")]))
            .unwrap();

        assert_eq!(outcome.result.inserted, 2);
        assert_eq!(store.active_pairs(), pairs(&[(500, "Second"), (600, "Other")]));
        assert_eq!(
            plan.anomalies,
            vec![Anomaly::DuplicateInSnapshot {
                external_id: 500,
                names: vec!["First".to_string(), "Second".to_string()],
                kept: "Second".to_string(),
            }]
        );
    }

    #[test]
    fn test_identical_snapshot_duplicates_collapse_silently() {
        let engine = ReconciliationEngine::new();
        let plan = engine
            .plan(&[], &ext(&[(500, "Same"), (500, "Same")]))
            .unwrap();

        assert_eq!(plan.result().inserted, 1);
        assert!(plan.anomalies.is_empty());
    }

    #[test]
    fn test_snapshot_duplicates_rejected_by_policy() {
        let engine = ReconciliationEngine::with_policy(DuplicatePolicy::Reject);
        let mut store = MemoryStore::with_active(&[(100, "North")]);

        let err = engine
            .reconcile(&mut store, &ext(&[(500, "First"), (500, "Second")]))
            .unwrap_err();

        assert!(matches!(err, SyncError::AmbiguousSnapshot { external_id: 500, .. }));
        assert!(store.writes.is_empty());
    }

    #[test]
    fn test_multiple_active_rows_keep_newest() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North"), (100, "North Dup")]);

        let (plan, outcome) = engine
            .reconcile(&mut store, &ext(&[(100, "North Dup")]))
            .unwrap();

        assert_eq!(
            plan.anomalies,
            vec![Anomaly::MultipleActive {
                external_id: 100,
                local_ids: vec![1, 2],
                kept: 2,
            }]
        );
        assert!(outcome.result.is_noop());
        assert_eq!(outcome.duplicates_retired, 1);
        assert_eq!(store.active_pairs(), pairs(&[(100, "North Dup")]));
    }

    #[test]
    fn test_multiple_active_rows_absent_from_snapshot_all_retired() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North"), (100, "North Dup")]);

        let (_, outcome) = engine.reconcile(&mut store, &[]).unwrap();

        assert_eq!(outcome.result.deactivated, 1);
        assert_eq!(outcome.duplicates_retired, 1);
        assert!(store.active_pairs().is_empty());
    }

    #[test]
    fn test_multiple_active_rows_keep_the_one_matching_snapshot() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North"), (100, "North Dup")]);

        let (plan, outcome) = engine
            .reconcile(&mut store, &ext(&[(100, "North")]))
            .unwrap();

        assert_eq!(
            plan.anomalies,
            vec![Anomaly::MultipleActive {
                external_id: 100,
                local_ids: vec![1, 2],
                kept: 1,
            }]
        );
        assert_eq!(plan.duplicates_retired(), 1);
        assert_eq!(plan.unchanged, 1);
        assert!(outcome.result.is_noop());
        assert_eq!(store.writes, vec!["retire 2"]);
        assert_eq!(store.active_pairs(), pairs(&[(100, "North")]));
    }

    #[test]
    fn test_multiple_active_rows_without_match_supersede_newest() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North"), (100, "North Dup")]);

        let (plan, outcome) = engine
            .reconcile(&mut store, &ext(&[(100, "Norte")]))
            .unwrap();

        assert_eq!(
            plan.anomalies,
            vec![Anomaly::MultipleActive {
                external_id: 100,
                local_ids: vec![1, 2],
                kept: 2,
            }]
        );
        assert_eq!(outcome.result.updated, 1);
        assert_eq!(outcome.duplicates_retired, 1);
        assert_eq!(store.active_pairs(), pairs(&[(100, "Norte")]));
    }

    #[test]
    fn test_store_failure_propagates() {
        let engine = ReconciliationEngine::new();
        let mut store = MemoryStore::with_active(&[(100, "North")]);
        store.fail_insert_named = Some("Boom".to_string());

        let err = engine
            .reconcile(&mut store, &ext(&[(100, "North"), (200, "Boom")]))
            .unwrap_err();

        assert!(matches!(err, SyncError::Persistence(_)));
    }

    #[test]
    fn test_retire_order_is_deterministic() {
        let engine = ReconciliationEngine::new();
        let active = MemoryStore::with_active(&[(30, "C"), (10, "A"), (20, "B")])
            .list_active()
            .unwrap();

        let plan = engine.plan(&active, &[]).unwrap();
        let ids: Vec<i64> = plan.mutations.iter().map(|m| m.external_id()).collect();

        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_duplicate_policy_from_str() {
        assert_eq!("last-wins".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::LastWins);
        assert_eq!("REJECT".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Reject);
        assert!("first-wins".parse::<DuplicatePolicy>().is_err());
    }
}
