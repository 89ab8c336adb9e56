//! State store
//!
//! Merges canonical update records into the aggregate state. Scalars are
//! last-writer-wins by `observed_at`; history lists always append. The
//! published state is an `Arc` that is copied on write, so a snapshot
//! handed out earlier never changes underneath its holder.

use crate::state::AggregateState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use squadron_core::{
    normalize_bearing, Detection, EmitterId, EntityKind, Position, Unit, UnitId, UpdateFields,
    UpdateRecord, FUEL_MAX, FUEL_MIN,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// History capacities and clamping bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// RWR readings kept per unit
    pub signal_capacity: usize,
    /// Positions kept per unit
    pub path_capacity: usize,
    /// Unattributed intelligence readings kept
    pub intel_capacity: usize,
    /// Upper bound for a unit's weapons count
    pub max_weapons: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            signal_capacity: 10,
            path_capacity: 50,
            intel_capacity: 5,
            max_weapons: 10,
        }
    }
}

/// How a record was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    /// First observation of the entity
    Created,
    /// Merged into an existing entity
    Merged,
    /// Older than the stored observation; only history was taken
    Stale,
    /// Unknown entity kind or empty id
    Ignored,
}

/// Result of applying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    /// The entity's content differs from before the record
    pub changed: bool,
}

impl ApplyOutcome {
    fn ignored() -> Self {
        Self {
            status: ApplyStatus::Ignored,
            changed: false,
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.status == ApplyStatus::Ignored
    }
}

/// Tally of a batch of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub created: usize,
    pub stale: usize,
    pub ignored: usize,
    pub changed: usize,
    /// Subscriber callbacks fired after the batch
    pub notified: usize,
}

impl BatchOutcome {
    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome.status {
            ApplyStatus::Ignored => self.ignored += 1,
            ApplyStatus::Created => {
                self.applied += 1;
                self.created += 1;
            }
            ApplyStatus::Stale => {
                self.applied += 1;
                self.stale += 1;
            }
            ApplyStatus::Merged => self.applied += 1,
        }
        if outcome.changed {
            self.changed += 1;
        }
    }

    pub fn has_changes(&self) -> bool {
        self.changed > 0
    }
}

/// Authoritative merged state
#[derive(Debug)]
pub struct StateStore {
    config: StoreConfig,
    state: Arc<AggregateState>,
}

impl StateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            state: Arc::new(AggregateState::empty(config.intel_capacity)),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Immutable view of the current state
    pub fn snapshot(&self) -> Arc<AggregateState> {
        Arc::clone(&self.state)
    }

    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Merge one record into the state
    pub fn apply_update(&mut self, record: &UpdateRecord) -> ApplyOutcome {
        let id = record.entity_id.trim();
        if id.is_empty() {
            warn!(kind = %record.entity_kind, source = %record.source, "Ignoring update with empty entity id");
            return ApplyOutcome::ignored();
        }
        if let EntityKind::Other(kind) = &record.entity_kind {
            warn!(kind = %kind, id = %id, source = %record.source, "Ignoring update for unrecognized entity kind");
            return ApplyOutcome::ignored();
        }

        let config = self.config;
        let state = Arc::make_mut(&mut self.state);
        let outcome = match &record.entity_kind {
            EntityKind::Unit => merge_unit(state, &config, UnitId::new(id), record),
            EntityKind::Emitter => merge_emitter(state, EmitterId::new(id), record),
            EntityKind::Intel => merge_intel(state, record),
            EntityKind::Other(_) => ApplyOutcome::ignored(),
        };

        if outcome.changed {
            state.version += 1;
            state.generated_at = Utc::now();
        }
        outcome
    }

    /// Apply records in order
    pub fn apply_batch(&mut self, records: &[UpdateRecord]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for record in records {
            outcome.record(self.apply_update(record));
        }
        outcome
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

/// Clamp fuel into the valid percentage range
pub fn clamp_fuel(fuel: f64) -> f64 {
    fuel.clamp(FUEL_MIN, FUEL_MAX)
}

/// Clamp a weapons count into `0..=max`
pub fn clamp_weapons(weapons: i64, max: u32) -> u32 {
    weapons.clamp(0, i64::from(max)) as u32
}

fn is_fresh(stored: Option<DateTime<Utc>>, incoming: DateTime<Utc>) -> bool {
    stored.is_none_or(|at| incoming >= at)
}

fn status_for(created: bool, fresh: bool) -> ApplyStatus {
    if created {
        ApplyStatus::Created
    } else if fresh {
        ApplyStatus::Merged
    } else {
        ApplyStatus::Stale
    }
}

fn merge_unit(
    state: &mut AggregateState,
    config: &StoreConfig,
    id: UnitId,
    record: &UpdateRecord,
) -> ApplyOutcome {
    let mut created = false;
    let unit = state.units.entry(id.clone()).or_insert_with(|| {
        created = true;
        Unit::new(id.clone(), config.path_capacity, config.signal_capacity)
    });
    let before = unit.clone();
    let fields = &record.fields;
    // history-only records never move the observation clock
    let carries_scalars = !fields.has_no_scalars();
    let fresh = !carries_scalars || is_fresh(unit.observed_at, record.observed_at);

    if carries_scalars && fresh {
        apply_unit_scalars(unit, fields, config.max_weapons);
        unit.observed_at = Some(record.observed_at);
    } else if carries_scalars {
        debug!(unit = %id, observed_at = %record.observed_at, "Discarding scalars from stale update");
    }

    let mut path: Vec<Position> = fields.path.iter().copied().filter(Position::is_valid).collect();
    if fresh {
        if let Some(position) = fields.position.filter(Position::is_valid) {
            if path.last() != Some(&position) {
                path.push(position);
            }
        }
    }
    unit.path.append_unseen(path);

    let signals = fields
        .signals
        .iter()
        .filter(|s| s.is_valid())
        .cloned()
        .map(|mut s| {
            s.unit_id = Some(id.clone());
            s
        });
    unit.signal_history.append_unseen(signals);

    unit.updated_at = Utc::now();

    ApplyOutcome {
        status: status_for(created, fresh),
        changed: created || before != *unit,
    }
}

fn apply_unit_scalars(unit: &mut Unit, fields: &UpdateFields, max_weapons: u32) {
    if let Some(name) = fields.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        unit.name = name.to_string();
    }
    if let Some(status) = &fields.status {
        unit.status = status.clone();
    }
    if let Some(fuel) = fields.fuel.filter(|f| f.is_finite()) {
        unit.fuel = clamp_fuel(fuel);
    }
    if let Some(weapons) = fields.weapons {
        unit.weapons = clamp_weapons(weapons, max_weapons);
    }
    if let Some(position) = fields.position.filter(Position::is_valid) {
        unit.position = position;
    }
    if let Some(emitter) = &fields.locked_emitter {
        unit.locked_emitter = Some(emitter.clone());
        unit.locked = true;
    }
    if let Some(locked) = fields.locked {
        unit.locked = locked;
        if !locked {
            unit.locked_emitter = None;
        }
    }
}

fn merge_emitter(state: &mut AggregateState, id: EmitterId, record: &UpdateRecord) -> ApplyOutcome {
    let mut created = false;
    let detection = state.detections.entry(id.clone()).or_insert_with(|| {
        created = true;
        Detection::new(id.clone())
    });
    let before = detection.clone();
    let fields = &record.fields;
    let carries_scalars = !fields.has_no_scalars();
    let fresh = !carries_scalars || is_fresh(detection.observed_at, record.observed_at);

    if carries_scalars && fresh {
        if let Some(bearing) = fields.bearing_deg.filter(|b| b.is_finite()) {
            detection.bearing_deg = normalize_bearing(bearing);
        }
        if let Some(range) = fields.range {
            detection.range = range;
        }
        if let Some(strength) = fields.strength.filter(|s| s.is_finite()) {
            detection.strength = Some(strength);
        }
        detection.observed_at = Some(record.observed_at);
    } else if carries_scalars {
        debug!(emitter = %id, observed_at = %record.observed_at, "Discarding stale emitter update");
    }
    detection.updated_at = Utc::now();

    ApplyOutcome {
        status: status_for(created, fresh),
        changed: created || before != *detection,
    }
}

fn merge_intel(state: &mut AggregateState, record: &UpdateRecord) -> ApplyOutcome {
    let readings = record.fields.signals.iter().filter(|s| s.is_valid()).cloned();
    let appended = state.intel.append_unseen(readings);

    ApplyOutcome {
        status: ApplyStatus::Merged,
        changed: appended > 0 && state.intel.capacity() > 0,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use squadron_core::{RangeBucket, SignalReading, UnitStatus};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fuel_update(id: &str, fuel: f64, observed_at: DateTime<Utc>) -> UpdateRecord {
        let fields = UpdateFields {
            fuel: Some(fuel),
            ..Default::default()
        };
        UpdateRecord::unit(id, fields, observed_at)
    }

    fn signal_update(id: &str, strength_db: f64, observed_at: DateTime<Utc>) -> UpdateRecord {
        let fields = UpdateFields {
            signals: vec![SignalReading::new(strength_db, 9.4, observed_at)],
            ..Default::default()
        };
        UpdateRecord::unit(id, fields, observed_at)
    }

    #[test]
    fn test_unknown_unit_is_created() {
        let mut store = StateStore::default();
        let outcome = store.apply_update(&fuel_update("7", 55.0, at(0)));

        assert_eq!(outcome.status, ApplyStatus::Created);
        assert!(outcome.changed);
        let snapshot = store.snapshot();
        let unit = snapshot.unit(&UnitId::new("7")).unwrap();
        assert_eq!(unit.fuel, 55.0);
        assert_eq!(unit.observed_at, Some(at(0)));
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn test_fuel_clamped_both_ways() {
        let mut store = StateStore::default();
        let id = UnitId::new("1");

        store.apply_update(&fuel_update("1", 150.0, at(0)));
        assert_eq!(store.snapshot().unit(&id).unwrap().fuel, 100.0);

        store.apply_update(&fuel_update("1", -20.0, at(1)));
        assert_eq!(store.snapshot().unit(&id).unwrap().fuel, 0.0);
    }

    #[test]
    fn test_weapons_clamped_to_configured_max() {
        let mut store = StateStore::default();
        let id = UnitId::new("1");
        let mut fields = UpdateFields {
            weapons: Some(99),
            ..Default::default()
        };

        store.apply_update(&UpdateRecord::unit("1", fields.clone(), at(0)));
        assert_eq!(store.snapshot().unit(&id).unwrap().weapons, 10);

        fields.weapons = Some(-3);
        store.apply_update(&UpdateRecord::unit("1", fields, at(1)));
        assert_eq!(store.snapshot().unit(&id).unwrap().weapons, 0);
    }

    #[test]
    fn test_non_finite_fuel_ignored() {
        let mut store = StateStore::default();
        store.apply_update(&fuel_update("1", 40.0, at(0)));
        store.apply_update(&fuel_update("1", f64::NAN, at(1)));

        assert_eq!(store.snapshot().unit(&UnitId::new("1")).unwrap().fuel, 40.0);
    }

    #[test]
    fn test_signal_history_keeps_last_ten_in_order() {
        let mut store = StateStore::default();
        for i in 0..12 {
            store.apply_update(&signal_update("1", -(i as f64), at(i)));
        }

        let snapshot = store.snapshot();
        let history = &snapshot.unit(&UnitId::new("1")).unwrap().signal_history;
        assert_eq!(history.len(), 10);
        let strengths: Vec<f64> = history.iter().map(|s| s.strength_db).collect();
        let expected: Vec<f64> = (2..12).map(|i| -(i as f64)).collect();
        assert_eq!(strengths, expected);
    }

    #[test]
    fn test_older_update_does_not_overwrite_scalars() {
        let mut store = StateStore::default();
        store.apply_update(&fuel_update("1", 80.0, at(5)));

        let mut late = fuel_update("1", 20.0, at(3));
        late.fields.signals = vec![SignalReading::new(-55.0, 10.0, at(3))];
        let outcome = store.apply_update(&late);

        assert_eq!(outcome.status, ApplyStatus::Stale);
        let snapshot = store.snapshot();
        let unit = snapshot.unit(&UnitId::new("1")).unwrap();
        assert_eq!(unit.fuel, 80.0);
        assert_eq!(unit.observed_at, Some(at(5)));
        // history from the stale record still lands
        assert_eq!(unit.signal_history.len(), 1);
    }

    #[test]
    fn test_equal_timestamp_reapplication_is_idempotent() {
        let mut store = StateStore::default();
        let mut record = fuel_update("1", 64.0, at(2));
        record.fields.status = Some(UnitStatus::Patrol);
        record.fields.position = Some(Position::new(22.3, 84.8));

        assert!(store.apply_update(&record).changed);
        let first = store.snapshot();

        let again = store.apply_update(&record);
        assert_eq!(again.status, ApplyStatus::Merged);
        assert!(!again.changed);

        let second = store.snapshot();
        assert_eq!(second.version, first.version);
        assert_eq!(second.units, first.units);
    }

    #[test]
    fn test_position_updates_extend_path_without_duplicates() {
        let mut store = StateStore::default();
        let id = UnitId::new("1");
        let a = Position::new(1.0, 1.0);
        let b = Position::new(1.5, 1.0);

        for (secs, position) in [(0, a), (1, a), (2, b)] {
            let fields = UpdateFields {
                position: Some(position),
                ..Default::default()
            };
            store.apply_update(&UpdateRecord::unit("1", fields, at(secs)));
        }

        let snapshot = store.snapshot();
        let unit = snapshot.unit(&id).unwrap();
        assert_eq!(unit.position, b);
        assert_eq!(unit.path.to_vec(), vec![a, b]);
    }

    #[test]
    fn test_redelivered_path_not_duplicated() {
        let mut store = StateStore::default();
        let path = vec![Position::new(0.0, 0.0), Position::new(0.1, 0.0)];
        let mut fields = UpdateFields {
            path: path.clone(),
            ..Default::default()
        };

        store.apply_update(&UpdateRecord::unit("1", fields.clone(), at(0)));
        fields.path.push(Position::new(0.2, 0.0));
        store.apply_update(&UpdateRecord::unit("1", fields, at(1)));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.unit(&UnitId::new("1")).unwrap().path.len(), 3);
    }

    #[test]
    fn test_unknown_kind_and_empty_id_ignored() {
        let mut store = StateStore::default();
        let satellite = UpdateRecord::new(
            EntityKind::Other("satellite".into()),
            "S1",
            UpdateFields::default(),
            at(0),
        );
        let blank = fuel_update("  ", 50.0, at(0));

        assert!(store.apply_update(&satellite).is_ignored());
        assert!(store.apply_update(&blank).is_ignored());
        assert_eq!(store.version(), 0);
        assert!(store.snapshot().units.is_empty());
    }

    #[test]
    fn test_snapshot_is_not_mutated_by_later_updates() {
        let mut store = StateStore::default();
        store.apply_update(&fuel_update("1", 90.0, at(0)));
        let before = store.snapshot();

        store.apply_update(&fuel_update("1", 30.0, at(1)));

        assert_eq!(before.unit(&UnitId::new("1")).unwrap().fuel, 90.0);
        assert_eq!(store.snapshot().unit(&UnitId::new("1")).unwrap().fuel, 30.0);
    }

    #[test]
    fn test_emitter_merge_normalizes_bearing() {
        let mut store = StateStore::default();
        let fields = UpdateFields {
            bearing_deg: Some(-30.0),
            range: Some(RangeBucket::Near),
            strength: Some(72.5),
            ..Default::default()
        };
        store.apply_update(&UpdateRecord::emitter("E1", fields, at(0)));

        let snapshot = store.snapshot();
        let detection = snapshot.detection(&EmitterId::new("E1")).unwrap();
        assert_eq!(detection.bearing_deg, 330.0);
        assert_eq!(detection.range, RangeBucket::Near);
        assert_eq!(detection.strength, Some(72.5));
    }

    #[test]
    fn test_intel_feed_bounded() {
        let mut store = StateStore::default();
        let readings: Vec<SignalReading> = (0..8)
            .map(|i| SignalReading::new(-40.0 - i as f64, 12.0, at(i)))
            .collect();
        store.apply_update(&UpdateRecord::intel(readings.clone(), at(8)));
        // re-delivered feed adds nothing
        let again = store.apply_update(&UpdateRecord::intel(readings.clone(), at(9)));

        assert!(!again.changed);
        assert_eq!(store.snapshot().intel.to_vec(), readings[3..].to_vec());
    }

    #[test]
    fn test_history_only_update_keeps_observation_clock() {
        let mut store = StateStore::default();
        store.apply_update(&fuel_update("1", 70.0, at(10)));

        // readings stamped far ahead must not block the next scalar update
        let outcome = store.apply_update(&signal_update("1", -48.0, at(500)));
        assert_eq!(outcome.status, ApplyStatus::Merged);
        assert_eq!(store.snapshot().unit(&UnitId::new("1")).unwrap().observed_at, Some(at(10)));

        let outcome = store.apply_update(&fuel_update("1", 65.0, at(11)));
        assert_eq!(outcome.status, ApplyStatus::Merged);
        assert_eq!(store.snapshot().unit(&UnitId::new("1")).unwrap().fuel, 65.0);
    }

    #[test]
    fn test_batch_tally() {
        let mut store = StateStore::default();
        let records = vec![
            fuel_update("1", 50.0, at(5)),
            fuel_update("1", 40.0, at(1)),
            fuel_update("", 40.0, at(1)),
            fuel_update("2", 70.0, at(5)),
        ];

        let outcome = store.apply_batch(&records);
        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.stale, 1);
        assert_eq!(outcome.ignored, 1);
        assert!(outcome.has_changes());
    }

    proptest! {
        #[test]
        fn prop_fuel_and_weapons_always_clamped(
            updates in proptest::collection::vec((-500.0f64..500.0, any::<i64>()), 1..40)
        ) {
            let mut store = StateStore::default();
            for (i, (fuel, weapons)) in updates.into_iter().enumerate() {
                let fields = UpdateFields {
                    fuel: Some(fuel),
                    weapons: Some(weapons),
                    ..Default::default()
                };
                store.apply_update(&UpdateRecord::unit("1", fields, at(i as i64)));

                let snapshot = store.snapshot();
                let unit = snapshot.unit(&UnitId::new("1")).unwrap();
                prop_assert!((FUEL_MIN..=FUEL_MAX).contains(&unit.fuel));
                prop_assert!(unit.weapons <= store.config().max_weapons);
            }
        }

        #[test]
        fn prop_signal_history_is_most_recent_window(count in 0usize..40) {
            let mut store = StateStore::default();
            for i in 0..count {
                store.apply_update(&signal_update("1", -(i as f64), at(i as i64)));
            }

            let snapshot = store.snapshot();
            let len = snapshot
                .unit(&UnitId::new("1"))
                .map(|u| u.signal_history.len())
                .unwrap_or(0);
            prop_assert_eq!(len, count.min(10));
            if let Some(unit) = snapshot.unit(&UnitId::new("1")) {
                let expected: Vec<f64> = (count.saturating_sub(10)..count).map(|i| -(i as f64)).collect();
                let actual: Vec<f64> = unit.signal_history.iter().map(|s| s.strength_db).collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
