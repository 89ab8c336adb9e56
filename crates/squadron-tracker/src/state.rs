//! Aggregate state snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use squadron_core::{Detection, EmitterId, History, SignalReading, Unit, UnitId};
use std::collections::BTreeMap;

/// Fuel percentage below which a unit counts as low on fuel
pub const LOW_FUEL_THRESHOLD: f64 = 25.0;

/// Complete, immutable view of everything the store knows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateState {
    /// Increases every time applied data changes
    pub version: u64,
    /// Tracked units keyed by id
    pub units: BTreeMap<UnitId, Unit>,
    /// Active RWR contacts keyed by emitter
    pub detections: BTreeMap<EmitterId, Detection>,
    /// Unattributed signal intelligence, newest last
    pub intel: History<SignalReading>,
    /// Wall clock of the last change
    pub generated_at: DateTime<Utc>,
}

impl AggregateState {
    /// Create empty state
    pub fn empty(intel_capacity: usize) -> Self {
        Self {
            version: 0,
            units: BTreeMap::new(),
            detections: BTreeMap::new(),
            intel: History::new(intel_capacity),
            generated_at: Utc::now(),
        }
    }

    pub fn unit(&self, id: &UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn detection(&self, id: &EmitterId) -> Option<&Detection> {
        self.detections.get(id)
    }

    /// Fleet-wide rollup
    pub fn summary(&self) -> FleetSummary {
        FleetSummary::from_state(self)
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::empty(0)
    }
}

/// Fleet readiness rollup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub unit_count: usize,
    /// Units per status string
    pub status_counts: BTreeMap<String, usize>,
    pub locked_count: usize,
    pub low_fuel_count: usize,
    pub detection_count: usize,
    pub average_fuel: Option<f64>,
    pub total_weapons: u64,
}

impl FleetSummary {
    pub fn from_state(state: &AggregateState) -> Self {
        let mut summary = FleetSummary {
            unit_count: state.units.len(),
            detection_count: state.detections.len(),
            ..Default::default()
        };

        let mut fuel_total = 0.0;
        for unit in state.units.values() {
            *summary.status_counts.entry(unit.status.to_string()).or_default() += 1;
            if unit.locked {
                summary.locked_count += 1;
            }
            if unit.is_fuel_low(LOW_FUEL_THRESHOLD) {
                summary.low_fuel_count += 1;
            }
            fuel_total += unit.fuel;
            summary.total_weapons += u64::from(unit.weapons);
        }

        if summary.unit_count > 0 {
            summary.average_fuel = Some(fuel_total / summary.unit_count as f64);
        }

        summary
    }
}

// ============================================================================
// TESTS
// ============================================================================
