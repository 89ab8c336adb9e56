//! # Squadron Core
//!
//! Core domain models and types for the squadron telemetry aggregator.
//! This crate provides the shared vocabulary used by every other crate:
//! tracked units, RWR detections, signal readings and the canonical
//! update records the adapter produces for the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod error;
pub mod events;
pub mod geo;
pub mod history;

pub use error::{CoreError, CoreResult};
pub use events::*;
pub use geo::*;
pub use history::History;

/// Lowest valid fuel reading (percent)
pub const FUEL_MIN: f64 = 0.0;
/// Highest valid fuel reading (percent)
pub const FUEL_MAX: f64 = 100.0;

// ============================================================================
// UNIT MODELS
// ============================================================================

/// Unique identifier for a tracked aircraft
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for UnitId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Operational status of a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UnitStatus {
    Active,
    Patrol,
    Warning,
    Damaged,
    Offline,
    /// Status string the backend sent that has no dedicated variant
    Other(String),
}

impl UnitStatus {
    /// Whether the status calls for operator attention
    pub fn is_degraded(&self) -> bool {
        matches!(self, UnitStatus::Warning | UnitStatus::Damaged | UnitStatus::Offline)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Active => write!(f, "ACTIVE"),
            UnitStatus::Patrol => write!(f, "PATROL"),
            UnitStatus::Warning => write!(f, "WARNING"),
            UnitStatus::Damaged => write!(f, "DAMAGED"),
            UnitStatus::Offline => write!(f, "OFFLINE"),
            UnitStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

impl Default for UnitStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl FromStr for UnitStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Self::Active,
            "PATROL" => Self::Patrol,
            "WARNING" => Self::Warning,
            "DAMAGED" => Self::Damaged,
            "OFFLINE" => Self::Offline,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for UnitStatus {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<UnitStatus> for String {
    fn from(status: UnitStatus) -> Self {
        status.to_string()
    }
}

/// Latest known state of one tracked aircraft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub status: UnitStatus,
    /// Fuel remaining, percent (0-100)
    pub fuel: f64,
    /// Weapons remaining
    pub weapons: u32,
    pub position: Position,
    pub locked: bool,
    /// Emitter this unit is locked by, when the backend reports it
    pub locked_emitter: Option<EmitterId>,
    /// Past positions, oldest first
    pub path: History<Position>,
    /// RWR readings, oldest first
    pub signal_history: History<SignalReading>,
    /// Timestamp of the freshest scalar update applied
    pub observed_at: Option<DateTime<Utc>>,
    /// Wall clock of the last record applied to this unit
    pub updated_at: DateTime<Utc>,
}

impl Unit {
    pub fn new(id: impl Into<UnitId>, path_capacity: usize, signal_capacity: usize) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            status: UnitStatus::default(),
            fuel: FUEL_MAX,
            weapons: 0,
            position: Position::default(),
            locked: false,
            locked_emitter: None,
            path: History::new(path_capacity),
            signal_history: History::new(signal_capacity),
            observed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Strength of the most recent RWR reading, if any
    pub fn latest_signal_db(&self) -> Option<f64> {
        self.signal_history.latest().map(|s| s.strength_db)
    }

    /// Check if fuel is below `threshold` percent
    pub fn is_fuel_low(&self, threshold: f64) -> bool {
        self.fuel < threshold
    }

    /// Check if the unit has not been touched for longer than `timeout`
    pub fn is_stale(&self, timeout: Duration) -> bool {
        is_older_than(self.updated_at, timeout)
    }
}

/// Equality compares telemetry content; `observed_at` and `updated_at`
/// are bookkeeping and ignored, so re-delivered identical data compares equal.
impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.status == other.status
            && self.fuel == other.fuel
            && self.weapons == other.weapons
            && self.position == other.position
            && self.locked == other.locked
            && self.locked_emitter == other.locked_emitter
            && self.path == other.path
            && self.signal_history == other.signal_history
    }
}

// ============================================================================
// SIGNAL MODELS
// ============================================================================

/// Threat classification attached to a signal reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatClass {
    /// Emitter matches a known threat library entry
    pub known: bool,
    /// Priority level, lower is more urgent
    pub priority: u8,
}

/// One detected emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    /// Owning unit; `None` for unattributed intelligence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<UnitId>,
    pub strength_db: f64,
    pub frequency_ghz: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat: Option<ThreatClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeBucket>,
}

impl SignalReading {
    pub fn new(strength_db: f64, frequency_ghz: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            unit_id: None,
            strength_db,
            frequency_ghz,
            timestamp,
            threat: None,
            bearing_deg: None,
            range: None,
        }
    }

    pub fn for_unit(mut self, unit_id: impl Into<UnitId>) -> Self {
        self.unit_id = Some(unit_id.into());
        self
    }

    pub fn with_threat(mut self, threat: ThreatClass) -> Self {
        self.threat = Some(threat);
        self
    }

    pub fn with_bearing(mut self, bearing_deg: f64, range: RangeBucket) -> Self {
        self.bearing_deg = Some(normalize_bearing(bearing_deg));
        self.range = Some(range);
        self
    }

    /// Both numeric readings are finite
    pub fn is_valid(&self) -> bool {
        self.strength_db.is_finite() && self.frequency_ghz.is_finite()
    }
}

// ============================================================================
// EMITTER MODELS
// ============================================================================

/// Unique identifier for a hostile radar emitter
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EmitterId(pub String);

impl EmitterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EmitterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EmitterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Radar-warning contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub emitter_id: EmitterId,
    /// Bearing in degrees, [0, 360)
    pub bearing_deg: f64,
    pub range: RangeBucket,
    /// Last reported pulse strength
    pub strength: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Detection {
    pub fn new(emitter_id: impl Into<EmitterId>) -> Self {
        Self {
            emitter_id: emitter_id.into(),
            bearing_deg: 0.0,
            range: RangeBucket::default(),
            strength: None,
            observed_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        is_older_than(self.updated_at, timeout)
    }
}

/// Equality ignores bookkeeping timestamps, like [`Unit`]
impl PartialEq for Detection {
    fn eq(&self, other: &Self) -> bool {
        self.emitter_id == other.emitter_id
            && self.bearing_deg == other.bearing_deg
            && self.range == other.range
            && self.strength == other.strength
    }
}

fn is_older_than(at: DateTime<Utc>, timeout: Duration) -> bool {
    Utc::now().signed_duration_since(at)
        > chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(30))
}

// ============================================================================
// TESTS
// ============================================================================
