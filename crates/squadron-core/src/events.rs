//! Canonical update records and channel messages
//!
//! Every telemetry source is normalized into [`UpdateRecord`]s before it
//! reaches the state store; the push channel speaks [`ChannelEvent`]
//! envelopes on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CoreResult, EmitterId, Position, RangeBucket, SignalReading, UnitId, UnitStatus};

/// Channel event carrying RWR readings for one or more units
pub const RWR_UPDATE: &str = "rwr_update";
/// Channel event carrying the backend's full dashboard state
pub const DASHBOARD_UPDATE: &str = "dashboard_update";
/// Channel event carrying canonical update records
pub const TELEMETRY_UPDATE: &str = "telemetry_update";
/// Outbound simulation event reporting an enemy pulse hitting a jet
pub const PULSE_HIT: &str = "pulse_hit";

/// Entity id used for records addressed to the intelligence feed
pub const INTEL_FEED_ID: &str = "sigint";

/// Kind of entity an update addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityKind {
    /// Tracked aircraft
    Unit,
    /// Radar-warning contact
    Emitter,
    /// Unattributed signal-intelligence reading
    Intel,
    /// Anything the store does not know how to merge
    Other(String),
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Unit => write!(f, "unit"),
            EntityKind::Emitter => write!(f, "emitter"),
            EntityKind::Intel => write!(f, "intel"),
            EntityKind::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<String> for EntityKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "unit" | "jet" => Self::Unit,
            "emitter" | "detection" => Self::Emitter,
            "intel" | "signal" => Self::Intel,
            _ => Self::Other(s),
        }
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.to_string()
    }
}

/// Channel a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// `GET /api/squadron_status`
    SquadronStatus,
    /// `GET /api/signal_intelligence`
    SignalIntelligence,
    /// Push channel event
    PushChannel,
    /// In-process simulated telemetry
    Simulated,
    /// Handed to the store directly
    Direct,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::SquadronStatus => "squadron_status",
            SourceTag::SignalIntelligence => "signal_intelligence",
            SourceTag::PushChannel => "push_channel",
            SourceTag::Simulated => "simulated",
            SourceTag::Direct => "direct",
        }
    }
}

impl Default for SourceTag {
    fn default() -> Self {
        Self::Direct
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial field set carried by an update.
///
/// Absent scalars leave the stored value untouched; history lists are
/// appended. Which fields matter depends on the record's [`EntityKind`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UnitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapons: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_emitter: Option<EmitterId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Position>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<SignalReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

impl UpdateFields {
    /// No scalar field is set
    pub fn has_no_scalars(&self) -> bool {
        self.name.is_none()
            && self.status.is_none()
            && self.fuel.is_none()
            && self.weapons.is_none()
            && self.position.is_none()
            && self.locked.is_none()
            && self.locked_emitter.is_none()
            && self.bearing_deg.is_none()
            && self.range.is_none()
            && self.strength.is_none()
    }
}

/// Normalized, source-agnostic update handed to the state store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    #[serde(default)]
    pub fields: UpdateFields,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub source: SourceTag,
}

impl UpdateRecord {
    pub fn new(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        fields: UpdateFields,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
            fields,
            observed_at,
            source: SourceTag::default(),
        }
    }

    pub fn unit(unit_id: impl Into<String>, fields: UpdateFields, observed_at: DateTime<Utc>) -> Self {
        Self::new(EntityKind::Unit, unit_id, fields, observed_at)
    }

    pub fn emitter(emitter_id: impl Into<String>, fields: UpdateFields, observed_at: DateTime<Utc>) -> Self {
        Self::new(EntityKind::Emitter, emitter_id, fields, observed_at)
    }

    /// Unattributed signal intelligence; the id only labels the feed
    pub fn intel(readings: Vec<SignalReading>, observed_at: DateTime<Utc>) -> Self {
        let fields = UpdateFields {
            signals: readings,
            ..Default::default()
        };
        Self::new(EntityKind::Intel, INTEL_FEED_ID, fields, observed_at)
    }

    pub fn with_source(mut self, source: SourceTag) -> Self {
        self.source = source;
        self
    }
}

// ============================================================================
// CHANNEL MESSAGE TYPES
// ============================================================================

/// Push channel envelope: `{"event": "...", "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ChannelEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn pulse_hit(hit: &PulseHit) -> CoreResult<Self> {
        Ok(Self::new(PULSE_HIT, serde_json::to_value(hit)?))
    }

    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Outbound simulation telemetry: an enemy pulse reached a jet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseHit {
    pub jet_id: UnitId,
    pub enemy_id: EmitterId,
    pub timestamp: DateTime<Utc>,
    pub position: Position,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_from_string() {
        assert_eq!(EntityKind::from("unit".to_string()), EntityKind::Unit);
        assert_eq!(EntityKind::from("emitter".to_string()), EntityKind::Emitter);
        assert_eq!(
            EntityKind::from("satellite".to_string()),
            EntityKind::Other("satellite".into())
        );
    }

    #[test]
    fn test_canonical_record_deserialization() {
        let json = r#"{
            "entityKind": "unit",
            "entityId": "3",
            "fields": {"fuel": 150},
            "observedAt": "2026-01-01T00:00:05Z"
        }"#;
        let record: UpdateRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.entity_kind, EntityKind::Unit);
        assert_eq!(record.entity_id, "3");
        assert_eq!(record.fields.fuel, Some(150.0));
        assert_eq!(record.source, SourceTag::Direct);
        assert!(record.fields.signals.is_empty());
    }

    #[test]
    fn test_pulse_hit_wire_shape() {
        let hit = PulseHit {
            jet_id: UnitId::new("2"),
            enemy_id: EmitterId::new("1"),
            timestamp: Utc::now(),
            position: Position::new(100.0, 200.0),
        };
        let event = ChannelEvent::pulse_hit(&hit).unwrap();
        assert_eq!(event.event, PULSE_HIT);
        assert_eq!(event.data["jetId"], "2");
        assert_eq!(event.data["enemyId"], "1");
        assert_eq!(event.data["position"]["x"], 100.0);
    }

    #[test]
    fn test_channel_event_without_data() {
        let event = ChannelEvent::from_json(r#"{"event":"rwr_update"}"#).unwrap();
        assert_eq!(event.event, RWR_UPDATE);
        assert!(event.data.is_null());
    }
}
