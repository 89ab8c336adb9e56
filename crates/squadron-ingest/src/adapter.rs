//! Telemetry source adapter
//!
//! Turns raw backend payloads into canonical [`UpdateRecord`]s. The
//! transform is pure and synchronous; malformed entries are dropped one at
//! a time and counted, their siblings still come through.

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use squadron_core::{
    normalize_bearing, ChannelEvent, CoreError, CoreResult, EmitterId, Position, RangeBucket,
    SignalReading, SourceTag, ThreatClass, UnitId, UnitStatus, UpdateFields, UpdateRecord,
    DASHBOARD_UPDATE, RWR_UPDATE, TELEMETRY_UPDATE,
};
use tracing::{debug, warn};

/// Epoch numbers at or above this magnitude are milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Priority given to readings that carry a threat flag but no level
const DEFAULT_THREAT_PRIORITY: u8 = 3;

/// Adapter output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<UpdateRecord>,
    /// Entries that could not be turned into records
    pub dropped: usize,
}

impl Normalized {
    fn dropped(count: usize) -> Self {
        Self {
            records: Vec::new(),
            dropped: count,
        }
    }

    fn extend(&mut self, other: Normalized) {
        self.records.extend(other.records);
        self.dropped += other.dropped;
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.dropped == 0
    }
}

/// Normalize a payload received from `source` at `received_at`
pub fn normalize(source: SourceTag, payload: &Value, received_at: DateTime<Utc>) -> Normalized {
    let normalized = match source {
        SourceTag::SquadronStatus => {
            let jets = payload
                .get("jets")
                .and_then(Value::as_array)
                .or_else(|| payload.as_array());
            match jets {
                Some(jets) => normalize_jets(jets, source, received_at),
                None => {
                    warn!("Dropping squadron status payload without a jets list");
                    Normalized::dropped(1)
                }
            }
        }
        SourceTag::SignalIntelligence => normalize_readings(payload, source, received_at),
        SourceTag::PushChannel => match ChannelEvent::deserialize(payload) {
            Ok(event) => normalize_event(&event, received_at),
            Err(e) => {
                warn!("Dropping push payload without an event envelope: {}", e);
                Normalized::dropped(1)
            }
        },
        SourceTag::Simulated => normalize_dashboard(payload, source, received_at),
        SourceTag::Direct => normalize_canonical(payload, source),
    };

    if normalized.dropped > 0 {
        debug!(
            source = %source,
            records = normalized.records.len(),
            dropped = normalized.dropped,
            "Normalized payload with dropped entries"
        );
    }
    normalized
}

/// Normalize one push channel event
pub fn normalize_event(event: &ChannelEvent, received_at: DateTime<Utc>) -> Normalized {
    let source = SourceTag::PushChannel;
    match event.event.as_str() {
        RWR_UPDATE => normalize_readings(&event.data, source, received_at),
        DASHBOARD_UPDATE => normalize_dashboard(&event.data, source, received_at),
        TELEMETRY_UPDATE => normalize_canonical(&event.data, source),
        other => {
            debug!("Ignoring channel event {:?}", other);
            Normalized::default()
        }
    }
}

/// Parse the timestamp forms backends send: RFC 3339, naive ISO date-times
/// (UTC), epoch seconds or milliseconds, and `HH:MM:SS` time of day
/// relative to `reference`.
pub fn parse_timestamp(value: &Value, reference: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(from_epoch)
            .ok_or_else(|| CoreError::invalid_timestamp(n.to_string())),
        Value::String(s) => parse_timestamp_str(s.trim(), reference),
        other => Err(CoreError::invalid_timestamp(other.to_string())),
    }
}

fn parse_timestamp_str(s: &str, reference: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    for format in ["%H:%M:%S", "%H:%M:%S%.f"] {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return Ok(time_of_day(time, reference));
        }
    }
    s.parse::<f64>()
        .ok()
        .and_then(from_epoch)
        .ok_or_else(|| CoreError::invalid_timestamp(s))
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    if raw.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(raw as i64)
    } else {
        let secs = raw.floor();
        let nanos = ((raw - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos)
    }
}

/// A time of day lands on the reference date, or the day before when that
/// would put it more than a minute in the future.
fn time_of_day(time: NaiveTime, reference: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = reference.date_naive().and_time(time).and_utc();
    if candidate - reference > TimeDelta::minutes(1) {
        candidate - TimeDelta::days(1)
    } else {
        candidate
    }
}

// ============================================================================
// WIRE SHAPES
// ============================================================================

/// Ids arrive as numbers or strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Int(i64),
    Float(f64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Int(n) => n.to_string(),
            WireId::Float(f) if f.fract() == 0.0 => (f as i64).to_string(),
            WireId::Float(f) => f.to_string(),
            WireId::Text(s) => s.trim().to_string(),
        }
    }
}

/// Flags arrive as booleans or 0/1
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireFlag {
    Bool(bool),
    Int(i64),
}

impl WireFlag {
    fn is_set(self) -> bool {
        match self {
            WireFlag::Bool(b) => b,
            WireFlag::Int(n) => n != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireJet {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    name: Option<String>,
    status: String,
    fuel: f64,
    weapons: f64,
    position: Position,
    #[serde(default)]
    signal_history: Vec<Value>,
    #[serde(default)]
    path: Vec<Value>,
    #[serde(default)]
    locked: Option<WireFlag>,
}

#[derive(Debug, Deserialize)]
struct WireReading {
    #[serde(alias = "strength_db")]
    signal_strength_db: f64,
    frequency_ghz: f64,
    timestamp: Value,
    #[serde(default)]
    is_known_threat: Option<WireFlag>,
    #[serde(default)]
    threat_priority_level: Option<u8>,
    #[serde(default)]
    jet_id: Option<WireId>,
    #[serde(default)]
    angle_deg: Option<f64>,
    #[serde(default)]
    range: Option<Value>,
    #[serde(default)]
    emitter_id: Option<WireId>,
}

#[derive(Debug, Deserialize)]
struct WirePulse {
    #[serde(rename = "fromEnemyId")]
    from_enemy_id: WireId,
    angle_deg: f64,
    range: Value,
    #[serde(default)]
    strength: Option<f64>,
}

struct ParsedReading {
    jet_id: Option<UnitId>,
    emitter_id: Option<EmitterId>,
    reading: SignalReading,
}

fn parse_range(value: &Value) -> Option<RangeBucket> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(RangeBucket::from_ordinal),
        _ => None,
    }
}

fn parse_reading(raw: &Value, reference: DateTime<Utc>) -> CoreResult<ParsedReading> {
    let wire = WireReading::deserialize(raw)?;
    let timestamp = parse_timestamp(&wire.timestamp, reference)?;

    let mut reading = SignalReading::new(wire.signal_strength_db, wire.frequency_ghz, timestamp);
    reading.bearing_deg = wire.angle_deg.filter(|a| a.is_finite()).map(normalize_bearing);
    reading.range = wire.range.as_ref().and_then(parse_range);
    if wire.is_known_threat.is_some() || wire.threat_priority_level.is_some() {
        reading.threat = Some(ThreatClass {
            known: wire.is_known_threat.is_some_and(WireFlag::is_set),
            priority: wire.threat_priority_level.unwrap_or(DEFAULT_THREAT_PRIORITY),
        });
    }

    let jet_id = wire.jet_id.map(|id| UnitId::new(id.into_string()));
    if let Some(id) = &jet_id {
        reading.unit_id = Some(id.clone());
    }

    Ok(ParsedReading {
        jet_id,
        emitter_id: wire.emitter_id.map(|id| EmitterId::new(id.into_string())),
        reading,
    })
}

/// Readings in chronological order; lists sent newest-first are flipped
/// before the stable sort so same-second readings keep their true order.
fn chronological(mut readings: Vec<SignalReading>) -> Vec<SignalReading> {
    if readings.first().map(|r| r.timestamp) > readings.last().map(|r| r.timestamp) {
        readings.reverse();
    }
    readings.sort_by_key(|r| r.timestamp);
    readings
}

// ============================================================================
// SOURCE SHAPES
// ============================================================================

fn normalize_jets(jets: &[Value], source: SourceTag, received_at: DateTime<Utc>) -> Normalized {
    let mut out = Normalized::default();
    for (index, raw) in jets.iter().enumerate() {
        match jet_record(index, raw, received_at) {
            Ok((record, dropped)) => {
                out.records.push(record.with_source(source));
                out.dropped += dropped;
            }
            Err(e) => {
                warn!(index, "Dropping malformed jet entry: {}", e);
                out.dropped += 1;
            }
        }
    }
    out
}

/// One unit record for a jet entry, plus the count of nested entries dropped
fn jet_record(
    index: usize,
    raw: &Value,
    received_at: DateTime<Utc>,
) -> CoreResult<(UpdateRecord, usize)> {
    let jet = WireJet::deserialize(raw)?;
    let id = jet
        .id
        .map(WireId::into_string)
        .unwrap_or_else(|| (index + 1).to_string());
    let mut dropped = 0;

    let mut signals = Vec::with_capacity(jet.signal_history.len());
    for entry in &jet.signal_history {
        match parse_reading(entry, received_at) {
            Ok(parsed) => signals.push(parsed.reading),
            Err(e) => {
                debug!(unit = %id, "Dropping malformed signal reading: {}", e);
                dropped += 1;
            }
        }
    }

    let mut path = Vec::with_capacity(jet.path.len());
    for entry in &jet.path {
        match Position::deserialize(entry) {
            Ok(position) => path.push(position),
            Err(_) => dropped += 1,
        }
    }

    let mut fields = UpdateFields {
        name: jet.name,
        status: Some(UnitStatus::from(jet.status)),
        fuel: Some(jet.fuel),
        weapons: Some(jet.weapons.round() as i64),
        position: Some(jet.position),
        locked: jet.locked.map(WireFlag::is_set),
        path,
        signals: chronological(signals),
        ..Default::default()
    };

    // explicit null means "not locked"; absence says nothing
    match raw.get("locked_enemy") {
        Some(Value::Null) => {
            fields.locked.get_or_insert(false);
        }
        Some(value) => match WireId::deserialize(value) {
            Ok(enemy) => fields.locked_emitter = Some(EmitterId::new(enemy.into_string())),
            Err(_) => dropped += 1,
        },
        None => {}
    }

    Ok((UpdateRecord::unit(id, fields, received_at), dropped))
}

fn normalize_readings(payload: &Value, source: SourceTag, received_at: DateTime<Utc>) -> Normalized {
    let Some(entries) = payload
        .as_array()
        .or_else(|| payload.get("signals").and_then(Value::as_array))
    else {
        warn!(source = %source, "Dropping signal payload that is not a list");
        return Normalized::dropped(1);
    };

    let mut out = Normalized::default();
    let mut per_unit: Vec<(UnitId, Vec<SignalReading>)> = Vec::new();
    let mut intel = Vec::new();
    let mut emitters = Vec::new();

    for raw in entries {
        let parsed = match parse_reading(raw, received_at) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(source = %source, "Dropping malformed signal reading: {}", e);
                out.dropped += 1;
                continue;
            }
        };

        if let (Some(emitter), Some(bearing), Some(range)) = (
            parsed.emitter_id,
            parsed.reading.bearing_deg,
            parsed.reading.range,
        ) {
            let fields = UpdateFields {
                bearing_deg: Some(bearing),
                range: Some(range),
                ..Default::default()
            };
            emitters.push(UpdateRecord::emitter(emitter.0, fields, received_at).with_source(source));
        }

        match parsed.jet_id {
            Some(id) => match per_unit.iter().position(|(unit, _)| *unit == id) {
                Some(pos) => per_unit[pos].1.push(parsed.reading),
                None => per_unit.push((id, vec![parsed.reading])),
            },
            None => intel.push(parsed.reading),
        }
    }

    for (id, readings) in per_unit {
        let fields = UpdateFields {
            signals: chronological(readings),
            ..Default::default()
        };
        out.records.push(UpdateRecord::unit(id.0, fields, received_at).with_source(source));
    }
    if !intel.is_empty() {
        out.records
            .push(UpdateRecord::intel(chronological(intel), received_at).with_source(source));
    }
    out.records.extend(emitters);
    out
}

fn normalize_dashboard(payload: &Value, source: SourceTag, received_at: DateTime<Utc>) -> Normalized {
    let mut out = Normalized::default();

    match payload.get("squadron").and_then(Value::as_array) {
        Some(jets) => out.extend(normalize_jets(jets, source, received_at)),
        None => {
            warn!(source = %source, "Dashboard update without a squadron list");
            out.dropped += 1;
        }
    }

    if let Some(pulses) = payload.get("pulse_history").and_then(Value::as_array) {
        out.extend(normalize_pulses(pulses, source, received_at));
    }
    out
}

/// Latest pulse per enemy becomes that emitter's detection
fn normalize_pulses(pulses: &[Value], source: SourceTag, received_at: DateTime<Utc>) -> Normalized {
    let mut out = Normalized::default();
    let mut latest: Vec<(String, UpdateFields)> = Vec::new();

    for raw in pulses {
        let pulse = match WirePulse::deserialize(raw) {
            Ok(pulse) => pulse,
            Err(e) => {
                debug!("Dropping malformed pulse: {}", e);
                out.dropped += 1;
                continue;
            }
        };
        let Some(range) = parse_range(&pulse.range) else {
            out.dropped += 1;
            continue;
        };

        let fields = UpdateFields {
            bearing_deg: Some(pulse.angle_deg),
            range: Some(range),
            strength: pulse.strength,
            ..Default::default()
        };
        let id = pulse.from_enemy_id.into_string();
        match latest.iter().position(|(emitter, _)| *emitter == id) {
            Some(pos) => latest[pos].1 = fields,
            None => latest.push((id, fields)),
        }
    }

    out.records.extend(
        latest
            .into_iter()
            .map(|(id, fields)| UpdateRecord::emitter(id, fields, received_at).with_source(source)),
    );
    out
}

fn normalize_canonical(payload: &Value, source: SourceTag) -> Normalized {
    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![payload],
        _ => {
            warn!(source = %source, "Dropping canonical payload that is neither a record nor a list");
            return Normalized::dropped(1);
        }
    };

    let mut out = Normalized::default();
    for item in items {
        match UpdateRecord::deserialize(item) {
            Ok(record) => out.records.push(record.with_source(source)),
            Err(e) => {
                warn!(source = %source, "Dropping malformed canonical record: {}", e);
                out.dropped += 1;
            }
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
