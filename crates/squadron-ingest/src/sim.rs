//! Simulated squadron
//!
//! Stands in for the backend when no live feed is configured. Every fetch
//! advances the world one tick and returns the backend's dashboard shape:
//! jets wander and burn fuel, threats drift, and each threat pulses every
//! jet it is not already locking. Strong pulses land in the jet's RWR
//! history and, when an outbound channel is attached, are reported as
//! `pulse_hit` events.

use crate::error::IngestResult;
use crate::source::PullSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use squadron_core::{ChannelEvent, EmitterId, Position, PulseHit, RangeBucket, SourceTag, UnitId};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, info};

const SQUADRON_SIZE: usize = 5;
const SQUADRON_ORIGIN: Position = Position { x: 22.30, y: 84.80 };
const SQUADRON_SPREAD: f64 = 0.1;
const THREAT_SITES: [Position; 2] = [Position { x: 22.25, y: 84.85 }, Position { x: 22.35, y: 84.83 }];

const JET_SPEED: f64 = 0.001;
const THREAT_SPEED: f64 = 0.0005;
const JET_TURN_DEG: f64 = 5.0;
const THREAT_TURN_DEG: f64 = 2.0;
const FUEL_BURN: f64 = 0.05;
const START_WEAPONS: u32 = 4;
const LOW_FUEL: f64 = 25.0;

/// Pulses stronger than this are logged and can lock a jet
const PULSE_LOCK_STRENGTH: f64 = 30.0;
const SIGNAL_HISTORY: usize = 10;

struct SimJet {
    id: u32,
    position: Position,
    heading: f64,
    fuel: f64,
    weapons: u32,
    locked_enemy: Option<u32>,
    signals: VecDeque<Value>,
}

struct SimThreat {
    id: u32,
    position: Position,
    heading: f64,
}

struct World {
    rng: StdRng,
    jets: Vec<SimJet>,
    threats: Vec<SimThreat>,
    ticks: u64,
}

impl World {
    fn new(mut rng: StdRng, jets: &[Position], threats: &[Position]) -> Self {
        let jets = jets
            .iter()
            .zip(1..)
            .map(|(&position, id)| SimJet {
                id,
                position,
                heading: rng.gen_range(0.0..360.0),
                fuel: 100.0,
                weapons: START_WEAPONS,
                locked_enemy: None,
                signals: VecDeque::with_capacity(SIGNAL_HISTORY),
            })
            .collect();
        let threats = threats
            .iter()
            .zip(1..)
            .map(|(&position, id)| SimThreat {
                id,
                position,
                heading: rng.gen_range(0.0..360.0),
            })
            .collect();

        Self {
            rng,
            jets,
            threats,
            ticks: 0,
        }
    }

    fn tick(&mut self, now: DateTime<Utc>) -> (Value, Vec<PulseHit>) {
        self.ticks += 1;

        for jet in &mut self.jets {
            jet.heading += self.rng.gen_range(-JET_TURN_DEG..JET_TURN_DEG);
            jet.position = jet.position.offset(jet.heading, JET_SPEED);
            jet.fuel = (jet.fuel - FUEL_BURN).max(0.0);
        }
        for threat in &mut self.threats {
            threat.heading += self.rng.gen_range(-THREAT_TURN_DEG..THREAT_TURN_DEG);
            threat.position = threat.position.offset(threat.heading, THREAT_SPEED);
        }

        let clock = now.format("%H:%M:%S").to_string();
        let mut pulses = Vec::new();
        let mut hits = Vec::new();

        for threat in &self.threats {
            for jet in &mut self.jets {
                if jet.locked_enemy == Some(threat.id) {
                    continue;
                }
                let distance_km = threat.position.distance_km(&jet.position);
                let bearing = jet.position.bearing_to(&threat.position);
                let range = RangeBucket::from_distance_km(distance_km).to_string();
                let strength = (100.0 - 2.0 * distance_km).max(0.0);

                pulses.push(json!({
                    "fromEnemyId": threat.id,
                    "toJetId": jet.id,
                    "strength": strength,
                    "timestamp": clock,
                    "angle_deg": bearing,
                    "range": range,
                }));

                if strength > PULSE_LOCK_STRENGTH {
                    if jet.signals.len() == SIGNAL_HISTORY {
                        jet.signals.pop_front();
                    }
                    jet.signals.push_back(json!({
                        "timestamp": clock,
                        "frequency_ghz": self.rng.gen_range(8.0..18.0),
                        "strength_db": -strength,
                        "angle_deg": bearing,
                        "range": range,
                    }));
                    jet.locked_enemy.get_or_insert(threat.id);
                    hits.push(PulseHit {
                        jet_id: UnitId::from(u64::from(jet.id)),
                        enemy_id: EmitterId::new(threat.id.to_string()),
                        timestamp: now,
                        position: jet.position,
                    });
                }
            }
        }

        let squadron: Vec<Value> = self
            .jets
            .iter()
            .map(|jet| {
                json!({
                    "id": jet.id,
                    "name": jet.id.to_string(),
                    "status": if jet.fuel < LOW_FUEL { "WARNING" } else { "ACTIVE" },
                    "fuel": jet.fuel,
                    "weapons": jet.weapons,
                    "position": jet.position,
                    "signal_history": jet.signals,
                    "locked_enemy": jet.locked_enemy,
                })
            })
            .collect();

        let payload = json!({
            "squadron": squadron,
            "pulse_history": pulses,
        });
        (payload, hits)
    }
}

/// Pull source that simulates a squadron under threat
pub struct SimulatedSource {
    world: Mutex<World>,
    outbound: Option<mpsc::Sender<ChannelEvent>>,
}

impl SimulatedSource {
    /// Default squadron scattered around its origin. A seed makes runs
    /// reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let jets: Vec<Position> = (0..SQUADRON_SIZE)
            .map(|_| {
                Position::new(
                    SQUADRON_ORIGIN.x + rng.gen_range(-SQUADRON_SPREAD..SQUADRON_SPREAD),
                    SQUADRON_ORIGIN.y + rng.gen_range(-SQUADRON_SPREAD..SQUADRON_SPREAD),
                )
            })
            .collect();

        info!("🎮 Simulation started with {} jets and {} threats", jets.len(), THREAT_SITES.len());
        Self::with_layout(&jets, &THREAT_SITES, rng)
    }

    /// Explicit jet and threat starting positions
    pub fn from_positions(jets: &[Position], threats: &[Position], seed: u64) -> Self {
        Self::with_layout(jets, threats, StdRng::seed_from_u64(seed))
    }

    fn with_layout(jets: &[Position], threats: &[Position], rng: StdRng) -> Self {
        Self {
            world: Mutex::new(World::new(rng, jets, threats)),
            outbound: None,
        }
    }

    /// Report pulse hits to the backend through `outbound`
    pub fn with_outbound(mut self, outbound: mpsc::Sender<ChannelEvent>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn ticks(&self) -> u64 {
        self.world.lock().ticks
    }
}

#[async_trait]
impl PullSource for SimulatedSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Simulated
    }

    async fn fetch(&self) -> IngestResult<Value> {
        let (payload, hits) = self.world.lock().tick(Utc::now());

        if let Some(outbound) = &self.outbound {
            for hit in &hits {
                if let Err(e) = outbound.try_send(ChannelEvent::pulse_hit(hit)?) {
                    debug!("Dropping pulse hit for jet {}: {}", hit.jet_id, e);
                }
            }
        }
        Ok(payload)
    }
}

// ============================================================================
// TESTS
// ============================================================================
