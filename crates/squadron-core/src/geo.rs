//! Planar geometry and RWR range bucketing for unit and emitter positions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Approximate kilometres per degree, used to turn map-plane distances into km
pub const KM_PER_DEGREE: f64 = 111.0;

/// Upper bound (exclusive) of the NEAR bucket in km
pub const NEAR_RANGE_KM: f64 = 5.0;

/// Upper bound (exclusive) of the MID bucket in km
pub const MID_RANGE_KM: f64 = 15.0;

/// 2D map coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both coordinates are finite numbers
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Euclidean distance in map units
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Distance in kilometres, treating map units as degrees
    pub fn distance_km(&self, other: &Position) -> f64 {
        self.distance_to(other) * KM_PER_DEGREE
    }

    /// Bearing from this position to `other` in degrees (0-360),
    /// measured counter-clockwise from the +x axis
    pub fn bearing_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        normalize_bearing(dy.atan2(dx).to_degrees())
    }

    /// Move along `heading_deg` by `distance` map units
    pub fn offset(&self, heading_deg: f64, distance: f64) -> Position {
        let rad = heading_deg.to_radians();
        Position::new(self.x + rad.cos() * distance, self.y + rad.sin() * distance)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.x, self.y)
    }
}

/// Wrap any angle into [0, 360)
pub fn normalize_bearing(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Ordinal RWR range bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeBucket {
    Near,
    Mid,
    Far,
}

impl RangeBucket {
    /// Bucket a distance in kilometres
    pub fn from_distance_km(distance_km: f64) -> Self {
        if distance_km < NEAR_RANGE_KM {
            Self::Near
        } else if distance_km < MID_RANGE_KM {
            Self::Mid
        } else {
            Self::Far
        }
    }

    /// Radar-chart ordinal: NEAR=1, MID=2, FAR=3
    pub fn ordinal(&self) -> u8 {
        match self {
            RangeBucket::Near => 1,
            RangeBucket::Mid => 2,
            RangeBucket::Far => 3,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            1 => Some(Self::Near),
            2 => Some(Self::Mid),
            3 => Some(Self::Far),
            _ => None,
        }
    }
}

impl Default for RangeBucket {
    fn default() -> Self {
        Self::Far
    }
}

impl fmt::Display for RangeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBucket::Near => write!(f, "NEAR"),
            RangeBucket::Mid => write!(f, "MID"),
            RangeBucket::Far => write!(f, "FAR"),
        }
    }
}

impl FromStr for RangeBucket {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEAR" | "1" => Ok(Self::Near),
            "MID" | "2" => Ok(Self::Mid),
            "FAR" | "3" => Ok(Self::Far),
            _ => Err(CoreError::invalid_range(s)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
