//! Capacity offerings and confidence scoring

use serde::{Deserialize, Serialize};

/// Capacity of one availability zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCapacity {
    /// Zone name, e.g. `us-east-1a`
    pub zone: String,
    /// Whether the zone currently offers the instance class
    pub available: bool,
    /// Recent interruption frequency (0.0 - 1.0)
    pub interruption_rate: f64,
}

impl ZoneCapacity {
    /// Zone entry
    pub fn new(zone: impl Into<String>, available: bool, interruption_rate: f64) -> Self {
        Self {
            zone: zone.into(),
            available,
            interruption_rate,
        }
    }
}

/// Capacity offering for an instance class in a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityOffering {
    /// Instance class offered
    pub instance_class: String,
    /// Region the zones belong to
    pub region: String,
    /// Per-zone capacity
    pub zones: Vec<ZoneCapacity>,
}

impl CapacityOffering {
    /// Offering with no zones yet
    pub fn new(instance_class: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            instance_class: instance_class.into(),
            region: region.into(),
            zones: Vec::new(),
        }
    }

    /// Add a zone
    pub fn with_zone(mut self, zone: ZoneCapacity) -> Self {
        self.zones.push(zone);
        self
    }

    /// Available zone with the lowest interruption rate
    pub fn best_zone(&self) -> Option<&ZoneCapacity> {
        self.zones
            .iter()
            .filter(|z| z.available)
            .min_by(|a, b| a.interruption_rate.total_cmp(&b.interruption_rate))
    }

    /// Likelihood (0.0 - 1.0) that a placement here succeeds.
    ///
    /// The best zone's survival rate, scaled by the share of zones that
    /// still offer the class.
    pub fn confidence(&self) -> f64 {
        let Some(best) = self.best_zone() else {
            return 0.0;
        };
        let available = self.zones.iter().filter(|z| z.available).count() as f64;
        let survival = (1.0 - best.interruption_rate).clamp(0.0, 1.0);
        survival * (available / self.zones.len() as f64)
    }
}

/// Coarse capacity bucket for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityLevel {
    /// Below [`CapacityLevel::MEDIUM`]
    Low,
    /// Between the two bounds
    Medium,
    /// At or above [`CapacityLevel::HIGH`]
    High,
}

impl CapacityLevel {
    /// Lower bound of the `High` bucket
    pub const HIGH: f64 = 0.7;
    /// Lower bound of the `Medium` bucket
    pub const MEDIUM: f64 = 0.4;

    /// Bucket for a confidence score
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= Self::HIGH {
            Self::High
        } else if confidence >= Self::MEDIUM {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Minimum confidence that lands in this bucket
    pub fn threshold(&self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => Self::MEDIUM,
            Self::High => Self::HIGH,
        }
    }
}

impl std::fmt::Display for CapacityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}
