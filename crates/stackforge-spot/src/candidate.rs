//! Placement candidates

use serde::{Deserialize, Serialize};
use stackforge_common::{CapacityLevel, CapacityOffering, PricingModel};

use crate::pricing::SavingsAnalysis;

/// A priced spot placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotCandidate {
    /// Region of the market
    pub region: String,
    /// Best zone in the region, if the offering names one
    pub zone: Option<String>,
    /// Instance class quoted
    pub instance_class: String,
    /// USD/hour
    pub price: f64,
    /// Confidence from the capacity offering (0.0 - 1.0)
    pub capacity_confidence: f64,
}

impl SpotCandidate {
    pub(crate) fn from_quote(price: f64, offering: &CapacityOffering) -> Self {
        Self {
            region: offering.region.clone(),
            zone: offering.best_zone().map(|z| z.zone.clone()),
            instance_class: offering.instance_class.clone(),
            price,
            capacity_confidence: offering.confidence(),
        }
    }

    /// Display bucket for the confidence
    pub fn capacity_level(&self) -> CapacityLevel {
        CapacityLevel::from_confidence(self.capacity_confidence)
    }
}

/// Where compute will be launched, and on what terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Launch region
    pub region: String,
    /// Launch zone, if pinned
    pub zone: Option<String>,
    /// Instance class to launch
    pub instance_class: String,
    /// Spot or on-demand
    pub pricing: PricingModel,
    /// USD/hour, when known
    pub hourly_price: Option<f64>,
    /// Spot placements only
    pub capacity_confidence: Option<f64>,
    /// Present for spot placements with a known on-demand price
    pub savings: Option<SavingsAnalysis>,
}

impl Placement {
    /// Spot placement from a candidate, with savings when the on-demand price is known
    pub fn spot(candidate: SpotCandidate, on_demand_price: Option<f64>) -> Self {
        let savings = on_demand_price
            .map(|od| SavingsAnalysis::new(candidate.instance_class.clone(), candidate.price, od));
        Self {
            region: candidate.region,
            zone: candidate.zone,
            instance_class: candidate.instance_class,
            pricing: PricingModel::Spot,
            hourly_price: Some(candidate.price),
            capacity_confidence: Some(candidate.capacity_confidence),
            savings,
        }
    }

    /// On-demand placement at list price
    pub fn on_demand(region: impl Into<String>, instance_class: impl Into<String>, price: Option<f64>) -> Self {
        Self {
            region: region.into(),
            zone: None,
            instance_class: instance_class.into(),
            pricing: PricingModel::OnDemand,
            hourly_price: price,
            capacity_confidence: None,
            savings: None,
        }
    }

    /// Launched on spot capacity
    pub fn is_spot(&self) -> bool {
        self.pricing == PricingModel::Spot
    }
}
