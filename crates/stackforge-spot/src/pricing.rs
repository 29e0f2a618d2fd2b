//! On-demand pricing and savings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// On-demand hourly prices (USD), used when spot capacity runs out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnDemandPricing {
    prices: BTreeMap<String, f64>,
}

impl Default for OnDemandPricing {
    fn default() -> Self {
        let prices = [
            ("g4dn.xlarge", 1.19),
            ("g4dn.2xlarge", 2.38),
            ("g4ad.xlarge", 0.95),
            ("g5.xlarge", 1.21),
        ]
        .into_iter()
        .map(|(class, price)| (class.to_string(), price))
        .collect();

        Self { prices }
    }
}

impl OnDemandPricing {
    /// Set or replace the price of one class
    pub fn with_override(mut self, instance_class: impl Into<String>, price: f64) -> Self {
        self.prices.insert(instance_class.into(), price);
        self
    }

    /// USD/hour for a class, if known
    pub fn price(&self, instance_class: &str) -> Option<f64> {
        self.prices.get(instance_class).copied()
    }

    /// Classes with a known price, alphabetically
    pub fn classes(&self) -> Vec<String> {
        self.prices.keys().cloned().collect()
    }
}

/// Savings of a spot placement versus on-demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsAnalysis {
    /// Instance class compared
    pub instance_class: String,
    /// Spot USD/hour
    pub spot_price: f64,
    /// On-demand USD/hour
    pub on_demand_price: f64,
    /// USD saved per hour
    pub hourly_savings: f64,
    /// USD saved per day
    pub daily_savings: f64,
    /// 30-day month
    pub monthly_savings: f64,
    /// Share of the on-demand price saved
    pub savings_percent: f64,
}

impl SavingsAnalysis {
    /// Compare one spot price with its on-demand price
    pub fn new(instance_class: impl Into<String>, spot_price: f64, on_demand_price: f64) -> Self {
        let hourly = on_demand_price - spot_price;
        let percent = if on_demand_price > 0.0 {
            hourly / on_demand_price * 100.0
        } else {
            0.0
        };

        Self {
            instance_class: instance_class.into(),
            spot_price,
            on_demand_price,
            hourly_savings: hourly,
            daily_savings: hourly * 24.0,
            monthly_savings: hourly * 24.0 * 30.0,
            savings_percent: percent,
        }
    }
}
