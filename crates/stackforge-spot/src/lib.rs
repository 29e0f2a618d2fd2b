//! StackForge Spot Capacity Selector
//!
//! Chooses where compute lands: the cheapest `(region, zone, instance class)`
//! whose capacity confidence clears a threshold, searching fallback classes
//! before giving up. Giving up means on-demand pricing in the primary region.
//!
//! # Search
//!
//! ```text
//!   desired class ──► [region 1, region 2, …] ──► qualified? ──► cheapest
//!         │                                          │ none
//!         ▼                                          ▼
//!   fallback class 1 ──► [regions] ──► …      NoCapacityAvailable
//!                                                    │
//!                                                    ▼
//!                                          on-demand, first region
//! ```
//!
//! Price and capacity lookups go through the retry engine and a TTL cache;
//! fleet queries use a separate, longer-lived cache.

#![warn(missing_docs)]

pub mod candidate;
pub mod error;
pub mod pricing;
pub mod selector;

pub use candidate::{Placement, SpotCandidate};
pub use error::{Result, SpotError};
pub use pricing::{OnDemandPricing, SavingsAnalysis};
pub use selector::{SelectorConfig, SpotSelector};
