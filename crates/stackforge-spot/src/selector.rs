//! Spot selector

use moka::future::Cache;
use stackforge_common::{CloudProvider, CapacityOffering, ProviderError, ProviderErrorKind};
use stackforge_resilience::{retry_with_backoff_if, RetryError, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

use crate::candidate::{Placement, SpotCandidate};
use crate::error::{Result, SpotError};
use crate::pricing::OnDemandPricing;

/// Selector tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    /// Candidates below this confidence never qualify
    pub min_confidence: f64,
    /// Candidates above this price never qualify
    pub max_price: Option<f64>,
    /// TTL of single `(class, region)` lookups
    pub price_ttl: Duration,
    /// TTL of fleet (multi-type) lookups
    pub bulk_ttl: Duration,
    /// Entries kept per cache
    pub cache_capacity: u64,
    /// Applied to transient lookup failures only
    pub retry: RetryPolicy,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_price: None,
            price_ttl: Duration::from_secs(300),
            bulk_ttl: Duration::from_secs(3600),
            cache_capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Quote {
    price: f64,
    offering: CapacityOffering,
}

type FleetKey = (Vec<String>, Vec<String>);

/// Spot capacity selector
pub struct SpotSelector {
    provider: Arc<dyn CloudProvider>,
    config: SelectorConfig,
    on_demand: OnDemandPricing,
    quotes: Cache<(String, String), Quote>,
    fleet_quotes: Cache<FleetKey, Vec<SpotCandidate>>,
}

impl SpotSelector {
    /// Selector over one provider
    pub fn new(provider: Arc<dyn CloudProvider>, config: SelectorConfig) -> Self {
        let quotes = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.price_ttl)
            .build();
        let fleet_quotes = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.bulk_ttl)
            .build();

        Self {
            provider,
            config,
            on_demand: OnDemandPricing::default(),
            quotes,
            fleet_quotes,
        }
    }

    /// Replace the built-in on-demand price table
    pub fn with_on_demand_pricing(mut self, pricing: OnDemandPricing) -> Self {
        self.on_demand = pricing;
        self
    }

    /// Active settings
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// On-demand price table
    pub fn on_demand_pricing(&self) -> &OnDemandPricing {
        &self.on_demand
    }

    /// Cheapest qualifying spot placement.
    ///
    /// Regions are searched in the order given; `fallback_classes` are tried
    /// in order only when no region qualifies for the desired class.
    #[tracing::instrument(skip(self))]
    pub async fn select_placement(
        &self,
        desired_class: &str,
        candidate_regions: &[String],
        fallback_classes: &[String],
    ) -> Result<SpotCandidate> {
        if candidate_regions.is_empty() {
            return Err(SpotError::NoCandidateRegions);
        }

        for tier in self.class_tiers(desired_class, fallback_classes) {
            let ranked = self.rank(&tier, candidate_regions).await?;
            if let Some(best) = ranked.into_iter().next() {
                tracing::info!(
                    "selected {} in {} at ${:.3}/hr (confidence {:.2})",
                    best.instance_class,
                    best.region,
                    best.price,
                    best.capacity_confidence
                );
                return Ok(best);
            }
            tracing::warn!("no qualifying spot capacity for [{}]", tier.join(", "));
        }

        Err(self.exhausted(desired_class, candidate_regions, fallback_classes))
    }

    /// `count` placements spread round-robin over the qualifying
    /// `(region, class)` pairs, cheapest pair first
    #[tracing::instrument(skip(self))]
    pub async fn select_fleet(
        &self,
        desired_class: &str,
        candidate_regions: &[String],
        fallback_classes: &[String],
        count: usize,
    ) -> Result<Vec<SpotCandidate>> {
        if candidate_regions.is_empty() {
            return Err(SpotError::NoCandidateRegions);
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let classes: Vec<String> = self
            .class_tiers(desired_class, fallback_classes)
            .into_iter()
            .flatten()
            .collect();

        let key = (classes.clone(), candidate_regions.to_vec());
        let pairs = match self.fleet_quotes.get(&key).await {
            Some(pairs) => {
                tracing::debug!("fleet quote cache hit");
                pairs
            }
            None => {
                let pairs = self.rank(&classes, candidate_regions).await?;
                self.fleet_quotes.insert(key, pairs.clone()).await;
                pairs
            }
        };

        if pairs.is_empty() {
            return Err(self.exhausted(desired_class, candidate_regions, fallback_classes));
        }

        Ok((0..count).map(|i| pairs[i % pairs.len()].clone()).collect())
    }

    /// Spot placement, or on-demand in the first region when spot runs out
    pub async fn place(
        &self,
        desired_class: &str,
        candidate_regions: &[String],
        fallback_classes: &[String],
    ) -> Result<Placement> {
        match self.select_placement(desired_class, candidate_regions, fallback_classes).await {
            Ok(candidate) => {
                let on_demand = self.on_demand.price(&candidate.instance_class);
                Ok(Placement::spot(candidate, on_demand))
            }
            Err(SpotError::NoCapacityAvailable { .. }) => {
                let class = self.resolve_class(desired_class, fallback_classes);
                let region = candidate_regions
                    .first()
                    .cloned()
                    .ok_or(SpotError::NoCandidateRegions)?;
                tracing::warn!("falling back to on-demand {} in {}", class, region);
                let price = self.on_demand.price(&class);
                Ok(Placement::on_demand(region, class, price))
            }
            Err(e) => Err(e),
        }
    }

    /// Drop every cached lookup
    pub fn invalidate_cache(&self) {
        self.quotes.invalidate_all();
        self.fleet_quotes.invalidate_all();
    }

    /// `auto` searches every class with a known on-demand price as one tier
    fn class_tiers(&self, desired_class: &str, fallback_classes: &[String]) -> Vec<Vec<String>> {
        let first = if desired_class == "auto" {
            self.on_demand.classes()
        } else {
            vec![desired_class.to_string()]
        };

        let mut seen: Vec<String> = first.clone();
        let mut tiers = vec![first];
        for class in fallback_classes {
            if !seen.contains(class) {
                seen.push(class.clone());
                tiers.push(vec![class.clone()]);
            }
        }
        tiers
    }

    fn resolve_class(&self, desired_class: &str, fallback_classes: &[String]) -> String {
        if desired_class != "auto" {
            return desired_class.to_string();
        }
        fallback_classes
            .first()
            .cloned()
            .or_else(|| self.on_demand.classes().into_iter().next())
            .unwrap_or_else(|| desired_class.to_string())
    }

    /// Qualifying candidates for `classes` x `regions`, cheapest first.
    /// Ties keep region priority order.
    async fn rank(&self, classes: &[String], regions: &[String]) -> Result<Vec<SpotCandidate>> {
        let mut qualified = Vec::new();

        for class in classes {
            for region in regions {
                let quote = match self.quote(class, region).await {
                    Ok(quote) => quote,
                    Err(e) => match e.last_error.kind() {
                        ProviderErrorKind::QuotaExceeded | ProviderErrorKind::PermissionDenied => {
                            return Err(SpotError::Provider(e.into_inner()));
                        }
                        ProviderErrorKind::TransientNetwork => {
                            tracing::warn!(
                                "skipping {} in {} after {} attempt(s): {}",
                                class,
                                region,
                                e.attempts,
                                e.last_error
                            );
                            continue;
                        }
                        ProviderErrorKind::CapacityUnavailable => {
                            tracing::debug!("no {} market in {}", class, region);
                            continue;
                        }
                    },
                };

                let candidate = SpotCandidate::from_quote(quote.price, &quote.offering);
                if self.qualifies(&candidate) {
                    qualified.push(candidate);
                } else {
                    tracing::debug!(
                        "rejected {} in {}: ${:.3}/hr, confidence {:.2}",
                        class,
                        region,
                        candidate.price,
                        candidate.capacity_confidence
                    );
                }
            }
        }

        qualified.sort_by(|a, b| a.price.total_cmp(&b.price));
        Ok(qualified)
    }

    fn qualifies(&self, candidate: &SpotCandidate) -> bool {
        candidate.capacity_confidence >= self.config.min_confidence
            && self.config.max_price.map_or(true, |max| candidate.price <= max)
    }

    async fn quote(&self, instance_class: &str, region: &str) -> std::result::Result<Quote, RetryError<ProviderError>> {
        let key = (instance_class.to_string(), region.to_string());
        if let Some(quote) = self.quotes.get(&key).await {
            tracing::debug!("quote cache hit for {} in {}", instance_class, region);
            return Ok(quote);
        }

        let quote = retry_with_backoff_if(
            &self.config.retry,
            || self.fetch_quote(instance_class, region),
            |e: &ProviderError| e.kind() == ProviderErrorKind::TransientNetwork,
        )
        .await?;

        self.quotes.insert(key, quote.clone()).await;
        Ok(quote)
    }

    async fn fetch_quote(&self, instance_class: &str, region: &str) -> std::result::Result<Quote, ProviderError> {
        let price = self.provider.get_spot_price(instance_class, region).await?;
        let offering = self.provider.list_capacity_offerings(instance_class, region).await?;
        Ok(Quote { price, offering })
    }

    fn exhausted(&self, desired_class: &str, regions: &[String], fallback_classes: &[String]) -> SpotError {
        let classes = self
            .class_tiers(desired_class, fallback_classes)
            .into_iter()
            .flatten()
            .collect();
        SpotError::NoCapacityAvailable {
            classes,
            regions: regions.to_vec(),
        }
    }
}
