use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::cache::{cache_key, CacheError, CacheStore};
use super::estimate::CategoryTable;
use super::facts::{normalize_name, CachedFacts, Resolution, SourceTag};
use super::sources::{PrimarySource, SecondarySource, SourceError};
use crate::config::NutritionConfig;

/// Result of one fallback tier: a scaled answer or a miss that hands over to
/// the next tier.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Hit(Resolution),
    Miss,
}

#[async_trait]
pub trait FallbackTier: Send + Sync {
    fn tag(&self) -> SourceTag;
    async fn attempt(&self, key: &str, food_name: &str, portion_grams: f64) -> TierOutcome;
}

struct CacheTier {
    cache: Arc<dyn CacheStore>,
    timeout: Duration,
}

#[async_trait]
impl FallbackTier for CacheTier {
    fn tag(&self) -> SourceTag {
        SourceTag::Cache
    }

    async fn attempt(&self, key: &str, food_name: &str, portion_grams: f64) -> TierOutcome {
        let read = tokio::time::timeout(self.timeout, self.cache.get(key))
            .await
            .unwrap_or(Err(CacheError::Timeout));
        match read {
            Ok(Some(entry)) => TierOutcome::Hit(Resolution {
                nutrition: entry.per_100g.scaled(portion_grams),
                source: SourceTag::Cache,
                portion_grams,
                category: None,
                matched_name: entry.food_name,
            }),
            Ok(None) => TierOutcome::Miss,
            Err(e) => {
                warn!(error = %e, food = food_name, "cache read failed; querying sources");
                TierOutcome::Miss
            }
        }
    }
}

struct PrimaryTier {
    source: Arc<dyn PrimarySource>,
    cache: Arc<dyn CacheStore>,
    timeout: Duration,
    cache_timeout: Duration,
    ttl: Duration,
}

#[async_trait]
impl FallbackTier for PrimaryTier {
    fn tag(&self) -> SourceTag {
        SourceTag::PrimarySource
    }

    async fn attempt(&self, key: &str, food_name: &str, portion_grams: f64) -> TierOutcome {
        let found = tokio::time::timeout(self.timeout, self.source.lookup(food_name))
            .await
            .unwrap_or(Err(SourceError::Timeout));
        let hit = match found {
            Ok(Some(hit)) => hit,
            Ok(None) => return TierOutcome::Miss,
            Err(e) => {
                warn!(error = %e, food = food_name, "primary source failed");
                return TierOutcome::Miss;
            }
        };

        let entry = CachedFacts {
            per_100g: hit.facts,
            source: SourceTag::PrimarySource,
            food_name: hit.matched_name.clone(),
        };
        let write = tokio::time::timeout(self.cache_timeout, self.cache.set(key, &entry, self.ttl))
            .await
            .unwrap_or(Err(CacheError::Timeout));
        if let Err(e) = write {
            warn!(error = %e, food = food_name, "cache write failed");
        }

        TierOutcome::Hit(Resolution {
            nutrition: hit.facts.scaled(portion_grams),
            source: SourceTag::PrimarySource,
            portion_grams,
            category: None,
            matched_name: hit.matched_name,
        })
    }
}

struct SecondaryTier {
    source: Arc<dyn SecondarySource>,
    timeout: Duration,
}

#[async_trait]
impl FallbackTier for SecondaryTier {
    fn tag(&self) -> SourceTag {
        SourceTag::SecondarySource
    }

    async fn attempt(&self, _key: &str, food_name: &str, portion_grams: f64) -> TierOutcome {
        let found = tokio::time::timeout(
            self.timeout,
            self.source.lookup_portion(food_name, portion_grams),
        )
        .await
        .unwrap_or(Err(SourceError::Timeout));
        match found {
            Ok(Some(hit)) => TierOutcome::Hit(Resolution {
                nutrition: hit.facts,
                source: SourceTag::SecondarySource,
                portion_grams,
                category: None,
                matched_name: hit.matched_name,
            }),
            Ok(None) => TierOutcome::Miss,
            Err(e) => {
                warn!(error = %e, food = food_name, "secondary source failed");
                TierOutcome::Miss
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub primary_timeout: Duration,
    pub secondary_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(604_800),
            cache_timeout: Duration::from_millis(250),
            primary_timeout: Duration::from_secs(5),
            secondary_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&NutritionConfig> for ResolverSettings {
    fn from(cfg: &NutritionConfig) -> Self {
        Self {
            cache_ttl: Duration::from_secs(cfg.cache_ttl_secs),
            cache_timeout: cfg.cache_timeout(),
            primary_timeout: cfg.primary_timeout(),
            secondary_timeout: cfg.secondary_timeout(),
        }
    }
}

/// Cache-first resolver: cache, primary source, secondary source, then the
/// keyword estimate. Only the primary tier writes to the cache.
pub struct NutritionResolver {
    tiers: Vec<Box<dyn FallbackTier>>,
    cache: Arc<dyn CacheStore>,
    estimates: CategoryTable,
}

impl NutritionResolver {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        primary: Arc<dyn PrimarySource>,
        secondary: Arc<dyn SecondarySource>,
        settings: ResolverSettings,
    ) -> Self {
        let tiers: Vec<Box<dyn FallbackTier>> = vec![
            Box::new(CacheTier {
                cache: Arc::clone(&cache),
                timeout: settings.cache_timeout,
            }),
            Box::new(PrimaryTier {
                source: primary,
                cache: Arc::clone(&cache),
                timeout: settings.primary_timeout,
                cache_timeout: settings.cache_timeout,
                ttl: settings.cache_ttl,
            }),
            Box::new(SecondaryTier {
                source: secondary,
                timeout: settings.secondary_timeout,
            }),
        ];
        Self {
            tiers,
            cache,
            estimates: CategoryTable::default(),
        }
    }

    pub fn with_estimates(mut self, estimates: CategoryTable) -> Self {
        self.estimates = estimates;
        self
    }

    /// Always answers. Non-positive or non-finite portions resolve as 0 g.
    pub async fn resolve(&self, food_name: &str, portion_grams: f64) -> Resolution {
        let portion_grams = if portion_grams.is_finite() && portion_grams > 0.0 {
            portion_grams
        } else {
            0.0
        };
        let key = cache_key(&normalize_name(food_name));

        for tier in &self.tiers {
            if let TierOutcome::Hit(found) = tier.attempt(&key, food_name, portion_grams).await {
                debug!(food = food_name, source = %found.source, "nutrition resolved");
                return found;
            }
            debug!(food = food_name, tier = %tier.tag(), "tier miss");
        }

        self.estimate(food_name, portion_grams)
    }

    /// Sweeps expired cache entries. Failures are logged and count as zero.
    pub async fn purge_expired_cache(&self) -> usize {
        match self.cache.purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "cache purge failed");
                0
            }
        }
    }

    pub fn estimate(&self, food_name: &str, portion_grams: f64) -> Resolution {
        let rule = self.estimates.classify(food_name);
        debug!(food = food_name, category = rule.category, "using estimated profile");
        Resolution {
            nutrition: rule.per_100g.scaled(portion_grams),
            source: SourceTag::Estimated,
            portion_grams,
            category: Some(rule.category.to_string()),
            matched_name: None,
        }
    }
}

/// Fault raised when a resolver is asked something that breaks its
/// contract; it fails the enclosing job instead of degrading.
#[derive(Debug, Error)]
pub enum ResolveFault {
    #[error("invalid portion {grams} g for {food:?}")]
    InvalidPortion { food: String, grams: f64 },
    #[error("resolver fault: {0}")]
    Internal(String),
}

/// The seam the analysis pipeline resolves detected foods through.
#[async_trait]
pub trait FoodResolver: Send + Sync {
    async fn resolve_food(
        &self,
        food_name: &str,
        portion_grams: f64,
    ) -> Result<Resolution, ResolveFault>;
}

#[async_trait]
impl FoodResolver for NutritionResolver {
    async fn resolve_food(
        &self,
        food_name: &str,
        portion_grams: f64,
    ) -> Result<Resolution, ResolveFault> {
        if !portion_grams.is_finite() || portion_grams <= 0.0 {
            return Err(ResolveFault::InvalidPortion {
                food: food_name.to_string(),
                grams: portion_grams,
            });
        }
        Ok(self.resolve(food_name, portion_grams).await)
    }
}
