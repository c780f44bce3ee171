//! Per-provider request quotas enforced with `governor`.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::ProviderId;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Request budget published by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub quota_window: Duration,
    pub quota_limit: u32,
}

impl ProviderPolicy {
    pub fn new(provider_id: ProviderId, quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            provider_id,
            quota_window,
            quota_limit,
        }
    }

    /// Free tier: 5 calls per minute.
    pub fn alphavantage_default() -> Self {
        Self::new(ProviderId::Alphavantage, Duration::from_secs(60), 5)
    }

    /// Basic plan: 5 calls per minute.
    pub fn polygon_default() -> Self {
        Self::new(ProviderId::Polygon, Duration::from_secs(60), 5)
    }

    pub fn yahoo_default() -> Self {
        Self::new(ProviderId::Yahoo, Duration::from_secs(1), 10)
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Yahoo => Self::yahoo_default(),
            ProviderId::Polygon => Self::polygon_default(),
            ProviderId::Alphavantage => Self::alphavantage_default(),
        }
    }

    fn quota(&self) -> Quota {
        let limit = NonZeroU32::new(self.quota_limit).unwrap_or(NonZeroU32::MIN);
        let seconds_per_cell = (self.quota_window.as_secs_f64() / f64::from(limit.get())).max(0.001);

        Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
            .unwrap_or_else(|| Quota::per_second(limit))
            .allow_burst(limit)
    }
}

/// Rate limiters keyed by provider. Providers without a policy are unthrottled.
#[derive(Clone, Default)]
pub struct QuotaRegistry {
    limiters: HashMap<ProviderId, Arc<DirectRateLimiter>>,
}

impl QuotaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        ProviderId::ALL
            .into_iter()
            .fold(Self::new(), |registry, provider| {
                registry.with_policy(&ProviderPolicy::default_for(provider))
            })
    }

    pub fn with_policy(mut self, policy: &ProviderPolicy) -> Self {
        self.limiters.insert(
            policy.provider_id,
            Arc::new(RateLimiter::direct(policy.quota())),
        );
        self
    }

    /// Waits until `provider` has budget for one more call.
    pub async fn acquire(&self, provider: ProviderId) {
        if let Some(limiter) = self.limiters.get(&provider) {
            limiter.until_ready().await;
        }
    }

    /// Non-blocking variant of [`QuotaRegistry::acquire`].
    pub fn try_acquire(&self, provider: ProviderId) -> bool {
        self.limiters
            .get(&provider)
            .is_none_or(|limiter| limiter.check().is_ok())
    }
}

impl std::fmt::Debug for QuotaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaRegistry")
            .field("providers", &self.limiters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_limited_to_the_window_quota() {
        let registry = QuotaRegistry::new().with_policy(&ProviderPolicy::new(
            ProviderId::Alphavantage,
            Duration::from_secs(60),
            2,
        ));

        assert!(registry.try_acquire(ProviderId::Alphavantage));
        assert!(registry.try_acquire(ProviderId::Alphavantage));
        assert!(!registry.try_acquire(ProviderId::Alphavantage));
        assert!(registry.try_acquire(ProviderId::Yahoo));
    }

    #[test]
    fn default_policies_match_published_tiers() {
        let policy = ProviderPolicy::alphavantage_default();
        assert_eq!(policy.quota_window, Duration::from_secs(60));
        assert_eq!(policy.quota_limit, 5);
        assert_eq!(ProviderPolicy::default_for(ProviderId::Yahoo).quota_limit, 10);
    }

    #[tokio::test]
    async fn acquire_waits_for_replenishment() {
        let registry = QuotaRegistry::new().with_policy(&ProviderPolicy::new(
            ProviderId::Yahoo,
            Duration::from_millis(100),
            1,
        ));

        let started = std::time::Instant::now();
        registry.acquire(ProviderId::Yahoo).await;
        registry.acquire(ProviderId::Yahoo).await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
