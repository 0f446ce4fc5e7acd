// ZNS service facade
//
// Owns the resolver core, both subscription managers, the metrics
// collector and the alert manager. Every public operation of the
// subsystem goes through here; the multiplexer holds exactly one of
// these.

use ghostbridge_shared::types::{
    CacheEvent, CacheEventType, DomainChangeEvent, MutationResponse, RegisterRequest,
    ResolveRequest, ResolveResponse, SubscriptionEvent, SubscriptionRequest, UpdateRequest,
    ZnsError, ZnsErrorCode,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::alerts::{ActiveAlert, AlertManager};
use crate::cache::CacheStatistics;
use crate::config::ZnsConfig;
use crate::metrics::{HealthState, MetricsCollector, MetricsReport};
use crate::resolver::ZnsResolver;
use crate::subscriptions::{CacheSubscriptionManager, DomainSubscriptionManager};

/// Rate-limit windows tumble on this cadence regardless of the periodic
/// task interval
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Snapshot returned by `/zns/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub health: HealthState,
    pub uptime_seconds: u64,
    pub total_queries: u64,
    pub cache: CacheStatistics,
    pub domain_subscriptions: usize,
    pub cache_subscriptions: usize,
    pub active_alerts: Vec<ActiveAlert>,
}

pub struct ZnsService {
    config: ZnsConfig,
    resolver: ZnsResolver,
    domain_subs: DomainSubscriptionManager,
    cache_subs: CacheSubscriptionManager,
    metrics: Arc<MetricsCollector>,
    alerts: AlertManager,
    last_rate_reset: Mutex<Instant>,
}

impl ZnsService {
    pub fn new(config: ZnsConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricsCollector::new(config.cache.max_memory_bytes as u64));
        let resolver = ZnsResolver::new(
            config.resolver.clone(),
            config.cache.clone(),
            metrics.clone(),
        );
        info!("🧭 ZNS service initialized");
        Ok(Self {
            resolver,
            domain_subs: DomainSubscriptionManager::new(),
            cache_subs: CacheSubscriptionManager::new(),
            metrics,
            alerts: AlertManager::with_default_rules(),
            last_rate_reset: Mutex::new(Instant::now()),
            config,
        })
    }

    pub async fn resolve(&self, request: &ResolveRequest, client_id: &str) -> ResolveResponse {
        let cache_consulted = request.use_cache
            && self.config.resolver.enable_cache
            && crate::validator::is_valid_domain(&request.domain);

        let response = self.resolver.resolve(request, client_id).await;

        // Events trail the response on purpose; subscribers may observe
        // them slightly after the client saw the reply
        if self.config.service.enable_cache_events
            && cache_consulted
            && response.error.as_ref().map(|e| e.code) != Some(ZnsErrorCode::RateLimited)
        {
            let event_type = if response.resolution_info.was_cached {
                CacheEventType::Hit
            } else {
                CacheEventType::Miss
            };
            self.cache_subs
                .publish(&CacheEvent::new(event_type, &request.domain));
        }
        self.drain_cache_events();

        response
    }

    pub async fn register(&self, request: &RegisterRequest, client_id: &str) -> MutationResponse {
        let (response, event) = self.resolver.register_domain(request, client_id).await;
        if let Some(event) = event {
            self.publish_change(event);
        }
        response
    }

    pub async fn update(&self, request: &UpdateRequest, client_id: &str) -> MutationResponse {
        let (response, event) = self.resolver.update_domain(request, client_id).await;
        if let Some(event) = event {
            self.publish_change(event);
        }
        self.drain_cache_events();
        response
    }

    pub fn create_domain_subscription(
        &self,
        request: &SubscriptionRequest,
        client_id: &str,
    ) -> Result<String, ZnsError> {
        if !self.config.service.enable_subscriptions {
            return Err(ZnsError::new(
                ZnsErrorCode::PermissionDenied,
                "Subscriptions are disabled",
            ));
        }
        let id = self.domain_subs.create(client_id, request);
        self.metrics
            .set_active_subscriptions(self.subscription_count() as u64);
        Ok(id)
    }

    pub fn create_cache_subscription(
        &self,
        hits: bool,
        misses: bool,
        evictions: bool,
        client_id: &str,
    ) -> Result<String, ZnsError> {
        if !self.config.service.enable_subscriptions || !self.config.service.enable_cache_events {
            return Err(ZnsError::new(
                ZnsErrorCode::PermissionDenied,
                "Cache subscriptions are disabled",
            ));
        }
        let id = self.cache_subs.create(client_id, hits, misses, evictions);
        self.metrics
            .set_active_subscriptions(self.subscription_count() as u64);
        Ok(id)
    }

    pub fn cancel_subscription(&self, subscription_id: &str) -> bool {
        let removed =
            self.domain_subs.cancel(subscription_id) || self.cache_subs.cancel(subscription_id);
        if removed {
            self.metrics
                .set_active_subscriptions(self.subscription_count() as u64);
        }
        removed
    }

    /// Drain up to `max` pending events for either kind of subscription
    pub fn get_subscription_events(
        &self,
        subscription_id: &str,
        max: usize,
    ) -> Option<Vec<SubscriptionEvent>> {
        if self.domain_subs.contains(subscription_id) {
            return self.domain_subs.get_events(subscription_id, max).map(|events| {
                events.into_iter().map(SubscriptionEvent::Domain).collect()
            });
        }
        self.cache_subs.get_events(subscription_id, max).map(|events| {
            events.into_iter().map(SubscriptionEvent::Cache).collect()
        })
    }

    /// Publish a change event to domain subscribers
    pub fn publish_change(&self, event: DomainChangeEvent) {
        let delivered = self.domain_subs.publish_change(&event);
        debug!(
            "📣 {} event for {} delivered to {} subscriber(s)",
            event.event_type, event.domain, delivered
        );
    }

    /// Clear the resolution cache and notify cache subscribers
    pub fn flush_cache(&self) {
        self.resolver.flush_cache();
        info!("🧹 Resolution cache flushed");
        self.drain_cache_events();
    }

    pub fn status(&self) -> ServiceStatus {
        let report = self.metrics.report();
        ServiceStatus {
            health: report.health,
            uptime_seconds: report.uptime_seconds,
            total_queries: report.total_queries,
            cache: self.resolver.cache_stats(),
            domain_subscriptions: self.domain_subs.count(),
            cache_subscriptions: self.cache_subs.count(),
            active_alerts: self.alerts.active_alerts(),
        }
    }

    pub fn metrics_report(&self) -> MetricsReport {
        self.metrics.report()
    }

    pub fn prometheus(&self) -> String {
        self.metrics.prometheus()
    }

    /// Periodic maintenance: cache cleanup, expiry sweep, rate-limit
    /// window reset, subscription pruning, resource gauges and alert
    /// evaluation. Idempotent and safe under concurrent requests.
    pub async fn run_periodic_tasks(&self) {
        let removed = self.resolver.cleanup_expired();
        if removed > 0 {
            debug!("Periodic cleanup removed {} cache entries", removed);
        }

        for event in self.resolver.native().sweep_expired().await {
            self.publish_change(event);
        }

        {
            let mut last_reset = self.last_rate_reset.lock();
            if last_reset.elapsed() >= RATE_WINDOW {
                self.resolver.reset_rate_limits();
                *last_reset = Instant::now();
            }
        }

        let idle = self.config.service.subscription_idle_timeout_secs;
        let pruned = self.domain_subs.prune_idle(idle) + self.cache_subs.prune_idle(idle);
        if pruned > 0 {
            info!("🔕 Pruned {} idle subscription(s)", pruned);
        }

        self.metrics
            .update_resource_usage(self.resolver.cache_memory_bytes() as u64);
        self.metrics
            .set_active_subscriptions(self.subscription_count() as u64);

        if self.config.service.enable_alerts {
            let transitions = self.alerts.evaluate(&self.metrics.report());
            self.alerts.dispatch(&transitions).await;
        }

        self.drain_cache_events();
    }

    pub fn config(&self) -> &ZnsConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ZnsResolver {
        &self.resolver
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    fn subscription_count(&self) -> usize {
        self.domain_subs.count() + self.cache_subs.count()
    }

    /// Forward evictions and flushes recorded inside the cache to cache
    /// subscribers
    fn drain_cache_events(&self) {
        if !self.config.service.enable_cache_events {
            let _ = self.resolver.take_cache_events();
            return;
        }
        for event in self.resolver.take_cache_events() {
            self.cache_subs.publish(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostbridge_shared::types::{DomainRecord, RecordType};

    fn test_service() -> ZnsService {
        let mut config = ZnsConfig::default();
        config.resolver.enable_dns_fallback = false;
        config.resolver.rate_limit_per_minute = 1_000;
        ZnsService::new(config).unwrap()
    }

    async fn seed(service: &ZnsService, domain: &str) {
        let request = RegisterRequest {
            domain: domain.to_string(),
            owner: "ghost1owner".to_string(),
            records: vec![DomainRecord::new(RecordType::A, domain, "10.0.0.1", 600)],
            expiry: None,
            metadata: None,
            last_updated: 0,
            signature: String::new(),
        };
        let response = service.register(&request, "seeder").await;
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_register_fans_out_to_subscribers() {
        let service = test_service();
        let direct = service
            .create_domain_subscription(
                &SubscriptionRequest {
                    domains: vec!["alice.ghost".to_string()],
                    ..Default::default()
                },
                "c1",
            )
            .unwrap();
        let wildcard = service
            .create_domain_subscription(&SubscriptionRequest::default(), "c2")
            .unwrap();

        seed(&service, "alice.ghost").await;

        let direct_events = service.get_subscription_events(&direct, 10).unwrap();
        let wildcard_events = service.get_subscription_events(&wildcard, 10).unwrap();
        assert_eq!(direct_events.len(), 1);
        assert_eq!(wildcard_events.len(), 1);

        // Drained exactly once
        assert!(service.get_subscription_events(&direct, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_subscription_sees_miss_then_hit() {
        let service = test_service();
        seed(&service, "alice.ghost").await;
        let sub = service
            .create_cache_subscription(true, true, false, "c1")
            .unwrap();

        let request = ResolveRequest::for_domain("alice.ghost");
        let _ = service.resolve(&request, "c1").await;
        let _ = service.resolve(&request, "c1").await;

        let events = service.get_subscription_events(&sub, 10).unwrap();
        let kinds: Vec<CacheEventType> = events
            .iter()
            .map(|e| match e {
                SubscriptionEvent::Cache(c) => c.event_type,
                _ => panic!("unexpected event kind"),
            })
            .collect();
        assert_eq!(kinds, vec![CacheEventType::Miss, CacheEventType::Hit]);
    }

    #[tokio::test]
    async fn test_flush_emits_cache_event() {
        let service = test_service();
        let sub = service
            .create_cache_subscription(false, false, false, "c1")
            .unwrap();

        service.flush_cache();

        let events = service.get_subscription_events(&sub, 10).unwrap();
        assert!(matches!(
            events.as_slice(),
            [SubscriptionEvent::Cache(event)] if event.event_type == CacheEventType::Flush
        ));
    }

    #[tokio::test]
    async fn test_cancel_subscription() {
        let service = test_service();
        let id = service
            .create_domain_subscription(&SubscriptionRequest::default(), "c1")
            .unwrap();
        assert!(service.cancel_subscription(&id));
        assert!(!service.cancel_subscription(&id));
        assert!(service.get_subscription_events(&id, 10).is_none());
    }

    #[tokio::test]
    async fn test_status_reports_components() {
        let service = test_service();
        seed(&service, "alice.ghost").await;
        let _ = service
            .resolve(&ResolveRequest::for_domain("alice.ghost"), "c1")
            .await;

        let status = service.status();
        assert_eq!(status.cache.entries, 1);
        assert!(status.total_queries >= 1);
        assert_eq!(status.domain_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_periodic_tasks_reset_and_sweep() {
        let service = test_service();

        let wildcard = service
            .create_domain_subscription(&SubscriptionRequest::default(), "c1")
            .unwrap();

        // Register a domain that is already expired
        let request = RegisterRequest {
            domain: "old.ghost".to_string(),
            owner: "ghost1owner".to_string(),
            records: vec![],
            expiry: Some(1),
            metadata: None,
            last_updated: 0,
            signature: String::new(),
        };
        let _ = service.register(&request, "c1").await;

        service.run_periodic_tasks().await;

        let events = service.get_subscription_events(&wildcard, 10).unwrap();
        // Registered + Expired both reached the wildcard subscriber
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_subscriptions_are_rejected() {
        let mut config = ZnsConfig::default();
        config.service.enable_subscriptions = false;
        let service = ZnsService::new(config).unwrap();
        let err = service
            .create_domain_subscription(&SubscriptionRequest::default(), "c1")
            .unwrap_err();
        assert_eq!(err.code, ZnsErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_prometheus_surface() {
        let service = test_service();
        let text = service.prometheus();
        assert!(text.contains("zns_queries_total"));
        let report = service.metrics_report();
        assert_eq!(report.total_queries, 0);
    }
}
