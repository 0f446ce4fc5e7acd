// Resolver core: category routing, ordered fan-out across upstream
// adapters, cache integration and per-query metrics
//
// Chain order by category:
//   identity/infrastructure  [native, dns_fallback]
//   ens_bridge               [ens] if enabled else [dns_fallback]
//   unstoppable_bridge       [ud] if enabled else [dns_fallback]
//   experimental             enabled subset of [native, ens, ud, dns_fallback]

use ghostbridge_shared::types::{
    CacheEvent, DomainChangeEvent, DomainData, MutationResponse, RegisterRequest, ResolutionSource,
    ResolveRequest, ResolveResponse, UpdateRequest, ZnsError, ZnsErrorCode,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::{CacheStatistics, ResolutionCache};
use crate::config::{CacheConfig, ResolverConfig};
use crate::metrics::MetricsCollector;
use crate::resolvers::{
    DnsFallbackResolver, EnsResolver, NativeResolver, UnstoppableResolver, UpstreamResolver,
};
use crate::validator::{self, DomainCategory, RateLimiter, RecordValidation};

pub struct ZnsResolver {
    config: ResolverConfig,
    cache: Mutex<ResolutionCache>,
    rate_limiter: RateLimiter,
    native: Arc<NativeResolver>,
    ens: Option<Arc<EnsResolver>>,
    ud: Option<Arc<UnstoppableResolver>>,
    dns: Option<Arc<DnsFallbackResolver>>,
    metrics: Arc<MetricsCollector>,
}

impl ZnsResolver {
    pub fn new(
        resolver_config: ResolverConfig,
        cache_config: CacheConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let ens = resolver_config.enable_ens_bridge.then(|| {
            Arc::new(EnsResolver::new(
                resolver_config.eth_rpc_url.clone(),
                resolver_config.ens_registry_address.clone(),
                resolver_config.max_resolution_time_ms,
            ))
        });
        let ud = resolver_config.enable_ud_bridge.then(|| {
            Arc::new(UnstoppableResolver::new(
                resolver_config.ud_api_url.clone(),
                resolver_config.ud_api_key.clone(),
                resolver_config.max_resolution_time_ms,
            ))
        });
        let dns = resolver_config
            .enable_dns_fallback
            .then(|| Arc::new(DnsFallbackResolver::new()));

        Self {
            native: Arc::new(NativeResolver::new(
                resolver_config.chain_endpoint.clone(),
                resolver_config.require_signatures,
            )),
            cache: Mutex::new(ResolutionCache::new(cache_config)),
            rate_limiter: RateLimiter::new(resolver_config.rate_limit_per_minute),
            ens,
            ud,
            dns,
            metrics,
            config: resolver_config,
        }
    }

    /// Ordered adapter chain for a category; disabled adapters drop out
    /// with relative order preserved
    fn chain_for(&self, category: DomainCategory) -> Vec<Arc<dyn UpstreamResolver>> {
        let mut chain: Vec<Arc<dyn UpstreamResolver>> = Vec::new();
        match category {
            DomainCategory::Identity | DomainCategory::Infrastructure => {
                chain.push(self.native.clone());
                if let Some(dns) = &self.dns {
                    chain.push(dns.clone());
                }
            }
            DomainCategory::EnsBridge => {
                if let Some(ens) = &self.ens {
                    chain.push(ens.clone());
                } else if let Some(dns) = &self.dns {
                    chain.push(dns.clone());
                }
            }
            DomainCategory::UnstoppableBridge => {
                if let Some(ud) = &self.ud {
                    chain.push(ud.clone());
                } else if let Some(dns) = &self.dns {
                    chain.push(dns.clone());
                }
            }
            DomainCategory::Experimental => {
                chain.push(self.native.clone());
                if let Some(ens) = &self.ens {
                    chain.push(ens.clone());
                }
                if let Some(ud) = &self.ud {
                    chain.push(ud.clone());
                }
                if let Some(dns) = &self.dns {
                    chain.push(dns.clone());
                }
            }
        }
        chain
    }

    pub async fn resolve(&self, request: &ResolveRequest, client_id: &str) -> ResolveResponse {
        let start = Instant::now();
        let domain = request.domain.as_str();

        if !self.rate_limiter.is_allowed(client_id) {
            self.metrics.record_query(None);
            self.metrics.record_failure(ZnsErrorCode::RateLimited, 0);
            return ResolveResponse::failure(
                domain,
                ResolutionSource::ZnsNative,
                ZnsError::new(
                    ZnsErrorCode::RateLimited,
                    format!("Rate limit exceeded for client {}", client_id),
                ),
            );
        }

        if !validator::is_valid_domain(domain) {
            self.metrics.record_query(None);
            self.metrics
                .record_failure(ZnsErrorCode::InvalidDomain, elapsed_ms(start));
            return ResolveResponse::failure(
                domain,
                ResolutionSource::ZnsNative,
                ZnsError::new(
                    ZnsErrorCode::InvalidDomain,
                    format!("Invalid or unsupported domain: {}", domain),
                ),
            );
        }
        // Valid domains always carry a category
        let category = validator::get_domain_category(domain).unwrap();
        self.metrics.record_query(Some(&validator::tld_of(domain)));

        if request.use_cache && self.config.enable_cache {
            let cached = {
                let mut cache = self.cache.lock();
                cache.get(domain).map(|entry| entry.domain_data.clone())
            };
            if let Some(data) = cached {
                self.metrics.record_cache_hit();
                let elapsed = elapsed_ms(start);
                self.metrics.record_success(ResolutionSource::Cache, elapsed);
                let mut response = ResolveResponse::success(
                    domain,
                    crate::resolvers::filter_records(data.records, &request.record_types),
                    ResolutionSource::Cache,
                );
                if request.include_metadata {
                    response.metadata = Some(data.metadata);
                }
                response.resolution_info.was_cached = true;
                response.resolution_info.resolution_time_ms = elapsed;
                return response;
            }
            self.metrics.record_cache_miss();
        }

        let chain = self.chain_for(category);
        let mut chain_names: Vec<String> = Vec::with_capacity(chain.len());
        let mut last_error: Option<ZnsError> = None;

        for resolver in &chain {
            chain_names.push(resolver.name().to_string());
            self.metrics.record_resolver_query(resolver.name());

            let outcome = tokio::time::timeout(
                Duration::from_millis(self.config.max_resolution_time_ms),
                resolver.resolve(domain, &request.record_types),
            )
            .await;

            match outcome {
                Err(_) => {
                    // The adapter overran its deadline; it owns the call
                    last_error = Some(ZnsError::new(
                        ZnsErrorCode::Timeout,
                        format!("Resolver {} timed out for {}", resolver.name(), domain),
                    ));
                    break;
                }
                Ok(None) => continue,
                Ok(Some(response)) => match response.error {
                    Some(error) => {
                        last_error = Some(error);
                        break;
                    }
                    None => {
                        let elapsed = elapsed_ms(start);
                        let mut response = response;
                        response.resolution_info.resolution_time_ms = elapsed;
                        if !request.include_metadata {
                            response.metadata = None;
                        }

                        if !response.records.is_empty()
                            && self.config.enable_cache
                        {
                            self.cache_response(&response, request.max_ttl);
                        }

                        self.metrics
                            .record_success(response.resolution_info.source, elapsed);
                        return response;
                    }
                },
            }
        }

        let elapsed = elapsed_ms(start);
        let error = match last_error {
            Some(error) => error.with_chain(chain_names),
            None => ZnsError::new(
                ZnsErrorCode::DomainNotFound,
                format!("No resolver could resolve {}", domain),
            )
            .with_chain(chain_names),
        };
        self.metrics.record_failure(error.code, elapsed);
        let mut response = ResolveResponse::failure(domain, ResolutionSource::ZnsNative, error);
        response.resolution_info.resolution_time_ms = elapsed;
        response
    }

    /// Register a native domain. Returns the wire response plus the change
    /// event to publish on success.
    pub async fn register_domain(
        &self,
        request: &RegisterRequest,
        client_id: &str,
    ) -> (MutationResponse, Option<DomainChangeEvent>) {
        let domain = request.domain.as_str();

        if !self.rate_limiter.is_allowed(client_id) {
            self.metrics.record_query(None);
            self.metrics.record_failure(ZnsErrorCode::RateLimited, 0);
            return (
                MutationResponse::failure(
                    domain,
                    ZnsError::new(ZnsErrorCode::RateLimited, "Rate limit exceeded"),
                ),
                None,
            );
        }
        if !validator::is_valid_domain(domain) {
            self.metrics.record_query(None);
            self.metrics.record_failure(ZnsErrorCode::InvalidDomain, 0);
            return (
                MutationResponse::failure(
                    domain,
                    ZnsError::new(
                        ZnsErrorCode::InvalidDomain,
                        format!("Invalid or unsupported domain: {}", domain),
                    ),
                ),
                None,
            );
        }
        self.metrics.record_query(Some(&validator::tld_of(domain)));

        let category = validator::get_domain_category(domain).unwrap();
        if !matches!(
            category,
            DomainCategory::Identity | DomainCategory::Infrastructure
        ) {
            self.metrics
                .record_failure(ZnsErrorCode::PermissionDenied, 0);
            return (
                MutationResponse::failure(
                    domain,
                    ZnsError::new(
                        ZnsErrorCode::PermissionDenied,
                        format!("Registration is limited to native namespaces: {}", domain),
                    ),
                ),
                None,
            );
        }

        match self.native.register_domain(request).await {
            Ok((tx_hash, event)) => {
                self.metrics
                    .record_success(ResolutionSource::ZnsNative, 0);
                (MutationResponse::success(domain, tx_hash), Some(event))
            }
            Err(error) => {
                self.metrics.record_failure(error.code, 0);
                (MutationResponse::failure(domain, error), None)
            }
        }
    }

    /// Update a native domain's records. Invalidates the cached entry on
    /// success.
    pub async fn update_domain(
        &self,
        request: &UpdateRequest,
        client_id: &str,
    ) -> (MutationResponse, Option<DomainChangeEvent>) {
        let domain = request.domain.as_str();

        if !self.rate_limiter.is_allowed(client_id) {
            self.metrics.record_query(None);
            self.metrics.record_failure(ZnsErrorCode::RateLimited, 0);
            return (
                MutationResponse::failure(
                    domain,
                    ZnsError::new(ZnsErrorCode::RateLimited, "Rate limit exceeded"),
                ),
                None,
            );
        }
        if !validator::is_valid_domain(domain) {
            self.metrics.record_query(None);
            self.metrics.record_failure(ZnsErrorCode::InvalidDomain, 0);
            return (
                MutationResponse::failure(
                    domain,
                    ZnsError::new(
                        ZnsErrorCode::InvalidDomain,
                        format!("Invalid or unsupported domain: {}", domain),
                    ),
                ),
                None,
            );
        }
        self.metrics.record_query(Some(&validator::tld_of(domain)));

        let category = validator::get_domain_category(domain).unwrap();
        if !matches!(
            category,
            DomainCategory::Identity | DomainCategory::Infrastructure
        ) {
            self.metrics
                .record_failure(ZnsErrorCode::PermissionDenied, 0);
            return (
                MutationResponse::failure(
                    domain,
                    ZnsError::new(
                        ZnsErrorCode::PermissionDenied,
                        format!("Updates are limited to native namespaces: {}", domain),
                    ),
                ),
                None,
            );
        }

        for record in &request.records {
            let verdict = validator::validate_record(record);
            if verdict != RecordValidation::Valid {
                self.metrics
                    .record_failure(ZnsErrorCode::InvalidRecordType, 0);
                return (
                    MutationResponse::failure(
                        domain,
                        ZnsError::new(
                            ZnsErrorCode::InvalidRecordType,
                            format!(
                                "Record {} {} failed validation",
                                record.record_type, record.name
                            ),
                        )
                        .with_details(format!("{:?}", verdict)),
                    ),
                    None,
                );
            }
        }

        match self.native.update_domain(request).await {
            Ok((tx_hash, event)) => {
                self.cache.lock().remove(domain);
                self.metrics
                    .record_success(ResolutionSource::ZnsNative, 0);
                (MutationResponse::success(domain, tx_hash), Some(event))
            }
            Err(error) => {
                self.metrics.record_failure(error.code, 0);
                (MutationResponse::failure(domain, error), None)
            }
        }
    }

    fn cache_response(&self, response: &ResolveResponse, requested_max_ttl: Option<u32>) {
        let mut data = DomainData::new(&response.domain, "", response.records.clone());
        if let Some(metadata) = &response.metadata {
            data.metadata = metadata.clone();
        }

        let mut ttl = data.min_record_ttl();
        if let Some(cap) = requested_max_ttl {
            ttl = Some(ttl.map_or(cap, |t| t.min(cap)));
        }

        let mut cache = self.cache.lock();
        if let Err(e) = cache.put(&data, ttl, response.resolution_info.source) {
            // A failed cache insert never fails the request
            warn!("Cache insert dropped for {}: {}", response.domain, e);
        } else {
            debug!(
                "💾 Cached {} from {} (ttl {:?})",
                response.domain, response.resolution_info.source, ttl
            );
        }
    }

    // Cache and limiter pass-throughs for the service facade; the core
    // owns both structures.

    pub fn cache_stats(&self) -> CacheStatistics {
        self.cache.lock().stats()
    }

    pub fn cache_memory_bytes(&self) -> usize {
        self.cache.lock().memory_bytes()
    }

    pub fn flush_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn invalidate_cached(&self, domain: &str) -> bool {
        self.cache.lock().remove(domain)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cache.lock().cleanup_expired()
    }

    pub fn take_cache_events(&self) -> Vec<CacheEvent> {
        self.cache.lock().take_events()
    }

    pub fn reset_rate_limits(&self) {
        self.rate_limiter.reset_counters();
    }

    pub fn native(&self) -> &NativeResolver {
        &self.native
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Resolver names in chain order for a category, for diagnostics
    pub fn chain_names(&self, category: DomainCategory) -> Vec<&'static str> {
        self.chain_for(category).iter().map(|r| r.name()).collect()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostbridge_shared::types::{DomainRecord, RecordType};

    fn test_resolver(mut configure: impl FnMut(&mut ResolverConfig)) -> ZnsResolver {
        let mut config = ResolverConfig {
            enable_dns_fallback: false,
            rate_limit_per_minute: 1_000,
            ..ResolverConfig::default()
        };
        configure(&mut config);
        let metrics = Arc::new(MetricsCollector::new(1_000_000));
        ZnsResolver::new(config, CacheConfig::default(), metrics)
    }

    async fn seed(resolver: &ZnsResolver, domain: &str) {
        let request = RegisterRequest {
            domain: domain.to_string(),
            owner: "ghost1owner".to_string(),
            records: vec![DomainRecord::new(RecordType::A, domain, "10.0.0.1", 600)],
            expiry: None,
            metadata: None,
            last_updated: 0,
            signature: String::new(),
        };
        let (response, event) = resolver.register_domain(&request, "seeder").await;
        assert!(response.error.is_none(), "seed failed: {:?}", response.error);
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn test_resolve_miss_then_cache_hit() {
        let resolver = test_resolver(|_| {});
        seed(&resolver, "alice.ghost").await;

        let request = ResolveRequest {
            domain: "alice.ghost".to_string(),
            record_types: vec![RecordType::A],
            include_metadata: false,
            use_cache: true,
            max_ttl: Some(3_600),
        };

        let first = resolver.resolve(&request, "c1").await;
        assert!(first.is_success());
        assert_eq!(first.resolution_info.source, ResolutionSource::ZnsNative);
        assert!(!first.resolution_info.was_cached);
        assert_eq!(first.records.len(), 1);

        let second = resolver.resolve(&request, "c1").await;
        assert!(second.is_success());
        assert_eq!(second.resolution_info.source, ResolutionSource::Cache);
        assert!(second.resolution_info.was_cached);
        assert_eq!(second.records, first.records);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits() {
        let resolver = test_resolver(|c| c.rate_limit_per_minute = 2);
        seed(&resolver, "bob.ghost").await;

        let request = ResolveRequest::for_domain("bob.ghost");
        let _ = resolver.resolve(&request, "c1").await;
        let _ = resolver.resolve(&request, "c1").await;
        let third = resolver.resolve(&request, "c1").await;

        let error = third.error.expect("third call should be limited");
        assert_eq!(error.code, ZnsErrorCode::RateLimited);
        assert_eq!(
            resolver.metrics().error_count(ZnsErrorCode::RateLimited),
            1
        );

        // A fresh window admits the client again
        resolver.reset_rate_limits();
        assert!(resolver.resolve(&request, "c1").await.is_success());
    }

    #[tokio::test]
    async fn test_invalid_domain_never_reaches_upstreams() {
        let resolver = test_resolver(|_| {});
        let request = ResolveRequest::for_domain("bad.invalidtld");
        let response = resolver.resolve(&request, "c1").await;
        assert_eq!(response.error.unwrap().code, ZnsErrorCode::InvalidDomain);
        // No resolver was consulted and nothing was cached
        assert!(resolver.metrics().report().per_resolver.is_empty());
        assert_eq!(resolver.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_unknown_native_domain_not_found() {
        let resolver = test_resolver(|_| {});
        let response = resolver
            .resolve(&ResolveRequest::for_domain("missing.ghost"), "c1")
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ZnsErrorCode::DomainNotFound);
        assert_eq!(error.resolution_chain, vec!["native"]);
    }

    #[tokio::test]
    async fn test_use_cache_false_skips_cache() {
        let resolver = test_resolver(|_| {});
        seed(&resolver, "alice.ghost").await;

        let mut request = ResolveRequest::for_domain("alice.ghost");
        request.use_cache = false;

        let first = resolver.resolve(&request, "c1").await;
        let second = resolver.resolve(&request, "c1").await;
        assert_eq!(first.resolution_info.source, ResolutionSource::ZnsNative);
        assert_eq!(second.resolution_info.source, ResolutionSource::ZnsNative);
        assert!(!second.resolution_info.was_cached);
    }

    #[tokio::test]
    async fn test_update_invalidates_cache() {
        let resolver = test_resolver(|_| {});
        seed(&resolver, "alice.ghost").await;

        let request = ResolveRequest::for_domain("alice.ghost");
        let _ = resolver.resolve(&request, "c1").await;
        assert_eq!(resolver.cache_stats().entries, 1);

        let update = UpdateRequest {
            domain: "alice.ghost".to_string(),
            records: vec![DomainRecord::new(RecordType::A, "alice.ghost", "10.0.0.9", 600)],
            last_updated: 0,
            signature: String::new(),
        };
        let (response, event) = resolver.update_domain(&update, "c1").await;
        assert!(response.error.is_none());
        assert!(event.is_some());
        assert_eq!(resolver.cache_stats().entries, 0);

        let fresh = resolver.resolve(&request, "c1").await;
        assert_eq!(fresh.records[0].value, "10.0.0.9");
        assert!(!fresh.resolution_info.was_cached);
    }

    #[tokio::test]
    async fn test_register_rejects_bridged_namespaces() {
        let resolver = test_resolver(|_| {});
        let request = RegisterRequest {
            domain: "vitalik.eth".to_string(),
            owner: "ghost1owner".to_string(),
            records: vec![],
            expiry: None,
            metadata: None,
            last_updated: 0,
            signature: String::new(),
        };
        let (response, event) = resolver.register_domain(&request, "c1").await;
        assert_eq!(response.error.unwrap().code, ZnsErrorCode::PermissionDenied);
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn test_update_validates_records() {
        let resolver = test_resolver(|_| {});
        seed(&resolver, "alice.ghost").await;

        let update = UpdateRequest {
            domain: "alice.ghost".to_string(),
            records: vec![DomainRecord::new(RecordType::A, "alice.ghost", "999.1.1.1", 600)],
            last_updated: 0,
            signature: String::new(),
        };
        let (response, event) = resolver.update_domain(&update, "c1").await;
        assert_eq!(
            response.error.unwrap().code,
            ZnsErrorCode::InvalidRecordType
        );
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn test_chain_order_for_experimental() {
        let all_enabled = test_resolver(|c| {
            c.enable_ens_bridge = true;
            c.enable_ud_bridge = true;
            c.enable_dns_fallback = true;
        });
        assert_eq!(
            all_enabled.chain_names(DomainCategory::Experimental),
            vec!["native", "ens", "unstoppable", "dns_fallback"]
        );

        let subset = test_resolver(|c| {
            c.enable_ens_bridge = false;
            c.enable_ud_bridge = true;
            c.enable_dns_fallback = true;
        });
        assert_eq!(
            subset.chain_names(DomainCategory::Experimental),
            vec!["native", "unstoppable", "dns_fallback"]
        );
    }

    #[tokio::test]
    async fn test_bridge_chains_fall_back_to_dns() {
        let resolver = test_resolver(|c| {
            c.enable_ens_bridge = false;
            c.enable_dns_fallback = true;
        });
        assert_eq!(
            resolver.chain_names(DomainCategory::EnsBridge),
            vec!["dns_fallback"]
        );

        let no_fallback = test_resolver(|c| {
            c.enable_ens_bridge = false;
            c.enable_dns_fallback = false;
        });
        assert!(no_fallback.chain_names(DomainCategory::EnsBridge).is_empty());
    }

    #[tokio::test]
    async fn test_max_ttl_caps_cache_lifetime() {
        let resolver = test_resolver(|_| {});
        seed(&resolver, "alice.ghost").await;

        let mut request = ResolveRequest::for_domain("alice.ghost");
        request.max_ttl = Some(60);
        let _ = resolver.resolve(&request, "c1").await;

        // The entry was inserted with the capped TTL; a hit right away
        let hit = resolver.resolve(&request, "c1").await;
        assert!(hit.resolution_info.was_cached);
    }
}
