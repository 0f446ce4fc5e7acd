// ZNS configuration
use serde::{Deserialize, Serialize};

/// Resolution cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    /// TTL applied when neither the caller nor the records carry one
    pub default_ttl: u32,
    pub min_ttl: u32,
    pub max_ttl: u32,
    pub cleanup_interval_ms: u64,
    pub eviction_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_bytes: 64 * 1024 * 1024,
            default_ttl: 300,
            min_ttl: 30,
            max_ttl: 86_400,
            cleanup_interval_ms: 60_000,
            eviction_batch_size: 64,
        }
    }
}

/// Upstream resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub enable_cache: bool,
    pub enable_ens_bridge: bool,
    pub enable_ud_bridge: bool,
    pub enable_dns_fallback: bool,
    /// Per-upstream-call deadline
    pub max_resolution_time_ms: u64,
    /// Fixed 60s tumbling window, reset by the periodic task
    pub rate_limit_per_minute: u32,
    /// Reject unsigned register/update payloads when set
    pub require_signatures: bool,
    /// Native chain node endpoint (reserved; no chain client is shipped)
    pub chain_endpoint: Option<String>,
    pub eth_rpc_url: String,
    pub ens_registry_address: String,
    pub ud_api_url: String,
    pub ud_api_key: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            enable_ens_bridge: false,
            enable_ud_bridge: false,
            enable_dns_fallback: true,
            max_resolution_time_ms: 5_000,
            rate_limit_per_minute: 600,
            require_signatures: false,
            chain_endpoint: None,
            eth_rpc_url: "https://eth-mainnet.g.alchemy.com/v2/YOUR-API-KEY".to_string(),
            ens_registry_address: "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e".to_string(),
            ud_api_url: "https://api.unstoppabledomains.com/resolve".to_string(),
            ud_api_key: None,
        }
    }
}

/// Service-level switches and cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub enable_subscriptions: bool,
    pub enable_cache_events: bool,
    pub enable_metrics: bool,
    pub enable_alerts: bool,
    pub periodic_task_interval_ms: u64,
    pub max_concurrent_requests: usize,
    pub request_timeout_ms: u64,
    /// Subscriptions idle past this bound are pruned by the periodic task
    pub subscription_idle_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enable_subscriptions: true,
            enable_cache_events: true,
            enable_metrics: true,
            enable_alerts: true,
            periodic_task_interval_ms: 60_000,
            max_concurrent_requests: 1_024,
            request_timeout_ms: 30_000,
            subscription_idle_timeout_secs: 3_600,
        }
    }
}

/// Top-level ZNS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZnsConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl ZnsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be greater than 0");
        }
        if self.cache.max_memory_bytes == 0 {
            anyhow::bail!("cache.max_memory_bytes must be greater than 0");
        }
        if self.cache.min_ttl > self.cache.max_ttl {
            anyhow::bail!("cache.min_ttl must not exceed cache.max_ttl");
        }
        if self.resolver.max_resolution_time_ms == 0 {
            anyhow::bail!("resolver.max_resolution_time_ms must be greater than 0");
        }
        if self.service.periodic_task_interval_ms == 0 {
            anyhow::bail!("service.periodic_task_interval_ms must be greater than 0");
        }
        Ok(())
    }
}
