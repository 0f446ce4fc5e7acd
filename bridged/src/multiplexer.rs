// Multiplexer/dispatch: the single ingress for both transports
//
// Parses (path, body) units, routes /zns/* into the embedded service
// facade and forwards everything else to the configured backend channel.
// Every dispatch runs under the connection deadline and a panic guard;
// clients only ever see JSON envelopes.

use dashmap::DashMap;
use futures::FutureExt;
use ghostbridge_shared::types::{
    ConnectionInfo, ChannelType, RecordType, RegisterRequest, ResolveRequest, SubscriptionRequest,
    UpdateRequest, ZnsError, ZnsErrorCode,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};
use zns::ZnsService;

use crate::channels::{parse_route, ChannelRegistry, Route};
use crate::response_cache::{cache_key, ResponseCache, ResponseCacheStats};

/// Response-cache sizing; opaque payloads only, so a modest budget
const RESPONSE_CACHE_ENTRIES: usize = 4_096;
const RESPONSE_CACHE_BYTES: usize = 16 * 1024 * 1024;

/// One framed request unit as produced by a transport listener
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub path: String,
    pub body: Vec<u8>,
    /// Stable per-client identity (peer IP) used for rate limiting
    pub client_id: String,
}

/// One framed response unit handed back to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn json(status: u16, value: &impl Serialize) -> Self {
        Self {
            status,
            body: serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec()),
        }
    }

    pub fn error(status: u16, error: ZnsError) -> Self {
        #[derive(Serialize)]
        struct Envelope {
            error: ZnsError,
        }
        Self::json(status, &Envelope { error })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubscribeWireRequest {
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    record_types: Vec<RecordType>,
    #[serde(default)]
    include_metadata: bool,
    /// Present for cache-event subscriptions instead of domain watching
    #[serde(default)]
    cache_events: Option<CacheEventOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheEventOptions {
    #[serde(default)]
    hits: bool,
    #[serde(default)]
    misses: bool,
    #[serde(default)]
    evictions: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventsWireRequest {
    subscription_id: String,
    #[serde(default = "default_max_events")]
    max_events: usize,
}

fn default_max_events() -> usize {
    100
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnsubscribeWireRequest {
    subscription_id: String,
}

#[derive(Debug, Serialize)]
struct SubscribeWireResponse {
    subscription_id: String,
}

/// Gateway-side counters surfaced through the status operation
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub open_connections: usize,
    pub response_cache: ResponseCacheStats,
    pub channel_dispatches: std::collections::HashMap<String, u64>,
}

pub struct Multiplexer {
    zns: Arc<ZnsService>,
    channels: ChannelRegistry,
    response_cache: Mutex<ResponseCache>,
    http_client: reqwest::Client,
    dispatch_timeout: Duration,
    max_connections: usize,
    connections: DashMap<String, ConnectionInfo>,
    channel_dispatches: DashMap<ChannelType, u64>,
    /// Caps in-flight dispatches process-wide
    request_slots: Arc<Semaphore>,
    /// Caps in-flight forwards per backend channel
    channel_slots: HashMap<ChannelType, Arc<Semaphore>>,
}

impl Multiplexer {
    pub fn new(
        zns: Arc<ZnsService>,
        channels: ChannelRegistry,
        max_connections: usize,
        connection_timeout_ms: u64,
    ) -> Self {
        let request_slots = Arc::new(Semaphore::new(
            zns.config().service.max_concurrent_requests.max(1),
        ));
        let mut channel_slots = HashMap::new();
        for channel_type in channels.channel_types() {
            if let Some(channel) = channels.get(channel_type) {
                channel_slots.insert(
                    channel_type,
                    Arc::new(Semaphore::new(channel.max_streams.max(1) as usize)),
                );
            }
        }
        Self {
            zns,
            channels,
            response_cache: Mutex::new(ResponseCache::new(
                RESPONSE_CACHE_ENTRIES,
                RESPONSE_CACHE_BYTES,
            )),
            http_client: reqwest::Client::new(),
            dispatch_timeout: Duration::from_millis(connection_timeout_ms),
            max_connections,
            connections: DashMap::new(),
            channel_dispatches: DashMap::new(),
            request_slots,
            channel_slots,
        }
    }

    /// Dispatch one framed unit under the per-request deadline. Panics in
    /// handlers become INTERNAL_ERROR envelopes; no stack traces leave
    /// the process.
    pub async fn dispatch(&self, request: GatewayRequest) -> GatewayResponse {
        let path = request.path.clone();
        let guarded = AssertUnwindSafe(self.dispatch_inner(request)).catch_unwind();

        match tokio::time::timeout(self.dispatch_timeout, guarded).await {
            Err(_) => {
                warn!("⏰ Dispatch deadline exceeded for {}", path);
                GatewayResponse::error(
                    504,
                    ZnsError::new(ZnsErrorCode::Timeout, "Request deadline exceeded")
                        .with_details("Retry with jitter"),
                )
            }
            Ok(Err(_panic)) => {
                error!("Handler panicked while serving {}", path);
                GatewayResponse::error(
                    500,
                    ZnsError::new(ZnsErrorCode::InternalError, "Internal error"),
                )
            }
            Ok(Ok(response)) => response,
        }
    }

    async fn dispatch_inner(&self, request: GatewayRequest) -> GatewayResponse {
        // Waiting for a slot still counts against the request deadline
        let _slot = self.request_slots.acquire().await;

        match parse_route(&request.path) {
            Route::Zns { operation, query } => {
                self.handle_zns(&operation, &query, &request.body, &request.client_id)
                    .await
            }
            Route::Channel { channel_type, path } => {
                // DNS queries naming a ZNS domain are answered in-process
                if channel_type == ChannelType::Dns {
                    if let Some(domain) = extract_zns_domain(&request.body) {
                        debug!("🔀 Redirecting DNS query for {} to ZNS", domain);
                        return self
                            .handle_zns("resolve", "", &resolve_body(&request.body, &domain), &request.client_id)
                            .await;
                    }
                }
                self.forward_to_channel(channel_type, &path, &request.body)
                    .await
            }
            Route::Unknown => GatewayResponse::error(
                404,
                ZnsError::new(
                    ZnsErrorCode::Unspecified,
                    format!("No channel serves {}", request.path),
                ),
            ),
        }
    }

    async fn handle_zns(
        &self,
        operation: &str,
        query: &str,
        body: &[u8],
        client_id: &str,
    ) -> GatewayResponse {
        match operation {
            "resolve" => {
                let request: ResolveRequest = match serde_json::from_slice(body) {
                    Ok(request) => request,
                    Err(e) => return malformed(e),
                };
                let response = self.zns.resolve(&request, client_id).await;
                let status = response
                    .error
                    .as_ref()
                    .map_or(200, |e| status_for(e.code));
                GatewayResponse::json(status, &response)
            }
            "register" => {
                let request: RegisterRequest = match serde_json::from_slice(body) {
                    Ok(request) => request,
                    Err(e) => return malformed(e),
                };
                let response = self.zns.register(&request, client_id).await;
                let status = response
                    .error
                    .as_ref()
                    .map_or(200, |e| status_for(e.code));
                GatewayResponse::json(status, &response)
            }
            "update" => {
                let request: UpdateRequest = match serde_json::from_slice(body) {
                    Ok(request) => request,
                    Err(e) => return malformed(e),
                };
                let response = self.zns.update(&request, client_id).await;
                let status = response
                    .error
                    .as_ref()
                    .map_or(200, |e| status_for(e.code));
                GatewayResponse::json(status, &response)
            }
            "subscribe" => {
                let request: SubscribeWireRequest = match serde_json::from_slice(body) {
                    Ok(request) => request,
                    Err(e) => return malformed(e),
                };
                let created = match request.cache_events {
                    Some(options) => self.zns.create_cache_subscription(
                        options.hits,
                        options.misses,
                        options.evictions,
                        client_id,
                    ),
                    None => self.zns.create_domain_subscription(
                        &SubscriptionRequest {
                            domains: request.domains,
                            record_types: request.record_types,
                            include_metadata: request.include_metadata,
                        },
                        client_id,
                    ),
                };
                match created {
                    Ok(subscription_id) => GatewayResponse::json(
                        200,
                        &SubscribeWireResponse { subscription_id },
                    ),
                    Err(error) => GatewayResponse::error(status_for(error.code), error),
                }
            }
            "events" => {
                let request: EventsWireRequest = match serde_json::from_slice(body) {
                    Ok(request) => request,
                    Err(e) => return malformed(e),
                };
                match self
                    .zns
                    .get_subscription_events(&request.subscription_id, request.max_events)
                {
                    Some(events) => GatewayResponse::json(200, &events),
                    None => GatewayResponse::error(
                        404,
                        ZnsError::new(
                            ZnsErrorCode::Unspecified,
                            format!("Unknown subscription: {}", request.subscription_id),
                        ),
                    ),
                }
            }
            "unsubscribe" => {
                let request: UnsubscribeWireRequest = match serde_json::from_slice(body) {
                    Ok(request) => request,
                    Err(e) => return malformed(e),
                };
                let cancelled = self.zns.cancel_subscription(&request.subscription_id);
                GatewayResponse::json(
                    if cancelled { 200 } else { 404 },
                    &serde_json::json!({ "cancelled": cancelled }),
                )
            }
            "status" => {
                #[derive(Serialize)]
                struct StatusEnvelope {
                    service: zns::ServiceStatus,
                    gateway: GatewayStats,
                }
                GatewayResponse::json(
                    200,
                    &StatusEnvelope {
                        service: self.zns.status(),
                        gateway: self.gateway_stats(),
                    },
                )
            }
            "metrics" => {
                if query.contains("format=prometheus") {
                    GatewayResponse {
                        status: 200,
                        body: self.zns.prometheus().into_bytes(),
                    }
                } else {
                    GatewayResponse::json(200, &self.zns.metrics_report())
                }
            }
            other => GatewayResponse::error(
                404,
                ZnsError::new(
                    ZnsErrorCode::Unspecified,
                    format!("Unknown ZNS operation: {}", other),
                ),
            ),
        }
    }

    async fn forward_to_channel(
        &self,
        channel_type: ChannelType,
        path: &str,
        body: &[u8],
    ) -> GatewayResponse {
        let Some(channel) = self.channels.get(channel_type) else {
            return GatewayResponse::error(
                503,
                ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    format!("Channel {} is not configured", channel_type),
                ),
            );
        };
        *self.channel_dispatches.entry(channel_type).or_insert(0) += 1;

        let _channel_slot = match self.channel_slots.get(&channel_type) {
            Some(slots) => slots.acquire().await.ok(),
            None => None,
        };

        let key = cache_key(path, body);
        if let Some((status, cached)) = self.response_cache.lock().get(key) {
            debug!("💾 Response cache hit for {}", path);
            return GatewayResponse {
                status,
                body: cached,
            };
        }

        // Forward the verbatim body to base_url + path tail
        let tail = path
            .trim_start_matches('/')
            .split_once('/')
            .map(|(_, tail)| tail)
            .unwrap_or("");
        let url = format!(
            "{}/{}",
            channel.service_endpoint.trim_end_matches('/'),
            tail
        );

        let outcome = self
            .http_client
            .post(&url)
            .timeout(Duration::from_millis(channel.timeout_ms))
            .body(body.to_vec())
            .send()
            .await;

        match outcome {
            Ok(upstream) => {
                let status = upstream.status().as_u16();
                match upstream.bytes().await {
                    Ok(bytes) => {
                        let body = bytes.to_vec();
                        if (200..300).contains(&status) {
                            self.response_cache.lock().put(key, status, body.clone());
                        }
                        GatewayResponse { status, body }
                    }
                    Err(e) => upstream_error(channel_type, e),
                }
            }
            Err(e) if e.is_timeout() => GatewayResponse::error(
                504,
                ZnsError::new(
                    ZnsErrorCode::Timeout,
                    format!("Channel {} timed out", channel_type),
                ),
            ),
            Err(e) => upstream_error(channel_type, e),
        }
    }

    // Connection accounting shared by both transport listeners

    /// Admit a connection unless the process-wide cap is reached. New
    /// connections past the limit are refused, never older ones dropped.
    pub fn try_register_connection(&self, info: ConnectionInfo) -> bool {
        if self.connections.len() >= self.max_connections {
            warn!(
                "🚫 Refusing connection from {}: limit {} reached",
                info.peer_addr, self.max_connections
            );
            return false;
        }
        self.connections.insert(info.id.clone(), info);
        self.zns
            .metrics()
            .set_open_connections(self.connections.len() as u64);
        true
    }

    pub fn unregister_connection(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        self.zns
            .metrics()
            .set_open_connections(self.connections.len() as u64);
    }

    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn gateway_stats(&self) -> GatewayStats {
        GatewayStats {
            open_connections: self.connections.len(),
            response_cache: self.response_cache.lock().stats(),
            channel_dispatches: self
                .channel_dispatches
                .iter()
                .map(|kv| (kv.key().to_string(), *kv.value()))
                .collect(),
        }
    }

    pub fn zns(&self) -> &Arc<ZnsService> {
        &self.zns
    }
}

fn malformed(error: serde_json::Error) -> GatewayResponse {
    GatewayResponse::error(
        400,
        ZnsError::new(ZnsErrorCode::Unspecified, "Malformed request body")
            .with_details(error.to_string()),
    )
}

fn upstream_error(channel_type: ChannelType, error: reqwest::Error) -> GatewayResponse {
    GatewayResponse::error(
        502,
        ZnsError::new(
            ZnsErrorCode::ResolverUnavailable,
            format!("Channel {} upstream error", channel_type),
        )
        .with_details(error.to_string()),
    )
}

/// Wire status for a ZNS error code
pub fn status_for(code: ZnsErrorCode) -> u16 {
    match code {
        ZnsErrorCode::InvalidDomain | ZnsErrorCode::InvalidRecordType => 400,
        ZnsErrorCode::PermissionDenied | ZnsErrorCode::SignatureInvalid => 403,
        ZnsErrorCode::DomainNotFound | ZnsErrorCode::DomainExpired => 404,
        ZnsErrorCode::RateLimited => 429,
        ZnsErrorCode::Timeout => 504,
        ZnsErrorCode::ResolverUnavailable => 502,
        ZnsErrorCode::Unspecified | ZnsErrorCode::InternalError => 500,
    }
}

/// First token in the body whose suffix belongs to a ZNS category
fn extract_zns_domain(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
        .filter(|token| token.contains('.'))
        .find(|token| zns::validator::is_valid_domain(token))
        .map(|token| token.to_string())
}

/// Body for the redirected resolve: reuse a well-formed ResolveRequest,
/// otherwise synthesize one for the extracted domain
fn resolve_body(original: &[u8], domain: &str) -> Vec<u8> {
    if serde_json::from_slice::<ResolveRequest>(original).is_ok() {
        return original.to_vec();
    }
    serde_json::to_vec(&ResolveRequest::for_domain(domain)).unwrap_or_default()
}
