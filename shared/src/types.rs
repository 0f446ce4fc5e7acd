// Canonical data model for the GhostBridge gateway and the ZNS subsystem

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// DNS-style record types understood by ZNS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Srv,
    Ns,
    Soa,
    Ptr,
    Ghost,
    Contract,
    Wallet,
}

impl RecordType {
    pub fn all() -> &'static [RecordType] {
        &[
            RecordType::A,
            RecordType::Aaaa,
            RecordType::Cname,
            RecordType::Mx,
            RecordType::Txt,
            RecordType::Srv,
            RecordType::Ns,
            RecordType::Soa,
            RecordType::Ptr,
            RecordType::Ghost,
            RecordType::Contract,
            RecordType::Wallet,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Srv => "SRV",
            RecordType::Ns => "NS",
            RecordType::Soa => "SOA",
            RecordType::Ptr => "PTR",
            RecordType::Ghost => "GHOST",
            RecordType::Contract => "CONTRACT",
            RecordType::Wallet => "WALLET",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "MX" => Ok(RecordType::Mx),
            "TXT" => Ok(RecordType::Txt),
            "SRV" => Ok(RecordType::Srv),
            "NS" => Ok(RecordType::Ns),
            "SOA" => Ok(RecordType::Soa),
            "PTR" => Ok(RecordType::Ptr),
            "GHOST" => Ok(RecordType::Ghost),
            "CONTRACT" => Ok(RecordType::Contract),
            "WALLET" => Ok(RecordType::Wallet),
            other => Err(format!("unsupported record type: {}", other)),
        }
    }
}

/// A single DNS record owned by a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub record_type: RecordType,
    pub name: String,
    pub value: String,
    pub ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub priority: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub weight: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

impl DomainRecord {
    /// Convenience constructor for simple value records (A, AAAA, TXT, ...)
    pub fn new(record_type: RecordType, name: &str, value: &str, ttl: u32) -> Self {
        Self {
            record_type,
            name: name.to_string(),
            value: value.to_string(),
            ttl,
            priority: None,
            port: None,
            weight: None,
            target: None,
            created_at: now_unix_secs(),
            signature: None,
        }
    }
}

/// Domain metadata carried alongside records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainMetadata {
    #[serde(default)]
    pub registrar: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub website: Option<String>,
    #[serde(default)]
    pub social_links: HashMap<String, String>,
    #[serde(default)]
    pub tags: HashSet<String>,
}

/// Full domain state as held by a resolver or the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainData {
    pub domain: String,
    pub owner: String,
    pub records: Vec<DomainRecord>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub metadata: DomainMetadata,
    pub last_updated: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiry: Option<u64>,
    #[serde(default)]
    pub signature: String,
}

impl DomainData {
    pub fn new(domain: &str, owner: &str, records: Vec<DomainRecord>) -> Self {
        Self {
            domain: domain.to_string(),
            owner: owner.to_string(),
            records,
            contract_address: None,
            metadata: DomainMetadata::default(),
            last_updated: now_unix_secs(),
            expiry: None,
            signature: String::new(),
        }
    }

    /// Smallest record TTL, used for cache insertion
    pub fn min_record_ttl(&self) -> Option<u32> {
        self.records.iter().map(|r| r.ttl).min()
    }
}

/// Where a resolution came from, stamped into every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionSource {
    ZnsNative,
    EnsBridge,
    UnstoppableBridge,
    TraditionalDns,
    Cache,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::ZnsNative => "ZNS_NATIVE",
            ResolutionSource::EnsBridge => "ENS_BRIDGE",
            ResolutionSource::UnstoppableBridge => "UNSTOPPABLE_BRIDGE",
            ResolutionSource::TraditionalDns => "TRADITIONAL_DNS",
            ResolutionSource::Cache => "CACHE",
        }
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level error codes, shared by JSON envelopes and metrics classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZnsErrorCode {
    Unspecified,
    DomainNotFound,
    InvalidDomain,
    InvalidRecordType,
    PermissionDenied,
    SignatureInvalid,
    DomainExpired,
    ResolverUnavailable,
    Timeout,
    RateLimited,
    InternalError,
}

impl ZnsErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZnsErrorCode::Unspecified => "UNSPECIFIED",
            ZnsErrorCode::DomainNotFound => "DOMAIN_NOT_FOUND",
            ZnsErrorCode::InvalidDomain => "INVALID_DOMAIN",
            ZnsErrorCode::InvalidRecordType => "INVALID_RECORD_TYPE",
            ZnsErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ZnsErrorCode::SignatureInvalid => "SIGNATURE_INVALID",
            ZnsErrorCode::DomainExpired => "DOMAIN_EXPIRED",
            ZnsErrorCode::ResolverUnavailable => "RESOLVER_UNAVAILABLE",
            ZnsErrorCode::Timeout => "TIMEOUT",
            ZnsErrorCode::RateLimited => "RATE_LIMITED",
            ZnsErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ZnsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error envelope carried inside responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZnsError {
    pub code: ZnsErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: String,
    /// Resolvers consulted before the failure, in order
    #[serde(default)]
    pub resolution_chain: Vec<String>,
}

impl ZnsError {
    pub fn new(code: ZnsErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: String::new(),
            resolution_chain: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.resolution_chain = chain;
        self
    }
}

/// Resolution request as received on `/zns/resolve`.
///
/// Unknown fields are rejected: this is a critical request and parsing
/// fails closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveRequest {
    pub domain: String,
    #[serde(default)]
    pub record_types: Vec<RecordType>,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_ttl: Option<u32>,
}

impl ResolveRequest {
    pub fn for_domain(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            record_types: Vec::new(),
            include_metadata: false,
            use_cache: true,
            max_ttl: None,
        }
    }
}

/// Attribution block carried in every resolve response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionInfo {
    pub source: ResolutionSource,
    pub resolution_time_ms: u64,
    pub was_cached: bool,
}

/// Resolution response as sent on `/zns/resolve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub domain: String,
    pub records: Vec<DomainRecord>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<DomainMetadata>,
    pub resolution_info: ResolutionInfo,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ZnsError>,
}

impl ResolveResponse {
    pub fn success(domain: &str, records: Vec<DomainRecord>, source: ResolutionSource) -> Self {
        Self {
            domain: domain.to_string(),
            records,
            metadata: None,
            resolution_info: ResolutionInfo {
                source,
                resolution_time_ms: 0,
                was_cached: false,
            },
            error: None,
        }
    }

    pub fn failure(domain: &str, source: ResolutionSource, error: ZnsError) -> Self {
        Self {
            domain: domain.to_string(),
            records: Vec::new(),
            metadata: None,
            resolution_info: ResolutionInfo {
                source,
                resolution_time_ms: 0,
                was_cached: false,
            },
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Registration request as received on `/zns/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub domain: String,
    pub owner: String,
    #[serde(default)]
    pub records: Vec<DomainRecord>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<DomainMetadata>,
    /// Timestamp covered by `signature`; the server uses it verbatim
    #[serde(default)]
    pub last_updated: u64,
    #[serde(default)]
    pub signature: String,
}

/// Update request as received on `/zns/update`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    pub domain: String,
    pub records: Vec<DomainRecord>,
    /// Timestamp covered by `signature`; the server uses it verbatim
    #[serde(default)]
    pub last_updated: u64,
    #[serde(default)]
    pub signature: String,
}

/// Response shape shared by register and update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ZnsError>,
}

impl MutationResponse {
    pub fn success(domain: &str, transaction_hash: String) -> Self {
        Self {
            domain: domain.to_string(),
            transaction_hash: Some(transaction_hash),
            error: None,
        }
    }

    pub fn failure(domain: &str, error: ZnsError) -> Self {
        Self {
            domain: domain.to_string(),
            transaction_hash: None,
            error: Some(error),
        }
    }
}

/// Subscription request as received on `/zns/subscribe`.
/// Empty `domains` means wildcard; empty `record_types` means all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionRequest {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub record_types: Vec<RecordType>,
    #[serde(default)]
    pub include_metadata: bool,
}

/// Kinds of domain change events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEventType {
    Registered,
    Updated,
    Transferred,
    Expired,
    Renewed,
}

impl fmt::Display for ChangeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeEventType::Registered => "Registered",
            ChangeEventType::Updated => "Updated",
            ChangeEventType::Transferred => "Transferred",
            ChangeEventType::Expired => "Expired",
            ChangeEventType::Renewed => "Renewed",
        };
        f.write_str(s)
    }
}

/// A domain change event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainChangeEvent {
    pub domain: String,
    pub event_type: ChangeEventType,
    #[serde(default)]
    pub old_records: Vec<DomainRecord>,
    #[serde(default)]
    pub new_records: Vec<DomainRecord>,
    pub timestamp: u64,
    #[serde(default)]
    pub transaction_hash: String,
}

impl DomainChangeEvent {
    pub fn new(domain: &str, event_type: ChangeEventType) -> Self {
        Self {
            domain: domain.to_string(),
            event_type,
            old_records: Vec::new(),
            new_records: Vec::new(),
            timestamp: now_unix_secs(),
            transaction_hash: String::new(),
        }
    }
}

/// Cache event classes observable through cache subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheEventType {
    Hit,
    Miss,
    Eviction,
    Flush,
}

/// A cache event delivered to cache subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    pub event_type: CacheEventType,
    #[serde(default)]
    pub domain: String,
    pub timestamp: u64,
}

impl CacheEvent {
    pub fn new(event_type: CacheEventType, domain: &str) -> Self {
        Self {
            event_type,
            domain: domain.to_string(),
            timestamp: now_unix_secs(),
        }
    }
}

/// Event union handed back when draining a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Domain(DomainChangeEvent),
    Cache(CacheEvent),
}

/// Routing classes served by the multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Wallet,
    Identity,
    Ledger,
    Dns,
    Contracts,
    Proxy,
}

impl ChannelType {
    /// Parse the first path segment into a channel
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "wallet" => Some(ChannelType::Wallet),
            "identity" => Some(ChannelType::Identity),
            "ledger" => Some(ChannelType::Ledger),
            "dns" => Some(ChannelType::Dns),
            "contracts" => Some(ChannelType::Contracts),
            "proxy" => Some(ChannelType::Proxy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Wallet => "wallet",
            ChannelType::Identity => "identity",
            ChannelType::Ledger => "ledger",
            ChannelType::Dns => "dns",
            ChannelType::Contracts => "contracts",
            ChannelType::Proxy => "proxy",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static channel description, fixed at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_type: ChannelType,
    pub service_endpoint: String,
    pub max_streams: u32,
    pub timeout_ms: u64,
    pub encryption_required: bool,
}

/// Ingress transports served by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http2,
    Http3,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http2 => f.write_str("http2"),
            TransportKind::Http3 => f.write_str("http3"),
        }
    }
}

/// Per-connection bookkeeping held by the transport listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub transport: TransportKind,
    pub peer_addr: String,
    pub created_at: u64,
    pub last_activity: u64,
}

impl ConnectionInfo {
    pub fn new(transport: TransportKind, peer_addr: &str) -> Self {
        let now = now_unix_secs();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            transport,
            peer_addr: peer_addr.to_string(),
            created_at: now,
            last_activity: now,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Current unix time in whole seconds
pub fn now_unix_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Current unix time in milliseconds
pub fn now_unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
