// Request validation: domain syntax, suffix routing, record sanity,
// signature verification and per-client rate limiting

use dashmap::DashMap;
use ghostbridge_shared::crypto;
use ghostbridge_shared::types::{DomainData, DomainRecord, RecordType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest domain accepted on any path
pub const MAX_DOMAIN_LENGTH: usize = 253;

/// Suffix groups routed to the native resolver's identity namespace
const IDENTITY_SUFFIXES: &[&str] = &[".ghost", ".gcc", ".sig", ".gpk", ".key", ".pin"];

/// Suffix groups routed to the native resolver's infrastructure namespace
const INFRASTRUCTURE_SUFFIXES: &[&str] = &[".bc", ".zns", ".ops"];

const ENS_SUFFIXES: &[&str] = &[".eth"];

const UNSTOPPABLE_SUFFIXES: &[&str] = &[
    ".crypto",
    ".nft",
    ".x",
    ".wallet",
    ".bitcoin",
    ".blockchain",
    ".888",
    ".klever",
    ".hi",
    ".kresus",
    ".polygon",
    ".unstoppable",
];

/// Remaining supported suffixes, reachable only through the experimental chain
const EXPERIMENTAL_SUFFIXES: &[&str] = &[
    ".warp", ".arc", ".gcp", ".sid", ".dvm", ".tmp", ".dbg", ".lib", ".txo",
];

/// Routing category derived from a domain's suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainCategory {
    Identity,
    Infrastructure,
    EnsBridge,
    UnstoppableBridge,
    Experimental,
}

impl fmt::Display for DomainCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainCategory::Identity => "identity",
            DomainCategory::Infrastructure => "infrastructure",
            DomainCategory::EnsBridge => "ens_bridge",
            DomainCategory::UnstoppableBridge => "unstoppable_bridge",
            DomainCategory::Experimental => "experimental",
        };
        f.write_str(s)
    }
}

/// Outcome of a per-record sanity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordValidation {
    Valid,
    InvalidFormat,
    InvalidLength,
    UnsupportedType,
    SignatureInvalid,
}

impl RecordValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, RecordValidation::Valid)
    }
}

/// Domain syntax check: total length, first/last byte, non-empty labels,
/// supported suffix
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LENGTH {
        return false;
    }

    let bytes = domain.as_bytes();
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if first == b'.' || first == b'-' || last == b'.' || last == b'-' {
        return false;
    }

    // Every label between dots must be non-empty
    if domain.split('.').any(|label| label.is_empty()) {
        return false;
    }

    get_domain_category(domain).is_some()
}

/// First matching suffix group, or experimental for the remaining
/// supported suffixes. Unsupported suffixes yield None.
pub fn get_domain_category(domain: &str) -> Option<DomainCategory> {
    let lower = domain.to_ascii_lowercase();
    if IDENTITY_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(DomainCategory::Identity);
    }
    if INFRASTRUCTURE_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(DomainCategory::Infrastructure);
    }
    if ENS_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(DomainCategory::EnsBridge);
    }
    if UNSTOPPABLE_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(DomainCategory::UnstoppableBridge);
    }
    if EXPERIMENTAL_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(DomainCategory::Experimental);
    }
    None
}

/// The top-level domain of a name, lower-cased, for per-TLD metrics
pub fn tld_of(domain: &str) -> String {
    domain
        .rsplit('.')
        .next()
        .unwrap_or(domain)
        .to_ascii_lowercase()
}

/// Type-specific record sanity check
pub fn validate_record(record: &DomainRecord) -> RecordValidation {
    match record.record_type {
        RecordType::A => validate_ipv4(&record.value),
        RecordType::Aaaa => validate_ipv6(&record.value),
        RecordType::Cname | RecordType::Ns => validate_domain_value(&record.value),
        RecordType::Mx => {
            if record.priority.is_none() {
                return RecordValidation::InvalidFormat;
            }
            validate_target(record)
        }
        RecordType::Srv => {
            if record.priority.is_none() || record.weight.is_none() || record.port.is_none() {
                return RecordValidation::InvalidFormat;
            }
            validate_target(record)
        }
        RecordType::Txt => {
            if record.value.len() > 255 {
                RecordValidation::InvalidLength
            } else {
                RecordValidation::Valid
            }
        }
        RecordType::Contract | RecordType::Wallet => validate_eth_address(&record.value),
        RecordType::Ghost | RecordType::Soa | RecordType::Ptr => RecordValidation::Valid,
    }
}

/// Verify the Ed25519 signature carried by a DomainData
pub fn verify_domain_signature(data: &DomainData, public_key_hex: &str) -> RecordValidation {
    match crypto::verify_domain_signature(data, public_key_hex) {
        Ok(true) => RecordValidation::Valid,
        _ => RecordValidation::SignatureInvalid,
    }
}

fn validate_ipv4(value: &str) -> RecordValidation {
    match value.parse::<std::net::Ipv4Addr>() {
        Ok(_) => RecordValidation::Valid,
        Err(_) => RecordValidation::InvalidFormat,
    }
}

fn validate_ipv6(value: &str) -> RecordValidation {
    if value.len() < 2 || value.len() > 39 {
        return RecordValidation::InvalidLength;
    }
    if !value.contains(':') {
        return RecordValidation::InvalidFormat;
    }
    RecordValidation::Valid
}

fn validate_domain_value(value: &str) -> RecordValidation {
    if is_valid_domain(value) {
        RecordValidation::Valid
    } else {
        RecordValidation::InvalidFormat
    }
}

fn validate_target(record: &DomainRecord) -> RecordValidation {
    match record.target.as_deref() {
        Some(target) if is_valid_domain(target) => RecordValidation::Valid,
        _ => RecordValidation::InvalidFormat,
    }
}

fn validate_eth_address(value: &str) -> RecordValidation {
    let Some(hex_part) = value.strip_prefix("0x") else {
        return RecordValidation::InvalidFormat;
    };
    if hex_part.len() != 40 {
        return RecordValidation::InvalidLength;
    }
    if hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        RecordValidation::Valid
    } else {
        RecordValidation::InvalidFormat
    }
}

/// Fixed-window per-client rate limiter.
///
/// Counters accumulate until `reset_counters()` is invoked at the window
/// boundary (the periodic task schedules a 60s tumbling window). The map
/// is consulted before any cache or upstream access.
pub struct RateLimiter {
    counters: DashMap<String, u32>,
    limit: u32,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            counters: DashMap::new(),
            limit,
        }
    }

    /// Count a request against `client_id`; false once the window is spent
    pub fn is_allowed(&self, client_id: &str) -> bool {
        let mut counter = self.counters.entry(client_id.to_string()).or_insert(0);
        if *counter >= self.limit {
            return false;
        }
        *counter += 1;
        true
    }

    /// Drop all window counters; called at window boundaries
    pub fn reset_counters(&self) {
        self.counters.clear();
    }

    pub fn active_clients(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_domains() {
        assert!(is_valid_domain("alice.ghost"));
        assert!(is_valid_domain("node1.infra.zns"));
        assert!(is_valid_domain("vitalik.eth"));
        assert!(is_valid_domain("brad.crypto"));
        assert!(is_valid_domain("lab.warp"));
    }

    #[test]
    fn test_invalid_domains() {
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain(".ghost"));
        assert!(!is_valid_domain("alice.ghost."));
        assert!(!is_valid_domain("-alice.ghost"));
        assert!(!is_valid_domain("alice.ghost-"));
        assert!(!is_valid_domain("alice..ghost"));
        assert!(!is_valid_domain("bad.invalidtld"));
        assert!(!is_valid_domain("example.com"));
        let long = format!("{}.ghost", "a".repeat(260));
        assert!(!is_valid_domain(&long));
    }

    #[test]
    fn test_domain_categories() {
        assert_eq!(get_domain_category("alice.ghost"), Some(DomainCategory::Identity));
        assert_eq!(get_domain_category("k.key"), Some(DomainCategory::Identity));
        assert_eq!(get_domain_category("core.zns"), Some(DomainCategory::Infrastructure));
        assert_eq!(get_domain_category("ops.ops"), Some(DomainCategory::Infrastructure));
        assert_eq!(get_domain_category("vitalik.eth"), Some(DomainCategory::EnsBridge));
        assert_eq!(
            get_domain_category("brad.crypto"),
            Some(DomainCategory::UnstoppableBridge)
        );
        assert_eq!(
            get_domain_category("sat.bitcoin"),
            Some(DomainCategory::UnstoppableBridge)
        );
        assert_eq!(get_domain_category("lab.warp"), Some(DomainCategory::Experimental));
        assert_eq!(get_domain_category("nope.invalidtld"), None);
    }

    #[test]
    fn test_category_is_case_insensitive() {
        assert_eq!(get_domain_category("ALICE.GHOST"), Some(DomainCategory::Identity));
        assert_eq!(get_domain_category("Vitalik.Eth"), Some(DomainCategory::EnsBridge));
    }

    #[test]
    fn test_a_record_validation() {
        let mut record = DomainRecord::new(RecordType::A, "a.ghost", "10.0.0.1", 300);
        assert_eq!(validate_record(&record), RecordValidation::Valid);
        record.value = "256.0.0.1".to_string();
        assert_eq!(validate_record(&record), RecordValidation::InvalidFormat);
        record.value = "10.0.0".to_string();
        assert_eq!(validate_record(&record), RecordValidation::InvalidFormat);
    }

    #[test]
    fn test_aaaa_record_validation() {
        let mut record = DomainRecord::new(RecordType::Aaaa, "a.ghost", "2001:db8::1", 300);
        assert_eq!(validate_record(&record), RecordValidation::Valid);
        record.value = "10.0.0.1".to_string();
        assert_eq!(validate_record(&record), RecordValidation::InvalidFormat);
        record.value = "2001:0db8:0000:0000:0000:0000:0000:0000:0001".to_string();
        assert_eq!(validate_record(&record), RecordValidation::InvalidLength);
    }

    #[test]
    fn test_mx_and_srv_require_fields() {
        let mut mx = DomainRecord::new(RecordType::Mx, "a.ghost", "", 300);
        mx.target = Some("mail.ghost".to_string());
        assert_eq!(validate_record(&mx), RecordValidation::InvalidFormat);
        mx.priority = Some(10);
        assert_eq!(validate_record(&mx), RecordValidation::Valid);

        let mut srv = DomainRecord::new(RecordType::Srv, "a.ghost", "", 300);
        srv.priority = Some(1);
        srv.weight = Some(5);
        srv.target = Some("svc.ghost".to_string());
        assert_eq!(validate_record(&srv), RecordValidation::InvalidFormat);
        srv.port = Some(443);
        assert_eq!(validate_record(&srv), RecordValidation::Valid);
    }

    #[test]
    fn test_txt_length_bound() {
        let mut txt = DomainRecord::new(RecordType::Txt, "a.ghost", "hello", 300);
        assert_eq!(validate_record(&txt), RecordValidation::Valid);
        txt.value = "x".repeat(256);
        assert_eq!(validate_record(&txt), RecordValidation::InvalidLength);
    }

    #[test]
    fn test_contract_and_wallet_addresses() {
        let addr = format!("0x{}", "ab".repeat(20));
        let wallet = DomainRecord::new(RecordType::Wallet, "a.ghost", &addr, 300);
        assert_eq!(validate_record(&wallet), RecordValidation::Valid);

        let contract = DomainRecord::new(RecordType::Contract, "a.ghost", "0x1234", 300);
        assert_eq!(validate_record(&contract), RecordValidation::InvalidLength);

        let bad = DomainRecord::new(RecordType::Contract, "a.ghost", &addr[2..], 300);
        assert_eq!(validate_record(&bad), RecordValidation::InvalidFormat);
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.is_allowed("c1"));
        assert!(limiter.is_allowed("c1"));
        assert!(!limiter.is_allowed("c1"));
        // Other clients are unaffected
        assert!(limiter.is_allowed("c2"));

        limiter.reset_counters();
        assert!(limiter.is_allowed("c1"));
    }

    #[test]
    fn test_tld_extraction() {
        assert_eq!(tld_of("alice.ghost"), "ghost");
        assert_eq!(tld_of("a.b.ETH"), "eth");
    }
}
