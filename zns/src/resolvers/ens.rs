// ENS bridge resolver for .eth domains
//
// Talks straight JSON-RPC eth_call against an Ethereum node: the registry
// yields the resolver contract for namehash(domain), then the resolver is
// read for addr, a fixed set of text keys, and the contenthash.

use async_trait::async_trait;
use ghostbridge_shared::types::{
    DomainRecord, RecordType, ResolutionSource, ResolveResponse, ZnsError, ZnsErrorCode,
};
use serde_json::json;
use sha3::{Digest, Keccak256};
use tracing::{debug, warn};

use super::{filter_records, RateGate, UpstreamResolver};

/// Text record keys read from the ENS resolver contract
const TEXT_KEYS: &[&str] = &["avatar", "description", "url", "email", "com.twitter", "com.github"];

// Function selectors: resolver(bytes32), addr(bytes32),
// text(bytes32,string), contenthash(bytes32)
const SEL_RESOLVER: &str = "0178b8bf";
const SEL_ADDR: &str = "3b3b57de";
const SEL_TEXT: &str = "59d1d43c";
const SEL_CONTENTHASH: &str = "bc1c58d1";

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub struct EnsResolver {
    client: reqwest::Client,
    rpc_url: String,
    registry_address: String,
    rate: RateGate,
}

impl EnsResolver {
    pub fn new(rpc_url: String, registry_address: String, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            rpc_url,
            registry_address,
            rate: RateGate::new(100),
        }
    }

    async fn eth_call(&self, to: &str, data: String) -> anyhow::Result<String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": to, "data": data}, "latest"],
        });
        let response: serde_json::Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(error) = response.get("error") {
            anyhow::bail!("eth_call error: {}", error);
        }
        Ok(response
            .get("result")
            .and_then(|r| r.as_str())
            .unwrap_or("0x")
            .to_string())
    }

    async fn resolver_address(&self, node: &[u8; 32]) -> anyhow::Result<Option<String>> {
        let data = format!("0x{}{}", SEL_RESOLVER, hex::encode(node));
        let result = self.eth_call(&self.registry_address, data).await?;
        let address = decode_address_word(&result);
        match address {
            Some(a) if a != ZERO_ADDRESS => Ok(Some(a)),
            _ => Ok(None),
        }
    }

    async fn read_addr(&self, resolver: &str, node: &[u8; 32]) -> Option<String> {
        let data = format!("0x{}{}", SEL_ADDR, hex::encode(node));
        match self.eth_call(resolver, data).await {
            Ok(result) => decode_address_word(&result).filter(|a| a != ZERO_ADDRESS),
            Err(e) => {
                debug!("ENS addr read failed: {}", e);
                None
            }
        }
    }

    async fn read_text(&self, resolver: &str, node: &[u8; 32], key: &str) -> Option<String> {
        let data = format!("0x{}{}", SEL_TEXT, encode_node_and_string(node, key));
        match self.eth_call(resolver, data).await {
            Ok(result) => decode_string_word(&result).filter(|s| !s.is_empty()),
            Err(_) => None,
        }
    }

    async fn read_contenthash(&self, resolver: &str, node: &[u8; 32]) -> Option<String> {
        let data = format!("0x{}{}", SEL_CONTENTHASH, hex::encode(node));
        match self.eth_call(resolver, data).await {
            Ok(result) => decode_bytes_word(&result).filter(|b| !b.is_empty()),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl UpstreamResolver for EnsResolver {
    fn name(&self) -> &'static str {
        "ens"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::EnsBridge
    }

    async fn resolve(&self, domain: &str, record_types: &[RecordType])
        -> Option<ResolveResponse> {
        if !domain.to_ascii_lowercase().ends_with(".eth") {
            return None;
        }

        if !self.rate.allow() {
            return Some(ResolveResponse::failure(
                domain,
                self.source(),
                ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    "ENS bridge rate limit exceeded",
                ),
            ));
        }

        let node = namehash(domain);
        let resolver = match self.resolver_address(&node).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                return Some(ResolveResponse::failure(
                    domain,
                    self.source(),
                    ZnsError::new(
                        ZnsErrorCode::DomainNotFound,
                        format!("No ENS resolver set for {}", domain),
                    ),
                ));
            }
            Err(e) => {
                warn!("ENS registry lookup failed for {}: {}", domain, e);
                return Some(ResolveResponse::failure(
                    domain,
                    self.source(),
                    ZnsError::new(ZnsErrorCode::ResolverUnavailable, e.to_string()),
                ));
            }
        };

        let mut records = Vec::new();
        if let Some(address) = self.read_addr(&resolver, &node).await {
            records.push(DomainRecord::new(RecordType::A, domain, &address, 3_600));
            records.push(DomainRecord::new(RecordType::Wallet, domain, &address, 3_600));
        }
        for key in TEXT_KEYS {
            if let Some(value) = self.read_text(&resolver, &node, key).await {
                records.push(DomainRecord::new(
                    RecordType::Txt,
                    domain,
                    &format!("{}={}", key, value),
                    3_600,
                ));
            }
        }
        if let Some(hash) = self.read_contenthash(&resolver, &node).await {
            records.push(DomainRecord::new(
                RecordType::Cname,
                domain,
                &format!("ipfs://{}", hash),
                3_600,
            ));
        }

        if records.is_empty() {
            return Some(ResolveResponse::failure(
                domain,
                self.source(),
                ZnsError::new(
                    ZnsErrorCode::DomainNotFound,
                    format!("ENS resolver holds no records for {}", domain),
                ),
            ));
        }

        Some(ResolveResponse::success(
            domain,
            filter_records(records, record_types),
            self.source(),
        ))
    }
}

/// Standard ENS namehash: recursive Keccak-256 over labels in reverse order
pub fn namehash(domain: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if domain.is_empty() {
        return node;
    }
    for label in domain.to_ascii_lowercase().split('.').rev() {
        let label_hash: [u8; 32] = Keccak256::digest(label.as_bytes()).into();
        let mut hasher = Keccak256::new();
        hasher.update(node);
        hasher.update(label_hash);
        node = hasher.finalize().into();
    }
    node
}

/// ABI-encode (bytes32, string) call arguments
fn encode_node_and_string(node: &[u8; 32], value: &str) -> String {
    let mut encoded = String::new();
    encoded.push_str(&hex::encode(node));
    // Offset of the dynamic string, relative to argument start
    encoded.push_str(&hex::encode(abi_word(0x40)));
    encoded.push_str(&hex::encode(abi_word(value.len() as u64)));
    let mut padded = value.as_bytes().to_vec();
    while padded.len() % 32 != 0 {
        padded.push(0);
    }
    encoded.push_str(&hex::encode(padded));
    encoded
}

fn abi_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Last 20 bytes of a 32-byte return word as a 0x address
fn decode_address_word(result: &str) -> Option<String> {
    let raw = result.strip_prefix("0x")?;
    if raw.len() < 64 {
        return None;
    }
    Some(format!("0x{}", &raw[raw.len() - 40..]))
}

/// ABI-decode a single dynamic string return value
fn decode_string_word(result: &str) -> Option<String> {
    decode_bytes_raw(result).and_then(|bytes| String::from_utf8(bytes).ok())
}

/// ABI-decode a single dynamic bytes return value as hex
fn decode_bytes_word(result: &str) -> Option<String> {
    decode_bytes_raw(result).map(hex::encode)
}

fn decode_bytes_raw(result: &str) -> Option<Vec<u8>> {
    let raw = hex::decode(result.strip_prefix("0x")?).ok()?;
    if raw.len() < 64 {
        return None;
    }
    let offset = u64::from_be_bytes(raw[24..32].try_into().ok()?) as usize;
    if raw.len() < offset + 32 {
        return None;
    }
    let length = u64::from_be_bytes(raw[offset + 24..offset + 32].try_into().ok()?) as usize;
    let start = offset + 32;
    if raw.len() < start + length {
        return None;
    }
    Some(raw[start..start + length].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namehash_known_vectors() {
        assert_eq!(namehash(""), [0u8; 32]);
        assert_eq!(
            hex::encode(namehash("eth")),
            "93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
        assert_eq!(
            hex::encode(namehash("foo.eth")),
            "de9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f"
        );
    }

    #[test]
    fn test_namehash_is_case_insensitive() {
        assert_eq!(namehash("Foo.ETH"), namehash("foo.eth"));
    }

    #[test]
    fn test_decode_address_word() {
        let word = format!("0x{}{}", "00".repeat(12), "ab".repeat(20));
        assert_eq!(
            decode_address_word(&word).unwrap(),
            format!("0x{}", "ab".repeat(20))
        );
        assert!(decode_address_word("0x12").is_none());
    }

    #[test]
    fn test_decode_string_round_trip() {
        // offset word + length word + "hello" padded
        let mut encoded = String::from("0x");
        encoded.push_str(&hex::encode(abi_word(0x20)));
        encoded.push_str(&hex::encode(abi_word(5)));
        encoded.push_str(&hex::encode(b"hello"));
        encoded.push_str(&"00".repeat(27));
        assert_eq!(decode_string_word(&encoded).unwrap(), "hello");
    }

    #[test]
    fn test_encode_node_and_string_layout() {
        let node = [0x11u8; 32];
        let encoded = encode_node_and_string(&node, "url");
        // node + offset + length + one padded chunk
        assert_eq!(encoded.len(), (32 + 32 + 32 + 32) * 2);
        assert!(encoded.starts_with(&hex::encode(node)));
    }

    #[tokio::test]
    async fn test_non_eth_domain_is_not_owned() {
        let resolver = EnsResolver::new(
            "http://127.0.0.1:1".to_string(),
            ZERO_ADDRESS.to_string(),
            100,
        );
        assert!(resolver.resolve("alice.ghost", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_rpc_reports_unavailable() {
        let resolver = EnsResolver::new(
            "http://127.0.0.1:1".to_string(),
            ZERO_ADDRESS.to_string(),
            100,
        );
        let response = resolver.resolve("vitalik.eth", &[]).await.unwrap();
        assert_eq!(
            response.error.unwrap().code,
            ZnsErrorCode::ResolverUnavailable
        );
    }
}
