// Unstoppable Domains bridge resolver
//
// Queries the UD resolution HTTP API and maps the returned key/value
// record set onto DNS records.

use async_trait::async_trait;
use ghostbridge_shared::types::{
    DomainRecord, RecordType, ResolutionSource, ResolveResponse, ZnsError, ZnsErrorCode,
};
use std::collections::HashMap;
use tracing::warn;

use super::{filter_records, RateGate, UpstreamResolver};

const UD_TLDS: &[&str] = &[
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

/// Wallet currencies in preference order
const WALLET_PREFERENCE: &[&str] = &["ETH", "BTC", "LTC", "DOGE"];

pub struct UnstoppableResolver {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    rate: RateGate,
}

impl UnstoppableResolver {
    pub fn new(api_url: String, api_key: Option<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url,
            api_key,
            rate: RateGate::new(50),
        }
    }

    async fn fetch_records(&self, domain: &str) -> anyhow::Result<Option<HashMap<String, String>>> {
        let url = format!("{}/domains/{}", self.api_url.trim_end_matches('/'), domain);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("UD API returned status {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        let records = body
            .get("records")
            .and_then(|r| r.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(records))
    }
}

#[async_trait]
impl UpstreamResolver for UnstoppableResolver {
    fn name(&self) -> &'static str {
        "unstoppable"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::UnstoppableBridge
    }

    async fn resolve(&self, domain: &str, record_types: &[RecordType])
        -> Option<ResolveResponse> {
        let lower = domain.to_ascii_lowercase();
        if !UD_TLDS.iter().any(|tld| lower.ends_with(tld)) {
            return None;
        }

        if !self.rate.allow() {
            return Some(ResolveResponse::failure(
                domain,
                self.source(),
                ZnsError::new(
                    ZnsErrorCode::ResolverUnavailable,
                    "Unstoppable bridge rate limit exceeded",
                ),
            ));
        }

        let raw = match self.fetch_records(domain).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return Some(ResolveResponse::failure(
                    domain,
                    self.source(),
                    ZnsError::new(
                        ZnsErrorCode::DomainNotFound,
                        format!("Domain not registered with Unstoppable: {}", domain),
                    ),
                ));
            }
            Err(e) => {
                warn!("UD lookup failed for {}: {}", domain, e);
                return Some(ResolveResponse::failure(
                    domain,
                    self.source(),
                    ZnsError::new(ZnsErrorCode::ResolverUnavailable, e.to_string()),
                ));
            }
        };

        let records = map_ud_records(domain, &raw);
        if records.is_empty() {
            return Some(ResolveResponse::failure(
                domain,
                self.source(),
                ZnsError::new(
                    ZnsErrorCode::DomainNotFound,
                    format!("No mappable records for {}", domain),
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

/// Map the UD key/value record set onto DNS records:
///   dns.A / dns.AAAA      -> A / AAAA
///   crypto.<CUR>.address  -> one WALLET record, preferring ETH > BTC > LTC > DOGE
///   dweb.ipfs.hash        -> CNAME ipfs://<hash>
///   browser.redirect_url  -> CNAME
///   social.*              -> TXT key=value
pub fn map_ud_records(domain: &str, raw: &HashMap<String, String>) -> Vec<DomainRecord> {
    let mut records = Vec::new();

    if let Some(value) = raw.get("dns.A") {
        records.push(DomainRecord::new(RecordType::A, domain, value, 300));
    }
    if let Some(value) = raw.get("dns.AAAA") {
        records.push(DomainRecord::new(RecordType::Aaaa, domain, value, 300));
    }

    for currency in WALLET_PREFERENCE {
        let key = format!("crypto.{}.address", currency);
        if let Some(address) = raw.get(&key) {
            let mut record = DomainRecord::new(RecordType::Wallet, domain, address, 300);
            record.target = Some(currency.to_string());
            records.push(record);
            break;
        }
    }

    if let Some(hash) = raw.get("dweb.ipfs.hash") {
        records.push(DomainRecord::new(
            RecordType::Cname,
            domain,
            &format!("ipfs://{}", hash),
            300,
        ));
    }
    if let Some(url) = raw.get("browser.redirect_url") {
        records.push(DomainRecord::new(RecordType::Cname, domain, url, 300));
    }

    let mut social: Vec<(&String, &String)> = raw
        .iter()
        .filter(|(k, _)| k.starts_with("social."))
        .collect();
    social.sort();
    for (key, value) in social {
        records.push(DomainRecord::new(
            RecordType::Txt,
            domain,
            &format!("{}={}", key, value),
            300,
        ));
    }

    records
}
