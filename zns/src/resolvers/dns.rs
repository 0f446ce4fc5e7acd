// Traditional DNS fallback
//
// Resolves through the system resolver and maps the returned addresses to
// A/AAAA records. Serving the RFC-1035 wire protocol is out of scope; this
// adapter is last in every chain and owns whatever it is asked.

use async_trait::async_trait;
use ghostbridge_shared::types::{
    DomainRecord, RecordType, ResolutionSource, ResolveResponse, ZnsError, ZnsErrorCode,
};
use std::net::SocketAddr;
use tracing::debug;

use super::{filter_records, UpstreamResolver};

const FALLBACK_TTL: u32 = 300;

pub struct DnsFallbackResolver;

impl DnsFallbackResolver {
    pub fn new() -> Self {
        Self
    }

    fn records_from_addrs(domain: &str, addrs: impl Iterator<Item = SocketAddr>) -> Vec<DomainRecord> {
        let mut records = Vec::new();
        for addr in addrs {
            match addr {
                SocketAddr::V4(v4) => records.push(DomainRecord::new(
                    RecordType::A,
                    domain,
                    &v4.ip().to_string(),
                    FALLBACK_TTL,
                )),
                SocketAddr::V6(v6) => records.push(DomainRecord::new(
                    RecordType::Aaaa,
                    domain,
                    &v6.ip().to_string(),
                    FALLBACK_TTL,
                )),
            }
        }
        records.dedup_by(|a, b| a.value == b.value && a.record_type == b.record_type);
        records
    }
}

impl Default for DnsFallbackResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamResolver for DnsFallbackResolver {
    fn name(&self) -> &'static str {
        "dns_fallback"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::TraditionalDns
    }

    async fn resolve(&self, domain: &str, record_types: &[RecordType])
        -> Option<ResolveResponse> {
        let lookup = tokio::net::lookup_host((domain, 0)).await;
        match lookup {
            Ok(addrs) => {
                let records = Self::records_from_addrs(domain, addrs);
                if records.is_empty() {
                    Some(ResolveResponse::failure(
                        domain,
                        self.source(),
                        ZnsError::new(
                            ZnsErrorCode::DomainNotFound,
                            format!("DNS returned no addresses for {}", domain),
                        ),
                    ))
                } else {
                    Some(ResolveResponse::success(
                        domain,
                        filter_records(records, record_types),
                        self.source(),
                    ))
                }
            }
            Err(e) => {
                debug!("DNS fallback lookup failed for {}: {}", domain, e);
                Some(ResolveResponse::failure(
                    domain,
                    self.source(),
                    ZnsError::new(
                        ZnsErrorCode::DomainNotFound,
                        format!("DNS lookup failed for {}", domain),
                    ),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

    #[test]
    fn test_addr_mapping() {
        let addrs = vec![
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 0)),
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 0, 0, 0)),
        ];
        let records = DnsFallbackResolver::records_from_addrs("host.tmp", addrs.into_iter());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, RecordType::A);
        assert_eq!(records[0].value, "10.0.0.1");
        assert_eq!(records[1].record_type, RecordType::Aaaa);
        assert_eq!(records[1].value, "::1");
    }

    #[tokio::test]
    async fn test_nonexistent_domain_is_owned_failure() {
        let resolver = DnsFallbackResolver::new();
        let response = resolver
            .resolve("definitely-not-a-real-host.invalidtld", &[])
            .await
            .expect("fallback always owns the namespace");
        assert_eq!(response.error.unwrap().code, ZnsErrorCode::DomainNotFound);
    }
}
