// Native resolver for identity and infrastructure namespaces
//
// Authoritative over the in-process registered-domain store. A chain
// endpoint can be configured for a future chain client; with no backend
// configured, unknown domains yield None so the chain can fall through.

use async_trait::async_trait;
use ghostbridge_shared::crypto;
use ghostbridge_shared::types::{
    now_unix_secs, ChangeEventType, DomainChangeEvent, DomainData, DomainRecord, RecordType,
    RegisterRequest, ResolutionSource, ResolveResponse, UpdateRequest, ZnsError, ZnsErrorCode,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::validator::{self, RecordValidation};

use super::{filter_records, UpstreamResolver};

pub struct NativeResolver {
    domains: RwLock<BTreeMap<String, DomainData>>,
    #[allow(dead_code)]
    chain_endpoint: Option<String>,
    require_signatures: bool,
}

impl NativeResolver {
    pub fn new(chain_endpoint: Option<String>, require_signatures: bool) -> Self {
        Self {
            domains: RwLock::new(BTreeMap::new()),
            chain_endpoint,
            require_signatures,
        }
    }

    /// Register a domain, or renew it when the same owner re-registers.
    /// Returns the transaction hash and the emitted change event.
    pub async fn register_domain(
        &self,
        request: &RegisterRequest,
    ) -> Result<(String, DomainChangeEvent), ZnsError> {
        let data = DomainData {
            domain: request.domain.clone(),
            owner: request.owner.clone(),
            records: request.records.clone(),
            contract_address: None,
            metadata: request.metadata.clone().unwrap_or_default(),
            last_updated: if request.last_updated > 0 {
                request.last_updated
            } else {
                now_unix_secs()
            },
            expiry: request.expiry,
            signature: request.signature.clone(),
        };

        if self.require_signatures
            && validator::verify_domain_signature(&data, &request.owner)
                != RecordValidation::Valid
        {
            return Err(ZnsError::new(
                ZnsErrorCode::SignatureInvalid,
                format!("Signature verification failed for {}", request.domain),
            ));
        }

        let mut domains = self.domains.write().await;
        let (event_type, old_records) = match domains.get(&request.domain) {
            Some(existing) if existing.owner != request.owner => {
                return Err(ZnsError::new(
                    ZnsErrorCode::PermissionDenied,
                    format!("Domain already registered: {}", request.domain),
                ));
            }
            Some(existing) => (ChangeEventType::Renewed, existing.records.clone()),
            None => (ChangeEventType::Registered, Vec::new()),
        };

        let tx_hash =
            crypto::transaction_hash(&request.domain, "register", data.last_updated);
        let mut event = DomainChangeEvent::new(&request.domain, event_type);
        event.old_records = old_records;
        event.new_records = data.records.clone();
        event.transaction_hash = tx_hash.clone();

        domains.insert(request.domain.clone(), data);
        info!("📝 {} domain {}", event_type, request.domain);
        Ok((tx_hash, event))
    }

    /// Replace a domain's records. Returns the transaction hash and the
    /// emitted change event carrying old and new record sets.
    pub async fn update_domain(
        &self,
        request: &UpdateRequest,
    ) -> Result<(String, DomainChangeEvent), ZnsError> {
        let mut domains = self.domains.write().await;
        let existing = domains.get_mut(&request.domain).ok_or_else(|| {
            ZnsError::new(
                ZnsErrorCode::DomainNotFound,
                format!("Domain not registered: {}", request.domain),
            )
        })?;

        if self.require_signatures {
            let candidate = DomainData {
                records: request.records.clone(),
                last_updated: request.last_updated,
                signature: request.signature.clone(),
                ..existing.clone()
            };
            if validator::verify_domain_signature(&candidate, &existing.owner)
                != RecordValidation::Valid
            {
                return Err(ZnsError::new(
                    ZnsErrorCode::SignatureInvalid,
                    format!("Signature verification failed for {}", request.domain),
                ));
            }
        }

        let old_records = std::mem::replace(&mut existing.records, request.records.clone());
        existing.last_updated = now_unix_secs();
        if !request.signature.is_empty() {
            existing.signature = request.signature.clone();
        }

        let tx_hash =
            crypto::transaction_hash(&request.domain, "update", existing.last_updated);
        let mut event = DomainChangeEvent::new(&request.domain, ChangeEventType::Updated);
        event.old_records = old_records;
        event.new_records = existing.records.clone();
        event.transaction_hash = tx_hash.clone();

        debug!("✏️  Updated domain {}", request.domain);
        Ok((tx_hash, event))
    }

    /// Transfer ownership to a new owner
    pub async fn transfer_domain(
        &self,
        domain: &str,
        new_owner: &str,
    ) -> Result<(String, DomainChangeEvent), ZnsError> {
        let mut domains = self.domains.write().await;
        let existing = domains.get_mut(domain).ok_or_else(|| {
            ZnsError::new(
                ZnsErrorCode::DomainNotFound,
                format!("Domain not registered: {}", domain),
            )
        })?;

        existing.owner = new_owner.to_string();
        existing.last_updated = now_unix_secs();

        let tx_hash = crypto::transaction_hash(domain, "transfer", existing.last_updated);
        let mut event = DomainChangeEvent::new(domain, ChangeEventType::Transferred);
        event.new_records = existing.records.clone();
        event.transaction_hash = tx_hash.clone();
        Ok((tx_hash, event))
    }

    /// Drop domains whose expiry has passed, emitting one Expired event each
    pub async fn sweep_expired(&self) -> Vec<DomainChangeEvent> {
        let now = now_unix_secs();
        let mut domains = self.domains.write().await;
        let expired: Vec<String> = domains
            .iter()
            .filter(|(_, d)| d.expiry.is_some_and(|e| e <= now))
            .map(|(name, _)| name.clone())
            .collect();

        let mut events = Vec::with_capacity(expired.len());
        for name in expired {
            if let Some(data) = domains.remove(&name) {
                let mut event = DomainChangeEvent::new(&name, ChangeEventType::Expired);
                event.old_records = data.records;
                events.push(event);
                info!("⌛ Domain expired: {}", name);
            }
        }
        events
    }

    pub async fn domain_count(&self) -> usize {
        self.domains.read().await.len()
    }

    pub async fn get_owner(&self, domain: &str) -> Option<String> {
        self.domains.read().await.get(domain).map(|d| d.owner.clone())
    }
}

#[async_trait]
impl UpstreamResolver for NativeResolver {
    fn name(&self) -> &'static str {
        "native"
    }

    fn source(&self) -> ResolutionSource {
        ResolutionSource::ZnsNative
    }

    async fn resolve(&self, domain: &str, record_types: &[RecordType])
        -> Option<ResolveResponse> {
        let domains = self.domains.read().await;
        let data = domains.get(domain)?;

        if data.expiry.is_some_and(|e| e <= now_unix_secs()) {
            return Some(ResolveResponse::failure(
                domain,
                self.source(),
                ZnsError::new(
                    ZnsErrorCode::DomainExpired,
                    format!("Domain expired: {}", domain),
                ),
            ));
        }

        let records: Vec<DomainRecord> =
            filter_records(data.records.clone(), record_types);
        let mut response = ResolveResponse::success(domain, records, self.source());
        response.metadata = Some(data.metadata.clone());
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostbridge_shared::crypto::KeyPair;

    fn register_request(domain: &str, owner: &str) -> RegisterRequest {
        RegisterRequest {
            domain: domain.to_string(),
            owner: owner.to_string(),
            records: vec![DomainRecord::new(RecordType::A, domain, "10.0.0.1", 600)],
            expiry: None,
            metadata: None,
            last_updated: 0,
            signature: String::new(),
        }
    }

    #[tokio::test]
    async fn test_register_then_resolve() {
        let resolver = NativeResolver::new(None, false);
        let (tx, event) = resolver
            .register_domain(&register_request("alice.ghost", "ghost1abc"))
            .await
            .unwrap();
        assert!(tx.starts_with("0x"));
        assert_eq!(event.event_type, ChangeEventType::Registered);

        let response = resolver.resolve("alice.ghost", &[]).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.records.len(), 1);
        assert_eq!(response.resolution_info.source, ResolutionSource::ZnsNative);
    }

    #[tokio::test]
    async fn test_unknown_domain_is_not_owned() {
        let resolver = NativeResolver::new(None, false);
        assert!(resolver.resolve("missing.ghost", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_register_conflict_for_other_owner() {
        let resolver = NativeResolver::new(None, false);
        resolver
            .register_domain(&register_request("alice.ghost", "ghost1abc"))
            .await
            .unwrap();

        let err = resolver
            .register_domain(&register_request("alice.ghost", "ghost1other"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ZnsErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_reregister_same_owner_is_renewal() {
        let resolver = NativeResolver::new(None, false);
        resolver
            .register_domain(&register_request("alice.ghost", "ghost1abc"))
            .await
            .unwrap();

        let (_, event) = resolver
            .register_domain(&register_request("alice.ghost", "ghost1abc"))
            .await
            .unwrap();
        assert_eq!(event.event_type, ChangeEventType::Renewed);
        assert_eq!(event.old_records.len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_records_and_reports_old() {
        let resolver = NativeResolver::new(None, false);
        resolver
            .register_domain(&register_request("alice.ghost", "ghost1abc"))
            .await
            .unwrap();

        let update = UpdateRequest {
            domain: "alice.ghost".to_string(),
            records: vec![DomainRecord::new(RecordType::A, "alice.ghost", "10.0.0.2", 300)],
            last_updated: 0,
            signature: String::new(),
        };
        let (_, event) = resolver.update_domain(&update).await.unwrap();
        assert_eq!(event.event_type, ChangeEventType::Updated);
        assert_eq!(event.old_records[0].value, "10.0.0.1");
        assert_eq!(event.new_records[0].value, "10.0.0.2");

        let response = resolver.resolve("alice.ghost", &[]).await.unwrap();
        assert_eq!(response.records[0].value, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_update_unknown_domain() {
        let resolver = NativeResolver::new(None, false);
        let update = UpdateRequest {
            domain: "missing.ghost".to_string(),
            records: vec![],
            last_updated: 0,
            signature: String::new(),
        };
        let err = resolver.update_domain(&update).await.unwrap_err();
        assert_eq!(err.code, ZnsErrorCode::DomainNotFound);
    }

    #[tokio::test]
    async fn test_signature_required_register() {
        let resolver = NativeResolver::new(None, true);
        let keypair = KeyPair::generate();

        let mut request = register_request("alice.ghost", &keypair.public_key_hex());
        request.last_updated = now_unix_secs();
        let unsigned = DomainData {
            domain: request.domain.clone(),
            owner: request.owner.clone(),
            records: request.records.clone(),
            contract_address: None,
            metadata: Default::default(),
            last_updated: request.last_updated,
            expiry: None,
            signature: String::new(),
        };
        request.signature = keypair.sign_domain(&unsigned);

        assert!(resolver.register_domain(&request).await.is_ok());

        // A bad signature is rejected
        let mut forged = register_request("bob.ghost", &keypair.public_key_hex());
        forged.signature = "00".repeat(64);
        let err = resolver.register_domain(&forged).await.unwrap_err();
        assert_eq!(err.code, ZnsErrorCode::SignatureInvalid);
    }

    #[tokio::test]
    async fn test_expired_domain_resolves_to_expired_error() {
        let resolver = NativeResolver::new(None, false);
        let mut request = register_request("old.ghost", "ghost1abc");
        request.expiry = Some(now_unix_secs() - 10);
        resolver.register_domain(&request).await.unwrap();

        let response = resolver.resolve("old.ghost", &[]).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, ZnsErrorCode::DomainExpired);
    }

    #[tokio::test]
    async fn test_sweep_expired_emits_events() {
        let resolver = NativeResolver::new(None, false);
        let mut request = register_request("old.ghost", "ghost1abc");
        request.expiry = Some(now_unix_secs() - 10);
        resolver.register_domain(&request).await.unwrap();
        resolver
            .register_domain(&register_request("live.ghost", "ghost1abc"))
            .await
            .unwrap();

        let events = resolver.sweep_expired().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].domain, "old.ghost");
        assert_eq!(events[0].event_type, ChangeEventType::Expired);
        assert_eq!(resolver.domain_count().await, 1);
    }

    #[tokio::test]
    async fn test_transfer_domain() {
        let resolver = NativeResolver::new(None, false);
        resolver
            .register_domain(&register_request("alice.ghost", "ghost1abc"))
            .await
            .unwrap();

        let (_, event) = resolver
            .transfer_domain("alice.ghost", "ghost1new")
            .await
            .unwrap();
        assert_eq!(event.event_type, ChangeEventType::Transferred);
        assert_eq!(
            resolver.get_owner("alice.ghost").await.as_deref(),
            Some("ghost1new")
        );
    }
}
