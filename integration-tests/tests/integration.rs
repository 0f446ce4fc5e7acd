// End-to-end scenarios for the GhostBridge gateway
//
// These drive the multiplexer and the ZNS service facade exactly the way
// the transport listeners do: framed (path, body) units in, (status,
// body) units out.

use std::sync::Arc;

use bridged::channels::ChannelRegistry;
use bridged::{GatewayRequest, Multiplexer};
use ghostbridge_shared::types::{
    DomainRecord, RecordType, RegisterRequest, ResolutionSource, ResolveRequest, ResolveResponse,
    SubscriptionRequest, ZnsErrorCode,
};
use test_case::test_case;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zns::{ZnsConfig, ZnsService};

fn zns_config() -> ZnsConfig {
    let mut config = ZnsConfig::default();
    config.resolver.enable_dns_fallback = false;
    config.resolver.rate_limit_per_minute = 1_000;
    config
}

fn service(config: ZnsConfig) -> ZnsService {
    ZnsService::new(config).unwrap()
}

fn multiplexer(config: ZnsConfig) -> Multiplexer {
    Multiplexer::new(
        Arc::new(service(config)),
        ChannelRegistry::new(vec![]),
        64,
        5_000,
    )
}

fn register_request(domain: &str) -> RegisterRequest {
    RegisterRequest {
        domain: domain.to_string(),
        owner: "ghost1owner".to_string(),
        records: vec![DomainRecord::new(RecordType::A, domain, "10.0.0.1", 600)],
        expiry: None,
        metadata: None,
        last_updated: 0,
        signature: String::new(),
    }
}

// Scenario 1: resolve cache miss then hit
#[tokio::test]
async fn resolve_miss_then_cache_hit() {
    let service = service(zns_config());
    let response = service.register(&register_request("alice.ghost"), "seed").await;
    assert!(response.error.is_none());

    let request: ResolveRequest = serde_json::from_str(
        r#"{"domain":"alice.ghost","record_types":["A"],"use_cache":true,"max_ttl":3600}"#,
    )
    .unwrap();

    let first = service.resolve(&request, "c1").await;
    assert!(first.is_success());
    assert_eq!(first.resolution_info.source, ResolutionSource::ZnsNative);
    assert!(!first.resolution_info.was_cached);
    assert_eq!(first.records.len(), 1);
    assert_eq!(first.records[0].value, "10.0.0.1");

    let second = service.resolve(&request, "c1").await;
    assert!(second.is_success());
    assert_eq!(second.resolution_info.source, ResolutionSource::Cache);
    assert!(second.resolution_info.was_cached);
    assert_eq!(second.records, first.records);
}

// Scenario 2: the third call in the window is rate limited and exactly
// one RATE_LIMITED increment is recorded
#[tokio::test]
async fn rate_limit_third_call_in_window() {
    let mut config = zns_config();
    config.resolver.rate_limit_per_minute = 2;
    let service = service(config);

    let request = ResolveRequest::for_domain("bob.eth");
    let first = service.resolve(&request, "c1").await;
    let second = service.resolve(&request, "c1").await;
    // With the bridge disabled these are resolver-level outcomes, never
    // rate-limit errors
    for response in [&first, &second] {
        if let Some(error) = &response.error {
            assert_ne!(error.code, ZnsErrorCode::RateLimited);
        }
    }

    let third = service.resolve(&request, "c1").await;
    assert_eq!(third.error.unwrap().code, ZnsErrorCode::RateLimited);
    assert_eq!(
        service.metrics().error_count(ZnsErrorCode::RateLimited),
        1
    );
}

// Scenario 3: invalid TLD short-circuits before any upstream or cache
#[test_case("bad.invalidtld")]
#[test_case("no-dots")]
#[test_case("")]
#[tokio::test]
async fn invalid_domain_is_rejected(domain: &str) {
    let service = service(zns_config());
    let mut request = ResolveRequest::for_domain(domain);
    request.record_types = vec![RecordType::A];

    let response = service.resolve(&request, "c1").await;
    assert_eq!(response.error.unwrap().code, ZnsErrorCode::InvalidDomain);
    assert!(service.metrics_report().per_resolver.is_empty());
    assert_eq!(service.status().cache.entries, 0);
}

// Scenario 4: ENS bridge path against a mocked eth JSON-RPC upstream
#[tokio::test]
async fn ens_bridge_resolves_through_mocked_registry() {
    let mock = MockServer::start().await;
    let resolver_word = format!("0x{}{}", "00".repeat(12), "4976fb03c32e5b8cfe2b6ccb31c09ba78ebaba41");
    let addr_word = format!("0x{}{}", "00".repeat(12), "d8da6bf26964af9d7eed9e03e53415d37aa96045");

    // registry.resolver(namehash(domain))
    Mock::given(method("POST"))
        .and(body_string_contains("0178b8bf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "result": resolver_word
        })))
        .mount(&mock)
        .await;
    // resolver.addr(node)
    Mock::given(method("POST"))
        .and(body_string_contains("3b3b57de"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "result": addr_word
        })))
        .mount(&mock)
        .await;
    // text and contenthash reads return nothing
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "result": "0x"
        })))
        .mount(&mock)
        .await;

    let mut config = zns_config();
    config.resolver.enable_ens_bridge = true;
    config.resolver.eth_rpc_url = mock.uri();
    let service = service(config);

    let request: ResolveRequest = serde_json::from_str(
        r#"{"domain":"vitalik.eth","record_types":["A","TXT"]}"#,
    )
    .unwrap();
    let response = service.resolve(&request, "c1").await;

    assert!(response.is_success(), "error: {:?}", response.error);
    assert_eq!(response.resolution_info.source, ResolutionSource::EnsBridge);
    let a_record = response
        .records
        .iter()
        .find(|r| r.record_type == RecordType::A)
        .expect("an A record with the mapped address");
    assert_eq!(
        a_record.value,
        "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
    );

    // The bridge result is cached with source attribution
    let again = service.resolve(&request, "c1").await;
    assert!(again.resolution_info.was_cached);
    assert_eq!(again.resolution_info.source, ResolutionSource::Cache);
}

// Scenario 5: subscription fan-out to a direct and a wildcard subscriber
#[tokio::test]
async fn subscription_fan_out() {
    let service = service(zns_config());
    let sub1 = service
        .create_domain_subscription(
            &SubscriptionRequest {
                domains: vec!["alice.ghost".to_string()],
                ..Default::default()
            },
            "client-a",
        )
        .unwrap();
    let sub2 = service
        .create_domain_subscription(&SubscriptionRequest::default(), "client-b")
        .unwrap();

    // Registration publishes the change event
    let response = service.register(&register_request("alice.ghost"), "seed").await;
    assert!(response.error.is_none());

    assert_eq!(service.get_subscription_events(&sub1, 10).unwrap().len(), 1);
    assert_eq!(service.get_subscription_events(&sub2, 10).unwrap().len(), 1);
    assert!(service.get_subscription_events(&sub1, 10).unwrap().is_empty());
}

// Scenario 6: /dns requests naming a ZNS domain are redirected in the
// dispatcher and answered with a ZNS response shape
#[tokio::test]
async fn dns_to_zns_redirect_in_dispatcher() {
    let mux = multiplexer(zns_config());

    let register = GatewayRequest {
        path: "/zns/register".to_string(),
        body: serde_json::to_vec(&register_request("alice.ghost")).unwrap(),
        client_id: "seed".to_string(),
    };
    assert_eq!(mux.dispatch(register).await.status, 200);

    let lookup = GatewayRequest {
        path: "/dns/lookup".to_string(),
        body: br#"{"name":"alice.ghost","type":"A"}"#.to_vec(),
        client_id: "client".to_string(),
    };
    let response = mux.dispatch(lookup).await;
    assert_eq!(response.status, 200);

    let parsed: ResolveResponse = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(parsed.domain, "alice.ghost");
    assert!(parsed.is_success());
    assert_eq!(parsed.records[0].value, "10.0.0.1");
}

// The whole wire path: register and resolve through framed units
#[tokio::test]
async fn gateway_register_then_resolve_round_trip() {
    let mux = multiplexer(zns_config());

    let register = GatewayRequest {
        path: "/zns/register".to_string(),
        body: serde_json::to_vec(&register_request("core.zns")).unwrap(),
        client_id: "client".to_string(),
    };
    let registered = mux.dispatch(register).await;
    assert_eq!(registered.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&registered.body).unwrap();
    assert!(body["transaction_hash"].as_str().unwrap().starts_with("0x"));

    let resolve = GatewayRequest {
        path: "/zns/resolve".to_string(),
        body: br#"{"domain":"core.zns","record_types":["A"]}"#.to_vec(),
        client_id: "client".to_string(),
    };
    let resolved = mux.dispatch(resolve).await;
    assert_eq!(resolved.status, 200);
    let parsed: ResolveResponse = serde_json::from_slice(&resolved.body).unwrap();
    assert!(parsed.is_success());

    // Serialization round-trips modulo key order
    let re_encoded = serde_json::to_vec(&parsed).unwrap();
    let re_parsed: ResolveResponse = serde_json::from_slice(&re_encoded).unwrap();
    assert_eq!(re_parsed.records, parsed.records);
    assert_eq!(re_parsed.resolution_info, parsed.resolution_info);
}

// QUIC frame codec round trip, as used by the HTTP/3 listener
#[test]
fn quic_frame_codec_round_trip() {
    use bridged::transport::{FrameRequest, FrameResponse};

    let request = FrameRequest {
        path: "/zns/resolve".to_string(),
        body: br#"{"domain":"alice.ghost"}"#.to_vec(),
    };
    let decoded: FrameRequest =
        bincode::deserialize(&bincode::serialize(&request).unwrap()).unwrap();
    assert_eq!(decoded.path, request.path);
    assert_eq!(decoded.body, request.body);

    let response = FrameResponse {
        status: 429,
        body: b"slow down".to_vec(),
    };
    let decoded: FrameResponse =
        bincode::deserialize(&bincode::serialize(&response).unwrap()).unwrap();
    assert_eq!(decoded.status, 429);
}

// Register is limited to native namespaces
#[tokio::test]
async fn register_outside_native_namespaces_is_denied() {
    let service = service(zns_config());
    let response = service
        .register(&register_request("vitalik.eth"), "client")
        .await;
    assert_eq!(
        response.error.unwrap().code,
        ZnsErrorCode::PermissionDenied
    );
}
