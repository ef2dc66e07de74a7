//! Technitium adapter against a fake HTTP API

use mantrae_dns_core::config::{ProviderConfig, ZoneType};
use mantrae_dns_core::manager::{AddressAction, DeleteOutcome};
use mantrae_dns_core::traits::DnsProvider;
use mantrae_dns_core::Error;
use mantrae_dns_provider_technitium::TechnitiumProvider;
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, ip: &str, zone_type: ZoneType) -> TechnitiumProvider {
    TechnitiumProvider::new(&ProviderConfig {
        api_key: "tech-token".to_string(),
        api_url: server.uri(),
        ip: ip.to_string(),
        zone_type,
        ..Default::default()
    })
    .unwrap()
}

fn ok(response: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "status": "ok", "response": response }))
}

fn a(name: &str, ip: &str) -> Value {
    json!({ "name": name, "type": "A", "ttl": 3600, "disabled": false, "rData": { "ipAddress": ip } })
}

fn txt(name: &str, text: &str) -> Value {
    json!({ "name": name, "type": "TXT", "ttl": 3600, "disabled": false, "rData": { "text": text } })
}

async fn mount_zones(server: &MockServer, zones: &[&str]) {
    let zones: Vec<Value> = zones
        .iter()
        .map(|z| json!({ "name": z, "type": "Primary", "disabled": false }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/zones/list"))
        .and(query_param("token", "tech-token"))
        .respond_with(ok(json!({ "zones": zones })))
        .mount(server)
        .await;
}

async fn mount_records(server: &MockServer, domain: &str, records: Value) {
    Mock::given(method("GET"))
        .and(path("/api/zones/records/get"))
        .and(query_param("domain", domain))
        .and(query_param("zone", "example.com"))
        .and(query_param("listZone", "false"))
        .respond_with(ok(json!({ "records": records })))
        .mount(server)
        .await;
}

async fn mount_write(server: &MockServer, endpoint: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/api/zones/records/{}", endpoint)))
        .and(query_param("token", "tech-token"))
        .respond_with(ok(json!({})))
        .mount(server)
        .await;
}

async fn writes(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| {
            let params: Vec<String> = r
                .url
                .query_pairs()
                .filter(|(k, _)| k != "token")
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{} {}", r.url.path(), params.join("&"))
        })
        .collect()
}

#[tokio::test]
async fn upsert_creates_missing_zone_record_and_marker() {
    let server = MockServer::start().await;
    mount_zones(&server, &["other.org"]).await;
    mount_records(&server, "app.example.com", json!([])).await;
    mount_records(&server, "_mantrae-app.example.com", json!([])).await;
    mount_write(&server, "add").await;

    Mock::given(method("POST"))
        .and(path("/api/zones/create"))
        .and(query_param("zone", "example.com"))
        .and(query_param("type", "Forwarder"))
        .and(query_param("forwarder", "this-server"))
        .respond_with(ok(json!({ "domain": "example.com" })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = provider(&server, "203.0.113.5", ZoneType::Forwarder)
        .upsert_record("app.example.com")
        .await
        .unwrap();

    assert_eq!(outcome.address, AddressAction::Created);
    assert!(outcome.marker_created);
    assert_eq!(
        writes(&server).await,
        vec![
            "/api/zones/create zone=example.com&type=Forwarder&forwarder=this-server",
            "/api/zones/records/add zone=example.com&domain=app.example.com&type=A&ttl=3600&ipAddress=203.0.113.5",
            "/api/zones/records/add zone=example.com&domain=_mantrae-app.example.com&type=TXT&ttl=3600&text=managed-by=mantrae",
        ]
    );
}

#[tokio::test]
async fn drift_is_updated_by_old_and_new_address() {
    let server = MockServer::start().await;
    mount_zones(&server, &["example.com"]).await;
    mount_records(&server, "app.example.com", json!([a("app.example.com", "203.0.113.5")])).await;
    mount_records(
        &server,
        "_mantrae-app.example.com",
        json!([txt("_mantrae-app.example.com", "managed-by=mantrae")]),
    )
    .await;
    mount_write(&server, "update").await;

    let outcome = provider(&server, "203.0.113.9", ZoneType::Primary)
        .upsert_record("app.example.com")
        .await
        .unwrap();

    assert_eq!(
        outcome.address,
        AddressAction::Updated {
            previous: "203.0.113.5".to_string()
        }
    );
    assert_eq!(
        writes(&server).await,
        vec!["/api/zones/records/update zone=example.com&domain=app.example.com&type=A&ipAddress=203.0.113.5&newIpAddress=203.0.113.9"]
    );
}

#[tokio::test]
async fn delete_addresses_records_by_content() {
    let server = MockServer::start().await;
    mount_zones(&server, &["example.com"]).await;
    mount_records(&server, "app.example.com", json!([a("app.example.com", "203.0.113.5")])).await;
    mount_records(
        &server,
        "_mantrae-app.example.com",
        json!([txt("_mantrae-app.example.com", "managed-by=mantrae")]),
    )
    .await;
    mount_write(&server, "delete").await;

    let outcome = provider(&server, "203.0.113.5", ZoneType::Primary)
        .delete_record("app.example.com")
        .await
        .unwrap();

    assert!(matches!(outcome, DeleteOutcome::Deleted { ref records } if records.len() == 2));
    assert_eq!(
        writes(&server).await,
        vec![
            "/api/zones/records/delete zone=example.com&domain=app.example.com&type=A&ipAddress=203.0.113.5",
            "/api/zones/records/delete zone=example.com&domain=_mantrae-app.example.com&type=TXT&text=managed-by=mantrae",
        ]
    );
}

#[tokio::test]
async fn delete_in_missing_zone_is_a_noop() {
    let server = MockServer::start().await;
    mount_zones(&server, &[]).await;

    let outcome = provider(&server, "203.0.113.5", ZoneType::Primary)
        .delete_record("app.example.com")
        .await
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::NothingToDelete);
}

#[tokio::test]
async fn unmarked_records_are_not_deleted() {
    let server = MockServer::start().await;
    mount_zones(&server, &["example.com"]).await;
    mount_records(&server, "app.example.com", json!([a("app.example.com", "198.51.100.7")])).await;
    mount_records(
        &server,
        "_mantrae-app.example.com",
        json!([txt("_mantrae-app.example.com", "owner=someone-else")]),
    )
    .await;

    let err = provider(&server, "203.0.113.5", ZoneType::Primary)
        .delete_record("app.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotManaged(_)));
    assert!(writes(&server).await.is_empty());
}

#[tokio::test]
async fn error_status_on_http_200_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/zones/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "invalid-token",
            "errorMessage": "Invalid token or session expired."
        })))
        .mount(&server)
        .await;

    let err = provider(&server, "203.0.113.5", ZoneType::Primary)
        .list_records("app.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
}

#[tokio::test]
async fn list_in_missing_zone_is_zone_not_found() {
    let server = MockServer::start().await;
    mount_zones(&server, &["other.org"]).await;

    let err = provider(&server, "203.0.113.5", ZoneType::Primary)
        .list_records("app.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ZoneNotFound(ref zone) if zone == "example.com"));
}
