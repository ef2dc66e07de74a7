//! PowerDNS adapter against a fake HTTP API

use mantrae_dns_core::config::ProviderConfig;
use mantrae_dns_core::manager::{AddressAction, DeleteOutcome};
use mantrae_dns_core::traits::DnsProvider;
use mantrae_dns_core::Error;
use mantrae_dns_provider_powerdns::PowerDnsProvider;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ZONE_PATH: &str = "/api/v1/servers/localhost/zones/example.com.";

fn provider(server: &MockServer, ip: &str) -> PowerDnsProvider {
    PowerDnsProvider::new(&ProviderConfig {
        api_key: "pdns-key".to_string(),
        api_url: server.uri(),
        ip: ip.to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn rrset(name: &str, rrtype: &str, contents: &[&str]) -> Value {
    let records: Vec<Value> = contents
        .iter()
        .map(|c| json!({ "content": c, "disabled": false }))
        .collect();
    json!({ "name": name, "type": rrtype, "ttl": 300, "records": records })
}

async fn mount_zone(server: &MockServer, rrsets: Value) {
    Mock::given(method("GET"))
        .and(path(ZONE_PATH))
        .and(header("X-API-Key", "pdns-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "example.com.",
            "name": "example.com.",
            "kind": "Native",
            "rrsets": rrsets
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn upsert_on_empty_zone_patches_rrset_and_marker() {
    let server = MockServer::start().await;
    mount_zone(
        &server,
        json!([rrset(
            "example.com.",
            "SOA",
            &["ns1.example.com. hostmaster.example.com. 1 10800 3600 604800 3600"]
        )]),
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path(ZONE_PATH))
        .and(body_json(json!({ "rrsets": [{
            "name": "app.example.com.",
            "type": "A",
            "changetype": "REPLACE",
            "ttl": 300,
            "records": [{ "content": "203.0.113.5", "disabled": false }]
        }]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(ZONE_PATH))
        .and(body_json(json!({ "rrsets": [{
            "name": "_mantrae-app.example.com.",
            "type": "TXT",
            "changetype": "REPLACE",
            "ttl": 300,
            "records": [{ "content": "\"managed-by=mantrae\"", "disabled": false }]
        }]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = provider(&server, "203.0.113.5")
        .upsert_record("app.example.com")
        .await
        .unwrap();
    assert_eq!(outcome.address, AddressAction::Created);
    assert!(outcome.marker_created);
}

#[tokio::test]
async fn quoted_marker_and_matching_rrset_are_a_noop() {
    let server = MockServer::start().await;
    mount_zone(
        &server,
        json!([
            rrset("app.example.com.", "A", &["203.0.113.5"]),
            rrset("_mantrae-app.example.com.", "TXT", &["\"managed-by=mantrae\""]),
            rrset("other.example.com.", "A", &["198.51.100.1"]),
        ]),
    )
    .await;

    let p = provider(&server, "203.0.113.5");
    let records = p.list_records("app.example.com").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "app.example.com/A");

    assert!(p.upsert_record("app.example.com").await.unwrap().is_noop());
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
}

#[tokio::test]
async fn drifted_value_is_swapped_inside_a_shared_rrset() {
    let server = MockServer::start().await;
    mount_zone(
        &server,
        json!([
            rrset("app.example.com.", "A", &["198.51.100.1", "198.51.100.2"]),
            rrset("_mantrae-app.example.com.", "TXT", &["\"managed-by=mantrae\""]),
        ]),
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path(ZONE_PATH))
        .and(body_json(json!({ "rrsets": [{
            "name": "app.example.com.",
            "type": "A",
            "changetype": "REPLACE",
            "ttl": 300,
            "records": [
                { "content": "203.0.113.5", "disabled": false },
                { "content": "198.51.100.2", "disabled": false }
            ]
        }]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = provider(&server, "203.0.113.5")
        .upsert_record("app.example.com")
        .await
        .unwrap();

    assert_eq!(
        outcome.address,
        AddressAction::Updated {
            previous: "198.51.100.1".to_string()
        }
    );
    assert!(!outcome.marker_created);
}

#[tokio::test]
async fn delete_patches_each_rrset_once() {
    let server = MockServer::start().await;
    mount_zone(
        &server,
        json!([
            rrset("app.example.com.", "A", &["203.0.113.5", "203.0.113.6"]),
            rrset("_mantrae-app.example.com.", "TXT", &["\"managed-by=mantrae\""]),
        ]),
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path(ZONE_PATH))
        .and(body_json(json!({ "rrsets": [{
            "name": "app.example.com.", "type": "A", "changetype": "DELETE"
        }]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(ZONE_PATH))
        .and(body_json(json!({ "rrsets": [{
            "name": "_mantrae-app.example.com.", "type": "TXT", "changetype": "DELETE"
        }]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = provider(&server, "203.0.113.5")
        .delete_record("app.example.com")
        .await
        .unwrap();
    assert!(matches!(outcome, DeleteOutcome::Deleted { ref records } if records.len() == 3));
}

#[tokio::test]
async fn delete_without_marker_is_refused() {
    let server = MockServer::start().await;
    mount_zone(&server, json!([rrset("app.example.com.", "A", &["198.51.100.7"])])).await;

    let err = provider(&server, "203.0.113.5")
        .delete_record("app.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotManaged(_)));
}

#[tokio::test]
async fn unknown_zone_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": "Could not find domain 'example.com.'"
        })))
        .mount(&server)
        .await;

    let err = provider(&server, "203.0.113.5")
        .upsert_record("app.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ZoneNotFound(ref zone) if zone == "example.com"));
}

#[tokio::test]
async fn rejected_patch_surfaces_provider_message() {
    let server = MockServer::start().await;
    mount_zone(&server, json!([])).await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": "RRset app.example.com. IN A has more than one record"
        })))
        .mount(&server)
        .await;

    let err = provider(&server, "203.0.113.5")
        .upsert_record("app.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderApi { ref operation, .. } if operation == "create record"));
    assert!(err.to_string().contains("more than one record"));
}
