//! Cloudflare client against a mocked API: tunnel composite setup, DNS
//! convergence, and bucket idempotency.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use decker::cloudflare::CloudflareClient;

fn client(mock: &MockServer) -> CloudflareClient {
    CloudflareClient::with_base_url(&mock.uri(), "cf-token", "acc1")
}

fn ok<T: serde::Serialize>(result: T) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "errors": [],
        "result": result,
    }))
}

#[tokio::test]
async fn setup_tunnel_creates_routes_and_dns() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/accounts/acc1/cfd_tunnel"))
        .respond_with(ok(json!([])))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/accounts/acc1/cfd_tunnel"))
        .respond_with(ok(json!({ "id": "t1", "name": "shop" })))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/acc1/cfd_tunnel/t1/token"))
        .respond_with(ok(json!("tunnel-token")))
        .mount(&mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/accounts/acc1/cfd_tunnel/t1/configurations"))
        .and(body_partial_json(json!({
            "config": { "ingress": [
                { "hostname": "example.com", "service": "http://traefik.kube-system.svc.cluster.local:80" },
                { "service": "http_status:404" },
            ]}
        })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/zones"))
        .and(query_param("name", "example.com"))
        .respond_with(ok(json!([{ "id": "z1", "name": "example.com" }])))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/zones/z1/dns_records"))
        .respond_with(ok(json!([])))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/zones/z1/dns_records"))
        .and(body_partial_json(json!({
            "type": "CNAME",
            "name": "example.com",
            "content": "t1.cfargotunnel.com",
            "proxied": true,
        })))
        .respond_with(ok(json!({
            "id": "r1", "name": "example.com", "type": "CNAME",
            "content": "t1.cfargotunnel.com", "proxied": true,
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let setup = client(&mock)
        .setup_tunnel(
            "shop",
            "example.com",
            "http://traefik.kube-system.svc.cluster.local:80",
            "example.com",
        )
        .await
        .unwrap();
    assert_eq!(setup.id, "t1");
    assert_eq!(setup.token, "tunnel-token");
    assert_eq!(setup.hostname, "example.com");
}

#[tokio::test]
async fn ensure_a_record_skips_put_when_converged() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/zones/z1/dns_records"))
        .respond_with(ok(json!([{
            "id": "r1", "name": "example.com", "type": "A",
            "content": "203.0.113.7", "proxied": true,
        }])))
        .mount(&mock)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock)
        .await;

    let record = client(&mock)
        .ensure_a_record("z1", "example.com", "203.0.113.7", true)
        .await
        .unwrap();
    assert_eq!(record.id, "r1");
}

#[tokio::test]
async fn ensure_a_record_updates_on_drift() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/zones/z1/dns_records"))
        .respond_with(ok(json!([{
            "id": "r1", "name": "example.com", "type": "A",
            "content": "198.51.100.1", "proxied": true,
        }])))
        .mount(&mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/zones/z1/dns_records/r1"))
        .and(body_partial_json(json!({ "content": "203.0.113.7" })))
        .respond_with(ok(json!({
            "id": "r1", "name": "example.com", "type": "A",
            "content": "203.0.113.7", "proxied": true,
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let record = client(&mock)
        .ensure_a_record("z1", "example.com", "203.0.113.7", true)
        .await
        .unwrap();
    assert_eq!(record.content, "203.0.113.7");
}

#[tokio::test]
async fn ensure_bucket_swallows_already_exists() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/acc1/r2/buckets"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "success": false,
            "errors": [{ "code": 10004, "message": "The bucket you tried to create already exists" }],
            "result": null,
        })))
        .mount(&mock)
        .await;

    client(&mock)
        .ensure_bucket("shop-registry")
        .await
        .expect("existing bucket must be a no-op");
}

#[tokio::test]
async fn set_ssl_mode_patches_zone_setting() {
    let mock = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/zones/z1/settings/ssl"))
        .and(body_partial_json(json!({ "value": "full" })))
        .respond_with(ok(json!({ "id": "ssl", "value": "full" })))
        .expect(1)
        .mount(&mock)
        .await;

    client(&mock).set_ssl_mode("z1", "full").await.unwrap();
}

#[tokio::test]
async fn delete_dns_record_for_absent_hostname_is_noop() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/zones/z1/dns_records"))
        .respond_with(ok(json!([])))
        .mount(&mock)
        .await;

    client(&mock)
        .delete_dns_record("z1", "gone.example.com")
        .await
        .expect("absent record must not fail destroy");
}
