//! Hetzner adapter against a mocked API: idempotency of find_or_create,
//! conflict swallowing, and firewall rule round-trips.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use decker::providers::{ComputeProvider, FirewallRule, HetznerProvider, ServerSpec};

fn server_json(id: i64, name: &str, instance_type: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "status": "running",
        "server_type": { "name": instance_type },
        "datacenter": { "location": { "name": "nbg1" } },
        "public_net": { "ipv4": { "ip": "203.0.113.7" } },
        "private_net": [{ "network": 1, "ip": "10.0.1.2" }],
        "labels": { "managed-by": "decker" },
    })
}

fn spec(name: &str) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        instance_type: "cpx21".to_string(),
        location: "nbg1".to_string(),
        image: "ubuntu-24.04".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn find_or_create_server_reuses_existing_without_post() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .and(query_param("name", "shop-master-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "servers": [server_json(42, "shop-master-1", "cpx21")]
        })))
        .mount(&mock)
        .await;
    // Any POST would be a bug on the second run.
    Mock::given(method("POST"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    let server = provider.find_or_create_server(&spec("shop-master-1")).await.unwrap();
    assert_eq!(server.id, "42");
    assert_eq!(server.public_ipv4.as_deref(), Some("203.0.113.7"));
    assert_eq!(server.private_ipv4.as_deref(), Some("10.0.1.2"));
}

#[tokio::test]
async fn find_or_create_server_creates_when_absent() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "servers": [] })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "server": server_json(7, "shop-master-1", "cpx21")
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    let server = provider.find_or_create_server(&spec("shop-master-1")).await.unwrap();
    assert_eq!(server.id, "7");
}

#[tokio::test]
async fn create_conflict_falls_back_to_find() {
    let mock = MockServer::start().await;
    // First lookup: empty; lookup after conflict: present.
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "servers": [] })))
        .up_to_n_times(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": { "code": "uniqueness_error", "message": "server name already used" }
        })))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "servers": [server_json(9, "shop-master-1", "cpx21")]
        })))
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    let server = provider.find_or_create_server(&spec("shop-master-1")).await.unwrap();
    assert_eq!(server.id, "9", "conflict must resolve to the existing server");
}

#[tokio::test]
async fn firewall_rules_round_trip() {
    let mock = MockServer::start().await;
    let rules_json = json!([
        { "direction": "in", "protocol": "tcp", "port": "22",
          "source_ips": ["0.0.0.0/0", "::/0"] },
        { "direction": "in", "protocol": "icmp", "port": null,
          "source_ips": ["0.0.0.0/0", "::/0"] },
    ]);
    Mock::given(method("POST"))
        .and(path("/firewalls/5/actions/set_rules"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "actions": [] })))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/firewalls/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "firewall": { "id": 5, "name": "shop-firewall", "rules": rules_json }
        })))
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    let rules = vec![FirewallRule::tcp_in("22"), FirewallRule::icmp_in()];
    provider.set_firewall_rules("5", &rules).await.unwrap();
    let firewall = provider.get_firewall("5").await.unwrap();
    assert_eq!(firewall.rules, rules, "read-back rules must equal what was set");
}

#[tokio::test]
async fn attach_volume_conflict_is_swallowed() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/volumes/3/actions/attach"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": { "code": "already_attached", "message": "volume is already attached" }
        })))
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    provider
        .attach_volume("3", "42")
        .await
        .expect("already attached must be a no-op");
}

#[tokio::test]
async fn load_balancer_create_and_attach_conflicts_swallowed() {
    let mock = MockServer::start().await;
    let lb_name = decker::naming::load_balancer_name("shop");
    Mock::given(method("GET"))
        .and(path("/load_balancers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "load_balancers": [] })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/load_balancers"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "load_balancer": {
                "id": 11, "name": lb_name,
                "public_net": { "ipv4": { "ip": "203.0.113.99" } },
            }
        })))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/load_balancers/11/actions/add_target"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": { "code": "target_already_defined", "message": "target already defined" }
        })))
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    let lb = provider.find_or_create_load_balancer(&lb_name, "nbg1").await.unwrap();
    assert_eq!(lb.id, "11");
    assert_eq!(lb.public_ipv4.as_deref(), Some("203.0.113.99"));
    provider
        .add_load_balancer_target("11", "42")
        .await
        .expect("existing target must be a no-op");
}

#[tokio::test]
async fn managed_certificate_found_by_name() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/certificates"))
        .and(query_param("name", "shop-cert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "certificates": [{ "id": 3, "name": "shop-cert", "domain_names": ["example.com"] }]
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/certificates"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    let cert = provider
        .find_or_create_managed_certificate("shop-cert", &["example.com".to_string()])
        .await
        .unwrap();
    assert_eq!(cert.id, "3");
    assert_eq!(cert.domain_names, vec!["example.com"]);
}

#[tokio::test]
async fn delete_absent_server_is_a_noop() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "servers": [] })))
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "token");
    provider
        .delete_server_by_name("shop-web-9")
        .await
        .expect("absent server must not fail destroy");
}

#[tokio::test]
async fn unauthorized_credentials_reported_as_configuration() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ssh_keys"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "unauthorized", "message": "unable to authenticate" }
        })))
        .mount(&mock)
        .await;

    let provider = HetznerProvider::with_base_url(&mock.uri(), "bad-token");
    let err = provider.validate_credentials().await.unwrap_err();
    assert!(
        format!("{err}").contains("HETZNER_API_TOKEN"),
        "credential errors must point at the env var, got: {err}"
    );
}
