//! Configuration stability: load → serialize → load yields the same
//! structure modulo default application.

use decker::config;

const FULL: &str = r#"
name: shop
target: production
compute:
  provider: scaleway
  location: fr-par-1
  image: ubuntu_noble
  master:
    type: DEV1-M
  servers:
    workers:
      type: DEV1-L
      count: 2
cloudflare:
  api_token: tok
  account_id: acc
  domain: example.com
  zone: example.com
git:
  repo: https://github.com/example/shop
databases:
  postgres:
    username: app
    database: app
    password: pw
services:
  redis:
    image: redis:7
    port: 6379
  minio:
    image: minio/minio
    port: 9000
    mount_path: /data
    runs_on: workers
app:
  dockerfile: Dockerfile
  platform: linux/arm64
  processes:
    web:
      command: bin/server
      port: 3000
      subdomain: ""
      replicas: 3
    worker:
      command: bin/work
      runs_on:
        - workers
        - master
      setup:
        - bin/migrate
env:
  SECRET_KEY_BASE: abc123
storage:
  uploads:
    public: true
    cors:
      - allowed_origins: ["https://example.com"]
        allowed_methods: ["GET", "PUT"]
"#;

#[test]
fn test_round_trip_is_stable() {
    let first = config::from_str(FULL).expect("config loads");
    let serialized = serde_yaml::to_string(&first).expect("config serializes");
    let second = config::from_str(&serialized).expect("serialized config re-loads");
    assert_eq!(first, second);
}

#[test]
fn test_defaults_applied_on_load() {
    let config = config::from_str(FULL).unwrap();
    let app = config.app.as_ref().unwrap();
    assert_eq!(app.processes["web"].replica_count(), 3, "explicit replicas win");
    assert_eq!(app.processes["worker"].replica_count(), 1);
    assert_eq!(
        config.compute.servers["workers"].count, 2,
        "explicit count preserved"
    );
    assert_eq!(config.compute.master_group().unwrap().instance_type, "DEV1-M");
    assert!(config.compute.is_multi_server());
}

#[test]
fn test_env_interpolation_failure_names_variable() {
    let yaml = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
env:
  TOKEN: ${DECKER_ROUND_TRIP_UNSET_XYZ}
"#;
    let err = config::from_str(yaml).unwrap_err();
    assert!(format!("{err}").contains("DECKER_ROUND_TRIP_UNSET_XYZ"));
}
