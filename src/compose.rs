//! docker-compose generator for sandbox targets.
//!
//! A sandbox runs the whole stack on one machine under docker-compose
//! instead of the cluster; databases and services become compose
//! services, app processes run the locally built image. Service
//! discovery uses compose DNS, so URLs point at bare service names.

use std::collections::HashMap;

use docker_compose_types as dctypes;
use indexmap::IndexMap;

use crate::config::{Config, DatabaseKind};
use crate::errors::{Error, Result};

pub struct ComposeInputs {
    pub app_image: Option<String>,
    pub database_passwords: HashMap<DatabaseKind, String>,
}

/// Render the sandbox stack as a docker-compose YAML string.
pub fn generate(config: &Config, inputs: &ComposeInputs) -> Result<String> {
    let mut services: IndexMap<String, Option<dctypes::Service>> = IndexMap::new();
    let mut named_volumes: Vec<String> = Vec::new();

    for (kind, db) in &config.databases {
        if *kind != DatabaseKind::Postgres {
            continue;
        }
        let password = inputs
            .database_passwords
            .get(kind)
            .or(db.password.as_ref())
            .ok_or_else(|| Error::Configuration("postgres password was not resolved".to_string()))?;
        let mut envs = IndexMap::new();
        envs.insert(
            "POSTGRES_USER".to_string(),
            Some(dctypes::SingleValue::String(db.username.clone())),
        );
        envs.insert(
            "POSTGRES_PASSWORD".to_string(),
            Some(dctypes::SingleValue::String(password.clone())),
        );
        envs.insert(
            "POSTGRES_DB".to_string(),
            Some(dctypes::SingleValue::String(db.database.clone())),
        );
        let service = dctypes::Service {
            image: Some(db.image.clone().unwrap_or_else(|| "postgres:16".to_string())),
            restart: Some("unless-stopped".to_string()),
            environment: dctypes::Environment::KvPair(envs),
            volumes: vec![dctypes::Volumes::Simple(
                "postgres-data:/var/lib/postgresql/data".to_string(),
            )],
            ..Default::default()
        };
        named_volumes.push("postgres-data".to_string());
        services.insert("postgres".to_string(), Some(service));
    }

    for (name, svc) in &config.services {
        let mut service = dctypes::Service {
            image: Some(svc.image.clone()),
            restart: Some("unless-stopped".to_string()),
            ..Default::default()
        };
        if !svc.env.is_empty() {
            let mut envs = IndexMap::new();
            for (key, value) in &svc.env {
                envs.insert(
                    key.clone(),
                    Some(dctypes::SingleValue::String(value.clone())),
                );
            }
            service.environment = dctypes::Environment::KvPair(envs);
        }
        if let Some(mount_path) = &svc.mount_path {
            let volume = format!("{}-data", name);
            service.volumes = vec![dctypes::Volumes::Simple(format!(
                "{}:{}",
                volume, mount_path
            ))];
            named_volumes.push(volume);
        }
        services.insert(name.clone(), Some(service));
    }

    if let Some(app) = &config.app {
        let image = inputs.app_image.as_deref().ok_or_else(|| {
            Error::Configuration("app processes need a built image".to_string())
        })?;
        let dependencies: Vec<String> = services.keys().cloned().collect();

        for (name, process) in &app.processes {
            let mut envs = IndexMap::new();
            for (key, value) in &config.env {
                envs.insert(
                    key.clone(),
                    Some(dctypes::SingleValue::String(value.clone())),
                );
            }
            for (kind, db) in &config.databases {
                let url = match kind {
                    DatabaseKind::Postgres => {
                        let password = inputs
                            .database_passwords
                            .get(kind)
                            .or(db.password.as_ref())
                            .expect("checked above");
                        format!(
                            "postgresql://{}:{}@postgres:5432/{}",
                            db.username, password, db.database
                        )
                    }
                    DatabaseKind::Sqlite => {
                        format!("sqlite3:///var/lib/app/data/{}.sqlite3", db.database)
                    }
                };
                envs.insert(
                    "DATABASE_URL".to_string(),
                    Some(dctypes::SingleValue::String(url)),
                );
            }
            for (svc_name, svc) in &config.services {
                if let Some(port) = svc.port {
                    let scheme = if svc_name == "redis" || svc.image.starts_with("redis") {
                        "redis"
                    } else {
                        "http"
                    };
                    envs.insert(
                        format!("{}_URL", svc_name.to_uppercase().replace('-', "_")),
                        Some(dctypes::SingleValue::String(format!(
                            "{}://{}:{}",
                            scheme, svc_name, port
                        ))),
                    );
                }
            }
            for (key, value) in &process.env {
                envs.insert(
                    key.clone(),
                    Some(dctypes::SingleValue::String(value.clone())),
                );
            }

            let mut service = dctypes::Service {
                image: Some(image.to_string()),
                restart: Some("unless-stopped".to_string()),
                command: Some(dctypes::Command::Simple(process.command.clone())),
                environment: dctypes::Environment::KvPair(envs),
                ..Default::default()
            };
            if let Some(port) = process.port {
                service.ports = dctypes::Ports::Short(vec![format!("{}:{}", port, port)]);
            }
            if !dependencies.is_empty() {
                service.depends_on = dctypes::DependsOnOptions::Simple(dependencies.clone());
            }
            services.insert(name.clone(), Some(service));
        }
    }

    let mut compose = dctypes::Compose {
        version: Some("3.8".to_string()),
        services: dctypes::Services(services),
        ..Default::default()
    };
    if !named_volumes.is_empty() {
        let mut volumes = IndexMap::new();
        for name in named_volumes {
            volumes.insert(name, dctypes::MapOrEmpty::Empty);
        }
        compose.volumes = dctypes::TopLevelVolumes(volumes);
    }

    serde_yaml::to_string(&compose)
        .map_err(|err| Error::Other(format!("failed to serialize docker-compose: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn sandbox_config() -> Config {
        config::from_str(
            r#"
name: shop
target: sandbox
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
databases:
  postgres:
    username: app
    database: app
services:
  redis:
    image: redis:7
    port: 6379
app:
  dockerfile: Dockerfile
  platform: linux/amd64
  processes:
    web:
      command: bin/rails server
      port: 3000
env:
  RAILS_ENV: production
"#,
        )
        .unwrap()
    }

    fn inputs() -> ComposeInputs {
        ComposeInputs {
            app_image: Some("shop:abc123".to_string()),
            database_passwords: HashMap::from([(DatabaseKind::Postgres, "pw".to_string())]),
        }
    }

    #[test]
    fn test_compose_contains_all_services() {
        let yaml = generate(&sandbox_config(), &inputs()).unwrap();
        let compose: dctypes::Compose = serde_yaml::from_str(&yaml).unwrap();
        let names: Vec<&String> = compose.services.0.keys().collect();
        assert!(names.contains(&&"postgres".to_string()));
        assert!(names.contains(&&"redis".to_string()));
        assert!(names.contains(&&"web".to_string()));
    }

    #[test]
    fn test_compose_web_service_discovery_uses_compose_dns() {
        let yaml = generate(&sandbox_config(), &inputs()).unwrap();
        assert!(
            yaml.contains("postgresql://app:pw@postgres:5432/app"),
            "expected compose-local database url in:\n{yaml}"
        );
        assert!(
            yaml.contains("redis://redis:6379"),
            "expected redis url in:\n{yaml}"
        );
    }

    #[test]
    fn test_compose_declares_named_volume_for_postgres() {
        let yaml = generate(&sandbox_config(), &inputs()).unwrap();
        let compose: dctypes::Compose = serde_yaml::from_str(&yaml).unwrap();
        assert!(compose.volumes.0.contains_key("postgres-data"));
    }

    #[test]
    fn test_compose_without_app_image_fails_when_processes_exist() {
        let result = generate(
            &sandbox_config(),
            &ComposeInputs {
                app_image: None,
                database_passwords: HashMap::from([(DatabaseKind::Postgres, "pw".to_string())]),
            },
        );
        assert!(result.is_err());
    }
}
