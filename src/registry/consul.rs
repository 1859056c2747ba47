//! Consul registry driver.
//!
//! # Responsibilities
//! - Derive the services snapshot from tagged, passing instances
//! - Watch the manual override text in the KV store
//! - Keep this proxy registered with a health check on the admin
//!   endpoint, re-registering whenever the agent loses it
//!
//! # Design Decisions
//! - Blocking queries (`index` + `wait`) instead of tight polling
//! - Transient agent errors log and retry; the rebuild loop keeps the
//!   previous table until a fresh snapshot arrives
//! - Snapshot lines are sorted so equal discovery state yields equal
//!   text and the rebuild loop's dedup check can fire

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::ConsulConfig;
use crate::registry::{Backend, RegistryError};

const ERR_BACKOFF: Duration = Duration::from_secs(1);

pub struct ConsulBackend {
    cfg: ConsulConfig,
    base: String,
    client: reqwest::Client,
    service_id: String,
    check_addr: String,
}

impl ConsulBackend {
    pub fn new(cfg: ConsulConfig, admin_addr: String) -> Self {
        let base = format!("http://{}", cfg.addr);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.poll_wait_secs + 30))
            .build()
            .expect("consul http client");
        let check_addr = if cfg.service_addr.is_empty() {
            admin_addr
        } else {
            cfg.service_addr.clone()
        };
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = check_addr.rsplit(':').next().unwrap_or("0").to_string();
        let service_id = format!("{}-{}-{}", cfg.service_name, hostname, port);

        Self {
            cfg,
            base,
            client,
            service_id,
            check_addr,
        }
    }

    fn wait(&self) -> String {
        format!("{}s", self.cfg.poll_wait_secs)
    }
}

impl Backend for ConsulBackend {
    fn watch_services(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let base = self.base.clone();
        let prefix = self.cfg.tag_prefix.clone();
        let wait = self.wait();

        tokio::spawn(async move {
            let mut index: u64 = 0;
            loop {
                let services = match list_tagged_services(&client, &base, &prefix, index, &wait).await
                {
                    Ok((services, new_index)) => {
                        if new_index == index && index != 0 {
                            continue;
                        }
                        index = new_index;
                        services
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "consul: cannot list services");
                        tokio::time::sleep(ERR_BACKOFF).await;
                        continue;
                    }
                };

                let mut lines = Vec::new();
                for name in services {
                    match service_routes(&client, &base, &prefix, &name).await {
                        Ok(mut routes) => lines.append(&mut routes),
                        Err(e) => {
                            tracing::warn!(service = %name, error = %e, "consul: cannot fetch health entries");
                        }
                    }
                }
                lines.sort();

                if tx.send(lines.join("\n")).await.is_err() {
                    return;
                }
            }
        });

        rx
    }

    fn watch_manual(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let base = self.base.clone();
        let path = self.cfg.kv_path.trim_matches('/').to_string();
        let wait = self.wait();

        tokio::spawn(async move {
            let mut index: u64 = 0;
            loop {
                let url = format!(
                    "{}/v1/kv/{}?raw=true&index={}&wait={}",
                    base, path, index, wait
                );
                let resp = match client.get(&url).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "consul: cannot read manual overrides");
                        tokio::time::sleep(ERR_BACKOFF).await;
                        continue;
                    }
                };

                let new_index = consul_index(&resp).unwrap_or(0);
                let text = match resp.status() {
                    reqwest::StatusCode::NOT_FOUND => String::new(),
                    s if s.is_success() => resp.text().await.unwrap_or_default(),
                    s => {
                        tracing::warn!(status = %s, "consul: manual override read failed");
                        tokio::time::sleep(ERR_BACKOFF).await;
                        continue;
                    }
                };

                if new_index == index && index != 0 {
                    continue;
                }
                index = new_index.max(1);

                if tx.send(text).await.is_err() {
                    return;
                }
            }
        });

        rx
    }

    fn register(&self) -> BoxFuture<'_, Result<(), RegistryError>> {
        Box::pin(async move {
            let registration = serde_json::json!({
                "ID": self.service_id,
                "Name": self.cfg.service_name,
                "Port": check_port(&self.check_addr),
                "Check": {
                    "HTTP": format!("http://{}/health", self.check_addr),
                    "Interval": format!("{}s", self.cfg.check_interval_secs),
                    "Timeout": format!("{}s", self.cfg.check_timeout_secs),
                },
            });

            register_once(&self.client, &self.base, &registration).await?;
            tracing::info!(id = %self.service_id, "consul: registered");

            // Keep the registration alive: the agent may restart and
            // forget us.
            let client = self.client.clone();
            let base = self.base.clone();
            let id = self.service_id.clone();
            let interval = Duration::from_secs(self.cfg.check_interval_secs.max(1));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    match is_registered(&client, &base, &id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::info!(id = %id, "consul: re-registering");
                            if let Err(e) = register_once(&client, &base, &registration).await {
                                tracing::warn!(error = %e, "consul: re-register failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "consul: cannot check registration");
                        }
                    }
                }
            });

            Ok(())
        })
    }

    fn deregister(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let url = format!(
                "{}/v1/agent/service/deregister/{}",
                self.base, self.service_id
            );
            tracing::info!(id = %self.service_id, "consul: deregistering");
            if let Err(e) = self.client.put(&url).send().await {
                tracing::warn!(error = %e, "consul: deregister failed");
            }
        })
    }
}

fn check_port(addr: &str) -> u16 {
    addr.rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

fn consul_index(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get("X-Consul-Index")?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

async fn register_once(
    client: &reqwest::Client,
    base: &str,
    registration: &serde_json::Value,
) -> Result<(), RegistryError> {
    let url = format!("{}/v1/agent/service/register", base);
    let resp = client
        .put(&url)
        .json(registration)
        .send()
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(RegistryError::Backend(format!(
            "register returned {}",
            resp.status()
        )));
    }
    Ok(())
}

async fn is_registered(
    client: &reqwest::Client,
    base: &str,
    id: &str,
) -> Result<bool, RegistryError> {
    let url = format!("{}/v1/agent/services", base);
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;
    let services: HashMap<String, serde_json::Value> = resp
        .json()
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;
    Ok(services.contains_key(id))
}

/// Names of services carrying at least one route tag, plus the catalog
/// index for the next blocking query.
async fn list_tagged_services(
    client: &reqwest::Client,
    base: &str,
    prefix: &str,
    index: u64,
    wait: &str,
) -> Result<(Vec<String>, u64), RegistryError> {
    let url = format!("{}/v1/catalog/services?index={}&wait={}", base, index, wait);
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;
    let new_index = consul_index(&resp).unwrap_or(0);
    let catalog: HashMap<String, Vec<String>> = resp
        .json()
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;

    let mut names: Vec<String> = catalog
        .into_iter()
        .filter(|(_, tags)| tags.iter().any(|t| t.starts_with(prefix)))
        .map(|(name, _)| name)
        .collect();
    names.sort();
    Ok((names, new_index))
}

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: Node,
    #[serde(rename = "Service")]
    service: ServiceEntry,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(rename = "Address")]
    address: String,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
}

/// Route commands advertised by the passing instances of one service.
async fn service_routes(
    client: &reqwest::Client,
    base: &str,
    prefix: &str,
    name: &str,
) -> Result<Vec<String>, RegistryError> {
    let url = format!("{}/v1/health/service/{}?passing=true", base, name);
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;
    let entries: Vec<HealthEntry> = resp
        .json()
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;

    let mut lines = Vec::new();
    for entry in &entries {
        let addr = if entry.service.address.is_empty() {
            &entry.node.address
        } else {
            &entry.service.address
        };
        for tag in &entry.service.tags {
            let Some(spec) = tag.strip_prefix(prefix) else {
                continue;
            };
            if let Some(line) = route_command(name, spec.trim(), addr, entry.service.port) {
                lines.push(line);
            } else {
                tracing::warn!(service = %name, tag = %tag, "consul: ignoring malformed route tag");
            }
        }
    }
    Ok(lines)
}

/// Translate one `<host/path[ weight w][ opts "..."]>` tag spec into a
/// route command for the instance at `addr:port`.
fn route_command(service: &str, spec: &str, addr: &str, port: u16) -> Option<String> {
    let (src, suffix) = match spec.find(char::is_whitespace) {
        Some(i) => (&spec[..i], spec[i..].trim_start()),
        None => (spec, ""),
    };
    if !src.contains('/') {
        return None;
    }

    // An advertised proto opt selects the destination scheme.
    let scheme = ["https", "wss", "ws", "tcp"]
        .iter()
        .find(|s| suffix.contains(&format!("proto={}", s)))
        .copied()
        .unwrap_or("http");

    let mut line = format!("route add {} {} {}://{}:{}/", service, src, scheme, addr, port);
    if !suffix.is_empty() {
        line.push(' ');
        line.push_str(suffix);
    }
    Some(line)
}
