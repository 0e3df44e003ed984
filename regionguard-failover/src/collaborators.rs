//! Narrow interfaces to the systems the manager steers but does not own
//!
//! Traffic control (DNS failover routing), replication status of the managed
//! database, and operator notifications. HTTP implementations talk to small
//! control-plane services; tests substitute in-memory fakes.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regionguard_common::Region;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::FailoverEvent;

/// Moves live traffic between regions
#[async_trait]
pub trait TrafficController: Send + Sync {
    async fn set_active_region(&self, region: &Region) -> Result<()>;
}

/// Reports cross-region replication lag
#[async_trait]
pub trait ReplicationMonitor: Send + Sync {
    async fn replication_lag(&self, from: &Region, to: &Region) -> Result<Duration>;
}

/// Operator alerting; delivery failures never affect orchestration
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &FailoverEvent, endpoints: &[String]) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveRegionRequest<'a> {
    region: &'a str,
    code: &'a str,
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dns_health_check_id: Option<&'a str>,
}

/// `PUT {base_url}/routing/active`
pub struct HttpTrafficController {
    client: Client,
    base_url: String,
}

impl HttpTrafficController {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TrafficController for HttpTrafficController {
    async fn set_active_region(&self, region: &Region) -> Result<()> {
        let url = format!("{}/routing/active", self.base_url);
        let body = ActiveRegionRequest {
            region: &region.name,
            code: &region.code,
            role: region.role.to_string(),
            dns_health_check_id: region.endpoints.dns_health_check_id.as_deref(),
        };
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("traffic control request to {} failed", url))?;
        if !response.status().is_success() {
            bail!(
                "traffic control rejected cutover to {}: HTTP {}",
                region.name,
                response.status().as_u16()
            );
        }
        info!("Traffic control now routes to {}", region);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LagResponse {
    lag_ms: u64,
}

/// `GET {base_url}/replication/lag?from=..&to=..`, answering `{"lagMs": n}`
pub struct HttpReplicationMonitor {
    client: Client,
    base_url: String,
}

impl HttpReplicationMonitor {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReplicationMonitor for HttpReplicationMonitor {
    async fn replication_lag(&self, from: &Region, to: &Region) -> Result<Duration> {
        let url = format!("{}/replication/lag", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("from", from.code.as_str()), ("to", to.code.as_str())])
            .send()
            .await
            .with_context(|| format!("replication status request to {} failed", url))?;
        if !response.status().is_success() {
            bail!(
                "replication status for {} -> {} unavailable: HTTP {}",
                from.name,
                to.name,
                response.status().as_u16()
            );
        }
        let lag: LagResponse = response
            .json()
            .await
            .context("invalid replication status body")?;
        Ok(Duration::from_millis(lag.lag_ms))
    }
}

/// Writes every event to the log
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: &FailoverEvent, _endpoints: &[String]) -> Result<()> {
        if event.success {
            info!(
                event_type = %event.event_type,
                from = %event.from_region,
                to = %event.to_region,
                duration_ms = event.duration_ms,
                "Failover event: {}",
                event.reason
            );
        } else {
            warn!(
                event_type = %event.event_type,
                from = %event.from_region,
                to = %event.to_region,
                error = event.error.as_deref().unwrap_or(""),
                "Failed failover event: {}",
                event.reason
            );
        }
        Ok(())
    }
}

/// POSTs the event as JSON to every policy notification endpoint
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, event: &FailoverEvent, endpoints: &[String]) -> Result<()> {
        let mut failures = Vec::new();
        for endpoint in endpoints {
            let outcome = self.client.post(endpoint).json(event).send().await;
            match outcome {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => failures.push(format!("{}: HTTP {}", endpoint, response.status().as_u16())),
                Err(e) => failures.push(format!("{}: {}", endpoint, e)),
            }
        }
        if !failures.is_empty() {
            bail!("webhook delivery failed for {}", failures.join(", "));
        }
        Ok(())
    }
}
