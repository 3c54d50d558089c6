// Liveness monitoring of the pipeline collaborators

use crate::client::ServiceEndpoint;
use crate::error::Stage;
use brandeye_core::protocol::CompositeHealthResponse;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Result of probing every collaborator once
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub services: BTreeMap<Stage, bool>,
    pub checked_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn all_healthy(&self) -> bool {
        self.services.values().all(|healthy| *healthy)
    }

    pub fn to_response(&self) -> CompositeHealthResponse {
        CompositeHealthResponse {
            status: if self.all_healthy() { "healthy" } else { "unhealthy" }.to_string(),
            services: self
                .services
                .iter()
                .map(|(stage, healthy)| (stage.name().to_string(), *healthy))
                .collect(),
        }
    }
}

/// Probes each collaborator's `GET /health`
pub struct HealthMonitor {
    endpoints: BTreeMap<Stage, ServiceEndpoint>,
    probe_timeout: Duration,
    last: RwLock<Option<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new(endpoints: Vec<ServiceEndpoint>, probe_timeout: Duration) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(|e| (e.stage(), e)).collect(),
            probe_timeout,
            last: RwLock::new(None),
        }
    }

    /// Probe one collaborator. Unknown stages are reported unhealthy.
    pub async fn check(&self, stage: Stage) -> bool {
        match self.endpoints.get(&stage) {
            Some(endpoint) => endpoint.probe(self.probe_timeout).await,
            None => false,
        }
    }

    /// Probe all collaborators concurrently and remember the result
    pub async fn check_all(&self) -> HealthSnapshot {
        let probes = Stage::ALL.iter().map(|stage| async move { (*stage, self.check(*stage).await) });
        let services: BTreeMap<Stage, bool> = futures::future::join_all(probes).await.into_iter().collect();

        let snapshot = HealthSnapshot {
            services,
            checked_at: Utc::now(),
        };
        *self.last.write() = Some(snapshot.clone());
        snapshot
    }

    /// Most recent snapshot from `check_all` or the polling loop
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.last.read().clone()
    }

    /// Re-probe every `interval` in the background, logging changes
    pub fn spawn_polling(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut previous: Option<BTreeMap<Stage, bool>> = None;
            loop {
                ticker.tick().await;
                let snapshot = self.check_all().await;
                if previous.as_ref() != Some(&snapshot.services) {
                    for (stage, healthy) in &snapshot.services {
                        if *healthy {
                            info!("{} service is healthy", stage);
                        } else {
                            warn!("{} service is unhealthy", stage);
                        }
                    }
                    previous = Some(snapshot.services);
                }
            }
        })
    }
}
