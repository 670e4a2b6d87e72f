// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Liveness and readiness probe endpoints

use super::Runnable;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A named probe check; `Err` carries the failure reason
pub type Checker = Arc<dyn Fn() -> std::result::Result<(), String> + Send + Sync>;

/// Checker that always succeeds once the process serves probes
pub fn ping() -> Checker {
    Arc::new(|| Ok(()))
}

#[derive(Clone, Default)]
pub struct HealthChecks {
    healthz: BTreeMap<String, Checker>,
    readyz: BTreeMap<String, Checker>,
}

impl HealthChecks {
    pub fn add_healthz_check(&mut self, name: &str, check: Checker) -> Result<()> {
        insert_unique(&mut self.healthz, "healthz", name, check)
    }

    pub fn add_readyz_check(&mut self, name: &str, check: Checker) -> Result<()> {
        insert_unique(&mut self.readyz, "readyz", name, check)
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .with_state(Arc::new(self))
    }
}

fn insert_unique(
    checks: &mut BTreeMap<String, Checker>,
    kind: &str,
    name: &str,
    check: Checker,
) -> Result<()> {
    if checks.contains_key(name) {
        return Err(ControllerError::ManagerError(format!(
            "{} check {:?} already registered",
            kind, name
        )));
    }
    checks.insert(name.to_string(), check);
    Ok(())
}

async fn healthz(State(checks): State<Arc<HealthChecks>>) -> (StatusCode, String) {
    evaluate(&checks.healthz)
}

async fn readyz(State(checks): State<Arc<HealthChecks>>) -> (StatusCode, String) {
    evaluate(&checks.readyz)
}

fn evaluate(checks: &BTreeMap<String, Checker>) -> (StatusCode, String) {
    let failures: Vec<String> = checks
        .iter()
        .filter_map(|(name, check)| check().err().map(|reason| format!("{}: {}", name, reason)))
        .collect();

    if failures.is_empty() {
        (StatusCode::OK, "ok".to_string())
    } else {
        debug!("Probe failed: {:?}", failures);
        (StatusCode::INTERNAL_SERVER_ERROR, failures.join("\n"))
    }
}

/// Serves the probe endpoints until shutdown
pub struct HealthProbeServer {
    bind_address: SocketAddr,
    checks: HealthChecks,
}

impl HealthProbeServer {
    pub fn new(bind_address: SocketAddr, checks: HealthChecks) -> Self {
        Self {
            bind_address,
            checks,
        }
    }
}

#[async_trait]
impl Runnable for HealthProbeServer {
    async fn start(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_address).await?;
        info!("Serving health probes on {}", self.bind_address);

        axum::serve(listener, self.checks.router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        Ok(())
    }
}
