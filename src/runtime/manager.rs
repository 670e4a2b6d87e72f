// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Supervises controllers, runnables, probes and the webhook server.

use super::health::{Checker, HealthChecks, HealthProbeServer};
use crate::error::Result;
use crate::webhook::server::{WebhookServer, WebhookServerOptions};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::Client;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A long-running task supervised by the [`Manager`]
#[async_trait]
pub trait Runnable: Send {
    /// Run until `shutdown` is cancelled. Returning an error stops the manager.
    async fn start(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()>;
}

pub struct ManagerOptions {
    pub health_probe_bind_address: SocketAddr,
    pub webhook: WebhookServerOptions,
}

pub struct Manager {
    client: Client,
    health_probe_bind_address: SocketAddr,
    checks: HealthChecks,
    controllers: Vec<(String, BoxFuture<'static, anyhow::Result<()>>)>,
    runnables: Vec<(String, Box<dyn Runnable>)>,
    webhook_server: WebhookServer,
}

impl Manager {
    pub fn new(client: Client, options: ManagerOptions) -> Self {
        Self {
            client,
            health_probe_bind_address: options.health_probe_bind_address,
            checks: HealthChecks::default(),
            controllers: Vec::new(),
            runnables: Vec::new(),
            webhook_server: WebhookServer::new(options.webhook),
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Add a controller event loop. It is dropped when the manager shuts down.
    pub fn add_controller<F>(&mut self, name: &str, controller: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        debug!("Adding controller {}", name);
        self.controllers.push((name.to_string(), controller.boxed()));
    }

    pub fn add(&mut self, name: &str, runnable: Box<dyn Runnable>) {
        debug!("Adding runnable {}", name);
        self.runnables.push((name.to_string(), runnable));
    }

    pub fn add_healthz_check(&mut self, name: &str, check: Checker) -> Result<()> {
        self.checks.add_healthz_check(name, check)
    }

    pub fn add_readyz_check(&mut self, name: &str, check: Checker) -> Result<()> {
        self.checks.add_readyz_check(name, check)
    }

    pub fn webhook_server_mut(&mut self) -> &mut WebhookServer {
        &mut self.webhook_server
    }

    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn runnable_names(&self) -> Vec<&str> {
        self.runnables.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Run everything until `shutdown` is cancelled or a task fails.
    pub async fn start(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let Manager {
            health_probe_bind_address,
            checks,
            controllers,
            mut runnables,
            webhook_server,
            ..
        } = self;

        let probes: Box<dyn Runnable> =
            Box::new(HealthProbeServer::new(health_probe_bind_address, checks));
        runnables.push(("health-probes".to_string(), probes));
        if !webhook_server.paths().is_empty() {
            let webhooks: Box<dyn Runnable> = Box::new(webhook_server);
            runnables.push(("webhook-server".to_string(), webhooks));
        }

        let tasks_token = shutdown.child_token();
        let mut tasks: JoinSet<(String, anyhow::Result<()>)> = JoinSet::new();

        for (name, controller) in controllers {
            let token = tasks_token.clone();
            tasks.spawn(async move {
                let result = tokio::select! {
                    _ = token.cancelled() => Ok(()),
                    res = controller => res,
                };
                (name, result)
            });
        }

        for (name, runnable) in runnables {
            let token = tasks_token.clone();
            tasks.spawn(async move {
                let result = runnable.start(token).await;
                (name, result)
            });
        }

        info!("Starting {} supervised tasks", tasks.len());

        let mut failure: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => ("<task>".to_string(), Err(e.into())),
            };

            match result {
                Ok(()) if tasks_token.is_cancelled() => debug!("{} stopped", name),
                Ok(()) => warn!("{} stopped before shutdown", name),
                Err(e) => {
                    error!("{} failed: {:#}", name, e);
                    failure = Some(e.context(format!("{} failed", name)));
                    break;
                }
            }
        }

        if !tasks.is_empty() {
            tasks_token.cancel();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain(&mut tasks))
                .await
                .is_err()
            {
                warn!("Tasks did not stop within {:?}, aborting", SHUTDOWN_TIMEOUT);
                tasks.abort_all();
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!("Manager stopped");
                Ok(())
            }
        }
    }
}

async fn drain(tasks: &mut JoinSet<(String, anyhow::Result<()>)>) {
    while let Some(joined) = tasks.join_next().await {
        if let Ok((name, Err(e))) = joined {
            warn!("{} failed during shutdown: {:#}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockService;
    use crate::webhook::server::TlsVersion;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn make_manager() -> Manager {
        Manager::new(
            MockService::new().into_client(),
            ManagerOptions {
                health_probe_bind_address: "127.0.0.1:0".parse().unwrap(),
                webhook: WebhookServerOptions {
                    port: 0,
                    cert_dir: PathBuf::from("/nonexistent"),
                    cert_name: "keypair.pem".to_string(),
                    key_name: "keypair.pem".to_string(),
                    min_tls_version: TlsVersion::Tls12,
                },
            },
        )
    }

    struct Flagging {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Runnable for Flagging {
        async fn start(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
            shutdown.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Runnable for Failing {
        async fn start(self: Box<Self>, _shutdown: CancellationToken) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn test_start_returns_ok_on_cancel() {
        let mut manager = make_manager();
        let stopped = Arc::new(AtomicBool::new(false));
        manager.add(
            "flagging",
            Box::new(Flagging {
                stopped: stopped.clone(),
            }),
        );
        manager.add_controller("forever", std::future::pending());

        let token = CancellationToken::new();
        let handle = tokio::spawn(manager.start(token.clone()));
        token.cancel();

        handle.await.unwrap().unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_runnable_stops_everything() {
        let mut manager = make_manager();
        let stopped = Arc::new(AtomicBool::new(false));
        manager.add(
            "flagging",
            Box::new(Flagging {
                stopped: stopped.clone(),
            }),
        );
        manager.add("failing", Box::new(Failing));

        let token = CancellationToken::new();
        let err = manager.start(token.clone()).await.unwrap_err();

        assert!(format!("{:#}", err).contains("failing failed"));
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_webhook_server_not_started_without_routes() {
        // The cert dir does not exist, so starting the webhook server would fail
        let manager = make_manager();
        let token = CancellationToken::new();
        token.cancel();

        manager.start(token).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_probe_names_rejected() {
        let mut manager = make_manager();
        manager
            .add_healthz_check("healthz", crate::runtime::health::ping())
            .unwrap();
        assert!(manager
            .add_healthz_check("healthz", crate::runtime::health::ping())
            .is_err());
    }
}
