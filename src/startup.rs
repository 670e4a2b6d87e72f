// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Startup sequence: certificate directory, SPIRE connection, CRD detection,
//! webhook certificate, reconciler registration and the supervised runtime.

use crate::config::ControllerManagerConfig;
use crate::constants::crd::WATCH_RESYNC_SECS;
use crate::constants::webhook::{CERT_DIR_PREFIX, KEY_PAIR_NAME, SPIFFE_ID_PATH};
use crate::kubernetes::{
    detect_custom_resources, CrdEventSource, KindDiscovery, KubeCrdEventSource, KubeKindDiscovery,
    KubeWebhookConfigClient, RequiredCustomResources, WebhookConfigClient,
};
use crate::reconcilers::{
    ClusterFederatedTrustDomainReconciler, ClusterSPIFFEIDReconciler, ClusterStaticEntryReconciler,
    PodReconciler,
};
use crate::runtime::{ping, Manager, ManagerOptions};
use crate::spire::{BundleClient, SpiffeId, SpireClient, SvidClient, TrustDomain};
use crate::sync::{
    entry_reconciler, federation_relationship_reconciler, EntryReconcilerConfig,
    FederationRelationshipReconcilerConfig,
};
use crate::webhook::{admission, TlsVersion, WebhookManager, WebhookManagerConfig, WebhookServerOptions};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How the process should end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Cancelled by a termination signal
    Shutdown,
    /// All required CRDs appeared; exit so the process is restarted with full reconciler set
    Restart,
}

/// Process-private directory holding the webhook key pair
pub struct CertDir {
    dir: TempDir,
}

impl CertDir {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(CERT_DIR_PREFIX)
            .tempdir()
            .context("failed to create temporary cert directory")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn key_pair_path(&self) -> PathBuf {
        self.dir.path().join(KEY_PAIR_NAME)
    }

    /// Remove the directory, reporting failures instead of ignoring them on drop
    pub fn remove(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("failed to remove temporary cert directory {}", path.display()))
    }
}

/// Token cancelled on SIGINT or SIGTERM
pub fn shutdown_signal_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received termination signal, shutting down");
        signalled.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Clients for the cluster API and the SPIRE Server
pub struct Backends {
    pub client: Client,
    pub discovery: Box<dyn KindDiscovery>,
    pub crd_events: Box<dyn CrdEventSource>,
    pub webhook_client: Arc<dyn WebhookConfigClient>,
    pub svid_client: Arc<dyn SvidClient>,
    pub bundle_client: Arc<dyn BundleClient>,
}

#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, config: &ControllerManagerConfig) -> Result<Backends>;
}

/// Dials the SPIRE Server socket, then builds the in-cluster API client
pub struct LiveConnect;

#[async_trait]
impl Connect for LiveConnect {
    async fn connect(&self, config: &ControllerManagerConfig) -> Result<Backends> {
        let spire_client = SpireClient::dial_socket(&config.spire_server_socket_path)
            .await
            .context("unable to dial SPIRE Server socket")?;

        let client = Client::try_default()
            .await
            .context("failed to create an API client")?;

        Ok(Backends {
            client: client.clone(),
            discovery: Box::new(KubeKindDiscovery::new(client.clone())),
            crd_events: Box::new(KubeCrdEventSource::new(
                client.clone(),
                Duration::from_secs(WATCH_RESYNC_SECS),
            )),
            webhook_client: Arc::new(KubeWebhookConfigClient::new(client)),
            svid_client: Arc::new(spire_client.clone()),
            bundle_client: Arc::new(spire_client),
        })
    }
}

/// Run the controller manager until shutdown, a fatal error or a CRD restart.
/// The certificate directory is removed on every path.
pub async fn run(config: ControllerManagerConfig) -> Result<Outcome> {
    let cert_dir = CertDir::create()?;
    run_with_cert_dir(&config, cert_dir, &LiveConnect, shutdown_signal_token()).await
}

async fn run_with_cert_dir(
    config: &ControllerManagerConfig,
    cert_dir: CertDir,
    connect: &dyn Connect,
    shutdown: CancellationToken,
) -> Result<Outcome> {
    let result = bootstrap(config, &cert_dir, connect, shutdown).await;

    if let Err(e) = cert_dir.remove() {
        error!("{:#}", e);
        return Err(e);
    }

    result
}

async fn bootstrap(
    config: &ControllerManagerConfig,
    cert_dir: &CertDir,
    connect: &dyn Connect,
    shutdown: CancellationToken,
) -> Result<Outcome> {
    // The key pair is kept in one file to keep rotation simple
    let webhook_options = WebhookServerOptions {
        port: config.webhook_port,
        cert_dir: cert_dir.path().to_path_buf(),
        cert_name: KEY_PAIR_NAME.to_string(),
        key_name: KEY_PAIR_NAME.to_string(),
        min_tls_version: TlsVersion::Tls12,
    };

    let trust_domain =
        TrustDomain::parse(&config.trust_domain).context("invalid trust domain name")?;

    let backends = connect.connect(config).await?;

    let mut manager = Manager::new(
        backends.client,
        ManagerOptions {
            health_probe_bind_address: config.health_probe_bind_address,
            webhook: webhook_options,
        },
    );

    let mut detection =
        detect_custom_resources(backends.discovery.as_ref(), backends.crd_events).await;
    let present = detection.present;

    let webhook_id = SpiffeId::from_path(&trust_domain, SPIFFE_ID_PATH)
        .context("invalid webhook SPIFFE ID")?;
    let mut webhook_manager = WebhookManager::new(WebhookManagerConfig {
        id: webhook_id,
        key_pair_path: cert_dir.key_pair_path(),
        webhook_name: config.validating_webhook_configuration_name.clone(),
        webhook_client: backends.webhook_client,
        svid_client: backends.svid_client,
        bundle_client: backends.bundle_client,
    });

    tokio::select! {
        res = webhook_manager.init() => res.context("failed to mint initial webhook certificate")?,
        _ = detection.restart_requested() => {
            info!("Stopping for restart");
            return Ok(Outcome::Restart);
        }
        _ = shutdown.cancelled() => return Ok(Outcome::Shutdown),
    }

    register(&mut manager, config, &trust_domain, present, webhook_manager)?;

    info!("Starting manager");
    let runtime_token = shutdown.child_token();
    let run = manager.start(runtime_token.clone());
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => {
            res.context("problem running manager")?;
            Ok(Outcome::Shutdown)
        }
        _ = detection.restart_requested() => {
            info!("Stopping for restart");
            runtime_token.cancel();
            if let Err(e) = run.await {
                warn!("Manager stopped with an error while restarting: {:#}", e);
            }
            Ok(Outcome::Restart)
        }
    }
}

/// Add reconcilers, runnables, webhooks and probes. Reconcilers for CRDs that
/// are not installed are skipped until the restart.
fn register(
    manager: &mut Manager,
    config: &ControllerManagerConfig,
    trust_domain: &TrustDomain,
    present: RequiredCustomResources,
    webhook_manager: WebhookManager,
) -> Result<()> {
    let client = manager.client();

    let (entries, entry_triggerer) = entry_reconciler(EntryReconcilerConfig {
        client: client.clone(),
        trust_domain: trust_domain.clone(),
        cluster_name: config.cluster_name.clone(),
        cluster_domain: config.cluster_domain.clone(),
        ignore_namespaces: config.ignore_namespaces.clone(),
        gc_interval: config.gc_interval,
        present,
    });
    let (federation, federation_triggerer) =
        federation_relationship_reconciler(FederationRelationshipReconcilerConfig {
            client: client.clone(),
            gc_interval: config.gc_interval,
            present: present.cluster_federated_trust_domain,
        });

    if present.cluster_spiffe_id {
        ClusterSPIFFEIDReconciler::new(client.clone(), entry_triggerer.clone())
            .setup_with_manager(manager)
            .context("unable to create controller ClusterSPIFFEID")?;
    } else {
        skipped("ClusterSPIFFEID");
    }

    if present.cluster_federated_trust_domain {
        ClusterFederatedTrustDomainReconciler::new(client.clone(), federation_triggerer)
            .setup_with_manager(manager)
            .context("unable to create controller ClusterFederatedTrustDomain")?;
    } else {
        skipped("ClusterFederatedTrustDomain");
    }

    if present.cluster_static_entry {
        ClusterStaticEntryReconciler::new(client.clone(), entry_triggerer.clone())
            .setup_with_manager(manager)
            .context("unable to create controller ClusterStaticEntry")?;
    } else {
        skipped("ClusterStaticEntry");
    }

    admission::setup_webhooks(manager.webhook_server_mut());

    PodReconciler::new(client, entry_triggerer, config.ignore_namespaces.clone())
        .setup_with_manager(manager)
        .context("unable to create controller Pod")?;

    manager.add("entry-reconciler", Box::new(entries));
    manager.add("federation-relationship-reconciler", Box::new(federation));
    manager.add("webhook-manager", Box::new(webhook_manager));

    manager
        .add_healthz_check("healthz", ping())
        .context("unable to set up health check")?;
    manager
        .add_readyz_check("readyz", ping())
        .context("unable to set up ready check")?;

    Ok(())
}

fn skipped(kind: &str) {
    info!("{} CRD was not installed, please install spire-controller-manager CRDs", kind);
    info!("{}Reconciler will not be started", kind);
}
