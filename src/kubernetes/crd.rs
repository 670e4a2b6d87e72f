// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD readiness detection.
//!
//! The controller needs three custom resource kinds. Whatever is installed at
//! startup decides which reconcilers run. When some kinds are missing, a watch
//! on CustomResourceDefinitions stays open and requests a process restart once
//! the remaining kinds show up, so the next process starts with the full set.

use crate::constants::crd::{
    CLUSTER_FEDERATED_TRUST_DOMAIN_KIND, CLUSTER_SPIFFE_ID_KIND, CLUSTER_STATIC_ENTRY_KIND, GROUP,
    VERSION,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{ApiResource, DynamicObject, ListParams},
    core::TypeMeta,
    discovery::Discovery,
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// Custom resource kinds the controller depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredKind {
    ClusterSpiffeId,
    ClusterStaticEntry,
    ClusterFederatedTrustDomain,
}

impl RequiredKind {
    pub const ALL: [RequiredKind; 3] = [
        RequiredKind::ClusterSpiffeId,
        RequiredKind::ClusterStaticEntry,
        RequiredKind::ClusterFederatedTrustDomain,
    ];

    /// Exact match against a declared kind name
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.kind() == kind)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RequiredKind::ClusterSpiffeId => CLUSTER_SPIFFE_ID_KIND,
            RequiredKind::ClusterStaticEntry => CLUSTER_STATIC_ENTRY_KIND,
            RequiredKind::ClusterFederatedTrustDomain => CLUSTER_FEDERATED_TRUST_DOMAIN_KIND,
        }
    }
}

/// Which required CRDs are installed. Flags only ever go from false to true.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequiredCustomResources {
    pub cluster_spiffe_id: bool,
    pub cluster_static_entry: bool,
    pub cluster_federated_trust_domain: bool,
}

impl RequiredCustomResources {
    pub fn from_kinds<'a>(kinds: impl IntoIterator<Item = &'a str>) -> Self {
        let mut state = Self::default();
        for kind in kinds.into_iter().filter_map(RequiredKind::from_kind) {
            state.mark_present(kind);
        }
        state
    }

    pub fn fully_initialized(&self) -> bool {
        self.cluster_spiffe_id && self.cluster_static_entry && self.cluster_federated_trust_domain
    }

    pub fn is_present(&self, kind: RequiredKind) -> bool {
        match kind {
            RequiredKind::ClusterSpiffeId => self.cluster_spiffe_id,
            RequiredKind::ClusterStaticEntry => self.cluster_static_entry,
            RequiredKind::ClusterFederatedTrustDomain => self.cluster_federated_trust_domain,
        }
    }

    fn mark_present(&mut self, kind: RequiredKind) {
        match kind {
            RequiredKind::ClusterSpiffeId => self.cluster_spiffe_id = true,
            RequiredKind::ClusterStaticEntry => self.cluster_static_entry = true,
            RequiredKind::ClusterFederatedTrustDomain => {
                self.cluster_federated_trust_domain = true
            }
        }
    }
}

/// One-shot enumeration of the resource kinds served for an API group version
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KindDiscovery: Send + Sync {
    async fn installed_kinds(&self, group: &str, version: &str) -> Result<Vec<String>>;
}

pub struct KubeKindDiscovery {
    client: Client,
}

impl KubeKindDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KindDiscovery for KubeKindDiscovery {
    async fn installed_kinds(&self, group: &str, version: &str) -> Result<Vec<String>> {
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group])
            .run()
            .await?;

        let mut kinds = Vec::new();
        for api_group in discovery.groups() {
            if api_group.name() == group {
                for (ar, _) in api_group.versioned_resources(version) {
                    kinds.push(ar.kind);
                }
            }
        }

        Ok(kinds)
    }
}

/// Delivers CRD add notifications as raw JSON until cancelled
pub trait CrdEventSource: Send {
    fn spawn(self: Box<Self>, events: mpsc::Sender<serde_json::Value>, shutdown: CancellationToken);
}

/// Cluster-wide watch on CustomResourceDefinitions with a periodic relist
pub struct KubeCrdEventSource {
    client: Client,
    resync: Duration,
}

impl KubeCrdEventSource {
    pub fn new(client: Client, resync: Duration) -> Self {
        Self { client, resync }
    }
}

impl CrdEventSource for KubeCrdEventSource {
    fn spawn(self: Box<Self>, events: mpsc::Sender<serde_json::Value>, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let ar = ApiResource::erase::<CustomResourceDefinition>(&());
            let crds: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
            let mut stream = watcher(crds.clone(), watcher::Config::default())
                .default_backoff()
                .boxed();
            let mut resync = tokio::time::interval(self.resync);
            // The watch's initial listing covers the first period
            resync.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("CRD watch cancelled");
                        return;
                    }
                    event = stream.next() => match event {
                        Some(Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj))) => {
                            if in_group(&obj) && !deliver(&events, obj).await {
                                return;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => warn!("CRD watch error: {}", e),
                        None => return,
                    },
                    _ = resync.tick() => match crds.list(&ListParams::default()).await {
                        Ok(list) => {
                            for obj in list.items.into_iter().filter(in_group) {
                                if !deliver(&events, obj).await {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("CRD resync failed: {}", e),
                    },
                }
            }
        });
    }
}

/// Only CRDs of the controller's own API group are forwarded
fn in_group(obj: &DynamicObject) -> bool {
    obj.data
        .get("spec")
        .and_then(|spec| spec.get("group"))
        .and_then(|group| group.as_str())
        == Some(GROUP)
}

/// Forward one object; returns false once nobody is listening anymore
async fn deliver(events: &mpsc::Sender<serde_json::Value>, mut obj: DynamicObject) -> bool {
    // List items come without type information
    if obj.types.is_none() {
        obj.types = Some(TypeMeta::resource::<CustomResourceDefinition>());
    }
    match serde_json::to_value(&obj) {
        Ok(value) => events.send(value).await.is_ok(),
        Err(e) => {
            warn!("Unable to encode CRD notification: {}", e);
            true
        }
    }
}

/// Outcome of decoding a CRD add notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrdNotification {
    Added { kind: String },
    Undecodable { reason: String },
}

/// Missing required fields decode to defaults, so an empty kind is treated
/// as undecodable.
pub fn decode_notification(value: serde_json::Value) -> CrdNotification {
    match serde_json::from_value::<CustomResourceDefinition>(value) {
        Ok(crd) if crd.spec.names.kind.is_empty() => CrdNotification::Undecodable {
            reason: "CRD declares no kind".to_string(),
        },
        Ok(crd) => CrdNotification::Added {
            kind: crd.spec.names.kind,
        },
        Err(e) => CrdNotification::Undecodable {
            reason: e.to_string(),
        },
    }
}

/// Apply add notifications to the state until every required kind is present.
/// Returns `None` if the notification channel closes first.
pub async fn converge(
    mut state: RequiredCustomResources,
    mut events: mpsc::Receiver<serde_json::Value>,
) -> Option<RequiredCustomResources> {
    while let Some(value) = events.recv().await {
        match decode_notification(value) {
            CrdNotification::Undecodable { reason } => {
                warn!("Skipping undecodable CRD notification: {}", reason);
                continue;
            }
            CrdNotification::Added { kind } => {
                debug!("CRD added {}", kind);
                if let Some(required) = RequiredKind::from_kind(&kind) {
                    if !state.is_present(required) {
                        info!("{} CRD added", kind);
                    }
                    state.mark_present(required);
                }
            }
        }

        if state.fully_initialized() {
            return Some(state);
        }
    }

    None
}

/// Result of the readiness check
pub struct Detection {
    /// Kinds installed when detection finished; fixes the reconciler set
    pub present: RequiredCustomResources,
    completed: Option<oneshot::Receiver<RequiredCustomResources>>,
    watch_guard: Option<DropGuard>,
}

impl Detection {
    pub fn is_watching(&self) -> bool {
        self.watch_guard.is_some()
    }

    /// Resolves once the watch has observed every required CRD and the
    /// process should restart. Never resolves when nothing is watched.
    pub async fn restart_requested(&mut self) {
        if let Some(completed) = self.completed.as_mut() {
            let result = completed.await;
            self.completed = None;
            if result.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Check which required CRDs are installed and, when some are missing,
/// start watching for them. The watch stops when the `Detection` is dropped.
pub async fn detect_custom_resources(
    discovery: &dyn KindDiscovery,
    source: Box<dyn CrdEventSource>,
) -> Detection {
    let present = match discovery.installed_kinds(GROUP, VERSION).await {
        Ok(kinds) => {
            for kind in &kinds {
                debug!("checking kind {}", kind);
            }
            RequiredCustomResources::from_kinds(kinds.iter().map(String::as_str))
        }
        Err(e) => {
            warn!(
                "Unable to enumerate {}/{} resources, assuming none are installed: {}",
                GROUP, VERSION, e
            );
            RequiredCustomResources::default()
        }
    };

    for kind in RequiredKind::ALL {
        if present.is_present(kind) {
            info!("Found {} CRD", kind.kind());
        }
    }

    if present.fully_initialized() {
        return Detection {
            present,
            completed: None,
            watch_guard: None,
        };
    }

    info!("CRDs missing, watching for future creation of spire-controller-manager CRDs");

    let token = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(64);
    let (completed_tx, completed_rx) = oneshot::channel();

    source.spawn(events_tx, token.clone());

    let state_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = state_token.cancelled() => {}
            result = converge(present, events_rx) => {
                if let Some(state) = result {
                    info!("CRDs added, restarting spire-controller-manager");
                    let _ = completed_tx.send(state);
                }
            }
        }
    });

    Detection {
        present,
        completed: Some(completed_rx),
        watch_guard: Some(token.drop_guard()),
    }
}
