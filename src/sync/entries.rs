// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Background pass that gathers the desired registration entries.

use super::trigger::{trigger_channel, TriggerListener, Triggerer};
use crate::config::matches_any;
use crate::error::{ControllerError, Result};
use crate::kubernetes::RequiredCustomResources;
use crate::runtime::Runnable;
use crate::spire::{SpiffeId, TrustDomain};
use crate::types::{ClusterSPIFFEID, ClusterStaticEntry};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api, Client, ResourceExt};
use regex::Regex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct EntryReconcilerConfig {
    pub client: Client,
    pub trust_domain: TrustDomain,
    pub cluster_name: String,
    pub cluster_domain: String,
    pub ignore_namespaces: Vec<Regex>,
    pub gc_interval: Duration,
    pub present: RequiredCustomResources,
}

/// A registration entry declared by a ClusterStaticEntry
#[derive(Debug, Clone, PartialEq)]
pub struct StaticEntry {
    pub name: String,
    pub spiffe_id: SpiffeId,
    pub parent_id: SpiffeId,
    pub selectors: Vec<String>,
}

#[derive(Debug, Default, PartialEq)]
pub struct DesiredEntries {
    pub cluster_spiffe_ids: usize,
    /// Pods outside the ignored namespaces
    pub pods: usize,
    pub static_entries: Vec<StaticEntry>,
}

pub struct EntryReconciler {
    config: EntryReconcilerConfig,
    trigger: TriggerListener,
}

pub fn entry_reconciler(config: EntryReconcilerConfig) -> (EntryReconciler, Triggerer) {
    let (triggerer, trigger) = trigger_channel();
    (EntryReconciler { config, trigger }, triggerer)
}

impl EntryReconciler {
    #[instrument(skip(self), fields(cluster = %self.config.cluster_name))]
    async fn gather(&self) -> Result<DesiredEntries> {
        let mut desired = DesiredEntries::default();
        let present = self.config.present;

        if present.cluster_spiffe_id {
            let ids: Api<ClusterSPIFFEID> = Api::all(self.config.client.clone());
            desired.cluster_spiffe_ids = ids.list(&ListParams::default()).await?.items.len();

            let pods: Api<Pod> = Api::all(self.config.client.clone());
            desired.pods = pods
                .list(&ListParams::default())
                .await?
                .items
                .iter()
                .filter(|pod| {
                    let namespace = pod.namespace().unwrap_or_default();
                    !matches_any(&self.config.ignore_namespaces, &namespace)
                })
                .count();
        }

        if present.cluster_static_entry {
            let entries: Api<ClusterStaticEntry> = Api::all(self.config.client.clone());
            for entry in entries.list(&ListParams::default()).await?.items {
                match static_entry(&entry) {
                    Ok(entry) => desired.static_entries.push(entry),
                    Err(e) => warn!("Ignoring ClusterStaticEntry {}: {}", entry.name_any(), e),
                }
            }
        }

        Ok(desired)
    }

    async fn pass(&self) {
        match self.gather().await {
            Ok(desired) => info!(
                trust_domain = %self.config.trust_domain,
                cluster_domain = %self.config.cluster_domain,
                cluster_spiffe_ids = desired.cluster_spiffe_ids,
                pods = desired.pods,
                static_entries = desired.static_entries.len(),
                "Gathered desired entries"
            ),
            Err(e) => error!("Failed to gather desired entries: {}", e),
        }
    }
}

#[async_trait]
impl Runnable for EntryReconciler {
    async fn start(mut self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut listening = true;
        loop {
            self.pass().await;

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                triggered = self.trigger.triggered(), if listening => {
                    if !triggered {
                        debug!("All entry triggerers dropped");
                        listening = false;
                    }
                }
                _ = tokio::time::sleep(self.config.gc_interval) => {}
            }
        }
    }
}

/// Validate a ClusterStaticEntry into the entry it declares
pub fn static_entry(entry: &ClusterStaticEntry) -> Result<StaticEntry> {
    let spec = &entry.spec;
    let spiffe_id = SpiffeId::parse(&spec.spiffe_id)?;
    let parent_id = SpiffeId::parse(&spec.parent_id)?;

    if spec.selectors.is_empty() {
        return Err(ControllerError::ConfigError(
            "at least one selector is required".to_string(),
        ));
    }
    if let Some(selector) = spec.selectors.iter().find(|s| !s.contains(':')) {
        return Err(ControllerError::ConfigError(format!(
            "selector {:?} must be of the form type:value",
            selector
        )));
    }

    Ok(StaticEntry {
        name: entry.name_any(),
        spiffe_id,
        parent_id,
        selectors: spec.selectors.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{list_json, MockService};
    use crate::types::ClusterStaticEntrySpec;
    use serde_json::json;

    fn make_static_entry(spiffe_id: &str, selectors: &[&str]) -> ClusterStaticEntry {
        ClusterStaticEntry::new(
            "static",
            ClusterStaticEntrySpec {
                spiffe_id: spiffe_id.to_string(),
                parent_id: "spiffe://example.org/spire/agent/k8s_psat/demo/node-1".to_string(),
                selectors: selectors.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    fn make_reconciler(client: Client, present: RequiredCustomResources) -> EntryReconciler {
        let (reconciler, _) = entry_reconciler(EntryReconcilerConfig {
            client,
            trust_domain: TrustDomain::parse("example.org").unwrap(),
            cluster_name: "demo".to_string(),
            cluster_domain: "cluster.local".to_string(),
            ignore_namespaces: vec![Regex::new("^kube-system$").unwrap()],
            gc_interval: Duration::from_secs(10),
            present,
        });
        reconciler
    }

    fn pod(namespace: &str, name: &str) -> serde_json::Value {
        json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": name, "namespace": namespace}})
    }

    #[test]
    fn test_static_entry_valid() {
        let entry = static_entry(&make_static_entry("spiffe://example.org/db", &["k8s:ns:db"])).unwrap();
        assert_eq!(entry.spiffe_id.to_string(), "spiffe://example.org/db");
        assert_eq!(entry.name, "static");
    }

    #[test]
    fn test_static_entry_rejects_bad_input() {
        assert!(static_entry(&make_static_entry("not-an-id", &["k8s:ns:db"])).is_err());
        assert!(static_entry(&make_static_entry("spiffe://example.org/db", &[])).is_err());
        assert!(static_entry(&make_static_entry("spiffe://example.org/db", &["nocolon"])).is_err());
    }

    #[tokio::test]
    async fn test_gather_skips_absent_kinds() {
        // No responses are registered, so any list call would fail
        let reconciler = make_reconciler(
            MockService::new().into_client(),
            RequiredCustomResources::default(),
        );

        assert_eq!(reconciler.gather().await.unwrap(), DesiredEntries::default());
    }

    #[tokio::test]
    async fn test_gather_filters_ignored_namespaces() {
        let client = MockService::new()
            .on_get(
                "/apis/spire.spiffe.io/v1alpha1/clusterspiffeids",
                200,
                &list_json("ClusterSPIFFEIDList", vec![]),
            )
            .on_get(
                "/api/v1/pods",
                200,
                &list_json(
                    "PodList",
                    vec![pod("default", "web"), pod("kube-system", "coredns"), pod("apps", "api")],
                ),
            )
            .into_client();

        let reconciler = make_reconciler(
            client,
            RequiredCustomResources {
                cluster_spiffe_id: true,
                ..Default::default()
            },
        );

        let desired = reconciler.gather().await.unwrap();
        assert_eq!(desired.pods, 2);
        assert!(desired.static_entries.is_empty());
    }

    #[tokio::test]
    async fn test_gather_collects_valid_static_entries() {
        let entries = vec![
            serde_json::to_value(make_static_entry("spiffe://example.org/db", &["k8s:ns:db"])).unwrap(),
            serde_json::to_value(make_static_entry("bogus", &["k8s:ns:db"])).unwrap(),
        ];
        let client = MockService::new()
            .on_get(
                "/apis/spire.spiffe.io/v1alpha1/clusterstaticentries",
                200,
                &list_json("ClusterStaticEntryList", entries),
            )
            .into_client();

        let reconciler = make_reconciler(
            client,
            RequiredCustomResources {
                cluster_static_entry: true,
                ..Default::default()
            },
        );

        let desired = reconciler.gather().await.unwrap();
        assert_eq!(desired.static_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_runnable_stops_on_shutdown() {
        let reconciler = make_reconciler(
            MockService::new().into_client(),
            RequiredCustomResources::default(),
        );
        let token = CancellationToken::new();
        token.cancel();

        Box::new(reconciler).start(token).await.unwrap();
    }
}
