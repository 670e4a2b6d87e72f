// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Background pass that gathers the desired federation relationships.

use super::trigger::{trigger_channel, TriggerListener, Triggerer};
use crate::error::{ControllerError, Result};
use crate::runtime::Runnable;
use crate::spire::{SpiffeId, TrustDomain};
use crate::types::ClusterFederatedTrustDomain;
use async_trait::async_trait;
use kube::{api::ListParams, Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum BundleEndpointProfile {
    HttpsWeb,
    HttpsSpiffe { endpoint_spiffe_id: SpiffeId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FederationRelationship {
    pub trust_domain: TrustDomain,
    pub bundle_endpoint_url: String,
    pub profile: BundleEndpointProfile,
}

pub struct FederationRelationshipReconcilerConfig {
    pub client: Client,
    pub gc_interval: Duration,
    /// Whether the ClusterFederatedTrustDomain CRD is installed
    pub present: bool,
}

pub struct FederationRelationshipReconciler {
    config: FederationRelationshipReconcilerConfig,
    trigger: TriggerListener,
}

pub fn federation_relationship_reconciler(
    config: FederationRelationshipReconcilerConfig,
) -> (FederationRelationshipReconciler, Triggerer) {
    let (triggerer, trigger) = trigger_channel();
    (FederationRelationshipReconciler { config, trigger }, triggerer)
}

impl FederationRelationshipReconciler {
    async fn gather(&self) -> Result<BTreeMap<String, FederationRelationship>> {
        if !self.config.present {
            return Ok(BTreeMap::new());
        }

        let api: Api<ClusterFederatedTrustDomain> = Api::all(self.config.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(desired_relationships(&list.items))
    }

    async fn pass(&self) {
        match self.gather().await {
            Ok(desired) => info!(
                trust_domains = ?desired.keys().collect::<Vec<_>>(),
                "Gathered desired federation relationships"
            ),
            Err(e) => error!("Failed to gather federation relationships: {}", e),
        }
    }
}

#[async_trait]
impl Runnable for FederationRelationshipReconciler {
    async fn start(mut self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut listening = true;
        loop {
            self.pass().await;

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                triggered = self.trigger.triggered(), if listening => {
                    if !triggered {
                        debug!("All federation triggerers dropped");
                        listening = false;
                    }
                }
                _ = tokio::time::sleep(self.config.gc_interval) => {}
            }
        }
    }
}

/// Relationships keyed by trust domain. Invalid resources are skipped and the
/// first resource wins when several name the same trust domain.
pub fn desired_relationships(
    resources: &[ClusterFederatedTrustDomain],
) -> BTreeMap<String, FederationRelationship> {
    let mut desired = BTreeMap::new();
    for resource in resources {
        let relationship = match relationship(resource) {
            Ok(r) => r,
            Err(e) => {
                warn!("Ignoring ClusterFederatedTrustDomain {}: {}", resource.name_any(), e);
                continue;
            }
        };

        let key = relationship.trust_domain.to_string();
        if desired.contains_key(&key) {
            warn!(
                "Ignoring ClusterFederatedTrustDomain {}: trust domain {} is already federated",
                resource.name_any(),
                key
            );
            continue;
        }
        desired.insert(key, relationship);
    }
    desired
}

pub fn relationship(resource: &ClusterFederatedTrustDomain) -> Result<FederationRelationship> {
    let spec = &resource.spec;
    let trust_domain = TrustDomain::parse(&spec.trust_domain)?;

    let endpoint = Url::parse(&spec.bundle_endpoint_url).map_err(|e| {
        ControllerError::ConfigError(format!(
            "invalid bundle endpoint URL {:?}: {}",
            spec.bundle_endpoint_url, e
        ))
    })?;
    if endpoint.scheme() != "https" {
        return Err(ControllerError::ConfigError(format!(
            "bundle endpoint URL {:?} must use https",
            spec.bundle_endpoint_url
        )));
    }
    if endpoint.host_str().map_or(true, str::is_empty) {
        return Err(ControllerError::ConfigError(format!(
            "bundle endpoint URL {:?} has no host",
            spec.bundle_endpoint_url
        )));
    }

    let profile = match spec.bundle_endpoint_profile.profile_type.as_str() {
        "https_web" => BundleEndpointProfile::HttpsWeb,
        "https_spiffe" => {
            let id = spec
                .bundle_endpoint_profile
                .endpoint_spiffe_id
                .as_deref()
                .ok_or_else(|| {
                    ControllerError::ConfigError(
                        "https_spiffe profile requires an endpoint SPIFFE ID".to_string(),
                    )
                })?;
            BundleEndpointProfile::HttpsSpiffe {
                endpoint_spiffe_id: SpiffeId::parse(id)?,
            }
        }
        other => {
            return Err(ControllerError::ConfigError(format!(
                "unknown bundle endpoint profile type {:?}",
                other
            )))
        }
    };

    Ok(FederationRelationship {
        trust_domain,
        bundle_endpoint_url: spec.bundle_endpoint_url.clone(),
        profile,
    })
}
