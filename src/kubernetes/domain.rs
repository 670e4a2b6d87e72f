// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster domain auto-detection

use crate::constants::dns::K8S_DEFAULT_SERVICE;
use crate::error::{ControllerError, Result};
use hickory_resolver::lookup::Lookup;
use hickory_resolver::proto::rr::RData;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

/// Derive the cluster domain from the canonical name of the API server service.
pub async fn auto_detect_cluster_domain() -> Result<String> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
        ControllerError::ClusterDomainError(format!("unable to create resolver: {}", e))
    })?;

    let lookup = resolver.lookup_ip(K8S_DEFAULT_SERVICE).await.map_err(|e| {
        ControllerError::ClusterDomainError(format!("unable to lookup CNAME: {}", e))
    })?;

    let cname = canonical_name(lookup.as_lookup());
    debug!("Resolved {} to {}", K8S_DEFAULT_SERVICE, cname);

    parse_cluster_domain_cname(&cname).map_err(|e| {
        ControllerError::ClusterDomainError(format!("unable to parse CNAME \"{}\": {}", cname, e))
    })
}

/// The last CNAME target in the answer, or the name that was actually queried
/// once search domains were applied.
fn canonical_name(lookup: &Lookup) -> String {
    lookup
        .record_iter()
        .filter_map(|record| match record.data() {
            Some(RData::CNAME(cname)) => Some(cname.0.to_string()),
            _ => None,
        })
        .last()
        .unwrap_or_else(|| lookup.query().name().to_string())
}

/// Strip the service prefix and the optional trailing dot from a canonical name
pub fn parse_cluster_domain_cname(cname: &str) -> Result<String> {
    let Some(cluster_domain) = cname.strip_prefix(&format!("{}.", K8S_DEFAULT_SERVICE)) else {
        return Err(ControllerError::ClusterDomainError(
            "CNAME did not have expected prefix".to_string(),
        ));
    };

    let cluster_domain = cluster_domain.strip_suffix('.').unwrap_or(cluster_domain);
    if cluster_domain.is_empty() {
        return Err(ControllerError::ClusterDomainError(
            "CNAME did not have a cluster domain".to_string(),
        ));
    }

    Ok(cluster_domain.to_string())
}
