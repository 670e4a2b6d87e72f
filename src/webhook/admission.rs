// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Validating admission webhooks for the spire.spiffe.io resources.
//!
//! Objects are admitted when they decode into the typed resource.

use super::server::WebhookServer;
use crate::types::{ClusterFederatedTrustDomain, ClusterSPIFFEID};
use axum::routing::{post, MethodRouter};
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::Resource;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

pub const CLUSTER_SPIFFE_ID_PATH: &str = "/validate-spire-spiffe-io-v1alpha1-clusterspiffeid";
pub const CLUSTER_FEDERATED_TRUST_DOMAIN_PATH: &str =
    "/validate-spire-spiffe-io-v1alpha1-clusterfederatedtrustdomain";

/// Register the validating webhooks on the server
pub fn setup_webhooks(server: &mut WebhookServer) {
    server.register(CLUSTER_SPIFFE_ID_PATH, validator::<ClusterSPIFFEID>());
    server.register(
        CLUSTER_FEDERATED_TRUST_DOMAIN_PATH,
        validator::<ClusterFederatedTrustDomain>(),
    );
}

fn validator<K>() -> MethodRouter
where
    K: Resource<DynamicType = ()> + DeserializeOwned + Send + 'static,
{
    post(validate_handler::<K>)
}

async fn validate_handler<K>(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review::<K>(&req).into_review())
}

fn review<K>(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let response = AdmissionResponse::from(req);
    let Some(obj) = &req.object else {
        return response;
    };

    let decoded = serde_json::to_value(obj).and_then(serde_json::from_value::<K>);
    match decoded {
        Ok(_) => {
            debug!(uid = %req.uid, name = %req.name, "Admitted {}", K::kind(&()));
            response
        }
        Err(e) => {
            warn!(uid = %req.uid, name = %req.name, "Rejected {}: {}", K::kind(&()), e);
            response.deny(format!("invalid {}: {}", K::kind(&()), e))
        }
    }
}
