// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources in the spire.spiffe.io/v1alpha1 API group.

pub mod cluster_federated_trust_domain;
pub mod cluster_spiffe_id;
pub mod cluster_static_entry;

pub use cluster_federated_trust_domain::{ClusterFederatedTrustDomain, ClusterFederatedTrustDomainSpec};
pub use cluster_spiffe_id::{ClusterSPIFFEID, ClusterSPIFFEIDSpec};
pub use cluster_static_entry::{ClusterStaticEntry, ClusterStaticEntrySpec};
