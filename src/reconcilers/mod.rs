// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod custom_resource;
pub mod pod;

pub use custom_resource::{
    ClusterFederatedTrustDomainReconciler, ClusterSPIFFEIDReconciler, ClusterStaticEntryReconciler,
    TriggerReconciler,
};
pub use pod::PodReconciler;
