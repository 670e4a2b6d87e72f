// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD detection, cluster domain detection, and webhook configuration.

pub mod crd;
pub mod domain;
pub mod webhook_config;

pub use crd::{
    detect_custom_resources, CrdEventSource, Detection, KindDiscovery, KubeCrdEventSource,
    KubeKindDiscovery, RequiredCustomResources, RequiredKind,
};
pub use domain::{auto_detect_cluster_domain, parse_cluster_domain_cname};
pub use webhook_config::{KubeWebhookConfigClient, WebhookConfigClient};
