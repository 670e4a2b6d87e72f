// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name used for logging and server-side apply
pub const OPERATOR_NAME: &str = "spire-controller-manager";

/// API group and kinds served by the controller's CRDs
pub mod crd {
    pub const GROUP: &str = "spire.spiffe.io";
    pub const VERSION: &str = "v1alpha1";

    pub const CLUSTER_SPIFFE_ID_KIND: &str = "ClusterSPIFFEID";
    pub const CLUSTER_STATIC_ENTRY_KIND: &str = "ClusterStaticEntry";
    pub const CLUSTER_FEDERATED_TRUST_DOMAIN_KIND: &str = "ClusterFederatedTrustDomain";

    /// Resync period of the CRD watch, a backstop against missed events
    pub const WATCH_RESYNC_SECS: u64 = 60;
}

/// Configuration defaults
pub mod defaults {
    pub const SPIRE_SERVER_SOCKET_PATH: &str = "/spire-server/api.sock";
    pub const GC_INTERVAL_SECS: u64 = 10;
    pub const VALIDATING_WEBHOOK_CONFIGURATION_NAME: &str = "spire-controller-manager-webhook";
    pub const IGNORE_NAMESPACES: [&str; 3] = ["kube-system", "kube-public", "spire-system"];
    pub const HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";
    pub const WEBHOOK_PORT: u16 = 9443;
}

/// Admission webhook and its credentials
pub mod webhook {
    /// Prefix of the temporary directory holding the webhook key pair
    pub const CERT_DIR_PREFIX: &str = "spire-controller-manager-";
    /// Certificate chain and private key live in a single file to keep rotation simple
    pub const KEY_PAIR_NAME: &str = "keypair.pem";
    /// Path component of the webhook's SPIFFE ID
    pub const SPIFFE_ID_PATH: &str = "/spire-controller-manager-webhook";
    /// TTL requested for the webhook X509-SVID
    pub const SVID_TTL_SECS: u64 = 24 * 60 * 60;
    /// How often the webhook manager checks the SVID and the CA bundle
    pub const REFRESH_INTERVAL_SECS: u64 = 30;
    /// How often the webhook server checks the key pair file for changes
    pub const CERT_WATCH_INTERVAL_SECS: u64 = 10;
}

/// Cluster domain auto-detection
pub mod dns {
    /// Well-known service whose canonical name carries the cluster domain
    pub const K8S_DEFAULT_SERVICE: &str = "kubernetes.default.svc";
}
