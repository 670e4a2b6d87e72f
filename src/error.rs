// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid SPIFFE identifier: {0}")]
    SpiffeIdError(String),

    #[error("Failed to connect to SPIRE Server: {0}")]
    SpireConnectError(String),

    #[error("SPIRE Server API error: {0}")]
    SpireApiError(#[from] tonic::Status),

    #[error("Cluster domain resolution failed: {0}")]
    ClusterDomainError(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Webhook configuration error: {0}")]
    WebhookConfigError(String),

    #[error("Manager error: {0}")]
    ManagerError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
