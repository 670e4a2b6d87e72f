// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! TLS transport for the admission webhooks.
//!
//! Certificates are read from the certificate directory when the server starts
//! and reloaded whenever the key pair file is replaced.

use crate::constants::webhook::CERT_WATCH_INTERVAL_SECS;
use crate::error::{ControllerError, Result};
use crate::runtime::Runnable;
use async_trait::async_trait;
use axum::routing::MethodRouter;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedProtocolVersion};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[default]
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersion::Tls12 => rustls::ALL_VERSIONS,
            TlsVersion::Tls13 => TLS13_ONLY,
        }
    }
}

impl FromStr for TlsVersion {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            other => Err(ControllerError::ConfigError(format!(
                "unsupported minimum TLS version {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookServerOptions {
    pub port: u16,
    pub cert_dir: PathBuf,
    /// File holding the certificate chain, relative to `cert_dir`
    pub cert_name: String,
    /// File holding the private key, relative to `cert_dir`
    pub key_name: String,
    pub min_tls_version: TlsVersion,
}

pub struct WebhookServer {
    options: WebhookServerOptions,
    router: Router,
    paths: Vec<String>,
}

impl WebhookServer {
    pub fn new(options: WebhookServerOptions) -> Self {
        Self {
            options,
            router: Router::new(),
            paths: Vec::new(),
        }
    }

    pub fn register(&mut self, path: &str, handler: MethodRouter) {
        debug!("Registering webhook at {}", path);
        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, handler);
        self.paths.push(path.to_string());
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn options(&self) -> &WebhookServerOptions {
        &self.options
    }

    fn cert_path(&self) -> PathBuf {
        self.options.cert_dir.join(&self.options.cert_name)
    }

    fn key_path(&self) -> PathBuf {
        self.options.cert_dir.join(&self.options.key_name)
    }
}

/// Build a rustls server config from PEM files. Cert and key may share one file.
pub fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
    min_tls_version: TlsVersion,
) -> Result<ServerConfig> {
    let cert_pem = std::fs::read(cert_path)?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_pem.as_slice()).collect::<std::io::Result<_>>()?;
    if certs.is_empty() {
        return Err(ControllerError::CertificateError(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key_pem = std::fs::read(key_path)?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_slice())?
        .ok_or_else(|| {
            ControllerError::CertificateError(format!(
                "no private key found in {}",
                key_path.display()
            ))
        })?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_protocol_versions(min_tls_version.protocol_versions())
            .map_err(|e| ControllerError::CertificateError(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ControllerError::CertificateError(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Reload the TLS config whenever the key pair file changes. Never returns.
async fn watch_certificates(
    cert_path: PathBuf,
    key_path: PathBuf,
    min_tls_version: TlsVersion,
    tls: RustlsConfig,
) {
    let mut last_modified = modified(&key_path).await;
    let mut interval = tokio::time::interval(Duration::from_secs(CERT_WATCH_INTERVAL_SECS));
    interval.tick().await;

    loop {
        interval.tick().await;

        let current = modified(&key_path).await;
        if current.is_none() || current == last_modified {
            continue;
        }

        match load_tls_config(&cert_path, &key_path, min_tls_version) {
            Ok(config) => {
                tls.reload_from_config(Arc::new(config));
                last_modified = current;
                info!("Reloaded webhook serving certificate");
            }
            Err(e) => warn!("Failed to reload webhook serving certificate: {}", e),
        }
    }
}

#[async_trait]
impl Runnable for WebhookServer {
    async fn start(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let cert_path = self.cert_path();
        let key_path = self.key_path();
        let min_tls_version = self.options.min_tls_version;

        let config = load_tls_config(&cert_path, &key_path, min_tls_version)?;
        let tls = RustlsConfig::from_config(Arc::new(config));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.options.port));
        let handle = axum_server::Handle::new();
        info!("Serving webhooks on {} for {:?}", addr, self.paths);

        let server = axum_server::bind_rustls(addr, tls.clone())
            .handle(handle.clone())
            .serve(self.router.into_make_service());

        let stop = async move {
            shutdown.cancelled().await;
            debug!("Shutting down webhook server");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            std::future::pending::<()>().await
        };

        tokio::select! {
            res = server => res?,
            _ = watch_certificates(cert_path, key_path, min_tls_version, tls) => {}
            _ = stop => {}
        }

        Ok(())
    }
}
