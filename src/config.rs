// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use clap::Parser;
use regex::Regex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::defaults;
use crate::kubernetes::auto_detect_cluster_domain;

/// Command line arguments
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "spire-controller-manager")]
#[command(about = "Registers SPIFFE IDs for cluster workloads with SPIRE Server")]
pub struct Args {
    /// The controller will load its initial configuration from this file.
    /// Omit this flag to use the default configuration values.
    #[arg(long, env = "SPIRE_CONTROLLER_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// The path to the SPIRE API socket (deprecated; use the config file)
    #[arg(long)]
    pub spire_api_socket: Option<PathBuf>,
}

/// On-disk configuration file layout
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FileConfig {
    cluster_name: String,
    cluster_domain: String,
    trust_domain: String,
    ignore_namespaces: Option<Vec<String>>,
    gc_interval: Option<String>,
    spire_server_socket_path: Option<PathBuf>,
    validating_webhook_configuration_name: Option<String>,
    health: HealthFileConfig,
    webhook: WebhookFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HealthFileConfig {
    health_probe_bind_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WebhookFileConfig {
    port: Option<u16>,
    cert_dir: Option<String>,
}

impl FileConfig {
    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read the config file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("unable to load the config file {}", path.display()))
    }
}

/// Validated controller manager configuration, immutable once loaded
#[derive(Debug, Clone)]
pub struct ControllerManagerConfig {
    pub cluster_name: String,
    /// Cluster DNS suffix; empty when neither configured nor detectable
    pub cluster_domain: String,
    pub trust_domain: String,
    /// Namespaces whose pods never receive entries
    pub ignore_namespaces: Vec<Regex>,
    pub gc_interval: Duration,
    pub spire_server_socket_path: PathBuf,
    pub validating_webhook_configuration_name: String,
    pub health_probe_bind_address: SocketAddr,
    pub webhook_port: u16,
}

impl ControllerManagerConfig {
    /// Load configuration from the optional config file and command line flags
    pub fn load(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::from_parts(file, args.spire_api_socket.clone())
    }

    fn from_parts(file: FileConfig, deprecated_socket_flag: Option<PathBuf>) -> Result<Self> {
        let spire_server_socket_path = match (file.spire_server_socket_path, deprecated_socket_flag)
        {
            (None, None) => PathBuf::from(defaults::SPIRE_SERVER_SOCKET_PATH),
            (Some(path), None) => path,
            (None, Some(flag)) => {
                warn!("The spire-api-socket flag is deprecated and will be removed in a future release; use the configuration file instead");
                flag
            }
            (Some(path), Some(_)) => {
                warn!("Ignoring deprecated spire-api-socket flag which will be removed in a future release");
                path
            }
        };

        if file.trust_domain.is_empty() {
            bail!("trust domain is required configuration");
        }
        if file.cluster_name.is_empty() {
            bail!("cluster name is required configuration");
        }
        let validating_webhook_configuration_name = file
            .validating_webhook_configuration_name
            .unwrap_or_else(|| defaults::VALIDATING_WEBHOOK_CONFIGURATION_NAME.to_string());
        if validating_webhook_configuration_name.is_empty() {
            bail!("validating webhook configuration name is required configuration");
        }
        if let Some(cert_dir) = file.webhook.cert_dir.filter(|d| !d.is_empty()) {
            info!("certDir configuration is ignored: certDir={}", cert_dir);
        }

        let ignore_namespaces = file
            .ignore_namespaces
            .unwrap_or_else(|| {
                defaults::IGNORE_NAMESPACES
                    .iter()
                    .map(|ns| ns.to_string())
                    .collect()
            })
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("unable to compile ignore namespaces regex {pattern:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let gc_interval = match file.gc_interval.as_deref() {
            Some(value) => parse_duration(value)
                .with_context(|| format!("invalid gcInterval {value:?}"))?,
            None => Duration::from_secs(defaults::GC_INTERVAL_SECS),
        };

        let health_probe_bind_address = file
            .health
            .health_probe_bind_address
            .as_deref()
            .unwrap_or(defaults::HEALTH_PROBE_BIND_ADDRESS)
            .parse()
            .context("invalid health probe bind address")?;

        Ok(Self {
            cluster_name: file.cluster_name,
            cluster_domain: file.cluster_domain,
            trust_domain: file.trust_domain,
            ignore_namespaces,
            gc_interval,
            spire_server_socket_path,
            validating_webhook_configuration_name,
            health_probe_bind_address,
            webhook_port: file.webhook.port.unwrap_or(defaults::WEBHOOK_PORT),
        })
    }

    /// Fill in the cluster domain from DNS when it was not configured.
    /// Detection failures are logged and leave the domain empty.
    pub async fn with_detected_cluster_domain(mut self) -> Self {
        if self.cluster_domain.is_empty() {
            match auto_detect_cluster_domain().await {
                Ok(domain) => self.cluster_domain = domain,
                Err(e) => warn!("unable to autodetect cluster domain: {}", e),
            }
        }
        self
    }

    /// Check whether a namespace matches one of the ignore patterns
    pub fn is_namespace_ignored(&self, namespace: &str) -> bool {
        matches_any(&self.ignore_namespaces, namespace)
    }

    pub fn log_summary(&self) {
        let ignore_namespaces: Vec<&str> = self.ignore_namespaces.iter().map(Regex::as_str).collect();
        info!(
            cluster_name = %self.cluster_name,
            cluster_domain = %self.cluster_domain,
            trust_domain = %self.trust_domain,
            ignore_namespaces = ?ignore_namespaces,
            gc_interval = ?self.gc_interval,
            spire_server_socket_path = %self.spire_server_socket_path.display(),
            "Config loaded"
        );
    }
}

/// Check a namespace against a set of ignore patterns
pub fn matches_any(patterns: &[Regex], namespace: &str) -> bool {
    patterns.iter().any(|r| r.is_match(namespace))
}

/// Parse a GC interval such as "10s", "5m" or "1h30m"; zero is rejected
pub fn parse_duration(value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value.trim())
        .with_context(|| format!("unable to parse duration {value:?}"))?;
    if duration.is_zero() {
        bail!("duration must be greater than zero");
    }
    Ok(duration)
}
