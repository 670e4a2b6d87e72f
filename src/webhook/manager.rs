// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Mints the webhook serving certificate from SPIRE and keeps it and the
//! webhook configuration's CA bundle current.

use crate::constants::webhook::{REFRESH_INTERVAL_SECS, SVID_TTL_SECS};
use crate::error::{ControllerError, Result};
use crate::kubernetes::WebhookConfigClient;
use crate::runtime::Runnable;
use crate::spire::{encode_pem_certificates, BundleClient, SpiffeId, SvidClient};
use async_trait::async_trait;
use rcgen::Ia5String;
use rcgen::{CertificateParams, DistinguishedName, KeyPair, SanType};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

pub struct WebhookManagerConfig {
    pub id: SpiffeId,
    pub key_pair_path: PathBuf,
    pub webhook_name: String,
    pub webhook_client: Arc<dyn WebhookConfigClient>,
    pub svid_client: Arc<dyn SvidClient>,
    pub bundle_client: Arc<dyn BundleClient>,
}

/// Lifetime of the certificate currently on disk
#[derive(Debug, Clone, Copy)]
struct Issued {
    at: SystemTime,
    expires_at: SystemTime,
}

impl Issued {
    /// True once less than half of the lifetime remains
    fn needs_rotation(&self, now: SystemTime) -> bool {
        let lifetime = self
            .expires_at
            .duration_since(self.at)
            .unwrap_or(Duration::ZERO);
        match now.duration_since(self.at) {
            Ok(elapsed) => elapsed >= lifetime / 2,
            Err(_) => false,
        }
    }
}

pub struct WebhookManager {
    config: WebhookManagerConfig,
    issued: Option<Issued>,
}

impl WebhookManager {
    pub fn new(config: WebhookManagerConfig) -> Self {
        Self {
            config,
            issued: None,
        }
    }

    /// Mint the initial certificate and publish the CA bundle.
    /// The webhook server must not start before this succeeds.
    #[instrument(skip(self), fields(id = %self.config.id))]
    pub async fn init(&mut self) -> Result<()> {
        self.mint().await?;
        self.sync_ca_bundle().await?;
        info!("Webhook certificate initialized");
        Ok(())
    }

    async fn mint(&mut self) -> Result<()> {
        let dns_name = self
            .config
            .webhook_client
            .service_dns_name(&self.config.webhook_name)
            .await?;

        let key_pair = KeyPair::generate()
            .map_err(|e| ControllerError::CertificateError(format!("failed to generate key: {}", e)))?;
        let csr = build_csr(&self.config.id, &dns_name, &key_pair)?;

        let svid = self
            .config
            .svid_client
            .mint_x509_svid(csr, Duration::from_secs(SVID_TTL_SECS))
            .await?;

        let mut key_pair_pem = encode_pem_certificates(&svid.cert_chain);
        key_pair_pem.push_str(&key_pair.serialize_pem());
        write_atomically(&self.config.key_pair_path, key_pair_pem.as_bytes())?;

        self.issued = Some(Issued {
            at: SystemTime::now(),
            expires_at: svid.expires_at,
        });
        debug!(dns_name = %dns_name, "Wrote webhook key pair to {}", self.config.key_pair_path.display());
        Ok(())
    }

    /// Always compared against the live configuration so that external
    /// resets of the CA bundle are repaired.
    async fn sync_ca_bundle(&self) -> Result<()> {
        let bundle = self.config.bundle_client.get_bundle().await?;
        let ca_bundle = bundle.x509_authorities_pem();
        if ca_bundle.is_empty() {
            return Err(ControllerError::CertificateError(format!(
                "trust bundle for {} has no X.509 authorities",
                bundle.trust_domain
            )));
        }
        let changed = self
            .config
            .webhook_client
            .set_ca_bundle(&self.config.webhook_name, ca_bundle.as_bytes())
            .await?;
        if changed {
            info!("Updated CA bundle on webhook configuration {}", self.config.webhook_name);
        }
        Ok(())
    }

    async fn refresh(&mut self) {
        let due = self
            .issued
            .map_or(true, |issued| issued.needs_rotation(SystemTime::now()));
        if due {
            match self.mint().await {
                Ok(()) => info!("Rotated webhook certificate"),
                Err(e) => error!("Failed to rotate webhook certificate: {}", e),
            }
        }

        if let Err(e) = self.sync_ca_bundle().await {
            error!("Failed to sync webhook CA bundle: {}", e);
        }
    }
}

#[async_trait]
impl Runnable for WebhookManager {
    async fn start(mut self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(Duration::from_secs(REFRESH_INTERVAL_SECS));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = interval.tick() => self.refresh().await,
            }
        }
    }
}

/// DER encoded CSR with the SPIFFE ID as URI SAN and the service as DNS SAN
fn build_csr(id: &SpiffeId, dns_name: &str, key_pair: &KeyPair) -> Result<Vec<u8>> {
    let mut params = CertificateParams::new(vec![dns_name.to_string()])
        .map_err(|e| ControllerError::CertificateError(format!("invalid DNS name: {}", e)))?;
    let uri = Ia5String::try_from(id.to_string())
        .map_err(|e| ControllerError::CertificateError(format!("invalid SPIFFE ID: {}", e)))?;
    params.subject_alt_names.push(SanType::URI(uri));
    params.distinguished_name = DistinguishedName::new();

    let csr = params
        .serialize_request(key_pair)
        .map_err(|e| ControllerError::CertificateError(format!("failed to create CSR: {}", e)))?;
    Ok(csr.der().to_vec())
}

/// Replace `path` so readers never see a partial file
fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::webhook_config::MockWebhookConfigClient;
    use crate::spire::{MintedX509Svid, MockBundleClient, MockSvidClient, TrustBundle, TrustDomain};

    const WEBHOOK_NAME: &str = "spire-controller-manager-webhook";

    fn webhook_id() -> SpiffeId {
        let td = TrustDomain::parse("example.org").unwrap();
        SpiffeId::from_path(&td, "/spire-controller-manager-webhook").unwrap()
    }

    fn webhook_client(ca_bundle_updates: usize) -> MockWebhookConfigClient {
        let mut client = MockWebhookConfigClient::new();
        client
            .expect_service_dns_name()
            .withf(|name| name == WEBHOOK_NAME)
            .returning(|_| Ok("spire-controller-manager-webhook-service.spire-system.svc".to_string()));
        client
            .expect_set_ca_bundle()
            .withf(|name, ca_bundle| name == WEBHOOK_NAME && !ca_bundle.is_empty())
            .times(ca_bundle_updates)
            .returning(|_, _| Ok(true));
        client
    }

    fn svid_client(lifetime: Duration) -> MockSvidClient {
        let mut client = MockSvidClient::new();
        client
            .expect_mint_x509_svid()
            .withf(|csr, ttl| !csr.is_empty() && *ttl == Duration::from_secs(SVID_TTL_SECS))
            .returning(move |_, _| {
                Ok(MintedX509Svid {
                    cert_chain: vec![vec![0x30, 0x01, 0x00], vec![0x30, 0x01, 0x01]],
                    expires_at: SystemTime::now() + lifetime,
                })
            });
        client
    }

    fn bundle_client() -> MockBundleClient {
        let mut client = MockBundleClient::new();
        client.expect_get_bundle().returning(|| {
            Ok(TrustBundle {
                trust_domain: "example.org".to_string(),
                x509_authorities: vec![vec![0x30, 0x01, 0x02]],
            })
        });
        client
    }

    fn make_manager(
        dir: &Path,
        webhook_client: MockWebhookConfigClient,
        svid_client: MockSvidClient,
        bundle_client: MockBundleClient,
    ) -> WebhookManager {
        WebhookManager::new(WebhookManagerConfig {
            id: webhook_id(),
            key_pair_path: dir.join("keypair.pem"),
            webhook_name: WEBHOOK_NAME.to_string(),
            webhook_client: Arc::new(webhook_client),
            svid_client: Arc::new(svid_client),
            bundle_client: Arc::new(bundle_client),
        })
    }

    #[tokio::test]
    async fn test_init_writes_chain_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = make_manager(
            dir.path(),
            webhook_client(1),
            svid_client(Duration::from_secs(3600)),
            bundle_client(),
        );

        manager.init().await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("keypair.pem")).unwrap();
        assert_eq!(contents.matches("BEGIN CERTIFICATE").count(), 2);
        assert!(contents.contains("BEGIN PRIVATE KEY"));
        assert!(contents.find("BEGIN CERTIFICATE") < contents.find("BEGIN PRIVATE KEY"));
        // only the key pair file is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_init_fails_when_mint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut svid = MockSvidClient::new();
        svid.expect_mint_x509_svid()
            .returning(|_, _| Err(tonic::Status::unavailable("connection refused").into()));

        let mut manager = make_manager(dir.path(), webhook_client(0), svid, MockBundleClient::new());

        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, ControllerError::SpireApiError(_)));
        assert!(!dir.path().join("keypair.pem").exists());
    }

    #[tokio::test]
    async fn test_init_fails_on_empty_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = MockBundleClient::new();
        bundle.expect_get_bundle().returning(|| Ok(TrustBundle::default()));

        let mut manager = make_manager(
            dir.path(),
            webhook_client(0),
            svid_client(Duration::from_secs(3600)),
            bundle,
        );

        assert!(manager.init().await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_repairs_ca_bundle_and_keeps_fresh_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let mut svid = MockSvidClient::new();
        svid.expect_mint_x509_svid().times(1).returning(|_, _| {
            Ok(MintedX509Svid {
                cert_chain: vec![vec![0x30, 0x01, 0x00]],
                expires_at: SystemTime::now() + Duration::from_secs(3600),
            })
        });

        // The live configuration is reset externally between refreshes, so
        // every sync has to write the bundle again
        let mut manager = make_manager(dir.path(), webhook_client(4), svid, bundle_client());
        manager.init().await.unwrap();

        for _ in 0..3 {
            manager.refresh().await;
        }
    }

    #[tokio::test]
    async fn test_refresh_rotates_expiring_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let mut svid = MockSvidClient::new();
        svid.expect_mint_x509_svid().times(2).returning(|_, _| {
            Ok(MintedX509Svid {
                cert_chain: vec![vec![0x30, 0x01, 0x00]],
                expires_at: SystemTime::now(),
            })
        });

        let mut manager = make_manager(dir.path(), webhook_client(2), svid, bundle_client());
        manager.init().await.unwrap();
        manager.refresh().await;
    }

    #[test]
    fn test_needs_rotation_at_half_life() {
        let at = SystemTime::now();
        let issued = Issued {
            at,
            expires_at: at + Duration::from_secs(100),
        };

        assert!(!issued.needs_rotation(at + Duration::from_secs(49)));
        assert!(issued.needs_rotation(at + Duration::from_secs(50)));
        assert!(issued.needs_rotation(at + Duration::from_secs(200)));
    }

    #[test]
    fn test_write_atomically_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keypair.pem");

        write_atomically(&path, b"first").unwrap();
        write_atomically(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
