// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! SPIRE Server API client over the server's admin unix socket

use super::proto::{bundle, svid, types};
use super::{BundleClient, MintedX509Svid, SvidClient, TrustBundle};
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use bundle::bundle_client::BundleClient as BundleApiClient;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use svid::svid_client::SvidClient as SvidApiClient;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info, instrument};

/// Client for the SVID and Bundle services. Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct SpireClient {
    channel: Channel,
}

impl SpireClient {
    /// Connect to the SPIRE Server socket; fails when nothing is listening.
    pub async fn dial_socket(path: &Path) -> Result<Self> {
        let socket_path: PathBuf = path.to_path_buf();
        info!(socket_path = %socket_path.display(), "Dialing SPIRE Server socket");

        // The authority is unused for unix sockets, but tonic requires a URI
        let channel = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| ControllerError::SpireConnectError(e.to_string()))?
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = socket_path.clone();
                async move {
                    UnixStream::connect(path)
                        .await
                        .map(hyper_util::rt::TokioIo::new)
                }
            }))
            .await
            .map_err(|e| ControllerError::SpireConnectError(format!("{}: {}", path.display(), e)))?;

        Ok(Self { channel })
    }
}

#[async_trait]
impl SvidClient for SpireClient {
    #[instrument(skip(self, csr_der))]
    async fn mint_x509_svid(&self, csr_der: Vec<u8>, ttl: Duration) -> Result<MintedX509Svid> {
        let ttl = i32::try_from(ttl.as_secs()).unwrap_or(i32::MAX);
        let response = SvidApiClient::new(self.channel.clone())
            .mint_x509svid(svid::MintX509svidRequest { csr: csr_der, ttl })
            .await?
            .into_inner();

        let svid = response.svid.ok_or_else(|| {
            ControllerError::CertificateError("SPIRE Server returned no SVID".to_string())
        })?;
        if svid.cert_chain.is_empty() {
            return Err(ControllerError::CertificateError(
                "SPIRE Server returned an empty certificate chain".to_string(),
            ));
        }

        let expires_at = UNIX_EPOCH + Duration::from_secs(svid.expires_at.max(0) as u64);
        debug!(
            chain_len = svid.cert_chain.len(),
            expires_at = svid.expires_at,
            "Minted X509-SVID"
        );

        Ok(MintedX509Svid {
            cert_chain: svid.cert_chain,
            expires_at,
        })
    }
}

#[async_trait]
impl BundleClient for SpireClient {
    #[instrument(skip(self))]
    async fn get_bundle(&self) -> Result<TrustBundle> {
        let bundle = BundleApiClient::new(self.channel.clone())
            .get_bundle(bundle::GetBundleRequest {
                output_mask: Some(types::BundleMask {
                    x509_authorities: true,
                    ..Default::default()
                }),
            })
            .await?
            .into_inner();

        debug!(
            trust_domain = %bundle.trust_domain,
            authorities = bundle.x509_authorities.len(),
            "Fetched trust bundle"
        );

        Ok(TrustBundle {
            trust_domain: bundle.trust_domain,
            x509_authorities: bundle
                .x509_authorities
                .into_iter()
                .map(|cert| cert.asn1)
                .collect(),
        })
    }
}
