// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! SPIRE Server access: identifiers, wire messages and the API client

pub mod client;
pub mod id;
pub mod proto;

pub use client::SpireClient;
pub use id::{SpiffeId, TrustDomain};

use crate::error::Result;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};

#[cfg(test)]
use mockall::automock;

/// An X509-SVID minted by the SPIRE Server
#[derive(Debug, Clone)]
pub struct MintedX509Svid {
    /// DER certificates, leaf first
    pub cert_chain: Vec<Vec<u8>>,
    pub expires_at: SystemTime,
}

/// X.509 authorities for the server's own trust domain
#[derive(Debug, Clone, Default)]
pub struct TrustBundle {
    pub trust_domain: String,
    /// DER certificates
    pub x509_authorities: Vec<Vec<u8>>,
}

impl TrustBundle {
    /// Authorities as concatenated PEM `CERTIFICATE` blocks
    pub fn x509_authorities_pem(&self) -> String {
        encode_pem_certificates(&self.x509_authorities)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SvidClient: Send + Sync {
    async fn mint_x509_svid(&self, csr_der: Vec<u8>, ttl: Duration) -> Result<MintedX509Svid>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BundleClient: Send + Sync {
    async fn get_bundle(&self) -> Result<TrustBundle>;
}

/// Encode DER certificates as PEM with LF line endings
pub fn encode_pem_certificates(certs: &[Vec<u8>]) -> String {
    let blocks: Vec<pem::Pem> = certs
        .iter()
        .map(|der| pem::Pem::new("CERTIFICATE", der.clone()))
        .collect();
    pem::encode_many_config(
        &blocks,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}
