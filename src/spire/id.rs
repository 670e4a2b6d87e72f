// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Trust domain and SPIFFE ID parsing

use crate::error::{ControllerError, Result};
use std::fmt;
use std::str::FromStr;

const SCHEME_PREFIX: &str = "spiffe://";

/// A validated trust domain name, e.g. `example.org`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrustDomain(String);

impl TrustDomain {
    /// Parse a trust domain name. A full SPIFFE ID is also accepted, in which
    /// case its trust domain is used.
    pub fn parse(value: &str) -> Result<Self> {
        if value.contains(":/") {
            return SpiffeId::parse(value).map(|id| id.trust_domain);
        }
        if value.is_empty() {
            return Err(ControllerError::SpiffeIdError(
                "trust domain is missing".to_string(),
            ));
        }
        if !value.chars().all(is_trust_domain_char) {
            return Err(ControllerError::SpiffeIdError(
                "trust domain characters are limited to lowercase letters, numbers, dots, dashes, and underscores"
                    .to_string(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrustDomain {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A SPIFFE ID: trust domain plus an optional path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

impl SpiffeId {
    pub fn from_path(trust_domain: &TrustDomain, path: &str) -> Result<Self> {
        validate_path(path)?;
        Ok(Self {
            trust_domain: trust_domain.clone(),
            path: path.to_string(),
        })
    }

    pub fn parse(value: &str) -> Result<Self> {
        let Some(rest) = value.strip_prefix(SCHEME_PREFIX) else {
            return Err(ControllerError::SpiffeIdError(format!(
                "scheme is missing or invalid in {:?}",
                value
            )));
        };
        let (trust_domain, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let trust_domain = TrustDomain::parse(trust_domain)?;
        Self::from_path(&trust_domain, path)
    }

    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", SCHEME_PREFIX, self.trust_domain, self.path)
    }
}

fn is_trust_domain_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_')
}

fn is_path_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_')
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(ControllerError::SpiffeIdError(
            "path must have a leading slash".to_string(),
        ));
    };

    for segment in rest.split('/') {
        match segment {
            "" => {
                return Err(ControllerError::SpiffeIdError(
                    "path cannot contain empty segments".to_string(),
                ))
            }
            "." | ".." => {
                return Err(ControllerError::SpiffeIdError(
                    "path cannot contain dot segments".to_string(),
                ))
            }
            s if !s.chars().all(is_path_char) => {
                return Err(ControllerError::SpiffeIdError(
                    "path segment characters are limited to letters, numbers, dots, dashes, and underscores"
                        .to_string(),
                ))
            }
            _ => {}
        }
    }

    Ok(())
}
