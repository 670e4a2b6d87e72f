// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Generated SPIRE Server API messages and clients. Module nesting mirrors the
//! protobuf packages so the generated cross-package paths resolve.

#[allow(clippy::all)]
pub mod spire {
    pub mod api {
        pub mod types {
            tonic::include_proto!("spire.api.types");
        }

        pub mod server {
            pub mod svid {
                pub mod v1 {
                    tonic::include_proto!("spire.api.server.svid.v1");
                }
            }

            pub mod bundle {
                pub mod v1 {
                    tonic::include_proto!("spire.api.server.bundle.v1");
                }
            }
        }
    }
}

pub use self::spire::api::server::bundle::v1 as bundle;
pub use self::spire::api::server::svid::v1 as svid;
pub use self::spire::api::types;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_mint_response_decodes_chain() {
        let response = svid::MintX509svidResponse {
            svid: Some(types::X509svid {
                id: Some(types::Spiffeid {
                    trust_domain: "example.org".to_string(),
                    path: "/spire-controller-manager-webhook".to_string(),
                }),
                cert_chain: vec![vec![1, 2, 3], vec![4, 5]],
                expires_at: 1_700_000_000,
                hint: String::new(),
            }),
        };

        let decoded =
            svid::MintX509svidResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        let svid = decoded.svid.unwrap();
        assert_eq!(svid.cert_chain.len(), 2);
        assert_eq!(svid.expires_at, 1_700_000_000);
    }

    #[test]
    fn test_bundle_request_mask_limits_output() {
        let request = bundle::GetBundleRequest {
            output_mask: Some(types::BundleMask {
                x509_authorities: true,
                ..Default::default()
            }),
        };
        // tag 1, length-delimited, containing tag 1 varint true
        assert_eq!(request.encode_to_vec(), vec![0x0a, 0x02, 0x08, 0x01]);
    }
}
