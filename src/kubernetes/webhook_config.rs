// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Access to the ValidatingWebhookConfiguration that fronts the admission webhooks

use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::ByteString;
use kube::{api::PostParams, Api, Client};
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WebhookConfigClient: Send + Sync {
    /// DNS name of the service every webhook in the configuration points at
    async fn service_dns_name(&self, name: &str) -> Result<String>;

    /// Point every webhook at the given CA bundle. Returns false when nothing changed.
    async fn set_ca_bundle(&self, name: &str, ca_bundle: &[u8]) -> Result<bool>;
}

/// Direct, uncached client for webhook configurations
pub struct KubeWebhookConfigClient {
    api: Api<ValidatingWebhookConfiguration>,
}

impl KubeWebhookConfigClient {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl WebhookConfigClient for KubeWebhookConfigClient {
    #[instrument(skip(self))]
    async fn service_dns_name(&self, name: &str) -> Result<String> {
        let config = self.api.get(name).await?;
        webhook_service_dns_name(&config)
    }

    #[instrument(skip(self, ca_bundle))]
    async fn set_ca_bundle(&self, name: &str, ca_bundle: &[u8]) -> Result<bool> {
        let mut config = self.api.get(name).await?;
        if !apply_ca_bundle(&mut config, ca_bundle) {
            debug!("Webhook configuration {} already has the current CA bundle", name);
            return Ok(false);
        }

        self.api
            .replace(name, &PostParams::default(), &config)
            .await?;
        Ok(true)
    }
}

/// Resolve `<service>.<namespace>.svc` from the webhooks' client configs.
/// All webhooks must reference the same service.
pub fn webhook_service_dns_name(config: &ValidatingWebhookConfiguration) -> Result<String> {
    let webhooks = config.webhooks.as_deref().unwrap_or_default();
    let mut dns_name: Option<String> = None;

    for webhook in webhooks {
        let Some(service) = webhook.client_config.service.as_ref() else {
            return Err(ControllerError::WebhookConfigError(format!(
                "webhook {} does not reference a service",
                webhook.name
            )));
        };

        let name = format!("{}.{}.svc", service.name, service.namespace);
        match &dns_name {
            Some(existing) if *existing != name => {
                return Err(ControllerError::WebhookConfigError(format!(
                    "webhooks reference different services: {} and {}",
                    existing, name
                )));
            }
            Some(_) => {}
            None => dns_name = Some(name),
        }
    }

    dns_name.ok_or_else(|| {
        ControllerError::WebhookConfigError("webhook configuration has no webhooks".to_string())
    })
}

/// Set the CA bundle on every webhook; returns whether anything changed
pub fn apply_ca_bundle(config: &mut ValidatingWebhookConfiguration, ca_bundle: &[u8]) -> bool {
    let mut changed = false;
    for webhook in config.webhooks.iter_mut().flatten() {
        let current = webhook.client_config.ca_bundle.as_ref().map(|b| b.0.as_slice());
        if current != Some(ca_bundle) {
            webhook.client_config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{not_found_json, MockService};
    use k8s_openapi::api::admissionregistration::v1::{
        ServiceReference, ValidatingWebhook, WebhookClientConfig,
    };
    use kube::api::ObjectMeta;

    fn make_webhook(name: &str, service: Option<(&str, &str)>) -> ValidatingWebhook {
        ValidatingWebhook {
            name: name.to_string(),
            client_config: WebhookClientConfig {
                service: service.map(|(name, namespace)| ServiceReference {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_config(webhooks: Vec<ValidatingWebhook>) -> ValidatingWebhookConfiguration {
        ValidatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some("spire-controller-manager-webhook".to_string()),
                ..Default::default()
            },
            webhooks: Some(webhooks),
        }
    }

    #[test]
    fn test_dns_name_from_shared_service() {
        let config = make_config(vec![
            make_webhook("vclusterspiffeid.kb.io", Some(("scm-webhook", "spire-system"))),
            make_webhook("vclusterfederatedtrustdomain.kb.io", Some(("scm-webhook", "spire-system"))),
        ]);

        assert_eq!(
            webhook_service_dns_name(&config).unwrap(),
            "scm-webhook.spire-system.svc"
        );
    }

    #[test]
    fn test_dns_name_rejects_mixed_services() {
        let config = make_config(vec![
            make_webhook("a", Some(("one", "spire-system"))),
            make_webhook("b", Some(("two", "spire-system"))),
        ]);

        assert!(webhook_service_dns_name(&config).is_err());
    }

    #[test]
    fn test_dns_name_rejects_url_webhooks() {
        let config = make_config(vec![make_webhook("a", None)]);
        assert!(webhook_service_dns_name(&config).is_err());
    }

    #[test]
    fn test_dns_name_requires_webhooks() {
        let config = make_config(vec![]);
        assert!(webhook_service_dns_name(&config).is_err());
    }

    #[test]
    fn test_apply_ca_bundle_reports_changes() {
        let mut config = make_config(vec![
            make_webhook("a", Some(("svc", "ns"))),
            make_webhook("b", Some(("svc", "ns"))),
        ]);

        assert!(apply_ca_bundle(&mut config, b"bundle-1"));
        assert!(!apply_ca_bundle(&mut config, b"bundle-1"));
        assert!(apply_ca_bundle(&mut config, b"bundle-2"));

        for webhook in config.webhooks.unwrap() {
            assert_eq!(webhook.client_config.ca_bundle.unwrap().0, b"bundle-2".to_vec());
        }
    }

    const CONFIG_PATH: &str =
        "/apis/admissionregistration.k8s.io/v1/validatingwebhookconfigurations/spire-controller-manager-webhook";

    fn config_json(ca_bundle: Option<&[u8]>) -> String {
        let mut webhook = make_webhook("vclusterspiffeid.kb.io", Some(("scm-webhook", "spire-system")));
        webhook.client_config.ca_bundle = ca_bundle.map(|b| ByteString(b.to_vec()));
        let mut config = make_config(vec![webhook]);
        config.metadata.resource_version = Some("7".to_string());
        serde_json::to_string(&config).unwrap()
    }

    #[tokio::test]
    async fn test_client_resolves_service_name() {
        let client = MockService::new()
            .on_get(CONFIG_PATH, 200, &config_json(None))
            .into_client();

        let name = KubeWebhookConfigClient::new(client)
            .service_dns_name("spire-controller-manager-webhook")
            .await
            .unwrap();
        assert_eq!(name, "scm-webhook.spire-system.svc");
    }

    #[tokio::test]
    async fn test_client_replaces_stale_bundle() {
        let mock = MockService::new()
            .on_get(CONFIG_PATH, 200, &config_json(Some(b"old")))
            .on_put(CONFIG_PATH, 200, &config_json(Some(b"new")));
        let client = KubeWebhookConfigClient::new(mock.clone().into_client());

        assert!(client
            .set_ca_bundle("spire-controller-manager-webhook", b"new")
            .await
            .unwrap());
        assert!(mock.requests().iter().any(|(method, _)| method == "PUT"));
    }

    #[tokio::test]
    async fn test_client_skips_current_bundle() {
        let mock = MockService::new().on_get(CONFIG_PATH, 200, &config_json(Some(b"same")));
        let client = KubeWebhookConfigClient::new(mock.clone().into_client());

        assert!(!client
            .set_ca_bundle("spire-controller-manager-webhook", b"same")
            .await
            .unwrap());
        assert!(mock.requests().iter().all(|(method, _)| method == "GET"));
    }

    #[tokio::test]
    async fn test_client_missing_configuration() {
        let client = MockService::new()
            .on_get(
                CONFIG_PATH,
                404,
                &not_found_json("validatingwebhookconfigurations", "spire-controller-manager-webhook"),
            )
            .into_client();

        let err = KubeWebhookConfigClient::new(client)
            .service_dns_name("spire-controller-manager-webhook")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::KubeError(_)));
    }
}
