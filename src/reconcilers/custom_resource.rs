// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconcilers for the spire.spiffe.io resources - any change triggers a sync pass.

use crate::error::{ControllerError, Result};
use crate::runtime::Manager;
use crate::sync::Triggerer;
use crate::types::{ClusterFederatedTrustDomain, ClusterSPIFFEID, ClusterStaticEntry};
use futures::StreamExt;
use kube::{
    runtime::{controller::Action, watcher, Controller},
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct TriggerReconciler<K> {
    client: Client,
    triggerer: Triggerer,
    _kind: PhantomData<fn() -> K>,
}

pub type ClusterSPIFFEIDReconciler = TriggerReconciler<ClusterSPIFFEID>;
pub type ClusterStaticEntryReconciler = TriggerReconciler<ClusterStaticEntry>;
pub type ClusterFederatedTrustDomainReconciler = TriggerReconciler<ClusterFederatedTrustDomain>;

impl<K> TriggerReconciler<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(client: Client, triggerer: Triggerer) -> Self {
        Self {
            client,
            triggerer,
            _kind: PhantomData,
        }
    }

    pub fn setup_with_manager(self, manager: &mut Manager) -> Result<()> {
        let name = K::kind(&()).to_string();
        manager.add_controller(&name, self.run());
        Ok(())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let api: Api<K> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(api, watcher::Config::default())
            .run(reconcile::<K>, error_policy::<K>, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled {}: {:?}", K::kind(&()), o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

async fn reconcile<K>(obj: Arc<K>, ctx: Arc<TriggerReconciler<K>>) -> std::result::Result<Action, ControllerError>
where
    K: Resource<DynamicType = ()>,
{
    debug!("{} {} changed, triggering sync", K::kind(&()), obj.name_any());
    ctx.triggerer.trigger();
    Ok(Action::await_change())
}

fn error_policy<K>(_obj: Arc<K>, error: &ControllerError, _ctx: Arc<TriggerReconciler<K>>) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(60))
}
