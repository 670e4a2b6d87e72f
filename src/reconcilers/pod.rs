// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod reconciler - triggers an entry sync for pods outside the ignored namespaces.

use crate::config::matches_any;
use crate::error::{ControllerError, Result};
use crate::runtime::Manager;
use crate::sync::Triggerer;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    runtime::{controller::Action, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct PodReconciler {
    client: Client,
    triggerer: Triggerer,
    ignore_namespaces: Vec<Regex>,
}

impl PodReconciler {
    pub fn new(client: Client, triggerer: Triggerer, ignore_namespaces: Vec<Regex>) -> Self {
        Self {
            client,
            triggerer,
            ignore_namespaces,
        }
    }

    pub fn setup_with_manager(self, manager: &mut Manager) -> Result<()> {
        manager.add_controller("Pod", self.run());
        Ok(())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(pods, WatcherConfig::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled pod: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

async fn reconcile(pod: Arc<Pod>, ctx: Arc<PodReconciler>) -> std::result::Result<Action, ControllerError> {
    let name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_default();

    if matches_any(&ctx.ignore_namespaces, &namespace) {
        debug!("Ignoring pod {}/{} in ignored namespace", namespace, name);
        return Ok(Action::await_change());
    }

    debug!("Pod {}/{} changed, triggering entry sync", namespace, name);
    ctx.triggerer.trigger();

    Ok(Action::await_change())
}

fn error_policy(_pod: Arc<Pod>, error: &ControllerError, _ctx: Arc<PodReconciler>) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(60))
}
