// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Coalescing trigger between reconcilers and the background sync passes.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Handle used by reconcilers to request a sync pass
#[derive(Clone, Debug)]
pub struct Triggerer {
    tx: mpsc::Sender<()>,
}

/// Receiving end owned by the sync runnable
#[derive(Debug)]
pub struct TriggerListener {
    rx: mpsc::Receiver<()>,
}

/// Triggers fired while a pass is pending collapse into a single pass.
pub fn trigger_channel() -> (Triggerer, TriggerListener) {
    let (tx, rx) = mpsc::channel(1);
    (Triggerer { tx }, TriggerListener { rx })
}

impl Triggerer {
    pub fn trigger(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => debug!("Sync pass listener is gone, dropping trigger"),
        }
    }
}

impl TriggerListener {
    /// Wait for the next trigger. Returns false once every triggerer is dropped.
    pub async fn triggered(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
