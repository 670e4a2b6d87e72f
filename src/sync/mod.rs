// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic entry and federation passes, triggered by the reconcilers.

pub mod entries;
pub mod federation;
pub mod trigger;

pub use entries::{entry_reconciler, EntryReconciler, EntryReconcilerConfig};
pub use federation::{
    federation_relationship_reconciler, FederationRelationshipReconciler,
    FederationRelationshipReconcilerConfig,
};
pub use trigger::{trigger_channel, TriggerListener, Triggerer};
