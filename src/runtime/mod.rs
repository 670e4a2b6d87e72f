// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Supervised runtime that hosts reconcilers, runnables and probe endpoints.

pub mod health;
pub mod manager;

pub use health::{ping, Checker, HealthChecks};
pub use manager::{Manager, ManagerOptions, Runnable};
