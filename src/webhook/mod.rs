// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Admission webhook serving: certificate lifecycle, TLS transport and handlers.

pub mod admission;
pub mod manager;
pub mod server;

pub use manager::{WebhookManager, WebhookManagerConfig};
pub use server::{TlsVersion, WebhookServer, WebhookServerOptions};
