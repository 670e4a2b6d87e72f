// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spire_controller_manager::config::{Args, ControllerManagerConfig};
use spire_controller_manager::constants::OPERATOR_NAME;
use spire_controller_manager::startup::{self, Outcome};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        error!("Failed to install the TLS crypto provider");
        return ExitCode::FAILURE;
    }

    let args = Args::parse();

    // Required fields are validated before anything touches the network
    let config = match ControllerManagerConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("unable to load the config: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = config.with_detected_cluster_domain().await;
    config.log_summary();

    info!("Starting {}", OPERATOR_NAME);

    match startup::run(config).await {
        Ok(Outcome::Shutdown) => {
            info!("{} stopped", OPERATOR_NAME);
            ExitCode::SUCCESS
        }
        Ok(Outcome::Restart) => {
            info!("Exiting so {} restarts with every CRD installed", OPERATOR_NAME);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
