// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Site-local mediator process.
//!
//! Bridges the local device broker to the remote broker and persists the
//! device registry. Runs until SIGINT/SIGTERM, then saves the registry and
//! exits cleanly.

use std::sync::Arc;

use anyhow::Context;
use aquaduct::broker::MqttBroker;
use aquaduct::{DeviceRegistry, Mediator, MediatorConfig, RpcEngine};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MediatorConfig::from_env().context("reading configuration")?;
    tracing::info!(
        local = %config.local.host,
        remote = %config.remote.host,
        prefix = %config.cloud_prefix,
        registry = %config.registry_path.display(),
        "starting mediator"
    );

    let registry = Arc::new(DeviceRegistry::load(&config.registry_path));

    let local = Arc::new(
        MqttBroker::connect(&config.local)
            .await
            .context("connecting to local broker")?,
    );
    let remote = Arc::new(
        MqttBroker::connect(&config.remote)
            .await
            .context("connecting to remote broker")?,
    );

    let rpc = Arc::new(RpcEngine::new(Arc::clone(&local), config.local_rpc())?);
    let _mediator = Mediator::start(
        Arc::clone(&local),
        Arc::clone(&remote),
        rpc,
        Arc::clone(&registry),
        config.cloud_prefix.clone(),
    )?;

    shutdown_signal().await;

    tracing::info!("shutting down, saving registry");
    if let Err(e) = registry.save() {
        tracing::warn!(error = %e, "final registry save failed");
    }
    local.close().await;
    remote.close().await;
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
