// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud controller process.
//!
//! Serves the HTTP API and translates each route into an RPC call over the
//! remote broker. Exits non-zero when the bind or the initial broker
//! connect fails.

use std::sync::Arc;

use anyhow::Context;
use aquaduct::broker::MqttBroker;
use aquaduct::{ControllerConfig, RpcEngine, api};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ControllerConfig::from_env().context("reading configuration")?;
    tracing::info!(
        remote = %config.remote.host,
        prefix = %config.cloud_prefix,
        addr = %config.http_addr,
        "starting controller"
    );

    let remote = Arc::new(
        MqttBroker::connect(&config.remote)
            .await
            .context("connecting to remote broker")?,
    );
    let rpc = Arc::new(RpcEngine::new(Arc::clone(&remote), config.remote_rpc())?);

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "HTTP API listening");

    axum::serve(listener, api::router(rpc))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP API")?;

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
