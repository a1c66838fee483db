// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment-driven configuration.
//!
//! Both processes are configured entirely through environment variables:
//!
//! | Variable | Default |
//! |---|---|
//! | `LOCAL_BROKER_HOST` / `_PORT` / `_USER` / `_PASS` | port 1883, no credentials |
//! | `VM_BROKER_HOST` / `_PORT` / `_USER` / `_PASS` | port 1883, no credentials |
//! | `VM_BASE_PREFIX` | `devices` |
//! | `REGISTRY_PATH` | `/data/devices.json` |
//! | `RPC_TIMEOUT` (seconds) | `8` |
//! | `RPC_MAX_RETRIES` | `3` |
//! | `HTTP_ADDR` | `0.0.0.0:8000` |
//!
//! Hosts are required; anything else falls back to its default. A set but
//! unparseable value is a [`ConfigError`] and fatal at startup.
//!
//! Parsing is written against a lookup function rather than the process
//! environment so tests can feed maps instead of mutating globals.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::rpc::RpcConfig;

/// Connection settings for one broker.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
}

/// Configuration for the mediator process.
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// The broker devices talk to.
    pub local: BrokerSettings,
    /// The upstream broker.
    pub remote: BrokerSettings,
    /// Topic prefix the remote broker mirrors local traffic under.
    pub cloud_prefix: String,
    /// Path of the registry snapshot.
    pub registry_path: PathBuf,
    /// Per-attempt RPC timeout.
    pub rpc_timeout: Duration,
    /// RPC attempts before giving up.
    pub rpc_max_retries: u32,
}

impl MediatorConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a set value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            local: broker_settings(get, "LOCAL_BROKER")?,
            remote: broker_settings(get, "VM_BROKER")?,
            cloud_prefix: get("VM_BASE_PREFIX").unwrap_or_else(|| "devices".to_string()),
            registry_path: get("REGISTRY_PATH")
                .map_or_else(|| PathBuf::from("/data/devices.json"), PathBuf::from),
            rpc_timeout: Duration::from_secs(parsed(get, "RPC_TIMEOUT", 8)?),
            rpc_max_retries: parsed(get, "RPC_MAX_RETRIES", 3)?,
        })
    }

    /// RPC tuning for the mediator's local engine (no prefix: the local
    /// broker carries bare device topics).
    #[must_use]
    pub fn local_rpc(&self) -> RpcConfig {
        RpcConfig {
            prefix: String::new(),
            timeout: self.rpc_timeout,
            max_retries: self.rpc_max_retries,
        }
    }
}

/// Configuration for the controller process.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// The upstream broker the controller publishes commands to.
    pub remote: BrokerSettings,
    /// Topic prefix on the upstream broker.
    pub cloud_prefix: String,
    /// Bind address of the HTTP API.
    pub http_addr: String,
    /// Per-attempt RPC timeout.
    pub rpc_timeout: Duration,
    /// RPC attempts before giving up.
    pub rpc_max_retries: u32,
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a set value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            remote: broker_settings(get, "VM_BROKER")?,
            cloud_prefix: get("VM_BASE_PREFIX").unwrap_or_else(|| "devices".to_string()),
            http_addr: get("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            rpc_timeout: Duration::from_secs(parsed(get, "RPC_TIMEOUT", 8)?),
            rpc_max_retries: parsed(get, "RPC_MAX_RETRIES", 3)?,
        })
    }

    /// RPC tuning for the controller's engine, prefixed with the cloud
    /// namespace.
    #[must_use]
    pub fn remote_rpc(&self) -> RpcConfig {
        RpcConfig {
            prefix: self.cloud_prefix.clone(),
            timeout: self.rpc_timeout,
            max_retries: self.rpc_max_retries,
        }
    }
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn broker_settings(
    get: &dyn Fn(&str) -> Option<String>,
    prefix: &str,
) -> Result<BrokerSettings, ConfigError> {
    let host_var = format!("{prefix}_HOST");
    let host = get(&host_var).ok_or(ConfigError::Missing(host_var))?;
    Ok(BrokerSettings {
        host,
        port: parsed(get, &format!("{prefix}_PORT"), 1883)?,
        username: get(&format!("{prefix}_USER")),
        password: get(&format!("{prefix}_PASS")),
    })
}

fn parsed<T: FromStr>(
    get: &dyn Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value,
        }),
    }
}
