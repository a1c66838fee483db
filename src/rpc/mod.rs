// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Correlated request/response RPC over a [`MessageBus`].
//!
//! [`RpcEngine`] turns fire-and-forget topic traffic into calls: each
//! attempt publishes a `{requestId, params}` envelope to
//! `[<prefix>/]<deviceId>/<methodPath>` and awaits the correlated response
//! on `[<prefix>/]<deviceId>/<base>/response/<requestId>`, with a per-call
//! timeout and bounded retries. One wildcard subscription taken at
//! construction covers every response topic; correlation happens through
//! the pending-call table, not through per-call subscriptions.

mod envelope;
mod pending;

use std::sync::Arc;
use std::time::Duration;

pub use envelope::Envelope;
use pending::PendingCalls;
use serde_json::Value;
use uuid::Uuid;

use crate::broker::{MessageBus, Publication};
use crate::error::{Error, Result};
use crate::topic;

/// Tuning for an RPC engine.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Topic prefix for every request and response (empty on the local
    /// broker, the cloud prefix on the remote one).
    pub prefix: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts before a call fails with `Timeout`.
    pub max_retries: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            timeout: Duration::from_secs(8),
            max_retries: 3,
        }
    }
}

/// A correlated RPC client over one broker session.
///
/// `call` is safe to invoke from many tasks concurrently; responses for
/// request ids nobody is waiting on are silently dropped.
pub struct RpcEngine<B: MessageBus> {
    bus: Arc<B>,
    config: RpcConfig,
    pending: Arc<PendingCalls>,
}

impl<B: MessageBus> RpcEngine<B> {
    /// Creates an engine and subscribes to the response wildcard.
    ///
    /// # Errors
    ///
    /// Returns an error when the response subscription cannot be
    /// registered.
    pub fn new(bus: Arc<B>, config: RpcConfig) -> Result<Self> {
        let pending = Arc::new(PendingCalls::new());

        let correlate = Arc::clone(&pending);
        bus.subscribe(
            &topic::response_filter(&config.prefix),
            Arc::new(move |publication: &Publication| {
                let Ok(envelope) = Envelope::from_bytes(&publication.payload) else {
                    tracing::debug!(topic = %publication.topic, "dropping malformed response");
                    return;
                };
                let Some(request_id) = envelope.request_id.clone() else {
                    tracing::debug!(topic = %publication.topic, "dropping response without id");
                    return;
                };
                if !correlate.complete(&request_id, envelope) {
                    tracing::trace!(request_id = %request_id, "no waiter for response");
                }
            }),
        )?;

        Ok(Self {
            bus,
            config,
            pending,
        })
    }

    /// Returns the underlying bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Calls a method on a device with the configured timeout and budget.
    ///
    /// # Errors
    ///
    /// `Timeout` after the retry budget is exhausted, `Device` when the
    /// response envelope carries an `error` field, and any serialization or
    /// publish failure immediately (those are never retried).
    pub async fn call(&self, device_id: &str, method: &str, params: Value) -> Result<Value> {
        self.call_with(
            device_id,
            method,
            params,
            self.config.timeout,
            self.config.max_retries,
        )
        .await
    }

    /// Calls a method with an explicit timeout and retry budget.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with(
        &self,
        device_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Value> {
        let attempts = max_retries.max(1);
        let base = topic::method_base(method);
        let request_topic = topic::request_topic(&self.config.prefix, device_id, method);
        let mut last_response_topic = String::new();

        for attempt in 1..=attempts {
            let request_id = Uuid::new_v4().simple().to_string();
            last_response_topic =
                topic::response_topic(&self.config.prefix, device_id, base, &request_id);

            let (guard, waiter) = self.pending.register(request_id.clone());
            let payload = Envelope::request(&request_id, params.clone()).to_bytes()?;

            tracing::debug!(
                topic = %request_topic,
                request_id = %request_id,
                attempt,
                "publishing RPC request"
            );
            self.bus.publish(&request_topic, &payload)?;

            match tokio::time::timeout(timeout, waiter).await {
                Ok(Ok(envelope)) => {
                    drop(guard);
                    if let Some(message) = envelope.error {
                        return Err(Error::Device(message));
                    }
                    return Ok(envelope.result.unwrap_or(Value::Null));
                }
                Ok(Err(_)) => {
                    return Err(crate::error::ProtocolError::ChannelClosed(
                        "RPC waiter dropped".to_string(),
                    )
                    .into());
                }
                Err(_) => {
                    drop(guard);
                    tracing::debug!(
                        request_id = %request_id,
                        attempt,
                        remaining = attempts - attempt,
                        "RPC attempt timed out"
                    );
                }
            }
        }

        Err(Error::Timeout {
            attempts,
            response_topic: last_response_topic,
        })
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
