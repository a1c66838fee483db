// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker clients and the [`MessageBus`] seam.
//!
//! Everything above this module (the RPC engine, the mediator, the HTTP
//! adapter) talks to a broker through [`MessageBus`]: fire-and-forget
//! publishes and handler subscriptions with MQTT-style wildcard filters.
//! [`MqttBroker`] implements the trait over a real session; [`MemoryBus`]
//! implements it in-process for tests and loopback wiring.

mod memory;
mod mqtt;
mod subscriptions;

use std::sync::Arc;

pub use memory::MemoryBus;
pub use mqtt::{MqttBroker, MqttBrokerBuilder};
pub(crate) use subscriptions::SubscriptionTable;

use crate::error::ProtocolError;

/// A message delivered to subscription handlers.
#[derive(Debug, Clone)]
pub struct Publication {
    /// The full topic the message arrived on.
    pub topic: String,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// A subscription callback.
///
/// Handlers run on the broker's delivery path and must not block: anything
/// that awaits (an RPC call, file I/O) is spawned onto a task. Multiple
/// handlers may match one message; each is invoked, in no specified order.
pub type Handler = Arc<dyn Fn(&Publication) + Send + Sync>;

/// One logical session to a message broker.
///
/// Publishes are quality-of-service 0: success means the local client
/// accepted the message, not that anyone received it.
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes a payload to a topic, fire-and-forget.
    ///
    /// # Errors
    ///
    /// Fails when the session is down or the client rejects the message;
    /// nothing is queued for later delivery.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError>;

    /// Registers a handler for a topic filter.
    ///
    /// The filter may contain `+` (exactly one segment) and a trailing `#`
    /// (one or more segments).
    ///
    /// # Errors
    ///
    /// Fails when the subscription cannot be registered with the broker.
    fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), ProtocolError>;
}
