// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process implementation of [`MessageBus`].
//!
//! `MemoryBus` delivers publications synchronously to every matching
//! handler, with the same filter semantics as the MQTT client. The test
//! suite wires RPC engines, mediators, and stub devices onto shared
//! `MemoryBus` instances instead of standing up brokers.

use crate::broker::{Handler, MessageBus, Publication, SubscriptionTable};
use crate::error::ProtocolError;

/// A broker that lives entirely inside the process.
#[derive(Default)]
pub struct MemoryBus {
    subscriptions: SubscriptionTable,
}

impl MemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        let publication = Publication {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        self.subscriptions.dispatch(&publication);
        Ok(())
    }

    fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), ProtocolError> {
        self.subscriptions.add(filter, handler);
        Ok(())
    }
}
