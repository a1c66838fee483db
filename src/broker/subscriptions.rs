// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handler table keyed by topic filter.
//!
//! Both broker implementations share this table: [`dispatch`] collects the
//! handlers whose filter matches the incoming topic under a read lock, drops
//! the lock, and only then invokes them, so a handler may itself publish or
//! subscribe without deadlocking the delivery path.
//!
//! [`dispatch`]: SubscriptionTable::dispatch

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::broker::{Handler, Publication};
use crate::topic;

/// Registered handlers, grouped by their topic filter.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl SubscriptionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a handler under a filter. Filters accumulate handlers; nothing
    /// is replaced.
    pub(crate) fn add(&self, filter: impl Into<String>, handler: Handler) {
        let filter = filter.into();
        tracing::debug!(filter = %filter, "registering subscription handler");
        self.handlers.write().entry(filter).or_default().push(handler);
    }

    /// Returns every registered filter, for re-subscribing after reconnect.
    pub(crate) fn filters(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Invokes every handler whose filter matches the publication's topic.
    pub(crate) fn dispatch(&self, publication: &Publication) {
        let matching: Vec<Handler> = {
            let handlers = self.handlers.read();
            handlers
                .iter()
                .filter(|(filter, _)| topic::matches(filter, &publication.topic))
                .flat_map(|(_, registered)| registered.iter().cloned())
                .collect()
        };

        if matching.is_empty() {
            tracing::trace!(topic = %publication.topic, "no handler for topic");
            return;
        }

        for handler in matching {
            handler(publication);
        }
    }

    /// Drops every handler. No dispatch after this sees a handler.
    pub(crate) fn clear(&self) {
        self.handlers.write().clear();
    }
}
