// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The pending-call table.
//!
//! One entry per in-flight RPC attempt: a oneshot sender the delivery path
//! signals when the correlated response arrives. Registration hands back a
//! guard that removes the entry when dropped, so no entry outlives its
//! caller — whether the call completed, timed out, or was cancelled by an
//! aborted HTTP request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::rpc::Envelope;

/// Waiters for in-flight RPC attempts, keyed by request id.
#[derive(Default)]
pub(crate) struct PendingCalls {
    waiters: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for a fresh request id.
    ///
    /// Ids are generated with 128 bits of entropy, so a collision would be
    /// a caller bug; an existing entry under the same id is replaced.
    pub(crate) fn register(
        self: &Arc<Self>,
        request_id: String,
    ) -> (PendingGuard, oneshot::Receiver<Envelope>) {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(request_id.clone(), tx);
        let guard = PendingGuard {
            calls: Arc::clone(self),
            request_id,
        };
        (guard, rx)
    }

    /// Signals the waiter registered under `request_id`, if any.
    ///
    /// Returns `false` when no waiter exists (late or unsolicited
    /// responses); the envelope is dropped in that case.
    pub(crate) fn complete(&self, request_id: &str, envelope: Envelope) -> bool {
        let Some(waiter) = self.waiters.lock().remove(request_id) else {
            return false;
        };
        // The receiver may have been dropped between timeout and guard
        // cleanup; that race is indistinguishable from a late response.
        waiter.send(envelope).is_ok()
    }

    fn remove(&self, request_id: &str) {
        self.waiters.lock().remove(request_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Removes the pending entry when the caller's attempt ends.
pub(crate) struct PendingGuard {
    calls: Arc<PendingCalls>,
    request_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.calls.remove(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn complete_unblocks_the_waiter() {
        let calls = Arc::new(PendingCalls::new());
        let (_guard, rx) = calls.register("r1".to_string());

        assert!(calls.complete("r1", Envelope::result("r1", json!(42))));

        let envelope = rx.await.unwrap();
        assert_eq!(envelope.result, Some(json!(42)));
        assert_eq!(calls.len(), 0);
    }

    #[tokio::test]
    async fn complete_unknown_id_is_dropped() {
        let calls = Arc::new(PendingCalls::new());
        assert!(!calls.complete("ghost", Envelope::result("ghost", json!(null))));
    }

    #[tokio::test]
    async fn guard_drop_removes_entry() {
        let calls = Arc::new(PendingCalls::new());
        {
            let (_guard, _rx) = calls.register("r2".to_string());
            assert_eq!(calls.len(), 1);
        }
        assert_eq!(calls.len(), 0);
        assert!(!calls.complete("r2", Envelope::result("r2", json!(null))));
    }

    #[tokio::test]
    async fn waiter_is_signalled_at_most_once() {
        let calls = Arc::new(PendingCalls::new());
        let (_guard, rx) = calls.register("r3".to_string());

        assert!(calls.complete("r3", Envelope::result("r3", json!(1))));
        assert!(!calls.complete("r3", Envelope::result("r3", json!(2))));

        assert_eq!(rx.await.unwrap().result, Some(json!(1)));
    }
}
