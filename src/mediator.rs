// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The mediator router.
//!
//! Bridges the local broker (where devices live) to the remote broker
//! (where the controller lives):
//!
//! - device announcements are ingested into the registry and forwarded
//!   upstream on the shared global topic
//! - status telemetry passes through verbatim on the same topic
//! - local RPC responses are mirrored upstream under the cloud prefix
//! - remote commands are dispatched as local RPC calls, and exactly one
//!   correlated response is published back upstream
//! - registry queries on `<prefix>/mediator/devices/get` are answered from
//!   the in-memory registry
//!
//! Every handler runs in isolation: parse failures are logged and dropped
//! (a malformed command appears as a timeout to its caller), and RPC
//! dispatch rides its own task so one slow device never stalls delivery.

use std::sync::Arc;

use serde_json::Value;

use crate::broker::{MessageBus, Publication};
use crate::error::Result;
use crate::registry::DeviceRegistry;
use crate::rpc::{Envelope, RpcEngine};
use crate::topic::{
    self, ANNOUNCE_TOPIC, COMMAND_METHODS, MEDIATOR_DEVICE, NO_REQUEST_ID, RESPONSE_BASES,
    STATUS_BASES,
};

/// Bridges a local and a remote broker.
pub struct Mediator<L: MessageBus, R: MessageBus> {
    local: Arc<L>,
    remote: Arc<R>,
    rpc: Arc<RpcEngine<L>>,
    registry: Arc<DeviceRegistry>,
    prefix: String,
}

impl<L: MessageBus, R: MessageBus> Mediator<L, R> {
    /// Wires every subscription and returns the running router.
    ///
    /// # Errors
    ///
    /// Returns an error when any subscription cannot be registered.
    pub fn start(
        local: Arc<L>,
        remote: Arc<R>,
        rpc: Arc<RpcEngine<L>>,
        registry: Arc<DeviceRegistry>,
        prefix: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let mediator = Arc::new(Self {
            local,
            remote,
            rpc,
            registry,
            prefix: prefix.into(),
        });
        mediator.subscribe_local()?;
        mediator.subscribe_remote()?;
        tracing::info!(prefix = %mediator.prefix, "mediator router started");
        Ok(mediator)
    }

    /// Returns the registry this router feeds.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    fn subscribe_local(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        self.local.subscribe(
            ANNOUNCE_TOPIC,
            Arc::new(move |publication: &Publication| this.on_announce(publication)),
        )?;

        for base in STATUS_BASES {
            let this = Arc::clone(self);
            self.local.subscribe(
                &format!("+/{base}/status"),
                Arc::new(move |publication: &Publication| {
                    // Telemetry stays addressable under the same topic on
                    // both brokers.
                    this.forward_upstream(&publication.topic, &publication.payload);
                }),
            )?;
        }

        for base in RESPONSE_BASES {
            let this = Arc::clone(self);
            self.local.subscribe(
                &format!("+/{base}/response/+"),
                Arc::new(move |publication: &Publication| {
                    let mirrored = topic::prefixed(&this.prefix, &publication.topic);
                    this.forward_upstream(&mirrored, &publication.payload);
                }),
            )?;
        }

        Ok(())
    }

    fn subscribe_remote(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        self.remote.subscribe(
            &topic::prefixed(&self.prefix, &format!("{MEDIATOR_DEVICE}/devices/get")),
            Arc::new(move |publication: &Publication| this.on_registry_query(publication)),
        )?;

        for method in COMMAND_METHODS {
            let this = Arc::clone(self);
            self.remote.subscribe(
                &topic::prefixed(&self.prefix, &format!("+/{method}")),
                Arc::new(move |publication: &Publication| this.on_command(publication)),
            )?;
        }

        Ok(())
    }

    /// Ingests a device announcement and forwards it upstream.
    fn on_announce(&self, publication: &Publication) {
        let announcement: Value = match serde_json::from_slice(&publication.payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed announcement");
                return;
            }
        };

        match announcement
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            Some(device_id) => {
                tracing::info!(device = %device_id, "device announced");
                self.registry.upsert(device_id, announcement.clone());
                let registry = Arc::clone(&self.registry);
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = registry.save() {
                        tracing::warn!(error = %e, "registry save failed");
                    }
                });
            }
            None => tracing::debug!("announcement without device id, not registered"),
        }

        // Announcements use the shared global topic upstream as well.
        self.forward_upstream(ANNOUNCE_TOPIC, &publication.payload);
    }

    /// Answers a registry query with the full device list.
    fn on_registry_query(&self, publication: &Publication) {
        let request_id = match serde_json::from_slice::<Value>(&publication.payload) {
            Ok(query) => query
                .get("requestId")
                .and_then(Value::as_str)
                .unwrap_or(NO_REQUEST_ID)
                .to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed registry query");
                return;
            }
        };

        let devices = self.registry.list();
        tracing::debug!(request_id = %request_id, devices = devices.len(), "registry query");
        let reply_topic =
            topic::response_topic(&self.prefix, MEDIATOR_DEVICE, "devices", &request_id);
        self.publish_envelope(&reply_topic, &Envelope::result(request_id, Value::Array(devices)));
    }

    /// Dispatches a remote command as a local RPC call.
    fn on_command(self: &Arc<Self>, publication: &Publication) {
        let Some((device_id, method)) = topic::split_command(&publication.topic, &self.prefix)
        else {
            tracing::debug!(topic = %publication.topic, "command topic outside prefix");
            return;
        };

        let command: Value = match serde_json::from_slice(&publication.payload) {
            Ok(value) => value,
            Err(e) => {
                // No response: a malformed command surfaces to its caller
                // as a timeout rather than stalling the queue.
                tracing::warn!(
                    topic = %publication.topic,
                    error = %e,
                    "dropping malformed command"
                );
                return;
            }
        };

        let request_id = command
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or(NO_REQUEST_ID)
            .to_string();
        let params = command
            .get("params")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let this = Arc::clone(self);
        let device_id = device_id.to_string();
        let method = method.to_string();
        tokio::spawn(async move {
            let base = topic::method_base(&method).to_string();
            tracing::debug!(
                device = %device_id,
                method = %method,
                request_id = %request_id,
                "dispatching command"
            );

            let envelope = match this.rpc.call(&device_id, &method, params).await {
                Ok(result) => Envelope::result(&request_id, result),
                Err(e) => {
                    tracing::warn!(
                        device = %device_id,
                        method = %method,
                        error = %e,
                        "command dispatch failed"
                    );
                    Envelope::error(&request_id, e.to_string())
                }
            };

            let reply_topic = topic::response_topic(&this.prefix, &device_id, &base, &request_id);
            this.publish_envelope(&reply_topic, &envelope);
        });
    }

    /// Publishes raw bytes upstream; failures are logged, never raised.
    fn forward_upstream(&self, topic: &str, payload: &[u8]) {
        tracing::trace!(topic = %topic, "forwarding upstream");
        if let Err(e) = self.remote.publish(topic, payload) {
            tracing::warn!(topic = %topic, error = %e, "upstream publish failed");
        }
    }

    /// Serializes and publishes a synthesized envelope upstream.
    fn publish_envelope(&self, topic: &str, envelope: &Envelope) {
        match envelope.to_bytes() {
            Ok(payload) => self.forward_upstream(topic, &payload),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "envelope serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::broker::MemoryBus;
    use crate::rpc::RpcConfig;

    struct Harness {
        local: Arc<MemoryBus>,
        remote: Arc<MemoryBus>,
        mediator: Arc<Mediator<MemoryBus, MemoryBus>>,
    }

    fn harness(registry: Arc<DeviceRegistry>, timeout_ms: u64, max_retries: u32) -> Harness {
        let local = Arc::new(MemoryBus::new());
        let remote = Arc::new(MemoryBus::new());
        let rpc = Arc::new(
            RpcEngine::new(
                Arc::clone(&local),
                RpcConfig {
                    prefix: String::new(),
                    timeout: Duration::from_millis(timeout_ms),
                    max_retries,
                },
            )
            .unwrap(),
        );
        let mediator = Mediator::start(
            Arc::clone(&local),
            Arc::clone(&remote),
            rpc,
            registry,
            "devices",
        )
        .unwrap();
        Harness {
            local,
            remote,
            mediator,
        }
    }

    fn fresh_registry() -> Arc<DeviceRegistry> {
        let dir = tempfile::tempdir().unwrap().keep();
        Arc::new(DeviceRegistry::load(dir.join("devices.json")))
    }

    /// Captures publications on a bus filter into an mpsc channel.
    fn watch(bus: &Arc<MemoryBus>, filter: &str) -> mpsc::UnboundedReceiver<Publication> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(
            filter,
            Arc::new(move |publication: &Publication| {
                let _ = tx.send(publication.clone());
            }),
        )
        .unwrap();
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Publication>) -> Publication {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for publication")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn announce_is_registered_and_forwarded() {
        let registry = fresh_registry();
        let h = harness(Arc::clone(&registry), 200, 1);
        let mut upstream = watch(&h.remote, "devices/announce");

        h.local
            .publish(ANNOUNCE_TOPIC, br#"{"id":"espD","fw":"0.9"}"#)
            .unwrap();

        let forwarded = next(&mut upstream).await;
        assert_eq!(forwarded.topic, "devices/announce");
        assert_eq!(forwarded.payload, br#"{"id":"espD","fw":"0.9"}"#);
        assert_eq!(registry.get("espD"), Some(json!({"id": "espD", "fw": "0.9"})));

        // The save rides spawn_blocking; wait for the snapshot to land.
        let mut reloaded = DeviceRegistry::load(registry.path());
        for _ in 0..50 {
            if !reloaded.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            reloaded = DeviceRegistry::load(registry.path());
        }
        assert_eq!(reloaded.get("espD"), Some(json!({"id": "espD", "fw": "0.9"})));
    }

    #[tokio::test]
    async fn announce_without_id_is_forwarded_but_not_registered() {
        let registry = fresh_registry();
        let h = harness(Arc::clone(&registry), 200, 1);
        let mut upstream = watch(&h.remote, "devices/announce");

        h.local.publish(ANNOUNCE_TOPIC, br#"{"fw":"0.9"}"#).unwrap();

        next(&mut upstream).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn malformed_announce_is_dropped() {
        let registry = fresh_registry();
        let h = harness(Arc::clone(&registry), 200, 1);
        let mut upstream = watch(&h.remote, "#");

        h.local.publish(ANNOUNCE_TOPIC, b"not-json").unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(upstream.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn status_passes_through_verbatim() {
        let h = harness(fresh_registry(), 200, 1);
        let mut upstream = watch(&h.remote, "espA/bucket/status");

        h.local.publish("espA/bucket/status", br#"{"level":42}"#).unwrap();

        let forwarded = next(&mut upstream).await;
        assert_eq!(forwarded.topic, "espA/bucket/status");
        assert_eq!(forwarded.payload, br#"{"level":42}"#);
    }

    #[tokio::test]
    async fn local_response_is_mirrored_under_prefix() {
        let h = harness(fresh_registry(), 200, 1);
        let mut upstream = watch(&h.remote, "devices/espA/pump/response/+");

        h.local
            .publish(
                "espA/pump/response/r7",
                br#"{"requestId":"r7","result":{"ok":true}}"#,
            )
            .unwrap();

        let forwarded = next(&mut upstream).await;
        assert_eq!(forwarded.topic, "devices/espA/pump/response/r7");
        assert_eq!(forwarded.payload, br#"{"requestId":"r7","result":{"ok":true}}"#);
    }

    #[tokio::test]
    async fn command_is_dispatched_and_answered() {
        let h = harness(fresh_registry(), 500, 3);
        let mut upstream = watch(&h.remote, "devices/espA/pump/response/+");

        // Stub device: answer pump/run on the local broker.
        let device_bus = Arc::clone(&h.local);
        h.local
            .subscribe(
                "espA/pump/run",
                Arc::new(move |publication: &Publication| {
                    let envelope = Envelope::from_bytes(&publication.payload).unwrap();
                    assert_eq!(envelope.params, Some(json!({"duration": 7})));
                    let request_id = envelope.request_id.unwrap();
                    device_bus
                        .publish(
                            &format!("espA/pump/response/{request_id}"),
                            &Envelope::result(&request_id, json!({"ok": true}))
                                .to_bytes()
                                .unwrap(),
                        )
                        .unwrap();
                }),
            )
            .unwrap();

        h.remote
            .publish(
                "devices/espA/pump/run",
                br#"{"requestId":"R1","params":{"duration":7}}"#,
            )
            .unwrap();

        // Two upstream publishes land on this filter: the verbatim mirror
        // of the device's own response (fresh local id) and the correlated
        // command response carrying R1.
        let mut correlated = None;
        for _ in 0..2 {
            let publication = next(&mut upstream).await;
            if publication.topic == "devices/espA/pump/response/R1" {
                correlated = Some(publication);
                break;
            }
        }
        let correlated = correlated.expect("no correlated response upstream");
        let envelope = Envelope::from_bytes(&correlated.payload).unwrap();
        assert_eq!(envelope.request_id.as_deref(), Some("R1"));
        assert_eq!(envelope.result, Some(json!({"ok": true})));
        assert!(envelope.error.is_none());
    }

    #[tokio::test]
    async fn command_without_request_id_is_answered_as_noid() {
        let h = harness(fresh_registry(), 500, 1);
        let mut upstream = watch(&h.remote, "devices/espA/bucket/response/noid");

        let device_bus = Arc::clone(&h.local);
        h.local
            .subscribe(
                "espA/bucket/get",
                Arc::new(move |publication: &Publication| {
                    let envelope = Envelope::from_bytes(&publication.payload).unwrap();
                    let request_id = envelope.request_id.unwrap();
                    device_bus
                        .publish(
                            &format!("espA/bucket/response/{request_id}"),
                            &Envelope::result(&request_id, json!({"level": 1}))
                                .to_bytes()
                                .unwrap(),
                        )
                        .unwrap();
                }),
            )
            .unwrap();

        h.remote
            .publish("devices/espA/bucket/get", br#"{"params":{}}"#)
            .unwrap();

        let publication = next(&mut upstream).await;
        let envelope = Envelope::from_bytes(&publication.payload).unwrap();
        assert_eq!(envelope.request_id.as_deref(), Some("noid"));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_device_gets_timeout_error_envelope() {
        let h = harness(fresh_registry(), 2_000, 3);
        let mut upstream = watch(&h.remote, "devices/espC/bucket/response/+");

        let request_count = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&request_count);
        h.local
            .subscribe(
                "espC/bucket/get",
                Arc::new(move |_: &Publication| {
                    *counter.lock() += 1;
                }),
            )
            .unwrap();

        h.remote
            .publish(
                "devices/espC/bucket/get",
                br#"{"requestId":"R9","params":{}}"#,
            )
            .unwrap();

        let publication = next(&mut upstream).await;
        assert_eq!(publication.topic, "devices/espC/bucket/response/R9");
        let envelope = Envelope::from_bytes(&publication.payload).unwrap();
        assert_eq!(envelope.request_id.as_deref(), Some("R9"));
        assert_eq!(envelope.error.as_deref(), Some("RPC failed after 3 retries"));
        assert!(envelope.result.is_none());
        assert_eq!(*request_count.lock(), 3, "one local publish per attempt");
    }

    #[tokio::test]
    async fn malformed_command_produces_no_response_and_no_waiter() {
        let h = harness(fresh_registry(), 200, 1);
        let mut responses = watch(&h.remote, "devices/+/+/response/+");

        h.remote.publish("devices/espA/pump/run", b"not-json").unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(responses.try_recv().is_err());
    }

    #[tokio::test]
    async fn registry_query_returns_device_list() {
        let registry = fresh_registry();
        registry.upsert("espA", json!({"id": "espA", "fw": "1"}));
        registry.upsert("espB", json!({"id": "espB", "fw": "2"}));
        let h = harness(registry, 200, 1);
        let mut upstream = watch(&h.remote, "devices/mediator/devices/response/+");

        h.remote
            .publish("devices/mediator/devices/get", br#"{"requestId":"R5"}"#)
            .unwrap();

        let publication = next(&mut upstream).await;
        assert_eq!(publication.topic, "devices/mediator/devices/response/R5");
        let envelope = Envelope::from_bytes(&publication.payload).unwrap();
        assert_eq!(envelope.request_id.as_deref(), Some("R5"));
        let devices = envelope.result.unwrap();
        let devices = devices.as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.contains(&json!({"id": "espA", "fw": "1"})));
        assert!(devices.contains(&json!({"id": "espB", "fw": "2"})));
    }

    #[tokio::test]
    async fn handler_isolation_survives_mixed_traffic() {
        let registry = fresh_registry();
        let h = harness(Arc::clone(&registry), 200, 1);
        let mut upstream = watch(&h.remote, "espA/wifi/status");

        // A malformed announcement must not prevent later routing.
        h.local.publish(ANNOUNCE_TOPIC, b"garbage").unwrap();
        h.local.publish("espA/wifi/status", br#"{"signal":-60}"#).unwrap();

        let forwarded = next(&mut upstream).await;
        assert_eq!(forwarded.topic, "espA/wifi/status");

        let _ = h.mediator.registry();
    }
}
