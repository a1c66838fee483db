// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT implementation of [`MessageBus`] over `rumqttc`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::oneshot;

use crate::broker::{Handler, MessageBus, Publication, SubscriptionTable};
use crate::config::BrokerSettings;
use crate::error::ProtocolError;

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// First reconnect delay after a session error.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delay cap.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One session to an MQTT broker.
///
/// The first connect blocks until the broker acknowledges the session (or
/// the connection timeout fires). After that a background task keeps the
/// session alive: on errors it backs off exponentially up to [`MAX_BACKOFF`],
/// and on every reconnect it re-issues all registered subscriptions.
///
/// `MqttBroker` is cheaply cloneable (via `Arc`) and can be shared between
/// the RPC engine and the mediator router.
///
/// # Examples
///
/// ```no_run
/// use aquaduct::broker::MqttBroker;
///
/// # async fn example() -> aquaduct::Result<()> {
/// let broker = MqttBroker::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .credentials("user", "password")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MqttBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    client: AsyncClient,
    subscriptions: SubscriptionTable,
    connected: AtomicBool,
    closed: AtomicBool,
    host: String,
    port: u16,
}

impl MqttBroker {
    /// Creates a new builder for configuring a broker session.
    #[must_use]
    pub fn builder() -> MqttBrokerBuilder {
        MqttBrokerBuilder::default()
    }

    /// Connects using the given settings with the default keepalive.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial connect fails.
    pub async fn connect(settings: &BrokerSettings) -> Result<Self, ProtocolError> {
        let mut builder = Self::builder().host(&settings.host).port(settings.port);
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(username, password);
        }
        builder.build().await
    }

    /// Returns whether the session is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Stops the background session. No handler is invoked after this
    /// returns from the caller's perspective; in-flight deliveries on the
    /// session task finish first.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subscriptions.clear();
        if let Err(e) = self.inner.client.disconnect().await {
            tracing::debug!(error = %e, "disconnect after close");
        }
        self.inner.connected.store(false, Ordering::Release);
    }
}

impl MessageBus for MqttBroker {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        tracing::trace!(topic = %topic, bytes = payload.len(), "publishing");
        self.inner
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(ProtocolError::Mqtt)
    }

    fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), ProtocolError> {
        self.inner.subscriptions.add(filter, handler);
        self.inner
            .client
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(ProtocolError::Mqtt)
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Drives the broker session: delivery, reconnect, re-subscription.
async fn run_session(
    mut event_loop: EventLoop,
    inner: Arc<BrokerInner>,
    mut connack_tx: Option<oneshot::Sender<()>>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if inner.closed.load(Ordering::Acquire) {
            break;
        }

        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, host = %inner.host, "broker session established");
                inner.connected.store(true, Ordering::Release);
                backoff = INITIAL_BACKOFF;
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
                resubscribe(&inner).await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let publication = Publication {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                inner.subscriptions.dispatch(&publication);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!(host = %inner.host, "broker requested disconnect");
                inner.connected.store(false, Ordering::Release);
            }
            Ok(_) => {}
            Err(e) => {
                inner.connected.store(false, Ordering::Release);
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                tracing::warn!(
                    host = %inner.host,
                    error = %e,
                    delay = ?backoff,
                    "broker session error, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    tracing::debug!(host = %inner.host, "broker session task stopped");
}

/// Re-issues every registered subscription after a (re)connect.
async fn resubscribe(inner: &BrokerInner) {
    for filter in inner.subscriptions.filters() {
        if let Err(e) = inner.client.subscribe(&filter, QoS::AtMostOnce).await {
            tracing::warn!(filter = %filter, error = %e, "re-subscription failed");
        }
    }
}

/// Builder for an MQTT broker session.
#[derive(Debug)]
pub struct MqttBrokerBuilder {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
}

impl Default for MqttBrokerBuilder {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl MqttBrokerBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 60 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Sets the initial connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;
        self
    }

    /// Builds the session and blocks until the broker acknowledges it.
    ///
    /// # Errors
    ///
    /// Returns an error when the host is missing, the connection fails, or
    /// the broker does not acknowledge within the connection timeout.
    pub async fn build(self) -> Result<MqttBroker, ProtocolError> {
        if self.host.is_empty() {
            return Err(ProtocolError::ConnectionFailed(
                "broker host is required".to_string(),
            ));
        }

        let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("aquaduct_{}_{}", std::process::id(), counter);

        let mut options = MqttOptions::new(&client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((ref username, ref password)) = self.credentials {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 64);

        let inner = Arc::new(BrokerInner {
            client,
            subscriptions: SubscriptionTable::new(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            host: self.host.clone(),
            port: self.port,
        });

        let (connack_tx, connack_rx) = oneshot::channel();
        tokio::spawn(run_session(event_loop, Arc::clone(&inner), Some(connack_tx)));

        match tokio::time::timeout(self.connection_timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(host = %self.host, port = self.port, "connected to broker");
            }
            Ok(Err(_)) => {
                return Err(ProtocolError::ConnectionFailed(
                    "broker session task terminated unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                inner.closed.store(true, Ordering::Release);
                return Err(ProtocolError::ConnectionFailed(format!(
                    "no ConnAck from {}:{} within {}s",
                    self.host,
                    self.port,
                    self.connection_timeout.as_secs()
                )));
            }
        }

        Ok(MqttBroker { inner })
    }
}
