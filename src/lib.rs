// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `aquaduct` - an MQTT control plane for small watering/sensor devices.
//!
//! Three tiers cooperate: devices on a local broker, a site-local
//! **mediator** that bridges the local broker to a remote one, and a cloud
//! **controller** exposing an HTTP API. The crate provides the shared RPC
//! fabric and both processes.
//!
//! # Architecture
//!
//! ```text
//! HTTP client ──► controller (axum) ──► RpcEngine ──► remote broker
//!                                                          │
//!                                       Mediator ◄─────────┘
//!                                       │     ▲
//!                               RpcEngine     │ announce / status /
//!                                       │     │ responses
//!                                       ▼     │
//!                                     local broker ◄──► devices
//! ```
//!
//! The building blocks:
//!
//! - [`broker`] — the [`MessageBus`](broker::MessageBus) seam with an MQTT
//!   implementation and an in-process one for tests
//! - [`rpc`] — correlated request/response calls with timeouts and retries
//! - [`registry`] — the persisted device registry
//! - [`mediator`] — the bridge router
//! - [`api`] — the controller's HTTP surface
//!
//! # Example
//!
//! Calling a device through an in-process bus:
//!
//! ```
//! use std::sync::Arc;
//!
//! use aquaduct::broker::{MemoryBus, MessageBus, Publication};
//! use aquaduct::rpc::{Envelope, RpcConfig, RpcEngine};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> aquaduct::Result<()> {
//! let bus = Arc::new(MemoryBus::new());
//!
//! // A stub device answering bucket/get.
//! let device_bus = Arc::clone(&bus);
//! bus.subscribe(
//!     "espA/bucket/get",
//!     Arc::new(move |publication: &Publication| {
//!         let request = Envelope::from_bytes(&publication.payload).unwrap();
//!         let request_id = request.request_id.unwrap();
//!         let reply = Envelope::result(&request_id, json!({"level": 42}));
//!         let topic = format!("espA/bucket/response/{request_id}");
//!         device_bus.publish(&topic, &reply.to_bytes().unwrap()).unwrap();
//!     }),
//! )?;
//!
//! let rpc = RpcEngine::new(Arc::clone(&bus), RpcConfig::default())?;
//! let level = rpc.call("espA", "bucket/get", json!({})).await?;
//! assert_eq!(level, json!({"level": 42}));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod mediator;
pub mod registry;
pub mod rpc;
pub mod topic;

pub use config::{BrokerSettings, ControllerConfig, MediatorConfig};
pub use error::{ConfigError, Error, ParseError, PersistenceError, ProtocolError, Result};
pub use mediator::Mediator;
pub use registry::DeviceRegistry;
pub use rpc::{Envelope, RpcConfig, RpcEngine};
