// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `aquaduct` crate.
//!
//! The taxonomy mirrors where failures are handled: configuration errors are
//! fatal at startup, protocol errors belong to the broker session, parse
//! errors are logged and dropped on the delivery path, timeouts are retried
//! by the RPC engine before they surface, and persistence errors never
//! invalidate the in-memory registry.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error reading configuration from the environment.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error in the broker session.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error parsing a payload that was expected to be JSON.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// An RPC call exhausted its retry budget without a response.
    ///
    /// The Display string crosses the wire verbatim in mediator error
    /// envelopes, so its wording is part of the protocol.
    #[error("RPC failed after {attempts} retries")]
    Timeout {
        /// Attempts made before giving up.
        attempts: u32,
        /// Response topic of the last attempt.
        response_topic: String,
    },

    /// The device answered with an `error` field; surfaced verbatim.
    #[error("{0}")]
    Device(String),

    /// Error writing the registry snapshot to disk.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors reading configuration from environment variables.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    Missing(String),

    /// An environment variable is set but does not parse.
    #[error("invalid value {value:?} for {var}")]
    Invalid {
        /// The variable name.
        var: String,
        /// The raw value that failed to parse.
        value: String,
    },
}

/// Errors in the broker session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Initial connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Publish attempted while the session is down.
    #[error("not connected to broker")]
    NotConnected,

    /// An internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors parsing wire payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload parsed but is missing a required field.
    #[error("missing field in payload: {0}")]
    MissingField(String),
}

/// Errors persisting the device registry.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// File I/O failed.
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the snapshot failed.
    #[error("registry serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` for the timeout variant.
    ///
    /// The HTTP adapter maps timeouts to a different status code than other
    /// RPC failures.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
