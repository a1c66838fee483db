// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RPC wire envelope.
//!
//! Every RPC message is a JSON object carrying `requestId` plus `params`
//! (request), `result` (success) or `error` (failure). Unknown fields are
//! ignored. Inbound commands may lack `requestId`; responses to those are
//! correlated under the literal id `noid`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// A request or response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlates a response to its request. Absent only on malformed or
    /// id-less inbound traffic.
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Call parameters; present on requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Call result; present on successful responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message; present on failed responses, surfaced verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Builds a request envelope.
    #[must_use]
    pub fn request(request_id: impl Into<String>, params: Value) -> Self {
        Self {
            request_id: Some(request_id.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Builds a successful response envelope.
    #[must_use]
    pub fn result(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: Some(request_id.into()),
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Builds a failed response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            params: None,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Serializes the envelope to wire bytes.
    ///
    /// # Errors
    ///
    /// Fails when a parameter value cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        serde_json::to_vec(self).map_err(ParseError::Json)
    }

    /// Parses an envelope from wire bytes.
    ///
    /// # Errors
    ///
    /// Fails on anything that is not a JSON object.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(bytes).map_err(ParseError::Json)
    }
}
