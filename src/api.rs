// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP surface of the controller.
//!
//! Each route maps to exactly one RPC call; the registry listing goes
//! through the synthetic `mediator` device. RPC outcomes translate to
//! status codes: success is 200, an exhausted retry budget is 504, any
//! other RPC failure is 502 with the error string as `detail`. Malformed
//! path parameters are rejected with 400 before a handler runs.
//!
//! When a client aborts a request, axum drops the handler future and the
//! pending-call guard withdraws the in-flight RPC waiter; a late response
//! is then silently discarded.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

use crate::broker::MessageBus;
use crate::error::Error;
use crate::rpc::RpcEngine;
use crate::topic::MEDIATOR_DEVICE;

/// Builds the controller's router around one RPC engine.
pub fn router<B: MessageBus>(rpc: Arc<RpcEngine<B>>) -> axum::Router {
    axum::Router::new()
        .route("/", get(health))
        .route("/pump/{device_id}/run/{seconds}", post(run_pump::<B>))
        .route("/bucket/{device_id}/status", get(bucket_status::<B>))
        .route("/wifi/{device_id}/status", get(wifi_status::<B>))
        .route("/devices", get(list_devices::<B>))
        .with_state(rpc)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn run_pump<B: MessageBus>(
    State(rpc): State<Arc<RpcEngine<B>>>,
    Path((device_id, seconds)): Path<(String, u64)>,
) -> Result<Json<Value>, ApiError> {
    let result = rpc
        .call(&device_id, "pump/run", json!({"duration": seconds}))
        .await?;
    Ok(Json(json!({"device": device_id, "result": result})))
}

async fn bucket_status<B: MessageBus>(
    State(rpc): State<Arc<RpcEngine<B>>>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let result = rpc.call(&device_id, "bucket/get", json!({})).await?;
    Ok(Json(json!({"device": device_id, "result": result})))
}

async fn wifi_status<B: MessageBus>(
    State(rpc): State<Arc<RpcEngine<B>>>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let result = rpc.call(&device_id, "wifi/get", json!({})).await?;
    Ok(Json(json!({"device": device_id, "result": result})))
}

async fn list_devices<B: MessageBus>(
    State(rpc): State<Arc<RpcEngine<B>>>,
) -> Result<Json<Value>, ApiError> {
    let result = rpc.call(MEDIATOR_DEVICE, "devices/get", json!({})).await?;
    Ok(Json(json!({"devices": result})))
}

/// RPC failure translated to an HTTP response.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        tracing::debug!(status = %status, error = %self.0, "RPC call failed");
        (status, Json(json!({"detail": self.0.to_string()}))).into_response()
    }
}
