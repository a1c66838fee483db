// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The topic catalogue shared by devices, mediator, and controller.
//!
//! Five shapes form the protocol:
//!
//! - announce: `devices/announce`
//! - status: `<deviceId>/<base>/status`
//! - RPC request: `<deviceId>/<methodPath>` (e.g. `espA/pump/run`)
//! - RPC response: `<deviceId>/<base>/response/<requestId>`
//! - everything mirrored upstream under a cloud prefix, plus the mediator's
//!   own `<prefix>/mediator/devices/get` management topic
//!
//! The *base* of a method path is its first segment; it also names the
//! status and response namespace for that capability.

/// Topic on which devices announce themselves when joining.
///
/// Announcements use the shared global topic on both brokers; the cloud
/// prefix is never applied to it.
pub const ANNOUNCE_TOPIC: &str = "devices/announce";

/// Synthetic device id the mediator answers registry queries under.
pub const MEDIATOR_DEVICE: &str = "mediator";

/// Request id substituted when an inbound command carries none.
pub const NO_REQUEST_ID: &str = "noid";

/// Status bases devices publish telemetry under.
pub const STATUS_BASES: [&str; 3] = ["bucket", "pump", "wifi"];

/// Bases whose response topics the mediator mirrors upstream.
pub const RESPONSE_BASES: [&str; 4] = ["bucket", "pump", "wifi", "config"];

/// Method paths the mediator accepts as commands from the remote broker.
pub const COMMAND_METHODS: [&str; 5] = [
    "pump/run",
    "bucket/get",
    "wifi/get",
    "pump/get",
    "config/name",
];

/// Returns the base of a method path: everything up to the first `/`.
#[must_use]
pub fn method_base(method: &str) -> &str {
    method.split('/').next().unwrap_or(method)
}

/// Joins a prefix and a topic, omitting the separator for an empty prefix.
#[must_use]
pub fn prefixed(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}/{topic}")
    }
}

/// Builds the request topic for an RPC call.
#[must_use]
pub fn request_topic(prefix: &str, device_id: &str, method: &str) -> String {
    prefixed(prefix, &format!("{device_id}/{method}"))
}

/// Builds the response topic correlated with one request id.
#[must_use]
pub fn response_topic(prefix: &str, device_id: &str, base: &str, request_id: &str) -> String {
    prefixed(prefix, &format!("{device_id}/{base}/response/{request_id}"))
}

/// Builds the wildcard filter covering every RPC response under a prefix.
#[must_use]
pub fn response_filter(prefix: &str) -> String {
    prefixed(prefix, "+/+/response/+")
}

/// Splits a prefixed command topic into device id and method path.
///
/// `devices/espA/pump/run` with prefix `devices` yields
/// `("espA", "pump/run")`. Returns `None` when the prefix does not match or
/// the remainder is too short to carry a method.
#[must_use]
pub fn split_command<'a>(topic: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = if prefix.is_empty() {
        topic
    } else {
        topic.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let (device_id, method) = rest.split_once('/')?;
    if device_id.is_empty() || method.is_empty() {
        return None;
    }
    Some((device_id, method))
}

/// Tests a topic against an MQTT-style filter.
///
/// `+` matches exactly one segment; `#` matches one or more trailing
/// segments and is only meaningful as the last filter segment.
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_segments = filter.split('/');
    let mut topic_segments = topic.split('/');

    loop {
        match (filter_segments.next(), topic_segments.next()) {
            (Some("#"), Some(_)) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_base_two_segments() {
        assert_eq!(method_base("pump/run"), "pump");
        assert_eq!(method_base("devices/get"), "devices");
    }

    #[test]
    fn method_base_single_segment() {
        assert_eq!(method_base("pump"), "pump");
    }

    #[test]
    fn request_topic_without_prefix() {
        assert_eq!(request_topic("", "espA", "pump/run"), "espA/pump/run");
    }

    #[test]
    fn request_topic_with_prefix() {
        assert_eq!(
            request_topic("devices", "espA", "bucket/get"),
            "devices/espA/bucket/get"
        );
    }

    #[test]
    fn response_topic_shape() {
        assert_eq!(
            response_topic("", "espA", "pump", "abc123"),
            "espA/pump/response/abc123"
        );
        assert_eq!(
            response_topic("devices", "mediator", "devices", "r1"),
            "devices/mediator/devices/response/r1"
        );
    }

    #[test]
    fn response_filter_matches_responses() {
        assert!(matches(&response_filter(""), "espA/pump/response/abc"));
        assert!(matches(
            &response_filter("devices"),
            "devices/mediator/devices/response/r1"
        ));
        assert!(!matches(&response_filter("devices"), "espA/pump/response/abc"));
    }

    #[test]
    fn split_command_with_prefix() {
        let (device, method) = split_command("devices/espA/pump/run", "devices").unwrap();
        assert_eq!(device, "espA");
        assert_eq!(method, "pump/run");
    }

    #[test]
    fn split_command_without_prefix() {
        let (device, method) = split_command("espA/bucket/get", "").unwrap();
        assert_eq!(device, "espA");
        assert_eq!(method, "bucket/get");
    }

    #[test]
    fn split_command_rejects_wrong_prefix() {
        assert!(split_command("other/espA/pump/run", "devices").is_none());
        assert!(split_command("devices", "devices").is_none());
    }

    #[test]
    fn plus_matches_exactly_one_segment() {
        assert!(matches("+/pump/status", "espA/pump/status"));
        assert!(!matches("+/pump/status", "espA/extra/pump/status"));
        assert!(!matches("+/pump/status", "pump/status"));
    }

    #[test]
    fn hash_matches_one_or_more_trailing_segments() {
        assert!(matches("espA/#", "espA/pump"));
        assert!(matches("espA/#", "espA/pump/response/abc"));
        assert!(!matches("espA/#", "espA"));
        assert!(matches("#", "devices/announce"));
    }

    #[test]
    fn literal_match() {
        assert!(matches("devices/announce", "devices/announce"));
        assert!(!matches("devices/announce", "devices/announce/extra"));
        assert!(!matches("devices/announce", "devices"));
    }

    #[test]
    fn mixed_wildcards() {
        assert!(matches("devices/+/pump/run", "devices/espA/pump/run"));
        assert!(!matches("devices/+/pump/run", "devices/espA/pump/get"));
        assert!(matches("+/+/response/+", "espA/config/response/noid"));
    }
}
