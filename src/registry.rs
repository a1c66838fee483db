// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted device registry.
//!
//! Maps device id to the latest announcement payload. The on-disk form is a
//! single JSON object; writes go through a sibling temp file and an atomic
//! rename, so the file is at every instant either absent or a well-formed
//! snapshot. The in-memory map is authoritative: a failed save is logged
//! and retried on the next one.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::PersistenceError;

/// In-memory registry with a JSON snapshot on disk.
#[derive(Debug)]
pub struct DeviceRegistry {
    path: PathBuf,
    devices: Mutex<HashMap<String, Value>>,
}

impl DeviceRegistry {
    /// Loads the registry from `path`.
    ///
    /// A missing file is a fresh start; a corrupt file is reported at WARN
    /// and treated as empty.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let devices = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, Value>>(&contents) {
                Ok(devices) => {
                    tracing::info!(
                        path = %path.display(),
                        devices = devices.len(),
                        "loaded device registry"
                    );
                    devices
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "corrupt registry file, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no registry file, starting empty");
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "unreadable registry file, starting empty"
                );
                HashMap::new()
            }
        };

        Self {
            path,
            devices: Mutex::new(devices),
        }
    }

    /// Stores (or overwrites) the announcement for a device.
    pub fn upsert(&self, device_id: impl Into<String>, announcement: Value) {
        self.devices.lock().insert(device_id.into(), announcement);
    }

    /// Returns the stored announcement for one device.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<Value> {
        self.devices.lock().get(device_id).cloned()
    }

    /// Returns every stored announcement. Order is unspecified.
    #[must_use]
    pub fn list(&self) -> Vec<Value> {
        self.devices.lock().values().cloned().collect()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    /// Returns `true` when no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current snapshot to disk atomically.
    ///
    /// The map is cloned under the lock and serialized outside it, so
    /// announce ingest never waits on disk latency.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or any file operation fails; the
    /// in-memory state is unaffected.
    pub fn save(&self) -> Result<(), PersistenceError> {
        let snapshot = self.devices.lock().clone();
        let contents = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let temp_path = {
            let mut name = OsString::from(self.path.as_os_str());
            name.push(".tmp");
            PathBuf::from(name)
        };
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            devices = snapshot.len(),
            "saved device registry"
        );
        Ok(())
    }
}
