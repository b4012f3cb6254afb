use crate::types::{DeviceInfo, DirectoryEntry};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Source of known devices and the entities they expose
///
/// Implemented by whatever discovery mechanism the host integration has.
pub trait DeviceDirectory: Send + Sync {
    /// Snapshot of every known entity
    fn entries(&self) -> Vec<DirectoryEntry>;
}

impl DeviceDirectory for Vec<DirectoryEntry> {
    fn entries(&self) -> Vec<DirectoryEntry> {
        self.clone()
    }
}

/// In-memory directory that can be updated while in use
///
/// Entries are keyed by entity id, so re-adding an entity replaces it.
#[derive(Default)]
pub struct StaticDirectory {
    entries: Mutex<BTreeMap<String, DirectoryEntry>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DirectoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an entity
    pub fn insert(&self, entry: DirectoryEntry) {
        self.lock().insert(entry.entity_id.clone(), entry);
    }

    /// Remove an entity, returning it if it was known
    pub fn remove(&self, entity_id: &str) -> Option<DirectoryEntry> {
        self.lock().remove(entity_id)
    }

    /// Get the number of known entities
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every entity
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl FromIterator<DirectoryEntry> for StaticDirectory {
    fn from_iter<I: IntoIterator<Item = DirectoryEntry>>(iter: I) -> Self {
        let directory = Self::new();
        for entry in iter {
            directory.insert(entry);
        }
        directory
    }
}

impl DeviceDirectory for StaticDirectory {
    fn entries(&self) -> Vec<DirectoryEntry> {
        self.lock().values().cloned().collect()
    }
}

/// Devices exposing the intercom capability, one entry per device
pub fn intercom_devices(directory: &dyn DeviceDirectory) -> Vec<DeviceInfo> {
    let mut seen = BTreeSet::new();
    let mut devices = Vec::new();

    for entry in directory.entries() {
        if !entry.has_intercom_capability() {
            continue;
        }
        if seen.insert(entry.device_id.clone()) {
            tracing::debug!("Found intercom device {} ({})", entry.name, entry.device_id);
            devices.push(DeviceInfo::from(&entry));
        }
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(device_id: &str, entity_id: &str) -> DirectoryEntry {
        DirectoryEntry {
            device_id: device_id.to_string(),
            name: format!("Device {}", device_id),
            domain: entity_id.split('.').next().unwrap_or_default().to_string(),
            entity_id: entity_id.to_string(),
        }
    }

    #[test]
    fn only_intercom_switches_are_listed() {
        let directory = vec![
            entry("a", "switch.hall_intercom_api"),
            entry("b", "switch.porch_light"),
            entry("c", "sensor.garage_intercom_api_rssi"),
        ];

        let devices = intercom_devices(&directory);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "a");
        assert_eq!(devices[0].entity_id, "switch.hall_intercom_api");
    }

    #[test]
    fn devices_with_several_switches_are_listed_once() {
        let directory: StaticDirectory = [
            entry("a", "switch.hall_intercom_api"),
            entry("a", "switch.hall_intercom_api_aec"),
        ]
        .into_iter()
        .collect();

        assert_eq!(directory.len(), 2);
        assert_eq!(intercom_devices(&directory).len(), 1);
    }

    #[test]
    fn static_directory_tracks_updates() {
        let directory = StaticDirectory::new();
        assert!(directory.is_empty());

        directory.insert(entry("a", "switch.hall_intercom_api"));
        assert_eq!(intercom_devices(&directory).len(), 1);

        assert!(directory.remove("switch.hall_intercom_api").is_some());
        assert!(intercom_devices(&directory).is_empty());

        directory.insert(entry("b", "switch.porch_intercom_api"));
        directory.clear();
        assert!(directory.is_empty());
    }
}
