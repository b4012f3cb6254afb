use crate::config::ConnectionConfig;
use crate::discovery::{intercom_devices, DeviceDirectory};
use crate::error::{IntercomError, Result};
use crate::session::{AudioSink, Session};
use crate::types::{BinaryHandlerId, DeviceId, DeviceInfo, SessionHandle};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

enum Slot {
    /// A start is in flight; holds the handler id reserved for it
    Starting(BinaryHandlerId),
    Active(Arc<Session>),
}

impl Slot {
    fn handler_id(&self) -> BinaryHandlerId {
        match self {
            Slot::Starting(handler_id) => *handler_id,
            Slot::Active(session) => session.handler_id(),
        }
    }

    fn live_session(&self) -> Option<&Arc<Session>> {
        match self {
            Slot::Active(session) if session.is_active() => Some(session),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Slots {
    entries: HashMap<DeviceId, Slot>,
    next_handler_id: BinaryHandlerId,
}

impl Slots {
    /// Pick a handler id not used by any other slot. Zero is never handed out.
    fn allocate_handler_id(&mut self) -> Option<BinaryHandlerId> {
        for _ in 0..BinaryHandlerId::MAX {
            self.next_handler_id = self.next_handler_id.checked_add(1).unwrap_or(1);
            let candidate = self.next_handler_id;
            if !self.entries.values().any(|slot| slot.handler_id() == candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// Table of live sessions, at most one per device
///
/// Start and stop requests for the same device are arbitrated under one lock,
/// so two sessions for a device can never coexist. Sessions whose device
/// connection dropped on their own are evicted lazily.
pub struct SessionRegistry {
    config: ConnectionConfig,
    slots: Mutex<Slots>,
}

impl SessionRegistry {
    /// Create an empty registry; every session uses `config`
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Get the configuration used for new sessions
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Start streaming with a device
    ///
    /// Fails with `InvalidConfig` if the registry's config is unusable, with
    /// `AlreadyActive` if the device has a live session or one is still
    /// starting, and with `ConnectionFailed` if the device could not be
    /// reached. Nothing is registered on failure.
    pub async fn start_session(
        &self,
        device_id: impl Into<DeviceId>,
        host: impl Into<String>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<SessionHandle> {
        let device_id = device_id.into();
        let host = host.into();
        tracing::info!("Starting intercom session for device {} at {}", device_id, host);
        self.config.validate()?;

        let (handler_id, stale) = {
            let mut slots = self.slots.lock().await;
            let busy = slots.entries.get(&device_id).map(|slot| {
                matches!(slot, Slot::Starting(_)) || slot.live_session().is_some()
            });
            let stale = match busy {
                Some(true) => return Err(IntercomError::AlreadyActive(device_id)),
                Some(false) => slots.entries.remove(&device_id),
                None => None,
            };
            let handler_id = slots.allocate_handler_id().ok_or_else(|| {
                IntercomError::ChannelError("no free binary handler id".to_string())
            })?;
            slots
                .entries
                .insert(device_id.clone(), Slot::Starting(handler_id));
            (handler_id, stale)
        };

        if let Some(Slot::Active(stale)) = stale {
            tracing::debug!("Evicting dropped session {} for {}", stale.session_id(), device_id);
            stale.stop().await;
        }

        let session = Arc::new(Session::new(
            device_id.clone(),
            host,
            self.config.clone(),
            sink,
            handler_id,
        ));

        if let Err(e) = session.start().await {
            tracing::error!("Failed to start session for {}: {}", device_id, e);
            self.release_reservation(&device_id, handler_id).await;
            return Err(e);
        }

        let registered = {
            let mut slots = self.slots.lock().await;
            let reserved = matches!(
                slots.entries.get(&device_id),
                Some(Slot::Starting(reserved)) if *reserved == handler_id
            );
            if reserved {
                slots
                    .entries
                    .insert(device_id.clone(), Slot::Active(session.clone()));
            }
            reserved
        };

        if !registered {
            // Drained by shutdown while connecting
            session.stop().await;
            return Err(IntercomError::ConnectionClosed);
        }

        Ok(SessionHandle {
            device_id,
            session_id: session.session_id(),
            binary_handler_id: handler_id,
        })
    }

    async fn release_reservation(&self, device_id: &str, handler_id: BinaryHandlerId) {
        let mut slots = self.slots.lock().await;
        if matches!(slots.entries.get(device_id), Some(Slot::Starting(reserved)) if *reserved == handler_id)
        {
            slots.entries.remove(device_id);
        }
    }

    /// Stop the session for a device
    ///
    /// Fails with `NotFound` if the device has no session.
    pub async fn stop_session(&self, device_id: &str) -> Result<()> {
        tracing::info!("Stopping intercom session for device {}", device_id);

        let session = {
            let mut slots = self.slots.lock().await;
            match slots.entries.remove(device_id) {
                Some(Slot::Active(session)) => session,
                Some(starting) => {
                    slots.entries.insert(device_id.to_string(), starting);
                    return Err(IntercomError::NotFound(device_id.to_string()));
                }
                None => return Err(IntercomError::NotFound(device_id.to_string())),
            }
        };

        session.stop().await;
        Ok(())
    }

    /// Stop the device's session only if it is still the one identified by
    /// `session_id`
    ///
    /// Fails with `NotFound` if the device has no session or it has since
    /// been replaced by another one.
    pub async fn stop_session_if(&self, device_id: &str, session_id: Uuid) -> Result<()> {
        let session = {
            let mut slots = self.slots.lock().await;
            let current = matches!(
                slots.entries.get(device_id),
                Some(Slot::Active(session)) if session.session_id() == session_id
            );
            match slots.entries.remove(device_id) {
                Some(Slot::Active(session)) if current => session,
                Some(other) => {
                    slots.entries.insert(device_id.to_string(), other);
                    return Err(IntercomError::NotFound(device_id.to_string()));
                }
                None => return Err(IntercomError::NotFound(device_id.to_string())),
            }
        };

        tracing::info!("Stopping session {} for device {}", session_id, device_id);
        session.stop().await;
        Ok(())
    }

    /// Forward outward audio to the session behind `handle`
    ///
    /// Dropped if that session is gone, even when the device has a newer one.
    pub async fn handle_session_audio(&self, handle: &SessionHandle, data: &[u8]) {
        let session = {
            let slots = self.slots.lock().await;
            slots
                .entries
                .get(&handle.device_id)
                .and_then(Slot::live_session)
                .filter(|session| session.session_id() == handle.session_id)
                .cloned()
        };

        match session {
            Some(session) => session.handle_audio(data).await,
            None => tracing::debug!("Session {} is gone, dropping audio", handle.session_id),
        }
    }

    /// Forward outward audio to the device's session; dropped if there is none
    pub async fn handle_audio(&self, device_id: &str, data: &[u8]) {
        let session = {
            let slots = self.slots.lock().await;
            slots
                .entries
                .get(device_id)
                .and_then(Slot::live_session)
                .cloned()
        };

        if let Some(session) = session {
            session.handle_audio(data).await;
        }
    }

    /// Forward outward audio to the session owning `handler_id`
    pub async fn handle_binary(&self, handler_id: BinaryHandlerId, data: &[u8]) {
        let session = {
            let slots = self.slots.lock().await;
            slots
                .entries
                .values()
                .filter_map(Slot::live_session)
                .find(|session| session.handler_id() == handler_id)
                .cloned()
        };

        match session {
            Some(session) => session.handle_audio(data).await,
            None => tracing::debug!("No session for binary handler {}", handler_id),
        }
    }

    /// Whether the device has a live session
    pub async fn is_active(&self, device_id: &str) -> bool {
        let slots = self.slots.lock().await;
        slots
            .entries
            .get(device_id)
            .and_then(Slot::live_session)
            .is_some()
    }

    /// Devices with a live session, sorted
    pub async fn active_devices(&self) -> Vec<DeviceId> {
        let slots = self.slots.lock().await;
        let mut devices: Vec<DeviceId> = slots
            .entries
            .iter()
            .filter(|(_, slot)| slot.live_session().is_some())
            .map(|(device_id, _)| device_id.clone())
            .collect();
        devices.sort();
        devices
    }

    /// Get the number of live sessions
    pub async fn session_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .entries
            .values()
            .filter(|slot| slot.live_session().is_some())
            .count()
    }

    /// Remove sessions whose device connection has dropped
    ///
    /// Returns the devices that were evicted.
    pub async fn prune(&self) -> Vec<DeviceId> {
        let dropped: Vec<(DeviceId, Arc<Session>)> = {
            let mut slots = self.slots.lock().await;
            let ids: Vec<DeviceId> = slots
                .entries
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Active(s) if !s.is_active()))
                .map(|(device_id, _)| device_id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| match slots.entries.remove(&id) {
                    Some(Slot::Active(session)) => Some((id, session)),
                    _ => None,
                })
                .collect()
        };

        join_all(dropped.iter().map(|(_, session)| session.stop())).await;
        dropped.into_iter().map(|(device_id, _)| device_id).collect()
    }

    /// Intercom-capable devices known to `directory`
    ///
    /// Pure query; sessions are not touched.
    pub fn list_devices(&self, directory: &dyn DeviceDirectory) -> Vec<DeviceInfo> {
        intercom_devices(directory)
    }

    /// Stop every session and empty the registry
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut slots = self.slots.lock().await;
            slots
                .entries
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Active(session) => Some(session),
                    Slot::Starting(_) => None,
                })
                .collect()
        };

        tracing::info!("Shutting down {} intercom session(s)", sessions.len());
        join_all(sessions.iter().map(|session| session.stop())).await;
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_ids_skip_zero_and_used_ids() {
        let mut slots = Slots::default();
        assert_eq!(slots.allocate_handler_id(), Some(1));

        slots.entries.insert("a".into(), Slot::Starting(2));
        assert_eq!(slots.allocate_handler_id(), Some(3));

        slots.next_handler_id = BinaryHandlerId::MAX;
        assert_eq!(slots.allocate_handler_id(), Some(1));
    }

    #[test]
    fn handler_ids_run_out() {
        let mut slots = Slots::default();
        for id in 1..=BinaryHandlerId::MAX {
            slots.entries.insert(format!("dev{}", id), Slot::Starting(id));
        }
        assert_eq!(slots.allocate_handler_id(), None);
    }

    #[tokio::test]
    async fn stop_unknown_device_is_not_found() {
        let registry = SessionRegistry::default();
        assert!(matches!(
            registry.stop_session("missing").await,
            Err(IntercomError::NotFound(id)) if id == "missing"
        ));
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn starting_reservation_blocks_second_start() {
        let registry = SessionRegistry::default();
        registry
            .slots
            .lock()
            .await
            .entries
            .insert("dev1".into(), Slot::Starting(1));

        struct Discard;
        impl AudioSink for Discard {
            fn send_audio(&self, _: BinaryHandlerId, _: bytes::Bytes) {}
        }

        let result = registry
            .start_session("dev1", "127.0.0.1", Arc::new(Discard))
            .await;
        assert!(matches!(result, Err(IntercomError::AlreadyActive(_))));
        // A reservation is not a session
        assert!(!registry.is_active("dev1").await);
        assert!(matches!(
            registry.stop_session("dev1").await,
            Err(IntercomError::NotFound(_))
        ));
    }
}
