use crate::error::{IntercomError, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

/// Receives notifications from a [`Connection`](crate::Connection)
///
/// `on_connected` always precedes any `on_audio` for the same connection, and
/// `on_disconnected` fires exactly once per transition into `Disconnected`.
/// Callbacks run on the connection's background tasks and must not block.
pub trait ConnectionObserver: Send + Sync {
    /// The TCP connection was established
    fn on_connected(&self) {}

    /// The connection was torn down
    fn on_disconnected(&self) {}

    /// An AUDIO frame arrived from the device
    fn on_audio(&self, _data: Bytes) {}

    /// The device sent an ERROR frame, with its code if one was present
    fn on_device_error(&self, _code: Option<u8>) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

/// Connection notification delivered through an [`EventReceiver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Audio(Bytes),
    DeviceError(Option<u8>),
}

/// Observer that queues every notification on a channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionObserver for ChannelObserver {
    fn on_connected(&self) {
        let _ = self.tx.send(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self) {
        let _ = self.tx.send(ConnectionEvent::Disconnected);
    }

    fn on_audio(&self, data: Bytes) {
        let _ = self.tx.send(ConnectionEvent::Audio(data));
    }

    fn on_device_error(&self, code: Option<u8>) {
        let _ = self.tx.send(ConnectionEvent::DeviceError(code));
    }
}

/// Receiver for connection events
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl EventReceiver {
    /// Receive the next event
    ///
    /// Fails with `ConnectionClosed` once every observer has been dropped.
    pub async fn recv(&mut self) -> Result<ConnectionEvent> {
        self.rx.recv().await.ok_or(IntercomError::ConnectionClosed)
    }

    /// Try to receive an event without blocking
    ///
    /// Returns `None` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<ConnectionEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(IntercomError::ConnectionClosed),
        }
    }
}

/// Create a connected observer/receiver pair
pub fn event_channel() -> (ChannelObserver, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelObserver { tx }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (observer, mut events) = event_channel();
        observer.on_connected();
        observer.on_audio(Bytes::from_static(b"abc"));
        observer.on_device_error(Some(3));
        observer.on_disconnected();

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Audio(Bytes::from_static(b"abc"))
        );
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::DeviceError(Some(3)));
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert!(events.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_observer_closes_receiver() {
        let (observer, mut events) = event_channel();
        drop(observer);
        assert!(matches!(events.recv().await, Err(IntercomError::ConnectionClosed)));
        assert!(matches!(events.try_recv(), Err(IntercomError::ConnectionClosed)));
    }
}
