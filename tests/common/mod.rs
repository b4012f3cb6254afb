#![allow(dead_code)]

use bytes::Bytes;
use intercom_native::{
    encode, read_frame, AudioSink, BinaryHandlerId, ConnectionConfig, Frame, MessageType,
    FLAG_NONE,
};
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const STEP: Duration = Duration::from_secs(2);

/// Loopback stand-in for an intercom device
pub struct FakeDevice {
    listener: TcpListener,
    pub port: u16,
}

impl FakeDevice {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub async fn accept(&self) -> TcpStream {
        let (stream, _) = timeout(STEP, self.listener.accept())
            .await
            .expect("no connection from client")
            .unwrap();
        stream
    }

    /// Config pointing at this device with keepalive effectively off
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_port(self.port)
            .with_connect_timeout(Duration::from_secs(1))
            .with_ping_interval(Duration::from_secs(60))
    }
}

/// Port nothing is listening on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Listener whose accept queue is full, so new connects never complete
pub struct Backlogged {
    _listener: TcpListener,
    _queued: Vec<TcpStream>,
    pub port: u16,
}

impl Backlogged {
    pub async fn bind() -> Self {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut queued = Vec::new();
        for _ in 0..8 {
            match timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => queued.push(stream),
                _ => break,
            }
        }

        Self {
            _listener: listener,
            _queued: queued,
            port: addr.port(),
        }
    }
}

/// Reset the socket instead of closing it cleanly
pub fn reset(stream: TcpStream) {
    stream.set_linger(Some(Duration::ZERO)).unwrap();
    drop(stream);
}

pub async fn next_frame(stream: &mut TcpStream) -> Frame {
    timeout(STEP, read_frame(stream))
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
}

pub async fn send_frame(stream: &mut TcpStream, msg_type: MessageType, payload: &[u8]) {
    let frame = encode(msg_type, FLAG_NONE, payload).unwrap();
    stream.write_all(&frame).await.unwrap();
}

/// Poll `check` until it holds or the step timeout expires
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(STEP, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Sink that hands delivered audio to the test
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(BinaryHandlerId, Bytes)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(BinaryHandlerId, Bytes)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AudioSink for ChannelSink {
    fn send_audio(&self, handler_id: BinaryHandlerId, data: Bytes) {
        let _ = self.tx.send((handler_id, data));
    }
}
