use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use crate::{error::RealtimeError, protocol::Frame};

pub mod websocket;

pub use websocket::WebSocketTransport;

/// Outbound half of a realtime connection. Sending never blocks; frames are
/// queued to whatever owns the socket.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), RealtimeError>;

    fn is_open(&self) -> bool;
}

/// In-process transport that hands every outbound frame to a receiver. Used
/// when the socket lives in the host, and in tests.
#[derive(Clone)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                open: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Frame) -> Result<(), RealtimeError> {
        if !self.is_open() {
            return Err(RealtimeError::TransportClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| RealtimeError::TransportClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}
