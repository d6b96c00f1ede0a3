use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::Transport;
use crate::{
    error::RealtimeError,
    protocol::{events, heartbeat_frame, Frame, PHOENIX_TOPIC},
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

type RealtimeWsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type RealtimeWriteHalf = futures_util::stream::SplitSink<RealtimeWsStream, Message>;
type RealtimeReadHalf = futures_util::stream::SplitStream<RealtimeWsStream>;

/// Websocket connection to the realtime service. Inbound frames arrive on the
/// receiver returned by `connect`; the caller feeds them to the manager.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<Frame>), RealtimeError> {
        Self::connect_with_heartbeat(url, HEARTBEAT_INTERVAL).await
    }

    pub async fn connect_with_heartbeat(
        url: &str,
        heartbeat: Duration,
    ) -> Result<(Self, mpsc::Receiver<Frame>), RealtimeError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|error| RealtimeError::Connect(error.to_string()))?;
        debug!("realtime websocket connected");

        let (write, read) = stream.split();
        let write = Arc::new(Mutex::new(write));
        let open = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let tasks = vec![
            spawn_writer(write, outbound_rx, open.clone(), stop_rx.clone()),
            spawn_heartbeat(outbound.clone(), heartbeat, stop_rx.clone()),
            spawn_reader(read, inbound_tx, open.clone(), stop_rx),
        ];

        Ok((
            Self {
                outbound,
                open,
                stop_tx,
                tasks,
            },
            inbound_rx,
        ))
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }

    /// Stops the socket tasks and waits for them to finish.
    pub async fn shutdown(mut self) {
        self.close();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(error) = task.await {
                warn!(error = %error, "realtime task ended abnormally");
            }
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, frame: Frame) -> Result<(), RealtimeError> {
        if !self.is_open() {
            return Err(RealtimeError::TransportClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| RealtimeError::TransportClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

async fn stopped(stop_rx: &mut watch::Receiver<bool>) -> bool {
    let changed = stop_rx.changed().await;
    changed.is_err() || *stop_rx.borrow()
}

fn spawn_writer(
    write: Arc<Mutex<RealtimeWriteHalf>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    open: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                done = stopped(&mut stop_rx) => {
                    if done {
                        break;
                    }
                }
                next = outbound_rx.recv() => {
                    let Some(frame) = next else {
                        break;
                    };
                    if !write_frame(&write, frame).await {
                        open.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }

        // Frames queued before the stop signal (leaves on sign-out) still go out.
        while let Ok(frame) = outbound_rx.try_recv() {
            if !write_frame(&write, frame).await {
                return;
            }
        }
        let mut write = write.lock().await;
        let _ = write.close().await;
    })
}

/// Returns `false` once the socket can no longer be written.
async fn write_frame(write: &Mutex<RealtimeWriteHalf>, frame: Frame) -> bool {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(error) => {
            warn!(topic = %frame.topic, error = %error, "dropping unencodable frame");
            return true;
        }
    };
    let mut write = write.lock().await;
    match write.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(error) => {
            warn!(error = %error, "realtime websocket write failed");
            false
        }
    }
}

fn spawn_heartbeat(
    outbound: mpsc::UnboundedSender<Frame>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let counter = AtomicU64::new(1);
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                done = stopped(&mut stop_rx) => {
                    if done {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let reference = format!("hb-{}", counter.fetch_add(1, Ordering::Relaxed));
                    if outbound.send(heartbeat_frame(&reference)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_reader(
    mut read: RealtimeReadHalf,
    inbound_tx: mpsc::Sender<Frame>,
    open: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                done = stopped(&mut stop_rx) => {
                    if done {
                        break;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => warn!(error = %error, "ignoring undecodable realtime frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(error = %error, "realtime websocket read failed");
                        break;
                    }
                },
            }
        }

        open.store(false, Ordering::SeqCst);
        let _ = inbound_tx
            .send(Frame::new(PHOENIX_TOPIC, events::CLOSE, json!({})))
            .await;
    })
}

#[cfg(test)]
mod tests {
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn local_server() -> (String, JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(socket).await.unwrap()
        });
        (format!("ws://{address}"), accept)
    }

    async fn next_frame(server: &mut WebSocketStream<TcpStream>) -> Option<Frame> {
        loop {
            match tokio::time::timeout(WAIT, server.next()).await.ok()?? {
                Ok(Message::Text(text)) => return Frame::decode(&text).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    #[tokio::test]
    async fn sent_frames_and_heartbeats_reach_the_server() {
        let (url, accept) = local_server().await;
        let (transport, _inbound) = WebSocketTransport::connect_with_heartbeat(
            &url,
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let mut server = accept.await.unwrap();

        transport
            .send(Frame::new("realtime:usage:u1", events::JOIN, json!({})).with_ref("1"))
            .unwrap();

        let mut join = None;
        let mut heartbeat = None;
        while join.is_none() || heartbeat.is_none() {
            let frame = next_frame(&mut server).await.unwrap();
            if frame.event == events::HEARTBEAT {
                heartbeat.get_or_insert(frame);
            } else {
                join = Some(frame);
            }
        }

        let join = join.unwrap();
        assert_eq!(join.topic, "realtime:usage:u1");
        assert_eq!(join.event, events::JOIN);
        let heartbeat = heartbeat.unwrap();
        assert_eq!(heartbeat.topic, PHOENIX_TOPIC);
        assert_eq!(heartbeat.reference.as_deref(), Some("hb-1"));

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn frames_queued_before_close_are_flushed() {
        let (url, accept) = local_server().await;
        let (transport, _inbound) = WebSocketTransport::connect(&url).await.unwrap();
        let mut server = accept.await.unwrap();

        transport
            .send(Frame::new("realtime:meeting:m1", events::LEAVE, json!({})))
            .unwrap();
        transport
            .send(Frame::new("realtime:usage:u1", events::LEAVE, json!({})))
            .unwrap();
        transport.close();
        assert!(transport.send(Frame::new("late", events::LEAVE, json!({}))).is_err());

        let topics: Vec<String> = [next_frame(&mut server).await, next_frame(&mut server).await]
            .into_iter()
            .flatten()
            .map(|frame| frame.topic)
            .collect();
        assert_eq!(topics, vec!["realtime:meeting:m1", "realtime:usage:u1"]);
        assert!(next_frame(&mut server).await.is_none());

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn server_close_ends_the_inbound_stream_with_phx_close() {
        let (url, accept) = local_server().await;
        let (transport, mut inbound) = WebSocketTransport::connect(&url).await.unwrap();
        let mut server = accept.await.unwrap();

        server
            .send(Message::Text(
                Frame::new("realtime:usage:u1", events::BROADCAST, json!({ "event": "ping" }))
                    .encode()
                    .unwrap(),
            ))
            .await
            .unwrap();
        server.close(None).await.unwrap();

        let broadcast = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(broadcast.event, events::BROADCAST);

        let closed = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(closed.topic, PHOENIX_TOPIC);
        assert_eq!(closed.event, events::CLOSE);
        assert!(!transport.is_open());
    }
}
