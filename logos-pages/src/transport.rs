//! Duplex channel between the client and a server.
//!
//! A [`Channel`] is an ordered pair of queues: frames out, frames in. The
//! client does not care what carries them. [`Channel::pair`] wires both ends
//! in memory, and [`connect`] backs a channel with a WebSocket connection.
//! The incoming queue ending means the transport is gone.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Result, SyncError};
use crate::protocol::{ClientFrame, RequestId, ServerFrame};

/// Client side of a duplex channel.
#[derive(Debug)]
pub struct Channel {
    outgoing: mpsc::Sender<ClientFrame>,
    incoming: mpsc::Receiver<ServerFrame>,
}

impl Channel {
    pub fn new(outgoing: mpsc::Sender<ClientFrame>, incoming: mpsc::Receiver<ServerFrame>) -> Self {
        Self { outgoing, incoming }
    }

    /// In-memory channel plus the server end that drives it.
    pub fn pair(capacity: usize) -> (Channel, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
        (
            Channel::new(out_tx, in_rx),
            RemoteEnd {
                requests: out_rx,
                replies: in_tx,
            },
        )
    }

    pub fn into_parts(self) -> (mpsc::Sender<ClientFrame>, mpsc::Receiver<ServerFrame>) {
        (self.outgoing, self.incoming)
    }
}

/// Server side of an in-memory [`Channel`].
#[derive(Debug)]
pub struct RemoteEnd {
    requests: mpsc::Receiver<ClientFrame>,
    replies: mpsc::Sender<ServerFrame>,
}

impl RemoteEnd {
    /// Next frame written by the client, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.requests.recv().await
    }

    /// Non-blocking variant of [`RemoteEnd::recv`].
    pub fn try_recv(&mut self) -> Option<ClientFrame> {
        self.requests.try_recv().ok()
    }

    pub async fn send(&self, frame: ServerFrame) -> Result<()> {
        self.replies
            .send(frame)
            .await
            .map_err(|_| SyncError::TransportUnavailable)
    }

    pub async fn respond(&self, id: RequestId, payload: Value) -> Result<()> {
        self.send(ServerFrame::ok(id, payload)).await
    }

    pub async fn fail(&self, id: RequestId, error: impl Into<Value>) -> Result<()> {
        self.send(ServerFrame::err(id, error)).await
    }

    /// Push a server event with no request id.
    pub async fn push(&self, event: &str, args: Vec<Value>) -> Result<()> {
        self.send(ServerFrame::event(event, args)).await
    }
}

/// Open a WebSocket to `url` and expose it as a [`Channel`].
///
/// Spawns a writer task (outgoing frames → JSON text messages) and a reader
/// task (text or binary messages → frames). A synthetic `connect` event is
/// queued first. When the socket closes the reader ends and the incoming
/// queue drains to `None`.
pub async fn connect(url: &str, capacity: usize) -> Result<Channel> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(capacity.max(1));
    let (in_tx, in_rx) = mpsc::channel::<ServerFrame>(capacity.max(1));

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Dropping unencodable {} frame: {e}", frame.kind());
                    continue;
                }
            };
            if ws_writer.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_writer.close().await;
    });

    let _ = in_tx.send(ServerFrame::event("connect", Vec::new())).await;
    log::info!("Connected to {url}");

    tokio::spawn(async move {
        while let Some(msg) = ws_reader.next().await {
            let decoded = match msg {
                Ok(Message::Text(text)) => ServerFrame::decode(text.as_str()),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => ServerFrame::decode(text),
                    Err(e) => Err(SyncError::Payload(e.to_string())),
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match decoded {
                Ok(frame) => {
                    if in_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("Dropping malformed frame: {e}"),
            }
        }
        log::info!("Connection closed");
    });

    Ok(Channel::new(out_tx, in_rx))
}
