//! A single WebSocket to the engine.
//!
//! Each socket runs on its own task and reports back through an event
//! channel. Every event carries the generation the socket was opened with, so
//! the driver can ignore anything from a socket it has already replaced.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

/// Maximum inbound frame size (16MB); larger frames are dropped.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Transport signal from a socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Connection established and writable
    Opened,
    /// A text frame (binary frames are accepted if valid UTF-8)
    Message(String),
    /// Transport error; a `Closed` follows
    Error(String),
    /// Connection gone, or never established
    Closed,
}

/// A [`SocketEvent`] tagged with the socket's generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: SocketEvent,
}

/// Owner's handle to a socket task.
pub struct SocketHandle {
    generation: u64,
    /// Outbound text frames; dropping it asks the task to close
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl SocketHandle {
    /// Start connecting to `url` on a new task.
    pub fn spawn(
        generation: u64,
        url: String,
        event_tx: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            run_socket(generation, url, outbound_rx, event_tx).await;
        });

        Self {
            generation,
            outbound: Some(outbound_tx),
            task: Some(task),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a text frame. Returns `false` if the socket is gone.
    pub fn send(&self, text: String) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(text).is_ok())
    }

    /// Close gracefully: the task sends a close frame and exits without
    /// reporting `Closed`. A connect still in progress is abandoned.
    pub fn close(&mut self) {
        self.outbound = None;
        // Let the task finish the close handshake on its own.
        self.task = None;
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    generation: u64,
    url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<TaggedEvent>,
) {
    let emit = |event: SocketEvent| {
        let _ = event_tx.send(TaggedEvent { generation, event });
    };

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                emit(SocketEvent::Error(format!("Failed to connect to {}: {}", url, e)));
                emit(SocketEvent::Closed);
                return;
            }
        },
        _ = owner_gone(&mut outbound_rx) => {
            debug!("Connect to {} abandoned", url);
            return;
        }
    };

    emit(SocketEvent::Opened);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        emit(SocketEvent::Error(format!("Failed to send to {}: {}", url, e)));
                        break;
                    }
                }
                None => {
                    debug!("Closing connection to {}", url);
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(msg)) => {
                    let text = match msg {
                        Message::Text(text) => text,
                        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!("Dropping non-UTF-8 binary frame from {}", url);
                                continue;
                            }
                        },
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", url);
                            break;
                        }
                    };

                    if text.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            url,
                            text.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    emit(SocketEvent::Message(text));
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", url);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", url, e);
                            emit(SocketEvent::Error(e.to_string()));
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", url);
                    break;
                }
            },
        }
    }

    emit(SocketEvent::Closed);
}

/// Resolves once the owner has dropped the outbound sender.
async fn owner_gone(outbound_rx: &mut mpsc::UnboundedReceiver<String>) {
    while outbound_rx.recv().await.is_some() {
        debug!("Dropping frame queued before the socket opened");
    }
}
