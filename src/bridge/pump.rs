//! Byte pumps between the PTY and a WebSocket connection.
//!
//! PTY output is read by one reader task per session and queued in a bounded
//! channel; the outbound pump of whichever connection is live drains it into
//! binary frames. A chunk leaves the queue only once its frame has been sent,
//! so a connection that fails or is aborted mid-send hands it to the next one.
//! Inbound frames are written to the PTY in arrival order.

use crate::errors::BridgeError;
use crate::exit::ExitSignal;
use crate::pty::{PtySession, PTY_READ_BUFFER_SIZE};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

/// Chunks of PTY output buffered while no client is draining them
pub const PTY_OUTPUT_CHANNEL_SIZE: usize = 256;

pub(crate) type OutputQueue = Arc<Mutex<PendingOutput>>;

/// PTY output not yet delivered to a client
pub(crate) struct PendingOutput {
    rx: mpsc::Receiver<Vec<u8>>,
    unsent: Option<Vec<u8>>,
}

impl PendingOutput {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx, unsent: None }
    }

    /// Oldest undelivered chunk, or `None` once the reader is gone and
    /// everything has been delivered. Repeats until [`Self::commit`].
    async fn peek(&mut self) -> Option<Vec<u8>> {
        if self.unsent.is_none() {
            self.unsent = self.rx.recv().await;
        }
        self.unsent.clone()
    }

    /// Mark the chunk returned by the last `peek` as delivered.
    fn commit(&mut self) {
        self.unsent = None;
    }
}

/// Spawn the task that reads PTY output until the stream ends.
///
/// End of stream or a read error fires `exit` and closes the queue.
pub(crate) fn spawn_pty_reader(session: Arc<PtySession>, exit: ExitSignal) -> OutputQueue {
    let (tx, rx) = mpsc::channel(PTY_OUTPUT_CHANNEL_SIZE);
    tokio::spawn(read_pty(session, tx, exit));
    Arc::new(Mutex::new(PendingOutput::new(rx)))
}

async fn read_pty(session: Arc<PtySession>, tx: mpsc::Sender<Vec<u8>>, exit: ExitSignal) {
    let mut total_bytes_read: usize = 0;
    info!("[reader] Reader task started (pid: {:?})", session.pid());

    loop {
        let read_result = tokio::task::spawn_blocking({
            let session = session.clone();
            move || {
                let mut buf = vec![0u8; PTY_READ_BUFFER_SIZE];
                session.read(&mut buf).map(|n| {
                    buf.truncate(n);
                    buf
                })
            }
        })
        .await;

        let chunk = match read_result {
            Ok(Ok(chunk)) if chunk.is_empty() => {
                info!("[reader] EOF received. Total: {} bytes", total_bytes_read);
                break;
            }
            Ok(Ok(chunk)) => chunk,
            Ok(Err(e)) if e.is_eof() => {
                info!(
                    "[reader] PTY closed ({}). Total: {} bytes",
                    e, total_bytes_read
                );
                break;
            }
            Ok(Err(e)) => {
                error!("[reader] Read from PTY error: {}", e);
                break;
            }
            Err(e) => {
                error!("[reader] spawn_blocking panicked: {}", e);
                break;
            }
        };

        total_bytes_read += chunk.len();
        if tx.send(chunk).await.is_err() {
            debug!("[reader] Output queue dropped");
            break;
        }
    }

    if exit.notify() {
        info!("[reader] Session exit signalled");
    }
}

/// Run one client connection until either direction stops.
pub(crate) async fn run_connection(
    socket: WebSocket,
    session: Arc<PtySession>,
    output: OutputQueue,
) {
    let (ws_sender, ws_receiver) = socket.split();
    info!("[ws] Client connected");

    let mut outbound = tokio::spawn(outbound_pump(output, ws_sender));

    tokio::select! {
        _ = &mut outbound => {
            debug!("[ws] Outbound pump finished");
        }
        _ = inbound_loop(session, ws_receiver) => {
            outbound.abort();
        }
    }

    info!("[ws] Client disconnected");
}

/// Forward queued PTY output to the client as binary frames.
async fn outbound_pump(output: OutputQueue, mut ws_sender: SplitSink<WebSocket, Message>) {
    let mut output = output.lock_owned().await;

    while let Some(chunk) = output.peek().await {
        if let Err(e) = ws_sender.send(Message::Binary(chunk)).await {
            error!("[ws] Write to WebSocket error: {}", e);
            return;
        }
        output.commit();
    }

    // The PTY is gone; tell the client instead of leaving the socket idle.
    debug!("[ws] PTY output ended, closing connection");
    let _ = ws_sender.send(Message::Close(None)).await;
}

/// Write every binary or text frame from the client to the PTY input.
async fn inbound_loop(session: Arc<PtySession>, mut ws_receiver: SplitStream<WebSocket>) {
    while let Some(msg) = ws_receiver.next().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Close(_)) => {
                info!("[ws] Client closed connection");
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("[ws] Read from WebSocket error: {}", e);
                return;
            }
        };

        let session = session.clone();
        match tokio::task::spawn_blocking(move || session.write(&data)).await {
            Ok(Ok(())) => {}
            Ok(Err(BridgeError::SessionClosed)) => {
                debug!("[ws] Dropping input for closed session");
                return;
            }
            Ok(Err(e)) => {
                error!("[ws] Write to PTY stdin error: {}", e);
                return;
            }
            Err(e) => {
                error!("[ws] spawn_blocking panicked: {}", e);
                return;
            }
        }
    }
}
