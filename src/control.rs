//! Line-delimited JSON control channel between the host application and the bridge.

use std::io::{self, BufRead};
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::coordinator::SessionCoordinator;

/// Control lines buffered between the input thread and the control loop
pub const CONTROL_CHANNEL_SIZE: usize = 64;

/// Messages from the host application
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Match the terminal to the UI's grid
    #[serde(rename = "resize")]
    Resize { rows: u16, cols: u16 },

    /// Close the session and exit
    #[serde(rename = "quit")]
    Quit,
}

/// Events written back to the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ControlEvent {
    /// The bridge is listening
    #[serde(rename = "ready")]
    Ready { ws_url: String },
}

/// Why the control loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlExit {
    Quit,
    InputClosed,
}

/// Read lines from `input` on a dedicated thread.
///
/// A blocking read on stdin cannot be cancelled, so the thread is detached
/// and never joined; it ends with the process. The channel closes at end of
/// input or on a read error.
pub fn spawn_line_reader<R>(input: R) -> io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
    thread::Builder::new()
        .name("control-input".to_string())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("[control] Failed to read control input: {}", e);
                        return;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Apply control messages from `lines` until `quit` or end of input.
pub async fn run_control(
    mut lines: mpsc::Receiver<String>,
    coordinator: &SessionCoordinator,
) -> ControlExit {
    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<ControlMessage>(line) {
            Ok(ControlMessage::Resize { rows, cols }) => {
                debug!("[control] Resize {}x{}", rows, cols);
                coordinator.resize(rows, cols);
            }
            Ok(ControlMessage::Quit) => return ControlExit::Quit,
            Err(e) => warn!("[control] Ignoring malformed message: {}", e),
        }
    }
    ControlExit::InputClosed
}
