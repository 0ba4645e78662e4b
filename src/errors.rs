use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no free loopback port in range {start}-{end}")]
    PortRangeExhausted { start: u16, end: u16 },

    #[error("failed to spawn shell: {0:#}")]
    SpawnFailed(#[source] anyhow::Error),

    #[error("failed to resize pty: {0:#}")]
    ResizeFailed(#[source] anyhow::Error),

    #[error("pty read failed: {0}")]
    Read(#[source] io::Error),

    #[error("pty write failed: {0}")]
    Write(#[source] io::Error),

    #[error("failed to close pty: {0}")]
    CloseFailed(#[source] io::Error),

    #[error("failed to bind listener on {addr}: {source}")]
    ListenBindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(#[source] rand::Error),

    #[error("pty session is closed")]
    SessionClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// A clean end-of-stream is only distinguished from other failures for log verbosity.
    pub fn is_eof(&self) -> bool {
        match self {
            BridgeError::Read(err) | BridgeError::Write(err) => is_eof(err),
            BridgeError::SessionClosed => true,
            _ => false,
        }
    }
}

/// On Linux a pty master reports EIO once the slave side has gone away, which is
/// the same condition as EOF for our purposes.
pub(crate) fn is_eof(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        return true;
    }
    #[cfg(target_os = "linux")]
    if err.raw_os_error() == Some(libc::EIO) {
        return true;
    }
    false
}
