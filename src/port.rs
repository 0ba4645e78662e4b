//! Loopback port selection
//!
//! Ports are tried in ascending order. A port counts as taken if something
//! accepts a TCP connection on it within [`PROBE_TIMEOUT`].

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, info};

use crate::config::PortRange;
use crate::errors::{BridgeError, BridgeResult};

pub const PROBE_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct PortAllocator {
    range: PortRange,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Return the first port in range with no live listener, without reserving it.
    ///
    /// Another process can still take the port before it is bound; use
    /// [`PortAllocator::bind`] when the listener is needed.
    pub async fn allocate(&self) -> BridgeResult<u16> {
        for port in self.range.iter() {
            if probe_in_use(port).await {
                debug!("[port] {} in use, skipping", port);
                continue;
            }
            return Ok(port);
        }
        Err(self.exhausted())
    }

    /// Bind a listener on the first free port in range.
    ///
    /// Ports that answer the probe are skipped; a port that fails to bind is
    /// skipped too, so the returned listener is the reservation.
    pub async fn bind(&self) -> BridgeResult<(TcpListener, SocketAddr)> {
        for port in self.range.iter() {
            if probe_in_use(port).await {
                debug!("[port] {} in use, skipping", port);
                continue;
            }

            let addr = loopback(port);
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!("[port] Bound {}", addr);
                    return Ok((listener, addr));
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!("[port] {} taken between probe and bind", port);
                }
                Err(e) => {
                    return Err(BridgeError::ListenBindFailed { addr, source: e });
                }
            }
        }
        Err(self.exhausted())
    }

    fn exhausted(&self) -> BridgeError {
        BridgeError::PortRangeExhausted {
            start: self.range.start,
            end: self.range.end,
        }
    }
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Connect refused or timed out means nobody is listening.
async fn probe_in_use(port: u16) -> bool {
    matches!(
        time::timeout(PROBE_TIMEOUT, TcpStream::connect(loopback(port))).await,
        Ok(Ok(_))
    )
}
