//! Loopback WebSocket server for the PTY session.
//!
//! Serves exactly one route, `/ws/pty/<token>`. Unknown paths get a 404, so the
//! token is checked by the router itself.

mod pump;

pub use pump::PTY_OUTPUT_CHANNEL_SIZE;

use crate::errors::{BridgeError, BridgeResult};
use crate::exit::ExitSignal;
use crate::origin::OriginValidator;
use crate::port::PortAllocator;
use crate::pty::PtySession;
use crate::token::AccessToken;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use pump::OutputQueue;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const WS_PATH_PREFIX: &str = "/ws/pty/";

/// Where the bridge can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub listen_address: SocketAddr,
    pub path: String,
}

impl Endpoint {
    pub fn new(listen_address: SocketAddr, token: &AccessToken) -> Self {
        Self {
            listen_address,
            path: format!("{}{}", WS_PATH_PREFIX, token.as_str()),
        }
    }

    /// URL handed to the front-end
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.listen_address, self.path)
    }
}

#[derive(Clone)]
struct BridgeState {
    session: Arc<PtySession>,
    output: OutputQueue,
    origins: OriginValidator,
    connected: Arc<AtomicBool>,
}

/// Holds the single connection slot until dropped
struct ConnectionSlot(Arc<AtomicBool>);

impl ConnectionSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Self(flag.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BridgeServer {
    listener: TcpListener,
    endpoint: Endpoint,
    session: Arc<PtySession>,
    exit: ExitSignal,
    origins: OriginValidator,
}

impl BridgeServer {
    /// Bind the first free port from `allocator` and prepare the route for `token`.
    pub async fn bind(
        allocator: &PortAllocator,
        token: &AccessToken,
        session: Arc<PtySession>,
        exit: ExitSignal,
        origins: OriginValidator,
    ) -> BridgeResult<Self> {
        let (listener, addr) = allocator.bind().await?;
        Ok(Self {
            listener,
            endpoint: Endpoint::new(addr, token),
            session,
            exit,
            origins,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start reading the PTY and accept connections until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> BridgeResult<()> {
        let addr = self.endpoint.listen_address;
        let state = BridgeState {
            output: pump::spawn_pty_reader(self.session.clone(), self.exit.clone()),
            session: self.session,
            origins: self.origins,
            connected: Arc::new(AtomicBool::new(false)),
        };

        let app = Router::new()
            .route(&self.endpoint.path, get(pty_websocket))
            .fallback(unknown_route)
            .with_state(state);

        info!("[bridge] Listening on http://{}", addr);
        axum::serve(self.listener, app)
            .tcp_nodelay(true)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|source| BridgeError::ListenBindFailed { addr, source })?;

        info!("[bridge] Server stopped");
        Ok(())
    }
}

/// WebSocket for PTY terminal I/O
async fn pty_websocket(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.origins.validate_headers(&headers) {
        warn!(
            "[bridge] Rejected upgrade, origin: {:?}",
            headers.get(header::ORIGIN)
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    if state.session.is_closed() {
        return StatusCode::GONE.into_response();
    }

    let Some(slot) = ConnectionSlot::acquire(&state.connected) else {
        warn!("[bridge] Rejected second concurrent connection");
        return StatusCode::CONFLICT.into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let _slot = slot;
        pump::run_connection(socket, state.session, state.output).await;
    })
}

async fn unknown_route(uri: Uri) -> StatusCode {
    // Never log the path itself: a near-miss may still contain most of the token.
    warn!("[bridge] Request for unknown route ({} bytes)", uri.path().len());
    StatusCode::NOT_FOUND
}
