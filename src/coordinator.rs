//! Session wiring.
//!
//! The session is created eagerly: by the time [`SessionCoordinator::start`]
//! returns, the shell is running and the listener is bound.

use crate::bridge::{BridgeServer, Endpoint};
use crate::config::BridgeConfig;
use crate::errors::BridgeResult;
use crate::exit::ExitSignal;
use crate::origin::OriginValidator;
use crate::port::PortAllocator;
use crate::pty::{PtySession, TerminalSize};
use crate::token::AccessToken;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct SessionCoordinator {
    session: Arc<PtySession>,
    endpoint: Endpoint,
    exit: ExitSignal,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl SessionCoordinator {
    /// Spawn the shell, bind the bridge and start serving.
    pub async fn start(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;

        let token = AccessToken::issue()?;
        let session = Arc::new(PtySession::start(&config.shell, config.initial_size)?);
        let exit = ExitSignal::new();
        let origins = OriginValidator::new(config.allowed_origins.iter().cloned());
        let allocator = PortAllocator::new(config.port_range);

        let server = match BridgeServer::bind(
            &allocator,
            &token,
            session.clone(),
            exit.clone(),
            origins,
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                if let Err(close_err) = session.close() {
                    warn!("[session] Failed to close PTY after bind error: {}", close_err);
                }
                return Err(e);
            }
        };

        let endpoint = server.endpoint().clone();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            let exit = exit.clone();
            async move {
                if let Err(e) = server.serve(shutdown).await {
                    error!("[session] Bridge server failed: {}", e);
                    exit.notify();
                }
            }
        });

        info!(
            "[session] Started (pid: {:?}, listen: {})",
            session.pid(),
            endpoint.listen_address
        );

        Ok(Self {
            session,
            endpoint,
            exit,
            shutdown,
            server,
        })
    }

    pub fn ws_url(&self) -> String {
        self.endpoint.ws_url()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn size(&self) -> Option<TerminalSize> {
        self.session.size()
    }

    /// Resize the terminal. Failures are logged and the previous size is kept.
    pub fn resize(&self, rows: u16, cols: u16) {
        if let Err(e) = self.session.resize(rows, cols) {
            warn!("[session] Resize to {}x{} failed: {}", rows, cols, e);
        }
    }

    pub fn exit_signal(&self) -> ExitSignal {
        self.exit.clone()
    }

    /// Run `callback` once when the session ends.
    pub fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let exit = self.exit.clone();
        tokio::spawn(async move {
            exit.wait().await;
            callback();
        });
    }

    /// Close the PTY and stop accepting connections.
    pub async fn shutdown(self) -> BridgeResult<()> {
        info!("[session] Shutting down");
        self.shutdown.cancel();
        let result = self.session.close();
        if let Err(e) = self.server.await {
            error!("[session] Bridge server task failed: {}", e);
        }
        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{PortRange, ShellConfig};
    use crate::errors::BridgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sh_config(start: u16, end: u16) -> BridgeConfig {
        BridgeConfig {
            shell: ShellConfig {
                path: "/bin/sh".to_string(),
                args: Vec::new(),
                ..ShellConfig::default()
            },
            port_range: PortRange::new(start, end).unwrap(),
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_publishes_url_and_resizes() {
        let coordinator = SessionCoordinator::start(sh_config(47300, 47319))
            .await
            .unwrap();

        let url = coordinator.ws_url();
        assert!(url.starts_with("ws://127.0.0.1:473"));
        assert!(url.contains("/ws/pty/"));
        // Token never changes for the life of the session
        assert_eq!(url, coordinator.ws_url());

        assert_eq!(coordinator.size(), Some(TerminalSize::new(60, 10)));
        coordinator.resize(24, 80);
        assert_eq!(coordinator.size(), Some(TerminalSize::new(24, 80)));

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shell_exit_runs_callback_once() {
        let mut config = sh_config(47320, 47339);
        config.shell.args = vec!["-c".to_string(), "exit 0".to_string()];
        let coordinator = SessionCoordinator::start(config).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        coordinator.on_exit({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::timeout(Duration::from_secs(10), coordinator.exit_signal().wait())
            .await
            .expect("exit signal should fire when the shell exits");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A second notify is ignored
        assert!(!coordinator.exit_signal().notify());
        coordinator.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let mut config = sh_config(47340, 47349);
        config.shell.path = "/nonexistent/shell".to_string();

        match SessionCoordinator::start(config).await {
            Err(BridgeError::SpawnFailed(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("start should fail"),
        }
    }

    #[tokio::test]
    async fn test_exhausted_range_closes_session() {
        let _held: Vec<_> = (47350..=47351)
            .map(|port| std::net::TcpListener::bind(("127.0.0.1", port)).unwrap())
            .collect();

        match SessionCoordinator::start(sh_config(47350, 47351)).await {
            Err(BridgeError::PortRangeExhausted { start, end }) => {
                assert_eq!((start, end), (47350, 47351));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("start should fail"),
        }
    }
}
