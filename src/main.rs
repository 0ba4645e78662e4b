use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pty_bridge::control::{run_control, spawn_line_reader, ControlEvent, ControlExit};
use pty_bridge::{BridgeConfig, EnvVar, PortRange, SessionCoordinator};
use tokio::io::{self, AsyncWriteExt};
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Expose a shell in a pseudo-terminal over a loopback WebSocket"
)]
struct Args {
    /// JSON config file. Flags below override its values.
    #[arg(long, env = "PTY_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Shell executable to run
    #[arg(long, env = "PTY_BRIDGE_SHELL")]
    shell: Option<String>,

    /// Argument for the shell (repeatable)
    #[arg(long = "shell-arg", allow_hyphen_values = true)]
    shell_args: Vec<String>,

    /// Extra environment variable for the shell, NAME=VALUE (repeatable)
    #[arg(long = "env")]
    env: Vec<EnvVar>,

    /// Working directory for the shell (default: $HOME)
    #[arg(long, env = "PTY_BRIDGE_CWD")]
    cwd: Option<PathBuf>,

    /// Loopback ports to try, START-END
    #[arg(long, env = "PTY_BRIDGE_PORT_RANGE")]
    port_range: Option<PortRange>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_json_file(path)?,
            None => BridgeConfig::default(),
        };

        if let Some(shell) = self.shell {
            config.shell.path = shell;
            config.shell.args.clear();
        }
        if !self.shell_args.is_empty() {
            config.shell.args = self.shell_args;
        }
        for var in self.env {
            config.shell.set_env(var);
        }
        if let Some(cwd) = self.cwd {
            config.shell.working_dir = Some(cwd);
        }
        if let Some(range) = self.port_range {
            config.port_range = range;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pty_bridge=info".into()),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = Args::parse().into_config()?;
    info!(
        shell = %config.shell.path,
        port_range = %config.port_range,
        "Starting pty-bridge"
    );

    let coordinator = SessionCoordinator::start(config)
        .await
        .context("failed to start terminal session")?;

    let ready = serde_json::to_string(&ControlEvent::Ready {
        ws_url: coordinator.ws_url(),
    })?;
    let mut stdout = io::stdout();
    stdout.write_all(format!("{}\n", ready).as_bytes()).await?;
    stdout.flush().await?;

    let exit = coordinator.exit_signal();
    // Not tokio's stdin: its pending read would keep the runtime from shutting down.
    let control = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
        .context("failed to start control input reader")?;

    tokio::select! {
        _ = exit.wait() => {
            info!("Shell exited");
        }
        reason = run_control(control, &coordinator) => match reason {
            ControlExit::Quit => info!("Quit requested"),
            ControlExit::InputClosed => info!("Control input closed"),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    if let Err(e) = coordinator.shutdown().await {
        warn!("Failed to close terminal cleanly: {}", e);
    }
    Ok(())
}
