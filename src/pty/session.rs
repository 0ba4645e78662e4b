//! PTY Session implementation
//!
//! Handles the single shell session behind the bridge:
//! - Process spawning inside a native pseudo-terminal
//! - Blocking input/output on the master side
//! - Resize and teardown

use super::types::TerminalSize;
use crate::config::ShellConfig;
use crate::errors::{BridgeError, BridgeResult};
use anyhow::Context;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair};
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

/// Largest chunk read from the PTY in one call
pub const PTY_READ_BUFFER_SIZE: usize = 1024;

pub type PtyReader = Box<dyn Read + Send>;
pub type PtyWriter = Box<dyn Write + Send>;

/// Control side of a pseudo-terminal.
///
/// [`NativePty`] is the real implementation; anything else can stand in for it
/// when a session is assembled with [`PtySession::from_parts`].
pub trait PtyControl: Send {
    /// Apply a new window size to the terminal device.
    fn resize(&mut self, size: TerminalSize) -> anyhow::Result<()>;

    /// Stop the process attached to the terminal.
    fn terminate(&mut self) -> io::Result<()>;

    fn process_id(&self) -> Option<u32> {
        None
    }
}

/// A native PTY master plus the shell spawned on its slave end
pub struct NativePty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyControl for NativePty {
    fn resize(&mut self, size: TerminalSize) -> anyhow::Result<()> {
        self.master.resize(size.into())
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }

    fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }
}

/// The control handle and the size it was last set to. Both live or die together.
struct PtyHandle {
    control: Box<dyn PtyControl>,
    size: TerminalSize,
}

/// A shell running inside a pseudo-terminal
pub struct PtySession {
    handle: Mutex<Option<PtyHandle>>,
    reader: Mutex<PtyReader>,
    writer: Mutex<Option<PtyWriter>>,
    pid: Option<u32>,
}

impl PtySession {
    /// Open a PTY and spawn the configured shell inside it.
    ///
    /// The child inherits this process's environment with `config.env` applied on
    /// top, and starts in `config.working_dir` or `$HOME`.
    pub fn start(config: &ShellConfig, size: TerminalSize) -> BridgeResult<Self> {
        let pty_system = native_pty_system();

        let PtyPair { master, slave } = pty_system
            .openpty(size.into())
            .context("Failed to open PTY")
            .map_err(BridgeError::SpawnFailed)?;

        let cwd = config.resolve_working_dir();
        let mut cmd = CommandBuilder::new(&config.path);
        cmd.args(&config.args);
        cmd.cwd(&cwd);
        for var in &config.env {
            cmd.env(&var.name, &var.value);
        }

        let child = slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", config.path))
            .map_err(BridgeError::SpawnFailed)?;
        // The slave end must close here so the master sees EOF once the shell exits.
        drop(slave);

        let reader = master
            .try_clone_reader()
            .context("Failed to clone PTY reader")
            .map_err(BridgeError::SpawnFailed)?;
        let writer = master
            .take_writer()
            .context("Failed to take PTY writer")
            .map_err(BridgeError::SpawnFailed)?;

        let control = NativePty { master, child };
        info!(
            "[pty] Shell started: {} {:?} (pid: {:?}, cwd: {}, size: {}x{})",
            config.path,
            config.args,
            control.process_id(),
            cwd.display(),
            size.rows,
            size.cols
        );

        Ok(Self::from_parts(Box::new(control), reader, writer, size))
    }

    /// Assemble a session from an already running terminal.
    pub fn from_parts(
        control: Box<dyn PtyControl>,
        reader: PtyReader,
        writer: PtyWriter,
        size: TerminalSize,
    ) -> Self {
        let pid = control.process_id();
        Self {
            handle: Mutex::new(Some(PtyHandle { control, size })),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current size, or `None` once the session is closed
    pub fn size(&self) -> Option<TerminalSize> {
        self.handle.lock().as_ref().map(|handle| handle.size)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.lock().is_none()
    }

    /// Resize the PTY. Resizing to the current size does nothing.
    ///
    /// On failure the previous size is kept.
    pub fn resize(&self, rows: u16, cols: u16) -> BridgeResult<()> {
        let mut guard = self.handle.lock();
        let handle = guard.as_mut().ok_or(BridgeError::SessionClosed)?;

        let size = TerminalSize::new(rows, cols);
        if handle.size == size {
            return Ok(());
        }

        handle
            .control
            .resize(size)
            .map_err(BridgeError::ResizeFailed)?;
        handle.size = size;
        debug!("[pty] Resized to {}x{}", rows, cols);
        Ok(())
    }

    /// Blocking read of PTY output into `buf`. Returns 0 at end of stream.
    pub fn read(&self, buf: &mut [u8]) -> BridgeResult<usize> {
        if self.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        let mut reader = self.reader.lock();
        reader.read(buf).map_err(BridgeError::Read)
    }

    /// Blocking write of every byte in `data` to the PTY input.
    pub fn write(&self, data: &[u8]) -> BridgeResult<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(BridgeError::SessionClosed)?;
        writer.write_all(data).map_err(BridgeError::Write)?;
        writer.flush().map_err(BridgeError::Write)
    }

    /// Terminate the shell and release the terminal. Closing twice is a no-op.
    pub fn close(&self) -> BridgeResult<()> {
        let handle = self.handle.lock().take();
        let Some(mut handle) = handle else {
            debug!("[pty] Session already closed");
            return Ok(());
        };

        info!("[pty] Closing terminal (pid: {:?})", self.pid);
        let result = handle.control.terminate().map_err(BridgeError::CloseFailed);
        // A write blocked on a full input queue only returns after the hangup.
        self.writer.lock().take();
        drop(handle);
        result
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("[pty] Failed to close terminal on drop: {}", e);
        }
    }
}
