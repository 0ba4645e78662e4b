//! Local terminal bridge.
//!
//! Runs one shell inside a pseudo-terminal and exposes it to a web front-end
//! over a loopback WebSocket guarded by an `Origin` check and a random path token.

pub mod bridge;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod errors;
pub mod exit;
pub mod origin;
pub mod port;
pub mod pty;
pub mod token;

pub use bridge::{BridgeServer, Endpoint};
pub use config::{BridgeConfig, EnvVar, PortRange, ShellConfig};
pub use coordinator::SessionCoordinator;
pub use errors::{BridgeError, BridgeResult};
pub use exit::ExitSignal;
pub use origin::OriginValidator;
pub use port::PortAllocator;
pub use pty::{PtyControl, PtySession, TerminalSize};
pub use token::AccessToken;
