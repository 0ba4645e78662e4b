//! PTY Session Management
//!
//! Owns the pseudo-terminal and the shell running inside it. Control operations
//! (resize, close) and the current size share one lock; the output reader and the
//! input writer each have their own so a blocking read never stalls a resize.

mod session;
mod types;

pub use session::{NativePty, PtyControl, PtyReader, PtySession, PtyWriter, PTY_READ_BUFFER_SIZE};
pub use types::*;
