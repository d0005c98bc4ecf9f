//! Session management: PTY lifecycle, screen reconstruction, history.

pub mod manager;
pub mod pty;

pub use manager::{default_shell, Session, SessionInfo, SessionManager, SessionOptions};
pub use pty::PtyHandle;
