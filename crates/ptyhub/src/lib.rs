//! ptyhub: multi-session PTY manager.
//!
//! Spawns shells on pseudo-terminals, reconstructs each shell's screen from
//! its output, and keeps a bounded scrollback so callers can poll for output
//! instead of holding a streaming connection.

pub mod config;
pub mod protocol;
pub mod session;

pub use config::{CliOverrides, ServerConfig};
pub use session::{SessionInfo, SessionManager, SessionOptions};
