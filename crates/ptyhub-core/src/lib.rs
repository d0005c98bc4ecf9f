//! ptyhub-core: terminal emulation and scrollback for the PTY session manager.
//!
//! Provides the screen grid fed by raw PTY output, the bounded line history
//! that collects rows scrolled off the top, and the shared error type.

pub mod error;
pub mod history;
pub mod screen;

// Re-export commonly used items at crate root.
pub use error::{PtyHubError, PtyHubResult};
pub use history::{HistoryBuffer, TerminalOutput, DEFAULT_MAX_HISTORY_LINES};
pub use screen::{Screen, DEFAULT_COLS, DEFAULT_ROWS};
