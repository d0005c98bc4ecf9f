use thiserror::Error;

/// Errors produced by the PTY session layer.
#[derive(Debug, Error)]
pub enum PtyHubError {
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    DuplicateSession(String),

    #[error("invalid terminal size: {rows}x{cols}")]
    InvalidSize { rows: u16, cols: u16 },

    #[error("max sessions ({0}) reached")]
    SessionLimit(usize),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtyHubError {
    /// Build an [`PtyHubError::Io`] for an operation against a device that is
    /// no longer usable.
    pub fn closed(what: &str) -> Self {
        PtyHubError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{what}: terminal device closed"),
        ))
    }
}

pub type PtyHubResult<T> = Result<T, PtyHubError>;
