//! Session lifecycle management.
//!
//! Tracks all live sessions keyed by caller-supplied id, handles creation,
//! input, polling reads, resizing, teardown and garbage collection of idle
//! sessions.

use super::pty::PtyHandle;
use ptyhub_core::{
    HistoryBuffer, PtyHubError, PtyHubResult, Screen, TerminalOutput, DEFAULT_COLS,
    DEFAULT_MAX_HISTORY_LINES, DEFAULT_ROWS,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default cap on concurrently live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 100;
/// Default `TERM` exported to spawned shells.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Shell used when neither config nor `$SHELL` names one.
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Settings applied to every session the manager creates.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub shell: String,
    pub term: String,
    /// Geometry used when a create request leaves the size out.
    pub rows: u16,
    pub cols: u16,
    pub max_history_lines: usize,
    pub max_sessions: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            term: DEFAULT_TERM.to_string(),
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            max_history_lines: DEFAULT_MAX_HISTORY_LINES,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// One shell: its PTY, the screen reconstructed from its output, and the
/// lines that scrolled off that screen.
pub struct Session {
    /// Caller-supplied session identifier.
    pub id: String,
    pty: PtyHandle,
    screen: Screen,
    history: HistoryBuffer,
    /// When the session was created.
    pub created_at: Instant,
    /// Last write, or last read that produced new output.
    pub last_activity: Instant,
    /// Set once the session has been torn down.
    closed: bool,
}

/// Information returned when listing sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub rows: u16,
    pub cols: u16,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub history_lines: usize,
    /// Lines ever moved into history, including ones since evicted.
    pub retired_lines: u64,
    pub exited: bool,
}

impl Session {
    fn new(id: String, pty: PtyHandle, max_history_lines: usize) -> Self {
        let (rows, cols) = pty.size();
        let now = Instant::now();
        Self {
            id,
            pty,
            screen: Screen::new(rows, cols),
            history: HistoryBuffer::new(max_history_lines),
            created_at: now,
            last_activity: now,
            closed: false,
        }
    }

    fn ensure_open(&self) -> PtyHubResult<()> {
        if self.closed {
            return Err(PtyHubError::SessionNotFound(self.id.clone()));
        }
        Ok(())
    }

    /// Queue input bytes for the shell.
    pub fn write(&mut self, data: &[u8]) -> PtyHubResult<()> {
        self.ensure_open()?;
        self.pty.write(data)?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Drain pending output into the screen and history, then render.
    pub fn read(&mut self, max_lines: Option<usize>) -> PtyHubResult<TerminalOutput> {
        self.ensure_open()?;
        let bytes = self.pty.read_available();
        if !bytes.is_empty() {
            self.screen.feed(&bytes);
            let retired = self.screen.take_retired();
            debug!(
                session_id = %self.id,
                bytes = bytes.len(),
                retired = retired.len(),
                "processed terminal output"
            );
            self.history.append(retired);
            self.last_activity = Instant::now();
        }
        Ok(self
            .history
            .render(&self.id, &self.screen.snapshot(), max_lines))
    }

    /// Resize the device and the screen together.
    pub fn resize(&mut self, rows: u16, cols: u16) -> PtyHubResult<()> {
        self.ensure_open()?;
        self.pty.resize(rows, cols)?;
        self.screen.resize(rows, cols);
        Ok(())
    }

    fn terminate(&mut self) -> PtyHubResult<()> {
        self.closed = true;
        self.pty.terminate()
    }

    /// Current `(rows, cols)`.
    pub fn size(&self) -> (u16, u16) {
        self.screen.size()
    }

    pub fn info(&mut self) -> SessionInfo {
        let (rows, cols) = self.size();
        SessionInfo {
            id: self.id.clone(),
            pid: self.pty.process_id(),
            rows,
            cols,
            age_secs: self.created_at.elapsed().as_secs(),
            idle_secs: self.last_activity.elapsed().as_secs(),
            history_lines: self.history.len(),
            retired_lines: self.history.total_appended(),
            exited: self.pty.has_exited(),
        }
    }
}

/// Manages all live sessions.
///
/// The table lock only guards insert, lookup and remove. Each session has its
/// own lock, so a stalled shell never holds up work on another session.
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
    options: SessionOptions,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Spawn a shell for `session_id`. Ids must not collide with a live
    /// session.
    pub async fn create_session(&self, session_id: &str, rows: u16, cols: u16) -> PtyHubResult<String> {
        check_size(rows, cols)?;

        let sessions = self.sessions.read().await;
        if sessions.contains_key(session_id) {
            return Err(PtyHubError::DuplicateSession(session_id.to_string()));
        }
        if sessions.len() >= self.options.max_sessions {
            return Err(PtyHubError::SessionLimit(self.options.max_sessions));
        }
        drop(sessions);

        let label = session_id.to_string();
        let shell = self.options.shell.clone();
        let term = self.options.term.clone();
        let pty = blocking(move || PtyHandle::spawn(&label, &shell, &term, rows, cols)).await?;
        let pid = pty.process_id();
        let session = Session::new(session_id.to_string(), pty, self.options.max_history_lines);

        let mut sessions = self.sessions.write().await;
        // Other creates may have finished while we were spawning; dropping
        // our session kills the extra shell.
        if sessions.contains_key(session_id) {
            return Err(PtyHubError::DuplicateSession(session_id.to_string()));
        }
        if sessions.len() >= self.options.max_sessions {
            return Err(PtyHubError::SessionLimit(self.options.max_sessions));
        }
        sessions.insert(session_id.to_string(), Arc::new(Mutex::new(session)));
        info!(session_id, rows, cols, ?pid, "session created");

        Ok(session_id.to_string())
    }

    /// Send input to a session. The bytes are handed to the session's
    /// writer thread, so a shell that stopped reading never holds the
    /// session lock.
    pub async fn write(&self, session_id: &str, data: &[u8]) -> PtyHubResult<()> {
        let session = self.get(session_id).await?;
        let mut session = session.lock().await;
        debug!(session_id, bytes = data.len(), "writing to terminal");
        session.write(data)
    }

    /// Poll a session: take whatever output is ready and return history plus
    /// the current screen, keeping only the last `max_lines` lines if given.
    pub async fn read(&self, session_id: &str, max_lines: Option<usize>) -> PtyHubResult<TerminalOutput> {
        let session = self.get(session_id).await?;
        let mut session = session.lock().await;
        session.read(max_lines)
    }

    /// Resize a session's device and screen.
    pub async fn resize(&self, session_id: &str, rows: u16, cols: u16) -> PtyHubResult<()> {
        check_size(rows, cols)?;
        let session = self.get(session_id).await?;
        let mut session = session.lock().await;
        session.resize(rows, cols)?;
        info!(session_id, rows, cols, "session resized");
        Ok(())
    }

    /// Terminate and forget a session. Unknown ids are ignored so duplicate
    /// teardown calls are harmless.
    pub async fn close_session(&self, session_id: &str) {
        let removed = self.sessions.write().await.remove(session_id);
        let Some(session) = removed else {
            warn!(session_id, "close requested for unknown session");
            return;
        };
        terminate(session).await;
        info!(session_id, "session closed");
    }

    /// List all live sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.lock().await.info());
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Close sessions idle for longer than `idle_timeout`.
    ///
    /// Sessions busy with another operation count as active. Returns the ids
    /// that were removed.
    pub async fn gc(&self, idle_timeout: Duration) -> Vec<String> {
        let sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, session) in sessions {
            let Ok(session) = session.try_lock() else {
                continue;
            };
            let idle = session.last_activity.elapsed();
            if idle > idle_timeout {
                warn!(session_id = %id, idle_secs = idle.as_secs(), "session expired (idle)");
                expired.push(id);
            }
        }

        for id in &expired {
            self.close_session(id).await;
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "GC removed sessions");
        }
        expired
    }

    /// Terminate every session.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (_, session) in drained {
            terminate(session).await;
        }
        info!(count, "all sessions closed");
    }

    /// Whether a live session is registered under `session_id`.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Get the number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn get(&self, session_id: &str) -> PtyHubResult<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| PtyHubError::SessionNotFound(session_id.to_string()))
    }
}

fn check_size(rows: u16, cols: u16) -> PtyHubResult<()> {
    if rows == 0 || cols == 0 {
        return Err(PtyHubError::InvalidSize { rows, cols });
    }
    Ok(())
}

/// Wait for in-flight work on the session, then kill its shell.
async fn terminate(session: Arc<Mutex<Session>>) {
    let mut session = session.lock_owned().await;
    let id = session.id.clone();
    if let Err(e) = blocking(move || session.terminate()).await {
        warn!(session_id = %id, error = %e, "error while closing session");
    }
}

/// Run PTY work that may block in the kernel off the async executor.
async fn blocking<F, R>(f: F) -> PtyHubResult<R>
where
    F: FnOnce() -> PtyHubResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PtyHubError::Io(std::io::Error::other(format!("join error: {e}"))))?
}
