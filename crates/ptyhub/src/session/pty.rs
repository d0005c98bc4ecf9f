//! PTY wrapper using portable-pty.
//!
//! Opens a pseudo-terminal running the configured shell and exposes the
//! master side as a non-blocking duplex. Dedicated reader and writer threads
//! perform the blocking device I/O and exchange chunks over bounded queues,
//! so neither reading nor writing ever waits on the child process.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use ptyhub_core::{PtyHubError, PtyHubResult};
use std::io::{Read, Write};
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
};
use tracing::{debug, info, warn};

/// Size of a single read from the PTY master.
const READ_CHUNK_SIZE: usize = 4096;
/// Chunks queued before the reader thread stops pulling from the device.
const READ_QUEUE_CHUNKS: usize = 256;
/// Pending writes accepted before `write` reports the input queue full.
const WRITE_QUEUE_CHUNKS: usize = 256;

/// A managed PTY instance.
pub struct PtyHandle {
    /// The master side; dropped on terminate to release the descriptor.
    master: Option<Box<dyn MasterPty + Send>>,
    /// Input queue drained by the writer thread.
    input: Option<mpsc::Sender<Vec<u8>>>,
    /// Child process handle.
    child: Box<dyn Child + Send + Sync>,
    /// Output chunks produced by the reader thread.
    output: mpsc::Receiver<Vec<u8>>,
    /// Set once the reader thread saw EOF or an error.
    output_closed: bool,
    terminated: bool,
    rows: u16,
    cols: u16,
}

impl PtyHandle {
    /// Spawn `shell` on a new PTY of the given size.
    pub fn spawn(label: &str, shell: &str, term: &str, rows: u16, cols: u16) -> PtyHubResult<Self> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyHubError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", term);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyHubError::Spawn(format!("failed to spawn {shell}: {e}")))?;
        // The child holds its own copy of the slave; ours would keep the
        // device open after the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyHubError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyHubError::Spawn(format!("failed to take PTY writer: {e}")))?;

        let (tx, rx) = mpsc::channel(READ_QUEUE_CHUNKS);
        std::thread::Builder::new()
            .name(format!("pty-reader-{label}"))
            .spawn(move || pump_output(reader, tx))
            .map_err(|e| PtyHubError::Spawn(format!("failed to start PTY reader: {e}")))?;

        let (input_tx, input_rx) = mpsc::channel(WRITE_QUEUE_CHUNKS);
        std::thread::Builder::new()
            .name(format!("pty-writer-{label}"))
            .spawn(move || pump_input(writer, input_rx))
            .map_err(|e| PtyHubError::Spawn(format!("failed to start PTY writer: {e}")))?;

        info!(shell, rows, cols, pid = ?child.process_id(), "PTY spawned");

        Ok(Self {
            master: Some(pair.master),
            input: Some(input_tx),
            child,
            output: rx,
            output_closed: false,
            terminated: false,
            rows,
            cols,
        })
    }

    /// Queue raw bytes for the PTY input. Never blocks: a child that stopped
    /// reading shows up as a full queue, and a dead device as a closed one.
    pub fn write(&mut self, data: &[u8]) -> PtyHubResult<()> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| PtyHubError::closed("write"))?;
        match input.try_send(data.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PtyHubError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "terminal input queue full",
            ))),
            Err(TrySendError::Closed(_)) => Err(PtyHubError::closed("write")),
        }
    }

    /// Drain every chunk that is ready right now. Never blocks; returns an
    /// empty vector when the child has produced nothing new.
    pub fn read_available(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        if self.output_closed {
            return data;
        }
        loop {
            match self.output.try_recv() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("PTY output closed");
                    self.output_closed = true;
                    break;
                }
            }
        }
        data
    }

    /// Resize the PTY.
    pub fn resize(&mut self, rows: u16, cols: u16) -> PtyHubResult<()> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| PtyHubError::closed("resize"))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                PtyHubError::Io(std::io::Error::other(format!("PTY resize failed: {e}")))
            })?;
        self.rows = rows;
        self.cols = cols;
        debug!(rows, cols, "PTY resized");
        Ok(())
    }

    /// Non-blocking exit check. Returns the exit code once the child is gone.
    pub fn try_wait(&mut self) -> Option<i32> {
        self.child
            .try_wait()
            .ok()
            .flatten()
            .map(|status| status.exit_code() as i32)
    }

    /// Whether the child has exited or its output stream has closed.
    pub fn has_exited(&mut self) -> bool {
        self.output_closed || self.try_wait().is_some()
    }

    /// Kill the child's process group and release the descriptors.
    ///
    /// The kill comes first so a writer thread stuck on a full device wakes
    /// with an error and exits. An already exited child counts as success.
    /// Calling this twice is a no-op.
    pub fn terminate(&mut self) -> PtyHubResult<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.input = None;
        self.output.close();

        if let Some(code) = self.try_wait() {
            debug!(code, "PTY child already exited");
            self.master = None;
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.process_id() {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // The child is a session leader, so its pid is also its group id.
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pid, error = %e, "killpg failed"),
            }
        }
        self.master = None;

        if let Err(e) = self.child.kill() {
            if self.try_wait().is_none() {
                return Err(PtyHubError::Io(e));
            }
        }
        let code = self.try_wait();
        info!(?code, "PTY child terminated");
        Ok(())
    }

    /// OS process id of the child, if known.
    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Current terminal size as `(rows, cols)`.
    pub fn size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(error = %e, "failed to terminate PTY on drop");
        }
    }
}

/// Writer thread body: copy queued input to the master until the queue is
/// dropped or the device refuses a write.
fn pump_input(mut writer: Box<dyn Write + Send>, mut input: mpsc::Receiver<Vec<u8>>) {
    while let Some(data) = input.blocking_recv() {
        if data.is_empty() {
            continue;
        }
        if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
            debug!(error = %e, "PTY writer stopped");
            break;
        }
    }
}

/// Reader thread body: forward master output until EOF, error, or until the
/// receiving side is gone.
fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // EIO is how Linux reports the slave side closing.
            Err(e) => {
                debug!(error = %e, "PTY reader stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn drain_until(pty: &mut PtyHandle, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen.extend(pty.read_available());
            if String::from_utf8_lossy(&seen).contains(needle) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[test]
    fn read_available_does_not_block() {
        let mut pty = PtyHandle::spawn("t-idle", "/bin/cat", "dumb", 24, 80).unwrap();
        let start = Instant::now();
        let data = pty.read_available();
        assert!(data.is_empty());
        assert!(start.elapsed() < Duration::from_millis(500));
        pty.terminate().unwrap();
    }

    #[test]
    fn echoes_written_bytes() {
        let mut pty = PtyHandle::spawn("t-echo", "/bin/cat", "dumb", 24, 80).unwrap();
        pty.write(b"ping\n").unwrap();
        let out = drain_until(&mut pty, "ping");
        assert!(out.contains("ping"));
        pty.terminate().unwrap();
    }

    #[test]
    fn write_returns_while_child_is_backed_up() {
        let mut pty = PtyHandle::spawn("t-bulk", "/bin/cat", "dumb", 24, 80).unwrap();
        let line = format!("{}\n", "a".repeat(63));
        let chunk = line.repeat(1024);
        let start = Instant::now();
        for _ in 0..64 {
            pty.write(chunk.as_bytes()).unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(2));
        pty.terminate().unwrap();
        assert!(pty.write(b"late\n").is_err());
    }

    #[test]
    fn resize_updates_size() {
        let mut pty = PtyHandle::spawn("t-resize", "/bin/cat", "dumb", 24, 80).unwrap();
        pty.resize(30, 100).unwrap();
        assert_eq!(pty.size(), (30, 100));
        pty.terminate().unwrap();
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut pty = PtyHandle::spawn("t-term", "/bin/cat", "dumb", 24, 80).unwrap();
        assert!(pty.process_id().is_some());
        pty.terminate().unwrap();
        pty.terminate().unwrap();
        assert!(pty.write(b"late\n").is_err());
        assert!(pty.resize(10, 10).is_err());
        let _ = pty.read_available();
    }

    #[test]
    fn spawn_missing_shell_fails() {
        let err = PtyHandle::spawn("t-missing", "/nonexistent/ptyhub-shell", "dumb", 24, 80)
            .err()
            .unwrap();
        assert!(matches!(err, PtyHubError::Spawn(_)));
    }
}
