//! ptyhub: PTY session manager driven over stdio.
//!
//! Reads one JSON request per line on stdin, runs it against the session
//! manager and writes one JSON response per line on stdout. Logs go to
//! stderr.

use anyhow::{Context, Result};
use clap::Parser;
use ptyhub::config::{CliOverrides, ServerConfig};
use ptyhub::protocol;
use ptyhub::session::SessionManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

/// ptyhub: multi-session PTY manager
#[derive(Parser, Debug)]
#[command(name = "ptyhub", version, about = "Multi-session PTY manager")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.ptyhub/config.toml")]
    config: String,

    /// Shell to spawn for new sessions (default: $SHELL, then /bin/sh)
    #[arg(long)]
    shell: Option<String>,

    /// History lines retained per session
    #[arg(long)]
    max_history_lines: Option<usize>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Close sessions idle for this many seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout carries the protocol.
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let overrides = CliOverrides {
        shell: cli.shell.clone(),
        max_history_lines: cli.max_history_lines,
        max_sessions: cli.max_sessions,
        idle_timeout: cli.idle_timeout,
    };
    let config_path = PathBuf::from(&cli.config);
    let config = ServerConfig::load(Some(&config_path), &overrides)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        shell = %config.shell,
        max_history_lines = config.max_history_lines,
        "starting ptyhub"
    );

    let manager = Arc::new(SessionManager::new(config.session_options()));

    if let Some(idle_timeout) = config.idle_timeout() {
        spawn_gc(manager.clone(), idle_timeout, Duration::from_secs(config.gc_interval));
    }

    tokio::select! {
        result = serve_stdio(&manager) => {
            if let Err(e) = result {
                error!(error = %e, "stdio loop failed");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    manager.shutdown().await;
    info!("ptyhub stopped");
    Ok(())
}

/// Answer requests until stdin closes.
async fn serve_stdio(manager: &SessionManager) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = protocol::handle_line(manager, &line).await;
        let mut out = serde_json::to_string(&response).context("failed to encode response")?;
        out.push('\n');
        stdout
            .write_all(out.as_bytes())
            .await
            .context("failed to write stdout")?;
        stdout.flush().await.context("failed to flush stdout")?;
    }

    debug!("stdin closed");
    Ok(())
}

/// Periodically close sessions that have been idle too long.
fn spawn_gc(manager: Arc<SessionManager>, idle_timeout: Duration, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = manager.gc(idle_timeout).await;
            if !removed.is_empty() {
                info!(count = removed.len(), "closed idle sessions");
            }
        }
    });
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
