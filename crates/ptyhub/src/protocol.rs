//! Newline-delimited JSON request handling.
//!
//! Each request names one terminal operation in its `op` field. Responses
//! mirror the shapes service-registration layers expect: `{"status":
//! "success"}` for commands, the terminal output object for reads, and
//! `{"status": "error", "error": ...}` for failures.

use crate::session::SessionManager;
use ptyhub_core::PtyHubResult;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// A single client request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Omitted dimensions fall back to the configured geometry.
    CreateTerminal {
        session_id: String,
        #[serde(default)]
        rows: Option<u16>,
        #[serde(default)]
        cols: Option<u16>,
    },
    WriteToTerminal {
        session_id: String,
        data: String,
    },
    ReadFromTerminal {
        session_id: String,
        #[serde(default)]
        max_lines: Option<usize>,
    },
    ResizeTerminal {
        session_id: String,
        #[serde(default)]
        rows: Option<u16>,
        #[serde(default)]
        cols: Option<u16>,
    },
    CloseTerminal {
        session_id: String,
    },
    ListTerminals,
}

/// Parse and execute one request line.
pub async fn handle_line(manager: &SessionManager, line: &str) -> Value {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(manager, request).await,
        Err(e) => error_response(format!("invalid request: {e}")),
    }
}

/// Execute a request against the manager.
pub async fn handle(manager: &SessionManager, request: Request) -> Value {
    debug!(?request, "handling request");
    match dispatch(manager, request).await {
        Ok(value) => value,
        Err(e) => error_response(e.to_string()),
    }
}

async fn dispatch(manager: &SessionManager, request: Request) -> PtyHubResult<Value> {
    let options = manager.options();
    match request {
        Request::CreateTerminal {
            session_id,
            rows,
            cols,
        } => {
            let rows = rows.unwrap_or(options.rows);
            let cols = cols.unwrap_or(options.cols);
            let id = manager.create_session(&session_id, rows, cols).await?;
            Ok(json!({ "status": "success", "session_id": id }))
        }
        Request::WriteToTerminal { session_id, data } => {
            manager.write(&session_id, data.as_bytes()).await?;
            Ok(success())
        }
        Request::ReadFromTerminal {
            session_id,
            max_lines,
        } => {
            let output = manager.read(&session_id, max_lines).await?;
            Ok(json!(output))
        }
        Request::ResizeTerminal {
            session_id,
            rows,
            cols,
        } => {
            let rows = rows.unwrap_or(options.rows);
            let cols = cols.unwrap_or(options.cols);
            manager.resize(&session_id, rows, cols).await?;
            Ok(success())
        }
        Request::CloseTerminal { session_id } => {
            manager.close_session(&session_id).await;
            Ok(success())
        }
        Request::ListTerminals => Ok(json!({ "sessions": manager.list().await })),
    }
}

fn success() -> Value {
    json!({ "status": "success" })
}

fn error_response(message: String) -> Value {
    json!({ "status": "error", "error": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;
    use std::time::{Duration, Instant};

    fn cat_manager() -> SessionManager {
        SessionManager::new(SessionOptions {
            shell: "/bin/cat".into(),
            term: "dumb".into(),
            ..SessionOptions::default()
        })
    }

    #[test]
    fn parse_create_with_defaults() {
        let req: Request =
            serde_json::from_str(r#"{"op":"create_terminal","session_id":"a"}"#).unwrap();
        assert_eq!(
            req,
            Request::CreateTerminal {
                session_id: "a".into(),
                rows: None,
                cols: None,
            }
        );
    }

    #[test]
    fn parse_read_with_max_lines() {
        let req: Request = serde_json::from_str(
            r#"{"op":"read_from_terminal","session_id":"a","max_lines":10}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            Request::ReadFromTerminal {
                session_id: "a".into(),
                max_lines: Some(10),
            }
        );
    }

    #[test]
    fn parse_list() {
        let req: Request = serde_json::from_str(r#"{"op":"list_terminals"}"#).unwrap();
        assert_eq!(req, Request::ListTerminals);
    }

    #[test]
    fn unknown_op_fails_to_parse() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"reboot"}"#).is_err());
    }

    #[tokio::test]
    async fn malformed_line_is_error_response() {
        let manager = cat_manager();
        let resp = handle_line(&manager, "not json").await;
        assert_eq!(resp["status"], "error");
        assert!(resp["error"].as_str().unwrap().starts_with("invalid request"));
    }

    #[tokio::test]
    async fn unknown_session_errors_but_close_succeeds() {
        let manager = cat_manager();
        let resp = handle_line(&manager, r#"{"op":"read_from_terminal","session_id":"nope"}"#).await;
        assert_eq!(resp["status"], "error");
        assert_eq!(resp["error"], "session not found: nope");

        let resp = handle_line(&manager, r#"{"op":"close_terminal","session_id":"nope"}"#).await;
        assert_eq!(resp, json!({ "status": "success" }));
    }

    #[tokio::test]
    async fn omitted_size_uses_configured_geometry() {
        let manager = SessionManager::new(SessionOptions {
            shell: "/bin/cat".into(),
            term: "dumb".into(),
            rows: 30,
            cols: 100,
            ..SessionOptions::default()
        });
        let resp = handle_line(&manager, r#"{"op":"create_terminal","session_id":"g"}"#).await;
        assert_eq!(resp["status"], "success");
        let resp = handle_line(&manager, r#"{"op":"list_terminals"}"#).await;
        assert_eq!(resp["sessions"][0]["rows"], 30);
        assert_eq!(resp["sessions"][0]["cols"], 100);

        let resp = handle_line(
            &manager,
            r#"{"op":"resize_terminal","session_id":"g","rows":12}"#,
        )
        .await;
        assert_eq!(resp["status"], "success");
        let resp = handle_line(&manager, r#"{"op":"list_terminals"}"#).await;
        assert_eq!(resp["sessions"][0]["rows"], 12);
        assert_eq!(resp["sessions"][0]["cols"], 100);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn full_session_round_trip() {
        let manager = cat_manager();
        let resp = handle_line(
            &manager,
            r#"{"op":"create_terminal","session_id":"t","rows":10,"cols":40}"#,
        )
        .await;
        assert_eq!(resp, json!({ "status": "success", "session_id": "t" }));

        let resp = handle_line(
            &manager,
            r#"{"op":"write_to_terminal","session_id":"t","data":"hello\n"}"#,
        )
        .await;
        assert_eq!(resp, json!({ "status": "success" }));

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut resp;
        loop {
            resp = handle_line(&manager, r#"{"op":"read_from_terminal","session_id":"t"}"#).await;
            let data = resp["data"].as_str().unwrap_or_default().to_string();
            if data.lines().filter(|l| *l == "hello").count() == 2 || Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(resp["session_id"], "t");
        assert_eq!(resp["truncated"], false);
        assert_eq!(resp["data"], "hello\nhello");

        let resp = handle_line(
            &manager,
            r#"{"op":"resize_terminal","session_id":"t","rows":5,"cols":20}"#,
        )
        .await;
        assert_eq!(resp["status"], "success");

        let resp = handle_line(&manager, r#"{"op":"list_terminals"}"#).await;
        assert_eq!(resp["sessions"][0]["id"], "t");
        assert_eq!(resp["sessions"][0]["rows"], 5);

        let resp = handle_line(&manager, r#"{"op":"close_terminal","session_id":"t"}"#).await;
        assert_eq!(resp["status"], "success");
        assert_eq!(manager.count().await, 0);
    }
}
