//! Bounded scrollback of retired display lines.
//!
//! Stores the last N lines that scrolled off the top of a session's screen so
//! that a polling client can see recent output without the server keeping
//! unbounded history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of retained history lines per session.
pub const DEFAULT_MAX_HISTORY_LINES: usize = 1000;

/// Result of reading a terminal: history plus the visible screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutput {
    /// Newline-joined text with trailing blank lines stripped.
    pub data: String,
    pub session_id: String,
    /// Set when older lines were dropped to honor `max_lines`.
    #[serde(default)]
    pub truncated: bool,
}

/// A fixed-capacity FIFO of text lines.
#[derive(Debug)]
pub struct HistoryBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    /// Total lines ever appended (including evicted ones).
    total_appended: u64,
}

impl HistoryBuffer {
    /// Create a new history buffer holding at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_HISTORY_LINES)),
            capacity,
            total_appended: 0,
        }
    }

    /// Append lines at the tail, evicting from the head once over capacity.
    pub fn append<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        for line in lines {
            self.lines.push_back(line);
            self.total_appended += 1;
        }
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    /// Iterate over retained lines, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Number of lines currently retained.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total lines ever appended through this buffer.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Combine the retained history with the current screen rows.
    ///
    /// Trailing blank lines are stripped from the combined tail first; then,
    /// if more than `max_lines` remain, only the last `max_lines` are kept and
    /// `truncated` is set.
    pub fn render(
        &self,
        session_id: &str,
        screen: &[String],
        max_lines: Option<usize>,
    ) -> TerminalOutput {
        let mut all: Vec<&str> = self
            .lines
            .iter()
            .map(String::as_str)
            .chain(screen.iter().map(String::as_str))
            .collect();

        while all.last().is_some_and(|line| line.trim().is_empty()) {
            all.pop();
        }

        let mut truncated = false;
        if let Some(max) = max_lines {
            if all.len() > max {
                all.drain(..all.len() - max);
                truncated = true;
            }
        }

        TerminalOutput {
            data: all.join("\n"),
            session_id: session_id.to_string(),
            truncated,
        }
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn append_within_capacity() {
        let mut history = HistoryBuffer::new(10);
        history.append(lines(0..3));
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().next(), Some("line 0"));
    }

    #[test]
    fn evicts_oldest_first() {
        let mut history = HistoryBuffer::new(5);
        history.append(lines(0..8));
        assert_eq!(history.len(), 5);
        let kept: Vec<&str> = history.iter().collect();
        assert_eq!(kept, vec!["line 3", "line 4", "line 5", "line 6", "line 7"]);
        assert_eq!(history.total_appended(), 8);
    }

    #[test]
    fn default_cap_holds_under_load() {
        let mut history = HistoryBuffer::default();
        history.append(lines(0..2500));
        assert_eq!(history.len(), DEFAULT_MAX_HISTORY_LINES);
        assert_eq!(history.iter().next(), Some("line 1500"));
    }

    #[test]
    fn zero_capacity() {
        let mut history = HistoryBuffer::new(0);
        history.append(lines(0..4));
        assert!(history.is_empty());
    }

    #[test]
    fn render_strips_trailing_blank_lines() {
        let mut history = HistoryBuffer::new(10);
        history.append(vec!["first".to_string()]);
        let screen = vec!["second".to_string(), "   ".to_string(), String::new()];
        let out = history.render("s1", &screen, None);
        assert_eq!(out.data, "first\nsecond");
        assert_eq!(out.session_id, "s1");
        assert!(!out.truncated);
    }

    #[test]
    fn render_keeps_last_max_lines() {
        let mut history = HistoryBuffer::new(100);
        history.append(lines(0..20));
        let screen = vec!["prompt$".to_string(), String::new()];
        let out = history.render("s1", &screen, Some(5));
        assert!(out.truncated);
        let got: Vec<&str> = out.data.lines().collect();
        assert_eq!(got, vec!["line 16", "line 17", "line 18", "line 19", "prompt$"]);
    }

    #[test]
    fn render_not_truncated_when_within_cap() {
        let history = HistoryBuffer::new(100);
        let screen = vec!["a".to_string(), "b".to_string(), String::new()];
        let out = history.render("s1", &screen, Some(2));
        assert!(!out.truncated);
        assert_eq!(out.data, "a\nb");
    }

    #[test]
    fn render_blank_screen_is_empty() {
        let history = HistoryBuffer::new(10);
        let screen = vec![String::new(); 24];
        let out = history.render("s1", &screen, Some(3));
        assert_eq!(out.data, "");
        assert!(!out.truncated);
    }

    #[test]
    fn output_serializes_to_wire_shape() {
        let out = TerminalOutput {
            data: "hi".into(),
            session_id: "s1".into(),
            truncated: false,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["data"], "hi");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["truncated"], false);
    }
}
