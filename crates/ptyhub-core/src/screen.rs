//! Screen grid reconstructed from raw PTY output.
//!
//! Bytes are run through a `vte` parser (ground, escape, CSI and OSC states);
//! the grid applies cursor motion, erasure and scrolling. Rows pushed off the
//! top of the screen are queued as retired lines for the session's history.
//!
//! Only the subset of control sequences needed to rebuild readable
//! line-oriented output is interpreted. Everything else, including malformed
//! input, is absorbed without effect.

use std::collections::VecDeque;
use tracing::trace;
use vte::{Params, Parser, Perform};

/// Default screen height.
pub const DEFAULT_ROWS: u16 = 24;
/// Default screen width.
pub const DEFAULT_COLS: u16 = 80;

const TAB_WIDTH: usize = 8;
const BLANK: char = ' ';

/// A terminal screen: parser state plus the character grid it drives.
pub struct Screen {
    parser: Parser,
    grid: Grid,
}

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen")
            .field("rows", &self.grid.num_rows)
            .field("cols", &self.grid.num_cols)
            .field("cursor", &(self.grid.cursor_row, self.grid.cursor_col))
            .field("retired", &self.grid.retired.len())
            .finish()
    }
}

impl Screen {
    /// Create a blank screen. Zero dimensions are raised to 1.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            parser: Parser::new(),
            grid: Grid::new(rows.max(1) as usize, cols.max(1) as usize),
        }
    }

    /// Feed raw terminal output. Never fails; partial escape sequences are
    /// carried over to the next call.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.parser.advance(&mut self.grid, byte);
        }
    }

    /// Drain the lines that have scrolled off the top since the last call.
    pub fn take_retired(&mut self) -> Vec<String> {
        std::mem::take(&mut self.grid.retired)
    }

    /// Render the visible grid top to bottom, trailing blanks stripped per row.
    pub fn snapshot(&self) -> Vec<String> {
        self.grid.rows.iter().map(|row| render_row(row)).collect()
    }

    /// Resize the grid, keeping content anchored at the top-left corner.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.grid.resize(rows.max(1) as usize, cols.max(1) as usize);
    }

    /// Current `(rows, cols)`.
    pub fn size(&self) -> (u16, u16) {
        (self.grid.num_rows as u16, self.grid.num_cols as u16)
    }

    /// Cursor position as zero-based `(row, col)`.
    pub fn cursor(&self) -> (usize, usize) {
        (self.grid.cursor_row, self.grid.cursor_col)
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

fn render_row(row: &[char]) -> String {
    let text: String = row.iter().collect();
    text.trim_end_matches(BLANK).to_string()
}

struct Grid {
    /// Ring of rows; scrolling rotates rows instead of reallocating them.
    rows: VecDeque<Vec<char>>,
    num_rows: usize,
    num_cols: usize,
    cursor_row: usize,
    cursor_col: usize,
    /// Set after printing in the last column; the next print wraps first.
    wrap_pending: bool,
    /// Inclusive scroll region bounds.
    scroll_top: usize,
    scroll_bottom: usize,
    retired: Vec<String>,
}

impl Grid {
    fn new(num_rows: usize, num_cols: usize) -> Self {
        Self {
            rows: (0..num_rows).map(|_| vec![BLANK; num_cols]).collect(),
            num_rows,
            num_cols,
            cursor_row: 0,
            cursor_col: 0,
            wrap_pending: false,
            scroll_top: 0,
            scroll_bottom: num_rows - 1,
            retired: Vec::new(),
        }
    }

    fn resize(&mut self, num_rows: usize, num_cols: usize) {
        for row in self.rows.iter_mut() {
            row.resize(num_cols, BLANK);
        }
        self.rows.truncate(num_rows);
        while self.rows.len() < num_rows {
            self.rows.push_back(vec![BLANK; num_cols]);
        }
        self.num_rows = num_rows;
        self.num_cols = num_cols;
        self.cursor_row = self.cursor_row.min(num_rows - 1);
        self.cursor_col = self.cursor_col.min(num_cols - 1);
        self.wrap_pending = false;
        self.scroll_top = 0;
        self.scroll_bottom = num_rows - 1;
    }

    fn blank_row(&self) -> Vec<char> {
        vec![BLANK; self.num_cols]
    }

    fn move_to(&mut self, row: usize, col: usize) {
        self.cursor_row = row.min(self.num_rows - 1);
        self.cursor_col = col.min(self.num_cols - 1);
        self.wrap_pending = false;
    }

    fn region_height(&self) -> usize {
        self.scroll_bottom - self.scroll_top + 1
    }

    fn linefeed(&mut self) {
        self.wrap_pending = false;
        if self.cursor_row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor_row + 1 < self.num_rows {
            self.cursor_row += 1;
        }
    }

    /// Scroll the region up; rows leaving the top of the screen are retired.
    fn scroll_up(&mut self, count: usize) {
        for _ in 0..count.min(self.region_height()) {
            let Some(mut row) = self.rows.remove(self.scroll_top) else {
                return;
            };
            if self.scroll_top == 0 {
                self.retired.push(render_row(&row));
            }
            row.fill(BLANK);
            self.rows.insert(self.scroll_bottom, row);
        }
    }

    fn scroll_down(&mut self, count: usize) {
        for _ in 0..count.min(self.region_height()) {
            let Some(mut row) = self.rows.remove(self.scroll_bottom) else {
                return;
            };
            row.fill(BLANK);
            self.rows.insert(self.scroll_top, row);
        }
    }

    fn insert_lines(&mut self, count: usize) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bottom {
            return;
        }
        let count = count.min(self.scroll_bottom - self.cursor_row + 1);
        for _ in 0..count {
            let blank = self.blank_row();
            self.rows.remove(self.scroll_bottom);
            self.rows.insert(self.cursor_row, blank);
        }
        self.cursor_col = 0;
        self.wrap_pending = false;
    }

    fn delete_lines(&mut self, count: usize) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bottom {
            return;
        }
        let count = count.min(self.scroll_bottom - self.cursor_row + 1);
        for _ in 0..count {
            let blank = self.blank_row();
            self.rows.remove(self.cursor_row);
            self.rows.insert(self.scroll_bottom, blank);
        }
        self.cursor_col = 0;
        self.wrap_pending = false;
    }

    fn clear_cells(&mut self, row: usize, from: usize, to: usize) {
        if let Some(cells) = self.rows.get_mut(row) {
            let to = to.min(cells.len());
            if from < to {
                cells[from..to].fill(BLANK);
            }
        }
    }

    fn erase_in_display(&mut self, mode: u16) {
        let (row, col) = (self.cursor_row, self.cursor_col);
        match mode {
            0 => {
                self.clear_cells(row, col, self.num_cols);
                for r in row + 1..self.num_rows {
                    self.clear_cells(r, 0, self.num_cols);
                }
            }
            1 => {
                for r in 0..row {
                    self.clear_cells(r, 0, self.num_cols);
                }
                self.clear_cells(row, 0, col + 1);
            }
            2 | 3 => {
                for r in 0..self.num_rows {
                    self.clear_cells(r, 0, self.num_cols);
                }
            }
            _ => trace!(mode, "unsupported erase-in-display mode"),
        }
    }

    fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = (self.cursor_row, self.cursor_col);
        match mode {
            0 => self.clear_cells(row, col, self.num_cols),
            1 => self.clear_cells(row, 0, col + 1),
            2 => self.clear_cells(row, 0, self.num_cols),
            _ => trace!(mode, "unsupported erase-in-line mode"),
        }
    }

    fn insert_blanks(&mut self, count: usize) {
        let col = self.cursor_col;
        let cols = self.num_cols;
        if let Some(cells) = self.rows.get_mut(self.cursor_row) {
            let count = count.min(cols - col);
            cells[col..].rotate_right(count);
            cells[col..col + count].fill(BLANK);
        }
    }

    fn delete_chars(&mut self, count: usize) {
        let col = self.cursor_col;
        let cols = self.num_cols;
        if let Some(cells) = self.rows.get_mut(self.cursor_row) {
            let count = count.min(cols - col);
            cells[col..].rotate_left(count);
            cells[cols - count..].fill(BLANK);
        }
    }

    fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        if top < bottom && bottom < self.num_rows {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.scroll_top = 0;
            self.scroll_bottom = self.num_rows - 1;
        }
        self.move_to(0, 0);
    }
}

/// First value of the `idx`-th parameter, or `default` when absent or zero.
fn param(args: &[u16], idx: usize, default: usize) -> usize {
    match args.get(idx) {
        Some(&v) if v > 0 => v as usize,
        _ => default,
    }
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        if self.wrap_pending {
            self.wrap_pending = false;
            self.cursor_col = 0;
            self.linefeed();
        }
        let col = self.cursor_col;
        if let Some(row) = self.rows.get_mut(self.cursor_row) {
            row[col] = c;
        }
        if col + 1 >= self.num_cols {
            self.wrap_pending = true;
        } else {
            self.cursor_col += 1;
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x07 => {}
            0x08 => {
                self.cursor_col = self.cursor_col.saturating_sub(1);
                self.wrap_pending = false;
            }
            b'\t' => {
                let next = (self.cursor_col / TAB_WIDTH + 1) * TAB_WIDTH;
                self.cursor_col = next.min(self.num_cols - 1);
                self.wrap_pending = false;
            }
            b'\n' | 0x0b | 0x0c => self.linefeed(),
            b'\r' => {
                self.cursor_col = 0;
                self.wrap_pending = false;
            }
            _ => trace!(byte, "ignored control byte"),
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        trace!(parts = params.len(), "discarded OSC sequence");
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if ignore || !intermediates.is_empty() {
            trace!(?action, ?intermediates, "ignored CSI sequence");
            return;
        }

        let args: Vec<u16> = params
            .iter()
            .map(|p| p.first().copied().unwrap_or(0))
            .collect();
        let n = param(&args, 0, 1);
        let (row, col) = (self.cursor_row, self.cursor_col);

        match action {
            'A' => self.move_to(row.saturating_sub(n), col),
            'B' => self.move_to(row.saturating_add(n), col),
            'C' => self.move_to(row, col.saturating_add(n)),
            'D' => self.move_to(row, col.saturating_sub(n)),
            'E' => self.move_to(row.saturating_add(n), 0),
            'F' => self.move_to(row.saturating_sub(n), 0),
            'G' | '`' => self.move_to(row, n - 1),
            'd' => self.move_to(n - 1, col),
            'H' | 'f' => self.move_to(n - 1, param(&args, 1, 1) - 1),
            'J' => self.erase_in_display(args.first().copied().unwrap_or(0)),
            'K' => self.erase_in_line(args.first().copied().unwrap_or(0)),
            '@' => self.insert_blanks(n),
            'P' => self.delete_chars(n),
            'X' => self.clear_cells(row, col, col.saturating_add(n)),
            'L' => self.insert_lines(n),
            'M' => self.delete_lines(n),
            'S' => self.scroll_up(n),
            'T' => self.scroll_down(n),
            'r' => {
                let top = param(&args, 0, 1) - 1;
                let bottom = param(&args, 1, self.num_rows) - 1;
                self.set_scroll_region(top, bottom);
            }
            'm' => {}
            _ => trace!(?action, "unsupported CSI final byte"),
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        trace!(byte, ?intermediates, "ignored escape sequence");
    }
}
