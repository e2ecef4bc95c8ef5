//! CDU Screen - The display buffer
//!
//! A fixed 14x24 grid of cells plus the cursor state consumed by write
//! operations. Writes clamp to the grid; the cursor never leaves it.
//! The screen also produces a canonical string fingerprint of its full
//! visible state, used purely as a fast "did anything change" probe.

use super::cell::{Cell, CduColor};

/// Screen height in lines
pub const ROWS: usize = 14;
/// Screen width in columns
pub const COLS: usize = 24;

/// One display line: a fixed sequence of 24 cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    cells: [Cell; COLS],
}

impl Default for Row {
    fn default() -> Self {
        Self {
            cells: [Cell::default(); COLS],
        }
    }
}

impl Row {
    /// Get a cell by column (None when out of bounds)
    pub fn get(&self, col: usize) -> Option<&Cell> {
        self.cells.get(col)
    }

    /// Get a mutable cell by column
    pub fn get_mut(&mut self, col: usize) -> Option<&mut Cell> {
        self.cells.get_mut(col)
    }

    /// Reset every cell to the blank default
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    /// Splice a blank cell in at `col`, shifting the tail right.
    /// The rightmost cell falls off. Used by scroll/insert operations.
    pub fn shift_right(&mut self, col: usize) {
        if col >= COLS {
            return;
        }
        for i in (col + 1..COLS).rev() {
            self.cells[i] = self.cells[i - 1];
        }
        self.cells[col] = Cell::default();
    }

    /// Iterate cells left to right
    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }
}

/// Cursor state consumed by write operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Current line (0-based, always < ROWS)
    pub line: usize,
    /// Current column (0-based, always < COLS)
    pub column: usize,
    /// Colour applied to written cells
    pub color: CduColor,
    /// Small font applied to written cells
    pub small: bool,
    /// Right-to-left mode: each written character decrements the column
    pub right_to_left: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            line: 0,
            column: 0,
            color: CduColor::White,
            small: false,
            right_to_left: false,
        }
    }
}

/// The 14x24 display buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    rows: [Row; ROWS],
    /// Write cursor
    pub cursor: Cursor,
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

impl Screen {
    /// Create a blank screen
    pub fn new() -> Self {
        Self {
            rows: std::array::from_fn(|_| Row::default()),
            cursor: Cursor::default(),
        }
    }

    /// Get a cell (None when out of bounds)
    pub fn get(&self, line: usize, col: usize) -> Option<&Cell> {
        self.rows.get(line).and_then(|r| r.get(col))
    }

    /// Get a mutable cell
    pub fn get_mut(&mut self, line: usize, col: usize) -> Option<&mut Cell> {
        self.rows.get_mut(line).and_then(|r| r.get_mut(col))
    }

    /// Access a row
    pub fn row(&self, line: usize) -> Option<&Row> {
        self.rows.get(line)
    }

    /// Access a mutable row
    pub fn row_mut(&mut self, line: usize) -> Option<&mut Row> {
        self.rows.get_mut(line)
    }

    /// Move the cursor, clamping to grid bounds
    pub fn goto(&mut self, line: usize, col: usize) {
        self.cursor.line = line.min(ROWS - 1);
        self.cursor.column = col.min(COLS - 1);
    }

    /// Set the cursor style for subsequent writes
    pub fn style(&mut self, color: CduColor, small: bool) {
        self.cursor.color = color;
        self.cursor.small = small;
    }

    /// Write one character at the cursor in the cursor's style, then
    /// advance (or retreat, in right-to-left mode). Movement clamps at
    /// the grid edge rather than wrapping.
    pub fn put(&mut self, ch: char) {
        let (line, col) = (self.cursor.line, self.cursor.column);
        let (color, small) = (self.cursor.color, self.cursor.small);
        if let Some(cell) = self.get_mut(line, col) {
            cell.set(ch, color, small);
        }
        if self.cursor.right_to_left {
            self.cursor.column = self.cursor.column.saturating_sub(1);
        } else {
            self.cursor.column = (self.cursor.column + 1).min(COLS - 1);
        }
    }

    /// Write a string at the cursor
    pub fn write(&mut self, text: &str) {
        for ch in text.chars() {
            self.put(ch);
        }
    }

    /// Write a single styled cell without touching the cursor
    pub fn put_at(&mut self, line: usize, col: usize, ch: char, color: CduColor, small: bool) {
        if let Some(cell) = self.get_mut(line, col) {
            cell.set(ch, color, small);
        }
    }

    /// Clear the whole grid and reset the cursor
    pub fn clear(&mut self) {
        for row in &mut self.rows {
            row.clear();
        }
        self.cursor = Cursor::default();
    }

    /// Clear one line
    pub fn clear_line(&mut self, line: usize) {
        if let Some(row) = self.rows.get_mut(line) {
            row.clear();
        }
    }

    /// Scroll all lines up by one; the bottom line becomes blank
    pub fn scroll_up(&mut self) {
        for i in 1..ROWS {
            self.rows[i - 1] = self.rows[i].clone();
        }
        self.rows[ROWS - 1].clear();
    }

    /// Copy the full visible state from another screen.
    /// Cursor state is not copied; it belongs to the writer.
    pub fn copy_from(&mut self, other: &Screen) {
        self.rows = other.rows.clone();
    }

    /// Canonical serialization of the visible state: character, colour
    /// index and size flag per cell, row-major. Equality probe only -
    /// never shown to a user or sent to the device.
    pub fn fingerprint(&self) -> String {
        let mut out = String::with_capacity(ROWS * COLS * 3);
        for row in &self.rows {
            for cell in row.iter() {
                out.push(cell.ch);
                out.push(char::from(b'a' + cell.color.index()));
                out.push(if cell.small { '1' } else { '0' });
            }
        }
        out
    }

    /// Iterate all cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Cell)> {
        self.rows.iter().enumerate().flat_map(|(line, row)| {
            row.iter()
                .enumerate()
                .map(move |(col, cell)| (line, col, cell))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_back() {
        let mut screen = Screen::new();
        for (line, col) in [(0, 0), (13, 23), (7, 12)] {
            screen.put_at(line, col, 'Q', CduColor::Cyan, true);
            let cell = screen.get(line, col).unwrap();
            assert_eq!(cell.ch, 'Q');
            assert_eq!(cell.color, CduColor::Cyan);
            assert!(cell.small);
        }
    }

    #[test]
    fn test_cursor_clamps() {
        let mut screen = Screen::new();
        screen.goto(99, 99);
        assert_eq!(screen.cursor.line, ROWS - 1);
        assert_eq!(screen.cursor.column, COLS - 1);

        // Writing at the right edge stays on the grid
        screen.write("XYZ");
        assert_eq!(screen.cursor.column, COLS - 1);
        assert_eq!(screen.get(ROWS - 1, COLS - 1).unwrap().ch, 'Z');
    }

    #[test]
    fn test_right_to_left_put() {
        let mut screen = Screen::new();
        screen.goto(2, 5);
        screen.cursor.right_to_left = true;
        screen.put('A');
        screen.put('B');
        assert_eq!(screen.get(2, 5).unwrap().ch, 'A');
        assert_eq!(screen.get(2, 4).unwrap().ch, 'B');
        // Retreat clamps at column 0
        screen.goto(2, 0);
        screen.put('C');
        assert_eq!(screen.cursor.column, 0);
    }

    #[test]
    fn test_shift_right() {
        let mut row = Row::default();
        row.get_mut(0).unwrap().ch = 'A';
        row.get_mut(1).unwrap().ch = 'B';
        row.shift_right(1);
        assert_eq!(row.get(0).unwrap().ch, 'A');
        assert_eq!(row.get(1).unwrap().ch, ' ');
        assert_eq!(row.get(2).unwrap().ch, 'B');
    }

    #[test]
    fn test_scroll_up() {
        let mut screen = Screen::new();
        screen.put_at(1, 0, 'X', CduColor::White, false);
        screen.scroll_up();
        assert_eq!(screen.get(0, 0).unwrap().ch, 'X');
        assert_eq!(screen.get(1, 0).unwrap().ch, ' ');
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let mut a = Screen::new();
        let b = Screen::new();
        assert_eq!(a.fingerprint(), b.fingerprint());
        a.put_at(3, 3, 'Z', CduColor::Amber, false);
        assert_ne!(a.fingerprint(), b.fingerprint());
        // Style-only changes must alter the fingerprint too
        let mut c = Screen::new();
        c.put_at(3, 3, 'Z', CduColor::Amber, true);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_copy_from() {
        let mut a = Screen::new();
        a.put_at(5, 5, '#', CduColor::Red, false);
        let mut b = Screen::new();
        b.copy_from(&a);
        assert_eq!(b.get(5, 5).unwrap().ch, '#');
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
