//! CDU Compositor - text layout over the screen buffer
//!
//! A fluent helper that understands an inline style markup for writing
//! centred, labelled and wrapped text:
//! - `<green>`, `<amber>`, ... switch the colour from that point on
//! - `<small>` / `<big>` switch the glyph bank
//! - `<<` escapes the tag machinery: `<<green>` renders a literal `<green>`
//! - unknown tags render literally
//!
//! Pure transformation over [`Screen`]; no I/O.

use crate::core::{CduColor, Screen, COLS};

/// One parsed output character with its resolved style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StyledChar {
    ch: char,
    color: CduColor,
    small: bool,
}

/// Map a colour tag name to its palette entry
fn color_tag(name: &str) -> Option<CduColor> {
    match name {
        "black" => Some(CduColor::Black),
        "amber" => Some(CduColor::Amber),
        "white" => Some(CduColor::White),
        "cyan" => Some(CduColor::Cyan),
        "green" => Some(CduColor::Green),
        "magenta" => Some(CduColor::Magenta),
        "red" => Some(CduColor::Red),
        "yellow" => Some(CduColor::Yellow),
        "brown" => Some(CduColor::Brown),
        "grey" => Some(CduColor::Grey),
        "khaki" => Some(CduColor::Khaki),
        _ => None,
    }
}

/// Parse a markup string into styled characters, starting from the
/// given style state.
fn parse(markup: &str, mut color: CduColor, mut small: bool) -> Vec<StyledChar> {
    let mut out = Vec::with_capacity(markup.len());
    let mut chars = markup.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '<' {
            out.push(StyledChar { ch, color, small });
            continue;
        }

        // `<<` escape: emit the bracketed text literally, including the
        // closing bracket.
        if chars.peek() == Some(&'<') {
            chars.next();
            out.push(StyledChar { ch: '<', color, small });
            for lit in chars.by_ref() {
                out.push(StyledChar { ch: lit, color, small });
                if lit == '>' {
                    break;
                }
            }
            continue;
        }

        // Collect the tag name up to the closing bracket
        let mut name = String::new();
        let mut closed = false;
        for t in chars.by_ref() {
            if t == '>' {
                closed = true;
                break;
            }
            name.push(t);
        }

        if closed {
            if let Some(c) = color_tag(&name) {
                color = c;
                continue;
            }
            match name.as_str() {
                "small" => {
                    small = true;
                    continue;
                }
                "big" => {
                    small = false;
                    continue;
                }
                _ => {}
            }
        }

        // Unknown or unterminated tag: render it as written
        out.push(StyledChar { ch: '<', color, small });
        for lit in name.chars() {
            out.push(StyledChar { ch: lit, color, small });
        }
        if closed {
            out.push(StyledChar { ch: '>', color, small });
        }
    }

    out
}

/// Number of visible characters a markup string produces
pub fn visible_len(markup: &str) -> usize {
    parse(markup, CduColor::White, false).len()
}

/// Fluent text-layout helper over a [`Screen`]
pub struct Compositor<'a> {
    screen: &'a mut Screen,
}

impl<'a> Compositor<'a> {
    pub fn new(screen: &'a mut Screen) -> Self {
        Self { screen }
    }

    /// Write markup text starting at (line, col)
    pub fn write(&mut self, line: usize, col: usize, markup: &str) -> &mut Self {
        let start = (self.screen.cursor.color, self.screen.cursor.small);
        let spans = parse(markup, start.0, start.1);
        self.screen.goto(line, col);
        self.screen.cursor.right_to_left = false;
        for span in &spans {
            self.screen.style(span.color, span.small);
            self.screen.put(span.ch);
        }
        self
    }

    /// Write markup text centred on a line
    pub fn centered(&mut self, line: usize, markup: &str) -> &mut Self {
        let len = visible_len(markup);
        let col = COLS.saturating_sub(len) / 2;
        self.write(line, col, markup)
    }

    /// Label the left columns of a line
    pub fn label_left(&mut self, line: usize, markup: &str) -> &mut Self {
        self.write(line, 0, markup)
    }

    /// Label the right columns of a line. The cursor is pre-positioned on
    /// the rightmost target cell and walks backwards while the characters
    /// are fed in reverse, so the rendered string reads normally.
    pub fn label_right(&mut self, line: usize, markup: &str) -> &mut Self {
        let start = (self.screen.cursor.color, self.screen.cursor.small);
        let spans = parse(markup, start.0, start.1);
        let len = spans.len().min(COLS);
        if len == 0 {
            return self;
        }
        let first_col = COLS - len;
        self.screen.goto(line, first_col + (len - 1));
        self.screen.cursor.right_to_left = true;
        for span in spans.iter().take(len).rev() {
            self.screen.style(span.color, span.small);
            self.screen.put(span.ch);
        }
        self.screen.cursor.right_to_left = false;
        self
    }

    /// Word-wrap markup text across at most `max_lines` lines starting at
    /// `line`. Overlong words are split hard at the line width.
    pub fn wrapped(&mut self, line: usize, max_lines: usize, markup: &str) -> &mut Self {
        let start = (self.screen.cursor.color, self.screen.cursor.small);
        let spans = parse(markup, start.0, start.1);

        let mut cur_line = line;
        let mut lines_used = 0;
        let mut col = 0usize;
        let mut i = 0usize;

        while i < spans.len() && lines_used < max_lines {
            // Measure the next word (run of non-spaces)
            let mut end = i;
            while end < spans.len() && spans[end].ch != ' ' {
                end += 1;
            }
            let word_len = end - i;

            if word_len == 0 {
                // A space: emit unless at a line start
                if col > 0 && col < COLS {
                    self.put_span(cur_line, col, spans[i]);
                    col += 1;
                }
                i += 1;
                continue;
            }

            if col + word_len > COLS && col > 0 && word_len <= COLS {
                // Word does not fit: break the line
                cur_line += 1;
                lines_used += 1;
                col = 0;
                if lines_used >= max_lines {
                    break;
                }
            }

            for span in &spans[i..end] {
                if col >= COLS {
                    cur_line += 1;
                    lines_used += 1;
                    col = 0;
                    if lines_used >= max_lines {
                        return self;
                    }
                }
                self.put_span(cur_line, col, *span);
                col += 1;
            }
            i = end;
        }
        self
    }

    fn put_span(&mut self, line: usize, col: usize, span: StyledChar) {
        self.screen
            .put_at(line, col, span.ch, span.color, span.small);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Screen;

    #[test]
    fn test_color_tag_switches_state() {
        let mut screen = Screen::new();
        Compositor::new(&mut screen).write(0, 0, "A<green>B<amber>C");
        assert_eq!(screen.get(0, 0).unwrap().color, CduColor::White);
        assert_eq!(screen.get(0, 1).unwrap().color, CduColor::Green);
        assert_eq!(screen.get(0, 2).unwrap().color, CduColor::Amber);
        assert_eq!(screen.get(0, 2).unwrap().ch, 'C');
    }

    #[test]
    fn test_small_tag() {
        let mut screen = Screen::new();
        Compositor::new(&mut screen).write(1, 0, "<small>ab<big>C");
        assert!(screen.get(1, 0).unwrap().small);
        assert!(screen.get(1, 1).unwrap().small);
        assert!(!screen.get(1, 2).unwrap().small);
    }

    #[test]
    fn test_double_bracket_escape() {
        let mut screen = Screen::new();
        Compositor::new(&mut screen).write(0, 0, "<<green>X");
        let rendered: String = (0..8)
            .map(|c| screen.get(0, c).unwrap().ch)
            .collect();
        assert_eq!(rendered, "<green>X");
        // The escaped tag did not change the colour
        assert_eq!(screen.get(0, 7).unwrap().color, CduColor::White);
    }

    #[test]
    fn test_unknown_tag_renders_literally() {
        let mut screen = Screen::new();
        Compositor::new(&mut screen).write(0, 0, "<bogus>!");
        let rendered: String = (0..8)
            .map(|c| screen.get(0, c).unwrap().ch)
            .collect();
        assert_eq!(rendered, "<bogus>!");
    }

    #[test]
    fn test_visible_len_skips_tags() {
        assert_eq!(visible_len("<green>ABC<small>DE"), 5);
        assert_eq!(visible_len("<<green>"), 7);
        assert_eq!(visible_len(""), 0);
    }

    #[test]
    fn test_centered() {
        let mut screen = Screen::new();
        Compositor::new(&mut screen).centered(0, "<white>TEST"); // len 4, col (24-4)/2 = 10
        assert_eq!(screen.get(0, 10).unwrap().ch, 'T');
        assert_eq!(screen.get(0, 13).unwrap().ch, 'T');
    }

    #[test]
    fn test_label_right_visual_order() {
        let mut screen = Screen::new();
        Compositor::new(&mut screen).label_right(3, "<cyan>END>");
        // 4 visible chars occupy columns 20..=23 in reading order
        assert_eq!(screen.get(3, 20).unwrap().ch, 'E');
        assert_eq!(screen.get(3, 21).unwrap().ch, 'N');
        assert_eq!(screen.get(3, 22).unwrap().ch, 'D');
        assert_eq!(screen.get(3, 23).unwrap().ch, '>');
        assert_eq!(screen.get(3, 23).unwrap().color, CduColor::Cyan);
        assert!(!screen.cursor.right_to_left);
    }

    #[test]
    fn test_wrapped_breaks_on_words() {
        let mut screen = Screen::new();
        // 24 columns: "SELECT DESIRED SYSTEM" fits, the next word wraps
        Compositor::new(&mut screen).wrapped(4, 2, "SELECT DESIRED SYSTEM PAGE");
        assert_eq!(screen.get(4, 0).unwrap().ch, 'S');
        assert_eq!(screen.get(5, 0).unwrap().ch, 'P');
        assert_eq!(screen.get(5, 3).unwrap().ch, 'E');
    }
}
