//! CDU Cell - The fundamental display unit
//!
//! Each cell represents one character position with:
//! - Character (Unicode codepoint)
//! - Colour (index into the 11-slot device palette)
//! - Font size (large or small glyph bank)

use serde::{Deserialize, Serialize};

/// The 11-slot MCDU colour palette
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CduColor {
    Black = 0,
    Amber = 1,
    White = 2,
    Cyan = 3,
    Green = 4,
    Magenta = 5,
    Red = 6,
    Yellow = 7,
    Brown = 8,
    Grey = 9,
    Khaki = 10,
}

/// Number of palette slots
pub const PALETTE_SLOTS: usize = 11;

impl Default for CduColor {
    fn default() -> Self {
        CduColor::White
    }
}

impl From<u8> for CduColor {
    fn from(v: u8) -> Self {
        match v {
            0 => CduColor::Black,
            1 => CduColor::Amber,
            2 => CduColor::White,
            3 => CduColor::Cyan,
            4 => CduColor::Green,
            5 => CduColor::Magenta,
            6 => CduColor::Red,
            7 => CduColor::Yellow,
            8 => CduColor::Brown,
            9 => CduColor::Grey,
            10 => CduColor::Khaki,
            _ => CduColor::White,
        }
    }
}

impl CduColor {
    /// Palette slot index
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// All palette colours in slot order
    pub const ALL: [CduColor; PALETTE_SLOTS] = [
        CduColor::Black,
        CduColor::Amber,
        CduColor::White,
        CduColor::Cyan,
        CduColor::Green,
        CduColor::Magenta,
        CduColor::Red,
        CduColor::Yellow,
        CduColor::Brown,
        CduColor::Grey,
        CduColor::Khaki,
    ];
}

/// One RGBA palette entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }
}

/// The device-uploadable colour palette: 11 RGBA slots indexed by [`CduColor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    slots: [Rgba; PALETTE_SLOTS],
}

impl Default for Palette {
    fn default() -> Self {
        Self::factory()
    }
}

impl Palette {
    /// Factory default colours as shipped on the device
    pub const fn factory() -> Self {
        Self {
            slots: [
                Rgba::new(0x00, 0x00, 0x00), // Black
                Rgba::new(0xFF, 0x9A, 0x00), // Amber
                Rgba::new(0xFF, 0xFF, 0xFF), // White
                Rgba::new(0x00, 0xCC, 0xFF), // Cyan
                Rgba::new(0x00, 0xFF, 0x00), // Green
                Rgba::new(0xFF, 0x5E, 0xFF), // Magenta
                Rgba::new(0xFF, 0x00, 0x00), // Red
                Rgba::new(0xFF, 0xFF, 0x00), // Yellow
                Rgba::new(0xB4, 0x69, 0x1E), // Brown
                Rgba::new(0x90, 0x90, 0x90), // Grey
                Rgba::new(0xB0, 0xA8, 0x70), // Khaki
            ],
        }
    }

    /// Get a slot
    pub fn get(&self, color: CduColor) -> Rgba {
        self.slots[color.index() as usize]
    }

    /// Replace a slot
    pub fn set(&mut self, color: CduColor, rgba: Rgba) {
        self.slots[color.index() as usize] = rgba;
    }
}

/// A single character cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// The character to display (Unicode)
    pub ch: char,
    /// Palette colour
    pub color: CduColor,
    /// Small glyph bank
    pub small: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            color: CduColor::White,
            small: false,
        }
    }
}

impl Cell {
    /// Create a cell with the given character in the default style
    pub fn new(ch: char) -> Self {
        Self {
            ch,
            ..Default::default()
        }
    }

    /// Create a fully specified cell
    pub fn styled(ch: char, color: CduColor, small: bool) -> Self {
        Self { ch, color, small }
    }

    /// Set all properties at once
    pub fn set(&mut self, ch: char, color: CduColor, small: bool) {
        self.ch = ch;
        self.color = color;
        self.small = small;
    }

    /// Clear the cell to defaults
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether the cell shows nothing
    pub fn is_blank(&self) -> bool {
        self.ch == ' '
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_from_u8() {
        assert_eq!(CduColor::from(4), CduColor::Green);
        assert_eq!(CduColor::from(10), CduColor::Khaki);
        // Out-of-range indices fall back to white
        assert_eq!(CduColor::from(42), CduColor::White);
    }

    #[test]
    fn test_palette_factory_slots() {
        let palette = Palette::factory();
        assert_eq!(palette.get(CduColor::Green), Rgba::new(0x00, 0xFF, 0x00));
        assert_eq!(palette.get(CduColor::Black).a, 0xFF);
    }

    #[test]
    fn test_palette_set() {
        let mut palette = Palette::factory();
        palette.set(CduColor::Amber, Rgba::new(1, 2, 3));
        assert_eq!(palette.get(CduColor::Amber), Rgba::new(1, 2, 3));
    }

    #[test]
    fn test_cell_equality() {
        let a = Cell::styled('A', CduColor::Green, false);
        let b = Cell::styled('A', CduColor::Green, false);
        assert_eq!(a, b);
        assert_ne!(a, Cell::styled('A', CduColor::Green, true));
    }
}
