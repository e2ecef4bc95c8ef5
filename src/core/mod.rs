//! CDU Core Module
//!
//! Core data structures for the display model:
//! - Cell: individual character cell with colour and size
//! - Screen: the fixed 14x24 display buffer with cursor state
//! - Leds: the annunciator bank
//! - Palette: the 11-slot device colour palette

pub mod cell;
pub mod leds;
pub mod screen;

pub use cell::{Cell, CduColor, Palette, Rgba, PALETTE_SLOTS};
pub use leds::{Annunciator, Leds, ANNUNCIATOR_COUNT};
pub use screen::{Cursor, Row, Screen, COLS, ROWS};
