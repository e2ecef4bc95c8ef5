//! CDU Bridge - USB HID driver and simulator bridge for MCDU peripherals
//!
//! Drives WINWING MCDU/PFP flight-deck units over raw HID reports and
//! mirrors a flight simulator's CDU screens onto them.
//!
//! # Overview
//!
//! The crate provides:
//! - A 14x24 character-cell screen model with per-cell colour and
//!   glyph-bank state
//! - A markup compositor for laying out styled text
//! - The HID report codec and device driver (display frames, lamps,
//!   brightness, font upload, key input)
//! - Simulator adapters for five wire protocols (GraphQL, JSON
//!   websocket, and X-Plane over UDP, REST and websocket), all sharing
//!   one reconnecting buffer-and-state base
//! - The bridge loop wiring key events one way and display refreshes
//!   the other
//!
//! # Example
//!
//! ```no_run
//! use cdu_bridge::core::{CduColor, Screen};
//! use cdu_bridge::compositor::Compositor;
//!
//! let mut screen = Screen::new();
//! Compositor::new(&mut screen)
//!     .centered(0, "<small>MCDU MENU")
//!     .label_left(2, "<green><<FMGC")
//!     .label_right(2, "ATSU<green>>");
//!
//! let packets = cdu_bridge::device::reports::encode_display(&screen);
//! ```

pub mod bridge;
pub mod compositor;
pub mod core;
pub mod device;
pub mod error;
pub mod sim;

// Re-export commonly used types
pub use bridge::{Bridge, DeviceLink};
pub use compositor::Compositor;
pub use core::{Annunciator, CduColor, Cell, Leds, Palette, Screen};
pub use device::driver::{CduDevice, DeviceEvent};
pub use device::{DeviceFamily, Key, Seat};
pub use error::{BridgeError, DeviceError, FontError};
pub use sim::{ConnectionState, SimAdapter, Simulator};
