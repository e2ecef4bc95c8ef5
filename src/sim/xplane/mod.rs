//! X-Plane transports
//!
//! Three transports share one dataref vocabulary (the ToLiss/AirbusFBW
//! MCDU datarefs): per-cell scalar values over UDP, whole-row byte
//! arrays over REST and websocket. This module owns the vocabulary:
//! dataref name construction, the style-suffix table, typed cell
//! targets, the key-to-command table and the shared buffer writes.

pub mod rest;
pub mod udp;
pub mod ws;

use crate::core::{Annunciator, CduColor, Screen, COLS};
use crate::device::{Key, Seat};
use crate::sim::McduBuffers;

/// Screen line of each dataref row token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Title,
    SubTitle,
    Label(u8),
    Cont(u8),
    SmallCont(u8),
    Scratchpad,
    VertSlew,
}

impl RowKind {
    /// Screen line the row lands on
    pub fn line(&self) -> usize {
        match self {
            RowKind::Title | RowKind::SubTitle => 0,
            RowKind::Label(n) => (2 * n - 1) as usize,
            RowKind::Cont(n) | RowKind::SmallCont(n) => (2 * n) as usize,
            RowKind::Scratchpad | RowKind::VertSlew => 13,
        }
    }

    /// Whether the row renders in the small glyph bank regardless of style
    pub fn small(&self) -> bool {
        matches!(self, RowKind::SubTitle | RowKind::Label(_) | RowKind::SmallCont(_))
    }

    /// Dataref row token
    pub fn token(&self) -> String {
        match self {
            RowKind::Title => "title".into(),
            RowKind::SubTitle => "stitle".into(),
            RowKind::Label(n) => format!("label{n}"),
            RowKind::Cont(n) => format!("cont{n}"),
            RowKind::SmallCont(n) => format!("scont{n}"),
            RowKind::Scratchpad => "sp".into(),
            RowKind::VertSlew => "VertSlewKeys".into(),
        }
    }
}

/// Map a dataref style suffix to its colour
pub fn style_color(style: char) -> CduColor {
    match style {
        'a' => CduColor::Amber,
        'b' => CduColor::Cyan,
        'g' => CduColor::Green,
        'm' => CduColor::Magenta,
        'r' => CduColor::Red,
        's' => CduColor::Khaki,
        'y' => CduColor::Yellow,
        _ => CduColor::White, // 'w' and anything unrecognised
    }
}

/// Seat of an MCDU unit number (1 = captain, 2 = first officer)
pub fn unit_seat(unit: u8) -> Seat {
    if unit == 2 {
        Seat::FirstOfficer
    } else {
        Seat::Captain
    }
}

fn seat_unit(seat: Seat) -> u8 {
    match seat {
        Seat::FirstOfficer => 2,
        _ => 1,
    }
}

/// Where one decoded value lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatarefTarget {
    /// One screen cell
    Cell {
        seat: Seat,
        line: usize,
        col: usize,
        color: CduColor,
        small: bool,
    },
    /// One annunciator lamp
    Annunciator { seat: Seat, ann: Annunciator },
    /// The vertical-slew arrow pair
    VertSlew { seat: Seat },
}

/// One registered subscription: the dataref name and its typed target
#[derive(Debug, Clone)]
pub struct DatarefSub {
    pub name: String,
    pub target: DatarefTarget,
}

const TITLE_STYLES: &[char] = &['b', 'g', 's', 'w', 'y'];
const SUBTITLE_STYLES: &[char] = &['w'];
const LABEL_STYLES: &[char] = &['a', 'g', 's', 'w', 'y'];
const CONT_STYLES: &[char] = &['a', 'b', 'g', 'm', 's', 'w', 'y'];
const SP_STYLES: &[char] = &['a', 'w'];

/// Every styled row token of one MCDU unit
pub fn unit_rows() -> Vec<(RowKind, char)> {
    let mut rows = Vec::new();
    for &s in TITLE_STYLES {
        rows.push((RowKind::Title, s));
    }
    for &s in SUBTITLE_STYLES {
        rows.push((RowKind::SubTitle, s));
    }
    for n in 1..=6u8 {
        for &s in LABEL_STYLES {
            rows.push((RowKind::Label(n), s));
        }
        for &s in CONT_STYLES {
            rows.push((RowKind::Cont(n), s));
            rows.push((RowKind::SmallCont(n), s));
        }
    }
    for &s in SP_STYLES {
        rows.push((RowKind::Scratchpad, s));
    }
    rows
}

/// Name of a whole-row dataref, e.g. `AirbusFBW/MCDU1titlew`
pub fn row_dataref(unit: u8, kind: RowKind, style: char) -> String {
    match kind {
        RowKind::VertSlew => format!("AirbusFBW/MCDU{unit}VertSlewKeys"),
        _ => format!("AirbusFBW/MCDU{unit}{}{style}", kind.token()),
    }
}

/// The annunciator datarefs of one unit
pub fn unit_annunciators(unit: u8) -> Vec<DatarefSub> {
    let seat = unit_seat(unit);
    [
        ("AnnunFail", Annunciator::Fail),
        ("AnnunFm", Annunciator::Fm),
        ("AnnunMcdu", Annunciator::Mcdu),
        ("AnnunMenu", Annunciator::Menu),
        ("AnnunFm1", Annunciator::Fm1),
        ("AnnunInd", Annunciator::Ind),
        ("AnnunRdy", Annunciator::Rdy),
        ("AnnunStatus", Annunciator::Status),
        ("AnnunFm2", Annunciator::Fm2),
    ]
    .into_iter()
    .map(|(suffix, ann)| DatarefSub {
        name: format!("AirbusFBW/MCDU{unit}{suffix}"),
        target: DatarefTarget::Annunciator { seat, ann },
    })
    .collect()
}

/// The full per-cell subscription table for the UDP transport: one
/// entry per seat, row, style and column, each tagged with its typed
/// target so decoding is a table lookup, not string re-parsing.
pub fn cell_subscriptions() -> Vec<DatarefSub> {
    let mut subs = Vec::new();
    for unit in [1u8, 2] {
        let seat = unit_seat(unit);
        for (kind, style) in unit_rows() {
            let line = kind.line();
            let small = kind.small();
            let color = style_color(style);
            for col in 0..crate::core::COLS {
                subs.push(DatarefSub {
                    name: format!("{}[{col}]", row_dataref(unit, kind, style)),
                    target: DatarefTarget::Cell {
                        seat,
                        line,
                        col,
                        color,
                        small,
                    },
                });
            }
        }
        subs.push(DatarefSub {
            name: row_dataref(unit, RowKind::VertSlew, 'w'),
            target: DatarefTarget::VertSlew { seat },
        });
        subs.extend(unit_annunciators(unit));
    }
    subs
}

/// A few ToLiss text bytes are private glyph codes
pub fn translate_special(ch: char) -> char {
    match ch {
        '`' => '°',
        '|' => 'Δ',
        _ => ch,
    }
}

/// Apply one decoded scalar value to the seat buffers.
///
/// Cell values carry a character code in their integer part; zero means
/// blank. Annunciator values are booleans above 0.5.
pub fn apply_value(buffers: &McduBuffers, target: DatarefTarget, value: f32) {
    match target {
        DatarefTarget::Cell {
            seat,
            line,
            col,
            color,
            small,
        } => {
            let code = value as i64 as u32;
            let ch = if code == 0 {
                ' '
            } else {
                translate_special(char::from_u32(code).unwrap_or(' '))
            };
            let mut buf = buffers.seat(seat);
            buf.screen.put_at(line, col, ch, color, small);
        }
        DatarefTarget::Annunciator { seat, ann } => {
            let mut buf = buffers.seat(seat);
            buf.leds.set(ann, value > 0.5);
        }
        DatarefTarget::VertSlew { seat } => {
            let code = value as i64;
            let up = code == 1 || code == 3;
            let down = code == 2 || code == 3;
            let mut buf = buffers.seat(seat);
            buf.screen
                .put_at(13, 22, if up { '↑' } else { ' ' }, CduColor::White, false);
            buf.screen
                .put_at(13, 23, if down { '↓' } else { ' ' }, CduColor::White, false);
        }
    }
}

/// Write one style variant's row bytes into a screen line. Zero bytes
/// leave the cell alone, so stacking every style variant of a line on
/// top of a cleared line leaves the union of their non-blank text.
pub fn apply_row_bytes(screen: &mut Screen, line: usize, color: CduColor, small: bool, bytes: &[u8]) {
    for (col, &b) in bytes.iter().take(COLS).enumerate() {
        if b != 0 {
            screen.put_at(line, col, translate_special(b as char), color, small);
        }
    }
}

/// X-Plane command path a key activates, per unit. `None` entries are
/// deliberate: those keys have no working command on this airframe.
pub fn key_command(seat: Seat, key: Key) -> Option<String> {
    let unit = seat_unit(seat);
    let suffix = match key {
        Key::LineSelectLeft1 => "LSK1L",
        Key::LineSelectLeft2 => "LSK2L",
        Key::LineSelectLeft3 => "LSK3L",
        Key::LineSelectLeft4 => "LSK4L",
        Key::LineSelectLeft5 => "LSK5L",
        Key::LineSelectLeft6 => "LSK6L",
        Key::LineSelectRight1 => "LSK1R",
        Key::LineSelectRight2 => "LSK2R",
        Key::LineSelectRight3 => "LSK3R",
        Key::LineSelectRight4 => "LSK4R",
        Key::LineSelectRight5 => "LSK5R",
        Key::LineSelectRight6 => "LSK6R",
        Key::Dir => "DirTo",
        Key::Prog => "Prog",
        Key::Perf => "Perf",
        Key::Init => "Init",
        Key::Data => "Data",
        Key::Fplan => "Fpln",
        Key::RadNav => "RadNav",
        Key::FuelPred => "FuelPred",
        Key::SecFplan => "SecFpln",
        Key::AtcComm => "ATC",
        Key::McduMenu => "Menu",
        // No working command on the ToLiss airframe
        Key::Airport => return None,
        Key::Overfly => return None,
        Key::UpArrow => "SlewUp",
        Key::DownArrow => "SlewDown",
        Key::LeftArrow => "SlewLeft",
        Key::RightArrow => "SlewRight",
        Key::KeyA => "KeyA",
        Key::KeyB => "KeyB",
        Key::KeyC => "KeyC",
        Key::KeyD => "KeyD",
        Key::KeyE => "KeyE",
        Key::KeyF => "KeyF",
        Key::KeyG => "KeyG",
        Key::KeyH => "KeyH",
        Key::KeyI => "KeyI",
        Key::KeyJ => "KeyJ",
        Key::KeyK => "KeyK",
        Key::KeyL => "KeyL",
        Key::KeyM => "KeyM",
        Key::KeyN => "KeyN",
        Key::KeyO => "KeyO",
        Key::KeyP => "KeyP",
        Key::KeyQ => "KeyQ",
        Key::KeyR => "KeyR",
        Key::KeyS => "KeyS",
        Key::KeyT => "KeyT",
        Key::KeyU => "KeyU",
        Key::KeyV => "KeyV",
        Key::KeyW => "KeyW",
        Key::KeyX => "KeyX",
        Key::KeyY => "KeyY",
        Key::KeyZ => "KeyZ",
        Key::Slash => "KeySlash",
        Key::Space => "KeySpace",
        Key::Clear => "KeyClear",
        Key::Digit0 => "Key0",
        Key::Digit1 => "Key1",
        Key::Digit2 => "Key2",
        Key::Digit3 => "Key3",
        Key::Digit4 => "Key4",
        Key::Digit5 => "Key5",
        Key::Digit6 => "Key6",
        Key::Digit7 => "Key7",
        Key::Digit8 => "Key8",
        Key::Digit9 => "Key9",
        Key::Dot => "KeyDecimal",
        Key::PlusMinus => "KeyPM",
        // Local-only brightness keys never reach the simulator
        Key::Brt | Key::Dim => return None,
    };
    Some(format!("AirbusFBW/MCDU{unit}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::McduBuffers;

    #[test]
    fn test_row_lines() {
        assert_eq!(RowKind::Title.line(), 0);
        assert_eq!(RowKind::Label(1).line(), 1);
        assert_eq!(RowKind::Cont(1).line(), 2);
        assert_eq!(RowKind::Label(6).line(), 11);
        assert_eq!(RowKind::Cont(6).line(), 12);
        assert_eq!(RowKind::Scratchpad.line(), 13);
    }

    #[test]
    fn test_dataref_names() {
        assert_eq!(row_dataref(1, RowKind::Title, 'w'), "AirbusFBW/MCDU1titlew");
        assert_eq!(row_dataref(2, RowKind::SmallCont(3), 'g'), "AirbusFBW/MCDU2scont3g");
        assert_eq!(
            row_dataref(1, RowKind::VertSlew, 'w'),
            "AirbusFBW/MCDU1VertSlewKeys"
        );
    }

    #[test]
    fn test_subscription_table_shape() {
        let subs = cell_subscriptions();
        // Column-indexed names for both units plus slew and annunciators
        assert!(subs.len() > 3000);
        assert!(subs.iter().any(|s| s.name == "AirbusFBW/MCDU1titlew[0]"));
        assert!(subs.iter().any(|s| s.name == "AirbusFBW/MCDU2spa[23]"));
    }

    #[test]
    fn test_apply_cell_value() {
        let buffers = McduBuffers::new(false);
        let target = DatarefTarget::Cell {
            seat: Seat::Captain,
            line: 0,
            col: 0,
            color: CduColor::White,
            small: false,
        };
        // Field semantics: the float's integer part is the char code
        apply_value(&buffers, target, 3.14);
        let buf = buffers.seat(Seat::Captain);
        assert_eq!(buf.screen.get(0, 0).unwrap().ch as u32, 3);
        assert_eq!(buf.screen.get(0, 0).unwrap().color, CduColor::White);
    }

    #[test]
    fn test_apply_annunciator_value() {
        let buffers = McduBuffers::new(false);
        let target = DatarefTarget::Annunciator {
            seat: Seat::FirstOfficer,
            ann: Annunciator::Rdy,
        };
        apply_value(&buffers, target, 1.0);
        assert!(buffers.seat(Seat::FirstOfficer).leds.get(Annunciator::Rdy));
        apply_value(&buffers, target, 0.0);
        assert!(!buffers.seat(Seat::FirstOfficer).leds.get(Annunciator::Rdy));
    }

    #[test]
    fn test_row_bytes_stack_without_clobbering() {
        let mut screen = Screen::default();
        apply_row_bytes(&mut screen, 2, CduColor::Green, false, b"AB\0\0");
        apply_row_bytes(&mut screen, 2, CduColor::White, false, b"\0\0CD");
        assert_eq!(screen.get(2, 0).unwrap().ch, 'A');
        assert_eq!(screen.get(2, 0).unwrap().color, CduColor::Green);
        assert_eq!(screen.get(2, 2).unwrap().ch, 'C');
        assert_eq!(screen.get(2, 2).unwrap().color, CduColor::White);
    }

    #[test]
    fn test_intentionally_unmapped_keys() {
        assert!(key_command(Seat::Captain, Key::Airport).is_none());
        assert!(key_command(Seat::Captain, Key::Overfly).is_none());
        assert_eq!(
            key_command(Seat::Captain, Key::LineSelectLeft1).as_deref(),
            Some("AirbusFBW/MCDU1LSK1L")
        );
        assert_eq!(
            key_command(Seat::FirstOfficer, Key::Clear).as_deref(),
            Some("AirbusFBW/MCDU2KeyClear")
        );
    }
}
