//! CDU HID report encoding
//!
//! Pure functions that turn display, LED and brightness state into the
//! fixed 64-byte output reports the device expects. No I/O here; the
//! driver feeds the returned packets to hidapi.

use bytes::{BufMut, BytesMut};

use crate::core::{Annunciator, Leds, Screen};

/// Every output report is exactly this long
pub const REPORT_LEN: usize = 64;
/// Leading tag byte of a display-cell report
pub const DISPLAY_REPORT_ID: u8 = 0xF2;
/// Leading tag byte of the short LED/brightness report
pub const LAMP_REPORT_ID: u8 = 0x02;
/// Length of the short LED/brightness report
pub const LAMP_REPORT_LEN: usize = 14;

/// Per-cell style code: palette slot times this multiplier
pub const COLOR_CODE_MULTIPLIER: u16 = 0x21;
/// Added to the style code for small-font cells
pub const SMALL_FONT_OFFSET: u16 = 0x016C;
/// Added to the very first cell of a frame
pub const FRAME_START_MARK: u16 = 1;
/// Added to the very last cell of a frame
pub const FRAME_END_MARK: u16 = 2;

/// Minimum gap between display flushes, in milliseconds. Sending frames
/// back-to-back faster than this corrupts the device's own screen state
/// (hardware errata). Literal constant; do not re-derive.
pub const DISPLAY_SETTLE_MS: u64 = 25;

/// Brightness channels. Each maps a 0-100 percentage linearly onto a
/// 0-255 wire byte and is sent unconditionally on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessChannel {
    Display,
    KeyboardBacklight,
    LedIntensity,
}

impl BrightnessChannel {
    /// Wire code of the channel within the lamp report
    pub fn code(&self) -> u8 {
        match self {
            BrightnessChannel::Display => 0x00,
            BrightnessChannel::KeyboardBacklight => 0x01,
            BrightnessChannel::LedIntensity => 0x02,
        }
    }
}

/// Wire code of an annunciator within the lamp report.
/// Indicators a given family lacks are simply never encoded.
pub fn annunciator_code(ann: Annunciator) -> u8 {
    match ann {
        Annunciator::Fail => 0x08,
        Annunciator::Fm => 0x09,
        Annunciator::Mcdu => 0x0A,
        Annunciator::Menu => 0x0B,
        Annunciator::Fm1 => 0x0C,
        Annunciator::Ind => 0x0D,
        Annunciator::Rdy => 0x0E,
        Annunciator::Status => 0x0F,
        Annunciator::Fm2 => 0x10,
        Annunciator::Exec => 0x11,
        Annunciator::Msg => 0x12,
        Annunciator::Ofst => 0x13,
        Annunciator::Dspy => 0x14,
    }
}

/// Encode the whole screen as a sequence of display reports.
///
/// Cells are walked in row-major order. Each cell contributes a
/// little-endian u16 style code followed by the UTF-8 bytes of its
/// character; the stream is packed into 64-byte reports tagged
/// [`DISPLAY_REPORT_ID`], the last one zero-padded.
pub fn encode_display(screen: &Screen) -> Vec<[u8; REPORT_LEN]> {
    let cells: Vec<_> = screen.iter().collect();
    let last = cells.len().saturating_sub(1);

    let mut stream = BytesMut::with_capacity(cells.len() * 3);
    for (i, (_, _, cell)) in cells.iter().enumerate() {
        let mut code = u16::from(cell.color.index()) * COLOR_CODE_MULTIPLIER;
        if cell.small {
            code += SMALL_FONT_OFFSET;
        }
        if i == 0 {
            code += FRAME_START_MARK;
        }
        if i == last {
            code += FRAME_END_MARK;
        }
        stream.put_u16_le(code);

        let mut utf8 = [0u8; 4];
        stream.put_slice(cell.ch.encode_utf8(&mut utf8).as_bytes());
    }

    // Pack into tagged 64-byte reports, zero-padding the final one
    stream
        .chunks(REPORT_LEN - 1)
        .map(|chunk| {
            let mut report = [0u8; REPORT_LEN];
            report[0] = DISPLAY_REPORT_ID;
            report[1..1 + chunk.len()].copy_from_slice(chunk);
            report
        })
        .collect()
}

/// Duplicate-suppressed display encoding.
///
/// Returns `None` when the screen fingerprint matches the last sent one
/// and `force` is not set; otherwise encodes and records the new
/// fingerprint.
pub fn encode_display_if_changed(
    screen: &Screen,
    last_fingerprint: &mut Option<String>,
    force: bool,
) -> Option<Vec<[u8; REPORT_LEN]>> {
    let fingerprint = screen.fingerprint();
    if !force && last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
        return None;
    }
    *last_fingerprint = Some(fingerprint);
    Some(encode_display(screen))
}

fn lamp_report(code: u8, value: u8) -> [u8; LAMP_REPORT_LEN] {
    [
        LAMP_REPORT_ID,
        0x32,
        0xBB,
        0x00,
        0x00,
        0x03,
        0x49,
        code,
        value,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
    ]
}

/// Encode one indicator's on/off packet
pub fn encode_led(ann: Annunciator, on: bool) -> [u8; LAMP_REPORT_LEN] {
    lamp_report(annunciator_code(ann), u8::from(on))
}

/// Encode the packets for every indicator that changed since `previous`,
/// or for all of them when forced.
pub fn encode_led_changes(
    leds: &Leds,
    previous: &Leds,
    supported: &[Annunciator],
    force: bool,
) -> Vec<[u8; LAMP_REPORT_LEN]> {
    supported
        .iter()
        .filter(|ann| force || leds.get(**ann) != previous.get(**ann))
        .map(|ann| encode_led(*ann, leds.get(*ann)))
        .collect()
}

/// Linear 0-100 percent to 0-255 wire byte
pub fn percent_to_byte(percent: u8) -> u8 {
    (u16::from(percent.min(100)) * 255 / 100) as u8
}

/// Encode one brightness channel write
pub fn encode_brightness(channel: BrightnessChannel, percent: u8) -> [u8; LAMP_REPORT_LEN] {
    lamp_report(channel.code(), percent_to_byte(percent))
}
