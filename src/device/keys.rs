//! CDU input decoding
//!
//! The device sends fixed-length input reports (report id 1) whose
//! payload is a key bitmask. A cheap 3-word digest of the raw report
//! gates the full per-key diff, so an idle poll costs three word
//! compares instead of one compare per key.

use serde::{Deserialize, Serialize};

/// Input report id
pub const INPUT_REPORT_ID: u8 = 0x01;
/// Total input report length including the id byte
pub const INPUT_REPORT_LEN: usize = 25;
/// Key bitmask bytes within the report (after the id byte)
pub const KEY_MASK_BYTES: usize = 9;

/// Every key on the MCDU panel. The discriminant is the key's bit index
/// in the input-report bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Key {
    LineSelectLeft1 = 0,
    LineSelectLeft2 = 1,
    LineSelectLeft3 = 2,
    LineSelectLeft4 = 3,
    LineSelectLeft5 = 4,
    LineSelectLeft6 = 5,
    LineSelectRight1 = 6,
    LineSelectRight2 = 7,
    LineSelectRight3 = 8,
    LineSelectRight4 = 9,
    LineSelectRight5 = 10,
    LineSelectRight6 = 11,
    Dir = 12,
    Prog = 13,
    Perf = 14,
    Init = 15,
    Data = 16,
    Fplan = 17,
    RadNav = 18,
    FuelPred = 19,
    SecFplan = 20,
    AtcComm = 21,
    McduMenu = 22,
    Airport = 23,
    Brt = 24,
    Dim = 25,
    UpArrow = 26,
    DownArrow = 27,
    LeftArrow = 28,
    RightArrow = 29,
    KeyA = 30,
    KeyB = 31,
    KeyC = 32,
    KeyD = 33,
    KeyE = 34,
    KeyF = 35,
    KeyG = 36,
    KeyH = 37,
    KeyI = 38,
    KeyJ = 39,
    KeyK = 40,
    KeyL = 41,
    KeyM = 42,
    KeyN = 43,
    KeyO = 44,
    KeyP = 45,
    KeyQ = 46,
    KeyR = 47,
    KeyS = 48,
    KeyT = 49,
    KeyU = 50,
    KeyV = 51,
    KeyW = 52,
    KeyX = 53,
    KeyY = 54,
    KeyZ = 55,
    Slash = 56,
    Space = 57,
    Overfly = 58,
    Clear = 59,
    Digit0 = 60,
    Digit1 = 61,
    Digit2 = 62,
    Digit3 = 63,
    Digit4 = 64,
    Digit5 = 65,
    Digit6 = 66,
    Digit7 = 67,
    Digit8 = 68,
    Digit9 = 69,
    Dot = 70,
    PlusMinus = 71,
}

/// Number of keys
pub const KEY_COUNT: usize = 72;

impl Key {
    /// Bit index within the input-report bitmask
    pub fn bit(&self) -> u8 {
        *self as u8
    }

    /// All keys in bit order
    pub const ALL: [Key; KEY_COUNT] = [
        Key::LineSelectLeft1,
        Key::LineSelectLeft2,
        Key::LineSelectLeft3,
        Key::LineSelectLeft4,
        Key::LineSelectLeft5,
        Key::LineSelectLeft6,
        Key::LineSelectRight1,
        Key::LineSelectRight2,
        Key::LineSelectRight3,
        Key::LineSelectRight4,
        Key::LineSelectRight5,
        Key::LineSelectRight6,
        Key::Dir,
        Key::Prog,
        Key::Perf,
        Key::Init,
        Key::Data,
        Key::Fplan,
        Key::RadNav,
        Key::FuelPred,
        Key::SecFplan,
        Key::AtcComm,
        Key::McduMenu,
        Key::Airport,
        Key::Brt,
        Key::Dim,
        Key::UpArrow,
        Key::DownArrow,
        Key::LeftArrow,
        Key::RightArrow,
        Key::KeyA,
        Key::KeyB,
        Key::KeyC,
        Key::KeyD,
        Key::KeyE,
        Key::KeyF,
        Key::KeyG,
        Key::KeyH,
        Key::KeyI,
        Key::KeyJ,
        Key::KeyK,
        Key::KeyL,
        Key::KeyM,
        Key::KeyN,
        Key::KeyO,
        Key::KeyP,
        Key::KeyQ,
        Key::KeyR,
        Key::KeyS,
        Key::KeyT,
        Key::KeyU,
        Key::KeyV,
        Key::KeyW,
        Key::KeyX,
        Key::KeyY,
        Key::KeyZ,
        Key::Slash,
        Key::Space,
        Key::Overfly,
        Key::Clear,
        Key::Digit0,
        Key::Digit1,
        Key::Digit2,
        Key::Digit3,
        Key::Digit4,
        Key::Digit5,
        Key::Digit6,
        Key::Digit7,
        Key::Digit8,
        Key::Digit9,
        Key::Dot,
        Key::PlusMinus,
    ];
}

/// Decoded pressed/released state of every key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyState(u128);

impl KeyState {
    /// Decode an input report. Returns `None` for reports that are not
    /// key reports (wrong id or truncated).
    pub fn decode(report: &[u8]) -> Option<KeyState> {
        if report.len() < 1 + KEY_MASK_BYTES || report[0] != INPUT_REPORT_ID {
            return None;
        }
        let mut bits: u128 = 0;
        for (i, &byte) in report[1..=KEY_MASK_BYTES].iter().enumerate() {
            bits |= u128::from(byte) << (i * 8);
        }
        Some(KeyState(bits))
    }

    /// Whether a key is held down
    pub fn pressed(&self, key: Key) -> bool {
        self.0 & (1u128 << key.bit()) != 0
    }

    /// Key transitions between `previous` and this state, as
    /// (key, pressed) pairs.
    pub fn diff(&self, previous: &KeyState) -> impl Iterator<Item = (Key, bool)> + '_ {
        let changed = self.0 ^ previous.0;
        let cur = self.0;
        Key::ALL
            .into_iter()
            .filter(move |k| changed & (1u128 << k.bit()) != 0)
            .map(move |k| (k, cur & (1u128 << k.bit()) != 0))
    }
}

/// Cheap digest of a raw input report: the report bytes folded into
/// three words. Equal digests mean an identical report, so the per-key
/// diff can be skipped on idle polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportDigest([u64; 3]);

impl ReportDigest {
    pub fn of(report: &[u8]) -> ReportDigest {
        let mut words = [0u64; 3];
        let third = report.len().div_ceil(3).max(1);
        for (i, chunk) in report.chunks(third).enumerate().take(3) {
            let mut acc = 0u64;
            for &b in chunk {
                acc = acc.rotate_left(8) ^ u64::from(b);
            }
            words[i] = acc;
        }
        ReportDigest(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with_bits(bits: &[u8]) -> Vec<u8> {
        let mut report = vec![0u8; INPUT_REPORT_LEN];
        report[0] = INPUT_REPORT_ID;
        for &bit in bits {
            report[1 + (bit / 8) as usize] |= 1 << (bit % 8);
        }
        report
    }

    #[test]
    fn test_decode_pressed_keys() {
        let report = report_with_bits(&[Key::LineSelectLeft1.bit(), Key::KeyZ.bit()]);
        let state = KeyState::decode(&report).unwrap();
        assert!(state.pressed(Key::LineSelectLeft1));
        assert!(state.pressed(Key::KeyZ));
        assert!(!state.pressed(Key::Clear));
    }

    #[test]
    fn test_decode_rejects_wrong_id() {
        let mut report = report_with_bits(&[0]);
        report[0] = 0x02;
        assert!(KeyState::decode(&report).is_none());
        assert!(KeyState::decode(&[INPUT_REPORT_ID, 0, 0]).is_none());
    }

    #[test]
    fn test_diff_press_and_release() {
        let before = KeyState::decode(&report_with_bits(&[Key::Clear.bit()])).unwrap();
        let after =
            KeyState::decode(&report_with_bits(&[Key::Dir.bit()])).unwrap();

        let changes: Vec<_> = after.diff(&before).collect();
        assert_eq!(changes.len(), 2);
        assert!(changes.contains(&(Key::Clear, false)));
        assert!(changes.contains(&(Key::Dir, true)));
    }

    #[test]
    fn test_digest_detects_change() {
        let a = report_with_bits(&[Key::KeyA.bit()]);
        let b = report_with_bits(&[Key::KeyB.bit()]);
        assert_eq!(ReportDigest::of(&a), ReportDigest::of(&a));
        assert_ne!(ReportDigest::of(&a), ReportDigest::of(&b));
    }

    #[test]
    fn test_all_bits_unique() {
        let mut seen = [false; KEY_COUNT];
        for key in Key::ALL {
            let bit = key.bit() as usize;
            assert!(bit < KEY_COUNT);
            assert!(!seen[bit]);
            seen[bit] = true;
        }
    }
}
