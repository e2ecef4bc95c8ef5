//! CDU Device Module
//!
//! Everything that talks to, or describes, the physical unit:
//! - reports: HID output-report encoding (pure, testable)
//! - keys: input-report decoding and key transitions
//! - keymap: cross-family key translation
//! - font: bitmap font packaging
//! - driver: the hidapi read/write plumbing

pub mod driver;
pub mod font;
pub mod keymap;
pub mod keys;
pub mod reports;

pub use driver::{CduDevice, DeviceEvent};
pub use font::{CduFont, FontBank, FontTemplate, Glyph};
pub use keymap::{DeviceTypeKeymap, KeymapRegistry};
pub use keys::{Key, KeyState};
pub use reports::BrightnessChannel;

use serde::{Deserialize, Serialize};

/// Which simulated seat a device (or buffer) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    Captain,
    FirstOfficer,
    Observer,
}

/// The logical device family a physical unit emulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Airbus-style MCDU
    Mcdu,
    /// Boeing 737-style PFP
    Pfp3N,
    /// Boeing 777-style PFP
    Pfp7,
}

/// Immutable USB identity plus the logical role a unit plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentifier {
    pub vendor_id: u16,
    pub product_id: u16,
    pub family: DeviceFamily,
    pub seat: Seat,
}

/// Compiled-in table of supported units.
/// Captain and first-officer variants enumerate as distinct product ids.
pub const KNOWN_DEVICES: &[DeviceIdentifier] = &[
    DeviceIdentifier {
        vendor_id: 0x4098,
        product_id: 0xBB36,
        family: DeviceFamily::Mcdu,
        seat: Seat::Captain,
    },
    DeviceIdentifier {
        vendor_id: 0x4098,
        product_id: 0xBB3E,
        family: DeviceFamily::Mcdu,
        seat: Seat::FirstOfficer,
    },
    DeviceIdentifier {
        vendor_id: 0x4098,
        product_id: 0xBB3A,
        family: DeviceFamily::Mcdu,
        seat: Seat::Observer,
    },
    DeviceIdentifier {
        vendor_id: 0x4098,
        product_id: 0xBC1D,
        family: DeviceFamily::Pfp3N,
        seat: Seat::Captain,
    },
    DeviceIdentifier {
        vendor_id: 0x4098,
        product_id: 0xBA01,
        family: DeviceFamily::Pfp7,
        seat: Seat::Captain,
    },
];

/// Look up a known device by USB identity
pub fn identify(vendor_id: u16, product_id: u16) -> Option<DeviceIdentifier> {
    KNOWN_DEVICES
        .iter()
        .copied()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_known() {
        let id = identify(0x4098, 0xBB36).unwrap();
        assert_eq!(id.family, DeviceFamily::Mcdu);
        assert_eq!(id.seat, Seat::Captain);
    }

    #[test]
    fn test_identify_unknown() {
        assert!(identify(0x1234, 0x5678).is_none());
    }
}
