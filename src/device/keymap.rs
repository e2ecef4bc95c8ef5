//! Cross-family key translation
//!
//! Physical CDU layouts differ between device families: a Boeing PFP
//! key sits on the bit position of a different Airbus MCDU key. When a
//! device of one family mirrors a simulator that expects the other
//! family's key set, the keymap rewrites each key before it is sent.
//!
//! Mappings are bijective where they exist; a key with no entry passes
//! through unchanged. The registry is an explicit value owned by the
//! application context, not ambient global state.

use super::keys::Key;
use super::DeviceFamily;

/// A static bidirectional key lookup between two device families
#[derive(Debug, Clone, Copy)]
pub struct DeviceTypeKeymap {
    pub from: DeviceFamily,
    pub to: DeviceFamily,
    pairs: &'static [(Key, Key)],
}

/// MCDU <-> 737 PFP. Left column: the bit the MCDU firmware reports for
/// a panel position; right column: the bit the PFP reports for the same
/// position. The table is a closed permutation so the round trip is the
/// identity for every key.
const MCDU_PFP3N: &[(Key, Key)] = &[
    (Key::Dir, Key::Init),          // DIR       / INIT REF
    (Key::Init, Key::Dir),
    (Key::Fplan, Key::RadNav),      // F-PLN     / RTE
    (Key::RadNav, Key::Fplan),
    (Key::Perf, Key::FuelPred),     // PERF      / N1 LIMIT
    (Key::FuelPred, Key::Perf),
    (Key::Data, Key::SecFplan),     // DATA      / FIX
    (Key::SecFplan, Key::Data),
    (Key::AtcComm, Key::Airport),   // ATC COMM  / HOLD
    (Key::Airport, Key::AtcComm),
    (Key::UpArrow, Key::DownArrow), // slew direction is inverted on the PFP
    (Key::DownArrow, Key::UpArrow),
];

/// MCDU <-> 777 PFP
const MCDU_PFP7: &[(Key, Key)] = &[
    (Key::Dir, Key::Init),      // DIR   / INIT REF
    (Key::Init, Key::Dir),
    (Key::Fplan, Key::RadNav),  // F-PLN / RTE
    (Key::RadNav, Key::Fplan),
    (Key::Data, Key::SecFplan), // DATA  / FIX
    (Key::SecFplan, Key::Data),
];

impl DeviceTypeKeymap {
    /// Translate a key A->B. Keys with no mapping entry are returned
    /// unchanged.
    pub fn translate(&self, key: Key) -> Key {
        self.pairs
            .iter()
            .find(|(a, _)| *a == key)
            .map(|(_, b)| *b)
            .unwrap_or(key)
    }

    /// The reverse-direction keymap
    pub fn reversed(&self) -> ReversedKeymap {
        ReversedKeymap {
            from: self.to,
            to: self.from,
            pairs: self.pairs,
        }
    }
}

/// Reverse view over a keymap's static pair table
#[derive(Debug, Clone, Copy)]
pub struct ReversedKeymap {
    pub from: DeviceFamily,
    pub to: DeviceFamily,
    pairs: &'static [(Key, Key)],
}

impl ReversedKeymap {
    pub fn translate(&self, key: Key) -> Key {
        self.pairs
            .iter()
            .find(|(_, b)| *b == key)
            .map(|(a, _)| *a)
            .unwrap_or(key)
    }
}

/// The compiled-in keymap set, owned by the application context
#[derive(Debug, Clone)]
pub struct KeymapRegistry {
    maps: Vec<DeviceTypeKeymap>,
}

impl Default for KeymapRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KeymapRegistry {
    /// The predefined cross-device keymaps
    pub fn builtin() -> Self {
        Self {
            maps: vec![
                DeviceTypeKeymap {
                    from: DeviceFamily::Mcdu,
                    to: DeviceFamily::Pfp3N,
                    pairs: MCDU_PFP3N,
                },
                DeviceTypeKeymap {
                    from: DeviceFamily::Mcdu,
                    to: DeviceFamily::Pfp7,
                    pairs: MCDU_PFP7,
                },
            ],
        }
    }

    /// Translate a key from one family's layout to another's.
    /// Identity when the families match or no keymap is registered.
    pub fn translate(&self, from: DeviceFamily, to: DeviceFamily, key: Key) -> Key {
        if from == to {
            return key;
        }
        for map in &self.maps {
            if map.from == from && map.to == to {
                return map.translate(key);
            }
            if map.from == to && map.to == from {
                return map.reversed().translate(key);
            }
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_identity() {
        let registry = KeymapRegistry::builtin();
        for key in Key::ALL {
            let there = registry.translate(DeviceFamily::Mcdu, DeviceFamily::Pfp3N, key);
            let back = registry.translate(DeviceFamily::Pfp3N, DeviceFamily::Mcdu, there);
            assert_eq!(back, key, "round trip failed for {key:?}");
        }
    }

    #[test]
    fn test_unmapped_key_passes_through() {
        let registry = KeymapRegistry::builtin();
        assert_eq!(
            registry.translate(DeviceFamily::Mcdu, DeviceFamily::Pfp3N, Key::Clear),
            Key::Clear
        );
    }

    #[test]
    fn test_same_family_is_identity() {
        let registry = KeymapRegistry::builtin();
        assert_eq!(
            registry.translate(DeviceFamily::Mcdu, DeviceFamily::Mcdu, Key::Dir),
            Key::Dir
        );
    }

    #[test]
    fn test_mapped_pair() {
        let registry = KeymapRegistry::builtin();
        assert_eq!(
            registry.translate(DeviceFamily::Mcdu, DeviceFamily::Pfp3N, Key::Dir),
            Key::Init
        );
        assert_eq!(
            registry.translate(DeviceFamily::Pfp3N, DeviceFamily::Mcdu, Key::Init),
            Key::Dir
        );
    }

    #[test]
    fn test_pair_tables_are_bijective() {
        for pairs in [MCDU_PFP3N, MCDU_PFP7] {
            for (i, (a, b)) in pairs.iter().enumerate() {
                for (j, (c, d)) in pairs.iter().enumerate() {
                    if i != j {
                        assert_ne!(a, c);
                        assert_ne!(b, d);
                    }
                }
            }
        }
    }
}
