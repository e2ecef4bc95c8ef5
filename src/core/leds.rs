//! CDU Annunciators - The LED bank
//!
//! A named set of boolean indicator lamps. Not every physical device
//! carries every indicator; unsupported ones are simply never encoded.

use serde::{Deserialize, Serialize};

/// Named status LEDs across the supported device families.
/// FAIL..FM2 are the Airbus MCDU bank; EXEC..DSPY are the Boeing PFP bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annunciator {
    Fail,
    Fm,
    Mcdu,
    Menu,
    Fm1,
    Ind,
    Rdy,
    Status,
    Fm2,
    Exec,
    Msg,
    Ofst,
    Dspy,
}

/// Number of annunciators
pub const ANNUNCIATOR_COUNT: usize = 13;

impl Annunciator {
    /// All annunciators in slot order
    pub const ALL: [Annunciator; ANNUNCIATOR_COUNT] = [
        Annunciator::Fail,
        Annunciator::Fm,
        Annunciator::Mcdu,
        Annunciator::Menu,
        Annunciator::Fm1,
        Annunciator::Ind,
        Annunciator::Rdy,
        Annunciator::Status,
        Annunciator::Fm2,
        Annunciator::Exec,
        Annunciator::Msg,
        Annunciator::Ofst,
        Annunciator::Dspy,
    ];

    fn slot(&self) -> usize {
        Self::ALL.iter().position(|a| a == self).unwrap_or(0)
    }
}

/// The LED state bank: one boolean per annunciator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Leds {
    states: [bool; ANNUNCIATOR_COUNT],
}

impl Leds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of one indicator
    pub fn get(&self, ann: Annunciator) -> bool {
        self.states[ann.slot()]
    }

    /// Set one indicator
    pub fn set(&mut self, ann: Annunciator, on: bool) {
        self.states[ann.slot()] = on;
    }

    /// Switch every indicator to the same state
    pub fn set_all(&mut self, on: bool) {
        self.states = [on; ANNUNCIATOR_COUNT];
    }

    /// Whether any indicator is lit
    pub fn any(&self) -> bool {
        self.states.iter().any(|&s| s)
    }

    /// Indicators whose state differs from `previous`, with their new value
    pub fn diff(&self, previous: &Leds) -> impl Iterator<Item = (Annunciator, bool)> + '_ {
        let prev = *previous;
        Annunciator::ALL
            .into_iter()
            .filter(move |ann| self.get(*ann) != prev.get(*ann))
            .map(|ann| (ann, self.get(ann)))
    }

    /// Iterate all indicators with their current state
    pub fn iter(&self) -> impl Iterator<Item = (Annunciator, bool)> + '_ {
        Annunciator::ALL.into_iter().map(|ann| (ann, self.get(ann)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let mut leds = Leds::new();
        assert!(!leds.get(Annunciator::Rdy));
        leds.set(Annunciator::Rdy, true);
        assert!(leds.get(Annunciator::Rdy));
        assert!(leds.any());
    }

    #[test]
    fn test_diff_reports_only_changes() {
        let mut prev = Leds::new();
        prev.set(Annunciator::Fail, true);

        let mut cur = prev;
        cur.set(Annunciator::Fail, false);
        cur.set(Annunciator::Menu, true);

        let changes: Vec<_> = cur.diff(&prev).collect();
        assert_eq!(changes.len(), 2);
        assert!(changes.contains(&(Annunciator::Fail, false)));
        assert!(changes.contains(&(Annunciator::Menu, true)));
    }

    #[test]
    fn test_diff_empty_when_equal() {
        let leds = Leds::new();
        assert_eq!(leds.diff(&leds).count(), 0);
    }
}
