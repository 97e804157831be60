// Remapd Raw Event Type
// One input event as read from a device source

use std::fmt;

use crate::key::{EventKind, KeyIdentifier};

/// Key event values as reported by the kernel.
pub const KEY_UP: i32 = 0;
pub const KEY_DOWN: i32 = 1;
pub const KEY_AUTOREPEAT: i32 = 2;

/// A single raw input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    pub code: u16,
    pub value: i32,
}

/// Absolute hat-switch axes (gamepad d-pads) behave like buttons.
const ABS_HAT_FIRST: u16 = 16;
const ABS_HAT_LAST: u16 = 23;

impl RawEvent {
    pub fn new(kind: EventKind, code: u16, value: i32) -> Self {
        Self { kind, code, value }
    }

    /// Shorthand for an `EV_KEY` event.
    pub fn key(code: u16, value: i32) -> Self {
        Self::new(EventKind::Key, code, value)
    }

    pub fn identifier(&self) -> KeyIdentifier {
        KeyIdentifier::new(self.kind, self.code)
    }

    /// Whether this event participates in chord recognition.
    ///
    /// Key events always do; of the absolute axes only hat switches report
    /// discrete press/release values, everything else is analog movement.
    pub fn is_button(&self) -> bool {
        match self.kind {
            EventKind::Key => true,
            EventKind::Absolute => (ABS_HAT_FIRST..=ABS_HAT_LAST).contains(&self.code),
            EventKind::Relative => false,
        }
    }

    /// Any nonzero value counts as down; hat switches report -1/+1 and
    /// analog triggers report continuous positive values.
    pub fn is_down(&self) -> bool {
        self.value != KEY_UP && !self.is_autorepeat()
    }

    pub fn is_up(&self) -> bool {
        self.value == KEY_UP
    }

    pub fn is_autorepeat(&self) -> bool {
        self.kind == EventKind::Key && self.value == KEY_AUTOREPEAT
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.kind.raw(), self.code, self.value)
    }
}
