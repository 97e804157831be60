// Remapd Key Types
// Event kind / key identifier value types and the key name table

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// Raw event type, mirroring the Linux input event types we handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum_macros::Display)]
#[repr(u16)]
pub enum EventKind {
    Key = 1,
    Relative = 2,
    Absolute = 3,
}

impl EventKind {
    /// Map a raw `EV_*` type number to a kind, if it is one we model.
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(EventKind::Key),
            2 => Some(EventKind::Relative),
            3 => Some(EventKind::Absolute),
            _ => None,
        }
    }

    pub fn raw(self) -> u16 {
        self as u16
    }
}

/// A `(kind, code)` pair; the unit of chord membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyIdentifier {
    pub kind: EventKind,
    pub code: u16,
}

impl KeyIdentifier {
    pub fn new(kind: EventKind, code: u16) -> Self {
        Self { kind, code }
    }

    /// Shorthand for an `EV_KEY` identifier.
    pub const fn key(code: u16) -> Self {
        Self {
            kind: EventKind::Key,
            code,
        }
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.kind.raw(), self.code)
    }
}

/// `EV_KEY` names, canonical name first per code.
///
/// Codes from linux/input-event-codes.h.
static KEY_NAMES: &[(&str, u16)] = &[
    ("esc", 1),
    ("1", 2),
    ("2", 3),
    ("3", 4),
    ("4", 5),
    ("5", 6),
    ("6", 7),
    ("7", 8),
    ("8", 9),
    ("9", 10),
    ("0", 11),
    ("minus", 12),
    ("equal", 13),
    ("backspace", 14),
    ("tab", 15),
    ("q", 16),
    ("w", 17),
    ("e", 18),
    ("r", 19),
    ("t", 20),
    ("y", 21),
    ("u", 22),
    ("i", 23),
    ("o", 24),
    ("p", 25),
    ("leftbrace", 26),
    ("rightbrace", 27),
    ("enter", 28),
    ("leftctrl", 29),
    ("a", 30),
    ("s", 31),
    ("d", 32),
    ("f", 33),
    ("g", 34),
    ("h", 35),
    ("j", 36),
    ("k", 37),
    ("l", 38),
    ("semicolon", 39),
    ("apostrophe", 40),
    ("grave", 41),
    ("leftshift", 42),
    ("backslash", 43),
    ("z", 44),
    ("x", 45),
    ("c", 46),
    ("v", 47),
    ("b", 48),
    ("n", 49),
    ("m", 50),
    ("comma", 51),
    ("dot", 52),
    ("slash", 53),
    ("rightshift", 54),
    ("kpasterisk", 55),
    ("leftalt", 56),
    ("space", 57),
    ("capslock", 58),
    ("f1", 59),
    ("f2", 60),
    ("f3", 61),
    ("f4", 62),
    ("f5", 63),
    ("f6", 64),
    ("f7", 65),
    ("f8", 66),
    ("f9", 67),
    ("f10", 68),
    ("numlock", 69),
    ("scrolllock", 70),
    ("kp7", 71),
    ("kp8", 72),
    ("kp9", 73),
    ("kpminus", 74),
    ("kp4", 75),
    ("kp5", 76),
    ("kp6", 77),
    ("kpplus", 78),
    ("kp1", 79),
    ("kp2", 80),
    ("kp3", 81),
    ("kp0", 82),
    ("kpdot", 83),
    ("102nd", 86),
    ("f11", 87),
    ("f12", 88),
    ("kpenter", 96),
    ("rightctrl", 97),
    ("kpslash", 98),
    ("sysrq", 99),
    ("rightalt", 100),
    ("home", 102),
    ("up", 103),
    ("pageup", 104),
    ("left", 105),
    ("right", 106),
    ("end", 107),
    ("down", 108),
    ("pagedown", 109),
    ("insert", 110),
    ("delete", 111),
    ("mute", 113),
    ("volumedown", 114),
    ("volumeup", 115),
    ("power", 116),
    ("kpequal", 117),
    ("pause", 119),
    ("kpcomma", 121),
    ("leftmeta", 125),
    ("rightmeta", 126),
    ("compose", 127),
    ("stop", 128),
    ("again", 129),
    ("undo", 131),
    ("copy", 133),
    ("paste", 135),
    ("find", 136),
    ("cut", 137),
    ("help", 138),
    ("menu", 139),
    ("calc", 140),
    ("sleep", 142),
    ("wakeup", 143),
    ("mail", 155),
    ("bookmarks", 156),
    ("computer", 157),
    ("back", 158),
    ("forward", 159),
    ("nextsong", 163),
    ("playpause", 164),
    ("previoussong", 165),
    ("stopcd", 166),
    ("record", 167),
    ("rewind", 168),
    ("homepage", 172),
    ("refresh", 173),
    ("scrollup", 177),
    ("scrolldown", 178),
    ("f13", 183),
    ("f14", 184),
    ("f15", 185),
    ("f16", 186),
    ("f17", 187),
    ("f18", 188),
    ("f19", 189),
    ("f20", 190),
    ("f21", 191),
    ("f22", 192),
    ("f23", 193),
    ("f24", 194),
    ("micmute", 248),
    // mouse buttons
    ("btn_left", 272),
    ("btn_right", 273),
    ("btn_middle", 274),
    ("btn_side", 275),
    ("btn_extra", 276),
    ("btn_forward", 277),
    ("btn_back", 278),
    ("btn_task", 279),
    // gamepad buttons
    ("btn_south", 304),
    ("btn_east", 305),
    ("btn_north", 307),
    ("btn_west", 308),
    ("btn_tl", 310),
    ("btn_tr", 311),
    ("btn_tl2", 312),
    ("btn_tr2", 313),
    ("btn_select", 314),
    ("btn_start", 315),
    ("btn_mode", 316),
    ("btn_thumbl", 317),
    ("btn_thumbr", 318),
    ("btn_dpad_up", 544),
    ("btn_dpad_down", 545),
    ("btn_dpad_left", 546),
    ("btn_dpad_right", 547),
];

/// Aliases accepted on input but never produced by `name_of`.
///
/// Includes the X-style modifier names that presets written against the
/// original tooling use (Shift_L, Control_L, ...).
static KEY_ALIASES: &[(&str, u16)] = &[
    ("escape", 1),
    ("return", 28),
    ("shift_l", 42),
    ("shift_r", 54),
    ("control_l", 29),
    ("control_r", 97),
    ("ctrl_l", 29),
    ("ctrl_r", 97),
    ("alt_l", 56),
    ("alt_r", 100),
    ("super_l", 125),
    ("super_r", 126),
    ("meta_l", 125),
    ("meta_r", 126),
    ("caps_lock", 58),
    ("num_lock", 69),
    ("scroll_lock", 70),
    ("print", 99),
    ("prior", 104),
    ("next", 109),
    ("kp_0", 82),
    ("kp_1", 79),
    ("kp_2", 80),
    ("kp_3", 81),
    ("kp_4", 75),
    ("kp_5", 76),
    ("kp_6", 77),
    ("kp_7", 71),
    ("kp_8", 72),
    ("kp_9", 73),
    ("kp_enter", 96),
    ("kp_add", 78),
    ("kp_subtract", 74),
    ("kp_multiply", 55),
    ("kp_divide", 98),
    ("btn_a", 304),
    ("btn_b", 305),
    ("btn_x", 307),
    ("btn_y", 308),
];

/// Immutable bidirectional mapping between key names and identifiers.
///
/// Constructed once at process start and shared by reference; never mutated
/// afterwards, so it needs no locking.
#[derive(Debug, Clone, Default)]
pub struct KeyNameTable {
    by_name: HashMap<String, KeyIdentifier>,
    by_key: HashMap<KeyIdentifier, String>,
    names: Vec<String>,
}

impl KeyNameTable {
    /// Build the table of built-in key and button names.
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for &(name, code) in KEY_NAMES {
            table.insert(name, KeyIdentifier::key(code));
        }
        for &(name, code) in KEY_ALIASES {
            table.insert(name, KeyIdentifier::key(code));
        }
        table
    }

    fn insert(&mut self, name: &str, key: KeyIdentifier) {
        let name = name.to_lowercase();
        // first registration of a code is its canonical name
        self.by_key.entry(key).or_insert_with(|| name.clone());
        if self.by_name.insert(name.clone(), key).is_none() {
            self.names.push(name);
        }
    }

    /// Resolve a human-readable name to an identifier. Case-insensitive.
    pub fn resolve(&self, name: &str) -> Result<KeyIdentifier> {
        let normalized = name.trim().to_lowercase();
        self.by_name
            .get(&normalized)
            .copied()
            .ok_or_else(|| Error::UnknownKeyName(name.trim().to_string()))
    }

    /// Canonical name for an identifier, if it has one.
    pub fn name_of(&self, key: KeyIdentifier) -> Option<&str> {
        self.by_key.get(&key).map(String::as_str)
    }

    /// All known names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Return a copy of this table extended with name -> keycode pairs from
    /// a JSON dump (the aux config passed to `Coordinator::start`, a layout
    /// export in the shape `{"aring": 26, ...}`).
    ///
    /// Entries outside the valid keycode range are skipped with a warning.
    pub fn with_overrides(&self, path: &Path) -> Result<KeyNameTable> {
        let content = std::fs::read_to_string(path)?;
        let overrides: HashMap<String, i64> = serde_json::from_str(&content)
            .map_err(|e| Error::config_in(path, e))?;

        let mut table = self.clone();
        for (name, code) in overrides {
            if !(0..=0x2ff).contains(&code) {
                log::warn!("ignoring override \"{}\": code {} out of range", name, code);
                continue;
            }
            table.insert(&name, KeyIdentifier::key(code as u16));
        }
        log::debug!("loaded key name overrides from \"{}\"", path.display());
        Ok(table)
    }
}
