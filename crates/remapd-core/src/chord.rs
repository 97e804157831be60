// Remapd Chord Type
// A set of key identifiers that must be simultaneously down

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::key::{EventKind, KeyIdentifier};

/// Errors produced when parsing a serialized chord.
#[derive(Debug, thiserror::Error)]
pub enum ChordParseError {
    #[error("empty chord")]
    Empty,

    #[error("bad event descriptor \"{0}\", expected \"type,code\"")]
    BadDescriptor(String),

    #[error("unsupported event type {0} in \"{1}\"")]
    UnsupportedType(u16, String),
}

/// An unordered set of keys stored in canonical (sorted) order, so that
/// equality and hashing are independent of the order keys were written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chord {
    keys: SmallVec<[KeyIdentifier; 2]>,
}

impl Chord {
    pub fn new(keys: impl IntoIterator<Item = KeyIdentifier>) -> Self {
        let mut keys: SmallVec<[KeyIdentifier; 2]> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self { keys }
    }

    /// A single-key chord.
    pub fn single(key: KeyIdentifier) -> Self {
        Self::new([key])
    }

    pub fn keys(&self) -> &[KeyIdentifier] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: KeyIdentifier) -> bool {
        self.keys.binary_search(&key).is_ok()
    }

    /// Whether every member of `self` is also a member of `other`.
    pub fn is_subset_of(&self, other: &Chord) -> bool {
        self.keys.iter().all(|k| other.contains(*k))
    }

    /// Strict subset: subset and smaller.
    pub fn is_strict_subset_of(&self, other: &Chord) -> bool {
        self.len() < other.len() && self.is_subset_of(other)
    }
}

impl FromStr for Chord {
    type Err = ChordParseError;

    /// Parse the serialized preset form: `+`-separated descriptors of
    /// `type,code` integers. A legacy third field (the event value recorded
    /// by older presets) is accepted and discarded, membership is by
    /// `(kind, code)` only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ChordParseError::Empty);
        }

        let mut keys = Vec::new();
        for descriptor in s.split('+') {
            let fields: Vec<&str> = descriptor.split(',').map(str::trim).collect();
            if !(2..=3).contains(&fields.len()) {
                return Err(ChordParseError::BadDescriptor(descriptor.to_string()));
            }

            let parse = |field: &str| {
                field
                    .parse::<u16>()
                    .map_err(|_| ChordParseError::BadDescriptor(descriptor.to_string()))
            };
            let raw_kind = parse(fields[0])?;
            let code = parse(fields[1])?;
            if fields.len() == 3 {
                // legacy value field, must at least be an integer
                fields[2]
                    .parse::<i32>()
                    .map_err(|_| ChordParseError::BadDescriptor(descriptor.to_string()))?;
            }

            let kind = EventKind::from_raw(raw_kind)
                .ok_or_else(|| ChordParseError::UnsupportedType(raw_kind, descriptor.to_string()))?;
            keys.push(KeyIdentifier::new(kind, code));
        }

        let chord = Chord::new(keys);
        if chord.is_empty() {
            return Err(ChordParseError::Empty);
        }
        Ok(chord)
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", parts.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chord_order_independent() {
        let a = Chord::new([KeyIdentifier::key(42), KeyIdentifier::key(30)]);
        let b = Chord::new([KeyIdentifier::key(30), KeyIdentifier::key(42)]);
        assert_eq!(a, b);

        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(a, "value");
        assert_eq!(map.get(&b), Some(&"value"));
    }

    #[test]
    fn test_chord_dedup() {
        let chord = Chord::new([KeyIdentifier::key(30), KeyIdentifier::key(30)]);
        assert_eq!(chord.len(), 1);
    }

    #[test]
    fn test_parse_two_field_descriptor() {
        let chord: Chord = "1,30".parse().unwrap();
        assert_eq!(chord.keys(), &[KeyIdentifier::key(30)]);
    }

    #[test]
    fn test_parse_combination_with_legacy_values() {
        let chord: Chord = "1,42,1+1,30,1".parse().unwrap();
        assert_eq!(chord.len(), 2);
        assert!(chord.contains(KeyIdentifier::key(30)));
        assert!(chord.contains(KeyIdentifier::key(42)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Chord>().is_err());
        assert!("30".parse::<Chord>().is_err());
        assert!("1,x".parse::<Chord>().is_err());
        assert!("9,30".parse::<Chord>().is_err());
        assert!("1,30,1,1".parse::<Chord>().is_err());
    }

    #[test]
    fn test_display_is_canonical() {
        let chord: Chord = "1,42+1,30".parse().unwrap();
        assert_eq!(chord.to_string(), "1,30+1,42");
    }

    #[test]
    fn test_subset() {
        let small: Chord = "1,29".parse().unwrap();
        let big: Chord = "1,29+1,30".parse().unwrap();
        assert!(small.is_strict_subset_of(&big));
        assert!(!big.is_strict_subset_of(&small));
        assert!(big.is_subset_of(&big));
        assert!(!big.is_strict_subset_of(&big));
    }
}
