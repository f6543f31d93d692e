//! Type-safe identifiers for mediators and tabs.
//!
//! A [`Prefix`] names one mediator (one browser instance) and is assigned at
//! discovery time. A [`TabId`] is fully qualified: `prefix.windowID.tabID`,
//! e.g. `a.1.42`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

// ============================================================================
// Prefix
// ============================================================================

/// Single-letter mediator address, displayed with its trailing dot (`a.`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix(char);

impl Prefix {
    /// Creates a prefix from an ASCII letter.
    ///
    /// Returns `None` for anything that is not `a-z`/`A-Z`.
    #[inline]
    #[must_use]
    pub fn new(letter: char) -> Option<Self> {
        letter
            .is_ascii_alphabetic()
            .then(|| Self(letter.to_ascii_lowercase()))
    }

    /// Returns the prefix for the `index`-th discovered mediator (`a.`, `b.`, ...).
    #[inline]
    #[must_use]
    pub fn nth(index: usize) -> Option<Self> {
        u8::try_from(index)
            .ok()
            .filter(|i| *i < 26)
            .map(|i| Self(char::from(b'a' + i)))
    }

    /// Returns the letter without the dot.
    #[inline]
    #[must_use]
    pub const fn letter(self) -> char {
        self.0
    }

    /// Returns the next letter in the alphabet, wrapping from `z.` to `a.`.
    #[inline]
    #[must_use]
    pub fn next_wrapping(self) -> Self {
        let offset = (self.0 as u8 - b'a' + 1) % 26;
        Self(char::from(b'a' + offset))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.", self.0)
    }
}

impl FromStr for Prefix {
    type Err = Error;

    /// Accepts both `a` and `a.`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => Self::new(letter)
                .ok_or_else(|| Error::invalid_argument(format!("invalid prefix: {s:?}"))),
            _ => Err(Error::invalid_argument(format!("invalid prefix: {s:?}"))),
        }
    }
}

// ============================================================================
// TabId
// ============================================================================

/// Fully-qualified tab identifier: `prefix.windowID.tabID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId {
    /// Mediator the tab lives behind.
    pub prefix: Prefix,
    /// Browser window ID.
    pub window_id: u64,
    /// Browser tab ID.
    pub tab_id: u64,
}

impl TabId {
    /// Creates a new tab ID.
    #[inline]
    #[must_use]
    pub const fn new(prefix: Prefix, window_id: u64, tab_id: u64) -> Self {
        Self {
            prefix,
            window_id,
            tab_id,
        }
    }

    /// Returns the same tab addressed through a different mediator prefix.
    #[inline]
    #[must_use]
    pub const fn with_prefix(self, prefix: Prefix) -> Self {
        Self { prefix, ..self }
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", self.prefix, self.window_id, self.tab_id)
    }
}

impl FromStr for TabId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_argument(format!("invalid tab id: {s:?}"));

        let mut parts = s.split('.');
        let (Some(prefix), Some(window), Some(tab), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let prefix: Prefix = prefix.parse().map_err(|_| invalid())?;
        let window_id = window.parse().map_err(|_| invalid())?;
        let tab_id = tab.parse().map_err(|_| invalid())?;

        Ok(Self::new(prefix, window_id, tab_id))
    }
}

impl Serialize for TabId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TabId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_parse_and_display() {
        let prefix: Prefix = "b.".parse().expect("valid prefix");
        assert_eq!(prefix.letter(), 'b');
        assert_eq!(prefix.to_string(), "b.");
        assert_eq!("C".parse::<Prefix>().expect("valid").to_string(), "c.");
        assert!("ab.".parse::<Prefix>().is_err());
        assert!("1.".parse::<Prefix>().is_err());
        assert!("".parse::<Prefix>().is_err());
    }

    #[test]
    fn test_prefix_nth() {
        assert_eq!(Prefix::nth(0).map(|p| p.to_string()), Some("a.".into()));
        assert_eq!(Prefix::nth(2).map(|p| p.to_string()), Some("c.".into()));
        assert!(Prefix::nth(26).is_none());
    }

    #[test]
    fn test_prefix_next_wrapping() {
        let z = Prefix::new('z').expect("letter");
        assert_eq!(z.next_wrapping().letter(), 'a');
        let f = Prefix::new('f').expect("letter");
        assert_eq!(f.next_wrapping().letter(), 'g');
    }

    #[test]
    fn test_tab_id_roundtrip() {
        let id: TabId = "b.5.10".parse().expect("valid tab id");
        assert_eq!(id.prefix.letter(), 'b');
        assert_eq!(id.window_id, 5);
        assert_eq!(id.tab_id, 10);
        assert_eq!(id.to_string(), "b.5.10");
    }

    #[test]
    fn test_tab_id_rejects_malformed() {
        for raw in ["5.10", "b.5", "b.5.10.1", "b.x.10", "bb.5.10", ""] {
            assert!(raw.parse::<TabId>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_tab_id_serde_as_string() {
        let id: TabId = "a.1.2".parse().expect("valid");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"a.1.2\"");

        let back: TabId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
        assert!(serde_json::from_str::<TabId>("\"nope\"").is_err());
    }
}
