//! Session-bus enumeration.
//!
//! Mediators may register a well-known name such as `org.tabctl.firefox` or
//! `org.tabctl.chromium.p4242`. Names are mapped to a browser family, and
//! the family picks the prefix letter:
//!
//! | Family | Browsers | Prefix |
//! |--------|----------|--------|
//! | Firefox | firefox, librewolf, waterfox, floorp, zen | `f.` |
//! | Chromium | chrome, chromium, brave, vivaldi, edge, opera | `c.` |
//! | Unknown | anything else | `u.` |
//!
//! When one family has several instances, the lowest PID keeps the family
//! letter and the others take the next free letters after it.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::client::bus::{gdbus_call, parse_string_list};
use crate::error::Result;
use crate::identifiers::Prefix;

use super::MediatorEndpoint;

// ============================================================================
// BrowserFamily
// ============================================================================

/// Browser engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BrowserFamily {
    /// Chromium-based browsers.
    Chromium,
    /// Firefox-based browsers.
    Firefox,
    /// Anything unrecognized.
    Unknown,
}

impl BrowserFamily {
    /// Classifies a browser name (case-insensitive).
    #[must_use]
    pub fn of(browser: &str) -> Self {
        match browser.to_ascii_lowercase().as_str() {
            "firefox" | "librewolf" | "waterfox" | "floorp" | "zen" => Self::Firefox,
            "chrome" | "chromium" | "brave" | "vivaldi" | "edge" | "msedge" | "opera" => {
                Self::Chromium
            }
            _ => Self::Unknown,
        }
    }

    /// Family prefix letter.
    #[inline]
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Firefox => 'f',
            Self::Chromium => 'c',
            Self::Unknown => 'u',
        }
    }
}

// ============================================================================
// BusNameSource
// ============================================================================

/// Lists names currently owned on the session bus.
#[async_trait]
pub trait BusNameSource: Send + Sync {
    /// Returns every bus name.
    async fn list_names(&self) -> Result<Vec<String>>;
}

/// Lists names by calling `org.freedesktop.DBus.ListNames` through `gdbus`.
#[derive(Debug, Clone)]
pub struct GdbusNameSource {
    timeout: Duration,
}

impl GdbusNameSource {
    /// Creates a source with the given call timeout.
    #[inline]
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BusNameSource for GdbusNameSource {
    async fn list_names(&self) -> Result<Vec<String>> {
        let output = gdbus_call(
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus.ListNames",
            &[],
            self.timeout,
        )
        .await?;
        let names = parse_string_list(&output);
        debug!(count = names.len(), "Listed bus names");
        Ok(names)
    }
}

// ============================================================================
// Prefix Assignment
// ============================================================================

struct BusCandidate {
    service: String,
    browser: String,
    family: BrowserFamily,
    pid: Option<u32>,
}

/// Maps matching bus names to endpoints with collision-free prefixes.
///
/// Letters already in `taken` are skipped; assigned letters are added.
/// Names not matching `pattern` are ignored.
pub fn assign_bus_prefixes(
    names: &[String],
    pattern: &Regex,
    taken: &mut FxHashSet<char>,
) -> Vec<MediatorEndpoint> {
    let mut candidates: Vec<BusCandidate> = names
        .iter()
        .filter_map(|name| {
            let captures = pattern.captures(name)?;
            let browser = captures.name("browser")?.as_str().to_ascii_lowercase();
            let pid = captures.name("pid").and_then(|m| m.as_str().parse().ok());
            Some(BusCandidate {
                service: name.clone(),
                family: BrowserFamily::of(&browser),
                browser,
                pid,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        (a.family, a.pid.unwrap_or(0), &a.service).cmp(&(b.family, b.pid.unwrap_or(0), &b.service))
    });
    candidates.dedup_by(|a, b| a.service == b.service);

    // Each family's first instance claims its own letter before any overflow.
    let mut assigned: Vec<Option<Prefix>> = vec![None; candidates.len()];
    let mut seen_families = FxHashSet::default();
    for (slot, candidate) in assigned.iter_mut().zip(&candidates) {
        let letter = candidate.family.letter();
        if seen_families.insert(candidate.family) && taken.insert(letter) {
            *slot = Prefix::new(letter);
        }
    }

    for (slot, candidate) in assigned.iter_mut().zip(&candidates) {
        if slot.is_some() {
            continue;
        }
        *slot = next_free(candidate.family.letter(), taken);
        if slot.is_none() {
            warn!(service = %candidate.service, "Out of prefixes, skipping mediator");
        }
    }

    candidates
        .into_iter()
        .zip(assigned)
        .filter_map(|(candidate, prefix)| {
            Some(MediatorEndpoint::bus(
                prefix?,
                candidate.service,
                candidate.browser,
            ))
        })
        .collect()
}

fn next_free(start: char, taken: &mut FxHashSet<char>) -> Option<Prefix> {
    let mut prefix = Prefix::new(start)?;
    for _ in 0..26 {
        if taken.insert(prefix.letter()) {
            return Some(prefix);
        }
        prefix = prefix.next_wrapping();
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::discovery::{DEFAULT_BUS_NAME_PATTERN, EndpointAddress};

    fn pattern() -> Regex {
        Regex::new(DEFAULT_BUS_NAME_PATTERN).expect("regex")
    }

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    fn prefixes(endpoints: &[MediatorEndpoint]) -> Vec<(String, String)> {
        endpoints
            .iter()
            .map(|e| {
                let EndpointAddress::Bus { service } = &e.address else {
                    panic!("bus endpoint expected");
                };
                (e.prefix.to_string(), service.clone())
            })
            .collect()
    }

    #[test]
    fn test_family_table() {
        assert_eq!(BrowserFamily::of("Firefox"), BrowserFamily::Firefox);
        assert_eq!(BrowserFamily::of("brave"), BrowserFamily::Chromium);
        assert_eq!(BrowserFamily::of("netsurf"), BrowserFamily::Unknown);
    }

    #[test]
    fn test_family_prefixes() {
        let mut taken = FxHashSet::default();
        let endpoints = assign_bus_prefixes(
            &names(&[
                "org.freedesktop.DBus",
                "org.tabctl.firefox",
                ":1.42",
                "org.tabctl.chromium",
                "org.tabctl.netsurf",
            ]),
            &pattern(),
            &mut taken,
        );
        assert_eq!(
            prefixes(&endpoints),
            vec![
                ("c.".to_string(), "org.tabctl.chromium".to_string()),
                ("f.".to_string(), "org.tabctl.firefox".to_string()),
                ("u.".to_string(), "org.tabctl.netsurf".to_string()),
            ]
        );
        assert_eq!(endpoints[1].browser.as_deref(), Some("firefox"));
    }

    #[test]
    fn test_same_family_collision_ordered_by_pid() {
        let mut taken = FxHashSet::default();
        let endpoints = assign_bus_prefixes(
            &names(&[
                "org.tabctl.firefox.p900",
                "org.tabctl.librewolf.p120",
                "org.tabctl.chrome",
            ]),
            &pattern(),
            &mut taken,
        );
        assert_eq!(
            prefixes(&endpoints),
            vec![
                ("c.".to_string(), "org.tabctl.chrome".to_string()),
                ("f.".to_string(), "org.tabctl.librewolf.p120".to_string()),
                ("g.".to_string(), "org.tabctl.firefox.p900".to_string()),
            ]
        );
    }

    #[test]
    fn test_taken_letters_are_skipped() {
        let mut taken: FxHashSet<char> = ['a', 'b', 'c'].into_iter().collect();
        let endpoints =
            assign_bus_prefixes(&names(&["org.tabctl.chromium"]), &pattern(), &mut taken);
        assert_eq!(endpoints[0].prefix.to_string(), "d.");
        assert!(taken.contains(&'d'));
    }

    struct FixedNames(Vec<String>);

    #[async_trait]
    impl BusNameSource for FixedNames {
        async fn list_names(&self) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_enumerate_through_source() {
        let discovery = crate::discovery::Discovery::new(crate::discovery::DiscoveryConfig::new())
            .with_bus(std::sync::Arc::new(FixedNames(names(&["org.tabctl.firefox"]))));
        let endpoints = discovery.enumerate_bus().await.expect("enumerate");
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].prefix.to_string(), "f.");
    }
}
