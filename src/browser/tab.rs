//! Tab and window data.
//!
//! Listings travel as TSV lines, `id\ttitle\turl`, where `id` is either a
//! full `a.1.2` [`TabId`] or the browser-local `1.2` (window, tab).

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::{Prefix, TabId};

// ============================================================================
// Tab
// ============================================================================

/// One browser tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    /// Mediator the tab was listed by, when known.
    #[serde(skip)]
    pub prefix: Option<Prefix>,
    /// Browser-assigned tab ID.
    pub id: u64,
    /// Window the tab belongs to.
    pub window_id: u64,
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Page URL.
    #[serde(default)]
    pub url: String,
    /// Position within the window.
    #[serde(default)]
    pub index: u64,
    /// Active in its window.
    #[serde(default)]
    pub active: bool,
    /// Pinned.
    #[serde(default)]
    pub pinned: bool,
    /// Producing sound.
    #[serde(default)]
    pub audible: bool,
    /// Muted.
    #[serde(default)]
    pub muted: bool,
}

impl Tab {
    /// Parses one listing line.
    ///
    /// Only the ID, title and URL are carried by the line format; the flags
    /// stay unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the ID field is neither `a.1.2` nor `1.2`.
    pub fn from_line(line: &str) -> Result<Self> {
        let mut fields = line.splitn(3, '\t');
        let id = fields.next().unwrap_or_default().trim();
        let title = fields.next().unwrap_or_default().to_string();
        let url = fields.next().unwrap_or_default().trim_end().to_string();

        let (prefix, window_id, tab_id) = match id.parse::<TabId>() {
            Ok(full) => (Some(full.prefix), full.window_id, full.tab_id),
            Err(_) => {
                let (window, tab) = id
                    .split_once('.')
                    .ok_or_else(|| Error::protocol(format!("bad tab line: {line:?}")))?;
                let window_id = window
                    .parse()
                    .map_err(|_| Error::protocol(format!("bad window id in {line:?}")))?;
                let tab_id = tab
                    .parse()
                    .map_err(|_| Error::protocol(format!("bad tab id in {line:?}")))?;
                (None, window_id, tab_id)
            }
        };

        Ok(Self {
            prefix,
            id: tab_id,
            window_id,
            title,
            url,
            ..Self::default()
        })
    }

    /// Fully-qualified ID, if the tab's mediator is known.
    #[inline]
    #[must_use]
    pub fn tab_id(&self) -> Option<TabId> {
        self.prefix.map(|p| TabId::new(p, self.window_id, self.id))
    }

    /// Formats the tab as a listing line.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self.tab_id() {
            Some(id) => format!("{id}\t{}\t{}", self.title, self.url),
            None => format!("{}.{}\t{}\t{}", self.window_id, self.id, self.title, self.url),
        }
    }
}

// ============================================================================
// Window
// ============================================================================

/// Tabs of one browser window, in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Mediator the window was listed by, when known.
    pub prefix: Option<Prefix>,
    /// Browser-assigned window ID.
    pub id: u64,
    /// Tabs, ordered by index.
    pub tabs: Vec<Tab>,
}

impl Window {
    /// Number of tabs.
    #[inline]
    #[must_use]
    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }
}

/// Reconstructs windows from a flat tab list.
///
/// Windows keep first-appearance order; windows of different mediators stay
/// apart even when their IDs collide.
#[must_use]
pub fn group_by_window(tabs: impl IntoIterator<Item = Tab>) -> Vec<Window> {
    let mut windows: Vec<Window> = Vec::new();
    let mut slots: FxHashMap<(Option<Prefix>, u64), usize> = FxHashMap::default();

    for tab in tabs {
        let key = (tab.prefix, tab.window_id);
        let slot = *slots.entry(key).or_insert_with(|| {
            windows.push(Window {
                prefix: tab.prefix,
                id: tab.window_id,
                tabs: Vec::new(),
            });
            windows.len() - 1
        });
        windows[slot].tabs.push(tab);
    }

    for window in &mut windows {
        window.tabs.sort_by_key(|t| t.index);
    }
    windows
}

// ============================================================================
// Tests
// ============================================================================
