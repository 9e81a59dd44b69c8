//! Local projection of the pages known to exist server-side.
//!
//! The set is written only by the client task; callers see it through
//! immutable snapshots.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

/// Identity and metadata of a page. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub name: String,
    /// Milliseconds since the epoch, as reported by the server.
    #[serde(default)]
    pub last_modified: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perm: Option<Permission>,
}

impl PageMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_modified: 0,
            perm: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: u64) -> Self {
        self.last_modified = last_modified;
        self
    }
}

/// Client-observed lifecycle of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Unknown,
    Listed,
    Open,
    Closed,
}

/// Pages unique by name, plus open/closed session bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSet {
    pages: HashMap<String, PageMeta>,
    open: HashSet<String>,
    closed: HashSet<String>,
}

impl PageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole membership with a fresh listing.
    pub fn replace_all(&mut self, pages: impl IntoIterator<Item = PageMeta>) {
        self.pages = pages.into_iter().map(|p| (p.name.clone(), p)).collect();
        let pages = &self.pages;
        self.closed.retain(|name| pages.contains_key(name));
    }

    /// Insert or replace by name.
    pub fn insert(&mut self, meta: PageMeta) {
        self.pages.insert(meta.name.clone(), meta);
    }

    /// Remove the entry with this name. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.closed.remove(name);
        self.pages.remove(name).is_some()
    }

    pub fn mark_open(&mut self, name: &str) {
        self.closed.remove(name);
        self.open.insert(name.to_string());
    }

    pub fn mark_closed(&mut self, name: &str) {
        if self.open.remove(name) {
            self.closed.insert(name.to_string());
        }
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.contains(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pages.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PageMeta> {
        self.pages.get(name)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn state(&self, name: &str) -> PageState {
        if self.open.contains(name) {
            PageState::Open
        } else if !self.pages.contains_key(name) {
            PageState::Unknown
        } else if self.closed.contains(name) {
            PageState::Closed
        } else {
            PageState::Listed
        }
    }

    /// Point-in-time copy of the membership, sorted by name.
    pub fn snapshot(&self) -> Vec<PageMeta> {
        let mut pages: Vec<PageMeta> = self.pages.values().cloned().collect();
        pages.sort_by(|a, b| a.name.cmp(&b.name));
        pages
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|p| p.name).collect()
    }
}
