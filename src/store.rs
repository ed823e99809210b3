//! Session-local message registry
//!
//! Entries are keyed by UID and never overwritten: the first envelope
//! seen for a UID wins. Bodies are cached separately and handed out
//! once.

use std::collections::{HashMap, HashSet};

use crate::envelope::MailEntry;

#[derive(Debug, Default)]
pub struct MailStore {
    entries: Vec<MailEntry>,
    uids: HashSet<u32>,
    bodies: HashMap<u32, Vec<u8>>,
}

impl MailStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry unless its UID is already known.
    ///
    /// Returns `false` if the entry was dropped as a duplicate.
    pub fn insert(&mut self, entry: MailEntry) -> bool {
        if !self.uids.insert(entry.uid) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[MailEntry] {
        &self.entries
    }

    /// The `count` newest entries after skipping the `skip` newest.
    ///
    /// Only the needed prefix is fully ordered. Entries without a
    /// parsable date sort after all dated ones.
    #[must_use]
    pub fn latest(&self, count: usize, skip: usize) -> Vec<MailEntry> {
        let wanted = count.saturating_add(skip).min(self.entries.len());
        if count == 0 || wanted <= skip {
            return Vec::new();
        }

        let newest_first = |a: &&MailEntry, b: &&MailEntry| b.date().cmp(&a.date());
        let mut order: Vec<&MailEntry> = self.entries.iter().collect();
        if wanted < order.len() {
            order.select_nth_unstable_by(wanted - 1, newest_first);
            order.truncate(wanted);
        }
        order.sort_by(newest_first);

        order
            .into_iter()
            .skip(skip)
            .take(count)
            .cloned()
            .collect()
    }

    /// Cache a body; a later fetch of the same UID replaces it.
    pub fn put_body(&mut self, uid: u32, body: Vec<u8>) {
        self.bodies.insert(uid, body);
    }

    /// Remove and return the cached body for `uid`.
    pub fn take_body(&mut self, uid: u32) -> Option<Vec<u8>> {
        self.bodies.remove(&uid)
    }
}
