//! # Streamer Set Tracker
//!
//! Diffs the set of external streaming users between cycles. Departures
//! carry only the user ID; the session is already gone by the time it is
//! noticed.

use std::collections::BTreeSet;

/// Users that joined or left since the previous cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamerSetDiff {
    pub joined: BTreeSet<String>,
    pub left: BTreeSet<String>,
}

impl StreamerSetDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// `joined = current − previous`, `left = previous − current`.
pub fn diff(current: &BTreeSet<String>, previous: &BTreeSet<String>) -> StreamerSetDiff {
    StreamerSetDiff {
        joined: current.difference(previous).cloned().collect(),
        left: previous.difference(current).cloned().collect(),
    }
}

/// Holds the previous cycle's user set.
#[derive(Debug, Clone, Default)]
pub struct StreamerTracker {
    previous: BTreeSet<String>,
}

impl StreamerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> &BTreeSet<String> {
        &self.previous
    }

    /// Diff `current` against the committed set without replacing it.
    pub fn diff(&self, current: &BTreeSet<String>) -> StreamerSetDiff {
        diff(current, &self.previous)
    }

    /// Replace the committed set. Called once per cycle, after all limits
    /// for the cycle have been applied.
    pub fn commit(&mut self, current: BTreeSet<String>) {
        self.previous = current;
    }
}
