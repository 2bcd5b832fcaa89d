//! Identifier types for the reactive graph.
//!
//! Subjects and watchers live in arenas owned by the runtime and refer to
//! each other only through these ids. Ids are handed out by the runtime in
//! creation order, which the scheduler relies on for ordering.

use std::cell::Cell;
use std::fmt;

/// Unique identifier for a dependency subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(u64);

impl DepId {
    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DepId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep #{}", self.0)
    }
}

/// Unique identifier for a watcher.
///
/// Ordering follows creation order: a watcher created earlier always has a
/// smaller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for WatcherId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher #{}", self.0)
    }
}

/// Monotonic id source, one per runtime.
#[derive(Debug, Default)]
pub(crate) struct IdCounter(Cell<u64>);

impl IdCounter {
    pub(crate) fn next(&self) -> u64 {
        let id = self.0.get();
        self.0.set(id + 1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_monotonic() {
        let counter = IdCounter::default();
        let ids: Vec<u64> = (0..4).map(|_| counter.next()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn watcher_ids_order_by_creation() {
        let counter = IdCounter::default();
        let first = WatcherId::from(counter.next());
        let second = WatcherId::from(counter.next());
        assert!(first < second);
        assert_eq!(second.to_string(), "watcher #1");
    }
}
