//! Computed Values
//!
//! A computed value is a lazy watcher: it caches the result of its getter
//! and only recomputes when read after one of its dependencies changed.
//!
//! # How Computed Values Work
//!
//! 1. Creation does not evaluate anything; the value starts dirty.
//!
//! 2. Reading a dirty computed value evaluates the getter, caches the
//!    result and clears the dirty flag.
//!
//! 3. When a dependency notifies, the computed value is only marked dirty.
//!    Nothing is recomputed until the next read.
//!
//! 4. When read inside another watcher's evaluation, the computed value
//!    forwards all of its own dependencies to that watcher, so the outer
//!    watcher is notified directly by the underlying subjects.

use std::fmt;

use crate::error::ReactiveError;
use crate::observer::Value;

use super::runtime::{Runtime, WeakRuntime};
use super::watcher::{Getter, WatchOptions, Watcher};
use super::WatcherId;

/// A cached derived value that recomputes only when dependencies change.
pub struct Computed {
    watcher: Watcher,
    runtime: WeakRuntime,
}

impl Computed {
    pub(crate) fn new(rt: &Runtime, getter: Getter) -> Self {
        let watcher = Watcher::create(rt, getter, None, WatchOptions::new().lazy(true));
        Self {
            watcher,
            runtime: rt.downgrade(),
        }
    }

    /// Get the current value, recomputing if dirty.
    ///
    /// Inside another watcher's evaluation this also makes that watcher
    /// depend on everything this value depends on.
    pub fn get(&self) -> Result<Value, ReactiveError> {
        if self.watcher.is_dirty() {
            self.watcher.evaluate()?;
        }
        let rt = self.runtime.upgrade().ok_or(ReactiveError::RuntimeDropped)?;
        if rt.is_tracking() {
            self.watcher.depend()?;
        }
        Ok(self.watcher.value())
    }

    /// The cached value, without recomputing or tracking.
    pub fn peek(&self) -> Value {
        self.watcher.value()
    }

    /// Whether a dependency changed since the last evaluation.
    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// Force a recomputation.
    pub fn evaluate(&self) -> Result<Value, ReactiveError> {
        self.watcher.evaluate()
    }

    pub fn id(&self) -> WatcherId {
        self.watcher.id()
    }

    /// The underlying lazy watcher.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.watcher.id())
            .field("dirty", &self.is_dirty())
            .field("value", &self.peek())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
