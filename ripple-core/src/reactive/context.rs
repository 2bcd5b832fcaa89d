//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating.
//! Subjects consult it on every read to decide whether to register a
//! dependency.
//!
//! # Implementation
//!
//! Each runtime owns one stack. Entering a watcher's evaluation pushes its
//! id; the returned guard pops it again, even if the computation panics.
//! An entry of `None` marks an untracked region: reads inside it register
//! nothing, even when an outer watcher is evaluating.
//!
//! The stack supports re-entrant evaluation (a watcher whose getter reads a
//! lazily computed value, which evaluates its own watcher).

use std::cell::RefCell;

use super::WatcherId;

/// The active-subscriber stack of one runtime.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    stack: RefCell<Vec<Option<WatcherId>>>,
}

impl ContextStack {
    /// The watcher that reads should currently register with, if any.
    pub(crate) fn current(&self) -> Option<WatcherId> {
        self.stack.borrow().last().copied().flatten()
    }

    /// Number of nested evaluations in progress.
    pub(crate) fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Enter a new context. `None` suspends tracking.
    pub(crate) fn enter(&self, target: Option<WatcherId>) -> ReactiveContext<'_> {
        self.stack.borrow_mut().push(target);
        ReactiveContext { stack: self, target }
    }
}

/// Guard that pops the context when dropped.
pub(crate) struct ReactiveContext<'a> {
    stack: &'a ContextStack,
    target: Option<WatcherId>,
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        let popped = self.stack.stack.borrow_mut().pop();

        // Contexts are strictly nested; a mismatch means a guard escaped.
        debug_assert_eq!(
            popped,
            Some(self.target),
            "ReactiveContext mismatch: expected {:?}, got {:?}",
            self.target,
            popped
        );
    }
}
