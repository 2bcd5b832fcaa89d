//! Dependency Subject
//!
//! A `Dep` is a publish point: watchers that read the piece of state it
//! guards become its subscribers, and `notify` asks them all to update.
//!
//! The subscriber list itself lives in the runtime's subject arena, keyed
//! by [`DepId`]. A `Dep` handle owns that arena entry and releases it when
//! the last clone is dropped, so a field that goes away takes its
//! subscriber list with it.

use std::fmt;
use std::rc::Rc;

use super::id::DepId;
use super::runtime::{Runtime, WeakRuntime};
use super::WatcherId;

/// A dependency subject.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

struct DepInner {
    id: DepId,
    runtime: WeakRuntime,
}

impl Dep {
    /// Create a new subject in `runtime`'s arena.
    pub fn new(runtime: &Runtime) -> Self {
        Self(Rc::new(DepInner {
            id: runtime.register_dep(),
            runtime: runtime.downgrade(),
        }))
    }

    /// The subject's id. Ids increase in creation order.
    pub fn id(&self) -> DepId {
        self.0.id
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        self.0.runtime.upgrade()
    }

    /// Register the currently evaluating watcher, if any, as a subscriber.
    pub fn depend(&self) {
        if let Some(rt) = self.runtime() {
            rt.depend(self.0.id);
        }
    }

    /// Ask every subscriber to update.
    pub fn notify(&self) {
        if let Some(rt) = self.runtime() {
            rt.notify(self.0.id);
        }
    }

    /// Subscribers in subscription order.
    pub fn subscribers(&self) -> Vec<WatcherId> {
        self.runtime()
            .map(|rt| rt.subscribers(self.0.id))
            .unwrap_or_default()
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

impl Drop for DepInner {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.release_dep(self.id);
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.0.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
