//! Watcher Queue
//!
//! Watchers that were notified are buffered here and run together in one
//! flush on the next tick.
//!
//! # Algorithm
//!
//! 1. `queue_watcher` adds a watcher once per flush (duplicates are ignored)
//!    and schedules a flush if none is pending.
//!
//! 2. The flush sorts the queue by watcher id so that watchers created
//!    earlier run first.
//!
//! 3. Watchers queued while the flush is running are inserted at their id
//!    position among the watchers that have not run yet, or right after
//!    the current one if their id is smaller.
//!
//! 4. A watcher scheduled more than `max_update_count` times in one flush
//!    (by itself or through a cycle of watchers) aborts the flush with
//!    [`ReactiveError::InfiniteUpdateLoop`].

use std::collections::{HashMap, HashSet};

use crate::error::ReactiveError;
use crate::reactive::{Runtime, WatcherId};

/// Pending watcher queue and flush flags.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    queue: Vec<WatcherId>,
    has: HashSet<WatcherId>,
    /// Runs per watcher in the current flush.
    runs: HashMap<WatcherId, usize>,
    /// A flush has been scheduled and not finished yet.
    waiting: bool,
    flushing: bool,
    /// Position of the next watcher to run.
    index: usize,
}

impl QueueState {
    fn reset(&mut self) {
        self.queue.clear();
        self.has.clear();
        self.runs.clear();
        self.waiting = false;
        self.flushing = false;
        self.index = 0;
    }
}

/// Queue a watcher for the next flush.
pub(crate) fn queue_watcher(rt: &Runtime, id: WatcherId) {
    let flush_inline = {
        let mut state = rt.inner().queue.borrow_mut();
        if !state.has.insert(id) {
            return;
        }
        if state.flushing {
            let mut pos = state.queue.len();
            while pos > state.index && state.queue[pos - 1] > id {
                pos -= 1;
            }
            state.queue.insert(pos, id);
        } else {
            state.queue.push(id);
        }
        if state.waiting {
            return;
        }
        state.waiting = true;
        !rt.config().async_flush
    };

    if flush_inline {
        if let Err(error) = flush_scheduler_queue(rt) {
            rt.report_fatal(error);
        }
        return;
    }

    let weak = rt.downgrade();
    rt.next_tick(move || {
        if let Some(rt) = weak.upgrade() {
            if let Err(error) = flush_scheduler_queue(&rt) {
                rt.report_fatal(error);
            }
        }
        Ok(())
    });
}

/// Run every queued watcher in ascending id order.
///
/// A failing non-user watcher does not stop the flush; the first such error
/// is returned once the queue is drained. An update loop stops the flush
/// immediately and takes precedence.
pub(crate) fn flush_scheduler_queue(rt: &Runtime) -> Result<(), ReactiveError> {
    let flush = rt.inner().flushes.get() + 1;
    rt.inner().flushes.set(flush);

    let queued = {
        let mut state = rt.inner().queue.borrow_mut();
        state.flushing = true;
        state.index = 0;
        state.queue.sort_unstable();
        state.queue.len()
    };
    tracing::debug!(flush, queued, "flush started");

    let limit = rt.config().max_update_count;
    let mut ran = 0usize;
    let mut first_error = None;
    let mut update_loop = None;

    loop {
        let (id, over_limit) = {
            let mut guard = rt.inner().queue.borrow_mut();
            let state = &mut *guard;
            let Some(&id) = state.queue.get(state.index) else {
                break;
            };
            state.has.remove(&id);
            state.index += 1;
            let runs = state.runs.entry(id).or_insert(0);
            *runs += 1;
            (id, *runs > limit)
        };

        let Some(watcher) = rt.watcher_inner(id) else {
            continue;
        };
        if over_limit {
            update_loop = Some(ReactiveError::InfiniteUpdateLoop {
                id,
                expression: watcher.expression().to_string(),
                limit,
            });
            break;
        }
        if let Some(before) = watcher.before_hook() {
            before();
        }
        ran += 1;
        if let Err(error) = watcher.run(rt) {
            tracing::error!(%id, error = %error, "watcher failed during flush");
            first_error.get_or_insert(error);
        }
    }

    rt.inner().queue.borrow_mut().reset();
    tracing::debug!(flush, ran, "flush finished");

    match update_loop.or(first_error) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

impl Runtime {
    /// Watchers waiting for the next flush, in run order.
    pub fn queued_watchers(&self) -> Vec<WatcherId> {
        let state = self.inner().queue.borrow();
        state.queue[state.index.min(state.queue.len())..].to_vec()
    }

    /// Whether a flush is currently running.
    pub fn is_flushing(&self) -> bool {
        self.inner().queue.borrow().flushing
    }
}
