//! Scheduling
//!
//! Notified watchers are not re-run on the spot. They are queued, and the
//! queue is flushed once per tick, so any number of synchronous mutations
//! costs each affected watcher a single run.
//!
//! - [`queue`](self::queue) buffers and flushes watchers.
//! - [`tick`](self::tick) is the deferred callback queue the flush runs on.

mod queue;
mod tick;

pub(crate) use queue::{queue_watcher, QueueState};
pub(crate) use tick::TickQueue;
pub use tick::{NextTick, Task, TickDriver};
