//! Async Tick
//!
//! A FIFO of deferred callbacks, drained in one batch per tick. The
//! watcher queue uses it to defer flushes, and callers use it to run code
//! after the current batch of mutations has been applied.
//!
//! Draining takes the whole queue before running anything, so callbacks
//! scheduled while a tick runs land in the next tick. A failing callback is
//! reported and the rest of the batch still runs.
//!
//! # Drivers
//!
//! - [`TickDriver::Manual`]: nothing is scheduled; the host drains the
//!   queue with [`Runtime::run_until_idle`].
//! - [`TickDriver::Tokio`]: the drain is spawned with
//!   `tokio::task::spawn_local`, so it runs on the next poll of the
//!   current `LocalSet`. Mutations must happen inside a `LocalSet`.
//! - [`TickDriver::Custom`]: the drain task is handed to a host-provided
//!   spawn function.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{EvalResult, ReactiveError};
use crate::reactive::Runtime;

/// A deferred unit of work handed to a custom driver.
pub type Task = Box<dyn FnOnce()>;

/// How a pending tick gets executed.
#[derive(Clone, Default)]
pub enum TickDriver {
    /// The host calls [`Runtime::run_until_idle`].
    #[default]
    Manual,
    /// Spawn the drain on the current `tokio::task::LocalSet`.
    ///
    /// # Panics
    ///
    /// The first mutation or `next_tick` call that schedules a tick panics
    /// when it is made outside a `LocalSet`, because
    /// `tokio::task::spawn_local` requires one.
    Tokio,
    /// Hand the drain to a host spawn function.
    Custom(Rc<dyn Fn(Task)>),
}

impl TickDriver {
    pub fn custom(spawn: impl Fn(Task) + 'static) -> Self {
        TickDriver::Custom(Rc::new(spawn))
    }
}

impl fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickDriver::Manual => f.write_str("Manual"),
            TickDriver::Tokio => f.write_str("Tokio"),
            TickDriver::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub(crate) enum TickCallback {
    Call(Box<dyn FnOnce() -> EvalResult<()>>),
    Resolve(oneshot::Sender<()>),
}

#[derive(Default)]
pub(crate) struct TickQueue {
    callbacks: RefCell<Vec<TickCallback>>,
    pending: Cell<bool>,
}

/// Future returned by [`Runtime::next_tick_async`]. Resolves once the tick
/// it was queued in has been drained.
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    rx: oneshot::Receiver<()>,
}

impl Future for NextTick {
    type Output = Result<(), ReactiveError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ReactiveError::RuntimeDropped))
    }
}

impl fmt::Debug for NextTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextTick").finish_non_exhaustive()
    }
}

impl Runtime {
    /// Run `callback` after the current batch of mutations.
    ///
    /// An error returned by the callback goes to the error handler.
    pub fn next_tick(&self, callback: impl FnOnce() -> EvalResult<()> + 'static) {
        self.push_tick(TickCallback::Call(Box::new(callback)));
    }

    /// A future that resolves after the next tick has been drained.
    pub fn next_tick_async(&self) -> NextTick {
        let (tx, rx) = oneshot::channel();
        self.push_tick(TickCallback::Resolve(tx));
        NextTick { rx }
    }

    fn push_tick(&self, callback: TickCallback) {
        let ticks = &self.inner().ticks;
        ticks.callbacks.borrow_mut().push(callback);
        if ticks.pending.replace(true) {
            return;
        }

        match &self.config().driver {
            TickDriver::Manual => {}
            TickDriver::Tokio => {
                let weak = self.downgrade();
                tokio::task::spawn_local(async move {
                    if let Some(rt) = weak.upgrade() {
                        rt.flush_callbacks();
                    }
                });
            }
            TickDriver::Custom(spawn) => {
                let weak = self.downgrade();
                spawn(Box::new(move || {
                    if let Some(rt) = weak.upgrade() {
                        rt.flush_callbacks();
                    }
                }));
            }
        }
        tracing::debug!(driver = ?self.config().driver, "tick scheduled");
    }

    /// Drain one tick: run every callback queued so far, in order.
    pub fn flush_callbacks(&self) {
        let ticks = &self.inner().ticks;
        ticks.pending.set(false);
        let callbacks = std::mem::take(&mut *ticks.callbacks.borrow_mut());
        for callback in callbacks {
            match callback {
                TickCallback::Call(f) => {
                    if let Err(source) = f() {
                        self.handle_error(ReactiveError::NextTick { source });
                    }
                }
                TickCallback::Resolve(tx) => {
                    // The receiver may have been dropped; nothing to resolve then.
                    let _ = tx.send(());
                }
            }
        }
    }

    /// Whether a tick is waiting to be drained.
    pub fn has_pending_tick(&self) -> bool {
        self.inner().ticks.pending.get()
    }

    /// Drain ticks until none is pending, then return the first fatal error
    /// raised meanwhile (such as an update loop).
    pub fn run_until_idle(&self) -> Result<(), ReactiveError> {
        while self.has_pending_tick() {
            self.flush_callbacks();
        }
        match self.take_fatal() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Wait for the pending tick to be drained.
    ///
    /// With the manual driver this drains inline. Otherwise it waits for
    /// the driver to run the tick.
    pub async fn tick(&self) -> Result<(), ReactiveError> {
        let manual = matches!(self.config().driver, TickDriver::Manual);
        if manual {
            return self.run_until_idle();
        }
        if self.has_pending_tick() {
            self.next_tick_async().await?;
        }
        match self.take_fatal() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
