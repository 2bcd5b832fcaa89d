//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects subjects and
//! watchers. It owns every piece of mutable graph state:
//!
//! - the subject arena (`DepId` -> ordered subscriber set)
//! - the watcher arena (`WatcherId` -> watcher)
//! - the active-subscriber stack
//! - the watcher queue and the tick callback queue
//! - the observation toggle and the error handler
//!
//! # How It Works
//!
//! 1. When a watcher evaluates, it enters a reactive context.
//!
//! 2. Every subject read while the context is active calls back into the
//!    runtime, which records the edge in both directions (the watcher's
//!    pending dependency set and the subject's subscriber set).
//!
//! 3. When a subject notifies, the runtime snapshots its subscribers and
//!    asks each watcher to update: lazy watchers mark themselves dirty,
//!    sync watchers re-run inline, everything else is queued for the next
//!    flush.
//!
//! # Threading
//!
//! A runtime is single-threaded. Handles are `Rc` based and the runtime is
//! neither `Send` nor `Sync`. Independent runtimes never share state, so
//! several graphs can coexist on one thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::config::RuntimeConfig;
use crate::error::{EvalResult, ReactiveError};
use crate::observer::{self, Object, Observer, Value};
use crate::scheduler::{QueueState, TickQueue};

use super::computed::Computed;
use super::context::ContextStack;
use super::id::{DepId, IdCounter, WatcherId};
use super::signal::{SameValue, Signal};
use super::watcher::{parse_path, WatchOptions, Watcher, WatcherInner};

/// Handler invoked for errors on the recoverable channel.
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

/// Snapshot of a subscriber list taken before notifying.
pub(crate) type SubscriberSnapshot = SmallVec<[WatcherId; 8]>;

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    dep_ids: IdCounter,
    watcher_ids: IdCounter,
    subjects: RefCell<HashMap<DepId, IndexSet<WatcherId>>>,
    watchers: RefCell<HashMap<WatcherId, Rc<WatcherInner>>>,
    pub(crate) context: ContextStack,
    observing: Cell<bool>,
    pub(crate) queue: RefCell<QueueState>,
    pub(crate) ticks: TickQueue,
    error_handler: RefCell<Option<ErrorHandler>>,
    fatal: RefCell<Option<ReactiveError>>,
    pub(crate) flushes: Cell<u64>,
}

/// Handle to a reactive runtime.
///
/// Cloning the handle is cheap; all clones refer to the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// Non-owning handle to a runtime.
#[derive(Clone)]
pub struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    /// Upgrade to a strong handle if the runtime is still alive.
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakRuntime")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                dep_ids: IdCounter::default(),
                watcher_ids: IdCounter::default(),
                subjects: RefCell::new(HashMap::new()),
                watchers: RefCell::new(HashMap::new()),
                context: ContextStack::default(),
                observing: Cell::new(true),
                queue: RefCell::new(QueueState::default()),
                ticks: TickQueue::default(),
                error_handler: RefCell::new(None),
                fatal: RefCell::new(None),
                flushes: Cell::new(0),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    /// Get a weak handle to this runtime.
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The configuration this runtime was created with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Tracking context
    // ------------------------------------------------------------------

    /// The watcher currently collecting dependencies, if any.
    pub fn current_watcher(&self) -> Option<WatcherId> {
        self.inner.context.current()
    }

    /// Whether reads currently register dependencies.
    pub fn is_tracking(&self) -> bool {
        self.current_watcher().is_some()
    }

    /// Run `f` without collecting dependencies for the current watcher.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = self.inner.context.enter(None);
        f()
    }

    // ------------------------------------------------------------------
    // Observation toggle
    // ------------------------------------------------------------------

    /// Enable or disable conversion of new values. Returns the previous state.
    pub fn toggle_observing(&self, value: bool) -> bool {
        self.inner.observing.replace(value)
    }

    /// Whether new values are currently converted when observed.
    pub fn is_observing(&self) -> bool {
        self.inner.observing.get()
    }

    /// Run `f` with observation disabled, restoring the previous state after.
    pub fn without_observing<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.toggle_observing(false);
        let result = f();
        self.toggle_observing(previous);
        result
    }

    // ------------------------------------------------------------------
    // Error channels
    // ------------------------------------------------------------------

    /// Install the handler for recoverable errors.
    pub fn set_error_handler(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Remove the installed error handler; errors are logged instead.
    pub fn clear_error_handler(&self) {
        self.inner.error_handler.borrow_mut().take();
    }

    /// Report an error on the recoverable channel.
    ///
    /// The handler runs untracked so reads inside it never become
    /// dependencies of the watcher that failed.
    pub fn handle_error(&self, error: ReactiveError) {
        let handler = self.inner.error_handler.borrow().clone();
        match handler {
            Some(handler) => self.untracked(|| handler(&error)),
            None => tracing::error!(error = %error, "unhandled reactive error"),
        }
    }

    /// Record a fatal error. The first one is kept until taken.
    pub(crate) fn report_fatal(&self, error: ReactiveError) {
        tracing::error!(error = %error, "fatal reactive error");
        let mut fatal = self.inner.fatal.borrow_mut();
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    /// Take the pending fatal error, if any.
    pub fn take_fatal(&self) -> Option<ReactiveError> {
        self.inner.fatal.borrow_mut().take()
    }

    pub(crate) fn warn(&self, message: &str) {
        if !self.inner.config.silent {
            tracing::warn!("{message}");
        }
    }

    // ------------------------------------------------------------------
    // Subject arena
    // ------------------------------------------------------------------

    pub(crate) fn register_dep(&self) -> DepId {
        let id = DepId::from(self.inner.dep_ids.next());
        self.inner.subjects.borrow_mut().insert(id, IndexSet::new());
        id
    }

    pub(crate) fn release_dep(&self, id: DepId) {
        // A release can race with a notify snapshot; the entry is gone either way.
        if let Ok(mut subjects) = self.inner.subjects.try_borrow_mut() {
            subjects.remove(&id);
        }
    }

    pub(crate) fn subscribe(&self, dep: DepId, watcher: WatcherId) -> bool {
        let added = self
            .inner
            .subjects
            .borrow_mut()
            .get_mut(&dep)
            .map(|subs| subs.insert(watcher))
            .unwrap_or(false);
        if added {
            tracing::trace!(%dep, %watcher, "subscribed");
        }
        added
    }

    pub(crate) fn unsubscribe(&self, dep: DepId, watcher: WatcherId) {
        if let Some(subs) = self.inner.subjects.borrow_mut().get_mut(&dep) {
            if subs.shift_remove(&watcher) {
                tracing::trace!(%dep, %watcher, "unsubscribed");
            }
        }
    }

    /// Subscribers of a subject in subscription order.
    pub fn subscribers(&self, dep: DepId) -> Vec<WatcherId> {
        self.inner
            .subjects
            .borrow()
            .get(&dep)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live subjects.
    pub fn subject_count(&self) -> usize {
        self.inner.subjects.borrow().len()
    }

    /// Register the current watcher (if any) as depending on `dep`.
    pub(crate) fn depend(&self, dep: DepId) {
        let Some(current) = self.current_watcher() else {
            return;
        };
        if let Some(watcher) = self.watcher_inner(current) {
            watcher.add_dep(self, dep);
        }
    }

    /// Ask every subscriber of `dep` to update.
    pub(crate) fn notify(&self, dep: DepId) {
        let mut subs: SubscriberSnapshot = match self.inner.subjects.borrow().get(&dep) {
            Some(subs) => subs.iter().copied().collect(),
            None => return,
        };
        if !self.inner.config.async_flush {
            // The scheduler does not sort when flushing inline.
            subs.sort_unstable();
        }
        for id in subs {
            let Some(watcher) = self.watcher_inner(id) else {
                continue;
            };
            if let Err(error) = watcher.update(self) {
                // The mutation site has no caller to return this to.
                self.handle_error(error);
            }
        }
    }

    // ------------------------------------------------------------------
    // Watcher arena
    // ------------------------------------------------------------------

    pub(crate) fn next_watcher_id(&self) -> WatcherId {
        WatcherId::from(self.inner.watcher_ids.next())
    }

    pub(crate) fn insert_watcher(&self, watcher: Rc<WatcherInner>) {
        self.inner.watchers.borrow_mut().insert(watcher.id(), watcher);
    }

    pub(crate) fn remove_watcher(&self, id: WatcherId) {
        self.inner.watchers.borrow_mut().remove(&id);
    }

    pub(crate) fn watcher_inner(&self, id: WatcherId) -> Option<Rc<WatcherInner>> {
        self.inner.watchers.borrow().get(&id).cloned()
    }

    /// Number of live (not torn down) watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().len()
    }

    /// Number of scheduler flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.get()
    }

    // ------------------------------------------------------------------
    // Observation entry points
    // ------------------------------------------------------------------

    /// Make `value` observable. Returns the existing marker for values that
    /// are already observed, and `None` for values that cannot be observed.
    pub fn observe(&self, value: &Value) -> Option<Observer> {
        observer::observe(self, value, false)
    }

    /// Like [`observe`](Self::observe), counting the value as root data.
    pub fn observe_root(&self, value: &Value) -> Option<Observer> {
        observer::observe(self, value, true)
    }

    /// Convert `key` of `object` into a reactive field.
    ///
    /// With `value == None` the field keeps its current value. A shallow
    /// field does not observe the values stored in it.
    pub fn define_reactive(&self, object: &Object, key: &str, value: Option<Value>, shallow: bool) {
        observer::define_reactive(self, object, key, value, shallow)
    }

    // ------------------------------------------------------------------
    // Computation entry points
    // ------------------------------------------------------------------

    /// Create a watcher without a callback (a render-style computation).
    pub fn watcher<G>(&self, getter: G, options: WatchOptions) -> Result<Watcher, ReactiveError>
    where
        G: Fn() -> EvalResult + 'static,
    {
        Watcher::new(self, Rc::new(getter), None, options)
    }

    /// Watch a computation and invoke `callback(new, old)` when it changes.
    pub fn watch<G, C>(
        &self,
        getter: G,
        callback: C,
        options: WatchOptions,
    ) -> Result<Watcher, ReactiveError>
    where
        G: Fn() -> EvalResult + 'static,
        C: Fn(&Value, &Value) -> EvalResult<()> + 'static,
    {
        Watcher::new(self, Rc::new(getter), Some(Rc::new(callback)), options)
    }

    /// Watch a dot-delimited path such as `"a.b.c"` rooted at `object`.
    ///
    /// An invalid path logs a warning and watches a getter that always
    /// yields `Null`.
    pub fn watch_path<C>(
        &self,
        object: &Object,
        path: &str,
        callback: C,
        options: WatchOptions,
    ) -> Result<Watcher, ReactiveError>
    where
        C: Fn(&Value, &Value) -> EvalResult<()> + 'static,
    {
        let options = options.label_if_unset(path);
        let root = Value::Object(object.clone());
        match parse_path(path) {
            Some(segments) => self.watch(
                move || {
                    let mut value = root.clone();
                    for segment in &segments {
                        value = match &value {
                            Value::Object(object) => object.get(segment),
                            _ => return Ok(Value::Null),
                        };
                    }
                    Ok(value)
                },
                callback,
                options,
            ),
            None => {
                self.warn(&format!(
                    "failed watching path \"{path}\": only simple dot-delimited paths are accepted"
                ));
                self.watch(|| Ok(Value::Null), callback, options)
            }
        }
    }

    /// Create a lazily evaluated derived value.
    pub fn computed<G>(&self, getter: G) -> Computed
    where
        G: Fn() -> EvalResult + 'static,
    {
        Computed::new(self, Rc::new(getter))
    }

    /// Create a typed reactive cell.
    pub fn signal<T: SameValue>(&self, value: T) -> Signal<T> {
        Signal::new(self, value)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("subjects", &self.subject_count())
            .field("watchers", &self.watcher_count())
            .field("tracking_depth", &self.inner.context.depth())
            .field("flushes", &self.flush_count())
            .finish()
    }
}
