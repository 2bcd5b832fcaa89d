//! Watcher Implementation
//!
//! A watcher is one tracked computation: a render function, a computed
//! value or a user watch expression. It evaluates its getter inside a
//! reactive context, records every subject the getter touched, and fires
//! its callback when a re-run produces a new value.
//!
//! # Lifecycle
//!
//! ```text
//! constructing -> evaluating -> idle (clean | dirty) <-> re-evaluating
//!                                      |
//!                                      v
//!                                  torn down
//! ```
//!
//! # Dependency Reconciliation
//!
//! Each evaluation builds a fresh `new_deps` set. A subject is only added
//! to the subscriber list on its first touch when it was not already a
//! confirmed dependency. After the getter returns, confirmed dependencies
//! that were not touched again are unsubscribed, then the two sets swap.
//! A watcher that stops reading a field therefore stops reacting to it.
//!
//! # Modes
//!
//! - `lazy`: notification only marks the watcher dirty; the value is
//!   recomputed by [`Watcher::evaluate`].
//! - `sync`: notification re-runs the watcher inline.
//! - otherwise notification queues the watcher for the next flush.
//! - `deep`: the produced value is traversed so the whole subtree becomes
//!   a dependency, and the callback fires on every re-run.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::{EvalResult, ReactiveError};
use crate::observer::Value;
use crate::scheduler::queue_watcher;

use super::id::{DepId, WatcherId};
use super::runtime::{Runtime, WeakRuntime};
use super::traverse::traverse;

pub(crate) type Getter = Rc<dyn Fn() -> EvalResult>;
pub(crate) type Callback = Rc<dyn Fn(&Value, &Value) -> EvalResult<()>>;

/// Hook run by the scheduler right before a queued watcher re-runs.
pub type Hook = Rc<dyn Fn()>;

/// Options for creating a watcher.
#[derive(Clone, Default)]
pub struct WatchOptions {
    /// Traverse the produced value so every nested field is a dependency.
    pub deep: bool,
    /// User-level watcher: getter and callback errors go to the
    /// recoverable error channel instead of propagating.
    pub user: bool,
    /// Compute on demand only; notification marks the watcher dirty.
    pub lazy: bool,
    /// Re-run inline on notification instead of queueing.
    pub sync: bool,
    /// Invoke the callback once with `(value, Null)` after creation.
    pub immediate: bool,
    /// Called by the scheduler before each queued re-run.
    pub before: Option<Hook>,
    /// Human readable label used in errors and logs.
    pub label: Option<String>,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    pub fn user(mut self, user: bool) -> Self {
        self.user = user;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn before(mut self, hook: impl Fn() + 'static) -> Self {
        self.before = Some(Rc::new(hook));
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub(crate) fn label_if_unset(mut self, label: &str) -> Self {
        if self.label.is_none() {
            self.label = Some(label.to_string());
        }
        self
    }
}

impl fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchOptions")
            .field("deep", &self.deep)
            .field("user", &self.user)
            .field("lazy", &self.lazy)
            .field("sync", &self.sync)
            .field("immediate", &self.immediate)
            .field("before", &self.before.is_some())
            .field("label", &self.label)
            .finish()
    }
}

#[derive(Default)]
struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    /// Confirmed by the previous evaluation.
    deps: IndexSet<DepId>,
    /// Collected by the evaluation in progress.
    new_deps: IndexSet<DepId>,
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    options: WatchOptions,
    state: RefCell<WatcherState>,
}

impl WatcherInner {
    pub(crate) fn id(&self) -> WatcherId {
        self.id
    }

    pub(crate) fn expression(&self) -> &str {
        &self.expression
    }

    pub(crate) fn before_hook(&self) -> Option<Hook> {
        self.options.before.clone()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Evaluate the getter and re-collect dependencies.
    pub(crate) fn get(&self, rt: &Runtime) -> Result<Value, ReactiveError> {
        let ctx = rt.inner().context.enter(Some(self.id));

        let mut failure = None;
        let value = match (self.getter)() {
            Ok(value) => value,
            Err(source) if self.options.user => {
                rt.handle_error(ReactiveError::Getter {
                    expression: self.expression.clone(),
                    source,
                });
                Value::Null
            }
            Err(source) => {
                failure = Some(ReactiveError::Evaluation {
                    expression: self.expression.clone(),
                    source,
                });
                Value::Null
            }
        };

        // Touch every nested field while this watcher is still the target.
        if self.options.deep {
            traverse(&value);
        }
        drop(ctx);
        self.cleanup_deps(rt);

        match failure {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }

    /// Record a subject touched during the evaluation in progress.
    pub(crate) fn add_dep(&self, rt: &Runtime, dep: DepId) {
        let subscribe = {
            let mut state = self.state.borrow_mut();
            if !state.new_deps.insert(dep) {
                return;
            }
            !state.deps.contains(&dep)
        };
        if subscribe {
            rt.subscribe(dep, self.id);
        }
    }

    fn cleanup_deps(&self, rt: &Runtime) {
        let stale: SmallVec<[DepId; 8]> = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            if !state.active {
                // Torn down mid-evaluation: drop whatever this run subscribed to.
                let stale = state.new_deps.drain(..).collect();
                state.deps.clear();
                stale
            } else {
                let stale = state
                    .deps
                    .iter()
                    .filter(|dep| !state.new_deps.contains(*dep))
                    .copied()
                    .collect();
                std::mem::swap(&mut state.deps, &mut state.new_deps);
                state.new_deps.clear();
                stale
            }
        };
        for dep in stale {
            rt.unsubscribe(dep, self.id);
        }
    }

    /// Subscriber interface: called when a dependency changes.
    pub(crate) fn update(&self, rt: &Runtime) -> Result<(), ReactiveError> {
        if self.options.lazy {
            self.state.borrow_mut().dirty = true;
            Ok(())
        } else if self.options.sync {
            self.run(rt)
        } else {
            queue_watcher(rt, self.id);
            Ok(())
        }
    }

    /// Scheduler job interface: re-evaluate and fire the callback on change.
    pub(crate) fn run(&self, rt: &Runtime) -> Result<(), ReactiveError> {
        if !self.is_active() {
            return Ok(());
        }
        let value = self.get(rt)?;
        let old = {
            let mut state = self.state.borrow_mut();
            // Containers may have mutated in place, so they always fire.
            if value.same_value(&state.value) && !value.is_object() && !self.options.deep {
                return Ok(());
            }
            std::mem::replace(&mut state.value, value.clone())
        };
        self.invoke_callback(rt, &value, &old)
    }

    fn invoke_callback(&self, rt: &Runtime, value: &Value, old: &Value) -> Result<(), ReactiveError> {
        let Some(callback) = self.callback.clone() else {
            return Ok(());
        };
        match callback(value, old) {
            Ok(()) => Ok(()),
            Err(source) if self.options.user => {
                rt.handle_error(ReactiveError::Callback {
                    expression: self.expression.clone(),
                    source,
                });
                Ok(())
            }
            Err(source) => Err(ReactiveError::Evaluation {
                expression: self.expression.clone(),
                source,
            }),
        }
    }

    /// Recompute the value of a lazy watcher and clear its dirty flag.
    pub(crate) fn evaluate(&self, rt: &Runtime) -> Result<Value, ReactiveError> {
        let value = self.get(rt)?;
        let mut state = self.state.borrow_mut();
        state.value = value.clone();
        state.dirty = false;
        Ok(value)
    }

    /// Make the current target depend on every subject this watcher depends on.
    pub(crate) fn depend(&self, rt: &Runtime) {
        let deps: SmallVec<[DepId; 8]> = self.state.borrow().deps.iter().copied().collect();
        for dep in deps {
            rt.depend(dep);
        }
    }

    /// Unsubscribe from every confirmed subject. Idempotent.
    pub(crate) fn teardown(&self, rt: &Runtime) {
        let deps = {
            let mut state = self.state.borrow_mut();
            if !state.active {
                return;
            }
            state.active = false;
            std::mem::take(&mut state.deps)
        };
        for dep in deps {
            rt.unsubscribe(dep, self.id);
        }
        rt.remove_watcher(self.id);
        tracing::debug!(watcher = %self.id, expression = %self.expression, "watcher torn down");
    }
}

/// A tracked computation.
///
/// Dropping the handle tears the watcher down.
pub struct Watcher {
    inner: Rc<WatcherInner>,
    runtime: WeakRuntime,
}

impl Watcher {
    /// Register a watcher without evaluating it.
    pub(crate) fn create(
        rt: &Runtime,
        getter: Getter,
        callback: Option<Callback>,
        options: WatchOptions,
    ) -> Self {
        let id = rt.next_watcher_id();
        let expression = options.label.clone().unwrap_or_else(|| id.to_string());
        let lazy = options.lazy;

        let inner = Rc::new(WatcherInner {
            id,
            expression,
            getter,
            callback,
            options,
            state: RefCell::new(WatcherState {
                dirty: lazy,
                active: true,
                ..WatcherState::default()
            }),
        });
        rt.insert_watcher(inner.clone());
        Self {
            inner,
            runtime: rt.downgrade(),
        }
    }

    /// Register a watcher and, unless lazy, evaluate it once to establish
    /// its dependencies and cached value.
    pub(crate) fn new(
        rt: &Runtime,
        getter: Getter,
        callback: Option<Callback>,
        options: WatchOptions,
    ) -> Result<Self, ReactiveError> {
        let lazy = options.lazy;
        let immediate = options.immediate;
        let watcher = Self::create(rt, getter, callback, options);

        if !lazy {
            // On failure the handle drops here and tears the watcher down.
            let value = watcher.inner.get(rt)?;
            watcher.inner.state.borrow_mut().value = value.clone();
            if immediate {
                watcher.inner.invoke_callback(rt, &value, &Value::Null)?;
            }
        }
        Ok(watcher)
    }

    fn runtime(&self) -> Result<Runtime, ReactiveError> {
        self.runtime.upgrade().ok_or(ReactiveError::RuntimeDropped)
    }

    /// The watcher's id. Ids increase in creation order.
    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// Label used in errors and logs.
    pub fn expression(&self) -> &str {
        self.inner.expression()
    }

    /// The options the watcher was created with.
    pub fn options(&self) -> &WatchOptions {
        &self.inner.options
    }

    /// The cached value from the last evaluation.
    pub fn value(&self) -> Value {
        self.inner.state.borrow().value.clone()
    }

    /// Whether a lazy watcher needs re-evaluation.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.borrow().dirty
    }

    /// Whether the watcher has not been torn down.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Confirmed dependencies, in first-touch order.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.inner.state.borrow().deps.iter().copied().collect()
    }

    /// Evaluate the getter, re-collecting dependencies, without touching
    /// the cached value.
    pub fn get(&self) -> Result<Value, ReactiveError> {
        self.inner.get(&self.runtime()?)
    }

    /// Notify the watcher as if one of its dependencies changed.
    pub fn update(&self) -> Result<(), ReactiveError> {
        self.inner.update(&self.runtime()?)
    }

    /// Re-evaluate now and fire the callback if the value changed.
    pub fn run(&self) -> Result<(), ReactiveError> {
        self.inner.run(&self.runtime()?)
    }

    /// Recompute the value and clear the dirty flag.
    pub fn evaluate(&self) -> Result<Value, ReactiveError> {
        self.inner.evaluate(&self.runtime()?)
    }

    /// Make the currently evaluating watcher depend on everything this
    /// watcher depends on.
    pub fn depend(&self) -> Result<(), ReactiveError> {
        self.inner.depend(&self.runtime()?);
        Ok(())
    }

    /// Unsubscribe from every dependency. Idempotent.
    pub fn teardown(&self) {
        match self.runtime.upgrade() {
            Some(rt) => self.inner.teardown(&rt),
            None => self.inner.state.borrow_mut().active = false,
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("active", &state.active)
            .field("dirty", &state.dirty)
            .field("dependency_count", &state.deps.len())
            .finish()
    }
}

/// Split a dot-delimited watch path into segments.
///
/// Only word characters, `$` and `.` are accepted; anything else makes the
/// path invalid.
pub(crate) fn parse_path(path: &str) -> Option<Vec<String>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    valid.then(|| path.split('.').map(str::to_string).collect())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<(Value, Value)>>>, impl Fn(&Value, &Value) -> EvalResult<()>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |new: &Value, old: &Value| {
            sink.borrow_mut().push((new.clone(), old.clone()));
            Ok(())
        })
    }

    #[test]
    fn watcher_evaluates_on_creation() {
        let rt = Runtime::default();
        let count = rt.signal(2.0);
        let runs = Rc::new(Cell::new(0));

        let c = count.clone();
        let r = runs.clone();
        let watcher = rt
            .watcher(
                move || {
                    r.set(r.get() + 1);
                    Ok(Value::from(c.get()))
                },
                WatchOptions::new(),
            )
            .unwrap();

        assert_eq!(runs.get(), 1);
        assert_eq!(watcher.value(), Value::from(2.0));
        assert_eq!(watcher.dep_ids(), vec![count.dep_id()]);
        assert_eq!(count.subscriber_count(), 1);
    }

    #[test]
    fn lazy_watcher_defers_evaluation() {
        let rt = Runtime::default();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let watcher = rt
            .watcher(
                move || {
                    r.set(r.get() + 1);
                    Ok(Value::from(1.0))
                },
                WatchOptions::new().lazy(true),
            )
            .unwrap();

        assert_eq!(runs.get(), 0);
        assert!(watcher.is_dirty());
        assert_eq!(watcher.evaluate().unwrap(), Value::from(1.0));
        assert!(!watcher.is_dirty());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn repeated_reads_subscribe_once() {
        let rt = Runtime::default();
        let count = rt.signal(1.0);
        let c = count.clone();
        let watcher = rt
            .watcher(move || Ok(Value::from(c.get() + c.get() + c.get())), WatchOptions::new())
            .unwrap();

        assert_eq!(watcher.dep_ids().len(), 1);
        assert_eq!(count.subscriber_count(), 1);

        watcher.run().unwrap();
        assert_eq!(count.subscriber_count(), 1);
    }

    #[test]
    fn stale_dependencies_are_pruned() {
        let rt = Runtime::default();
        let flag = rt.signal(true);
        let a = rt.signal(1.0);
        let b = rt.signal(2.0);
        let (calls, callback) = recorder();

        let (f, av, bv) = (flag.clone(), a.clone(), b.clone());
        let _watcher = rt
            .watch(
                move || Ok(Value::from(if f.get() { av.get() } else { bv.get() })),
                callback,
                WatchOptions::new().sync(true),
            )
            .unwrap();
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(calls.borrow().len(), 1);

        a.set(100.0);
        assert_eq!(calls.borrow().len(), 1);

        b.set(3.0);
        assert_eq!(calls.borrow().last().unwrap().0, Value::from(3.0));
    }

    #[test]
    fn sync_watcher_runs_inline() {
        let rt = Runtime::default();
        let count = rt.signal(1.0);
        let (calls, callback) = recorder();
        let c = count.clone();
        let _watcher = rt
            .watch(move || Ok(Value::from(c.get())), callback, WatchOptions::new().sync(true))
            .unwrap();

        count.set(2.0);
        assert_eq!(
            calls.borrow().as_slice(),
            [(Value::from(2.0), Value::from(1.0))]
        );
    }

    #[test]
    fn unchanged_primitive_does_not_fire() {
        let rt = Runtime::default();
        let count = rt.signal(1.0);
        let (calls, callback) = recorder();
        let c = count.clone();
        let watcher = rt
            .watch(move || Ok(Value::from(c.get() > 0.0)), callback, WatchOptions::new().sync(true))
            .unwrap();

        count.set(5.0);
        assert!(calls.borrow().is_empty());
        assert_eq!(watcher.value(), Value::from(true));
    }

    #[test]
    fn object_values_fire_even_when_identical() {
        let rt = Runtime::default();
        let tick = rt.signal(0.0);
        let object = crate::observer::Object::new();
        let (calls, callback) = recorder();

        let (t, o) = (tick.clone(), object.clone());
        let _watcher = rt
            .watch(
                move || {
                    t.get();
                    Ok(Value::Object(o.clone()))
                },
                callback,
                WatchOptions::new().sync(true),
            )
            .unwrap();

        tick.set(1.0);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn teardown_unsubscribes_and_is_idempotent() {
        let rt = Runtime::default();
        let count = rt.signal(1.0);
        let (calls, callback) = recorder();
        let c = count.clone();
        let watcher = rt
            .watch(move || Ok(Value::from(c.get())), callback, WatchOptions::new().sync(true))
            .unwrap();
        assert_eq!(rt.watcher_count(), 1);

        watcher.teardown();
        watcher.teardown();
        assert!(!watcher.is_active());
        assert_eq!(count.subscriber_count(), 0);
        assert_eq!(rt.watcher_count(), 0);

        count.set(2.0);
        watcher.run().unwrap();
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn dropping_handle_tears_down() {
        let rt = Runtime::default();
        let count = rt.signal(1.0);
        let c = count.clone();
        let watcher = rt
            .watcher(move || Ok(Value::from(c.get())), WatchOptions::new())
            .unwrap();
        assert_eq!(count.subscriber_count(), 1);

        drop(watcher);
        assert_eq!(count.subscriber_count(), 0);
        assert_eq!(rt.watcher_count(), 0);
    }

    #[test]
    fn user_getter_error_is_reported_and_watcher_stays_active() {
        let rt = Runtime::default();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        rt.set_error_handler(move |err| sink.borrow_mut().push(err.to_string()));

        let count = rt.signal(1.0);
        let c = count.clone();
        let watcher = rt
            .watch(
                move || {
                    if c.get() > 1.0 {
                        return Err("too big".into());
                    }
                    Ok(Value::from(c.get()))
                },
                |_, _| Ok(()),
                WatchOptions::new().user(true).sync(true).label("count"),
            )
            .unwrap();

        count.set(2.0);
        assert_eq!(
            errors.borrow().as_slice(),
            ["error in getter for watcher \"count\": too big"]
        );
        assert!(watcher.is_active());
        assert_eq!(count.subscriber_count(), 1);
    }

    #[test]
    fn internal_getter_error_propagates_from_construction() {
        let rt = Runtime::default();
        let result = rt.watcher(|| Err("render failed".into()), WatchOptions::new().label("render"));
        match result {
            Err(ReactiveError::Evaluation { expression, .. }) => assert_eq!(expression, "render"),
            other => panic!("expected evaluation error, got {other:?}"),
        }
        assert_eq!(rt.watcher_count(), 0);
    }

    #[test]
    fn user_callback_error_is_reported() {
        let rt = Runtime::default();
        let errors = Rc::new(Cell::new(0));
        let sink = errors.clone();
        rt.set_error_handler(move |err| {
            assert!(matches!(err, ReactiveError::Callback { .. }));
            sink.set(sink.get() + 1);
        });

        let count = rt.signal(1.0);
        let c = count.clone();
        let watcher = rt
            .watch(
                move || Ok(Value::from(c.get())),
                |_, _| Err("callback failed".into()),
                WatchOptions::new().user(true),
            )
            .unwrap();

        count.set(2.0);
        assert!(watcher.run().is_ok());
        assert_eq!(errors.get(), 1);
    }

    #[test]
    fn immediate_fires_with_null_old_value() {
        let rt = Runtime::default();
        let (calls, callback) = recorder();
        let _watcher = rt
            .watch(|| Ok(Value::from(4.0)), callback, WatchOptions::new().immediate(true))
            .unwrap();
        assert_eq!(
            calls.borrow().as_slice(),
            [(Value::from(4.0), Value::Null)]
        );
    }

    #[test]
    fn depend_forwards_dependencies_to_current_target() {
        let rt = Runtime::default();
        let count = rt.signal(1.0);
        let c = count.clone();
        let inner = Rc::new(
            rt.watcher(move || Ok(Value::from(c.get())), WatchOptions::new().lazy(true))
                .unwrap(),
        );
        inner.evaluate().unwrap();

        let i = inner.clone();
        let outer = rt
            .watcher(
                move || {
                    i.depend()?;
                    Ok(Value::Null)
                },
                WatchOptions::new(),
            )
            .unwrap();
        assert_eq!(outer.dep_ids(), vec![count.dep_id()]);
        assert_eq!(count.subscriber_count(), 2);
    }

    #[test]
    fn parse_path_accepts_dotted_identifiers() {
        assert_eq!(
            parse_path("a.b.$c_1"),
            Some(vec!["a".to_string(), "b".to_string(), "$c_1".to_string()])
        );
        assert_eq!(parse_path("a[0]"), None);
        assert_eq!(parse_path("a b"), None);
    }
}
