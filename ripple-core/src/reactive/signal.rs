//! Signal Implementation
//!
//! A `Signal<T>` is a typed reactive cell: a single value guarded by its
//! own subject. It is the explicit counterpart of a reactive object field
//! for state that does not live in the dynamic [`Value`] graph.
//!
//! # How Signals Work
//!
//! 1. Reading a signal inside a watcher's evaluation registers the watcher
//!    with the signal's subject.
//!
//! 2. Writing a value that is the same as the current one (by the
//!    [`SameValue`] rule, which treats `NaN` as equal to itself) does
//!    nothing.
//!
//! 3. Any other write stores the value and notifies every subscriber.
//!
//! A `Signal<Value>` behaves exactly like an object field: containers
//! stored in it are observed, and reading it also subscribes to the
//! container's structural subject.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use crate::error::ReactiveError;
use crate::observer::{depend_array, Observer, Value};

use super::dep::Dep;
use super::id::DepId;
use super::runtime::{Runtime, WeakRuntime};

/// Equality used to decide whether a write is a change.
///
/// Floats treat `NaN` as equal to `NaN`, so writing `NaN` over `NaN` never
/// notifies.
pub trait SameValue: Clone + 'static {
    fn same_value(&self, other: &Self) -> bool;

    /// Make the stored value observable, returning its marker.
    fn observe(&self, _rt: &Runtime) -> Option<Observer> {
        None
    }

    /// Register dependencies on nested elements that cannot be tracked
    /// individually.
    fn depend_nested(&self) {}
}

macro_rules! same_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SameValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_by_eq!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, (),
    String, &'static str,
);

impl SameValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl SameValue for f32 {
    fn same_value(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

impl SameValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        Value::same_value(self, other)
    }

    fn observe(&self, rt: &Runtime) -> Option<Observer> {
        rt.observe(self)
    }

    fn depend_nested(&self) {
        if let Value::Array(array) = self {
            depend_array(array);
        }
    }
}

struct SignalInner<T> {
    dep: Dep,
    value: RefCell<T>,
    child: RefCell<Option<Observer>>,
    runtime: WeakRuntime,
}

/// A reactive cell holding a value of type `T`.
///
/// Clones share the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::default();
/// let count = rt.signal(0);
///
/// let value = count.get();
/// count.set(5); // notifies subscribers
/// ```
pub struct Signal<T: SameValue> {
    inner: Rc<SignalInner<T>>,
}

impl<T: SameValue> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(rt: &Runtime, value: T) -> Self {
        let child = value.observe(rt);
        Self {
            inner: Rc::new(SignalInner {
                dep: Dep::new(rt),
                value: RefCell::new(value),
                child: RefCell::new(child),
                runtime: rt.downgrade(),
            }),
        }
    }

    /// The id of the signal's subject.
    pub fn dep_id(&self) -> DepId {
        self.inner.dep.id()
    }

    /// Get the current value, registering the current watcher.
    pub fn get(&self) -> T {
        let value = self.get_untracked();
        self.track(&value);
        value
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the value without cloning, registering the current watcher.
    ///
    /// The value stays borrowed while `f` runs. Writing this signal from
    /// inside `f` is refused and reported on the recoverable error channel.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.borrow();
        self.track(&value);
        f(&value)
    }

    /// Register the current watcher with the signal and, for a container
    /// value, with its structure and nested elements.
    fn track(&self, value: &T) {
        if !self.is_tracking() {
            return;
        }
        self.inner.dep.depend();
        let child = self.inner.child.borrow().clone();
        if let Some(child) = child {
            child.dep().depend();
            value.depend_nested();
        }
    }

    /// Set a new value and notify subscribers if it differs.
    pub fn set(&self, value: T) {
        if value.same_value(&self.inner.value.borrow()) {
            return;
        }
        let rt = self.inner.runtime.upgrade();
        let Ok(mut slot) = self.inner.value.try_borrow_mut() else {
            let error = ReactiveError::SignalBorrowed {
                dep: self.inner.dep.id(),
            };
            match rt {
                Some(rt) => rt.handle_error(error),
                None => tracing::error!(error = %error, "signal write refused"),
            }
            return;
        };
        *slot = value.clone();
        drop(slot);
        *self.inner.child.borrow_mut() = rt.and_then(|rt| value.observe(&rt));
        self.inner.dep.notify();
    }

    /// Update the value using a function of the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }

    fn is_tracking(&self) -> bool {
        self.inner
            .runtime
            .upgrade()
            .is_some_and(|rt| rt.is_tracking())
    }

    /// Number of watchers subscribed to this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }
}

impl<T: SameValue> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: SameValue + Debug> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("dep", &self.inner.dep.id())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
