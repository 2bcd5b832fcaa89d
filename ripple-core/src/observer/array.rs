//! Observable Arrays
//!
//! Index access on an array cannot be intercepted per element, so an
//! `Array` only exposes mutation through its own methods. Each mutator
//! performs the change, observes any inserted values, and notifies the
//! array's structural subject.
//!
//! Reads never register dependencies by themselves. A watcher depends on an
//! array through the field (or signal) holding it, which subscribes to the
//! structural subject and fans out to every observed element.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::value::Value;
use super::{observe, warn, Observer};

/// Largest length an array can reach through [`Array::set`].
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

struct ArrayInner {
    items: RefCell<Vec<Value>>,
    ob: RefCell<Option<Observer>>,
    frozen: Cell<bool>,
}

/// A shared, observable list of values.
///
/// Clones refer to the same array.
#[derive(Clone)]
pub struct Array(Rc<ArrayInner>);

impl Array {
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// Apply `f` to the elements, then observe `inserted` and notify.
    /// Returns `None` for a frozen array, which is left untouched.
    fn mutate<R>(
        &self,
        method: &str,
        inserted: &[Value],
        f: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> Option<R> {
        let ob = self.observer();
        if self.is_frozen() {
            let rt = ob.as_ref().and_then(|ob| ob.dep().runtime());
            warn(rt.as_ref(), &format!("cannot {method} on a frozen array"));
            return None;
        }
        let result = f(&mut self.0.items.borrow_mut());
        if let Some(ob) = ob {
            if let Some(rt) = ob.dep().runtime() {
                for item in inserted {
                    observe(&rt, item, false);
                }
            }
            ob.dep().notify();
        }
        Some(result)
    }

    /// Append a value. Returns the new length.
    pub fn push(&self, value: Value) -> usize {
        let inserted = [value];
        self.mutate("push", &inserted, |items| {
            items.extend(inserted.iter().cloned());
            items.len()
        })
        .unwrap_or_else(|| self.len())
    }

    /// Remove and return the last value.
    pub fn pop(&self) -> Option<Value> {
        self.mutate("pop", &[], Vec::pop).flatten()
    }

    /// Remove and return the first value.
    pub fn shift(&self) -> Option<Value> {
        self.mutate("shift", &[], |items| {
            (!items.is_empty()).then(|| items.remove(0))
        })
        .flatten()
    }

    /// Prepend values, keeping their order. Returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let inserted: Vec<Value> = values.into_iter().collect();
        self.mutate("unshift", &inserted, |items| {
            items.splice(0..0, inserted.iter().cloned());
            items.len()
        })
        .unwrap_or_else(|| self.len())
    }

    /// Remove `delete_count` values starting at `start` and insert `values`
    /// in their place. Out-of-range bounds are clamped. Returns the removed
    /// values.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let inserted: Vec<Value> = values.into_iter().collect();
        self.mutate("splice", &inserted, |items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, inserted.iter().cloned()).collect()
        })
        .unwrap_or_default()
    }

    /// Sort in place with a comparator.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        // Sort a copy so the comparator may read the array.
        let mut sorted = self.to_vec();
        sorted.sort_by(compare);
        self.mutate("sort", &[], |items| *items = sorted);
    }

    pub fn reverse(&self) {
        self.mutate("reverse", &[], |items| items.reverse());
    }

    /// Replace the value at `index`, padding with `Null` when `index` is
    /// past the end.
    ///
    /// An index that would grow the array past [`MAX_ARRAY_LENGTH`] is refused
    /// with a warning and the array is left unchanged.
    pub fn set(&self, index: usize, value: Value) {
        let len = match index.checked_add(1) {
            Some(len) if len <= MAX_ARRAY_LENGTH => len,
            _ => {
                let rt = self.observer().and_then(|ob| ob.dep().runtime());
                warn(
                    rt.as_ref(),
                    &format!("cannot set index {index}: arrays hold at most {MAX_ARRAY_LENGTH} values"),
                );
                return;
            }
        };
        let inserted = [value];
        self.mutate("set", &inserted, |items| {
            if len > items.len() {
                items.resize(len, Value::Null);
            }
            items[index] = inserted[0].clone();
        });
    }

    /// Remove and return the value at `index`.
    pub fn remove(&self, index: usize) -> Option<Value> {
        self.splice(index, 1, []).into_iter().next()
    }

    // ------------------------------------------------------------------
    // Reactive internals
    // ------------------------------------------------------------------

    /// The observation marker, if the array has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.ob.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, ob: Observer) {
        *self.0.ob.borrow_mut() = Some(ob);
    }

    /// Freeze the array: mutators are refused and it is never observed or
    /// traversed.
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayInner {
            items: RefCell::new(items),
            ob: RefCell::new(None),
            frozen: Cell::new(false),
        }))
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.len())
            .field("observed", &self.0.ob.borrow().is_some())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Object;
    use crate::reactive::{Runtime, Signal, WatchOptions, Watcher};

    fn numbers(values: &[f64]) -> Array {
        values.iter().map(|n| Value::from(*n)).collect()
    }

    fn as_numbers(array: &Array) -> Vec<f64> {
        array.to_vec().iter().filter_map(Value::as_f64).collect()
    }

    fn watched(rt: &Runtime, array: &Array) -> (Signal<Value>, Watcher, Rc<Cell<u32>>) {
        let signal = rt.signal(Value::Array(array.clone()));
        let runs = Rc::new(Cell::new(0));
        let (s, r) = (signal.clone(), runs.clone());
        let watcher = rt
            .watcher(
                move || {
                    r.set(r.get() + 1);
                    Ok(s.get())
                },
                WatchOptions::new().sync(true),
            )
            .unwrap();
        (signal, watcher, runs)
    }

    #[test]
    fn unobserved_mutators_behave_like_vec() {
        let array = numbers(&[3.0, 1.0, 2.0]);
        assert_eq!(array.push(Value::from(4.0)), 4);
        assert_eq!(array.shift(), Some(Value::from(3.0)));
        assert_eq!(array.unshift([Value::from(0.0), Value::from(9.0)]), 5);
        assert_eq!(as_numbers(&array), [0.0, 9.0, 1.0, 2.0, 4.0]);

        let removed = array.splice(1, 2, [Value::from(5.0)]);
        assert_eq!(removed, vec![Value::from(9.0), Value::from(1.0)]);
        assert_eq!(as_numbers(&array), [0.0, 5.0, 2.0, 4.0]);

        array.sort_by(|a, b| a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal));
        assert_eq!(as_numbers(&array), [0.0, 2.0, 4.0, 5.0]);

        array.reverse();
        assert_eq!(array.pop(), Some(Value::from(0.0)));
        assert_eq!(array.remove(0), Some(Value::from(5.0)));
        assert_eq!(array.remove(10), None);
        assert_eq!(as_numbers(&array), [4.0, 2.0]);
    }

    #[test]
    fn splice_clamps_bounds() {
        let array = numbers(&[1.0, 2.0]);
        assert!(array.splice(5, 3, [Value::from(3.0)]).is_empty());
        assert_eq!(as_numbers(&array), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn set_past_end_pads_with_null() {
        let array = Array::new();
        array.set(2, Value::from(1.0));
        assert_eq!(array.to_vec(), vec![Value::Null, Value::Null, Value::from(1.0)]);
    }

    #[test]
    fn set_refuses_index_past_max_length() {
        let rt = Runtime::new(crate::config::RuntimeConfig {
            silent: true,
            ..Default::default()
        });
        let array = numbers(&[1.0]);
        let (_signal, _watcher, runs) = watched(&rt, &array);

        array.set(usize::MAX, Value::from(2.0));
        array.set(MAX_ARRAY_LENGTH, Value::from(2.0));
        crate::observer::set(&Value::Array(array.clone()), "18446744073709551615", Value::from(2.0));

        assert_eq!(as_numbers(&array), [1.0]);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn every_mutator_notifies() {
        let rt = Runtime::default();
        let array = numbers(&[1.0, 2.0]);
        let (_signal, _watcher, runs) = watched(&rt, &array);

        array.push(Value::from(3.0));
        array.pop();
        array.shift();
        array.unshift([Value::from(0.0)]);
        array.splice(0, 1, []);
        array.sort_by(|_, _| Ordering::Equal);
        array.reverse();
        array.set(0, Value::from(7.0));
        array.remove(0);
        assert_eq!(runs.get(), 10);
    }

    #[test]
    fn inserted_values_are_observed() {
        let rt = Runtime::default();
        let array = Array::new();
        rt.observe(&Value::Array(array.clone()));

        let pushed = Object::new();
        array.push(Value::Object(pushed.clone()));
        let spliced = Object::new();
        array.splice(0, 0, [Value::Object(spliced.clone())]);
        let assigned = Object::new();
        array.set(5, Value::Object(assigned.clone()));

        assert!(pushed.observer().is_some());
        assert!(spliced.observer().is_some());
        assert!(assigned.observer().is_some());
    }

    #[test]
    fn frozen_array_refuses_mutation() {
        let rt = Runtime::default();
        let array = numbers(&[1.0]);
        array.freeze();
        assert!(rt.observe(&Value::Array(array.clone())).is_none());

        assert_eq!(array.push(Value::from(2.0)), 1);
        assert_eq!(array.pop(), None);
        assert_eq!(as_numbers(&array), [1.0]);
    }

    #[test]
    fn reads_do_not_track() {
        let rt = Runtime::default();
        let array = numbers(&[1.0]);
        rt.observe(&Value::Array(array.clone()));

        let a = array.clone();
        let watcher = rt
            .watcher(move || Ok(Value::from(a.len() as f64)), WatchOptions::new())
            .unwrap();
        assert!(watcher.dep_ids().is_empty());
    }
}
