//! Observation
//!
//! This module turns plain data into observable data. Observing a container
//! attaches a marker ([`Observer`]) holding the container's structural
//! subject, then converts every field into a reactive field with its own
//! private subject.
//!
//! # Concepts
//!
//! ## Reactive fields
//!
//! Reading a reactive field inside a watcher's evaluation subscribes the
//! watcher to the field. Writing a different value notifies it. A field
//! holding an observed container also subscribes readers to the container's
//! structural subject, so `set`, `del` and array mutators reach them.
//!
//! ## Structural changes
//!
//! Keys added by plain assignment are not reactive. [`set`] adds a reactive
//! key and notifies the structural subject; [`del`] removes a key and does
//! the same. Arrays route every length-changing operation through their own
//! mutators.
//!
//! ## Opting out
//!
//! Frozen or non-extensible containers, framework instances, opaque values
//! and anything produced while observation is disabled
//! ([`Runtime::toggle_observing`]) are left unconverted.

mod array;
mod object;
mod value;

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

pub use array::{Array, MAX_ARRAY_LENGTH};
pub use object::Object;
pub use value::Value;

use crate::reactive::{Dep, Runtime};

use object::{ReactiveSlot, Slot, Storage};

/// Marker attached to every observed object or array.
#[derive(Clone)]
pub struct Observer(Rc<ObserverInner>);

struct ObserverInner {
    dep: Dep,
    vm_count: Cell<usize>,
}

impl Observer {
    fn new(rt: &Runtime) -> Self {
        Self(Rc::new(ObserverInner {
            dep: Dep::new(rt),
            vm_count: Cell::new(0),
        }))
    }

    /// The structural subject, notified on added or removed keys and on
    /// array mutation.
    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    /// How many consumers use the container as root data.
    pub fn vm_count(&self) -> usize {
        self.0.vm_count.get()
    }

    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.0.dep.id())
            .field("vm_count", &self.vm_count())
            .finish()
    }
}

/// Key for structural [`set`] and [`del`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropKey {
    Index(usize),
    Name(String),
}

impl PropKey {
    fn as_index(&self) -> Option<usize> {
        match self {
            PropKey::Index(index) => Some(*index),
            PropKey::Name(name) => name.parse().ok(),
        }
    }

    fn into_name(self) -> String {
        match self {
            PropKey::Index(index) => index.to_string(),
            PropKey::Name(name) => name,
        }
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        PropKey::Name(name.to_string())
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        PropKey::Name(name)
    }
}

pub(crate) fn warn(rt: Option<&Runtime>, message: &str) {
    match rt {
        Some(rt) => rt.warn(message),
        None => tracing::warn!("{message}"),
    }
}

/// Attach a marker to `value` and convert its contents.
///
/// Already observed values return their existing marker. Returns `None`
/// for primitives, opaque values and values that opt out of observation.
/// With `as_root`, the marker's root-consumer count is incremented.
pub fn observe(rt: &Runtime, value: &Value, as_root: bool) -> Option<Observer> {
    let ob = match value {
        Value::Object(object) => match object.observer() {
            Some(ob) => ob,
            None => {
                if !rt.is_observing()
                    || object.is_frozen()
                    || !object.is_extensible()
                    || object.is_instance()
                {
                    return None;
                }
                // Attach first so cycles back to this object stop here.
                let ob = Observer::new(rt);
                object.attach_observer(ob.clone());
                for key in object.keys() {
                    define_reactive(rt, object, &key, None, false);
                }
                ob
            }
        },
        Value::Array(array) => match array.observer() {
            Some(ob) => ob,
            None => {
                if !rt.is_observing() || array.is_frozen() {
                    return None;
                }
                let ob = Observer::new(rt);
                array.attach_observer(ob.clone());
                for item in array.to_vec() {
                    observe(rt, &item, false);
                }
                ob
            }
        },
        _ => return None,
    };
    if as_root {
        ob.0.vm_count.set(ob.vm_count() + 1);
    }
    Some(ob)
}

enum Existing {
    Missing,
    Data(Value),
    Accessor {
        get: Option<object::GetFn>,
        set: Option<object::SetFn>,
    },
    Reactive,
}

/// Convert `key` of `object` into a reactive field.
///
/// Converting a field that is already reactive keeps its subject (and
/// assigns `value` if one is given). Getter-only accessors and frozen
/// objects are skipped. An accessor pair is kept as the field's storage.
pub fn define_reactive(
    rt: &Runtime,
    object: &Object,
    key: &str,
    value: Option<Value>,
    shallow: bool,
) {
    if object.is_frozen() {
        return;
    }
    let existing = object.with_slots(|slots| match slots.get(key) {
        None => Existing::Missing,
        Some(Slot::Data(value)) => Existing::Data(value.clone()),
        Some(Slot::Accessor { get, set }) => Existing::Accessor {
            get: get.clone(),
            set: set.clone(),
        },
        Some(Slot::Reactive(_)) => Existing::Reactive,
    });

    let storage = match existing {
        Existing::Reactive => {
            if let Some(value) = value {
                object.assign(key, value);
            }
            return;
        }
        Existing::Accessor { get: Some(_), set: None } => return,
        Existing::Accessor { get, set } => {
            let value = match value {
                Some(value) => value,
                None => get.as_ref().map(|get| get()).unwrap_or_default(),
            };
            Storage { value, get, set }
        }
        Existing::Data(current) => Storage {
            value: value.unwrap_or(current),
            get: None,
            set: None,
        },
        Existing::Missing => {
            if !object.is_extensible() {
                return;
            }
            Storage {
                value: value.unwrap_or_default(),
                get: None,
                set: None,
            }
        }
    };

    let child = if shallow {
        None
    } else {
        observe(rt, &storage.value, false)
    };
    object.insert_slot(
        key,
        Slot::Reactive(ReactiveSlot {
            dep: Dep::new(rt),
            storage,
            child,
            shallow,
        }),
    );
}

/// Register the current watcher with every observed element of `array`,
/// recursing into nested arrays.
///
/// Element reads cannot be intercepted, so reading an array field depends
/// on all of its elements up front. This is linear in the size of the
/// array.
pub fn depend_array(array: &Array) {
    let mut seen = HashSet::new();
    depend_elements(array, &mut seen);
}

fn depend_elements(array: &Array, seen: &mut HashSet<usize>) {
    if !seen.insert(array.addr()) {
        return;
    }
    for item in array.to_vec() {
        let ob = match &item {
            Value::Object(object) => object.observer(),
            Value::Array(nested) => nested.observer(),
            _ => None,
        };
        if let Some(ob) = ob {
            ob.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_elements(nested, seen);
        }
    }
}

/// Add or update a key so that structural watchers are notified.
///
/// On an array, an index key replaces (or appends past the end) through the
/// array's mutators. On an object, an existing key is simply assigned; a
/// new key on an observed object becomes a reactive field and the
/// structural subject notifies. Root data and framework instances refuse
/// new keys with a warning.
pub fn set(target: &Value, key: impl Into<PropKey>, value: Value) {
    let key = key.into();
    match target {
        Value::Array(array) => match key.as_index() {
            Some(index) => array.set(index, value),
            None => {
                let rt = array.observer().and_then(|ob| ob.dep().runtime());
                warn(rt.as_ref(), &format!("cannot set non-index key {key:?} on an array"));
            }
        },
        Value::Object(object) => {
            let key = key.into_name();
            if object.contains_key(&key) {
                object.assign(&key, value);
                return;
            }
            let ob = object.observer();
            let rt = ob.as_ref().and_then(|ob| ob.dep().runtime());
            if object.is_instance() || ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(
                    rt.as_ref(),
                    &format!(
                        "refusing to add reactive key \"{key}\" to an instance or its root data; \
                         declare it upfront instead"
                    ),
                );
                return;
            }
            match (ob, rt) {
                (Some(ob), Some(rt)) => {
                    if !object.is_extensible() {
                        return;
                    }
                    define_reactive(&rt, object, &key, Some(value), false);
                    ob.dep().notify();
                }
                _ => object.assign(&key, value),
            }
        }
        other => warn(
            None,
            &format!("cannot set reactive key on a {} value", other.type_name()),
        ),
    }
}

/// Delete a key and notify structural watchers.
///
/// On an array, an index key removes that element. Root data and framework
/// instances refuse the deletion with a warning. Missing keys are ignored.
pub fn del(target: &Value, key: impl Into<PropKey>) {
    let key = key.into();
    match target {
        Value::Array(array) => match key.as_index() {
            Some(index) => {
                array.remove(index);
            }
            None => {
                let rt = array.observer().and_then(|ob| ob.dep().runtime());
                warn(rt.as_ref(), &format!("cannot delete non-index key {key:?} on an array"));
            }
        },
        Value::Object(object) => {
            let key = key.into_name();
            let ob = object.observer();
            if object.is_instance() || ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                let rt = ob.as_ref().and_then(|ob| ob.dep().runtime());
                warn(
                    rt.as_ref(),
                    &format!("refusing to delete key \"{key}\" from an instance or its root data"),
                );
                return;
            }
            if object.is_frozen() || !object.remove_slot(&key) {
                return;
            }
            if let Some(ob) = ob {
                ob.dep().notify();
            }
        }
        other => warn(
            None,
            &format!("cannot delete reactive key on a {} value", other.type_name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{WatchOptions, Watcher};

    fn structural_counter(rt: &Runtime, holder: &Object, key: &'static str) -> (Watcher, Rc<Cell<u32>>) {
        let runs = Rc::new(Cell::new(0));
        let (h, r) = (holder.clone(), runs.clone());
        let watcher = rt
            .watcher(
                move || {
                    r.set(r.get() + 1);
                    Ok(h.get(key))
                },
                WatchOptions::new().sync(true),
            )
            .unwrap();
        (watcher, runs)
    }

    #[test]
    fn observe_is_idempotent() {
        let rt = Runtime::default();
        let object = Object::from_iter([("a", Value::from(1.0))]);
        let value = Value::Object(object.clone());

        let first = observe(&rt, &value, false).unwrap();
        let dep = object.field_dep_id("a");
        let second = observe(&rt, &value, false).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(object.field_dep_id("a"), dep);
    }

    #[test]
    fn define_reactive_twice_keeps_one_subject() {
        let rt = Runtime::default();
        let object = Object::new();
        define_reactive(&rt, &object, "a", Some(Value::from(1.0)), false);
        let subjects = rt.subject_count();
        let dep = object.field_dep_id("a");

        define_reactive(&rt, &object, "a", None, false);
        assert_eq!(object.field_dep_id("a"), dep);
        assert_eq!(rt.subject_count(), subjects);

        define_reactive(&rt, &object, "a", Some(Value::from(2.0)), false);
        assert_eq!(object.field_dep_id("a"), dep);
        assert_eq!(object.peek("a"), Value::from(2.0));
    }

    #[test]
    fn observe_skips_opted_out_values() {
        let rt = Runtime::default();
        assert!(observe(&rt, &Value::from(1.0), false).is_none());
        assert!(observe(&rt, &Value::opaque(3_u8), false).is_none());

        let instance = Object::new();
        instance.mark_instance();
        assert!(observe(&rt, &Value::Object(instance), false).is_none());

        let sealed = Object::new();
        sealed.prevent_extensions();
        assert!(observe(&rt, &Value::Object(sealed), false).is_none());

        let later = Object::new();
        rt.without_observing(|| {
            assert!(observe(&rt, &Value::Object(later.clone()), false).is_none());
        });
        assert!(observe(&rt, &Value::Object(later), false).is_some());
    }

    #[test]
    fn nested_values_are_observed_recursively() {
        let rt = Runtime::default();
        let leaf = Object::new();
        let list = Array::from(vec![Value::Object(leaf.clone())]);
        let root = Object::from_iter([("list", Value::Array(list.clone()))]);
        observe(&rt, &Value::Object(root), false);

        assert!(list.observer().is_some());
        assert!(leaf.observer().is_some());
    }

    #[test]
    fn root_count_accumulates() {
        let rt = Runtime::default();
        let data = Value::Object(Object::new());
        observe(&rt, &data, true);
        let ob = observe(&rt, &data, true).unwrap();
        assert_eq!(ob.vm_count(), 2);
    }

    #[test]
    fn set_adds_reactive_key_and_notifies() {
        let rt = Runtime::default();
        let child = Object::new();
        let holder = Object::from_iter([("child", Value::Object(child.clone()))]);
        observe(&rt, &Value::Object(holder.clone()), false);
        let (_watcher, runs) = structural_counter(&rt, &holder, "child");

        set(&Value::Object(child.clone()), "added", Value::from(1.0));
        assert_eq!(runs.get(), 2);
        assert!(child.is_reactive("added"));

        // Existing key: plain reactive write, no structural notification.
        set(&Value::Object(child.clone()), "added", Value::from(1.0));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn del_removes_key_and_notifies() {
        let rt = Runtime::default();
        let child = Object::from_iter([("gone", Value::from(1.0))]);
        let holder = Object::from_iter([("child", Value::Object(child.clone()))]);
        observe(&rt, &Value::Object(holder.clone()), false);
        let (_watcher, runs) = structural_counter(&rt, &holder, "child");

        del(&Value::Object(child.clone()), "gone");
        assert_eq!(runs.get(), 2);
        assert!(!child.contains_key("gone"));

        del(&Value::Object(child), "gone");
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn root_data_refuses_structural_changes() {
        let rt = Runtime::new(crate::config::RuntimeConfig {
            silent: true,
            ..Default::default()
        });
        let data = Object::from_iter([("kept", Value::from(1.0))]);
        observe(&rt, &Value::Object(data.clone()), true);

        set(&Value::Object(data.clone()), "added", Value::from(1.0));
        del(&Value::Object(data.clone()), "kept");
        assert!(!data.contains_key("added"));
        assert!(data.contains_key("kept"));

        // Existing keys can still be written.
        set(&Value::Object(data.clone()), "kept", Value::from(2.0));
        assert_eq!(data.peek("kept"), Value::from(2.0));
    }

    #[test]
    fn set_on_unobserved_object_is_plain_assignment() {
        let object = Object::new();
        set(&Value::Object(object.clone()), "a", Value::from(1.0));
        assert_eq!(object.peek("a"), Value::from(1.0));
        assert!(!object.is_reactive("a"));
    }

    #[test]
    fn array_keys_route_through_mutators() {
        let rt = Runtime::default();
        let list = Array::from(vec![Value::from(1.0)]);
        let holder = Object::from_iter([("list", Value::Array(list.clone()))]);
        observe(&rt, &Value::Object(holder.clone()), false);
        let (_watcher, runs) = structural_counter(&rt, &holder, "list");

        set(&Value::Array(list.clone()), 3_usize, Value::from(4.0));
        assert_eq!(list.len(), 4);
        del(&Value::Array(list.clone()), "0");
        assert_eq!(list.len(), 3);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn depend_array_handles_self_containing_arrays() {
        let rt = Runtime::default();
        let list = Array::new();
        list.push(Value::Array(list.clone()));
        observe(&rt, &Value::Array(list.clone()), false);

        let l = list.clone();
        let watcher = rt
            .watcher(
                move || {
                    depend_array(&l);
                    Ok(Value::Null)
                },
                WatchOptions::new(),
            )
            .unwrap();
        assert_eq!(watcher.dep_ids().len(), 1);
    }
}
