//! Observable Objects
//!
//! An `Object` is a shared, insertion-ordered mapping from keys to slots.
//! A slot is either plain data, a user accessor, or a reactive field. A
//! reactive field owns a private [`Dep`]: reading the field inside a
//! watcher's evaluation subscribes that watcher, and writing a different
//! value notifies it.
//!
//! Adding a key by plain assignment is never reactive. Use
//! [`Object::set`] (or [`observer::set`](super::set)) to add a key that
//! watchers of the object's structure will see.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::reactive::{Dep, DepId};

use super::value::Value;
use super::{depend_array, observe, Observer, PropKey};

pub(crate) type GetFn = Rc<dyn Fn() -> Value>;
pub(crate) type SetFn = Rc<dyn Fn(Value)>;

/// Backing storage of a reactive field. With a getter, reads go through
/// it; with a setter, writes go through it. Otherwise `value` is used.
pub(crate) struct Storage {
    pub(crate) value: Value,
    pub(crate) get: Option<GetFn>,
    pub(crate) set: Option<SetFn>,
}

pub(crate) struct ReactiveSlot {
    pub(crate) dep: Dep,
    pub(crate) storage: Storage,
    /// Marker of the current value when it is an observed container.
    pub(crate) child: Option<Observer>,
    pub(crate) shallow: bool,
}

pub(crate) enum Slot {
    Data(Value),
    Accessor {
        get: Option<GetFn>,
        set: Option<SetFn>,
    },
    Reactive(ReactiveSlot),
}

struct ObjectInner {
    slots: RefCell<IndexMap<String, Slot>>,
    ob: RefCell<Option<Observer>>,
    frozen: Cell<bool>,
    extensible: Cell<bool>,
    instance: Cell<bool>,
}

/// A shared mapping of keys to (possibly reactive) fields.
///
/// Clones refer to the same object.
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

/// What a read needs, cloned out so no borrow is held while user code runs.
enum Read {
    Plain(Value),
    Getter(Option<GetFn>),
    Reactive {
        dep: Dep,
        get: Option<GetFn>,
        value: Value,
        child: Option<Observer>,
    },
}

/// What a write needs, cloned out for the same reason.
enum Write {
    Missing,
    Data,
    Accessor(Option<SetFn>),
    Reactive {
        dep: Dep,
        get: Option<GetFn>,
        set: Option<SetFn>,
        current: Value,
        shallow: bool,
    },
}

impl Object {
    pub fn new() -> Self {
        Self(Rc::new(ObjectInner {
            slots: RefCell::new(IndexMap::new()),
            ob: RefCell::new(None),
            frozen: Cell::new(false),
            extensible: Cell::new(true),
            instance: Cell::new(false),
        }))
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read `key`, registering the current watcher with the field.
    ///
    /// When the field holds an observed container, the watcher is also
    /// registered with the container's structural subject, and for arrays
    /// with every observed element.
    pub fn get(&self, key: &str) -> Value {
        match self.read(key) {
            Read::Plain(value) => value,
            Read::Getter(get) => get.map(|get| get()).unwrap_or_default(),
            Read::Reactive {
                dep,
                get,
                value,
                child,
            } => {
                let value = match get {
                    Some(get) => get(),
                    None => value,
                };
                let tracking = dep.runtime().is_some_and(|rt| rt.is_tracking());
                if tracking {
                    dep.depend();
                    if let Some(child) = child {
                        child.dep().depend();
                        if let Value::Array(array) = &value {
                            depend_array(array);
                        }
                    }
                }
                value
            }
        }
    }

    /// Read `key` without registering any dependency.
    pub fn peek(&self, key: &str) -> Value {
        match self.read(key) {
            Read::Plain(value) => value,
            Read::Getter(get) | Read::Reactive { get: get @ Some(_), .. } => {
                get.map(|get| get()).unwrap_or_default()
            }
            Read::Reactive { value, .. } => value,
        }
    }

    fn read(&self, key: &str) -> Read {
        match self.0.slots.borrow().get(key) {
            None => Read::Plain(Value::Null),
            Some(Slot::Data(value)) => Read::Plain(value.clone()),
            Some(Slot::Accessor { get, .. }) => Read::Getter(get.clone()),
            Some(Slot::Reactive(slot)) => Read::Reactive {
                dep: slot.dep.clone(),
                get: slot.storage.get.clone(),
                value: slot.storage.value.clone(),
                child: slot.child.clone(),
            },
        }
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.slots.borrow().keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.slots.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Assign `value` to `key` with plain assignment semantics.
    ///
    /// A reactive field short-circuits on a same-value write, otherwise
    /// stores the value, observes it (unless shallow) and notifies. A
    /// missing key is added as plain, non-reactive data. Writes to frozen
    /// data, getter-only fields and new keys on non-extensible objects are
    /// ignored.
    pub fn assign(&self, key: &str, value: Value) {
        match self.write_target(key) {
            Write::Missing => {
                if self.is_extensible() {
                    self.0
                        .slots
                        .borrow_mut()
                        .insert(key.to_string(), Slot::Data(value));
                }
            }
            Write::Data => {
                if !self.is_frozen() {
                    if let Some(slot) = self.0.slots.borrow_mut().get_mut(key) {
                        *slot = Slot::Data(value);
                    }
                }
            }
            Write::Accessor(set) => {
                if let Some(set) = set {
                    set(value);
                }
            }
            Write::Reactive {
                dep,
                get,
                set,
                current,
                shallow,
            } => {
                let old = match &get {
                    Some(get) => get(),
                    None => current,
                };
                if value.same_value(&old) {
                    return;
                }
                if get.is_some() && set.is_none() {
                    return;
                }
                if let Some(set) = &set {
                    set(value.clone());
                }
                let child = match dep.runtime() {
                    Some(rt) if !shallow => observe(&rt, &value, false),
                    _ => None,
                };
                if let Some(Slot::Reactive(slot)) = self.0.slots.borrow_mut().get_mut(key) {
                    if set.is_none() {
                        slot.storage.value = value;
                    }
                    slot.child = child;
                }
                dep.notify();
            }
        }
    }

    fn write_target(&self, key: &str) -> Write {
        match self.0.slots.borrow().get(key) {
            None => Write::Missing,
            Some(Slot::Data(_)) => Write::Data,
            Some(Slot::Accessor { set, .. }) => Write::Accessor(set.clone()),
            Some(Slot::Reactive(slot)) => Write::Reactive {
                dep: slot.dep.clone(),
                get: slot.storage.get.clone(),
                set: slot.storage.set.clone(),
                current: slot.storage.value.clone(),
                shallow: slot.shallow,
            },
        }
    }

    /// Install a user accessor pair on `key`.
    ///
    /// A later conversion into a reactive field delegates reads and writes
    /// through the pair.
    pub fn define_accessor(
        &self,
        key: &str,
        get: impl Fn() -> Value + 'static,
        set: impl Fn(Value) + 'static,
    ) {
        self.define_slot(
            key,
            Slot::Accessor {
                get: Some(Rc::new(get)),
                set: Some(Rc::new(set)),
            },
        );
    }

    /// Install a read-only computed field on `key`. Such fields are never
    /// made reactive.
    pub fn define_getter(&self, key: &str, get: impl Fn() -> Value + 'static) {
        self.define_slot(
            key,
            Slot::Accessor {
                get: Some(Rc::new(get)),
                set: None,
            },
        );
    }

    fn define_slot(&self, key: &str, slot: Slot) {
        if self.is_frozen() || (!self.contains_key(key) && !self.is_extensible()) {
            return;
        }
        self.0.slots.borrow_mut().insert(key.to_string(), slot);
    }

    /// Add or update `key` so that structural watchers are notified.
    pub fn set(&self, key: &str, value: Value) {
        super::set(&Value::Object(self.clone()), PropKey::from(key), value);
    }

    /// Remove `key` and notify structural watchers.
    pub fn delete(&self, key: &str) {
        super::del(&Value::Object(self.clone()), PropKey::from(key));
    }

    pub(crate) fn remove_slot(&self, key: &str) -> bool {
        self.0.slots.borrow_mut().shift_remove(key).is_some()
    }

    // ------------------------------------------------------------------
    // Reactive internals
    // ------------------------------------------------------------------

    pub(crate) fn with_slots<R>(&self, f: impl FnOnce(&IndexMap<String, Slot>) -> R) -> R {
        f(&self.0.slots.borrow())
    }

    pub(crate) fn insert_slot(&self, key: &str, slot: Slot) {
        self.0.slots.borrow_mut().insert(key.to_string(), slot);
    }

    /// The observation marker, if the object has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.ob.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, ob: Observer) {
        *self.0.ob.borrow_mut() = Some(ob);
    }

    /// Id of the private subject of a reactive field.
    pub fn field_dep_id(&self, key: &str) -> Option<DepId> {
        match self.0.slots.borrow().get(key) {
            Some(Slot::Reactive(slot)) => Some(slot.dep.id()),
            _ => None,
        }
    }

    /// Whether `key` is a reactive field.
    pub fn is_reactive(&self, key: &str) -> bool {
        self.field_dep_id(key).is_some()
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    /// Freeze the object: data fields become read-only, no keys can be
    /// added or removed, and it is never observed or traversed.
    pub fn freeze(&self) {
        self.0.frozen.set(true);
        self.0.extensible.set(false);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    /// Forbid adding new keys. A non-extensible object is never observed.
    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    /// Mark the object as a framework instance: it is never observed, and
    /// structural `set`/`delete` on it are refused.
    pub fn mark_instance(&self) {
        self.0.instance.set(true);
    }

    pub fn is_instance(&self) -> bool {
        self.0.instance.get()
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let object = Object::new();
        {
            let mut slots = object.0.slots.borrow_mut();
            for (key, value) in iter {
                slots.insert(key.into(), Slot::Data(value));
            }
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: values may contain this object.
        f.debug_struct("Object")
            .field("keys", &self.keys())
            .field("observed", &self.0.ob.borrow().is_some())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
