//! Deep Traversal
//!
//! `traverse` reads every reachable field of a value so that the watcher
//! currently collecting dependencies subscribes to the whole subtree rather
//! than just the fields its getter happened to touch.

use std::collections::HashSet;

use crate::observer::Value;

/// Touch every nested field of `value`.
///
/// Frozen containers and opaque values are skipped. Containers are
/// remembered by address for the duration of this call, so cycles
/// terminate, containers observed by different runtimes never alias, and
/// a later traversal starts fresh.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(object) => {
            if object.is_frozen() || !seen.insert(object.addr()) {
                return;
            }
            for name in object.keys() {
                walk(&object.get(&name), seen);
            }
        }
        Value::Array(array) => {
            if array.is_frozen() || !seen.insert(array.addr()) {
                return;
            }
            for item in array.to_vec() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}
