//! Reactive Primitives
//!
//! This module implements dependency tracking: subjects, watchers and the
//! runtime that connects them.
//!
//! # Concepts
//!
//! ## Subjects
//!
//! A [`Dep`] is a publish point guarding one piece of state (a reactive
//! field, a container's structure or a [`Signal`]). When it is read while a
//! watcher is evaluating, the watcher subscribes to it. When the state
//! changes, it notifies every subscriber.
//!
//! ## Watchers
//!
//! A [`Watcher`] is one tracked computation. It evaluates its getter with
//! itself as the current target, records the subjects it touched, and drops
//! the ones it no longer touches. Watchers re-run through the scheduler,
//! inline (`sync`), or on demand (`lazy`, see [`Computed`]).
//!
//! ## Runtime
//!
//! A [`Runtime`] owns all of the above. Subjects and watchers refer to each
//! other by id through the runtime's arenas, never by owning pointers.
//!
//! # Implementation Notes
//!
//! The current target is a stack inside the runtime rather than a global,
//! so nested evaluations restore the outer target and independent runtimes
//! never see each other's reads.

mod computed;
mod context;
mod dep;
mod id;
mod runtime;
mod signal;
mod traverse;
mod watcher;

pub use computed::Computed;
pub use dep::Dep;
pub use id::{DepId, WatcherId};
pub use runtime::{ErrorHandler, Runtime, WeakRuntime};
pub use signal::{SameValue, Signal};
pub use traverse::traverse;
pub use watcher::{Hook, WatchOptions, Watcher};
