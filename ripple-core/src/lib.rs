//! Ripple Core
//!
//! A fine-grained reactive state engine. It tracks which computations read
//! which pieces of state, and re-runs exactly the affected computations
//! when that state changes, batched and deduplicated into one flush per
//! tick.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observer`: the dynamic value model and its conversion into reactive
//!   fields, structural `set`/`del`, and array mutators
//! - `reactive`: subjects, watchers, computed values, signals and the
//!   runtime that owns them
//! - `scheduler`: the watcher queue and the deferred tick queue
//! - `config`: runtime tunables
//! - `error`: the error types shared by all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::prelude::*;
//!
//! let rt = Runtime::default();
//! let state = Object::from_iter([("x", Value::from(1.0)), ("y", Value::from(2.0))]);
//! rt.observe(&Value::Object(state.clone()));
//!
//! let s = state.clone();
//! let _sum = rt.watch(
//!     move || {
//!         let x = s.get("x").as_f64().unwrap_or_default();
//!         let y = s.get("y").as_f64().unwrap_or_default();
//!         Ok(Value::from(x + y))
//!     },
//!     |new, old| {
//!         println!("sum changed from {old:?} to {new:?}");
//!         Ok(())
//!     },
//!     WatchOptions::new(),
//! )?;
//!
//! state.assign("x", Value::from(3.0));
//! state.assign("y", Value::from(4.0));
//! // Both writes land in a single flush: "sum changed from 3 to 7"
//! rt.run_until_idle()?;
//! ```

pub mod config;
pub mod error;
pub mod observer;
pub mod reactive;
pub mod scheduler;

pub use config::RuntimeConfig;
pub use error::{EvalError, EvalResult, ReactiveError};
pub use observer::{Array, Object, Value};
pub use reactive::{Computed, Runtime, Signal, WatchOptions, Watcher};

/// Commonly used types.
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{EvalError, EvalResult, ReactiveError};
    pub use crate::observer::{Array, Object, PropKey, Value};
    pub use crate::reactive::{Computed, Runtime, SameValue, Signal, WatchOptions, Watcher};
    pub use crate::scheduler::TickDriver;
}
