//! Error Types
//!
//! Errors fall into two channels:
//!
//! - **Recoverable**: a user getter, a user callback or a tick callback
//!   failed. These are routed through [`Runtime::handle_error`] and never
//!   interrupt a flush.
//! - **Propagated / fatal**: an internal (non-user) evaluation failed, or a
//!   flush exceeded its update cap. These are returned to the caller.
//!
//! [`Runtime::handle_error`]: crate::reactive::Runtime::handle_error

use crate::reactive::{DepId, WatcherId};

/// Error type returned by user-supplied getters and callbacks.
pub type EvalError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of evaluating a user computation.
pub type EvalResult<T = crate::observer::Value> = Result<T, EvalError>;

/// Errors produced by the reactive runtime.
#[derive(Debug, thiserror::Error)]
pub enum ReactiveError {
    /// A user watcher's getter failed.
    #[error("error in getter for watcher \"{expression}\": {source}")]
    Getter {
        expression: String,
        #[source]
        source: EvalError,
    },

    /// A user watcher's callback failed.
    #[error("error in callback for watcher \"{expression}\": {source}")]
    Callback {
        expression: String,
        #[source]
        source: EvalError,
    },

    /// A callback queued with `next_tick` failed.
    #[error("error in nextTick: {source}")]
    NextTick {
        #[source]
        source: EvalError,
    },

    /// An internal (non-user) computation failed. Propagated to the caller.
    #[error("evaluation of \"{expression}\" failed: {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: EvalError,
    },

    /// A flush scheduled the same watcher more than the configured cap.
    #[error(
        "infinite update loop in watcher \"{expression}\" ({id}): \
         scheduled more than {limit} times in one flush"
    )]
    InfiniteUpdateLoop {
        id: WatcherId,
        expression: String,
        limit: usize,
    },

    /// A signal was written while a `with` closure was borrowing it.
    #[error("{dep} was written while it is being read; the write was dropped")]
    SignalBorrowed { dep: DepId },

    /// A handle was used after its runtime was dropped.
    #[error("the reactive runtime has been dropped")]
    RuntimeDropped,
}

impl ReactiveError {
    /// Whether this error belongs on the recoverable channel.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReactiveError::Getter { .. }
                | ReactiveError::Callback { .. }
                | ReactiveError::NextTick { .. }
                | ReactiveError::SignalBorrowed { .. }
        )
    }

    /// Whether this error signals a runaway update cycle.
    pub fn is_update_loop(&self) -> bool {
        matches!(self, ReactiveError::InfiniteUpdateLoop { .. })
    }
}
