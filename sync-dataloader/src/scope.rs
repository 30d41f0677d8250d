//! The batch scope: a FIFO of pending dispatch callbacks.
//!
//! Loaders do not fetch on `load`. They register a dispatch callback with the scope the first
//! time a key is queued, and the scope drains those callbacks when it exits. Callbacks added
//! while draining (a resolver loading more keys once a batch settles) run in the same drain.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::error::ExecutionError;

type DispatchCallback = Box<dyn FnOnce() -> Result<(), ExecutionError>>;

#[derive(Default)]
struct ScopeState {
    active: bool,
    /// Bumped on every `enter`.
    generation: u64,
    queue: VecDeque<DispatchCallback>,
}

/// A handle to a batch scope.
///
/// Handles are cheap to clone and all refer to the same queue. A scope is created once and
/// shared between the executor and the loaders it serves.
#[derive(Clone, Default)]
pub struct BatchScope {
    state: Rc<RefCell<ScopeState>>,
}

impl fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("BatchScope")
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl BatchScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Number of callbacks waiting to run.
    pub fn len(&self) -> usize {
        self.state.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().queue.is_empty()
    }

    /// Activates the scope.
    ///
    /// Scopes do not nest: entering a scope that is already active is a configuration error.
    pub fn enter(&self) -> Result<ScopeGuard, ExecutionError> {
        let mut state = self.state.borrow_mut();
        if state.active {
            return Err(ExecutionError::Configuration {
                reason: "batch scope is already active".to_string(),
            });
        }
        state.active = true;
        state.generation += 1;
        Ok(ScopeGuard {
            scope: Some(self.clone()),
        })
    }

    /// Identifies the current activation, so that callers can tell whether a callback they
    /// registered earlier may have been discarded since.
    pub(crate) fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Appends a callback to the queue.
    pub fn add_callback<F>(&self, callback: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() -> Result<(), ExecutionError> + 'static,
    {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return Err(ExecutionError::no_active_scope());
        }
        state.queue.push_back(Box::new(callback));
        Ok(())
    }

    /// Runs queued callbacks in FIFO order until the queue is empty.
    ///
    /// Stops at the first callback that returns an error; the remaining callbacks stay queued.
    pub fn drain(&self) -> Result<(), ExecutionError> {
        let mut ran = 0usize;
        loop {
            let next = self.state.borrow_mut().queue.pop_front();
            let Some(callback) = next else {
                break;
            };
            ran += 1;
            callback()?;
        }
        if ran > 0 {
            tracing::trace!(callbacks = ran, "batch scope drained");
        }
        Ok(())
    }

    /// Runs `f` inside the scope, then drains it.
    ///
    /// If `f` fails, queued callbacks are discarded without running.
    pub fn run<R, F>(&self, f: F) -> Result<R, ExecutionError>
    where
        F: FnOnce() -> Result<R, ExecutionError>,
    {
        let guard = self.enter()?;
        let result = f()?;
        guard.exit()?;
        Ok(result)
    }

    fn deactivate(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.active = false;
        let discarded = state.queue.len();
        state.queue.clear();
        discarded
    }
}

/// An active batch scope.
///
/// Call [`ScopeGuard::exit`] to drain the queue. Dropping the guard without exiting deactivates
/// the scope and discards whatever is still queued.
#[must_use = "dropping the guard discards queued dispatches without running them"]
pub struct ScopeGuard {
    scope: Option<BatchScope>,
}

impl ScopeGuard {
    /// Drains the queue, then deactivates the scope.
    pub fn exit(mut self) -> Result<(), ExecutionError> {
        let Some(scope) = self.scope.take() else {
            return Ok(());
        };
        let drained = scope.drain();
        let discarded = scope.deactivate();
        if discarded > 0 {
            tracing::warn!(
                callbacks = discarded,
                "batch scope exited with queued callbacks"
            );
        }
        drained
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            let discarded = scope.deactivate();
            if discarded > 0 {
                tracing::warn!(
                    callbacks = discarded,
                    "batch scope dropped with queued callbacks"
                );
            }
        }
    }
}
