//! Synchronous deferred values.
//!
//! A [`Deferred`] is a settle-once container, close to a promise but without any executor:
//! settling it runs every registered callback synchronously, in registration order, before
//! `set_result` returns. Callbacks may settle other deferred values, which is how work resumes
//! once a batch has been fetched.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::rc::Weak;

use static_assertions::assert_not_impl_any;

use crate::error::ExecutionError;

/// A callback invoked once the deferred value settles.
pub type Callback<T> = Box<dyn FnOnce(Result<&T, &ExecutionError>)>;

/// Runs the batch that will settle a deferred value, ahead of the scope draining it.
pub type DispatchHint = Rc<dyn Fn() -> Result<(), ExecutionError>>;

enum State<T> {
    Pending,
    /// Settled with another deferred value that has not settled yet.
    Forwarded(Weak<RefCell<Inner<T>>>),
    Settled(T),
    Failed(ExecutionError),
}

struct Inner<T> {
    state: State<T>,
    callbacks: Vec<Callback<T>>,
    dispatch_hint: Option<DispatchHint>,
}

/// A value that will be available later in the same synchronous execution.
///
/// Cloning a `Deferred` clones the handle: every clone observes the same state.
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

assert_not_impl_any!(Deferred<()>: Send, Sync);

/// Either a value that is already known, or one that is still deferred.
pub enum Resolution<T> {
    Ready(T),
    Failed(ExecutionError),
    Pending(Deferred<T>),
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let state = match inner.state {
            State::Pending => "pending",
            State::Forwarded(_) => "forwarded",
            State::Settled(_) => "settled",
            State::Failed(_) => "failed",
        };
        f.debug_struct("Deferred")
            .field("state", &state)
            .field("callbacks", &inner.callbacks.len())
            .finish()
    }
}

impl<T: Clone + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self::with_state(State::Pending)
    }

    /// Creates a deferred value that is already settled.
    pub fn ready(value: T) -> Self {
        Self::with_state(State::Settled(value))
    }

    /// Creates a deferred value that has already failed.
    pub fn failed(error: impl Into<ExecutionError>) -> Self {
        Self::with_state(State::Failed(error.into()))
    }

    fn with_state(state: State<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state,
                callbacks: Vec::new(),
                dispatch_hint: None,
            })),
        }
    }

    /// Returns `true` once the value is settled or failed.
    pub fn is_done(&self) -> bool {
        matches!(
            self.inner.borrow().state,
            State::Settled(_) | State::Failed(_)
        )
    }

    /// Returns the settled value, or the error the value failed with.
    ///
    /// Reading a value that is not done is an [`ExecutionError::InvalidState`].
    pub fn get_result(&self) -> Result<T, ExecutionError> {
        self.outcome()
            .unwrap_or_else(|| Err(ExecutionError::invalid_state("deferred value is not done")))
    }

    /// Returns the error the value failed with, if it did.
    pub fn error(&self) -> Option<ExecutionError> {
        match &self.inner.borrow().state {
            State::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns the outcome if the value is done.
    pub fn outcome(&self) -> Option<Result<T, ExecutionError>> {
        match &self.inner.borrow().state {
            State::Settled(value) => Some(Ok(value.clone())),
            State::Failed(error) => Some(Err(error.clone())),
            State::Pending | State::Forwarded(_) => None,
        }
    }

    /// Registers a callback that runs when the value settles.
    ///
    /// Registering on a value that is already done is an [`ExecutionError::InvalidState`]: check
    /// [`Deferred::is_done`] first, or use [`Deferred::when_done`].
    pub fn on_done<F>(&self, callback: F) -> Result<(), ExecutionError>
    where
        F: FnOnce(Result<&T, &ExecutionError>) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            State::Pending | State::Forwarded(_) => {
                inner.callbacks.push(Box::new(callback));
                Ok(())
            }
            State::Settled(_) | State::Failed(_) => Err(ExecutionError::invalid_state(
                "cannot register a callback on a deferred value that is already done",
            )),
        }
    }

    /// Runs `callback` now if the value is done, otherwise when it settles.
    pub fn when_done<F>(&self, callback: F)
    where
        F: FnOnce(Result<&T, &ExecutionError>) + 'static,
    {
        match self.outcome() {
            Some(outcome) => callback(outcome.as_ref()),
            None => self.inner.borrow_mut().callbacks.push(Box::new(callback)),
        }
    }

    /// Settles the value and runs the registered callbacks.
    pub fn set_result(&self, value: T) -> Result<(), ExecutionError> {
        self.assert_pending()?;
        self.finish(Ok(value));
        Ok(())
    }

    /// Fails the value and runs the registered callbacks.
    pub fn set_error(&self, error: impl Into<ExecutionError>) -> Result<(), ExecutionError> {
        self.assert_pending()?;
        self.finish(Err(error.into()));
        Ok(())
    }

    /// Settles the value with whatever `other` settles with.
    ///
    /// If `other` is not done yet this value stays pending until it is; chains of deferred values
    /// are flattened transitively. Settling a value with itself, directly or through a chain, is
    /// an [`ExecutionError::InvalidState`].
    pub fn set_deferred(&self, other: &Deferred<T>) -> Result<(), ExecutionError> {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return Err(ExecutionError::invalid_state(
                "cannot resolve a deferred value with itself",
            ));
        }
        self.assert_pending()?;

        let mut cursor = other.inner.clone();
        loop {
            let next = match &cursor.borrow().state {
                State::Forwarded(target) => target.upgrade(),
                _ => None,
            };
            match next {
                Some(next) if Rc::ptr_eq(&next, &self.inner) => {
                    return Err(ExecutionError::invalid_state(
                        "cannot resolve a deferred value with a chain leading back to itself",
                    ));
                }
                Some(next) => cursor = next,
                None => break,
            }
        }

        if let Some(outcome) = other.outcome() {
            self.finish(outcome);
            return Ok(());
        }

        self.inner.borrow_mut().state = State::Forwarded(Rc::downgrade(&other.inner));
        let this = self.clone();
        other.inner.borrow_mut().callbacks.push(Box::new(move |outcome| {
            this.finish(outcome.cloned().map_err(Clone::clone));
        }));
        Ok(())
    }

    /// Settles the value from a [`Resolution`].
    pub fn resolve(&self, resolution: Resolution<T>) -> Result<(), ExecutionError> {
        match resolution {
            Resolution::Ready(value) => self.set_result(value),
            Resolution::Failed(error) => self.set_error(error),
            Resolution::Pending(other) => self.set_deferred(&other),
        }
    }

    /// Returns a deferred value settled with `transform` applied to this value.
    ///
    /// If this value fails, or `transform` returns an error, the returned value fails with that
    /// error.
    pub fn then<U, F>(&self, transform: F) -> Deferred<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, ExecutionError> + 'static,
    {
        self.chain(move |outcome| match outcome.and_then(transform) {
            Ok(value) => Resolution::Ready(value),
            Err(error) => Resolution::Failed(error),
        })
    }

    /// Like [`Deferred::then`], for a `transform` that itself returns a deferred value.
    pub fn and_then<U, F>(&self, transform: F) -> Deferred<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Deferred<U>, ExecutionError> + 'static,
    {
        self.chain(move |outcome| match outcome.and_then(transform) {
            Ok(next) => Resolution::Pending(next),
            Err(error) => Resolution::Failed(error),
        })
    }

    fn chain<U, F>(&self, next: F) -> Deferred<U>
    where
        U: Clone + 'static,
        F: FnOnce(Result<T, ExecutionError>) -> Resolution<U> + 'static,
    {
        let chained = Deferred::new();
        let target = chained.clone();
        self.when_done(move |outcome| {
            let outcome = outcome.cloned().map_err(Clone::clone);
            if let Err(error) = target.resolve(next(outcome)) {
                tracing::error!(%error, "could not settle chained deferred value");
            }
        });
        chained
    }

    /// Waits for every value and settles with their results, in order.
    ///
    /// Fails with the first error met, in settlement order.
    pub fn join_all(values: Vec<Deferred<T>>) -> Deferred<Vec<T>> {
        let joined = Deferred::new();
        if values.is_empty() {
            let _ = joined.set_result(Vec::new());
            return joined;
        }

        let state = Rc::new(RefCell::new(JoinState {
            results: vec![None; values.len()],
            remaining: values.len(),
        }));
        for (index, value) in values.into_iter().enumerate() {
            let state = state.clone();
            let joined = joined.clone();
            value.when_done(move |outcome| {
                if joined.is_done() {
                    return;
                }
                let value = match outcome {
                    Ok(value) => value.clone(),
                    Err(error) => {
                        let _ = joined.set_error(error.clone());
                        return;
                    }
                };
                let results = {
                    let mut state = state.borrow_mut();
                    state.results[index] = Some(value);
                    state.remaining -= 1;
                    if state.remaining > 0 {
                        return;
                    }
                    std::mem::take(&mut state.results)
                };
                let _ = joined.set_result(results.into_iter().flatten().collect());
            });
        }
        joined
    }

    /// Attaches a hint that dispatches the batch this value waits on.
    pub fn set_dispatch_hint(&self, hint: DispatchHint) {
        self.inner.borrow_mut().dispatch_hint = Some(hint);
    }

    pub fn dispatch_hint(&self) -> Option<DispatchHint> {
        self.inner.borrow().dispatch_hint.clone()
    }

    pub(crate) fn ptr_eq(&self, other: &Deferred<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn assert_pending(&self) -> Result<(), ExecutionError> {
        match self.inner.borrow().state {
            State::Pending => Ok(()),
            State::Forwarded(_) => Err(ExecutionError::invalid_state(
                "deferred value is already resolved with another deferred value",
            )),
            State::Settled(_) | State::Failed(_) => Err(ExecutionError::invalid_state(
                "deferred value is already done",
            )),
        }
    }

    fn finish(&self, outcome: Result<T, ExecutionError>) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            inner.state = match &outcome {
                Ok(value) => State::Settled(value.clone()),
                Err(error) => State::Failed(error.clone()),
            };
            inner.dispatch_hint = None;
            std::mem::take(&mut inner.callbacks)
        };
        for callback in callbacks {
            callback(outcome.as_ref());
        }
    }
}

struct JoinState<T> {
    results: Vec<Option<T>>,
    remaining: usize,
}

impl<T: Clone + 'static> Resolution<T> {
    /// Feeds the outcome to `next` once it is known.
    ///
    /// Ready and failed outcomes are handled immediately, without allocating a deferred value.
    pub fn chain<U, F>(self, next: F) -> Resolution<U>
    where
        U: Clone + 'static,
        F: FnOnce(Result<T, ExecutionError>) -> Resolution<U> + 'static,
    {
        match self {
            Resolution::Ready(value) => next(Ok(value)),
            Resolution::Failed(error) => next(Err(error)),
            Resolution::Pending(deferred) => match deferred.outcome() {
                Some(outcome) => next(outcome),
                None => Resolution::Pending(deferred.chain(next)),
            },
        }
    }

    /// Collapses a pending resolution whose value is already done.
    pub fn settled(self) -> Resolution<T> {
        match self {
            Resolution::Pending(deferred) => match deferred.outcome() {
                Some(Ok(value)) => Resolution::Ready(value),
                Some(Err(error)) => Resolution::Failed(error),
                None => Resolution::Pending(deferred),
            },
            other => other,
        }
    }
}

impl<T> From<Deferred<T>> for Resolution<T> {
    fn from(deferred: Deferred<T>) -> Self {
        Resolution::Pending(deferred)
    }
}

impl<T> From<Result<T, ExecutionError>> for Resolution<T> {
    fn from(result: Result<T, ExecutionError>) -> Self {
        match result {
            Ok(value) => Resolution::Ready(value),
            Err(error) => Resolution::Failed(error),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Resolution::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
            Resolution::Pending(deferred) => f.debug_tuple("Pending").field(deferred).finish(),
        }
    }
}
