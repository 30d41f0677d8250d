//! Batch loaders: per-key caching and request coalescing on top of [`Deferred`] values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::rc::Weak;

use crate::configuration::Configuration;
use crate::deferred::Deferred;
use crate::deferred::DispatchHint;
use crate::error::ExecutionError;
use crate::error::FieldError;
use crate::scope::BatchScope;

/// What a batch function returns: one result per key, in key order, or an error for the whole
/// batch.
pub type BatchResult<V> = Result<Vec<Result<V, FieldError>>, FieldError>;

/// Fetches many keys at once.
///
/// Implementations must return exactly one entry per key, in the order the keys were given.
pub trait BatchFn<K, V> {
    fn fetch(&self, keys: &[K]) -> BatchResult<V>;
}

impl<K, V, F> BatchFn<K, V> for F
where
    F: Fn(&[K]) -> BatchResult<V>,
{
    fn fetch(&self, keys: &[K]) -> BatchResult<V> {
        self(keys)
    }
}

struct LoaderState<K, V> {
    cache: HashMap<K, Deferred<V>>,
    queue: Vec<(K, Deferred<V>)>,
    /// Scope generation in which a dispatch callback was last registered.
    scheduled: Option<u64>,
}

struct LoaderInner<K, V> {
    scope: BatchScope,
    batch_fn: Box<dyn BatchFn<K, V>>,
    max_batch_size: Option<usize>,
    state: RefCell<LoaderState<K, V>>,
}

/// Loads values by key, coalescing every key requested during one synchronous pass into a single
/// call to the batch function.
///
/// Clones share the same cache and queue.
pub struct BatchLoader<K, V> {
    inner: Rc<LoaderInner<K, V>>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> fmt::Debug for BatchLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("BatchLoader")
            .field("cached", &state.cache.len())
            .field("queued", &state.queue.len())
            .field("max_batch_size", &self.inner.max_batch_size)
            .finish()
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
    V: Clone + 'static,
{
    /// Creates a loader that registers its dispatches with `scope`.
    pub fn new<F>(scope: &BatchScope, batch_fn: F) -> Self
    where
        F: Fn(&[K]) -> BatchResult<V> + 'static,
    {
        Self::with_batch_fn(scope, batch_fn)
    }

    pub fn with_batch_fn(scope: &BatchScope, batch_fn: impl BatchFn<K, V> + 'static) -> Self {
        Self {
            inner: Rc::new(LoaderInner {
                scope: scope.clone(),
                batch_fn: Box::new(batch_fn),
                max_batch_size: None,
                state: RefCell::new(LoaderState {
                    cache: HashMap::new(),
                    queue: Vec::new(),
                    scheduled: None,
                }),
            }),
        }
    }

    /// Creates a loader with the batching options of `configuration`.
    pub fn from_configuration<F>(
        scope: &BatchScope,
        configuration: &Configuration,
        batch_fn: F,
    ) -> Self
    where
        F: Fn(&[K]) -> BatchResult<V> + 'static,
    {
        let loader = Self::new(scope, batch_fn);
        match configuration.batching.max_batch_size {
            Some(size) => loader.with_max_batch_size(size),
            None => loader,
        }
    }

    /// Splits dispatches into calls of at most `size` keys. A size of zero is ignored.
    pub fn with_max_batch_size(self, size: usize) -> Self {
        let max_batch_size = (size > 0).then_some(size);
        match Rc::try_unwrap(self.inner) {
            Ok(inner) => Self {
                inner: Rc::new(LoaderInner {
                    max_batch_size,
                    ..inner
                }),
            },
            Err(inner) => {
                tracing::warn!("max batch size can only be set before the loader is shared");
                Self { inner }
            }
        }
    }

    /// Returns the deferred value for `key`, queueing it for the next dispatch if it is not
    /// cached yet.
    ///
    /// Fails with [`ExecutionError::Configuration`] if the key must be queued and the loader's
    /// scope is not active. Nothing is cached or queued in that case.
    pub fn load(&self, key: K) -> Result<Deferred<V>, ExecutionError> {
        let cached = self.inner.state.borrow().cache.get(&key).cloned();
        if let Some(cached) = cached {
            // keys left queued by an aborted drain still need a dispatch
            if self.inner.scope.is_active() && !self.inner.state.borrow().queue.is_empty() {
                self.schedule()?;
            }
            return Ok(cached);
        }

        self.schedule()?;

        let deferred = Deferred::new();
        deferred.set_dispatch_hint(self.dispatch_hint());
        let mut state = self.inner.state.borrow_mut();
        state.queue.push((key.clone(), deferred.clone()));
        state.cache.insert(key, deferred.clone());
        Ok(deferred)
    }

    /// Registers a dispatch with the scope unless one is already registered in its current
    /// activation.
    fn schedule(&self) -> Result<(), ExecutionError> {
        let generation = self.inner.scope.generation();
        if self.inner.state.borrow().scheduled == Some(generation) {
            return Ok(());
        }
        let loader = self.clone();
        self.inner.scope.add_callback(move || loader.dispatch())?;
        self.inner.state.borrow_mut().scheduled = Some(generation);
        Ok(())
    }

    /// Loads every key; the returned value settles with the results in key order.
    pub fn load_many(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Deferred<Vec<V>>, ExecutionError> {
        let values = keys
            .into_iter()
            .map(|key| self.load(key))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Deferred::join_all(values))
    }

    /// Removes `key` from the cache. A queued request for it is still dispatched.
    pub fn clear(&self, key: &K) -> &Self {
        self.inner.state.borrow_mut().cache.remove(key);
        self
    }

    /// Empties the cache.
    pub fn clear_all(&self) -> &Self {
        self.inner.state.borrow_mut().cache.clear();
        self
    }

    /// Caches `value` for `key` unless the key is already cached.
    pub fn prime(&self, key: K, value: V) -> &Self {
        self.inner
            .state
            .borrow_mut()
            .cache
            .entry(key)
            .or_insert_with(|| Deferred::ready(value));
        self
    }

    /// Returns `true` if `key` has a cached (possibly still pending) value.
    pub fn is_cached(&self, key: &K) -> bool {
        self.inner.state.borrow().cache.contains_key(key)
    }

    /// Fetches every queued key and settles their deferred values.
    ///
    /// Does nothing if the queue is empty. Per-key errors and a failing batch function settle
    /// the affected values with an error. A batch function returning the wrong number of results
    /// fails every value of that call and returns [`ExecutionError::BatchContract`].
    pub fn dispatch(&self) -> Result<(), ExecutionError> {
        let queue = {
            let mut state = self.inner.state.borrow_mut();
            state.scheduled = None;
            std::mem::take(&mut state.queue)
        };
        if queue.is_empty() {
            return Ok(());
        }

        let chunk_size = self.inner.max_batch_size.unwrap_or(queue.len());
        let mut first_error = None;
        let mut queue = queue.into_iter();
        loop {
            let batch: Vec<(K, Deferred<V>)> = queue.by_ref().take(chunk_size).collect();
            if batch.is_empty() {
                break;
            }
            if let Err(error) = self.dispatch_batch(batch) {
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn dispatch_batch(&self, batch: Vec<(K, Deferred<V>)>) -> Result<(), ExecutionError> {
        let keys: Vec<K> = batch.iter().map(|(key, _)| key.clone()).collect();
        tracing::debug!(batch_size = keys.len(), "dispatching batch");

        let results = match self.inner.batch_fn.fetch(&keys) {
            Ok(results) => results,
            Err(error) => {
                tracing::warn!(%error, batch_size = keys.len(), "batch function failed");
                self.fail_batch(&batch, &error)?;
                return Ok(());
            }
        };

        if results.len() != batch.len() {
            let reason = format!(
                "expected {} results, got {}",
                batch.len(),
                results.len()
            );
            tracing::warn!(%reason, "batch function broke its contract");
            let error = FieldError::new(format!("batch function broke its contract: {reason}"));
            self.fail_batch(&batch, &error)?;
            return Err(ExecutionError::BatchContract { reason });
        }

        for ((key, deferred), result) in batch.into_iter().zip(results) {
            tracing::trace!(?key, ok = result.is_ok(), "settling batched key");
            match result {
                Ok(value) => deferred.set_result(value)?,
                Err(error) => deferred.set_error(error)?,
            }
        }
        Ok(())
    }

    /// Evicts every key of the batch and fails its value with `error`.
    fn fail_batch(
        &self,
        batch: &[(K, Deferred<V>)],
        error: &FieldError,
    ) -> Result<(), ExecutionError> {
        {
            let mut state = self.inner.state.borrow_mut();
            for (key, deferred) in batch {
                if state
                    .cache
                    .get(key)
                    .is_some_and(|cached| cached.ptr_eq(deferred))
                {
                    state.cache.remove(key);
                }
            }
        }
        for (_, deferred) in batch {
            deferred.set_error(error.clone())?;
        }
        Ok(())
    }

    fn dispatch_hint(&self) -> DispatchHint {
        let loader: Weak<LoaderInner<K, V>> = Rc::downgrade(&self.inner);
        Rc::new(move || match loader.upgrade() {
            Some(inner) => BatchLoader { inner }.dispatch(),
            None => Ok(()),
        })
    }
}
