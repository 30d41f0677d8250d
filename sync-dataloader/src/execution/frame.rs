use std::cell::RefCell;
use std::rc::Rc;

use serde_json_bytes::ByteString;

use super::Completed;
use crate::deferred::Deferred;
use crate::deferred::Resolution;
use crate::error::ExecutionError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;

#[derive(Clone)]
enum Slot {
    Filled(Value),
    Omitted,
    Pending,
}

struct FrameState {
    /// Response keys, one per slot. `None` for lists.
    keys: Option<Vec<ByteString>>,
    slots: Vec<Slot>,
    pending: usize,
    sealed: bool,
    bubble: Option<graphql::Error>,
    fatal: Option<ExecutionError>,
    done: Option<Deferred<Completed>>,
}

/// Collects the completed values of one object or list, in selection or index order, whatever
/// order they settle in.
///
/// Slots are reserved as values are pushed. The frame settles once it is sealed and every pending
/// slot is filled.
#[derive(Clone)]
pub(super) struct CompletionFrame {
    state: Rc<RefCell<FrameState>>,
}

impl CompletionFrame {
    pub(super) fn object() -> Self {
        Self::with_keys(Some(Vec::new()))
    }

    pub(super) fn list(len: usize) -> Self {
        let frame = Self::with_keys(None);
        frame.state.borrow_mut().slots.reserve(len);
        frame
    }

    fn with_keys(keys: Option<Vec<ByteString>>) -> Self {
        Self {
            state: Rc::new(RefCell::new(FrameState {
                keys,
                slots: Vec::new(),
                pending: 0,
                sealed: false,
                bubble: None,
                fatal: None,
                done: None,
            })),
        }
    }

    /// Reserves the next slot for `resolution`.
    ///
    /// Returns `false` once a fatal error is recorded: the caller stops pushing.
    pub(super) fn push(&self, key: Option<ByteString>, resolution: Resolution<Completed>) -> bool {
        let index = {
            let mut state = self.state.borrow_mut();
            if let Some(keys) = state.keys.as_mut() {
                keys.push(key.unwrap_or_else(|| ByteString::from("")));
            }
            state.slots.push(Slot::Pending);
            state.slots.len() - 1
        };

        match resolution.settled() {
            Resolution::Ready(completed) => self.state.borrow_mut().write(index, Ok(completed)),
            Resolution::Failed(error) => self.state.borrow_mut().write(index, Err(error)),
            Resolution::Pending(deferred) => {
                self.state.borrow_mut().pending += 1;
                let frame = self.clone();
                deferred.when_done(move |outcome| {
                    frame.resume(index, outcome.cloned().map_err(Clone::clone))
                });
            }
        }
        self.state.borrow().fatal.is_none()
    }

    /// Marks the end of the pushes.
    ///
    /// Returns the completed value directly if nothing is pending.
    pub(super) fn seal(self) -> Resolution<Completed> {
        let mut state = self.state.borrow_mut();
        state.sealed = true;
        if state.pending == 0 || state.fatal.is_some() {
            return state.finish().into();
        }
        let done = Deferred::new();
        state.done = Some(done.clone());
        Resolution::Pending(done)
    }

    fn resume(&self, index: usize, outcome: Result<Completed, ExecutionError>) {
        let finished = {
            let mut state = self.state.borrow_mut();
            state.write(index, outcome);
            state.pending -= 1;
            if state.sealed && (state.pending == 0 || state.fatal.is_some()) {
                state.done.take().map(|done| (done, state.finish()))
            } else {
                None
            }
        };

        if let Some((done, result)) = finished {
            if let Err(error) = done.resolve(result.into()) {
                tracing::error!(%error, "could not settle completion frame");
            }
        }
    }
}

impl FrameState {
    fn write(&mut self, index: usize, outcome: Result<Completed, ExecutionError>) {
        self.slots[index] = match outcome {
            Ok(Completed::Value(value)) => Slot::Filled(value),
            Ok(Completed::Omitted) => Slot::Omitted,
            Ok(Completed::Bubble(error)) => {
                self.bubble.get_or_insert(error);
                Slot::Filled(Value::Null)
            }
            Err(error) => {
                self.fatal.get_or_insert(error);
                Slot::Omitted
            }
        };
    }

    fn finish(&mut self) -> Result<Completed, ExecutionError> {
        if let Some(error) = &self.fatal {
            return Err(error.clone());
        }
        if let Some(error) = self.bubble.take() {
            return Ok(Completed::Bubble(error));
        }

        let slots = std::mem::take(&mut self.slots);
        let value = match self.keys.take() {
            Some(keys) => Value::Object(
                keys.into_iter()
                    .zip(slots)
                    .filter_map(|(key, slot)| match slot {
                        Slot::Filled(value) => Some((key, value)),
                        Slot::Omitted | Slot::Pending => None,
                    })
                    .collect::<Object>(),
            ),
            None => Value::Array(
                slots
                    .into_iter()
                    .map(|slot| match slot {
                        Slot::Filled(value) => value,
                        Slot::Omitted | Slot::Pending => Value::Null,
                    })
                    .collect(),
            ),
        };
        Ok(Completed::Value(value))
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn ready(value: Value) -> Resolution<Completed> {
        Resolution::Ready(Completed::Value(value))
    }

    fn value_of(resolution: Resolution<Completed>) -> Value {
        match resolution.settled() {
            Resolution::Ready(Completed::Value(value)) => value,
            other => panic!("expected a completed value, got {other:?}"),
        }
    }

    #[test]
    fn fast_path_returns_the_value() {
        let frame = CompletionFrame::object();
        assert!(frame.push(Some("a".into()), ready(json!(1))));
        assert!(frame.push(Some("skipped".into()), Resolution::Ready(Completed::Omitted)));
        assert!(frame.push(Some("b".into()), ready(json!("two"))));
        assert_eq!(value_of(frame.seal()), json!({ "a": 1, "b": "two" }));
    }

    #[test]
    fn pending_slots_keep_their_position() {
        let frame = CompletionFrame::object();
        let y = Deferred::new();
        frame.push(Some("x".into()), ready(json!("x")));
        frame.push(Some("y".into()), Resolution::Pending(y.clone()));
        frame.push(Some("z".into()), ready(json!("z")));
        let Resolution::Pending(done) = frame.seal() else {
            panic!("frame should be pending");
        };
        assert!(!done.is_done());

        y.set_result(Completed::Value(json!("y"))).unwrap();
        let Ok(Completed::Value(value)) = done.get_result() else {
            panic!("frame should be complete");
        };
        assert_eq!(value, json!({ "x": "x", "y": "y", "z": "z" }));
        assert_eq!(
            value.as_object().unwrap().keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            vec!["x", "y", "z"]
        );
    }

    #[test]
    fn settling_before_seal_does_not_finish_early() {
        let frame = CompletionFrame::list(2);
        let first = Deferred::new();
        frame.push(None, Resolution::Pending(first.clone()));
        first.set_result(Completed::Value(json!(1))).unwrap();
        frame.push(None, ready(json!(2)));
        assert_eq!(value_of(frame.seal()), json!([1, 2]));
    }

    #[test]
    fn bubbles_wait_for_pending_slots() {
        let frame = CompletionFrame::list(2);
        let pending = Deferred::new();
        frame.push(
            None,
            Resolution::Ready(Completed::Bubble(
                graphql::Error::builder().message("null item").build(),
            )),
        );
        frame.push(None, Resolution::Pending(pending.clone()));
        let Resolution::Pending(done) = frame.seal() else {
            panic!("frame should be pending");
        };
        pending.set_result(Completed::Value(json!(1))).unwrap();
        assert!(matches!(done.get_result(), Ok(Completed::Bubble(error)) if error.message == "null item"));
    }

    #[test]
    fn fatal_errors_short_circuit() {
        let frame = CompletionFrame::object();
        assert!(!frame.push(
            Some("a".into()),
            Resolution::Failed(ExecutionError::IncompleteExecution)
        ));
        assert!(matches!(
            frame.seal(),
            Resolution::Failed(ExecutionError::IncompleteExecution)
        ));
    }
}
