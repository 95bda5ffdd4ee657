//! Purpose: Single-shot completion handle for method and tool handlers.
//! Exports: `Completion`, `CompletionGuard`, `MethodResult`.
//! Role: Carries a handler's result back to whichever transport issued the request.
//! Invariants: The wrapped callback runs at most once; later attempts are no-ops.
//! Invariants: Dropping an unfired handle outside a panic reports an internal error,
//! so every dispatched request produces exactly one response.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::protocol::JsonRpcError;

pub type MethodResult = Result<serde_json::Value, JsonRpcError>;

type Callback = Box<dyn FnOnce(MethodResult) + Send + 'static>;
type Slot = Arc<Mutex<Option<Callback>>>;

pub struct Completion {
    slot: Slot,
}

impl Completion {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(MethodResult) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    pub fn complete(self, result: MethodResult) {
        fire(&self.slot, result);
    }

    pub fn succeed(self, value: serde_json::Value) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: JsonRpcError) {
        self.complete(Err(error));
    }

    /// Wrap this completion so its result passes through `map` first.
    pub fn map<F>(self, map: F) -> Completion
    where
        F: FnOnce(MethodResult) -> MethodResult + Send + 'static,
    {
        Completion::new(move |result| self.complete(map(result)))
    }

    /// A second handle on the same slot, used by the dispatcher to answer for a
    /// handler that panicked while holding the completion.
    pub(crate) fn guard(&self) -> CompletionGuard {
        CompletionGuard {
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn is_pending(&self) -> bool {
        is_pending(&self.slot)
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if std::thread::panicking() || !is_pending(&self.slot) {
            return;
        }
        warn!("completion dropped without a result");
        fire(
            &self.slot,
            Err(JsonRpcError::internal_error(
                "Internal error: request was dropped before completion",
            )),
        );
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.is_pending())
            .finish()
    }
}

pub(crate) struct CompletionGuard {
    slot: Slot,
}

impl CompletionGuard {
    /// Fire only if nobody else has. Returns whether this call delivered the result.
    pub(crate) fn complete_if_pending(&self, result: MethodResult) -> bool {
        fire(&self.slot, result)
    }
}

fn fire(slot: &Slot, result: MethodResult) -> bool {
    let callback = slot
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .take();
    match callback {
        Some(callback) => {
            callback(result);
            true
        }
        None => false,
    }
}

fn is_pending(slot: &Slot) -> bool {
    slot.lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::Completion;
    use crate::mcp::protocol::{INTERNAL_ERROR_CODE, JsonRpcError};
    use serde_json::json;
    use std::sync::mpsc;

    #[test]
    fn complete_delivers_once() {
        let (tx, rx) = mpsc::channel();
        let completion = Completion::new(move |result| {
            tx.send(result).expect("send");
        });
        let guard = completion.guard();
        completion.succeed(json!({"ok": true}));
        assert!(!guard.complete_if_pending(Err(JsonRpcError::internal_error("late"))));

        let results: Vec<_> = rx.try_iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], Ok(json!({"ok": true})));
    }

    #[test]
    fn dropping_unfired_completion_reports_internal_error() {
        let (tx, rx) = mpsc::channel();
        let completion = Completion::new(move |result| {
            tx.send(result).expect("send");
        });
        drop(completion);
        let error = rx.recv().expect("result").expect_err("error");
        assert_eq!(error.code, INTERNAL_ERROR_CODE);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn map_transforms_result() {
        let (tx, rx) = mpsc::channel();
        let completion = Completion::new(move |result| {
            tx.send(result).expect("send");
        })
        .map(|result| result.map(|value| json!({ "wrapped": value })));
        completion.succeed(json!(1));
        assert_eq!(rx.recv().expect("result"), Ok(json!({"wrapped": 1})));
    }
}
