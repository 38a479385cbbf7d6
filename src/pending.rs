// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! The table of outstanding `remote_call`s an endpoint is waiting on a `FUTURE` for.
//!
//! Kept local to the calling endpoint's process, never serialized: only `call_id` crosses the
//! wire, the `oneshot::Sender` that actually resumes the caller's awaiting task never does.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::envelope::CallId;
use crate::errors::CallError;

type PendingSlot = oneshot::Sender<Result<Value, CallError>>;

/// Not `Send`: pending calls live on the single task-local event loop of one endpoint's process,
/// alongside all its other `Rc<RefCell<..>>` state.
#[derive(Default)]
pub struct PendingCallTable {
    inner: RefCell<HashMap<CallId, PendingSlot>>,
}

impl PendingCallTable {
    pub fn new() -> Rc<Self> {
        Rc::new(PendingCallTable::default())
    }

    /// Registers `call_id` as awaiting a reply, returning the receiving half the caller should
    /// await.
    pub fn register(&self, call_id: CallId) -> oneshot::Receiver<Result<Value, CallError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.borrow_mut().insert(call_id, tx);
        rx
    }

    /// Removes `call_id`'s registration without resolving it, e.g. when a caller's own timeout
    /// elapses before a `FUTURE` shows up.
    pub fn cancel(&self, call_id: CallId) {
        self.inner.borrow_mut().remove(&call_id);
    }

    /// Resolves the call named by an incoming `FUTURE` envelope. A missing `call_id` is not an
    /// error here — it means the caller already gave up (timed out or was dropped) — so this is
    /// silently a no-op in that case.
    pub fn resolve(&self, call_id: CallId, result: Result<Value, CallError>) {
        if let Some(tx) = self.inner.borrow_mut().remove(&call_id) {
            let _ = tx.send(result);
        }
    }

    /// Fails every outstanding call with `CallError::EndpointShutDown`. Called once, while the
    /// endpoint is tearing itself down.
    pub fn fail_all(&self) {
        for (_, tx) in self.inner.borrow_mut().drain() {
            let _ = tx.send(Err(CallError::EndpointShutDown));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
