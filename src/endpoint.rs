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

//! The handle business logic uses to talk back to the rest of the system, and the per-state
//! dispatch table that answers incoming `CALL`s.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{trace, warn};
use serde_json::Value;

use crate::envelope::{CallId, Envelope, RoutedEnvelope};
use crate::errors::CallError;
use crate::mailbox::ChannelWriter;
use crate::pending::PendingCallTable;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// A handle for sending messages and issuing remote calls, shared (via `Rc`) by an endpoint's
/// own run loop and by every method a [`MethodRegistry`] dispatches on its behalf. Not `Send`:
/// every endpoint lives entirely on one process's single-threaded event loop.
#[derive(Clone)]
pub struct Endpoint {
    inner: Rc<EndpointCore>,
}

struct EndpointCore {
    name: String,
    uplink: ChannelWriter<RoutedEnvelope>,
    pending: Rc<PendingCallTable>,
    next_call_id: Cell<CallId>,
    last_seen: Cell<Instant>,
}

impl Endpoint {
    pub fn new(name: String, uplink: ChannelWriter<RoutedEnvelope>, pending: Rc<PendingCallTable>) -> Self {
        Endpoint {
            inner: Rc::new(EndpointCore {
                name,
                uplink,
                pending,
                next_call_id: Cell::new(0),
                last_seen: Cell::new(Instant::now()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Records that an envelope was just received, per §4.3's "any envelope counts as a sign of
    /// life" rule. Workers compare this against their watchdog deadline.
    pub fn touch(&self) {
        self.inner.last_seen.set(Instant::now());
    }

    pub fn last_seen_at(&self) -> Instant {
        self.inner.last_seen.get()
    }

    fn offer(&self, recipient: &str, envelope: Envelope) -> Result<(), CallError> {
        trace!("endpoint '{}': sending {} to '{}'", self.inner.name, envelope.tag(), recipient);
        let routed = RoutedEnvelope {
            recipient: recipient.to_owned(),
            envelope,
        };
        self.inner.uplink.try_send(&routed).map_err(|_| CallError::TransportFull {
            recipient: recipient.to_owned(),
        })
    }

    /// Traces one inbound envelope at the same verbosity as `offer`'s outbound trace and the
    /// router's own per-envelope log (`router.rs`), so that with logging configured for debug,
    /// both the router and every endpoint account for every envelope that passes through it.
    pub fn note_received(&self, envelope: &Envelope) {
        trace!("endpoint '{}': received {}", self.inner.name, envelope.tag());
    }

    /// Fire-and-forget send. Fails only if the router's uplink queue is saturated.
    pub fn send_message(&self, recipient: &str, payload: Value) -> Result<(), CallError> {
        self.offer(recipient, Envelope::Message(payload))
    }

    /// Issues a `CALL` to `recipient` and awaits its matching `FUTURE`, with no deadline.
    pub async fn remote_call(&self, recipient: &str, method: &str, args: Value, kwargs: Value) -> Result<Value, CallError> {
        let call_id = self.inner.next_call_id.get();
        self.inner.next_call_id.set(call_id + 1);

        let rx = self.inner.pending.register(call_id);
        let envelope = Envelope::Call {
            method: method.to_owned(),
            args,
            kwargs,
            call_id,
            reply_to: self.inner.name.clone(),
        };
        if let Err(e) = self.offer(recipient, envelope) {
            self.inner.pending.cancel(call_id);
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CallError::EndpointShutDown),
        }
    }

    /// As [`Endpoint::remote_call`], but gives up with `CallError::Timeout` after `deadline`.
    pub async fn remote_call_with_timeout(
        &self,
        recipient: &str,
        method: &str,
        args: Value,
        kwargs: Value,
        deadline: Duration,
    ) -> Result<Value, CallError> {
        match tokio::time::timeout(deadline, self.remote_call(recipient, method, args, kwargs)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout),
        }
    }

    /// Answers an incoming `CALL` with a successful result.
    pub fn reply_ok(&self, reply_to: &str, call_id: CallId, value: Value) {
        let envelope = Envelope::Future { call_id, ok: true, value };
        if self.offer(reply_to, envelope).is_err() {
            warn!("dropped FUTURE reply to '{}' (call_id {}): router uplink full", reply_to, call_id);
        }
    }

    /// Answers an incoming `CALL` with a failure, encoding `err` as the `FUTURE`'s value.
    pub fn reply_err(&self, reply_to: &str, call_id: CallId, err: CallError) {
        let descriptor = err.into_descriptor();
        let value = serde_json::to_value(&descriptor).unwrap_or_else(|_| Value::Null);
        let envelope = Envelope::Future { call_id, ok: false, value };
        if self.offer(reply_to, envelope).is_err() {
            warn!("dropped FUTURE error reply to '{}' (call_id {}): router uplink full", reply_to, call_id);
        }
    }

    /// Resolves a locally pending call from an incoming `FUTURE` envelope.
    pub fn resolve_pending(&self, call_id: CallId, ok: bool, value: Value) {
        let result = if ok {
            Ok(value)
        } else {
            let descriptor = serde_json::from_value(value).unwrap_or_else(|_| {
                crate::errors::ErrorDescriptor::new("malformed_error", "FUTURE(ok=false) carried an unparseable error")
            });
            Err(CallError::CalleeError(descriptor))
        };
        self.inner.pending.resolve(call_id, result);
    }

    /// Fails every call this endpoint is still waiting on. Called once, while shutting down.
    pub fn shut_down(&self) {
        self.inner.pending.fail_all();
    }
}

type Handler<S> = Box<dyn Fn(Rc<RefCell<S>>, Endpoint, Value, Value) -> BoxFuture<Result<Value, CallError>>>;

/// An explicit, per-endpoint-type table mapping method name to handler — the direct replacement
/// for reflective `getattr(self, method)` dispatch. Building one is how a `SubProcess`
/// advertises which `CALL`s it answers; there is no way to invoke a method that wasn't
/// registered here, unlike reflection over arbitrary public methods.
pub struct MethodRegistry<S> {
    handlers: HashMap<String, Handler<S>>,
}

impl<S> Default for MethodRegistry<S> {
    fn default() -> Self {
        MethodRegistry { handlers: HashMap::new() }
    }
}

impl<S: 'static> MethodRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async handler under `name`. `F` takes the endpoint's own business state,
    /// the endpoint handle (to issue further calls of its own), and the call's `args`/`kwargs`.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Rc<RefCell<S>>, Endpoint, Value, Value) -> Fut + 'static,
        Fut: Future<Output = Result<Value, CallError>> + 'static,
    {
        let boxed: Handler<S> = Box::new(move |state, endpoint, args, kwargs| Box::pin(handler(state, endpoint, args, kwargs)));
        self.handlers.insert(name.into(), boxed);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Invokes the handler registered under `method`, or fails fast with
    /// `CallError::MethodNotFound` if none was registered.
    pub fn dispatch(
        &self,
        endpoint_name: &str,
        method: &str,
        state: Rc<RefCell<S>>,
        endpoint: Endpoint,
        args: Value,
        kwargs: Value,
    ) -> Result<BoxFuture<Result<Value, CallError>>, CallError> {
        match self.handlers.get(method) {
            Some(handler) => Ok(handler(state, endpoint, args, kwargs)),
            None => Err(CallError::MethodNotFound {
                endpoint: endpoint_name.to_owned(),
                method: method.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::channel_pair;

    fn test_endpoint(name: &str) -> (Endpoint, crate::mailbox::Mailbox<RoutedEnvelope>) {
        let (writer, reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();
        let pending = PendingCallTable::new();
        (Endpoint::new(name.to_owned(), writer, pending), reader)
    }

    #[tokio::test]
    async fn send_message_offers_a_routed_envelope() {
        let (endpoint, reader) = test_endpoint("pkg.ProcessA");
        endpoint.send_message("pkg.ProcessB", serde_json::json!({"n": 1})).unwrap();
        let routed = reader.recv().await.unwrap();
        assert_eq!(routed.recipient, "pkg.ProcessB");
        assert_eq!(routed.envelope.tag(), "MESSAGE");
    }

    #[tokio::test]
    async fn remote_call_resolves_once_future_arrives() {
        let (endpoint, reader) = test_endpoint("pkg.ProcessA");
        let resolver = endpoint.clone();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let call = tokio::task::spawn_local(async move {
                    endpoint.remote_call("pkg.ProcessB", "sync_call", serde_json::json!([1]), serde_json::json!({})).await
                });

                let routed = reader.recv().await.unwrap();
                let call_id = match routed.envelope {
                    Envelope::Call { call_id, .. } => call_id,
                    _ => panic!("expected CALL"),
                };
                resolver.resolve_pending(call_id, true, serde_json::json!("ack"));

                let result = call.await.unwrap();
                assert_eq!(result.unwrap(), serde_json::json!("ack"));
            })
            .await;
    }

    #[tokio::test]
    async fn remote_call_with_timeout_times_out_without_a_future() {
        let (writer, _reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();
        let pending = PendingCallTable::new();
        let endpoint = Endpoint::new("pkg.ProcessA".to_owned(), writer, pending);
        let result = endpoint
            .remote_call_with_timeout(
                "pkg.ProcessB",
                "sync_call",
                serde_json::json!([]),
                serde_json::json!({}),
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(result, Err(CallError::Timeout));
    }

    #[tokio::test]
    async fn method_registry_dispatches_registered_method() {
        let registry: MethodRegistry<u32> = MethodRegistry::new().method("double", |state, _endpoint, _args, _kwargs| async move {
            Ok(serde_json::json!(*state.borrow() * 2))
        });
        let (writer, _reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();
        let endpoint = Endpoint::new("pkg.ProcessA".to_owned(), writer, PendingCallTable::new());
        let state = Rc::new(RefCell::new(21u32));
        let fut = registry
            .dispatch("pkg.ProcessA", "double", state, endpoint, Value::Null, Value::Null)
            .unwrap();
        assert_eq!(fut.await.unwrap(), serde_json::json!(42));
    }

    #[tokio::test]
    async fn method_registry_reports_unknown_methods() {
        let registry: MethodRegistry<u32> = MethodRegistry::new();
        let (writer, _reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();
        let endpoint = Endpoint::new("pkg.ProcessA".to_owned(), writer, PendingCallTable::new());
        let state = Rc::new(RefCell::new(0u32));
        let err = registry
            .dispatch("pkg.ProcessA", "missing", state, endpoint, Value::Null, Value::Null)
            .unwrap_err();
        assert_eq!(
            err,
            CallError::MethodNotFound {
                endpoint: "pkg.ProcessA".to_owned(),
                method: "missing".to_owned(),
            }
        );
    }
}
