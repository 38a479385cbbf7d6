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

//! The trait business logic implements to become a supervised worker process.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::envelope::Envelope;
use crate::endpoint::{Endpoint, MethodRegistry};
use crate::mailbox::Mailbox;

/// A unit of business logic that runs in its own forked process, addressed on the router by its
/// fully-qualified type name.
///
/// Implementors hold their own state behind `Rc<RefCell<..>>`, the shape every method in their
/// [`MethodRegistry`] receives it as, since a single-threaded per-process event loop never needs
/// `Mutex` or `Arc` to share that state with itself.
pub trait SubProcess: Sized + 'static {
    /// Constructs this worker's initial state. Called once, after `fork()`, before the event
    /// loop starts — so anything opened here (files, child connections) belongs to this process
    /// alone, never to the parent it was copied from.
    fn new(config: &ServiceConfig, endpoint: &Endpoint) -> Self;

    /// Builds the table of methods this worker answers `CALL`s against. Called once at startup;
    /// the table itself never changes afterwards.
    fn registry() -> MethodRegistry<Self>;

    /// Runs once the event loop is live but before the first envelope is handled. The default
    /// implementation does nothing.
    fn before_start(_state: Rc<RefCell<Self>>, _endpoint: &Endpoint) {}

    /// Runs when this worker is being torn down, either by a graceful shutdown or ahead of a
    /// supervisor-initiated respawn. The default implementation does nothing.
    fn on_stop(_state: Rc<RefCell<Self>>, _endpoint: &Endpoint) {}

    /// Observes every `MESSAGE` this worker receives, after the dispatch loop has already
    /// handled `PING`/`CALL`/`FUTURE` bookkeeping. The default implementation ignores the
    /// message.
    fn on_message(_state: Rc<RefCell<Self>>, _endpoint: &Endpoint, _payload: Value) {}
}

/// Applies one inbound envelope to `state`, per §4.3's dispatch rules. `CALL` handlers run on a
/// spawned local task so a handler that itself issues a nested `remote_call` doesn't block this
/// loop from servicing the rest of the mailbox while it awaits the reply.
async fn dispatch_one<S: SubProcess>(envelope: Envelope, state: &Rc<RefCell<S>>, endpoint: &Endpoint, registry: &Rc<MethodRegistry<S>>) {
    match envelope {
        Envelope::Ping => {},
        Envelope::Message(payload) => S::on_message(Rc::clone(state), endpoint, payload),
        Envelope::Call { method, args, kwargs, call_id, reply_to } => {
            match registry.dispatch(endpoint.name(), &method, Rc::clone(state), endpoint.clone(), args, kwargs) {
                Ok(fut) => {
                    let endpoint = endpoint.clone();
                    tokio::task::spawn_local(async move {
                        match fut.await {
                            Ok(value) => endpoint.reply_ok(&reply_to, call_id, value),
                            Err(err) => endpoint.reply_err(&reply_to, call_id, err),
                        }
                    });
                },
                Err(err) => endpoint.reply_err(&reply_to, call_id, err),
            }
        },
        Envelope::Future { call_id, ok, value } => endpoint.resolve_pending(call_id, ok, value),
    }
}

/// Runs a worker's event loop to completion: `before_start`, then alternating between draining
/// the mailbox and checking the watchdog deadline, until either the mailbox closes or the
/// worker has gone `check_timeout` without receiving anything, then `on_stop`.
///
/// Matches §4.5: every inbound envelope (including `PING`) refreshes the liveness clock that the
/// watchdog compares against.
pub async fn run_worker_loop<S: SubProcess>(
    state: Rc<RefCell<S>>,
    endpoint: Endpoint,
    mailbox: Mailbox<Envelope>,
    check_timeout: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let registry = Rc::new(S::registry());
    S::before_start(Rc::clone(&state), &endpoint);

    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    watchdog.tick().await; // first tick fires immediately; consume it so checks start one second in.

    loop {
        tokio::select! {
            received = mailbox.recv() => {
                match received {
                    Ok(envelope) => {
                        endpoint.touch();
                        endpoint.note_received(&envelope);
                        dispatch_one(envelope, &state, &endpoint, &registry).await;
                    },
                    Err(e) => {
                        warn!("worker '{}': mailbox closed ({}), stopping", endpoint.name(), e);
                        break;
                    },
                }
            },
            _ = watchdog.tick() => {
                if endpoint.last_seen_at().elapsed() > check_timeout {
                    warn!(
                        "worker '{}': no envelope in over {:?}, self-terminating",
                        endpoint.name(),
                        check_timeout
                    );
                    break;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("worker '{}': shutdown signal received", endpoint.name());
                    break;
                }
            },
        }
    }

    info!("worker '{}': stopping", endpoint.name());
    S::on_stop(Rc::clone(&state), &endpoint);
    endpoint.shut_down();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RoutedEnvelope;
    use crate::mailbox::channel_pair;
    use crate::pending::PendingCallTable;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Counter {
        messages_seen: usize,
    }

    static STOPPED: AtomicBool = AtomicBool::new(false);
    static STARTED: AtomicBool = AtomicBool::new(false);
    static MESSAGE_TOTAL: AtomicUsize = AtomicUsize::new(0);

    impl SubProcess for Counter {
        fn new(_config: &ServiceConfig, _endpoint: &Endpoint) -> Self {
            Counter { messages_seen: 0 }
        }

        fn registry() -> MethodRegistry<Self> {
            MethodRegistry::new().method("add", |state, _endpoint, args, _kwargs| async move {
                let n = args.as_i64().unwrap_or(0);
                state.borrow_mut().messages_seen += n as usize;
                Ok(serde_json::json!(state.borrow().messages_seen))
            })
        }

        fn before_start(_state: Rc<RefCell<Self>>, _endpoint: &Endpoint) {
            STARTED.store(true, Ordering::SeqCst);
        }

        fn on_stop(_state: Rc<RefCell<Self>>, _endpoint: &Endpoint) {
            STOPPED.store(true, Ordering::SeqCst);
        }

        fn on_message(_state: Rc<RefCell<Self>>, _endpoint: &Endpoint, _payload: Value) {
            MESSAGE_TOTAL.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn loop_runs_before_start_dispatches_and_stops_on_timeout() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let (downlink_writer, downlink_reader) = channel_pair::<Envelope>(8192).unwrap();
                let (uplink_writer, _uplink_reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();
                let endpoint = Endpoint::new("pkg.Counter".to_owned(), uplink_writer, PendingCallTable::new());
                let state = Rc::new(RefCell::new(Counter { messages_seen: 0 }));

                let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
                let handle = tokio::task::spawn_local(run_worker_loop(state, endpoint, downlink_reader, Duration::from_millis(50), shutdown_rx));

                downlink_writer.send(&Envelope::Message(serde_json::json!("hi"))).await.unwrap();
                tokio::time::sleep(Duration::from_millis(200)).await;
                handle.await.unwrap();

                assert!(STARTED.load(Ordering::SeqCst));
                assert!(STOPPED.load(Ordering::SeqCst));
                assert!(MESSAGE_TOTAL.load(Ordering::SeqCst) >= 1);
            })
            .await;
    }
}
