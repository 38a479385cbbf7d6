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

//! The supervisor (`Service`): forks workers, registers them with the router, pings them,
//! respawns them on exit, and is itself an addressable endpoint.

pub mod process;
pub mod signals;
pub mod watchdog;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::ServiceConfig;
use crate::endpoint::Endpoint;
use crate::envelope::{Envelope, RoutedEnvelope};
use crate::errors::{CallError, CoreError};
use crate::mailbox::{channel_pair, ChannelWriter, Mailbox};
use crate::pending::PendingCallTable;
use crate::router::Router;

pub use process::{SubprocessRecord, TypedFactory, WorkerFactory};

const OWN_CHANNEL_CAPACITY_BYTES: i32 = 256 * 1024;
const RESPAWN_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Running,
    Stopping,
    Stopped,
}

struct ServiceInner {
    config: ServiceConfig,
    router: Rc<Router>,
    own_endpoint: Endpoint,
    own_mailbox: RefCell<Option<Mailbox<Envelope>>>,
    records: RefCell<HashMap<String, SubprocessRecord>>,
    factories: RefCell<HashMap<String, Rc<dyn WorkerFactory>>>,
    downlinks: Rc<RefCell<HashMap<String, ChannelWriter<Envelope>>>>,
    state: Cell<LifecycleState>,
    stop_tx: tokio::sync::watch::Sender<bool>,
    stop_rx: RefCell<tokio::sync::watch::Receiver<bool>>,
}

/// The supervisor handle. Cheaply cloneable (every clone shares the same state via `Rc`); clones
/// are how signal handlers, the ping timer, and exit-watcher callbacks all reach back into the
/// same supervisor without a second copy of the router or the subprocess table.
#[derive(Clone)]
pub struct Service {
    inner: Rc<ServiceInner>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Result<Self, CoreError> {
        let router = Rc::new(Router::new());
        let own_name = crate::naming::fqcn::<Service>();

        let (own_downlink_writer, own_downlink_reader) =
            channel_pair::<Envelope>(OWN_CHANNEL_CAPACITY_BYTES).map_err(CoreError::ChannelSetup)?;
        let (own_uplink_writer, own_uplink_reader) =
            channel_pair::<RoutedEnvelope>(OWN_CHANNEL_CAPACITY_BYTES).map_err(CoreError::ChannelSetup)?;

        router.register(own_name.clone(), own_downlink_writer, own_uplink_reader);
        let own_endpoint = Endpoint::new(own_name, own_uplink_writer, PendingCallTable::new());

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

        Ok(Service {
            inner: Rc::new(ServiceInner {
                config,
                router,
                own_endpoint,
                own_mailbox: RefCell::new(Some(own_downlink_reader)),
                records: RefCell::new(HashMap::new()),
                factories: RefCell::new(HashMap::new()),
                downlinks: Rc::new(RefCell::new(HashMap::new())),
                state: Cell::new(LifecycleState::Init),
                stop_tx,
                stop_rx: RefCell::new(stop_rx),
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    /// The supervisor's own address. Workers use this to `remote_call` back into the
    /// supervisor process.
    pub fn name(&self) -> &str {
        self.inner.own_endpoint.name()
    }

    /// Inherited from `Endpoint`, per §6: issues a remote call against a registered worker (or
    /// any other registered endpoint name).
    pub async fn remote_call(&self, recipient: &str, method: &str, args: serde_json::Value, kwargs: serde_json::Value) -> Result<serde_json::Value, CallError> {
        self.inner.own_endpoint.remote_call(recipient, method, args, kwargs).await
    }

    pub fn send_message(&self, recipient: &str, payload: serde_json::Value) -> Result<(), CallError> {
        self.inner.own_endpoint.send_message(recipient, payload)
    }

    /// Forks and registers one worker under `name`. If a live record already exists under that
    /// name, it is terminated first. No-ops once the supervisor is stopping.
    pub fn spawn(&self, name: &str, factory: Rc<dyn WorkerFactory>) -> Result<(), CoreError> {
        if matches!(self.inner.state.get(), LifecycleState::Stopping | LifecycleState::Stopped) {
            return Ok(());
        }

        if let Some(prior) = self.inner.records.borrow_mut().remove(name) {
            terminate_child(prior.pid);
            self.inner.router.deregister(name);
        }

        let record = process::spawn_worker(name, factory.as_ref(), &self.inner.config, &self.inner.router)?;
        self.inner.downlinks.borrow_mut().insert(name.to_owned(), record.downlink.clone());
        self.inner.factories.borrow_mut().insert(name.to_owned(), Rc::clone(&factory));
        self.watch_for_exit(name.to_owned(), record);

        Ok(())
    }

    fn watch_for_exit(&self, name: String, mut record: SubprocessRecord) {
        let exit_rx = record.exit_rx.take().expect("exit watcher already consumed");
        let service = self.clone();
        self.inner.records.borrow_mut().insert(name.clone(), record);

        tokio::task::spawn_local(async move {
            match exit_rx.await {
                Ok(status) => warn!("worker '{}' exited: {:?}", name, status),
                Err(_) => warn!("worker '{}' exit watcher dropped without a status", name),
            }

            service.inner.records.borrow_mut().remove(&name);
            service.inner.downlinks.borrow_mut().remove(&name);
            service.inner.router.deregister(&name);

            if matches!(service.inner.state.get(), LifecycleState::Stopping | LifecycleState::Stopped) {
                return;
            }

            tokio::time::sleep(RESPAWN_DELAY).await;

            let factory = service.inner.factories.borrow().get(&name).cloned();
            if let Some(factory) = factory {
                info!("respawning worker '{}'", name);
                if let Err(e) = service.spawn(&name, factory) {
                    error!("failed to respawn worker '{}': {}", name, e);
                }
            }
        });
    }

    /// Runs the supervisor to completion: spawns every listed worker, installs signal handlers,
    /// starts the ping timer, then drives its own dispatch loop until `stop()` is called.
    /// Returns `Err(CoreError::NoWorkersAvailable)` if every worker failed to spawn.
    pub async fn start(&self, worker_factories: Vec<Rc<dyn WorkerFactory>>) -> Result<(), CoreError> {
        let mut spawned = 0usize;
        for factory in worker_factories {
            let name = factory.fqcn();
            match self.spawn(&name, factory) {
                Ok(()) => spawned += 1,
                Err(e) => error!("failed to spawn worker '{}': {}", name, e),
            }
        }
        if spawned == 0 {
            return Err(CoreError::NoWorkersAvailable);
        }

        let stop_handle = self.clone();
        signals::supervisor_signals(move || stop_handle.stop());

        let router = Rc::clone(&self.inner.router);
        tokio::task::spawn_local(async move {
            router.run().await;
        });

        watchdog::start_ping_timer(Rc::clone(&self.inner.downlinks), self.inner.config.watchdog_ping_timeout());

        self.inner.state.set(LifecycleState::Running);
        info!("supervisor '{}': running with {} worker(s)", self.name(), spawned);

        self.run_own_dispatch_loop().await;

        self.terminate_all_children();
        self.inner.state.set(LifecycleState::Stopped);
        Ok(())
    }

    /// Requests a graceful stop. Idempotent; safe to call from a signal callback since it only
    /// flips a flag rather than blocking or touching child processes directly.
    pub fn stop(&self) {
        if self.inner.state.get() == LifecycleState::Stopping || self.inner.state.get() == LifecycleState::Stopped {
            return;
        }
        self.inner.state.set(LifecycleState::Stopping);
        let _ = self.inner.stop_tx.send(true);
    }

    async fn run_own_dispatch_loop(&self) {
        let mailbox = self
            .inner
            .own_mailbox
            .borrow_mut()
            .take()
            .expect("start() must only be called once");
        let mut stop_rx = self.inner.stop_rx.borrow().clone();

        loop {
            tokio::select! {
                received = mailbox.recv() => {
                    match received {
                        Ok(envelope) => self.handle_own_envelope(envelope),
                        Err(e) => {
                            warn!("supervisor: own mailbox closed ({}), stopping", e);
                            break;
                        },
                    }
                },
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        info!("supervisor: stop requested");
                        break;
                    }
                },
            }
        }
    }

    fn handle_own_envelope(&self, envelope: Envelope) {
        self.inner.own_endpoint.touch();
        self.inner.own_endpoint.note_received(&envelope);
        match envelope {
            Envelope::Ping => {},
            Envelope::Message(payload) => {
                info!("supervisor: received message {:?}", payload);
            },
            Envelope::Call { call_id, reply_to, method, .. } => {
                warn!("supervisor: no method '{}' (supervisor exposes no CALL surface)", method);
                self.inner.own_endpoint.reply_err(
                    &reply_to,
                    call_id,
                    CallError::MethodNotFound {
                        endpoint: self.name().to_owned(),
                        method,
                    },
                );
            },
            Envelope::Future { call_id, ok, value } => {
                self.inner.own_endpoint.resolve_pending(call_id, ok, value);
            },
        }
    }

    fn terminate_all_children(&self) {
        let names: Vec<String> = self.inner.records.borrow().keys().cloned().collect();
        for name in names {
            if let Some(record) = self.inner.records.borrow_mut().remove(&name) {
                terminate_child(record.pid);
            }
            self.inner.router.deregister(&name);
        }
        self.inner.downlinks.borrow_mut().clear();
    }
}

fn terminate_child(pid: libc::pid_t) {
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}
