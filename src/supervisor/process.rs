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

//! `fork()`-based child spawning and the subprocess record the supervisor keeps per worker name.

use std::marker::PhantomData;
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use log::{error, info};
use tokio::sync::oneshot;

use crate::config::ServiceConfig;
use crate::endpoint::Endpoint;
use crate::envelope::{Envelope, RoutedEnvelope};
use crate::errors::CoreError;
use crate::mailbox::{self, ChannelWriter};
use crate::pending::PendingCallTable;
use crate::router::Router;
use crate::worker::{run_worker_loop, SubProcess};

/// Approximate mailbox depth, expressed as a send-buffer byte budget (see
/// [`crate::mailbox::channel_pair`]).
const CHANNEL_CAPACITY_BYTES: i32 = 256 * 1024;

/// Everything the supervisor keeps about one running (or pending-respawn) worker.
pub struct SubprocessRecord {
    pub name: String,
    pub pid: libc::pid_t,
    pub downlink: ChannelWriter<Envelope>,
    pub exit_rx: Option<oneshot::Receiver<ExitStatus>>,
    pub last_spawn: Instant,
}

/// Type-erased "how to build and run one kind of worker" so the supervisor can hold a
/// homogeneous `Vec`/`HashMap` of heterogeneous worker classes.
pub trait WorkerFactory {
    fn fqcn(&self) -> String;

    /// Runs entirely inside the freshly forked child: builds its own runtime, binds the raw
    /// sockets inherited from the parent into *that* runtime (a tokio I/O resource only works
    /// against the reactor it was registered with, and the parent's reactor isn't running here),
    /// then builds the worker's own state and endpoint and drives the loop until it exits. Never
    /// returns.
    fn run_in_child(&self, config: &ServiceConfig, name: String, uplink: StdUnixDatagram, downlink: StdUnixDatagram, check_timeout: Duration) -> !;
}

/// A zero-sized `WorkerFactory` for one concrete `SubProcess` type. `PhantomData<fn() -> S>`
/// keeps this unconditionally `Send + Sync` regardless of whether `S` itself is, which matters
/// because the supervisor's factory registry is built once on the main thread before any
/// forking happens and handed around by reference only.
pub struct TypedFactory<S> {
    _marker: PhantomData<fn() -> S>,
}

impl<S> TypedFactory<S> {
    pub fn new() -> Self {
        TypedFactory { _marker: PhantomData }
    }
}

impl<S> Default for TypedFactory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SubProcess> WorkerFactory for TypedFactory<S> {
    fn fqcn(&self) -> String {
        crate::naming::fqcn::<S>()
    }

    fn run_in_child(&self, config: &ServiceConfig, name: String, uplink: StdUnixDatagram, downlink: StdUnixDatagram, check_timeout: Duration) -> ! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build worker runtime");
        let local = tokio::task::LocalSet::new();

        local.block_on(&runtime, async move {
            let uplink_writer = mailbox::writer_from_std::<RoutedEnvelope>(uplink).expect("failed to bind uplink socket in worker runtime");
            let downlink_reader = mailbox::mailbox_from_std::<Envelope>(downlink).expect("failed to bind downlink socket in worker runtime");

            let endpoint = Endpoint::new(name, uplink_writer, PendingCallTable::new());
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            crate::supervisor::signals::worker_signals(shutdown_tx);
            let state = std::rc::Rc::new(std::cell::RefCell::new(S::new(config, &endpoint)));
            run_worker_loop(state, endpoint, downlink_reader, check_timeout, shutdown_rx).await;
        });

        std::process::exit(0);
    }
}

/// Spawns one worker by `fork()`. On success, registers its downlink and uplink with `router`
/// and returns the supervisor-side bookkeeping record; the call never returns in the child
/// (it runs the worker loop and calls `std::process::exit` instead).
pub fn spawn_worker(
    name: &str,
    factory: &dyn WorkerFactory,
    config: &ServiceConfig,
    router: &Router,
) -> Result<SubprocessRecord, CoreError> {
    // Built as plain std sockets, not tokio ones: neither half is bound to a reactor yet, so
    // there is nothing here for `fork()` to leave stale. Each side gets bound into whichever
    // runtime ends up driving it, below.
    let (downlink_writer_raw, downlink_reader_raw) = mailbox::raw_pair(CHANNEL_CAPACITY_BYTES).map_err(CoreError::ChannelSetup)?;
    let (uplink_writer_raw, uplink_reader_raw) = mailbox::raw_pair(CHANNEL_CAPACITY_BYTES).map_err(CoreError::ChannelSetup)?;
    let check_timeout = config.watchdog_check_timeout();

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(CoreError::ForkFailed(std::io::Error::last_os_error()));
    }

    if pid == 0 {
        // Child: never returns. Drop the ends that belong to the parent so they don't linger in
        // this process's fd table past their last real reader/writer.
        drop(downlink_writer_raw);
        drop(uplink_reader_raw);
        let _log_guard = crate::logging::init(name, config.debug());
        info!("worker '{}' starting (pid {})", name, std::process::id());
        factory.run_in_child(config, name.to_owned(), uplink_writer_raw, downlink_reader_raw, check_timeout);
    }

    // Parent: `spawn_worker` always runs on the supervisor's own event loop, so binding here
    // immediately is safe — these ends never cross another fork.
    let downlink_writer = mailbox::writer_from_std::<Envelope>(downlink_writer_raw).map_err(CoreError::ChannelSetup)?;
    let uplink_reader = mailbox::mailbox_from_std::<RoutedEnvelope>(uplink_reader_raw).map_err(CoreError::ChannelSetup)?;

    router.register(name.to_owned(), downlink_writer.clone(), uplink_reader);
    let exit_rx = spawn_exit_watcher(name.to_owned(), pid);

    Ok(SubprocessRecord {
        name: name.to_owned(),
        pid,
        downlink: downlink_writer,
        exit_rx: Some(exit_rx),
        last_spawn: Instant::now(),
    })
}

/// Starts a dedicated blocking thread calling `waitpid` for a genuinely forked (not exec'd)
/// child, since `tokio::process` only manages children it itself exec'd. Resolves the returned
/// receiver once the child has exited.
fn spawn_exit_watcher(name: String, pid: libc::pid_t) -> oneshot::Receiver<ExitStatus> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(format!("exit-watch-{}", name))
        .spawn(move || {
            let mut status: libc::c_int = 0;
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            if ret < 0 {
                error!("waitpid for worker '{}' (pid {}) failed: {}", name, pid, std::io::Error::last_os_error());
                return;
            }
            let exit_status = ExitStatus::from_raw(status);
            let _ = tx.send(exit_status);
        })
        .expect("failed to spawn exit-watcher thread");
    rx
}
