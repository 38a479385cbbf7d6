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

//! Signal handling for the supervisor process.
//!
//! Registered fresh in every process rather than trusted to survive `fork()` — a forked child
//! inherits its parent's signal mask and dispositions as bytes, not as live `signal-hook`
//! registrations, so each process (supervisor and worker alike) installs its own.

use futures::stream::StreamExt;
use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;

/// Spawns a local task that calls `on_stop` the first time SIGINT or SIGTERM arrives.
/// Per §6, the supervisor schedules a graceful stop from either signal; workers react only to
/// SIGTERM and ignore SIGINT (installed separately by whatever drives the worker's own loop, via
/// [`worker_signals`]).
pub fn supervisor_signals(on_stop: impl Fn() + 'static) {
    let signals = Signals::new([SIGINT, SIGTERM]).expect("failed to register supervisor signal handlers");
    tokio::task::spawn_local(async move {
        let mut signals = signals;
        if let Some(signal) = signals.next().await {
            info!("supervisor: received signal {}, stopping", signal);
            on_stop();
        }
    });
}

/// As [`supervisor_signals`], but for a worker process: SIGTERM flips `shutdown` to `true`
/// (observed by the worker's event loop via `watch::Receiver::changed`), SIGINT is absorbed
/// without effect.
pub fn worker_signals(shutdown: tokio::sync::watch::Sender<bool>) {
    let signals = Signals::new([SIGINT, SIGTERM]).expect("failed to register worker signal handlers");
    tokio::task::spawn_local(async move {
        let mut signals = signals;
        while let Some(signal) = signals.next().await {
            if signal == SIGTERM {
                info!("worker: received SIGTERM, stopping");
                let _ = shutdown.send(true);
                break;
            }
            // SIGINT: absorbed, per §6.
        }
    });
}
