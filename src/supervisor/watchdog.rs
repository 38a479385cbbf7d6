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

//! The supervisor's half of the watchdog: a periodic `PING` fanned out to every registered
//! worker. The worker's half (liveness deadline check) lives in [`crate::worker::run_worker_loop`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use log::warn;

use crate::envelope::Envelope;
use crate::mailbox::ChannelWriter;

/// Spawns a local task that sends `PING` to every name currently present in `downlinks` once
/// per `ping_interval`, forever (until the process exits). `downlinks` is read fresh on every
/// tick, so workers registered or removed after this starts are picked up automatically.
pub fn start_ping_timer(downlinks: Rc<RefCell<HashMap<String, ChannelWriter<Envelope>>>>, ping_interval: Duration) {
    tokio::task::spawn_local(async move {
        let mut interval = tokio::time::interval(ping_interval);
        loop {
            interval.tick().await;
            let names_and_writers: Vec<(String, ChannelWriter<Envelope>)> =
                downlinks.borrow().iter().map(|(name, writer)| (name.clone(), writer.clone())).collect();
            for (name, writer) in names_and_writers {
                if writer.try_send(&Envelope::Ping).is_err() {
                    warn!("watchdog: PING to '{}' dropped, router uplink/downlink full", name);
                }
            }
        }
    });
}
