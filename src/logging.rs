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

//! Process-wide logging setup.
//!
//! Every process (supervisor and each forked worker) builds its own drain and its own
//! `slog-async` background thread; a drain built before `fork()` would leave the child with a
//! dangling writer end and no thread to service it, so `init()` is always called fresh, after
//! the process is the one it's going to stay as.

use slog::{o, Drain, Logger};

/// Holds the `slog-scope` and `slog-stdlog` guards alive for the process's lifetime. Dropping it
/// tears the global logger back down; callers should keep it bound in `main` (or at the top of a
/// forked worker's entry point) rather than discard it.
pub struct GlobalLoggerGuard {
    _scope: slog_scope::GlobalLoggerGuard,
}

/// Builds a terminal-formatted, asynchronous drain and installs it as the process-wide `slog`
/// logger, bridging the `log` crate's `trace!`/`debug!`/`info!`/`warn!`/`error!` macros used
/// throughout the rest of the crate.
pub fn init(component: &str, debug: bool) -> GlobalLoggerGuard {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    let level = if debug { slog::Level::Trace } else { slog::Level::Info };
    let drain = slog::LevelFilter::new(drain, level).fuse();

    let logger = Logger::root(drain, o!("component" => component.to_owned(), "pid" => std::process::id()));

    let scope_guard = slog_scope::set_global_logger(logger);

    // `log::set_logger` can only succeed once per address space. A forked worker inherits its
    // parent's copy of that "already set" flag along with everything else in memory, so a second
    // call here is expected post-fork, not a bug; only the scope logger above actually needs
    // refreshing per process.
    let _ = slog_stdlog::init();

    GlobalLoggerGuard { _scope: scope_guard }
}
