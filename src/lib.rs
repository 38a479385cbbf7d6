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

//! A small multi-process IPC runtime: a router, per-endpoint mailboxes, a watchdog that
//! restarts silent workers, and a remote-call bridge that turns a method name plus arguments on
//! one process into a completed future on another.

pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod errors;
pub mod logging;
pub mod mailbox;
pub mod naming;
pub mod pending;
pub mod router;
pub mod supervisor;
pub mod worker;

pub use config::ServiceConfig;
pub use endpoint::{Endpoint, MethodRegistry};
pub use envelope::{CallId, Envelope, RoutedEnvelope};
pub use errors::{CallError, CoreError, ErrorDescriptor};
pub use supervisor::{LifecycleState, Service, TypedFactory, WorkerFactory};
pub use worker::SubProcess;
