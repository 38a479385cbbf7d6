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

//! Process-crossing scenarios from the core's testable-properties list (S1, S3, S4, S6). These
//! really `fork()` worker processes rather than mocking them, matching the out-of-process style
//! the teacher's own integration-test crate used against real backend daemons.

use std::rc::Rc;
use std::time::Duration;

use synapse::{Endpoint, MethodRegistry, Service, ServiceConfig, SubProcess, TypedFactory, WorkerFactory};

/// `fork()` only promises a sane child when it's called from a process with no other threads
/// concurrently touching global state (the allocator arenas, in particular). Cargo's default
/// multi-threaded test runner violates that, so every test in this file takes this lock before
/// spawning a single worker, serializing the risky part against its siblings in this binary.
static FORK_SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());

struct ProcessA;

impl SubProcess for ProcessA {
    fn new(_config: &ServiceConfig, _endpoint: &Endpoint) -> Self {
        ProcessA
    }

    fn registry() -> MethodRegistry<Self> {
        MethodRegistry::new().method("sync_call", |_state, _endpoint, args, _kwargs| async move {
            let marker = args.get(0).cloned().unwrap_or(serde_json::Value::Null);
            Ok(serde_json::json!({
                "method": "sync_call",
                "marker": marker,
                "pid": std::process::id(),
            }))
        })
    }
}

fn run_local<F: std::future::Future<Output = ()>>(fut: F) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, fut);
}

type ForkGuard = std::sync::MutexGuard<'static, ()>;

fn lock_fork() -> ForkGuard {
    FORK_SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn test_service() -> Service {
    let config = ServiceConfig::from_json(r#"{"host":"127.0.0.1","port":0,"debug":false,"watchdog_check_timeout":2.0}"#).unwrap();
    Service::new(config).unwrap()
}

/// Drives `service.start(..)` as a background local task. `Router::run` and the supervisor's own
/// dispatch loop — the only places that drain the shared router queue and the supervisor's own
/// mailbox, respectively — only run inside `start()`, so a test that wants `remote_call`/
/// `send_message` to go anywhere has to have this running first.
fn start_in_background(service: &Service, factory: Rc<dyn WorkerFactory>) -> tokio::task::JoinHandle<()> {
    let service = service.clone();
    tokio::task::spawn_local(async move {
        if let Err(e) = service.start(vec![factory]).await {
            panic!("service.start failed: {}", e);
        }
    })
}

/// S1: one-hop call. The supervisor calls `sync_call` on a single forked worker and the future
/// resolves with exactly that worker's reply.
#[test]
fn one_hop_call_resolves_with_the_callees_reply() {
    let _guard = lock_fork();
    run_local(async move {
        let service = test_service();
        let factory: Rc<dyn WorkerFactory> = Rc::new(TypedFactory::<ProcessA>::new());
        let name = factory.fqcn();
        let handle = start_in_background(&service, factory);

        // Give the router's forwarder task and the child's event loop a moment to come up.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = service.remote_call(&name, "sync_call", serde_json::json!(["hello"]), serde_json::json!({})).await.unwrap();
        assert_eq!(result["method"], "sync_call");
        assert_eq!(result["marker"], "hello");
        assert!(result["pid"].as_u64().unwrap() > 0);

        service.stop();
        handle.await.unwrap();
    });
}

/// S3: method-not-found. Calling an unregistered method name rejects with a lookup-error
/// descriptor naming the endpoint and method, and the callee keeps answering afterwards.
#[test]
fn unknown_method_rejects_without_killing_the_worker() {
    let _guard = lock_fork();
    run_local(async move {
        let service = test_service();
        let factory: Rc<dyn WorkerFactory> = Rc::new(TypedFactory::<ProcessA>::new());
        let name = factory.fqcn();
        let handle = start_in_background(&service, factory);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let err = service
            .remote_call(&name, "nonexistent", serde_json::json!([]), serde_json::json!({}))
            .await
            .unwrap_err();
        let descriptor = err.into_descriptor();
        assert_eq!(descriptor.kind, "method_not_found");
        assert!(descriptor.message.contains("nonexistent"));

        // The worker is still alive: a valid call afterwards still succeeds.
        let result = service.remote_call(&name, "sync_call", serde_json::json!(["still alive"]), serde_json::json!({})).await.unwrap();
        assert_eq!(result["marker"], "still alive");

        service.stop();
        handle.await.unwrap();
    });
}

/// S4: worker crash and respawn. Killing a worker's process out from under the supervisor
/// produces a fresh worker under the same name within a bounded time, and it answers calls with
/// a new pid.
#[test]
fn killed_worker_is_respawned_under_the_same_name() {
    let _guard = lock_fork();
    run_local(async move {
        let service = test_service();
        let factory: Rc<dyn WorkerFactory> = Rc::new(TypedFactory::<ProcessA>::new());
        let name = factory.fqcn();
        let handle = start_in_background(&service, factory);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let before = service.remote_call(&name, "sync_call", serde_json::json!([]), serde_json::json!({})).await.unwrap();
        let original_pid = before["pid"].as_u64().unwrap() as libc::pid_t;

        unsafe {
            libc::kill(original_pid, libc::SIGKILL);
        }

        // Respawn delay is 200ms; give the exit watcher and the fresh fork time to settle.
        tokio::time::sleep(Duration::from_millis(600)).await;

        let after = service.remote_call(&name, "sync_call", serde_json::json!([]), serde_json::json!({})).await.unwrap();
        let new_pid = after["pid"].as_u64().unwrap() as libc::pid_t;
        assert_ne!(original_pid, new_pid, "respawned worker should have a fresh pid");

        service.stop();
        handle.await.unwrap();
    });
}

/// S6: overflow. Flooding a worker's mailbox past capacity drops envelopes with a log entry
/// rather than panicking or wedging the router; the worker still answers a call issued
/// afterwards.
#[test]
fn overflowing_a_mailbox_drops_messages_without_crashing() {
    let _guard = lock_fork();
    run_local(async move {
        let service = test_service();
        let factory: Rc<dyn WorkerFactory> = Rc::new(TypedFactory::<ProcessA>::new());
        let name = factory.fqcn();
        let handle = start_in_background(&service, factory);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Flood far past the per-worker channel's buffer budget. None of these are awaited for a
        // reply, so this should complete quickly regardless of how many are ultimately dropped.
        for i in 0..5000 {
            let _ = service.send_message(&name, serde_json::json!({"n": i}));
        }

        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = service.remote_call(&name, "sync_call", serde_json::json!(["after-flood"]), serde_json::json!({})).await.unwrap();
        assert_eq!(result["marker"], "after-flood");

        service.stop();
        handle.await.unwrap();
    });
}
