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

//! A minimal demonstration binary: two workers, one of which calls back into the other,
//! standing in for the front-end application the core leaves out of scope.

use std::rc::Rc;

use log::info;
use synapse::{Endpoint, MethodRegistry, Service, ServiceConfig, SubProcess, TypedFactory};

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

struct ProcessB;

impl SubProcess for ProcessB {
    fn new(_config: &ServiceConfig, _endpoint: &Endpoint) -> Self {
        ProcessB
    }

    fn registry() -> MethodRegistry<Self> {
        MethodRegistry::new().method("async_call", |_state, endpoint, args, _kwargs| async move {
            let marker = args.get(0).cloned().unwrap_or(serde_json::Value::Null);
            endpoint
                .remote_call(&synapse::naming::fqcn::<ProcessA>(), "sync_call", serde_json::json!([marker]), serde_json::json!({}))
                .await
                .map_err(|e| synapse::errors::CallError::CalleeError(e.into_descriptor()))
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_json(r#"{"host": "127.0.0.1", "port": 8080, "debug": false}"#)?;
    let _log_guard = synapse::logging::init("supervisor", config.debug());

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        // Service::new opens the supervisor's own mailbox/uplink sockets, which requires an
        // active tokio runtime to bind into — so it has to happen in here, not before block_on.
        let service = Service::new(config).expect("failed to construct supervisor");
        let factories: Vec<Rc<dyn synapse::WorkerFactory>> = vec![Rc::new(TypedFactory::<ProcessA>::new()), Rc::new(TypedFactory::<ProcessB>::new())];

        info!("starting supervisor '{}'", service.name());
        if let Err(e) = service.start(factories).await {
            log::error!("supervisor exited with error: {}", e);
        }
    });

    Ok(())
}
