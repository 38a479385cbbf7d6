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

//! The supervisor-side router: a name-to-mailbox directory and the single reader draining one
//! logical queue of inbound envelopes.
//!
//! Physically there is one uplink socket per registered endpoint, each drained by its own
//! forwarder task, because a `UnixDatagram` pair is how an endpoint's channel survives `fork()`.
//! Those N forwarders all feed one `tokio::sync::mpsc::UnboundedReceiver`, so from
//! [`Router::route_one`]'s point of view there is exactly one queue and one reader, matching the
//! "single shared queue" design this supervisor presents to callers. The router never inspects
//! an envelope's contents, only its recipient: a routed envelope arrives tagged with its
//! recipient's name, and what reaches the recipient's own mailbox is the bare `Envelope` again,
//! with that name stripped off.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace, warn};
use tokio::sync::mpsc;

use crate::envelope::{Envelope, RoutedEnvelope};
use crate::errors::CallError;
use crate::mailbox::{ChannelWriter, Mailbox};

/// A single entry in the router's directory: the downlink used to deliver envelopes addressed
/// to this recipient.
struct Route {
    downlink: ChannelWriter<Envelope>,
}

/// The name-to-route directory plus the one queue every registered endpoint's uplink feeds into.
pub struct Router {
    routes: Rc<RefCell<HashMap<String, Route>>>,
    queue_tx: mpsc::UnboundedSender<RoutedEnvelope>,
    queue_rx: RefCell<mpsc::UnboundedReceiver<RoutedEnvelope>>,
}

impl Router {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Router {
            routes: Rc::new(RefCell::new(HashMap::new())),
            queue_tx,
            queue_rx: RefCell::new(queue_rx),
        }
    }

    /// Registers `name` as a routable recipient and starts a forwarder task draining its
    /// uplink into the shared queue. `downlink` delivers bare envelopes into `name`'s own
    /// mailbox; `uplink` is the mailbox this endpoint's own process sends routed envelopes out
    /// on (addressed to whatever recipient it's calling or messaging).
    pub fn register(&self, name: String, downlink: ChannelWriter<Envelope>, uplink: Mailbox<RoutedEnvelope>) {
        debug!("router: registering endpoint '{}'", name);
        self.routes.borrow_mut().insert(name.clone(), Route { downlink });

        let queue_tx = self.queue_tx.clone();
        tokio::task::spawn_local(async move {
            loop {
                match uplink.recv().await {
                    Ok(routed) => {
                        if queue_tx.send(routed).is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        warn!("router: uplink forwarder for '{}' exiting: {}", name, e);
                        break;
                    },
                }
            }
        });
    }

    /// Removes `name` from the directory. Envelopes still addressed to it after this point fail
    /// with `CallError::UnknownRecipient`.
    pub fn deregister(&self, name: &str) {
        debug!("router: deregistering endpoint '{}'", name);
        self.routes.borrow_mut().remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.routes.borrow().contains_key(name)
    }

    /// Delivers one already-dequeued envelope to its recipient's downlink.
    fn deliver(&self, routed: RoutedEnvelope) -> Result<(), CallError> {
        let routes = self.routes.borrow();
        match routes.get(&routed.recipient) {
            Some(route) => route.downlink.try_send(&routed.envelope).map_err(|_| CallError::TransportFull {
                recipient: routed.recipient.clone(),
            }),
            None => Err(CallError::UnknownRecipient {
                recipient: routed.recipient.clone(),
            }),
        }
    }

    /// Dequeues and routes exactly one envelope. Returns `None` once every registered endpoint's
    /// forwarder has exited and the queue is drained for good (i.e. the supervisor is shutting
    /// down).
    pub async fn route_one(&self) -> Option<Result<(), CallError>> {
        let routed = self.queue_rx.borrow_mut().recv().await?;
        trace!("router: routing {} to '{}'", routed.envelope.tag(), routed.recipient);
        Some(self.deliver(routed))
    }

    /// Drives the router until every endpoint's uplink forwarder has exited.
    pub async fn run(&self) {
        while let Some(result) = self.route_one().await {
            if let Err(e) = result {
                warn!("router: delivery failed: {}", e);
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Router::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::channel_pair;

    #[tokio::test]
    async fn routes_message_to_registered_recipient() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let router = Router::new();

                let (recipient_downlink_writer, recipient_downlink_reader) = channel_pair::<Envelope>(8192).unwrap();
                let (sender_uplink_writer, sender_uplink_reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();

                router.register("pkg.ProcessB".to_owned(), recipient_downlink_writer, sender_uplink_reader);

                sender_uplink_writer
                    .send(&RoutedEnvelope {
                        recipient: "pkg.ProcessB".to_owned(),
                        envelope: Envelope::Message(serde_json::json!("hi")),
                    })
                    .await
                    .unwrap();

                let result = router.route_one().await.unwrap();
                assert!(result.is_ok());

                let delivered = recipient_downlink_reader.recv().await.unwrap();
                assert_eq!(delivered.tag(), "MESSAGE");
            })
            .await;
    }

    #[tokio::test]
    async fn routing_to_unregistered_recipient_fails() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let router = Router::new();
                let (downlink_writer, _downlink_reader) = channel_pair::<Envelope>(8192).unwrap();
                let (uplink_writer, uplink_reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();
                router.register("pkg.ProcessA".to_owned(), downlink_writer, uplink_reader);

                uplink_writer
                    .send(&RoutedEnvelope {
                        recipient: "pkg.NoSuchEndpoint".to_owned(),
                        envelope: Envelope::Ping,
                    })
                    .await
                    .unwrap();

                let result = router.route_one().await.unwrap();
                assert_eq!(
                    result.unwrap_err(),
                    CallError::UnknownRecipient {
                        recipient: "pkg.NoSuchEndpoint".to_owned()
                    }
                );
            })
            .await;
    }

    #[tokio::test]
    async fn deregistered_recipient_is_no_longer_routable() {
        let router = Router::new();
        let (downlink_writer, _downlink_reader) = channel_pair::<Envelope>(8192).unwrap();
        let (_uplink_writer, uplink_reader) = channel_pair::<RoutedEnvelope>(8192).unwrap();
        router.register("pkg.ProcessA".to_owned(), downlink_writer, uplink_reader);
        assert!(router.is_registered("pkg.ProcessA"));
        router.deregister("pkg.ProcessA");
        assert!(!router.is_registered("pkg.ProcessA"));
    }
}
