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

//! The four-variant wire protocol exchanged between endpoints via the router.

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

/// A sender-local identifier correlating a `CALL` with its `FUTURE` reply.
///
/// Generated by a monotonic per-endpoint counter; never a pointer or address, so that it stays
/// meaningful after crossing a process boundary (see the redesign notes on the source's
/// shared-memory future table).
pub type CallId = u64;

/// The message unit exchanged over the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    /// Liveness beacon. No payload.
    Ping,

    /// Fire-and-forget user datum.
    Message(Value),

    /// Request a named method on the recipient; the reply is addressed to `reply_to` carrying
    /// `call_id`.
    Call {
        method: String,
        args: Value,
        kwargs: Value,
        call_id: CallId,
        reply_to: String,
    },

    /// Reply to a prior `Call`. `ok == true` carries the result in `value`; `ok == false` carries
    /// an error descriptor (encoded as a JSON value so it can travel the same wire as a normal
    /// result).
    Future { call_id: CallId, ok: bool, value: Value },
}

impl Envelope {
    pub fn is_ping(&self) -> bool {
        matches!(self, Envelope::Ping)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::Ping => "PING",
            Envelope::Message(_) => "MESSAGE",
            Envelope::Call { .. } => "CALL",
            Envelope::Future { .. } => "FUTURE",
        }
    }
}

/// An envelope plus the name of its intended recipient, as carried on the shared router queue.
///
/// Every endpoint offers `RoutedEnvelope`s into the router queue; the router is the only party
/// that ever reads one back out, and it routes on `recipient` alone without ever looking inside
/// `envelope` (§4.2: "The router never interprets envelope contents").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedEnvelope {
    pub recipient: String,
    pub envelope: Envelope,
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::matches;

    #[test]
    fn envelope_round_trips_through_json() {
        let original = Envelope::Call {
            method: "sync_call".to_owned(),
            args: serde_json::json!(["hello"]),
            kwargs: serde_json::json!({}),
            call_id: 42,
            reply_to: "pkg.Service".to_owned(),
        };
        let bytes = serde_json::to_vec(&original).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(decoded, Envelope::Call { .. }));
        match decoded {
            Envelope::Call { method, call_id, reply_to, .. } => {
                assert_eq!(method, "sync_call");
                assert_eq!(call_id, 42);
                assert_eq!(reply_to, "pkg.Service");
            },
            other => panic!("unexpected variant decoded: {:?}", other),
        }
    }

    #[test]
    fn ping_has_no_payload_and_round_trips() {
        let bytes = serde_json::to_vec(&Envelope::Ping).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert!(decoded.is_ping());
    }

    #[test]
    fn routed_envelope_carries_recipient_alongside_payload() {
        let routed = RoutedEnvelope {
            recipient: "pkg.ProcessA".to_owned(),
            envelope: Envelope::Message(serde_json::json!({"hello": "world"})),
        };
        let bytes = serde_json::to_vec(&routed).unwrap();
        let decoded: RoutedEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.recipient, "pkg.ProcessA");
        assert_eq!(decoded.envelope.tag(), "MESSAGE");
    }
}
