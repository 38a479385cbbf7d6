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
use std::{fmt, io};

/// Errors that can occur standing up or tearing down the supervisor itself, as opposed to errors
/// that occur while servicing a single remote call (see [`CallError`]).
#[derive(Debug)]
pub enum CoreError {
    /// The layered configuration failed to load or a value failed typed conversion.
    Configuration(config::ConfigError),

    /// `fork(2)` itself failed (e.g. process/resource limits).
    ForkFailed(io::Error),

    /// Creating a channel pair (mailbox or router uplink) failed.
    ChannelSetup(io::Error),

    /// `start()` was asked to supervise zero workers, or every worker failed to spawn.
    NoWorkersAvailable,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Configuration(e) => write!(f, "configuration error: {}", e),
            CoreError::ForkFailed(e) => write!(f, "failed to fork worker process: {}", e),
            CoreError::ChannelSetup(e) => write!(f, "failed to set up ipc channel: {}", e),
            CoreError::NoWorkersAvailable => write!(f, "no worker processes could be started"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::Configuration(e) => Some(e),
            CoreError::ForkFailed(e) => Some(e),
            CoreError::ChannelSetup(e) => Some(e),
            CoreError::NoWorkersAvailable => None,
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(e: config::ConfigError) -> Self {
        CoreError::Configuration(e)
    }
}

/// A portable description of a failure, suitable for carrying across the wire inside a
/// `FUTURE(ok=false, ..)` envelope.
#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorDescriptor {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The closed set of ways a single `remote_call` can fail, per the redesign notes: exceptions
/// never flow through the dispatch loop, they are captured into one of these kinds instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The router queue (or the recipient's mailbox) was full when the envelope was offered.
    TransportFull { recipient: String },

    /// The router had no directory entry for the recipient name.
    UnknownRecipient { recipient: String },

    /// The callee has no method registered under that name.
    MethodNotFound { endpoint: String, method: String },

    /// The callee's method ran and returned an error.
    CalleeError(ErrorDescriptor),

    /// An optional deadline on `remote_call` elapsed before a `FUTURE` arrived.
    Timeout,

    /// The endpoint was torn down with this call still outstanding.
    EndpointShutDown,
}

impl CallError {
    /// Renders this error the way it travels on the wire: as the `value` of a
    /// `FUTURE(ok=false, value)` envelope.
    pub fn into_descriptor(self) -> ErrorDescriptor {
        match self {
            CallError::TransportFull { recipient } => {
                ErrorDescriptor::new("transport_full", format!("router queue full while routing to '{}'", recipient))
            },
            CallError::UnknownRecipient { recipient } => {
                ErrorDescriptor::new("unknown_recipient", format!("no endpoint registered as '{}'", recipient))
            },
            CallError::MethodNotFound { endpoint, method } => ErrorDescriptor::new(
                "method_not_found",
                format!("endpoint '{}' has no method '{}'", endpoint, method),
            ),
            CallError::CalleeError(descriptor) => descriptor,
            CallError::Timeout => ErrorDescriptor::new("timeout", "remote_call deadline elapsed"),
            CallError::EndpointShutDown => ErrorDescriptor::new("endpoint_shutdown", "endpoint was torn down"),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::TransportFull { recipient } => write!(f, "router queue full sending to '{}'", recipient),
            CallError::UnknownRecipient { recipient } => write!(f, "unknown recipient '{}'", recipient),
            CallError::MethodNotFound { endpoint, method } => {
                write!(f, "method not found: {}.{}", endpoint, method)
            },
            CallError::CalleeError(descriptor) => write!(f, "callee error: {}", descriptor),
            CallError::Timeout => write!(f, "remote call timed out"),
            CallError::EndpointShutDown => write!(f, "endpoint shut down with call outstanding"),
        }
    }
}

impl std::error::Error for CallError {}
