//! Control-channel frames
//!
//! Every message on the control socket is one `Frame`. Calls flow from the
//! client to the server; returns, errors and signals flow back. Replies are
//! tagged with the serial of the call they answer so they can never be
//! confused with an unsolicited signal.

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Version negotiated in the `Hello`/`Welcome` handshake
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame sent by the client after the socket opens
    Hello { protocol: u32 },

    /// Server acceptance of the handshake
    Welcome { protocol: u32 },

    /// Remote method invocation
    Call {
        serial: u32,
        method: String,
        args: Vec<Value>,
    },

    /// Successful completion of the call with serial `reply_to`
    Return { reply_to: u32, value: Value },

    /// Failure reported by the server for the call with serial `reply_to`
    Error {
        reply_to: u32,
        name: String,
        message: String,
    },

    /// Unsolicited server notification
    Signal { name: String, args: Vec<Value> },
}

impl Frame {
    pub fn call(serial: u32, method: impl Into<String>, args: Vec<Value>) -> Self {
        Frame::Call {
            serial,
            method: method.into(),
            args,
        }
    }

    pub fn signal(name: impl Into<String>, args: Vec<Value>) -> Self {
        Frame::Signal {
            name: name.into(),
            args,
        }
    }

    /// Serial of the call this frame answers, if it is a reply
    pub fn reply_to(&self) -> Option<u32> {
        match self {
            Frame::Return { reply_to, .. } | Frame::Error { reply_to, .. } => Some(*reply_to),
            _ => None,
        }
    }

    /// Frame tag for logging
    pub fn tag(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Welcome { .. } => "welcome",
            Frame::Call { .. } => "call",
            Frame::Return { .. } => "return",
            Frame::Error { .. } => "error",
            Frame::Signal { .. } => "signal",
        }
    }
}
