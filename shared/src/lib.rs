//! Shared types for the gst-switch control client
//!
//! Contains the wire-level vocabulary spoken on the control channel and the
//! logging setup used by every component.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{
    // Framing
    read_frame, write_frame, Frame, WireFormat, MAX_FRAME_SIZE, PROTOCOL_VERSION,

    // Payloads
    encode_faces, Signal, SignalKind, Value, MAX_VALUE_DEPTH,
};
