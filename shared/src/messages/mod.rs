//! Control-channel messages
//!
//! - `value`: variant values carried by calls, replies and signals
//! - `frame`: the tagged frames exchanged on the control socket
//! - `codec`: length-prefixed framing and payload encodings
//! - `signals`: typed server-initiated notifications

pub mod codec;
pub mod frame;
pub mod signals;
pub mod value;

pub use codec::{read_frame, write_frame, WireFormat, MAX_FRAME_SIZE};
pub use frame::{Frame, PROTOCOL_VERSION};
pub use signals::{encode_faces, Signal, SignalKind};
pub use value::{Value, MAX_VALUE_DEPTH};
