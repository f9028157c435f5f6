//! Server-initiated signals with fixed, statically declared payloads

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::Value;
use crate::errors::{SharedError, SharedResult};
use crate::types::{CompositeMode, FaceRect};

/// Closed set of signal names the server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    NewModeOnline,
    PreviewPortAdded,
    PreviewPortRemoved,
    ShowFaceMarker,
    ShowTrackMarker,
    SelectFace,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [
        SignalKind::NewModeOnline,
        SignalKind::PreviewPortAdded,
        SignalKind::PreviewPortRemoved,
        SignalKind::ShowFaceMarker,
        SignalKind::ShowTrackMarker,
        SignalKind::SelectFace,
    ];

    /// Canonical wire name
    pub fn name(self) -> &'static str {
        match self {
            SignalKind::NewModeOnline => "new-mode-online",
            SignalKind::PreviewPortAdded => "preview-port-added",
            SignalKind::PreviewPortRemoved => "preview-port-removed",
            SignalKind::ShowFaceMarker => "show-face-marker",
            SignalKind::ShowTrackMarker => "show-track-marker",
            SignalKind::SelectFace => "select-face",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded signal with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    NewModeOnline {
        mode: CompositeMode,
    },
    PreviewPortAdded {
        port: u16,
        serve: i32,
        type_code: i32,
    },
    PreviewPortRemoved {
        port: u16,
        serve: i32,
        type_code: i32,
    },
    ShowFaceMarker {
        faces: Vec<FaceRect>,
    },
    ShowTrackMarker {
        faces: Vec<FaceRect>,
    },
    SelectFace {
        x: i32,
        y: i32,
    },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::NewModeOnline { .. } => SignalKind::NewModeOnline,
            Signal::PreviewPortAdded { .. } => SignalKind::PreviewPortAdded,
            Signal::PreviewPortRemoved { .. } => SignalKind::PreviewPortRemoved,
            Signal::ShowFaceMarker { .. } => SignalKind::ShowFaceMarker,
            Signal::ShowTrackMarker { .. } => SignalKind::ShowTrackMarker,
            Signal::SelectFace { .. } => SignalKind::SelectFace,
        }
    }

    /// Decode a signal frame
    ///
    /// Unknown names yield `Ok(None)`; a known name with a payload of the
    /// wrong shape is an error.
    pub fn decode(name: &str, args: &[Value]) -> SharedResult<Option<Signal>> {
        let Some(kind) = SignalKind::from_name(name) else {
            return Ok(None);
        };
        let payload = Payload { kind, args };

        let signal = match kind {
            SignalKind::NewModeOnline => {
                payload.expect_len(1)?;
                let code = payload.int(0)?;
                let mode = CompositeMode::from_code(code).map_err(|e| payload.malformed(e.to_string()))?;
                Signal::NewModeOnline { mode }
            }
            SignalKind::PreviewPortAdded | SignalKind::PreviewPortRemoved => {
                payload.expect_len(3)?;
                let port = payload.port(0)?;
                let serve = payload.int32(1)?;
                let type_code = payload.int32(2)?;
                if kind == SignalKind::PreviewPortAdded {
                    Signal::PreviewPortAdded { port, serve, type_code }
                } else {
                    Signal::PreviewPortRemoved { port, serve, type_code }
                }
            }
            SignalKind::ShowFaceMarker | SignalKind::ShowTrackMarker => {
                payload.expect_len(1)?;
                let faces = decode_faces(&args[0]).map_err(|message| payload.malformed(message))?;
                if kind == SignalKind::ShowFaceMarker {
                    Signal::ShowFaceMarker { faces }
                } else {
                    Signal::ShowTrackMarker { faces }
                }
            }
            SignalKind::SelectFace => {
                payload.expect_len(2)?;
                Signal::SelectFace {
                    x: payload.int32(0)?,
                    y: payload.int32(1)?,
                }
            }
        };
        Ok(Some(signal))
    }

    /// Encode into the wire name and positional arguments
    pub fn encode(&self) -> (&'static str, Vec<Value>) {
        let args = match self {
            Signal::NewModeOnline { mode } => vec![Value::Int(mode.code())],
            Signal::PreviewPortAdded { port, serve, type_code }
            | Signal::PreviewPortRemoved { port, serve, type_code } => vec![
                Value::from(*port),
                Value::from(*serve),
                Value::from(*type_code),
            ],
            Signal::ShowFaceMarker { faces } | Signal::ShowTrackMarker { faces } => vec![encode_faces(faces)],
            Signal::SelectFace { x, y } => vec![Value::from(*x), Value::from(*y)],
        };
        (self.kind().name(), args)
    }
}

/// Encode face rectangles as an array of `(x, y, w, h)` tuples
pub fn encode_faces(faces: &[FaceRect]) -> Value {
    Value::Array(
        faces
            .iter()
            .map(|face| {
                Value::Tuple(vec![
                    Value::from(face.x),
                    Value::from(face.y),
                    Value::from(face.width),
                    Value::from(face.height),
                ])
            })
            .collect(),
    )
}

fn decode_faces(value: &Value) -> Result<Vec<FaceRect>, String> {
    let items = value
        .as_items()
        .ok_or_else(|| format!("expected array of faces, got {}", value.kind()))?;

    items
        .iter()
        .map(|item| {
            let fields = item
                .as_items()
                .filter(|fields| fields.len() == 4)
                .ok_or_else(|| format!("expected (x, y, w, h), got {item}"))?;
            let mut coords = [0i32; 4];
            for (slot, field) in coords.iter_mut().zip(fields) {
                *slot = field
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| format!("face coordinate {field} is not a 32-bit integer"))?;
            }
            Ok(FaceRect::new(coords[0], coords[1], coords[2], coords[3]))
        })
        .collect()
}

struct Payload<'a> {
    kind: SignalKind,
    args: &'a [Value],
}

impl Payload<'_> {
    fn malformed(&self, message: impl Into<String>) -> SharedError {
        SharedError::MalformedSignal {
            signal: self.kind.name().to_string(),
            message: message.into(),
        }
    }

    fn expect_len(&self, len: usize) -> SharedResult<()> {
        if self.args.len() != len {
            return Err(self.malformed(format!("expected {len} arguments, got {}", self.args.len())));
        }
        Ok(())
    }

    fn int(&self, index: usize) -> SharedResult<i64> {
        let value = &self.args[index];
        value
            .as_i64()
            .ok_or_else(|| self.malformed(format!("argument {index} should be int, got {}", value.kind())))
    }

    fn int32(&self, index: usize) -> SharedResult<i32> {
        let raw = self.int(index)?;
        i32::try_from(raw).map_err(|_| self.malformed(format!("argument {index} out of range: {raw}")))
    }

    fn port(&self, index: usize) -> SharedResult<u16> {
        let raw = self.int(index)?;
        u16::try_from(raw).map_err(|_| self.malformed(format!("argument {index} is not a port: {raw}")))
    }
}
