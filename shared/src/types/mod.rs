//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SharedError;

/// Component of the control client that emits a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Command line front-end
    Cli,
    /// Server process lifecycle owner
    Supervisor,
    /// Control-channel socket owner
    Connection,
    /// Signal fan-out
    Dispatcher,
    /// Typed remote-call facade
    Controller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Cli => write!(f, "cli"),
            Role::Supervisor => write!(f, "supervisor"),
            Role::Connection => write!(f, "connection"),
            Role::Dispatcher => write!(f, "dispatcher"),
            Role::Controller => write!(f, "controller"),
        }
    }
}

/// How the server combines the two active video sources into its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeMode {
    /// Only channel A is shown
    None,
    /// Channel B is drawn as a small window over channel A
    PictureInPicture,
    /// Channel A large, channel B as a side preview
    DualPreview,
    /// Channels A and B side by side at equal size
    DualEqual,
}

impl CompositeMode {
    pub const ALL: [CompositeMode; 4] = [
        CompositeMode::None,
        CompositeMode::PictureInPicture,
        CompositeMode::DualPreview,
        CompositeMode::DualEqual,
    ];

    /// Numeric code used on the control channel
    pub fn code(self) -> i64 {
        match self {
            CompositeMode::None => 0,
            CompositeMode::PictureInPicture => 1,
            CompositeMode::DualPreview => 2,
            CompositeMode::DualEqual => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, SharedError> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.code() == code)
            .ok_or_else(|| SharedError::InvalidValue {
                field: "composite_mode".to_string(),
                value: code.to_string(),
            })
    }
}

impl fmt::Display for CompositeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeMode::None => write!(f, "none"),
            CompositeMode::PictureInPicture => write!(f, "pip"),
            CompositeMode::DualPreview => write!(f, "dual-preview"),
            CompositeMode::DualEqual => write!(f, "dual-equal"),
        }
    }
}

impl std::str::FromStr for CompositeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "0" => Ok(CompositeMode::None),
            "pip" | "picture-in-picture" | "1" => Ok(CompositeMode::PictureInPicture),
            "dual-preview" | "preview" | "2" => Ok(CompositeMode::DualPreview),
            "dual-equal" | "equal" | "3" => Ok(CompositeMode::DualEqual),
            _ => Err(format!("Unknown composite mode: {s}")),
        }
    }
}

/// Output channel a source port can be switched onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoChannel {
    A,
    B,
    Audio,
}

impl VideoChannel {
    /// Channel codes are the ASCII letters the server expects
    pub fn code(self) -> i64 {
        match self {
            VideoChannel::A => i64::from(b'A'),
            VideoChannel::B => i64::from(b'B'),
            VideoChannel::Audio => i64::from(b'a'),
        }
    }
}

impl fmt::Display for VideoChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoChannel::A => write!(f, "a"),
            VideoChannel::B => write!(f, "b"),
            VideoChannel::Audio => write!(f, "audio"),
        }
    }
}

impl std::str::FromStr for VideoChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(VideoChannel::A),
            "B" | "b" => Ok(VideoChannel::B),
            "audio" | "AUDIO" => Ok(VideoChannel::Audio),
            _ => Err(format!("Unknown channel: {s}")),
        }
    }
}

/// Rectangle in output-video coordinates, used for face and tracking markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl FaceRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// A preview port the server exposes for one unswitched input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewPort {
    pub port: u16,
    pub serve: i32,
    pub type_code: i32,
}
